use thiserror::Error;

use crate::transport::TransportError;
use crate::types::Operation;

#[derive(Error, Debug)]
pub enum Error {
    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("no computer matches {query:?}")]
    NotFound { query: String },

    #[error("unknown prestage {0:?}")]
    UnknownPrestage(String),

    #[error("unknown building {0:?}")]
    UnknownBuilding(String),

    /// A mutating call came back with something other than success. The status
    /// is the vendor's, unaltered.
    #[error("{operation} failed with status code {status}")]
    Mutation { operation: Operation, status: u16 },

    #[error("could not decode {context}: {reason}")]
    Parse { context: &'static str, reason: String },

    #[error("{context} returned status code {status}")]
    UnexpectedStatus { context: &'static str, status: u16 },

    #[error("invalid prestage directory: {0}")]
    InvalidDirectory(String),

    #[error("invalid base url {url:?}: {reason}")]
    InvalidBaseUrl { url: String, reason: String },

    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl Error {
    /// HTTP status behind the error, when the vendor answered at all.
    pub fn status(&self) -> Option<u16> {
        match self {
            Error::Mutation { status, .. } | Error::UnexpectedStatus { status, .. } => {
                Some(*status)
            }
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
