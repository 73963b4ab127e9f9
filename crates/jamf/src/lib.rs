//! Jamf Pro workflows behind the prestage desk: session tokens, computer
//! lookup, prestage scope changes guarded by version locks, and inventory
//! preload records.

pub mod auth;
pub mod client;
pub mod device;
pub mod directory;
pub mod error;
pub mod preload;
pub mod prestage;
pub mod transport;
pub mod types;

#[cfg(test)]
mod testing;

pub use auth::{AccessToken, SessionProvider};
pub use client::{ClientOptions, JamfClient};
pub use directory::{Directory, Drift, Prestage};
pub use error::{Error, Result};
pub use prestage::MoveReport;
pub use transport::{HttpTransport, RetryPolicy, Transport};
pub use types::{
    Building, Credential, DeviceRecord, DeviceSummary, EnrolledDevice, EnrollmentSummary,
    Membership, Operation, PreloadId, PreloadRecord, PrestageId, RemotePrestage, UpsertOutcome,
    VersionLock,
};
