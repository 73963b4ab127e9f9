use std::collections::HashSet;
use std::fmt;

use crate::error::{Error, Result};
use crate::types::{PrestageId, RemotePrestage};

/// Prestages configured on the instance, newest first.
const KNOWN_PRESTAGES: [(u32, &str); 8] = [
    (9, "first-time user prestage"),
    (8, "classroom test"),
    (7, "ous prestage"),
    (6, "transfer prestage test"),
    (5, "labs prestage"),
    (4, "loaner prestage"),
    (3, "classroom prestage"),
    (2, "faculty/staff prestage"),
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prestage {
    pub id: PrestageId,
    pub name: String,
}

/// Two-way mapping between prestage names and ids.
///
/// Construction guarantees a bijection: no id appears twice, no name appears
/// twice (compared case-insensitively), and `PrestageId::NOT_FOUND` is never an
/// entry.
#[derive(Debug, Clone)]
pub struct Directory {
    entries: Vec<Prestage>,
}

impl Default for Directory {
    fn default() -> Self {
        Self {
            entries: KNOWN_PRESTAGES
                .iter()
                .map(|(id, name)| Prestage {
                    id: PrestageId::new(*id),
                    name: (*name).to_string(),
                })
                .collect(),
        }
    }
}

impl Directory {
    pub fn new<I, S>(entries: I) -> Result<Self>
    where
        I: IntoIterator<Item = (PrestageId, S)>,
        S: Into<String>,
    {
        let mut ids = HashSet::new();
        let mut names = HashSet::new();
        let mut prestages = Vec::new();

        for (id, name) in entries {
            let name = name.into().trim().to_string();
            if !id.is_found() {
                return Err(Error::InvalidDirectory(format!("{:?} uses the reserved id 0", name)));
            }
            if name.is_empty() {
                return Err(Error::InvalidDirectory(format!("prestage {} has an empty name", id)));
            }
            if !ids.insert(id) {
                return Err(Error::InvalidDirectory(format!("id {} is listed twice", id)));
            }
            if !names.insert(name.to_lowercase()) {
                return Err(Error::InvalidDirectory(format!("name {:?} is listed twice", name)));
            }
            prestages.push(Prestage { id, name });
        }

        Ok(Self { entries: prestages })
    }

    /// Case-insensitive; surrounding whitespace is ignored.
    pub fn name_to_id(&self, name: &str) -> Option<PrestageId> {
        let wanted = name.trim().to_lowercase();
        self.entries
            .iter()
            .find(|p| p.name.to_lowercase() == wanted)
            .map(|p| p.id)
    }

    pub fn id_to_name(&self, id: PrestageId) -> Option<&str> {
        self.entries.iter().find(|p| p.id == id).map(|p| p.name.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Prestage> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Compares the table against the prestages the instance actually has.
    pub fn drift(&self, remote: &[RemotePrestage]) -> Vec<Drift> {
        let mut drift = Vec::new();

        for local in &self.entries {
            match remote.iter().find(|r| r.id == local.id) {
                None => drift.push(Drift::MissingRemotely(local.clone())),
                Some(r) if !r.display_name.trim().eq_ignore_ascii_case(&local.name) => {
                    drift.push(Drift::Renamed {
                        id: local.id,
                        local: local.name.clone(),
                        remote: r.display_name.clone(),
                    })
                }
                Some(_) => {}
            }
        }

        for r in remote {
            if self.id_to_name(r.id).is_none() {
                drift.push(Drift::UnknownLocally(r.clone()));
            }
        }

        drift
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Drift {
    MissingRemotely(Prestage),
    Renamed {
        id: PrestageId,
        local: String,
        remote: String,
    },
    UnknownLocally(RemotePrestage),
}

impl fmt::Display for Drift {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Drift::MissingRemotely(p) => {
                write!(f, "prestage {} ({}) no longer exists on the instance", p.id, p.name)
            }
            Drift::Renamed { id, local, remote } => write!(
                f,
                "prestage {} is called {:?} on the instance but {:?} locally",
                id, remote, local
            ),
            Drift::UnknownLocally(r) => {
                write!(f, "prestage {} ({}) is not in the local directory", r.id, r.display_name)
            }
        }
    }
}
