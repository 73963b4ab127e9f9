use std::fmt;
use std::num::ParseIntError;
use std::str::FromStr;

use reqwest::Url;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// The service-account credential pair and the Jamf Pro instance it belongs to.
///
/// Built once at startup and handed to the `SessionProvider`; nothing mutates
/// it afterwards.
#[derive(Clone)]
pub struct Credential {
    pub base_url: Url,
    pub client_id: String,
    pub client_secret: String,
}

impl Credential {
    pub fn new(
        base_url: &str,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Result<Self> {
        let base_url = Url::parse(base_url.trim()).map_err(|e| Error::InvalidBaseUrl {
            url: base_url.to_string(),
            reason: e.to_string(),
        })?;
        if base_url.cannot_be_a_base() {
            return Err(Error::InvalidBaseUrl {
                url: base_url.to_string(),
                reason: "not a hierarchical url".to_string(),
            });
        }
        Ok(Self {
            base_url,
            client_id: client_id.into(),
            client_secret: client_secret.into(),
        })
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("base_url", &self.base_url.as_str())
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .finish()
    }
}

/// Numeric identifier of a computer prestage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PrestageId(u32);

impl PrestageId {
    /// Rendered in place of an id when a name has no prestage behind it.
    /// Never a real prestage id.
    pub const NOT_FOUND: PrestageId = PrestageId(0);

    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    pub const fn get(self) -> u32 {
        self.0
    }

    pub fn is_found(self) -> bool {
        self != Self::NOT_FOUND
    }
}

impl fmt::Display for PrestageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for PrestageId {
    type Err = ParseIntError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        s.trim().parse().map(Self)
    }
}

/// Optimistic-concurrency token of a prestage. Fetched right before each scope
/// mutation and sent back with it.
pub type VersionLock = i64;

/// Snapshot of a computer returned by a match lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceRecord {
    pub name: String,
    pub id: u64,
    pub serial_number: String,
    pub asset_tag: Option<String>,
}

/// A device Apple Business/School Manager assigned to the instance, found
/// through a device-enrollment instance. It may not be in inventory yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnrolledDevice {
    pub serial_number: String,
    pub enrollment_id: String,
    pub enrollment_name: Option<String>,
    pub model: Option<String>,
    /// Prestage the enrollment service has the device assigned to, if any.
    pub prestage_id: Option<PrestageId>,
}

/// Which prestage, if any, a serial number is scoped to.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Membership {
    pub prestage_id: Option<PrestageId>,
    /// Absent when the id is not in the local directory.
    pub prestage_name: Option<String>,
}

impl Membership {
    pub fn unassigned() -> Self {
        Self::default()
    }

    pub fn is_assigned(&self) -> bool {
        self.prestage_id.is_some()
    }
}

/// Identifier Jamf assigns to an inventory preload record.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PreloadId(String);

impl PreloadId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PreloadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Ownership and location metadata registered for a serial number.
///
/// `id` decides how the record is written back: `None` creates a new record,
/// `Some` updates the existing one.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PreloadRecord {
    pub id: Option<PreloadId>,
    pub serial_number: String,
    pub username: Option<String>,
    pub email: Option<String>,
    pub building: Option<String>,
    pub room: Option<String>,
    pub asset_tag: Option<String>,
}

impl PreloadRecord {
    /// The record reported for a serial number that has no preload yet.
    pub fn empty(serial_number: impl Into<String>) -> Self {
        Self {
            serial_number: serial_number.into(),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.id.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// Jamf does not always echo the new id back.
    Created(Option<PreloadId>),
    Updated(PreloadId),
}

/// A prestage as listed by the live instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemotePrestage {
    pub id: PrestageId,
    pub display_name: String,
    pub version_lock: Option<VersionLock>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Building {
    pub id: String,
    pub name: String,
}

/// Everything the lookup screen shows for one computer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceSummary {
    pub device: DeviceRecord,
    pub membership: Membership,
    pub preload: PreloadRecord,
}

/// What the lookup screen shows for a device that is only known to device
/// enrollment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnrollmentSummary {
    pub device: EnrolledDevice,
    pub preload: PreloadRecord,
}

/// A vendor call that changes state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    RemoveFromPrestage,
    AddToPrestage,
    ReplacePrestageScope,
    CreatePreload,
    UpdatePreload,
    SyncInventory,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Operation::RemoveFromPrestage => "remove from prestage",
            Operation::AddToPrestage => "add to prestage",
            Operation::ReplacePrestageScope => "replace prestage scope",
            Operation::CreatePreload => "create preload record",
            Operation::UpdatePreload => "update preload record",
            Operation::SyncInventory => "sync computer inventory",
        };
        f.write_str(label)
    }
}

// Jamf serializes ids as strings on some endpoints and numbers on others.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub(crate) enum StringOrNumber {
    String(String),
    Number(u64),
}

impl StringOrNumber {
    pub(crate) fn into_string(self) -> String {
        match self {
            StringOrNumber::String(s) => s,
            StringOrNumber::Number(n) => n.to_string(),
        }
    }

    pub(crate) fn to_prestage_id(&self) -> Option<PrestageId> {
        match self {
            StringOrNumber::String(s) => s.parse().ok(),
            StringOrNumber::Number(n) => u32::try_from(*n).ok().map(PrestageId::new),
        }
    }
}
