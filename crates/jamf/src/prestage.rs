use std::collections::HashMap;
use std::sync::Arc;

use reqwest::Method;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info, warn};

use crate::auth::{AccessToken, SessionProvider};
use crate::directory::Directory;
use crate::error::{Error, Result};
use crate::transport::{ApiRequest, ApiResponse};
use crate::types::{Membership, Operation, PrestageId, RemotePrestage, StringOrNumber, VersionLock};

const SCOPE_MAP_PATH: &str = "api/v2/computer-prestages/scope";
const PRESTAGES_PATH: &str = "api/v3/computer-prestages";

fn detail_path(id: PrestageId) -> String {
    format!("api/v3/computer-prestages/{}", id)
}

// Removal still lives on the v1 endpoint.
fn remove_scope_path(id: PrestageId) -> String {
    format!("api/v1/computer-prestages/{}/scope", id)
}

fn scope_path(id: PrestageId) -> String {
    format!("api/v2/computer-prestages/{}/scope", id)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ScopeMap {
    #[serde(default)]
    serials_by_prestage_id: HashMap<String, ScopeEntry>,
}

/// Entries are keyed by prestage id with a list of serials, or keyed by serial
/// with a single prestage id, depending on the instance version.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ScopeEntry {
    Serials(Vec<String>),
    Prestage(StringOrNumber),
}

impl ScopeMap {
    fn prestage_of(&self, serial: &str) -> Option<PrestageId> {
        self.serials_by_prestage_id
            .iter()
            .filter_map(|(key, entry)| match entry {
                ScopeEntry::Serials(serials)
                    if serials.iter().any(|s| s.eq_ignore_ascii_case(serial)) =>
                {
                    key.parse().ok()
                }
                ScopeEntry::Prestage(id) if key.eq_ignore_ascii_case(serial) => id.to_prestage_id(),
                _ => None,
            })
            .min()
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PrestageDetail {
    version_lock: VersionLock,
}

#[derive(Debug, Deserialize)]
struct PrestagePage {
    #[serde(default)]
    results: Vec<PrestageSummary>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PrestageSummary {
    id: StringOrNumber,
    #[serde(default)]
    display_name: String,
    #[serde(default)]
    version_lock: Option<VersionLock>,
}

/// Scope mutations succeed on exactly 200; anything else is reported with the
/// vendor's status code.
pub(crate) fn classify(operation: Operation, response: &ApiResponse) -> Result<()> {
    if response.status == 200 {
        Ok(())
    } else {
        Err(Error::Mutation {
            operation,
            status: response.status,
        })
    }
}

/// Outcome of a two-phase move.
///
/// The removal and the addition are independent vendor calls. If the removal
/// succeeds and the addition fails, the device sits in no prestage until
/// [`PrestageService::add`] is retried on its own.
#[derive(Debug)]
pub struct MoveReport {
    pub serial_number: String,
    pub from: Option<PrestageId>,
    pub to: PrestageId,
    /// `None` when the device was not in a prestage to begin with.
    pub removal: Option<Result<()>>,
    pub addition: Result<()>,
}

impl MoveReport {
    pub fn is_complete(&self) -> bool {
        self.removal.as_ref().map_or(true, |r| r.is_ok()) && self.addition.is_ok()
    }

    /// Removed from the old prestage but not added to the new one.
    pub fn is_partial(&self) -> bool {
        matches!(self.removal, Some(Ok(()))) && self.addition.is_err()
    }
}

/// Reads and changes which prestage a serial number is scoped to.
#[derive(Debug, Clone)]
pub struct PrestageService {
    session: Arc<SessionProvider>,
    directory: Arc<Directory>,
}

impl PrestageService {
    pub fn new(session: Arc<SessionProvider>, directory: Arc<Directory>) -> Self {
        Self { session, directory }
    }

    pub fn directory(&self) -> &Directory {
        &self.directory
    }

    pub async fn get_membership(&self, serial: &str) -> Result<Membership> {
        let token = self.session.acquire().await?;
        let request = ApiRequest::new(Method::GET, SCOPE_MAP_PATH).bearer(&token);
        let response = self.session.send(request).await?.expect_ok("prestage scope map")?;
        let scope: ScopeMap = response.json("prestage scope map")?;

        let Some(id) = scope.prestage_of(serial) else {
            debug!("{} is not in any prestage", serial);
            return Ok(Membership::unassigned());
        };
        let name = self.directory.id_to_name(id).map(str::to_string);
        if name.is_none() {
            warn!("{} is in prestage {}, which is not in the directory", serial, id);
        }

        Ok(Membership {
            prestage_id: Some(id),
            prestage_name: name,
        })
    }

    pub async fn remove(&self, serial: &str, prestage: PrestageId) -> Result<()> {
        self.mutate(
            Operation::RemoveFromPrestage,
            Method::DELETE,
            remove_scope_path(prestage),
            serial,
            prestage,
        )
        .await
    }

    /// Returns the id the name resolved to.
    pub async fn add(&self, serial: &str, prestage_name: &str) -> Result<PrestageId> {
        let prestage = self.resolve(prestage_name)?;
        self.mutate(Operation::AddToPrestage, Method::POST, scope_path(prestage), serial, prestage)
            .await?;
        Ok(prestage)
    }

    /// Replaces the whole scope of the prestage with this one serial number.
    pub async fn replace(&self, serial: &str, prestage: PrestageId) -> Result<()> {
        self.mutate(
            Operation::ReplacePrestageScope,
            Method::PUT,
            scope_path(prestage),
            serial,
            prestage,
        )
        .await
    }

    /// Removes the device from `from` (when given), then adds it to `to_name`.
    ///
    /// The addition is attempted whatever the removal returned, and both
    /// outcomes are reported. An unknown target fails before anything is
    /// changed.
    pub async fn move_device(
        &self,
        serial: &str,
        from: Option<PrestageId>,
        to_name: &str,
    ) -> Result<MoveReport> {
        let to = self.resolve(to_name)?;

        let removal = match from {
            Some(from) => {
                let outcome = self.remove(serial, from).await;
                if let Err(e) = &outcome {
                    warn!(
                        "removing {} from prestage {} failed ({}), adding to {} anyway",
                        serial, from, e, to
                    );
                }
                Some(outcome)
            }
            None => None,
        };

        let addition = self.add(serial, to_name).await.map(|_| ());

        let report = MoveReport {
            serial_number: serial.to_string(),
            from,
            to,
            removal,
            addition,
        };
        if report.is_partial() {
            warn!("{} was removed from its prestage but not added to prestage {}", serial, to);
        }
        Ok(report)
    }

    pub async fn list_prestages(&self) -> Result<Vec<RemotePrestage>> {
        let token = self.session.acquire().await?;
        let request = ApiRequest::new(Method::GET, PRESTAGES_PATH)
            .query("page", "0")
            .query("page-size", "100")
            .query("sort", "id:desc")
            .bearer(&token);
        let response = self.session.send(request).await?.expect_ok("prestage list")?;
        let page: PrestagePage = response.json("prestage list")?;

        page.results
            .into_iter()
            .map(|p| {
                let id = p.id.to_prestage_id().ok_or_else(|| Error::Parse {
                    context: "prestage list",
                    reason: format!("{:?} is not a prestage id", p.id),
                })?;
                Ok(RemotePrestage {
                    id,
                    display_name: p.display_name,
                    version_lock: p.version_lock,
                })
            })
            .collect()
    }

    fn resolve(&self, prestage_name: &str) -> Result<PrestageId> {
        self.directory
            .name_to_id(prestage_name)
            .ok_or_else(|| Error::UnknownPrestage(prestage_name.to_string()))
    }

    async fn version_lock(&self, token: &AccessToken, prestage: PrestageId) -> Result<VersionLock> {
        let request = ApiRequest::new(Method::GET, &detail_path(prestage)).bearer(token);
        let response = self.session.send(request).await?.expect_ok("prestage detail")?;
        let detail: PrestageDetail = response.json("prestage detail")?;
        Ok(detail.version_lock)
    }

    // Every mutation fetches its own version lock right before the call.
    async fn mutate(
        &self,
        operation: Operation,
        method: Method,
        path: String,
        serial: &str,
        prestage: PrestageId,
    ) -> Result<()> {
        let token = self.session.acquire().await?;
        let version_lock = self.version_lock(&token, prestage).await?;
        debug!("{} {} prestage {} at version lock {}", operation, serial, prestage, version_lock);

        let request = ApiRequest::new(method, &path).bearer(&token).json(json!({
            "serialNumbers": [serial],
            "versionLock": version_lock,
        }));
        let response = self.session.send(request).await?;
        classify(operation, &response)?;

        info!("{}: {} / prestage {}", operation, serial, prestage);
        Ok(())
    }
}
