use std::sync::Arc;

use reqwest::Method;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::auth::SessionProvider;
use crate::error::{Error, Result};
use crate::transport::ApiRequest;
use crate::types::{Building, Operation, PreloadId, PreloadRecord, StringOrNumber, UpsertOutcome};

const RECORDS_PATH: &str = "api/v2/inventory-preload/records";
const BUILDINGS_PATH: &str = "api/v1/buildings";
const INVENTORY_DETAIL_PATH: &str = "api/v1/computers-inventory-detail";
const DEVICE_TYPE: &str = "Computer";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RecordPage {
    #[serde(default)]
    total_count: Option<u64>,
    #[serde(default)]
    results: Vec<RecordEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RecordEntry {
    id: StringOrNumber,
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    email_address: Option<String>,
    #[serde(default)]
    building: Option<String>,
    #[serde(default)]
    room: Option<String>,
    #[serde(default)]
    asset_tag: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RecordBody<'a> {
    device_type: &'static str,
    serial_number: &'a str,
    username: Option<&'a str>,
    email_address: Option<&'a str>,
    building: Option<&'a str>,
    room: Option<&'a str>,
    asset_tag: Option<&'a str>,
}

impl<'a> From<&'a PreloadRecord> for RecordBody<'a> {
    fn from(record: &'a PreloadRecord) -> Self {
        RecordBody {
            device_type: DEVICE_TYPE,
            serial_number: &record.serial_number,
            username: record.username.as_deref(),
            email_address: record.email.as_deref(),
            building: record.building.as_deref(),
            room: record.room.as_deref(),
            asset_tag: record.asset_tag.as_deref(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct CreatedRecord {
    #[serde(default)]
    id: Option<StringOrNumber>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct InventoryPatch<'a> {
    general: GeneralPatch<'a>,
    user_and_location: LocationPatch<'a>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeneralPatch<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    asset_tag: Option<&'a str>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct LocationPatch<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    username: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    email: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    building_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    room: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct BuildingPage {
    #[serde(default)]
    results: Vec<BuildingEntry>,
}

#[derive(Debug, Deserialize)]
struct BuildingEntry {
    id: StringOrNumber,
    #[serde(default)]
    name: String,
}

/// Reads and writes inventory preload records, keyed by serial number.
#[derive(Debug, Clone)]
pub struct PreloadService {
    session: Arc<SessionProvider>,
}

impl PreloadService {
    pub fn new(session: Arc<SessionProvider>) -> Self {
        Self { session }
    }

    /// Returns the empty record when the serial number has no preload. Only
    /// the first page of matches is read.
    pub async fn get_preload(&self, serial: &str) -> Result<PreloadRecord> {
        let token = self.session.acquire().await?;
        let request = ApiRequest::new(Method::GET, RECORDS_PATH)
            .query("page", "0")
            .query("page-size", "100")
            .query("sort", "id:asc")
            .query("filter", format!("serialNumber==\"{}\"", serial))
            .bearer(&token);
        let response = self.session.send(request).await?.expect_ok("inventory preload records")?;
        let page: RecordPage = response.json("inventory preload records")?;

        let matched = page.total_count.unwrap_or(page.results.len() as u64);
        let Some(entry) = page.results.into_iter().next() else {
            return Ok(PreloadRecord::empty(serial));
        };
        if matched > 1 {
            warn!("{} preload records exist for {}, showing the first", matched, serial);
        }

        Ok(PreloadRecord {
            id: Some(PreloadId::new(entry.id.into_string())),
            serial_number: serial.to_string(),
            username: entry.username,
            email: entry.email_address,
            building: entry.building,
            room: entry.room,
            asset_tag: entry.asset_tag,
        })
    }

    /// Updates the record when it carries an id, creates one otherwise.
    pub async fn upsert_preload(&self, record: &PreloadRecord) -> Result<UpsertOutcome> {
        let token = self.session.acquire().await?;
        let body = serde_json::to_value(RecordBody::from(record)).map_err(|e| Error::Parse {
            context: "inventory preload record",
            reason: e.to_string(),
        })?;

        let (operation, request) = match &record.id {
            Some(id) => (
                Operation::UpdatePreload,
                ApiRequest::new(Method::PUT, RECORDS_PATH).segment(id.as_str()),
            ),
            None => (Operation::CreatePreload, ApiRequest::new(Method::POST, RECORDS_PATH)),
        };

        let response = self.session.send(request.bearer(&token).json(body)).await?;
        if !matches!(response.status, 200 | 201) {
            return Err(Error::Mutation {
                operation,
                status: response.status,
            });
        }

        let outcome = match &record.id {
            Some(id) => UpsertOutcome::Updated(id.clone()),
            None => {
                let id = serde_json::from_str::<CreatedRecord>(&response.body)
                    .ok()
                    .and_then(|created| created.id)
                    .map(|id| PreloadId::new(id.into_string()));
                UpsertOutcome::Created(id)
            }
        };
        info!("{} for {}", operation, record.serial_number);
        Ok(outcome)
    }

    /// Valid values for a record's `building`.
    pub async fn list_buildings(&self) -> Result<Vec<Building>> {
        let token = self.session.acquire().await?;
        let request = ApiRequest::new(Method::GET, BUILDINGS_PATH)
            .query("page", "0")
            .query("page-size", "100")
            .query("sort", "id:asc")
            .bearer(&token);
        let response = self.session.send(request).await?.expect_ok("building list")?;
        let page: BuildingPage = response.json("building list")?;

        Ok(page
            .results
            .into_iter()
            .map(|b| Building {
                id: b.id.into_string(),
                name: b.name,
            })
            .collect())
    }

    /// Copies the record's owner, location and asset tag onto an enrolled
    /// computer's inventory. Fields the record leaves unset are not touched.
    pub async fn sync_inventory(&self, computer_id: u64, record: &PreloadRecord) -> Result<()> {
        let building_id = match record.building.as_deref() {
            Some(name) => Some(self.building_id(name).await?),
            None => None,
        };

        let patch = InventoryPatch {
            general: GeneralPatch {
                asset_tag: record.asset_tag.as_deref(),
            },
            user_and_location: LocationPatch {
                username: record.username.as_deref(),
                email: record.email.as_deref(),
                building_id: building_id.as_deref(),
                room: record.room.as_deref(),
            },
        };
        let body = serde_json::to_value(patch).map_err(|e| Error::Parse {
            context: "computer inventory update",
            reason: e.to_string(),
        })?;

        let token = self.session.acquire().await?;
        let request = ApiRequest::new(Method::PATCH, INVENTORY_DETAIL_PATH)
            .segment(computer_id.to_string())
            .bearer(&token)
            .json(body);
        let response = self.session.send(request).await?;
        if response.status != 200 {
            return Err(Error::Mutation {
                operation: Operation::SyncInventory,
                status: response.status,
            });
        }

        info!(
            "{} for computer {} ({})",
            Operation::SyncInventory,
            computer_id,
            record.serial_number
        );
        Ok(())
    }

    async fn building_id(&self, name: &str) -> Result<String> {
        self.list_buildings()
            .await?
            .into_iter()
            .find(|b| b.name.eq_ignore_ascii_case(name.trim()))
            .map(|b| b.id)
            .ok_or_else(|| Error::UnknownBuilding(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{credential, token_reply, ScriptedTransport};
    use crate::transport::Body;
    use serde_json::json;

    const BUILDINGS: &str =
        r#"{"totalCount":2,"results":[{"id":"1","name":"Case"},{"id":"2","name":"Olin"}]}"#;

    fn service(transport: &Arc<ScriptedTransport>) -> PreloadService {
        PreloadService::new(Arc::new(SessionProvider::new(credential(), transport.clone())))
    }

    fn record(id: Option<&str>) -> PreloadRecord {
        PreloadRecord {
            id: id.map(PreloadId::new),
            serial_number: "C02XK1JHJG5J".to_string(),
            username: Some("jdoe".to_string()),
            email: Some("jdoe@example.edu".to_string()),
            building: Some("Case".to_string()),
            room: Some("214".to_string()),
            asset_tag: None,
        }
    }

    #[tokio::test]
    async fn empty_results_give_the_empty_record() {
        let transport = ScriptedTransport::new();
        transport.reply(200, &token_reply("tok-1"));
        transport.reply(200, r#"{"totalCount":0,"results":[]}"#);

        let preload = service(&transport).get_preload("C02XK1JHJG5J").await.unwrap();
        assert!(preload.is_empty());
        assert_eq!(preload, PreloadRecord::empty("C02XK1JHJG5J"));
    }

    #[tokio::test]
    async fn reads_first_record_with_serial_filter() {
        let transport = ScriptedTransport::new();
        transport.reply(200, &token_reply("tok-1"));
        transport.reply(
            200,
            r#"{"totalCount":1,"results":[{
                "id":"311","serialNumber":"C02XK1JHJG5J","deviceType":"Computer",
                "username":"jdoe","emailAddress":"jdoe@example.edu",
                "building":"Case","room":"214","assetTag":null}]}"#,
        );

        let preload = service(&transport).get_preload("C02XK1JHJG5J").await.unwrap();
        assert_eq!(preload, record(Some("311")));

        let request = &transport.requests()[1];
        assert_eq!(request.path(), "api/v2/inventory-preload/records");
        assert!(request
            .query
            .contains(&("filter".to_string(), "serialNumber==\"C02XK1JHJG5J\"".to_string())));
        assert!(request.query.contains(&("page-size".to_string(), "100".to_string())));
    }

    #[tokio::test]
    async fn record_with_id_is_updated_in_place() {
        let transport = ScriptedTransport::new();
        transport.reply(200, &token_reply("tok-1"));
        transport.reply(200, r#"{"id":"311"}"#);

        let outcome = service(&transport).upsert_preload(&record(Some("311"))).await.unwrap();
        assert_eq!(outcome, UpsertOutcome::Updated(PreloadId::new("311")));
        assert_eq!(transport.calls()[1], "PUT api/v2/inventory-preload/records/311");
        assert_eq!(
            transport.requests()[1].body,
            Some(Body::Json(json!({
                "deviceType": "Computer",
                "serialNumber": "C02XK1JHJG5J",
                "username": "jdoe",
                "emailAddress": "jdoe@example.edu",
                "building": "Case",
                "room": "214",
                "assetTag": null,
            })))
        );
    }

    #[tokio::test]
    async fn record_without_id_is_created() {
        let transport = ScriptedTransport::new();
        transport.reply(200, &token_reply("tok-1"));
        transport.reply(
            201,
            r#"{"id":"412",
                "href":"https://example.jamfcloud.com/api/v2/inventory-preload/records/412"}"#,
        );

        let outcome = service(&transport).upsert_preload(&record(None)).await.unwrap();
        assert_eq!(outcome, UpsertOutcome::Created(Some(PreloadId::new("412"))));
        assert_eq!(transport.calls()[1], "POST api/v2/inventory-preload/records");
    }

    #[tokio::test]
    async fn rejected_upsert_reports_status() {
        let transport = ScriptedTransport::new();
        transport.reply(200, &token_reply("tok-1"));
        transport.reply(
            400,
            r#"{"httpStatus":400,"errors":[{"code":"INVALID_FIELD","field":"building"}]}"#,
        );

        let err = service(&transport).upsert_preload(&record(None)).await.unwrap_err();
        assert!(matches!(
            err,
            Error::Mutation {
                operation: Operation::CreatePreload,
                status: 400
            }
        ));
    }

    #[tokio::test]
    async fn lists_buildings() {
        let transport = ScriptedTransport::new();
        transport.reply(200, &token_reply("tok-1"));
        transport.reply(200, BUILDINGS);

        let buildings = service(&transport).list_buildings().await.unwrap();
        assert_eq!(
            buildings,
            vec![
                Building { id: "1".into(), name: "Case".into() },
                Building { id: "2".into(), name: "Olin".into() },
            ]
        );
        assert_eq!(transport.calls()[1], "GET api/v1/buildings");
    }

    #[tokio::test]
    async fn inventory_sync_patches_owner_and_building_id() {
        let transport = ScriptedTransport::new();
        transport.reply(200, &token_reply("tok-1"));
        transport.reply(200, BUILDINGS);
        transport.reply(200, r#"{"id":"42"}"#);

        let mut preload = record(Some("311"));
        preload.building = Some("case".to_string());
        preload.asset_tag = Some("ASSET-0042".to_string());
        service(&transport).sync_inventory(42, &preload).await.unwrap();

        assert_eq!(
            transport.calls(),
            vec![
                "POST api/oauth/token",
                "GET api/v1/buildings",
                "PATCH api/v1/computers-inventory-detail/42",
            ]
        );
        assert_eq!(
            transport.requests()[2].body,
            Some(Body::Json(json!({
                "general": { "assetTag": "ASSET-0042" },
                "userAndLocation": {
                    "username": "jdoe",
                    "email": "jdoe@example.edu",
                    "buildingId": "1",
                    "room": "214",
                },
            })))
        );
    }

    #[tokio::test]
    async fn inventory_sync_without_building_skips_the_lookup() {
        let transport = ScriptedTransport::new();
        transport.reply(200, &token_reply("tok-1"));
        transport.reply(200, "{}");

        let preload = PreloadRecord {
            username: Some("asmith".to_string()),
            ..PreloadRecord::empty("C02XK1JHJG5J")
        };
        service(&transport).sync_inventory(7, &preload).await.unwrap();

        assert_eq!(transport.calls()[1], "PATCH api/v1/computers-inventory-detail/7");
        assert_eq!(
            transport.requests()[1].body,
            Some(Body::Json(json!({
                "general": {},
                "userAndLocation": { "username": "asmith" },
            })))
        );
    }

    #[tokio::test]
    async fn inventory_sync_rejects_unknown_building() {
        let transport = ScriptedTransport::new();
        transport.reply(200, &token_reply("tok-1"));
        transport.reply(200, BUILDINGS);

        let mut preload = record(Some("311"));
        preload.building = Some("Annex".to_string());
        let err = service(&transport).sync_inventory(42, &preload).await.unwrap_err();

        assert!(matches!(err, Error::UnknownBuilding(name) if name == "Annex"));
        assert_eq!(transport.requests().len(), 2);
    }

    #[tokio::test]
    async fn rejected_inventory_sync_reports_status() {
        let transport = ScriptedTransport::new();
        transport.reply(200, &token_reply("tok-1"));
        transport.reply(404, r#"{"httpStatus":404}"#);

        let preload = PreloadRecord::empty("C02XK1JHJG5J");
        let err = service(&transport).sync_inventory(99, &preload).await.unwrap_err();
        assert!(matches!(
            err,
            Error::Mutation {
                operation: Operation::SyncInventory,
                status: 404
            }
        ));
    }
}
