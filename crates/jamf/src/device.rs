use std::sync::Arc;

use reqwest::Method;
use serde::Deserialize;
use tracing::{info, warn};

use crate::auth::SessionProvider;
use crate::error::{Error, Result};
use crate::transport::{Accept, ApiRequest};
use crate::types::{DeviceRecord, EnrolledDevice, StringOrNumber};

const MATCH_PATH: &str = "JSSResource/computers/match";
const ENROLLMENTS_PATH: &str = "api/v1/device-enrollments";

#[derive(Debug, Deserialize)]
struct ComputerMatches {
    #[serde(rename = "computer", default)]
    computers: Vec<MatchedComputer>,
}

#[derive(Debug, Deserialize)]
struct MatchedComputer {
    id: u64,
    #[serde(default)]
    name: String,
    #[serde(default)]
    serial_number: String,
    #[serde(default)]
    asset_tag: Option<String>,
}

impl From<MatchedComputer> for DeviceRecord {
    fn from(c: MatchedComputer) -> Self {
        DeviceRecord {
            name: c.name,
            id: c.id,
            serial_number: c.serial_number,
            asset_tag: c.asset_tag.filter(|tag| !tag.trim().is_empty()),
        }
    }
}

#[derive(Debug, Deserialize)]
struct EnrollmentPage {
    #[serde(default)]
    results: Vec<EnrollmentInstance>,
}

#[derive(Debug, Deserialize)]
struct EnrollmentInstance {
    id: StringOrNumber,
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct EnrollmentDevicePage {
    #[serde(default)]
    results: Vec<EnrollmentDeviceEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EnrollmentDeviceEntry {
    #[serde(default)]
    serial_number: String,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    prestage_id: Option<StringOrNumber>,
}

/// Resolves free text (computer name, serial number or asset tag) to a device.
#[derive(Debug, Clone)]
pub struct DeviceLocator {
    session: Arc<SessionProvider>,
}

impl DeviceLocator {
    pub fn new(session: Arc<SessionProvider>) -> Self {
        Self { session }
    }

    /// The vendor's fuzzy match decides what "matches"; the first computer it
    /// lists wins.
    pub async fn locate(&self, query: &str) -> Result<DeviceRecord> {
        let query = query.trim();
        if query.is_empty() {
            return Err(Error::NotFound { query: query.to_string() });
        }

        let token = self.session.acquire().await?;
        let request = ApiRequest::new(Method::GET, MATCH_PATH)
            .segment(query)
            .accept(Accept::Xml)
            .bearer(&token);

        let response = self.session.send(request).await?;
        if response.status == 404 {
            return Err(Error::NotFound { query: query.to_string() });
        }
        let response = response.expect_ok("computer match")?;

        let device = parse_matches(query, &response.body)?;
        info!("matched {:?} to computer {} ({})", query, device.id, device.serial_number);
        Ok(device)
    }

    /// Searches the devices of every device-enrollment instance for serial
    /// numbers containing `query`, ignoring case. Finds devices assigned to
    /// the instance that have not enrolled yet, which [`DeviceLocator::locate`]
    /// cannot see. Only the first page of instances is read.
    pub async fn locate_enrollment(&self, query: &str) -> Result<Vec<EnrolledDevice>> {
        let query = query.trim();
        if query.is_empty() {
            return Err(Error::NotFound { query: query.to_string() });
        }
        let needle = query.to_ascii_uppercase();

        let token = self.session.acquire().await?;
        let request = ApiRequest::new(Method::GET, ENROLLMENTS_PATH)
            .query("page", "0")
            .query("page-size", "100")
            .bearer(&token);
        let response = self
            .session
            .send(request)
            .await?
            .expect_ok("device enrollment instances")?;
        let instances: EnrollmentPage = response.json("device enrollment instances")?;

        let mut found = Vec::new();
        for instance in instances.results {
            let enrollment_id = instance.id.into_string();
            let request = ApiRequest::new(Method::GET, ENROLLMENTS_PATH)
                .segment(enrollment_id.as_str())
                .segment("devices")
                .bearer(&token);
            let response = self
                .session
                .send(request)
                .await?
                .expect_ok("device enrollment devices")?;
            let page: EnrollmentDevicePage = response.json("device enrollment devices")?;

            found.extend(
                page.results
                    .into_iter()
                    .filter(|d| d.serial_number.to_ascii_uppercase().contains(&needle))
                    .map(|d| EnrolledDevice {
                        prestage_id: d
                            .prestage_id
                            .as_ref()
                            .and_then(StringOrNumber::to_prestage_id),
                        serial_number: d.serial_number,
                        enrollment_id: enrollment_id.clone(),
                        enrollment_name: instance.name.clone(),
                        model: d.model,
                    }),
            );
        }

        if found.is_empty() {
            return Err(Error::NotFound { query: query.to_string() });
        }
        info!("{} enrollment device(s) match {:?}", found.len(), query);
        Ok(found)
    }
}

fn parse_matches(query: &str, xml: &str) -> Result<DeviceRecord> {
    let matches: ComputerMatches = quick_xml::de::from_str(xml).map_err(|e| Error::Parse {
        context: "computer match",
        reason: e.to_string(),
    })?;

    let count = matches.computers.len();
    let first = matches
        .computers
        .into_iter()
        .next()
        .ok_or_else(|| Error::NotFound { query: query.to_string() })?;

    if count > 1 {
        warn!("{} computers match {:?}, using the first ({})", count, query, first.name);
    }
    Ok(first.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{credential, token_reply, ScriptedTransport};

    const ONE_MATCH: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<computers>
  <size>1</size>
  <computer>
    <id>42</id>
    <name>LIB-MBA-07</name>
    <udid>5F3E1B2C-0000-4B1A-9C3D-1A2B3C4D5E6F</udid>
    <serial_number>C02XK1JHJG5J</serial_number>
    <mac_address>A4:83:E7:00:11:22</mac_address>
    <alt_mac_address/>
    <asset_tag>ASSET-0042</asset_tag>
    <bar_code_1/>
    <bar_code_2/>
    <username>jdoe</username>
    <realname>Jane Doe</realname>
    <email>jdoe@example.edu</email>
    <building>Case</building>
    <room>214</room>
  </computer>
</computers>"#;

    const TWO_MATCHES: &str = r#"<computers>
  <size>2</size>
  <computer>
    <id>7</id><name>LAB-01</name><serial_number>SER001</serial_number><asset_tag/>
  </computer>
  <computer>
    <id>8</id><name>LAB-02</name><serial_number>SER002</serial_number><asset_tag>A-8</asset_tag>
  </computer>
</computers>"#;

    fn locator(transport: &Arc<ScriptedTransport>) -> DeviceLocator {
        DeviceLocator::new(Arc::new(SessionProvider::new(credential(), transport.clone())))
    }

    #[test]
    fn parses_single_match() {
        let device = parse_matches("C02XK1JHJG5J", ONE_MATCH).unwrap();
        assert_eq!(
            device,
            DeviceRecord {
                name: "LIB-MBA-07".to_string(),
                id: 42,
                serial_number: "C02XK1JHJG5J".to_string(),
                asset_tag: Some("ASSET-0042".to_string()),
            }
        );
    }

    #[test]
    fn first_match_wins_and_blank_tag_is_absent() {
        let device = parse_matches("LAB", TWO_MATCHES).unwrap();
        assert_eq!(device.id, 7);
        assert_eq!(device.serial_number, "SER001");
        assert_eq!(device.asset_tag, None);
    }

    #[test]
    fn empty_match_list_is_not_found() {
        let err = parse_matches("nope", "<computers><size>0</size></computers>").unwrap_err();
        assert!(matches!(err, Error::NotFound { query } if query == "nope"));
    }

    #[test]
    fn garbage_is_a_parse_error() {
        let xml = "<computers><computer><id>not-a-number</id></computer></computers>";
        let err = parse_matches("x", xml).unwrap_err();
        assert!(matches!(err, Error::Parse { .. }));
    }

    #[tokio::test]
    async fn locate_calls_match_endpoint_with_xml() {
        let transport = ScriptedTransport::new();
        transport.reply(200, &token_reply("tok-1"));
        transport.reply(200, ONE_MATCH);

        let device = locator(&transport).locate(" ASSET-0042 ").await.unwrap();
        assert_eq!(device.serial_number, "C02XK1JHJG5J");

        let requests = transport.requests();
        assert_eq!(
            transport.calls(),
            vec!["POST api/oauth/token", "GET JSSResource/computers/match/ASSET-0042"]
        );
        assert_eq!(requests[1].accept, Accept::Xml);
        assert_eq!(requests[1].bearer.as_ref().map(|t| t.secret()), Some("tok-1"));
    }

    const INSTANCES: &str = r#"{"totalCount":2,"results":[
        {"id":"1","name":"Apple School Manager"},
        {"id":"3","name":"Apple Business Manager"}]}"#;

    #[tokio::test]
    async fn enrollment_search_walks_every_instance() {
        let transport = ScriptedTransport::new();
        transport.reply(200, &token_reply("tok-1"));
        transport.reply(200, INSTANCES);
        transport.reply(
            200,
            r#"{"results":[
                {"serialNumber":"C02XK1JHJG5J","model":"MacBook Air","prestageId":"4"},
                {"serialNumber":"C02ZZ9ZZZZZZ","model":"MacBook Air"}]}"#,
        );
        transport.reply(
            200,
            r#"{"results":[{"serialNumber":"F9JG5JQ00001","model":"iMac","prestageId":null}]}"#,
        );

        let found = locator(&transport).locate_enrollment("jg5j").await.unwrap();
        assert_eq!(
            found,
            vec![
                EnrolledDevice {
                    serial_number: "C02XK1JHJG5J".to_string(),
                    enrollment_id: "1".to_string(),
                    enrollment_name: Some("Apple School Manager".to_string()),
                    model: Some("MacBook Air".to_string()),
                    prestage_id: Some(crate::types::PrestageId::new(4)),
                },
                EnrolledDevice {
                    serial_number: "F9JG5JQ00001".to_string(),
                    enrollment_id: "3".to_string(),
                    enrollment_name: Some("Apple Business Manager".to_string()),
                    model: Some("iMac".to_string()),
                    prestage_id: None,
                },
            ]
        );
        assert_eq!(
            transport.calls(),
            vec![
                "POST api/oauth/token",
                "GET api/v1/device-enrollments",
                "GET api/v1/device-enrollments/1/devices",
                "GET api/v1/device-enrollments/3/devices",
            ]
        );
    }

    #[tokio::test]
    async fn enrollment_search_without_hits_is_not_found() {
        let transport = ScriptedTransport::new();
        transport.reply(200, &token_reply("tok-1"));
        transport.reply(200, r#"{"results":[{"id":1,"name":"ASM"}]}"#);
        transport.reply(200, r#"{"results":[{"serialNumber":"C02ZZ9ZZZZZZ"}]}"#);

        let err = locator(&transport).locate_enrollment("NOPE").await.unwrap_err();
        assert!(matches!(err, Error::NotFound { query } if query == "NOPE"));
    }

    #[tokio::test]
    async fn blank_query_never_reaches_the_network() {
        let transport = ScriptedTransport::new();
        let err = locator(&transport).locate("   ").await.unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
        let err = locator(&transport).locate_enrollment(" ").await.unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
        assert!(transport.requests().is_empty());
    }
}
