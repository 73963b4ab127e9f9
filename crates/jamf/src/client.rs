use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::auth::SessionProvider;
use crate::device::DeviceLocator;
use crate::directory::Directory;
use crate::error::Result;
use crate::preload::PreloadService;
use crate::prestage::{MoveReport, PrestageService};
use crate::transport::{HttpTransport, RetryPolicy, Transport};
use crate::types::{
    Building, Credential, DeviceRecord, DeviceSummary, EnrolledDevice, EnrollmentSummary,
    Membership, PreloadRecord, PrestageId, RemotePrestage, UpsertOutcome,
};

#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub timeout: Duration,
    pub retry: RetryPolicy,
    pub cache_tokens: bool,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            retry: RetryPolicy::default(),
            cache_tokens: true,
        }
    }
}

/// Entry point for callers: one session shared by the locator and the
/// prestage and preload services.
#[derive(Debug, Clone)]
pub struct JamfClient {
    devices: DeviceLocator,
    prestages: PrestageService,
    preloads: PreloadService,
}

impl JamfClient {
    pub fn new(credential: Credential, options: ClientOptions) -> Result<Self> {
        let transport =
            HttpTransport::new(credential.base_url.clone(), options.timeout, options.retry)?;
        Ok(Self::with_transport(
            credential,
            Arc::new(transport),
            options.cache_tokens,
            Directory::default(),
        ))
    }

    pub fn with_transport(
        credential: Credential,
        transport: Arc<dyn Transport>,
        cache_tokens: bool,
        directory: Directory,
    ) -> Self {
        let session = SessionProvider::new(credential, transport);
        let session = Arc::new(if cache_tokens {
            session
        } else {
            session.without_cache()
        });

        Self {
            devices: DeviceLocator::new(session.clone()),
            prestages: PrestageService::new(session.clone(), Arc::new(directory)),
            preloads: PreloadService::new(session),
        }
    }

    pub fn directory(&self) -> &Directory {
        self.prestages.directory()
    }

    /// Device, prestage membership and preload record for one query, fetched
    /// one after the other.
    pub async fn lookup(&self, query: &str) -> Result<DeviceSummary> {
        let device = self.locate(query).await?;
        let membership = self.get_membership(&device.serial_number).await?;
        let preload = self.get_preload(&device.serial_number).await?;
        info!("looked up {} ({})", device.name, device.serial_number);

        Ok(DeviceSummary {
            device,
            membership,
            preload,
        })
    }

    /// Devices known only to device enrollment, each with its preload record.
    /// For serial numbers the inventory match does not know yet.
    pub async fn lookup_enrollments(&self, query: &str) -> Result<Vec<EnrollmentSummary>> {
        let devices = self.locate_enrollment(query).await?;
        let mut summaries = Vec::with_capacity(devices.len());
        for device in devices {
            let preload = self.get_preload(&device.serial_number).await?;
            summaries.push(EnrollmentSummary { device, preload });
        }
        Ok(summaries)
    }

    pub async fn locate(&self, query: &str) -> Result<DeviceRecord> {
        self.devices.locate(query).await
    }

    pub async fn locate_enrollment(&self, query: &str) -> Result<Vec<EnrolledDevice>> {
        self.devices.locate_enrollment(query).await
    }

    pub async fn get_membership(&self, serial: &str) -> Result<Membership> {
        self.prestages.get_membership(serial).await
    }

    pub async fn remove(&self, serial: &str, prestage: PrestageId) -> Result<()> {
        self.prestages.remove(serial, prestage).await
    }

    pub async fn add(&self, serial: &str, prestage_name: &str) -> Result<PrestageId> {
        self.prestages.add(serial, prestage_name).await
    }

    pub async fn replace(&self, serial: &str, prestage: PrestageId) -> Result<()> {
        self.prestages.replace(serial, prestage).await
    }

    pub async fn move_device(
        &self,
        serial: &str,
        from: Option<PrestageId>,
        to_name: &str,
    ) -> Result<MoveReport> {
        self.prestages.move_device(serial, from, to_name).await
    }

    pub async fn list_prestages(&self) -> Result<Vec<RemotePrestage>> {
        self.prestages.list_prestages().await
    }

    pub async fn get_preload(&self, serial: &str) -> Result<PreloadRecord> {
        self.preloads.get_preload(serial).await
    }

    pub async fn upsert_preload(&self, record: &PreloadRecord) -> Result<UpsertOutcome> {
        self.preloads.upsert_preload(record).await
    }

    pub async fn sync_inventory(&self, computer_id: u64, record: &PreloadRecord) -> Result<()> {
        self.preloads.sync_inventory(computer_id, record).await
    }

    pub async fn list_buildings(&self) -> Result<Vec<Building>> {
        self.preloads.list_buildings().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::testing::{credential, token_reply, ScriptedTransport};

    const MATCH: &str = "<computers><size>1</size><computer><id>42</id><name>LIB-MBA-07</name>\
        <serial_number>ABC123</serial_number><asset_tag>ASSET-0042</asset_tag>\
        </computer></computers>";

    fn client(transport: &Arc<ScriptedTransport>, cache_tokens: bool) -> JamfClient {
        let transport: Arc<dyn Transport> = transport.clone();
        JamfClient::with_transport(credential(), transport, cache_tokens, Directory::default())
    }

    fn grants(transport: &ScriptedTransport) -> usize {
        transport
            .calls()
            .iter()
            .filter(|c| c.as_str() == "POST api/oauth/token")
            .count()
    }

    #[tokio::test]
    async fn lookup_chains_match_scope_and_preload() {
        let transport = ScriptedTransport::new();
        transport.reply(200, &token_reply("tok-1"));
        transport.reply(200, MATCH);
        transport.reply(200, r#"{"serialsByPrestageId":{"4":["ABC123"]}}"#);
        transport.reply(200, r#"{"totalCount":0,"results":[]}"#);

        let summary = client(&transport, true).lookup("ASSET-0042").await.unwrap();
        assert_eq!(summary.device.id, 42);
        assert_eq!(summary.membership.prestage_id, Some(PrestageId::new(4)));
        assert_eq!(summary.membership.prestage_name.as_deref(), Some("loaner prestage"));
        assert!(summary.preload.is_empty());
        assert_eq!(summary.preload.serial_number, "ABC123");

        assert_eq!(
            transport.calls(),
            vec![
                "POST api/oauth/token",
                "GET JSSResource/computers/match/ASSET-0042",
                "GET api/v2/computer-prestages/scope",
                "GET api/v2/inventory-preload/records",
            ]
        );
    }

    #[tokio::test]
    async fn uncached_client_grants_per_operation() {
        let transport = ScriptedTransport::new();
        transport.reply(200, &token_reply("tok-1"));
        transport.reply(200, MATCH);
        transport.reply(200, &token_reply("tok-2"));
        transport.reply(200, r#"{"serialsByPrestageId":{}}"#);
        transport.reply(200, &token_reply("tok-3"));
        transport.reply(200, r#"{"results":[]}"#);

        let summary = client(&transport, false).lookup("ABC123").await.unwrap();
        assert!(!summary.membership.is_assigned());

        assert_eq!(grants(&transport), 3);
        let requests = transport.requests();
        assert_eq!(requests[5].bearer.as_ref().map(|t| t.secret()), Some("tok-3"));
    }

    #[tokio::test]
    async fn lookup_stops_at_first_failure() {
        let transport = ScriptedTransport::new();
        transport.reply(200, &token_reply("tok-1"));
        transport.reply(200, "<computers><size>0</size></computers>");

        let err = client(&transport, true).lookup("missing").await.unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
        assert_eq!(transport.requests().len(), 2);
    }

    #[tokio::test]
    async fn enrollment_lookup_reads_each_preload() {
        let transport = ScriptedTransport::new();
        transport.reply(200, &token_reply("tok-1"));
        transport.reply(200, r#"{"results":[{"id":"1","name":"ASM"}]}"#);
        transport.reply(200, r#"{"results":[{"serialNumber":"F9JG5JQ00001","model":"iMac"}]}"#);
        transport.reply(
            200,
            r#"{"totalCount":1,"results":[{"id":"77","username":"asmith","building":"Olin"}]}"#,
        );

        let summaries = client(&transport, true).lookup_enrollments("F9JG5J").await.unwrap();
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].device.serial_number, "F9JG5JQ00001");
        assert_eq!(summaries[0].preload.id.as_ref().map(|id| id.as_str()), Some("77"));
        assert_eq!(summaries[0].preload.serial_number, "F9JG5JQ00001");
        assert_eq!(grants(&transport), 1);
        assert_eq!(transport.calls()[3], "GET api/v2/inventory-preload/records");
    }
}
