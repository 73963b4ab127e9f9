//! In-memory transport for exercising the workflows without a Jamf instance.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::transport::{ApiRequest, ApiResponse, Transport, TransportError};
use crate::types::Credential;

/// Answers requests from a queue of canned responses, in order, and records
/// every request it saw.
#[derive(Debug, Default)]
pub(crate) struct ScriptedTransport {
    replies: Mutex<VecDeque<ApiResponse>>,
    requests: Mutex<Vec<ApiRequest>>,
}

impl ScriptedTransport {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn reply(&self, status: u16, body: &str) {
        self.replies.lock().unwrap().push_back(ApiResponse::new(status, body));
    }

    pub(crate) fn requests(&self) -> Vec<ApiRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// `"METHOD path"` for every request, in order.
    pub(crate) fn calls(&self) -> Vec<String> {
        self.requests()
            .iter()
            .map(|r| format!("{} {}", r.method, r.path()))
            .collect()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, request: ApiRequest) -> Result<ApiResponse, TransportError> {
        let reply = self.replies.lock().unwrap().pop_front();
        let call = format!("{} {}", request.method, request.path());
        self.requests.lock().unwrap().push(request);
        Ok(reply.unwrap_or_else(|| panic!("no scripted reply left for {}", call)))
    }
}

pub(crate) fn credential() -> Credential {
    Credential::new("https://example.jamfcloud.com/", "desk-client", "desk-secret").unwrap()
}

pub(crate) fn token_reply(token: &str) -> String {
    format!(
        r#"{{"access_token":"{}","scope":"api-role:2","token_type":"Bearer","expires_in":1200}}"#,
        token
    )
}
