use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use reqwest::Method;
use serde::Deserialize;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::transport::{ApiRequest, ApiResponse, Transport};
use crate::types::Credential;

const TOKEN_PATH: &str = "api/oauth/token";

// Cached tokens are dropped this long before the vendor says they expire.
const EXPIRY_MARGIN: Duration = Duration::from_secs(30);

/// Bearer token issued for the client credential.
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken(String);

impl AccessToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn secret(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AccessToken(<redacted>)")
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    #[serde(default)]
    expires_in: Option<u64>,
}

#[derive(Debug)]
struct CachedToken {
    token: AccessToken,
    refresh_at: Instant,
}

/// Exchanges the client credential for bearer tokens and carries every
/// authorized call to the transport.
///
/// With caching on, a token is reused until shortly before it expires. With
/// caching off, each `acquire` performs a fresh grant.
#[derive(Debug)]
pub struct SessionProvider {
    credential: Credential,
    transport: Arc<dyn Transport>,
    caching: bool,
    cache: Mutex<Option<CachedToken>>,
}

impl SessionProvider {
    pub fn new(credential: Credential, transport: Arc<dyn Transport>) -> Self {
        Self {
            credential,
            transport,
            caching: true,
            cache: Mutex::new(None),
        }
    }

    pub fn without_cache(mut self) -> Self {
        self.caching = false;
        self
    }

    pub async fn acquire(&self) -> Result<AccessToken> {
        if !self.caching {
            return self.request_token().await.map(|(token, _)| token);
        }

        let mut cache = self.cache.lock().await;
        if let Some(cached) = cache.as_ref() {
            if Instant::now() < cached.refresh_at {
                debug!("reusing cached access token");
                return Ok(cached.token.clone());
            }
        }

        let (token, expires_in) = self.request_token().await?;
        *cache = expires_in
            .map(|secs| Duration::from_secs(secs).saturating_sub(EXPIRY_MARGIN))
            .filter(|lifetime| !lifetime.is_zero())
            .map(|lifetime| CachedToken {
                token: token.clone(),
                refresh_at: Instant::now() + lifetime,
            });
        Ok(token)
    }

    /// Forget the cached token so the next `acquire` performs a new grant.
    pub async fn invalidate(&self) {
        if self.cache.lock().await.take().is_some() {
            info!("dropped cached access token");
        }
    }

    /// Sends an already-authorized request. A 401 answer invalidates the cached
    /// token; the response is still handed back for the caller to classify.
    pub async fn send(&self, request: ApiRequest) -> Result<ApiResponse> {
        let response = self.transport.send(request).await?;
        if response.status == 401 {
            self.invalidate().await;
        }
        Ok(response)
    }

    async fn request_token(&self) -> Result<(AccessToken, Option<u64>)> {
        let request = ApiRequest::new(Method::POST, TOKEN_PATH).form(&[
            ("client_id", self.credential.client_id.as_str()),
            ("grant_type", "client_credentials"),
            ("client_secret", self.credential.client_secret.as_str()),
        ]);

        let response = self
            .transport
            .send(request)
            .await
            .map_err(|e| Error::Auth(format!("token request failed: {}", e)))?;

        match response.status {
            200 => {}
            400 | 401 => return Err(Error::Auth("client credentials were rejected".to_string())),
            403 => return Err(Error::Auth("client is not allowed to request tokens".to_string())),
            status => {
                return Err(Error::Auth(format!(
                    "token endpoint returned status code {}",
                    status
                )))
            }
        }

        let body: TokenResponse = serde_json::from_str(&response.body)
            .map_err(|e| Error::Auth(format!("malformed token response: {}", e)))?;
        let token = body
            .access_token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| Error::Auth("token response carried no access_token".to_string()))?;

        info!("acquired access token for client {}", self.credential.client_id);
        Ok((AccessToken(token), body.expires_in))
    }
}
