use std::fmt;
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::ACCEPT;
use reqwest::{Client, Method, Url};
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use crate::auth::AccessToken;
use crate::error::{Error, Result};

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("cannot build request url: {0}")]
    Url(String),

    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Accept {
    Json,
    Xml,
}

impl Accept {
    fn mime(self) -> &'static str {
        match self {
            Accept::Json => "application/json",
            Accept::Xml => "application/xml",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Body {
    Json(Value),
    Form(Vec<(String, String)>),
}

/// One call against the vendor API, relative to the instance base url.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    pub segments: Vec<String>,
    pub query: Vec<(String, String)>,
    pub accept: Accept,
    pub bearer: Option<AccessToken>,
    pub body: Option<Body>,
}

impl ApiRequest {
    /// `path` is split on `/`; use [`ApiRequest::segment`] for user-supplied
    /// text that has to stay a single segment.
    pub fn new(method: Method, path: &str) -> Self {
        Self {
            method,
            segments: path
                .split('/')
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
            query: Vec::new(),
            accept: Accept::Json,
            bearer: None,
            body: None,
        }
    }

    pub fn segment(mut self, segment: impl Into<String>) -> Self {
        self.segments.push(segment.into());
        self
    }

    pub fn query(mut self, key: &str, value: impl Into<String>) -> Self {
        self.query.push((key.to_string(), value.into()));
        self
    }

    pub fn accept(mut self, accept: Accept) -> Self {
        self.accept = accept;
        self
    }

    pub fn bearer(mut self, token: &AccessToken) -> Self {
        self.bearer = Some(token.clone());
        self
    }

    pub fn json(mut self, body: Value) -> Self {
        self.body = Some(Body::Json(body));
        self
    }

    pub fn form(mut self, pairs: &[(&str, &str)]) -> Self {
        self.body = Some(Body::Form(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        ));
        self
    }

    pub fn path(&self) -> String {
        self.segments.join("/")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiResponse {
    pub status: u16,
    pub body: String,
}

impl ApiResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    /// Reads only accept 200; a 401 means the token went bad.
    pub(crate) fn expect_ok(self, context: &'static str) -> Result<Self> {
        match self.status {
            200 => Ok(self),
            401 => Err(Error::Auth(format!("{} rejected the access token", context))),
            status => Err(Error::UnexpectedStatus { context, status }),
        }
    }

    pub(crate) fn json<T: DeserializeOwned>(&self, context: &'static str) -> Result<T> {
        serde_json::from_str(&self.body).map_err(|e| Error::Parse {
            context,
            reason: e.to_string(),
        })
    }
}

/// Sends requests to the vendor.
///
/// Services only ever talk to Jamf through this trait, which keeps the
/// workflows independent of the HTTP stack. `HttpTransport` is the real
/// implementation.
#[async_trait]
pub trait Transport: Send + Sync + fmt::Debug {
    /// Returns whatever status the vendor answered with; only failures to get an
    /// answer at all are errors.
    async fn send(&self, request: ApiRequest) -> std::result::Result<ApiResponse, TransportError>;
}

/// Bounded exponential backoff for transient network failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            initial_backoff_ms: 100,
            max_backoff_ms: 5_000,
        }
    }
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }
}

/// Runs `op`, retrying while `is_transient` says the failure is worth another
/// attempt and the policy still allows one.
pub async fn retry<T, E, F, Fut, P>(
    policy: RetryPolicy,
    is_transient: P,
    mut op: F,
) -> std::result::Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<T, E>>,
    P: Fn(&E) -> bool,
    E: fmt::Display,
{
    let mut backoff_ms = policy.initial_backoff_ms;
    let mut attempt = 0;

    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < policy.max_retries && is_transient(&e) => {
                attempt += 1;
                warn!(
                    "transient failure ({}), retry {}/{} in {}ms",
                    e, attempt, policy.max_retries, backoff_ms
                );
                tokio::time::sleep(Duration::from_millis(backoff_ms)).await;

                // double, but don't exceed max
                backoff_ms = (backoff_ms * 2).min(policy.max_backoff_ms);
            }
            Err(e) => return Err(e),
        }
    }
}

/// A refused or failed connection never reached Jamf, so any request may go
/// again. A timeout may fire after Jamf already acted, so only reads retry it.
fn is_retryable(method: &Method, e: &reqwest::Error) -> bool {
    if e.is_connect() {
        return true;
    }
    e.is_timeout() && (*method == Method::GET || *method == Method::HEAD)
}

#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    base_url: Url,
    retry: RetryPolicy,
}

impl HttpTransport {
    pub fn new(
        base_url: Url,
        timeout: Duration,
        retry: RetryPolicy,
    ) -> std::result::Result<Self, TransportError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url,
            retry,
        })
    }

    fn url_for(&self, request: &ApiRequest) -> std::result::Result<Url, TransportError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| TransportError::Url(format!("{} cannot be a base", self.base_url)))?
            .pop_if_empty()
            .extend(&request.segments);
        if !request.query.is_empty() {
            url.query_pairs_mut().extend_pairs(request.query.iter());
        }
        Ok(url)
    }

    async fn send_once(
        &self,
        url: &Url,
        request: &ApiRequest,
    ) -> std::result::Result<ApiResponse, reqwest::Error> {
        let mut builder = self
            .client
            .request(request.method.clone(), url.clone())
            .header(ACCEPT, request.accept.mime());

        if let Some(token) = &request.bearer {
            builder = builder.bearer_auth(token.secret());
        }
        builder = match &request.body {
            Some(Body::Json(value)) => builder.json(value),
            Some(Body::Form(pairs)) => builder.form(pairs),
            None => builder,
        };

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let body = response.text().await?;
        Ok(ApiResponse { status, body })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: ApiRequest) -> std::result::Result<ApiResponse, TransportError> {
        let url = self.url_for(&request)?;
        debug!("{} {}", request.method, url.path());

        let response = retry(
            self.retry,
            |e: &reqwest::Error| is_retryable(&request.method, e),
            || self.send_once(&url, &request),
        )
        .await?;
        debug!("{} {} -> {}", request.method, url.path(), response.status);
        Ok(response)
    }
}
