//! Device clients: fetching raw datapoints from devices.

use std::future::Future;
use std::time::Duration;

use plugsight_common::{DeviceDescriptor, RawDatapoint};
use reqwest::header::{AUTHORIZATION, WWW_AUTHENTICATE};
use reqwest::{Response, StatusCode};
use serde_json::Value;
use thiserror::Error;
use tracing::trace;

use crate::config::{AuthScheme, ClientConfig};
use crate::decoder::{DecodeError, parse_payload};

/// Device-level fetch failure. Always retried with backoff.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("network error: {0}")]
    Network(String),

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("request timed out")]
    Timeout,

    /// The device answered but the payload could not be interpreted.
    #[error("{0}")]
    Payload(#[from] DecodeError),
}

impl FetchError {
    /// Short classification used in logs and health reporting.
    pub fn kind(&self) -> &'static str {
        match self {
            FetchError::Network(_) => "network",
            FetchError::Auth(_) => "auth",
            FetchError::Timeout => "timeout",
            FetchError::Payload(_) => "payload",
        }
    }
}

/// Capability to fetch one datapoint batch from a device.
///
/// Implementations wrap a vendor protocol; the poller only depends on this
/// trait.
pub trait DeviceClient: Send + Sync + 'static {
    fn fetch(
        &self,
        device: &DeviceDescriptor,
    ) -> impl Future<Output = Result<RawDatapoint, FetchError>> + Send;
}

/// HTTP/JSON device client.
///
/// Issues `GET http://{address}{status_path}` authenticated with the
/// configured username and the device key as password, then reads the JSON
/// body. Basic auth suits local Tuya gateways exposing `{"dps": {...}}`;
/// Shelly Gen2 RPC endpoints need [`AuthScheme::Digest`].
#[derive(Debug, Clone)]
pub struct HttpDeviceClient {
    http: reqwest::Client,
    status_path: String,
    auth: AuthScheme,
    username: String,
    payload_root: Option<String>,
}

impl HttpDeviceClient {
    /// Create a client; `timeout` bounds each request.
    pub fn new(config: &ClientConfig, timeout: Duration) -> Result<Self, FetchError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| FetchError::Network(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            status_path: config.status_path.clone(),
            auth: config.auth,
            username: config.username.clone(),
            payload_root: config.payload_root.clone(),
        })
    }

    /// Build the status URL for a device.
    pub fn status_url(&self, device: &DeviceDescriptor) -> String {
        let path = self.status_path.replace("{id}", &device.id);
        if path.starts_with('/') {
            format!("http://{}{}", device.address, path)
        } else {
            format!("http://{}/{}", device.address, path)
        }
    }

    async fn send(&self, url: &str, device: &DeviceDescriptor) -> Result<Response, FetchError> {
        match self.auth {
            AuthScheme::Basic => self
                .http
                .get(url)
                .basic_auth(&self.username, Some(&device.key))
                .send()
                .await
                .map_err(classify_reqwest_error),
            AuthScheme::Digest => {
                let challenge = self
                    .http
                    .get(url)
                    .send()
                    .await
                    .map_err(classify_reqwest_error)?;
                if challenge.status() != StatusCode::UNAUTHORIZED {
                    return Ok(challenge);
                }

                let authorization = self.digest_authorization(&challenge, &device.key)?;
                self.http
                    .get(url)
                    .header(AUTHORIZATION, authorization)
                    .send()
                    .await
                    .map_err(classify_reqwest_error)
            }
        }
    }

    /// Answer the `WWW-Authenticate: Digest` challenge of a 401 response.
    fn digest_authorization(
        &self,
        challenge: &Response,
        password: &str,
    ) -> Result<String, FetchError> {
        let header = challenge
            .headers()
            .get(WWW_AUTHENTICATE)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| FetchError::Auth("device sent no digest challenge".to_string()))?;

        let mut prompt = digest_auth::parse(header)
            .map_err(|e| FetchError::Auth(format!("invalid digest challenge: {}", e)))?;

        // Digest covers the request target: path plus query
        let url = challenge.url();
        let uri = match url.query() {
            Some(query) => format!("{}?{}", url.path(), query),
            None => url.path().to_string(),
        };

        let context = digest_auth::AuthContext::new(self.username.as_str(), password, uri);
        let answer = prompt
            .respond(&context)
            .map_err(|e| FetchError::Auth(format!("cannot answer digest challenge: {}", e)))?;
        Ok(answer.to_header_string())
    }
}

impl DeviceClient for HttpDeviceClient {
    async fn fetch(&self, device: &DeviceDescriptor) -> Result<RawDatapoint, FetchError> {
        let url = self.status_url(device);
        trace!(device = %device.id, url = %url, "Fetching datapoints");

        let response = self.send(&url, device).await?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(FetchError::Auth(format!("device returned HTTP {}", status)));
        }
        if !status.is_success() {
            return Err(FetchError::Network(format!("device returned HTTP {}", status)));
        }

        let body: Value = response.json().await.map_err(|e| {
            if e.is_timeout() {
                FetchError::Timeout
            } else if e.is_decode() {
                FetchError::Payload(DecodeError::Malformed(format!("invalid JSON body: {}", e)))
            } else {
                FetchError::Network(e.to_string())
            }
        })?;

        Ok(parse_payload(&body, self.payload_root.as_deref())?)
    }
}

fn classify_reqwest_error(e: reqwest::Error) -> FetchError {
    if e.is_timeout() {
        FetchError::Timeout
    } else {
        FetchError::Network(e.to_string())
    }
}
