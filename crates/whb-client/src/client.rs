//! HTTP client for the controller's REST API with digest authentication

use std::time::Duration;

use async_trait::async_trait;
use digest_auth::{AuthContext, HttpMethod, WwwAuthenticateHeader};
use parking_lot::Mutex;
use reqwest::header::{AUTHORIZATION, WWW_AUTHENTICATE};
use reqwest::{Client, Method, StatusCode};
use serde_json::{json, Value};
use tracing::{debug, instrument};
use url::Url;
use whb_conv::{value_to_device_string, Datapoint, ResourceKind};

use crate::error::{DeviceError, Result};
use crate::gateway::{parse_datapoint, DeviceGateway};
use crate::retry::RetryPolicy;

/// Default request timeout
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
/// Default connection timeout
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

const API_PREFIX: &str = "/api/1.0";

/// Digest-authenticated client for one Windhager controller
///
/// The last digest challenge is cached, so steady-state requests need a
/// single round trip. A stale nonce costs one extra 401 exchange.
pub struct DeviceClient {
    client: Client,
    base_url: Url,
    username: String,
    password: String,
    challenge: Mutex<Option<WwwAuthenticateHeader>>,
    retry: RetryPolicy,
}

impl std::fmt::Debug for DeviceClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceClient")
            .field("base_url", &self.base_url.as_str())
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("retry", &self.retry)
            .finish()
    }
}

impl DeviceClient {
    /// Create a client for `host` (bare host name or URL)
    pub fn new(host: &str, username: &str, password: &str) -> Result<Self> {
        Self::with_config(
            host,
            username,
            password,
            DEFAULT_TIMEOUT,
            DEFAULT_CONNECT_TIMEOUT,
        )
    }

    /// Create a client with custom timeouts
    pub fn with_config(
        host: &str,
        username: &str,
        password: &str,
        timeout: Duration,
        connect_timeout: Duration,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(connect_timeout)
            .build()?;

        Ok(Self {
            client,
            base_url: normalize_base_url(host)?,
            username: username.to_string(),
            password: password.to_string(),
            challenge: Mutex::new(None),
            retry: RetryPolicy::default(),
        })
    }

    /// Replace the retry policy for transient failures
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Get the base URL
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    // =========================================================================
    // Request plumbing
    // =========================================================================

    fn api_url(&self, path: &str) -> Result<Url> {
        Ok(self.base_url.join(&format!("{}{}", API_PREFIX, path))?)
    }

    /// Answer the cached challenge for this request, if there is one
    fn authorization(&self, method: &Method, url: &Url) -> Result<Option<String>> {
        let mut cached = self.challenge.lock();
        let Some(prompt) = cached.as_mut() else {
            return Ok(None);
        };

        let uri = match url.query() {
            Some(q) => format!("{}?{}", url.path(), q),
            None => url.path().to_string(),
        };
        let context = AuthContext::new_with_method(
            self.username.as_str(),
            self.password.as_str(),
            uri,
            None::<&[u8]>,
            HttpMethod::from(method.as_str()),
        );
        let answer = prompt
            .respond(&context)
            .map_err(|e| DeviceError::Digest(e.to_string()))?;
        Ok(Some(answer.to_header_string()))
    }

    /// Send one request, answering a digest challenge once
    async fn send(&self, method: Method, url: Url, body: Option<&Value>) -> Result<String> {
        for attempt in 0..2 {
            let mut request = self.client.request(method.clone(), url.clone());
            if let Some(header) = self.authorization(&method, &url)? {
                request = request.header(AUTHORIZATION, header);
            }
            if let Some(body) = body {
                request = request.json(body);
            }

            let response = request.send().await?;
            let status = response.status();

            if status == StatusCode::UNAUTHORIZED {
                if attempt > 0 {
                    return Err(DeviceError::AuthenticationFailed(format!(
                        "{} {} rejected the credentials",
                        method, url
                    )));
                }
                let header = response
                    .headers()
                    .get(WWW_AUTHENTICATE)
                    .and_then(|h| h.to_str().ok())
                    .ok_or_else(|| {
                        DeviceError::AuthenticationFailed("missing digest challenge".to_string())
                    })?;
                let prompt =
                    digest_auth::parse(header).map_err(|e| DeviceError::Digest(e.to_string()))?;
                debug!("Received digest challenge, retrying {} {}", method, url);
                *self.challenge.lock() = Some(prompt);
                continue;
            }

            let text = response.text().await?;
            if !status.is_success() {
                return Err(DeviceError::request_failed(Some(status.as_u16()), text));
            }
            return Ok(text);
        }

        Err(DeviceError::AuthenticationFailed(
            "digest challenge not accepted".to_string(),
        ))
    }

    async fn get_json(&self, path: &str) -> Result<Value> {
        let url = self.api_url(path)?;
        let text = self
            .retry
            .run(path, || self.send(Method::GET, url.clone(), None))
            .await?;
        parse_json(&text)
    }
}

fn normalize_base_url(host: &str) -> Result<Url> {
    let host = host.trim().trim_end_matches('/');
    if host.starts_with("http://") || host.starts_with("https://") {
        Ok(Url::parse(host)?)
    } else {
        Ok(Url::parse(&format!("http://{}", host))?)
    }
}

fn parse_json(text: &str) -> Result<Value> {
    serde_json::from_str(text)
        .map_err(|e| DeviceError::request_failed(None, format!("malformed JSON ({}): {}", e, text)))
}

#[async_trait]
impl DeviceGateway for DeviceClient {
    #[instrument(skip(self))]
    async fn lookup(&self, path: Option<&str>) -> Result<Value> {
        self.get_json(&format!("/lookup{}", path.unwrap_or(""))).await
    }

    #[instrument(skip(self))]
    async fn read_datapoint(&self, oid: &str) -> Result<Datapoint> {
        let value = self.get_json(&format!("/datapoint{}", oid)).await?;
        parse_datapoint(value)
    }

    #[instrument(skip(self))]
    async fn read_all_datapoints(&self) -> Result<Vec<Datapoint>> {
        let value = self.get_json("/datapoints").await?;
        serde_json::from_value(value).map_err(|e| {
            DeviceError::request_failed(None, format!("malformed datapoint list: {}", e))
        })
    }

    #[instrument(skip(self))]
    async fn write_datapoint(&self, oid: &str, value: &Value) -> Result<()> {
        let url = self.api_url("/datapoint")?;
        let body = json!({ "OID": oid, "value": value_to_device_string(value) });
        self.retry
            .run("write", || self.send(Method::PUT, url.clone(), Some(&body)))
            .await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn resource_text(&self, kind: ResourceKind, lang: &str) -> Result<String> {
        let url = self.base_url.join(&kind.path(lang))?;
        self.retry
            .run(kind.file_stem(), || self.send(Method::GET, url.clone(), None))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_base_url() {
        assert_eq!(
            normalize_base_url("192.168.1.20").unwrap().as_str(),
            "http://192.168.1.20/"
        );
        assert_eq!(
            normalize_base_url("http://windhager.local/").unwrap().as_str(),
            "http://windhager.local/"
        );
        assert!(normalize_base_url("http://").is_err());
    }

    #[test]
    fn test_api_url() {
        let client = DeviceClient::new("127.0.0.1:8080", "USER", "secret").unwrap();
        assert_eq!(
            client.api_url("/lookup/60").unwrap().as_str(),
            "http://127.0.0.1:8080/api/1.0/lookup/60"
        );
    }

    #[test]
    fn test_debug_redacts_password() {
        let client = DeviceClient::new("127.0.0.1", "USER", "secret").unwrap();
        let debug = format!("{:?}", client);
        assert!(debug.contains("USER"));
        assert!(!debug.contains("secret"));
    }

    #[test]
    fn test_parse_json() {
        assert_eq!(parse_json("[60]").unwrap(), serde_json::json!([60]));
        assert!(matches!(
            parse_json("<html>"),
            Err(DeviceError::RequestFailed { status: None, .. })
        ));
    }
}
