//! Test utilities for whb-client
//!
//! [`TestDevice`] serves a [`MockDevice`] over real HTTP with the
//! controller's endpoint layout and a digest challenge, so the full
//! [`DeviceClient`] request path can be exercised.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, Request, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, put};
use axum::{Json, Router};
use md5::{Digest, Md5};
use serde::Deserialize;
use serde_json::Value;
use tokio::net::TcpListener;
use whb_conv::ResourceKind;

use crate::error::DeviceError;
use crate::gateway::DeviceGateway;
use crate::mock::MockDevice;
use crate::retry::RetryPolicy;
use crate::DeviceClient;

/// User name the fake device accepts
pub const TEST_USER: &str = "USER";
/// Password handed to the client by [`TestDevice::start`]
pub const TEST_PASSWORD: &str = "secret";

const REALM: &str = "windhager";
const NONCE: &str = "5d1f6a0c3b7e";
const CHALLENGE: &str = r#"Digest realm="windhager", nonce="5d1f6a0c3b7e", qop="auth", algorithm=MD5"#;

#[derive(Clone)]
struct DeviceState {
    device: Arc<MockDevice>,
    username: String,
    password: String,
    challenges: Arc<AtomicUsize>,
}

#[derive(Deserialize)]
struct WriteBody {
    #[serde(rename = "OID")]
    oid: String,
    value: Value,
}

/// Build the fake controller router accepting one user name and password
pub fn device_router(
    device: Arc<MockDevice>,
    username: &str,
    password: &str,
    challenges: Arc<AtomicUsize>,
) -> Router {
    let state = DeviceState {
        device,
        username: username.to_string(),
        password: password.to_string(),
        challenges,
    };

    Router::new()
        .route("/api/1.0/lookup", get(lookup_root))
        .route("/api/1.0/lookup/{*path}", get(lookup_path))
        .route("/api/1.0/datapoint/{*oid}", get(read_datapoint))
        .route("/api/1.0/datapoint", put(write_datapoint))
        .route("/api/1.0/datapoints", get(read_all))
        .route("/res/xml/{file}", get(resource))
        .layer(middleware::from_fn_with_state(state.clone(), require_digest))
        .with_state(state)
}

async fn require_digest(State(state): State<DeviceState>, request: Request, next: Next) -> Response {
    let authorized = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Digest "))
        .map(|fields| verify_digest(&state, request.method().as_str(), fields))
        .unwrap_or(false);

    if authorized {
        next.run(request).await
    } else {
        state.challenges.fetch_add(1, Ordering::SeqCst);
        challenge()
    }
}

fn md5_hex(input: &str) -> String {
    format!("{:x}", Md5::digest(input.as_bytes()))
}

/// Split `key=value, key="value"` pairs of an Authorization header
fn digest_fields(fields: &str) -> Vec<(String, String)> {
    let mut pairs = Vec::new();
    let mut current = String::new();
    let mut quoted = false;
    for c in fields.chars().chain(std::iter::once(',')) {
        match c {
            '"' => quoted = !quoted,
            ',' if !quoted => {
                if let Some((key, value)) = current.split_once('=') {
                    pairs.push((key.trim().to_string(), value.trim().to_string()));
                }
                current.clear();
            }
            _ => current.push(c),
        }
    }
    pairs
}

/// Recompute the digest response for the issued nonce (RFC 7616, MD5)
fn verify_digest(state: &DeviceState, method: &str, fields: &str) -> bool {
    let pairs = digest_fields(fields);
    let field = |name: &str| {
        pairs
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    };

    let (Some(username), Some(realm), Some(nonce), Some(uri), Some(response)) = (
        field("username"),
        field("realm"),
        field("nonce"),
        field("uri"),
        field("response"),
    ) else {
        return false;
    };
    if username != state.username || realm != REALM || nonce != NONCE {
        return false;
    }

    let ha1 = md5_hex(&format!("{}:{}:{}", username, realm, state.password));
    let ha2 = md5_hex(&format!("{}:{}", method, uri));
    let expected = match (field("qop"), field("nc"), field("cnonce")) {
        (Some(qop), Some(nc), Some(cnonce)) => {
            md5_hex(&format!("{}:{}:{}:{}:{}:{}", ha1, nonce, nc, cnonce, qop, ha2))
        }
        _ => md5_hex(&format!("{}:{}:{}", ha1, nonce, ha2)),
    };
    expected.eq_ignore_ascii_case(response)
}

fn challenge() -> Response {
    let mut response = (StatusCode::UNAUTHORIZED, "401 Unauthorized").into_response();
    response
        .headers_mut()
        .insert(header::WWW_AUTHENTICATE, HeaderValue::from_static(CHALLENGE));
    response
}

fn device_error(err: DeviceError) -> Response {
    match err {
        DeviceError::AuthenticationFailed(_) => challenge(),
        DeviceError::RequestFailed { status, body } => {
            let status = status
                .and_then(|s| StatusCode::from_u16(s).ok())
                .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            (status, body).into_response()
        }
        other => (StatusCode::SERVICE_UNAVAILABLE, other.to_string()).into_response(),
    }
}

fn rooted(path: &str) -> String {
    format!("/{}", path.trim_start_matches('/'))
}

async fn lookup_root(State(state): State<DeviceState>) -> Response {
    match state.device.lookup(None).await {
        Ok(value) => Json(value).into_response(),
        Err(e) => device_error(e),
    }
}

async fn lookup_path(State(state): State<DeviceState>, Path(path): Path<String>) -> Response {
    match state.device.lookup(Some(&rooted(&path))).await {
        Ok(value) => Json(value).into_response(),
        Err(e) => device_error(e),
    }
}

async fn read_datapoint(State(state): State<DeviceState>, Path(oid): Path<String>) -> Response {
    match state.device.read_datapoint(&rooted(&oid)).await {
        Ok(dp) => Json(dp).into_response(),
        Err(e) => device_error(e),
    }
}

async fn read_all(State(state): State<DeviceState>) -> Response {
    match state.device.read_all_datapoints().await {
        Ok(dps) => Json(dps).into_response(),
        Err(e) => device_error(e),
    }
}

async fn write_datapoint(State(state): State<DeviceState>, Json(body): Json<WriteBody>) -> Response {
    // the controller only accepts string values
    if !body.value.is_string() {
        return (StatusCode::BAD_REQUEST, "value must be a string").into_response();
    }
    match state.device.write_datapoint(&body.oid, &body.value).await {
        Ok(()) => Json(serde_json::json!({ "OID": body.oid, "value": body.value })).into_response(),
        Err(e) => device_error(e),
    }
}

async fn resource(State(state): State<DeviceState>, Path(file): Path<String>) -> Response {
    let Some((stem, lang)) = file
        .strip_suffix(".xml")
        .and_then(|name| name.rsplit_once('_'))
    else {
        return (StatusCode::NOT_FOUND, "unknown resource").into_response();
    };
    let Some(kind) = ResourceKind::ALL.iter().copied().find(|k| k.file_stem() == stem) else {
        return (StatusCode::NOT_FOUND, "unknown resource").into_response();
    };
    match state.device.resource_text(kind, lang).await {
        Ok(xml) => ([(header::CONTENT_TYPE, "text/xml")], xml).into_response(),
        Err(e) => device_error(e),
    }
}

/// A fake controller that automatically shuts down when dropped
pub struct TestDevice {
    pub addr: SocketAddr,
    pub client: DeviceClient,
    pub device: Arc<MockDevice>,
    challenges: Arc<AtomicUsize>,
    shutdown_tx: Option<tokio::sync::oneshot::Sender<()>>,
    handle: Option<tokio::task::JoinHandle<()>>,
}

impl TestDevice {
    /// Serve `device` and connect a client with valid credentials
    pub async fn start(device: MockDevice) -> crate::Result<Self> {
        Self::start_with_credentials(device, TEST_USER, TEST_PASSWORD).await
    }

    /// Serve `device` for [`TEST_USER`]/[`TEST_PASSWORD`] and connect a client
    /// with the given credentials
    pub async fn start_with_credentials(
        device: MockDevice,
        username: &str,
        password: &str,
    ) -> crate::Result<Self> {
        let device = Arc::new(device);
        let challenges = Arc::new(AtomicUsize::new(0));
        let router = device_router(device.clone(), TEST_USER, TEST_PASSWORD, challenges.clone());

        // Bind to any available port
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .map_err(|e| DeviceError::Unreachable(e.to_string()))?;
        let addr = listener
            .local_addr()
            .map_err(|e| DeviceError::Unreachable(e.to_string()))?;

        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();

        let handle = tokio::spawn(async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await
                .ok();
        });

        // Give server a moment to start
        tokio::time::sleep(Duration::from_millis(10)).await;

        let client = DeviceClient::with_config(
            &addr.to_string(),
            username,
            password,
            Duration::from_secs(5),
            Duration::from_secs(2),
        )?
        .with_retry(RetryPolicy::none());

        Ok(Self {
            addr,
            client,
            device,
            challenges,
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
        })
    }

    /// Get the base URL of the fake device
    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Number of 401 challenges issued so far
    pub fn challenges_issued(&self) -> usize {
        self.challenges.load(Ordering::SeqCst)
    }

    /// Shutdown the server gracefully
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

impl Drop for TestDevice {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

/// Wait for a condition with timeout
pub async fn wait_for<F, Fut>(condition: F, timeout: Duration) -> bool
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;

    while tokio::time::Instant::now() < deadline {
        if condition().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    false
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> DeviceState {
        DeviceState {
            device: Arc::new(MockDevice::new(60)),
            username: TEST_USER.to_string(),
            password: TEST_PASSWORD.to_string(),
            challenges: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn header(password: &str, uri: &str) -> String {
        let ha1 = md5_hex(&format!("{}:{}:{}", TEST_USER, REALM, password));
        let ha2 = md5_hex(&format!("GET:{}", uri));
        let response = md5_hex(&format!("{}:{}:00000001:0a4f113b:auth:{}", ha1, NONCE, ha2));
        format!(
            r#"username="{}", realm="{}", nonce="{}", uri="{}", qop=auth, nc=00000001, cnonce="0a4f113b", response="{}", algorithm=MD5"#,
            TEST_USER, REALM, NONCE, uri, response
        )
    }

    #[test]
    fn test_verify_digest() {
        let state = state();
        assert!(verify_digest(&state, "GET", &header(TEST_PASSWORD, "/api/1.0/lookup")));
        assert!(!verify_digest(&state, "GET", &header("wrong", "/api/1.0/lookup")));
        assert!(!verify_digest(&state, "PUT", &header(TEST_PASSWORD, "/api/1.0/lookup")));
    }

    #[test]
    fn test_digest_fields_keep_quoted_commas() {
        let pairs = digest_fields(r#"username="a,b", qop=auth"#);
        assert_eq!(pairs[0], ("username".to_string(), "a,b".to_string()));
        assert_eq!(pairs[1], ("qop".to_string(), "auth".to_string()));
    }

    #[test]
    fn test_rooted() {
        assert_eq!(rooted("60/1/1/0/1/0"), "/60/1/1/0/1/0");
        assert_eq!(rooted("/60"), "/60");
    }
}
