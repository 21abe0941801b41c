//! Loopback WebSocket bridge between the page context, the coordinator and
//! UI listeners.
//!
//! Every client opens with a `hello` frame carrying its role, the session
//! token and a protocol version. `page` clients then send capture requests
//! tagged with an `id` and get the response back under the same `id`;
//! `popup` clients receive every `memo_added` notification.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use rand::Rng;
use subtle::ConstantTimeEq;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio_tungstenite::tungstenite::http::{Request as HttpRequest, Response as HttpResponse, StatusCode};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::coordinator::{CaptureCoordinator, CaptureSink};
use crate::error::{LivememoError, Result};
use crate::protocol::{CaptureResponse, Notification, Request};

/// Version spoken by this build; clients older than [`MIN_PROTOCOL_VERSION`]
/// are turned away.
pub const PROTOCOL_VERSION: &str = "0.1.0";
const MIN_PROTOCOL_VERSION: &str = "0.1.0";

/// Token prefix for all bridge session tokens.
const TOKEN_PREFIX: &str = "lmm_";

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

type ServerSink = SplitSink<WebSocketStream<TcpStream>, Message>;
type ServerStream = SplitStream<WebSocketStream<TcpStream>>;
type ClientSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Page,
    Popup,
}

impl Role {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "page" => Some(Role::Page),
            "popup" => Some(Role::Popup),
            _ => None,
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            Role::Page => "page",
            Role::Popup => "popup",
        }
    }
}

/// Generate a new session token: `lmm_` + 32 random hex characters.
pub fn generate_token() -> String {
    let bytes: [u8; 16] = rand::thread_rng().gen();
    let hex: String = bytes.iter().map(|b| format!("{:02x}", b)).collect();
    format!("{}{}", TOKEN_PREFIX, hex)
}

/// Path to the bridge token file: `<data_local_dir>/livememo/bridge-token`
pub fn token_file_path() -> Result<PathBuf> {
    let data_dir = dirs::data_local_dir().ok_or_else(|| {
        LivememoError::Other("Cannot determine local data directory".to_string())
    })?;
    Ok(data_dir.join("livememo").join("bridge-token"))
}

/// Write the session token with mode 0600, via temp file and rename.
pub async fn write_token_file(token: &str) -> Result<()> {
    let path = token_file_path()?;
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    #[cfg(unix)]
    {
        use tokio::io::AsyncWriteExt;

        let tmp_path = path.with_extension("tmp");
        let mut opts = tokio::fs::OpenOptions::new();
        opts.write(true).create(true).truncate(true).mode(0o600);
        let mut file = opts.open(&tmp_path).await?;
        file.write_all(token.as_bytes()).await?;
        file.flush().await?;
        drop(file);
        tokio::fs::rename(&tmp_path, &path).await?;
    }

    #[cfg(not(unix))]
    {
        tokio::fs::write(&path, token).await?;
    }

    Ok(())
}

pub async fn read_token_file() -> Option<String> {
    let path = token_file_path().ok()?;
    tokio::fs::read_to_string(&path)
        .await
        .ok()
        .map(|s| s.trim().to_string())
}

pub async fn delete_token_file() {
    if let Ok(path) = token_file_path() {
        let _ = tokio::fs::remove_file(&path).await;
    }
}

/// Only extension pages and loopback http origins may open a socket. A
/// missing origin means a non-browser client.
fn is_origin_allowed(origin: Option<&str>) -> bool {
    let Some(origin) = origin else {
        return true;
    };
    let Ok(url) = reqwest::Url::parse(&origin.to_ascii_lowercase()) else {
        return false;
    };
    match url.scheme() {
        "chrome-extension" | "moz-extension" => url.host_str().is_some_and(|h| !h.is_empty()),
        "http" => url.host_str().is_some_and(|host| {
            host == "localhost"
                || host
                    .trim_matches(['[', ']'])
                    .parse::<std::net::IpAddr>()
                    .is_ok_and(|ip| ip.is_loopback())
        }),
        _ => false,
    }
}

struct BridgeState {
    token: String,
    coordinator: CaptureCoordinator,
}

/// A bound, not yet running bridge.
pub struct BridgeServer {
    listener: TcpListener,
    state: Arc<BridgeState>,
}

impl BridgeServer {
    /// Bind on `127.0.0.1:port`; port 0 picks a free one.
    pub async fn bind(port: u16, token: String, coordinator: CaptureCoordinator) -> Result<Self> {
        let addr = SocketAddr::from(([127, 0, 0, 1], port));
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| LivememoError::BridgeError(format!("Failed to bind to {}: {}", addr, e)))?;
        Ok(Self {
            listener,
            state: Arc::new(BridgeState { token, coordinator }),
        })
    }

    pub fn local_port(&self) -> Result<u16> {
        Ok(self.listener.local_addr()?.port())
    }

    /// Accept connections until `shutdown` resolves.
    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: std::future::Future<Output = ()>,
    {
        let accept_loop = async {
            loop {
                let (stream, peer) = self.listener.accept().await.map_err(|e| {
                    LivememoError::BridgeError(format!("Accept failed: {}", e))
                })?;

                if !peer.ip().is_loopback() {
                    tracing::warn!("Rejected non-loopback connection from {}", peer);
                    continue;
                }

                tracing::debug!("New connection from {}", peer);
                tokio::spawn(handle_connection(stream, Arc::clone(&self.state)));
            }
        };

        tokio::select! {
            r = accept_loop => r,
            _ = shutdown => {
                tracing::info!("Shutting down bridge server...");
                Ok(())
            }
        }
    }
}

/// Run the bridge until SIGINT/SIGTERM, publishing the token file meanwhile.
pub async fn serve(port: u16, coordinator: CaptureCoordinator) -> Result<()> {
    let token = generate_token();
    let server = BridgeServer::bind(port, token.clone(), coordinator).await?;
    write_token_file(&token).await?;

    tracing::info!("Bridge listening on ws://127.0.0.1:{}", server.local_port()?);

    let result = server.run_until(shutdown_signal()).await;
    delete_token_file().await;
    result
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match (signal(SignalKind::interrupt()), signal(SignalKind::terminate())) {
            (Ok(mut sigint), Ok(mut sigterm)) => {
                tokio::select! {
                    _ = sigint.recv() => tracing::info!("Received SIGINT"),
                    _ = sigterm.recv() => tracing::info!("Received SIGTERM"),
                }
            }
            _ => {
                tokio::signal::ctrl_c().await.ok();
            }
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await.ok();
    }
}

async fn send_json(write: &mut ServerSink, value: serde_json::Value) -> bool {
    write.send(Message::Text(value.to_string().into())).await.is_ok()
}

async fn handle_connection(stream: TcpStream, state: Arc<BridgeState>) {
    let ws = match tokio_tungstenite::accept_hdr_async(
        stream,
        |req: &HttpRequest<()>,
         resp: HttpResponse<()>|
         -> std::result::Result<HttpResponse<()>, HttpResponse<Option<String>>> {
            let origin = req.headers().get("origin").and_then(|v| v.to_str().ok());
            if is_origin_allowed(origin) {
                return Ok(resp);
            }
            tracing::warn!("Rejected WebSocket connection with origin: {:?}", origin);
            let mut rejection = HttpResponse::new(Some("Forbidden origin".to_string()));
            *rejection.status_mut() = StatusCode::FORBIDDEN;
            Err(rejection)
        },
    )
    .await
    {
        Ok(ws) => ws,
        Err(e) => {
            tracing::error!("WebSocket handshake failed: {}", e);
            return;
        }
    };

    let (mut write, mut read) = ws.split();

    let hello: serde_json::Value = match tokio::time::timeout(HANDSHAKE_TIMEOUT, read.next()).await {
        Ok(Some(Ok(Message::Text(text)))) => match serde_json::from_str(text.as_str()) {
            Ok(v) => v,
            Err(_) => {
                tracing::warn!("Invalid JSON from client");
                return;
            }
        },
        _ => {
            tracing::warn!("Client disconnected or timed out before sending hello");
            return;
        }
    };

    let role = match check_hello(&hello, &state.token) {
        Ok(role) => role,
        Err((code, message)) => {
            tracing::warn!("Rejected client: {}", message);
            send_json(
                &mut write,
                serde_json::json!({ "type": "hello_error", "error": code, "message": message }),
            )
            .await;
            return;
        }
    };

    if !send_json(
        &mut write,
        serde_json::json!({ "type": "hello_ack", "version": PROTOCOL_VERSION }),
    )
    .await
    {
        tracing::warn!("Failed to send hello_ack to {} client", role.as_str());
        return;
    }

    tracing::debug!("{} client connected", role.as_str());
    match role {
        Role::Page => handle_page_client(write, read, &state.coordinator).await,
        Role::Popup => handle_popup_client(write, read, state.coordinator.subscribe()).await,
    }
    tracing::debug!("{} client disconnected", role.as_str());
}

/// Validate a hello frame; on failure returns the error code and message sent
/// back to the client.
fn check_hello(
    hello: &serde_json::Value,
    token: &str,
) -> std::result::Result<Role, (&'static str, String)> {
    let field = |name: &str| hello.get(name).and_then(|v| v.as_str()).unwrap_or("");

    if field("type") != "hello" {
        return Err(("expected_hello", format!("Expected hello message, got type={}", field("type"))));
    }

    let version = field("version");
    let min = semver::Version::parse(MIN_PROTOCOL_VERSION).map_err(|e| ("internal", e.to_string()))?;
    match semver::Version::parse(version) {
        Ok(v) if v >= min => {}
        _ => {
            return Err((
                "version_mismatch",
                format!(
                    "Protocol version {:?} is not supported. Minimum required: {}",
                    version, MIN_PROTOCOL_VERSION
                ),
            ))
        }
    }

    // Constant-time so the token cannot be probed byte by byte.
    if field("token").as_bytes().ct_eq(token.as_bytes()).unwrap_u8() != 1 {
        return Err(("invalid_token", "Token mismatch".to_string()));
    }

    Role::parse(field("role")).ok_or_else(|| ("unknown_role", format!("Unknown client role: {:?}", field("role"))))
}

async fn handle_page_client(mut write: ServerSink, mut read: ServerStream, coordinator: &CaptureCoordinator) {
    while let Some(frame) = read.next().await {
        let text = match frame {
            Ok(Message::Text(text)) => text.to_string(),
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                tracing::error!("Page WebSocket error: {}", e);
                break;
            }
        };

        let reply = answer_request(&text, coordinator).await;
        if !send_json(&mut write, reply).await {
            break;
        }
    }
}

/// Turn one request frame into its reply frame.
async fn answer_request(text: &str, coordinator: &CaptureCoordinator) -> serde_json::Value {
    let mut envelope: serde_json::Value = match serde_json::from_str(text) {
        Ok(v) => v,
        Err(e) => {
            return serde_json::json!({ "id": null, "error": { "message": format!("Invalid JSON: {}", e) } })
        }
    };
    let id = envelope
        .as_object_mut()
        .and_then(|o| o.remove("id"))
        .unwrap_or(serde_json::Value::Null);

    let request: Request = match serde_json::from_value(envelope) {
        Ok(r) => r,
        Err(e) => {
            return serde_json::json!({ "id": id, "error": { "message": format!("Unsupported request: {}", e) } })
        }
    };

    let mut reply = match coordinator.handle(request).await {
        Ok(resp) => serde_json::to_value(resp).unwrap_or_default(),
        Err(e) => {
            tracing::error!("Capture failed: {}", e);
            return serde_json::json!({ "id": id, "error": { "message": e.to_string() } });
        }
    };
    if let Some(obj) = reply.as_object_mut() {
        obj.insert("id".to_string(), id);
    }
    reply
}

async fn handle_popup_client(
    mut write: ServerSink,
    mut read: ServerStream,
    mut events: broadcast::Receiver<Notification>,
) {
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(notification) => {
                    let value = serde_json::to_value(&notification).unwrap_or_default();
                    if !send_json(&mut write, value).await {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!("Popup listener fell behind, {} notification(s) dropped", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            frame = read.next() => match frame {
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                Some(Ok(_)) => {}
            },
        }
    }
}

/// Open a socket and complete the hello handshake as `role`.
async fn connect(port: u16, role: Role, token: &str) -> Result<ClientSocket> {
    let url = format!("ws://127.0.0.1:{}", port);
    let (mut ws, _) = tokio_tungstenite::connect_async(&url).await.map_err(|e| {
        LivememoError::BridgeError(format!(
            "Cannot connect to bridge at {}. Is `livememo serve` running? ({})",
            url, e
        ))
    })?;

    let hello = serde_json::json!({
        "type": "hello",
        "role": role.as_str(),
        "token": token,
        "version": PROTOCOL_VERSION,
    });
    ws.send(Message::Text(hello.to_string().into()))
        .await
        .map_err(|e| LivememoError::BridgeError(format!("Send hello failed: {}", e)))?;

    match tokio::time::timeout(HANDSHAKE_TIMEOUT, ws.next()).await {
        Ok(Some(Ok(Message::Text(text)))) => {
            let ack: serde_json::Value = serde_json::from_str(text.as_str()).unwrap_or_default();
            if ack.get("type").and_then(|t| t.as_str()) == Some("hello_ack") {
                return Ok(ws);
            }
            let reason = ack
                .get("message")
                .and_then(|m| m.as_str())
                .unwrap_or("handshake rejected");
            Err(LivememoError::BridgeError(format!("Authentication failed: {}", reason)))
        }
        Ok(Some(Ok(_))) => Err(LivememoError::BridgeError(
            "Unexpected message type during handshake".to_string(),
        )),
        Ok(Some(Err(e))) => Err(LivememoError::BridgeError(format!("Authentication error: {}", e))),
        Ok(None) => Err(LivememoError::BridgeError(
            "Authentication failed: connection closed".to_string(),
        )),
        Err(_) => Err(LivememoError::BridgeError(
            "Authentication timeout: server did not respond".to_string(),
        )),
    }
}

async fn resolve_token(token: Option<String>) -> Result<String> {
    match token {
        Some(token) => Ok(token),
        None => read_token_file().await.ok_or_else(|| {
            LivememoError::BridgeError(
                "No bridge token found. Is `livememo serve` running?".to_string(),
            )
        }),
    }
}

/// Sends captures to a running bridge, one connection per capture.
#[derive(Debug, Clone)]
pub struct BridgeClient {
    port: u16,
    token: String,
}

impl BridgeClient {
    pub fn new(port: u16, token: impl Into<String>) -> Self {
        Self {
            port,
            token: token.into(),
        }
    }

    /// Use the token published by `livememo serve`.
    pub async fn from_token_file(port: u16) -> Result<Self> {
        Ok(Self::new(port, resolve_token(None).await?))
    }

    pub async fn request(&self, request: &Request) -> Result<CaptureResponse> {
        let mut ws = connect(self.port, Role::Page, &self.token).await?;

        let mut frame = serde_json::to_value(request)?;
        if let Some(obj) = frame.as_object_mut() {
            obj.insert("id".to_string(), serde_json::json!(1));
        }
        ws.send(Message::Text(frame.to_string().into()))
            .await
            .map_err(|e| LivememoError::BridgeError(format!("Send failed: {}", e)))?;

        let reply = tokio::time::timeout(REQUEST_TIMEOUT, async {
            while let Some(frame) = ws.next().await {
                match frame {
                    Ok(Message::Text(text)) => return Ok(Some(text.to_string())),
                    Ok(Message::Close(_)) => return Ok(None),
                    Ok(_) => continue,
                    Err(e) => return Err(LivememoError::BridgeError(format!("WebSocket error: {}", e))),
                }
            }
            Ok(None)
        })
        .await
        .map_err(|_| LivememoError::BridgeError("Bridge did not answer in time".to_string()))??;

        let _ = ws.close(None).await;

        let text = reply.ok_or_else(|| {
            LivememoError::BridgeError("Connection closed without response".to_string())
        })?;
        let value: serde_json::Value = serde_json::from_str(&text)?;
        if let Some(error) = value.get("error") {
            return Err(LivememoError::BridgeError(
                error
                    .get("message")
                    .and_then(|m| m.as_str())
                    .unwrap_or("Unknown bridge error")
                    .to_string(),
            ));
        }
        Ok(serde_json::from_value(value)?)
    }
}

#[async_trait]
impl CaptureSink for BridgeClient {
    async fn save_timestamp(&self, raw_text: &str) -> Result<CaptureResponse> {
        self.request(&Request::save_timestamp(raw_text)).await
    }
}

/// A `popup` connection yielding `memo_added` notifications.
pub struct Listener {
    ws: ClientSocket,
}

impl Listener {
    pub async fn connect(port: u16, token: Option<String>) -> Result<Self> {
        let token = resolve_token(token).await?;
        Ok(Self {
            ws: connect(port, Role::Popup, &token).await?,
        })
    }

    /// Next notification, or `None` once the bridge goes away.
    pub async fn next(&mut self) -> Result<Option<Notification>> {
        while let Some(frame) = self.ws.next().await {
            match frame {
                Ok(Message::Text(text)) => match serde_json::from_str(text.as_str()) {
                    Ok(notification) => return Ok(Some(notification)),
                    Err(e) => tracing::debug!("Ignoring unknown bridge message: {}", e),
                },
                Ok(Message::Close(_)) => return Ok(None),
                Ok(_) => continue,
                Err(e) => return Err(LivememoError::BridgeError(format!("WebSocket error: {}", e))),
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::store::MemoStore;

    #[test]
    fn origin_rules() {
        assert!(is_origin_allowed(None));
        assert!(is_origin_allowed(Some("chrome-extension://abcdefghijklmnop")));
        assert!(is_origin_allowed(Some("http://127.0.0.1:8080")));
        assert!(is_origin_allowed(Some("http://localhost")));
        assert!(is_origin_allowed(Some("http://[::1]:3000")));
        assert!(is_origin_allowed(Some("HTTP://LOCALHOST")));

        assert!(!is_origin_allowed(Some("http://127.0.0.1.evil.com")));
        assert!(!is_origin_allowed(Some("http://localhost.evil.com")));
        assert!(!is_origin_allowed(Some("https://localhost")));
        assert!(!is_origin_allowed(Some("https://chzzk.naver.com")));
        assert!(!is_origin_allowed(Some("not-a-url")));
        assert!(!is_origin_allowed(Some("")));
    }

    #[test]
    fn token_format() {
        let token = generate_token();
        assert!(token.starts_with(TOKEN_PREFIX));
        assert_eq!(token.len(), TOKEN_PREFIX.len() + 32);
    }

    #[test]
    fn hello_validation() {
        let ok = json!({"type": "hello", "role": "page", "token": "t", "version": "0.1.0"});
        assert_eq!(check_hello(&ok, "t"), Ok(Role::Page));

        let popup = json!({"type": "hello", "role": "popup", "token": "t", "version": "0.4.2"});
        assert_eq!(check_hello(&popup, "t"), Ok(Role::Popup));

        let wrong_token = json!({"type": "hello", "role": "page", "token": "x", "version": "0.1.0"});
        assert_eq!(check_hello(&wrong_token, "t").unwrap_err().0, "invalid_token");

        let old = json!({"type": "hello", "role": "page", "token": "t", "version": "0.0.9"});
        assert_eq!(check_hello(&old, "t").unwrap_err().0, "version_mismatch");

        let no_hello = json!({"type": "save_timestamp_request"});
        assert_eq!(check_hello(&no_hello, "t").unwrap_err().0, "expected_hello");

        let bad_role = json!({"type": "hello", "role": "cli", "token": "t", "version": "0.1.0"});
        assert_eq!(check_hello(&bad_role, "t").unwrap_err().0, "unknown_role");
    }

    #[tokio::test]
    async fn answer_request_echoes_id() {
        let coordinator = CaptureCoordinator::new(MemoStore::in_memory());

        let reply = answer_request(
            r#"{"id": 7, "type": "save_timestamp_request", "rawText": "00:00:09"}"#,
            &coordinator,
        )
        .await;
        assert_eq!(reply["id"], 7);
        assert_eq!(reply["ok"], true);
        assert_eq!(reply["value"], "00:00:09");

        let rejected = answer_request(
            r#"{"id": 8, "type": "save_timestamp_request", "rawText": "none"}"#,
            &coordinator,
        )
        .await;
        assert_eq!(rejected, json!({"id": 8, "ok": false, "reason": "no_time_found"}));

        let unknown = answer_request(r#"{"id": 9, "type": "bogus"}"#, &coordinator).await;
        assert_eq!(unknown["id"], 9);
        assert!(unknown["error"]["message"].is_string());
    }
}
