//! Chrome DevTools Protocol access to the stream tab: discovery through
//! `/json/list` and `Runtime.evaluate` over the page WebSocket.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use crate::error::{LivememoError, Result};
use crate::locator::CandidateSource;

/// Page info from CDP /json/list endpoint
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageInfo {
    pub id: String,
    pub title: String,
    pub url: String,
    #[serde(rename = "type")]
    pub page_type: String,
    pub web_socket_debugger_url: Option<String>,
}

/// List debuggable pages on the browser listening at `cdp_port`.
pub async fn list_pages(cdp_port: u16) -> Result<Vec<PageInfo>> {
    let url = format!("http://127.0.0.1:{}/json/list", cdp_port);
    let client = reqwest::Client::builder()
        .no_proxy()
        .timeout(Duration::from_secs(5))
        .build()
        .unwrap_or_else(|_| reqwest::Client::new());

    let response = client.get(&url).send().await.map_err(|e| {
        LivememoError::CdpConnectionFailed(format!("Failed to get pages: {}", e))
    })?;

    let pages: Vec<PageInfo> = response.json().await.map_err(|e| {
        LivememoError::CdpConnectionFailed(format!("Failed to parse pages: {}", e))
    })?;

    // Extensions, service workers and the like are not stream tabs.
    Ok(pages
        .into_iter()
        .filter(|p| p.page_type == "page")
        .collect())
}

/// Choose the tab to observe: the first whose URL contains `url_filter`, or
/// the first page when no filter is given.
pub fn select_page(pages: Vec<PageInfo>, url_filter: Option<&str>) -> Result<PageInfo> {
    pages
        .into_iter()
        .find(|p| url_filter.map_or(true, |f| p.url.contains(f)))
        .ok_or(LivememoError::PageNotFound)
}

type PageSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// How long one `Runtime.evaluate` may take before the connection is dropped.
const COMMAND_TIMEOUT: Duration = Duration::from_secs(10);

/// One tab, addressed by its debugger WebSocket URL.
///
/// Clones share a single connection, opened on first use and reopened after
/// a transport failure. Commands are serialized over it with increasing ids.
#[derive(Clone)]
pub struct CdpPage {
    ws_url: String,
    socket: Arc<Mutex<Option<PageSocket>>>,
    next_id: Arc<AtomicU64>,
}

impl std::fmt::Debug for CdpPage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CdpPage").field("ws_url", &self.ws_url).finish()
    }
}

impl CdpPage {
    pub fn new(ws_url: impl Into<String>) -> Self {
        Self {
            ws_url: ws_url.into(),
            socket: Arc::new(Mutex::new(None)),
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    pub fn from_info(info: &PageInfo) -> Result<Self> {
        info.web_socket_debugger_url
            .clone()
            .map(Self::new)
            .ok_or_else(|| LivememoError::CdpConnectionFailed("No WebSocket URL".to_string()))
    }

    /// Connect to the first page on `cdp_port` matching `url_filter`.
    pub async fn attach(cdp_port: u16, url_filter: Option<&str>) -> Result<Self> {
        let page = select_page(list_pages(cdp_port).await?, url_filter)?;
        tracing::debug!("Attaching to page {} ({})", page.title, page.url);
        Self::from_info(&page)
    }

    /// Evaluate `expression` in the page and return its JSON value.
    pub async fn evaluate(&self, expression: &str) -> Result<serde_json::Value> {
        let mut socket = self.socket.lock().await;
        if socket.is_none() {
            let (ws, _) = connect_async(self.ws_url.as_str()).await.map_err(|e| {
                LivememoError::CdpConnectionFailed(format!("WebSocket connection failed: {}", e))
            })?;
            tracing::debug!("Connected to {}", self.ws_url);
            *socket = Some(ws);
        }
        let Some(ws) = socket.as_mut() else {
            return Err(LivememoError::CdpConnectionFailed("Not connected".to_string()));
        };

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let response = match tokio::time::timeout(COMMAND_TIMEOUT, send_command(ws, id, expression)).await {
            Ok(response) => response,
            Err(_) => Err(LivememoError::CdpConnectionFailed(
                "Page did not answer in time".to_string(),
            )),
        };
        if let Err(e) = &response {
            tracing::debug!("Dropping page connection: {}", e);
            *socket = None;
        }
        evaluation_value(response?)
    }
}

/// Send one `Runtime.evaluate` and wait for the reply carrying `id`,
/// skipping events and stale replies.
async fn send_command(ws: &mut PageSocket, id: u64, expression: &str) -> Result<serde_json::Value> {
    let cmd = serde_json::json!({
        "id": id,
        "method": "Runtime.evaluate",
        "params": {
            "expression": expression,
            "returnByValue": true
        }
    });

    ws.send(Message::Text(cmd.to_string().into()))
        .await
        .map_err(|e| LivememoError::CdpConnectionFailed(format!("Failed to send command: {}", e)))?;

    while let Some(msg) = ws.next().await {
        match msg {
            Ok(Message::Text(text)) => {
                let response: serde_json::Value = serde_json::from_str(text.as_str())?;
                if response.get("id").and_then(|v| v.as_u64()) == Some(id) {
                    return Ok(response);
                }
            }
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                return Err(LivememoError::CdpConnectionFailed(format!("WebSocket error: {}", e)))
            }
        }
    }

    Err(LivememoError::CdpConnectionFailed("Page connection closed".to_string()))
}

/// Unwrap a `Runtime.evaluate` response into the returned value.
fn evaluation_value(response: serde_json::Value) -> Result<serde_json::Value> {
    if let Some(error) = response.get("error") {
        return Err(LivememoError::JavaScriptError(error.to_string()));
    }
    let Some(result) = response.get("result") else {
        return Ok(serde_json::Value::Null);
    };
    if let Some(details) = result.get("exceptionDetails") {
        let text = details
            .pointer("/exception/description")
            .or_else(|| details.get("text"))
            .and_then(|t| t.as_str())
            .unwrap_or("uncaught exception");
        return Err(LivememoError::JavaScriptError(text.to_string()));
    }
    Ok(result
        .get("result")
        .and_then(|r| r.get("value"))
        .cloned()
        .unwrap_or(serde_json::Value::Null))
}

/// Answers locator queries with `document.querySelector` in a live tab.
#[derive(Debug, Clone)]
pub struct CdpCandidateSource {
    page: CdpPage,
}

impl CdpCandidateSource {
    pub fn new(page: CdpPage) -> Self {
        Self { page }
    }
}

#[async_trait]
impl CandidateSource for CdpCandidateSource {
    async fn query_text(&self, selector: &str) -> Result<Option<String>> {
        let expression = format!(
            "(() => {{ const el = document.querySelector({}); return el ? (el.textContent || null) : null; }})()",
            serde_json::to_string(selector)?
        );
        let value = self.page.evaluate(&expression).await?;
        Ok(value.as_str().map(str::to_string))
    }

    async fn scan_texts(&self, tags: &[String]) -> Result<Vec<String>> {
        let expression = format!(
            "Array.from(document.querySelectorAll({}), el => el.textContent || '')",
            serde_json::to_string(&tags.join(", "))?
        );
        let value = self.page.evaluate(&expression).await?;
        Ok(serde_json::from_value(value)?)
    }
}
