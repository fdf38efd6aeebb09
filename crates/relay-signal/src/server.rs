//! WebSocket signal server implementation
//!
//! One listener serves both surfaces: requests carrying an
//! `Upgrade: websocket` header become signaling sessions, anything else is
//! answered as plain HTTP.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::HeaderMap;
use tokio_tungstenite::{accept_hdr_async, tungstenite::Message};
use tracing::{debug, info, warn};

use relay_core::Config;

use crate::connections::ConnectionId;
use crate::directory::DeviceListing;
use crate::error::ServerError;
use crate::hub::{Peer, SignalHub};
use crate::messages::{ClientMessage, MessageError};

/// How long a client may take to send its request headers
const HEADER_TIMEOUT: Duration = Duration::from_secs(10);

/// Largest request head inspected when sniffing the protocol
const MAX_HEADER_BYTES: usize = 8 * 1024;

/// Body of `GET /api/devices`
#[derive(Debug, Serialize, Deserialize)]
pub struct DevicesResponse {
    pub success: bool,
    pub devices: Vec<DeviceListing>,
}

/// Body of `GET /health`
#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    devices: usize,
    connections: usize,
}

struct Settings {
    trust_forwarded_for: bool,
    max_message_bytes: usize,
}

/// Signal server
#[derive(Clone)]
pub struct SignalServer {
    hub: Arc<SignalHub>,
    settings: Arc<Settings>,
}

impl SignalServer {
    pub fn new(config: &Config) -> Self {
        Self {
            hub: Arc::new(SignalHub::new(config)),
            settings: Arc::new(Settings {
                trust_forwarded_for: config.server.trust_forwarded_for,
                max_message_bytes: config.limits.max_message_bytes,
            }),
        }
    }

    /// Shared state, for embedding and monitoring
    pub fn hub(&self) -> Arc<SignalHub> {
        self.hub.clone()
    }

    /// Bind `addr` and serve until the listener fails
    pub async fn serve(self, addr: SocketAddr) -> Result<(), ServerError> {
        let listener = TcpListener::bind(addr).await?;
        self.run(listener).await
    }

    /// Serve connections from an already bound listener
    pub async fn run(self, listener: TcpListener) -> Result<(), ServerError> {
        info!("Signal server listening on {}", listener.local_addr()?);

        loop {
            let (stream, peer_addr) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!("Failed to accept connection: {}", e);
                    continue;
                }
            };
            let hub = self.hub.clone();
            let settings = self.settings.clone();

            tokio::spawn(async move {
                if let Err(e) = handle_connection(stream, peer_addr, hub, settings).await {
                    debug!("Connection error from {}: {}", peer_addr, e);
                }
            });
        }
    }
}

/// Handle a single connection (HTTP or WebSocket)
async fn handle_connection(
    stream: TcpStream,
    peer_addr: SocketAddr,
    hub: Arc<SignalHub>,
    settings: Arc<Settings>,
) -> Result<(), ServerError> {
    let head = timeout(HEADER_TIMEOUT, peek_request_head(&stream))
        .await
        .map_err(|_| ServerError::HandshakeTimeout)??;

    if is_websocket_upgrade(&head) {
        serve_websocket(stream, peer_addr, hub, settings).await
    } else {
        handle_http_request(stream, &hub).await
    }
}

/// Peek at the request head without consuming it
async fn peek_request_head(stream: &TcpStream) -> Result<String, ServerError> {
    let mut buf = vec![0u8; MAX_HEADER_BYTES];
    loop {
        let n = stream.peek(&mut buf).await?;
        let head = &buf[..n];
        if n == 0 || n == buf.len() || head.windows(4).any(|w| w == b"\r\n\r\n") {
            return Ok(String::from_utf8_lossy(head).into_owned());
        }
        // Partial head; peek returns immediately until more bytes arrive
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

fn is_websocket_upgrade(head: &str) -> bool {
    head.lines().skip(1).any(|line| {
        line.split_once(':').is_some_and(|(name, value)| {
            name.trim().eq_ignore_ascii_case("upgrade")
                && value.trim().eq_ignore_ascii_case("websocket")
        })
    })
}

/// First address in `X-Forwarded-For`, if it parses
fn forwarded_for(headers: &HeaderMap) -> Option<IpAddr> {
    headers
        .get("x-forwarded-for")?
        .to_str()
        .ok()?
        .split(',')
        .next()?
        .trim()
        .parse()
        .ok()
}

async fn serve_websocket(
    stream: TcpStream,
    peer_addr: SocketAddr,
    hub: Arc<SignalHub>,
    settings: Arc<Settings>,
) -> Result<(), ServerError> {
    let mut forwarded = None;
    let trust_forwarded_for = settings.trust_forwarded_for;
    let ws_stream = accept_hdr_async(
        stream,
        |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
            if trust_forwarded_for {
                forwarded = forwarded_for(req.headers());
            }
            Ok(resp)
        },
    )
    .await?;
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();

    let connection = ConnectionId::next();
    let peer = Peer {
        connection,
        source_addr: forwarded.unwrap_or_else(|| peer_addr.ip()),
    };
    let mut outbound = hub.connect(connection);
    debug!("New connection from {} as {}", peer.source_addr, connection);

    loop {
        tokio::select! {
            inbound = ws_receiver.next() => match inbound {
                Some(Ok(Message::Text(text))) => {
                    handle_text(&hub, peer, &text, settings.max_message_bytes);
                }
                Some(Ok(Message::Ping(data))) => {
                    if ws_sender.send(Message::Pong(data)).await.is_err() {
                        break;
                    }
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!("WebSocket error: {:?}", e);
                    break;
                }
            },
            Some(msg) = outbound.recv() => match msg.to_json() {
                Ok(json) => {
                    if ws_sender.send(Message::Text(json)).await.is_err() {
                        break;
                    }
                }
                Err(e) => warn!(event = msg.event(), "Failed to encode message: {}", e),
            },
        }
    }

    // Cleanup on disconnect
    hub.disconnect(connection);
    debug!("Connection closed: {}", connection);
    Ok(())
}

/// Decode and dispatch one text frame. Malformed frames are dropped.
fn handle_text(hub: &SignalHub, peer: Peer, text: &str, max_message_bytes: usize) {
    if text.len() > max_message_bytes {
        let err = MessageError::TooLarge {
            size: text.len(),
            max: max_message_bytes,
        };
        warn!(connection = %peer.connection, "Dropping message: {}", err);
        return;
    }

    match ClientMessage::from_json(text) {
        Ok(msg) => {
            debug!(connection = %peer.connection, event = msg.event(), "Message received");
            hub.dispatch(peer, msg);
        }
        Err(e) => warn!(connection = %peer.connection, "Dropping malformed message: {}", e),
    }
}

/// Handle a plain HTTP request (directory listing and health checks)
async fn handle_http_request(mut stream: TcpStream, hub: &SignalHub) -> Result<(), ServerError> {
    let mut buf = vec![0u8; MAX_HEADER_BYTES];
    let n = stream.read(&mut buf).await?;
    if n == 0 {
        return Ok(());
    }
    let request = String::from_utf8_lossy(&buf[..n]);

    let mut request_line = request.lines().next().unwrap_or("").split_whitespace();
    let method = request_line.next().unwrap_or("");
    let path = request_line
        .next()
        .unwrap_or("/")
        .split('?')
        .next()
        .unwrap_or("/");

    let (status, body) = route_http(method, path, hub)?;
    debug!("HTTP {} {} -> {}", method, path, status);

    let mut response = format!(
        "HTTP/1.1 {}\r\n\
         Access-Control-Allow-Origin: *\r\n\
         Access-Control-Allow-Methods: GET, POST, OPTIONS\r\n\
         Access-Control-Allow-Headers: Content-Type\r\n\
         Connection: close\r\n",
        status
    );
    match body {
        Some(body) => response.push_str(&format!(
            "Content-Type: application/json\r\nContent-Length: {}\r\n\r\n{}",
            body.len(),
            body
        )),
        None => response.push_str("Content-Length: 0\r\n\r\n"),
    }

    stream.write_all(response.as_bytes()).await?;
    let _ = stream.shutdown().await;
    Ok(())
}

fn route_http(
    method: &str,
    path: &str,
    hub: &SignalHub,
) -> Result<(&'static str, Option<String>), serde_json::Error> {
    let routed = match (method, path) {
        ("OPTIONS", _) => ("204 No Content", None),
        ("GET", "/api/devices") => (
            "200 OK",
            Some(serde_json::to_string(&DevicesResponse {
                success: true,
                devices: hub.listing(),
            })?),
        ),
        ("GET", "/health") => (
            "200 OK",
            Some(serde_json::to_string(&HealthResponse {
                status: "healthy",
                devices: hub.device_count(),
                connections: hub.connection_count(),
            })?),
        ),
        _ => ("404 Not Found", Some(r#"{"error":"not found"}"#.to_string())),
    };
    Ok(routed)
}
