//! Socket.IO v4 push channel over a websocket-only Engine.IO transport.
//!
//! Only the subset of the protocol the incident backend uses is spoken:
//!
//! | Frame | Meaning |
//! |-------|---------|
//! | `0{..}` | Engine.IO open handshake (ping interval/timeout) |
//! | `1` | Engine.IO close |
//! | `2` / `3` | ping / pong |
//! | `40` | namespace connect (sent by us, acknowledged by the server) |
//! | `41` | namespace disconnect |
//! | `42[name, payload]` | event |
//! | `44{..}` | namespace connect error |
//!
//! After a lost connection the channel reports
//! [`ChannelMessage::Disconnected`] and reconnects with a doubling delay.
//! Events emitted while disconnected are not replayed.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use incident_map_sync::config::MapConfig;
use incident_map_sync::events::{ChannelMessage, PushChannel};
use incident_map_sync::{ChannelError, ConfigError};
use serde_json::Value;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

/// Namespace connect request for the default namespace.
pub const CONNECT_PACKET: &str = "40";

/// Reply to a server ping.
pub const PONG_PACKET: &str = "3";

const DEFAULT_PING_INTERVAL_MS: u64 = 25_000;
const DEFAULT_PING_TIMEOUT_MS: u64 = 20_000;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Errors decoding a Socket.IO text frame.
#[derive(Debug, Error)]
pub enum FrameError {
    /// The frame has no packet type.
    #[error("empty frame")]
    Empty,

    /// The packet type digit is not part of the protocol.
    #[error("unknown packet type '{0}'")]
    UnknownType(char),

    /// The JSON body is malformed.
    #[error("malformed payload: {0}")]
    Payload(#[from] serde_json::Error),

    /// An event packet whose body is not `[name, ...]`.
    #[error("event packet is not a [name, ...] array")]
    NotAnEvent,
}

/// A decoded Socket.IO frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// Engine.IO handshake.
    Open {
        /// Engine.IO session id.
        sid: String,
        /// How often the server pings.
        ping_interval: Duration,
        /// How long the server waits for a pong.
        ping_timeout: Duration,
    },
    /// Engine.IO close.
    Close,
    /// Server ping.
    Ping,
    /// Server pong.
    Pong,
    /// Namespace connect acknowledged.
    Connect,
    /// Namespace disconnected by the server.
    Disconnect,
    /// Named event.
    Event {
        /// Event name.
        name: String,
        /// First argument, or `null` if none.
        payload: Value,
    },
    /// Namespace connect refused.
    ConnectError(String),
    /// Valid but irrelevant here (upgrade, noop, acks, binary packets).
    Ignored,
}

/// Decodes one websocket text frame.
///
/// # Errors
///
/// Returns [`FrameError`] if the frame is not a well-formed packet.
pub fn decode_frame(text: &str) -> Result<Frame, FrameError> {
    let mut chars = text.chars();
    let kind = chars.next().ok_or(FrameError::Empty)?;
    let rest = chars.as_str();

    match kind {
        '0' => decode_open(rest),
        '1' => Ok(Frame::Close),
        '2' => Ok(Frame::Ping),
        '3' => Ok(Frame::Pong),
        '4' => decode_message(rest),
        '5' | '6' => Ok(Frame::Ignored),
        other => Err(FrameError::UnknownType(other)),
    }
}

fn decode_open(body: &str) -> Result<Frame, FrameError> {
    let handshake: Value = serde_json::from_str(body)?;
    let millis = |key: &str, default: u64| {
        Duration::from_millis(handshake.get(key).and_then(Value::as_u64).unwrap_or(default))
    };

    Ok(Frame::Open {
        sid: handshake
            .get("sid")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        ping_interval: millis("pingInterval", DEFAULT_PING_INTERVAL_MS),
        ping_timeout: millis("pingTimeout", DEFAULT_PING_TIMEOUT_MS),
    })
}

fn decode_message(rest: &str) -> Result<Frame, FrameError> {
    let mut chars = rest.chars();
    let kind = chars.next().ok_or(FrameError::Empty)?;
    let body = strip_namespace_and_ack(chars.as_str());

    match kind {
        '0' => Ok(Frame::Connect),
        '1' => Ok(Frame::Disconnect),
        '2' => decode_event(body),
        '4' => Ok(Frame::ConnectError(connect_error_message(body))),
        '3' | '5' | '6' => Ok(Frame::Ignored),
        other => Err(FrameError::UnknownType(other)),
    }
}

/// Drops an optional `/namespace,` prefix and an optional ack id.
fn strip_namespace_and_ack(body: &str) -> &str {
    let body = if body.starts_with('/') {
        body.find(',').map_or("", |i| &body[i + 1..])
    } else {
        body
    };
    body.trim_start_matches(|c: char| c.is_ascii_digit())
}

fn decode_event(body: &str) -> Result<Frame, FrameError> {
    let Value::Array(items) = serde_json::from_str(body)? else {
        return Err(FrameError::NotAnEvent);
    };
    let mut items = items.into_iter();
    let Some(Value::String(name)) = items.next() else {
        return Err(FrameError::NotAnEvent);
    };

    Ok(Frame::Event {
        name,
        payload: items.next().unwrap_or(Value::Null),
    })
}

fn connect_error_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v.get("message").and_then(Value::as_str).map(str::to_string))
        .unwrap_or_else(|| body.to_string())
}

/// Doubling reconnect delay with an upper bound.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    next: Duration,
}

impl Backoff {
    /// Starts at `initial`, doubling up to `max`.
    #[must_use]
    pub fn new(initial: Duration, max: Duration) -> Self {
        let initial = initial.min(max);
        Self {
            initial,
            max,
            next: initial,
        }
    }

    /// The delay to wait now; the following one is doubled.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.next;
        self.next = self.next.saturating_mul(2).min(self.max);
        delay
    }

    /// Back to the initial delay after a successful connection.
    pub const fn reset(&mut self) {
        self.next = self.initial;
    }
}

enum SessionEnd {
    SinkClosed,
    Lost(String),
}

/// [`PushChannel`] speaking Socket.IO v4 over websocket.
#[derive(Debug, Clone)]
pub struct SocketIoChannel {
    url: String,
    reconnect_delay: Duration,
    reconnect_delay_max: Duration,
}

impl SocketIoChannel {
    /// Creates a channel for a `ws://` or `wss://` Socket.IO URL.
    #[must_use]
    pub fn new(url: impl Into<String>, reconnect_delay: Duration, reconnect_delay_max: Duration) -> Self {
        Self {
            url: url.into(),
            reconnect_delay,
            reconnect_delay_max,
        }
    }

    /// Creates a channel from the map configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if the API URL has no http(s)
    /// scheme.
    pub fn from_config(config: &MapConfig) -> Result<Self, ConfigError> {
        Ok(Self::new(
            config.socket_url()?,
            config.channel.reconnect_delay(),
            config.channel.reconnect_delay_max(),
        ))
    }

    /// The websocket URL.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    async fn session(
        &self,
        sink: &mpsc::Sender<ChannelMessage>,
        connected: &mut bool,
    ) -> Result<SessionEnd, ChannelError> {
        log::debug!("Connecting to {}", self.url);

        let (mut socket, _response) =
            connect_async(self.url.as_str())
                .await
                .map_err(|e| match e {
                    tungstenite::Error::Url(e) => ChannelError::InvalidUrl(e.to_string()),
                    other => ChannelError::Transport(Box::new(other)),
                })?;

        let mut idle_limit =
            Duration::from_millis(DEFAULT_PING_INTERVAL_MS + DEFAULT_PING_TIMEOUT_MS);

        loop {
            let message = match tokio::time::timeout(idle_limit, socket.next()).await {
                Ok(Some(message)) => message.map_err(|e| ChannelError::Transport(Box::new(e)))?,
                Ok(None) => return Ok(SessionEnd::Lost("connection closed".to_string())),
                Err(_) => return Ok(SessionEnd::Lost("ping timeout".to_string())),
            };

            let text = match message {
                Message::Text(text) => text,
                Message::Close(frame) => {
                    let reason = frame.map_or_else(
                        || "closed by server".to_string(),
                        |f| format!("closed by server: {}", f.reason.as_str()),
                    );
                    return Ok(SessionEnd::Lost(reason));
                }
                _ => continue,
            };

            let frame = match decode_frame(text.as_str()) {
                Ok(frame) => frame,
                Err(e) => {
                    log::warn!("Ignoring malformed Socket.IO frame: {e}");
                    continue;
                }
            };

            match frame {
                Frame::Open {
                    sid,
                    ping_interval,
                    ping_timeout,
                } => {
                    log::debug!("Engine.IO session {sid} opened");
                    idle_limit = ping_interval + ping_timeout;
                    send_text(&mut socket, CONNECT_PACKET).await?;
                }
                Frame::Ping => send_text(&mut socket, PONG_PACKET).await?,
                Frame::Connect => {
                    *connected = true;
                    log::info!("Connected to {}", self.url);
                    if sink.send(ChannelMessage::Connected).await.is_err() {
                        return Ok(SessionEnd::SinkClosed);
                    }
                }
                Frame::Event { name, payload } => {
                    if sink
                        .send(ChannelMessage::Event { name, payload })
                        .await
                        .is_err()
                    {
                        return Ok(SessionEnd::SinkClosed);
                    }
                }
                Frame::ConnectError(message) => {
                    return Err(ChannelError::Protocol(format!(
                        "connect rejected: {message}"
                    )));
                }
                Frame::Close | Frame::Disconnect => {
                    return Ok(SessionEnd::Lost("server closed the session".to_string()));
                }
                Frame::Pong | Frame::Ignored => {}
            }
        }
    }
}

async fn send_text(socket: &mut Socket, text: &str) -> Result<(), ChannelError> {
    socket
        .send(Message::text(text))
        .await
        .map_err(|e| ChannelError::Transport(Box::new(e)))
}

#[async_trait::async_trait]
impl PushChannel for SocketIoChannel {
    async fn run(&self, sink: mpsc::Sender<ChannelMessage>) -> Result<(), ChannelError> {
        let mut backoff = Backoff::new(self.reconnect_delay, self.reconnect_delay_max);

        loop {
            let mut connected = false;
            let reason = match self.session(&sink, &mut connected).await {
                Ok(SessionEnd::SinkClosed) => return Ok(()),
                Ok(SessionEnd::Lost(reason)) => reason,
                Err(e @ ChannelError::InvalidUrl(_)) => return Err(e),
                Err(e) => e.to_string(),
            };

            if connected {
                backoff.reset();
            }

            if sink
                .send(ChannelMessage::Disconnected {
                    reason: reason.clone(),
                })
                .await
                .is_err()
            {
                return Ok(());
            }

            let delay = backoff.next_delay();
            log::info!(
                "Push channel lost ({reason}), reconnecting in {}ms",
                delay.as_millis()
            );
            tokio::time::sleep(delay).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tokio::net::TcpListener;
    use tokio_tungstenite::accept_async;

    use super::*;

    #[test]
    fn decodes_open_handshake() {
        let frame =
            decode_frame(r#"0{"sid":"abc","upgrades":[],"pingInterval":300,"pingTimeout":200}"#)
                .unwrap();
        assert_eq!(
            frame,
            Frame::Open {
                sid: "abc".to_string(),
                ping_interval: Duration::from_millis(300),
                ping_timeout: Duration::from_millis(200),
            }
        );
    }

    #[test]
    fn decodes_control_frames() {
        assert_eq!(decode_frame("1").unwrap(), Frame::Close);
        assert_eq!(decode_frame("2").unwrap(), Frame::Ping);
        assert_eq!(decode_frame("3").unwrap(), Frame::Pong);
        assert_eq!(decode_frame("6").unwrap(), Frame::Ignored);
        assert_eq!(decode_frame(r#"40{"sid":"x"}"#).unwrap(), Frame::Connect);
        assert_eq!(decode_frame("41").unwrap(), Frame::Disconnect);
    }

    #[test]
    fn decodes_events() {
        assert_eq!(
            decode_frame(r#"42["incident:new",{"id":"a"}]"#).unwrap(),
            Frame::Event {
                name: "incident:new".to_string(),
                payload: json!({"id": "a"}),
            }
        );
        assert_eq!(
            decode_frame(r#"42/admin,17["incident:update",{"id":1}]"#).unwrap(),
            Frame::Event {
                name: "incident:update".to_string(),
                payload: json!({"id": 1}),
            }
        );
        assert_eq!(
            decode_frame(r#"42["heartbeat"]"#).unwrap(),
            Frame::Event {
                name: "heartbeat".to_string(),
                payload: Value::Null,
            }
        );
    }

    #[test]
    fn decodes_connect_error() {
        assert_eq!(
            decode_frame(r#"44{"message":"Not authorized"}"#).unwrap(),
            Frame::ConnectError("Not authorized".to_string())
        );
    }

    #[test]
    fn rejects_malformed_frames() {
        assert!(matches!(decode_frame(""), Err(FrameError::Empty)));
        assert!(matches!(decode_frame("9"), Err(FrameError::UnknownType('9'))));
        assert!(matches!(decode_frame("42{}"), Err(FrameError::NotAnEvent)));
        assert!(matches!(decode_frame("42[1,2]"), Err(FrameError::NotAnEvent)));
        assert!(matches!(decode_frame("42[oops"), Err(FrameError::Payload(_))));
    }

    #[test]
    fn backoff_doubles_to_cap_and_resets() {
        let mut backoff = Backoff::new(Duration::from_secs(1), Duration::from_secs(5));
        let delays: Vec<_> = (0..5).map(|_| backoff.next_delay().as_millis()).collect();
        assert_eq!(delays, [1000, 2000, 4000, 5000, 5000]);

        backoff.reset();
        assert_eq!(backoff.next_delay(), Duration::from_secs(1));
    }

    #[test]
    fn url_from_default_config() {
        let channel = SocketIoChannel::from_config(&MapConfig::default()).unwrap();
        assert_eq!(
            channel.url(),
            "ws://localhost:3001/socket.io/?EIO=4&transport=websocket"
        );
    }

    async fn next_text(ws: &mut WebSocketStream<TcpStream>) -> String {
        loop {
            match ws.next().await {
                Some(Ok(Message::Text(text))) => return text.as_str().to_string(),
                Some(Ok(_)) => {}
                other => panic!("unexpected websocket message: {other:?}"),
            }
        }
    }

    async fn send(ws: &mut WebSocketStream<TcpStream>, text: &str) {
        ws.send(Message::text(text)).await.unwrap();
    }

    #[tokio::test]
    async fn speaks_socket_io_with_server() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(stream).await.unwrap();

            send(&mut ws, r#"0{"sid":"abc","pingInterval":25000,"pingTimeout":20000}"#).await;
            assert_eq!(next_text(&mut ws).await, CONNECT_PACKET);

            send(&mut ws, r#"40{"sid":"def"}"#).await;
            send(&mut ws, "2").await;
            assert_eq!(next_text(&mut ws).await, PONG_PACKET);

            send(&mut ws, r#"42["incident:new",{"id":"a","severity":"HIGH"}]"#).await;
            send(
                &mut ws,
                r#"42["incident:update",{"data":{"id":"a","severity":"LOW"}}]"#,
            )
            .await;
            send(&mut ws, "41").await;
        });

        let channel = SocketIoChannel::new(
            format!("ws://{addr}/socket.io/?EIO=4&transport=websocket"),
            Duration::from_millis(10),
            Duration::from_millis(20),
        );
        let (tx, mut rx) = mpsc::channel(16);
        let client = tokio::spawn(async move { channel.run(tx).await });

        assert_eq!(rx.recv().await, Some(ChannelMessage::Connected));
        assert_eq!(
            rx.recv().await,
            Some(ChannelMessage::Event {
                name: "incident:new".to_string(),
                payload: json!({"id": "a", "severity": "HIGH"}),
            })
        );
        assert!(matches!(
            rx.recv().await,
            Some(ChannelMessage::Event { ref name, .. }) if name == "incident:update"
        ));
        assert!(matches!(
            rx.recv().await,
            Some(ChannelMessage::Disconnected { .. })
        ));

        server.await.unwrap();
        client.abort();
    }

    #[tokio::test]
    async fn connect_error_reports_disconnect() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(stream).await.unwrap();
            send(&mut ws, r#"0{"sid":"abc"}"#).await;
            assert_eq!(next_text(&mut ws).await, CONNECT_PACKET);
            send(&mut ws, r#"44{"message":"Not authorized"}"#).await;
        });

        let channel = SocketIoChannel::new(
            format!("ws://{addr}/socket.io/?EIO=4&transport=websocket"),
            Duration::from_millis(10),
            Duration::from_millis(20),
        );
        let (tx, mut rx) = mpsc::channel(16);
        let client = tokio::spawn(async move { channel.run(tx).await });

        match rx.recv().await {
            Some(ChannelMessage::Disconnected { reason }) => {
                assert!(reason.contains("Not authorized"), "{reason}");
            }
            other => panic!("expected disconnect, got {other:?}"),
        }
        client.abort();
    }

    #[tokio::test]
    async fn non_websocket_url_is_fatal() {
        let channel = SocketIoChannel::new(
            "http://localhost/socket.io/",
            Duration::from_millis(10),
            Duration::from_millis(20),
        );
        let (tx, _rx) = mpsc::channel(16);
        let result = tokio::time::timeout(Duration::from_secs(5), channel.run(tx))
            .await
            .expect("channel kept retrying");
        assert!(matches!(result, Err(ChannelError::InvalidUrl(_))));
    }
}
