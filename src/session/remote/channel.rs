//! Duplex event channel with the XDS agent: socket.io over a websocket.
//!
//! Listeners are registered before connection with [`ChannelBuilder::on`]. Once connected, a
//! dedicated thread owns the websocket: it dispatches incoming events to the listeners, flushes
//! events queued by [`EventChannel::emit`] and keeps the engine.io session alive with pings.
//! Two local events are fired by the channel itself: [`ERROR_EVENT`] when the agent reports an
//! error and [`DISCONNECTION_EVENT`] when the connection is lost.

use crate::error::Error;
use crate::session::remote::packet::{Handshake, Packet};
use log::{debug, warn};
use serde_json::Value;
use std::collections::HashMap;
use std::io::ErrorKind;
use std::net::TcpStream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tungstenite::client::IntoClientRequest;
use tungstenite::http::HeaderValue;
use tungstenite::{Error as WsError, Message, WebSocket};

pub const ERROR_EVENT: &str = "error";
pub const DISCONNECTION_EVENT: &str = "disconnection";
/// Header carrying the session credential on the websocket upgrade request.
pub const SID_HEADER: &str = "XDS-AGENT-SID";

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);
const POLL_INTERVAL: Duration = Duration::from_millis(20);

pub type Listener = Box<dyn Fn(Value) + Send>;

/// Build the websocket URL of the socket.io endpoint from an agent base URL.
pub fn socket_url(base_url: &str) -> Result<String, Error> {
    let url = reqwest::Url::parse(base_url).map_err(|e| Error::EventChannel(e.to_string()))?;
    if url.scheme() != "http" {
        return Err(Error::EventChannel(format!(
            "unsupported scheme `{}` for event channel",
            url.scheme()
        )));
    }
    let host = url
        .host_str()
        .ok_or_else(|| Error::EventChannel(format!("no host in `{base_url}`")))?;
    let port = url.port_or_known_default().unwrap_or(80);
    Ok(format!(
        "ws://{host}:{port}/socket.io/?EIO=3&transport=websocket"
    ))
}

#[derive(Default)]
pub struct ChannelBuilder {
    listeners: HashMap<String, Listener>,
}

impl ChannelBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener for an event, replacing a previous one.
    pub fn on(mut self, event: impl Into<String>, listener: impl Fn(Value) + Send + 'static) -> Self {
        self.listeners.insert(event.into(), Box::new(listener));
        self
    }

    /// Open the channel.
    ///
    /// # Arguments
    ///
    /// * `base_url`: agent base URL (`http://host:port`)
    /// * `client_id`: session credential issued by the agent REST API
    pub fn connect(self, base_url: &str, client_id: &str) -> Result<EventChannel, Error> {
        let url = socket_url(base_url)?;
        debug!(target: "channel", "connect to {url}");
        let (mut ws, handshake) = open(&url, client_id)?;

        ws.get_ref()
            .set_read_timeout(Some(POLL_INTERVAL))
            .map_err(|e| Error::EventChannel(e.to_string()))?;

        let (tx, rx) = mpsc::channel();
        let connected = Arc::new(AtomicBool::new(true));
        let worker = Worker {
            ws,
            outbound: rx,
            listeners: self.listeners,
            connected: connected.clone(),
            heartbeat: Heartbeat::new(
                handshake.ping_interval(),
                handshake.ping_timeout(),
                Instant::now(),
            ),
        };
        thread::Builder::new()
            .name("xds-channel".to_string())
            .spawn(move || worker.run())?;

        Ok(EventChannel {
            outbound: tx,
            connected,
        })
    }
}

/// Websocket handshake then wait for the engine.io open and socket.io connect packets.
fn open(url: &str, client_id: &str) -> Result<(WebSocket<TcpStream>, Handshake), Error> {
    let channel_err = |e: &dyn std::fmt::Display| Error::EventChannel(e.to_string());

    let mut request = url.into_client_request().map_err(|e| channel_err(&e))?;
    let sid = HeaderValue::from_str(client_id).map_err(|e| channel_err(&e))?;
    request.headers_mut().insert(SID_HEADER, sid);

    let uri = request.uri();
    let addr = format!(
        "{}:{}",
        uri.host().unwrap_or("localhost"),
        uri.port_u16().unwrap_or(80)
    );
    let stream = TcpStream::connect(&addr).map_err(|e| channel_err(&e))?;
    stream
        .set_read_timeout(Some(HANDSHAKE_TIMEOUT))
        .map_err(|e| channel_err(&e))?;

    let (mut ws, _) = tungstenite::client::client(request, stream).map_err(|e| channel_err(&e))?;

    let mut handshake = None;
    loop {
        let msg = ws.read().map_err(|e| channel_err(&e))?;
        let Message::Text(text) = msg else {
            continue;
        };
        match Packet::decode(text.as_str())? {
            Packet::Open(hs) => {
                debug!(target: "channel", "engine.io session {} open", hs.sid);
                handshake = Some(hs);
            }
            Packet::Connect => break,
            Packet::Error(e) => return Err(Error::EventChannel(e)),
            Packet::Close | Packet::Disconnect => {
                return Err(Error::EventChannel("closed during handshake".to_string()))
            }
            other => debug!(target: "channel", "ignore packet during handshake: {other:?}"),
        }
    }

    let handshake = handshake
        .ok_or_else(|| Error::EventChannel("no open packet before connect".to_string()))?;
    Ok((ws, handshake))
}

/// Client side of a connected channel.
pub struct EventChannel {
    outbound: Sender<String>,
    connected: Arc<AtomicBool>,
}

impl EventChannel {
    /// Queue an event for sending, fire-and-forget.
    pub fn emit(&self, event: &str, payload: Value) -> Result<(), Error> {
        if !self.is_connected() {
            return Err(Error::ChannelClosed);
        }
        let frame = Packet::Event {
            name: event.to_string(),
            payload,
        }
        .encode();
        self.outbound.send(frame).map_err(|_| Error::ChannelClosed)
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

/// Engine.io liveness: a ping every interval, the pong must come back before the timeout.
#[derive(Debug)]
struct Heartbeat {
    interval: Duration,
    timeout: Duration,
    last_ping: Instant,
    awaiting_pong: Option<Instant>,
}

impl Heartbeat {
    fn new(interval: Duration, timeout: Duration, now: Instant) -> Self {
        Self {
            interval,
            timeout,
            last_ping: now,
            awaiting_pong: None,
        }
    }

    fn ping_due(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.last_ping) >= self.interval
    }

    fn ping_sent(&mut self, now: Instant) {
        self.last_ping = now;
        self.awaiting_pong.get_or_insert(now);
    }

    fn pong(&mut self) {
        self.awaiting_pong = None;
    }

    /// True if the oldest unanswered ping waits longer than the timeout.
    fn expired(&self, now: Instant) -> bool {
        self.awaiting_pong
            .is_some_and(|sent| now.saturating_duration_since(sent) >= self.timeout)
    }
}

struct Worker {
    ws: WebSocket<TcpStream>,
    outbound: Receiver<String>,
    listeners: HashMap<String, Listener>,
    connected: Arc<AtomicBool>,
    heartbeat: Heartbeat,
}

impl Worker {
    fn run(mut self) {
        let reason = self.serve();
        self.connected.store(false, Ordering::SeqCst);
        debug!(target: "channel", "channel closed: {reason}");
        self.dispatch(DISCONNECTION_EVENT, Value::String(reason));
    }

    /// Serve the connection until it ends, return the reason.
    fn serve(&mut self) -> String {
        loop {
            loop {
                match self.outbound.try_recv() {
                    Ok(frame) => {
                        if let Err(e) = self.ws.send(Message::text(frame)) {
                            return format!("websocket send failed: {e}");
                        }
                    }
                    Err(TryRecvError::Empty) => break,
                    Err(TryRecvError::Disconnected) => {
                        _ = self.ws.close(None);
                        return "channel dropped".to_string();
                    }
                }
            }

            let now = Instant::now();
            if self.heartbeat.expired(now) {
                warn!(target: "channel", "no pong within {:?}", self.heartbeat.timeout);
                _ = self.ws.close(None);
                return "ping timeout".to_string();
            }
            if self.heartbeat.ping_due(now) {
                if let Err(e) = self.ws.send(Message::text(Packet::Ping.encode())) {
                    return format!("websocket send failed: {e}");
                }
                self.heartbeat.ping_sent(now);
            }

            match self.ws.read() {
                Ok(Message::Text(text)) => {
                    if let Some(reason) = self.handle(text.as_str()) {
                        return reason;
                    }
                }
                Ok(Message::Close(_)) => return "connection closed by peer".to_string(),
                Ok(_) => {}
                Err(WsError::Io(e))
                    if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {}
                Err(WsError::ConnectionClosed | WsError::AlreadyClosed) => {
                    return "connection closed".to_string()
                }
                Err(e) => return format!("websocket read failed: {e}"),
            }
        }
    }

    /// Handle a text frame, return `Some(reason)` if the connection is over.
    fn handle(&mut self, frame: &str) -> Option<String> {
        let packet = match Packet::decode(frame) {
            Ok(p) => p,
            Err(e) => {
                warn!(target: "channel", "{e}");
                return None;
            }
        };

        match packet {
            Packet::Event { name, payload } => self.dispatch(&name, payload),
            Packet::Error(msg) => self.dispatch(ERROR_EVENT, Value::String(msg)),
            Packet::Ping => {
                if let Err(e) = self.ws.send(Message::text(Packet::Pong.encode())) {
                    return Some(format!("websocket send failed: {e}"));
                }
            }
            Packet::Close => return Some("transport closed by peer".to_string()),
            Packet::Disconnect => return Some("namespace disconnected by peer".to_string()),
            Packet::Pong => self.heartbeat.pong(),
            Packet::Open(_) | Packet::Connect | Packet::Ack | Packet::Noop => {}
        }
        None
    }

    fn dispatch(&self, event: &str, payload: Value) {
        match self.listeners.get(event) {
            Some(listener) => listener(payload),
            None => debug!(target: "channel", "no listener for `{event}`"),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_socket_url() {
        assert_eq!(
            socket_url("http://localhost:8000").unwrap(),
            "ws://localhost:8000/socket.io/?EIO=3&transport=websocket"
        );
        assert_eq!(
            socket_url("http://agent").unwrap(),
            "ws://agent:80/socket.io/?EIO=3&transport=websocket"
        );
        assert!(matches!(
            socket_url("https://agent:8443"),
            Err(Error::EventChannel(_))
        ));
    }

    #[test]
    fn test_heartbeat() {
        let start = Instant::now();
        let mut hb = Heartbeat::new(Duration::from_secs(25), Duration::from_secs(5), start);
        assert!(!hb.ping_due(start + Duration::from_secs(10)));
        assert!(!hb.expired(start + Duration::from_secs(60)));

        let ping = start + Duration::from_secs(25);
        assert!(hb.ping_due(ping));
        hb.ping_sent(ping);
        assert!(!hb.ping_due(ping));
        assert!(!hb.expired(ping + Duration::from_secs(4)));
        assert!(hb.expired(ping + Duration::from_secs(5)));

        hb.pong();
        assert!(!hb.expired(ping + Duration::from_secs(30)));
    }

    #[test]
    fn test_heartbeat_counts_from_first_unanswered_ping() {
        let start = Instant::now();
        let mut hb = Heartbeat::new(Duration::from_secs(1), Duration::from_secs(3), start);
        hb.ping_sent(start + Duration::from_secs(1));
        hb.ping_sent(start + Duration::from_secs(2));
        assert!(hb.expired(start + Duration::from_secs(4)));
    }

    #[test]
    fn test_emit_on_closed_channel() {
        let (tx, _rx) = mpsc::channel();
        let channel = EventChannel {
            outbound: tx,
            connected: Arc::new(AtomicBool::new(false)),
        };
        assert!(matches!(
            channel.emit("exec:input", Value::from("bt\n")),
            Err(Error::ChannelClosed)
        ));
    }

    #[test]
    fn test_emit_queues_encoded_event() {
        let (tx, rx) = mpsc::channel();
        let channel = EventChannel {
            outbound: tx,
            connected: Arc::new(AtomicBool::new(true)),
        };
        channel.emit("exec:input", Value::from("bt\n")).unwrap();
        assert_eq!(rx.recv().unwrap(), r#"42["exec:input","bt\n"]"#);
    }
}
