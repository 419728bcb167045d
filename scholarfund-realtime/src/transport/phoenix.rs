//! Websocket transport for the backend's realtime service.
//!
//! Speaks the Phoenix channel protocol (v1 JSON frames): one socket per
//! subscription, a `phx_join` on `realtime:<channel>`, heartbeats on the
//! `phoenix` topic, and socket reconnects paced by a [`ReconnectPolicy`].

use std::collections::HashMap;
use std::cell::Cell;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use parking_lot::{Mutex, ReentrantMutex};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::time::{interval_at, sleep, Instant};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};
use url::Url;

use super::{RealtimeTransport, StatusCallback, Subscription};
use crate::error::{RealtimeError, Result};
use crate::policy::ReconnectPolicy;
use crate::state::TransportStatus;

/// Path of the realtime websocket under the project endpoint
const WEBSOCKET_PATH: &str = "/realtime/v1/websocket";

/// Protocol version announced in the socket URL
pub const PROTOCOL_VSN: &str = "1.0.0";

/// Join reply timeout
const DEFAULT_JOIN_TIMEOUT_MS: u64 = 10_000;

/// Heartbeat period on the `phoenix` topic
const DEFAULT_HEARTBEAT_MS: u64 = 25_000;

const EVENT_JOIN: &str = "phx_join";
const EVENT_LEAVE: &str = "phx_leave";
const EVENT_REPLY: &str = "phx_reply";
const EVENT_ERROR: &str = "phx_error";
const EVENT_CLOSE: &str = "phx_close";
const EVENT_HEARTBEAT: &str = "heartbeat";
const HEARTBEAT_TOPIC: &str = "phoenix";

#[derive(Debug, Clone)]
pub struct PhoenixConfig {
    /// Project URL (`https://<ref>.example.co`) or a full `ws(s)://` socket URL
    pub endpoint: String,
    pub api_key: String,
    pub join_timeout: Duration,
    pub heartbeat_interval: Duration,
    /// Pacing for socket reconnects after a drop
    pub reconnect: ReconnectPolicy,
}

impl PhoenixConfig {
    pub fn new(endpoint: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            api_key: api_key.into(),
            join_timeout: Duration::from_millis(DEFAULT_JOIN_TIMEOUT_MS),
            heartbeat_interval: Duration::from_millis(DEFAULT_HEARTBEAT_MS),
            reconnect: ReconnectPolicy::default(),
        }
    }

    /// Websocket URL including the api key and protocol version
    pub fn socket_url(&self) -> Result<String> {
        let invalid = || RealtimeError::InvalidEndpoint(self.endpoint.clone());

        let mut url = Url::parse(self.endpoint.trim()).map_err(|_| invalid())?;
        let scheme = match url.scheme() {
            "http" | "ws" => "ws",
            "https" | "wss" => "wss",
            _ => return Err(invalid()),
        };
        url.set_scheme(scheme).map_err(|_| invalid())?;

        if url.host_str().map_or(true, str::is_empty) {
            return Err(invalid());
        }

        let base_path = url.path().trim_end_matches('/').to_string();
        let path = if base_path.ends_with(WEBSOCKET_PATH) {
            base_path
        } else {
            format!("{}{}", base_path, WEBSOCKET_PATH)
        };
        url.set_path(&path);

        // Keep caller query params but own apikey/vsn
        let kept: Vec<(String, String)> = url
            .query_pairs()
            .filter(|(key, _)| !matches!(&**key, "apikey" | "vsn"))
            .map(|(key, value)| (key.into_owned(), value.into_owned()))
            .collect();
        url.set_query(None);
        url.query_pairs_mut()
            .extend_pairs(kept)
            .append_pair("apikey", &self.api_key)
            .append_pair("vsn", PROTOCOL_VSN);

        Ok(url.into())
    }
}

/// One Phoenix v1 frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhoenixMessage {
    pub topic: String,
    pub event: String,
    #[serde(default)]
    pub payload: Value,
    #[serde(rename = "ref", default)]
    pub reference: Option<String>,
}

impl PhoenixMessage {
    pub fn join(topic: &str, reference: &str, api_key: &str) -> Self {
        Self {
            topic: topic.to_string(),
            event: EVENT_JOIN.to_string(),
            payload: json!({
                "config": {
                    "broadcast": { "ack": false, "self": false },
                    "presence": { "key": "" },
                    "postgres_changes": [],
                    "private": false
                },
                "access_token": api_key
            }),
            reference: Some(reference.to_string()),
        }
    }

    pub fn leave(topic: &str, reference: &str) -> Self {
        Self {
            topic: topic.to_string(),
            event: EVENT_LEAVE.to_string(),
            payload: json!({}),
            reference: Some(reference.to_string()),
        }
    }

    pub fn heartbeat(reference: &str) -> Self {
        Self {
            topic: HEARTBEAT_TOPIC.to_string(),
            event: EVENT_HEARTBEAT.to_string(),
            payload: json!({}),
            reference: Some(reference.to_string()),
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn parse(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// `payload.status` of a reply frame
    pub fn reply_status(&self) -> Option<&str> {
        self.payload.get("status").and_then(Value::as_str)
    }
}

/// Channel topic for a channel name
pub fn channel_topic(channel: &str) -> String {
    format!("realtime:{}", channel)
}

/// What a received frame means for the joined channel
#[derive(Debug, Clone, PartialEq, Eq)]
enum FrameAction {
    Joined,
    JoinRejected(String),
    ChannelError,
    Closed,
    Ignore,
}

fn classify_frame(frame: &PhoenixMessage, topic: &str, join_ref: &str) -> FrameAction {
    if frame.topic != topic {
        return FrameAction::Ignore;
    }

    match frame.event.as_str() {
        EVENT_REPLY if frame.reference.as_deref() == Some(join_ref) => {
            match frame.reply_status() {
                Some("ok") => FrameAction::Joined,
                _ => FrameAction::JoinRejected(
                    frame
                        .payload
                        .get("response")
                        .map(Value::to_string)
                        .unwrap_or_else(|| "no response".to_string()),
                ),
            }
        }
        EVENT_ERROR => FrameAction::ChannelError,
        EVENT_CLOSE => FrameAction::Closed,
        _ => FrameAction::Ignore,
    }
}

/// Whether `frame` acknowledges the heartbeat sent with `pending`
fn is_heartbeat_reply(frame: &PhoenixMessage, pending: Option<&str>) -> bool {
    frame.topic == HEARTBEAT_TOPIC
        && frame.event == EVENT_REPLY
        && pending.is_some()
        && frame.reference.as_deref() == pending
}

/// How one socket connection ended
#[derive(Debug)]
enum ConnectionEnd {
    Shutdown,
    Closed,
    Lost {
        joined: bool,
        reported: bool,
        reason: String,
    },
}

/// Open flag of one subscription. Callbacks run while it is locked, so
/// releasing the subscription waits for a delivery already underway.
type ActiveFlag = Arc<ReentrantMutex<Cell<bool>>>;

/// Forwards statuses until the subscription is released
#[derive(Clone)]
struct StatusReporter {
    active: ActiveFlag,
    callback: StatusCallback,
}

impl StatusReporter {
    fn report(&self, status: TransportStatus) {
        let active = self.active.lock();
        if active.get() {
            (self.callback)(status);
        }
    }
}

struct ChannelHandle {
    active: ActiveFlag,
    shutdown_tx: watch::Sender<bool>,
}

impl ChannelHandle {
    fn release(self) {
        self.active.lock().set(false);
        let _ = self.shutdown_tx.send(true);
    }
}

/// Realtime transport over the Phoenix websocket protocol
pub struct PhoenixTransport {
    config: PhoenixConfig,
    next_id: AtomicU64,
    channels: Mutex<HashMap<u64, ChannelHandle>>,
}

impl PhoenixTransport {
    pub fn new(config: PhoenixConfig) -> Result<Self> {
        config.socket_url()?;
        config.reconnect.validate()?;

        Ok(Self {
            config,
            next_id: AtomicU64::new(1),
            channels: Mutex::new(HashMap::new()),
        })
    }

    pub fn config(&self) -> &PhoenixConfig {
        &self.config
    }

    pub fn open_channels(&self) -> usize {
        self.channels.lock().len()
    }
}

impl RealtimeTransport for PhoenixTransport {
    fn subscribe(&self, channel: &str, on_status: StatusCallback) -> Result<Subscription> {
        let runtime = Handle::try_current().map_err(|_| RealtimeError::NoRuntime)?;
        let url = self.config.socket_url()?;

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let active: ActiveFlag = Arc::new(ReentrantMutex::new(Cell::new(true)));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let reporter = StatusReporter {
            active: Arc::clone(&active),
            callback: on_status,
        };

        self.channels.lock().insert(id, ChannelHandle { active, shutdown_tx });

        let topic = channel_topic(channel);
        info!("Opening realtime channel {} (subscription {})", topic, id);
        runtime.spawn(channel_loop(self.config.clone(), url, topic, reporter, shutdown_rx));

        Ok(Subscription::new(id, channel))
    }

    fn unsubscribe(&self, subscription: Subscription) {
        let handle = self.channels.lock().remove(&subscription.id());
        if let Some(handle) = handle {
            handle.release();
            info!("Released realtime channel '{}'", subscription.channel());
        }
    }
}

impl Drop for PhoenixTransport {
    fn drop(&mut self) {
        let handles: Vec<ChannelHandle> = self.channels.lock().drain().map(|(_, h)| h).collect();
        for handle in handles {
            handle.release();
        }
    }
}

/// Connection loop with reconnection logic
async fn channel_loop(
    config: PhoenixConfig,
    url: String,
    topic: String,
    reporter: StatusReporter,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut attempt = 0u32;

    loop {
        if *shutdown_rx.borrow() {
            return;
        }

        match run_connection(&config, &url, &topic, &reporter, &mut shutdown_rx).await {
            ConnectionEnd::Shutdown => {
                debug!("Realtime channel {} shut down", topic);
                return;
            }
            ConnectionEnd::Closed => {
                info!("Realtime channel {} closed by server", topic);
                reporter.report(TransportStatus::Closed);
                return;
            }
            ConnectionEnd::Lost {
                joined,
                reported,
                reason,
            } => {
                warn!("Realtime channel {} lost: {}", topic, reason);
                if !reported {
                    reporter.report(TransportStatus::ChannelError);
                }
                if joined {
                    attempt = 0;
                }
            }
        }

        if !config.reconnect.allows(attempt) {
            warn!(
                "Giving up on realtime channel {} after {} reconnect attempts",
                topic, attempt
            );
            reporter.report(TransportStatus::Closed);
            return;
        }

        let delay = config.reconnect.delay_for(attempt);
        attempt = attempt.saturating_add(1);
        warn!("Reconnecting realtime socket in {:?} (attempt {})", delay, attempt);

        tokio::select! {
            _ = sleep(delay) => {}
            _ = shutdown_rx.changed() => return,
        }
    }
}

/// Run a single websocket connection until it ends
async fn run_connection(
    config: &PhoenixConfig,
    url: &str,
    topic: &str,
    reporter: &StatusReporter,
    shutdown_rx: &mut watch::Receiver<bool>,
) -> ConnectionEnd {
    let connected = tokio::select! {
        result = connect_async(url) => result,
        _ = shutdown_rx.changed() => return ConnectionEnd::Shutdown,
    };

    let ws_stream = match connected {
        Ok((ws_stream, _)) => ws_stream,
        Err(e) => {
            return ConnectionEnd::Lost {
                joined: false,
                reported: false,
                reason: format!("connect failed: {}", e),
            }
        }
    };
    debug!("Realtime socket connected for {}", topic);

    let (mut write, mut read) = ws_stream.split();
    let mut next_ref = 0u64;
    let mut make_ref = move || {
        next_ref += 1;
        next_ref.to_string()
    };

    let join_ref = make_ref();
    let join = PhoenixMessage::join(topic, &join_ref, &config.api_key);
    if let Err(e) = send_frame(&mut write, &join).await {
        return ConnectionEnd::Lost {
            joined: false,
            reported: false,
            reason: e.to_string(),
        };
    }

    let join_deadline = sleep(config.join_timeout);
    tokio::pin!(join_deadline);
    let mut heartbeat = interval_at(
        Instant::now() + config.heartbeat_interval,
        config.heartbeat_interval,
    );
    let mut joined = false;
    let mut pending_heartbeat: Option<String> = None;

    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => {
                let leave = PhoenixMessage::leave(topic, &make_ref());
                if let Err(e) = send_frame(&mut write, &leave).await {
                    debug!("Failed to send phx_leave: {}", e);
                }
                let _ = write.close().await;
                return ConnectionEnd::Shutdown;
            }

            _ = &mut join_deadline, if !joined => {
                reporter.report(TransportStatus::TimedOut);
                return ConnectionEnd::Lost {
                    joined: false,
                    reported: true,
                    reason: format!("no join reply within {:?}", config.join_timeout),
                };
            }

            _ = heartbeat.tick() => {
                // Previous beat never answered: the socket is half-open
                if let Some(missed) = pending_heartbeat.take() {
                    reporter.report(TransportStatus::ChannelError);
                    return ConnectionEnd::Lost {
                        joined,
                        reported: true,
                        reason: format!("heartbeat {} went unanswered", missed),
                    };
                }

                let beat_ref = make_ref();
                let beat = PhoenixMessage::heartbeat(&beat_ref);
                if let Err(e) = send_frame(&mut write, &beat).await {
                    return ConnectionEnd::Lost {
                        joined,
                        reported: false,
                        reason: format!("heartbeat failed: {}", e),
                    };
                }
                pending_heartbeat = Some(beat_ref);
            }

            msg = read.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    let frame = match PhoenixMessage::parse(text.as_str()) {
                        Ok(frame) => frame,
                        Err(e) => {
                            warn!("Failed to parse realtime frame: {} (frame: {})", e, text.as_str());
                            continue;
                        }
                    };

                    if is_heartbeat_reply(&frame, pending_heartbeat.as_deref()) {
                        pending_heartbeat = None;
                        continue;
                    }

                    match classify_frame(&frame, topic, &join_ref) {
                        FrameAction::Joined => {
                            joined = true;
                            reporter.report(TransportStatus::Subscribed);
                        }
                        FrameAction::JoinRejected(reason) => {
                            reporter.report(TransportStatus::ChannelError);
                            return ConnectionEnd::Lost {
                                joined: false,
                                reported: true,
                                reason: format!("join rejected: {}", reason),
                            };
                        }
                        FrameAction::ChannelError => {
                            reporter.report(TransportStatus::ChannelError);
                            return ConnectionEnd::Lost {
                                joined,
                                reported: true,
                                reason: "server reported phx_error".to_string(),
                            };
                        }
                        FrameAction::Closed => {
                            let _ = write.close().await;
                            return ConnectionEnd::Closed;
                        }
                        FrameAction::Ignore => {
                            debug!("Ignoring realtime frame {}/{}", frame.topic, frame.event);
                        }
                    }
                }
                Some(Ok(Message::Ping(data))) => {
                    let _ = write.send(Message::Pong(data)).await;
                }
                Some(Ok(Message::Close(_))) | None => {
                    return ConnectionEnd::Lost {
                        joined,
                        reported: false,
                        reason: "socket closed".to_string(),
                    };
                }
                Some(Err(e)) => {
                    return ConnectionEnd::Lost {
                        joined,
                        reported: false,
                        reason: e.to_string(),
                    };
                }
                Some(Ok(_)) => {}
            }
        }
    }
}

async fn send_frame<S>(write: &mut S, frame: &PhoenixMessage) -> Result<()>
where
    S: futures_util::Sink<Message> + Unpin,
    S::Error: std::fmt::Display,
{
    let text = frame.to_json()?;
    write
        .send(Message::Text(text.into()))
        .await
        .map_err(|e| RealtimeError::Transport(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_socket_url_from_project_url() {
        let config = PhoenixConfig::new("https://abc.example.co/", "key.part-1");
        assert_eq!(
            config.socket_url().unwrap(),
            "wss://abc.example.co/realtime/v1/websocket?apikey=key.part-1&vsn=1.0.0"
        );
    }

    #[test]
    fn test_socket_url_keeps_explicit_ws_path() {
        let config = PhoenixConfig::new("ws://127.0.0.1:4000/realtime/v1/websocket", "k=1");
        assert_eq!(
            config.socket_url().unwrap(),
            "ws://127.0.0.1:4000/realtime/v1/websocket?apikey=k%3D1&vsn=1.0.0"
        );
    }

    #[test]
    fn test_socket_url_puts_path_before_existing_query() {
        let config = PhoenixConfig::new("https://abc.example.co?ref=1&vsn=0.9", "k");
        assert_eq!(
            config.socket_url().unwrap(),
            "wss://abc.example.co/realtime/v1/websocket?ref=1&apikey=k&vsn=1.0.0"
        );
    }

    #[test]
    fn test_socket_url_scheme_is_case_insensitive() {
        let config = PhoenixConfig::new("HTTPS://abc.example.co", "k");
        assert_eq!(
            config.socket_url().unwrap(),
            "wss://abc.example.co/realtime/v1/websocket?apikey=k&vsn=1.0.0"
        );
    }

    #[test]
    fn test_socket_url_encodes_base_path() {
        let config = PhoenixConfig::new("https://abc.example.co/base path/", "a b");
        assert_eq!(
            config.socket_url().unwrap(),
            "wss://abc.example.co/base%20path/realtime/v1/websocket?apikey=a+b&vsn=1.0.0"
        );
    }

    #[test]
    fn test_socket_url_rejects_other_schemes() {
        for endpoint in ["ftp://host", "abc.example.co", "https://", ""] {
            let config = PhoenixConfig::new(endpoint, "key");
            assert!(
                matches!(config.socket_url(), Err(RealtimeError::InvalidEndpoint(_))),
                "endpoint {:?} should be rejected",
                endpoint
            );
        }
    }

    #[test]
    fn test_join_frame_serialization() {
        let frame = PhoenixMessage::join("realtime:status", "1", "secret");
        let json = frame.to_json().unwrap();
        assert!(json.contains("\"event\":\"phx_join\""));
        assert!(json.contains("\"topic\":\"realtime:status\""));
        assert!(json.contains("\"ref\":\"1\""));
        assert!(json.contains("\"access_token\":\"secret\""));
    }

    #[test]
    fn test_heartbeat_frame() {
        let frame = PhoenixMessage::heartbeat("7");
        assert_eq!(frame.topic, "phoenix");
        assert_eq!(frame.event, "heartbeat");
    }

    #[test]
    fn test_classify_join_replies() {
        let ok = PhoenixMessage::parse(
            r#"{"topic":"realtime:status","event":"phx_reply","payload":{"status":"ok","response":{}},"ref":"1"}"#,
        )
        .unwrap();
        assert_eq!(classify_frame(&ok, "realtime:status", "1"), FrameAction::Joined);

        // reply to some other push
        assert_eq!(classify_frame(&ok, "realtime:status", "2"), FrameAction::Ignore);

        let rejected = PhoenixMessage::parse(
            r#"{"topic":"realtime:status","event":"phx_reply","payload":{"status":"error","response":{"reason":"unauthorized"}},"ref":"1"}"#,
        )
        .unwrap();
        assert!(matches!(
            classify_frame(&rejected, "realtime:status", "1"),
            FrameAction::JoinRejected(reason) if reason.contains("unauthorized")
        ));
    }

    #[test]
    fn test_classify_channel_events() {
        let error = PhoenixMessage::parse(
            r#"{"topic":"realtime:status","event":"phx_error","payload":{},"ref":null}"#,
        )
        .unwrap();
        assert_eq!(classify_frame(&error, "realtime:status", "1"), FrameAction::ChannelError);

        let close = PhoenixMessage::parse(r#"{"topic":"realtime:status","event":"phx_close"}"#).unwrap();
        assert_eq!(close.reference, None);
        assert_eq!(classify_frame(&close, "realtime:status", "1"), FrameAction::Closed);

        let other_topic = PhoenixMessage::parse(
            r#"{"topic":"phoenix","event":"phx_reply","payload":{"status":"ok"},"ref":"1"}"#,
        )
        .unwrap();
        assert_eq!(classify_frame(&other_topic, "realtime:status", "1"), FrameAction::Ignore);
    }

    #[test]
    fn test_heartbeat_reply_matching() {
        let reply = PhoenixMessage::parse(
            r#"{"topic":"phoenix","event":"phx_reply","payload":{"status":"ok","response":{}},"ref":"4"}"#,
        )
        .unwrap();
        assert!(is_heartbeat_reply(&reply, Some("4")));
        assert!(!is_heartbeat_reply(&reply, Some("5")));
        assert!(!is_heartbeat_reply(&reply, None));

        let channel_reply = PhoenixMessage::parse(
            r#"{"topic":"realtime:status","event":"phx_reply","payload":{"status":"ok"},"ref":"4"}"#,
        )
        .unwrap();
        assert!(!is_heartbeat_reply(&channel_reply, Some("4")));
    }

    #[test]
    fn test_reporter_stops_after_release() {
        let active: ActiveFlag = Arc::new(ReentrantMutex::new(Cell::new(true)));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = Arc::new(Mutex::new(Some(ChannelHandle {
            active: Arc::clone(&active),
            shutdown_tx,
        })));

        let seen = Arc::new(Mutex::new(Vec::new()));
        let (sink, releaser) = (Arc::clone(&seen), Arc::clone(&handle));
        let reporter = StatusReporter {
            active,
            // Releasing from inside a delivery must not deadlock
            callback: Arc::new(move |status| {
                sink.lock().push(status);
                if let Some(handle) = releaser.lock().take() {
                    handle.release();
                }
            }),
        };

        reporter.report(TransportStatus::Subscribed);
        reporter.report(TransportStatus::ChannelError);

        assert_eq!(*seen.lock(), vec![TransportStatus::Subscribed]);
        assert!(*shutdown_rx.borrow());
    }

    #[test]
    fn test_transport_rejects_bad_endpoint() {
        let result = PhoenixTransport::new(PhoenixConfig::new("not a url", "key"));
        assert!(matches!(result, Err(RealtimeError::InvalidEndpoint(_))));
    }

    #[test]
    fn test_subscribe_requires_runtime() {
        let transport = PhoenixTransport::new(PhoenixConfig::new("ws://127.0.0.1:9", "key")).unwrap();
        let result = transport.subscribe("status", Arc::new(|_| {}));
        assert!(matches!(result, Err(RealtimeError::NoRuntime)));
        assert_eq!(transport.open_channels(), 0);
    }
}
