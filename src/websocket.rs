//! # Realtime Relay WebSocket Handler
//!
//! Pairs each client WebSocket connection with one upstream recognition
//! connection and mediates all traffic between them.
//!
//! ## WebSocket Protocol:
//! 1. **Connection**: Client connects to `/ws/transcribe?lang=<code>`
//! 2. **Admission**: Connections beyond the session cap receive one `error`
//!    frame and are closed without creating a session
//! 3. **Audio Streaming**: Binary frames are raw PCM audio (s16le, 16 kHz)
//!    forwarded verbatim to the upstream once it is open
//! 4. **Transcript Events**: The server relays `partial`/`final` transcript
//!    events and upstream status events as JSON text frames
//! 5. **Teardown**: Either side closing releases both halves of the pair
//!
//! ## Message Format:
//! - **Client → Server**: binary PCM audio, or JSON control messages
//!   (currently accepted and discarded — reserved for future use)
//! - **Server → Client**: JSON messages tagged by a `type` field

use crate::session::{Language, SessionRegistry};
use crate::state::AppState;
use crate::upstream::client::{self as upstream_client, UpstreamEvent, UpstreamHandle};
use crate::upstream::messages::AudioFormat;

use actix::prelude::*;
use actix_web::{web, HttpRequest, HttpResponse, Result as ActixResult};
use actix_web_actors::ws;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Events the relay sends to its client, the stable client-facing vocabulary.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEvent {
    /// Something went wrong; the connection may or may not survive it.
    Error {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        detail: Option<serde_json::Value>,
    },

    /// The upstream session is open; streaming may begin.
    Ready {
        message: String,
        audio_format: AudioFormat,
    },

    /// Informational: the upstream acknowledged the recognition session.
    RecognitionStarted { message: String },

    /// A provisional transcript, superseded by the next partial.
    Partial { transcript: String },

    /// A finalized transcript segment.
    Final { transcript: String },

    /// Non-fatal upstream warning.
    Warning { message: String },

    /// The upstream closed its side; the client connection stays open.
    SpeechmaticsDisconnected {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        code: Option<u16>,
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
}

/// One end-to-end realtime transcription pairing: a client connection and
/// its upstream recognition connection.
///
/// ## Lifecycle:
/// `INIT → UPSTREAM_CONNECTING → UPSTREAM_OPEN → CLOSED`. The upstream
/// handle is `None` until the upstream handshake completes, and permanently
/// `None` if setup fails. `closed` transitions false→true exactly once; all
/// traffic in both directions is ignored afterwards.
pub struct RelaySession {
    /// Registry key for this connection
    id: String,

    /// Resolved transcription language
    language: Language,

    /// Shared admission registry; this session's slot is already reserved
    registry: Arc<SessionRegistry>,

    /// Upstream connection settings
    realtime_url: String,
    api_key: String,
    max_delay: f32,
    keepalive_interval: Duration,

    /// Sending half of the upstream connection, once open
    upstream: Option<UpstreamHandle>,

    /// Monotonic close flag; set exactly once by `release`
    closed: bool,

    /// Whether any audio has been forwarded (diagnostics only)
    audio_received: bool,

    /// Liveness timer, released exactly once on teardown
    heartbeat: Option<SpawnHandle>,
}

impl RelaySession {
    pub fn new(id: String, language: Language, registry: Arc<SessionRegistry>, state: &AppState) -> Self {
        let config = state.get_config();
        Self {
            id,
            language,
            registry,
            realtime_url: config.speechmatics.realtime_url,
            api_key: config.speechmatics.api_key,
            max_delay: config.session.max_delay_seconds,
            keepalive_interval: Duration::from_secs(config.session.keepalive_interval_secs),
            upstream: None,
            closed: false,
            audio_received: false,
            heartbeat: None,
        }
    }

    /// Open the upstream connection for this session. Runs off-actor; the
    /// outcome arrives back as an `UpstreamEvent`.
    fn connect_upstream(&self, ctx: &mut ws::WebsocketContext<Self>) {
        let events = ctx.address().recipient::<UpstreamEvent>();
        let url = self.realtime_url.clone();
        let api_key = self.api_key.clone();
        let language = self.language;
        let max_delay = self.max_delay;
        let session_id = self.id.clone();

        tokio::spawn(async move {
            match upstream_client::connect(&url, &api_key, language, max_delay, events.clone()).await {
                Ok(handle) => events.do_send(UpstreamEvent::Open(handle)),
                Err(e) => {
                    error!("session {}: upstream setup failed: {}", session_id, e);
                    events.do_send(UpstreamEvent::SetupFailed(e.to_string()));
                }
            }
        });
    }

    /// Forward one inbound client payload.
    ///
    /// ## Classification policy (deliberate, not incidental):
    /// A payload that JSON-decodes is a structured client control message,
    /// accepted and discarded. Anything else is a binary audio frame,
    /// forwarded verbatim iff the upstream channel is open.
    ///
    /// Returns true if the payload was forwarded upstream as audio.
    fn handle_client_payload(&mut self, data: &[u8]) -> bool {
        if self.closed {
            return false;
        }

        if is_control_payload(data) {
            debug!("session {}: client control message accepted (ignored)", self.id);
            return false;
        }

        match &self.upstream {
            Some(upstream) => {
                if upstream.send_audio(data.to_vec()) {
                    if !self.audio_received {
                        self.audio_received = true;
                        debug!("session {}: first audio frame forwarded", self.id);
                    }
                    true
                } else {
                    warn!("session {}: upstream channel gone, dropping audio", self.id);
                    false
                }
            }
            None => {
                debug!("session {}: upstream not ready, dropping audio frame", self.id);
                false
            }
        }
    }

    /// Release this session's resources: close flag, upstream channel, and
    /// registry slot. Idempotent; the first caller wins and the second is a
    /// no-op. Safe to invoke from any of the teardown paths (client close,
    /// client error, upstream setup failure, actor stop).
    fn release(&mut self) -> bool {
        if self.closed {
            return false;
        }
        self.closed = true;

        if let Some(upstream) = self.upstream.take() {
            // Ask for final results before closing the upstream side.
            upstream.end_of_stream();
            upstream.close();
        }

        self.registry.remove(&self.id);
        true
    }

    /// The single authoritative teardown path.
    fn teardown(&mut self, ctx: &mut ws::WebsocketContext<Self>) {
        if let Some(handle) = self.heartbeat.take() {
            ctx.cancel_future(handle);
        }
        if self.release() {
            info!(
                "session {} closed ({} sessions active)",
                self.id,
                self.registry.size()
            );
        }
    }

    fn send_event(&self, ctx: &mut ws::WebsocketContext<Self>, event: ClientEvent) {
        if self.closed {
            return;
        }
        match serde_json::to_string(&event) {
            Ok(json) => ctx.text(json),
            Err(e) => error!("session {}: failed to encode client event: {}", self.id, e),
        }
    }
}

/// A payload is a structured control message when it JSON-decodes.
fn is_control_payload(data: &[u8]) -> bool {
    serde_json::from_slice::<serde_json::Value>(data).is_ok()
}

impl Actor for RelaySession {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        info!(
            "session {} started, language={} ({} sessions active)",
            self.id,
            self.language.code(),
            self.registry.size()
        );

        // Best-effort liveness probe. A failed ping is not itself fatal; the
        // transport's own close/error signal is authoritative.
        let handle = ctx.run_interval(self.keepalive_interval, |act, ctx| {
            if !act.closed {
                ctx.ping(b"");
            }
        });
        self.heartbeat = Some(handle);

        self.connect_upstream(ctx);
    }

    fn stopped(&mut self, ctx: &mut Self::Context) {
        // Backstop: every exit path ends here, so resources are released
        // even when no close or error handler fired first.
        self.teardown(ctx);
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for RelaySession {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Binary(data)) => {
                self.handle_client_payload(&data);
            }
            Ok(ws::Message::Text(text)) => {
                self.handle_client_payload(text.as_bytes());
            }
            Ok(ws::Message::Ping(data)) => {
                ctx.pong(&data);
            }
            Ok(ws::Message::Pong(_)) => {
                // Keepalive responses carry no state.
            }
            Ok(ws::Message::Close(reason)) => {
                info!("session {}: client closed: {:?}", self.id, reason);
                self.teardown(ctx);
                ctx.close(reason);
                ctx.stop();
            }
            Ok(ws::Message::Continuation(_)) => {
                warn!("session {}: unexpected continuation frame", self.id);
            }
            Ok(ws::Message::Nop) => {}
            Err(e) => {
                error!("session {}: client transport error: {}", self.id, e);
                self.teardown(ctx);
                ctx.stop();
            }
        }
    }
}

impl Handler<UpstreamEvent> for RelaySession {
    type Result = ();

    fn handle(&mut self, event: UpstreamEvent, ctx: &mut Self::Context) {
        if self.closed {
            return;
        }

        match event {
            UpstreamEvent::Open(handle) => {
                self.upstream = Some(handle);
                self.send_event(
                    ctx,
                    ClientEvent::Ready {
                        message: "Transcription session ready".to_string(),
                        audio_format: AudioFormat::default(),
                    },
                );
            }
            UpstreamEvent::SetupFailed(reason) => {
                self.send_event(
                    ctx,
                    ClientEvent::Error {
                        message: format!("Failed to start transcription session: {}", reason),
                        detail: None,
                    },
                );
                self.teardown(ctx);
                ctx.close(None);
                ctx.stop();
            }
            UpstreamEvent::RecognitionStarted => {
                self.send_event(
                    ctx,
                    ClientEvent::RecognitionStarted {
                        message: "Recognition started".to_string(),
                    },
                );
            }
            UpstreamEvent::Partial(transcript) => {
                self.send_event(ctx, ClientEvent::Partial { transcript });
            }
            UpstreamEvent::Final(transcript) => {
                self.send_event(ctx, ClientEvent::Final { transcript });
            }
            UpstreamEvent::Warning(message) => {
                self.send_event(ctx, ClientEvent::Warning { message });
            }
            UpstreamEvent::Error { reason, detail } => {
                // Application-level upstream errors are relayed but do not
                // close the pair; only a transport-level signal does.
                self.send_event(
                    ctx,
                    ClientEvent::Error {
                        message: reason,
                        detail: Some(detail),
                    },
                );
            }
            UpstreamEvent::Disconnected { code, reason } => {
                info!(
                    "session {}: upstream disconnected (code={:?}, reason={:?})",
                    self.id, code, reason
                );
                // Release only the upstream side; the client may still want
                // the final state of its connection.
                self.upstream = None;
                self.send_event(
                    ctx,
                    ClientEvent::SpeechmaticsDisconnected {
                        message: "Transcription service disconnected".to_string(),
                        code,
                        reason,
                    },
                );
            }
            UpstreamEvent::TransportError(message) => {
                error!("session {}: upstream transport error: {}", self.id, message);
                self.upstream = None;
                self.send_event(
                    ctx,
                    ClientEvent::Error {
                        message: format!("Transcription service connection error: {}", message),
                        detail: None,
                    },
                );
            }
        }
    }
}

/// Minimal actor for connections rejected at admission: sends exactly one
/// capacity error event, then closes. No session is created.
struct CapacityReject;

impl Actor for CapacityReject {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        let event = ClientEvent::Error {
            message: "Server at capacity. Please try again later.".to_string(),
            detail: None,
        };
        if let Ok(json) = serde_json::to_string(&event) {
            ctx.text(json);
        }
        ctx.close(Some(ws::CloseReason {
            code: ws::CloseCode::Again,
            description: Some("at capacity".to_string()),
        }));
        ctx.stop();
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for CapacityReject {
    fn handle(&mut self, _msg: Result<ws::Message, ws::ProtocolError>, _ctx: &mut Self::Context) {
        // The connection is being closed; nothing to do.
    }
}

/// Resolve the `lang` query parameter. A malformed query string must not
/// abort connection setup; it resolves to the default language.
fn resolve_language(query_string: &str) -> Language {
    let query = web::Query::<HashMap<String, String>>::from_query(query_string)
        .unwrap_or_else(|_| web::Query(HashMap::new()));
    Language::resolve(query.get("lang").map(String::as_str))
}

/// WebSocket endpoint handler: the connection acceptor.
///
/// ## Admission control:
/// The session id is reserved in the registry before the actor starts so the
/// cap holds under concurrent connects; a failed upgrade returns the slot.
pub async fn ws_transcribe(
    req: HttpRequest,
    stream: web::Payload,
    state: web::Data<AppState>,
) -> ActixResult<HttpResponse> {
    info!(
        "new WebSocket connection request from {:?}",
        req.connection_info().peer_addr()
    );

    let language = resolve_language(req.query_string());
    let session_id = Uuid::new_v4().to_string();
    let registry = state.registry.clone();

    if !registry.admit(&session_id) {
        warn!(
            "rejecting connection: {}/{} sessions active",
            registry.size(),
            registry.max_sessions()
        );
        return ws::start(CapacityReject, &req, stream);
    }

    let session = RelaySession::new(session_id.clone(), language, registry.clone(), &state);
    match ws::start(session, &req, stream) {
        Ok(response) => Ok(response),
        Err(e) => {
            // The actor never started, so nothing else will free the slot.
            registry.remove(&session_id);
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::upstream::client::UpstreamHandle;

    fn test_session(registry: Arc<SessionRegistry>) -> RelaySession {
        let state = AppState::for_tests(AppConfig::default());
        RelaySession::new("test-session".to_string(), Language::Arabic, registry, &state)
    }

    fn registered_session() -> (RelaySession, Arc<SessionRegistry>) {
        let registry = Arc::new(SessionRegistry::new(2));
        assert!(registry.admit("test-session"));
        (test_session(registry.clone()), registry)
    }

    #[test]
    fn test_json_payloads_classify_as_control() {
        assert!(is_control_payload(br#"{"type":"configure"}"#));
        assert!(is_control_payload(b"[1,2,3]"));
        // PCM audio is not valid JSON.
        assert!(!is_control_payload(&[0x00, 0x01, 0xfe, 0xff, 0x80, 0x7f]));
        assert!(!is_control_payload(b"not json at all"));
    }

    #[test]
    fn test_audio_before_upstream_open_is_dropped() {
        let (mut session, _registry) = registered_session();

        // Three frames arrive while the upstream is still connecting.
        for _ in 0..3 {
            assert!(!session.handle_client_payload(&[0u8, 1, 2, 3]));
        }
        assert!(!session.audio_received);
    }

    #[test]
    fn test_audio_forwarded_once_upstream_open() {
        let (mut session, _registry) = registered_session();
        let (handle, mut rx) = UpstreamHandle::channel_for_tests();
        session.upstream = Some(handle);

        assert!(session.handle_client_payload(&[0u8, 1, 2, 3]));
        assert!(session.audio_received);
        assert!(rx.try_recv().unwrap().is_audio());
    }

    #[test]
    fn test_control_message_not_forwarded_upstream() {
        let (mut session, _registry) = registered_session();
        let (handle, mut rx) = UpstreamHandle::channel_for_tests();
        session.upstream = Some(handle);

        assert!(!session.handle_client_payload(br#"{"type":"configure"}"#));
        assert!(!session.audio_received);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_no_forwarding_after_close() {
        let (mut session, _registry) = registered_session();
        let (handle, mut rx) = UpstreamHandle::channel_for_tests();
        session.upstream = Some(handle);

        assert!(session.release());

        // Frames injected after close must not reach the upstream channel.
        assert!(!session.handle_client_payload(&[0u8, 1, 2, 3]));
        // The release itself sent EndOfStream; no audio follows it.
        assert!(rx.try_recv().unwrap().is_end_of_stream());
        assert!(!rx.try_recv().map(|c| c.is_audio()).unwrap_or(false));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_release_sends_end_of_stream_and_frees_slot() {
        let (mut session, registry) = registered_session();
        let (handle, mut rx) = UpstreamHandle::channel_for_tests();
        session.upstream = Some(handle);
        assert_eq!(registry.size(), 1);

        assert!(session.release());
        assert_eq!(registry.size(), 0);
        assert!(rx.try_recv().unwrap().is_end_of_stream());
    }

    #[test]
    fn test_release_is_idempotent() {
        let (mut session, registry) = registered_session();

        assert!(session.release());
        assert_eq!(registry.size(), 0);

        // Near-simultaneous close and error both invoke release; the second
        // invocation must be a no-op.
        registry.admit("unrelated");
        assert!(!session.release());
        assert_eq!(registry.size(), 1);
    }

    #[test]
    fn test_malformed_query_string_resolves_to_default() {
        assert_eq!(resolve_language("lang=en"), Language::English);
        assert_eq!(resolve_language("lang=zz"), Language::Arabic);
        assert_eq!(resolve_language(""), Language::Arabic);
        assert_eq!(resolve_language("%%%=&&&;;"), Language::Arabic);
        assert_eq!(resolve_language("lang"), Language::Arabic);
    }

    #[test]
    fn test_client_event_serialization() {
        let json = serde_json::to_string(&ClientEvent::Partial {
            transcript: "hello".to_string(),
        })
        .unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["type"], "partial");
        assert_eq!(value["transcript"], "hello");

        let json = serde_json::to_string(&ClientEvent::Final {
            transcript: "done".to_string(),
        })
        .unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["type"], "final");

        let json = serde_json::to_string(&ClientEvent::SpeechmaticsDisconnected {
            message: "gone".to_string(),
            code: Some(1006),
            reason: None,
        })
        .unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["type"], "speechmatics_disconnected");
        assert_eq!(value["code"], 1006);
        assert!(value.get("reason").is_none());
    }

    #[test]
    fn test_capacity_error_event_shape() {
        let event = ClientEvent::Error {
            message: "Server at capacity. Please try again later.".to_string(),
            detail: None,
        };
        let value: serde_json::Value =
            serde_json::from_str(&serde_json::to_string(&event).unwrap()).unwrap();
        assert_eq!(value["type"], "error");
        assert_eq!(value["message"], "Server at capacity. Please try again later.");
        assert!(value.get("detail").is_none());
    }
}
