//! # Upstream Realtime Client
//!
//! One duplex WebSocket connection per relay session to the Speechmatics
//! realtime endpoint. The connection is established with a bearer token,
//! `StartRecognition` is sent as soon as the socket opens, and from then on
//! the client runs two tasks:
//!
//! - a **writer** that consumes commands from the session (audio chunks,
//!   end-of-stream, close) and tracks the audio sequence number
//! - a **reader** that decodes upstream frames and delivers typed events
//!   to the owning session actor
//!
//! The client has no lifecycle of its own beyond its session: dropping the
//! handle closes the command channel, which ends the writer task; the reader
//! ends when the upstream socket closes or errors.

use actix::{Message, Recipient};
use anyhow::{anyhow, Result};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::{connect_async, tungstenite::Message as WsMessage};
use tracing::{debug, warn};

use crate::session::Language;
use crate::upstream::messages::{AudioFormat, Inbound, Outbound, TranscriptionConfig};

const CONNECT_TIMEOUT_SECS: u64 = 10;

/// Events the upstream connection delivers to its owning session.
#[derive(Debug, Message)]
#[rtype(result = "()")]
pub enum UpstreamEvent {
    /// The upstream socket is open and `StartRecognition` has been sent.
    Open(UpstreamHandle),
    /// Establishing the upstream connection failed before it opened.
    SetupFailed(String),
    /// The upstream acknowledged the recognition session.
    RecognitionStarted,
    /// A provisional transcript of the audio received so far.
    Partial(String),
    /// A finalized, non-revisable transcript segment.
    Final(String),
    /// Non-fatal upstream warning; the session stays open.
    Warning(String),
    /// Application-level upstream error; the session stays open.
    Error {
        reason: String,
        detail: serde_json::Value,
    },
    /// The upstream closed its side of the socket.
    Disconnected {
        code: Option<u16>,
        reason: Option<String>,
    },
    /// The upstream socket failed at the transport level.
    TransportError(String),
}

#[derive(Debug)]
pub(crate) enum UpstreamCommand {
    Audio(Vec<u8>),
    EndOfStream,
    Close,
}

/// Sending half of an established upstream connection, owned by one session.
#[derive(Debug)]
pub struct UpstreamHandle {
    tx: mpsc::UnboundedSender<UpstreamCommand>,
}

impl UpstreamHandle {
    /// Forward one binary audio chunk. Returns false if the connection
    /// task has already ended.
    pub fn send_audio(&self, data: Vec<u8>) -> bool {
        self.tx.send(UpstreamCommand::Audio(data)).is_ok()
    }

    /// Signal that no further audio will be sent, requesting final results.
    pub fn end_of_stream(&self) {
        let _ = self.tx.send(UpstreamCommand::EndOfStream);
    }

    /// Close the upstream socket.
    pub fn close(&self) {
        let _ = self.tx.send(UpstreamCommand::Close);
    }

    #[cfg(test)]
    pub(crate) fn channel_for_tests() -> (Self, mpsc::UnboundedReceiver<UpstreamCommand>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[cfg(test)]
impl UpstreamCommand {
    pub(crate) fn is_audio(&self) -> bool {
        matches!(self, UpstreamCommand::Audio(_))
    }

    pub(crate) fn is_end_of_stream(&self) -> bool {
        matches!(self, UpstreamCommand::EndOfStream)
    }
}

/// Open an upstream recognition session.
///
/// On success the socket is open, `StartRecognition` has been sent, and the
/// reader/writer tasks are running; subsequent events arrive at `events`.
/// Any failure before that point is returned synchronously so the session
/// can report it to the client and close.
pub async fn connect(
    url: &str,
    api_key: &str,
    language: Language,
    max_delay: f32,
    events: Recipient<UpstreamEvent>,
) -> Result<UpstreamHandle> {
    let mut request = url
        .into_client_request()
        .map_err(|e| anyhow!("Invalid upstream URL {}: {}", url, e))?;
    request.headers_mut().insert(
        AUTHORIZATION,
        HeaderValue::from_str(&format!("Bearer {}", api_key))
            .map_err(|e| anyhow!("Invalid API key header: {}", e))?,
    );

    let (stream, _) = timeout(
        std::time::Duration::from_secs(CONNECT_TIMEOUT_SECS),
        connect_async(request),
    )
    .await
    .map_err(|_| anyhow!("Timed out while connecting to the transcription service"))?
    .map_err(|e| anyhow!("Failed to connect to the transcription service: {}", e))?;

    let (mut write, read) = stream.split();

    let start = Outbound::StartRecognition {
        audio_format: AudioFormat::default(),
        transcription_config: TranscriptionConfig::new(language, max_delay),
    };
    let payload = serde_json::to_string(&start)?;
    write
        .send(WsMessage::Text(payload))
        .await
        .map_err(|e| anyhow!("Failed to send StartRecognition: {}", e))?;

    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(run_writer(write, rx));
    tokio::spawn(run_reader(read, events));

    Ok(UpstreamHandle { tx })
}

/// Consumes session commands and writes them to the upstream socket.
/// Tracks the audio chunk count so `EndOfStream` can report `last_seq_no`.
async fn run_writer<S>(mut write: S, mut rx: mpsc::UnboundedReceiver<UpstreamCommand>)
where
    S: SinkExt<WsMessage> + Unpin,
    S::Error: std::fmt::Display,
{
    let mut seq_no: u64 = 0;

    while let Some(command) = rx.recv().await {
        match command {
            UpstreamCommand::Audio(data) => {
                seq_no += 1;
                if let Err(e) = write.send(WsMessage::Binary(data)).await {
                    warn!("upstream audio write failed after {} chunks: {}", seq_no, e);
                    return;
                }
            }
            UpstreamCommand::EndOfStream => {
                let msg = Outbound::EndOfStream { last_seq_no: seq_no };
                match serde_json::to_string(&msg) {
                    Ok(payload) => {
                        if let Err(e) = write.send(WsMessage::Text(payload)).await {
                            warn!("upstream EndOfStream write failed: {}", e);
                            return;
                        }
                        debug!("sent EndOfStream, last_seq_no={}", seq_no);
                    }
                    Err(e) => warn!("failed to encode EndOfStream: {}", e),
                }
            }
            UpstreamCommand::Close => {
                let _ = write.send(WsMessage::Close(None)).await;
                return;
            }
        }
    }

    // The command channel closed without an explicit Close, meaning the
    // owning session is gone. Close the socket anyway so the reader is not
    // left waiting for the provider's idle timeout.
    let _ = write.send(WsMessage::Close(None)).await;
}

/// Decodes upstream frames into events for the owning session. Ends when the
/// upstream socket closes or errors; exactly one terminal event is delivered.
async fn run_reader<S>(mut read: S, events: Recipient<UpstreamEvent>)
where
    S: StreamExt<Item = Result<WsMessage, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    while let Some(frame) = read.next().await {
        match frame {
            Ok(WsMessage::Text(text)) => dispatch(&text, &events),
            Ok(WsMessage::Close(frame)) => {
                let (code, reason) = match frame {
                    Some(f) => (Some(u16::from(f.code)), Some(f.reason.to_string())),
                    None => (None, None),
                };
                events.do_send(UpstreamEvent::Disconnected { code, reason });
                return;
            }
            Ok(_) => {
                // Binary, ping, and pong frames carry nothing we relay.
            }
            Err(e) => {
                events.do_send(UpstreamEvent::TransportError(e.to_string()));
                return;
            }
        }
    }

    // Stream ended without a close frame.
    events.do_send(UpstreamEvent::Disconnected { code: None, reason: None });
}

/// Normalize one upstream text frame into a session event.
fn dispatch(text: &str, events: &Recipient<UpstreamEvent>) {
    let inbound: Inbound = match serde_json::from_str(text) {
        Ok(msg) => msg,
        Err(e) => {
            warn!("undecodable upstream message ignored: {}", e);
            return;
        }
    };

    match inbound {
        Inbound::RecognitionStarted { id } => {
            debug!("upstream recognition started, id={:?}", id);
            events.do_send(UpstreamEvent::RecognitionStarted);
        }
        Inbound::AddPartialTranscript { metadata } => {
            events.do_send(UpstreamEvent::Partial(metadata.transcript));
        }
        Inbound::AddTranscript { metadata } => {
            events.do_send(UpstreamEvent::Final(metadata.transcript));
        }
        Inbound::Warning { reason } => {
            warn!("upstream warning: {}", reason);
            events.do_send(UpstreamEvent::Warning(reason));
        }
        Inbound::Error { kind, reason } => {
            // Application-level errors do not close the pair; the raw payload
            // travels with the event so the client sees the full detail.
            warn!("upstream error ({}): {}", kind, reason);
            let detail = serde_json::from_str(text).unwrap_or(serde_json::Value::Null);
            events.do_send(UpstreamEvent::Error { reason, detail });
        }
        Inbound::AudioAdded { seq_no } => {
            debug!("upstream acknowledged audio chunk {}", seq_no);
        }
        Inbound::Info { reason } => {
            debug!("upstream info: {}", reason);
        }
        Inbound::EndOfTranscript => {
            debug!("upstream end of transcript");
        }
        Inbound::Unknown => {
            debug!("unrecognized upstream message kind ignored");
        }
    }
}
