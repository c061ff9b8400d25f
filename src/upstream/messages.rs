//! # Realtime Wire Vocabulary
//!
//! Typed representations of the Speechmatics realtime protocol. Every frame
//! in both directions is JSON with a `message` field naming its kind.
//!
//! ## Relay → Upstream:
//! - `StartRecognition`: opens a recognition session; carries the audio
//!   format descriptor and the transcription configuration
//! - `EndOfStream`: no further audio will be sent; requests final results
//!
//! ## Upstream → Relay:
//! Recognition lifecycle acknowledgments, partial/final transcript segments,
//! warnings, and application-level errors. Message kinds this build does not
//! know about decode as `Unknown` and are ignored (forward compatibility).

use serde::{Deserialize, Serialize};

use crate::session::Language;

/// Audio format descriptor sent with `StartRecognition`.
///
/// The relay accepts exactly one input format: raw PCM, signed 16-bit
/// little-endian samples at 16 kHz.
#[derive(Debug, Clone, Serialize)]
pub struct AudioFormat {
    #[serde(rename = "type")]
    pub format_type: &'static str,
    pub encoding: &'static str,
    pub sample_rate: u32,
}

impl Default for AudioFormat {
    fn default() -> Self {
        Self {
            format_type: "raw",
            encoding: "pcm_s16le",
            sample_rate: 16_000,
        }
    }
}

/// Transcription configuration sent with `StartRecognition`.
#[derive(Debug, Clone, Serialize)]
pub struct TranscriptionConfig {
    pub language: &'static str,
    pub diarization: &'static str,
    pub operating_point: &'static str,
    pub enable_partials: bool,
    pub max_delay: f32,
}

impl TranscriptionConfig {
    pub fn new(language: Language, max_delay: f32) -> Self {
        Self {
            language: language.code(),
            diarization: "none",
            operating_point: "enhanced",
            enable_partials: true,
            max_delay,
        }
    }
}

/// Control messages the relay sends upstream.
#[derive(Debug, Serialize)]
#[serde(tag = "message")]
pub enum Outbound {
    StartRecognition {
        audio_format: AudioFormat,
        transcription_config: TranscriptionConfig,
    },
    /// `last_seq_no` is the count of audio chunks sent, per the upstream contract.
    EndOfStream { last_seq_no: u64 },
}

/// Transcript text carried by partial and final transcript messages.
#[derive(Debug, Clone, Deserialize)]
pub struct TranscriptMetadata {
    #[serde(default)]
    pub transcript: String,
}

/// Control messages the upstream sends the relay.
#[derive(Debug, Deserialize)]
#[serde(tag = "message")]
pub enum Inbound {
    RecognitionStarted {
        #[serde(default)]
        id: Option<String>,
    },
    AddPartialTranscript {
        metadata: TranscriptMetadata,
    },
    AddTranscript {
        metadata: TranscriptMetadata,
    },
    AudioAdded {
        seq_no: u64,
    },
    Warning {
        #[serde(default)]
        reason: String,
    },
    Error {
        #[serde(rename = "type", default)]
        kind: String,
        #[serde(default)]
        reason: String,
    },
    Info {
        #[serde(default)]
        reason: String,
    },
    EndOfTranscript,
    /// Any message kind this build does not recognize.
    #[serde(other)]
    Unknown,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_recognition_wire_format() {
        let msg = Outbound::StartRecognition {
            audio_format: AudioFormat::default(),
            transcription_config: TranscriptionConfig::new(Language::English, 2.0),
        };
        let json: serde_json::Value =
            serde_json::from_str(&serde_json::to_string(&msg).unwrap()).unwrap();

        assert_eq!(json["message"], "StartRecognition");
        assert_eq!(json["audio_format"]["type"], "raw");
        assert_eq!(json["audio_format"]["encoding"], "pcm_s16le");
        assert_eq!(json["audio_format"]["sample_rate"], 16_000);
        assert_eq!(json["transcription_config"]["language"], "en");
        assert_eq!(json["transcription_config"]["diarization"], "none");
        assert_eq!(json["transcription_config"]["operating_point"], "enhanced");
        assert_eq!(json["transcription_config"]["enable_partials"], true);
    }

    #[test]
    fn test_end_of_stream_carries_seq_no() {
        let msg = Outbound::EndOfStream { last_seq_no: 42 };
        let json: serde_json::Value =
            serde_json::from_str(&serde_json::to_string(&msg).unwrap()).unwrap();
        assert_eq!(json["message"], "EndOfStream");
        assert_eq!(json["last_seq_no"], 42);
    }

    #[test]
    fn test_parse_add_partial_transcript() {
        let raw = r#"{"message":"AddPartialTranscript","metadata":{"transcript":"hello"},"results":[]}"#;
        match serde_json::from_str::<Inbound>(raw).unwrap() {
            Inbound::AddPartialTranscript { metadata } => assert_eq!(metadata.transcript, "hello"),
            other => panic!("wrong message kind: {:?}", other),
        }
    }

    #[test]
    fn test_parse_add_transcript_with_missing_text() {
        // The transcript field may be absent; it defaults to an empty string.
        let raw = r#"{"message":"AddTranscript","metadata":{}}"#;
        match serde_json::from_str::<Inbound>(raw).unwrap() {
            Inbound::AddTranscript { metadata } => assert_eq!(metadata.transcript, ""),
            other => panic!("wrong message kind: {:?}", other),
        }
    }

    #[test]
    fn test_parse_error_message() {
        let raw = r#"{"message":"Error","type":"quota_exceeded","reason":"over quota"}"#;
        match serde_json::from_str::<Inbound>(raw).unwrap() {
            Inbound::Error { kind, reason } => {
                assert_eq!(kind, "quota_exceeded");
                assert_eq!(reason, "over quota");
            }
            other => panic!("wrong message kind: {:?}", other),
        }
    }

    #[test]
    fn test_unrecognized_message_kind_decodes_as_unknown() {
        let raw = r#"{"message":"SomeFutureThing","payload":{"x":1}}"#;
        assert!(matches!(
            serde_json::from_str::<Inbound>(raw).unwrap(),
            Inbound::Unknown
        ));
    }
}
