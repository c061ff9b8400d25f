//! # Batch Transcription Endpoint
//!
//! Accepts a complete audio file as a multipart upload, runs it through the
//! upstream batch job API, and returns the transcript in one response.
//!
//! ## Request format:
//! `POST /api/transcribe` with `multipart/form-data`:
//! - `file` (required): the audio file; content type must be `audio/*`
//! - `language` (optional): ISO language code; unsupported or missing
//!   codes resolve to the default language
//!
//! ## Response format:
//! `200 OK` with `{"transcript": <upstream json-v2 transcript object>}`.

use actix_multipart::Multipart;
use actix_web::{web, HttpResponse};
use futures_util::StreamExt;
use serde_json::json;
use tracing::{info, warn};

use crate::error::{AppError, AppResult};
use crate::session::Language;
use crate::state::AppState;

/// Uploads past this size are refused outright rather than relayed upstream.
const MAX_UPLOAD_BYTES: usize = 100 * 1024 * 1024;

/// POST /api/transcribe
pub async fn transcribe_file(
    mut payload: Multipart,
    state: web::Data<AppState>,
) -> AppResult<HttpResponse> {
    let mut audio: Option<Vec<u8>> = None;
    let mut file_name = "audio".to_string();
    let mut language = Language::default();

    while let Some(field) = payload.next().await {
        let mut field = field?;

        match field.name().unwrap_or("") {
            "file" => {
                require_audio_content_type(field.content_type().map(|m| m.essence_str()))?;

                if let Some(name) = field.content_disposition().and_then(|cd| cd.get_filename()) {
                    file_name = name.to_string();
                }

                let mut data = Vec::new();
                while let Some(chunk) = field.next().await {
                    let chunk = chunk?;
                    if data.len() + chunk.len() > MAX_UPLOAD_BYTES {
                        return Err(AppError::PayloadTooLarge(format!(
                            "Audio upload exceeds the {} MB limit",
                            MAX_UPLOAD_BYTES / (1024 * 1024)
                        )));
                    }
                    data.extend_from_slice(&chunk);
                }
                audio = Some(data);
            }
            "language" => {
                let mut raw = Vec::new();
                while let Some(chunk) = field.next().await {
                    raw.extend_from_slice(&chunk?);
                }
                let code = String::from_utf8_lossy(&raw).trim().to_string();
                language = Language::resolve(Some(&code));
            }
            other => {
                // Unknown form fields are drained and ignored.
                warn!("ignoring unexpected multipart field '{}'", other);
                while field.next().await.is_some() {}
            }
        }
    }

    let audio = audio.ok_or_else(|| {
        AppError::BadRequest("Missing 'file' field in multipart upload".to_string())
    })?;
    if audio.is_empty() {
        return Err(AppError::BadRequest("Uploaded audio file is empty".to_string()));
    }

    info!(
        "batch transcription request: file='{}', {} bytes, language={}",
        file_name,
        audio.len(),
        language.code()
    );

    let transcript = state.batch.transcribe(&audio, &file_name, language).await?;

    Ok(HttpResponse::Ok().json(json!({ "transcript": transcript })))
}

/// The `file` part must declare an `audio/*` content type. An upload that
/// omits the declaration is rejected the same way as one with a wrong type.
fn require_audio_content_type(content_type: Option<&str>) -> AppResult<()> {
    match content_type {
        Some(ct) if ct.starts_with("audio/") => Ok(()),
        Some(ct) => Err(AppError::UnsupportedMedia(format!(
            "Expected an audio/* upload, got {}",
            ct
        ))),
        None => Err(AppError::UnsupportedMedia(
            "Audio upload must declare an audio/* content type".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_audio_content_types_accepted() {
        assert!(require_audio_content_type(Some("audio/wav")).is_ok());
        assert!(require_audio_content_type(Some("audio/mpeg")).is_ok());
    }

    #[test]
    fn test_non_audio_content_type_rejected() {
        assert!(matches!(
            require_audio_content_type(Some("text/plain")),
            Err(AppError::UnsupportedMedia(_))
        ));
        assert!(matches!(
            require_audio_content_type(Some("application/octet-stream")),
            Err(AppError::UnsupportedMedia(_))
        ));
    }

    #[test]
    fn test_missing_content_type_rejected() {
        assert!(matches!(
            require_audio_content_type(None),
            Err(AppError::UnsupportedMedia(_))
        ));
    }
}
