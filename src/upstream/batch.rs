//! # Upstream Batch Job Client
//!
//! Stateless request/response/poll cycle against the Speechmatics batch job
//! API: create a transcription job from an uploaded file, poll its status
//! until it reaches a terminal state, then fetch the transcript.
//!
//! ## Failure policy:
//! - Transient call failures (connection errors, upstream 5xx) are retried
//!   with capped exponential backoff up to a fixed attempt budget
//! - A job that reports a failed status surfaces the upstream detail
//! - A job that never reaches a terminal state within the poll budget
//!   surfaces as a timeout

use reqwest::multipart;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::AppConfig;
use crate::error::{AppError, AppResult};
use crate::session::Language;

const CONNECT_TIMEOUT_SECS: u64 = 10;
const REQUEST_TIMEOUT_SECS: u64 = 300;
const INITIAL_RETRY_DELAY_MS: u64 = 500;
const MAX_RETRY_DELAY_MS: u64 = 5000;

#[derive(Debug, Deserialize)]
struct JobCreateResponse {
    id: String,
}

#[derive(Debug, Deserialize)]
struct JobStatusResponse {
    job: JobDetails,
}

#[derive(Debug, Deserialize)]
struct JobDetails {
    status: String,
    #[serde(default)]
    errors: Option<serde_json::Value>,
}

/// Client for the upstream batch transcription API.
pub struct BatchClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    poll_interval: Duration,
    max_poll_attempts: u32,
    max_retries: u32,
}

impl BatchClient {
    pub fn new(config: &AppConfig) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            http,
            base_url: config.speechmatics.batch_api_url.trim_end_matches('/').to_string(),
            api_key: config.speechmatics.api_key.clone(),
            poll_interval: Duration::from_millis(config.batch.poll_interval_ms),
            max_poll_attempts: config.batch.max_poll_attempts,
            max_retries: config.batch.max_retries.max(1),
        })
    }

    /// Run the full job cycle: create, poll to completion, fetch transcript.
    ///
    /// ## Returns:
    /// The upstream transcript object, passed through verbatim.
    pub async fn transcribe(
        &self,
        audio: &[u8],
        file_name: &str,
        language: Language,
    ) -> AppResult<serde_json::Value> {
        let job_id = self
            .with_retry("create transcription job", || {
                self.create_job(audio, file_name, language)
            })
            .await?;
        debug!("created transcription job {}", job_id);

        self.wait_for_completion(&job_id).await?;

        self.with_retry("fetch transcript", || self.fetch_transcript(&job_id))
            .await
    }

    async fn create_job(
        &self,
        audio: &[u8],
        file_name: &str,
        language: Language,
    ) -> AppResult<String> {
        let job_config = json!({
            "type": "transcription",
            "transcription_config": {
                "language": language.code(),
                "operating_point": "enhanced",
            }
        });

        let part = multipart::Part::bytes(audio.to_vec())
            .file_name(file_name.to_string())
            .mime_str("application/octet-stream")?;
        let form = multipart::Form::new()
            .part("data_file", part)
            .text("config", job_config.to_string());

        let response = self
            .http
            .post(format!("{}/jobs", self.base_url))
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Upstream {
                status,
                message: "Failed to create transcription job".to_string(),
                details: body,
            });
        }

        let payload: JobCreateResponse = response.json().await?;
        Ok(payload.id)
    }

    /// Poll the job until it reaches a terminal state.
    async fn wait_for_completion(&self, job_id: &str) -> AppResult<()> {
        for attempt in 0..self.max_poll_attempts {
            let details = self
                .with_retry("poll job status", || self.fetch_status(job_id))
                .await?;

            match details.status.as_str() {
                "done" => {
                    debug!("job {} done after {} polls", job_id, attempt + 1);
                    return Ok(());
                }
                "rejected" | "failed" | "deleted" | "expired" => {
                    let detail = details
                        .errors
                        .map(|e| e.to_string())
                        .unwrap_or_else(|| format!("job reported status '{}'", details.status));
                    return Err(AppError::Upstream {
                        status: 500,
                        message: "Transcription job failed".to_string(),
                        details: detail,
                    });
                }
                other => {
                    debug!("job {} status '{}', waiting", job_id, other);
                    tokio::time::sleep(self.poll_interval).await;
                }
            }
        }

        Err(AppError::Timeout(format!(
            "Job {} did not complete within {} poll attempts",
            job_id, self.max_poll_attempts
        )))
    }

    async fn fetch_status(&self, job_id: &str) -> AppResult<JobDetails> {
        let response = self
            .http
            .get(format!("{}/jobs/{}", self.base_url, job_id))
            .bearer_auth(&self.api_key)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Upstream {
                status,
                message: "Failed to check job status".to_string(),
                details: body,
            });
        }

        let payload: JobStatusResponse = response.json().await?;
        Ok(payload.job)
    }

    async fn fetch_transcript(&self, job_id: &str) -> AppResult<serde_json::Value> {
        let response = self
            .http
            .get(format!("{}/jobs/{}/transcript", self.base_url, job_id))
            .query(&[("format", "json-v2")])
            .bearer_auth(&self.api_key)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Upstream {
                status,
                message: "Failed to fetch transcript".to_string(),
                details: body,
            });
        }

        let transcript = response.json().await?;
        Ok(transcript)
    }

    /// Retry a call with capped exponential backoff. Only transient failures
    /// are retried; client-side 4xx responses surface immediately.
    async fn with_retry<F, Fut, T>(&self, operation_name: &str, mut operation: F) -> AppResult<T>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = AppResult<T>>,
    {
        let mut delay = Duration::from_millis(INITIAL_RETRY_DELAY_MS);

        for attempt in 0..self.max_retries {
            match operation().await {
                Ok(result) => return Ok(result),
                Err(err) if attempt + 1 < self.max_retries && is_transient(&err) => {
                    warn!(
                        "{} attempt {}/{} failed: {}. Retrying in {:?}",
                        operation_name,
                        attempt + 1,
                        self.max_retries,
                        err,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    delay = std::cmp::min(delay * 2, Duration::from_millis(MAX_RETRY_DELAY_MS));
                }
                Err(err) => return Err(err),
            }
        }

        unreachable!("retry loop always returns")
    }
}

/// Connection-level failures and upstream 5xx responses are worth retrying;
/// anything else is terminal.
fn is_transient(err: &AppError) -> bool {
    match err {
        AppError::Internal(_) => true,
        AppError::Upstream { status, .. } => *status >= 500,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::{web, App, HttpResponse, HttpServer};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_transient_classification() {
        assert!(is_transient(&AppError::Internal("connection reset".into())));
        assert!(is_transient(&AppError::Upstream {
            status: 503,
            message: "unavailable".into(),
            details: String::new(),
        }));
        assert!(!is_transient(&AppError::Upstream {
            status: 401,
            message: "unauthorized".into(),
            details: String::new(),
        }));
        assert!(!is_transient(&AppError::BadRequest("nope".into())));
    }

    /// Full job cycle against a local mock of the batch API: the job reports
    /// `running` on the first poll and `done` on the second, then the
    /// transcript is fetched and passed through verbatim.
    #[actix_web::test]
    async fn test_job_cycle_polls_until_done() {
        let polls = Arc::new(AtomicU32::new(0));
        let polls_for_server = polls.clone();

        let server = HttpServer::new(move || {
            let polls = polls_for_server.clone();
            App::new()
                .route(
                    "/jobs",
                    web::post().to(|| async {
                        HttpResponse::Ok().json(serde_json::json!({ "id": "job-1" }))
                    }),
                )
                .route(
                    "/jobs/job-1",
                    web::get().to(move || {
                        let polls = polls.clone();
                        async move {
                            let status = if polls.fetch_add(1, Ordering::SeqCst) == 0 {
                                "running"
                            } else {
                                "done"
                            };
                            HttpResponse::Ok().json(serde_json::json!({ "job": { "status": status } }))
                        }
                    }),
                )
                .route(
                    "/jobs/job-1/transcript",
                    web::get().to(|| async {
                        HttpResponse::Ok()
                            .json(serde_json::json!({ "format": "2.9", "results": [] }))
                    }),
                )
        })
        .workers(1)
        .bind(("127.0.0.1", 0))
        .unwrap();

        let addr = server.addrs()[0];
        tokio::spawn(server.run());

        let mut config = AppConfig::default();
        config.speechmatics.api_key = "test-key".to_string();
        config.speechmatics.batch_api_url = format!("http://{}", addr);
        config.batch.poll_interval_ms = 10;
        let client = BatchClient::new(&config).unwrap();

        let transcript = client
            .transcribe(&[0u8, 1, 2, 3], "clip.wav", Language::English)
            .await
            .unwrap();

        assert_eq!(transcript["format"], "2.9");
        assert_eq!(polls.load(Ordering::SeqCst), 2);
    }
}
