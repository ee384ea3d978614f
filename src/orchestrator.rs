//! Submission and background processing of summarization jobs.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tracing::{error, info, info_span, warn, Instrument};

use crate::error::{Error, Result, SummarizationError};
use crate::extract::{parse_http_url, ExtractedText, ExtractionMode, TextExtractor};
use crate::jobs::JobRegistry;
use crate::preview::{extractive_preview, PREVIEW_SENTENCES};
use crate::summarize::Summarizer;
use crate::types::{Job, JobStatus, SubmitResponse, SummaryPayload};

/// Owns the submit/poll workflow. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct SummaryService {
    registry: JobRegistry,
    extractor: Arc<TextExtractor>,
    summarizer: Arc<dyn Summarizer>,
}

impl SummaryService {
    pub fn new(
        registry: JobRegistry,
        extractor: Arc<TextExtractor>,
        summarizer: Arc<dyn Summarizer>,
    ) -> Self {
        Self {
            registry,
            extractor,
            summarizer,
        }
    }

    pub fn registry(&self) -> &JobRegistry {
        &self.registry
    }

    pub fn extractor(&self) -> &TextExtractor {
        &self.extractor
    }

    /// Validate, extract a preview synchronously, register a job and schedule
    /// the full pipeline. Returns as soon as the job exists.
    pub async fn submit(&self, url: &str) -> Result<SubmitResponse> {
        let url = validate_url(url)?;
        info!("Summarization requested for {}", url);

        let extracted = self.extract_for_submission(&url).await?;
        let preview = extractive_preview(&extracted.body, PREVIEW_SENTENCES);

        let job = self.registry.create(&url, Some(preview.clone())).await;
        info!("Job {} created for {}", job.id, url);
        self.spawn_processing(job.id.clone(), job.url.clone());

        Ok(SubmitResponse {
            job_id: job.id,
            fast_summary: preview,
            status: JobStatus::Pending,
        })
    }

    pub async fn status(&self, job_id: &str) -> Result<Job> {
        Ok(self.registry.get(job_id.trim()).await?)
    }

    /// Fast first; one full attempt if that fails. No job exists unless one succeeds.
    async fn extract_for_submission(&self, url: &str) -> Result<ExtractedText> {
        match self.extractor.extract(url, ExtractionMode::Fast).await {
            Ok(extracted) => Ok(extracted),
            Err(fast_err) => {
                warn!(
                    "Fast extraction failed for {} ({}); trying full extraction",
                    url, fast_err
                );
                self.extractor
                    .extract(url, ExtractionMode::Full)
                    .await
                    .map_err(Error::from)
            }
        }
    }

    fn spawn_processing(&self, job_id: String, url: String) {
        let service = self.clone();
        let span = info_span!("summarization_job", job_id = %job_id, url = %url);
        tokio::spawn(
            async move {
                service.process_job(&job_id).await;
            }
            .instrument(span),
        );
    }

    /// Drive one job from `pending` to `done` or `failed`.
    ///
    /// Only the caller that wins the `pending -> processing` transition runs
    /// the pipeline, so repeated calls for the same job are no-ops.
    pub async fn process_job(&self, job_id: &str) {
        let job = match self.registry.mark_processing(job_id).await {
            Ok(job) => job,
            Err(e) => {
                warn!("Not processing job {}: {}", job_id, e);
                return;
            }
        };

        let outcome = AssertUnwindSafe(self.run_pipeline(&job.url))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| {
                Err(format!(
                    "internal error: summarization task panicked: {}",
                    panic_message(panic.as_ref())
                ))
            });

        let recorded = match outcome {
            Ok(payload) => {
                info!("Job {} done", job_id);
                self.registry.complete(job_id, payload).await
            }
            Err(message) => {
                error!("Job {} failed: {}", job_id, message);
                self.registry.fail(job_id, message).await
            }
        };
        if let Err(e) = recorded {
            error!("Could not record outcome for job {}: {}", job_id, e);
        }
    }

    /// Full extraction (fast as fallback), then one summarization attempt.
    async fn run_pipeline(&self, url: &str) -> std::result::Result<SummaryPayload, String> {
        let extracted = match self.extractor.extract(url, ExtractionMode::Full).await {
            Ok(extracted) => extracted,
            Err(full_err) => {
                warn!(
                    "Full extraction failed for {} ({}); falling back to fast extraction",
                    url, full_err
                );
                self.extractor
                    .extract(url, ExtractionMode::Fast)
                    .await
                    .map_err(|_| Error::from(full_err).to_string())?
            }
        };

        let payload = self
            .summarizer
            .summarize(&extracted.text(), Some(extracted.language.as_str()))
            .await
            .map_err(|e| Error::from(e).to_string())?;

        if payload.is_empty() {
            return Err(Error::from(SummarizationError::EmptyResponse).to_string());
        }
        Ok(payload)
    }
}

/// Accept non-empty http(s) URLs that parse as absolute URLs.
pub fn validate_url(url: &str) -> Result<String> {
    let url = url.trim();
    if url.is_empty() {
        return Err(Error::Validation("url is required".to_string()));
    }
    let lower = url.to_ascii_lowercase();
    if !lower.starts_with("http://") && !lower.starts_with("https://") {
        return Err(Error::Validation(
            "url must start with http:// or https://".to_string(),
        ));
    }
    parse_http_url(url).map_err(|e| Error::Validation(e.to_string()))?;
    Ok(url.to_string())
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
