//! Error taxonomy for the audit pipeline.
//!
//! Only [`AuditError::StageFailure`] ever propagates out of the pipeline
//! controller into a `Project`'s `status`/`progress.error`. Every other
//! variant is captured inside the result record of the stage that produced
//! it (a `ProbeResult.error`, a `MobileTestResult` viewport `error`, ...) and
//! never aborts the run.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AuditError {
    /// Malformed XML/CSV, or a sitemap document with neither `urlset` nor
    /// `sitemapindex` as its root element.
    #[error("input format error in {source_name}: {reason}")]
    InputFormat { source_name: String, reason: String },

    /// Network timeout, DNS failure, or connection reset while probing a
    /// URL. Captured as `ProbeResult { status_code: 0, .. }`; never
    /// surfaces past the probe batch that produced it.
    #[error("transport failure fetching {url}: {reason}")]
    TransportFailure { url: String, reason: String },

    /// Non-2xx, non-5xx HTTP response captured as a `ProbeResult`.
    #[error("http {status} from {url}")]
    HttpClientError { url: String, status: u16 },

    /// 5xx HTTP response captured as a `ProbeResult`; subject to retry.
    #[error("http {status} from {url}")]
    HttpServerError { url: String, status: u16 },

    /// Headless navigation timeout or crash. Per-URL, batch continues.
    #[error("render failure for {url}: {reason}")]
    RenderFailure { url: String, reason: String },

    /// An uncaught failure inside a pipeline stage. Aborts the pipeline and
    /// marks the project `failed`.
    #[error("stage '{stage}' failed: {reason}")]
    StageFailure { stage: String, reason: String },
}

pub type Result<T> = std::result::Result<T, AuditError>;

impl AuditError {
    pub fn stage(stage: impl Into<String>, reason: impl Into<String>) -> Self {
        AuditError::StageFailure {
            stage: stage.into(),
            reason: reason.into(),
        }
    }
}
