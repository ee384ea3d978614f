use axum::http::StatusCode;
use thiserror::Error;

/// Failure of the text-extraction fallback chain (or one of its stages).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ExtractionError {
    #[error("invalid URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("unsupported content type: {0}")]
    UnsupportedContentType(String),
    #[error("failed to fetch URL: {0}")]
    Fetch(String),
    #[error("upstream responded with HTTP {0}")]
    HttpStatus(u16),
    #[error("headless render failed: {0}")]
    Render(String),
    #[error("insufficient text")]
    InsufficientText,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SummarizationError {
    #[error("summarizer credential is not configured (set OPENAI_API_KEY)")]
    MissingCredential,
    #[error("cannot summarize empty text")]
    EmptyInput,
    #[error("completion request failed: {0}")]
    Request(String),
    #[error("completion request timed out")]
    Timeout,
    #[error("completion service responded with HTTP {status}: {body}")]
    UpstreamStatus { status: u16, body: String },
    #[error("completion service returned an empty response")]
    EmptyResponse,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SearchError {
    #[error("search index is throttling requests; retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },
    #[error("search request failed: {0}")]
    Upstream(String),
    #[error("failed to parse search response: {0}")]
    Parse(String),
}

/// Caller-facing error for every boundary operation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum Error {
    #[error("validation error: {0}")]
    Validation(String),
    #[error("extraction error: {0}")]
    Extraction(#[from] ExtractionError),
    #[error("summarization error: {0}")]
    Summarization(#[from] SummarizationError),
    #[error("job not found: {0}")]
    NotFound(String),
    #[error("rate limited; retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },
    #[error("search error: {0}")]
    Search(SearchError),
}

impl From<SearchError> for Error {
    fn from(e: SearchError) -> Self {
        match e {
            SearchError::RateLimited { retry_after_secs } => Error::RateLimited { retry_after_secs },
            other => Error::Search(other),
        }
    }
}

impl Error {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::Validation(_) => StatusCode::BAD_REQUEST,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::Extraction(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Error::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            Error::Summarization(_) | Error::Search(_) => StatusCode::BAD_GATEWAY,
        }
    }

    pub fn retry_after_secs(&self) -> Option<u64> {
        match self {
            Error::RateLimited { retry_after_secs } => Some(*retry_after_secs),
            _ => None,
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            Error::Validation("x".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            Error::from(ExtractionError::InsufficientText).status_code(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            Error::NotFound("abc".into()).status_code(),
            StatusCode::NOT_FOUND
        );
    }

    #[test]
    fn test_search_rate_limit_lifts_to_top_level() {
        let err: Error = SearchError::RateLimited { retry_after_secs: 9 }.into();
        assert_eq!(err.status_code(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(err.retry_after_secs(), Some(9));
    }

    #[test]
    fn test_insufficient_text_message() {
        assert_eq!(ExtractionError::InsufficientText.to_string(), "insufficient text");
    }
}
