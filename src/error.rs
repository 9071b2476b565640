use thiserror::Error;

/// Failures from the source-system API that callers need to tell apart:
/// an expired token is refreshed and retried once, a rate limit is slept
/// through, everything else aborts the current domain cycle.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("access token expired or rejected by the source API")]
    AuthExpired,
    #[error("source API rate limited the request (retry after {retry_after_secs}s)")]
    RateLimited { retry_after_secs: u64 },
    #[error("source API request failed with status {status}: {body}")]
    Http { status: u16, body: String },
}
