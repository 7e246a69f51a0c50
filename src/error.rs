use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use thiserror::Error;

/// Everything that can go wrong while polling one feed.
///
/// Display strings are shown verbatim to the user as the pipeline's
/// connection error, so they stay short and free of wire-level detail.
/// The underlying cause is kept in the variant payload for logging.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FeedError {
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("No password stored for user \"{0}\".")]
    MissingCredential(String),

    #[error("Could not connect to the server.")]
    Connection(String),

    #[error("The server responded: {}.", status_text(.0))]
    HttpStatus(u16),

    #[error("Could not read the server response: {0}")]
    MalformedPayload(String),

    #[error("The server did not provide a status for this pipeline.")]
    NoStatusAvailable,

    #[error("Rate limited until {resume_at}")]
    RateLimited { resume_at: DateTime<Utc> },
}

fn status_text(code: &u16) -> String {
    StatusCode::from_u16(*code)
        .ok()
        .and_then(|s| s.canonical_reason())
        .map_or_else(|| format!("HTTP {code}"), ToString::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_feed_error_messages_are_user_legible() {
        assert_eq!(
            FeedError::Connection("tcp connect error".into()).to_string(),
            "Could not connect to the server."
        );
        assert_eq!(
            FeedError::HttpStatus(404).to_string(),
            "The server responded: Not Found."
        );
        assert_eq!(
            FeedError::NoStatusAvailable.to_string(),
            "The server did not provide a status for this pipeline."
        );
    }

    #[test]
    fn test_unknown_http_status_falls_back_to_code() {
        assert_eq!(
            FeedError::HttpStatus(599).to_string(),
            "The server responded: HTTP 599."
        );
    }
}
