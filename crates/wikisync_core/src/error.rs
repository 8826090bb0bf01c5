//! Typed failures surfaced by the remote client, the AI client and the session.

use thiserror::Error;

/// Every remote call collapses into exactly one of these.
#[derive(Error, Debug)]
pub enum RemoteError {
    /// Network, DNS or relay unreachable. Carries whatever the transport raised.
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    /// Non-2xx response.
    #[error("{status} {status_text}{}", detail_suffix(.detail))]
    HttpStatus {
        status: u16,
        status_text: String,
        detail: Option<String>,
    },

    /// 2xx response whose body is not the expected JSON shape.
    #[error("failed to decode {context} response: {source}")]
    Decode {
        context: &'static str,
        #[source]
        source: serde_json::Error,
    },

    /// Base, relay or slug could not form a request URL.
    #[error("invalid request URL: {0}")]
    InvalidUrl(String),
}

impl RemoteError {
    pub fn status(&self) -> Option<u16> {
        match self {
            RemoteError::HttpStatus { status, .. } => Some(*status),
            _ => None,
        }
    }
}

#[derive(Error, Debug)]
pub enum AiError {
    /// Any failure from the transform service, reported with one generic message.
    #[error("Failed to process AI request. Please try again.")]
    RequestFailed {
        #[source]
        source: anyhow::Error,
    },

    #[error("no AI API key configured (set GEMINI_API_KEY or API_KEY)")]
    MissingApiKey,
}

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("no active page to save")]
    NoActivePage,

    #[error(transparent)]
    Remote(#[from] RemoteError),
}

fn detail_suffix(detail: &Option<String>) -> String {
    match detail.as_deref() {
        Some(detail) if !detail.is_empty() => format!(" - {detail}"),
        _ => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_error_display_without_detail() {
        let err = RemoteError::HttpStatus {
            status: 404,
            status_text: "Not Found".to_string(),
            detail: None,
        };
        assert_eq!(err.to_string(), "404 Not Found");
        assert_eq!(err.status(), Some(404));
    }

    #[test]
    fn status_error_display_appends_detail() {
        let err = RemoteError::HttpStatus {
            status: 403,
            status_text: "Forbidden".to_string(),
            detail: Some("403 Forbidden".to_string()),
        };
        assert_eq!(err.to_string(), "403 Forbidden - 403 Forbidden");
    }

    #[test]
    fn ai_failure_hides_the_underlying_cause_in_display() {
        let err = AiError::RequestFailed {
            source: anyhow::anyhow!("socket closed"),
        };
        assert_eq!(
            err.to_string(),
            "Failed to process AI request. Please try again."
        );
        assert!(std::error::Error::source(&err).is_some());
    }
}
