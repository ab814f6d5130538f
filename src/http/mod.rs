//! Shared HTTP client and the error type every service client reports.

use reqwest::{Client, Response, StatusCode};
use std::time::Duration;

use crate::config::HttpConfig;
use crate::error::{Classify, ErrorCategory};

/// Build the client used for every external call
pub fn build_client(config: &HttpConfig) -> reqwest::Result<Client> {
    Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs))
        .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
        .user_agent(config.user_agent.as_str())
        .build()
}

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("{service} timed out")]
    Timeout { service: &'static str },

    #[error("could not reach {service}: {message}")]
    Connect { service: &'static str, message: String },

    #[error("{service} returned HTTP {status}: {message}")]
    Status {
        service: &'static str,
        status: u16,
        message: String,
        retry_after: Option<Duration>,
    },

    #[error("{service} returned an unexpected response: {message}")]
    Malformed { service: &'static str, message: String },

    #[error("{service} refused the request: {message}")]
    Rejected { service: &'static str, message: String },
}

impl ServiceError {
    pub fn malformed(service: &'static str, message: impl Into<String>) -> Self {
        ServiceError::Malformed {
            service,
            message: message.into(),
        }
    }

    pub fn rejected(service: &'static str, message: impl Into<String>) -> Self {
        ServiceError::Rejected {
            service,
            message: message.into(),
        }
    }

    /// Map a transport-level reqwest failure
    pub fn from_reqwest(service: &'static str, err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ServiceError::Timeout { service }
        } else if err.is_decode() {
            ServiceError::malformed(service, err.to_string())
        } else if let Some(status) = err.status() {
            ServiceError::Status {
                service,
                status: status.as_u16(),
                message: err.to_string(),
                retry_after: None,
            }
        } else {
            ServiceError::Connect {
                service,
                message: err.to_string(),
            }
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            ServiceError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Category for an HTTP status code
pub fn classify_status(status: u16) -> ErrorCategory {
    match status {
        408 => ErrorCategory::Transient,
        429 => ErrorCategory::RateLimited,
        500..=599 => ErrorCategory::Transient,
        _ => ErrorCategory::Permanent,
    }
}

impl Classify for ServiceError {
    fn category(&self) -> ErrorCategory {
        match self {
            ServiceError::Timeout { .. } | ServiceError::Connect { .. } => ErrorCategory::Transient,
            ServiceError::Status { status, .. } => classify_status(*status),
            ServiceError::Malformed { .. } | ServiceError::Rejected { .. } => ErrorCategory::Permanent,
        }
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            ServiceError::Status { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

/// Parse a `Retry-After` header given in seconds
pub fn parse_retry_after(response: &Response) -> Option<Duration> {
    response
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

/// Pass successful responses through, turn the rest into [`ServiceError::Status`]
pub async fn check_status(service: &'static str, response: Response) -> Result<Response, ServiceError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let retry_after = parse_retry_after(&response);
    let body = response.text().await.unwrap_or_default();
    Err(ServiceError::Status {
        service,
        status: status.as_u16(),
        message: error_message(status, &body),
        retry_after,
    })
}

/// Best-effort extraction of `error.message` from a Google-style JSON error body
pub fn error_message(status: StatusCode, body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| {
            v.pointer("/error/message")
                .or_else(|| v.pointer("/error_description"))
                .or_else(|| v.get("error"))
                .and_then(|m| m.as_str().map(str::to_string))
        })
        .unwrap_or_else(|| {
            let trimmed: String = body.trim().chars().take(200).collect();
            if trimmed.is_empty() {
                status.canonical_reason().unwrap_or("no body").to_string()
            } else {
                trimmed
            }
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status_error(status: u16) -> ServiceError {
        ServiceError::Status {
            service: "test",
            status,
            message: String::new(),
            retry_after: None,
        }
    }

    #[test]
    fn test_status_classification() {
        assert_eq!(status_error(503).category(), ErrorCategory::Transient);
        assert_eq!(status_error(408).category(), ErrorCategory::Transient);
        assert_eq!(status_error(429).category(), ErrorCategory::RateLimited);
        assert_eq!(status_error(403).category(), ErrorCategory::Permanent);
        assert_eq!(status_error(400).category(), ErrorCategory::Permanent);
    }

    #[test]
    fn test_transport_errors_are_transient() {
        assert_eq!(
            ServiceError::Timeout { service: "wiki" }.category(),
            ErrorCategory::Transient
        );
        assert_eq!(
            ServiceError::malformed("wiki", "no pages").category(),
            ErrorCategory::Permanent
        );
    }

    #[test]
    fn test_error_message_extraction() {
        let body = r#"{"error":{"code":400,"message":"API key not valid"}}"#;
        assert_eq!(error_message(StatusCode::BAD_REQUEST, body), "API key not valid");

        let oauth = r#"{"error":"invalid_grant","error_description":"Token has been expired"}"#;
        assert_eq!(error_message(StatusCode::BAD_REQUEST, oauth), "Token has been expired");

        assert_eq!(error_message(StatusCode::BAD_GATEWAY, ""), "Bad Gateway");
    }

    #[test]
    fn test_build_client() {
        assert!(build_client(&HttpConfig::default()).is_ok());
    }
}
