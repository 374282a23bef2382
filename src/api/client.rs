use std::error::Error as _;
use std::io;
use std::time::Duration;

use super::types::*;
use crate::logging::truncate_str;

const LIST_PATH: &str = "/email/messages/";
const ACTION_PATH: &str = "/email/messages/action/";

pub struct ApiClient {
    agent: ureq::Agent,
    base_url: String,
    auth: String,
    list_timeout: Duration,
    action_timeout: Duration,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ApiError {
    #[error("request timed out after {secs}s")]
    Timeout { secs: u64 },
    #[error("server returned HTTP {status}")]
    Status { status: u16, detail: Option<String> },
    #[error("connection error: {0}")]
    Transport(String),
    #[error("unexpected response: {0}")]
    Parse(String),
}

impl ApiError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, ApiError::Timeout { .. })
    }

    /// Server-provided explanation, when the response carried one.
    pub fn detail(&self) -> Option<&str> {
        match self {
            ApiError::Status {
                detail: Some(d), ..
            } => Some(d),
            ApiError::Status { status: 401, .. } => Some("Authentication failed"),
            _ => None,
        }
    }
}

impl ApiClient {
    pub fn new(base_url: &str, token: &str, list_timeout_secs: u64, action_timeout_secs: u64) -> Self {
        ApiClient {
            agent: ureq::AgentBuilder::new().build(),
            base_url: base_url.trim_end_matches('/').to_string(),
            auth: format!("Token {}", token),
            list_timeout: Duration::from_secs(list_timeout_secs),
            action_timeout: Duration::from_secs(action_timeout_secs),
        }
    }

    pub fn list_messages(
        &self,
        mailbox: &str,
        limit: u32,
        offset: usize,
    ) -> Result<MessagePage, ApiError> {
        let url = format!("{}{}", self.base_url, LIST_PATH);
        log::info!(
            "[API] GET {} (mailbox: {}, limit: {}, offset: {})",
            url,
            mailbox,
            limit,
            offset
        );

        let secs = self.list_timeout.as_secs();
        let response = self
            .agent
            .get(&url)
            .set("Authorization", &self.auth)
            .query("mailbox", mailbox)
            .query("limit", &limit.to_string())
            .query("offset", &offset.to_string())
            .timeout(self.list_timeout)
            .call()
            .map_err(|e| map_ureq_error(e, secs))?;

        let body = read_body(response, secs)?;
        log::debug!(
            "[API] Response body ({} bytes): {}",
            body.len(),
            truncate_str(&body, 1000)
        );

        let payload: ListPayload = serde_json::from_str(&body).map_err(|e| {
            ApiError::Parse(format!(
                "failed to parse message list: {}. Response was: {}",
                e,
                truncate_str(&body, 200)
            ))
        })?;
        let page = payload.into_page(mailbox);
        log::info!(
            "[API] {} returned {} messages (total: {:?})",
            mailbox,
            page.messages.len(),
            page.total
        );
        Ok(page)
    }

    pub fn apply_action(
        &self,
        action: ActionKind,
        ids: &[String],
        mailbox: &str,
    ) -> Result<(), ApiError> {
        let url = format!("{}{}", self.base_url, ACTION_PATH);
        let request = ActionRequest {
            action,
            email_ids: ids,
            mailbox,
        };
        log::info!(
            "[API] POST {} {} on {} message(s) in {}",
            url,
            action,
            ids.len(),
            mailbox
        );

        let secs = self.action_timeout.as_secs();
        let response = self
            .agent
            .post(&url)
            .set("Authorization", &self.auth)
            .set("Content-Type", "application/json")
            .timeout(self.action_timeout)
            .send_json(&request)
            .map_err(|e| map_ureq_error(e, secs))?;

        // No body contract beyond the status code.
        let body = read_body(response, secs)?;
        log::debug!("[API] Action response: {}", truncate_str(&body, 500));
        Ok(())
    }
}

fn read_body(response: ureq::Response, timeout_secs: u64) -> Result<String, ApiError> {
    response.into_string().map_err(|e| {
        if is_timeout_io(&e) {
            ApiError::Timeout { secs: timeout_secs }
        } else {
            ApiError::Parse(format!("failed to read response: {}", e))
        }
    })
}

fn map_ureq_error(err: ureq::Error, timeout_secs: u64) -> ApiError {
    match err {
        ureq::Error::Status(code, resp) => {
            let body = resp.into_string().unwrap_or_default();
            log::error!("[API] HTTP error {}: {}", code, truncate_str(&body, 500));
            status_error(code, &body)
        }
        ureq::Error::Transport(t) => {
            let timed_out = t
                .source()
                .and_then(|s| s.downcast_ref::<io::Error>())
                .is_some_and(is_timeout_io)
                || t.to_string().contains("timed out");
            if timed_out {
                log::warn!("[API] Request timed out after {}s", timeout_secs);
                ApiError::Timeout { secs: timeout_secs }
            } else {
                log::error!("[API] Connection error: {}", t);
                ApiError::Transport(t.to_string())
            }
        }
    }
}

fn is_timeout_io(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock
    )
}

/// Build the error for a non-2xx response from its (possibly non-JSON) body.
fn status_error(status: u16, body: &str) -> ApiError {
    let detail = match serde_json::from_str::<ErrorPayload>(body) {
        Ok(payload) => payload.into_detail(),
        Err(_) => {
            let trimmed = body.trim();
            if trimmed.is_empty() {
                None
            } else {
                Some(truncate_str(trimmed, 200).to_string())
            }
        }
    };
    ApiError::Status { status, detail }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_error_prefers_json_detail() {
        let err = status_error(503, r#"{"error": "IMAP server unavailable", "error_type": "connection"}"#);
        assert_eq!(err.detail(), Some("IMAP server unavailable"));
        assert_eq!(err.to_string(), "server returned HTTP 503");
        assert!(!err.is_timeout());
    }

    #[test]
    fn test_status_error_plain_body_and_empty_body() {
        let err = status_error(502, "Bad Gateway");
        assert_eq!(err.detail(), Some("Bad Gateway"));

        let err = status_error(500, "   ");
        assert_eq!(err.detail(), None);

        let long = "x".repeat(1000);
        match status_error(500, &long) {
            ApiError::Status {
                detail: Some(d), ..
            } => assert_eq!(d.len(), 200),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_unauthorized_has_fallback_detail() {
        let err = status_error(401, "");
        assert_eq!(err.detail(), Some("Authentication failed"));
    }

    #[test]
    fn test_timeout_detection() {
        assert!(is_timeout_io(&io::Error::new(io::ErrorKind::TimedOut, "t")));
        assert!(is_timeout_io(&io::Error::new(io::ErrorKind::WouldBlock, "t")));
        assert!(!is_timeout_io(&io::Error::new(io::ErrorKind::ConnectionRefused, "r")));
        assert!(ApiError::Timeout { secs: 60 }.is_timeout());
    }

    #[test]
    fn test_base_url_normalized() {
        let client = ApiClient::new("http://localhost:8000/api/", "abc", 60, 10);
        assert_eq!(client.base_url, "http://localhost:8000/api");
        assert_eq!(client.auth, "Token abc");
    }
}
