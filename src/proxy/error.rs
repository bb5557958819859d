//! Proxy error types and response handling

use axum::{
    body::Body,
    http::{header, HeaderValue, Response, StatusCode},
    response::IntoResponse,
};
use bytes::Bytes;

use crate::audit::AuditOutcome;

/// Message returned to the caller for any network failure before a response
pub const TRANSPORT_FAILURE_MESSAGE: &str = "Failed to reach agent runtime";

/// Failures that end a request before any response byte is sent
#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    /// Missing or unusable configuration, credential minting or signing failure
    #[error("{0}")]
    Config(String),

    /// Malformed body or missing field
    #[error("{0}")]
    InvalidRequest(String),

    /// Requested session disagrees with the authorizer-bound session
    #[error("Session isolation violation: tenant mismatch")]
    SessionIsolation,

    /// The runtime answered with an error status; forwarded verbatim
    #[error("runtime responded with status {status}")]
    Upstream {
        status: StatusCode,
        content_type: Option<String>,
        body: Bytes,
    },

    /// Network failure; the detail is for logs and audit only
    #[error("{detail}")]
    Transport { detail: String },
}

impl ProxyError {
    pub fn status(&self) -> StatusCode {
        match self {
            ProxyError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ProxyError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            ProxyError::SessionIsolation => StatusCode::FORBIDDEN,
            ProxyError::Upstream { status, .. } => *status,
            ProxyError::Transport { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn outcome(&self) -> AuditOutcome {
        match self {
            ProxyError::Config(_) => AuditOutcome::ConfigError,
            ProxyError::InvalidRequest(_) => AuditOutcome::InvalidRequest,
            ProxyError::SessionIsolation => AuditOutcome::SessionIsolationViolation,
            ProxyError::Upstream { .. } => AuditOutcome::UpstreamError,
            ProxyError::Transport { .. } => AuditOutcome::TransportError,
        }
    }

    /// What the caller is allowed to see
    pub fn public_message(&self) -> String {
        match self {
            ProxyError::Transport { .. } => TRANSPORT_FAILURE_MESSAGE.to_string(),
            ProxyError::Upstream { body, .. } => String::from_utf8_lossy(body).into_owned(),
            other => other.to_string(),
        }
    }

    /// Full detail for logs and the audit record
    pub fn audit_message(&self) -> String {
        self.to_string()
    }
}

fn json_error(status: StatusCode, message: &str) -> Response<Body> {
    let body = serde_json::json!({ "error": message }).to_string();
    let mut response = Response::new(Body::from(body));
    *response.status_mut() = status;
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/json"),
    );
    response
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response<Body> {
        let status = self.status();
        match self {
            ProxyError::Upstream {
                content_type, body, ..
            } => {
                let content_type = content_type
                    .and_then(|ct| HeaderValue::from_str(&ct).ok())
                    .unwrap_or_else(|| HeaderValue::from_static("application/json"));
                let mut response = Response::new(Body::from(body));
                *response.status_mut() = status;
                response
                    .headers_mut()
                    .insert(header::CONTENT_TYPE, content_type);
                response
            }
            other => json_error(status, &other.public_message()),
        }
    }
}
