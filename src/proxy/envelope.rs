//! Ingress decoding: identity envelope and invocation request
//!
//! Only the authorizer context is trusted for identity. The body contributes
//! the prompt and the *requested* session id, nothing else.

use std::fmt;

use axum::http::{HeaderMap, HeaderValue};
use base64::Engine;
use serde::Deserialize;

use super::error::ProxyError;

/// Session id used when the caller does not name one
pub const DEFAULT_SESSION_ID: &str = "default-session";

/// Caller-chosen correlation id; recorded, never used as the request id
pub const CLIENT_REQUEST_ID_HEADER: &str = "x-request-id";

/// Trusted headers injected by the authorizing gateway in HTTP mode
pub const AUTHORIZER_TENANT_HEADER: &str = "x-authorizer-tenant-id";
pub const AUTHORIZER_APP_HEADER: &str = "x-authorizer-app-id";
pub const AUTHORIZER_SESSION_HEADER: &str = "x-authorizer-session-id";
pub const AUTHORIZER_TOKEN_HEADER: &str = "x-authorizer-access-token";

// ─────────────────────────────────────────────────────────────────────────────
// Ingress event
// ─────────────────────────────────────────────────────────────────────────────

/// Authorizer context attached by the gateway
#[derive(Clone, Default, Deserialize)]
pub struct AuthorizerContext {
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub tenant_id: Option<String>,
    #[serde(default)]
    pub app_id: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
}

impl fmt::Debug for AuthorizerContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthorizerContext")
            .field("access_token", &self.access_token.as_ref().map(|_| "<redacted>"))
            .field("tenant_id", &self.tenant_id)
            .field("app_id", &self.app_id)
            .field("session_id", &self.session_id)
            .finish()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestContext {
    #[serde(default)]
    pub request_id: Option<String>,
    #[serde(default)]
    pub authorizer: AuthorizerContext,
}

/// The single input of the pipeline, whichever ingress produced it
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngressEvent {
    #[serde(default)]
    pub http_method: Option<String>,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub is_base64_encoded: bool,
    #[serde(default)]
    pub request_context: RequestContext,
    /// Untrusted correlation id sent by the caller in HTTP mode
    #[serde(skip)]
    pub client_request_id: Option<String>,
}

impl IngressEvent {
    /// Build an event from a direct HTTP request whose identity headers were
    /// set by the gateway
    pub fn from_http(method: &str, path: &str, headers: &HeaderMap, body: &[u8]) -> Self {
        let header = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };

        let is_base64_encoded = ["content-transfer-encoding", "x-body-encoding"]
            .iter()
            .filter_map(|name| header(name))
            .any(|v| v.trim().eq_ignore_ascii_case("base64"));

        Self {
            http_method: Some(method.to_string()),
            path: Some(path.to_string()),
            // Non-UTF-8 survives as replacement chars and fails JSON parsing later
            body: Some(String::from_utf8_lossy(body).into_owned()),
            is_base64_encoded,
            // No gateway request id in HTTP mode; the handler mints one
            request_context: RequestContext {
                request_id: None,
                authorizer: AuthorizerContext {
                    access_token: header(AUTHORIZER_TOKEN_HEADER),
                    tenant_id: header(AUTHORIZER_TENANT_HEADER),
                    app_id: header(AUTHORIZER_APP_HEADER),
                    session_id: header(AUTHORIZER_SESSION_HEADER),
                },
            },
            client_request_id: header(CLIENT_REQUEST_ID_HEADER),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Identity envelope
// ─────────────────────────────────────────────────────────────────────────────

/// Normalized, authorizer-verified caller identity. Empty values are absent.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct IdentityEnvelope {
    pub app_id: Option<String>,
    pub tenant_id: Option<String>,
    pub session_id: Option<String>,
    pub access_token: Option<String>,
}

impl fmt::Debug for IdentityEnvelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdentityEnvelope")
            .field("app_id", &self.app_id)
            .field("tenant_id", &self.tenant_id)
            .field("session_id", &self.session_id)
            .field("access_token", &self.access_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

fn present(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

impl IdentityEnvelope {
    pub fn from_authorizer(ctx: &AuthorizerContext) -> Self {
        Self {
            app_id: present(&ctx.app_id),
            tenant_id: present(&ctx.tenant_id),
            session_id: present(&ctx.session_id),
            access_token: present(&ctx.access_token),
        }
    }

    /// `(app_id, tenant_id)` when both are present
    pub fn tenant_scope(&self) -> Option<(&str, &str)> {
        Some((self.app_id.as_deref()?, self.tenant_id.as_deref()?))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Invocation request
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvocationRequest {
    pub prompt: String,
    /// Client-supplied session id, or [`DEFAULT_SESSION_ID`]
    pub session_id: String,
}

/// Decode the (possibly base64 transport-encoded) body into an invocation
pub fn decode_request(event: &IngressEvent) -> Result<InvocationRequest, ProxyError> {
    let raw = event.body.as_deref().unwrap_or("{}");

    let text = if event.is_base64_encoded {
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(raw.trim())
            .map_err(|_| ProxyError::InvalidRequest("Invalid JSON body".into()))?;
        String::from_utf8(bytes)
            .map_err(|_| ProxyError::InvalidRequest("Invalid JSON body".into()))?
    } else {
        raw.to_string()
    };

    let text = if text.trim().is_empty() { "{}" } else { text.as_str() };

    let body: serde_json::Value = serde_json::from_str(text)
        .map_err(|_| ProxyError::InvalidRequest("Invalid JSON body".into()))?;
    let body = body
        .as_object()
        .ok_or_else(|| ProxyError::InvalidRequest("Invalid JSON body".into()))?;

    let prompt = body
        .get("prompt")
        .and_then(|p| p.as_str())
        .filter(|p| !p.is_empty())
        .ok_or_else(|| ProxyError::InvalidRequest("Missing prompt".into()))?;

    let session_id = body
        .get("sessionId")
        .and_then(|s| s.as_str())
        .filter(|s| !s.is_empty())
        .unwrap_or(DEFAULT_SESSION_ID);
    // Forwarded as a header to the runtime
    if HeaderValue::from_str(session_id).is_err() {
        return Err(ProxyError::InvalidRequest("Invalid sessionId".into()));
    }

    Ok(InvocationRequest {
        prompt: prompt.to_string(),
        session_id: session_id.to_string(),
    })
}
