//! Upstream agent runtime client
//!
//! One signed HTTPS call per request, never retried and never redirected.
//! Error statuses are buffered and surfaced verbatim; success bodies are
//! handed back as a stream.

use std::time::Duration;

use anyhow::{Context, Result};
use axum::http::StatusCode;
use bytes::Bytes;
use futures::stream::BoxStream;
use futures::StreamExt;

use super::credentials::AwsCredentials;
use super::envelope::IdentityEnvelope;
use super::error::ProxyError;
use super::signing::{SigV4Signer, SigningRequest};
use crate::config::{RuntimeConfig, RuntimeTarget};

/// Signing name of the agent runtime service
pub const SIGNING_SERVICE: &str = "bedrock-agentcore";

pub const RUNTIME_SESSION_HEADER: &str = "x-amzn-bedrock-agentcore-runtime-session-id";
pub const CUSTOM_TENANT_HEADER: &str = "x-amzn-bedrock-agentcore-runtime-custom-tenant-id";
pub const CUSTOM_APP_HEADER: &str = "x-amzn-bedrock-agentcore-runtime-custom-app-id";
pub const CUSTOM_AUTHORIZATION_HEADER: &str =
    "x-amzn-bedrock-agentcore-runtime-custom-authorization";

const ACCEPT: &str = "application/x-ndjson, text/event-stream, application/json";

/// Body returned in place of a runtime redirect
const REDIRECT_REFUSED_BODY: &str = r#"{"error":"Agent runtime answered with a redirect"}"#;

/// Upstream body as it arrives
pub type ByteStream = BoxStream<'static, Result<Bytes, reqwest::Error>>;

/// A fully-built request waiting for its signature
#[derive(Debug, Clone)]
pub struct PreparedInvocation {
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl PreparedInvocation {
    /// Build the invocation for one prompt under one session
    pub fn new(
        target: &RuntimeTarget,
        session_id: &str,
        envelope: &IdentityEnvelope,
        prompt: &str,
    ) -> Result<Self, ProxyError> {
        let body = serde_json::to_vec(&serde_json::json!({ "prompt": prompt }))
            .map_err(|e| ProxyError::Config(format!("Failed to encode runtime request: {}", e)))?;

        let mut headers = vec![
            ("content-type".to_string(), "application/json".to_string()),
            ("accept".to_string(), ACCEPT.to_string()),
            (RUNTIME_SESSION_HEADER.to_string(), session_id.to_string()),
        ];
        if let Some(tenant_id) = &envelope.tenant_id {
            headers.push((CUSTOM_TENANT_HEADER.to_string(), tenant_id.clone()));
        }
        if let Some(app_id) = &envelope.app_id {
            headers.push((CUSTOM_APP_HEADER.to_string(), app_id.clone()));
        }
        if let Some(token) = &envelope.access_token {
            headers.push((
                CUSTOM_AUTHORIZATION_HEADER.to_string(),
                format!("Bearer {}", token),
            ));
        }

        Ok(Self {
            url: invocation_url(target),
            headers,
            body,
        })
    }

    /// Append SigV4 headers for the given credential
    pub fn sign(
        mut self,
        signer: &SigV4Signer,
        credentials: &AwsCredentials,
        at: chrono::DateTime<chrono::Utc>,
    ) -> Result<Self, ProxyError> {
        let signed = signer
            .sign(
                &SigningRequest {
                    method: "POST",
                    url: &self.url,
                    headers: &self.headers,
                    body: &self.body,
                },
                credentials,
                at,
            )
            .map_err(|e| ProxyError::Config(format!("Failed to sign runtime request: {}", e)))?;
        self.headers.extend(signed);
        Ok(self)
    }
}

/// `{endpoint}/runtimes/{encoded arn}/invocations?qualifier={qualifier}`
pub fn invocation_url(target: &RuntimeTarget) -> String {
    let encoded_arn: String = url::form_urlencoded::byte_serialize(target.arn.as_bytes())
        .collect::<String>()
        .replace('+', "%20");
    let qualifier: String =
        url::form_urlencoded::byte_serialize(target.qualifier.as_bytes()).collect();
    format!(
        "{}/runtimes/{}/invocations?qualifier={}",
        target.endpoint, encoded_arn, qualifier
    )
}

/// A successful runtime answer, body not yet read
pub struct UpstreamStream {
    /// Session id echoed by the runtime, if any
    pub session_id: Option<String>,
    pub body: ByteStream,
}

/// Shared HTTP client for the runtime; holds no per-request state
#[derive(Clone)]
pub struct RuntimeClient {
    http: reqwest::Client,
}

impl RuntimeClient {
    pub fn new(config: &RuntimeConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            // Signed and bearer headers must only ever reach the configured endpoint
            .redirect(reqwest::redirect::Policy::none())
            .pool_max_idle_per_host(10)
            .build()
            .context("Failed to create runtime HTTP client")?;
        Ok(Self { http })
    }

    /// Send a signed invocation. Error statuses and redirects come back as
    /// [`ProxyError::Upstream`], network failures as [`ProxyError::Transport`].
    /// A request reqwest refuses to build (bad header value) is a
    /// [`ProxyError::Config`].
    pub async fn invoke(
        &self,
        invocation: PreparedInvocation,
    ) -> Result<UpstreamStream, ProxyError> {
        let mut request = self.http.post(&invocation.url);
        for (name, value) in &invocation.headers {
            request = request.header(name.as_str(), value.as_str());
        }

        let response = request
            .body(invocation.body)
            .send()
            .await
            .map_err(|e| {
                if e.is_builder() {
                    ProxyError::Config(format!("Failed to build runtime request: {}", e))
                } else {
                    ProxyError::Transport {
                        detail: format!("runtime request failed: {}", e),
                    }
                }
            })?;

        let status = response.status();
        if status.is_redirection() {
            tracing::warn!(
                status = status.as_u16(),
                "Agent runtime answered with a redirect; not following"
            );
            return Err(ProxyError::Upstream {
                status: StatusCode::BAD_GATEWAY,
                content_type: Some("application/json".to_string()),
                body: Bytes::from_static(REDIRECT_REFUSED_BODY.as_bytes()),
            });
        }
        if !status.is_success() {
            let content_type = response
                .headers()
                .get(reqwest::header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            let body = response.bytes().await.map_err(|e| ProxyError::Transport {
                detail: format!("failed to read runtime error body: {}", e),
            })?;
            tracing::warn!(
                status = status.as_u16(),
                body_len = body.len(),
                "Agent runtime returned an error status"
            );
            return Err(ProxyError::Upstream {
                status: StatusCode::from_u16(status.as_u16())
                    .unwrap_or(StatusCode::BAD_GATEWAY),
                content_type,
                body,
            });
        }

        let session_id = response
            .headers()
            .get(RUNTIME_SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
            .map(str::to_string);

        Ok(UpstreamStream {
            session_id,
            body: response.bytes_stream().boxed(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target(endpoint: &str) -> RuntimeTarget {
        RuntimeTarget {
            arn: "arn:aws:bedrock-agentcore:us-east-1:123456789012:runtime/agent-1".into(),
            region: "us-east-1".into(),
            qualifier: "DEFAULT".into(),
            endpoint: endpoint.into(),
        }
    }

    fn header<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
        headers
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    #[test]
    fn test_invocation_url_encodes_arn() {
        assert_eq!(
            invocation_url(&target("https://bedrock-agentcore.us-east-1.amazonaws.com")),
            "https://bedrock-agentcore.us-east-1.amazonaws.com/runtimes/\
             arn%3Aaws%3Abedrock-agentcore%3Aus-east-1%3A123456789012%3Aruntime%2Fagent-1\
             /invocations?qualifier=DEFAULT"
        );
    }

    #[test]
    fn test_prepared_headers_carry_identity() {
        let envelope = IdentityEnvelope {
            app_id: Some("app-A".into()),
            tenant_id: Some("tenant-A".into()),
            session_id: Some("s-1".into()),
            access_token: Some("tok".into()),
        };
        let prepared =
            PreparedInvocation::new(&target("http://localhost"), "s-1", &envelope, "hi").unwrap();

        assert_eq!(header(&prepared.headers, RUNTIME_SESSION_HEADER), Some("s-1"));
        assert_eq!(header(&prepared.headers, CUSTOM_TENANT_HEADER), Some("tenant-A"));
        assert_eq!(header(&prepared.headers, CUSTOM_APP_HEADER), Some("app-A"));
        assert_eq!(
            header(&prepared.headers, CUSTOM_AUTHORIZATION_HEADER),
            Some("Bearer tok")
        );
        assert_eq!(prepared.body, br#"{"prompt":"hi"}"#.to_vec());
    }

    #[test]
    fn test_prepared_headers_without_identity() {
        let prepared = PreparedInvocation::new(
            &target("http://localhost"),
            "default-session",
            &IdentityEnvelope::default(),
            "hi",
        )
        .unwrap();

        assert!(header(&prepared.headers, CUSTOM_TENANT_HEADER).is_none());
        assert!(header(&prepared.headers, CUSTOM_AUTHORIZATION_HEADER).is_none());
    }

    #[test]
    fn test_sign_appends_authorization() {
        let prepared = PreparedInvocation::new(
            &target("http://localhost:9000"),
            "s",
            &IdentityEnvelope::default(),
            "hi",
        )
        .unwrap();
        let creds = AwsCredentials {
            access_key_id: "AKID".into(),
            secret_access_key: "secret".into(),
            session_token: Some("tok".into()),
            expires_at: None,
        };

        let signed = prepared
            .sign(
                &SigV4Signer::new("us-east-1", SIGNING_SERVICE),
                &creds,
                chrono::Utc::now(),
            )
            .unwrap();

        let auth = header(&signed.headers, "authorization").unwrap();
        assert!(auth.starts_with("AWS4-HMAC-SHA256 Credential=AKID/"));
        assert!(auth.contains("/us-east-1/bedrock-agentcore/aws4_request"));
        assert_eq!(header(&signed.headers, "x-amz-security-token"), Some("tok"));
    }

    #[tokio::test]
    async fn test_transport_failure_is_reported() {
        // Bind then drop to get a port nothing listens on
        let port = std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        let client = RuntimeClient::new(&RuntimeConfig::default()).unwrap();
        let prepared = PreparedInvocation::new(
            &target(&format!("http://127.0.0.1:{}", port)),
            "s",
            &IdentityEnvelope::default(),
            "hi",
        )
        .unwrap();

        let err = match client.invoke(prepared).await {
            Err(err) => err,
            Ok(_) => panic!("expected transport failure"),
        };
        assert!(matches!(err, ProxyError::Transport { .. }));
    }

    #[tokio::test]
    async fn test_redirect_is_not_followed() {
        let mut elsewhere = mockito::Server::new_async().await;
        let followed = elsewhere
            .mock("POST", mockito::Matcher::Any)
            .expect(0)
            .create_async()
            .await;
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", mockito::Matcher::Any)
            .with_status(307)
            .with_header("location", &format!("{}/elsewhere", elsewhere.url()))
            .create_async()
            .await;

        let client = RuntimeClient::new(&RuntimeConfig::default()).unwrap();
        let prepared = PreparedInvocation::new(
            &target(&server.url()),
            "s",
            &IdentityEnvelope::default(),
            "hi",
        )
        .unwrap();

        let err = match client.invoke(prepared).await {
            Err(err) => err,
            Ok(_) => panic!("expected redirect to be refused"),
        };
        assert_eq!(err.status(), StatusCode::BAD_GATEWAY);
        assert!(matches!(err, ProxyError::Upstream { .. }));
        followed.assert_async().await;
    }

    #[tokio::test]
    async fn test_unbuildable_header_is_config_error() {
        let client = RuntimeClient::new(&RuntimeConfig::default()).unwrap();
        let envelope = IdentityEnvelope {
            access_token: Some("tok\nen".into()),
            ..Default::default()
        };
        let prepared =
            PreparedInvocation::new(&target("http://127.0.0.1:1"), "s", &envelope, "hi").unwrap();

        let err = match client.invoke(prepared).await {
            Err(err) => err,
            Ok(_) => panic!("expected builder failure"),
        };
        assert!(matches!(err, ProxyError::Config(_)));
    }
}
