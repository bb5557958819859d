//! Credentials: ambient identity and per-request tenant-scoped credentials
//!
//! A scoped credential is minted fresh for every request and dropped with it.
//! Nothing here caches.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use aws_credential_types::provider::{ProvideCredentials, SharedCredentialsProvider};
use chrono::{DateTime, Utc};

use super::policy::{PolicyError, SessionPolicyBuilder, TenantScope};
use crate::config::IsolationConfig;

/// Longest role session name STS accepts
const MAX_SESSION_NAME_LEN: usize = 64;

#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    #[error("{0}")]
    AssumeRole(String),
    #[error("role assumption returned no credentials")]
    MissingCredentials,
    #[error("no ambient credentials available: {0}")]
    Provider(String),
    #[error(transparent)]
    Policy(#[from] PolicyError),
}

/// Access key, secret and optional session token
#[derive(Clone, PartialEq, Eq)]
pub struct AwsCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl fmt::Debug for AwsCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AwsCredentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .field("session_token", &self.session_token.as_ref().map(|_| "<redacted>"))
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

impl AwsCredentials {
    /// True when the credential carries an expiry at or before `at`
    pub fn is_expired_at(&self, at: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expiry| expiry <= at)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Ambient identity
// ─────────────────────────────────────────────────────────────────────────────

/// The process's own identity
#[async_trait]
pub trait CredentialSource: Send + Sync {
    async fn credentials(&self) -> Result<AwsCredentials, CredentialError>;
}

/// Default AWS provider chain (env, profile, container, instance metadata)
pub struct AmbientCredentials {
    provider: Option<SharedCredentialsProvider>,
}

impl AmbientCredentials {
    pub fn from_sdk_config(sdk_config: &aws_config::SdkConfig) -> Self {
        Self {
            provider: sdk_config.credentials_provider(),
        }
    }
}

#[async_trait]
impl CredentialSource for AmbientCredentials {
    async fn credentials(&self) -> Result<AwsCredentials, CredentialError> {
        let provider = self
            .provider
            .as_ref()
            .ok_or_else(|| CredentialError::Provider("no provider configured".into()))?;
        let creds = provider
            .provide_credentials()
            .await
            .map_err(|e| CredentialError::Provider(e.to_string()))?;

        Ok(AwsCredentials {
            access_key_id: creds.access_key_id().to_string(),
            secret_access_key: creds.secret_access_key().to_string(),
            session_token: creds.session_token().map(str::to_string),
            expires_at: creds.expiry().map(DateTime::<Utc>::from),
        })
    }
}

/// Fixed credentials, for local runtimes and tests
pub struct StaticCredentials(pub AwsCredentials);

#[async_trait]
impl CredentialSource for StaticCredentials {
    async fn credentials(&self) -> Result<AwsCredentials, CredentialError> {
        Ok(self.0.clone())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Role assumption
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct AssumeRoleRequest {
    pub role_arn: String,
    pub session_name: String,
    pub policy: String,
    pub duration_secs: u64,
}

#[async_trait]
pub trait RoleAssumer: Send + Sync {
    async fn assume_role(&self, request: AssumeRoleRequest)
        -> Result<AwsCredentials, CredentialError>;
}

pub struct StsRoleAssumer {
    client: aws_sdk_sts::Client,
}

impl StsRoleAssumer {
    pub fn new(sdk_config: &aws_config::SdkConfig) -> Self {
        Self {
            client: aws_sdk_sts::Client::new(sdk_config),
        }
    }
}

#[async_trait]
impl RoleAssumer for StsRoleAssumer {
    async fn assume_role(
        &self,
        request: AssumeRoleRequest,
    ) -> Result<AwsCredentials, CredentialError> {
        let output = self
            .client
            .assume_role()
            .role_arn(request.role_arn)
            .role_session_name(request.session_name)
            .policy(request.policy)
            .duration_seconds(request.duration_secs as i32)
            .send()
            .await
            .map_err(|e| {
                CredentialError::AssumeRole(
                    aws_sdk_sts::error::DisplayErrorContext(&e).to_string(),
                )
            })?;

        let creds = output
            .credentials()
            .ok_or(CredentialError::MissingCredentials)?;

        Ok(AwsCredentials {
            access_key_id: creds.access_key_id().to_string(),
            secret_access_key: creds.secret_access_key().to_string(),
            session_token: Some(creds.session_token().to_string()),
            expires_at: DateTime::<Utc>::from_timestamp(creds.expiration().secs(), 0),
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Scoper
// ─────────────────────────────────────────────────────────────────────────────

/// Role session name `tenant-{app}-{tenant}` restricted to the STS alphabet
pub fn session_name(scope: &TenantScope) -> String {
    format!("tenant-{}-{}", scope.app_id(), scope.tenant_id())
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || "+=,.@_-".contains(c) {
                c
            } else {
                '_'
            }
        })
        .take(MAX_SESSION_NAME_LEN)
        .collect()
}

/// Exchanges the base role for a tenant-and-app-scoped credential
pub struct CredentialScoper {
    assumer: Arc<dyn RoleAssumer>,
    role_arn: String,
    bucket_arn: String,
    duration_secs: u64,
}

impl CredentialScoper {
    /// `None` when isolation is not configured
    pub fn from_config(config: &IsolationConfig, assumer: Arc<dyn RoleAssumer>) -> Option<Self> {
        let role_arn = config.role_arn.clone()?;
        Some(Self {
            assumer,
            role_arn,
            bucket_arn: config.bucket_arn.clone(),
            duration_secs: config.duration_secs,
        })
    }

    pub async fn scope(
        &self,
        app_id: &str,
        tenant_id: &str,
        runtime_arn: &str,
    ) -> Result<AwsCredentials, CredentialError> {
        let scope = TenantScope::new(app_id, tenant_id)?;
        let policy = SessionPolicyBuilder::new(&scope, runtime_arn, &self.bucket_arn).build()?;

        let request = AssumeRoleRequest {
            role_arn: self.role_arn.clone(),
            session_name: session_name(&scope),
            policy: policy.json,
            duration_secs: self.duration_secs,
        };

        tracing::debug!(
            session_name = %request.session_name,
            duration_secs = request.duration_secs,
            "Assuming tenant-scoped role"
        );

        self.assumer.assume_role(request).await
    }
}

/// In-memory assumer recording every request it receives
#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::Mutex;

    pub struct FakeAssumer {
        pub requests: Mutex<Vec<AssumeRoleRequest>>,
        pub failure: Option<String>,
    }

    impl FakeAssumer {
        pub fn succeeding() -> Self {
            Self {
                requests: Mutex::new(Vec::new()),
                failure: None,
            }
        }

        pub fn failing(reason: &str) -> Self {
            Self {
                requests: Mutex::new(Vec::new()),
                failure: Some(reason.to_string()),
            }
        }

        pub fn calls(&self) -> usize {
            self.requests.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl RoleAssumer for FakeAssumer {
        async fn assume_role(
            &self,
            request: AssumeRoleRequest,
        ) -> Result<AwsCredentials, CredentialError> {
            self.requests.lock().unwrap().push(request);
            match &self.failure {
                Some(reason) => Err(CredentialError::AssumeRole(reason.clone())),
                None => Ok(AwsCredentials {
                    access_key_id: "ASIASCOPED".into(),
                    secret_access_key: "scoped-secret".into(),
                    session_token: Some("scoped-token".into()),
                    expires_at: None,
                }),
            }
        }
    }

    pub fn static_source() -> StaticCredentials {
        StaticCredentials(AwsCredentials {
            access_key_id: "AKIDAMBIENT".into(),
            secret_access_key: "ambient-secret".into(),
            session_token: None,
            expires_at: None,
        })
    }
}
