//! Proxy state: the immutable, shared collaborators of every invocation

use std::sync::Arc;

use anyhow::{Context, Result};
use aws_config::{BehaviorVersion, Region};

use crate::audit::{AuditSink, FileAuditSink, S3AuditSink};
use crate::config::{AuditDestination, Config};

use super::credentials::{
    AmbientCredentials, CredentialScoper, CredentialSource, RoleAssumer, StsRoleAssumer,
};
use super::upstream::RuntimeClient;

/// Shared state for the proxy server.
///
/// Clients in here hold no per-request state; credentials are never stored.
#[derive(Clone)]
pub struct ProxyState {
    pub(crate) config: Arc<Config>,
    /// HTTP client for the agent runtime
    pub(crate) runtime: RuntimeClient,
    /// Present only when an isolation role is configured
    pub(crate) scoper: Option<Arc<CredentialScoper>>,
    /// The process's own identity, used when no tenant scoping applies
    pub(crate) ambient: Arc<dyn CredentialSource>,
    /// Present only when audit persistence is enabled
    pub(crate) audit_sink: Option<Arc<dyn AuditSink>>,
}

impl ProxyState {
    /// Assemble state from explicit collaborators
    pub fn new(
        config: Config,
        ambient: Arc<dyn CredentialSource>,
        assumer: Arc<dyn RoleAssumer>,
        audit_sink: Option<Arc<dyn AuditSink>>,
    ) -> Result<Self> {
        let runtime = RuntimeClient::new(&config.runtime)?;
        let scoper = CredentialScoper::from_config(&config.isolation, assumer).map(Arc::new);

        Ok(Self {
            config: Arc::new(config),
            runtime,
            scoper,
            ambient,
            audit_sink,
        })
    }

    /// Build AWS-backed collaborators from the default provider chain
    pub async fn from_config(config: Config) -> Result<Self> {
        let mut loader = aws_config::defaults(BehaviorVersion::latest());
        if let Some(region) = &config.runtime.region {
            loader = loader.region(Region::new(region.clone()));
        }
        let sdk_config = loader.load().await;

        let audit_sink: Option<Arc<dyn AuditSink>> = match config.audit.destination() {
            Some(AuditDestination::Bucket(bucket)) => {
                tracing::info!(bucket = %bucket, prefix = %config.audit.prefix, "Audit records go to S3");
                let sink: Arc<dyn AuditSink> = Arc::new(
                    S3AuditSink::new(&sdk_config, bucket, &config.audit.prefix)
                        .context("Failed to create S3 audit sink")?,
                );
                Some(sink)
            }
            Some(AuditDestination::Directory(dir)) => {
                tracing::info!(dir = %dir.display(), "Audit records go to local directory");
                let sink: Arc<dyn AuditSink> = Arc::new(
                    FileAuditSink::new(dir, &config.audit.prefix)
                        .context("Failed to create file audit sink")?,
                );
                Some(sink)
            }
            None => {
                tracing::debug!("Audit persistence disabled");
                None
            }
        };

        if config.isolation.is_enabled() {
            tracing::info!(
                duration_secs = config.isolation.duration_secs,
                "Tenant credential scoping enabled"
            );
        } else {
            tracing::info!("Tenant credential scoping disabled; using ambient identity");
        }

        Self::new(
            config,
            Arc::new(AmbientCredentials::from_sdk_config(&sdk_config)),
            Arc::new(StsRoleAssumer::new(&sdk_config)),
            audit_sink,
        )
    }
}
