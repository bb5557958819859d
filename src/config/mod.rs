//! Configuration for the relay
//!
//! Configuration is loaded in order of precedence:
//! 1. Environment variables (highest priority)
//! 2. Config file (~/.config/tenant-relay/config.toml)
//! 3. Built-in defaults (lowest priority)
//!
//! The result is validated once at startup. The runtime target is still
//! re-checked per request so a half-configured deployment answers every
//! invocation with a `config_error` instead of refusing to boot.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::PathBuf;

// ─────────────────────────────────────────────────────────────────────────────
// Submodules
// ─────────────────────────────────────────────────────────────────────────────

mod audit;
mod observability;
mod runtime;
mod serialization;


// ─────────────────────────────────────────────────────────────────────────────
// Re-exports
// ─────────────────────────────────────────────────────────────────────────────

pub use audit::{AuditConfig, AuditDestination, FileAudit};
pub use observability::{FileLogging, LogRotation, LoggingConfig};
pub use runtime::{
    FileIsolation, FileRuntime, IsolationConfig, RuntimeConfig, RuntimeTarget,
    MAX_SCOPED_CREDENTIAL_SECS,
};

// ─────────────────────────────────────────────────────────────────────────────
// Constants
// ─────────────────────────────────────────────────────────────────────────────

/// Version info
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

const DEFAULT_BIND_ADDR: &str = "127.0.0.1:8080";

// ─────────────────────────────────────────────────────────────────────────────
// Application Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Address to bind the ingress server to
    pub bind_addr: SocketAddr,

    /// Agent runtime target and upstream client tuning
    pub runtime: RuntimeConfig,

    /// Per-tenant credential scoping
    pub isolation: IsolationConfig,

    /// Audit record persistence
    pub audit: AuditConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 8080)),
            runtime: RuntimeConfig::default(),
            isolation: IsolationConfig::default(),
            audit: AuditConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/// A problem found while validating configuration
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigIssue {
    #[error("AGENTCORE_RUNTIME_ARN is not set; every invocation will fail with config_error")]
    MissingRuntimeArn,
    #[error("AGENTCORE_REGION is not set; every invocation will fail with config_error")]
    MissingRegion,
    #[error("runtime ARN {0:?} is not a bedrock-agentcore runtime ARN")]
    MalformedRuntimeArn(String),
    #[error("runtime endpoint {0:?} is not an absolute http(s) URL")]
    MalformedEndpoint(String),
    #[error("audit logging is enabled but neither AUDIT_LOGS_BUCKET nor AUDIT_LOGS_DIR is set")]
    AuditWithoutDestination,
}

// ─────────────────────────────────────────────────────────────────────────────
// File Configuration (deserialization layer)
// ─────────────────────────────────────────────────────────────────────────────

/// Config file structure
#[derive(Debug, Deserialize, Default)]
pub(crate) struct FileConfig {
    pub bind_addr: Option<String>,

    /// Optional [runtime] section
    pub runtime: Option<FileRuntime>,

    /// Optional [isolation] section
    pub isolation: Option<FileIsolation>,

    /// Optional [audit] section
    pub audit: Option<FileAudit>,

    /// Optional [logging] section
    pub logging: Option<FileLogging>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Configuration Loading
// ─────────────────────────────────────────────────────────────────────────────

impl Config {
    /// Get the config file path: ~/.config/tenant-relay/config.toml
    pub fn config_path() -> Option<PathBuf> {
        dirs::home_dir().map(|p| p.join(".config").join("tenant-relay").join("config.toml"))
    }

    /// Load file config if it exists
    ///
    /// A file that exists but does not parse is an error. Silently falling back
    /// to defaults would point the relay at the wrong runtime.
    fn load_file_config() -> Result<FileConfig> {
        let Some(path) = Self::config_path() else {
            return Ok(FileConfig::default());
        };

        match std::fs::read_to_string(&path) {
            Ok(contents) => toml::from_str(&contents)
                .with_context(|| format!("Failed to parse config file {}", path.display())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(FileConfig::default()),
            Err(e) => {
                Err(e).with_context(|| format!("Failed to read config file {}", path.display()))
            }
        }
    }

    /// Load configuration: file -> env vars -> defaults
    pub fn from_env() -> Result<Self> {
        let file = Self::load_file_config()?;
        Self::resolve(file, |key| std::env::var(key).ok())
    }

    /// Merge a parsed config file with an environment lookup
    pub(crate) fn resolve<F>(file: FileConfig, env: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        // Bind address: env > file > default
        let bind_addr = env("RELAY_BIND")
            .or(file.bind_addr)
            .unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string());
        let bind_addr = bind_addr
            .parse()
            .with_context(|| format!("Invalid bind address {:?}", bind_addr))?;

        let runtime = RuntimeConfig::from_file(file.runtime, &env);
        let isolation = IsolationConfig::from_file(file.isolation, &env);
        let audit = AuditConfig::from_file(file.audit, &env);
        let logging = LoggingConfig::from_file(file.logging);

        Ok(Self {
            bind_addr,
            runtime,
            isolation,
            audit,
            logging,
        })
    }

    /// Check every setting that would make invocations fail or lose audit data
    pub fn validate(&self) -> Vec<ConfigIssue> {
        let mut issues = Vec::new();

        match self.runtime.arn.as_deref() {
            None => issues.push(ConfigIssue::MissingRuntimeArn),
            Some(arn) if !runtime::is_runtime_arn(arn) => {
                issues.push(ConfigIssue::MalformedRuntimeArn(arn.to_string()))
            }
            Some(_) => {}
        }
        if self.runtime.region.is_none() {
            issues.push(ConfigIssue::MissingRegion);
        }
        if let Some(endpoint) = &self.runtime.endpoint {
            let valid = url::Url::parse(endpoint)
                .map(|u| matches!(u.scheme(), "http" | "https") && u.host().is_some())
                .unwrap_or(false);
            if !valid {
                issues.push(ConfigIssue::MalformedEndpoint(endpoint.clone()));
            }
        }
        if self.audit.enabled && self.audit.destination().is_none() {
            issues.push(ConfigIssue::AuditWithoutDestination);
        }

        issues
    }
}

/// Parse a boolean flag the way operators write them in env files
pub(crate) fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

/// Treat empty env values as unset
pub(crate) fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
