//! Runtime target and isolation configuration

use serde::Deserialize;

use super::non_empty;

/// Upper bound on scoped credential lifetime (15 minutes, also the STS minimum)
pub const MAX_SCOPED_CREDENTIAL_SECS: u64 = 900;

/// Resource family used when no tenant data bucket is configured
const DEFAULT_BUCKET_ARN: &str = "arn:aws:s3:::*";

// ─────────────────────────────────────────────────────────────────────────────
// Runtime
// ─────────────────────────────────────────────────────────────────────────────

/// Agent runtime target and upstream client tuning
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Runtime resource identifier (ARN). Mandatory.
    pub arn: Option<String>,
    /// Region the runtime lives in. Mandatory.
    pub region: Option<String>,
    /// Endpoint qualifier appended as `?qualifier=`
    pub qualifier: String,
    /// Override for the regional endpoint (local runtimes, tests)
    pub endpoint: Option<String>,
    /// Overall upstream request timeout, including the streamed body
    pub timeout_secs: u64,
    /// TCP/TLS connect timeout
    pub connect_timeout_secs: u64,
    /// Frames buffered between the upstream reader and the caller
    pub stream_buffer: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            arn: None,
            region: None,
            qualifier: "DEFAULT".to_string(),
            endpoint: None,
            timeout_secs: 900,
            connect_timeout_secs: 10,
            stream_buffer: 1,
        }
    }
}

/// Runtime settings as loaded from config file
#[derive(Debug, Deserialize, Default)]
pub struct FileRuntime {
    pub arn: Option<String>,
    pub region: Option<String>,
    pub qualifier: Option<String>,
    pub endpoint: Option<String>,
    pub timeout_secs: Option<u64>,
    pub connect_timeout_secs: Option<u64>,
    pub stream_buffer: Option<usize>,
}

impl RuntimeConfig {
    /// Create from file config and environment, env winning
    pub fn from_file<F>(file: Option<FileRuntime>, env: &F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let file = file.unwrap_or_default();
        let defaults = Self::default();

        Self {
            arn: non_empty(env("AGENTCORE_RUNTIME_ARN").or(file.arn)),
            region: non_empty(env("AGENTCORE_REGION").or(file.region)),
            qualifier: non_empty(env("AGENTCORE_RUNTIME_QUALIFIER").or(file.qualifier))
                .unwrap_or(defaults.qualifier),
            endpoint: non_empty(env("AGENTCORE_ENDPOINT").or(file.endpoint))
                .map(|e| e.trim_end_matches('/').to_string()),
            timeout_secs: file.timeout_secs.unwrap_or(defaults.timeout_secs),
            connect_timeout_secs: file
                .connect_timeout_secs
                .unwrap_or(defaults.connect_timeout_secs),
            // A zero-capacity channel cannot exist; one frame is the tightest coupling
            stream_buffer: file.stream_buffer.unwrap_or(defaults.stream_buffer).max(1),
        }
    }

    /// The fully-resolved target, or `None` when a mandatory value is missing
    pub fn target(&self) -> Option<RuntimeTarget> {
        let arn = self.arn.clone()?;
        let region = self.region.clone()?;
        let endpoint = self
            .endpoint
            .clone()
            .unwrap_or_else(|| format!("https://bedrock-agentcore.{}.amazonaws.com", region));

        Some(RuntimeTarget {
            arn,
            region,
            qualifier: self.qualifier.clone(),
            endpoint,
        })
    }
}

/// A runtime the relay can actually address
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeTarget {
    pub arn: String,
    pub region: String,
    pub qualifier: String,
    pub endpoint: String,
}

/// Loose structural check: `arn:<partition>:bedrock-agentcore:<region>:<account>:runtime/<id>`
pub(crate) fn is_runtime_arn(arn: &str) -> bool {
    let parts: Vec<&str> = arn.splitn(6, ':').collect();
    parts.len() == 6
        && parts[0] == "arn"
        && !parts[1].is_empty()
        && parts[2] == "bedrock-agentcore"
        && !parts[3].is_empty()
        && parts[5].starts_with("runtime/")
        && parts[5].len() > "runtime/".len()
}

// ─────────────────────────────────────────────────────────────────────────────
// Isolation
// ─────────────────────────────────────────────────────────────────────────────

/// Per-tenant credential scoping
#[derive(Debug, Clone)]
pub struct IsolationConfig {
    /// Base role assumed with an inline session policy. Unset disables scoping.
    pub role_arn: Option<String>,
    /// Bucket (or bucket family) tenant data lives in
    pub bucket_arn: String,
    /// Requested scoped credential lifetime, clamped to the 15 minute ceiling
    pub duration_secs: u64,
}

impl Default for IsolationConfig {
    fn default() -> Self {
        Self {
            role_arn: None,
            bucket_arn: DEFAULT_BUCKET_ARN.to_string(),
            duration_secs: MAX_SCOPED_CREDENTIAL_SECS,
        }
    }
}

/// Isolation settings as loaded from config file
#[derive(Debug, Deserialize, Default)]
pub struct FileIsolation {
    pub role_arn: Option<String>,
    pub bucket_arn: Option<String>,
    pub duration_secs: Option<u64>,
}

impl IsolationConfig {
    /// Create from file config and environment, env winning
    pub fn from_file<F>(file: Option<FileIsolation>, env: &F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let file = file.unwrap_or_default();
        let defaults = Self::default();

        Self {
            role_arn: non_empty(env("TENANT_ISOLATION_ROLE_ARN").or(file.role_arn)),
            bucket_arn: non_empty(env("TENANT_DATA_BUCKET_ARN").or(file.bucket_arn))
                .map(|b| b.trim_end_matches('/').to_string())
                .unwrap_or(defaults.bucket_arn),
            duration_secs: file
                .duration_secs
                .unwrap_or(defaults.duration_secs)
                .min(MAX_SCOPED_CREDENTIAL_SECS),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.role_arn.is_some()
    }
}
