//! Config serialization to TOML
//!
//! Single source of truth for config file format.

use super::Config;

/// Render an optional value as a live key, or as a commented-out example
fn optional_key(key: &str, value: Option<&str>, example: &str) -> String {
    match value {
        Some(v) => format!("{} = {:?}\n", key, v),
        None => format!("# {} = {:?}\n", key, example),
    }
}

impl Config {
    /// Serialize to a commented TOML document that parses back into `FileConfig`
    pub fn to_toml(&self) -> String {
        let mut out = String::new();

        out.push_str("# tenant-relay configuration\n");
        out.push_str("# Environment variables override every value in this file.\n\n");
        out.push_str(&format!("bind_addr = {:?}\n", self.bind_addr.to_string()));

        out.push_str("\n[runtime]\n");
        out.push_str("# AGENTCORE_RUNTIME_ARN / AGENTCORE_REGION are mandatory\n");
        out.push_str(&optional_key(
            "arn",
            self.runtime.arn.as_deref(),
            "arn:aws:bedrock-agentcore:us-east-1:123456789012:runtime/agent-abc123",
        ));
        out.push_str(&optional_key(
            "region",
            self.runtime.region.as_deref(),
            "us-east-1",
        ));
        out.push_str(&format!("qualifier = {:?}\n", self.runtime.qualifier));
        out.push_str(&optional_key(
            "endpoint",
            self.runtime.endpoint.as_deref(),
            "http://127.0.0.1:9000",
        ));
        out.push_str(&format!("timeout_secs = {}\n", self.runtime.timeout_secs));
        out.push_str(&format!(
            "connect_timeout_secs = {}\n",
            self.runtime.connect_timeout_secs
        ));
        out.push_str(&format!("stream_buffer = {}\n", self.runtime.stream_buffer));

        out.push_str("\n[isolation]\n");
        out.push_str("# Setting role_arn enables per-tenant scoped credentials\n");
        out.push_str(&optional_key(
            "role_arn",
            self.isolation.role_arn.as_deref(),
            "arn:aws:iam::123456789012:role/tenant-relay-isolation",
        ));
        out.push_str(&format!("bucket_arn = {:?}\n", self.isolation.bucket_arn));
        out.push_str(&format!(
            "duration_secs = {}\n",
            self.isolation.duration_secs
        ));

        out.push_str("\n[audit]\n");
        out.push_str(&format!("enabled = {}\n", self.audit.enabled));
        out.push_str(&optional_key(
            "bucket",
            self.audit.bucket.as_deref(),
            "my-audit-bucket",
        ));
        out.push_str(&format!("prefix = {:?}\n", self.audit.prefix));
        let dir = self.audit.dir.as_ref().map(|d| d.display().to_string());
        out.push_str(&optional_key("dir", dir.as_deref(), "./audit"));

        out.push_str("\n[logging]\n");
        out.push_str(&format!("level = {:?}\n", self.logging.level));
        out.push_str(&format!("json = {}\n", self.logging.json));
        out.push_str(&format!("file_enabled = {}\n", self.logging.file_enabled));
        out.push_str(&format!(
            "file_dir = {:?}\n",
            self.logging.file_dir.display().to_string()
        ));
        out.push_str(&format!(
            "file_rotation = {:?}\n",
            self.logging.file_rotation.as_str()
        ));
        out.push_str(&format!("file_prefix = {:?}\n", self.logging.file_prefix));

        out
    }
}
