//! Audit persistence configuration

use serde::Deserialize;
use std::path::PathBuf;

use super::{non_empty, parse_flag};

/// Audit record persistence
#[derive(Debug, Clone)]
pub struct AuditConfig {
    /// Master switch (AUDIT_LOGS_ENABLED)
    pub enabled: bool,
    /// Destination bucket name
    pub bucket: Option<String>,
    /// Leading key segment for every record
    pub prefix: String,
    /// Local directory destination, used when no bucket is configured
    pub dir: Option<PathBuf>,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bucket: None,
            prefix: "bff-audit".to_string(),
            dir: None,
        }
    }
}

/// Audit settings as loaded from config file
#[derive(Debug, Deserialize, Default)]
pub struct FileAudit {
    pub enabled: Option<bool>,
    pub bucket: Option<String>,
    pub prefix: Option<String>,
    pub dir: Option<String>,
}

/// Where finalized audit records go
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuditDestination {
    Bucket(String),
    Directory(PathBuf),
}

impl AuditConfig {
    /// Create from file config and environment, env winning
    pub fn from_file<F>(file: Option<FileAudit>, env: &F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let file = file.unwrap_or_default();
        let defaults = Self::default();

        let enabled = env("AUDIT_LOGS_ENABLED")
            .map(|v| parse_flag(&v))
            .or(file.enabled)
            .unwrap_or(defaults.enabled);

        Self {
            enabled,
            bucket: non_empty(env("AUDIT_LOGS_BUCKET").or(file.bucket)),
            prefix: non_empty(env("AUDIT_LOGS_PREFIX").or(file.prefix))
                .map(|p| p.trim_matches('/').to_string())
                .filter(|p| !p.is_empty())
                .unwrap_or(defaults.prefix),
            dir: non_empty(env("AUDIT_LOGS_DIR").or(file.dir)).map(PathBuf::from),
        }
    }

    /// Resolved destination; a bucket wins over a local directory
    pub fn destination(&self) -> Option<AuditDestination> {
        if !self.enabled {
            return None;
        }
        if let Some(bucket) = &self.bucket {
            return Some(AuditDestination::Bucket(bucket.clone()));
        }
        self.dir.clone().map(AuditDestination::Directory)
    }
}
