//! Audit persistence targets
//!
//! Sinks report errors, callers decide what to do with them. The request
//! pipeline only ever goes through [`persist_detached`], which logs and drops.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::ServerSideEncryption;
use tokio::io::AsyncWriteExt;

use super::{AuditRecord, KeyLayout};

#[derive(Debug, thiserror::Error)]
pub enum AuditSinkError {
    #[error("failed to serialize audit record: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("invalid key layout: {0}")]
    Layout(#[from] regex::Error),
    #[error("failed to write audit record to {key}: {source}")]
    Io {
        key: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to put audit record {key}: {message}")]
    Store { key: String, message: String },
    #[error("audit record {key} already exists")]
    Exists { key: String },
}

#[async_trait]
pub trait AuditSink: Send + Sync {
    /// Write one finalized record; returns the key it was stored under
    async fn persist(&self, record: &AuditRecord) -> Result<String, AuditSinkError>;
}

/// Persist on a separate task. Failures are logged and swallowed.
pub fn persist_detached(
    sink: Arc<dyn AuditSink>,
    record: AuditRecord,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        match sink.persist(&record).await {
            Ok(key) => tracing::debug!(
                request_id = %record.request_id,
                key = %key,
                "Audit record persisted"
            ),
            Err(e) => tracing::warn!(
                request_id = %record.request_id,
                error = %e,
                "Failed to persist audit record"
            ),
        }
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// S3
// ─────────────────────────────────────────────────────────────────────────────

/// One encrypted object per record
pub struct S3AuditSink {
    client: aws_sdk_s3::Client,
    bucket: String,
    layout: KeyLayout,
}

impl S3AuditSink {
    pub fn new(
        sdk_config: &aws_config::SdkConfig,
        bucket: impl Into<String>,
        prefix: &str,
    ) -> Result<Self, AuditSinkError> {
        Ok(Self {
            client: aws_sdk_s3::Client::new(sdk_config),
            bucket: bucket.into(),
            layout: KeyLayout::new(prefix)?,
        })
    }
}

#[async_trait]
impl AuditSink for S3AuditSink {
    async fn persist(&self, record: &AuditRecord) -> Result<String, AuditSinkError> {
        let key = self.layout.object_key(record);
        let body = serde_json::to_vec(record)?;

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&key)
            .body(ByteStream::from(body))
            .content_type("application/json")
            .server_side_encryption(ServerSideEncryption::Aes256)
            .if_none_match("*")
            .send()
            .await
            .map_err(|e| AuditSinkError::Store {
                key: key.clone(),
                message: aws_sdk_s3::error::DisplayErrorContext(&e).to_string(),
            })?;

        Ok(key)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Local directory
// ─────────────────────────────────────────────────────────────────────────────

/// Same key layout as S3, rooted at a local directory
pub struct FileAuditSink {
    root: PathBuf,
    layout: KeyLayout,
}

impl FileAuditSink {
    pub fn new(root: impl Into<PathBuf>, prefix: &str) -> Result<Self, AuditSinkError> {
        Ok(Self {
            root: root.into(),
            layout: KeyLayout::new(prefix)?,
        })
    }
}

#[async_trait]
impl AuditSink for FileAuditSink {
    async fn persist(&self, record: &AuditRecord) -> Result<String, AuditSinkError> {
        let key = self.layout.object_key(record);
        let path = self.root.join(&key);
        let json = serde_json::to_vec_pretty(record)?;

        let io_err = |source| AuditSinkError::Io {
            key: key.clone(),
            source,
        };
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
        }
        let mut file = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
            .map_err(|source| match source.kind() {
                std::io::ErrorKind::AlreadyExists => AuditSinkError::Exists { key: key.clone() },
                _ => io_err(source),
            })?;
        file.write_all(&json).await.map_err(io_err)?;
        file.flush().await.map_err(io_err)?;

        Ok(key)
    }
}
