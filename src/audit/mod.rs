// Audit module - one tamper-evident record per request
//
// The recorder accumulates fingerprints while the request runs and is
// consumed exactly once by `finish`, producing an immutable `AuditRecord`.
// Persistence happens elsewhere (see `sink`) and can never affect the
// response the caller already received.
//
// Object layout:
//   <prefix>/<app>/<tenant>/year=YYYY/month=MM/day=DD/<request_id>.json
//
// Sinks write create-only, so an existing record is never replaced.

pub mod sink;

pub use sink::{persist_detached, AuditSink, AuditSinkError, FileAuditSink, S3AuditSink};

use std::time::Instant;

use chrono::{DateTime, Datelike, Utc};
use regex::Regex;
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::util::{sha256_hex, truncate_chars, truncate_utf8_safe};

/// Prompt preview cap, in characters
pub const REQUEST_PREVIEW_CHARS: usize = 4096;
/// Response preview cap, in bytes
pub const RESPONSE_PREVIEW_BYTES: usize = 16384;

/// How a request ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditOutcome {
    Started,
    Success,
    ConfigError,
    InvalidRequest,
    SessionIsolationViolation,
    UpstreamError,
    TransportError,
    ErrorAfterStream,
    ClientDisconnected,
    /// Error status with no more specific cause recorded
    Error,
}

/// Finalized, immutable audit record
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuditRecord {
    pub request_id: String,
    /// Caller-supplied correlation id, untrusted
    pub client_request_id: Option<String>,
    pub method: Option<String>,
    pub path: Option<String>,
    pub app_id: Option<String>,
    pub tenant_id: Option<String>,
    pub requested_session_id: Option<String>,
    pub authorized_session_id: Option<String>,
    pub runtime_session_id: Option<String>,
    pub runtime_arn: Option<String>,
    pub scoped_credentials: bool,

    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub duration_ms: u64,

    pub request_chars: usize,
    pub request_sha256: Option<String>,
    pub request_preview: String,
    pub request_preview_truncated: bool,

    pub response_delta_chunks: u64,
    pub response_bytes: u64,
    pub response_sha256: String,
    pub response_preview: String,
    pub response_preview_truncated: bool,

    pub outcome: AuditOutcome,
    pub http_status: u16,
    pub error_message: Option<String>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Key layout
// ─────────────────────────────────────────────────────────────────────────────

/// Builds storage keys: prefix, then tenant and start-date partitions
#[derive(Debug, Clone)]
pub struct KeyLayout {
    prefix: String,
    unsafe_chars: Regex,
}

impl KeyLayout {
    pub fn new(prefix: impl Into<String>) -> Result<Self, regex::Error> {
        Ok(Self {
            prefix: prefix.into(),
            unsafe_chars: Regex::new(r"[^A-Za-z0-9._=-]")?,
        })
    }

    /// Key-safe segment; empty or dot-only values become `unknown`
    pub fn segment(&self, value: Option<&str>) -> String {
        let cleaned = self
            .unsafe_chars
            .replace_all(value.unwrap_or_default(), "_")
            .into_owned();
        if cleaned.trim_matches('.').is_empty() {
            "unknown".to_string()
        } else {
            cleaned
        }
    }

    pub fn object_key(&self, record: &AuditRecord) -> String {
        format!(
            "{}/{}/{}/year={:04}/month={:02}/day={:02}/{}.json",
            self.prefix,
            self.segment(record.app_id.as_deref()),
            self.segment(record.tenant_id.as_deref()),
            record.started_at.year(),
            record.started_at.month(),
            record.started_at.day(),
            self.segment(Some(&record.request_id)),
        )
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Recorder
// ─────────────────────────────────────────────────────────────────────────────

/// Mutable accumulator for one request
pub struct AuditRecorder {
    request_id: String,
    client_request_id: Option<String>,
    method: Option<String>,
    path: Option<String>,
    app_id: Option<String>,
    tenant_id: Option<String>,
    requested_session_id: Option<String>,
    authorized_session_id: Option<String>,
    runtime_session_id: Option<String>,
    runtime_arn: Option<String>,
    scoped_credentials: bool,

    started_at: DateTime<Utc>,
    started: Instant,

    request_chars: usize,
    request_sha256: Option<String>,
    request_preview: String,
    request_preview_truncated: bool,

    response_delta_chunks: u64,
    response_bytes: u64,
    response_hasher: Sha256,
    response_preview: String,
    response_preview_truncated: bool,

    outcome: AuditOutcome,
    error_message: Option<String>,
}

impl AuditRecorder {
    pub fn start(request_id: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            client_request_id: None,
            method: None,
            path: None,
            app_id: None,
            tenant_id: None,
            requested_session_id: None,
            authorized_session_id: None,
            runtime_session_id: None,
            runtime_arn: None,
            scoped_credentials: false,
            started_at: Utc::now(),
            started: Instant::now(),
            request_chars: 0,
            request_sha256: None,
            request_preview: String::new(),
            request_preview_truncated: false,
            response_delta_chunks: 0,
            response_bytes: 0,
            response_hasher: Sha256::new(),
            response_preview: String::new(),
            response_preview_truncated: false,
            outcome: AuditOutcome::Started,
            error_message: None,
        }
    }

    pub fn set_client_request_id(&mut self, id: Option<&str>) {
        self.client_request_id = id.map(str::to_string);
    }

    pub fn set_route(&mut self, method: Option<&str>, path: Option<&str>) {
        self.method = method.map(str::to_string);
        self.path = path.map(str::to_string);
    }

    pub fn set_identity(
        &mut self,
        app_id: Option<&str>,
        tenant_id: Option<&str>,
        authorized_session_id: Option<&str>,
    ) {
        self.app_id = app_id.map(str::to_string);
        self.tenant_id = tenant_id.map(str::to_string);
        self.authorized_session_id = authorized_session_id.map(str::to_string);
    }

    /// Fingerprint the inbound prompt
    pub fn set_request(&mut self, prompt: &str, requested_session_id: &str) {
        self.request_chars = prompt.chars().count();
        self.request_sha256 = Some(sha256_hex(prompt));
        self.request_preview = truncate_chars(prompt, REQUEST_PREVIEW_CHARS).to_string();
        self.request_preview_truncated = self.request_chars > REQUEST_PREVIEW_CHARS;
        self.requested_session_id = Some(requested_session_id.to_string());
    }

    pub fn set_runtime(&mut self, runtime_arn: &str, scoped_credentials: bool) {
        self.runtime_arn = Some(runtime_arn.to_string());
        self.scoped_credentials = scoped_credentials;
    }

    pub fn set_runtime_session(&mut self, session_id: &str) {
        self.runtime_session_id = Some(session_id.to_string());
    }

    /// Account for one delta sent to the caller
    pub fn observe_delta(&mut self, delta: &str) {
        self.response_delta_chunks += 1;
        self.response_bytes += delta.len() as u64;
        self.response_hasher.update(delta.as_bytes());

        if self.response_preview_truncated {
            return;
        }
        let room = RESPONSE_PREVIEW_BYTES - self.response_preview.len();
        if delta.len() <= room {
            self.response_preview.push_str(delta);
        } else {
            self.response_preview
                .push_str(truncate_utf8_safe(delta, room));
            self.response_preview_truncated = true;
        }
    }

    /// Record a failure. The first failure wins.
    pub fn fail(&mut self, outcome: AuditOutcome, message: impl Into<String>) {
        if self.outcome != AuditOutcome::Started {
            return;
        }
        self.outcome = outcome;
        self.error_message = Some(message.into());
    }

    /// Finalize into an immutable record
    pub fn finish(self, http_status: u16) -> AuditRecord {
        let outcome = match self.outcome {
            AuditOutcome::Started if http_status < 400 => AuditOutcome::Success,
            AuditOutcome::Started => AuditOutcome::Error,
            other => other,
        };

        AuditRecord {
            request_id: self.request_id,
            client_request_id: self.client_request_id,
            method: self.method,
            path: self.path,
            app_id: self.app_id,
            tenant_id: self.tenant_id,
            requested_session_id: self.requested_session_id,
            authorized_session_id: self.authorized_session_id,
            runtime_session_id: self.runtime_session_id,
            runtime_arn: self.runtime_arn,
            scoped_credentials: self.scoped_credentials,
            started_at: self.started_at,
            completed_at: Utc::now(),
            duration_ms: self.started.elapsed().as_millis() as u64,
            request_chars: self.request_chars,
            request_sha256: self.request_sha256,
            request_preview: self.request_preview,
            request_preview_truncated: self.request_preview_truncated,
            response_delta_chunks: self.response_delta_chunks,
            response_bytes: self.response_bytes,
            response_sha256: hex::encode(self.response_hasher.finalize()),
            response_preview: self.response_preview,
            response_preview_truncated: self.response_preview_truncated,
            outcome,
            http_status,
            error_message: self.error_message,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_prompt_preview_truncates_at_char_cap() {
        let mut recorder = AuditRecorder::start("r");
        let prompt = "é".repeat(5000);
        recorder.set_request(&prompt, "default-session");

        let record = recorder.finish(200);
        assert_eq!(record.request_chars, 5000);
        assert_eq!(record.request_preview.chars().count(), 4096);
        assert!(record.request_preview_truncated);
        assert_eq!(record.request_sha256, Some(sha256_hex(&prompt)));
    }

    #[test]
    fn test_short_prompt_is_not_truncated() {
        let mut recorder = AuditRecorder::start("r");
        recorder.set_request("hello", "s");
        let record = recorder.finish(200);
        assert_eq!(record.request_preview, "hello");
        assert!(!record.request_preview_truncated);
    }

    #[test]
    fn test_response_preview_caps_at_bytes() {
        let mut recorder = AuditRecorder::start("r");
        let chunk = "x".repeat(1000);
        for _ in 0..17 {
            recorder.observe_delta(&chunk);
        }

        let record = recorder.finish(200);
        assert_eq!(record.response_bytes, 17000);
        assert_eq!(record.response_delta_chunks, 17);
        assert_eq!(record.response_preview.len(), 16384);
        assert!(record.response_preview_truncated);
        assert_eq!(record.response_sha256, sha256_hex(chunk.repeat(17)));
    }

    #[test]
    fn test_response_preview_exact_cap_not_truncated() {
        let mut recorder = AuditRecorder::start("r");
        recorder.observe_delta(&"y".repeat(RESPONSE_PREVIEW_BYTES));
        let record = recorder.finish(200);
        assert_eq!(record.response_preview.len(), RESPONSE_PREVIEW_BYTES);
        assert!(!record.response_preview_truncated);
    }

    #[test]
    fn test_response_preview_respects_char_boundary() {
        let mut recorder = AuditRecorder::start("r");
        recorder.observe_delta(&"a".repeat(RESPONSE_PREVIEW_BYTES - 1));
        recorder.observe_delta("€");

        let record = recorder.finish(200);
        assert_eq!(record.response_preview.len(), RESPONSE_PREVIEW_BYTES - 1);
        assert!(record.response_preview_truncated);
    }

    #[test]
    fn test_empty_response_hash() {
        let record = AuditRecorder::start("r").finish(200);
        assert_eq!(record.response_sha256, sha256_hex(""));
        assert_eq!(record.response_delta_chunks, 0);
    }

    #[test]
    fn test_outcome_defaults_from_status() {
        assert_eq!(AuditRecorder::start("r").finish(200).outcome, AuditOutcome::Success);
        assert_eq!(AuditRecorder::start("r").finish(502).outcome, AuditOutcome::Error);
    }

    #[test]
    fn test_first_failure_wins() {
        let mut recorder = AuditRecorder::start("r");
        recorder.fail(AuditOutcome::ErrorAfterStream, "reset");
        recorder.fail(AuditOutcome::ClientDisconnected, "gone");

        let record = recorder.finish(200);
        assert_eq!(record.outcome, AuditOutcome::ErrorAfterStream);
        assert_eq!(record.error_message.as_deref(), Some("reset"));
    }

    #[test]
    fn test_record_serializes_snake_case() {
        let mut recorder = AuditRecorder::start("r");
        recorder.fail(AuditOutcome::SessionIsolationViolation, "mismatch");
        let value = serde_json::to_value(recorder.finish(403)).unwrap();

        assert_eq!(value["outcome"], "session_isolation_violation");
        assert_eq!(value["http_status"], 403);
        assert!(value.get("response_delta_chunks").is_some());
    }

    #[test]
    fn test_object_key_layout() {
        let mut recorder = AuditRecorder::start("req/1");
        recorder.set_identity(Some("app A"), Some("tenant-A"), None);
        let mut record = recorder.finish(200);
        record.started_at = Utc.with_ymd_and_hms(2025, 3, 7, 10, 0, 0).unwrap();

        let layout = KeyLayout::new("bff-audit").unwrap();
        assert_eq!(
            layout.object_key(&record),
            "bff-audit/app_A/tenant-A/year=2025/month=03/day=07/req_1.json"
        );
    }

    #[test]
    fn test_segment_edge_cases() {
        let layout = KeyLayout::new("p").unwrap();
        assert_eq!(layout.segment(None), "unknown");
        assert_eq!(layout.segment(Some("")), "unknown");
        assert_eq!(layout.segment(Some("..")), "unknown");
        assert_eq!(layout.segment(Some("a/../b")), "a_.._b");
        assert_eq!(layout.segment(Some("year=2025")), "year=2025");
    }
}
