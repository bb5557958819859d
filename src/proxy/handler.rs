//! Invocation pipeline
//!
//! envelope -> decode -> session guard -> credential -> sign -> upstream -> NDJSON relay
//!
//! Everything up to the upstream response can still fail with a clean JSON
//! error. Once the 200 is sent, failures only reach the audit trail, logs,
//! and a trailing `error` event.

use std::convert::Infallible;
use std::fmt::Display;

use axum::{
    body::Body,
    http::{header, HeaderValue, Response, StatusCode},
    response::IntoResponse,
};
use bytes::Bytes;
use chrono::Utc;
use futures::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::Instrument;

use super::credentials::AwsCredentials;
use super::envelope::{decode_request, IdentityEnvelope, IngressEvent};
use super::error::ProxyError;
use super::isolation::enforce_session_isolation;
use super::ndjson::{StreamEvent, Utf8Decoder, NDJSON_CONTENT_TYPE, STREAM_INTERRUPTED_MESSAGE};
use super::signing::SigV4Signer;
use super::state::ProxyState;
use super::upstream::{PreparedInvocation, UpstreamStream, RUNTIME_SESSION_HEADER, SIGNING_SERVICE};
use crate::audit::{persist_detached, AuditOutcome, AuditRecord, AuditRecorder};

type Frame = Result<Bytes, Infallible>;

/// Everything needed to start streaming
struct ReadyStream {
    upstream: UpstreamStream,
    fallback_session: String,
}

/// Gateway-assigned request id, or a fresh UUID v4. A caller-supplied id is
/// only kept as `client_request_id`.
fn request_id(event: &IngressEvent) -> String {
    event
        .request_context
        .request_id
        .clone()
        .filter(|id| !id.trim().is_empty())
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string())
}

/// Run one invocation end to end
pub async fn handle_invocation(state: ProxyState, event: IngressEvent) -> Response<Body> {
    let request_id = request_id(&event);
    let envelope = IdentityEnvelope::from_authorizer(&event.request_context.authorizer);

    let span = tracing::info_span!(
        "invocation",
        request_id = %request_id,
        tenant_id = envelope.tenant_id.as_deref().unwrap_or("-"),
        app_id = envelope.app_id.as_deref().unwrap_or("-"),
        session_id = tracing::field::Empty,
        session_binding = tracing::field::Empty,
    );

    async move {
        let mut audit = AuditRecorder::start(request_id);
        audit.set_route(event.http_method.as_deref(), event.path.as_deref());
        audit.set_client_request_id(event.client_request_id.as_deref());
        audit.set_identity(
            envelope.app_id.as_deref(),
            envelope.tenant_id.as_deref(),
            envelope.session_id.as_deref(),
        );

        match prepare(&state, &event, &envelope, &mut audit).await {
            Ok(ready) => start_stream(&state, ready, audit),
            Err(err) => reject(&state, err, audit),
        }
    }
    .instrument(span)
    .await
}

/// Everything before the first response byte
async fn prepare(
    state: &ProxyState,
    event: &IngressEvent,
    envelope: &IdentityEnvelope,
    audit: &mut AuditRecorder,
) -> Result<ReadyStream, ProxyError> {
    let target = state.config.runtime.target().ok_or_else(|| {
        ProxyError::Config(
            "Missing configuration: AGENTCORE_RUNTIME_ARN and AGENTCORE_REGION are required"
                .into(),
        )
    })?;

    let request = decode_request(event)?;
    audit.set_request(&request.prompt, &request.session_id);

    let session = enforce_session_isolation(envelope, &request)?;
    let span = tracing::Span::current();
    span.record("session_id", session.session_id.as_str());
    span.record("session_binding", session.binding.as_str());

    let (credentials, scoped) = resolve_credentials(state, envelope, &target.arn).await?;
    audit.set_runtime(&target.arn, scoped);

    let now = Utc::now();
    if credentials.is_expired_at(now) {
        return Err(ProxyError::Config(
            "Runtime credentials expired before signing".into(),
        ));
    }

    let signer = SigV4Signer::new(target.region.as_str(), SIGNING_SERVICE);
    let invocation =
        PreparedInvocation::new(&target, &session.session_id, envelope, &request.prompt)?
            .sign(&signer, &credentials, now)?;
    drop(credentials);

    tracing::debug!(url = %invocation.url, scoped, "Invoking agent runtime");
    let upstream = state.runtime.invoke(invocation).await?;

    Ok(ReadyStream {
        upstream,
        fallback_session: session.session_id,
    })
}

/// Scoped credential when tenant identity and isolation are both present,
/// ambient identity otherwise. A failed scoping never falls back.
async fn resolve_credentials(
    state: &ProxyState,
    envelope: &IdentityEnvelope,
    runtime_arn: &str,
) -> Result<(AwsCredentials, bool), ProxyError> {
    match (envelope.tenant_scope(), state.scoper.as_ref()) {
        (Some((app_id, tenant_id)), Some(scoper)) => {
            let credentials = scoper
                .scope(app_id, tenant_id, runtime_arn)
                .await
                .map_err(|e| {
                    ProxyError::Config(format!("Failed to assume tenant-scoped role: {}", e))
                })?;
            Ok((credentials, true))
        }
        _ => {
            let credentials = state.ambient.credentials().await.map_err(|e| {
                ProxyError::Config(format!("Failed to resolve runtime credentials: {}", e))
            })?;
            Ok((credentials, false))
        }
    }
}

/// A `/events` body that is not a gateway event still gets an audit record
pub fn reject_malformed_event(state: &ProxyState, detail: &str) -> Response<Body> {
    let request_id = uuid::Uuid::new_v4().to_string();
    let span = tracing::info_span!("invocation", request_id = %request_id);
    let _entered = span.enter();

    let mut audit = AuditRecorder::start(request_id);
    audit.set_route(Some("POST"), Some("/events"));
    tracing::debug!(error = %detail, "Gateway event failed to parse");
    reject(
        state,
        ProxyError::InvalidRequest("Invalid gateway event".into()),
        audit,
    )
}

fn reject(state: &ProxyState, err: ProxyError, mut audit: AuditRecorder) -> Response<Body> {
    let status = err.status();
    match &err {
        ProxyError::Config(_) | ProxyError::Transport { .. } => {
            tracing::error!(status = status.as_u16(), error = %err.audit_message(), "Invocation failed")
        }
        _ => tracing::warn!(status = status.as_u16(), error = %err.audit_message(), "Invocation rejected"),
    }

    audit.fail(err.outcome(), err.audit_message());
    complete(state, audit.finish(status.as_u16()));
    err.into_response()
}

fn start_stream(state: &ProxyState, ready: ReadyStream, mut audit: AuditRecorder) -> Response<Body> {
    let session_id = ready
        .upstream
        .session_id
        .clone()
        .unwrap_or(ready.fallback_session);
    audit.set_runtime_session(&session_id);

    let (tx, rx) = mpsc::channel::<Frame>(state.config.runtime.stream_buffer);
    let relay_state = state.clone();
    let relay_session = session_id.clone();
    tokio::spawn(
        async move {
            let record = relay(ready.upstream.body, tx, &relay_session, audit).await;
            complete(&relay_state, record);
        }
        .instrument(tracing::Span::current()),
    );

    let mut response = Response::new(Body::from_stream(ReceiverStream::new(rx)));
    *response.status_mut() = StatusCode::OK;
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(NDJSON_CONTENT_TYPE),
    );
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    if let Ok(value) = HeaderValue::from_str(&session_id) {
        headers.insert(RUNTIME_SESSION_HEADER, value);
    }
    response
}

async fn send_line(tx: &mpsc::Sender<Frame>, line: Bytes) -> bool {
    tx.send(Ok(line)).await.is_ok()
}

async fn send_delta(tx: &mpsc::Sender<Frame>, delta: &str, audit: &mut AuditRecorder) -> bool {
    if !send_line(tx, StreamEvent::Delta { delta }.to_line()).await {
        return false;
    }
    audit.observe_delta(delta);
    true
}

/// Forward the upstream body as NDJSON, one delta per decoded chunk.
///
/// Each send waits for channel capacity, so the next upstream read only
/// happens once the caller has room.
pub(crate) async fn relay<S, E>(
    mut upstream: S,
    tx: mpsc::Sender<Frame>,
    session_id: &str,
    mut audit: AuditRecorder,
) -> AuditRecord
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
    E: Display,
{
    if !send_line(&tx, StreamEvent::Meta { session_id }.to_line()).await {
        audit.fail(AuditOutcome::ClientDisconnected, "caller disconnected before first event");
        return audit.finish(StatusCode::OK.as_u16());
    }

    let mut decoder = Utf8Decoder::new();
    let mut connected = true;

    while let Some(chunk) = upstream.next().await {
        match chunk {
            Ok(bytes) => {
                let delta = decoder.push(&bytes);
                if delta.is_empty() {
                    continue;
                }
                if !send_delta(&tx, &delta, &mut audit).await {
                    connected = false;
                    break;
                }
            }
            Err(e) => {
                tracing::error!(error = %e, "Upstream stream failed after response started");
                audit.fail(
                    AuditOutcome::ErrorAfterStream,
                    format!("upstream stream failed: {}", e),
                );
                if let Some(rest) = decoder.finish() {
                    connected = send_delta(&tx, &rest, &mut audit).await;
                }
                if connected {
                    send_line(
                        &tx,
                        StreamEvent::Error {
                            error: STREAM_INTERRUPTED_MESSAGE,
                        }
                        .to_line(),
                    )
                    .await;
                }
                return audit.finish(StatusCode::OK.as_u16());
            }
        }
    }

    if connected {
        if let Some(rest) = decoder.finish() {
            connected = send_delta(&tx, &rest, &mut audit).await;
        }
    }
    if !connected {
        tracing::info!("Caller disconnected mid-stream");
        audit.fail(AuditOutcome::ClientDisconnected, "caller disconnected mid-stream");
    }

    audit.finish(StatusCode::OK.as_u16())
}

/// Log the finished request and hand the record to the sink
fn complete(state: &ProxyState, record: AuditRecord) {
    tracing::info!(
        outcome = ?record.outcome,
        status = record.http_status,
        chunks = record.response_delta_chunks,
        bytes = record.response_bytes,
        duration_ms = record.duration_ms,
        "Invocation complete"
    );
    if let Some(sink) = state.audit_sink.clone() {
        persist_detached(sink, record);
    }
}
