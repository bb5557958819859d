//! Session isolation guard
//!
//! Runs before any credential is minted or any byte leaves the process.

use super::envelope::{IdentityEnvelope, InvocationRequest};
use super::error::ProxyError;

/// Whether the authorizer bound the caller to a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionBinding {
    Bound,
    /// No authorized session id: the requested one is used unchecked
    Absent,
}

impl SessionBinding {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionBinding::Bound => "bound",
            SessionBinding::Absent => "absent",
        }
    }
}

/// The session the rest of the pipeline runs under
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedSession {
    pub session_id: String,
    pub binding: SessionBinding,
}

/// Reject a requested session that disagrees with the authorizer-bound one.
///
/// An absent binding is allowed through with the requested (or default) id.
pub fn enforce_session_isolation(
    envelope: &IdentityEnvelope,
    request: &InvocationRequest,
) -> Result<ResolvedSession, ProxyError> {
    match envelope.session_id.as_deref() {
        Some(authorized) if authorized != request.session_id => {
            tracing::warn!(
                requested_session = %request.session_id,
                authorized_session = %authorized,
                "Rejecting request for foreign session"
            );
            Err(ProxyError::SessionIsolation)
        }
        Some(authorized) => Ok(ResolvedSession {
            session_id: authorized.to_string(),
            binding: SessionBinding::Bound,
        }),
        None => {
            tracing::warn!(
                session_binding = SessionBinding::Absent.as_str(),
                requested_session = %request.session_id,
                "No authorized session id; using requested session"
            );
            Ok(ResolvedSession {
                session_id: request.session_id.clone(),
                binding: SessionBinding::Absent,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(session: &str) -> InvocationRequest {
        InvocationRequest {
            prompt: "p".into(),
            session_id: session.into(),
        }
    }

    fn bound_to(session: &str) -> IdentityEnvelope {
        IdentityEnvelope {
            session_id: Some(session.into()),
            ..Default::default()
        }
    }

    #[test]
    fn test_matching_session_passes() {
        let resolved = enforce_session_isolation(&bound_to("s-1"), &request("s-1")).unwrap();
        assert_eq!(resolved.session_id, "s-1");
        assert_eq!(resolved.binding, SessionBinding::Bound);
    }

    #[test]
    fn test_mismatched_session_is_rejected() {
        let err = enforce_session_isolation(&bound_to("s-1"), &request("s-2")).unwrap_err();
        assert!(matches!(err, ProxyError::SessionIsolation));
    }

    #[test]
    fn test_default_session_against_binding_is_rejected() {
        let err = enforce_session_isolation(
            &bound_to("s-1"),
            &request(super::super::envelope::DEFAULT_SESSION_ID),
        )
        .unwrap_err();
        assert!(matches!(err, ProxyError::SessionIsolation));
    }

    #[test]
    fn test_absent_binding_is_default_open() {
        let resolved =
            enforce_session_isolation(&IdentityEnvelope::default(), &request("anything")).unwrap();
        assert_eq!(resolved.session_id, "anything");
        assert_eq!(resolved.binding, SessionBinding::Absent);
    }
}
