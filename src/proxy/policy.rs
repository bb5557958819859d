//! Typed inline session policy for tenant-scoped credentials
//!
//! The document is built from validated identifiers and serialized once.
//! A tenant or app segment can never widen into a wildcard.

use std::collections::BTreeMap;

use serde::Serialize;

/// STS rejects packed inline policies above this size
pub const MAX_POLICY_BYTES: usize = 2048;

const POLICY_VERSION: &str = "2012-10-17";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PolicyError {
    #[error("{field} is empty")]
    Empty { field: &'static str },
    #[error("{field} contains a character not allowed in a policy resource: {value:?}")]
    ForbiddenCharacter { field: &'static str, value: String },
    #[error("session policy is {0} bytes, above the {MAX_POLICY_BYTES} byte limit")]
    TooLarge(usize),
    #[error("failed to serialize session policy: {0}")]
    Serialize(String),
}

// ─────────────────────────────────────────────────────────────────────────────
// Validated scope
// ─────────────────────────────────────────────────────────────────────────────

fn validate_segment(field: &'static str, value: &str) -> Result<String, PolicyError> {
    if value.is_empty() {
        return Err(PolicyError::Empty { field });
    }
    let forbidden = |c: char| matches!(c, '*' | '?' | '/' | '$') || c.is_control();
    if value.chars().any(forbidden) {
        return Err(PolicyError::ForbiddenCharacter {
            field,
            value: value.to_string(),
        });
    }
    Ok(value.to_string())
}

/// An `(app_id, tenant_id)` pair that is safe to interpolate into resources
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TenantScope {
    app_id: String,
    tenant_id: String,
}

impl TenantScope {
    pub fn new(app_id: &str, tenant_id: &str) -> Result<Self, PolicyError> {
        Ok(Self {
            app_id: validate_segment("app_id", app_id)?,
            tenant_id: validate_segment("tenant_id", tenant_id)?,
        })
    }

    pub fn app_id(&self) -> &str {
        &self.app_id
    }

    pub fn tenant_id(&self) -> &str {
        &self.tenant_id
    }

    /// `{app_id}/{tenant_id}`
    pub fn key_prefix(&self) -> String {
        format!("{}/{}", self.app_id, self.tenant_id)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Document model
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Effect {
    Allow,
}

/// `{"StringLike": {"s3:prefix": ["..."]}}`
pub type Condition = BTreeMap<&'static str, BTreeMap<&'static str, Vec<String>>>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Statement {
    pub sid: &'static str,
    pub effect: Effect,
    pub action: Vec<&'static str>,
    pub resource: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub condition: Option<Condition>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct PolicyDocument {
    pub version: &'static str,
    pub statement: Vec<Statement>,
}

/// A built policy together with its serialized form
#[derive(Debug, Clone)]
pub struct SessionPolicy {
    pub document: PolicyDocument,
    pub json: String,
}

impl SessionPolicy {
    /// Every storage resource the policy grants
    pub fn storage_resources(&self) -> impl Iterator<Item = &str> {
        self.document
            .statement
            .iter()
            .filter(|s| s.action.iter().any(|a| a.starts_with("s3:")))
            .flat_map(|s| s.resource.iter().map(String::as_str))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Builder
// ─────────────────────────────────────────────────────────────────────────────

pub struct SessionPolicyBuilder<'a> {
    scope: &'a TenantScope,
    runtime_arn: &'a str,
    bucket_arn: &'a str,
}

impl<'a> SessionPolicyBuilder<'a> {
    pub fn new(scope: &'a TenantScope, runtime_arn: &'a str, bucket_arn: &'a str) -> Self {
        Self {
            scope,
            runtime_arn,
            bucket_arn,
        }
    }

    pub fn build(&self) -> Result<SessionPolicy, PolicyError> {
        let prefix = self.scope.key_prefix();

        let storage = Statement {
            sid: "TenantStorageAccess",
            effect: Effect::Allow,
            action: vec!["s3:GetObject", "s3:PutObject", "s3:DeleteObject"],
            resource: vec![format!("{}/{}/*", self.bucket_arn, prefix)],
            condition: None,
        };

        let mut list_condition = Condition::new();
        list_condition.insert(
            "StringLike",
            BTreeMap::from([("s3:prefix", vec![format!("{}/*", prefix)])]),
        );
        let listing = Statement {
            sid: "TenantStorageList",
            effect: Effect::Allow,
            action: vec!["s3:ListBucket"],
            resource: vec![self.bucket_arn.to_string()],
            condition: Some(list_condition),
        };

        let invoke = Statement {
            sid: "InvokeAgentRuntime",
            effect: Effect::Allow,
            action: vec![
                "bedrock-agentcore:InvokeAgentRuntime",
                "bedrock-agentcore:InvokeAgentRuntimeWithWebSocketStream",
            ],
            resource: vec![
                self.runtime_arn.to_string(),
                format!("{}/runtime-endpoint/*", self.runtime_arn),
            ],
            condition: None,
        };

        let document = PolicyDocument {
            version: POLICY_VERSION,
            statement: vec![storage, listing, invoke],
        };

        let json = serde_json::to_string(&document)
            .map_err(|e| PolicyError::Serialize(e.to_string()))?;
        if json.len() > MAX_POLICY_BYTES {
            return Err(PolicyError::TooLarge(json.len()));
        }

        Ok(SessionPolicy { document, json })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RUNTIME: &str = "arn:aws:bedrock-agentcore:us-east-1:123456789012:runtime/agent-1";

    fn build(app: &str, tenant: &str) -> SessionPolicy {
        let scope = TenantScope::new(app, tenant).unwrap();
        SessionPolicyBuilder::new(&scope, RUNTIME, "arn:aws:s3:::*")
            .build()
            .unwrap()
    }

    #[test]
    fn test_storage_prefix_is_tenant_scoped() {
        let policy = build("app-A", "tenant-A");

        let storage: Vec<&str> = policy.storage_resources().collect();
        assert!(storage.contains(&"arn:aws:s3:::*/app-A/tenant-A/*"));
        assert!(policy.json.contains("/app-A/tenant-A/"));
        assert!(!policy.json.contains("tenant-B"));
        assert!(!policy.json.contains("/*/"));
    }

    #[test]
    fn test_runtime_invocation_is_single_resource() {
        let policy = build("app-A", "tenant-A");
        let invoke = policy
            .document
            .statement
            .iter()
            .find(|s| s.sid == "InvokeAgentRuntime")
            .unwrap();

        assert_eq!(
            invoke.resource,
            vec![
                RUNTIME.to_string(),
                format!("{}/runtime-endpoint/*", RUNTIME)
            ]
        );
    }

    #[test]
    fn test_serialized_shape() {
        let policy = build("a", "t");
        let value: serde_json::Value = serde_json::from_str(&policy.json).unwrap();

        assert_eq!(value["Version"], "2012-10-17");
        assert_eq!(value["Statement"][0]["Effect"], "Allow");
        assert_eq!(
            value["Statement"][1]["Condition"]["StringLike"]["s3:prefix"][0],
            "a/t/*"
        );
        assert!(value["Statement"][0].get("Condition").is_none());
    }

    #[test]
    fn test_wildcard_segments_are_rejected() {
        for bad in ["*", "ten*", "t?", "a/b", "", "t\n", "${aws:username}"] {
            assert!(TenantScope::new("app", bad).is_err(), "tenant {:?}", bad);
            assert!(TenantScope::new(bad, "tenant").is_err(), "app {:?}", bad);
        }
    }

    #[test]
    fn test_oversized_policy_is_rejected() {
        let long = "x".repeat(MAX_POLICY_BYTES);
        let scope = TenantScope::new("app", &long).unwrap();
        let err = SessionPolicyBuilder::new(&scope, RUNTIME, "arn:aws:s3:::*")
            .build()
            .unwrap_err();
        assert!(matches!(err, PolicyError::TooLarge(_)));
    }
}
