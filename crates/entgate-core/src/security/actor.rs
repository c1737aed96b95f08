//! The acting principal.

use crate::error::{Error, Result};
use std::collections::BTreeSet;

/// Who is performing an operation.
///
/// Every operation carries an actor; there is no anonymous path. Group
/// membership is expressed as claims such as `group:<id>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    tenant_id: String,
    subject_id: String,
    role_claims: BTreeSet<String>,
    internal: bool,
}

impl Actor {
    /// Create an actor. Tenant and subject must be non-empty.
    pub fn new(tenant_id: impl Into<String>, subject_id: impl Into<String>) -> Result<Self> {
        let tenant_id = tenant_id.into();
        let subject_id = subject_id.into();
        if tenant_id.trim().is_empty() {
            return Err(Error::validation("actor", Some("tenant_id"), "tenant id is empty"));
        }
        if subject_id.trim().is_empty() {
            return Err(Error::validation("actor", Some("subject_id"), "subject id is empty"));
        }
        Ok(Self {
            tenant_id,
            subject_id,
            role_claims: BTreeSet::new(),
            internal: false,
        })
    }

    /// Create a trusted system actor that bypasses policy evaluation.
    ///
    /// Mutations by internal actors are still audited under `subject_id`.
    pub fn internal(tenant_id: impl Into<String>, subject_id: impl Into<String>) -> Result<Self> {
        Ok(Self::new(tenant_id, subject_id)?.elevated())
    }

    /// Mark this actor as internal.
    pub fn elevated(mut self) -> Self {
        self.internal = true;
        self
    }

    /// Add a role claim.
    pub fn with_claim(mut self, claim: impl Into<String>) -> Self {
        self.role_claims.insert(claim.into());
        self
    }

    /// Add several role claims.
    pub fn with_claims<I, S>(mut self, claims: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.role_claims.extend(claims.into_iter().map(Into::into));
        self
    }

    pub fn tenant_id(&self) -> &str {
        &self.tenant_id
    }

    pub fn subject_id(&self) -> &str {
        &self.subject_id
    }

    pub fn claims(&self) -> &BTreeSet<String> {
        &self.role_claims
    }

    /// Check if the actor holds a claim.
    pub fn has_claim(&self, claim: &str) -> bool {
        self.role_claims.contains(claim)
    }

    /// Claim suffixes for every claim starting with `prefix`.
    ///
    /// With prefix `group:`, the claim `group:auditors` yields `auditors`.
    pub fn claims_with_prefix<'a>(&'a self, prefix: &'a str) -> impl Iterator<Item = &'a str> {
        self.role_claims
            .iter()
            .filter_map(move |c| c.strip_prefix(prefix))
            .filter(|rest| !rest.is_empty())
    }

    pub fn is_internal(&self) -> bool {
        self.internal
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_requires_identity() {
        assert_eq!(
            Actor::new("", "u1").unwrap_err().kind(),
            ErrorKind::Validation
        );
        assert!(Actor::new("org_1", "  ").is_err());
        let actor = Actor::new("org_1", "u1").unwrap();
        assert_eq!(actor.tenant_id(), "org_1");
        assert!(!actor.is_internal());
    }

    #[test]
    fn test_claims() {
        let actor = Actor::new("org_1", "u1")
            .unwrap()
            .with_claims(["admin", "group:auditors", "group:", "group:vendors"]);
        assert!(actor.has_claim("admin"));
        let groups: Vec<_> = actor.claims_with_prefix("group:").collect();
        assert_eq!(groups, vec!["auditors", "vendors"]);
    }

    #[test]
    fn test_internal() {
        let actor = Actor::internal("org_1", "system").unwrap();
        assert!(actor.is_internal());
        assert_eq!(actor.subject_id(), "system");
    }
}
