//! Manual trust assignments
//!
//! Assignments are the direct override channel: an admin sets (and
//! optionally caps) a subject's trust level in a scope without going
//! through the declaration graph. The most specific live assignment sets
//! the level; every live assignment covering the query caps it.

use crate::declaration::{Subject, TrustLevel};
use crate::error::{AuthorityCheck, Result, TrustError};
use crate::keypair::{Fingerprint, KeypairRegistry};
use crate::scope::{ScopeRef, Specificity};
use crate::time::TimestampMs;
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::BTreeMap;
use uuid::Uuid;

const ASSIGNMENT_NAMESPACE: Uuid = Uuid::from_u128(0x6d1e_4c1b_93a2_4f0e_8b77_2c55_a1f0_3e19);

/// A direct trust override record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrustAssignment {
    /// Subject public key, hex
    pub pubkey: String,
    /// Level the subject is set to
    pub assigned_trust_level: TrustLevel,
    /// Ceiling on whatever level results
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trust_limit: Option<TrustLevel>,
    /// Scope the assignment applies to; `None` is global
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<ScopeRef>,
    /// Issuing admin's public key, hex
    pub assigned_by_pubkey: String,
    /// Instant after which the assignment is inert
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<TimestampMs>,
    /// Where the assignment came from (admin panel, import, ...)
    pub source: String,
    /// Free-text reason
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// When it was created or last replaced
    #[serde(default)]
    pub created_at: TimestampMs,
}

/// Upsert key: one assignment per subject, scope, and issuing admin
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AssignmentKey {
    /// Subject fingerprint
    pub subject: Fingerprint,
    /// Scope, `None` for global
    pub scope: Option<ScopeRef>,
    /// Issuing admin fingerprint
    pub assigned_by: Fingerprint,
}

impl AssignmentKey {
    /// Deterministic record id, stable across upserts
    pub fn record_id(&self) -> Uuid {
        let scope = self
            .scope
            .as_ref()
            .map(ToString::to_string)
            .unwrap_or_default();
        let name = format!("{}|{}|{}", self.subject, scope, self.assigned_by);
        Uuid::new_v5(&ASSIGNMENT_NAMESPACE, name.as_bytes())
    }
}

fn fingerprint_of_hex(pubkey: &str) -> Result<Fingerprint> {
    let bytes = hex::decode(pubkey)
        .map_err(|e| TrustError::validation(format!("public key '{pubkey}' is not hex: {e}")))?;
    if bytes.is_empty() {
        return Err(TrustError::validation("public key is empty"));
    }
    Ok(Fingerprint::of_public_key(&bytes))
}

impl TrustAssignment {
    /// Fingerprint of the subject key
    pub fn subject_fingerprint(&self) -> Result<Fingerprint> {
        fingerprint_of_hex(&self.pubkey)
    }

    /// Fingerprint of the issuing admin key
    pub fn issuer_fingerprint(&self) -> Result<Fingerprint> {
        fingerprint_of_hex(&self.assigned_by_pubkey)
    }

    /// Upsert key
    pub fn key(&self) -> Result<AssignmentKey> {
        Ok(AssignmentKey {
            subject: self.subject_fingerprint()?,
            scope: self.scope.clone(),
            assigned_by: self.issuer_fingerprint()?,
        })
    }

    /// Whether the assignment has expired by `at`
    pub fn is_expired(&self, at: TimestampMs) -> bool {
        self.expires_at.is_some_and(|expires| expires <= at)
    }

    /// Checks run before an assignment is stored
    ///
    /// The issuing key must be a registered admin-class keypair that is
    /// neither the subject nor outranked by it, and an assignment that is
    /// already expired is refused.
    pub fn validate_new(&self, registry: &KeypairRegistry, now_ms: TimestampMs) -> Result<()> {
        let issuer_fp = self.issuer_fingerprint()?;
        let subject_fp = self.subject_fingerprint()?;
        let issuer = registry.by_fingerprint(&issuer_fp).ok_or_else(|| {
            TrustError::not_found(format!("assigning keypair {issuer_fp}"))
        })?;
        if !issuer.usage.is_admin_class() {
            return Err(TrustError::authority(
                AuthorityCheck::UsageCompatibility,
                format!("{issuer_fp} is a user key and cannot assign trust"),
            ));
        }
        if subject_fp == issuer_fp {
            return Err(TrustError::authority(
                AuthorityCheck::Dominance,
                format!("{issuer_fp} cannot assign trust to itself"),
            ));
        }
        if let Some(subject) = registry.by_fingerprint(&subject_fp) {
            if subject.usage.authority_rank() > issuer.usage.authority_rank() {
                return Err(TrustError::authority(
                    AuthorityCheck::Dominance,
                    format!("{issuer_fp} is outranked by {subject_fp}"),
                ));
            }
        }
        if self.is_expired(now_ms) {
            return Err(TrustError::temporal(format!(
                "assignment expires at {:?}, which is not after now ({now_ms})",
                self.expires_at
            )));
        }
        if self.source.trim().is_empty() {
            return Err(TrustError::validation("assignment source must be set"));
        }
        Ok(())
    }
}

/// All stored assignments
#[derive(Debug, Clone, Default)]
pub struct AssignmentSet {
    by_key: BTreeMap<AssignmentKey, TrustAssignment>,
}

impl AssignmentSet {
    /// Empty set
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace by key; returns the replaced record
    pub fn upsert(&mut self, assignment: TrustAssignment) -> Result<Option<TrustAssignment>> {
        let key = assignment.key()?;
        Ok(self.by_key.insert(key, assignment))
    }

    /// Remove by key
    pub fn remove(&mut self, key: &AssignmentKey) -> Option<TrustAssignment> {
        self.by_key.remove(key)
    }

    /// Lookup by key
    pub fn get(&self, key: &AssignmentKey) -> Option<&TrustAssignment> {
        self.by_key.get(key)
    }

    /// All assignments with their keys
    pub fn iter(&self) -> impl Iterator<Item = (&AssignmentKey, &TrustAssignment)> {
        self.by_key.iter()
    }

    /// Number of stored assignments
    pub fn len(&self) -> usize {
        self.by_key.len()
    }

    /// Whether the set is empty
    pub fn is_empty(&self) -> bool {
        self.by_key.is_empty()
    }
}

/// The assignment that applies to a query
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssignmentEffect {
    /// Level the winning assignment sets
    pub level: TrustLevel,
    /// Lowest ceiling among all live assignments covering the query
    pub limit: Option<TrustLevel>,
    /// Which assignment set the level
    pub key: AssignmentKey,
    /// How closely its scope matched
    pub specificity: Specificity,
}

/// Select the assignment governing `subject` in `scope` at `at`
///
/// Exact scope beats an enclosing scope beats global; among equals the most
/// recently created wins, and then the lower level. The limit is the
/// minimum over every live assignment whose scope covers the query, so one
/// admin's ceiling survives another admin's later assignment.
pub fn evaluate(
    subject: &Subject,
    scope: &ScopeRef,
    assignments: &AssignmentSet,
    at: TimestampMs,
) -> Option<AssignmentEffect> {
    let Subject::Keypair { fingerprint, .. } = subject else {
        return None;
    };
    let global = ScopeRef::global();
    let covering: Vec<_> = assignments
        .iter()
        .filter(|(key, assignment)| &key.subject == fingerprint && !assignment.is_expired(at))
        .filter_map(|(key, assignment)| {
            let specificity = key.scope.as_ref().unwrap_or(&global).relation_to(scope)?;
            Some((key, assignment, specificity))
        })
        .collect();
    let limit = covering
        .iter()
        .filter_map(|(_, assignment, _)| assignment.trust_limit)
        .min();
    covering
        .into_iter()
        .max_by_key(|(_, assignment, specificity)| {
            (
                *specificity,
                assignment.created_at,
                Reverse(assignment.assigned_trust_level),
            )
        })
        .map(|(key, assignment, specificity)| AssignmentEffect {
            level: assignment.assigned_trust_level,
            limit,
            key: key.clone(),
            specificity,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keypair::{KeyAlgorithm, KeyUsage};

    const SUBJECT: &str = "aa11";
    const ADMIN: &str = "bb22";
    const OTHER_ADMIN: &str = "cc33";

    fn assignment(scope: Option<&str>, level: u32, created_at: TimestampMs) -> TrustAssignment {
        TrustAssignment {
            pubkey: SUBJECT.into(),
            assigned_trust_level: TrustLevel(level),
            trust_limit: None,
            scope: scope.map(|s| s.parse().unwrap()),
            assigned_by_pubkey: ADMIN.into(),
            expires_at: None,
            source: "admin-panel".into(),
            reason: None,
            created_at,
        }
    }

    fn fingerprint(pubkey: &str) -> Fingerprint {
        Fingerprint::of_public_key(&hex::decode(pubkey).unwrap())
    }

    fn subject() -> Subject {
        Subject::keypair(fingerprint(SUBJECT))
    }

    #[test]
    fn test_most_specific_wins() {
        let mut set = AssignmentSet::new();
        set.upsert(assignment(None, 1, 10)).unwrap();
        set.upsert(assignment(Some("global-chat"), 2, 10)).unwrap();
        set.upsert(assignment(Some("channel:general"), 3, 5)).unwrap();

        let query: ScopeRef = "channel:general".parse().unwrap();
        let effect = evaluate(&subject(), &query, &set, 100).unwrap();
        assert_eq!(effect.level, TrustLevel(3));
        assert_eq!(effect.specificity, Specificity::Exact);

        let other: ScopeRef = "channel:random".parse().unwrap();
        assert_eq!(evaluate(&subject(), &other, &set, 100).unwrap().level, TrustLevel(2));

        let forum: ScopeRef = "forum:x".parse().unwrap();
        assert_eq!(evaluate(&subject(), &forum, &set, 100).unwrap().level, TrustLevel(1));
    }

    #[test]
    fn test_expired_assignment_is_inert() {
        let mut set = AssignmentSet::new();
        let mut expired = assignment(Some("channel:general"), 9, 10);
        expired.expires_at = Some(50);
        set.upsert(expired).unwrap();
        set.upsert(assignment(None, 1, 10)).unwrap();

        let query: ScopeRef = "channel:general".parse().unwrap();
        assert_eq!(evaluate(&subject(), &query, &set, 40).unwrap().level, TrustLevel(9));
        assert_eq!(evaluate(&subject(), &query, &set, 50).unwrap().level, TrustLevel(1));
    }

    #[test]
    fn test_upsert_replaces_by_key() {
        let mut set = AssignmentSet::new();
        set.upsert(assignment(Some("game:smw"), 1, 10)).unwrap();
        let replaced = set.upsert(assignment(Some("game:smw"), 4, 20)).unwrap();
        assert_eq!(replaced.map(|a| a.assigned_trust_level), Some(TrustLevel(1)));
        assert_eq!(set.len(), 1);

        let key = assignment(Some("game:smw"), 0, 0).key().unwrap();
        assert_eq!(key.record_id(), key.clone().record_id());
    }

    #[test]
    fn test_non_keypair_subjects_never_match() {
        let mut set = AssignmentSet::new();
        set.upsert(assignment(None, 1, 10)).unwrap();
        assert!(evaluate(&Subject::System, &ScopeRef::global(), &set, 0).is_none());
    }

    #[test]
    fn test_validate_new() {
        let mut registry = KeypairRegistry::new();
        registry
            .import(KeyAlgorithm::Ed25519, KeyUsage::User, "user", hex::decode(ADMIN).unwrap(), 0)
            .unwrap();
        let record = assignment(None, 1, 10);
        assert!(matches!(
            record.validate_new(&registry, 10),
            Err(TrustError::Authority { .. })
        ));

        let mut registry = KeypairRegistry::new();
        registry
            .import(
                KeyAlgorithm::Ed25519,
                KeyUsage::AuthorizedAdmin,
                "admin",
                hex::decode(ADMIN).unwrap(),
                0,
            )
            .unwrap();
        record.validate_new(&registry, 10).unwrap();

        let mut expired = record.clone();
        expired.expires_at = Some(5);
        assert!(matches!(
            expired.validate_new(&registry, 10),
            Err(TrustError::Temporal { .. })
        ));
    }

    #[test]
    fn test_limit_from_any_covering_assignment() {
        let mut set = AssignmentSet::new();
        let mut capped = assignment(Some("channel:general"), 5, 10);
        capped.trust_limit = Some(TrustLevel(5));
        set.upsert(capped).unwrap();
        let mut later = assignment(Some("channel:general"), 20, 20);
        later.assigned_by_pubkey = OTHER_ADMIN.into();
        set.upsert(later).unwrap();

        let query: ScopeRef = "channel:general".parse().unwrap();
        let effect = evaluate(&subject(), &query, &set, 100).unwrap();
        assert_eq!(effect.level, TrustLevel(20));
        assert_eq!(effect.limit, Some(TrustLevel(5)));
        assert_eq!(effect.key.assigned_by, fingerprint(OTHER_ADMIN));

        // a global cap covers every scope
        let mut global_cap = assignment(None, 1, 5);
        global_cap.assigned_by_pubkey = "dd44".into();
        global_cap.trust_limit = Some(TrustLevel(3));
        set.upsert(global_cap).unwrap();
        assert_eq!(evaluate(&subject(), &query, &set, 100).unwrap().limit, Some(TrustLevel(3)));

        // a cap elsewhere does not
        let other: ScopeRef = "channel:random".parse().unwrap();
        let mut set = AssignmentSet::new();
        let mut capped = assignment(Some("channel:general"), 5, 10);
        capped.trust_limit = Some(TrustLevel(5));
        set.upsert(capped).unwrap();
        set.upsert(assignment(None, 8, 20)).unwrap();
        assert_eq!(evaluate(&subject(), &other, &set, 100).unwrap().limit, None);
    }

    #[test]
    fn test_expired_limit_is_ignored() {
        let mut set = AssignmentSet::new();
        let mut capped = assignment(None, 2, 10);
        capped.trust_limit = Some(TrustLevel(2));
        capped.expires_at = Some(50);
        set.upsert(capped).unwrap();
        let mut later = assignment(None, 9, 20);
        later.assigned_by_pubkey = OTHER_ADMIN.into();
        set.upsert(later).unwrap();

        let global = ScopeRef::global();
        assert_eq!(evaluate(&subject(), &global, &set, 40).unwrap().limit, Some(TrustLevel(2)));
        assert_eq!(evaluate(&subject(), &global, &set, 60).unwrap().limit, None);
    }

    #[test]
    fn test_validate_refuses_self_and_senior_subjects() {
        let mut registry = KeypairRegistry::new();
        registry
            .import(
                KeyAlgorithm::Ed25519,
                KeyUsage::AuthorizedAdmin,
                "admin",
                hex::decode(ADMIN).unwrap(),
                0,
            )
            .unwrap();

        let mut own = assignment(None, 99, 10);
        own.pubkey = ADMIN.into();
        assert!(matches!(
            own.validate_new(&registry, 10),
            Err(TrustError::Authority { check: AuthorityCheck::Dominance, .. })
        ));

        registry
            .import(
                KeyAlgorithm::Ed25519,
                KeyUsage::OperatingAdminSigning,
                "operator",
                hex::decode(SUBJECT).unwrap(),
                0,
            )
            .unwrap();
        assert!(matches!(
            assignment(None, 1, 10).validate_new(&registry, 10),
            Err(TrustError::Authority { check: AuthorityCheck::Dominance, .. })
        ));
    }
}
