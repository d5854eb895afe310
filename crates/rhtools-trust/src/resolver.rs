//! Trust resolution
//!
//! [`resolve_trust`] answers "how much is this subject trusted in this
//! scope right now" from a [`TrustSnapshot`]. It is a pure function of its
//! inputs and never fails: problems are reported as [`Advisory`] flags so
//! gating and display code always has a result to act on.
//!
//! Selection works in tiers. Surviving declarations are ranked by issuer
//! authority, then scope specificity, then recency. The best
//! (rank, specificity) pair forms the winning tier: its most recent
//! declaration carrying a level sets the level, and permissions are the
//! union over the whole tier, since several admins may grant complementary
//! capabilities.
//!
//! [`resolve_declared`] stops there. [`resolve_trust`] then applies manual
//! assignments on top.

use crate::assignment::{self, AssignmentEffect};
use crate::countersign;
use crate::declaration::{
    DeclarationId, DeclarationKind, DeclarationSet, DeclarationType, ModerationKind, Subject,
    SubjectKey, TrustDeclaration, TrustLevel,
};
use crate::keypair::KeypairRegistry;
use crate::permissions::PermissionSet;
use crate::scope::{ScopeRef, Specificity};
use crate::store::TrustSnapshot;
use crate::time::{secs_to_ms, TimestampMs};
use crate::validity::Window;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;

/// Flags explaining a resolution result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "advisory", rename_all = "kebab-case")]
pub enum Advisory {
    /// Nothing grants the subject anything in this scope
    Untrusted,
    /// Grants exist but still lack countersignatures
    PendingCountersignatures {
        /// The waiting declarations
        declarations: Vec<DeclarationId>,
    },
    /// Revoked grants that would otherwise have applied
    RevokedIgnored {
        /// The revoked declarations
        declarations: Vec<DeclarationId>,
    },
    /// A manual assignment replaced the declaration-derived level
    AssignmentOverride {
        /// Level the assignment set
        assigned_level: TrustLevel,
    },
    /// A manual assignment's limit lowered the level
    AssignmentCapped {
        /// The ceiling applied
        limit: TrustLevel,
    },
    /// A local, display-only override was applied
    LocalOverride {
        /// Level shown instead of the canonical one
        display_level: TrustLevel,
    },
}

/// Outcome of a trust query
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrustResult {
    /// Effective level
    pub level: TrustLevel,
    /// Effective permissions
    pub permissions: PermissionSet,
    /// Explanatory flags
    pub advisories: Vec<Advisory>,
    /// Declarations in the winning tier
    pub contributing: Vec<DeclarationId>,
    /// Issuer authority rank of the winning tier
    pub rank: Option<u8>,
    /// Overlap of the winning tier's windows
    pub window: Option<Window>,
}

impl TrustResult {
    fn untrusted() -> Self {
        Self {
            level: TrustLevel::ZERO,
            permissions: PermissionSet::none(),
            advisories: Vec::new(),
            contributing: Vec::new(),
            rank: None,
            window: None,
        }
    }

    /// Whether any declaration contributed
    pub fn is_granted(&self) -> bool {
        !self.contributing.is_empty()
    }

    /// Whether any advisory matches `predicate`
    pub fn has_advisory(&self, predicate: impl Fn(&Advisory) -> bool) -> bool {
        self.advisories.iter().any(predicate)
    }
}

/// Authority rank of a declaration's issuer; unknown issuers have none
pub(crate) fn issuer_rank(registry: &KeypairRegistry, declaration: &TrustDeclaration) -> Option<u8> {
    registry
        .by_fingerprint(&declaration.issuer().fingerprint)
        .map(|k| k.usage.authority_rank())
}

/// Whether `a`'s issuer is the same as, or outranks or equals, `b`'s issuer
pub(crate) fn dominates(
    registry: &KeypairRegistry,
    a: &TrustDeclaration,
    b: &TrustDeclaration,
) -> bool {
    if a.issuer().fingerprint == b.issuer().fingerprint {
        return true;
    }
    match issuer_rank(registry, a) {
        Some(rank) => rank >= issuer_rank(registry, b).unwrap_or(1),
        None => false,
    }
}

/// Instant from which an update replaces the declaration it amends
pub fn update_effective_from(update: &TrustDeclaration) -> TimestampMs {
    let retro = update.retroactive_effect();
    match retro.effective_from {
        Some(from) if retro.enabled => from,
        _ => update.window().from,
    }
}

/// Window in which a declaration applies
///
/// A retroactive update reaches back to its `effective_from`, so there is no
/// gap between the original ceasing and the update starting.
pub fn effective_window(declaration: &TrustDeclaration) -> Window {
    let window = declaration.window();
    if !declaration.is_update() {
        return window;
    }
    Window {
        from: window.from.min(update_effective_from(declaration)),
        ..window
    }
}

/// Whether `declaration` is replaced at `at` by an effective update
pub fn is_superseded(
    declaration: &TrustDeclaration,
    declarations: &DeclarationSet,
    registry: &KeypairRegistry,
    at: TimestampMs,
) -> bool {
    declarations.updates_of(declaration.uuid()).any(|update| {
        !update.is_revoked()
            && countersign::is_satisfied(update)
            && update.declaration_type() == declaration.declaration_type()
            && update.subject().same_as(declaration.subject())
            && dominates(registry, update, declaration)
            && update_effective_from(update) <= at
    })
}

struct Candidate<'a> {
    declaration: &'a TrustDeclaration,
    rank: u8,
    specificity: Specificity,
}

impl Candidate<'_> {
    fn tier(&self) -> (u8, Specificity) {
        (self.rank, self.specificity)
    }

    /// Best first: rank, specificity, recency, then uuid for determinism
    fn order(&self, other: &Self) -> Ordering {
        other
            .rank
            .cmp(&self.rank)
            .then(other.specificity.cmp(&self.specificity))
            .then(other.declaration.issued_at().cmp(&self.declaration.issued_at()))
            .then(other.declaration.uuid().cmp(&self.declaration.uuid()))
    }
}

/// Best scope match of a declaration against a query
pub(crate) fn coverage(declaration: &TrustDeclaration, scope: &ScopeRef) -> Option<Specificity> {
    declaration
        .body()
        .effective_scopes()
        .iter()
        .filter_map(|s| s.covers(scope))
        .max()
}

/// Resolve `subject`'s trust in `scope` at instant `at`
pub fn resolve_trust(
    subject: &Subject,
    scope: &ScopeRef,
    snapshot: &TrustSnapshot,
    at: TimestampMs,
) -> TrustResult {
    let mut result = resolve_declared(subject, scope, snapshot, at);
    if let Some(effect) = assignment::evaluate(subject, scope, &snapshot.assignments, at) {
        result.advisories.retain(|a| *a != Advisory::Untrusted);
        apply_assignment(&mut result, &effect);
    }
    result
}

/// What the declaration graph alone confers, ignoring manual assignments
pub fn resolve_declared(
    subject: &Subject,
    scope: &ScopeRef,
    snapshot: &TrustSnapshot,
    at: TimestampMs,
) -> TrustResult {
    let registry = &snapshot.registry;
    let declarations = &snapshot.declarations;
    let key = subject.key();
    let class = registry.subject_class(subject);

    let mut candidates = Vec::new();
    let mut pending = Vec::new();
    let mut revoked = Vec::new();

    for declaration in declarations.about(&key) {
        if !declaration.declaration_type().is_grant() || !declaration.status().is_signed() {
            continue;
        }
        let Some(specificity) = coverage(declaration, scope) else {
            continue;
        };
        if declaration.is_revoked() {
            revoked.push(declaration.uuid());
            continue;
        }
        if !effective_window(declaration).contains(at) {
            continue;
        }
        if is_superseded(declaration, declarations, registry, at) {
            continue;
        }
        let Some(issuer) = registry.by_fingerprint(&declaration.issuer().fingerprint) else {
            tracing::trace!(declaration = %declaration.uuid(), "issuer unknown; ignoring");
            continue;
        };
        // the subject may have been registered with a senior usage since
        if !issuer.usage.may_target(class) {
            tracing::trace!(declaration = %declaration.uuid(), ?class, "issuer may not target subject; ignoring");
            continue;
        }
        let rank = issuer.usage.authority_rank();
        if !countersign::is_satisfied(declaration) {
            pending.push(declaration.uuid());
            continue;
        }
        candidates.push(Candidate {
            declaration,
            rank,
            specificity,
        });
    }

    candidates.sort_by(|a, b| a.order(b));

    let mut result = TrustResult::untrusted();
    if let Some(best) = candidates.first().map(Candidate::tier) {
        let tier: Vec<&Candidate<'_>> = candidates.iter().filter(|c| c.tier() == best).collect();
        result.rank = Some(best.0);
        result.level = tier
            .iter()
            .find_map(|c| c.declaration.body().trust_level())
            .unwrap_or(TrustLevel::ZERO);
        result.permissions = tier
            .iter()
            .filter_map(|c| c.declaration.body().permissions())
            .fold(None, |acc: Option<PermissionSet>, p| {
                Some(match acc {
                    Some(acc) => acc.union(p),
                    None => p.clone(),
                })
            })
            .unwrap_or_default();
        result.window = tier
            .iter()
            .map(|c| effective_window(c.declaration))
            .try_fold(Window::starting(0), |acc, w| acc.intersect(&w));
        result.contributing = tier.iter().map(|c| c.declaration.uuid()).collect();
    }

    if !result.is_granted() {
        result.advisories.push(Advisory::Untrusted);
    }
    if !pending.is_empty() {
        result.advisories.push(Advisory::PendingCountersignatures {
            declarations: pending,
        });
    }
    if !revoked.is_empty() {
        result.advisories.push(Advisory::RevokedIgnored {
            declarations: revoked,
        });
    }
    result
}

fn apply_assignment(result: &mut TrustResult, effect: &AssignmentEffect) {
    result.level = effect.level;
    result.advisories.push(Advisory::AssignmentOverride {
        assigned_level: effect.level,
    });
    if let Some(limit) = effect.limit {
        if result.level > limit {
            result.level = limit;
            result.advisories.push(Advisory::AssignmentCapped { limit });
        }
    }
}

/// A moderation action in force against a subject
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveAction {
    /// The moderation-action declaration
    pub declaration_uuid: DeclarationId,
    /// What is being done
    pub action: ModerationKind,
    /// When it lapses, if ever
    pub expires_at: Option<TimestampMs>,
}

/// Moderation actions currently in force against `subject` in `scope`
///
/// Excludes revoked and lapsed actions, and actions voided because the
/// grant their issuer acted under was later revoked or updated with
/// `void_actions_after` at or before the action's issue time.
pub fn active_moderation_actions(
    subject: &Subject,
    scope: &ScopeRef,
    snapshot: &TrustSnapshot,
    at: TimestampMs,
) -> Vec<ActiveAction> {
    let declarations = &snapshot.declarations;
    let mut actions: Vec<(&TrustDeclaration, ActiveAction)> = declarations
        .about(&subject.key())
        .filter(|d| d.declaration_type() == DeclarationType::ModerationAction)
        .filter(|d| d.status().is_signed() && !d.is_revoked())
        .filter(|d| countersign::is_satisfied(d) && d.window().contains(at))
        .filter(|d| coverage(d, scope).is_some())
        .filter(|d| !is_voided(d, declarations))
        .filter_map(|d| {
            let DeclarationKind::ModerationAction {
                action,
                duration_secs,
            } = d.body().kind()
            else {
                return None;
            };
            let expires_at = duration_secs.map(|secs| d.issued_at().saturating_add(secs_to_ms(secs)));
            if expires_at.is_some_and(|e| at >= e) {
                return None;
            }
            Some((
                d,
                ActiveAction {
                    declaration_uuid: d.uuid(),
                    action: *action,
                    expires_at,
                },
            ))
        })
        .collect();
    actions.sort_by_key(|(d, _)| (d.issued_at(), d.uuid()));
    actions.into_iter().map(|(_, action)| action).collect()
}

fn is_voided(action: &TrustDeclaration, declarations: &DeclarationSet) -> bool {
    let issuer = SubjectKey::Keypair(action.issuer().fingerprint.clone());
    declarations
        .about(&issuer)
        .filter(|grant| grant.declaration_type().is_grant())
        .any(|grant| {
            let revocations = declarations.revocations_of(grant.uuid());
            let updates = declarations.updates_of(grant.uuid());
            revocations
                .chain(updates)
                .filter(|d| !d.is_revoked())
                .filter_map(|d| d.retroactive_effect().void_actions_after)
                .any(|cutoff| action.issued_at() >= cutoff)
        })
}

/// Display-only trust adjustments kept on this client
///
/// Applied after resolution and never fed back into it, so an override on
/// one subject cannot change what anyone else resolves to.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LocalOverrides {
    by_subject: BTreeMap<SubjectKey, TrustLevel>,
}

/// A resolution result decorated for display
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisplayTrust {
    /// What the trust graph says
    pub canonical: TrustResult,
    /// What to show
    pub display_level: TrustLevel,
    /// Canonical advisories, plus `local-override` when one applied
    pub advisories: Vec<Advisory>,
}

impl LocalOverrides {
    /// No overrides
    pub fn new() -> Self {
        Self::default()
    }

    /// Show `subject` at `level` regardless of its resolved trust
    pub fn set(&mut self, subject: &Subject, level: TrustLevel) {
        self.by_subject.insert(subject.key(), level);
    }

    /// Drop the override for `subject`; returns whether one existed
    pub fn clear(&mut self, subject: &Subject) -> bool {
        self.by_subject.remove(&subject.key()).is_some()
    }

    /// Override for `subject`, if any
    pub fn get(&self, subject: &Subject) -> Option<TrustLevel> {
        self.by_subject.get(&subject.key()).copied()
    }

    /// Decorate `canonical` for display
    pub fn apply(&self, subject: &Subject, canonical: TrustResult) -> DisplayTrust {
        let mut advisories = canonical.advisories.clone();
        let display_level = match self.get(subject) {
            Some(level) => {
                advisories.push(Advisory::LocalOverride {
                    display_level: level,
                });
                level
            }
            None => canonical.level,
        };
        DisplayTrust {
            canonical,
            display_level,
            advisories,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assignment::{AssignmentSet, TrustAssignment};
    use crate::canonical::hash;
    use crate::declaration::{CountersignatureRequirement, DeclarationBody, IssuerRef, Validity};
    use crate::keypair::{KeyAlgorithm, KeyUsage, Keypair};
    use crate::permissions::Permission;
    use crate::scope::{Scope, ScopeType};
    use crate::signature::SignatureBytes;

    struct World {
        registry: KeypairRegistry,
        declarations: DeclarationSet,
        assignments: AssignmentSet,
    }

    impl World {
        fn new() -> Self {
            Self {
                registry: KeypairRegistry::new(),
                declarations: DeclarationSet::new(),
                assignments: AssignmentSet::new(),
            }
        }

        fn key(&mut self, name: &str, usage: KeyUsage) -> Keypair {
            let keypair = Keypair::from_public_key(
                KeyAlgorithm::Ed25519,
                usage,
                name,
                name.as_bytes().to_vec(),
                0,
            );
            self.registry.insert(keypair.clone()).unwrap();
            keypair
        }

        /// Insert a signed declaration without running the signing pipeline
        fn grant(
            &mut self,
            issuer: &Keypair,
            subject: &Keypair,
            body: DeclarationBody,
            issued_at: TimestampMs,
        ) -> DeclarationId {
            let mut decl = TrustDeclaration::new_draft(
                IssuerRef {
                    canonical_name: issuer.canonical_name.clone(),
                    fingerprint: issuer.fingerprint.clone(),
                    keypair_ref: issuer.id,
                },
                Subject::keypair(subject.fingerprint.clone()),
                body,
                Validity::open(),
                issued_at,
            );
            let content_hash = decl.compute_content_hash().unwrap();
            decl.lock_content(content_hash, issued_at, Window::starting(issued_at));
            decl.attach_signature(SignatureBytes(vec![0; 64]));
            let id = decl.uuid();
            self.declarations.insert(decl);
            id
        }

        fn snapshot(&self) -> TrustSnapshot {
            TrustSnapshot::new(
                self.registry.clone(),
                self.declarations.clone(),
                self.assignments.clone(),
                0,
            )
        }
    }

    fn q(s: &str) -> ScopeRef {
        s.parse().unwrap()
    }

    #[test]
    fn test_untrusted_when_nothing_applies() {
        let mut world = World::new();
        let bob = world.key("bob", KeyUsage::User);
        let result = resolve_trust(&Subject::keypair(bob.fingerprint), &q("global"), &world.snapshot(), 10);
        assert_eq!(result.level, TrustLevel::ZERO);
        assert_eq!(result.advisories, vec![Advisory::Untrusted]);
    }

    #[test]
    fn test_rank_beats_specificity_and_tier_unions_permissions() {
        let mut world = World::new();
        let op1 = world.key("op1", KeyUsage::OperatingAdminSigning);
        let op2 = world.key("op2", KeyUsage::OperatingAdminSigning);
        let admin = world.key("admin", KeyUsage::AuthorizedAdmin);
        let bob = world.key("bob", KeyUsage::User);

        world.grant(
            &admin,
            &bob,
            DeclarationBody::trust(50, PermissionSet::all())
                .with_scopes([Scope::targeted(ScopeType::Channel, ["help"])]),
            10,
        );
        world.grant(
            &op1,
            &bob,
            DeclarationBody::trust(5, PermissionSet::from_permissions([Permission::Moderate])),
            20,
        );
        world.grant(
            &op2,
            &bob,
            DeclarationBody::trust(7, PermissionSet::from_permissions([Permission::UpdateMetadata])),
            30,
        );

        let result = resolve_trust(
            &Subject::keypair(bob.fingerprint.clone()),
            &q("channel:help"),
            &world.snapshot(),
            100,
        );
        assert_eq!(result.rank, Some(3));
        assert_eq!(result.level, TrustLevel(7));
        assert!(result.permissions.can_moderate && result.permissions.can_update_metadata);
        assert!(!result.permissions.can_sign_trust_declarations);
        assert_eq!(result.contributing.len(), 2);
    }

    #[test]
    fn test_usage_table_rechecked_against_current_registry() {
        let mut world = World::new();
        let admin = world.key("admin", KeyUsage::AuthorizedAdmin);
        let newcomer = Keypair::from_public_key(
            KeyAlgorithm::Ed25519,
            KeyUsage::OperatingAdminSigning,
            "newcomer",
            b"newcomer".to_vec(),
            0,
        );
        world.grant(&admin, &newcomer, DeclarationBody::trust(3, PermissionSet::none()), 10);
        let subject = Subject::keypair(newcomer.fingerprint.clone());
        assert!(resolve_trust(&subject, &ScopeRef::global(), &world.snapshot(), 100).is_granted());

        world.registry.insert(newcomer.clone()).unwrap();
        let result = resolve_trust(&subject, &ScopeRef::global(), &world.snapshot(), 100);
        assert!(!result.is_granted());
        assert_eq!(result.advisories, vec![Advisory::Untrusted]);
    }

    #[test]
    fn test_specificity_breaks_rank_ties() {
        let mut world = World::new();
        let op = world.key("op", KeyUsage::OperatingAdminSigning);
        let bob = world.key("bob", KeyUsage::User);
        world.grant(&op, &bob, DeclarationBody::trust(1, PermissionSet::none()), 50);
        world.grant(
            &op,
            &bob,
            DeclarationBody::trust(9, PermissionSet::none())
                .with_scopes([Scope::targeted(ScopeType::Game, ["smw"])]),
            10,
        );

        let subject = Subject::keypair(bob.fingerprint.clone());
        let snapshot = world.snapshot();
        assert_eq!(resolve_trust(&subject, &q("game:smw"), &snapshot, 100).level, TrustLevel(9));
        assert_eq!(resolve_trust(&subject, &q("game:other"), &snapshot, 100).level, TrustLevel(1));
    }

    #[test]
    fn test_pending_and_revoked_advisories() {
        let mut world = World::new();
        let op = world.key("op", KeyUsage::OperatingAdminSigning);
        let bob = world.key("bob", KeyUsage::User);
        let pending = world.grant(
            &op,
            &bob,
            DeclarationBody::trust(3, PermissionSet::none())
                .with_countersignatures(CountersignatureRequirement::any_of(2)),
            10,
        );
        let revoked = world.grant(&op, &bob, DeclarationBody::trust(4, PermissionSet::none()), 10);
        world
            .declarations
            .require_mut(&revoked)
            .unwrap()
            .mark_revoked(DeclarationId::new_random());

        let result = resolve_trust(
            &Subject::keypair(bob.fingerprint.clone()),
            &q("global"),
            &world.snapshot(),
            100,
        );
        assert_eq!(result.level, TrustLevel::ZERO);
        assert!(result.advisories.contains(&Advisory::Untrusted));
        assert!(result.advisories.contains(&Advisory::PendingCountersignatures {
            declarations: vec![pending]
        }));
        assert!(result.advisories.contains(&Advisory::RevokedIgnored {
            declarations: vec![revoked]
        }));
    }

    #[test]
    fn test_assignment_override_and_cap() {
        let mut world = World::new();
        let op = world.key("op", KeyUsage::OperatingAdminSigning);
        let bob = world.key("bob", KeyUsage::User);
        world.grant(&op, &bob, DeclarationBody::trust(20, PermissionSet::none()), 10);
        world
            .assignments
            .upsert(TrustAssignment {
                pubkey: hex::encode(&bob.public_key),
                assigned_trust_level: TrustLevel(30),
                trust_limit: Some(TrustLevel(5)),
                scope: Some(q("channel:general")),
                assigned_by_pubkey: hex::encode(&op.public_key),
                expires_at: None,
                source: "test".into(),
                reason: None,
                created_at: 0,
            })
            .unwrap();

        let subject = Subject::keypair(bob.fingerprint.clone());
        let snapshot = world.snapshot();
        let general = resolve_trust(&subject, &q("channel:general"), &snapshot, 100);
        assert_eq!(general.level, TrustLevel(5));
        assert!(general.advisories.contains(&Advisory::AssignmentCapped {
            limit: TrustLevel(5)
        }));

        let elsewhere = resolve_trust(&subject, &q("channel:other"), &snapshot, 100);
        assert_eq!(elsewhere.level, TrustLevel(20));
    }

    #[test]
    fn test_window_bounds_effect() {
        let mut world = World::new();
        let op = world.key("op", KeyUsage::OperatingAdminSigning);
        let bob = world.key("bob", KeyUsage::User);
        let id = world.grant(&op, &bob, DeclarationBody::trust(2, PermissionSet::none()), 10);
        world.declarations.require_mut(&id).unwrap().validity.valid_until = Some(50);

        let subject = Subject::keypair(bob.fingerprint.clone());
        let snapshot = world.snapshot();
        assert_eq!(resolve_trust(&subject, &q("global"), &snapshot, 5).level, TrustLevel::ZERO);
        assert_eq!(resolve_trust(&subject, &q("global"), &snapshot, 30).level, TrustLevel(2));
        assert_eq!(resolve_trust(&subject, &q("global"), &snapshot, 51).level, TrustLevel::ZERO);
    }

    #[test]
    fn test_unknown_issuer_confers_nothing() {
        let mut world = World::new();
        let bob = world.key("bob", KeyUsage::User);
        let ghost = Keypair::from_public_key(
            KeyAlgorithm::Ed25519,
            KeyUsage::MasterAdminSigning,
            "ghost",
            hash(b"ghost").0.to_vec(),
            0,
        );
        world.grant(&ghost, &bob, DeclarationBody::trust(99, PermissionSet::all()), 10);
        let result = resolve_trust(
            &Subject::keypair(bob.fingerprint.clone()),
            &q("global"),
            &world.snapshot(),
            100,
        );
        assert_eq!(result.level, TrustLevel::ZERO);
        assert_eq!(result.advisories, vec![Advisory::Untrusted]);
    }

    #[test]
    fn test_local_override_is_display_only() {
        let mut world = World::new();
        let op = world.key("op", KeyUsage::OperatingAdminSigning);
        let bob = world.key("bob", KeyUsage::User);
        world.grant(&op, &bob, DeclarationBody::trust(2, PermissionSet::none()), 10);
        let subject = Subject::keypair(bob.fingerprint.clone());

        let mut overrides = LocalOverrides::new();
        overrides.set(&subject, TrustLevel(40));
        let canonical = resolve_trust(&subject, &q("global"), &world.snapshot(), 100);
        let display = overrides.apply(&subject, canonical);
        assert_eq!(display.display_level, TrustLevel(40));
        assert_eq!(display.canonical.level, TrustLevel(2));
        assert!(display.advisories.contains(&Advisory::LocalOverride {
            display_level: TrustLevel(40)
        }));

        assert!(overrides.clear(&subject));
        let display = overrides.apply(&subject, resolve_trust(&subject, &q("global"), &world.snapshot(), 100));
        assert_eq!(display.display_level, TrustLevel(2));
    }
}
