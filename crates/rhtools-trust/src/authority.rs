//! Authority containment
//!
//! [`can_issue`] decides whether a keypair may sign a draft. A non-root
//! issuer's own standing is computed by resolving its trust from the
//! declaration graph, in the same snapshot, for every scope the draft
//! touches; the draft may not exceed that standing in permissions, level,
//! duration, scope, or validity. Manual assignments never raise standing.
//! Root (master) keys skip containment but still obey the usage table.
//!
//! Checks run in a fixed order and the first failure is reported with the
//! [`AuthorityCheck`] that produced it. Nothing here mutates state.

use crate::countersign;
use crate::declaration::{DeclarationKind, DeclarationType, Subject, SubjectKey, TrustDeclaration, TrustLevel};
use crate::error::{AuthorityCheck, Result, TrustError};
use crate::keypair::{Keypair, KeypairRegistry};
use crate::permissions::{cap_within, Permission, PermissionSet};
use crate::resolver::resolve_declared;
use crate::scope::ScopeRef;
use crate::store::TrustSnapshot;
use crate::time::{secs_to_ms, TimestampMs};
use crate::validity::{self, ResolvedWindow, Window};
use serde::{Deserialize, Serialize};

/// Countersignature rule for revocations
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RevocationPolicy {
    /// A non-root revocation must demand at least what its target demanded
    #[default]
    InheritTarget,
    /// A revocation carries whatever requirement its author chose
    OwnRequirement,
}

/// What an issuer may hand out, derived from its own resolved trust
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuerStanding {
    /// Root keys are exempt from containment
    pub root: bool,
    /// Permissions held in every scope the draft touches
    pub permissions: PermissionSet,
    /// Highest level the issuer may confer; `None` is unbounded
    pub level: Option<TrustLevel>,
    /// Window the issuer's authority is valid in; `None` is unbounded
    pub window: Option<Window>,
}

impl IssuerStanding {
    fn root() -> Self {
        Self {
            root: true,
            permissions: PermissionSet::all(),
            level: None,
            window: None,
        }
    }
}

fn denied(check: AuthorityCheck, reason: impl Into<String>) -> TrustError {
    TrustError::authority(check, reason)
}

/// Whether the issuer holds any live grant at all, in any scope
fn has_any_grant(issuer: &Keypair, snapshot: &TrustSnapshot, at: TimestampMs) -> bool {
    let key = SubjectKey::Keypair(issuer.fingerprint.clone());
    snapshot.declarations.about(&key).any(|d| {
        d.declaration_type().is_grant()
            && d.status().is_signed()
            && !d.is_revoked()
            && d.window().contains(at)
            && countersign::is_satisfied(d)
            && snapshot.registry.by_fingerprint(&d.issuer().fingerprint).is_some()
    })
}

/// Resolve what `issuer` holds across every one of `refs` at `at`
///
/// Permissions are intersected, the level and window narrowed, so the
/// result is what the issuer holds everywhere at once.
pub fn issuer_standing(
    issuer: &Keypair,
    refs: &[ScopeRef],
    snapshot: &TrustSnapshot,
    at: TimestampMs,
) -> Result<IssuerStanding> {
    if issuer.usage.is_root() {
        return Ok(IssuerStanding::root());
    }

    let subject = Subject::keypair(issuer.fingerprint.clone());
    let mut standing: Option<IssuerStanding> = None;
    for scope in refs {
        let result = resolve_declared(&subject, scope, snapshot, at);
        let window = match (result.is_granted(), result.window) {
            (true, Some(window)) => window,
            _ if has_any_grant(issuer, snapshot, at) => {
                return Err(denied(
                    AuthorityCheck::Scope,
                    format!("{} holds no authority in {scope}", issuer.fingerprint),
                ));
            }
            _ => {
                return Err(denied(
                    AuthorityCheck::Standing,
                    format!("{} holds no effective authority", issuer.fingerprint),
                ));
            }
        };
        standing = Some(match standing {
            None => IssuerStanding {
                root: false,
                permissions: result.permissions,
                level: Some(result.level),
                window: Some(window),
            },
            Some(acc) => IssuerStanding {
                root: false,
                permissions: acc.permissions.intersect(&result.permissions),
                level: acc.level.map(|level| level.min(result.level)),
                window: match acc.window {
                    Some(w) => w.intersect(&window),
                    None => Some(window),
                },
            },
        });
    }
    standing.ok_or_else(|| denied(AuthorityCheck::Scope, "draft touches no scope"))
}

/// Scopes whose authority a draft relies on
///
/// A revocation acts within its target's scopes.
fn governing_refs(draft: &TrustDeclaration, target: Option<&TrustDeclaration>) -> Vec<ScopeRef> {
    let body = match target {
        Some(target) if draft.declaration_type() == DeclarationType::PrivilegeRevoke => {
            target.body()
        }
        _ => draft.body(),
    };
    body.effective_scopes()
        .iter()
        .flat_map(|scope| scope.representative_refs())
        .collect()
}

/// Whether `issuer` may act on a declaration `target` issued
///
/// Same key always may; otherwise the issuer must rank at least as high.
/// Unknown target issuers rank as users.
pub fn check_dominance(
    issuer: &Keypair,
    target: &TrustDeclaration,
    registry: &KeypairRegistry,
) -> Result<()> {
    if issuer.fingerprint == target.issuer().fingerprint {
        return Ok(());
    }
    let target_rank = registry
        .by_fingerprint(&target.issuer().fingerprint)
        .map(|k| k.usage.authority_rank())
        .unwrap_or(1);
    if issuer.usage.authority_rank() < target_rank {
        return Err(denied(
            AuthorityCheck::Dominance,
            format!(
                "{} ({:?}) is outranked by the issuer of {}",
                issuer.fingerprint,
                issuer.usage,
                target.uuid()
            ),
        ));
    }
    Ok(())
}

/// Apply the revocation countersignature policy to a revocation draft
pub fn check_revocation_requirement(
    revocation: &TrustDeclaration,
    target: &TrustDeclaration,
    revoker: &Keypair,
    policy: RevocationPolicy,
) -> Result<()> {
    if policy == RevocationPolicy::OwnRequirement || revoker.usage.is_root() {
        return Ok(());
    }
    let Some(required) = target.body().required_countersignatures() else {
        return Ok(());
    };
    if !required.is_met_by(revocation.body().required_countersignatures()) {
        return Err(TrustError::validation(format!(
            "revoking {} needs at least {} countersignature(s) from the same signers it required",
            target.uuid(),
            required.min_count
        )));
    }
    Ok(())
}

fn target_of<'a>(
    draft: &TrustDeclaration,
    snapshot: &'a TrustSnapshot,
) -> Result<Option<&'a TrustDeclaration>> {
    let Some(id) = draft.subject().target_declaration() else {
        return Ok(None);
    };
    let target = snapshot.declarations.require(&id)?;
    if !target.status().is_signed() {
        return Err(TrustError::validation(format!(
            "{id} is not signed and cannot be revoked"
        )));
    }
    if target.is_revoked() {
        return Err(TrustError::revoked(id));
    }
    Ok(Some(target))
}

fn original_of<'a>(
    draft: &TrustDeclaration,
    snapshot: &'a TrustSnapshot,
) -> Result<Option<&'a TrustDeclaration>> {
    let Some(id) = draft.original_declaration_uuid() else {
        return Ok(None);
    };
    let original = snapshot.declarations.require(&id)?;
    if !original.status().is_signed() {
        return Err(TrustError::validation(format!("{id} is not signed and cannot be updated")));
    }
    if original.is_revoked() {
        return Err(TrustError::revoked(id));
    }
    if original.declaration_type() != draft.declaration_type()
        || !original.subject().same_as(draft.subject())
    {
        return Err(TrustError::validation(format!(
            "an update must keep the type and subject of {id}"
        )));
    }
    Ok(Some(original))
}

/// Decide whether `issuer` may sign `draft` given `snapshot`, at `at`
///
/// On success returns the window the declaration would carry. A window
/// that had to be clamped is reported with `clamped` set; callers that
/// commit must refuse it so the signer sees exactly what they sign.
pub fn can_issue(
    issuer: &Keypair,
    draft: &TrustDeclaration,
    snapshot: &TrustSnapshot,
    at: TimestampMs,
) -> Result<ResolvedWindow> {
    if draft.issuer().fingerprint != issuer.fingerprint {
        return Err(TrustError::validation(format!(
            "{} names issuer {}, not {}",
            draft.uuid(),
            draft.issuer().fingerprint,
            issuer.fingerprint
        )));
    }
    let registry = &snapshot.registry;
    let declaration_type = draft.declaration_type();
    let target = target_of(draft, snapshot)?;
    let original = original_of(draft, snapshot)?;

    // 1. usage compatibility
    let class = registry.subject_class(target.map_or(draft.subject(), |t| t.subject()));
    if !registry.usage_permits(issuer, declaration_type, class) {
        return Err(denied(
            AuthorityCheck::UsageCompatibility,
            format!("{:?} keys may not issue {declaration_type} at {class:?} subjects", issuer.usage),
        ));
    }

    if let Some(target) = target {
        check_dominance(issuer, target, registry)?;
    }
    if let Some(original) = original {
        check_dominance(issuer, original, registry)?;
    }

    // 2. standing, which also settles scope containment
    let standing = issuer_standing(issuer, &governing_refs(draft, target), snapshot, at)?;
    let body = draft.body();
    let requested = body.permissions().cloned().unwrap_or_default();

    if !standing.root {
        // 3. permissions and level
        let missing = requested.missing_from(&standing.permissions);
        if !missing.is_empty() {
            return Err(denied(
                AuthorityCheck::Permission,
                format!("{} does not hold {}", issuer.fingerprint, missing.join(", ")),
            ));
        }
        let type_right = match declaration_type {
            DeclarationType::TrustDeclaration => Some(Permission::SignTrustDeclarations),
            DeclarationType::ModerationAction => Some(Permission::Moderate),
            _ => None,
        };
        let delegation_rights = [
            (Permission::Moderate, Permission::DelegateModerators),
            (Permission::UpdateMetadata, Permission::DelegateUpdaters),
        ]
        .into_iter()
        .filter(|(granted, _)| requested.holds(*granted))
        .map(|(_, needed)| needed);
        for needed in type_right.into_iter().chain(delegation_rights) {
            if !standing.permissions.holds(needed) {
                return Err(denied(
                    AuthorityCheck::Permission,
                    format!("{} lacks {needed} for {declaration_type}", issuer.fingerprint),
                ));
            }
        }
        if let (Some(granted), Some(held)) = (body.trust_level(), standing.level) {
            if granted > held {
                return Err(denied(
                    AuthorityCheck::TrustLevel,
                    format!("level {granted} exceeds the issuer's own {held}"),
                ));
            }
        }

        // 4. duration caps carried by the grant
        let held = &standing.permissions;
        if requested.grants_any()
            && !cap_within(requested.max_delegation_duration, held.max_delegation_duration)
        {
            return Err(denied(
                AuthorityCheck::Duration,
                format!(
                    "max_delegation_duration {:?} exceeds the issuer's {:?}",
                    requested.max_delegation_duration, held.max_delegation_duration
                ),
            ));
        }
        if requested.can_moderate
            && !cap_within(requested.max_block_duration, held.max_block_duration)
        {
            return Err(denied(
                AuthorityCheck::Duration,
                format!(
                    "max_block_duration {:?} exceeds the issuer's {:?}",
                    requested.max_block_duration, held.max_block_duration
                ),
            ));
        }
        if let (
            DeclarationKind::ModerationAction { duration_secs, .. },
            Some(cap),
        ) = (body.kind(), held.max_block_duration)
        {
            if !duration_secs.is_some_and(|secs| secs <= cap) {
                return Err(denied(
                    AuthorityCheck::Duration,
                    format!("moderation lasting {duration_secs:?}s exceeds the {cap}s cap"),
                ));
            }
        }
    }

    // 5. validity
    let resolved = validity::resolve(draft.window(), standing.window.as_ref()).map_err(|e| {
        denied(AuthorityCheck::Validity, e.to_string())
    })?;

    if let Some(cap) = standing.permissions.max_delegation_duration.filter(|_| !standing.root) {
        let fits = resolved
            .window
            .length_ms()
            .is_some_and(|length| length <= secs_to_ms(cap));
        if !fits {
            return Err(denied(
                AuthorityCheck::Duration,
                format!("validity must be bounded to at most {cap}s"),
            ));
        }
    }

    tracing::debug!(
        declaration = %draft.uuid(),
        issuer = %issuer.fingerprint,
        clamped = resolved.clamped,
        "authority check passed"
    );
    Ok(resolved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assignment::AssignmentSet;
    use crate::declaration::{
        CountersignatureRequirement, DeclarationBody, DeclarationSet, IssuerRef, ModerationKind,
        Validity,
    };
    use crate::keypair::{KeyAlgorithm, KeyUsage};
    use crate::scope::{Scope, ScopeType};
    use crate::signature::SignatureBytes;
    use assert_matches::assert_matches;

    struct World {
        registry: KeypairRegistry,
        declarations: DeclarationSet,
    }

    impl World {
        fn new() -> Self {
            Self {
                registry: KeypairRegistry::new(),
                declarations: DeclarationSet::new(),
            }
        }

        fn key(&mut self, name: &str, usage: KeyUsage) -> Keypair {
            let keypair =
                Keypair::from_public_key(KeyAlgorithm::Ed25519, usage, name, name.as_bytes().to_vec(), 0);
            self.registry.insert(keypair.clone()).unwrap();
            keypair
        }

        fn draft(&self, issuer: &Keypair, subject: Subject, body: DeclarationBody, validity: Validity) -> TrustDeclaration {
            TrustDeclaration::new_draft(
                IssuerRef {
                    canonical_name: issuer.canonical_name.clone(),
                    fingerprint: issuer.fingerprint.clone(),
                    keypair_ref: issuer.id,
                },
                subject,
                body,
                validity,
                100,
            )
        }

        fn sign_in(&mut self, mut decl: TrustDeclaration) -> TrustDeclaration {
            let content_hash = decl.compute_content_hash().unwrap();
            let window = decl.window();
            decl.lock_content(content_hash, decl.issued_at(), window);
            decl.attach_signature(SignatureBytes(vec![0; 64]));
            self.declarations.insert(decl.clone());
            decl
        }

        fn grant(&mut self, issuer: &Keypair, subject: &Keypair, body: DeclarationBody, validity: Validity) -> TrustDeclaration {
            let decl = self.draft(issuer, Subject::keypair(subject.fingerprint.clone()), body, validity);
            self.sign_in(decl)
        }

        fn snapshot(&self) -> TrustSnapshot {
            TrustSnapshot::new(self.registry.clone(), self.declarations.clone(), AssignmentSet::new(), 0)
        }
    }

    fn moderator_perms() -> PermissionSet {
        PermissionSet::from_permissions([
            Permission::SignTrustDeclarations,
            Permission::Moderate,
            Permission::DelegateModerators,
        ])
    }

    #[test]
    fn test_root_passes_containment() {
        let mut world = World::new();
        let master = world.key("master", KeyUsage::MasterAdminSigning);
        let op = world.key("op", KeyUsage::OperatingAdminSigning);
        let draft = world.draft(
            &master,
            Subject::keypair(op.fingerprint.clone()),
            DeclarationBody::trust(100, PermissionSet::all()),
            Validity::open(),
        );
        let resolved = can_issue(&master, &draft, &world.snapshot(), 100).unwrap();
        assert_eq!(resolved.window, Window::starting(100));
        assert!(!resolved.clamped);
    }

    #[test]
    fn test_no_standing_is_rejected() {
        let mut world = World::new();
        let admin = world.key("admin", KeyUsage::AuthorizedAdmin);
        let bob = world.key("bob", KeyUsage::User);
        let draft = world.draft(
            &admin,
            Subject::keypair(bob.fingerprint.clone()),
            DeclarationBody::trust(1, PermissionSet::none()),
            Validity::open(),
        );
        let err = can_issue(&admin, &draft, &world.snapshot(), 100).unwrap_err();
        assert_eq!(err.authority_check(), Some(AuthorityCheck::Standing));
    }

    #[test]
    fn test_assignment_does_not_raise_standing() {
        let mut world = World::new();
        let master = world.key("master", KeyUsage::MasterAdminSigning);
        let admin = world.key("admin", KeyUsage::AuthorizedAdmin);
        let bob = world.key("bob", KeyUsage::User);
        world.grant(
            &master,
            &admin,
            DeclarationBody::trust(10, moderator_perms()),
            Validity::open(),
        );
        let mut assignments = AssignmentSet::new();
        assignments
            .upsert(crate::assignment::TrustAssignment {
                pubkey: hex::encode(&admin.public_key),
                assigned_trust_level: TrustLevel(99),
                trust_limit: None,
                scope: None,
                assigned_by_pubkey: hex::encode(&master.public_key),
                expires_at: None,
                source: "admin-panel".into(),
                reason: None,
                created_at: 50,
            })
            .unwrap();
        let snapshot = TrustSnapshot {
            assignments: std::sync::Arc::new(assignments),
            ..world.snapshot()
        };
        let admin_subject = Subject::keypair(admin.fingerprint.clone());
        assert_eq!(
            crate::resolver::resolve_trust(&admin_subject, &ScopeRef::global(), &snapshot, 100).level,
            TrustLevel(99)
        );

        let escalation = world.draft(
            &admin,
            Subject::keypair(bob.fingerprint.clone()),
            DeclarationBody::trust(99, PermissionSet::none()),
            Validity::open(),
        );
        let err = can_issue(&admin, &escalation, &snapshot, 100).unwrap_err();
        assert_eq!(err.authority_check(), Some(AuthorityCheck::TrustLevel));

        let within = world.draft(
            &admin,
            Subject::keypair(bob.fingerprint.clone()),
            DeclarationBody::trust(10, PermissionSet::none()),
            Validity::open(),
        );
        can_issue(&admin, &within, &snapshot, 100).unwrap();
    }

    #[test]
    fn test_usage_table_applies_to_subject() {
        let mut world = World::new();
        let op = world.key("op", KeyUsage::OperatingAdminSigning);
        let other_op = world.key("op2", KeyUsage::OperatingAdminSigning);
        let draft = world.draft(
            &op,
            Subject::keypair(other_op.fingerprint.clone()),
            DeclarationBody::trust(1, PermissionSet::none()),
            Validity::open(),
        );
        let err = can_issue(&op, &draft, &world.snapshot(), 100).unwrap_err();
        assert_eq!(err.authority_check(), Some(AuthorityCheck::UsageCompatibility));
    }

    #[test]
    fn test_permission_and_scope_containment() {
        let mut world = World::new();
        let master = world.key("master", KeyUsage::MasterAdminSigning);
        let admin = world.key("admin", KeyUsage::AuthorizedAdmin);
        let bob = world.key("bob", KeyUsage::User);
        world.grant(
            &master,
            &admin,
            DeclarationBody::trust(10, moderator_perms())
                .with_scopes([Scope::targeted(ScopeType::Forum, ["romhacks"])]),
            Validity::open(),
        );
        let snapshot = world.snapshot();

        let within = world.draft(
            &admin,
            Subject::keypair(bob.fingerprint.clone()),
            DeclarationBody::trust(5, PermissionSet::from_permissions([Permission::Moderate]))
                .with_scopes([Scope::targeted(ScopeType::Forum, ["romhacks"])]),
            Validity::open(),
        );
        can_issue(&admin, &within, &snapshot, 100).unwrap();

        let escalating = world.draft(
            &admin,
            Subject::keypair(bob.fingerprint.clone()),
            DeclarationBody::trust(5, PermissionSet::from_permissions([Permission::SignOperationalAdmins]))
                .with_scopes([Scope::targeted(ScopeType::Forum, ["romhacks"])]),
            Validity::open(),
        );
        let err = can_issue(&admin, &escalating, &snapshot, 100).unwrap_err();
        assert_eq!(err.authority_check(), Some(AuthorityCheck::Permission));

        let too_wide = world.draft(
            &admin,
            Subject::keypair(bob.fingerprint.clone()),
            DeclarationBody::trust(5, PermissionSet::from_permissions([Permission::Moderate])),
            Validity::open(),
        );
        let err = can_issue(&admin, &too_wide, &snapshot, 100).unwrap_err();
        assert_eq!(err.authority_check(), Some(AuthorityCheck::Scope));

        let too_high = world.draft(
            &admin,
            Subject::keypair(bob.fingerprint.clone()),
            DeclarationBody::trust(11, PermissionSet::none())
                .with_scopes([Scope::targeted(ScopeType::Forum, ["romhacks"])]),
            Validity::open(),
        );
        let err = can_issue(&admin, &too_high, &snapshot, 100).unwrap_err();
        assert_eq!(err.authority_check(), Some(AuthorityCheck::TrustLevel));
    }

    #[test]
    fn test_moderation_rights_need_delegation_right() {
        let mut world = World::new();
        let master = world.key("master", KeyUsage::MasterAdminSigning);
        let admin = world.key("admin", KeyUsage::AuthorizedAdmin);
        let bob = world.key("bob", KeyUsage::User);
        world.grant(
            &master,
            &admin,
            DeclarationBody::trust(
                10,
                PermissionSet::from_permissions([Permission::SignTrustDeclarations, Permission::Moderate]),
            ),
            Validity::open(),
        );
        let draft = world.draft(
            &admin,
            Subject::keypair(bob.fingerprint.clone()),
            DeclarationBody::trust(1, PermissionSet::from_permissions([Permission::Moderate])),
            Validity::open(),
        );
        let err = can_issue(&admin, &draft, &world.snapshot(), 100).unwrap_err();
        assert_matches!(
            err,
            TrustError::Authority { check: AuthorityCheck::Permission, .. }
        );
    }

    #[test]
    fn test_validity_and_duration_containment() {
        let mut world = World::new();
        let master = world.key("master", KeyUsage::MasterAdminSigning);
        let admin = world.key("admin", KeyUsage::AuthorizedAdmin);
        let bob = world.key("bob", KeyUsage::User);
        world.grant(
            &master,
            &admin,
            DeclarationBody::trust(10, moderator_perms().with_max_block_duration(3_600)),
            Validity::between(50, 10_000),
        );
        let snapshot = world.snapshot();

        let outside = world.draft(
            &admin,
            Subject::keypair(bob.fingerprint.clone()),
            DeclarationBody::trust(1, PermissionSet::none()),
            Validity::between(20_000, 30_000),
        );
        let err = can_issue(&admin, &outside, &snapshot, 100).unwrap_err();
        assert_eq!(err.authority_check(), Some(AuthorityCheck::Validity));

        let clamped = world.draft(
            &admin,
            Subject::keypair(bob.fingerprint.clone()),
            DeclarationBody::trust(1, PermissionSet::none()),
            Validity::open(),
        );
        let resolved = can_issue(&admin, &clamped, &snapshot, 100).unwrap();
        assert!(resolved.clamped);
        assert_eq!(resolved.window, Window::between(100, 10_000));

        let long_block = world.draft(
            &admin,
            Subject::keypair(bob.fingerprint.clone()),
            DeclarationBody::moderation(ModerationKind::Block, Some(7_200)),
            Validity::between(100, 10_000),
        );
        let err = can_issue(&admin, &long_block, &snapshot, 100).unwrap_err();
        assert_eq!(err.authority_check(), Some(AuthorityCheck::Duration));

        let forever = world.draft(
            &admin,
            Subject::keypair(bob.fingerprint.clone()),
            DeclarationBody::moderation(ModerationKind::Block, None),
            Validity::between(100, 10_000),
        );
        assert!(can_issue(&admin, &forever, &snapshot, 100).is_err());

        let short_block = world.draft(
            &admin,
            Subject::keypair(bob.fingerprint.clone()),
            DeclarationBody::moderation(ModerationKind::Block, Some(600)),
            Validity::between(100, 10_000),
        );
        can_issue(&admin, &short_block, &snapshot, 100).unwrap();
    }

    #[test]
    fn test_finite_delegation_cap_bounds_window() {
        let mut world = World::new();
        let master = world.key("master", KeyUsage::MasterAdminSigning);
        let admin = world.key("admin", KeyUsage::AuthorizedAdmin);
        let bob = world.key("bob", KeyUsage::User);
        world.grant(
            &master,
            &admin,
            DeclarationBody::trust(10, moderator_perms().with_max_delegation_duration(60)),
            Validity::open(),
        );
        let snapshot = world.snapshot();

        let open = world.draft(
            &admin,
            Subject::keypair(bob.fingerprint.clone()),
            DeclarationBody::trust(1, PermissionSet::none()),
            Validity::open(),
        );
        assert_eq!(
            can_issue(&admin, &open, &snapshot, 100).unwrap_err().authority_check(),
            Some(AuthorityCheck::Duration)
        );

        let bounded = world.draft(
            &admin,
            Subject::keypair(bob.fingerprint.clone()),
            DeclarationBody::trust(1, PermissionSet::none()),
            Validity::between(100, 100 + 60_000),
        );
        can_issue(&admin, &bounded, &snapshot, 100).unwrap();
    }

    #[test]
    fn test_revocation_dominance_and_policy() {
        let mut world = World::new();
        let master = world.key("master", KeyUsage::MasterAdminSigning);
        let op = world.key("op", KeyUsage::OperatingAdminSigning);
        let admin = world.key("admin", KeyUsage::AuthorizedAdmin);
        let bob = world.key("bob", KeyUsage::User);
        world.grant(&master, &op, DeclarationBody::trust(50, moderator_perms()), Validity::open());
        world.grant(&master, &admin, DeclarationBody::trust(10, moderator_perms()), Validity::open());
        let target = world.grant(
            &op,
            &bob,
            DeclarationBody::trust(3, PermissionSet::none())
                .with_countersignatures(CountersignatureRequirement::any_of(2)),
            Validity::open(),
        );
        let snapshot = world.snapshot();

        let by_admin = world.draft(
            &admin,
            Subject::declaration(target.uuid()),
            DeclarationBody::new(DeclarationKind::PrivilegeRevoke),
            Validity::open(),
        );
        assert_eq!(
            can_issue(&admin, &by_admin, &snapshot, 100).unwrap_err().authority_check(),
            Some(AuthorityCheck::Dominance)
        );

        let by_op = world.draft(
            &op,
            Subject::declaration(target.uuid()),
            DeclarationBody::new(DeclarationKind::PrivilegeRevoke),
            Validity::open(),
        );
        can_issue(&op, &by_op, &snapshot, 100).unwrap();
        assert!(check_revocation_requirement(&by_op, &target, &op, RevocationPolicy::InheritTarget).is_err());
        check_revocation_requirement(&by_op, &target, &op, RevocationPolicy::OwnRequirement).unwrap();

        let by_master = world.draft(
            &master,
            Subject::declaration(target.uuid()),
            DeclarationBody::new(DeclarationKind::PrivilegeRevoke),
            Validity::open(),
        );
        check_revocation_requirement(&by_master, &target, &master, RevocationPolicy::InheritTarget).unwrap();
    }

    #[test]
    fn test_update_must_keep_type_and_subject() {
        let mut world = World::new();
        let master = world.key("master", KeyUsage::MasterAdminSigning);
        let bob = world.key("bob", KeyUsage::User);
        let carol = world.key("carol", KeyUsage::User);
        let original = world.grant(&master, &bob, DeclarationBody::trust(3, PermissionSet::none()), Validity::open());

        let mut update = world.draft(
            &master,
            Subject::keypair(carol.fingerprint.clone()),
            DeclarationBody::trust(4, PermissionSet::none()),
            Validity::open(),
        );
        update.original_declaration_uuid = Some(original.uuid());
        assert_matches!(
            can_issue(&master, &update, &world.snapshot(), 100),
            Err(TrustError::Validation { .. })
        );

        update.subject = Subject::keypair(bob.fingerprint.clone());
        can_issue(&master, &update, &world.snapshot(), 100).unwrap();
    }
}
