//! Declaration lifecycle transitions
//!
//! `Draft -> Finalized -> Signed -> Published`, with revocation as a separate
//! declaration. These functions are the synchronous halves of each step;
//! the engine sequences them around the asynchronous signing call and the
//! store's write lock. Every function either applies its transition in full
//! or returns an error leaving the declaration as it was.

use crate::authority::{self, RevocationPolicy};
use crate::canonical::ContentHash;
use crate::countersign;
use crate::declaration::{
    DeclarationBody, DeclarationId, DeclarationKind, DeclarationMetadata, DeclarationSet,
    DeclarationStatus, DeclarationType, IssuerRef, PublishStatus, RetroactiveEffect, Subject,
    TrustDeclaration, Validity,
};
use crate::error::{AuthorityCheck, Result, TrustError};
use crate::keypair::Keypair;
use crate::signature::SignatureBytes;
use crate::store::TrustSnapshot;
use crate::time::TimestampMs;
use crate::transport::PublishAck;
use crate::validity::{self, Window};

/// New draft issued by `issuer`
pub fn create_draft(
    issuer: &Keypair,
    subject: Subject,
    body: DeclarationBody,
    validity: Validity,
    now: TimestampMs,
) -> TrustDeclaration {
    TrustDeclaration::new_draft(IssuerRef::of(issuer), subject, body, validity, now)
}

/// Draft revoking `target`
pub fn draft_revocation(
    revoker: &Keypair,
    target: &TrustDeclaration,
    reason: Option<String>,
    now: TimestampMs,
) -> Result<TrustDeclaration> {
    if !target.status().is_signed() {
        return Err(TrustError::invalid_state(format!(
            "{} is {:?}; discard drafts instead of revoking them",
            target.uuid(),
            target.status()
        )));
    }
    if target.is_revoked() {
        return Err(TrustError::revoked(target.uuid()));
    }
    let mut draft = create_draft(
        revoker,
        Subject::declaration(target.uuid()),
        DeclarationBody::new(DeclarationKind::PrivilegeRevoke),
        Validity::open(),
        now,
    );
    draft.metadata = DeclarationMetadata {
        reason,
        notes: None,
    };
    Ok(draft)
}

/// Draft amending `original` with new content
///
/// The update keeps the original's subject; type changes are refused when
/// the update is signed.
pub fn draft_update(
    issuer: &Keypair,
    original: &TrustDeclaration,
    body: DeclarationBody,
    validity: Validity,
    retroactive_effect: RetroactiveEffect,
    now: TimestampMs,
) -> Result<TrustDeclaration> {
    if !original.status().is_signed() {
        return Err(TrustError::invalid_state(format!(
            "{} is {:?}; edit the draft instead",
            original.uuid(),
            original.status()
        )));
    }
    if original.declaration_type() == DeclarationType::PrivilegeRevoke {
        return Err(TrustError::validation("revocations cannot be updated"));
    }
    let mut draft = create_draft(issuer, original.subject().clone(), body, validity, now);
    draft.original_declaration_uuid = Some(original.uuid());
    draft.retroactive_effect = retroactive_effect;
    Ok(draft)
}

fn check_structure(draft: &TrustDeclaration) -> Result<()> {
    draft.body().validate()?;
    let is_revocation = draft.declaration_type() == DeclarationType::PrivilegeRevoke;
    match (is_revocation, draft.subject()) {
        (true, Subject::Declaration { .. }) | (false, Subject::Keypair { .. }) => {}
        (false, Subject::Profile { .. } | Subject::User { .. } | Subject::System) => {}
        (true, _) => {
            return Err(TrustError::validation(
                "a privilege-revoke must name the revoked declaration as its subject",
            ))
        }
        (false, Subject::Declaration { .. }) => {
            return Err(TrustError::validation(format!(
                "{} declarations cannot target another declaration",
                draft.declaration_type()
            )))
        }
    }
    if let (Some(from), Some(until)) = (draft.validity().valid_from, draft.validity().valid_until) {
        if from > until {
            return Err(TrustError::validation(format!(
                "valid_from {from} is after valid_until {until}"
            )));
        }
    }
    let retro = draft.retroactive_effect();
    if retro.enabled && !draft.is_update() && !is_revocation {
        return Err(TrustError::validation(
            "retroactive effect only applies to updates and revocations",
        ));
    }
    Ok(())
}

/// Lock a draft's content
///
/// Validates the content, fixes the issue time to `now`, and clamps the
/// requested window into the issuer's own authorising window where one is
/// known. A window that lies entirely outside it is a temporal error and
/// the draft stays editable. Standing itself is not judged here; signing
/// does that.
pub fn finalize(
    draft: &mut TrustDeclaration,
    snapshot: &TrustSnapshot,
    now: TimestampMs,
    policy: RevocationPolicy,
) -> Result<ContentHash> {
    draft.ensure_draft()?;
    check_structure(draft)?;

    let issuer = snapshot.registry.by_fingerprint(&draft.issuer().fingerprint);
    if let (Some(target_id), Some(revoker)) = (draft.subject().target_declaration(), issuer) {
        let target = snapshot.declarations.require(&target_id)?;
        authority::check_revocation_requirement(draft, target, revoker, policy)?;
    }

    let requested = Window {
        from: draft.validity().valid_from.unwrap_or(now),
        until: draft.validity().valid_until,
    };
    let parent = issuer.and_then(|issuer| {
        let refs: Vec<_> = draft
            .body()
            .effective_scopes()
            .iter()
            .flat_map(|s| s.representative_refs())
            .collect();
        authority::issuer_standing(issuer, &refs, snapshot, now)
            .ok()
            .and_then(|standing| standing.window)
    });
    let resolved = validity::resolve(requested, parent.as_ref())?;

    let content_hash = draft.compute_content_hash()?;
    draft.lock_content(content_hash, now, resolved.window);
    tracing::debug!(
        declaration = %draft.uuid(),
        hash = %content_hash,
        clamped = resolved.clamped,
        "declaration finalized"
    );
    Ok(content_hash)
}

/// Everything needed to sign a finalized declaration outside the store lock
#[derive(Debug, Clone)]
pub struct SignPlan {
    /// Declaration being signed
    pub declaration_uuid: DeclarationId,
    /// Content hash the signature will cover
    pub content_hash: ContentHash,
    /// Canonical bytes to sign
    pub payload: Vec<u8>,
    /// Issuing keypair
    pub issuer: Keypair,
}

/// Check a finalized declaration may be signed now and build its payload
pub fn prepare_sign(
    declaration: &TrustDeclaration,
    snapshot: &TrustSnapshot,
    at: TimestampMs,
) -> Result<SignPlan> {
    if declaration.status() != DeclarationStatus::Finalized {
        return Err(TrustError::invalid_state(format!(
            "{} is {:?}; only finalized declarations can be signed",
            declaration.uuid(),
            declaration.status()
        )));
    }
    declaration.verify_content_hash()?;
    let issuer = snapshot
        .registry
        .by_fingerprint(&declaration.issuer().fingerprint)
        .ok_or_else(|| {
            TrustError::not_found(format!("issuing keypair {}", declaration.issuer().fingerprint))
        })?;
    let resolved = authority::can_issue(issuer, declaration, snapshot, at)?;
    if resolved.clamped {
        return Err(TrustError::authority(
            AuthorityCheck::Validity,
            format!(
                "{} would be narrowed to {}..{:?}; the issuer's authority no longer spans it",
                declaration.uuid(),
                resolved.window.from,
                resolved.window.until
            ),
        ));
    }
    let content_hash = declaration
        .content_hash()
        .copied()
        .ok_or_else(|| TrustError::invalid_state("finalized declaration without a hash"))?;
    Ok(SignPlan {
        declaration_uuid: declaration.uuid(),
        content_hash,
        payload: declaration.signing_payload()?,
        issuer: issuer.clone(),
    })
}

/// Fail with a conflict unless `declaration` is still finalized with the
/// hash `plan` was built from
pub fn ensure_unchanged(declaration: &TrustDeclaration, plan: &SignPlan) -> Result<()> {
    let unchanged = declaration.status() == DeclarationStatus::Finalized
        && declaration
            .content_hash()
            .is_some_and(|hash| hash.matches(&plan.content_hash));
    if !unchanged {
        return Err(TrustError::conflict(format!(
            "{} changed while it was being signed",
            plan.declaration_uuid
        )));
    }
    Ok(())
}

/// Attach a signature produced for `plan`
///
/// The declaration must still be finalized with the planned hash; anything
/// else means another writer got there first.
pub fn commit_signature(
    declarations: &mut DeclarationSet,
    plan: &SignPlan,
    signature: SignatureBytes,
) -> Result<()> {
    let declaration = declarations.require_mut(&plan.declaration_uuid)?;
    ensure_unchanged(declaration, plan)?;
    declaration.attach_signature(signature);
    Ok(())
}

/// Mark targets of effective revocations; returns the newly revoked ids
///
/// A revocation is effective once it is signed, not itself revoked, and
/// has its countersignatures. Revocation is final and does not cascade to
/// declarations the revoked one authorised.
pub fn apply_revocations(declarations: &mut DeclarationSet) -> Vec<DeclarationId> {
    let pending: Vec<(DeclarationId, DeclarationId)> = declarations
        .iter()
        .filter(|d| d.declaration_type() == DeclarationType::PrivilegeRevoke)
        .filter(|d| d.status().is_signed() && !d.is_revoked() && countersign::is_satisfied(d))
        .filter_map(|d| Some((d.subject().target_declaration()?, d.uuid())))
        .filter(|(target, _)| declarations.get(target).is_some_and(|t| !t.is_revoked()))
        .collect();

    let mut revoked = Vec::with_capacity(pending.len());
    for (target, by) in pending {
        if let Ok(declaration) = declarations.require_mut(&target) {
            if !declaration.is_revoked() {
                declaration.mark_revoked(by);
                tracing::info!(declaration = %target, revoked_by = %by, "declaration revoked");
                revoked.push(target);
            }
        }
    }
    revoked
}

/// Hand a signed declaration to the transport
pub fn mark_publish_pending(declaration: &mut TrustDeclaration) -> Result<()> {
    if !declaration.status().is_signed() {
        return Err(TrustError::invalid_state(format!(
            "{} is {:?}; only signed declarations are published",
            declaration.uuid(),
            declaration.status()
        )));
    }
    declaration.publication.status = PublishStatus::Pending;
    Ok(())
}

/// Record the transport's answer to a publish
pub fn record_publish_outcome(
    declaration: &mut TrustDeclaration,
    outcome: std::result::Result<&PublishAck, &TrustError>,
) {
    match outcome {
        Ok(ack) => {
            declaration.publication.status = PublishStatus::Acknowledged;
            declaration.publication.event_id = Some(ack.event_id.clone());
            declaration.publication.relays = ack.relays.clone();
            declaration.status = DeclarationStatus::Published;
        }
        Err(err) => {
            tracing::warn!(declaration = %declaration.uuid(), error = %err, "publish failed");
            declaration.publication.status = PublishStatus::Failed;
        }
    }
}
