//! Countersignature tracking
//!
//! A declaration with a countersignature requirement has no trust effect
//! until enough distinct, permitted signers have signed the same payload
//! the issuer signed. [`is_satisfied`] is the only gate the resolver uses.

use crate::declaration::{Countersignature, TrustDeclaration};
use crate::error::{Result, TrustError};
use crate::keypair::{Fingerprint, Keypair, KeypairRegistry};
use crate::signature::{SignatureBytes, SignatureVerifier};
use crate::time::TimestampMs;
use std::collections::BTreeSet;

/// Result of recording a countersignature
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CountersignOutcome {
    /// Appended; carries the new count of distinct permitted signers
    Added {
        /// Distinct permitted signers after recording
        current: u32,
    },
    /// The signer had already countersigned; nothing changed
    Duplicate,
}

/// Whether `signer` may countersign `declaration`
///
/// The issuer never counts. Without named keys anyone else may sign.
pub fn is_permitted_signer(declaration: &TrustDeclaration, signer: &Fingerprint) -> bool {
    if &declaration.issuer().fingerprint == signer {
        return false;
    }
    match declaration.body().required_countersignatures() {
        Some(requirement) if !requirement.required_keys.is_empty() => {
            requirement.required_keys.contains(signer)
        }
        _ => true,
    }
}

/// Distinct permitted signers among the recorded countersignatures
pub fn current_count(declaration: &TrustDeclaration) -> u32 {
    let distinct: BTreeSet<&Fingerprint> = declaration
        .countersignatures()
        .iter()
        .map(|c| &c.signer_fingerprint)
        .filter(|fp| is_permitted_signer(declaration, fp))
        .collect();
    distinct.len() as u32
}

/// Whether the countersignature requirement is met; no requirement is always met
pub fn is_satisfied(declaration: &TrustDeclaration) -> bool {
    current_count(declaration) >= declaration.body().required_count()
}

/// [`is_satisfied`] as an error, for callers that need the counts
pub fn ensure_satisfied(declaration: &TrustDeclaration) -> Result<()> {
    let current = current_count(declaration);
    let required = declaration.body().required_count();
    if current < required {
        return Err(TrustError::CountersignatureDeficient { current, required });
    }
    Ok(())
}

/// Validate and append a countersignature
pub fn record_signature(
    declaration: &mut TrustDeclaration,
    signer: &Keypair,
    signature: SignatureBytes,
    signed_at: TimestampMs,
    verifier: &dyn SignatureVerifier,
) -> Result<CountersignOutcome> {
    if !declaration.status().is_signed() {
        return Err(TrustError::invalid_state(format!(
            "{} is {:?}; only signed declarations take countersignatures",
            declaration.uuid(),
            declaration.status()
        )));
    }
    if !is_permitted_signer(declaration, &signer.fingerprint) {
        return Err(TrustError::validation(format!(
            "{} is not a permitted countersigner of {}",
            signer.fingerprint,
            declaration.uuid()
        )));
    }
    if declaration.has_countersignature_from(&signer.fingerprint) {
        return Ok(CountersignOutcome::Duplicate);
    }

    let payload = declaration.signing_payload()?;
    if !verifier.verify(signer.algorithm, &signer.public_key, &payload, &signature) {
        return Err(TrustError::signature(format!(
            "countersignature by {} does not verify over {}",
            signer.fingerprint,
            declaration.uuid()
        )));
    }

    declaration.countersignatures.push(Countersignature {
        signer_fingerprint: signer.fingerprint.clone(),
        signature,
        signed_at,
    });
    Ok(CountersignOutcome::Added {
        current: current_count(declaration),
    })
}

/// Drop countersignatures that are unverifiable, duplicated, or from signers
/// that may not countersign; returns how many were dropped
pub(crate) fn retain_verified(
    declaration: &mut TrustDeclaration,
    registry: &KeypairRegistry,
    verifier: &dyn SignatureVerifier,
) -> Result<usize> {
    let payload = declaration.signing_payload()?;
    let before = declaration.countersignatures.len();
    let mut seen = BTreeSet::new();
    let mut kept = Vec::with_capacity(before);
    for countersignature in std::mem::take(&mut declaration.countersignatures) {
        let fp = &countersignature.signer_fingerprint;
        let valid = is_permitted_signer(declaration, fp)
            && !seen.contains(fp)
            && registry.by_fingerprint(fp).is_some_and(|signer| {
                verifier.verify(
                    signer.algorithm,
                    &signer.public_key,
                    &payload,
                    &countersignature.signature,
                )
            });
        if valid {
            seen.insert(fp.clone());
            kept.push(countersignature);
        }
    }
    declaration.countersignatures = kept;
    Ok(before - declaration.countersignatures.len())
}
