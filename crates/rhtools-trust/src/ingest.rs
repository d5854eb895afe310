//! Ingestion of declarations discovered on the network
//!
//! Each document is checked on its own: time skew, structure, content hash,
//! issuer signature, countersignatures, and finally the issuer's authority
//! against the declarations already accepted. A failing document is dropped
//! with its reason and never affects the rest of a batch.
//!
//! Ingestion is idempotent. A document already held with the same
//! `(declaration_uuid, content_hash)` only contributes countersignatures the
//! local copy lacks; the same uuid with a different hash is a conflict.
//!
//! Documents can arrive before what they depend on. A revocation or update
//! whose target is unknown, or a grant whose issuer has no standing yet, is
//! parked in [`ParkedDocuments`] and retried once the missing record is
//! accepted.

use crate::authority::{self, RevocationPolicy};
use crate::config::{AuthorityClock, IngestionConfig};
use crate::countersign;
use crate::declaration::{DeclarationId, DeclarationSet, Subject, TrustDeclaration};
use crate::error::{AuthorityCheck, Result, TrustError};
use crate::keypair::Fingerprint;
use crate::lifecycle;
use crate::signature::SignatureVerifier;
use crate::store::TrustSnapshot;
use crate::time::TimestampMs;
use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// Record a parked document is waiting for
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Awaiting {
    /// Target of a revocation or original of an update
    Declaration(DeclarationId),
    /// Any grant to the issuer, which has no standing yet
    Standing(Fingerprint),
}

impl fmt::Display for Awaiting {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Awaiting::Declaration(id) => write!(f, "declaration {id}"),
            Awaiting::Standing(fingerprint) => write!(f, "standing of {fingerprint}"),
        }
    }
}

/// Verified documents waiting for a record they depend on
///
/// Bounded by `capacity`; a full queue refuses new documents.
#[derive(Debug, Clone)]
pub struct ParkedDocuments {
    waiting: BTreeMap<Awaiting, Vec<TrustDeclaration>>,
    capacity: usize,
}

impl ParkedDocuments {
    /// Empty queue holding at most `capacity` documents
    pub fn new(capacity: usize) -> Self {
        Self {
            waiting: BTreeMap::new(),
            capacity,
        }
    }

    /// Documents parked
    pub fn len(&self) -> usize {
        self.waiting.values().map(Vec::len).sum()
    }

    /// Whether nothing is parked
    pub fn is_empty(&self) -> bool {
        self.waiting.is_empty()
    }

    /// Whether the document with `id` is parked
    pub fn contains(&self, id: &DeclarationId) -> bool {
        self.waiting
            .values()
            .any(|documents| documents.iter().any(|d| d.uuid() == *id))
    }

    /// Park `document` until `awaiting` is accepted
    ///
    /// A document already parked under the same uuid is replaced. Returns
    /// `false` when the queue is full.
    pub fn park(&mut self, awaiting: Awaiting, document: TrustDeclaration) -> bool {
        let id = document.uuid();
        self.waiting.retain(|_, documents| {
            documents.retain(|d| d.uuid() != id);
            !documents.is_empty()
        });
        if self.len() >= self.capacity {
            return false;
        }
        self.waiting.entry(awaiting).or_default().push(document);
        true
    }

    /// Take every document that was waiting for `accepted`
    pub fn release_for(&mut self, accepted: &TrustDeclaration) -> Vec<TrustDeclaration> {
        let mut released = self
            .waiting
            .remove(&Awaiting::Declaration(accepted.uuid()))
            .unwrap_or_default();
        if let Subject::Keypair { fingerprint, .. } = accepted.subject() {
            if accepted.declaration_type().is_grant() {
                released.extend(
                    self.waiting
                        .remove(&Awaiting::Standing(fingerprint.clone()))
                        .unwrap_or_default(),
                );
            }
        }
        released
    }
}

/// What ingesting one document did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    /// New document stored
    Accepted {
        /// Declarations that became revoked as a result
        revoked: Vec<DeclarationId>,
    },
    /// Already known; nothing changed
    Duplicate,
    /// Already known; new countersignatures were merged in
    MergedCountersignatures {
        /// Countersignatures added
        added: usize,
        /// Declarations that became revoked as a result
        revoked: Vec<DeclarationId>,
    },
    /// Verified but depends on a record not yet known
    Parked {
        /// What it waits for
        awaiting: Awaiting,
        /// The document, handed back for queueing
        document: Box<TrustDeclaration>,
    },
}

/// Summary of a batch
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestReport {
    /// Newly stored documents
    pub accepted: Vec<DeclarationId>,
    /// Documents already known unchanged
    pub duplicates: Vec<DeclarationId>,
    /// Known documents that gained countersignatures
    pub merged: Vec<DeclarationId>,
    /// Countersignatures merged into known documents
    pub merged_countersignatures: usize,
    /// Dropped documents and why
    pub rejected: Vec<(DeclarationId, String)>,
    /// Declarations revoked by accepted documents
    pub revoked: Vec<DeclarationId>,
    /// Documents still waiting for a record they depend on
    pub parked: Vec<DeclarationId>,
}

/// Validates discovered documents against a base snapshot
///
/// The registry and assignments come from `base`; declarations are the
/// working set passed to each call, so a batch sees its own earlier
/// acceptances.
pub struct Ingestor<'a> {
    base: &'a TrustSnapshot,
    verifier: &'a dyn SignatureVerifier,
    config: &'a IngestionConfig,
    policy: RevocationPolicy,
    now: TimestampMs,
}

impl<'a> Ingestor<'a> {
    /// Ingestor judging documents at local time `now`
    pub fn new(
        base: &'a TrustSnapshot,
        verifier: &'a dyn SignatureVerifier,
        config: &'a IngestionConfig,
        policy: RevocationPolicy,
        now: TimestampMs,
    ) -> Self {
        Self {
            base,
            verifier,
            config,
            policy,
            now,
        }
    }

    /// Validate and merge one document into `declarations`
    pub fn ingest(
        &self,
        declarations: &mut DeclarationSet,
        incoming: TrustDeclaration,
    ) -> Result<IngestOutcome> {
        let view = self.view_of(declarations);
        self.ingest_with(declarations, &view, incoming)
    }

    /// Ingest every document, collecting a report
    ///
    /// Documents waiting on a record are parked in `parked`; whenever a
    /// document is accepted, those waiting for it are retried in the same
    /// batch.
    pub fn ingest_batch(
        &self,
        declarations: &mut DeclarationSet,
        parked: &mut ParkedDocuments,
        documents: impl IntoIterator<Item = TrustDeclaration>,
    ) -> IngestReport {
        let mut report = IngestReport::default();
        let mut queue: VecDeque<TrustDeclaration> = documents.into_iter().collect();
        let mut view = self.view_of(declarations);
        while let Some(document) = queue.pop_front() {
            let id = document.uuid();
            match self.ingest_with(declarations, &view, document) {
                Ok(IngestOutcome::Accepted { revoked }) => {
                    report.accepted.push(id);
                    report.revoked.extend(revoked);
                    if let Some(accepted) = declarations.get(&id) {
                        queue.extend(parked.release_for(accepted));
                    }
                    view = self.view_of(declarations);
                }
                Ok(IngestOutcome::Duplicate) => report.duplicates.push(id),
                Ok(IngestOutcome::MergedCountersignatures { added, revoked }) => {
                    report.merged.push(id);
                    report.merged_countersignatures += added;
                    report.revoked.extend(revoked);
                    if let Some(merged) = declarations.get(&id) {
                        queue.extend(parked.release_for(merged));
                    }
                    view = self.view_of(declarations);
                }
                Ok(IngestOutcome::Parked { awaiting, document }) => {
                    if parked.park(awaiting.clone(), *document) {
                        debug!(declaration_uuid = %id, %awaiting, "declaration parked");
                        report.parked.push(id);
                    } else {
                        warn!(declaration_uuid = %id, %awaiting, "parking queue full; dropping declaration");
                        report
                            .rejected
                            .push((id, format!("parking queue full while awaiting {awaiting}")));
                    }
                }
                Err(e) => {
                    warn!(declaration_uuid = %id, reason = %e, "dropping discovered declaration");
                    report.rejected.push((id, e.to_string()));
                }
            }
        }
        report.parked.sort();
        report.parked.dedup();
        report.parked.retain(|id| parked.contains(id));
        report
    }

    fn view_of(&self, declarations: &DeclarationSet) -> TrustSnapshot {
        self.base.with_declarations(Arc::new(declarations.clone()))
    }

    /// `view` must hold exactly `declarations`
    fn ingest_with(
        &self,
        declarations: &mut DeclarationSet,
        view: &TrustSnapshot,
        mut incoming: TrustDeclaration,
    ) -> Result<IngestOutcome> {
        incoming.clear_local_state();
        self.check_document(&mut incoming)?;

        if let Some(existing) = declarations.get(&incoming.uuid()) {
            if existing.status().is_signed() {
                return merge_known(declarations, incoming);
            }
        }

        let dependency = incoming
            .subject()
            .target_declaration()
            .or_else(|| incoming.original_declaration_uuid());
        if let Some(dependency) = dependency {
            if declarations.get(&dependency).is_none() {
                return Ok(IngestOutcome::Parked {
                    awaiting: Awaiting::Declaration(dependency),
                    document: Box::new(incoming),
                });
            }
        }

        let at = match self.config.authority_clock {
            AuthorityClock::IssuedAt => incoming.issued_at(),
            AuthorityClock::Now => self.now,
        };
        let issuer = self.issuer_of(&incoming)?;
        if let Some(target_id) = incoming.subject().target_declaration() {
            let target = declarations.require(&target_id)?;
            authority::check_revocation_requirement(&incoming, target, issuer, self.policy)?;
        }
        let resolved = match authority::can_issue(issuer, &incoming, view, at) {
            Ok(resolved) => resolved,
            Err(e) if e.authority_check() == Some(AuthorityCheck::Standing) => {
                return Ok(IngestOutcome::Parked {
                    awaiting: Awaiting::Standing(issuer.fingerprint.clone()),
                    document: Box::new(incoming),
                });
            }
            Err(e) => return Err(e),
        };
        if resolved.clamped {
            return Err(TrustError::authority(
                AuthorityCheck::Validity,
                format!(
                    "window {:?} exceeds the issuer's authority at {at}",
                    incoming.window()
                ),
            ));
        }

        let id = incoming.uuid();
        declarations.insert(incoming);
        let revoked = lifecycle::apply_revocations(declarations);
        debug!(declaration_uuid = %id, revoked = revoked.len(), "declaration accepted");
        Ok(IngestOutcome::Accepted { revoked })
    }

    fn issuer_of(&self, document: &TrustDeclaration) -> Result<&'a crate::keypair::Keypair> {
        self.base
            .registry
            .by_fingerprint(&document.issuer().fingerprint)
            .ok_or_else(|| {
                TrustError::not_found(format!("issuer {}", document.issuer().fingerprint))
            })
    }

    /// Everything that can be judged from the document and the registry alone
    fn check_document(&self, document: &mut TrustDeclaration) -> Result<()> {
        let horizon = self.now.saturating_add(self.config.max_future_skew_ms);
        if document.issued_at() > horizon {
            return Err(TrustError::temporal(format!(
                "issued at {}, more than {}ms in the future",
                document.issued_at(),
                self.config.max_future_skew_ms
            )));
        }
        if !document.status().is_signed() {
            return Err(TrustError::validation(format!(
                "{} is {:?}; only signed declarations are accepted",
                document.uuid(),
                document.status()
            )));
        }
        document.body().validate()?;
        document.verify_content_hash()?;

        let issuer = self.issuer_of(document)?;
        let signature = document
            .digital_signature()
            .ok_or_else(|| TrustError::signature("signed declaration without a signature"))?;
        let payload = document.signing_payload()?;
        if !self
            .verifier
            .verify(issuer.algorithm, &issuer.public_key, &payload, signature)
        {
            return Err(TrustError::signature(format!(
                "issuer signature on {} does not verify",
                document.uuid()
            )));
        }

        let dropped = countersign::retain_verified(document, &self.base.registry, self.verifier)?;
        if dropped > 0 {
            debug!(declaration_uuid = %document.uuid(), dropped, "ignored invalid countersignatures");
        }
        Ok(())
    }
}

fn merge_known(
    declarations: &mut DeclarationSet,
    incoming: TrustDeclaration,
) -> Result<IngestOutcome> {
    let existing = declarations.require_mut(&incoming.uuid())?;
    let same_content = match (existing.content_hash(), incoming.content_hash()) {
        (Some(ours), Some(theirs)) => ours.matches(theirs),
        _ => false,
    };
    if !same_content {
        return Err(TrustError::conflict(format!(
            "{} is already known with different content",
            incoming.uuid()
        )));
    }

    let mut added = 0;
    for countersignature in incoming.countersignatures {
        if !existing.has_countersignature_from(&countersignature.signer_fingerprint) {
            existing.countersignatures.push(countersignature);
            added += 1;
        }
    }
    if added == 0 {
        return Ok(IngestOutcome::Duplicate);
    }
    let revoked = lifecycle::apply_revocations(declarations);
    Ok(IngestOutcome::MergedCountersignatures { added, revoked })
}
