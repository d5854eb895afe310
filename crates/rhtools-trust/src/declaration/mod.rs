//! Trust declarations
//!
//! A [`TrustDeclaration`] is a signed, content-addressed document in which an
//! issuer keypair grants, limits, or revokes authority of a subject within
//! a set of scopes and a time window.
//!
//! Content (issuer, subject, validity, body, metadata) is editable only while
//! the declaration is a draft. Finalizing locks it and stores the content
//! hash; everything after that is either signature material or local
//! bookkeeping (revocation flag, publication status), none of which is part
//! of the signed payload.

mod body;
mod set;
mod wire;

pub use body::{
    CountersignatureRequirement, DeclarationBody, DeclarationKind, DeclarationType,
    ModerationKind, TrustLevel,
};
pub use set::DeclarationSet;
pub use wire::{ControlContent, DeclarationDocument, ModerationContent, WireContent};

use crate::canonical::{self, ContentHash};
use crate::error::{Result, TrustError};
use crate::keypair::{Fingerprint, Keypair, KeypairId};
use crate::signature::SignatureBytes;
use crate::time::TimestampMs;
use crate::validity::Window;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Current declaration document schema version
pub const SCHEMA_VERSION: u32 = 1;

/// Stable declaration identifier, immutable for the life of the document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeclarationId(pub Uuid);

impl DeclarationId {
    /// Fresh random identifier
    pub fn new_random() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for DeclarationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Reference to the issuing keypair
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IssuerRef {
    /// Issuer's canonical name at issue time
    pub canonical_name: String,
    /// Issuer's public key fingerprint
    pub fingerprint: Fingerprint,
    /// Issuer's keypair id in the issuing client's registry
    pub keypair_ref: KeypairId,
}

impl IssuerRef {
    /// Reference to `keypair` as it is registered now
    pub fn of(keypair: &Keypair) -> Self {
        Self {
            canonical_name: keypair.canonical_name.clone(),
            fingerprint: keypair.fingerprint.clone(),
            keypair_ref: keypair.id,
        }
    }
}

/// Who or what a declaration is about
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Subject {
    /// A keypair, identified by fingerprint
    Keypair {
        /// Public key fingerprint
        fingerprint: Fingerprint,
        /// Display name
        #[serde(default, skip_serializing_if = "Option::is_none")]
        canonical_name: Option<String>,
    },
    /// A profile record
    Profile {
        /// Profile identifier
        #[serde(rename = "ref")]
        reference: String,
        /// Display name
        #[serde(default, skip_serializing_if = "Option::is_none")]
        canonical_name: Option<String>,
    },
    /// A user record
    User {
        /// User identifier
        #[serde(rename = "ref")]
        reference: String,
        /// Display name
        #[serde(default, skip_serializing_if = "Option::is_none")]
        canonical_name: Option<String>,
    },
    /// The system itself
    System,
    /// Another declaration: the target of a revocation
    Declaration {
        /// Targeted declaration
        #[serde(rename = "ref")]
        declaration_uuid: DeclarationId,
    },
}

/// Identity of a subject, ignoring display names
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SubjectKey {
    /// Keypair fingerprint
    Keypair(Fingerprint),
    /// Profile id
    Profile(String),
    /// User id
    User(String),
    /// The system
    System,
    /// Declaration id
    Declaration(DeclarationId),
}

impl Subject {
    /// Keypair subject
    pub fn keypair(fingerprint: Fingerprint) -> Self {
        Subject::Keypair {
            fingerprint,
            canonical_name: None,
        }
    }

    /// Declaration subject
    pub fn declaration(declaration_uuid: DeclarationId) -> Self {
        Subject::Declaration { declaration_uuid }
    }

    /// Identity used for matching, ignoring display names
    pub fn key(&self) -> SubjectKey {
        match self {
            Subject::Keypair { fingerprint, .. } => SubjectKey::Keypair(fingerprint.clone()),
            Subject::Profile { reference, .. } => SubjectKey::Profile(reference.clone()),
            Subject::User { reference, .. } => SubjectKey::User(reference.clone()),
            Subject::System => SubjectKey::System,
            Subject::Declaration { declaration_uuid } => {
                SubjectKey::Declaration(*declaration_uuid)
            }
        }
    }

    /// Whether two subjects denote the same thing
    pub fn same_as(&self, other: &Subject) -> bool {
        self.key() == other.key()
    }

    /// Targeted declaration, for declaration subjects
    pub fn target_declaration(&self) -> Option<DeclarationId> {
        match self {
            Subject::Declaration { declaration_uuid } => Some(*declaration_uuid),
            _ => None,
        }
    }
}

/// Requested or resolved validity window
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Validity {
    /// Start of validity; a draft without one starts at issue time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub valid_from: Option<TimestampMs>,
    /// End of validity; `None` is open-ended
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub valid_until: Option<TimestampMs>,
}

impl Validity {
    /// A window starting at issue time with no end
    pub fn open() -> Self {
        Self::default()
    }

    /// An explicit window
    pub fn between(valid_from: TimestampMs, valid_until: TimestampMs) -> Self {
        Self {
            valid_from: Some(valid_from),
            valid_until: Some(valid_until),
        }
    }

    /// Builder: set the end
    pub fn until(mut self, valid_until: TimestampMs) -> Self {
        self.valid_until = Some(valid_until);
        self
    }
}

/// Free-text annotations
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeclarationMetadata {
    /// Why the declaration was issued
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Anything else
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

/// Lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeclarationStatus {
    /// Freely editable
    Draft,
    /// Content locked and hashed
    Finalized,
    /// Issuer signature attached
    Signed,
    /// Acknowledged by the transport
    Published,
}

impl DeclarationStatus {
    /// Whether a declaration in this status can carry trust
    pub fn is_signed(&self) -> bool {
        matches!(self, DeclarationStatus::Signed | DeclarationStatus::Published)
    }
}

/// A countersignature over the issuer's signing payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Countersignature {
    /// Countersigner fingerprint
    pub signer_fingerprint: Fingerprint,
    /// Signature over the signing payload
    pub signature: SignatureBytes,
    /// When it was recorded
    pub signed_at: TimestampMs,
}

/// Retroactive adjustment carried by updates and revocations
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetroactiveEffect {
    /// Whether `effective_from` backdates the change
    #[serde(default)]
    pub enabled: bool,
    /// Instant from which the change applies
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub effective_from: Option<TimestampMs>,
    /// Moderation actions issued under the affected grant at or after this
    /// instant are void
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub void_actions_after: Option<TimestampMs>,
}

/// Transport publication state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PublishStatus {
    /// Never handed to the transport
    #[default]
    NotPublished,
    /// Handed over, awaiting acknowledgement
    Pending,
    /// Transport acknowledged
    Acknowledged,
    /// Transport reported failure
    Failed,
}

/// Opaque transport bookkeeping
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Publication {
    /// Publication state
    #[serde(default)]
    pub status: PublishStatus,
    /// Transport event id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,
    /// Relays the document was sent to
    #[serde(default)]
    pub relays: Vec<String>,
}

/// Signed payload: everything the issuer's signature covers
#[derive(Serialize)]
struct SigningPayload<'a> {
    schema_version: u32,
    declaration_uuid: DeclarationId,
    declaration_type: DeclarationType,
    issuer: &'a IssuerRef,
    subject: &'a Subject,
    validity: &'a Validity,
    issued_at: TimestampMs,
    content_hash_sha256: &'a ContentHash,
    #[serde(skip_serializing_if = "Option::is_none")]
    original_declaration_uuid: Option<DeclarationId>,
    retroactive_effect: &'a RetroactiveEffect,
}

/// A trust declaration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "DeclarationDocument", into = "DeclarationDocument")]
pub struct TrustDeclaration {
    pub(crate) schema_version: u32,
    pub(crate) declaration_uuid: DeclarationId,
    pub(crate) issuer: IssuerRef,
    pub(crate) subject: Subject,
    pub(crate) validity: Validity,
    pub(crate) issued_at: TimestampMs,
    pub(crate) body: DeclarationBody,
    pub(crate) metadata: DeclarationMetadata,
    pub(crate) status: DeclarationStatus,
    pub(crate) content_hash: Option<ContentHash>,
    pub(crate) digital_signature: Option<SignatureBytes>,
    pub(crate) countersignatures: Vec<Countersignature>,
    pub(crate) is_revoked: bool,
    pub(crate) revoked_by: Option<DeclarationId>,
    pub(crate) original_declaration_uuid: Option<DeclarationId>,
    pub(crate) retroactive_effect: RetroactiveEffect,
    pub(crate) publication: Publication,
}

impl TrustDeclaration {
    /// New draft
    pub fn new_draft(
        issuer: IssuerRef,
        subject: Subject,
        body: DeclarationBody,
        validity: Validity,
        created_at: TimestampMs,
    ) -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            declaration_uuid: DeclarationId::new_random(),
            issuer,
            subject,
            validity,
            issued_at: created_at,
            body,
            metadata: DeclarationMetadata::default(),
            status: DeclarationStatus::Draft,
            content_hash: None,
            digital_signature: None,
            countersignatures: Vec::new(),
            is_revoked: false,
            revoked_by: None,
            original_declaration_uuid: None,
            retroactive_effect: RetroactiveEffect::default(),
            publication: Publication::default(),
        }
    }

    /// Stable identifier
    pub fn uuid(&self) -> DeclarationId {
        self.declaration_uuid
    }

    /// Schema version the document was written with
    pub fn schema_version(&self) -> u32 {
        self.schema_version
    }

    /// Type discriminator
    pub fn declaration_type(&self) -> DeclarationType {
        self.body.declaration_type()
    }

    /// Issuer
    pub fn issuer(&self) -> &IssuerRef {
        &self.issuer
    }

    /// Subject
    pub fn subject(&self) -> &Subject {
        &self.subject
    }

    /// Validity as written
    pub fn validity(&self) -> &Validity {
        &self.validity
    }

    /// Effective window: an absent start means issue time
    pub fn window(&self) -> Window {
        Window {
            from: self.validity.valid_from.unwrap_or(self.issued_at),
            until: self.validity.valid_until,
        }
    }

    /// When the content was locked (creation time while still a draft)
    pub fn issued_at(&self) -> TimestampMs {
        self.issued_at
    }

    /// Typed content
    pub fn body(&self) -> &DeclarationBody {
        &self.body
    }

    /// Annotations
    pub fn metadata(&self) -> &DeclarationMetadata {
        &self.metadata
    }

    /// Lifecycle status
    pub fn status(&self) -> DeclarationStatus {
        self.status
    }

    /// Content hash, once finalized
    pub fn content_hash(&self) -> Option<&ContentHash> {
        self.content_hash.as_ref()
    }

    /// Issuer signature, once signed
    pub fn digital_signature(&self) -> Option<&SignatureBytes> {
        self.digital_signature.as_ref()
    }

    /// Recorded countersignatures
    pub fn countersignatures(&self) -> &[Countersignature] {
        &self.countersignatures
    }

    /// Whether a revocation has taken effect
    pub fn is_revoked(&self) -> bool {
        self.is_revoked
    }

    /// Revocation that revoked this declaration
    pub fn revoked_by(&self) -> Option<DeclarationId> {
        self.revoked_by
    }

    /// Whether this declaration amends an earlier one
    pub fn is_update(&self) -> bool {
        self.original_declaration_uuid.is_some()
    }

    /// The declaration this one amends
    pub fn original_declaration_uuid(&self) -> Option<DeclarationId> {
        self.original_declaration_uuid
    }

    /// Retroactive adjustment
    pub fn retroactive_effect(&self) -> &RetroactiveEffect {
        &self.retroactive_effect
    }

    /// Transport bookkeeping
    pub fn publication(&self) -> &Publication {
        &self.publication
    }

    /// Replace the content of a draft
    pub fn set_body(&mut self, body: DeclarationBody) -> Result<()> {
        self.ensure_draft()?;
        self.body = body;
        Ok(())
    }

    /// Replace the subject of a draft
    pub fn set_subject(&mut self, subject: Subject) -> Result<()> {
        self.ensure_draft()?;
        self.subject = subject;
        Ok(())
    }

    /// Replace the requested window of a draft
    pub fn set_validity(&mut self, validity: Validity) -> Result<()> {
        self.ensure_draft()?;
        self.validity = validity;
        Ok(())
    }

    /// Replace the annotations of a draft
    pub fn set_metadata(&mut self, metadata: DeclarationMetadata) -> Result<()> {
        self.ensure_draft()?;
        self.metadata = metadata;
        Ok(())
    }

    /// Set the retroactive adjustment of a draft
    pub fn set_retroactive_effect(&mut self, effect: RetroactiveEffect) -> Result<()> {
        self.ensure_draft()?;
        self.retroactive_effect = effect;
        Ok(())
    }

    /// Hash of the canonicalised content
    pub fn compute_content_hash(&self) -> Result<ContentHash> {
        canonical::hash_canonical(&WireContent::from(&self.body))
    }

    /// Recompute the content hash and compare it with the stored one
    pub fn verify_content_hash(&self) -> Result<()> {
        let stored = self.content_hash.as_ref().ok_or_else(|| {
            TrustError::signature(format!("{} carries no content hash", self.declaration_uuid))
        })?;
        let computed = self.compute_content_hash()?;
        if !computed.matches(stored) {
            return Err(TrustError::signature(format!(
                "content hash mismatch for {}: stored {stored}, computed {computed}",
                self.declaration_uuid
            )));
        }
        Ok(())
    }

    /// Canonical bytes covered by the issuer signature and countersignatures
    pub fn signing_payload(&self) -> Result<Vec<u8>> {
        let content_hash = self.content_hash.as_ref().ok_or_else(|| {
            TrustError::invalid_state(format!(
                "{} has no content hash; finalize it first",
                self.declaration_uuid
            ))
        })?;
        canonical::canonicalize(&SigningPayload {
            schema_version: self.schema_version,
            declaration_uuid: self.declaration_uuid,
            declaration_type: self.declaration_type(),
            issuer: &self.issuer,
            subject: &self.subject,
            validity: &self.validity,
            issued_at: self.issued_at,
            content_hash_sha256: content_hash,
            original_declaration_uuid: self.original_declaration_uuid,
            retroactive_effect: &self.retroactive_effect,
        })
    }

    /// Whether `fingerprint` already countersigned
    pub fn has_countersignature_from(&self, fingerprint: &Fingerprint) -> bool {
        self.countersignatures
            .iter()
            .any(|c| &c.signer_fingerprint == fingerprint)
    }

    pub(crate) fn ensure_draft(&self) -> Result<()> {
        if self.status != DeclarationStatus::Draft {
            return Err(TrustError::invalid_state(format!(
                "{} is {:?}; content is immutable once finalized",
                self.declaration_uuid, self.status
            )));
        }
        Ok(())
    }

    pub(crate) fn lock_content(
        &mut self,
        content_hash: ContentHash,
        issued_at: TimestampMs,
        window: Window,
    ) {
        self.issued_at = issued_at;
        self.validity = Validity {
            valid_from: Some(window.from),
            valid_until: window.until,
        };
        self.content_hash = Some(content_hash);
        self.status = DeclarationStatus::Finalized;
    }

    pub(crate) fn attach_signature(&mut self, signature: SignatureBytes) {
        self.digital_signature = Some(signature);
        self.status = DeclarationStatus::Signed;
    }

    pub(crate) fn mark_revoked(&mut self, by: DeclarationId) {
        self.is_revoked = true;
        self.revoked_by = Some(by);
    }

    pub(crate) fn clear_local_state(&mut self) {
        self.is_revoked = false;
        self.revoked_by = None;
        self.publication = Publication::default();
    }
}
