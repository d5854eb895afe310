//! Keypair registry
//!
//! Identity records, their usage classification, and storage-status
//! transitions. Secret material never lives here: the registry only tracks
//! where it is, and delegates custody to a [`SecretCustody`] implementation.

use crate::canonical::hex_bytes;
use crate::declaration::{DeclarationSet, DeclarationType, Subject};
use crate::error::{Result, TrustError};
use crate::time::TimestampMs;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;
use zeroize::Zeroizing;

/// Stable keypair identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct KeypairId(pub Uuid);

impl KeypairId {
    /// Fresh random identifier
    pub fn new_random() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for KeypairId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Public key fingerprint: lowercase hex of the first 20 bytes of SHA-256
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Derive the fingerprint of a public key
    pub fn of_public_key(public_key: &[u8]) -> Self {
        let digest = Sha256::digest(public_key);
        Self(hex::encode(&digest[..20]))
    }

    /// The hex string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Fingerprint {
    type Error = TrustError;

    fn try_from(value: String) -> Result<Self> {
        let normalised = value.to_ascii_lowercase();
        if normalised.len() != 40 || !normalised.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(TrustError::validation(format!(
                "fingerprint '{value}' is not 40 hex characters"
            )));
        }
        Ok(Self(normalised))
    }
}

impl From<Fingerprint> for String {
    fn from(value: Fingerprint) -> Self {
        value.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Signature algorithm of a keypair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum KeyAlgorithm {
    /// Ed25519
    Ed25519,
}

/// What a keypair may be used to sign
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum KeyUsage {
    /// Root of the trust graph
    MasterAdminSigning,
    /// Day-to-day administrative signing key
    OperatingAdminSigning,
    /// Admin authorised by an operating key
    AuthorizedAdmin,
    /// Ordinary user identity
    User,
    /// User-bound admin-capable key
    UserOp,
}

impl KeyUsage {
    /// Authority rank used when choosing between competing declarations
    pub fn authority_rank(&self) -> u8 {
        match self {
            KeyUsage::MasterAdminSigning => 4,
            KeyUsage::OperatingAdminSigning => 3,
            KeyUsage::AuthorizedAdmin => 2,
            KeyUsage::User | KeyUsage::UserOp => 1,
        }
    }

    /// Whether this key is a root authority
    pub fn is_root(&self) -> bool {
        matches!(self, KeyUsage::MasterAdminSigning)
    }

    /// Whether this key belongs to the admin tiers
    pub fn is_admin_class(&self) -> bool {
        !matches!(self, KeyUsage::User)
    }

    /// Static compatibility table: may a key of this usage target `subject`?
    pub fn may_target(&self, subject: SubjectClass) -> bool {
        use SubjectClass as S;
        match self {
            KeyUsage::MasterAdminSigning => true,
            KeyUsage::OperatingAdminSigning => matches!(
                subject,
                S::AuthorizedAdmin | S::User | S::UserOp | S::System
            ),
            KeyUsage::AuthorizedAdmin => {
                matches!(subject, S::AuthorizedAdmin | S::User | S::UserOp)
            }
            KeyUsage::User | KeyUsage::UserOp => matches!(subject, S::User | S::UserOp),
        }
    }

    /// Whether a key of this usage may issue declarations of `kind` at all
    pub fn may_issue(&self, kind: DeclarationType) -> bool {
        match kind {
            DeclarationType::AdminControlMessage => matches!(
                self,
                KeyUsage::MasterAdminSigning | KeyUsage::OperatingAdminSigning
            ),
            _ => true,
        }
    }
}

/// Class of a declaration subject for the usage compatibility table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubjectClass {
    /// Master admin keypair
    MasterAdmin,
    /// Operating admin keypair
    OperatingAdmin,
    /// Authorised admin keypair
    AuthorizedAdmin,
    /// User keypair, profile, or user record
    User,
    /// User-op keypair
    UserOp,
    /// The system itself
    System,
}

impl From<KeyUsage> for SubjectClass {
    fn from(usage: KeyUsage) -> Self {
        match usage {
            KeyUsage::MasterAdminSigning => SubjectClass::MasterAdmin,
            KeyUsage::OperatingAdminSigning => SubjectClass::OperatingAdmin,
            KeyUsage::AuthorizedAdmin => SubjectClass::AuthorizedAdmin,
            KeyUsage::User => SubjectClass::User,
            KeyUsage::UserOp => SubjectClass::UserOp,
        }
    }
}

/// Where a keypair's secret material lives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StorageStatus {
    /// Only the public key is known
    PublicOnly,
    /// Secret material is resident on this device
    Full,
    /// Secret material is stored elsewhere and fetched on demand
    FullOffline,
}

/// An identity record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Keypair {
    /// Stable identifier
    pub id: KeypairId,
    /// Signature algorithm
    pub algorithm: KeyAlgorithm,
    /// Usage classification
    pub usage: KeyUsage,
    /// Baseline trust level recorded with the key
    pub trust_level: u32,
    /// Public key fingerprint
    pub fingerprint: Fingerprint,
    /// Canonical display name
    pub canonical_name: String,
    /// Optional local label
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    /// Raw public key bytes
    #[serde(with = "hex_bytes")]
    pub public_key: Vec<u8>,
    /// Secret material location
    pub storage_status: StorageStatus,
    /// Creation time
    pub created_at: TimestampMs,
}

impl Keypair {
    /// Build a public-only record from raw public key bytes
    pub fn from_public_key(
        algorithm: KeyAlgorithm,
        usage: KeyUsage,
        canonical_name: impl Into<String>,
        public_key: Vec<u8>,
        created_at: TimestampMs,
    ) -> Self {
        Self {
            id: KeypairId::new_random(),
            algorithm,
            usage,
            trust_level: 0,
            fingerprint: Fingerprint::of_public_key(&public_key),
            canonical_name: canonical_name.into(),
            label: None,
            public_key,
            storage_status: StorageStatus::PublicOnly,
            created_at,
        }
    }

    /// Class of this key when it appears as a declaration subject
    pub fn subject_class(&self) -> SubjectClass {
        self.usage.into()
    }
}

/// Confirmation that an off-device copy of a secret exists
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OfflineConfirmation {
    /// Where the material was stored (device name, vault path, ...)
    pub locator: String,
    /// Fingerprint the holder reports for the stored key
    pub fingerprint: Fingerprint,
}

/// Holder of secret material, driven by registry storage transitions
pub trait SecretCustody: Send + Sync {
    /// Take custody of `secret` after checking it matches `keypair`
    fn install(&self, keypair: &Keypair, secret: Zeroizing<Vec<u8>>) -> Result<()>;

    /// Drop locally resident material and remember where the copy lives
    fn evict(&self, keypair: &Keypair, locator: &str) -> Result<()>;
}

/// Registry of known keypairs
#[derive(Debug, Clone, Default)]
pub struct KeypairRegistry {
    keypairs: HashMap<KeypairId, Keypair>,
    by_fingerprint: HashMap<Fingerprint, KeypairId>,
}

impl KeypairRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a keypair; fingerprints must be unique
    pub fn insert(&mut self, keypair: Keypair) -> Result<()> {
        if let Some(existing) = self.by_fingerprint.get(&keypair.fingerprint) {
            if *existing != keypair.id {
                return Err(TrustError::conflict(format!(
                    "fingerprint {} already registered as {}",
                    keypair.fingerprint, existing
                )));
            }
        }
        if Fingerprint::of_public_key(&keypair.public_key) != keypair.fingerprint {
            return Err(TrustError::validation(format!(
                "fingerprint {} does not match public key",
                keypair.fingerprint
            )));
        }
        self.by_fingerprint
            .insert(keypair.fingerprint.clone(), keypair.id);
        self.keypairs.insert(keypair.id, keypair);
        Ok(())
    }

    /// Import a public key as a new public-only identity
    pub fn import(
        &mut self,
        algorithm: KeyAlgorithm,
        usage: KeyUsage,
        canonical_name: impl Into<String>,
        public_key: Vec<u8>,
        now_ms: TimestampMs,
    ) -> Result<KeypairId> {
        let keypair = Keypair::from_public_key(algorithm, usage, canonical_name, public_key, now_ms);
        let id = keypair.id;
        self.insert(keypair)?;
        Ok(id)
    }

    /// Lookup by id
    pub fn get(&self, id: &KeypairId) -> Option<&Keypair> {
        self.keypairs.get(id)
    }

    /// Lookup by fingerprint
    pub fn by_fingerprint(&self, fingerprint: &Fingerprint) -> Option<&Keypair> {
        self.by_fingerprint
            .get(fingerprint)
            .and_then(|id| self.keypairs.get(id))
    }

    /// Lookup by id, as an error when absent
    pub fn require(&self, id: &KeypairId) -> Result<&Keypair> {
        self.get(id)
            .ok_or_else(|| TrustError::not_found(format!("keypair {id}")))
    }

    /// All registered keypairs
    pub fn iter(&self) -> impl Iterator<Item = &Keypair> {
        self.keypairs.values()
    }

    /// Number of registered keypairs
    pub fn len(&self) -> usize {
        self.keypairs.len()
    }

    /// Whether the registry is empty
    pub fn is_empty(&self) -> bool {
        self.keypairs.is_empty()
    }

    /// Change the canonical name
    pub fn rename(&mut self, id: &KeypairId, canonical_name: impl Into<String>) -> Result<()> {
        let name = canonical_name.into();
        if name.trim().is_empty() {
            return Err(TrustError::validation("canonical name must not be empty"));
        }
        self.get_mut(id)?.canonical_name = name;
        Ok(())
    }

    /// Change or clear the local label
    pub fn set_label(&mut self, id: &KeypairId, label: Option<String>) -> Result<()> {
        self.get_mut(id)?.label = label;
        Ok(())
    }

    /// `public-only -> full`: requires the secret material itself
    pub fn attach_secret(
        &mut self,
        id: &KeypairId,
        custody: &dyn SecretCustody,
        secret: Zeroizing<Vec<u8>>,
    ) -> Result<()> {
        let keypair = self.require(id)?;
        if keypair.storage_status != StorageStatus::PublicOnly {
            return Err(TrustError::invalid_state(format!(
                "keypair {id} is {:?}, expected public-only",
                keypair.storage_status
            )));
        }
        custody.install(keypair, secret)?;
        self.get_mut(id)?.storage_status = StorageStatus::Full;
        tracing::info!(keypair = %id, "secret material attached");
        Ok(())
    }

    /// `full -> full-offline`: requires confirmation of the off-device copy
    pub fn move_offline(
        &mut self,
        id: &KeypairId,
        custody: &dyn SecretCustody,
        confirmation: &OfflineConfirmation,
    ) -> Result<()> {
        let keypair = self.require(id)?;
        if keypair.storage_status != StorageStatus::Full {
            return Err(TrustError::invalid_state(format!(
                "keypair {id} is {:?}, expected full",
                keypair.storage_status
            )));
        }
        if confirmation.locator.trim().is_empty() {
            return Err(TrustError::validation("offline copy locator is empty"));
        }
        if confirmation.fingerprint != keypair.fingerprint {
            return Err(TrustError::validation(format!(
                "offline copy fingerprint {} does not match {}",
                confirmation.fingerprint, keypair.fingerprint
            )));
        }
        custody.evict(keypair, &confirmation.locator)?;
        self.get_mut(id)?.storage_status = StorageStatus::FullOffline;
        tracing::info!(keypair = %id, locator = %confirmation.locator, "secret material moved off-device");
        Ok(())
    }

    /// Remove a keypair that no live declaration references
    pub fn remove(&mut self, id: &KeypairId, declarations: &DeclarationSet) -> Result<Keypair> {
        let fingerprint = self.require(id)?.fingerprint.clone();
        let referencing = declarations.iter().find(|d| {
            !d.is_revoked
                && (d.issuer().fingerprint == fingerprint
                    || matches!(d.subject(), Subject::Keypair { fingerprint: f, .. } if *f == fingerprint))
        });
        if let Some(decl) = referencing {
            return Err(TrustError::invalid_state(format!(
                "keypair {id} is referenced by live declaration {}",
                decl.declaration_uuid
            )));
        }
        self.by_fingerprint.remove(&fingerprint);
        self.keypairs
            .remove(id)
            .ok_or_else(|| TrustError::not_found(format!("keypair {id}")))
    }

    /// Subject class of a declaration subject, resolving keypairs through the registry
    ///
    /// Unregistered keypairs are treated as user-class.
    pub fn subject_class(&self, subject: &Subject) -> SubjectClass {
        match subject {
            Subject::Keypair { fingerprint, .. } => self
                .by_fingerprint(fingerprint)
                .map(Keypair::subject_class)
                .unwrap_or(SubjectClass::User),
            Subject::Profile { .. } | Subject::User { .. } => SubjectClass::User,
            Subject::System => SubjectClass::System,
            Subject::Declaration { .. } => SubjectClass::User,
        }
    }

    /// Whether `issuer` may issue a `kind` declaration at a subject of `class`
    pub fn usage_permits(&self, issuer: &Keypair, kind: DeclarationType, class: SubjectClass) -> bool {
        issuer.usage.may_issue(kind) && issuer.usage.may_target(class)
    }

    fn get_mut(&mut self, id: &KeypairId) -> Result<&mut Keypair> {
        self.keypairs
            .get_mut(id)
            .ok_or_else(|| TrustError::not_found(format!("keypair {id}")))
    }
}
