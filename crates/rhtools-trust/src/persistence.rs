//! Record persistence
//!
//! The engine only needs "load everything of a kind" and "save one record".
//! [`JsonDirPersistence`] keeps one JSON file per record under
//! `<root>/<kind>/<id>.json`, written through a temp file and renamed into
//! place. Loaded declarations are re-verified before they are trusted: a
//! record whose hash or signature no longer checks out is dropped.

use crate::assignment::{AssignmentSet, TrustAssignment};
use crate::countersign;
use crate::declaration::{DeclarationSet, DeclarationStatus, TrustDeclaration};
use crate::error::{Result, TrustError};
use crate::keypair::{Keypair, KeypairRegistry};
use crate::lifecycle;
use crate::signature::SignatureVerifier;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

/// Kinds of stored record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RecordKind {
    /// Keypair registry entries
    Keypair,
    /// Trust declarations, drafts included
    Declaration,
    /// Manual trust assignments
    Assignment,
}

impl RecordKind {
    /// Directory name of this kind
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordKind::Keypair => "keypairs",
            RecordKind::Declaration => "declarations",
            RecordKind::Assignment => "assignments",
        }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A record of any kind
#[derive(Debug, Clone, PartialEq)]
pub enum StoredRecord {
    /// A keypair
    Keypair(Keypair),
    /// A declaration
    Declaration(TrustDeclaration),
    /// An assignment
    Assignment(TrustAssignment),
}

impl StoredRecord {
    /// Kind of this record
    pub fn kind(&self) -> RecordKind {
        match self {
            StoredRecord::Keypair(_) => RecordKind::Keypair,
            StoredRecord::Declaration(_) => RecordKind::Declaration,
            StoredRecord::Assignment(_) => RecordKind::Assignment,
        }
    }

    /// Stable id within its kind
    pub fn id(&self) -> Result<String> {
        Ok(match self {
            StoredRecord::Keypair(k) => k.id.to_string(),
            StoredRecord::Declaration(d) => d.uuid().to_string(),
            StoredRecord::Assignment(a) => a.key()?.record_id().to_string(),
        })
    }

    fn to_json(&self) -> Result<Vec<u8>> {
        let encoded = match self {
            StoredRecord::Keypair(k) => serde_json::to_vec_pretty(k),
            StoredRecord::Declaration(d) => serde_json::to_vec_pretty(d),
            StoredRecord::Assignment(a) => serde_json::to_vec_pretty(a),
        };
        encoded.map_err(|e| TrustError::serialization(e.to_string()))
    }

    fn from_json(kind: RecordKind, bytes: &[u8]) -> Result<Self> {
        let decoded = match kind {
            RecordKind::Keypair => serde_json::from_slice(bytes).map(StoredRecord::Keypair),
            RecordKind::Declaration => serde_json::from_slice(bytes).map(StoredRecord::Declaration),
            RecordKind::Assignment => serde_json::from_slice(bytes).map(StoredRecord::Assignment),
        };
        decoded.map_err(|e| TrustError::serialization(e.to_string()))
    }
}

/// External record store
#[async_trait]
pub trait Persistence: Send + Sync {
    /// Every stored record of `kind`
    async fn load_all(&self, kind: RecordKind) -> Result<Vec<StoredRecord>>;

    /// Insert or replace one record
    async fn save(&self, record: &StoredRecord) -> Result<()>;

    /// Delete one record; deleting a missing record is not an error
    async fn delete(&self, kind: RecordKind, id: &str) -> Result<()>;
}

/// In-memory store
#[derive(Debug, Default)]
pub struct MemoryPersistence {
    records: RwLock<BTreeMap<(RecordKind, String), StoredRecord>>,
}

impl MemoryPersistence {
    /// Empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records of `kind`
    pub fn count(&self, kind: RecordKind) -> usize {
        self.records.read().keys().filter(|(k, _)| *k == kind).count()
    }
}

#[async_trait]
impl Persistence for MemoryPersistence {
    async fn load_all(&self, kind: RecordKind) -> Result<Vec<StoredRecord>> {
        Ok(self
            .records
            .read()
            .iter()
            .filter(|((k, _), _)| *k == kind)
            .map(|(_, record)| record.clone())
            .collect())
    }

    async fn save(&self, record: &StoredRecord) -> Result<()> {
        let key = (record.kind(), record.id()?);
        self.records.write().insert(key, record.clone());
        Ok(())
    }

    async fn delete(&self, kind: RecordKind, id: &str) -> Result<()> {
        self.records.write().remove(&(kind, id.to_string()));
        Ok(())
    }
}

/// One JSON file per record
#[derive(Debug, Clone)]
pub struct JsonDirPersistence {
    root: PathBuf,
}

impl JsonDirPersistence {
    /// Store rooted at `root`; directories are created on first save
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn dir(&self, kind: RecordKind) -> PathBuf {
        self.root.join(kind.as_str())
    }

    fn path(&self, kind: RecordKind, id: &str) -> PathBuf {
        self.dir(kind).join(format!("{id}.json"))
    }
}

fn storage_err(context: impl fmt::Display, e: std::io::Error) -> TrustError {
    TrustError::storage(format!("{context}: {e}"))
}

#[async_trait]
impl Persistence for JsonDirPersistence {
    async fn load_all(&self, kind: RecordKind) -> Result<Vec<StoredRecord>> {
        let dir = self.dir(kind);
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(storage_err(dir.display(), e)),
        };

        let mut records = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| storage_err(dir.display(), e))?
        {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let bytes = fs::read(&path)
                .await
                .map_err(|e| storage_err(path.display(), e))?;
            match StoredRecord::from_json(kind, &bytes) {
                Ok(record) => records.push(record),
                Err(e) => warn!(path = %path.display(), error = %e, "skipping unreadable record"),
            }
        }
        debug!(kind = %kind, count = records.len(), "records loaded");
        Ok(records)
    }

    async fn save(&self, record: &StoredRecord) -> Result<()> {
        let kind = record.kind();
        let dir = self.dir(kind);
        fs::create_dir_all(&dir)
            .await
            .map_err(|e| storage_err(dir.display(), e))?;

        let path = self.path(kind, &record.id()?);
        let tmp = path.with_extension("json.tmp");
        let bytes = record.to_json()?;
        let mut file = fs::File::create(&tmp)
            .await
            .map_err(|e| storage_err(tmp.display(), e))?;
        file.write_all(&bytes)
            .await
            .map_err(|e| storage_err(tmp.display(), e))?;
        file.sync_all()
            .await
            .map_err(|e| storage_err(tmp.display(), e))?;
        drop(file);
        fs::rename(&tmp, &path)
            .await
            .map_err(|e| storage_err(path.display(), e))
    }

    async fn delete(&self, kind: RecordKind, id: &str) -> Result<()> {
        let path = self.path(kind, id);
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(storage_err(path.display(), e)),
        }
    }
}

/// Stores rebuilt from persistence
#[derive(Debug, Default)]
pub struct LoadedState {
    /// Keypairs
    pub registry: KeypairRegistry,
    /// Declarations that survived re-verification
    pub declarations: DeclarationSet,
    /// Assignments
    pub assignments: AssignmentSet,
    /// Declarations dropped, with the reason
    pub dropped: Vec<(String, String)>,
}

fn reverify(
    declaration: &mut TrustDeclaration,
    registry: &KeypairRegistry,
    verifier: &dyn SignatureVerifier,
) -> Result<()> {
    if declaration.status() == DeclarationStatus::Draft {
        return Ok(());
    }
    declaration.verify_content_hash()?;
    if !declaration.status().is_signed() {
        return Ok(());
    }
    let issuer = registry
        .by_fingerprint(&declaration.issuer().fingerprint)
        .ok_or_else(|| {
            TrustError::not_found(format!("issuer {}", declaration.issuer().fingerprint))
        })?;
    let signature = declaration
        .digital_signature()
        .ok_or_else(|| TrustError::signature("signed declaration without signature"))?;
    let payload = declaration.signing_payload()?;
    if !verifier.verify(issuer.algorithm, &issuer.public_key, &payload, signature) {
        return Err(TrustError::signature("issuer signature does not verify"));
    }
    countersign::retain_verified(declaration, registry, verifier)?;
    Ok(())
}

/// Load and re-verify every record
///
/// Revocation flags are recomputed from the loaded revocations rather than
/// trusted from disk.
pub async fn load_state(
    persistence: &dyn Persistence,
    verifier: &dyn SignatureVerifier,
) -> Result<LoadedState> {
    let mut state = LoadedState::default();

    for record in persistence.load_all(RecordKind::Keypair).await? {
        if let StoredRecord::Keypair(keypair) = record {
            let id = keypair.id;
            if let Err(e) = state.registry.insert(keypair) {
                warn!(keypair = %id, error = %e, "dropping stored keypair");
            }
        }
    }

    for record in persistence.load_all(RecordKind::Declaration).await? {
        let StoredRecord::Declaration(mut declaration) = record else {
            continue;
        };
        declaration.is_revoked = false;
        declaration.revoked_by = None;
        match reverify(&mut declaration, &state.registry, verifier) {
            Ok(()) => {
                state.declarations.insert(declaration);
            }
            Err(e) => {
                warn!(declaration_uuid = %declaration.uuid(), reason = %e, "dropping stored declaration");
                state
                    .dropped
                    .push((declaration.uuid().to_string(), e.to_string()));
            }
        }
    }
    lifecycle::apply_revocations(&mut state.declarations);

    for record in persistence.load_all(RecordKind::Assignment).await? {
        if let StoredRecord::Assignment(assignment) = record {
            if let Err(e) = state.assignments.upsert(assignment) {
                warn!(error = %e, "dropping stored assignment");
            }
        }
    }
    Ok(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keypair::{KeyAlgorithm, KeyUsage};

    fn keypair(name: &str) -> Keypair {
        Keypair::from_public_key(
            KeyAlgorithm::Ed25519,
            KeyUsage::User,
            name,
            name.as_bytes().to_vec(),
            0,
        )
    }

    #[tokio::test]
    async fn test_memory_round_trip() {
        let store = MemoryPersistence::new();
        let alice = keypair("alice");
        store.save(&StoredRecord::Keypair(alice.clone())).await.unwrap();
        store.save(&StoredRecord::Keypair(alice.clone())).await.unwrap();
        assert_eq!(store.count(RecordKind::Keypair), 1);
        assert!(store.load_all(RecordKind::Declaration).await.unwrap().is_empty());

        store
            .delete(RecordKind::Keypair, &alice.id.to_string())
            .await
            .unwrap();
        assert_eq!(store.count(RecordKind::Keypair), 0);
    }

    #[tokio::test]
    async fn test_json_dir_layout() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonDirPersistence::new(dir.path());
        assert!(store.load_all(RecordKind::Keypair).await.unwrap().is_empty());

        let alice = keypair("alice");
        let record = StoredRecord::Keypair(alice.clone());
        store.save(&record).await.unwrap();
        let path = dir
            .path()
            .join("keypairs")
            .join(format!("{}.json", alice.id));
        assert!(path.exists());

        std::fs::write(dir.path().join("keypairs").join("junk.json"), b"{not json").unwrap();
        let loaded = store.load_all(RecordKind::Keypair).await.unwrap();
        assert_eq!(loaded, vec![record]);

        store
            .delete(RecordKind::Keypair, &alice.id.to_string())
            .await
            .unwrap();
        store
            .delete(RecordKind::Keypair, &alice.id.to_string())
            .await
            .unwrap();
        assert!(!path.exists());
    }
}
