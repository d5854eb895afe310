//! The trust engine facade
//!
//! [`TrustEngine`] owns the three single-writer stores (keypairs,
//! declarations, assignments) and sequences every state change through
//! them: validate against the committed snapshot, persist the touched
//! records, commit, then broadcast a [`TrustEvent`]. A failure at any step
//! drops the working copy, so nothing is partially committed.
//!
//! Signing never holds a store lock. The payload is prepared from a
//! snapshot, signed under the configured deadline, and committed only if
//! the declaration is still exactly what was signed and the issuer still
//! holds the authority to sign it.
//!
//! Reads go through immutable snapshots and may run concurrently with
//! everything else.

use crate::assignment::{AssignmentKey, AssignmentSet, TrustAssignment};
use crate::authority;
use crate::cache::{CacheStats, ResolutionCache};
use crate::canonical::ContentHash;
use crate::config::TrustEngineConfig;
use crate::countersign::{self, CountersignOutcome};
use crate::declaration::{
    DeclarationBody, DeclarationDocument, DeclarationId, DeclarationSet, RetroactiveEffect,
    Subject, TrustDeclaration, Validity,
};
use crate::error::{Result, TrustError};
use crate::events::{self, TrustEvent};
use crate::ingest::{IngestReport, Ingestor, ParkedDocuments};
use crate::keypair::{KeyAlgorithm, Keypair, KeypairId, KeypairRegistry};
use crate::lifecycle;
use crate::persistence::{self, Persistence, RecordKind, StoredRecord};
use crate::resolver::{self, ActiveAction, DisplayTrust, LocalOverrides, TrustResult};
use crate::scope::ScopeRef;
use crate::signature::{sign_with_deadline, CancelToken, SignatureBytes, SignatureCapability, SignatureVerifier};
use crate::store::{SnapshotCell, TrustSnapshot};
use crate::time::{Clock, TimestampMs};
use crate::transport::{PublishAck, Transport};
use crate::validity::ResolvedWindow;
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const EVENT_BUFFER: usize = 256;
const INGEST_BATCH: usize = 64;

/// Verifies through the engine's signature capability
struct CapabilityVerifier<'a>(&'a dyn SignatureCapability);

impl SignatureVerifier for CapabilityVerifier<'_> {
    fn verify(
        &self,
        algorithm: KeyAlgorithm,
        public_key: &[u8],
        payload: &[u8],
        signature: &SignatureBytes,
    ) -> bool {
        self.0.verify(algorithm, public_key, payload, signature)
    }
}

/// Trust declaration engine
pub struct TrustEngine {
    config: TrustEngineConfig,
    clock: Arc<dyn Clock>,
    signer: Arc<dyn SignatureCapability>,
    persistence: Arc<dyn Persistence>,
    registry: SnapshotCell<KeypairRegistry>,
    declarations: SnapshotCell<DeclarationSet>,
    assignments: SnapshotCell<AssignmentSet>,
    cache: Option<ResolutionCache>,
    parked: Mutex<ParkedDocuments>,
    events: broadcast::Sender<TrustEvent>,
    transport: RwLock<Option<Arc<dyn Transport>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl std::fmt::Debug for TrustEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrustEngine")
            .field("config", &self.config)
            .field("clock", &self.clock)
            .field("workers", &self.workers.lock().len())
            .finish_non_exhaustive()
    }
}

impl TrustEngine {
    /// Engine with empty stores
    pub fn new(
        config: TrustEngineConfig,
        clock: Arc<dyn Clock>,
        signer: Arc<dyn SignatureCapability>,
        persistence: Arc<dyn Persistence>,
    ) -> Result<Self> {
        config.validate()?;
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        let cache = config
            .cache
            .enabled
            .then(|| ResolutionCache::new(config.cache.max_entries));
        let parked = Mutex::new(ParkedDocuments::new(config.ingestion.max_parked));
        Ok(Self {
            config,
            clock,
            signer,
            persistence,
            registry: SnapshotCell::default(),
            declarations: SnapshotCell::default(),
            assignments: SnapshotCell::default(),
            cache,
            parked,
            events,
            transport: RwLock::new(None),
            workers: Mutex::new(Vec::new()),
        })
    }

    /// Engine with stores loaded from `persistence`
    ///
    /// Records that fail re-verification are dropped with a warning.
    pub async fn open(
        config: TrustEngineConfig,
        clock: Arc<dyn Clock>,
        signer: Arc<dyn SignatureCapability>,
        persistence: Arc<dyn Persistence>,
    ) -> Result<Self> {
        let engine = Self::new(config, clock, signer, persistence)?;
        let state = {
            let verifier = CapabilityVerifier(engine.signer.as_ref());
            persistence::load_state(engine.persistence.as_ref(), &verifier).await?
        };
        info!(
            keypairs = state.registry.len(),
            declarations = state.declarations.len(),
            assignments = state.assignments.len(),
            dropped = state.dropped.len(),
            "trust stores loaded"
        );
        engine.registry.replace(state.registry).await;
        engine.declarations.replace(state.declarations).await;
        engine.assignments.replace(state.assignments).await;
        Ok(engine)
    }

    /// Active configuration
    pub fn config(&self) -> &TrustEngineConfig {
        &self.config
    }

    /// Everything resolution reads, frozen now
    pub fn snapshot(&self) -> TrustSnapshot {
        TrustSnapshot {
            registry: self.registry.snapshot(),
            declarations: self.declarations.snapshot(),
            assignments: self.assignments.snapshot(),
            taken_at_ms: self.clock.now_ms(),
        }
    }

    /// Receive every committed change from now on
    pub fn subscribe(&self) -> broadcast::Receiver<TrustEvent> {
        self.events.subscribe()
    }

    /// A declaration by uuid
    pub fn declaration(&self, id: &DeclarationId) -> Option<TrustDeclaration> {
        self.declarations.snapshot().get(id).cloned()
    }

    /// A keypair by id
    pub fn keypair(&self, id: &KeypairId) -> Option<Keypair> {
        self.registry.snapshot().get(id).cloned()
    }

    fn emit(&self, events: Vec<TrustEvent>) {
        for event in events {
            if let Some(cache) = &self.cache {
                cache.apply_event(&event);
            }
            // no subscribers is fine
            let _ = self.events.send(event);
        }
    }

    async fn persist_declarations(
        &self,
        declarations: &DeclarationSet,
        ids: impl IntoIterator<Item = DeclarationId>,
    ) -> Result<()> {
        for id in ids {
            let declaration = declarations.require(&id)?;
            self.persistence
                .save(&StoredRecord::Declaration(declaration.clone()))
                .await?;
        }
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Keypairs
    // ---------------------------------------------------------------------

    /// Add a keypair to the registry
    pub async fn register_keypair(&self, keypair: Keypair) -> Result<()> {
        let mut registry = self.registry.write().await;
        registry.insert(keypair.clone())?;
        self.persistence.save(&StoredRecord::Keypair(keypair.clone())).await?;
        registry.commit();
        info!(keypair = %keypair.id, usage = ?keypair.usage, "keypair registered");
        self.emit(vec![TrustEvent::KeypairsChanged]);
        Ok(())
    }

    /// Apply `edit` to one registry entry (rename, label, storage transitions)
    pub async fn edit_keypair<R>(
        &self,
        id: &KeypairId,
        edit: impl FnOnce(&mut KeypairRegistry) -> Result<R>,
    ) -> Result<R> {
        let mut registry = self.registry.write().await;
        let outcome = edit(&mut registry)?;
        let keypair = registry.require(id)?.clone();
        self.persistence.save(&StoredRecord::Keypair(keypair)).await?;
        registry.commit();
        self.emit(vec![TrustEvent::KeypairsChanged]);
        Ok(outcome)
    }

    /// Remove a keypair no live declaration references
    pub async fn remove_keypair(&self, id: &KeypairId) -> Result<Keypair> {
        let mut registry = self.registry.write().await;
        let removed = registry.remove(id, &self.declarations.snapshot())?;
        self.persistence
            .delete(RecordKind::Keypair, &id.to_string())
            .await?;
        registry.commit();
        info!(keypair = %id, "keypair removed");
        self.emit(vec![TrustEvent::KeypairsChanged]);
        Ok(removed)
    }

    // ---------------------------------------------------------------------
    // Authoring
    // ---------------------------------------------------------------------

    async fn store_draft(&self, draft: TrustDeclaration) -> Result<DeclarationId> {
        let id = draft.uuid();
        let mut declarations = self.declarations.write().await;
        if declarations.get(&id).is_some() {
            return Err(TrustError::conflict(format!("declaration {id} already exists")));
        }
        self.persistence
            .save(&StoredRecord::Declaration(draft.clone()))
            .await?;
        declarations.insert(draft);
        declarations.commit();
        debug!(declaration = %id, "draft created");
        Ok(id)
    }

    /// New draft issued by `issuer`
    pub async fn create_draft(
        &self,
        issuer: &KeypairId,
        subject: Subject,
        body: DeclarationBody,
        validity: Validity,
    ) -> Result<DeclarationId> {
        let issuer = self.registry.snapshot().require(issuer)?.clone();
        let draft = lifecycle::create_draft(&issuer, subject, body, validity, self.clock.now_ms());
        self.store_draft(draft).await
    }

    /// Draft revoking `target`
    pub async fn draft_revocation(
        &self,
        revoker: &KeypairId,
        target: &DeclarationId,
        reason: Option<String>,
    ) -> Result<DeclarationId> {
        let snapshot = self.snapshot();
        let revoker = snapshot.registry.require(revoker)?;
        let target = snapshot.declarations.require(target)?;
        let draft = lifecycle::draft_revocation(revoker, target, reason, snapshot.taken_at_ms)?;
        self.store_draft(draft).await
    }

    /// Draft amending `original`
    pub async fn draft_update(
        &self,
        issuer: &KeypairId,
        original: &DeclarationId,
        body: DeclarationBody,
        validity: Validity,
        retroactive_effect: RetroactiveEffect,
    ) -> Result<DeclarationId> {
        let snapshot = self.snapshot();
        let issuer = snapshot.registry.require(issuer)?;
        let original = snapshot.declarations.require(original)?;
        let draft = lifecycle::draft_update(
            issuer,
            original,
            body,
            validity,
            retroactive_effect,
            snapshot.taken_at_ms,
        )?;
        self.store_draft(draft).await
    }

    /// Edit a draft in place
    pub async fn edit_draft(
        &self,
        id: &DeclarationId,
        edit: impl FnOnce(&mut TrustDeclaration) -> Result<()>,
    ) -> Result<()> {
        let mut declarations = self.declarations.write().await;
        let draft = declarations.require_mut(id)?;
        draft.ensure_draft()?;
        edit(draft)?;
        let draft = draft.clone();
        self.persistence.save(&StoredRecord::Declaration(draft)).await?;
        declarations.commit();
        Ok(())
    }

    /// Throw a draft away
    pub async fn discard_draft(&self, id: &DeclarationId) -> Result<()> {
        let mut declarations = self.declarations.write().await;
        declarations.remove_draft(id)?;
        self.persistence
            .delete(RecordKind::Declaration, &id.to_string())
            .await?;
        declarations.commit();
        debug!(declaration = %id, "draft discarded");
        Ok(())
    }

    /// Lock a draft's content
    #[tracing::instrument(skip_all, fields(declaration = %id))]
    pub async fn finalize(&self, id: &DeclarationId) -> Result<ContentHash> {
        let mut declarations = self.declarations.write().await;
        let snapshot = self.snapshot();
        let draft = declarations.require_mut(id)?;
        let hash = lifecycle::finalize(
            draft,
            &snapshot,
            snapshot.taken_at_ms,
            self.config.revocation.countersignature_policy,
        )?;
        self.persist_declarations(&declarations, [*id]).await?;
        declarations.commit();
        Ok(hash)
    }

    /// Whether the issuer of `id` may sign it right now
    ///
    /// Evaluates against the current snapshot without changing anything.
    pub fn can_issue(&self, id: &DeclarationId) -> Result<ResolvedWindow> {
        let snapshot = self.snapshot();
        let declaration = snapshot.declarations.require(id)?;
        let issuer = snapshot
            .registry
            .by_fingerprint(&declaration.issuer().fingerprint)
            .ok_or_else(|| {
                TrustError::not_found(format!("issuer {}", declaration.issuer().fingerprint))
            })?;
        authority::can_issue(issuer, declaration, &snapshot, snapshot.taken_at_ms)
    }

    /// Sign a finalized declaration with its issuer's key
    ///
    /// On any failure the declaration stays finalized. `cancel` abandons a
    /// pending key unlock.
    #[tracing::instrument(skip_all, fields(declaration = %id))]
    pub async fn sign(&self, id: &DeclarationId, cancel: &CancelToken) -> Result<()> {
        let plan = {
            let snapshot = self.snapshot();
            let declaration = snapshot.declarations.require(id)?;
            lifecycle::prepare_sign(declaration, &snapshot, snapshot.taken_at_ms)?
        };
        let signature = sign_with_deadline(
            self.signer.as_ref(),
            &plan.issuer,
            &plan.payload,
            self.config.signing_timeout(),
            cancel,
        )
        .await?;
        if !self.signer.verify(
            plan.issuer.algorithm,
            &plan.issuer.public_key,
            &plan.payload,
            &signature,
        ) {
            return Err(TrustError::signature(format!(
                "signature produced for {id} does not verify"
            )));
        }

        let mut declarations = self.declarations.write().await;
        let fresh = self.snapshot();
        let current = declarations.require(id)?;
        lifecycle::ensure_unchanged(current, &plan)?;
        lifecycle::prepare_sign(current, &fresh, fresh.taken_at_ms)?;
        lifecycle::commit_signature(&mut declarations, &plan, signature)?;
        let revoked = lifecycle::apply_revocations(&mut declarations);

        self.persist_declarations(&declarations, std::iter::once(*id).chain(revoked.iter().copied()))
            .await?;
        let events = events::declaration_events(&declarations, *id, true, &revoked);
        let released = self.parked.lock().release_for(declarations.require(id)?);
        declarations.commit();
        info!(declaration = %id, issuer = %plan.issuer.fingerprint, "declaration signed");
        self.emit(events);
        if !released.is_empty() {
            self.ingest(released).await?;
        }
        Ok(())
    }

    /// Countersign a signed declaration with `signer`'s key
    #[tracing::instrument(skip_all, fields(declaration = %id, signer = %signer))]
    pub async fn countersign(
        &self,
        id: &DeclarationId,
        signer: &KeypairId,
        cancel: &CancelToken,
    ) -> Result<CountersignOutcome> {
        let (keypair, payload) = {
            let snapshot = self.snapshot();
            let declaration = snapshot.declarations.require(id)?;
            let keypair = snapshot.registry.require(signer)?.clone();
            if !declaration.status().is_signed() {
                return Err(TrustError::invalid_state(format!(
                    "{id} is {:?}; only signed declarations take countersignatures",
                    declaration.status()
                )));
            }
            if declaration.has_countersignature_from(&keypair.fingerprint) {
                return Ok(CountersignOutcome::Duplicate);
            }
            if !countersign::is_permitted_signer(declaration, &keypair.fingerprint) {
                return Err(TrustError::validation(format!(
                    "{} is not a permitted countersigner of {id}",
                    keypair.fingerprint
                )));
            }
            (keypair, declaration.signing_payload()?)
        };
        let signature = sign_with_deadline(
            self.signer.as_ref(),
            &keypair,
            &payload,
            self.config.signing_timeout(),
            cancel,
        )
        .await?;

        let mut declarations = self.declarations.write().await;
        let verifier = CapabilityVerifier(self.signer.as_ref());
        let outcome = countersign::record_signature(
            declarations.require_mut(id)?,
            &keypair,
            signature,
            self.clock.now_ms(),
            &verifier,
        )?;
        let CountersignOutcome::Added { current } = outcome else {
            return Ok(outcome);
        };
        let revoked = lifecycle::apply_revocations(&mut declarations);
        self.persist_declarations(&declarations, std::iter::once(*id).chain(revoked.iter().copied()))
            .await?;
        let subject = declarations.require(id)?.subject().key();
        let mut changes = vec![TrustEvent::CountersignatureAdded {
            declaration_uuid: *id,
            subject,
            current,
        }];
        changes.extend(events::revocation_events(&declarations, &revoked));
        declarations.commit();
        info!(declaration = %id, signer = %keypair.fingerprint, current, "countersignature recorded");
        self.emit(changes);
        Ok(outcome)
    }

    // ---------------------------------------------------------------------
    // Publication
    // ---------------------------------------------------------------------

    fn connected_transport(&self) -> Result<Arc<dyn Transport>> {
        self.transport
            .read()
            .clone()
            .ok_or_else(|| TrustError::transport("no transport connected"))
    }

    /// Hand a signed declaration to the connected transport
    ///
    /// Trust never depends on the outcome; a failed publish leaves the
    /// declaration signed with its publication marked failed.
    #[tracing::instrument(skip_all, fields(declaration = %id))]
    pub async fn publish(&self, id: &DeclarationId) -> Result<PublishAck> {
        let transport = self.connected_transport()?;
        let document = {
            let mut declarations = self.declarations.write().await;
            let declaration = declarations.require_mut(id)?;
            lifecycle::mark_publish_pending(declaration)?;
            let document = DeclarationDocument::from(declaration.clone());
            self.persist_declarations(&declarations, [*id]).await?;
            declarations.commit();
            document
        };

        let outcome = transport.publish(&document).await;

        let mut declarations = self.declarations.write().await;
        lifecycle::record_publish_outcome(declarations.require_mut(id)?, outcome.as_ref());
        self.persist_declarations(&declarations, [*id]).await?;
        declarations.commit();
        if let Ok(ack) = &outcome {
            info!(declaration = %id, event_id = %ack.event_id, "declaration published");
            self.emit(vec![TrustEvent::DeclarationPublished {
                declaration_uuid: *id,
                event_id: ack.event_id.clone(),
            }]);
        }
        outcome
    }

    // ---------------------------------------------------------------------
    // Ingestion
    // ---------------------------------------------------------------------

    /// Validate and merge discovered documents
    #[tracing::instrument(skip_all, fields(documents = documents.len()))]
    pub async fn ingest(&self, documents: Vec<TrustDeclaration>) -> Result<IngestReport> {
        let mut declarations = self.declarations.write().await;
        let base = self.snapshot();
        let mut parked = self.parked.lock().clone();
        let report = {
            let verifier = CapabilityVerifier(self.signer.as_ref());
            Ingestor::new(
                &base,
                &verifier,
                &self.config.ingestion,
                self.config.revocation.countersignature_policy,
                base.taken_at_ms,
            )
            .ingest_batch(&mut declarations, &mut parked, documents)
        };

        let touched: Vec<DeclarationId> = report
            .accepted
            .iter()
            .chain(&report.merged)
            .chain(&report.revoked)
            .copied()
            .collect();
        self.persist_declarations(&declarations, touched).await?;

        let mut changes = Vec::new();
        for id in &report.accepted {
            changes.extend(events::declaration_events(&declarations, *id, false, &[]));
        }
        for id in &report.merged {
            let declaration = declarations.require(id)?;
            changes.push(TrustEvent::CountersignatureAdded {
                declaration_uuid: *id,
                subject: declaration.subject().key(),
                current: countersign::current_count(declaration),
            });
        }
        changes.extend(events::revocation_events(&declarations, &report.revoked));
        declarations.commit();
        *self.parked.lock() = parked;

        if !report.accepted.is_empty() || !report.merged.is_empty() {
            info!(
                accepted = report.accepted.len(),
                merged = report.merged_countersignatures,
                rejected = report.rejected.len(),
                parked = report.parked.len(),
                "discovered declarations ingested"
            );
        }
        self.emit(changes);
        Ok(report)
    }

    /// Subscribe to `transport` and ingest everything it discovers
    ///
    /// The worker holds only a weak reference and stops once the engine is
    /// dropped or the transport closes the channel.
    pub async fn connect_transport(self: &Arc<Self>, transport: Arc<dyn Transport>) -> Result<()> {
        let (sink, mut discovered) = mpsc::channel(self.config.ingestion.channel_capacity);
        transport.on_discovered(sink).await?;
        *self.transport.write() = Some(transport);

        let engine = Arc::downgrade(self);
        let worker = tokio::spawn(async move {
            while let Some(first) = discovered.recv().await {
                let mut batch = vec![first];
                while batch.len() < INGEST_BATCH {
                    match discovered.try_recv() {
                        Ok(document) => batch.push(document),
                        Err(_) => break,
                    }
                }
                let Some(engine) = engine.upgrade() else {
                    break;
                };
                if let Err(e) = engine.ingest(batch).await {
                    warn!(error = %e, "ingestion batch failed");
                }
            }
            debug!("discovery channel closed");
        });
        self.workers.lock().push(worker);
        Ok(())
    }

    /// Stop background ingestion
    pub fn shutdown(&self) {
        for worker in self.workers.lock().drain(..) {
            worker.abort();
        }
    }

    // ---------------------------------------------------------------------
    // Assignments
    // ---------------------------------------------------------------------

    /// Create or replace a manual assignment
    #[tracing::instrument(skip_all, fields(pubkey = %assignment.pubkey))]
    pub async fn upsert_assignment(
        &self,
        mut assignment: TrustAssignment,
    ) -> Result<Option<TrustAssignment>> {
        let now = self.clock.now_ms();
        assignment.validate_new(&self.registry.snapshot(), now)?;
        assignment.created_at = now;
        let subject = assignment.subject_fingerprint()?;

        let mut assignments = self.assignments.write().await;
        self.persistence
            .save(&StoredRecord::Assignment(assignment.clone()))
            .await?;
        let replaced = assignments.upsert(assignment)?;
        assignments.commit();
        info!(subject = %subject, replaced = replaced.is_some(), "assignment stored");
        self.emit(vec![TrustEvent::AssignmentChanged { subject }]);
        Ok(replaced)
    }

    /// Remove a manual assignment
    pub async fn remove_assignment(&self, key: &AssignmentKey) -> Result<Option<TrustAssignment>> {
        let mut assignments = self.assignments.write().await;
        let removed = assignments.remove(key);
        if removed.is_none() {
            return Ok(None);
        }
        self.persistence
            .delete(RecordKind::Assignment, &key.record_id().to_string())
            .await?;
        assignments.commit();
        self.emit(vec![TrustEvent::AssignmentChanged {
            subject: key.subject.clone(),
        }]);
        Ok(removed)
    }

    // ---------------------------------------------------------------------
    // Queries
    // ---------------------------------------------------------------------

    /// Effective trust of `subject` in `scope` now
    pub fn resolve_trust(&self, subject: &Subject, scope: &ScopeRef) -> TrustResult {
        self.resolve_in(subject, scope, None)
    }

    /// Effective trust of `subject` in `scope` at `at`
    pub fn resolve_trust_at(&self, subject: &Subject, scope: &ScopeRef, at: TimestampMs) -> TrustResult {
        self.resolve_in(subject, scope, Some(at))
    }

    /// `at` defaults to the snapshot instant
    fn resolve_in(&self, subject: &Subject, scope: &ScopeRef, at: Option<TimestampMs>) -> TrustResult {
        let Some(cache) = &self.cache else {
            let snapshot = self.snapshot();
            return resolver::resolve_trust(subject, scope, &snapshot, at.unwrap_or(snapshot.taken_at_ms));
        };
        let generation = cache.generation();
        let snapshot = self.snapshot();
        cache.resolve(subject, scope, &snapshot, generation, at.unwrap_or(snapshot.taken_at_ms))
    }

    /// Trust as shown to the local user, with display overrides applied
    pub fn display_trust(
        &self,
        subject: &Subject,
        scope: &ScopeRef,
        overrides: &LocalOverrides,
    ) -> DisplayTrust {
        overrides.apply(subject, self.resolve_trust(subject, scope))
    }

    /// Moderation actions in force against `subject` in `scope` now
    pub fn active_moderation_actions(&self, subject: &Subject, scope: &ScopeRef) -> Vec<ActiveAction> {
        let snapshot = self.snapshot();
        resolver::active_moderation_actions(subject, scope, &snapshot, snapshot.taken_at_ms)
    }

    /// Discovered documents waiting for a record they depend on
    pub fn parked_count(&self) -> usize {
        self.parked.lock().len()
    }

    /// Resolution cache statistics, when caching is enabled
    pub fn cache_stats(&self) -> Option<CacheStats> {
        self.cache.as_ref().map(ResolutionCache::stats)
    }
}

impl Drop for TrustEngine {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keypair::KeyUsage;
    use crate::permissions::{Permission, PermissionSet};
    use crate::persistence::MemoryPersistence;
    use crate::signature::LocalKeyStore;
    use crate::time::ManualClock;
    use assert_matches::assert_matches;

    struct Fixture {
        engine: TrustEngine,
        keys: Arc<LocalKeyStore>,
        clock: Arc<ManualClock>,
        store: Arc<MemoryPersistence>,
    }

    fn fixture() -> Fixture {
        let keys = Arc::new(LocalKeyStore::new());
        let clock = Arc::new(ManualClock::new(1_000));
        let store = Arc::new(MemoryPersistence::new());
        let engine = TrustEngine::new(
            TrustEngineConfig::default(),
            clock.clone(),
            keys.clone(),
            store.clone(),
        )
        .unwrap();
        Fixture {
            engine,
            keys,
            clock,
            store,
        }
    }

    impl Fixture {
        async fn key(&self, name: &str, usage: KeyUsage) -> Keypair {
            let keypair = self.keys.generate(usage, name, 0);
            self.engine.register_keypair(keypair.clone()).await.unwrap();
            keypair
        }
    }

    #[tokio::test]
    async fn test_author_sign_resolve() {
        let fx = fixture();
        let master = fx.key("master", KeyUsage::MasterAdminSigning).await;
        let bob = fx.key("bob", KeyUsage::User).await;
        let subject = Subject::keypair(bob.fingerprint.clone());
        let mut events = fx.engine.subscribe();

        let id = fx
            .engine
            .create_draft(
                &master.id,
                subject.clone(),
                DeclarationBody::trust(6, PermissionSet::from_permissions([Permission::Moderate])),
                Validity::open(),
            )
            .await
            .unwrap();
        assert!(!fx.engine.resolve_trust(&subject, &ScopeRef::global()).is_granted());

        fx.engine.finalize(&id).await.unwrap();
        fx.engine.sign(&id, &CancelToken::new()).await.unwrap();
        assert_eq!(
            events.recv().await.unwrap(),
            TrustEvent::DeclarationSigned {
                declaration_uuid: id,
                subject: subject.key()
            }
        );

        let result = fx.engine.resolve_trust(&subject, &ScopeRef::global());
        assert_eq!(result.level.value(), 6);
        assert!(result.permissions.can_moderate);
        assert_eq!(fx.store.count(RecordKind::Declaration), 1);
        assert_eq!(fx.store.count(RecordKind::Keypair), 2);
    }

    #[tokio::test]
    async fn test_sign_twice_is_refused() {
        let fx = fixture();
        let master = fx.key("master", KeyUsage::MasterAdminSigning).await;
        let bob = fx.key("bob", KeyUsage::User).await;
        let id = fx
            .engine
            .create_draft(
                &master.id,
                Subject::keypair(bob.fingerprint.clone()),
                DeclarationBody::trust(1, PermissionSet::none()),
                Validity::open(),
            )
            .await
            .unwrap();
        assert_matches!(
            fx.engine.sign(&id, &CancelToken::new()).await,
            Err(TrustError::InvalidState { .. })
        );
        fx.engine.finalize(&id).await.unwrap();
        fx.engine.sign(&id, &CancelToken::new()).await.unwrap();
        assert_matches!(
            fx.engine.sign(&id, &CancelToken::new()).await,
            Err(TrustError::InvalidState { .. })
        );
    }

    #[tokio::test]
    async fn test_revocation_through_engine() {
        let fx = fixture();
        let master = fx.key("master", KeyUsage::MasterAdminSigning).await;
        let bob = fx.key("bob", KeyUsage::User).await;
        let subject = Subject::keypair(bob.fingerprint.clone());
        let grant = fx
            .engine
            .create_draft(
                &master.id,
                subject.clone(),
                DeclarationBody::trust(4, PermissionSet::none()),
                Validity::open(),
            )
            .await
            .unwrap();
        fx.engine.finalize(&grant).await.unwrap();
        fx.engine.sign(&grant, &CancelToken::new()).await.unwrap();
        assert!(fx.engine.resolve_trust(&subject, &ScopeRef::global()).is_granted());

        fx.clock.advance_ms(10);
        let revocation = fx
            .engine
            .draft_revocation(&master.id, &grant, Some("compromised".into()))
            .await
            .unwrap();
        fx.engine.finalize(&revocation).await.unwrap();
        fx.engine.sign(&revocation, &CancelToken::new()).await.unwrap();

        assert!(fx.engine.declaration(&grant).unwrap().is_revoked());
        let result = fx.engine.resolve_trust(&subject, &ScopeRef::global());
        assert!(!result.is_granted());
        assert!(result.has_advisory(|a| matches!(a, resolver::Advisory::RevokedIgnored { .. })));
    }

    #[tokio::test]
    async fn test_assignment_round_trip() {
        let fx = fixture();
        let master = fx.key("master", KeyUsage::MasterAdminSigning).await;
        let bob = fx.key("bob", KeyUsage::User).await;
        let subject = Subject::keypair(bob.fingerprint.clone());
        let assignment = TrustAssignment {
            pubkey: hex::encode(&bob.public_key),
            assigned_trust_level: crate::declaration::TrustLevel(3),
            trust_limit: None,
            scope: None,
            assigned_by_pubkey: hex::encode(&master.public_key),
            expires_at: None,
            source: "admin-panel".into(),
            reason: None,
            created_at: 0,
        };
        let key = assignment.key().unwrap();
        assert!(fx.engine.upsert_assignment(assignment).await.unwrap().is_none());
        assert_eq!(fx.engine.resolve_trust(&subject, &ScopeRef::global()).level.value(), 3);

        assert!(fx.engine.remove_assignment(&key).await.unwrap().is_some());
        assert_eq!(fx.engine.resolve_trust(&subject, &ScopeRef::global()).level.value(), 0);
        assert_eq!(fx.store.count(RecordKind::Assignment), 0);
    }

    #[tokio::test]
    async fn test_publish_without_transport() {
        let fx = fixture();
        assert_matches!(
            fx.engine.publish(&DeclarationId::new_random()).await,
            Err(TrustError::Transport { .. })
        );
    }

    #[tokio::test]
    async fn test_discard_only_drafts() {
        let fx = fixture();
        let master = fx.key("master", KeyUsage::MasterAdminSigning).await;
        let bob = fx.key("bob", KeyUsage::User).await;
        let id = fx
            .engine
            .create_draft(
                &master.id,
                Subject::keypair(bob.fingerprint.clone()),
                DeclarationBody::trust(1, PermissionSet::none()),
                Validity::open(),
            )
            .await
            .unwrap();
        fx.engine
            .edit_draft(&id, |draft| draft.set_body(DeclarationBody::trust(2, PermissionSet::none())))
            .await
            .unwrap();
        fx.engine.discard_draft(&id).await.unwrap();
        assert!(fx.engine.declaration(&id).is_none());
        assert_eq!(fx.store.count(RecordKind::Declaration), 0);
    }
}
