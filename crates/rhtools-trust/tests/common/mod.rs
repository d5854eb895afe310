//! Shared fixtures for integration tests

#![allow(dead_code)]

pub mod strategies;

use rhtools_trust::persistence::Persistence;
use rhtools_trust::{
    CancelToken, DeclarationBody, DeclarationId, KeyUsage, Keypair, LocalKeyStore, ManualClock,
    MemoryPersistence, Result, Subject, TrustEngine, TrustEngineConfig, Validity,
};
use std::sync::Arc;

/// Start time of every test world
pub const T0: u64 = 1_700_000_000_000;

/// Install a test subscriber once; honours `RUST_LOG`
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// An engine with in-process keys, a manual clock, and in-memory storage
pub struct World {
    pub engine: Arc<TrustEngine>,
    pub keys: Arc<LocalKeyStore>,
    pub clock: Arc<ManualClock>,
    pub store: Arc<MemoryPersistence>,
}

impl World {
    pub fn new() -> Self {
        Self::with_config(TrustEngineConfig::default())
    }

    pub fn with_config(config: TrustEngineConfig) -> Self {
        Self::with_parts(config, Arc::new(LocalKeyStore::new()), Arc::new(MemoryPersistence::new()))
    }

    pub fn with_parts(
        config: TrustEngineConfig,
        keys: Arc<LocalKeyStore>,
        store: Arc<MemoryPersistence>,
    ) -> Self {
        init_tracing();
        let clock = Arc::new(ManualClock::new(T0));
        let persistence: Arc<dyn Persistence> = store.clone();
        let engine = TrustEngine::new(config, clock.clone(), keys.clone(), persistence)
            .expect("default config is valid");
        Self {
            engine: Arc::new(engine),
            keys,
            clock,
            store,
        }
    }

    /// Generate and register a keypair
    pub async fn key(&self, name: &str, usage: KeyUsage) -> Keypair {
        let keypair = self.keys.generate(usage, name, T0);
        self.engine
            .register_keypair(keypair.clone())
            .await
            .expect("fresh keypair registers");
        keypair
    }

    /// Draft, finalize, and sign in one go
    pub async fn issue(
        &self,
        issuer: &Keypair,
        subject: Subject,
        body: DeclarationBody,
        validity: Validity,
    ) -> Result<DeclarationId> {
        let id = self
            .engine
            .create_draft(&issuer.id, subject, body, validity)
            .await?;
        self.engine.finalize(&id).await?;
        self.engine.sign(&id, &CancelToken::new()).await?;
        Ok(id)
    }

    /// Move the clock forward
    pub fn tick(&self, ms: u64) {
        self.clock.advance_ms(ms);
    }
}

/// Subject form of a keypair
pub fn subject_of(keypair: &Keypair) -> Subject {
    Subject::keypair(keypair.fingerprint.clone())
}
