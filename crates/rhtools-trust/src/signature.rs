//! Signing boundary
//!
//! The engine never touches key material directly. It asks a
//! [`SignatureCapability`] to sign canonical payloads and a
//! [`SignatureVerifier`] to check them. Verification fails closed: malformed
//! keys or signatures verify as `false`.
//!
//! [`LocalKeyStore`] is the in-process implementation: Ed25519 keys resident
//! in zeroizing buffers, with off-device keys fetched on demand through an
//! [`UnlockProvider`] (password prompt, hardware token, remote vault).

use crate::error::{Result, TrustError};
use crate::keypair::{
    Fingerprint, KeyAlgorithm, KeyUsage, Keypair, KeypairId, SecretCustody, StorageStatus,
};
use crate::time::TimestampMs;
use async_trait::async_trait;
use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey};
use parking_lot::RwLock;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use zeroize::Zeroizing;

/// Raw signature bytes, hex on the wire
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct SignatureBytes(pub Vec<u8>);

impl SignatureBytes {
    /// Borrow the raw bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for SignatureBytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SignatureBytes({})", hex::encode(&self.0))
    }
}

impl Serialize for SignatureBytes {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        crate::canonical::hex_bytes::serialize(&self.0, serializer)
    }
}

impl<'de> Deserialize<'de> for SignatureBytes {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        crate::canonical::hex_bytes::deserialize(deserializer).map(SignatureBytes)
    }
}

/// Why a signing request produced no signature
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SignError {
    /// Secret material is not reachable
    #[error("key unavailable: {0}")]
    KeyUnavailable(String),
    /// The unlock step was cancelled
    #[error("signing cancelled")]
    Cancelled,
}

impl From<SignError> for TrustError {
    fn from(err: SignError) -> Self {
        TrustError::key_unavailable(err.to_string())
    }
}

/// Signature verification
pub trait SignatureVerifier: Send + Sync {
    /// Whether `signature` over `payload` verifies under `public_key`
    fn verify(
        &self,
        algorithm: KeyAlgorithm,
        public_key: &[u8],
        payload: &[u8],
        signature: &SignatureBytes,
    ) -> bool;
}

/// Signature production; may prompt a user or fetch a key from elsewhere
#[async_trait]
pub trait SignatureCapability: SignatureVerifier {
    /// Sign `payload` with the secret half of `keypair`
    async fn sign(
        &self,
        keypair: &Keypair,
        payload: &[u8],
    ) -> std::result::Result<SignatureBytes, SignError>;
}

/// Stateless Ed25519 verifier
#[derive(Debug, Clone, Copy, Default)]
pub struct Ed25519Verifier;

impl SignatureVerifier for Ed25519Verifier {
    fn verify(
        &self,
        algorithm: KeyAlgorithm,
        public_key: &[u8],
        payload: &[u8],
        signature: &SignatureBytes,
    ) -> bool {
        match algorithm {
            KeyAlgorithm::Ed25519 => ed25519_verify(public_key, payload, signature.as_bytes()),
        }
    }
}

fn ed25519_verify(public_key: &[u8], payload: &[u8], signature: &[u8]) -> bool {
    let Ok(key_bytes) = <[u8; 32]>::try_from(public_key) else {
        return false;
    };
    let Ok(sig_bytes) = <[u8; 64]>::try_from(signature) else {
        return false;
    };
    let Ok(verifying_key) = VerifyingKey::from_bytes(&key_bytes) else {
        return false;
    };
    verifying_key
        .verify_strict(payload, &Signature::from_bytes(&sig_bytes))
        .is_ok()
}

fn signing_key_from(secret: &[u8]) -> std::result::Result<SigningKey, SignError> {
    let bytes: Zeroizing<[u8; 32]> = Zeroizing::new(
        secret
            .try_into()
            .map_err(|_| SignError::KeyUnavailable("Ed25519 secret must be 32 bytes".into()))?,
    );
    Ok(SigningKey::from_bytes(&bytes))
}

/// Fetches off-device secret material on demand
#[async_trait]
pub trait UnlockProvider: Send + Sync {
    /// Produce the secret for `keypair`, or explain why not
    async fn unlock(&self, keypair: &Keypair)
        -> std::result::Result<Zeroizing<Vec<u8>>, SignError>;
}

/// In-process key store for Ed25519 identities
#[derive(Default)]
pub struct LocalKeyStore {
    resident: RwLock<HashMap<KeypairId, Zeroizing<Vec<u8>>>>,
    offline: RwLock<HashMap<KeypairId, String>>,
    unlock: Option<Arc<dyn UnlockProvider>>,
}

impl fmt::Debug for LocalKeyStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalKeyStore")
            .field("resident", &self.resident.read().len())
            .field("offline", &self.offline.read().len())
            .field("unlock", &self.unlock.is_some())
            .finish()
    }
}

impl LocalKeyStore {
    /// Store with no unlock provider: only resident keys can sign
    pub fn new() -> Self {
        Self::default()
    }

    /// Store that fetches off-device keys through `provider`
    pub fn with_unlock_provider(provider: Arc<dyn UnlockProvider>) -> Self {
        Self {
            unlock: Some(provider),
            ..Self::default()
        }
    }

    /// Generate a fresh Ed25519 identity and keep its secret resident
    pub fn generate(
        &self,
        usage: KeyUsage,
        canonical_name: impl Into<String>,
        created_at: TimestampMs,
    ) -> Keypair {
        let signing_key = SigningKey::generate(&mut rand::thread_rng());
        let mut keypair = Keypair::from_public_key(
            KeyAlgorithm::Ed25519,
            usage,
            canonical_name,
            signing_key.verifying_key().to_bytes().to_vec(),
            created_at,
        );
        keypair.storage_status = StorageStatus::Full;
        self.resident
            .write()
            .insert(keypair.id, Zeroizing::new(signing_key.to_bytes().to_vec()));
        tracing::debug!(keypair = %keypair.id, fingerprint = %keypair.fingerprint, "generated keypair");
        keypair
    }

    /// Whether secret material for `id` is resident
    pub fn is_resident(&self, id: &KeypairId) -> bool {
        self.resident.read().contains_key(id)
    }

    /// Where an evicted key's copy was stored
    pub fn offline_locator(&self, id: &KeypairId) -> Option<String> {
        self.offline.read().get(id).cloned()
    }

    fn check_matches(keypair: &Keypair, secret: &[u8]) -> std::result::Result<SigningKey, SignError> {
        let signing_key = signing_key_from(secret)?;
        let derived = signing_key.verifying_key().to_bytes();
        if Fingerprint::of_public_key(&derived) != keypair.fingerprint {
            return Err(SignError::KeyUnavailable(format!(
                "secret does not belong to {}",
                keypair.fingerprint
            )));
        }
        Ok(signing_key)
    }
}

impl SignatureVerifier for LocalKeyStore {
    fn verify(
        &self,
        algorithm: KeyAlgorithm,
        public_key: &[u8],
        payload: &[u8],
        signature: &SignatureBytes,
    ) -> bool {
        Ed25519Verifier.verify(algorithm, public_key, payload, signature)
    }
}

#[async_trait]
impl SignatureCapability for LocalKeyStore {
    async fn sign(
        &self,
        keypair: &Keypair,
        payload: &[u8],
    ) -> std::result::Result<SignatureBytes, SignError> {
        let resident = self.resident.read().get(&keypair.id).cloned();
        let secret = match resident {
            Some(secret) => secret,
            None => {
                let provider = self.unlock.as_ref().ok_or_else(|| {
                    SignError::KeyUnavailable(format!(
                        "no secret material for {} and no unlock provider",
                        keypair.fingerprint
                    ))
                })?;
                tracing::debug!(keypair = %keypair.id, "requesting unlock of off-device key");
                provider.unlock(keypair).await?
            }
        };
        let signing_key = Self::check_matches(keypair, &secret)?;
        Ok(SignatureBytes(signing_key.sign(payload).to_bytes().to_vec()))
    }
}

impl SecretCustody for LocalKeyStore {
    fn install(&self, keypair: &Keypair, secret: Zeroizing<Vec<u8>>) -> Result<()> {
        Self::check_matches(keypair, &secret)
            .map_err(|e| TrustError::validation(e.to_string()))?;
        self.resident.write().insert(keypair.id, secret);
        self.offline.write().remove(&keypair.id);
        Ok(())
    }

    fn evict(&self, keypair: &Keypair, locator: &str) -> Result<()> {
        if self.resident.write().remove(&keypair.id).is_none() {
            return Err(TrustError::key_unavailable(format!(
                "no resident secret for {}",
                keypair.fingerprint
            )));
        }
        self.offline.write().insert(keypair.id, locator.to_string());
        Ok(())
    }
}

#[derive(Debug, Default)]
struct CancelState {
    cancelled: AtomicBool,
    notify: Notify,
}

/// Cloneable cancellation flag for in-flight signing requests
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    state: Arc<CancelState>,
}

impl CancelToken {
    /// Fresh, uncancelled token
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancel every waiter, now and in future
    pub fn cancel(&self) {
        self.state.cancelled.store(true, Ordering::SeqCst);
        self.state.notify.notify_waiters();
    }

    /// Whether `cancel` has been called
    pub fn is_cancelled(&self) -> bool {
        self.state.cancelled.load(Ordering::SeqCst)
    }

    /// Resolves once the token is cancelled
    pub async fn cancelled(&self) {
        loop {
            let notified = self.state.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

/// Sign under a deadline, abandoning the request on timeout or cancellation
pub(crate) async fn sign_with_deadline(
    capability: &dyn SignatureCapability,
    keypair: &Keypair,
    payload: &[u8],
    timeout: Duration,
    cancel: &CancelToken,
) -> Result<SignatureBytes> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(TrustError::from(SignError::Cancelled)),
        outcome = tokio::time::timeout(timeout, capability.sign(keypair, payload)) => match outcome {
            Ok(signed) => Ok(signed?),
            Err(_) => Err(TrustError::key_unavailable(format!(
                "signing with {} timed out after {}ms",
                keypair.fingerprint,
                timeout.as_millis()
            ))),
        },
    }
}
