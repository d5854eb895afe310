//! Engine configuration
//!
//! Loaded from TOML, then overlaid with `RHTOOLS_TRUST_<SECTION>_<KEY>`
//! environment variables, then validated. Every field has a default, so an
//! empty file is a valid configuration.

use crate::authority::RevocationPolicy;
use crate::error::{Result, TrustError};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Prefix of environment overrides
pub const ENV_PREFIX: &str = "RHTOOLS_TRUST_";

const SECTIONS: [&str; 4] = ["signing", "ingestion", "revocation", "cache"];

/// Signing step settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SigningConfig {
    /// Upper bound on a sign or key-unlock step, in milliseconds
    pub timeout_ms: u64,
}

impl Default for SigningConfig {
    fn default() -> Self {
        Self { timeout_ms: 120_000 }
    }
}

/// Instant at which an ingested issuer's standing is judged
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AuthorityClock {
    /// The document's own issue time
    #[default]
    IssuedAt,
    /// The local clock at ingestion
    Now,
}

/// Discovered-document ingestion settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestionConfig {
    /// Capacity of the discovery channel
    pub channel_capacity: usize,
    /// Documents issued further than this in the future are dropped
    pub max_future_skew_ms: u64,
    /// When issuer standing is evaluated
    pub authority_clock: AuthorityClock,
    /// Documents held while waiting for a record they depend on; 0 disables parking
    pub max_parked: usize,
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 256,
            max_future_skew_ms: 300_000,
            authority_clock: AuthorityClock::IssuedAt,
            max_parked: 1024,
        }
    }
}

/// Revocation settings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RevocationConfig {
    /// Countersignature rule for revocations
    pub countersignature_policy: RevocationPolicy,
}

/// Resolution cache settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Whether results are memoised
    pub enabled: bool,
    /// Entries kept before the cache is flushed
    pub max_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_entries: 4096,
        }
    }
}

/// Complete engine configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrustEngineConfig {
    /// Signing step
    pub signing: SigningConfig,
    /// Ingestion
    pub ingestion: IngestionConfig,
    /// Revocations
    pub revocation: RevocationConfig,
    /// Resolution cache
    pub cache: CacheConfig,
}

impl TrustEngineConfig {
    /// Parse TOML
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| TrustError::config(format!("invalid TOML: {e}")))
    }

    /// Read and parse a TOML file
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            TrustError::config(format!("failed to read {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&content)
    }

    /// Overlay `RHTOOLS_TRUST_*` variables from the process environment
    pub fn merge_with_env(&mut self) -> Result<()> {
        self.merge_vars(std::env::vars())
    }

    /// Overlay `RHTOOLS_TRUST_<SECTION>_<KEY>` pairs
    ///
    /// Values are read as JSON scalars where they parse as one
    /// (`true`, `42`), otherwise as strings.
    pub fn merge_vars(&mut self, vars: impl IntoIterator<Item = (String, String)>) -> Result<()> {
        let mut tree = serde_json::to_value(&*self)
            .map_err(|e| TrustError::config(format!("cannot serialise config: {e}")))?;
        let mut touched = false;
        for (name, raw) in vars {
            let Some(rest) = name.strip_prefix(ENV_PREFIX) else {
                continue;
            };
            let rest = rest.to_ascii_lowercase();
            let Some((section, key)) = SECTIONS
                .iter()
                .find_map(|s| Some((*s, rest.strip_prefix(s)?.strip_prefix('_')?)))
            else {
                return Err(TrustError::config(format!("unknown config variable {name}")));
            };
            let value: serde_json::Value = serde_json::from_str(&raw)
                .unwrap_or_else(|_| serde_json::Value::String(raw.clone()));
            let slot = tree
                .get_mut(section)
                .and_then(serde_json::Value::as_object_mut)
                .ok_or_else(|| TrustError::config(format!("missing section {section}")))?;
            if !slot.contains_key(key) {
                return Err(TrustError::config(format!("unknown config variable {name}")));
            }
            slot.insert(key.to_string(), value);
            touched = true;
        }
        if touched {
            *self = serde_json::from_value(tree)
                .map_err(|e| TrustError::config(format!("invalid environment override: {e}")))?;
        }
        Ok(())
    }

    /// Reject settings the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.signing.timeout_ms == 0 {
            return Err(TrustError::config("signing.timeout_ms must be positive"));
        }
        if self.ingestion.channel_capacity == 0 {
            return Err(TrustError::config("ingestion.channel_capacity must be positive"));
        }
        if self.cache.enabled && self.cache.max_entries == 0 {
            return Err(TrustError::config(
                "cache.max_entries must be positive when the cache is enabled",
            ));
        }
        Ok(())
    }

    /// Signing timeout as a duration
    pub fn signing_timeout(&self) -> Duration {
        Duration::from_millis(self.signing.timeout_ms)
    }
}
