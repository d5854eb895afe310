//! Error types for the trust engine
//!
//! Authoring-path operations (finalize, sign, revoke, assignment creation)
//! surface these to the caller. Resolution never returns them: it reports
//! problems through advisories instead. Ingestion logs them and moves on.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The containment step of authority validation that rejected a draft.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AuthorityCheck {
    /// Issuer holds no effective authority at all.
    Standing,
    /// Issuer usage may not target the subject's class.
    UsageCompatibility,
    /// Draft scope is broader than the issuer's own scope.
    Scope,
    /// Draft grants a permission bit the issuer does not hold.
    Permission,
    /// Draft grants a trust level above the issuer's own.
    TrustLevel,
    /// Draft exceeds the issuer's duration caps.
    Duration,
    /// Draft validity window falls outside the authorising window.
    Validity,
    /// Issuer does not dominate the issuer of the targeted declaration.
    Dominance,
}

impl fmt::Display for AuthorityCheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AuthorityCheck::Standing => "standing",
            AuthorityCheck::UsageCompatibility => "usage compatibility",
            AuthorityCheck::Scope => "scope containment",
            AuthorityCheck::Permission => "permission containment",
            AuthorityCheck::TrustLevel => "trust level containment",
            AuthorityCheck::Duration => "duration containment",
            AuthorityCheck::Validity => "validity containment",
            AuthorityCheck::Dominance => "issuer dominance",
        };
        f.write_str(name)
    }
}

/// Unified error type for trust engine operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TrustError {
    /// Malformed or incomplete declaration content
    #[error("validation failed: {reason}")]
    Validation {
        /// What was wrong with the content
        reason: String,
    },

    /// Issuer lacks the rights being granted
    #[error("authority check '{check}' failed: {reason}")]
    Authority {
        /// The containment step that failed
        check: AuthorityCheck,
        /// Diagnostic detail
        reason: String,
    },

    /// Signature verification failure or hash/signature mismatch
    #[error("signature error: {reason}")]
    Signature {
        /// Diagnostic detail
        reason: String,
    },

    /// Declaration is valid but lacks required countersignatures
    #[error("countersignatures deficient: {current} of {required} recorded")]
    CountersignatureDeficient {
        /// Countersignatures currently recorded
        current: u32,
        /// Countersignatures required
        required: u32,
    },

    /// Not yet valid, expired, or outside an authorising window
    #[error("temporal error: {reason}")]
    Temporal {
        /// Diagnostic detail
        reason: String,
    },

    /// Declaration has been revoked
    #[error("declaration {declaration_uuid} is revoked")]
    Revoked {
        /// The revoked declaration
        declaration_uuid: String,
    },

    /// Secret material inaccessible, or unlock cancelled or timed out
    #[error("key unavailable: {reason}")]
    KeyUnavailable {
        /// Diagnostic detail
        reason: String,
    },

    /// Referenced record does not exist
    #[error("not found: {what}")]
    NotFound {
        /// Description of the missing record
        what: String,
    },

    /// Operation not permitted in the record's current state
    #[error("invalid state: {reason}")]
    InvalidState {
        /// Diagnostic detail
        reason: String,
    },

    /// Conflicting content for an immutable record
    #[error("conflict: {reason}")]
    Conflict {
        /// Diagnostic detail
        reason: String,
    },

    /// Encoding or decoding failure
    #[error("serialization error: {reason}")]
    Serialization {
        /// Diagnostic detail
        reason: String,
    },

    /// Persistence failure
    #[error("storage error: {reason}")]
    Storage {
        /// Diagnostic detail
        reason: String,
    },

    /// Transport failure while publishing
    #[error("transport error: {reason}")]
    Transport {
        /// Diagnostic detail
        reason: String,
    },

    /// Invalid configuration
    #[error("config error: {reason}")]
    Config {
        /// Diagnostic detail
        reason: String,
    },
}

impl TrustError {
    /// Create a validation error
    pub fn validation(reason: impl Into<String>) -> Self {
        Self::Validation {
            reason: reason.into(),
        }
    }

    /// Create an authority error for the given containment step
    pub fn authority(check: AuthorityCheck, reason: impl Into<String>) -> Self {
        Self::Authority {
            check,
            reason: reason.into(),
        }
    }

    /// Create a signature error
    pub fn signature(reason: impl Into<String>) -> Self {
        Self::Signature {
            reason: reason.into(),
        }
    }

    /// Create a temporal error
    pub fn temporal(reason: impl Into<String>) -> Self {
        Self::Temporal {
            reason: reason.into(),
        }
    }

    /// Create a revoked-declaration error
    pub fn revoked(declaration_uuid: impl fmt::Display) -> Self {
        Self::Revoked {
            declaration_uuid: declaration_uuid.to_string(),
        }
    }

    /// Create a key-unavailable error
    pub fn key_unavailable(reason: impl Into<String>) -> Self {
        Self::KeyUnavailable {
            reason: reason.into(),
        }
    }

    /// Create a not-found error
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound { what: what.into() }
    }

    /// Create an invalid-state error
    pub fn invalid_state(reason: impl Into<String>) -> Self {
        Self::InvalidState {
            reason: reason.into(),
        }
    }

    /// Create a conflict error
    pub fn conflict(reason: impl Into<String>) -> Self {
        Self::Conflict {
            reason: reason.into(),
        }
    }

    /// Create a serialization error
    pub fn serialization(reason: impl Into<String>) -> Self {
        Self::Serialization {
            reason: reason.into(),
        }
    }

    /// Create a storage error
    pub fn storage(reason: impl Into<String>) -> Self {
        Self::Storage {
            reason: reason.into(),
        }
    }

    /// Create a transport error
    pub fn transport(reason: impl Into<String>) -> Self {
        Self::Transport {
            reason: reason.into(),
        }
    }

    /// Create a config error
    pub fn config(reason: impl Into<String>) -> Self {
        Self::Config {
            reason: reason.into(),
        }
    }

    /// The failed containment step, for authority errors
    pub fn authority_check(&self) -> Option<AuthorityCheck> {
        match self {
            TrustError::Authority { check, .. } => Some(*check),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for TrustError {
    fn from(err: serde_json::Error) -> Self {
        Self::serialization(err.to_string())
    }
}

impl From<std::io::Error> for TrustError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => Self::not_found(err.to_string()),
            _ => Self::storage(err.to_string()),
        }
    }
}

/// Standard Result type for trust engine operations
pub type Result<T> = std::result::Result<T, TrustError>;
