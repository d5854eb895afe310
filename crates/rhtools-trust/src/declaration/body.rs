//! Typed declaration content
//!
//! Each declaration type carries exactly the fields it needs; the wire
//! form in [`super::wire`] is flat and mostly optional, and conversion
//! between the two is where required fields are enforced.

use crate::error::{Result, TrustError};
use crate::keypair::Fingerprint;
use crate::permissions::PermissionSet;
use crate::scope::Scope;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Trust level conferred on a subject
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct TrustLevel(pub u32);

impl TrustLevel {
    /// No trust
    pub const ZERO: TrustLevel = TrustLevel(0);

    /// Raw value
    pub fn value(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for TrustLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Declaration type discriminator, as written on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeclarationType {
    /// Confers a trust level and permissions
    TrustDeclaration,
    /// Grants specific privileges
    PrivilegeGrant,
    /// Revokes an earlier declaration
    PrivilegeRevoke,
    /// Block, mute, warn, or unblock a subject
    ModerationAction,
    /// Grants metadata editing rights
    MetadataDelegation,
    /// Administrative command to clients
    AdminControlMessage,
}

impl DeclarationType {
    /// Wire name
    pub fn as_str(&self) -> &'static str {
        match self {
            DeclarationType::TrustDeclaration => "trust-declaration",
            DeclarationType::PrivilegeGrant => "privilege-grant",
            DeclarationType::PrivilegeRevoke => "privilege-revoke",
            DeclarationType::ModerationAction => "moderation-action",
            DeclarationType::MetadataDelegation => "metadata-delegation",
            DeclarationType::AdminControlMessage => "admin-control-message",
        }
    }

    /// Whether declarations of this type confer trust or permissions
    pub fn is_grant(&self) -> bool {
        matches!(
            self,
            DeclarationType::TrustDeclaration
                | DeclarationType::PrivilegeGrant
                | DeclarationType::MetadataDelegation
        )
    }
}

impl fmt::Display for DeclarationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Moderation verb
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ModerationKind {
    /// Prevent the subject from posting
    Block,
    /// Hide the subject's posts
    Mute,
    /// Record a warning
    Warn,
    /// Lift an earlier block
    Unblock,
}

/// Countersignatures needed before a declaration takes effect
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountersignatureRequirement {
    /// Minimum number of distinct countersigners
    pub min_count: u32,
    /// Fingerprints allowed to countersign; empty means anyone but the issuer
    #[serde(default)]
    pub required_keys: Vec<Fingerprint>,
}

impl CountersignatureRequirement {
    /// `min_count` signatures from anyone other than the issuer
    pub fn any_of(min_count: u32) -> Self {
        Self {
            min_count,
            required_keys: Vec::new(),
        }
    }

    /// `min_count` signatures from the named keys
    pub fn named(min_count: u32, keys: impl IntoIterator<Item = Fingerprint>) -> Self {
        Self {
            min_count,
            required_keys: keys.into_iter().collect(),
        }
    }

    /// Whether `other` is at least as demanding as `self`
    pub fn is_met_by(&self, other: Option<&CountersignatureRequirement>) -> bool {
        if self.min_count == 0 {
            return true;
        }
        let Some(other) = other else {
            return false;
        };
        if other.min_count < self.min_count {
            return false;
        }
        self.required_keys.is_empty()
            || (!other.required_keys.is_empty()
                && other
                    .required_keys
                    .iter()
                    .all(|k| self.required_keys.contains(k)))
    }

    fn validate(&self) -> Result<()> {
        if !self.required_keys.is_empty() && (self.required_keys.len() as u64) < self.min_count as u64
        {
            return Err(TrustError::validation(format!(
                "countersignature requirement needs {} signers but names only {}",
                self.min_count,
                self.required_keys.len()
            )));
        }
        Ok(())
    }
}

/// Per-type payload of a declaration
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeclarationKind {
    /// `trust-declaration`: trust level is mandatory
    Trust {
        /// Level conferred
        trust_level: TrustLevel,
        /// Permissions conferred alongside the level
        permissions: PermissionSet,
    },
    /// `privilege-grant`: permissions are mandatory
    PrivilegeGrant {
        /// Permissions conferred
        permissions: PermissionSet,
        /// Optional level conferred
        trust_level: Option<TrustLevel>,
    },
    /// `privilege-revoke`: subject must be the targeted declaration
    PrivilegeRevoke,
    /// `moderation-action`
    ModerationAction {
        /// What is done to the subject
        action: ModerationKind,
        /// How long it lasts, in seconds; `None` is indefinite
        duration_secs: Option<u64>,
    },
    /// `metadata-delegation`: permissions are mandatory
    MetadataDelegation {
        /// Permissions conferred
        permissions: PermissionSet,
        /// Optional level conferred
        trust_level: Option<TrustLevel>,
    },
    /// `admin-control-message`
    AdminControlMessage {
        /// Command name
        command: String,
        /// Command arguments
        parameters: BTreeMap<String, String>,
    },
}

impl DeclarationKind {
    /// The wire discriminator for this kind
    pub fn declaration_type(&self) -> DeclarationType {
        match self {
            DeclarationKind::Trust { .. } => DeclarationType::TrustDeclaration,
            DeclarationKind::PrivilegeGrant { .. } => DeclarationType::PrivilegeGrant,
            DeclarationKind::PrivilegeRevoke => DeclarationType::PrivilegeRevoke,
            DeclarationKind::ModerationAction { .. } => DeclarationType::ModerationAction,
            DeclarationKind::MetadataDelegation { .. } => DeclarationType::MetadataDelegation,
            DeclarationKind::AdminControlMessage { .. } => DeclarationType::AdminControlMessage,
        }
    }
}

/// The content of a declaration: its kind plus the fields every kind shares
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeclarationBody {
    kind: DeclarationKind,
    scopes: Vec<Scope>,
    usage_types: Vec<String>,
    required_countersignatures: Option<CountersignatureRequirement>,
}

impl DeclarationBody {
    /// Body of the given kind with global scope and no requirement
    pub fn new(kind: DeclarationKind) -> Self {
        Self {
            kind,
            scopes: Vec::new(),
            usage_types: Vec::new(),
            required_countersignatures: None,
        }
    }

    /// Trust declaration conferring `level` and `permissions`
    pub fn trust(level: u32, permissions: PermissionSet) -> Self {
        Self::new(DeclarationKind::Trust {
            trust_level: TrustLevel(level),
            permissions,
        })
    }

    /// Privilege grant
    pub fn privilege_grant(permissions: PermissionSet) -> Self {
        Self::new(DeclarationKind::PrivilegeGrant {
            permissions,
            trust_level: None,
        })
    }

    /// Moderation action
    pub fn moderation(action: ModerationKind, duration_secs: Option<u64>) -> Self {
        Self::new(DeclarationKind::ModerationAction {
            action,
            duration_secs,
        })
    }

    /// Builder: restrict to the given scopes
    pub fn with_scopes(mut self, scopes: impl IntoIterator<Item = Scope>) -> Self {
        self.scopes = scopes.into_iter().collect();
        self
    }

    /// Builder: usage type tags
    pub fn with_usage_types<I, S>(mut self, usage_types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.usage_types = usage_types.into_iter().map(Into::into).collect();
        self
    }

    /// Builder: require countersignatures
    pub fn with_countersignatures(mut self, requirement: CountersignatureRequirement) -> Self {
        self.required_countersignatures = Some(requirement);
        self
    }

    /// Per-type payload
    pub fn kind(&self) -> &DeclarationKind {
        &self.kind
    }

    /// Wire discriminator
    pub fn declaration_type(&self) -> DeclarationType {
        self.kind.declaration_type()
    }

    /// Scopes exactly as written; empty means global
    pub fn scopes(&self) -> &[Scope] {
        &self.scopes
    }

    /// Scopes in force, with the empty list read as global
    pub fn effective_scopes(&self) -> Vec<Scope> {
        if self.scopes.is_empty() {
            vec![Scope::global()]
        } else {
            self.scopes.clone()
        }
    }

    /// Usage type tags
    pub fn usage_types(&self) -> &[String] {
        &self.usage_types
    }

    /// Countersignature requirement, if any
    pub fn required_countersignatures(&self) -> Option<&CountersignatureRequirement> {
        self.required_countersignatures.as_ref()
    }

    /// Countersignatures required before the declaration takes effect
    pub fn required_count(&self) -> u32 {
        self.required_countersignatures
            .as_ref()
            .map(|r| r.min_count)
            .unwrap_or(0)
    }

    /// Trust level conferred, if this kind confers one
    pub fn trust_level(&self) -> Option<TrustLevel> {
        match &self.kind {
            DeclarationKind::Trust { trust_level, .. } => Some(*trust_level),
            DeclarationKind::PrivilegeGrant { trust_level, .. }
            | DeclarationKind::MetadataDelegation { trust_level, .. } => *trust_level,
            _ => None,
        }
    }

    /// Permissions conferred, if this kind confers any
    pub fn permissions(&self) -> Option<&PermissionSet> {
        match &self.kind {
            DeclarationKind::Trust { permissions, .. }
            | DeclarationKind::PrivilegeGrant { permissions, .. }
            | DeclarationKind::MetadataDelegation { permissions, .. } => Some(permissions),
            _ => None,
        }
    }

    /// Schema validation run at finalize
    pub fn validate(&self) -> Result<()> {
        for scope in &self.scopes {
            scope.validate()?;
        }
        if let Some(requirement) = &self.required_countersignatures {
            requirement.validate()?;
        }
        match &self.kind {
            DeclarationKind::PrivilegeGrant { permissions, .. } if !permissions.grants_any() => {
                Err(TrustError::validation(
                    "privilege-grant must grant at least one permission",
                ))
            }
            DeclarationKind::MetadataDelegation { permissions, .. }
                if !(permissions.can_update_metadata || permissions.can_delegate_updaters) =>
            {
                Err(TrustError::validation(
                    "metadata-delegation must grant metadata rights",
                ))
            }
            DeclarationKind::ModerationAction {
                duration_secs: Some(0),
                ..
            } => Err(TrustError::validation(
                "moderation duration must be positive",
            )),
            DeclarationKind::AdminControlMessage { command, .. } if command.trim().is_empty() => {
                Err(TrustError::validation(
                    "admin-control-message requires a command",
                ))
            }
            _ => Ok(()),
        }
    }

    pub(crate) fn from_parts(
        kind: DeclarationKind,
        scopes: Vec<Scope>,
        usage_types: Vec<String>,
        required_countersignatures: Option<CountersignatureRequirement>,
    ) -> Self {
        Self {
            kind,
            scopes,
            usage_types,
            required_countersignatures,
        }
    }
}
