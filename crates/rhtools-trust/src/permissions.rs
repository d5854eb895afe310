//! Permission sets and structural containment
//!
//! Containment is a subset check over the boolean bits plus an ordering on
//! the numeric caps, where an absent cap means unbounded. Fields this version
//! does not know about land in `extensions`; they are never considered held,
//! so a draft setting one can never pass containment.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A single permission bit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    /// May sign trust declarations
    SignTrustDeclarations,
    /// May sign operating-admin grants
    SignOperationalAdmins,
    /// May moderate
    Moderate,
    /// May edit shared metadata
    UpdateMetadata,
    /// May grant moderation rights
    DelegateModerators,
    /// May grant metadata rights
    DelegateUpdaters,
}

impl Permission {
    /// Every known permission bit
    pub const ALL: [Permission; 6] = [
        Permission::SignTrustDeclarations,
        Permission::SignOperationalAdmins,
        Permission::Moderate,
        Permission::UpdateMetadata,
        Permission::DelegateModerators,
        Permission::DelegateUpdaters,
    ];

    /// Wire field name
    pub fn field_name(&self) -> &'static str {
        match self {
            Permission::SignTrustDeclarations => "can_sign_trust_declarations",
            Permission::SignOperationalAdmins => "can_sign_operational_admins",
            Permission::Moderate => "can_moderate",
            Permission::UpdateMetadata => "can_update_metadata",
            Permission::DelegateModerators => "can_delegate_moderators",
            Permission::DelegateUpdaters => "can_delegate_updaters",
        }
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.field_name())
    }
}

/// Capabilities granted by a declaration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionSet {
    /// May sign trust declarations
    #[serde(default)]
    pub can_sign_trust_declarations: bool,
    /// May sign operating-admin grants
    #[serde(default)]
    pub can_sign_operational_admins: bool,
    /// May moderate
    #[serde(default)]
    pub can_moderate: bool,
    /// May edit shared metadata
    #[serde(default)]
    pub can_update_metadata: bool,
    /// May grant moderation rights
    #[serde(default)]
    pub can_delegate_moderators: bool,
    /// May grant metadata rights
    #[serde(default)]
    pub can_delegate_updaters: bool,
    /// Longest validity, in seconds, of declarations the holder may issue
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_delegation_duration: Option<u64>,
    /// Longest block, in seconds, the holder may impose
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_block_duration: Option<u64>,
    /// Permission fields unknown to this version
    #[serde(flatten, default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extensions: BTreeMap<String, bool>,
}

impl PermissionSet {
    /// The empty set
    pub fn none() -> Self {
        Self::default()
    }

    /// Every known bit with unbounded caps; what a root authority holds
    pub fn all() -> Self {
        Self::from_permissions(Permission::ALL)
    }

    /// Build a set from individual bits, caps unbounded
    pub fn from_permissions(permissions: impl IntoIterator<Item = Permission>) -> Self {
        let mut set = Self::default();
        for permission in permissions {
            set.set(permission, true);
        }
        set
    }

    /// Builder-style cap on delegation duration
    pub fn with_max_delegation_duration(mut self, secs: u64) -> Self {
        self.max_delegation_duration = Some(secs);
        self
    }

    /// Builder-style cap on block duration
    pub fn with_max_block_duration(mut self, secs: u64) -> Self {
        self.max_block_duration = Some(secs);
        self
    }

    /// Whether a bit is held
    pub fn holds(&self, permission: Permission) -> bool {
        match permission {
            Permission::SignTrustDeclarations => self.can_sign_trust_declarations,
            Permission::SignOperationalAdmins => self.can_sign_operational_admins,
            Permission::Moderate => self.can_moderate,
            Permission::UpdateMetadata => self.can_update_metadata,
            Permission::DelegateModerators => self.can_delegate_moderators,
            Permission::DelegateUpdaters => self.can_delegate_updaters,
        }
    }

    /// Set or clear a bit
    pub fn set(&mut self, permission: Permission, value: bool) {
        let slot = match permission {
            Permission::SignTrustDeclarations => &mut self.can_sign_trust_declarations,
            Permission::SignOperationalAdmins => &mut self.can_sign_operational_admins,
            Permission::Moderate => &mut self.can_moderate,
            Permission::UpdateMetadata => &mut self.can_update_metadata,
            Permission::DelegateModerators => &mut self.can_delegate_moderators,
            Permission::DelegateUpdaters => &mut self.can_delegate_updaters,
        };
        *slot = value;
    }

    /// Bits set to true
    pub fn granted(&self) -> impl Iterator<Item = Permission> + '_ {
        Permission::ALL.into_iter().filter(|p| self.holds(*p))
    }

    /// Unknown fields set to true
    pub fn granted_extensions(&self) -> impl Iterator<Item = &str> {
        self.extensions
            .iter()
            .filter(|(_, v)| **v)
            .map(|(k, _)| k.as_str())
    }

    /// Whether any bit (known or unknown) is set
    pub fn grants_any(&self) -> bool {
        self.granted().next().is_some() || self.granted_extensions().next().is_some()
    }

    /// Bits requested by `self` that `holder` lacks, unknown fields included
    pub fn missing_from(&self, holder: &PermissionSet) -> Vec<String> {
        let mut missing: Vec<String> = self
            .granted()
            .filter(|p| !holder.holds(*p))
            .map(|p| p.field_name().to_string())
            .collect();
        missing.extend(self.granted_extensions().map(str::to_string));
        missing
    }

    /// Structural subset check over bits (caps are checked separately)
    pub fn is_subset_of(&self, holder: &PermissionSet) -> bool {
        self.missing_from(holder).is_empty()
    }

    /// Union, as used when several grants tie at the winning rank
    ///
    /// Caps combine to the larger bound, with absent meaning unbounded.
    pub fn union(&self, other: &PermissionSet) -> PermissionSet {
        let mut out = PermissionSet {
            max_delegation_duration: max_cap(self.max_delegation_duration, other.max_delegation_duration),
            max_block_duration: max_cap(self.max_block_duration, other.max_block_duration),
            ..PermissionSet::default()
        };
        for permission in Permission::ALL {
            out.set(permission, self.holds(permission) || other.holds(permission));
        }
        out
    }

    /// Intersection, as used when authority must hold across several scopes
    pub fn intersect(&self, other: &PermissionSet) -> PermissionSet {
        let mut out = PermissionSet {
            max_delegation_duration: min_cap(self.max_delegation_duration, other.max_delegation_duration),
            max_block_duration: min_cap(self.max_block_duration, other.max_block_duration),
            ..PermissionSet::default()
        };
        for permission in Permission::ALL {
            out.set(permission, self.holds(permission) && other.holds(permission));
        }
        out
    }
}

/// Whether `requested` stays within `held`, absent meaning unbounded
pub fn cap_within(requested: Option<u64>, held: Option<u64>) -> bool {
    match (requested, held) {
        (_, None) => true,
        (None, Some(_)) => false,
        (Some(r), Some(h)) => r <= h,
    }
}

fn max_cap(a: Option<u64>, b: Option<u64>) -> Option<u64> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.max(b)),
        _ => None,
    }
}

fn min_cap(a: Option<u64>, b: Option<u64>) -> Option<u64> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (Some(v), None) | (None, Some(v)) => Some(v),
        (None, None) => None,
    }
}
