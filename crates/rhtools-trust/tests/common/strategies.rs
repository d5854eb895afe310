//! Proptest strategies for permission sets and scopes

use proptest::prelude::*;
use rhtools_trust::{Permission, PermissionSet, Scope, ScopeType};

/// Every known permission bit
pub fn arb_permission() -> impl Strategy<Value = Permission> {
    prop_oneof![
        Just(Permission::SignTrustDeclarations),
        Just(Permission::SignOperationalAdmins),
        Just(Permission::Moderate),
        Just(Permission::UpdateMetadata),
        Just(Permission::DelegateModerators),
        Just(Permission::DelegateUpdaters),
    ]
}

/// Arbitrary permission sets without caps
pub fn arb_permission_set() -> impl Strategy<Value = PermissionSet> {
    prop::collection::btree_set(arb_permission(), 0..=6).prop_map(PermissionSet::from_permissions)
}

/// Permission sets granting at least one bit
pub fn arb_nonempty_permission_set() -> impl Strategy<Value = PermissionSet> {
    prop::collection::btree_set(arb_permission(), 1..=6).prop_map(PermissionSet::from_permissions)
}

/// Channel scopes over a small target alphabet, so overlaps happen
pub fn arb_channel_scope() -> impl Strategy<Value = Scope> {
    prop_oneof![
        Just(Scope::of_type(ScopeType::Channel)),
        prop::collection::btree_set("[a-d]", 1..3)
            .prop_map(|targets| Scope::targeted(ScopeType::Channel, targets)),
    ]
}
