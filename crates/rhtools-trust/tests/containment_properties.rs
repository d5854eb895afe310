//! Property tests for authority containment
//!
//! An issuer may only hand out permission bits it holds, in scopes it holds
//! them in.

mod common;

use common::strategies::{arb_channel_scope, arb_nonempty_permission_set};
use common::{subject_of, World};
use proptest::prelude::*;
use rhtools_trust::{
    AuthorityCheck, DeclarationBody, KeyUsage, Permission, PermissionSet, Result, Scope,
    Validity,
};

fn block_on<T>(future: impl std::future::Future<Output = T>) -> T {
    tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .unwrap()
        .block_on(future)
}

/// Master grants `held` to an authorised admin, which then tries to grant
/// `requested` to a user; returns the authority verdict on the second draft
async fn delegate(
    held: DeclarationBody,
    requested: DeclarationBody,
) -> Result<()> {
    let world = World::new();
    let master = world.key("master", KeyUsage::MasterAdminSigning).await;
    let admin = world.key("admin", KeyUsage::AuthorizedAdmin).await;
    let user = world.key("user", KeyUsage::User).await;

    world
        .issue(&master, subject_of(&admin), held, Validity::open())
        .await
        .unwrap();
    world.tick(10);

    let id = world
        .engine
        .create_draft(&admin.id, subject_of(&user), requested, Validity::open())
        .await
        .unwrap();
    world.engine.can_issue(&id).map(|_| ())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn granted_bits_never_exceed_held_bits(
        held in arb_nonempty_permission_set(),
        requested in arb_nonempty_permission_set(),
    ) {
        let verdict = block_on(delegate(
            DeclarationBody::privilege_grant(held.clone()),
            DeclarationBody::privilege_grant(requested.clone()),
        ));
        if verdict.is_ok() {
            prop_assert!(requested.is_subset_of(&held));
        }
        if !requested.is_subset_of(&held) {
            let check = verdict.as_ref().err().and_then(|e| e.authority_check());
            prop_assert_eq!(check, Some(AuthorityCheck::Permission));
        }
    }

    #[test]
    fn delegated_scope_stays_inside_held_scope(
        held_scope in arb_channel_scope(),
        requested_scope in arb_channel_scope(),
    ) {
        let moderator = PermissionSet::from_permissions([
            Permission::Moderate,
            Permission::DelegateModerators,
        ]);
        let verdict = block_on(delegate(
            DeclarationBody::privilege_grant(moderator).with_scopes([held_scope.clone()]),
            DeclarationBody::privilege_grant(PermissionSet::from_permissions([Permission::Moderate]))
                .with_scopes([requested_scope.clone()]),
        ));
        prop_assert_eq!(verdict.is_ok(), held_scope.contains(&requested_scope));
        if let Err(e) = verdict {
            prop_assert_eq!(e.authority_check(), Some(AuthorityCheck::Scope));
        }
    }
}

#[test]
fn global_holder_may_delegate_any_channel() {
    let moderator = PermissionSet::from_permissions([
        Permission::Moderate,
        Permission::DelegateModerators,
    ]);
    let verdict = block_on(delegate(
        DeclarationBody::privilege_grant(moderator),
        DeclarationBody::privilege_grant(PermissionSet::from_permissions([Permission::Moderate]))
            .with_scopes([Scope::targeted(rhtools_trust::ScopeType::Channel, ["a", "b"])]),
    ));
    assert!(verdict.is_ok());
}
