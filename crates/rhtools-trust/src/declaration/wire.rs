//! Wire and persisted document form
//!
//! Other clients exchange declarations as this flat JSON document. The
//! content object is hashed in this form, so `From<&DeclarationBody>` must
//! stay stable: a field added here changes every hash that sets it.

use super::body::{
    CountersignatureRequirement, DeclarationBody, DeclarationKind, DeclarationType,
    ModerationKind, TrustLevel,
};
use super::{
    Countersignature, DeclarationId, DeclarationMetadata, DeclarationStatus, IssuerRef,
    Publication, RetroactiveEffect, Subject, TrustDeclaration, Validity, SCHEMA_VERSION,
};
use crate::canonical::ContentHash;
use crate::error::{Result, TrustError};
use crate::permissions::PermissionSet;
use crate::scope::Scope;
use crate::signature::SignatureBytes;
use crate::time::TimestampMs;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Moderation block of the content object
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModerationContent {
    /// Moderation verb
    pub action: ModerationKind,
    /// Duration in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_secs: Option<u64>,
}

/// Admin-control block of the content object
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlContent {
    /// Command name
    pub command: String,
    /// Command arguments
    #[serde(default)]
    pub parameters: BTreeMap<String, String>,
}

/// Flat content object, the hashed form
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireContent {
    /// Trust level conferred
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trust_level: Option<TrustLevel>,
    /// Usage type tags
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub usage_types: Vec<String>,
    /// Scopes; absent means global
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub scopes: Vec<Scope>,
    /// Permissions conferred
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub permissions: Option<PermissionSet>,
    /// Countersignature threshold
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required_countersignatures: Option<CountersignatureRequirement>,
    /// Moderation action details
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub moderation: Option<ModerationContent>,
    /// Admin-control command
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub control: Option<ControlContent>,
}

impl From<&DeclarationBody> for WireContent {
    fn from(body: &DeclarationBody) -> Self {
        let mut content = WireContent {
            usage_types: body.usage_types().to_vec(),
            scopes: body.scopes().to_vec(),
            required_countersignatures: body.required_countersignatures().cloned(),
            ..WireContent::default()
        };
        match body.kind() {
            DeclarationKind::Trust {
                trust_level,
                permissions,
            } => {
                content.trust_level = Some(*trust_level);
                content.permissions = Some(permissions.clone());
            }
            DeclarationKind::PrivilegeGrant {
                permissions,
                trust_level,
            }
            | DeclarationKind::MetadataDelegation {
                permissions,
                trust_level,
            } => {
                content.trust_level = *trust_level;
                content.permissions = Some(permissions.clone());
            }
            DeclarationKind::PrivilegeRevoke => {}
            DeclarationKind::ModerationAction {
                action,
                duration_secs,
            } => {
                content.moderation = Some(ModerationContent {
                    action: *action,
                    duration_secs: *duration_secs,
                });
            }
            DeclarationKind::AdminControlMessage {
                command,
                parameters,
            } => {
                content.control = Some(ControlContent {
                    command: command.clone(),
                    parameters: parameters.clone(),
                });
            }
        }
        content
    }
}

impl WireContent {
    /// Build the typed body for `declaration_type`, enforcing its required fields
    pub fn into_body(self, declaration_type: DeclarationType) -> Result<DeclarationBody> {
        let WireContent {
            trust_level,
            usage_types,
            scopes,
            permissions,
            required_countersignatures,
            moderation,
            control,
        } = self;

        let stray = |field: &str| {
            TrustError::validation(format!("{declaration_type} cannot carry '{field}'"))
        };
        let missing = |field: &str| {
            TrustError::validation(format!("{declaration_type} requires '{field}'"))
        };

        let carries_grant = trust_level.is_some() || permissions.is_some();
        let kind = match declaration_type {
            DeclarationType::TrustDeclaration => {
                if moderation.is_some() {
                    return Err(stray("moderation"));
                }
                if control.is_some() {
                    return Err(stray("control"));
                }
                DeclarationKind::Trust {
                    trust_level: trust_level.ok_or_else(|| missing("trust_level"))?,
                    permissions: permissions.unwrap_or_default(),
                }
            }
            DeclarationType::PrivilegeGrant | DeclarationType::MetadataDelegation => {
                if moderation.is_some() {
                    return Err(stray("moderation"));
                }
                if control.is_some() {
                    return Err(stray("control"));
                }
                let permissions = permissions.ok_or_else(|| missing("permissions"))?;
                if declaration_type == DeclarationType::PrivilegeGrant {
                    DeclarationKind::PrivilegeGrant {
                        permissions,
                        trust_level,
                    }
                } else {
                    DeclarationKind::MetadataDelegation {
                        permissions,
                        trust_level,
                    }
                }
            }
            DeclarationType::PrivilegeRevoke => {
                if carries_grant {
                    return Err(stray("permissions"));
                }
                if moderation.is_some() {
                    return Err(stray("moderation"));
                }
                if control.is_some() {
                    return Err(stray("control"));
                }
                DeclarationKind::PrivilegeRevoke
            }
            DeclarationType::ModerationAction => {
                if carries_grant {
                    return Err(stray("permissions"));
                }
                if control.is_some() {
                    return Err(stray("control"));
                }
                let moderation = moderation.ok_or_else(|| missing("moderation"))?;
                DeclarationKind::ModerationAction {
                    action: moderation.action,
                    duration_secs: moderation.duration_secs,
                }
            }
            DeclarationType::AdminControlMessage => {
                if carries_grant {
                    return Err(stray("permissions"));
                }
                if moderation.is_some() {
                    return Err(stray("moderation"));
                }
                let control = control.ok_or_else(|| missing("control"))?;
                DeclarationKind::AdminControlMessage {
                    command: control.command,
                    parameters: control.parameters,
                }
            }
        };

        Ok(DeclarationBody::from_parts(
            kind,
            scopes,
            usage_types,
            required_countersignatures,
        ))
    }
}

/// The declaration document as exchanged and persisted
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeclarationDocument {
    /// Document schema version
    pub schema_version: u32,
    /// Stable identifier
    pub declaration_uuid: DeclarationId,
    /// Type discriminator
    pub declaration_type: DeclarationType,
    /// Issuing keypair
    pub issuer: IssuerRef,
    /// Subject
    pub subject: Subject,
    /// Validity window
    #[serde(default)]
    pub validity: Validity,
    /// Issue time
    pub issued_at: TimestampMs,
    /// Hashed content
    #[serde(default)]
    pub content: WireContent,
    /// Free-text annotations
    #[serde(default)]
    pub metadata: DeclarationMetadata,
    /// Lifecycle status
    pub status: DeclarationStatus,
    /// SHA-256 of the canonical content
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_hash_sha256: Option<ContentHash>,
    /// Issuer signature
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub digital_signature: Option<SignatureBytes>,
    /// Countersignatures
    #[serde(default)]
    pub countersignatures: Vec<Countersignature>,
    /// Local revocation flag
    #[serde(default)]
    pub is_revoked: bool,
    /// Revoking declaration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revoked_by_declaration_uuid: Option<DeclarationId>,
    /// Whether this amends an earlier declaration
    #[serde(default)]
    pub is_update: bool,
    /// Amended declaration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_declaration_uuid: Option<DeclarationId>,
    /// Retroactive adjustment
    #[serde(default)]
    pub retroactive_effect: RetroactiveEffect,
    /// Transport bookkeeping
    #[serde(default)]
    pub publication: Publication,
}

impl From<TrustDeclaration> for DeclarationDocument {
    fn from(decl: TrustDeclaration) -> Self {
        DeclarationDocument {
            schema_version: decl.schema_version,
            declaration_uuid: decl.declaration_uuid,
            declaration_type: decl.body.declaration_type(),
            content: WireContent::from(&decl.body),
            issuer: decl.issuer,
            subject: decl.subject,
            validity: decl.validity,
            issued_at: decl.issued_at,
            metadata: decl.metadata,
            status: decl.status,
            content_hash_sha256: decl.content_hash,
            digital_signature: decl.digital_signature,
            countersignatures: decl.countersignatures,
            is_revoked: decl.is_revoked,
            revoked_by_declaration_uuid: decl.revoked_by,
            is_update: decl.original_declaration_uuid.is_some(),
            original_declaration_uuid: decl.original_declaration_uuid,
            retroactive_effect: decl.retroactive_effect,
            publication: decl.publication,
        }
    }
}

impl TryFrom<DeclarationDocument> for TrustDeclaration {
    type Error = TrustError;

    fn try_from(doc: DeclarationDocument) -> Result<Self> {
        if doc.schema_version == 0 || doc.schema_version > SCHEMA_VERSION {
            return Err(TrustError::validation(format!(
                "unsupported schema version {}",
                doc.schema_version
            )));
        }
        if doc.is_update != doc.original_declaration_uuid.is_some() {
            return Err(TrustError::validation(
                "is_update and original_declaration_uuid disagree",
            ));
        }
        if doc.revoked_by_declaration_uuid.is_some() && !doc.is_revoked {
            return Err(TrustError::validation(
                "revoked_by_declaration_uuid set on a live declaration",
            ));
        }
        if let (Some(from), Some(until)) = (doc.validity.valid_from, doc.validity.valid_until) {
            if from > until {
                return Err(TrustError::validation(format!(
                    "valid_from {from} is after valid_until {until}"
                )));
            }
        }
        if doc.declaration_type == DeclarationType::PrivilegeRevoke
            && doc.subject.target_declaration().is_none()
        {
            return Err(TrustError::validation(
                "privilege-revoke must target a declaration",
            ));
        }
        if doc.status != DeclarationStatus::Draft {
            if doc.content_hash_sha256.is_none() {
                return Err(TrustError::validation("finalized document lacks content hash"));
            }
            if doc.validity.valid_from.is_none() {
                return Err(TrustError::validation("finalized document lacks valid_from"));
            }
        }
        if doc.status.is_signed() && doc.digital_signature.is_none() {
            return Err(TrustError::validation("signed document lacks a signature"));
        }

        let body = doc.content.into_body(doc.declaration_type)?;
        if doc.status != DeclarationStatus::Draft {
            body.validate()?;
        }

        Ok(TrustDeclaration {
            schema_version: doc.schema_version,
            declaration_uuid: doc.declaration_uuid,
            issuer: doc.issuer,
            subject: doc.subject,
            validity: doc.validity,
            issued_at: doc.issued_at,
            body,
            metadata: doc.metadata,
            status: doc.status,
            content_hash: doc.content_hash_sha256,
            digital_signature: doc.digital_signature,
            countersignatures: doc.countersignatures,
            is_revoked: doc.is_revoked,
            revoked_by: doc.revoked_by_declaration_uuid,
            original_declaration_uuid: doc.original_declaration_uuid,
            retroactive_effect: doc.retroactive_effect,
            publication: doc.publication,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::declaration::tests::issuer;
    use crate::keypair::Fingerprint;
    use crate::permissions::Permission;
    use crate::scope::ScopeType;
    use serde_json::json;

    fn grant_document() -> serde_json::Value {
        let issuer = issuer("alice");
        json!({
            "schema_version": 1,
            "declaration_uuid": "6f1c2f5e-8a53-4c0e-9d8e-3f3c9b5b1a10",
            "declaration_type": "privilege-grant",
            "issuer": issuer,
            "subject": {"type": "keypair", "fingerprint": Fingerprint::of_public_key(b"bob")},
            "validity": {},
            "issued_at": 1000,
            "content": {
                "scopes": [{"type": "channel", "targets": ["help"]}],
                "permissions": {"can_moderate": true}
            },
            "status": "draft"
        })
    }

    #[test]
    fn test_sparse_document_parses() {
        let decl: TrustDeclaration = serde_json::from_value(grant_document()).unwrap();
        assert_eq!(decl.declaration_type(), DeclarationType::PrivilegeGrant);
        assert!(decl.body().permissions().unwrap().can_moderate);
        assert_eq!(
            decl.body().scopes(),
            &[Scope::targeted(ScopeType::Channel, ["help"])]
        );
    }

    #[test]
    fn test_hash_survives_sparse_and_explicit_forms() {
        let sparse: TrustDeclaration = serde_json::from_value(grant_document()).unwrap();
        let reparsed: TrustDeclaration =
            serde_json::from_value(serde_json::to_value(&sparse).unwrap()).unwrap();
        assert_eq!(
            sparse.compute_content_hash().unwrap(),
            reparsed.compute_content_hash().unwrap()
        );
    }

    #[test]
    fn test_required_fields_per_type() {
        let mut doc = grant_document();
        doc["declaration_type"] = json!("trust-declaration");
        let err = serde_json::from_value::<TrustDeclaration>(doc).unwrap_err();
        assert!(err.to_string().contains("trust_level"));

        let mut doc = grant_document();
        doc["declaration_type"] = json!("moderation-action");
        assert!(serde_json::from_value::<TrustDeclaration>(doc).is_err());

        let mut doc = grant_document();
        doc["content"]["moderation"] = json!({"action": "block"});
        assert!(serde_json::from_value::<TrustDeclaration>(doc).is_err());
    }

    #[test]
    fn test_revoke_must_target_declaration() {
        let mut doc = grant_document();
        doc["declaration_type"] = json!("privilege-revoke");
        doc["content"] = json!({});
        assert!(serde_json::from_value::<TrustDeclaration>(doc.clone()).is_err());

        doc["subject"] = json!({"type": "declaration", "ref": "6f1c2f5e-8a53-4c0e-9d8e-3f3c9b5b1a11"});
        let decl: TrustDeclaration = serde_json::from_value(doc).unwrap();
        assert!(decl.subject().target_declaration().is_some());
    }

    #[test]
    fn test_finalized_document_needs_hash() {
        let mut doc = grant_document();
        doc["status"] = json!("finalized");
        doc["validity"] = json!({"valid_from": 1000});
        assert!(serde_json::from_value::<TrustDeclaration>(doc).is_err());
    }

    #[test]
    fn test_trust_without_permissions_hashes_like_empty_set() {
        let body_a = DeclarationBody::trust(3, PermissionSet::none());
        let content_b: WireContent =
            serde_json::from_value(json!({"trust_level": 3})).unwrap();
        let body_b = content_b.into_body(DeclarationType::TrustDeclaration).unwrap();
        assert_eq!(body_a, body_b);

        let granted = DeclarationBody::trust(3, PermissionSet::from_permissions([Permission::Moderate]));
        assert_ne!(
            crate::canonical::hash_canonical(&WireContent::from(&body_a)).unwrap(),
            crate::canonical::hash_canonical(&WireContent::from(&granted)).unwrap()
        );
    }
}
