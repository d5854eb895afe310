//! Change notifications
//!
//! The engine broadcasts one [`TrustEvent`] per committed change. The
//! resolution cache consumes the same events to invalidate itself.

use crate::declaration::{DeclarationId, DeclarationSet, SubjectKey};
use crate::keypair::Fingerprint;

/// A committed change to the trust stores
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrustEvent {
    /// A locally authored declaration was signed
    DeclarationSigned {
        /// The declaration
        declaration_uuid: DeclarationId,
        /// Its subject
        subject: SubjectKey,
    },
    /// A discovered declaration was accepted
    DeclarationAccepted {
        /// The declaration
        declaration_uuid: DeclarationId,
        /// Its subject
        subject: SubjectKey,
    },
    /// A countersignature was recorded
    CountersignatureAdded {
        /// The countersigned declaration
        declaration_uuid: DeclarationId,
        /// Its subject
        subject: SubjectKey,
        /// Distinct permitted countersigners now recorded
        current: u32,
    },
    /// A declaration was revoked
    DeclarationRevoked {
        /// The revoked declaration
        declaration_uuid: DeclarationId,
        /// The revocation
        revoked_by: DeclarationId,
        /// Subject of the revoked declaration
        subject: SubjectKey,
    },
    /// An update to an earlier declaration became known
    DeclarationUpdated {
        /// The update
        declaration_uuid: DeclarationId,
        /// The declaration it amends
        original: DeclarationId,
        /// Shared subject
        subject: SubjectKey,
        /// Whether the update backdates its effect
        retroactive: bool,
    },
    /// The transport acknowledged a publish
    DeclarationPublished {
        /// The declaration
        declaration_uuid: DeclarationId,
        /// Transport event id
        event_id: String,
    },
    /// A manual assignment was created, replaced, or removed
    AssignmentChanged {
        /// Subject of the assignment
        subject: Fingerprint,
    },
    /// The keypair registry changed
    KeypairsChanged,
}

impl TrustEvent {
    /// Subject whose resolution this event may change, if it is confined to one
    pub fn affected_subject(&self) -> Option<SubjectKey> {
        match self {
            TrustEvent::DeclarationSigned { subject, .. }
            | TrustEvent::DeclarationAccepted { subject, .. }
            | TrustEvent::CountersignatureAdded { subject, .. }
            | TrustEvent::DeclarationRevoked { subject, .. }
            | TrustEvent::DeclarationUpdated { subject, .. } => Some(subject.clone()),
            TrustEvent::AssignmentChanged { subject } => Some(SubjectKey::Keypair(subject.clone())),
            TrustEvent::DeclarationPublished { .. } | TrustEvent::KeypairsChanged => None,
        }
    }

    /// Whether cached results for every subject must be dropped
    pub fn invalidates_all(&self) -> bool {
        matches!(
            self,
            TrustEvent::KeypairsChanged | TrustEvent::DeclarationUpdated { retroactive: true, .. }
        )
    }
}

/// Events describing a declaration that just became effective locally
///
/// `signed` distinguishes local signing from remote acceptance. Revocations
/// it caused are reported against the revoked declaration's subject.
pub(crate) fn declaration_events(
    declarations: &DeclarationSet,
    id: DeclarationId,
    signed: bool,
    revoked: &[DeclarationId],
) -> Vec<TrustEvent> {
    let mut events = Vec::new();
    if let Some(declaration) = declarations.get(&id) {
        let subject = declaration.subject().key();
        if let Some(original) = declaration.original_declaration_uuid() {
            events.push(TrustEvent::DeclarationUpdated {
                declaration_uuid: id,
                original,
                subject: subject.clone(),
                retroactive: declaration.retroactive_effect().enabled,
            });
        }
        events.push(if signed {
            TrustEvent::DeclarationSigned {
                declaration_uuid: id,
                subject,
            }
        } else {
            TrustEvent::DeclarationAccepted {
                declaration_uuid: id,
                subject,
            }
        });
    }
    events.extend(revocation_events(declarations, revoked));
    events
}

pub(crate) fn revocation_events(
    declarations: &DeclarationSet,
    revoked: &[DeclarationId],
) -> Vec<TrustEvent> {
    revoked
        .iter()
        .filter_map(|id| {
            let declaration = declarations.get(id)?;
            Some(TrustEvent::DeclarationRevoked {
                declaration_uuid: *id,
                revoked_by: declaration.revoked_by()?,
                subject: declaration.subject().key(),
            })
        })
        .collect()
}
