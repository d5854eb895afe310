//! The declaration store's contents

use super::{DeclarationId, DeclarationType, SubjectKey, TrustDeclaration};
use crate::error::{Result, TrustError};
use std::collections::BTreeMap;

/// All known declarations, drafts included, keyed by uuid
#[derive(Debug, Clone, Default)]
pub struct DeclarationSet {
    by_id: BTreeMap<DeclarationId, TrustDeclaration>,
}

impl DeclarationSet {
    /// Empty set
    pub fn new() -> Self {
        Self::default()
    }

    /// Lookup by uuid
    pub fn get(&self, id: &DeclarationId) -> Option<&TrustDeclaration> {
        self.by_id.get(id)
    }

    /// Lookup by uuid, as an error when absent
    pub fn require(&self, id: &DeclarationId) -> Result<&TrustDeclaration> {
        self.get(id)
            .ok_or_else(|| TrustError::not_found(format!("declaration {id}")))
    }

    pub(crate) fn require_mut(&mut self, id: &DeclarationId) -> Result<&mut TrustDeclaration> {
        self.by_id
            .get_mut(id)
            .ok_or_else(|| TrustError::not_found(format!("declaration {id}")))
    }

    /// Insert or replace
    pub fn insert(&mut self, declaration: TrustDeclaration) -> Option<TrustDeclaration> {
        self.by_id.insert(declaration.uuid(), declaration)
    }

    /// Remove a declaration; only drafts may be discarded
    pub fn remove_draft(&mut self, id: &DeclarationId) -> Result<TrustDeclaration> {
        self.require(id)?.ensure_draft()?;
        self.by_id
            .remove(id)
            .ok_or_else(|| TrustError::not_found(format!("declaration {id}")))
    }

    /// All declarations in uuid order
    pub fn iter(&self) -> impl Iterator<Item = &TrustDeclaration> {
        self.by_id.values()
    }

    /// Number of declarations
    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    /// Whether the set is empty
    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    /// Declarations naming `subject`
    pub fn about(&self, subject: &SubjectKey) -> impl Iterator<Item = &TrustDeclaration> + '_ {
        let subject = subject.clone();
        self.by_id.values().filter(move |d| d.subject().key() == subject)
    }

    /// Signed revocations targeting `target`
    pub fn revocations_of(
        &self,
        target: DeclarationId,
    ) -> impl Iterator<Item = &TrustDeclaration> + '_ {
        self.by_id.values().filter(move |d| {
            d.declaration_type() == DeclarationType::PrivilegeRevoke
                && d.status().is_signed()
                && d.subject().target_declaration() == Some(target)
        })
    }

    /// Signed updates amending `original`
    pub fn updates_of(
        &self,
        original: DeclarationId,
    ) -> impl Iterator<Item = &TrustDeclaration> + '_ {
        self.by_id.values().filter(move |d| {
            d.status().is_signed() && d.original_declaration_uuid() == Some(original)
        })
    }
}

impl FromIterator<TrustDeclaration> for DeclarationSet {
    fn from_iter<I: IntoIterator<Item = TrustDeclaration>>(iter: I) -> Self {
        let mut set = DeclarationSet::new();
        for declaration in iter {
            set.insert(declaration);
        }
        set
    }
}
