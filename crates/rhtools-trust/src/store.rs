//! Single-writer stores with immutable snapshots
//!
//! Readers clone an `Arc` of the current value and never block writers for
//! longer than that clone. Writers serialise on an async mutex, edit a
//! private working copy, and publish it with [`WriteGuard::commit`].
//! Dropping a guard without committing discards every edit made through it.

use crate::assignment::AssignmentSet;
use crate::declaration::DeclarationSet;
use crate::keypair::KeypairRegistry;
use crate::time::TimestampMs;
use parking_lot::RwLock;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard};

/// Copy-on-write cell with one writer at a time
#[derive(Debug)]
pub struct SnapshotCell<T> {
    current: RwLock<Arc<T>>,
    writer: Mutex<()>,
}

impl<T: Clone> SnapshotCell<T> {
    /// Cell holding `value`
    pub fn new(value: T) -> Self {
        Self {
            current: RwLock::new(Arc::new(value)),
            writer: Mutex::new(()),
        }
    }

    /// The committed value as of now
    pub fn snapshot(&self) -> Arc<T> {
        self.current.read().clone()
    }

    /// Wait for exclusive write access
    pub async fn write(&self) -> WriteGuard<'_, T> {
        let permit = self.writer.lock().await;
        let working = (*self.snapshot()).clone();
        WriteGuard {
            cell: self,
            _permit: permit,
            working,
        }
    }

    /// Replace the committed value outright, waiting for other writers
    pub async fn replace(&self, value: T) {
        let _permit = self.writer.lock().await;
        *self.current.write() = Arc::new(value);
    }
}

impl<T: Clone + Default> Default for SnapshotCell<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

/// Exclusive working copy of a [`SnapshotCell`]
pub struct WriteGuard<'a, T> {
    cell: &'a SnapshotCell<T>,
    _permit: MutexGuard<'a, ()>,
    working: T,
}

impl<T> WriteGuard<'_, T> {
    /// Publish the working copy; returns the new committed value
    pub fn commit(self) -> Arc<T> {
        let committed = Arc::new(self.working);
        *self.cell.current.write() = committed.clone();
        committed
    }
}

impl<T> Deref for WriteGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.working
    }
}

impl<T> DerefMut for WriteGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.working
    }
}

/// Everything trust resolution reads, frozen at one instant
#[derive(Debug, Clone, Default)]
pub struct TrustSnapshot {
    /// Known keypairs
    pub registry: Arc<KeypairRegistry>,
    /// Known declarations
    pub declarations: Arc<DeclarationSet>,
    /// Manual assignments
    pub assignments: Arc<AssignmentSet>,
    /// When the snapshot was taken
    pub taken_at_ms: TimestampMs,
}

impl TrustSnapshot {
    /// Assemble a snapshot from its parts
    pub fn new(
        registry: KeypairRegistry,
        declarations: DeclarationSet,
        assignments: AssignmentSet,
        taken_at_ms: TimestampMs,
    ) -> Self {
        Self {
            registry: Arc::new(registry),
            declarations: Arc::new(declarations),
            assignments: Arc::new(assignments),
            taken_at_ms,
        }
    }

    /// The same snapshot with a different declaration set
    pub fn with_declarations(&self, declarations: Arc<DeclarationSet>) -> Self {
        Self {
            declarations,
            ..self.clone()
        }
    }
}
