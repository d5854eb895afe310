//! Memoised trust resolution
//!
//! Entries are keyed by `(subject, scope)` and stay valid from the instant
//! they were computed until the next instant at which something about the
//! subject changes on its own: a validity window opening or closing, an
//! update taking effect, an assignment lapsing. Changes made through the
//! engine invalidate entries explicitly.
//!
//! Every invalidation bumps a generation counter. A reader records the
//! generation before taking its snapshot and only stores its result if no
//! invalidation happened in between.

use crate::declaration::{Subject, SubjectKey};
use crate::events::TrustEvent;
use crate::resolver::{effective_window, resolve_trust, update_effective_from, TrustResult};
use crate::scope::ScopeRef;
use crate::store::TrustSnapshot;
use crate::time::TimestampMs;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Clone)]
struct CachedResult {
    result: TrustResult,
    computed_at: TimestampMs,
    stale_at: Option<TimestampMs>,
}

impl CachedResult {
    fn is_fresh(&self, at: TimestampMs) -> bool {
        self.computed_at <= at && self.stale_at.map_or(true, |stale| at < stale)
    }
}

/// Cache statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Entries currently held
    pub size: usize,
    /// Lookups answered from the cache
    pub hits: u64,
    /// Lookups that had to resolve
    pub misses: u64,
    /// Results not stored because an invalidation raced them
    pub discarded: u64,
}

/// Resolution cache shared by the engine's readers
#[derive(Debug)]
pub struct ResolutionCache {
    entries: RwLock<HashMap<(SubjectKey, ScopeRef), CachedResult>>,
    max_entries: usize,
    generation: AtomicU64,
    stats: RwLock<CacheStats>,
}

impl ResolutionCache {
    /// Cache holding at most `max_entries` results
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            max_entries: max_entries.max(1),
            generation: AtomicU64::new(0),
            stats: RwLock::new(CacheStats::default()),
        }
    }

    /// Invalidation count, to be read before taking a snapshot
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Cached result, or resolve against `snapshot` and remember it
    ///
    /// `generation` must have been read before `snapshot` was taken; the
    /// result is not stored if an invalidation happened since.
    pub fn resolve(
        &self,
        subject: &Subject,
        scope: &ScopeRef,
        snapshot: &TrustSnapshot,
        generation: u64,
        at: TimestampMs,
    ) -> TrustResult {
        let key = (subject.key(), scope.clone());
        if let Some(cached) = self.entries.read().get(&key) {
            if cached.is_fresh(at) {
                self.stats.write().hits += 1;
                return cached.result.clone();
            }
        }

        let result = resolve_trust(subject, scope, snapshot, at);
        let entry = CachedResult {
            result: result.clone(),
            computed_at: at,
            stale_at: next_transition(&key.0, snapshot, at),
        };
        let mut entries = self.entries.write();
        let mut stats = self.stats.write();
        stats.misses += 1;
        if self.generation.load(Ordering::Acquire) != generation {
            stats.discarded += 1;
            return result;
        }
        if entries.len() >= self.max_entries && !entries.contains_key(&key) {
            tracing::debug!(entries = entries.len(), "resolution cache full; flushing");
            entries.clear();
        }
        entries.insert(key, entry);
        result
    }

    /// Drop every entry about `subject`
    pub fn invalidate_subject(&self, subject: &SubjectKey) {
        let mut entries = self.entries.write();
        self.generation.fetch_add(1, Ordering::AcqRel);
        entries.retain(|(key, _), _| key != subject);
    }

    /// Invalidate whatever `event` may have changed
    pub fn apply_event(&self, event: &TrustEvent) {
        if event.invalidates_all() {
            self.clear();
        } else if let Some(subject) = event.affected_subject() {
            self.invalidate_subject(&subject);
        }
    }

    /// Drop everything
    pub fn clear(&self) {
        let mut entries = self.entries.write();
        self.generation.fetch_add(1, Ordering::AcqRel);
        entries.clear();
    }

    /// Current statistics
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            size: self.entries.read().len(),
            ..*self.stats.read()
        }
    }
}

/// Earliest instant after `at` at which `subject`'s resolution may change
/// without any new record arriving
fn next_transition(
    subject: &SubjectKey,
    snapshot: &TrustSnapshot,
    at: TimestampMs,
) -> Option<TimestampMs> {
    let declaration_edges = snapshot.declarations.about(subject).flat_map(|d| {
        let window = effective_window(d);
        let effective = d.is_update().then(|| update_effective_from(d));
        [
            Some(window.from),
            window.until.map(|until| until.saturating_add(1)),
            effective,
        ]
    });
    let assignment_edges = snapshot.assignments.iter().filter_map(|(key, assignment)| {
        match subject {
            SubjectKey::Keypair(fingerprint) if &key.subject == fingerprint => assignment.expires_at,
            _ => None,
        }
    });
    declaration_edges
        .flatten()
        .chain(assignment_edges)
        .filter(|edge| *edge > at)
        .min()
}
