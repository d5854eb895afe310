//! Validity windows and parent-window containment
//!
//! Windows are inclusive at both ends. A non-root issuer's declaration is
//! clamped into the window of whatever authorises the issuer; a request
//! that clamps to nothing is rejected rather than silently shrunk to an
//! empty window.

use crate::error::{Result, TrustError};
use crate::time::TimestampMs;
use serde::{Deserialize, Serialize};

/// A resolved window: a start and an optional end
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Window {
    /// First instant of validity
    pub from: TimestampMs,
    /// Last instant of validity; `None` is unbounded
    pub until: Option<TimestampMs>,
}

impl Window {
    /// Window from `from` with no end
    pub fn starting(from: TimestampMs) -> Self {
        Self { from, until: None }
    }

    /// Window between two instants
    pub fn between(from: TimestampMs, until: TimestampMs) -> Self {
        Self {
            from,
            until: Some(until),
        }
    }

    /// Whether `t` falls inside the window
    pub fn contains(&self, t: TimestampMs) -> bool {
        t >= self.from && self.until.map_or(true, |until| t <= until)
    }

    /// Whether the window has ended by `t`
    pub fn expired_at(&self, t: TimestampMs) -> bool {
        self.until.is_some_and(|until| t > until)
    }

    /// Whether `inner` lies entirely within this window
    pub fn encloses(&self, inner: &Window) -> bool {
        inner.from >= self.from
            && match (self.until, inner.until) {
                (None, _) => true,
                (Some(_), None) => false,
                (Some(outer), Some(inner)) => inner <= outer,
            }
    }

    /// Overlap of two windows, if any
    pub fn intersect(&self, other: &Window) -> Option<Window> {
        let from = self.from.max(other.from);
        let until = match (self.until, other.until) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (Some(v), None) | (None, Some(v)) => Some(v),
            (None, None) => None,
        };
        match until {
            Some(until) if from > until => None,
            _ => Some(Window { from, until }),
        }
    }

    /// Length in milliseconds, `None` when unbounded
    pub fn length_ms(&self) -> Option<u64> {
        self.until.map(|until| until.saturating_sub(self.from))
    }
}

/// Outcome of resolving a requested window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedWindow {
    /// The window that will be stored
    pub window: Window,
    /// Whether either bound was pulled in to fit the parent
    pub clamped: bool,
}

/// Resolve `requested` against the authorising window
///
/// `parent` is `None` for root issuers, whose requests pass unchanged.
/// For everyone else the request is clamped into `parent`; an empty result
/// is a temporal error.
pub fn resolve(requested: Window, parent: Option<&Window>) -> Result<ResolvedWindow> {
    if let Some(until) = requested.until {
        if requested.from > until {
            return Err(TrustError::temporal(format!(
                "requested window starts at {} after it ends at {until}",
                requested.from
            )));
        }
    }

    let Some(parent) = parent else {
        return Ok(ResolvedWindow {
            window: requested,
            clamped: false,
        });
    };

    let window = requested.intersect(parent).ok_or_else(|| {
        TrustError::temporal(format!(
            "requested window {}..{} lies outside the authorising window {}..{}",
            requested.from,
            fmt_until(requested.until),
            parent.from,
            fmt_until(parent.until)
        ))
    })?;

    Ok(ResolvedWindow {
        clamped: window != requested,
        window,
    })
}

fn fmt_until(until: Option<TimestampMs>) -> String {
    until.map_or_else(|| "unbounded".to_string(), |u| u.to_string())
}
