//! Monitors
//!
//! Re-entrant locks owned by continuations. Ownership is what the pinning
//! monitor looks for: a frame that acquired a monitor and has not released
//! it forbids freezing the region containing that frame. There is no
//! blocking here — one carrier executes at a time, so contention is an
//! error, not a wait.

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use once_cell::sync::Lazy;

use crate::continuation::ContinuationId;
use crate::{EngineError, EngineResult};

/// Unique identifier for a monitor.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct MonitorId(u64);

static NEXT_MONITOR_ID: AtomicU64 = AtomicU64::new(1);

impl MonitorId {
    /// Generate a new unique MonitorId.
    pub fn new() -> Self {
        MonitorId(NEXT_MONITOR_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the numeric ID value.
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl Default for MonitorId {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug)]
struct MonitorState {
    owner: ContinuationId,
    count: u32,
}

/// Process-wide monitor table.
pub struct MonitorRegistry {
    monitors: DashMap<MonitorId, MonitorState>,
}

static GLOBAL_REGISTRY: Lazy<MonitorRegistry> = Lazy::new(|| MonitorRegistry {
    monitors: DashMap::new(),
});

impl MonitorRegistry {
    /// The process-wide registry.
    pub fn global() -> &'static MonitorRegistry {
        &GLOBAL_REGISTRY
    }

    /// Acquire `monitor` for `owner`. Re-entrant for the same owner;
    /// contention with a different owner is an error (a suspended
    /// continuation holding a monitor elsewhere cannot be waited on).
    pub fn enter(&self, monitor: MonitorId, owner: ContinuationId) -> EngineResult<()> {
        let mut entry = self.monitors.entry(monitor).or_insert(MonitorState {
            owner,
            count: 0,
        });
        if entry.count > 0 && entry.owner != owner {
            return Err(EngineError::MonitorContended(monitor));
        }
        entry.owner = owner;
        entry.count += 1;
        Ok(())
    }

    /// Release one acquisition of `monitor` by `owner`.
    ///
    /// # Panics
    ///
    /// Unbalanced release is a violated invariant, not a runtime condition.
    pub fn exit(&self, monitor: MonitorId, owner: ContinuationId) {
        let mut entry = self
            .monitors
            .get_mut(&monitor)
            .unwrap_or_else(|| panic!("monitor {monitor:?} released but never acquired"));
        assert!(
            entry.count > 0 && entry.owner == owner,
            "monitor {monitor:?} released by non-owner"
        );
        entry.count -= 1;
    }

    /// Acquisition count currently held on `monitor`.
    pub fn held_count(&self, monitor: MonitorId) -> u32 {
        self.monitors.get(&monitor).map(|s| s.count).unwrap_or(0)
    }
}
