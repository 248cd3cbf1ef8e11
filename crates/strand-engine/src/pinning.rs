//! The pinning monitor: deciding whether a region may be frozen
//!
//! Scans the would-be-frozen slice of the live stack before any state is
//! touched. Detection priority is fixed: a held monitor wins over an
//! explicit critical section, which wins over a native frame. The scan is
//! read-only — a refused yield leaves everything exactly as it was.

use std::fmt;

use crate::frame::StackSlot;

/// Why a region could not be frozen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinReason {
    /// A frame in the region holds a monitor.
    Monitor,
    /// The region's continuations have an outstanding `pin()`.
    CriticalSection,
    /// The region contains a native (non-managed) frame.
    Native,
}

impl PinReason {
    /// Stable index for per-reason counters.
    pub(crate) fn index(self) -> usize {
        match self {
            PinReason::Monitor => 0,
            PinReason::CriticalSection => 1,
            PinReason::Native => 2,
        }
    }
}

impl fmt::Display for PinReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            PinReason::Monitor => "monitor",
            PinReason::CriticalSection => "critical section",
            PinReason::Native => "native frame",
        };
        f.write_str(text)
    }
}

/// Scan a region for pin conditions.
///
/// `region` is the slice of the live stack that freezing would capture;
/// `pin_count` is the combined explicit pin count of every continuation
/// whose frames fall inside the region. Returns the first reason by
/// priority, or `None` when the region is freezable.
pub fn scan_region(region: &[StackSlot], pin_count: i32) -> Option<PinReason> {
    if region
        .iter()
        .filter_map(StackSlot::as_frame)
        .any(|f| !f.monitors.is_empty())
    {
        return Some(PinReason::Monitor);
    }
    if pin_count > 0 {
        return Some(PinReason::CriticalSection);
    }
    if region
        .iter()
        .any(|slot| matches!(slot, StackSlot::NativeBarrier(_)))
    {
        return Some(PinReason::Native);
    }
    None
}
