//! The freeze/thaw engine
//!
//! Freezing moves the live region above a continuation's entry marker into
//! per-continuation stack storage; thawing moves records back. Both come in
//! two strategies. The *fast* path is representation-preserving: records
//! move in bulk with their [`crate::program::ReprTag`]s untouched. The
//! *slow* path goes frame by frame and consults the
//! [`crate::program::CodeSource`] so that stale or in-flux representations
//! are re-derived instead of restored. Selection is per operation: GC
//! barriers on any touched chunk, an invalid captured tag, or in-flight OSR
//! all force the slow path.

mod freeze;
mod thaw;

pub(crate) use freeze::freeze_yield;
pub(crate) use thaw::{collect_nested, has_pending, thaw_next};
