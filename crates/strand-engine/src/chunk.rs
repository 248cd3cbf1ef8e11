//! Stack storage: the chunk holding a continuation's captured frames
//!
//! Records are ordered bottom (outermost) to top (innermost). A chunk is
//! owned by exactly one continuation; captures of nested continuations are
//! chained through [`Record::Entry`] links rather than shared storage.
//!
//! `requires_barriers` is set when a collection cycle has marked the chunk;
//! from then until the chunk empties, bulk (representation-preserving)
//! freeze and thaw are disallowed for it and the per-frame path runs.

use crate::frame::Record;
use crate::{EngineError, EngineResult};

/// Default record capacity for a continuation's storage.
pub const DEFAULT_CHUNK_CAPACITY: usize = 1 << 16;

/// Growable, shrinkable storage for one continuation's captured frames.
#[derive(Debug)]
pub struct StackChunk {
    records: Vec<Record>,
    max_records: usize,
    requires_barriers: bool,
    high_water: usize,
}

impl StackChunk {
    /// Create empty storage bounded at `max_records`.
    pub fn new(max_records: usize) -> Self {
        StackChunk {
            records: Vec::new(),
            max_records,
            requires_barriers: false,
            high_water: 0,
        }
    }

    /// Number of records currently stored.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Is the chunk empty?
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Bound on stored records (the "humongous stack" limit).
    pub fn capacity(&self) -> usize {
        self.max_records
    }

    /// Deepest capture this chunk has held.
    pub fn high_water(&self) -> usize {
        self.high_water
    }

    /// Would appending `extra` records exceed the bound?
    pub fn check_room(&self, extra: usize) -> EngineResult<()> {
        let needed = self.records.len() + extra;
        if needed > self.max_records {
            return Err(EngineError::StorageExhausted {
                needed,
                capacity: self.max_records,
            });
        }
        Ok(())
    }

    /// Append one record at the top.
    pub fn push(&mut self, record: Record) {
        self.records.push(record);
        self.high_water = self.high_water.max(self.records.len());
    }

    /// The topmost record, if any.
    pub fn top(&self) -> Option<&Record> {
        self.records.last()
    }

    /// Remove and return the topmost record. When the chunk empties, the
    /// barrier flag resets and excess capacity is released — storage
    /// shrinks across freeze/thaw cycles instead of ratcheting up.
    pub fn pop_top(&mut self) -> Option<Record> {
        let record = self.records.pop();
        if self.records.is_empty() {
            self.requires_barriers = false;
            self.records.shrink_to_fit();
        }
        record
    }

    /// All records, bottom to top.
    pub fn records(&self) -> &[Record] {
        &self.records
    }

    /// Has a collection cycle marked this chunk?
    pub fn requires_barriers(&self) -> bool {
        self.requires_barriers
    }

    /// Mark the chunk as visited by a collection cycle.
    pub fn set_requires_barriers(&mut self) {
        if !self.records.is_empty() {
            self.requires_barriers = true;
        }
    }
}

impl Default for StackChunk {
    fn default() -> Self {
        Self::new(DEFAULT_CHUNK_CAPACITY)
    }
}
