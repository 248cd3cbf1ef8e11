//! Continuations: the state machine over scope, entry point, and storage
//!
//! A [`Continuation`] owns exactly one [`StackChunk`], one entry method,
//! and one [`ContinuationScope`]. It is mounted on at most one carrier
//! thread at any instant; a suspended continuation may be resumed from a
//! different thread than the one that froze it, never from two at once.
//!
//! Programming errors — running a completed continuation, running one that
//! is already mounted or captured inside an outer freeze, unbalanced
//! `unpin` — panic. They indicate violated invariants, not conditions the
//! caller can recover from.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};
use tracing::debug;

use crate::carrier::Carrier;
use crate::chain::Chain;
use crate::chunk::{StackChunk, DEFAULT_CHUNK_CAPACITY};
use crate::frame::Record;
use crate::gc::RootVisitor;
use crate::interp;
use crate::pinning::PinReason;
use crate::program::{MethodId, Program};
use crate::scope::ContinuationScope;
use crate::value::Value;
use crate::EngineResult;

/// Unique identifier for a Continuation.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct ContinuationId(u64);

static NEXT_CONTINUATION_ID: AtomicU64 = AtomicU64::new(1);

impl ContinuationId {
    /// Generate a new unique ContinuationId.
    pub fn new() -> Self {
        ContinuationId(NEXT_CONTINUATION_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the numeric ID value.
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl Default for ContinuationId {
    fn default() -> Self {
        Self::new()
    }
}

/// Lifecycle state of a continuation.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ContState {
    /// Created, never run.
    Fresh,
    /// Mounted and executing on a carrier thread.
    Running,
    /// Frozen at a yield point.
    Suspended,
    /// Entry point returned or threw.
    Done,
}

/// Per-continuation engine counters.
#[derive(Debug, Clone, Copy, Default)]
pub struct ContStats {
    /// Bulk (representation-preserving) freezes.
    pub freeze_fast: u64,
    /// Per-frame freezes.
    pub freeze_slow: u64,
    /// Bulk thaws.
    pub thaw_fast: u64,
    /// Per-frame / batched thaws.
    pub thaw_slow: u64,
    /// Refused yields, indexed by [`PinReason::index`].
    pub pinned: [u64; 3],
}

impl ContStats {
    /// Total refused yields.
    pub fn pinned_total(&self) -> u64 {
        self.pinned.iter().sum()
    }

    /// Refused yields for one reason.
    pub fn pinned_for(&self, reason: PinReason) -> u64 {
        self.pinned[reason.index()]
    }
}

/// Hook invoked when a yield attempt is refused because the region was
/// pinned. One virtual slot per continuation; the default is a no-op.
pub trait PinnedHandler: Send + Sync {
    /// Called synchronously, exactly once per refused yield, with the
    /// first detected reason.
    fn on_pinned(&self, reason: PinReason);
}

impl<F: Fn(PinReason) + Send + Sync> PinnedHandler for F {
    fn on_pinned(&self, reason: PinReason) {
        self(reason)
    }
}

pub(crate) struct ContInner {
    pub state: ContState,
    pub chunk: StackChunk,
    pub entry_args: Option<Vec<Value>>,
    pub result: Option<Value>,
    /// Set while this continuation's frames are held inside an enclosing
    /// continuation's capture; it is not separately resumable until the
    /// outer one re-enters it.
    pub nested_captured: bool,
    pub stats: ContStats,
}

/// A suspendable, resumable unit of sequential execution.
pub struct Continuation {
    id: ContinuationId,
    scope: ContinuationScope,
    program: Arc<Program>,
    entry: MethodId,
    inner: Mutex<ContInner>,
    mounted: AtomicBool,
    pin_count: AtomicI32,
    handler: Mutex<Option<Box<dyn PinnedHandler>>>,
}

impl Continuation {
    /// Create a fresh continuation over `scope`, entering `entry` from
    /// `program` with `args` on first run.
    pub fn new(
        scope: ContinuationScope,
        program: Arc<Program>,
        entry: MethodId,
        args: Vec<Value>,
    ) -> Arc<Continuation> {
        Self::with_storage_capacity(scope, program, entry, args, DEFAULT_CHUNK_CAPACITY)
    }

    /// Like [`Continuation::new`] with an explicit storage bound. Captures
    /// deeper than `max_records` fail with
    /// [`crate::EngineError::StorageExhausted`].
    pub fn with_storage_capacity(
        scope: ContinuationScope,
        program: Arc<Program>,
        entry: MethodId,
        args: Vec<Value>,
        max_records: usize,
    ) -> Arc<Continuation> {
        Arc::new(Continuation {
            id: ContinuationId::new(),
            scope,
            program,
            entry,
            inner: Mutex::new(ContInner {
                state: ContState::Fresh,
                chunk: StackChunk::new(max_records),
                entry_args: Some(args),
                result: None,
                nested_captured: false,
                stats: ContStats::default(),
            }),
            mounted: AtomicBool::new(false),
            pin_count: AtomicI32::new(0),
            handler: Mutex::new(None),
        })
    }

    /// This continuation's unique id.
    pub fn id(&self) -> ContinuationId {
        self.id
    }

    /// The scope this continuation answers yields for.
    pub fn scope(&self) -> &ContinuationScope {
        &self.scope
    }

    /// The program the entry point comes from.
    pub fn program(&self) -> &Arc<Program> {
        &self.program
    }

    /// Entry method id.
    pub fn entry_method(&self) -> MethodId {
        self.entry
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ContState {
        self.inner.lock().state
    }

    /// True iff the entry point has returned or thrown.
    pub fn is_done(&self) -> bool {
        self.state() == ContState::Done
    }

    /// Result of the entry method, once Done (None for void or throw).
    pub fn result(&self) -> Option<Value> {
        self.inner.lock().result.clone()
    }

    /// Engine counters for this continuation.
    pub fn stats(&self) -> ContStats {
        self.inner.lock().stats
    }

    /// Records currently held in stack storage.
    pub fn storage_len(&self) -> usize {
        self.inner.lock().chunk.len()
    }

    /// Deepest record count this continuation's storage has reached.
    pub fn storage_high_water(&self) -> usize {
        self.inner.lock().chunk.high_water()
    }

    /// Mount and execute on the calling thread until the continuation
    /// yields or completes.
    ///
    /// Returns `Ok(())` in both cases — query [`Continuation::is_done`] to
    /// tell them apart. An exception thrown out of the entry point is
    /// returned as [`crate::EngineError::Uncaught`] with the state at Done.
    ///
    /// # Panics
    ///
    /// If the continuation is Done, already mounted, or currently captured
    /// inside an enclosing continuation.
    pub fn run(self: &Arc<Self>, carrier: &Carrier) -> EngineResult<()> {
        debug!(cont = self.id.as_u64(), "run");
        let mut chain = Chain::new(carrier);
        chain.enter(Arc::clone(self))?;
        match interp::run_chain(&mut chain, 0) {
            Ok(()) => Ok(()),
            Err(err) => {
                chain.abort();
                Err(err)
            }
        }
    }

    /// Enter an explicit critical section: while the count is above zero,
    /// any yield whose region includes this continuation is refused with
    /// [`PinReason::CriticalSection`]. Nestable.
    pub fn pin(&self) {
        self.pin_count.fetch_add(1, Ordering::AcqRel);
    }

    /// Leave a critical section.
    ///
    /// # Panics
    ///
    /// If the pin count is already zero.
    pub fn unpin(&self) {
        let prev = self.pin_count.fetch_sub(1, Ordering::AcqRel);
        if prev <= 0 {
            self.pin_count.fetch_add(1, Ordering::AcqRel);
            panic!("unpin() without a matching pin()");
        }
    }

    /// Scoped pin: the count is restored on every exit path, including
    /// unwinding.
    pub fn pinned(self: &Arc<Self>) -> PinGuard {
        self.pin();
        PinGuard {
            cont: Arc::clone(self),
        }
    }

    /// Current explicit pin count.
    pub fn pin_count(&self) -> i32 {
        self.pin_count.load(Ordering::Acquire)
    }

    /// Install the pinned-yield hook, replacing any previous one.
    pub fn set_pinned_handler(&self, handler: Box<dyn PinnedHandler>) {
        *self.handler.lock() = Some(handler);
    }

    /// Visit every object reference held in this continuation's storage,
    /// descending into nested captures and continuation-valued slots.
    pub fn scan_roots(&self, visitor: &mut dyn RootVisitor) {
        let inner = self.inner.lock();
        for record in inner.chunk.records() {
            match record {
                Record::Frame(frame) => {
                    for value in frame.locals.iter().chain(frame.operands.iter()) {
                        match value {
                            Value::Ref(obj) => visitor.visit_ref(obj),
                            Value::Cont(child) => {
                                drop_guard_scan(child, visitor);
                            }
                            _ => {}
                        }
                    }
                }
                Record::Entry(child) => drop_guard_scan(child, visitor),
            }
        }
    }

    // ------------------------------------------------------------------
    // Engine-internal surface
    // ------------------------------------------------------------------

    pub(crate) fn inner(&self) -> MutexGuard<'_, ContInner> {
        self.inner.lock()
    }

    /// Adjust the pin count during unwind accounting. Deltas may be
    /// negative (a frame that unpinned a caller's pin is popped).
    pub(crate) fn adjust_pins(&self, delta: i32) {
        self.pin_count.fetch_add(delta, Ordering::AcqRel);
    }

    pub(crate) fn notify_pinned(&self, reason: PinReason) {
        self.inner.lock().stats.pinned[reason.index()] += 1;
        let handler = self.handler.lock();
        if let Some(h) = handler.as_ref() {
            h.on_pinned(reason);
        }
    }

    /// Claim this continuation for the calling carrier thread.
    pub(crate) fn mount(&self) -> ContState {
        let inner = self.inner.lock();
        match inner.state {
            ContState::Done => panic!("run() called on a completed continuation"),
            ContState::Running => panic!("continuation is already mounted on a carrier thread"),
            _ => {}
        }
        if inner.nested_captured {
            panic!("continuation is captured inside an enclosing continuation");
        }
        if self.mounted.swap(true, Ordering::AcqRel) {
            panic!("continuation is already mounted on a carrier thread");
        }
        inner.state
    }

    pub(crate) fn set_running(&self) {
        self.inner.lock().state = ContState::Running;
    }

    /// Re-mount a nested continuation while thawing the capture that
    /// contains it.
    pub(crate) fn remount_nested(&self) {
        let mut inner = self.inner.lock();
        inner.nested_captured = false;
        inner.state = ContState::Running;
        self.mounted.store(true, Ordering::Release);
    }

    /// Record a successful freeze of this continuation's frames.
    pub(crate) fn suspend(&self, nested: bool) {
        let mut inner = self.inner.lock();
        inner.state = ContState::Suspended;
        inner.nested_captured = nested;
        self.mounted.store(false, Ordering::Release);
    }

    /// Entry method returned; `result` is its value, if any.
    pub(crate) fn finish(&self, result: Option<Value>) {
        let mut inner = self.inner.lock();
        inner.state = ContState::Done;
        inner.result = result;
        inner.nested_captured = false;
        self.mounted.store(false, Ordering::Release);
    }

    pub(crate) fn take_entry_args(&self) -> Vec<Value> {
        self.inner.lock().entry_args.take().unwrap_or_default()
    }
}

fn drop_guard_scan(child: &Arc<Continuation>, visitor: &mut dyn RootVisitor) {
    // Nested scans take the child's lock; chains are strictly nested so
    // the lock order is always outer to inner.
    child.scan_roots(visitor);
}

impl fmt::Debug for Continuation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Continuation")
            .field("id", &self.id.as_u64())
            .field("scope", &self.scope)
            .finish()
    }
}

/// RAII critical section over a continuation; unpins on drop.
pub struct PinGuard {
    cont: Arc<Continuation>,
}

impl Drop for PinGuard {
    fn drop(&mut self) {
        self.cont.unpin();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::program::{Method, Op};

    fn trivial() -> Arc<Continuation> {
        let mut program = Program::new();
        let main = program.add_method(Method {
            name: "main".to_string(),
            param_count: 0,
            local_count: 0,
            code: vec![Op::ReturnVoid],
        });
        Continuation::new(
            ContinuationScope::named("test"),
            Arc::new(program),
            main,
            vec![],
        )
    }

    #[test]
    fn test_fresh_state() {
        let cont = trivial();
        assert_eq!(cont.state(), ContState::Fresh);
        assert!(!cont.is_done());
        assert_eq!(cont.result(), None);
    }

    #[test]
    fn test_pin_counting() {
        let cont = trivial();
        cont.pin();
        cont.pin();
        assert_eq!(cont.pin_count(), 2);
        cont.unpin();
        cont.unpin();
        assert_eq!(cont.pin_count(), 0);
    }

    #[test]
    #[should_panic(expected = "unpin() without a matching pin()")]
    fn test_unmatched_unpin_panics() {
        trivial().unpin();
    }

    #[test]
    fn test_pin_guard_restores_on_drop() {
        let cont = trivial();
        {
            let _guard = cont.pinned();
            assert_eq!(cont.pin_count(), 1);
        }
        assert_eq!(cont.pin_count(), 0);
    }

    #[test]
    fn test_pin_guard_restores_on_unwind() {
        let cont = trivial();
        let held = Arc::clone(&cont);
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(move || {
            let _guard = held.pinned();
            panic!("boom");
        }));
        assert!(result.is_err());
        assert_eq!(cont.pin_count(), 0);
    }

    #[test]
    fn test_mount_guards() {
        let cont = trivial();
        assert_eq!(cont.mount(), ContState::Fresh);
        let cloned = Arc::clone(&cont);
        let result =
            std::panic::catch_unwind(std::panic::AssertUnwindSafe(move || cloned.mount()));
        assert!(result.is_err(), "double mount must panic");
    }
}
