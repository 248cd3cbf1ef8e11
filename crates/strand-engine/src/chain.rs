//! The mounted continuation chain
//!
//! A carrier runs at most one chain at a time: a shared live stack of
//! [`StackSlot`]s plus the ordered list of continuations currently mounted
//! on it (outermost first). Entry markers on the live stack delimit each
//! continuation's region; everything above a continuation's marker up to
//! the next marker belongs to it.

use std::sync::Arc;

use crate::carrier::Carrier;
use crate::continuation::{ContState, Continuation, ContinuationId};
use crate::engine;
use crate::frame::{Frame, StackSlot};
use crate::scope::ContinuationScope;
use crate::sync::MonitorRegistry;
use crate::value::Value;
use crate::{EngineError, EngineResult};

/// A continuation mounted on the chain, with the live-stack index of its
/// entry marker. `marker` is None while the continuation's frames are
/// still frozen (lazy thaw has not reached its marker yet).
pub(crate) struct ActiveRec {
    pub cont: Arc<Continuation>,
    pub marker: Option<usize>,
}

/// Mutable execution state for one `run` call on a carrier.
pub(crate) struct Chain<'c> {
    pub carrier: &'c Carrier,
    pub live: Vec<StackSlot>,
    /// Mounted continuations, outermost first.
    pub active: Vec<ActiveRec>,
    /// Return value handed back across a native barrier.
    pub native_return: Option<Value>,
}

impl<'c> Chain<'c> {
    pub fn new(carrier: &'c Carrier) -> Self {
        Chain {
            carrier,
            live: Vec::new(),
            active: Vec::new(),
            native_return: None,
        }
    }

    /// Innermost mounted continuation. The chain is never empty while
    /// the interpreter runs.
    pub fn current(&self) -> &Arc<Continuation> {
        &self.active.last().expect("chain has a mounted continuation").cont
    }

    pub fn cont_by_id(&self, id: ContinuationId) -> Option<&Arc<Continuation>> {
        self.active.iter().map(|r| &r.cont).find(|c| c.id() == id)
    }

    pub fn top_frame(&self) -> &Frame {
        match self.live.last() {
            Some(StackSlot::Frame(f)) => f,
            _ => panic!("interpreter running without a top frame"),
        }
    }

    pub fn top_frame_mut(&mut self) -> &mut Frame {
        match self.live.last_mut() {
            Some(StackSlot::Frame(f)) => f,
            _ => panic!("interpreter running without a top frame"),
        }
    }

    /// Push a slot, enforcing the carrier's live-stack limit.
    pub fn push_slot(&mut self, slot: StackSlot) -> EngineResult<()> {
        if self.live.len() >= self.carrier.config().live_stack_limit {
            return Err(EngineError::StackOverflow);
        }
        self.live.push(slot);
        Ok(())
    }

    /// Innermost active continuation whose scope matches, as an index
    /// into `active`.
    pub fn find_scope(&self, scope: &ContinuationScope) -> Option<usize> {
        self.active.iter().rposition(|r| r.cont.scope() == scope)
    }

    /// Record where a continuation's entry marker now sits on the live
    /// stack (set when thaw reveals or re-pushes it).
    pub fn set_marker(&mut self, id: ContinuationId, idx: Option<usize>) {
        if let Some(rec) = self.active.iter_mut().find(|r| r.cont.id() == id) {
            rec.marker = idx;
        }
    }

    /// Sum of explicit pin counts of `active[from..]`.
    pub fn combined_pin_count(&self, from: usize) -> i32 {
        self.active[from..].iter().map(|r| r.cont.pin_count()).sum()
    }

    /// Mount `cont` on top of the chain and make it runnable: a fresh
    /// continuation gets its entry frame pushed, a suspended one gets
    /// its nested chain re-activated and a first batch of frames thawed.
    pub fn enter(&mut self, cont: Arc<Continuation>) -> EngineResult<()> {
        // Entry marker plus at least one frame.
        if self.live.len() + 2 > self.carrier.config().live_stack_limit {
            return Err(EngineError::StackOverflow);
        }
        let prior = cont.mount();
        self.live.push(StackSlot::Entry(Arc::clone(&cont)));
        let marker = self.live.len() - 1;
        self.active.push(ActiveRec {
            cont: Arc::clone(&cont),
            marker: Some(marker),
        });
        cont.set_running();

        if prior == ContState::Fresh {
            let args = cont.take_entry_args();
            let program = Arc::clone(cont.program());
            let entry = cont.entry_method();
            let method = program.method(entry)?;
            let repr = self.carrier.code().current_repr(entry);
            let frame = Frame::for_call(entry, method, args, repr, cont.id());
            self.push_slot(StackSlot::Frame(frame))?;
        } else {
            // Re-activate the nested continuations captured with this
            // one, innermost last, so lazy thaw can find their markers.
            for child in engine::collect_nested(&cont) {
                child.remount_nested();
                self.active.push(ActiveRec {
                    cont: child,
                    marker: None,
                });
            }
            engine::thaw_next(self)?;
        }
        Ok(())
    }

    /// Drop a continuation from the active list after its region has
    /// been fully frozen or completed.
    pub fn deactivate(&mut self, id: ContinuationId) {
        if let Some(pos) = self.active.iter().rposition(|r| r.cont.id() == id) {
            self.active.remove(pos);
        }
    }

    /// Release frame-held effects (monitors and critical-section pins)
    /// when a frame leaves the stack without freezing.
    pub fn release_frame_effects(&mut self, frame: &Frame) {
        for &monitor in frame.monitors.iter().rev() {
            MonitorRegistry::global().exit(monitor, frame.owner);
        }
        if frame.pins_taken != 0 {
            if let Some(cont) = self.cont_by_id(frame.owner) {
                cont.adjust_pins(-frame.pins_taken);
            }
        }
    }

    /// Tear the whole chain down after an engine error: every live frame
    /// is discarded, its monitors released, and every mounted
    /// continuation is marked done without a result.
    pub fn abort(&mut self) {
        while let Some(slot) = self.live.pop() {
            if let StackSlot::Frame(frame) = slot {
                self.release_frame_effects(&frame);
            }
        }
        for rec in self.active.drain(..) {
            rec.cont.finish(None);
        }
    }
}
