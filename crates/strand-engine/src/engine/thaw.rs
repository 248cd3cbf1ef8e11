//! Thawing records back onto the live stack

use std::sync::Arc;

use tracing::trace;

use crate::chain::Chain;
use crate::continuation::Continuation;
use crate::frame::{Record, StackSlot};
use crate::{EngineError, EngineResult};

/// Are any records still frozen for `cont`, counting nested captures?
///
/// An entry record is popped only after the child it names has drained, so
/// an empty chunk means the whole subtree is thawed.
pub(crate) fn has_pending(cont: &Arc<Continuation>) -> bool {
    !cont.inner().chunk.is_empty()
}

/// Continuations captured nested inside `cont`, outermost first.
pub(crate) fn collect_nested(cont: &Arc<Continuation>) -> Vec<Arc<Continuation>> {
    let mut out = Vec::new();
    gather(cont, &mut out);
    out
}

fn gather(cont: &Arc<Continuation>, out: &mut Vec<Arc<Continuation>>) {
    let inner = cont.inner();
    for record in inner.chunk.records() {
        if let Record::Entry(child) = record {
            out.push(Arc::clone(child));
            gather(child, out);
        }
    }
}

/// Thaw the next batch of records for the entry marker on top of the live
/// stack.
///
/// Records come off the logical top of the capture — descending into
/// nested chunks through their entry records — and land back on the live
/// stack in their original order, so after a batch the innermost thawed
/// frame is on top. The carrier's `thaw_batch` bounds how many records
/// move; `None` restores everything at once. A captured tag the code
/// source no longer accepts is re-derived on the way out.
pub(crate) fn thaw_next(chain: &mut Chain<'_>) -> EngineResult<()> {
    let cont = match chain.live.last() {
        Some(StackSlot::Entry(c)) => Arc::clone(c),
        _ => panic!("thaw without an entry marker on top of the live stack"),
    };

    let available = chain
        .carrier
        .config()
        .live_stack_limit
        .saturating_sub(chain.live.len());
    if available == 0 {
        return Err(EngineError::StackOverflow);
    }
    let batch = chain
        .carrier
        .config()
        .thaw_batch
        .unwrap_or(usize::MAX)
        .min(available);

    let mut popped = Vec::new();
    for _ in 0..batch {
        match pop_logical_top(&cont) {
            Some(entry) => popped.push(entry),
            None => break,
        }
    }
    assert!(!popped.is_empty(), "thaw on a fully restored capture");
    trace!(cont = cont.id().as_u64(), records = popped.len(), "thaw");

    let code = Arc::clone(chain.carrier.code());
    for (record, barriers) in popped.into_iter().rev() {
        match record {
            Record::Frame(rec) => {
                let owner = rec.owner;
                let valid = code.is_valid(rec.method, rec.repr);
                let frame = if valid {
                    rec.thaw()
                } else {
                    // Stale representation: re-derive instead of restoring.
                    let repr = code.rederive(rec.method);
                    rec.thaw_as(repr)
                };
                if let Some(c) = chain.cont_by_id(owner) {
                    let mut inner = c.inner();
                    if barriers || !valid {
                        inner.stats.thaw_slow += 1;
                    } else {
                        inner.stats.thaw_fast += 1;
                    }
                }
                chain.push_slot(StackSlot::Frame(frame))?;
            }
            Record::Entry(child) => {
                let id = child.id();
                chain.push_slot(StackSlot::Entry(child))?;
                let idx = chain.live.len() - 1;
                chain.set_marker(id, Some(idx));
            }
        }
    }
    Ok(())
}

/// Pop the logically innermost record of a capture, descending nested
/// entry records until the deepest chunk with content is found. Also
/// reports whether that chunk carries GC barriers, which forces the
/// slow thaw path for the record.
fn pop_logical_top(cont: &Arc<Continuation>) -> Option<(Record, bool)> {
    let mut cur = Arc::clone(cont);
    loop {
        let next = {
            let inner = cur.inner();
            match inner.chunk.top() {
                None => return None,
                Some(Record::Entry(child)) if has_pending(child) => Some(Arc::clone(child)),
                Some(_) => None,
            }
        };
        match next {
            Some(child) => cur = child,
            None => {
                let mut inner = cur.inner();
                let barriers = inner.chunk.requires_barriers();
                return inner.chunk.pop_top().map(|record| (record, barriers));
            }
        }
    }
}
