//! Freezing the live region into stack storage

use std::sync::Arc;

use rustc_hash::FxHashMap;
use tracing::trace;

use crate::chain::Chain;
use crate::continuation::{Continuation, ContinuationId};
use crate::frame::{Record, StackSlot};
use crate::pinning::{self, PinReason};
use crate::EngineResult;

/// Try to freeze everything above the entry of `active[target]`.
///
/// Returns `Ok(Some(reason))` when the region is pinned; nothing changes in
/// that case. On `Ok(None)` the region has been moved into the affected
/// continuations' chunks, `active[target..]` has been unmounted (the target
/// suspended, everything above it captured nested), and the live stack ends
/// just below the target's entry. Capacity is verified for every touched
/// chunk before any record moves, so storage exhaustion leaves the chain
/// exactly as it was.
pub(crate) fn freeze_yield(
    chain: &mut Chain<'_>,
    target: usize,
) -> EngineResult<Option<PinReason>> {
    // The region starts above the innermost revealed marker at or below
    // the target; frames deeper than that are still frozen and stay put.
    let start = chain.active[..=target]
        .iter()
        .rev()
        .find_map(|rec| rec.marker)
        .map(|m| m + 1)
        .expect("outermost entry marker is always on the live stack");

    let region = &chain.live[start..];
    if let Some(reason) = pinning::scan_region(region, chain.combined_pin_count(target)) {
        chain.active[target].cont.notify_pinned(reason);
        return Ok(Some(reason));
    }

    // Per-chunk record counts, for the capacity pre-check and the barrier
    // scan. Frames go to their owner; a nested entry marker is re-recorded
    // into the chunk of the continuation it is mounted on.
    let mut counts: FxHashMap<ContinuationId, usize> = FxHashMap::default();
    for slot in region {
        match slot {
            StackSlot::Frame(frame) => *counts.entry(frame.owner).or_insert(0) += 1,
            StackSlot::Entry(child) => {
                let parent = parent_of(chain, child);
                *counts.entry(parent).or_insert(0) += 1;
            }
            StackSlot::NativeBarrier(_) => unreachable!("pin scan admits no native barrier"),
        }
    }
    for (&id, &needed) in &counts {
        let cont = chain.cont_by_id(id).expect("region owner is mounted");
        cont.inner().chunk.check_room(needed)?;
    }

    let code = Arc::clone(chain.carrier.code());
    let mut slow = counts.keys().any(|&id| {
        let cont = chain.cont_by_id(id).expect("region owner is mounted");
        let inner = cont.inner();
        inner.chunk.requires_barriers()
    });
    if !slow {
        slow = chain.live[start..].iter().any(|slot| match slot {
            StackSlot::Frame(f) => {
                !code.is_valid(f.method, f.repr) || code.osr_in_progress(f.method)
            }
            _ => false,
        });
    }

    trace!(
        target_idx = target,
        records = chain.live.len() - start,
        slow,
        "freeze"
    );

    // Point of no return: capacity is reserved, the region is movable.
    let slots = chain.live.split_off(start);
    for slot in slots {
        match slot {
            StackSlot::Frame(frame) => {
                let owner = frame.owner;
                let mut record = frame.freeze();
                if slow
                    && (!code.is_valid(record.method, record.repr)
                        || code.osr_in_progress(record.method))
                {
                    record.repr = code.rederive(record.method);
                }
                let cont = chain.cont_by_id(owner).expect("region owner is mounted");
                cont.inner().chunk.push(Record::Frame(record));
            }
            StackSlot::Entry(child) => {
                let parent = parent_of(chain, &child);
                let cont = chain.cont_by_id(parent).expect("region owner is mounted");
                cont.inner().chunk.push(Record::Entry(child));
            }
            StackSlot::NativeBarrier(_) => unreachable!(),
        }
    }

    // Retire the target's own entry marker: pop it from the live stack, or
    // when lazy thaw never revealed it, from the top of its parent's chunk.
    match chain.active[target].marker {
        Some(_) => match chain.live.pop() {
            Some(StackSlot::Entry(_)) => {}
            _ => panic!("target entry marker missing below the frozen region"),
        },
        None => {
            let parent = Arc::clone(&chain.active[target - 1].cont);
            let mut inner = parent.inner();
            match inner.chunk.pop_top() {
                Some(Record::Entry(_)) => {}
                _ => panic!("target entry record missing from the enclosing chunk"),
            }
        }
    }

    let unmounted = chain.active.split_off(target);
    for (i, rec) in unmounted.iter().enumerate() {
        {
            let mut inner = rec.cont.inner();
            if slow {
                inner.stats.freeze_slow += 1;
            } else {
                inner.stats.freeze_fast += 1;
            }
        }
        // The target becomes an independently mountable suspended
        // continuation; everything above it is captured inside it.
        rec.cont.suspend(i != 0);
    }

    Ok(None)
}

fn parent_of(chain: &Chain<'_>, child: &Arc<Continuation>) -> ContinuationId {
    let pos = chain
        .active
        .iter()
        .position(|rec| rec.cont.id() == child.id())
        .expect("nested entry marker names a mounted continuation");
    assert!(pos > 0, "outermost entry marker cannot be re-recorded");
    chain.active[pos - 1].cont.id()
}
