//! Stack walking over captures and live chains
//!
//! The walker reports frames innermost first and is transparent across
//! continuation boundaries: a nested capture's frames appear in sequence
//! exactly where the nested continuation is mounted, and frames a lazy
//! thaw has not restored yet are read straight out of their chunks.

use std::sync::Arc;

use crate::chain::Chain;
use crate::continuation::Continuation;
use crate::frame::{Record, StackSlot};
use crate::program::{Program, ReprTag};
use crate::scope::ContinuationScope;

/// One walked frame.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameInfo {
    /// Method name, or the registered name for a native frame.
    pub method: String,
    /// Representation the frame currently carries.
    pub repr: ReprTag,
    /// True for a native (non-managed) frame.
    pub native: bool,
}

/// A walk over a suspended continuation's captured frames.
pub struct StackWalker {
    frames: Vec<FrameInfo>,
}

impl StackWalker {
    /// Walk `cont`'s capture, innermost frame first, descending into
    /// nested captures where their entry records sit.
    pub fn of(cont: &Arc<Continuation>) -> StackWalker {
        let mut frames = Vec::new();
        walk_chunk(cont, &mut frames);
        StackWalker { frames }
    }

    /// Walked frames, innermost first.
    pub fn frames(&self) -> &[FrameInfo] {
        &self.frames
    }

    /// Number of walked frames.
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    /// True when the walk saw no frames.
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Iterate the walked frames, innermost first.
    pub fn iter(&self) -> std::slice::Iter<'_, FrameInfo> {
        self.frames.iter()
    }
}

impl IntoIterator for StackWalker {
    type Item = FrameInfo;
    type IntoIter = std::vec::IntoIter<FrameInfo>;

    fn into_iter(self) -> Self::IntoIter {
        self.frames.into_iter()
    }
}

fn walk_chunk(cont: &Arc<Continuation>, out: &mut Vec<FrameInfo>) {
    let program = Arc::clone(cont.program());
    let inner = cont.inner();
    // Top record first; an entry record's child holds the frames above
    // it, so the child is walked before anything beneath the record.
    for record in inner.chunk.records().iter().rev() {
        match record {
            Record::Frame(rec) => out.push(FrameInfo {
                method: method_name(&program, rec.method),
                repr: rec.repr,
                native: false,
            }),
            // Continuation-valued locals are data, not mounted frames:
            // the walk only descends through entry records.
            Record::Entry(child) => walk_chunk(child, out),
        }
    }
}

/// Walk the live chain innermost first, merging in frames a lazy thaw
/// still holds frozen at each revealed entry marker. `scope` bounds the
/// walk at the innermost mounted continuation of that scope.
pub(crate) fn walk_live(chain: &Chain<'_>, scope: Option<&ContinuationScope>) -> Vec<FrameInfo> {
    let mut out = Vec::new();
    for slot in chain.live.iter().rev() {
        match slot {
            StackSlot::Frame(frame) => {
                let name = chain
                    .cont_by_id(frame.owner)
                    .and_then(|c| c.program().method(frame.method).ok().map(|m| m.name.clone()))
                    .unwrap_or_else(|| format!("method#{}", frame.method));
                out.push(FrameInfo {
                    method: name,
                    repr: frame.repr,
                    native: false,
                });
            }
            StackSlot::Entry(cont) => {
                // Records still frozen for this continuation sit just
                // above its marker.
                walk_chunk(cont, &mut out);
                if scope.map_or(false, |s| cont.scope() == s) {
                    break;
                }
            }
            StackSlot::NativeBarrier(id) => {
                let name = chain
                    .carrier
                    .natives()
                    .name(*id)
                    .unwrap_or("native")
                    .to_string();
                out.push(FrameInfo {
                    method: name,
                    repr: ReprTag::Interpreted,
                    native: true,
                });
            }
        }
    }
    out
}

fn method_name(program: &Program, method: usize) -> String {
    program
        .method(method)
        .map(|m| m.name.clone())
        .unwrap_or_else(|_| format!("method#{method}"))
}
