//! Live frames, frame records, and the slots of the live stack
//!
//! A live stack is a sequence of [`StackSlot`]s: method frames interleaved
//! with entry markers (a continuation's freeze boundary) and native
//! barriers (frames freeze can never cross). Freezing converts a [`Frame`]
//! into a [`FrameRecord`]; thawing converts it back. The two carry the same
//! payload — the distinction is which code path produced them and what the
//! representation tag is allowed to be on each side.

use std::sync::Arc;

use crate::continuation::{Continuation, ContinuationId};
use crate::program::{Method, MethodId, ReprTag};
use crate::sync::MonitorId;
use crate::value::Value;
use crate::{EngineError, EngineResult};

/// An installed exception handler, with enough bookkeeping to restore the
/// frame's operand depth, monitor holdings, and the owning continuation's
/// pin count when unwinding into it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HandlerRecord {
    /// Instruction offset of the catch block.
    pub catch_ip: usize,
    /// Operand stack depth when the handler was installed.
    pub operand_depth: usize,
    /// Monitors held by this frame when the handler was installed.
    pub monitor_count: usize,
    /// This frame's pin delta when the handler was installed.
    pub pins_taken: i32,
}

/// A live method frame.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Method being executed.
    pub method: MethodId,
    /// Next instruction offset.
    pub ip: usize,
    /// Continuation this frame belongs to.
    pub owner: ContinuationId,
    /// Representation tag supplied by the code source at frame creation
    /// (or re-derived at thaw).
    pub repr: ReprTag,
    /// Local slots; leading slots hold the call arguments.
    pub locals: Vec<Value>,
    /// Operand stack.
    pub operands: Vec<Value>,
    /// Monitors acquired by this frame and not yet released.
    pub monitors: Vec<MonitorId>,
    /// Net pins taken by this frame (may go negative when a frame unpins
    /// a pin taken by its caller).
    pub pins_taken: i32,
    /// Installed exception handlers, innermost last.
    pub handlers: Vec<HandlerRecord>,
}

impl Frame {
    /// Build a frame for a call: arguments fill the leading locals, the
    /// rest start null. Argument counts are unbounded — calls wider than
    /// any register file just get more slots.
    pub fn for_call(
        method_id: MethodId,
        method: &Method,
        args: Vec<Value>,
        repr: ReprTag,
        owner: ContinuationId,
    ) -> Frame {
        let mut locals = args;
        locals.resize(locals.len().max(method.local_count), Value::Null);
        Frame {
            method: method_id,
            ip: 0,
            owner,
            repr,
            locals,
            operands: Vec::new(),
            monitors: Vec::new(),
            pins_taken: 0,
            handlers: Vec::new(),
        }
    }

    /// Push an operand.
    pub fn push_operand(&mut self, value: Value) {
        self.operands.push(value);
    }

    /// Pop an operand, or underflow.
    pub fn pop_operand(&mut self) -> EngineResult<Value> {
        self.operands.pop().ok_or(EngineError::StackUnderflow)
    }

    /// Read local slot `n`.
    pub fn load_local(&self, n: usize) -> EngineResult<Value> {
        self.locals
            .get(n)
            .cloned()
            .ok_or_else(|| EngineError::TypeError(format!("local slot {n} out of range")))
    }

    /// Write local slot `n`.
    pub fn store_local(&mut self, n: usize, value: Value) -> EngineResult<()> {
        match self.locals.get_mut(n) {
            Some(slot) => {
                *slot = value;
                Ok(())
            }
            None => Err(EngineError::TypeError(format!("local slot {n} out of range"))),
        }
    }

    /// Representation-preserving capture: the bulk freeze path. No
    /// per-field reconstruction, the tag is kept exactly as it was.
    pub fn freeze(self) -> FrameRecord {
        FrameRecord {
            method: self.method,
            ip: self.ip,
            owner: self.owner,
            repr: self.repr,
            locals: self.locals,
            operands: self.operands,
            monitors: self.monitors,
            pins_taken: self.pins_taken,
            handlers: self.handlers,
        }
    }
}

/// A captured frame inside stack storage.
///
/// Holds the representation tag plus every typed value and the positional
/// metadata needed to rebuild the live frame, however many slots the call
/// spanned.
#[derive(Debug, Clone)]
pub struct FrameRecord {
    /// Method the frame was executing.
    pub method: MethodId,
    /// Resume instruction offset.
    pub ip: usize,
    /// Continuation that owns this record.
    pub owner: ContinuationId,
    /// Representation tag at capture time. Must be resolvable by the code
    /// source at thaw time; stale tags are re-derived, never restored.
    pub repr: ReprTag,
    /// Captured locals.
    pub locals: Vec<Value>,
    /// Captured operand stack.
    pub operands: Vec<Value>,
    /// Monitors the frame still held when captured (always empty today:
    /// a held monitor pins the region).
    pub monitors: Vec<MonitorId>,
    /// Net pins the frame had taken.
    pub pins_taken: i32,
    /// Captured exception handlers.
    pub handlers: Vec<HandlerRecord>,
}

impl FrameRecord {
    /// Representation-preserving restore: the bulk thaw path.
    pub fn thaw(self) -> Frame {
        Frame {
            method: self.method,
            ip: self.ip,
            owner: self.owner,
            repr: self.repr,
            locals: self.locals,
            operands: self.operands,
            monitors: self.monitors,
            pins_taken: self.pins_taken,
            handlers: self.handlers,
        }
    }

    /// Per-frame restore with a corrected representation tag (the slow
    /// thaw path after invalidation: the deopt analogue).
    pub fn thaw_as(self, repr: ReprTag) -> Frame {
        let mut frame = self.thaw();
        frame.repr = repr;
        frame
    }
}

/// One record inside a stack chunk.
#[derive(Debug, Clone)]
pub enum Record {
    /// A captured method frame.
    Frame(FrameRecord),
    /// Re-entry point of a continuation nested inside this capture. Thawing
    /// this record re-establishes the child's entry marker and continues
    /// from the child's own chunk.
    Entry(Arc<Continuation>),
}

/// One slot of the live stack.
#[derive(Debug)]
pub enum StackSlot {
    /// An executing method frame.
    Frame(Frame),
    /// Entry marker: the freeze boundary of the named continuation. Frames
    /// above it (up to the next marker) belong to that continuation.
    Entry(Arc<Continuation>),
    /// Native barrier: a non-managed frame. Freeze refuses any region that
    /// contains one.
    NativeBarrier(usize),
}

impl StackSlot {
    /// Borrow the frame, if this slot is one.
    pub fn as_frame(&self) -> Option<&Frame> {
        match self {
            StackSlot::Frame(f) => Some(f),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::program::Op;

    fn sample_method() -> Method {
        Method {
            name: "sample".to_string(),
            param_count: 2,
            local_count: 4,
            code: vec![Op::ReturnVoid],
        }
    }

    #[test]
    fn test_for_call_fills_locals() {
        let method = sample_method();
        let frame = Frame::for_call(
            0,
            &method,
            vec![Value::I32(1), Value::I32(2)],
            ReprTag::Interpreted,
            ContinuationId::new(),
        );
        assert_eq!(frame.locals.len(), 4);
        assert_eq!(frame.locals[0], Value::I32(1));
        assert_eq!(frame.locals[1], Value::I32(2));
        assert_eq!(frame.locals[2], Value::Null);
    }

    #[test]
    fn test_wide_call_exceeds_local_count() {
        // More arguments than declared locals: the frame grows to hold them.
        let method = sample_method();
        let args: Vec<Value> = (0..64).map(Value::I32).collect();
        let frame = Frame::for_call(
            0,
            &method,
            args,
            ReprTag::Interpreted,
            ContinuationId::new(),
        );
        assert_eq!(frame.locals.len(), 64);
        assert_eq!(frame.locals[63], Value::I32(63));
    }

    #[test]
    fn test_freeze_thaw_preserves_payload() {
        let method = sample_method();
        let mut frame = Frame::for_call(
            7,
            &method,
            vec![Value::I64(10), Value::F64(2.5)],
            ReprTag::Compiled { version: 3 },
            ContinuationId::new(),
        );
        frame.ip = 12;
        frame.push_operand(Value::Bool(true));

        let record = frame.freeze();
        assert_eq!(record.repr, ReprTag::Compiled { version: 3 });

        let restored = record.thaw();
        assert_eq!(restored.method, 7);
        assert_eq!(restored.ip, 12);
        assert_eq!(restored.operands, vec![Value::Bool(true)]);
        assert_eq!(restored.locals[1], Value::F64(2.5));
    }

    #[test]
    fn test_thaw_as_rederives_tag() {
        let method = sample_method();
        let frame = Frame::for_call(
            0,
            &method,
            vec![],
            ReprTag::Compiled { version: 9 },
            ContinuationId::new(),
        );
        let restored = frame.freeze().thaw_as(ReprTag::Interpreted);
        assert_eq!(restored.repr, ReprTag::Interpreted);
    }

    #[test]
    fn test_operand_underflow() {
        let method = sample_method();
        let mut frame =
            Frame::for_call(0, &method, vec![], ReprTag::Interpreted, ContinuationId::new());
        assert!(matches!(
            frame.pop_operand(),
            Err(EngineError::StackUnderflow)
        ));
    }
}
