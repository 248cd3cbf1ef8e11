//! Op dispatch over the live chain
//!
//! `run_chain` drives whatever sits on top of the live stack until it
//! drops back to `floor`: the interpreter proper for managed frames, a
//! thaw batch when a lazy entry marker surfaces. Returns, throws, and
//! yields all funnel through here so the entry-marker bookkeeping lives
//! in one place.

use std::sync::Arc;

use tracing::trace;

use crate::chain::Chain;
use crate::continuation::{Continuation, ContinuationId};
use crate::engine;
use crate::frame::{Frame, HandlerRecord, StackSlot};
use crate::native::NativeCtx;
use crate::program::Op;
use crate::sync::{MonitorId, MonitorRegistry};
use crate::value::{Object, Value};
use crate::{EngineError, EngineResult};

/// Execute until the live stack drops back to `floor` slots.
///
/// `floor == 0` is a top-level mount; a native re-entry passes the depth
/// just below its callee frame so control hands back across the barrier.
pub(crate) fn run_chain(chain: &mut Chain<'_>, floor: usize) -> EngineResult<()> {
    while chain.live.len() > floor {
        match chain.live.last() {
            Some(StackSlot::Frame(_)) => step(chain, floor)?,
            Some(StackSlot::Entry(_)) => engine::thaw_next(chain)?,
            Some(StackSlot::NativeBarrier(_)) => {
                panic!("native barrier on top of a running chain")
            }
            None => break,
        }
    }
    Ok(())
}

fn step(chain: &mut Chain<'_>, floor: usize) -> EngineResult<()> {
    let (owner, method_id, ip) = {
        let frame = chain.top_frame();
        (frame.owner, frame.method, frame.ip)
    };
    let cont = Arc::clone(chain.cont_by_id(owner).expect("frame owner is mounted"));
    let program = Arc::clone(cont.program());
    let op = match program.method(method_id)?.code.get(ip).copied() {
        Some(op) => op,
        // Fell off the end of the body: implicit void return.
        None => return do_return(chain, None, floor),
    };
    chain.top_frame_mut().ip = ip + 1;

    match op {
        Op::ConstNull => chain.top_frame_mut().push_operand(Value::Null),
        Op::ConstBool(b) => chain.top_frame_mut().push_operand(Value::Bool(b)),
        Op::ConstI32(n) => chain.top_frame_mut().push_operand(Value::I32(n)),
        Op::ConstI64(n) => chain.top_frame_mut().push_operand(Value::I64(n)),
        Op::ConstF64(n) => chain.top_frame_mut().push_operand(Value::F64(n)),
        Op::LoadLocal(n) => {
            let value = chain.top_frame().load_local(n)?;
            chain.top_frame_mut().push_operand(value);
        }
        Op::StoreLocal(n) => {
            let value = chain.top_frame_mut().pop_operand()?;
            chain.top_frame_mut().store_local(n, value)?;
        }
        Op::Pop => {
            chain.top_frame_mut().pop_operand()?;
        }
        Op::Dup => {
            let value = chain
                .top_frame()
                .operands
                .last()
                .cloned()
                .ok_or(EngineError::StackUnderflow)?;
            chain.top_frame_mut().push_operand(value);
        }
        Op::Add => binary(chain, Value::add)?,
        Op::Sub => binary(chain, Value::sub)?,
        Op::Mul => binary(chain, Value::mul)?,
        Op::Lt => binary(chain, Value::lt)?,
        Op::Branch(target) => chain.top_frame_mut().ip = target,
        Op::BranchIfZero(target) => {
            let cond = chain.top_frame_mut().pop_operand()?.as_condition()?;
            if !cond {
                chain.top_frame_mut().ip = target;
            }
        }
        Op::Call { method, argc } => {
            let args = pop_args(chain, argc)?;
            let callee = program.method(method)?;
            let repr = chain.carrier.code().current_repr(method);
            let frame = Frame::for_call(method, callee, args, repr, owner);
            chain.push_slot(StackSlot::Frame(frame))?;
        }
        Op::CallNative { native, argc } => {
            let args = pop_args(chain, argc)?;
            let func = chain.carrier.natives().get(native)?;
            chain.push_slot(StackSlot::NativeBarrier(native))?;
            let result = {
                let mut ctx = NativeCtx { chain, args };
                func(&mut ctx)
            };
            match result {
                Ok(value) => {
                    pop_barrier(chain);
                    chain.top_frame_mut().push_operand(value);
                }
                // A managed throw inside the native resumes unwinding at
                // the call site instead of surfacing as an engine error.
                Err(EngineError::Uncaught { value, .. }) => {
                    pop_barrier(chain);
                    return do_throw(chain, value, floor);
                }
                Err(err) => return Err(err),
            }
        }
        Op::Return => {
            let value = chain.top_frame_mut().pop_operand()?;
            return do_return(chain, Some(value), floor);
        }
        Op::ReturnVoid => return do_return(chain, None, floor),
        Op::Yield { scope } => return do_yield(chain, scope, &program, floor),
        Op::RunCont => {
            let value = chain.top_frame_mut().pop_operand()?;
            let child = Arc::clone(value.as_continuation()?);
            chain.enter(child)?;
        }
        Op::MonitorEnter { monitor } => {
            let id = program.monitor(monitor)?;
            MonitorRegistry::global().enter(id, owner)?;
            chain.top_frame_mut().monitors.push(id);
        }
        Op::MonitorExit { monitor } => {
            let id = program.monitor(monitor)?;
            MonitorRegistry::global().exit(id, owner);
            let frame = chain.top_frame_mut();
            if let Some(pos) = frame.monitors.iter().rposition(|&m| m == id) {
                frame.monitors.remove(pos);
            }
        }
        Op::Pin => {
            cont.pin();
            chain.top_frame_mut().pins_taken += 1;
        }
        Op::Unpin => {
            cont.unpin();
            chain.top_frame_mut().pins_taken -= 1;
        }
        Op::Throw => {
            let value = chain.top_frame_mut().pop_operand()?;
            return do_throw(chain, value, floor);
        }
        Op::TryEnter { catch } => {
            let frame = chain.top_frame_mut();
            let record = HandlerRecord {
                catch_ip: catch,
                operand_depth: frame.operands.len(),
                monitor_count: frame.monitors.len(),
                pins_taken: frame.pins_taken,
            };
            frame.handlers.push(record);
        }
        Op::TryExit => {
            chain.top_frame_mut().handlers.pop();
        }
        Op::New { class } => {
            let class = program.class(class)?;
            let obj = Object::new(class);
            chain.top_frame_mut().push_operand(Value::Ref(obj));
        }
        Op::GetField(n) => {
            let target = chain.top_frame_mut().pop_operand()?;
            let value = target.as_ref_value()?.get_field(n)?;
            chain.top_frame_mut().push_operand(value);
        }
        Op::PutField(n) => {
            let value = chain.top_frame_mut().pop_operand()?;
            let target = chain.top_frame_mut().pop_operand()?;
            target.as_ref_value()?.put_field(n, value)?;
        }
    }
    Ok(())
}

fn binary(
    chain: &mut Chain<'_>,
    op: fn(&Value, &Value) -> EngineResult<Value>,
) -> EngineResult<()> {
    let b = chain.top_frame_mut().pop_operand()?;
    let a = chain.top_frame_mut().pop_operand()?;
    let result = op(&a, &b)?;
    chain.top_frame_mut().push_operand(result);
    Ok(())
}

fn pop_args(chain: &mut Chain<'_>, argc: usize) -> EngineResult<Vec<Value>> {
    let mut args = Vec::with_capacity(argc);
    for _ in 0..argc {
        args.push(chain.top_frame_mut().pop_operand()?);
    }
    args.reverse();
    Ok(args)
}

fn pop_barrier(chain: &mut Chain<'_>) {
    match chain.live.pop() {
        Some(StackSlot::NativeBarrier(_)) => {}
        _ => panic!("native call left the chain unbalanced"),
    }
}

/// Yield to the innermost mounted continuation of the named scope.
///
/// The successful-resume result (`true`) is pushed *before* freezing so
/// the yielding frame replays it naturally when thawed; a pinned region
/// swaps it for `false` and carries on without suspending anything.
fn do_yield(
    chain: &mut Chain<'_>,
    scope_slot: usize,
    program: &crate::program::Program,
    floor: usize,
) -> EngineResult<()> {
    let scope = program.scope(scope_slot)?.clone();
    let target = chain.find_scope(&scope).ok_or_else(|| {
        EngineError::TypeError(format!("{scope:?} is not mounted on this chain"))
    })?;

    chain.top_frame_mut().push_operand(Value::Bool(true));
    let outcome = freeze_with_rollback(chain, target)?;
    if let Some(reason) = outcome {
        trace!(%reason, "yield refused");
        let frame = chain.top_frame_mut();
        frame.pop_operand()?;
        frame.push_operand(Value::Bool(false));
        return Ok(());
    }

    // The region is gone. Reveal the frame below the retired entry —
    // thawing if lazy restoration left it frozen — and hand it the
    // not-yet-done verdict, or fall out entirely at the floor.
    loop {
        if chain.live.len() <= floor {
            return Ok(());
        }
        match chain.live.last() {
            Some(StackSlot::Frame(_)) => {
                chain.top_frame_mut().push_operand(Value::Bool(false));
                return Ok(());
            }
            Some(StackSlot::Entry(_)) => engine::thaw_next(chain)?,
            Some(StackSlot::NativeBarrier(_)) => {
                panic!("yield resolved into a native barrier")
            }
            None => return Ok(()),
        }
    }
}

fn freeze_with_rollback(
    chain: &mut Chain<'_>,
    target: usize,
) -> EngineResult<Option<crate::pinning::PinReason>> {
    match engine::freeze_yield(chain, target) {
        Ok(outcome) => Ok(outcome),
        Err(err) => {
            // Storage pre-checks fail before anything moves; take back
            // the speculative resume result.
            chain.top_frame_mut().pop_operand()?;
            Err(err)
        }
    }
}

/// Pop the returning frame and deliver `retval` to whatever the pop
/// reveals: the caller frame, a frozen remainder to thaw first, or an
/// entry marker whose continuation just completed.
fn do_return(chain: &mut Chain<'_>, retval: Option<Value>, floor: usize) -> EngineResult<()> {
    let mut retval = retval;
    let frame = match chain.live.pop() {
        Some(StackSlot::Frame(f)) => f,
        _ => panic!("return without a frame on top of the chain"),
    };
    chain.release_frame_effects(&frame);

    loop {
        if chain.live.len() == floor {
            chain.native_return = retval;
            return Ok(());
        }
        enum Revealed {
            Caller,
            Frozen,
            Completed(Arc<Continuation>),
        }
        let revealed = match chain.live.last() {
            Some(StackSlot::Frame(_)) => Revealed::Caller,
            Some(StackSlot::Entry(c)) => {
                if engine::has_pending(c) {
                    Revealed::Frozen
                } else {
                    Revealed::Completed(Arc::clone(c))
                }
            }
            Some(StackSlot::NativeBarrier(_)) => {
                panic!("return into a native barrier above its floor")
            }
            None => unreachable!("floor check bounds the pop"),
        };
        match revealed {
            Revealed::Caller => {
                if let Some(value) = retval {
                    chain.top_frame_mut().push_operand(value);
                }
                return Ok(());
            }
            Revealed::Frozen => engine::thaw_next(chain)?,
            Revealed::Completed(cont) => {
                // The frame that just returned was this continuation's
                // entry frame: retire the marker and report completion
                // at the mounting site.
                chain.live.pop();
                cont.finish(retval.take());
                chain.deactivate(cont.id());
                retval = Some(Value::Bool(true));
            }
        }
    }
}

/// Unwind with `exc`, giving every frame's innermost handler a chance,
/// thawing frozen remainders as the unwind reaches their markers, and
/// completing continuations whose entry it crosses.
fn do_throw(chain: &mut Chain<'_>, exc: Value, floor: usize) -> EngineResult<()> {
    let mut trace_frames: Vec<String> = Vec::new();

    loop {
        if chain.live.len() == floor {
            return Err(EngineError::Uncaught {
                value: exc,
                trace: trace_frames,
            });
        }
        enum Unwind {
            Handler(HandlerRecord, ContinuationId),
            Discard,
            Frozen,
            Completed(Arc<Continuation>),
        }
        let action = match chain.live.last() {
            Some(StackSlot::Frame(f)) => match f.handlers.last() {
                Some(h) => Unwind::Handler(*h, f.owner),
                None => Unwind::Discard,
            },
            Some(StackSlot::Entry(c)) => {
                if engine::has_pending(c) {
                    Unwind::Frozen
                } else {
                    Unwind::Completed(Arc::clone(c))
                }
            }
            Some(StackSlot::NativeBarrier(_)) => {
                panic!("unwind into a native barrier above its floor")
            }
            None => unreachable!("floor check bounds the unwind"),
        };
        match action {
            Unwind::Handler(handler, owner) => {
                // Roll the frame back to its state at handler install:
                // operand depth, monitor holdings, and pin deltas.
                let released: Vec<MonitorId> = {
                    let frame = chain.top_frame_mut();
                    frame.handlers.pop();
                    frame.operands.truncate(handler.operand_depth);
                    frame.monitors.split_off(handler.monitor_count)
                };
                for monitor in released.into_iter().rev() {
                    MonitorRegistry::global().exit(monitor, owner);
                }
                let delta = chain.top_frame().pins_taken - handler.pins_taken;
                if delta != 0 {
                    if let Some(cont) = chain.cont_by_id(owner) {
                        cont.adjust_pins(-delta);
                    }
                }
                let frame = chain.top_frame_mut();
                frame.pins_taken = handler.pins_taken;
                frame.ip = handler.catch_ip;
                frame.push_operand(exc);
                return Ok(());
            }
            Unwind::Discard => {
                let frame = match chain.live.pop() {
                    Some(StackSlot::Frame(f)) => f,
                    _ => unreachable!(),
                };
                trace_frames.push(method_name(chain, &frame));
                chain.release_frame_effects(&frame);
            }
            Unwind::Frozen => engine::thaw_next(chain)?,
            Unwind::Completed(cont) => {
                // The exception escapes this continuation's entry point:
                // it completes without a result and the unwind carries
                // on through the frames that mounted it.
                chain.live.pop();
                cont.finish(None);
                chain.deactivate(cont.id());
            }
        }
    }
}

fn method_name(chain: &Chain<'_>, frame: &Frame) -> String {
    chain
        .cont_by_id(frame.owner)
        .and_then(|cont| cont.program().method(frame.method).ok().map(|m| m.name.clone()))
        .unwrap_or_else(|| format!("method#{}", frame.method))
}
