//! Native (non-managed) functions
//!
//! Natives run on the real Rust stack above a [`crate::frame::StackSlot::
//! NativeBarrier`]. They may call back into managed methods through
//! [`NativeCtx::call`], but a region containing a native barrier can never
//! be frozen — that is exactly what [`crate::pinning::PinReason::Native`]
//! reports. This mirrors the registry-of-handlers shape the engine's
//! callers expect: register once, reference by id from `CallNative` ops.

use std::sync::Arc;

use rustc_hash::FxHashMap;

use crate::chain::Chain;
use crate::frame::{Frame, StackSlot};
use crate::interp;
use crate::program::MethodId;
use crate::scope::ContinuationScope;
use crate::value::Value;
use crate::walker::{self, FrameInfo};
use crate::{EngineError, EngineResult};

/// A registered native function.
pub type NativeFn = Arc<dyn Fn(&mut NativeCtx<'_, '_>) -> EngineResult<Value> + Send + Sync>;

/// Registry of native functions, keyed by the id `CallNative` ops carry.
#[derive(Default)]
pub struct NativeRegistry {
    natives: Vec<(String, NativeFn)>,
    names: FxHashMap<String, usize>,
}

impl NativeRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a native under `name`; returns its id.
    pub fn register<F>(&mut self, name: &str, f: F) -> usize
    where
        F: Fn(&mut NativeCtx<'_, '_>) -> EngineResult<Value> + Send + Sync + 'static,
    {
        let id = self.natives.len();
        self.natives.push((name.to_string(), Arc::new(f)));
        self.names.insert(name.to_string(), id);
        id
    }

    /// Resolve a native by id.
    pub fn get(&self, id: usize) -> EngineResult<NativeFn> {
        self.natives
            .get(id)
            .map(|(_, f)| Arc::clone(f))
            .ok_or(EngineError::UnknownNative(id))
    }

    /// Name of a registered native.
    pub fn name(&self, id: usize) -> Option<&str> {
        self.natives.get(id).map(|(n, _)| n.as_str())
    }

    /// Look up an id by name.
    pub fn lookup(&self, name: &str) -> Option<usize> {
        self.names.get(name).copied()
    }
}

/// What a native function sees while executing.
pub struct NativeCtx<'a, 'c> {
    pub(crate) chain: &'a mut Chain<'c>,
    pub(crate) args: Vec<Value>,
}

impl NativeCtx<'_, '_> {
    /// Arguments popped for this native call.
    pub fn args(&self) -> &[Value] {
        &self.args
    }

    /// Synchronously execute a managed method of the current
    /// continuation's program and return its result.
    ///
    /// Frames pushed here sit above the native barrier: any yield they
    /// attempt sees a pinned region and fails with the Native reason
    /// rather than unwinding through this Rust frame.
    pub fn call(&mut self, method: MethodId, args: Vec<Value>) -> EngineResult<Value> {
        let cont = Arc::clone(self.chain.current());
        let program = Arc::clone(cont.program());
        let callee = program.method(method)?;
        let repr = self.chain.carrier.code().current_repr(method);
        let frame = Frame::for_call(method, callee, args, repr, cont.id());

        let floor = self.chain.live.len();
        self.chain.push_slot(StackSlot::Frame(frame))?;
        interp::run_chain(self.chain, floor)?;
        Ok(self.chain.native_return.take().unwrap_or(Value::Null))
    }

    /// Walk the live chain from the innermost frame outward, optionally
    /// bounded at `scope`'s entry.
    pub fn walk(&self, scope: Option<&ContinuationScope>) -> Vec<FrameInfo> {
        walker::walk_live(self.chain, scope)
    }
}
