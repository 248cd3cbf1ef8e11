//! Programs, methods, and the compiler collaborator boundary
//!
//! The engine does not own code generation. It executes [`Method`] bodies
//! (sequences of [`Op`]) and consults a [`CodeSource`] — the external
//! compiler/runtime collaborator — for everything about a method's current
//! *representation*: whether a captured [`ReprTag`] is still valid, and how
//! to re-derive a valid one when it is not (the deoptimization analogue).

use std::sync::Arc;

use dashmap::{DashMap, DashSet};
use rustc_hash::FxHashMap;

use crate::scope::ContinuationScope;
use crate::sync::MonitorId;
use crate::value::Class;
use crate::{EngineError, EngineResult};

/// Index of a method within its [`Program`].
pub type MethodId = usize;

/// One operation in a method body.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Op {
    /// Push null.
    ConstNull,
    /// Push a boolean constant.
    ConstBool(bool),
    /// Push an i32 constant.
    ConstI32(i32),
    /// Push an i64 constant.
    ConstI64(i64),
    /// Push an f64 constant.
    ConstF64(f64),
    /// Push local slot `n`.
    LoadLocal(usize),
    /// Pop into local slot `n`.
    StoreLocal(usize),
    /// Pop the top operand.
    Pop,
    /// Duplicate the top operand.
    Dup,
    /// Pop two operands, push their sum.
    Add,
    /// Pop two operands, push their difference.
    Sub,
    /// Pop two operands, push their product.
    Mul,
    /// Pop two operands, push `a < b`.
    Lt,
    /// Unconditional jump to an instruction offset.
    Branch(usize),
    /// Pop a condition; jump when it is false/zero.
    BranchIfZero(usize),
    /// Call a method with `argc` popped arguments.
    Call {
        /// Callee method id.
        method: MethodId,
        /// Number of arguments popped from the operand stack.
        argc: usize,
    },
    /// Call a registered native function with `argc` popped arguments.
    CallNative {
        /// Native id in the carrier's registry.
        native: usize,
        /// Number of arguments popped from the operand stack.
        argc: usize,
    },
    /// Return the top operand to the caller.
    Return,
    /// Return without a value.
    ReturnVoid,
    /// Attempt to yield to the scope in program slot `scope`; pushes the
    /// boolean outcome (`false` when the region was pinned).
    Yield {
        /// Index into the program's scope table.
        scope: usize,
    },
    /// Pop a continuation value and enter it on this carrier.
    RunCont,
    /// Acquire the monitor in program slot `monitor`.
    MonitorEnter {
        /// Index into the program's monitor table.
        monitor: usize,
    },
    /// Release the monitor in program slot `monitor`.
    MonitorExit {
        /// Index into the program's monitor table.
        monitor: usize,
    },
    /// Increment the current continuation's pin count.
    Pin,
    /// Decrement the current continuation's pin count.
    Unpin,
    /// Pop a value and throw it as an exception.
    Throw,
    /// Install an exception handler jumping to `catch` on throw.
    TryEnter {
        /// Handler instruction offset.
        catch: usize,
    },
    /// Remove the most recent exception handler.
    TryExit,
    /// Allocate an instance of the class in program slot `class`.
    New {
        /// Index into the program's class table.
        class: usize,
    },
    /// Pop an object reference, push field `n`.
    GetField(usize),
    /// Pop a value and an object reference, store the value in field `n`.
    PutField(usize),
}

/// A method body: named code plus its frame shape.
#[derive(Debug, Clone)]
pub struct Method {
    /// Qualified method name (what the stack walker reports).
    pub name: String,
    /// Number of leading locals filled from call arguments.
    pub param_count: usize,
    /// Total local slots, including parameters.
    pub local_count: usize,
    /// Instruction sequence.
    pub code: Vec<Op>,
}

/// A program: the unit of code a continuation's entry point comes from.
///
/// Scopes, monitors, and classes referenced by ops live in per-program
/// tables so that `Op` stays a plain copyable value.
#[derive(Debug, Default)]
pub struct Program {
    methods: Vec<Method>,
    names: FxHashMap<String, MethodId>,
    scopes: Vec<ContinuationScope>,
    monitors: Vec<MonitorId>,
    classes: Vec<Arc<Class>>,
}

impl Program {
    /// Create an empty program.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a method; returns its id.
    pub fn add_method(&mut self, method: Method) -> MethodId {
        let id = self.methods.len();
        self.names.insert(method.name.clone(), id);
        self.methods.push(method);
        id
    }

    /// Register a scope for use by `Yield` ops; returns its table slot.
    pub fn add_scope(&mut self, scope: ContinuationScope) -> usize {
        self.scopes.push(scope);
        self.scopes.len() - 1
    }

    /// Allocate a monitor for use by `MonitorEnter`/`MonitorExit` ops.
    pub fn add_monitor(&mut self) -> usize {
        self.monitors.push(MonitorId::new());
        self.monitors.len() - 1
    }

    /// Register a class for use by `New` ops; returns its table slot.
    pub fn add_class(&mut self, class: Arc<Class>) -> usize {
        self.classes.push(class);
        self.classes.len() - 1
    }

    /// Resolve a method by id.
    pub fn method(&self, id: MethodId) -> EngineResult<&Method> {
        self.methods.get(id).ok_or(EngineError::UnknownMethod(id))
    }

    /// Look up a method id by name.
    pub fn lookup(&self, name: &str) -> Option<MethodId> {
        self.names.get(name).copied()
    }

    /// Scope in table slot `slot`.
    pub fn scope(&self, slot: usize) -> EngineResult<&ContinuationScope> {
        self.scopes
            .get(slot)
            .ok_or_else(|| EngineError::TypeError(format!("scope slot {slot} out of range")))
    }

    /// Monitor in table slot `slot`.
    pub fn monitor(&self, slot: usize) -> EngineResult<MonitorId> {
        self.monitors
            .get(slot)
            .copied()
            .ok_or_else(|| EngineError::TypeError(format!("monitor slot {slot} out of range")))
    }

    /// Class in table slot `slot`.
    pub fn class(&self, slot: usize) -> EngineResult<&Arc<Class>> {
        self.classes
            .get(slot)
            .ok_or_else(|| EngineError::TypeError(format!("class slot {slot} out of range")))
    }
}

/// The representation a frame's code had when captured.
///
/// Owned by the collaborator: the engine only ever checks validity and asks
/// for a re-derivation. A compiled tag becomes stale when the collaborator
/// recompiles or invalidates that method while the frame is frozen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReprTag {
    /// Interpreted frame; always valid.
    Interpreted,
    /// Compiled frame at a specific compilation version.
    Compiled {
        /// Collaborator-assigned compilation version.
        version: u32,
    },
}

impl ReprTag {
    /// Is this a compiled representation?
    pub fn is_compiled(&self) -> bool {
        matches!(self, ReprTag::Compiled { .. })
    }
}

/// The compiler/runtime collaborator interface.
///
/// The engine calls this when creating frames, when deciding between the
/// bulk and per-frame freeze/thaw strategies, and when a captured tag turns
/// out to be stale at thaw time.
pub trait CodeSource: Send + Sync {
    /// Representation new frames of `method` should carry.
    fn current_repr(&self, method: MethodId) -> ReprTag;

    /// Is a previously captured tag still restorable as-is?
    fn is_valid(&self, method: MethodId, tag: ReprTag) -> bool;

    /// Produce a tag that is guaranteed valid (the deopt analogue). The
    /// result must satisfy `is_valid`.
    fn rederive(&self, method: MethodId) -> ReprTag;

    /// Is an on-stack replacement in flight for `method`? While true, the
    /// method has no single stable representation and freeze must resolve
    /// it via [`CodeSource::rederive`] before copying.
    fn osr_in_progress(&self, method: MethodId) -> bool;
}

/// Default collaborator: every method is interpreted, nothing ever goes
/// stale. This is what a carrier uses when no tiered source is installed.
#[derive(Debug, Default)]
pub struct InterpretedOnly;

impl CodeSource for InterpretedOnly {
    fn current_repr(&self, _method: MethodId) -> ReprTag {
        ReprTag::Interpreted
    }

    fn is_valid(&self, _method: MethodId, tag: ReprTag) -> bool {
        tag == ReprTag::Interpreted
    }

    fn rederive(&self, _method: MethodId) -> ReprTag {
        ReprTag::Interpreted
    }

    fn osr_in_progress(&self, _method: MethodId) -> bool {
        false
    }
}

/// A collaborator whose compile state can be driven externally.
///
/// This is the test-only compile-policy knob: it lets a harness compile a
/// method (so frames become bulk-movable), invalidate a compiled version
/// while frames referencing it are frozen, and flag in-flight OSR. It is
/// not part of the engine's contract.
#[derive(Debug, Default)]
pub struct TieredCodeSource {
    versions: DashMap<MethodId, u32>,
    invalidated: DashSet<(MethodId, u32)>,
    osr: DashSet<MethodId>,
}

impl TieredCodeSource {
    /// Create a source with every method interpreted.
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark `method` compiled; bumps its version and returns it.
    pub fn compile(&self, method: MethodId) -> u32 {
        let mut entry = self.versions.entry(method).or_insert(0);
        *entry += 1;
        *entry
    }

    /// Invalidate a specific compiled version of `method`. Frozen frames
    /// carrying that tag will be re-derived at thaw.
    pub fn invalidate(&self, method: MethodId, version: u32) {
        self.invalidated.insert((method, version));
    }

    /// Flag or clear in-flight OSR for `method`.
    pub fn set_osr(&self, method: MethodId, in_progress: bool) {
        if in_progress {
            self.osr.insert(method);
        } else {
            self.osr.remove(&method);
        }
    }
}

impl CodeSource for TieredCodeSource {
    fn current_repr(&self, method: MethodId) -> ReprTag {
        match self.versions.get(&method) {
            Some(v) if !self.invalidated.contains(&(method, *v)) => {
                ReprTag::Compiled { version: *v }
            }
            _ => ReprTag::Interpreted,
        }
    }

    fn is_valid(&self, method: MethodId, tag: ReprTag) -> bool {
        match tag {
            ReprTag::Interpreted => true,
            ReprTag::Compiled { version } => !self.invalidated.contains(&(method, version)),
        }
    }

    fn rederive(&self, _method: MethodId) -> ReprTag {
        ReprTag::Interpreted
    }

    fn osr_in_progress(&self, method: MethodId) -> bool {
        self.osr.contains(&method)
    }
}
