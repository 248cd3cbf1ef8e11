//! Strand Continuation Engine
//!
//! This crate implements stackful, one-shot, multi-prompt continuations:
//! - **Scopes**: Nesting prompts a yield can target (`scope` module)
//! - **Freeze/Thaw**: Moving live frames into and out of per-continuation
//!   stack storage, with fast (bulk, representation-preserving) and slow
//!   (per-frame, re-derived) strategies (`engine` module)
//! - **Pinning**: Held monitors, critical sections, and native frames
//!   refuse a yield instead of capturing unsound state (`pinning` module)
//! - **Walking**: Frame iteration that is transparent across nesting and
//!   lazy restoration (`walker` module)
//! - **GC hooks**: Root scanning, chunk barriers, and weak class
//!   registration (`gc` module)
//!
//! # Example
//!
//! ```rust,ignore
//! use strand_engine::{Carrier, Continuation, ContinuationScope, Program};
//!
//! let scope = ContinuationScope::named("worker");
//! let program = build_program(&scope);
//! let cont = Continuation::new(scope, program, entry, vec![]);
//!
//! let carrier = Carrier::new();
//! while !cont.is_done() {
//!     cont.run(&carrier)?;
//! }
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

use thiserror::Error;

pub mod carrier;
pub mod chunk;
pub mod continuation;
pub mod frame;
pub mod gc;
pub mod native;
pub mod pinning;
pub mod program;
pub mod scope;
pub mod sync;
pub mod value;
pub mod walker;

mod chain;
mod engine;
mod interp;

pub use carrier::{Carrier, CarrierConfig};
pub use chunk::{StackChunk, DEFAULT_CHUNK_CAPACITY};
pub use continuation::{
    ContState, ContStats, Continuation, ContinuationId, PinGuard, PinnedHandler,
};
pub use frame::{Frame, FrameRecord, HandlerRecord, Record, StackSlot};
pub use gc::{ClassTable, Gc, RootVisitor};
pub use native::{NativeCtx, NativeFn, NativeRegistry};
pub use pinning::PinReason;
pub use program::{
    CodeSource, InterpretedOnly, Method, MethodId, Op, Program, ReprTag, TieredCodeSource,
};
pub use scope::ContinuationScope;
pub use sync::{MonitorId, MonitorRegistry};
pub use value::{Class, ObjRef, Object, Value};
pub use walker::{FrameInfo, StackWalker};

/// Errors surfaced by the engine.
///
/// These are host-level failures: a managed throw only becomes
/// [`EngineError::Uncaught`] once it unwinds past the outermost frame of
/// a mount.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The live stack hit the carrier's configured limit.
    #[error("live stack limit exceeded")]
    StackOverflow,

    /// An operand was popped from an empty operand stack.
    #[error("operand stack underflow")]
    StackUnderflow,

    /// A value had the wrong kind for the operation.
    #[error("type error: {0}")]
    TypeError(String),

    /// A method id had no entry in its program.
    #[error("unknown method id {0}")]
    UnknownMethod(usize),

    /// A native id had no entry in the carrier's registry.
    #[error("unknown native id {0}")]
    UnknownNative(usize),

    /// A freeze would not fit in a continuation's stack storage. Nothing
    /// was captured; the chain is untouched.
    #[error("stack storage exhausted: {needed} records needed, {capacity} available")]
    StorageExhausted {
        /// Records the chunk would have to hold.
        needed: usize,
        /// The chunk's fixed capacity.
        capacity: usize,
    },

    /// A monitor was entered while another continuation held it.
    #[error("monitor {} is held by another continuation", .0.as_u64())]
    MonitorContended(MonitorId),

    /// A managed exception unwound past the outermost frame.
    #[error("uncaught exception: {value:?}")]
    Uncaught {
        /// The thrown value.
        value: Value,
        /// Method names unwound through, innermost first.
        trace: Vec<String>,
    },
}

/// Result alias used throughout the engine.
pub type EngineResult<T> = Result<T, EngineError>;
