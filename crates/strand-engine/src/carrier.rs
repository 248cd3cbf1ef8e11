//! Carrier-thread configuration
//!
//! A [`Carrier`] bundles what one carrier thread needs to execute
//! continuations: the live-stack bound, the thaw batching knob, the code
//! source collaborator, and the native function registry. It is cheap to
//! build per thread; suspended continuations migrate freely between
//! carriers.

use std::sync::Arc;

use crate::native::NativeRegistry;
use crate::program::{CodeSource, InterpretedOnly};

/// Tunables for one carrier.
#[derive(Debug, Clone)]
pub struct CarrierConfig {
    /// Maximum live stack slots. Thaw never restores past this bound;
    /// calls beyond it fail with [`crate::EngineError::StackOverflow`].
    pub live_stack_limit: usize,
    /// Restore at most this many records per thaw step, leaving the rest
    /// frozen until execution returns to the boundary. `None` restores
    /// whole regions at once (subject to the live stack bound).
    pub thaw_batch: Option<usize>,
}

impl Default for CarrierConfig {
    fn default() -> Self {
        CarrierConfig {
            live_stack_limit: 4096,
            thaw_batch: None,
        }
    }
}

/// Execution environment of one carrier thread.
pub struct Carrier {
    config: CarrierConfig,
    code: Arc<dyn CodeSource>,
    natives: Arc<NativeRegistry>,
}

impl Carrier {
    /// A carrier with default config, an interpreted-only code source, and
    /// no natives.
    pub fn new() -> Self {
        Carrier {
            config: CarrierConfig::default(),
            code: Arc::new(InterpretedOnly),
            natives: Arc::new(NativeRegistry::new()),
        }
    }

    /// Replace the configuration.
    pub fn with_config(mut self, config: CarrierConfig) -> Self {
        self.config = config;
        self
    }

    /// Install a code source collaborator.
    pub fn with_code(mut self, code: Arc<dyn CodeSource>) -> Self {
        self.code = code;
        self
    }

    /// Install a native function registry.
    pub fn with_natives(mut self, natives: Arc<NativeRegistry>) -> Self {
        self.natives = natives;
        self
    }

    /// The configuration.
    pub fn config(&self) -> &CarrierConfig {
        &self.config
    }

    /// The code source collaborator.
    pub fn code(&self) -> &Arc<dyn CodeSource> {
        &self.code
    }

    /// The native function registry.
    pub fn natives(&self) -> &Arc<NativeRegistry> {
        &self.natives
    }
}

impl Default for Carrier {
    fn default() -> Self {
        Self::new()
    }
}
