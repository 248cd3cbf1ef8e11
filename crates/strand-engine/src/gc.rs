//! GC integration points
//!
//! The engine does not collect anything itself — ownership does that.
//! What it provides is the contract a collector needs: root scanning
//! over captured frames ([`RootVisitor`]), post-cycle write barriers on
//! chunks a cycle has seen (forcing the slow freeze/thaw paths until
//! the chunk drains), and a weak class registry so classes kept alive
//! only by frozen frames unload when the last capture drops.

use std::sync::{Arc, Weak};

use dashmap::DashMap;
use once_cell::sync::Lazy;
use tracing::debug;

use crate::continuation::Continuation;
use crate::engine;
use crate::value::{Class, ObjRef};

/// Visitor handed every object reference reachable from a capture.
pub trait RootVisitor {
    /// Called once per reference slot; duplicates are the visitor's
    /// problem.
    fn visit_ref(&mut self, obj: &ObjRef);
}

impl<F> RootVisitor for F
where
    F: FnMut(&ObjRef),
{
    fn visit_ref(&mut self, obj: &ObjRef) {
        self(obj)
    }
}

/// Weak registry of defined classes.
///
/// Holding only [`Weak`] entries keeps the table from pinning classes:
/// a class stays loaded exactly as long as something — an object, a
/// program table, a frozen frame's values — still owns an `Arc` to it.
pub struct ClassTable {
    classes: DashMap<String, Weak<Class>>,
}

static CLASS_TABLE: Lazy<ClassTable> = Lazy::new(|| ClassTable {
    classes: DashMap::new(),
});

impl ClassTable {
    /// Process-wide table.
    pub fn global() -> &'static ClassTable {
        &CLASS_TABLE
    }

    pub(crate) fn register(&self, class: &Arc<Class>) {
        self.classes
            .insert(class.name().to_string(), Arc::downgrade(class));
    }

    /// Is the named class still owned by anyone?
    pub fn is_loaded(&self, name: &str) -> bool {
        self.classes
            .get(name)
            .map_or(false, |weak| weak.strong_count() > 0)
    }

    /// Upgrade the named class, if it is still owned.
    pub fn get(&self, name: &str) -> Option<Arc<Class>> {
        self.classes.get(name).and_then(|weak| weak.upgrade())
    }

    /// Drop table entries whose class has been unloaded.
    pub fn prune(&self) {
        self.classes.retain(|_, weak| weak.strong_count() > 0);
    }
}

/// A collection cycle over a set of continuation roots.
pub struct Gc;

impl Gc {
    /// Scan every reference reachable from `roots` and mark the chunks
    /// the cycle visited.
    ///
    /// Marked chunks answer [`crate::chunk::StackChunk::requires_barriers`]
    /// until they drain, which routes subsequent freezes and thaws of
    /// those captures through the per-frame slow path.
    pub fn run_cycle(roots: &[Arc<Continuation>], visitor: &mut dyn RootVisitor) {
        for cont in roots {
            cont.scan_roots(visitor);
            cont.inner().chunk.set_requires_barriers();
            for child in engine::collect_nested(cont) {
                child.inner().chunk.set_requires_barriers();
            }
        }
        ClassTable::global().prune();
        debug!(roots = roots.len(), "gc cycle");
    }
}
