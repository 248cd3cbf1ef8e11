//! Continuation scopes: identity tokens naming a yield target

use std::fmt;
use std::sync::Arc;

/// An opaque identity tag naming a continuation as a yield target.
///
/// Scopes compare by identity, not by name: two scopes created with the same
/// debug name are distinct targets. Cloning shares identity, so a scope can
/// be handed to both the continuation constructor and the program that
/// yields to it.
#[derive(Clone)]
pub struct ContinuationScope {
    inner: Arc<ScopeInner>,
}

struct ScopeInner {
    name: Option<String>,
}

impl ContinuationScope {
    /// Create an anonymous scope.
    pub fn new() -> Self {
        ContinuationScope {
            inner: Arc::new(ScopeInner { name: None }),
        }
    }

    /// Create a scope with a debug name.
    pub fn named(name: &str) -> Self {
        ContinuationScope {
            inner: Arc::new(ScopeInner {
                name: Some(name.to_string()),
            }),
        }
    }

    /// The debug name, if one was given.
    pub fn name(&self) -> Option<&str> {
        self.inner.name.as_deref()
    }
}

impl Default for ContinuationScope {
    fn default() -> Self {
        Self::new()
    }
}

impl PartialEq for ContinuationScope {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for ContinuationScope {}

impl fmt::Debug for ContinuationScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "ContinuationScope({name})"),
            None => write!(f, "ContinuationScope({:p})", Arc::as_ptr(&self.inner)),
        }
    }
}
