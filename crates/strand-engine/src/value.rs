//! Typed values held in frame locals and operand stacks
//!
//! A [`Value`] is a single local/operand slot: integral, floating, an object
//! reference, or a continuation handle. Object references are `Arc`-backed;
//! reachability of an object (and transitively its class) follows ordinary
//! Rust ownership, which is what the GC root integration leans on.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::continuation::Continuation;
use crate::{EngineError, EngineResult};

/// Shared handle to a heap object.
pub type ObjRef = Arc<Object>;

/// A single typed slot value.
#[derive(Debug, Clone)]
pub enum Value {
    /// Absent/uninitialized slot.
    Null,
    /// Boolean.
    Bool(bool),
    /// 32-bit integer.
    I32(i32),
    /// 64-bit integer.
    I64(i64),
    /// 64-bit float.
    F64(f64),
    /// Object reference.
    Ref(ObjRef),
    /// Continuation handle (enterable via `RunCont`).
    Cont(Arc<Continuation>),
}

impl Value {
    /// Null slot value.
    pub fn null() -> Self {
        Value::Null
    }

    /// Is this slot an object reference?
    pub fn is_ref(&self) -> bool {
        matches!(self, Value::Ref(_))
    }

    /// Extract an `i32`, or a type error.
    pub fn as_i32(&self) -> EngineResult<i32> {
        match self {
            Value::I32(v) => Ok(*v),
            other => Err(EngineError::TypeError(format!("expected i32, got {other:?}"))),
        }
    }

    /// Extract an `i64`, or a type error.
    pub fn as_i64(&self) -> EngineResult<i64> {
        match self {
            Value::I64(v) => Ok(*v),
            other => Err(EngineError::TypeError(format!("expected i64, got {other:?}"))),
        }
    }

    /// Extract an `f64`, or a type error.
    pub fn as_f64(&self) -> EngineResult<f64> {
        match self {
            Value::F64(v) => Ok(*v),
            other => Err(EngineError::TypeError(format!("expected f64, got {other:?}"))),
        }
    }

    /// Extract an object reference, or a type error.
    pub fn as_ref_value(&self) -> EngineResult<&ObjRef> {
        match self {
            Value::Ref(obj) => Ok(obj),
            Value::Null => Err(EngineError::TypeError("null reference".to_string())),
            other => Err(EngineError::TypeError(format!("expected reference, got {other:?}"))),
        }
    }

    /// Extract a continuation handle, or a type error.
    pub fn as_continuation(&self) -> EngineResult<&Arc<Continuation>> {
        match self {
            Value::Cont(c) => Ok(c),
            other => Err(EngineError::TypeError(format!(
                "expected continuation, got {other:?}"
            ))),
        }
    }

    /// Branch condition: `Bool` directly, integers by zero test.
    pub fn as_condition(&self) -> EngineResult<bool> {
        match self {
            Value::Bool(b) => Ok(*b),
            Value::I32(v) => Ok(*v != 0),
            Value::I64(v) => Ok(*v != 0),
            other => Err(EngineError::TypeError(format!(
                "expected condition, got {other:?}"
            ))),
        }
    }

    /// Wrapping addition on matching numeric kinds.
    pub fn add(a: &Value, b: &Value) -> EngineResult<Value> {
        match (a, b) {
            (Value::I32(x), Value::I32(y)) => Ok(Value::I32(x.wrapping_add(*y))),
            (Value::I64(x), Value::I64(y)) => Ok(Value::I64(x.wrapping_add(*y))),
            (Value::F64(x), Value::F64(y)) => Ok(Value::F64(x + y)),
            _ => Err(EngineError::TypeError(format!("add on {a:?} and {b:?}"))),
        }
    }

    /// Wrapping subtraction on matching numeric kinds.
    pub fn sub(a: &Value, b: &Value) -> EngineResult<Value> {
        match (a, b) {
            (Value::I32(x), Value::I32(y)) => Ok(Value::I32(x.wrapping_sub(*y))),
            (Value::I64(x), Value::I64(y)) => Ok(Value::I64(x.wrapping_sub(*y))),
            (Value::F64(x), Value::F64(y)) => Ok(Value::F64(x - y)),
            _ => Err(EngineError::TypeError(format!("sub on {a:?} and {b:?}"))),
        }
    }

    /// Wrapping multiplication on matching numeric kinds.
    pub fn mul(a: &Value, b: &Value) -> EngineResult<Value> {
        match (a, b) {
            (Value::I32(x), Value::I32(y)) => Ok(Value::I32(x.wrapping_mul(*y))),
            (Value::I64(x), Value::I64(y)) => Ok(Value::I64(x.wrapping_mul(*y))),
            (Value::F64(x), Value::F64(y)) => Ok(Value::F64(x * y)),
            _ => Err(EngineError::TypeError(format!("mul on {a:?} and {b:?}"))),
        }
    }

    /// Less-than on matching numeric kinds.
    pub fn lt(a: &Value, b: &Value) -> EngineResult<Value> {
        match (a, b) {
            (Value::I32(x), Value::I32(y)) => Ok(Value::Bool(x < y)),
            (Value::I64(x), Value::I64(y)) => Ok(Value::Bool(x < y)),
            (Value::F64(x), Value::F64(y)) => Ok(Value::Bool(x < y)),
            _ => Err(EngineError::TypeError(format!("lt on {a:?} and {b:?}"))),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::I32(a), Value::I32(b)) => a == b,
            (Value::I64(a), Value::I64(b)) => a == b,
            (Value::F64(a), Value::F64(b)) => a.to_bits() == b.to_bits(),
            (Value::Ref(a), Value::Ref(b)) => Arc::ptr_eq(a, b),
            (Value::Cont(a), Value::Cont(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

/// A class definition. Objects keep their class alive; once no object (and
/// no frozen frame) references a class, its weak entry in the class table
/// becomes collectible.
#[derive(Debug)]
pub struct Class {
    name: String,
    field_count: usize,
}

impl Class {
    /// Define a class and register it with the global class table.
    pub fn define(name: &str, field_count: usize) -> Arc<Class> {
        let class = Arc::new(Class {
            name: name.to_string(),
            field_count,
        });
        crate::gc::ClassTable::global().register(&class);
        class
    }

    /// Class name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of instance fields.
    pub fn field_count(&self) -> usize {
        self.field_count
    }
}

/// A heap object: a class reference plus typed fields.
#[derive(Debug)]
pub struct Object {
    class: Arc<Class>,
    fields: Mutex<Vec<Value>>,
}

impl Object {
    /// Allocate an instance with all fields null.
    pub fn new(class: &Arc<Class>) -> ObjRef {
        Arc::new(Object {
            class: Arc::clone(class),
            fields: Mutex::new(vec![Value::Null; class.field_count()]),
        })
    }

    /// The object's class.
    pub fn class(&self) -> &Arc<Class> {
        &self.class
    }

    /// Read a field by index.
    pub fn get_field(&self, index: usize) -> EngineResult<Value> {
        self.fields
            .lock()
            .get(index)
            .cloned()
            .ok_or_else(|| EngineError::TypeError(format!("field index {index} out of range")))
    }

    /// Write a field by index.
    pub fn put_field(&self, index: usize, value: Value) -> EngineResult<()> {
        let mut fields = self.fields.lock();
        match fields.get_mut(index) {
            Some(slot) => {
                *slot = value;
                Ok(())
            }
            None => Err(EngineError::TypeError(format!(
                "field index {index} out of range"
            ))),
        }
    }
}
