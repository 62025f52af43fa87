//! The `Value` enum and its equality rules.
//!
//! Values serve double duty: they are what the VM pushes and pops at runtime,
//! and they are the keys of the assembler's constant pool. The pool
//! deduplicates by `(value, concrete type)`, which the enum gives us for free:
//! `Int(1)`, `Float(1.0)` and `Bool(true)` are different variants and never
//! share a slot.
//!
//! Two variants deliberately compare by *identity* instead of content:
//!
//! - `List` is the mutable container. Two lists with equal contents must not
//!   collapse into one constant-pool slot, otherwise mutating one would alias
//!   the other.
//! - `Native` functions have no meaningful content equality at all.
//!
//! `Float` compares and hashes by bit pattern so the pool map stays coherent
//! for `0.0` vs `-0.0` and for NaN payloads.

use core::fmt;
use core::hash::{Hash, Hasher};
use std::sync::Arc;

use crate::vm::{Code, ExecutionError};

/// Signature of a native function callable from generated code.
///
/// `args` are the positional arguments in call order; `kwargs` are the
/// keyword pairs, in the order they were pushed.
pub type NativeImpl =
    fn(args: &[Value], kwargs: &[(Arc<str>, Value)]) -> Result<Value, ExecutionError>;

/// A named native function.
pub struct NativeFunction {
    pub name: Arc<str>,
    pub func: NativeImpl,
}

/// Shared handle to a native function. Compares by pointer identity.
pub type NativeFn = Arc<NativeFunction>;

impl NativeFunction {
    pub fn new(name: &str, func: NativeImpl) -> NativeFn {
        Arc::new(NativeFunction {
            name: Arc::from(name),
            func,
        })
    }
}

impl fmt::Debug for NativeFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<native {}>", self.name)
    }
}

/// A runtime value.
#[derive(Clone)]
pub enum Value {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Arc<str>),
    /// Immutable sequence; compares by content.
    Tuple(Arc<[Value]>),
    /// Mutable sequence; compares by identity (see module docs).
    List(Arc<Vec<Value>>),
    /// A sealed code artifact.
    Code(Arc<Code>),
    /// Native function; compares by identity.
    Native(NativeFn),
}

impl Value {
    pub fn str(s: &str) -> Value {
        Value::Str(Arc::from(s))
    }

    pub fn tuple(items: Vec<Value>) -> Value {
        Value::Tuple(items.into())
    }

    pub fn list(items: Vec<Value>) -> Value {
        Value::List(Arc::new(items))
    }

    /// Truth value, matching the VM's conditional jumps.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::None => false,
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Float(x) => *x != 0.0,
            Value::Str(s) => !s.is_empty(),
            Value::Tuple(t) => !t.is_empty(),
            Value::List(l) => !l.is_empty(),
            Value::Code(_) | Value::Native(_) => true,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Short type tag used in error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::None => "none",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "str",
            Value::Tuple(_) => "tuple",
            Value::List(_) => "list",
            Value::Code(_) => "code",
            Value::Native(_) => "native",
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::None, Value::None) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            // Bit equality: keeps the pool map's Eq/Hash contract intact.
            (Value::Float(a), Value::Float(b)) => a.to_bits() == b.to_bits(),
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Tuple(a), Value::Tuple(b)) => a == b,
            (Value::List(a), Value::List(b)) => Arc::ptr_eq(a, b),
            (Value::Code(a), Value::Code(b)) => Arc::ptr_eq(a, b),
            (Value::Native(a), Value::Native(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        core::mem::discriminant(self).hash(state);
        match self {
            Value::None => {}
            Value::Bool(b) => b.hash(state),
            Value::Int(i) => i.hash(state),
            Value::Float(x) => x.to_bits().hash(state),
            Value::Str(s) => s.hash(state),
            Value::Tuple(t) => t.hash(state),
            Value::List(l) => (Arc::as_ptr(l) as usize).hash(state),
            Value::Code(c) => (Arc::as_ptr(c) as usize).hash(state),
            Value::Native(n) => (Arc::as_ptr(n) as usize).hash(state),
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::None => write!(f, "none"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{:?}", x),
            Value::Str(s) => write!(f, "{:?}", s),
            Value::Tuple(t) => {
                write!(f, "(")?;
                for (i, v) in t.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{:?}", v)?;
                }
                write!(f, ")")
            }
            Value::List(l) => {
                write!(f, "[")?;
                for (i, v) in l.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{:?}", v)?;
                }
                write!(f, "]")
            }
            Value::Code(c) => write!(f, "<code {}>", c.name),
            Value::Native(n) => write!(f, "{:?}", n),
        }
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Value::Float(x)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::str(s)
    }
}
