//! Boxed dynamic values passed across invokers.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use crate::class::{ClassRef, builtins};

/// Shared handle to a heap object.
pub type ObjectRef = Arc<Object>;

/// An instance of a runtime class carrying arbitrary Rust state.
pub struct Object {
    class: ClassRef,
    data: Box<dyn Any + Send + Sync>,
}

impl Object {
    pub fn new(class: ClassRef, data: impl Any + Send + Sync) -> ObjectRef {
        Arc::new(Self {
            class,
            data: Box::new(data),
        })
    }

    pub fn class(&self) -> &ClassRef {
        &self.class
    }

    /// Borrow the object's state if it has type `T`.
    pub fn data<T: Any>(&self) -> Option<&T> {
        self.data.downcast_ref::<T>()
    }
}

impl fmt::Debug for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{:p}", self.class.qualified_name(), self)
    }
}

/// A dynamic value.
///
/// `Null` doubles as the result of routines declared `void`. The primitive
/// variants are the boxed forms of [`Primitive`](crate::Primitive) kinds.
#[derive(Debug, Clone, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i32),
    Long(i64),
    Double(f64),
    Str(Arc<str>),
    Object(ObjectRef),
}

impl Value {
    pub fn str(text: impl Into<Arc<str>>) -> Self {
        Value::Str(text.into())
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// The runtime class of this value, `None` for `Null`.
    pub fn class(&self) -> Option<ClassRef> {
        let builtins = builtins();
        let class = match self {
            Value::Null => return None,
            Value::Bool(_) => &builtins.bool,
            Value::Int(_) => &builtins.int,
            Value::Long(_) => &builtins.long,
            Value::Double(_) => &builtins.double,
            Value::Str(_) => &builtins.string,
            Value::Object(object) => object.class(),
        };
        Some(class.clone())
    }

    /// Qualified class name used in failure messages.
    pub fn type_name(&self) -> String {
        match self.class() {
            Some(class) => class.qualified_name().to_string(),
            None => "null".to_string(),
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i32> {
        match self {
            Value::Int(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_long(&self) -> Option<i64> {
        match self {
            Value::Long(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_double(&self) -> Option<f64> {
        match self {
            Value::Double(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&ObjectRef> {
        match self {
            Value::Object(object) => Some(object),
            _ => None,
        }
    }

    /// Move this value onto the heap for a native reference return.
    ///
    /// `Null` becomes a null pointer. The pointer is reclaimed by whoever
    /// receives the return value.
    pub fn into_native(self) -> *mut Value {
        match self {
            Value::Null => std::ptr::null_mut(),
            value => Box::into_raw(Box::new(value)),
        }
    }

    /// Take back a pointer produced by [`Value::into_native`].
    ///
    /// # Safety
    /// `ptr` must be null or come from `into_native` and not have been
    /// reclaimed already.
    pub unsafe fn from_native(ptr: *mut Value) -> Value {
        if ptr.is_null() {
            Value::Null
        } else {
            // SAFETY: guaranteed by the caller.
            unsafe { *Box::from_raw(ptr) }
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Long(a), Value::Long(b)) => a == b,
            (Value::Double(a), Value::Double(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::Bool(value) => write!(f, "{value}"),
            Value::Int(value) => write!(f, "{value}"),
            Value::Long(value) => write!(f, "{value}L"),
            Value::Double(value) => write!(f, "{value:?}"),
            Value::Str(value) => write!(f, "{value:?}"),
            Value::Object(object) => write!(f, "{object:?}"),
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Int(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Long(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Double(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Str(value.into())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Str(value.into())
    }
}

impl From<ObjectRef> for Value {
    fn from(value: ObjectRef) -> Self {
        Value::Object(value)
    }
}
