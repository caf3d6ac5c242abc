//! Host reflective runtime for hotcall.
//!
//! Classes live in execution scopes and own methods backed by `extern "C"`
//! native entries. A [`Runtime`] registers classes, links native entries for
//! generated code, and hands out [`DynamicHandle`]s for generic invocation.
//! Values cross invokers boxed as [`Value`].

pub mod abi;
mod class;
mod handle;
mod pending;
mod runtime;
mod scope;
mod value;

pub use class::{
    Builtins, Class, ClassId, ClassRef, Method, MethodRef, NativeEntry, Primitive, TypeRef,
    Visibility, builtins,
};
pub use handle::{DynamicHandle, HANDLE_FRAME_OWNER};
pub use pending::{has_pending, raise, take_pending};
pub use runtime::{ClassDef, MethodDef, ReflectError, Runtime, RuntimeOptions};
pub use scope::{ExecutionScope, ScopeId};
pub use value::{Object, ObjectRef, Value};
