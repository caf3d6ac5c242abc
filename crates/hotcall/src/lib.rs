//! Specialized invokers for reflectively discovered routines.
//!
//! [`wrap`] turns a [`MethodRef`] into an [`Invoker`]. Public and protected
//! targets get a generated unit that calls the native entry directly;
//! targets generated code cannot link fall back to a dynamic handle. Either
//! way the invoker checks receiver presence and argument count on every call
//! and returns target failures without the frames of the invocation
//! machinery.

mod dispatch;
mod error;
mod factory;
mod fallback;
mod gate;
mod invoker;
mod strategy;

pub use error::BuildError;
pub use factory::{BuildOptions, InvokerFactory, wrap, wrap_in};
pub use invoker::{BoundInvoker, Invoker};
pub use strategy::Strategy;

pub use hotcall_codegen::{CodeLoader, MethodDescriptor};
pub use hotcall_diag::{Failure, FailureKind};
pub use hotcall_runtime::{MethodRef, Runtime, Value};
