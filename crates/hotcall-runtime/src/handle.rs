//! Dynamic call handles: generic invocation of any method through libffi.

use std::ffi::c_void;

use hotcall_diag::{Failure, FailureKind, FrameGuard, TraceFrame};
use libffi::middle::{Arg, Cif, CodePtr, Type};

use crate::abi::{narrow, unbox_bool_value, unbox_double_value, unbox_int_value, unbox_long_value};
use crate::class::{MethodRef, Primitive, TypeRef};
use crate::pending::take_pending;
use crate::value::Value;

/// Owner of the frame a handle contributes to failure traces.
pub const HANDLE_FRAME_OWNER: &str = "runtime.reflect.DynamicHandle";
const HANDLE_FRAME_ROUTINE: &str = "invokeWithArguments";

/// A generic callable for one method, obtained from
/// [`Runtime::unreflect`](crate::Runtime::unreflect).
///
/// Instance methods take the receiver as the first argument.
#[derive(Debug, Clone)]
pub struct DynamicHandle {
    method: MethodRef,
}

/// One converted argument, kept alive while libffi reads it.
enum ArgSlot {
    Bool(u8),
    Int(i32),
    Long(i64),
    Double(f64),
    Ref(*const Value),
}

impl ArgSlot {
    fn convert(value: &Value, ty: &TypeRef) -> Result<Self, Failure> {
        Ok(match ty {
            TypeRef::Primitive(Primitive::Bool) => ArgSlot::Bool(u8::from(unbox_bool_value(value)?)),
            TypeRef::Primitive(Primitive::Int) => ArgSlot::Int(unbox_int_value(value)?),
            TypeRef::Primitive(Primitive::Long) => ArgSlot::Long(unbox_long_value(value)?),
            TypeRef::Primitive(Primitive::Double) => ArgSlot::Double(unbox_double_value(value)?),
            TypeRef::Reference(class) => {
                narrow(value, class)?;
                ArgSlot::Ref(value)
            }
            TypeRef::Void => {
                return Err(Failure::new(
                    FailureKind::WrongMethodType,
                    "void is not a parameter type",
                ));
            }
        })
    }

    fn ffi_type(&self) -> Type {
        match self {
            ArgSlot::Bool(_) => Type::u8(),
            ArgSlot::Int(_) => Type::i32(),
            ArgSlot::Long(_) => Type::i64(),
            ArgSlot::Double(_) => Type::f64(),
            ArgSlot::Ref(_) => Type::pointer(),
        }
    }

    fn as_arg(&self) -> Arg {
        match self {
            ArgSlot::Bool(value) => Arg::new(value),
            ArgSlot::Int(value) => Arg::new(value),
            ArgSlot::Long(value) => Arg::new(value),
            ArgSlot::Double(value) => Arg::new(value),
            ArgSlot::Ref(value) => Arg::new(value),
        }
    }
}

fn return_type(ty: &TypeRef) -> Type {
    match ty {
        TypeRef::Void => Type::void(),
        TypeRef::Primitive(Primitive::Bool) => Type::u8(),
        TypeRef::Primitive(Primitive::Int) => Type::i32(),
        TypeRef::Primitive(Primitive::Long) => Type::i64(),
        TypeRef::Primitive(Primitive::Double) => Type::f64(),
        TypeRef::Reference(_) => Type::pointer(),
    }
}

impl DynamicHandle {
    pub(crate) fn new(method: MethodRef) -> Self {
        Self { method }
    }

    pub fn method(&self) -> &MethodRef {
        &self.method
    }

    /// Number of arguments, counting the receiver of instance methods.
    pub fn arity(&self) -> usize {
        self.method.params().len() + usize::from(!self.method.is_static())
    }

    /// Invoke the method with `args`, receiver first for instance methods.
    ///
    /// Argument conversion failures are returned as they are. A failure
    /// raised by the method itself comes back wrapped in an
    /// `InvocationTarget` carrier.
    pub fn invoke_with_arguments(&self, args: &[Value]) -> Result<Value, Failure> {
        let _handle_frame =
            FrameGuard::enter(TraceFrame::new(HANDLE_FRAME_OWNER, HANDLE_FRAME_ROUTINE));
        let method = &self.method;
        if args.len() != self.arity() {
            return Err(Failure::new(
                FailureKind::WrongMethodType,
                format!("cannot invoke {method} with {} arguments", args.len()),
            ));
        }

        let (receiver, params) = match args.split_first() {
            Some((receiver, params)) if !method.is_static() => (Some(receiver), params),
            _ => (None, args),
        };

        let mut slots = Vec::with_capacity(args.len());
        if let Some(receiver) = receiver {
            if receiver.is_null() {
                return Err(Failure::new(
                    FailureKind::NullPointer,
                    format!("cannot invoke {method} on null"),
                ));
            }
            narrow(receiver, method.owner())?;
            slots.push(ArgSlot::Ref(receiver));
        }
        for (value, ty) in params.iter().zip(method.params()) {
            slots.push(ArgSlot::convert(value, ty)?);
        }

        let entry = match receiver {
            Some(receiver) => method.resolve_entry(receiver),
            None => method.entry(),
        };
        let cif = Cif::new(slots.iter().map(ArgSlot::ffi_type), return_type(method.ret()));
        let ffi_args: Vec<Arg> = slots.iter().map(ArgSlot::as_arg).collect();
        let code = CodePtr(entry.as_ptr() as *mut c_void);

        if let Some(stale) = take_pending() {
            tracing::debug!(failure = %stale, "discarding stale pending failure");
        }
        let result = {
            let _target_frame = FrameGuard::enter(method.frame().clone());
            // SAFETY: the entry was registered for this method's shape and
            // every argument slot was converted to the declared type.
            unsafe { call_native(&cif, code, &ffi_args, method.ret()) }
        };

        match take_pending() {
            Some(failure) => Err(Failure::invocation_target(failure)),
            None => Ok(result),
        }
    }
}

/// # Safety
/// `cif` must describe the function at `code`, and `args` must match it.
unsafe fn call_native(cif: &Cif, code: CodePtr, args: &[Arg], ret: &TypeRef) -> Value {
    // Small integer returns are widened to a full register by libffi.
    unsafe {
        match ret {
            TypeRef::Void => {
                cif.call::<()>(code, args);
                Value::Null
            }
            TypeRef::Primitive(Primitive::Bool) => {
                let raw: u64 = cif.call(code, args);
                Value::Bool(raw as u8 != 0)
            }
            TypeRef::Primitive(Primitive::Int) => {
                let raw: i64 = cif.call(code, args);
                Value::Int(raw as i32)
            }
            TypeRef::Primitive(Primitive::Long) => Value::Long(cif.call(code, args)),
            TypeRef::Primitive(Primitive::Double) => Value::Double(cif.call(code, args)),
            TypeRef::Reference(_) => {
                let raw: *mut Value = cif.call(code, args);
                Value::from_native(raw)
            }
        }
    }
}
