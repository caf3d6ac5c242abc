//! Helpers called by generated invoker code.
//!
//! Every helper is an `extern "C"` function registered under a fixed symbol
//! name. Generated code passes pointers to live [`Value`]s, [`Class`]es,
//! [`Method`]s and [`TraceFrame`]s owned by the unit being executed. Helpers
//! that can fail park the failure with [`raise`] and return a placeholder;
//! generated code checks [`Helper::PendingFailure`] before reaching the
//! target.

use hotcall_diag::{Failure, FailureKind, TraceFrame, pop_frame, push_frame};

use crate::class::{Class, Method, Primitive};
use crate::pending::{has_pending, raise};
use crate::value::Value;

/// Machine-level kind of a helper parameter or result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AbiSlot {
    Ptr,
    Bool,
    Int,
    Long,
    Double,
}

impl From<Primitive> for AbiSlot {
    fn from(kind: Primitive) -> Self {
        match kind {
            Primitive::Bool => AbiSlot::Bool,
            Primitive::Int => AbiSlot::Int,
            Primitive::Long => AbiSlot::Long,
            Primitive::Double => AbiSlot::Double,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Helper {
    CheckCast,
    UnboxBool,
    UnboxInt,
    UnboxLong,
    UnboxDouble,
    PendingFailure,
    ResolveVirtual,
    BoxVoid,
    BoxBool,
    BoxInt,
    BoxLong,
    BoxDouble,
    BoxRef,
    EnterFrame,
    ExitFrame,
}

impl Helper {
    pub const ALL: [Helper; 15] = [
        Helper::CheckCast,
        Helper::UnboxBool,
        Helper::UnboxInt,
        Helper::UnboxLong,
        Helper::UnboxDouble,
        Helper::PendingFailure,
        Helper::ResolveVirtual,
        Helper::BoxVoid,
        Helper::BoxBool,
        Helper::BoxInt,
        Helper::BoxLong,
        Helper::BoxDouble,
        Helper::BoxRef,
        Helper::EnterFrame,
        Helper::ExitFrame,
    ];

    pub fn unbox(kind: Primitive) -> Self {
        match kind {
            Primitive::Bool => Helper::UnboxBool,
            Primitive::Int => Helper::UnboxInt,
            Primitive::Long => Helper::UnboxLong,
            Primitive::Double => Helper::UnboxDouble,
        }
    }

    pub fn boxing(kind: Primitive) -> Self {
        match kind {
            Primitive::Bool => Helper::BoxBool,
            Primitive::Int => Helper::BoxInt,
            Primitive::Long => Helper::BoxLong,
            Primitive::Double => Helper::BoxDouble,
        }
    }

    pub fn symbol(self) -> &'static str {
        match self {
            Helper::CheckCast => "__hotcall_check_cast",
            Helper::UnboxBool => "__hotcall_unbox_bool",
            Helper::UnboxInt => "__hotcall_unbox_int",
            Helper::UnboxLong => "__hotcall_unbox_long",
            Helper::UnboxDouble => "__hotcall_unbox_double",
            Helper::PendingFailure => "__hotcall_pending_failure",
            Helper::ResolveVirtual => "__hotcall_resolve_virtual",
            Helper::BoxVoid => "__hotcall_box_void",
            Helper::BoxBool => "__hotcall_box_bool",
            Helper::BoxInt => "__hotcall_box_int",
            Helper::BoxLong => "__hotcall_box_long",
            Helper::BoxDouble => "__hotcall_box_double",
            Helper::BoxRef => "__hotcall_box_ref",
            Helper::EnterFrame => "__hotcall_enter_frame",
            Helper::ExitFrame => "__hotcall_exit_frame",
        }
    }

    pub fn address(self) -> *const u8 {
        match self {
            Helper::CheckCast => check_cast as *const u8,
            Helper::UnboxBool => unbox_bool as *const u8,
            Helper::UnboxInt => unbox_int as *const u8,
            Helper::UnboxLong => unbox_long as *const u8,
            Helper::UnboxDouble => unbox_double as *const u8,
            Helper::PendingFailure => pending_failure as *const u8,
            Helper::ResolveVirtual => resolve_virtual as *const u8,
            Helper::BoxVoid => box_void as *const u8,
            Helper::BoxBool => box_bool as *const u8,
            Helper::BoxInt => box_int as *const u8,
            Helper::BoxLong => box_long as *const u8,
            Helper::BoxDouble => box_double as *const u8,
            Helper::BoxRef => box_ref as *const u8,
            Helper::EnterFrame => enter_frame as *const u8,
            Helper::ExitFrame => exit_frame as *const u8,
        }
    }

    pub fn params(self) -> &'static [AbiSlot] {
        use AbiSlot::*;
        match self {
            Helper::CheckCast | Helper::ResolveVirtual | Helper::BoxRef => &[Ptr, Ptr],
            Helper::UnboxBool
            | Helper::UnboxInt
            | Helper::UnboxLong
            | Helper::UnboxDouble
            | Helper::BoxVoid
            | Helper::EnterFrame => &[Ptr],
            Helper::PendingFailure | Helper::ExitFrame => &[],
            Helper::BoxBool => &[Ptr, Bool],
            Helper::BoxInt => &[Ptr, Int],
            Helper::BoxLong => &[Ptr, Long],
            Helper::BoxDouble => &[Ptr, Double],
        }
    }

    pub fn result(self) -> Option<AbiSlot> {
        match self {
            Helper::CheckCast | Helper::ResolveVirtual => Some(AbiSlot::Ptr),
            Helper::UnboxBool | Helper::PendingFailure => Some(AbiSlot::Bool),
            Helper::UnboxInt => Some(AbiSlot::Int),
            Helper::UnboxLong => Some(AbiSlot::Long),
            Helper::UnboxDouble => Some(AbiSlot::Double),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Checked conversions shared with the dynamic handle
// ---------------------------------------------------------------------------

/// Narrow `value` to `class`, failing with `ClassCast`.
pub fn narrow(value: &Value, class: &Class) -> Result<(), Failure> {
    if class.accepts(value) {
        Ok(())
    } else {
        Err(Failure::new(
            FailureKind::ClassCast,
            format!("{} cannot be cast to {}", value.type_name(), class.qualified_name()),
        ))
    }
}

fn unbox<T>(
    value: &Value,
    kind: Primitive,
    get: impl FnOnce(&Value) -> Option<T>,
) -> Result<T, Failure> {
    if value.is_null() {
        return Err(Failure::new(
            FailureKind::NullPointer,
            format!("cannot unbox null as {kind}"),
        ));
    }
    get(value).ok_or_else(|| {
        Failure::new(
            FailureKind::ClassCast,
            format!("{} cannot be cast to {kind}", value.type_name()),
        )
    })
}

pub fn unbox_bool_value(value: &Value) -> Result<bool, Failure> {
    unbox(value, Primitive::Bool, Value::as_bool)
}

pub fn unbox_int_value(value: &Value) -> Result<i32, Failure> {
    unbox(value, Primitive::Int, Value::as_int)
}

pub fn unbox_long_value(value: &Value) -> Result<i64, Failure> {
    unbox(value, Primitive::Long, Value::as_long)
}

pub fn unbox_double_value(value: &Value) -> Result<f64, Failure> {
    unbox(value, Primitive::Double, Value::as_double)
}

fn or_raise<T>(result: Result<T, Failure>, placeholder: T) -> T {
    result.unwrap_or_else(|failure| {
        raise(failure);
        placeholder
    })
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// # Safety
/// `value` and `class` must point to live objects.
pub unsafe extern "C" fn check_cast(value: *const Value, class: *const Class) -> *const Value {
    // SAFETY: guaranteed by the caller.
    let (checked, class) = unsafe { (&*value, &*class) };
    if let Err(failure) = narrow(checked, class) {
        raise(failure);
    }
    value
}

/// # Safety
/// `value` must point to a live value.
pub unsafe extern "C" fn unbox_bool(value: *const Value) -> bool {
    // SAFETY: guaranteed by the caller.
    or_raise(unbox_bool_value(unsafe { &*value }), false)
}

/// # Safety
/// `value` must point to a live value.
pub unsafe extern "C" fn unbox_int(value: *const Value) -> i32 {
    // SAFETY: guaranteed by the caller.
    or_raise(unbox_int_value(unsafe { &*value }), 0)
}

/// # Safety
/// `value` must point to a live value.
pub unsafe extern "C" fn unbox_long(value: *const Value) -> i64 {
    // SAFETY: guaranteed by the caller.
    or_raise(unbox_long_value(unsafe { &*value }), 0)
}

/// # Safety
/// `value` must point to a live value.
pub unsafe extern "C" fn unbox_double(value: *const Value) -> f64 {
    // SAFETY: guaranteed by the caller.
    or_raise(unbox_double_value(unsafe { &*value }), 0.0)
}

pub extern "C" fn pending_failure() -> bool {
    has_pending()
}

/// # Safety
/// `receiver` and `method` must point to live objects.
pub unsafe extern "C" fn resolve_virtual(receiver: *const Value, method: *const Method) -> *const u8 {
    // SAFETY: guaranteed by the caller.
    let (receiver, method) = unsafe { (&*receiver, &*method) };
    method.resolve_entry(receiver).as_ptr()
}

/// # Safety
/// `out` must point to an initialized value owned by the caller.
pub unsafe extern "C" fn box_void(out: *mut Value) {
    // SAFETY: guaranteed by the caller.
    unsafe { *out = Value::Null };
}

/// # Safety
/// `out` must point to an initialized value owned by the caller.
pub unsafe extern "C" fn box_bool(out: *mut Value, value: bool) {
    // SAFETY: guaranteed by the caller.
    unsafe { *out = Value::Bool(value) };
}

/// # Safety
/// `out` must point to an initialized value owned by the caller.
pub unsafe extern "C" fn box_int(out: *mut Value, value: i32) {
    // SAFETY: guaranteed by the caller.
    unsafe { *out = Value::Int(value) };
}

/// # Safety
/// `out` must point to an initialized value owned by the caller.
pub unsafe extern "C" fn box_long(out: *mut Value, value: i64) {
    // SAFETY: guaranteed by the caller.
    unsafe { *out = Value::Long(value) };
}

/// # Safety
/// `out` must point to an initialized value owned by the caller.
pub unsafe extern "C" fn box_double(out: *mut Value, value: f64) {
    // SAFETY: guaranteed by the caller.
    unsafe { *out = Value::Double(value) };
}

/// Store a native reference return, taking ownership of it.
///
/// # Safety
/// `out` must point to an initialized value owned by the caller; `value`
/// must be null or come from [`Value::into_native`].
pub unsafe extern "C" fn box_ref(out: *mut Value, value: *mut Value) {
    // SAFETY: guaranteed by the caller.
    unsafe { *out = Value::from_native(value) };
}

/// # Safety
/// `frame` must point to a live frame.
pub unsafe extern "C" fn enter_frame(frame: *const TraceFrame) {
    // SAFETY: guaranteed by the caller.
    push_frame(unsafe { (*frame).clone() });
}

pub extern "C" fn exit_frame() {
    pop_frame();
}

#[cfg(test)]
mod tests {
    use hotcall_diag::FailureKind;

    use super::*;
    use crate::class::builtins;
    use crate::pending::take_pending;

    #[test]
    fn helper_symbols_are_unique() {
        let mut symbols = std::collections::BTreeSet::new();
        for helper in Helper::ALL {
            assert!(symbols.insert(helper.symbol()), "duplicate symbol {}", helper.symbol());
            assert!(!helper.address().is_null());
        }
    }

    #[test]
    fn unbox_reports_null_and_mismatch() {
        let null = unbox_int_value(&Value::Null).unwrap_err();
        assert_eq!(null.kind(), &FailureKind::NullPointer);
        assert_eq!(null.message(), Some("cannot unbox null as int"));

        let mismatch = unbox_int_value(&Value::str("5")).unwrap_err();
        assert_eq!(mismatch.kind(), &FailureKind::ClassCast);
        assert_eq!(mismatch.message(), Some("core.String cannot be cast to int"));

        assert_eq!(unbox_long_value(&Value::Long(9)).ok(), Some(9));
    }

    #[test]
    fn failing_helper_parks_failure_and_returns_placeholder() {
        let value = Value::Bool(true);
        // SAFETY: pointer to a live local.
        let unboxed = unsafe { unbox_double(&value) };
        assert_eq!(unboxed, 0.0);
        let failure = take_pending().expect("unbox should raise");
        assert_eq!(failure.kind(), &FailureKind::ClassCast);
    }

    #[test]
    fn check_cast_accepts_null_and_root_class() {
        let builtins = builtins();
        assert!(narrow(&Value::Null, &builtins.string).is_ok());
        assert!(narrow(&Value::Int(1), &builtins.object).is_ok());
        let failure = narrow(&Value::Int(1), &builtins.string).unwrap_err();
        assert_eq!(failure.message(), Some("core.Int cannot be cast to core.String"));
    }

    #[test]
    fn box_ref_takes_ownership_of_native_return() {
        let mut out = Value::Int(3);
        let native = Value::str("hi").into_native();
        // SAFETY: `out` is initialized and `native` comes from `into_native`.
        unsafe { box_ref(&mut out, native) };
        assert_eq!(out, Value::str("hi"));

        // SAFETY: as above, with a null return.
        unsafe { box_ref(&mut out, std::ptr::null_mut()) };
        assert!(out.is_null());
    }
}
