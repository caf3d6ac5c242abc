//! Code generation: target-specific op sequences and unit naming.

use std::fmt;
use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};

use hotcall_runtime::{Class, ClassRef, MethodRef, NativeEntry, Primitive, Runtime, TypeRef};

use crate::CodegenError;
use crate::descriptor::MethodDescriptor;

/// Separator between the owner name and the sequence number of a unit name.
pub const UNIT_NAME_MARKER: &str = "$$Invoker";

static NEXT_UNIT: AtomicU64 = AtomicU64::new(0);

/// A target method together with the native entry it was linked to.
#[derive(Debug, Clone)]
pub struct LinkedTarget {
    method: MethodRef,
    entry: NativeEntry,
}

impl LinkedTarget {
    pub fn method(&self) -> &MethodRef {
        &self.method
    }

    pub fn entry(&self) -> NativeEntry {
        self.entry
    }
}

/// One step of a generated unit.
///
/// Ops run on an operand stack. Loads push borrowed values, `Unbox` turns a
/// value into a raw primitive, invokes consume their operands (receiver
/// first) and push the result, and `Return` stores the top operand.
#[derive(Debug, Clone)]
pub enum ThunkOp {
    LoadReceiver,
    LoadArg(usize),
    CheckCast(ClassRef),
    Unbox(Primitive),
    InvokeStatic(LinkedTarget),
    InvokeVirtual(LinkedTarget),
    PushNull,
    Box(Primitive),
    Return,
}

impl fmt::Display for ThunkOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ThunkOp::LoadReceiver => f.write_str("load_receiver"),
            ThunkOp::LoadArg(index) => write!(f, "load_arg {index}"),
            ThunkOp::CheckCast(class) => write!(f, "check_cast {}", class.qualified_name()),
            ThunkOp::Unbox(kind) => write!(f, "unbox {kind}"),
            ThunkOp::InvokeStatic(target) => write!(
                f,
                "invoke_static {}::{}",
                target.method.owner().qualified_name(),
                target.method.name()
            ),
            ThunkOp::InvokeVirtual(target) => write!(
                f,
                "invoke_virtual {}::{}",
                target.method.owner().qualified_name(),
                target.method.name()
            ),
            ThunkOp::PushNull => f.write_str("push_null"),
            ThunkOp::Box(kind) => write!(f, "box {kind}"),
            ThunkOp::Return => f.write_str("return"),
        }
    }
}

/// The emitted form of one invoker, not yet loaded.
#[derive(Debug, Clone)]
pub struct GeneratedUnit {
    name: String,
    ops: Vec<ThunkOp>,
    descriptor: MethodDescriptor,
}

impl GeneratedUnit {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn ops(&self) -> &[ThunkOp] {
        &self.ops
    }

    pub fn descriptor(&self) -> &MethodDescriptor {
        &self.descriptor
    }

    /// Human-readable op listing, headed by the descriptor.
    pub fn listing(&self) -> String {
        let mut out = self.descriptor.to_string();
        for (index, op) in self.ops.iter().enumerate() {
            let _ = write!(out, "\n  {index}: {op}");
        }
        out
    }

    /// Build a unit from raw parts. Ops are validated when the unit is
    /// loaded, not here.
    pub fn from_parts(name: String, ops: Vec<ThunkOp>, descriptor: MethodDescriptor) -> Self {
        Self {
            name,
            ops,
            descriptor,
        }
    }
}

/// A fresh, process-unique unit name for an invoker of a method of `owner`.
pub fn unique_unit_name(owner: &Class) -> String {
    let sequence = NEXT_UNIT.fetch_add(1, Ordering::Relaxed);
    format!("{}{UNIT_NAME_MARKER}{sequence}", owner.qualified_name())
}

pub struct CodeGenerator;

impl CodeGenerator {
    /// Emit the invoker unit for `descriptor`.
    ///
    /// The unit validates nothing about arity or receiver presence; callers
    /// gate those before invoking it. A receiver or argument of the wrong
    /// class fails at call time.
    pub fn emit(
        runtime: &Runtime,
        descriptor: &MethodDescriptor,
    ) -> Result<GeneratedUnit, CodegenError> {
        let method = descriptor.method();
        let mut ops = Vec::with_capacity(descriptor.arity() * 2 + 5);

        if !descriptor.is_static() {
            ops.push(ThunkOp::LoadReceiver);
            ops.push(ThunkOp::CheckCast(descriptor.owner().clone()));
        }

        for (index, param) in descriptor.params().iter().enumerate() {
            ops.push(ThunkOp::LoadArg(index));
            match param {
                TypeRef::Primitive(kind) => ops.push(ThunkOp::Unbox(*kind)),
                TypeRef::Reference(class) => ops.push(ThunkOp::CheckCast(class.clone())),
                TypeRef::Void => {
                    return Err(CodegenError::UnsupportedType {
                        method: descriptor.to_string(),
                        position: format!("parameter {index}"),
                        ty: param.to_string(),
                    });
                }
            }
        }

        let target = LinkedTarget {
            method: method.clone(),
            entry: runtime.link(method)?,
        };
        ops.push(if descriptor.is_static() {
            ThunkOp::InvokeStatic(target)
        } else {
            ThunkOp::InvokeVirtual(target)
        });

        match descriptor.ret() {
            TypeRef::Void => ops.push(ThunkOp::PushNull),
            TypeRef::Primitive(kind) => ops.push(ThunkOp::Box(*kind)),
            TypeRef::Reference(_) => {}
        }
        ops.push(ThunkOp::Return);

        let name = unique_unit_name(descriptor.owner());
        for op in &ops {
            tracing::trace!(unit = %name, %op, "emitted op");
        }
        Ok(GeneratedUnit {
            name,
            ops,
            descriptor: descriptor.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use hotcall_runtime::{ClassDef, MethodDef, RuntimeOptions, Visibility};
    use insta::assert_snapshot;

    use super::*;

    extern "C" fn add(a: i32, b: i32) -> i32 {
        a + b
    }

    extern "C" fn rename(_receiver: *const hotcall_runtime::Value, _name: *const hotcall_runtime::Value) {}

    fn entry(ptr: *const u8) -> NativeEntry {
        // SAFETY: test natives match their declared shapes.
        unsafe { NativeEntry::from_raw(ptr) }
    }

    fn runtime_with(method: MethodDef, options: RuntimeOptions) -> (Runtime, MethodRef) {
        let runtime = Runtime::with_options(options);
        let class = runtime
            .define_class(ClassDef::new("demo", "Subject").method(method))
            .expect("define Subject");
        let methods = runtime.methods(&class);
        (runtime, methods[0].clone())
    }

    #[test]
    fn static_primitive_target_listing() {
        let (runtime, method) = runtime_with(
            MethodDef::new("add", entry(add as *const u8))
                .params([TypeRef::int(), TypeRef::int()])
                .returns(TypeRef::int())
                .as_static(),
            RuntimeOptions::default(),
        );
        let unit = CodeGenerator::emit(&runtime, &MethodDescriptor::resolve(&method)).expect("emit");
        assert_snapshot!(unit.listing(), @r"
static demo.Subject::add(int, int) -> int
  0: load_arg 0
  1: unbox int
  2: load_arg 1
  3: unbox int
  4: invoke_static demo.Subject::add
  5: box int
  6: return
");
    }

    #[test]
    fn instance_void_target_listing() {
        let (runtime, method) = runtime_with(
            MethodDef::new("rename", entry(rename as *const u8)).params([TypeRef::string()]),
            RuntimeOptions::default(),
        );
        let unit = CodeGenerator::emit(&runtime, &MethodDescriptor::resolve(&method)).expect("emit");
        assert_snapshot!(unit.listing(), @r"
demo.Subject::rename(core.String) -> void
  0: load_receiver
  1: check_cast demo.Subject
  2: load_arg 0
  3: check_cast core.String
  4: invoke_virtual demo.Subject::rename
  5: push_null
  6: return
");
    }

    #[test]
    fn unit_names_are_unique_and_marked() {
        let (runtime, method) = runtime_with(
            MethodDef::new("add", entry(add as *const u8))
                .params([TypeRef::int(), TypeRef::int()])
                .returns(TypeRef::int())
                .as_static(),
            RuntimeOptions::default(),
        );
        let descriptor = MethodDescriptor::resolve(&method);
        let first = CodeGenerator::emit(&runtime, &descriptor).expect("emit");
        let second = CodeGenerator::emit(&runtime, &descriptor).expect("emit");
        assert_ne!(first.name(), second.name());
        assert!(first.name().starts_with("demo.Subject$$Invoker"));
    }

    #[test]
    fn void_parameter_is_unsupported() {
        let (runtime, method) = runtime_with(
            MethodDef::new("broken", entry(add as *const u8))
                .params([TypeRef::int(), TypeRef::Void])
                .as_static(),
            RuntimeOptions::default(),
        );
        let err = CodeGenerator::emit(&runtime, &MethodDescriptor::resolve(&method)).unwrap_err();
        assert!(matches!(
            err,
            CodegenError::UnsupportedType { ref position, .. } if position == "parameter 1"
        ));
    }

    #[test]
    fn package_target_without_package_linking_fails_to_link() {
        let (runtime, method) = runtime_with(
            MethodDef::new("add", entry(add as *const u8))
                .params([TypeRef::int(), TypeRef::int()])
                .returns(TypeRef::int())
                .as_static()
                .visibility(Visibility::Package),
            RuntimeOptions {
                package_linking: false,
                ..RuntimeOptions::default()
            },
        );
        let err = CodeGenerator::emit(&runtime, &MethodDescriptor::resolve(&method)).unwrap_err();
        assert!(matches!(err, CodegenError::Link(_)));
    }
}
