use hotcall_codegen::{CodegenError, MethodDescriptor};
use hotcall_runtime::ReflectError;

/// Why an invoker could not be built.
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum BuildError {
    #[error("generated unit `{name}` is already defined in the target scope")]
    DuplicateDefinition { name: String },
    #[error("cannot access `{method}`: {source}")]
    UnsupportedAccess {
        method: String,
        #[source]
        source: ReflectError,
    },
    #[error("cannot generate an invoker for `{method}`: {source}")]
    Generation {
        method: String,
        #[source]
        source: CodegenError,
    },
}

impl BuildError {
    pub(crate) fn from_codegen(descriptor: &MethodDescriptor, error: CodegenError) -> Self {
        match error {
            CodegenError::DuplicateDefinition { name } => BuildError::DuplicateDefinition { name },
            CodegenError::Link(source) => BuildError::UnsupportedAccess {
                method: descriptor.to_string(),
                source,
            },
            source => BuildError::Generation {
                method: descriptor.to_string(),
                source,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use hotcall_runtime::{ClassDef, MethodDef, NativeEntry, Runtime, Visibility};

    use super::*;

    extern "C" fn noop() {}

    #[test]
    fn codegen_errors_map_to_build_errors() {
        // SAFETY: `noop` matches a static, parameterless, void method.
        let entry = unsafe { NativeEntry::from_raw(noop as *const u8) };
        let runtime = Runtime::new();
        let class = runtime
            .define_class(ClassDef::new("demo", "Subject").method(MethodDef::new("noop", entry).as_static()))
            .expect("define Subject");
        let descriptor = MethodDescriptor::resolve(&runtime.require_method(&class, "noop").expect("noop"));

        let duplicate = CodegenError::DuplicateDefinition {
            name: "demo.Subject$$Invoker0".to_string(),
        };
        assert_eq!(
            BuildError::from_codegen(&descriptor, duplicate),
            BuildError::DuplicateDefinition {
                name: "demo.Subject$$Invoker0".to_string()
            }
        );

        let link = CodegenError::Link(ReflectError::Inaccessible {
            method: descriptor.to_string(),
            visibility: Visibility::Private,
        });
        assert!(matches!(
            BuildError::from_codegen(&descriptor, link),
            BuildError::UnsupportedAccess { .. }
        ));

        let module = CodegenError::Module {
            detail: "out of memory".to_string(),
        };
        let err = BuildError::from_codegen(&descriptor, module);
        assert_eq!(
            err.to_string(),
            "cannot generate an invoker for `static demo.Subject::noop() -> void`: Cranelift module error: out of memory"
        );
    }
}
