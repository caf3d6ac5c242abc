use std::fmt;

use hotcall_codegen::MethodDescriptor;
use hotcall_runtime::{RuntimeOptions, Visibility};

/// How an invoker reaches its target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Strategy {
    /// A generated unit calls the target's native entry directly.
    Compiled,
    /// A dynamic handle calls the target with access checks overridden.
    Fallback,
}

impl Strategy {
    /// Generated code cannot link private targets, nor package-scoped ones
    /// when the runtime does not support package linking.
    pub fn select(descriptor: &MethodDescriptor, options: &RuntimeOptions) -> Self {
        match descriptor.visibility() {
            Visibility::Private => Strategy::Fallback,
            Visibility::Package if !options.package_linking => Strategy::Fallback,
            _ => Strategy::Compiled,
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Strategy::Compiled => "compiled",
            Strategy::Fallback => "fallback",
        })
    }
}

#[cfg(test)]
mod tests {
    use hotcall_runtime::{ClassDef, MethodDef, NativeEntry, Runtime};

    use super::*;

    extern "C" fn noop() {}

    fn descriptor(visibility: Visibility) -> MethodDescriptor {
        // SAFETY: `noop` matches a static, parameterless, void method.
        let entry = unsafe { NativeEntry::from_raw(noop as *const u8) };
        let runtime = Runtime::new();
        let class = runtime
            .define_class(
                ClassDef::new("demo", "Subject")
                    .method(MethodDef::new("noop", entry).as_static().visibility(visibility)),
            )
            .expect("define Subject");
        let method = runtime.require_method(&class, "noop").expect("noop");
        MethodDescriptor::resolve(&method)
    }

    #[test]
    fn selection_by_visibility() {
        let linking = RuntimeOptions::default();
        let no_linking = RuntimeOptions {
            package_linking: false,
            ..RuntimeOptions::default()
        };
        let cases = [
            (Visibility::Public, Strategy::Compiled, Strategy::Compiled),
            (Visibility::Protected, Strategy::Compiled, Strategy::Compiled),
            (Visibility::Package, Strategy::Compiled, Strategy::Fallback),
            (Visibility::Private, Strategy::Fallback, Strategy::Fallback),
        ];
        for (visibility, with, without) in cases {
            let descriptor = descriptor(visibility);
            assert_eq!(Strategy::select(&descriptor, &linking), with, "{visibility}");
            assert_eq!(Strategy::select(&descriptor, &no_linking), without, "{visibility}");
        }
    }
}
