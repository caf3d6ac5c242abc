//! Shared fixture classes for the integration tests.

#![allow(dead_code)]

use hotcall::{Failure, FailureKind, MethodRef};
use hotcall_runtime::{
    ClassDef, ClassRef, MethodDef, NativeEntry, Object, Runtime, RuntimeOptions, TypeRef, Value,
    Visibility, raise,
};

fn entry(ptr: *const u8) -> NativeEntry {
    // SAFETY: every native below matches the shape it is attached to.
    unsafe { NativeEntry::from_raw(ptr) }
}

extern "C" fn add(a: i32, b: i32) -> i32 {
    a.wrapping_add(b)
}

extern "C" fn greet(_receiver: *const Value) -> *mut Value {
    Value::str("hi").into_native()
}

extern "C" fn find(_receiver: *const Value, key: *const Value) -> *mut Value {
    // SAFETY: both invocation paths pass a pointer to a live argument.
    let key = unsafe { &*key };
    let cause = Failure::new(FailureKind::custom("Io"), "index unavailable");
    raise(Failure::new(FailureKind::custom("NotFound"), key.as_str().unwrap_or_default()).with_cause(cause));
    std::ptr::null_mut()
}

extern "C" fn render(count: i64, ratio: f64, flag: bool, label: *const Value) -> *mut Value {
    // SAFETY: both invocation paths pass a pointer to a live argument.
    let label = unsafe { &*label };
    let label = label.as_str().unwrap_or("?");
    Value::str(format!("{label}:{count}:{ratio}:{flag}")).into_native()
}

extern "C" fn reset(_receiver: *const Value) {}

/// Classes shared by most tests.
pub struct Zoo {
    pub runtime: Runtime,
    pub math: ClassRef,
    pub greeter: ClassRef,
    pub repo: ClassRef,
    pub vault: ClassRef,
}

impl Zoo {
    pub fn new() -> Self {
        Self::with_options(RuntimeOptions::default())
    }

    pub fn with_options(options: RuntimeOptions) -> Self {
        let runtime = Runtime::with_options(options);
        let math = runtime
            .define_class(
                ClassDef::new("demo", "Math")
                    .method(
                        MethodDef::new("add", entry(add as *const u8))
                            .params([TypeRef::int(), TypeRef::int()])
                            .returns(TypeRef::int())
                            .as_static(),
                    )
                    .method(
                        MethodDef::new("render", entry(render as *const u8))
                            .params([TypeRef::long(), TypeRef::double(), TypeRef::bool(), TypeRef::string()])
                            .returns(TypeRef::string())
                            .as_static()
                            .visibility(Visibility::Package),
                    ),
            )
            .expect("define Math");
        let greeter = runtime
            .define_class(
                ClassDef::new("demo", "Greeter")
                    .method(MethodDef::new("greet", entry(greet as *const u8)).returns(TypeRef::string()))
                    .method(MethodDef::new("reset", entry(reset as *const u8))),
            )
            .expect("define Greeter");
        let repo = runtime
            .define_class(
                ClassDef::new("demo", "Repo")
                    .method(
                        MethodDef::new("find", entry(find as *const u8))
                            .params([TypeRef::string()])
                            .returns(TypeRef::object())
                            .visibility(Visibility::Private),
                    )
                    .method(
                        MethodDef::new("lookup", entry(find as *const u8))
                            .params([TypeRef::string()])
                            .returns(TypeRef::object()),
                    ),
            )
            .expect("define Repo");
        let vault = runtime
            .define_class(
                ClassDef::new("demo", "Vault").sealed().method(
                    MethodDef::new("open", entry(greet as *const u8))
                        .returns(TypeRef::string())
                        .visibility(Visibility::Private),
                ),
            )
            .expect("define Vault");
        Self {
            runtime,
            math,
            greeter,
            repo,
            vault,
        }
    }

    pub fn method(&self, class: &ClassRef, name: &str) -> MethodRef {
        self.runtime.require_method(class, name).expect("method exists")
    }

    pub fn instance(&self, class: &ClassRef) -> Value {
        Value::Object(Object::new(class.clone(), ()))
    }
}
