//! Fixtures shared by the invoker benchmarks.

use hotcall::{MethodRef, Runtime, Value};
use hotcall_runtime::{ClassDef, ClassRef, MethodDef, NativeEntry, Object, TypeRef, Visibility};

pub extern "C" fn add(a: i32, b: i32) -> i32 {
    a.wrapping_add(b)
}

extern "C" fn length(_receiver: *const Value, text: *const Value) -> i64 {
    // SAFETY: both invocation paths pass a pointer to a live argument.
    let text = unsafe { &*text };
    text.as_str().map_or(0, |text| text.len() as i64)
}

fn entry(ptr: *const u8) -> NativeEntry {
    // SAFETY: every native here matches the shape it is attached to.
    unsafe { NativeEntry::from_raw(ptr) }
}

/// A runtime with public and private copies of each benchmarked method.
pub struct Bench {
    pub runtime: Runtime,
    pub math: ClassRef,
    pub text: ClassRef,
}

impl Bench {
    pub fn new() -> Self {
        let runtime = Runtime::new();
        let mut math = ClassDef::new("bench", "Math");
        let mut text = ClassDef::new("bench", "Text");
        for (suffix, visibility) in [("", Visibility::Public), ("Private", Visibility::Private)] {
            math = math.method(
                MethodDef::new(&format!("add{suffix}"), entry(add as *const u8))
                    .params([TypeRef::int(), TypeRef::int()])
                    .returns(TypeRef::int())
                    .as_static()
                    .visibility(visibility),
            );
            text = text.method(
                MethodDef::new(&format!("length{suffix}"), entry(length as *const u8))
                    .params([TypeRef::string()])
                    .returns(TypeRef::long())
                    .visibility(visibility),
            );
        }
        let math = runtime
            .define_class(math)
            .unwrap_or_else(|err| panic!("benchmark setup: {err}"));
        let text = runtime
            .define_class(text)
            .unwrap_or_else(|err| panic!("benchmark setup: {err}"));
        Self { runtime, math, text }
    }

    pub fn method(&self, class: &ClassRef, name: &str) -> MethodRef {
        self.runtime
            .require_method(class, name)
            .unwrap_or_else(|err| panic!("benchmark setup: {err}"))
    }

    pub fn text_instance(&self) -> Value {
        Value::Object(Object::new(self.text.clone(), ()))
    }
}

impl Default for Bench {
    fn default() -> Self {
        Self::new()
    }
}
