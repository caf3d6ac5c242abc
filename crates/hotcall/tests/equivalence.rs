//! Property tests: the compiled and fallback paths agree on every call.

mod support;

use std::sync::LazyLock;

use hotcall::{Failure, Invoker, Strategy as InvokeStrategy, Value, wrap};
use hotcall_runtime::RuntimeOptions;
use proptest::prelude::*;
use support::Zoo;

struct Pair {
    compiled: Invoker,
    fallback: Invoker,
}

// Both runtimes define the same package-scoped target; only one can link it.
static ZOOS: LazyLock<(Zoo, Zoo)> = LazyLock::new(|| {
    let unlinked = Zoo::with_options(RuntimeOptions {
        package_linking: false,
        ..RuntimeOptions::default()
    });
    (Zoo::new(), unlinked)
});

static RENDER: LazyLock<Pair> = LazyLock::new(|| {
    let (linked, unlinked) = &*ZOOS;
    let compiled = wrap(&linked.runtime, &linked.method(&linked.math, "render")).expect("compiled build");
    let fallback = wrap(&unlinked.runtime, &unlinked.method(&unlinked.math, "render")).expect("fallback build");
    assert_eq!(compiled.strategy(), InvokeStrategy::Compiled);
    assert_eq!(fallback.strategy(), InvokeStrategy::Fallback);
    Pair { compiled, fallback }
});

fn outcome(result: Result<Value, Failure>) -> Result<Value, (String, Option<String>)> {
    result.map_err(|failure| {
        (
            failure.kind().as_str().to_string(),
            failure.message().map(str::to_string),
        )
    })
}

fn arb_value() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i32>().prop_map(Value::Int),
        any::<i64>().prop_map(Value::Long),
        (-1.0e9..1.0e9f64).prop_map(Value::Double),
        "[a-z]{0,8}".prop_map(|text| Value::str(text)),
    ]
}

fn arb_well_typed() -> impl Strategy<Value = Vec<Value>> {
    (any::<i64>(), -1.0e9..1.0e9f64, any::<bool>(), "[a-z]{0,8}").prop_map(
        |(count, ratio, flag, label)| {
            vec![
                Value::Long(count),
                Value::Double(ratio),
                Value::Bool(flag),
                Value::str(label),
            ]
        },
    )
}

proptest! {
    #[test]
    fn well_typed_calls_agree(args in arb_well_typed()) {
        let compiled = outcome(RENDER.compiled.call(None, &args));
        let fallback = outcome(RENDER.fallback.call(None, &args));
        prop_assert!(compiled.is_ok());
        prop_assert_eq!(compiled, fallback);
    }

    #[test]
    fn arbitrary_calls_fail_alike(args in prop::collection::vec(arb_value(), 0..6)) {
        let compiled = outcome(RENDER.compiled.call(None, &args));
        let fallback = outcome(RENDER.fallback.call(None, &args));
        prop_assert_eq!(compiled, fallback);
    }
}
