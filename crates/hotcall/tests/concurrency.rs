mod support;

use std::collections::HashSet;
use std::sync::{Arc, Barrier};

use hotcall::{BuildOptions, CodeLoader, InvokerFactory, Value};
use support::Zoo;

const THREADS: usize = 8;
const BUILDS_PER_THREAD: usize = 6;

#[test]
fn concurrent_builds_define_distinct_units() {
    let zoo = Zoo::new();
    let loader = Arc::new(CodeLoader::new(Default::default()).expect("host ISA"));
    let add = zoo.method(&zoo.math, "add");
    let barrier = Barrier::new(THREADS);

    let names: Vec<String> = std::thread::scope(|threads| {
        let handles: Vec<_> = (0..THREADS)
            .map(|thread| {
                let factory = InvokerFactory::with_loader(&zoo.runtime, loader.clone());
                let (add, barrier) = (&add, &barrier);
                threads.spawn(move || {
                    barrier.wait();
                    (0..BUILDS_PER_THREAD)
                        .map(|build| {
                            let invoker = factory
                                .build(add, BuildOptions::default())
                                .expect("no duplicate definitions");
                            let (a, b) = (thread as i32, build as i32);
                            assert_eq!(
                                invoker.call(None, &[Value::Int(a), Value::Int(b)]).ok(),
                                Some(Value::Int(a + b))
                            );
                            invoker.unit_name().expect("compiled").to_string()
                        })
                        .collect::<Vec<_>>()
                })
            })
            .collect();
        handles
            .into_iter()
            .flat_map(|handle| handle.join().expect("builder thread"))
            .collect()
    });

    let distinct: HashSet<&String> = names.iter().collect();
    assert_eq!(distinct.len(), THREADS * BUILDS_PER_THREAD);
    assert_eq!(loader.sub_scopes_created(), 1);
    let sub_scope = loader.sub_scope(zoo.math.scope()).expect("sub-scope");
    assert_eq!(sub_scope.len(), THREADS * BUILDS_PER_THREAD);
}

#[test]
fn racing_first_builds_on_a_fresh_scope_share_one_sub_scope() {
    let zoo = Zoo::new();
    let loader = Arc::new(CodeLoader::new(Default::default()).expect("host ISA"));
    let scope = zoo.runtime.new_scope("fresh");
    let add = zoo.method(&zoo.math, "add");
    let barrier = Barrier::new(THREADS);

    std::thread::scope(|threads| {
        for _ in 0..THREADS {
            let factory = InvokerFactory::with_loader(&zoo.runtime, loader.clone());
            let (add, barrier, scope) = (&add, &barrier, &scope);
            threads.spawn(move || {
                barrier.wait();
                factory
                    .build(
                        add,
                        BuildOptions {
                            scope: Some(scope.clone()),
                        },
                    )
                    .expect("build add");
            });
        }
    });

    assert_eq!(loader.sub_scopes_created(), 1);
    assert_eq!(loader.sub_scope(&scope).expect("sub-scope").len(), THREADS);
}

#[test]
fn one_invoker_serves_many_threads() {
    let zoo = Zoo::new();
    let find = hotcall::wrap(&zoo.runtime, &zoo.method(&zoo.repo, "find")).expect("build find");
    let greet = hotcall::wrap(&zoo.runtime, &zoo.method(&zoo.greeter, "greet")).expect("build greet");
    let repo = zoo.instance(&zoo.repo);
    let greeter = zoo.instance(&zoo.greeter);

    std::thread::scope(|threads| {
        for thread in 0..THREADS {
            let (find, greet, repo, greeter) = (&find, &greet, &repo, &greeter);
            threads.spawn(move || {
                for _ in 0..32 {
                    let key = format!("key-{thread}");
                    let failure = find.call(Some(repo), &[Value::str(key.as_str())]).unwrap_err();
                    assert_eq!(failure.message(), Some(key.as_str()));
                    assert_eq!(greet.call(Some(greeter), &[]).ok(), Some(Value::str("hi")));
                }
                assert_eq!(hotcall_diag::frame_depth(), 0);
                assert!(!hotcall_runtime::has_pending());
            });
        }
    });
}
