use std::sync::LazyLock;

use hotcall_diag::{Failure, FrameGuard, TraceFrame};
use hotcall_runtime::{HANDLE_FRAME_OWNER, Value};

use crate::dispatch::Dispatch;
use crate::fallback::FALLBACK_FRAME_OWNER;

const GATE_FRAME_OWNER: &str = "hotcall.InvocationGate";

static GATE_FRAME: LazyLock<TraceFrame> = LazyLock::new(|| TraceFrame::new(GATE_FRAME_OWNER, "call"));

/// Enforces the call contract in front of a dispatcher and strips pipeline
/// frames from every failure that leaves it.
pub(crate) struct InvocationGate {
    is_static: bool,
    arity: usize,
    unit_name: Option<String>,
    dispatcher: Box<dyn Dispatch>,
}

impl InvocationGate {
    pub(crate) fn new(
        is_static: bool,
        arity: usize,
        unit_name: Option<String>,
        dispatcher: Box<dyn Dispatch>,
    ) -> Self {
        Self {
            is_static,
            arity,
            unit_name,
            dispatcher,
        }
    }

    pub(crate) fn unit_name(&self) -> Option<&str> {
        self.unit_name.as_deref()
    }

    pub(crate) fn call(&self, receiver: Option<&Value>, args: &[Value]) -> Result<Value, Failure> {
        let result = {
            let _frame = FrameGuard::enter(GATE_FRAME.clone());
            self.check(receiver, args)
                .and_then(|()| self.dispatcher.dispatch(receiver, args))
        };
        result.map_err(|mut failure| {
            self.sanitize(&mut failure);
            failure
        })
    }

    fn check(&self, receiver: Option<&Value>, args: &[Value]) -> Result<(), Failure> {
        if !self.is_static && receiver.is_none_or(Value::is_null) {
            return Err(Failure::illegal_state("missing required instance"));
        }
        if args.len() != self.arity {
            return Err(Failure::illegal_state(format!(
                "arity mismatch: expected {} got {}",
                self.arity,
                args.len()
            )));
        }
        Ok(())
    }

    fn sanitize(&self, failure: &mut Failure) {
        let unit_name = self.unit_name.as_deref();
        failure.retain_frames(&mut |frame: &TraceFrame| {
            let owner = frame.owner();
            owner != GATE_FRAME_OWNER
                && owner != FALLBACK_FRAME_OWNER
                && owner != HANDLE_FRAME_OWNER
                && Some(owner) != unit_name
        });
    }
}

#[cfg(test)]
mod tests {
    use hotcall_diag::{FailureKind, capture_trace};

    use super::*;

    struct Echo;

    impl Dispatch for Echo {
        fn dispatch(&self, _receiver: Option<&Value>, args: &[Value]) -> Result<Value, Failure> {
            Ok(args.first().cloned().unwrap_or_default())
        }
    }

    /// Fails with a trace made of pipeline frames around one user frame.
    struct Noisy;

    impl Dispatch for Noisy {
        fn dispatch(&self, _receiver: Option<&Value>, _args: &[Value]) -> Result<Value, Failure> {
            let _fallback = FrameGuard::enter(TraceFrame::new(FALLBACK_FRAME_OWNER, "dispatch"));
            let _handle = FrameGuard::enter(TraceFrame::new(HANDLE_FRAME_OWNER, "invokeWithArguments"));
            let _unit = FrameGuard::enter(TraceFrame::new("demo.Repo$$Invoker7", "invoke"));
            let _user = FrameGuard::enter(TraceFrame::new("demo.Repo", "find"));
            let cause = Failure::new(FailureKind::custom("Io"), "disk");
            Err(Failure::new(FailureKind::custom("NotFound"), "x").with_cause(cause))
        }
    }

    #[test]
    fn rejects_missing_instance_before_dispatch() {
        let gate = InvocationGate::new(false, 0, None, Box::new(Echo));
        for receiver in [None, Some(&Value::Null)] {
            let failure = gate.call(receiver, &[]).unwrap_err();
            assert_eq!(failure.kind(), &FailureKind::IllegalState);
            assert_eq!(failure.message(), Some("missing required instance"));
        }
        assert!(gate.call(Some(&Value::Int(1)), &[]).is_ok());
    }

    #[test]
    fn rejects_arity_mismatch_before_dispatch() {
        let gate = InvocationGate::new(true, 2, None, Box::new(Echo));
        let failure = gate.call(None, &[Value::Int(1)]).unwrap_err();
        assert_eq!(failure.message(), Some("arity mismatch: expected 2 got 1"));
        assert!(failure.trace().is_empty());
    }

    #[test]
    fn static_targets_ignore_the_receiver() {
        let gate = InvocationGate::new(true, 1, None, Box::new(Echo));
        assert_eq!(gate.call(None, &[Value::Int(4)]).ok(), Some(Value::Int(4)));
        assert_eq!(
            gate.call(Some(&Value::Null), &[Value::Int(4)]).ok(),
            Some(Value::Int(4))
        );
    }

    #[test]
    fn sanitizes_pipeline_frames_through_the_cause_chain() {
        let gate = InvocationGate::new(
            false,
            0,
            Some("demo.Repo$$Invoker7".to_string()),
            Box::new(Noisy),
        );
        let _caller = FrameGuard::enter(TraceFrame::new("app.Main", "main"));
        let failure = gate.call(Some(&Value::Int(0)), &[]).unwrap_err();

        for failure in failure.chain() {
            let owners: Vec<&str> = failure.trace().iter().map(TraceFrame::owner).collect();
            assert_eq!(owners, ["demo.Repo", "app.Main"]);
        }
        assert_eq!(failure.kind().as_str(), "NotFound");
        assert_eq!(capture_trace().len(), 1);
    }
}
