use hotcall_diag::{Failure, FrameGuard, TraceFrame};
use hotcall_runtime::{DynamicHandle, Value};

use crate::dispatch::Dispatch;

/// Owner of the frame the fallback adapter contributes to failure traces.
pub(crate) const FALLBACK_FRAME_OWNER: &str = "hotcall.HandleInvoker";

/// Dispatch through a dynamic handle, for targets generated code cannot
/// link.
pub(crate) struct HandleInvoker {
    handle: DynamicHandle,
    is_static: bool,
}

impl HandleInvoker {
    pub(crate) fn new(handle: DynamicHandle, is_static: bool) -> Self {
        Self { handle, is_static }
    }
}

impl Dispatch for HandleInvoker {
    fn dispatch(&self, receiver: Option<&Value>, args: &[Value]) -> Result<Value, Failure> {
        let _frame = FrameGuard::enter(TraceFrame::new(FALLBACK_FRAME_OWNER, "dispatch"));
        let mut arguments = Vec::with_capacity(args.len() + 1);
        if !self.is_static {
            arguments.push(receiver.cloned().unwrap_or_default());
        }
        arguments.extend_from_slice(args);
        self.handle
            .invoke_with_arguments(&arguments)
            .map_err(Failure::unwrap_carrier)
    }
}
