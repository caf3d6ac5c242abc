use hotcall_codegen::UnitInstance;
use hotcall_diag::Failure;
use hotcall_runtime::Value;

/// The call behind an invocation gate.
///
/// Implementations may assume the gate already checked receiver presence
/// and argument count.
pub(crate) trait Dispatch: Send + Sync {
    fn dispatch(&self, receiver: Option<&Value>, args: &[Value]) -> Result<Value, Failure>;
}

/// Dispatch through a generated unit.
pub(crate) struct CompiledInvoker {
    instance: UnitInstance,
}

impl CompiledInvoker {
    pub(crate) fn new(instance: UnitInstance) -> Self {
        Self { instance }
    }
}

impl Dispatch for CompiledInvoker {
    fn dispatch(&self, receiver: Option<&Value>, args: &[Value]) -> Result<Value, Failure> {
        // SAFETY: only reachable through `InvocationGate::call`, which rejects
        // calls whose argument count or receiver does not fit the descriptor.
        unsafe { self.instance.invoke(receiver, args) }
    }
}
