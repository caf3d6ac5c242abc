use std::fmt;
use std::sync::Arc;

use hotcall_codegen::MethodDescriptor;
use hotcall_diag::Failure;
use hotcall_runtime::Value;

use crate::gate::InvocationGate;
use crate::strategy::Strategy;

/// A reusable, specialized caller of one target routine.
///
/// Cloning is cheap and clones share the underlying dispatcher. Invokers are
/// stateless once built and may be called from any number of threads.
#[derive(Clone)]
pub struct Invoker {
    inner: Arc<InvokerInner>,
}

struct InvokerInner {
    descriptor: MethodDescriptor,
    strategy: Strategy,
    gate: InvocationGate,
}

impl Invoker {
    pub(crate) fn new(descriptor: MethodDescriptor, strategy: Strategy, gate: InvocationGate) -> Self {
        Self {
            inner: Arc::new(InvokerInner {
                descriptor,
                strategy,
                gate,
            }),
        }
    }

    /// Call the target.
    ///
    /// `receiver` is ignored for static targets. Instance targets need a
    /// non-null receiver, and `args` must match the declared parameter count;
    /// both are checked before anything is dispatched. A failure raised by
    /// the target comes back unchanged, minus the frames of this pipeline.
    pub fn call(&self, receiver: Option<&Value>, args: &[Value]) -> Result<Value, Failure> {
        self.inner.gate.call(receiver, args)
    }

    /// Close this invoker over a fixed receiver.
    pub fn bind_to(&self, receiver: Option<Value>) -> BoundInvoker {
        BoundInvoker {
            invoker: self.clone(),
            receiver,
        }
    }

    pub fn descriptor(&self) -> &MethodDescriptor {
        &self.inner.descriptor
    }

    pub fn strategy(&self) -> Strategy {
        self.inner.strategy
    }

    /// Name of the generated unit behind a compiled invoker.
    pub fn unit_name(&self) -> Option<&str> {
        self.inner.gate.unit_name()
    }
}

impl fmt::Debug for Invoker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Invoker")
            .field("target", &self.inner.descriptor.to_string())
            .field("strategy", &self.inner.strategy)
            .field("unit", &self.unit_name())
            .finish()
    }
}

/// An [`Invoker`] with its receiver supplied up front.
#[derive(Debug, Clone)]
pub struct BoundInvoker {
    invoker: Invoker,
    receiver: Option<Value>,
}

impl BoundInvoker {
    pub fn call(&self, args: &[Value]) -> Result<Value, Failure> {
        self.invoker.call(self.receiver.as_ref(), args)
    }

    pub fn invoker(&self) -> &Invoker {
        &self.invoker
    }

    pub fn receiver(&self) -> Option<&Value> {
        self.receiver.as_ref()
    }
}
