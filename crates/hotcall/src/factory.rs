use std::sync::Arc;

use hotcall_codegen::{CodeGenerator, CodeLoader, MethodDescriptor};
use hotcall_runtime::{ExecutionScope, MethodRef, Runtime};

use crate::dispatch::{CompiledInvoker, Dispatch};
use crate::error::BuildError;
use crate::fallback::HandleInvoker;
use crate::gate::InvocationGate;
use crate::invoker::Invoker;
use crate::strategy::Strategy;

/// Per-build settings.
#[derive(Debug, Clone, Default)]
pub struct BuildOptions {
    /// Execution scope the generated unit is defined in. Defaults to the
    /// scope of the target's owner class.
    pub scope: Option<Arc<ExecutionScope>>,
}

/// Builds invokers against one runtime.
///
/// Every build produces a fresh invoker; nothing is cached between builds.
pub struct InvokerFactory<'r> {
    runtime: &'r Runtime,
    loader: Option<Arc<CodeLoader>>,
}

impl<'r> InvokerFactory<'r> {
    /// A factory that defines units through [`CodeLoader::global`].
    pub fn new(runtime: &'r Runtime) -> Self {
        Self {
            runtime,
            loader: None,
        }
    }

    pub fn with_loader(runtime: &'r Runtime, loader: Arc<CodeLoader>) -> Self {
        Self {
            runtime,
            loader: Some(loader),
        }
    }

    pub fn runtime(&self) -> &'r Runtime {
        self.runtime
    }

    #[tracing::instrument(skip_all, fields(method = %method))]
    pub fn build(&self, method: &MethodRef, options: BuildOptions) -> Result<Invoker, BuildError> {
        let descriptor = MethodDescriptor::resolve(method);
        let strategy = Strategy::select(&descriptor, self.runtime.options());
        tracing::debug!(%strategy, "selected invocation strategy");

        let (unit_name, dispatcher): (Option<String>, Box<dyn Dispatch>) = match strategy {
            Strategy::Compiled => {
                let scope = options
                    .scope
                    .unwrap_or_else(|| descriptor.owner().scope().clone());
                let loader = self.loader(&descriptor)?;
                let unit = CodeGenerator::emit(self.runtime, &descriptor)
                    .map_err(|error| BuildError::from_codegen(&descriptor, error))?;
                let loaded = loader
                    .define(&scope, unit)
                    .map_err(|error| BuildError::from_codegen(&descriptor, error))?;
                (
                    Some(loaded.name().to_string()),
                    Box::new(CompiledInvoker::new(loaded.instantiate())) as Box<dyn Dispatch>,
                )
            }
            Strategy::Fallback => {
                let handle = self.runtime.unreflect(method).map_err(|source| {
                    BuildError::UnsupportedAccess {
                        method: descriptor.to_string(),
                        source,
                    }
                })?;
                (
                    None,
                    Box::new(HandleInvoker::new(handle, descriptor.is_static())) as Box<dyn Dispatch>,
                )
            }
        };

        let gate = InvocationGate::new(
            descriptor.is_static(),
            descriptor.arity(),
            unit_name,
            dispatcher,
        );
        Ok(Invoker::new(descriptor, strategy, gate))
    }

    fn loader(&self, descriptor: &MethodDescriptor) -> Result<Arc<CodeLoader>, BuildError> {
        match &self.loader {
            Some(loader) => Ok(loader.clone()),
            None => CodeLoader::global().map_err(|error| BuildError::from_codegen(descriptor, error)),
        }
    }
}

/// Build an invoker for `method`, defining any generated unit in the owner
/// class's scope.
pub fn wrap(runtime: &Runtime, method: &MethodRef) -> Result<Invoker, BuildError> {
    InvokerFactory::new(runtime).build(method, BuildOptions::default())
}

/// Build an invoker for `method`, defining any generated unit in `scope`.
pub fn wrap_in(
    runtime: &Runtime,
    method: &MethodRef,
    scope: &Arc<ExecutionScope>,
) -> Result<Invoker, BuildError> {
    InvokerFactory::new(runtime).build(
        method,
        BuildOptions {
            scope: Some(scope.clone()),
        },
    )
}
