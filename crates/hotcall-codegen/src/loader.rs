//! Code-loading scopes: where generated units are compiled and kept alive.

use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

use cranelift_codegen::isa;
use cranelift_jit::{JITBuilder, JITModule};
use dashmap::DashMap;
use hotcall_diag::{Failure, TraceFrame};
use hotcall_runtime::abi::Helper;
use hotcall_runtime::{ExecutionScope, ScopeId, Value, take_pending};
use parking_lot::Mutex;

use crate::descriptor::MethodDescriptor;
use crate::emit::GeneratedUnit;
use crate::lower::lower_unit;
use crate::{CodegenConfig, CodegenError, build_isa};

/// Routine every unit appears as in failure traces.
const UNIT_FRAME_ROUTINE: &str = "invoke";

static NEXT_LOADER: AtomicU64 = AtomicU64::new(0);
static GLOBAL: OnceLock<Result<Arc<CodeLoader>, CodegenError>> = OnceLock::new();

/// Registry of code-loading sub-scopes, one per execution scope.
///
/// Sub-scopes are attached to their execution scope's local storage, so they
/// live exactly as long as the scope does.
pub struct CodeLoader {
    id: u64,
    config: CodegenConfig,
    isa: Arc<dyn isa::TargetIsa>,
    sub_scopes_created: AtomicUsize,
}

impl CodeLoader {
    pub fn new(config: CodegenConfig) -> Result<Self, CodegenError> {
        let isa = build_isa(&config)?;
        Ok(Self {
            id: NEXT_LOADER.fetch_add(1, Ordering::Relaxed),
            config,
            isa,
            sub_scopes_created: AtomicUsize::new(0),
        })
    }

    /// The process-wide loader, built with the default configuration on
    /// first use.
    pub fn global() -> Result<Arc<CodeLoader>, CodegenError> {
        GLOBAL
            .get_or_init(|| CodeLoader::new(CodegenConfig::default()).map(Arc::new))
            .clone()
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn config(&self) -> &CodegenConfig {
        &self.config
    }

    /// The sub-scope attached to `scope`, created on first request.
    pub fn sub_scope(&self, scope: &Arc<ExecutionScope>) -> Result<Arc<SubScope>, CodegenError> {
        scope
            .local_or_init(self.id, || {
                self.sub_scopes_created.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(loader = self.id, scope = scope.name(), "created code-loading sub-scope");
                SubScope::new(self.isa.clone(), scope)
            })
            .ok_or_else(|| CodegenError::Module {
                detail: format!("scope `{}` holds a foreign value under loader key {}", scope.name(), self.id),
            })
    }

    /// How many sub-scopes this loader has ever created.
    pub fn sub_scopes_created(&self) -> usize {
        self.sub_scopes_created.load(Ordering::Relaxed)
    }

    pub fn define(
        &self,
        scope: &Arc<ExecutionScope>,
        unit: GeneratedUnit,
    ) -> Result<Arc<LoadedUnit>, CodegenError> {
        self.sub_scope(scope)?.define(unit)
    }
}

impl fmt::Debug for CodeLoader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CodeLoader")
            .field("id", &self.id)
            .field("config", &self.config)
            .field("isa", &self.isa.triple().to_string())
            .finish()
    }
}

type UnitSlot = Arc<Mutex<Option<Arc<LoadedUnit>>>>;

/// The code-loading namespace of one execution scope.
///
/// Each unit name can be defined once. Operations on different names run in
/// parallel; operations on the same name are serialized.
pub struct SubScope {
    scope: ScopeId,
    scope_name: Arc<str>,
    isa: Arc<dyn isa::TargetIsa>,
    units: DashMap<String, UnitSlot>,
}

impl SubScope {
    fn new(isa: Arc<dyn isa::TargetIsa>, scope: &ExecutionScope) -> Self {
        Self {
            scope: scope.id(),
            scope_name: scope.name().into(),
            isa,
            units: DashMap::new(),
        }
    }

    pub fn scope(&self) -> ScopeId {
        self.scope
    }

    /// Compile and record `unit` under its name.
    pub fn define(&self, unit: GeneratedUnit) -> Result<Arc<LoadedUnit>, CodegenError> {
        let slot = self.units.entry(unit.name().to_string()).or_default().clone();
        let mut slot = slot.lock();
        if slot.is_some() {
            return Err(CodegenError::DuplicateDefinition {
                name: unit.name().to_string(),
            });
        }

        let loaded = Arc::new(LoadedUnit::compile(&self.isa, self.scope, unit)?);
        tracing::debug!(
            unit = loaded.name(),
            scope = &*self.scope_name,
            "defined invoker unit"
        );
        *slot = Some(loaded.clone());
        Ok(loaded)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.unit(name).is_some()
    }

    pub fn unit(&self, name: &str) -> Option<Arc<LoadedUnit>> {
        let slot = self.units.get(name)?.clone();
        let unit = slot.lock().clone();
        unit
    }

    /// Number of units defined so far.
    pub fn len(&self) -> usize {
        self.units
            .iter()
            .filter(|entry| entry.value().lock().is_some())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for SubScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubScope")
            .field("scope", &self.scope_name)
            .field("units", &self.units.len())
            .finish()
    }
}

type ThunkFn = unsafe extern "C" fn(*const Value, *const Value, *mut Value);

/// A compiled unit, ready to run.
pub struct LoadedUnit {
    entry: ThunkFn,
    unit: GeneratedUnit,
    scope: ScopeId,
    // Addresses of the frame and of the classes and methods referenced by
    // `unit` are embedded in the compiled code.
    frame: Box<TraceFrame>,
    _module: JITModule,
}

// SAFETY: the module is finalized before construction and never touched
// again; the compiled code only reads data owned by this struct.
unsafe impl Send for LoadedUnit {}
// SAFETY: see above.
unsafe impl Sync for LoadedUnit {}

impl LoadedUnit {
    fn compile(
        isa: &Arc<dyn isa::TargetIsa>,
        scope: ScopeId,
        unit: GeneratedUnit,
    ) -> Result<Self, CodegenError> {
        let mut builder = JITBuilder::with_isa(isa.clone(), cranelift_module::default_libcall_names());
        for helper in Helper::ALL {
            builder.symbol(helper.symbol(), helper.address());
        }
        let mut module = JITModule::new(builder);

        let frame = Box::new(TraceFrame::new(unit.name(), UNIT_FRAME_ROUTINE));
        let func_id = lower_unit(&mut module, &unit, &*frame)?;
        module
            .finalize_definitions()
            .map_err(|detail| CodegenError::Module {
                detail: detail.to_string(),
            })?;
        let code = module.get_finalized_function(func_id);
        // SAFETY: `lower_unit` emits exactly this signature.
        let entry = unsafe { std::mem::transmute::<*const u8, ThunkFn>(code) };

        Ok(Self {
            entry,
            unit,
            scope,
            frame,
            _module: module,
        })
    }

    pub fn name(&self) -> &str {
        self.unit.name()
    }

    pub fn scope(&self) -> ScopeId {
        self.scope
    }

    pub fn unit(&self) -> &GeneratedUnit {
        &self.unit
    }

    pub fn descriptor(&self) -> &MethodDescriptor {
        self.unit.descriptor()
    }

    /// The frame this unit contributes to failure traces.
    pub fn frame(&self) -> &TraceFrame {
        &self.frame
    }

    /// A callable instance of this unit.
    pub fn instantiate(self: &Arc<Self>) -> UnitInstance {
        UnitInstance { unit: self.clone() }
    }
}

impl fmt::Debug for LoadedUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadedUnit")
            .field("name", &self.unit.name())
            .field("scope", &self.scope)
            .finish()
    }
}

/// One instantiated unit. Cheap to clone; holds no lock.
#[derive(Debug, Clone)]
pub struct UnitInstance {
    unit: Arc<LoadedUnit>,
}

impl UnitInstance {
    pub fn unit(&self) -> &Arc<LoadedUnit> {
        &self.unit
    }

    /// Run the unit.
    ///
    /// A failure raised by a conversion or by the target is returned as it
    /// was raised.
    ///
    /// # Safety
    /// `args` must hold at least as many values as the descriptor declares
    /// parameters, and `receiver` must be present for instance targets.
    pub unsafe fn invoke(&self, receiver: Option<&Value>, args: &[Value]) -> Result<Value, Failure> {
        let null = Value::Null;
        let receiver = receiver.unwrap_or(&null);
        let mut out = Value::Null;
        if let Some(stale) = take_pending() {
            tracing::debug!(failure = %stale, "discarding stale pending failure");
        }
        // SAFETY: guaranteed by the caller; the thunk reads `args` only at
        // declared parameter indices.
        unsafe { (self.unit.entry)(receiver, args.as_ptr(), &mut out) };
        match take_pending() {
            Some(failure) => Err(failure),
            None => Ok(out),
        }
    }
}
