//! Invoker generation for hotcall.
//!
//! A [`MethodDescriptor`] is turned into a [`GeneratedUnit`]: a short,
//! target-specific op sequence that narrows and unboxes arguments, calls the
//! target's native entry and boxes the result. Units are compiled with
//! Cranelift and loaded into a [`SubScope`], one per execution scope, where
//! each unit name can be defined exactly once.

use std::sync::Arc;

use cranelift::prelude::Configurable;
use cranelift_codegen::{isa, settings};
use hotcall_runtime::ReflectError;

mod descriptor;
mod emit;
mod loader;
mod lower;

pub use descriptor::MethodDescriptor;
pub use emit::{CodeGenerator, GeneratedUnit, LinkedTarget, ThunkOp, UNIT_NAME_MARKER};
pub use loader::{CodeLoader, LoadedUnit, SubScope, UnitInstance};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodegenConfig {
    pub opt_level: OptimizationLevel,
    /// Run the Cranelift verifier on every generated function.
    pub verify: bool,
}

impl Default for CodegenConfig {
    fn default() -> Self {
        Self {
            opt_level: OptimizationLevel::Default,
            verify: cfg!(debug_assertions),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptimizationLevel {
    None,
    Default,
    Aggressive,
}

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum CodegenError {
    #[error("unit `{name}` is already defined in this scope")]
    DuplicateDefinition { name: String },
    #[error("unsupported type `{ty}` in {position} of `{method}`")]
    UnsupportedType {
        method: String,
        position: String,
        ty: String,
    },
    #[error("malformed unit `{unit}`: {detail}")]
    MalformedUnit { unit: String, detail: String },
    #[error("cannot link target: {0}")]
    Link(#[from] ReflectError),
    #[error("Cranelift module error: {detail}")]
    Module { detail: String },
    #[error("host ISA not supported: {detail}")]
    UnsupportedHost { detail: String },
}

pub(crate) fn build_isa(config: &CodegenConfig) -> Result<Arc<dyn isa::TargetIsa>, CodegenError> {
    let mut flag_builder = settings::builder();
    flag_builder
        .set("opt_level", opt_level_setting(config.opt_level))
        .map_err(|detail| CodegenError::Module {
            detail: detail.to_string(),
        })?;
    flag_builder
        .set("enable_verifier", if config.verify { "true" } else { "false" })
        .map_err(|detail| CodegenError::Module {
            detail: detail.to_string(),
        })?;
    // Generated code is placed at arbitrary addresses and calls absolute
    // helper addresses.
    flag_builder
        .set("use_colocated_libcalls", "false")
        .map_err(|detail| CodegenError::Module {
            detail: detail.to_string(),
        })?;
    flag_builder
        .set("is_pic", "false")
        .map_err(|detail| CodegenError::Module {
            detail: detail.to_string(),
        })?;

    let isa_builder = cranelift_native::builder().map_err(|detail| CodegenError::UnsupportedHost {
        detail: detail.to_string(),
    })?;
    isa_builder
        .finish(settings::Flags::new(flag_builder))
        .map_err(|detail| CodegenError::Module {
            detail: detail.to_string(),
        })
}

fn opt_level_setting(level: OptimizationLevel) -> &'static str {
    match level {
        OptimizationLevel::None => "none",
        OptimizationLevel::Default => "speed",
        OptimizationLevel::Aggressive => "speed_and_size",
    }
}
