//! Lowering of generated units to Cranelift IR.
//!
//! Every unit becomes a function
//! `extern "C" fn(receiver: *const Value, args: *const Value, out: *mut Value)`.
//! Checked conversions, boxing, virtual resolution and frame bookkeeping go
//! through the runtime's ABI helpers; the target itself is called natively.

use std::collections::HashMap;
use std::mem::size_of;

use cranelift::prelude::{
    AbiParam, Block, FunctionBuilder, FunctionBuilderContext, InstBuilder, Value, types,
};
use cranelift_codegen::ir::{FuncRef, Signature};
use cranelift_jit::JITModule;
use cranelift_module::{FuncId, Linkage, Module, ModuleError};
use hotcall_diag::TraceFrame;
use hotcall_runtime::abi::{AbiSlot, Helper};
use hotcall_runtime::{Primitive, TypeRef};

use crate::CodegenError;
use crate::emit::{GeneratedUnit, LinkedTarget, ThunkOp};

/// Operand-stack entries while lowering.
#[derive(Debug, Clone, Copy)]
enum Operand {
    /// Pointer to a value owned by the caller.
    Borrowed(Value),
    /// Raw primitive.
    Scalar(Primitive, Value),
    /// Primitive scheduled for boxing into the result.
    Boxed(Primitive, Value),
    /// Owned `*mut Value` returned by a reference-returning target.
    Owned(Value),
    Null,
}

fn abi_param(slot: AbiSlot, pointer: types::Type) -> AbiParam {
    match slot {
        AbiSlot::Ptr => AbiParam::new(pointer),
        AbiSlot::Bool => AbiParam::new(types::I8).uext(),
        AbiSlot::Int => AbiParam::new(types::I32).sext(),
        AbiSlot::Long => AbiParam::new(types::I64),
        AbiSlot::Double => AbiParam::new(types::F64),
    }
}

fn module_error(error: ModuleError) -> CodegenError {
    match error {
        ModuleError::DuplicateDefinition(name) => CodegenError::DuplicateDefinition { name },
        other => CodegenError::Module {
            detail: format!("{other:?}"),
        },
    }
}

/// Compile `unit` into `module` and return its function id. `frame` is the
/// unit's own trace frame and must outlive the compiled code.
pub(crate) fn lower_unit(
    module: &mut JITModule,
    unit: &GeneratedUnit,
    frame: *const TraceFrame,
) -> Result<FuncId, CodegenError> {
    let pointer = module.target_config().pointer_type();
    let mut signature = module.make_signature();
    for _ in 0..3 {
        signature.params.push(AbiParam::new(pointer));
    }
    let func_id = module
        .declare_function(unit.name(), Linkage::Export, &signature)
        .map_err(module_error)?;

    let mut context = module.make_context();
    context.func.signature = signature;
    let mut builder_context = FunctionBuilderContext::new();
    {
        let builder = FunctionBuilder::new(&mut context.func, &mut builder_context);
        let lowering = Lowering {
            module: &mut *module,
            builder,
            helpers: HashMap::new(),
            pointer,
            unit,
            stack: Vec::new(),
            bail: None,
        };
        lowering.lower(frame)?;
    }

    module
        .define_function(func_id, &mut context)
        .map_err(module_error)?;
    module.clear_context(&mut context);
    Ok(func_id)
}

struct Lowering<'a, 'f> {
    module: &'a mut JITModule,
    builder: FunctionBuilder<'f>,
    helpers: HashMap<Helper, FuncRef>,
    pointer: types::Type,
    unit: &'a GeneratedUnit,
    stack: Vec<Operand>,
    bail: Option<Block>,
}

impl Lowering<'_, '_> {
    fn lower(mut self, frame: *const TraceFrame) -> Result<(), CodegenError> {
        let entry = self.builder.create_block();
        self.builder.append_block_params_for_function_params(entry);
        self.builder.switch_to_block(entry);
        let params = self.builder.block_params(entry).to_vec();
        let [receiver, args, out] = params[..] else {
            return Err(self.malformed("thunk signature must take three pointers"));
        };

        let frame = self.pointer_const(frame as usize);
        self.call_helper(Helper::EnterFrame, &[frame])?;

        let unit = self.unit;
        let mut returned = false;
        for op in unit.ops() {
            if returned {
                return Err(self.malformed(format!("`{op}` follows `return`")));
            }
            match op {
                ThunkOp::LoadReceiver => self.stack.push(Operand::Borrowed(receiver)),
                ThunkOp::LoadArg(index) => {
                    let offset = index
                        .checked_mul(size_of::<hotcall_runtime::Value>())
                        .and_then(|offset| i64::try_from(offset).ok())
                        .ok_or_else(|| self.malformed(format!("argument index {index} too large")))?;
                    let address = self.builder.ins().iadd_imm(args, offset);
                    self.stack.push(Operand::Borrowed(address));
                }
                ThunkOp::CheckCast(class) => {
                    let value = self.pop_borrowed(op)?;
                    let class = self.pointer_const(std::sync::Arc::as_ptr(class) as usize);
                    let checked = self.call_helper_value(Helper::CheckCast, &[value, class])?;
                    self.stack.push(Operand::Borrowed(checked));
                }
                ThunkOp::Unbox(kind) => {
                    let value = self.pop_borrowed(op)?;
                    let raw = self.call_helper_value(Helper::unbox(*kind), &[value])?;
                    self.stack.push(Operand::Scalar(*kind, raw));
                }
                ThunkOp::InvokeStatic(target) => self.lower_invoke(target, false)?,
                ThunkOp::InvokeVirtual(target) => self.lower_invoke(target, true)?,
                ThunkOp::PushNull => self.stack.push(Operand::Null),
                ThunkOp::Box(kind) => match self.stack.pop() {
                    Some(Operand::Scalar(actual, value)) if actual == *kind => {
                        self.stack.push(Operand::Boxed(*kind, value));
                    }
                    other => return Err(self.unexpected(op, other)),
                },
                ThunkOp::Return => {
                    match self.stack.pop() {
                        Some(Operand::Null) => self.call_helper(Helper::BoxVoid, &[out])?,
                        Some(Operand::Boxed(kind, value)) => {
                            self.call_helper(Helper::boxing(kind), &[out, value])?
                        }
                        Some(Operand::Owned(value)) => self.call_helper(Helper::BoxRef, &[out, value])?,
                        other => return Err(self.unexpected(op, other)),
                    }
                    self.call_helper(Helper::ExitFrame, &[])?;
                    self.builder.ins().return_(&[]);
                    returned = true;
                }
            }
        }
        if !returned {
            return Err(self.malformed("missing `return`"));
        }
        if !self.stack.is_empty() {
            return Err(self.malformed(format!("{} operands left at return", self.stack.len())));
        }

        if let Some(bail) = self.bail {
            self.builder.switch_to_block(bail);
            self.call_helper(Helper::ExitFrame, &[])?;
            self.builder.ins().return_(&[]);
        }
        self.builder.seal_all_blocks();
        self.builder.finalize();
        Ok(())
    }

    fn lower_invoke(&mut self, target: &LinkedTarget, is_virtual: bool) -> Result<(), CodegenError> {
        let method = target.method();
        let receiver_count = usize::from(!method.is_static());
        let operand_count = method.params().len() + receiver_count;
        if self.stack.len() < operand_count {
            return Err(self.malformed(format!(
                "`{method}` needs {operand_count} operands, found {}",
                self.stack.len()
            )));
        }
        let operands = self.stack.split_off(self.stack.len() - operand_count);

        let mut call_signature = self.module.make_signature();
        let mut call_args = Vec::with_capacity(operand_count);
        if receiver_count == 1 {
            let Operand::Borrowed(receiver) = operands[0] else {
                return Err(self.malformed(format!("`{method}` receiver is not a value")));
            };
            call_signature.params.push(AbiParam::new(self.pointer));
            call_args.push(receiver);
        }
        for (param, operand) in method.params().iter().zip(&operands[receiver_count..]) {
            let (slot, value) = match (param, *operand) {
                (TypeRef::Primitive(kind), Operand::Scalar(actual, value)) if *kind == actual => {
                    (AbiSlot::from(*kind), value)
                }
                (TypeRef::Reference(_), Operand::Borrowed(value)) => (AbiSlot::Ptr, value),
                (param, operand) => {
                    return Err(self.malformed(format!(
                        "`{method}` expects {param}, found {operand:?}"
                    )));
                }
            };
            call_signature.params.push(abi_param(slot, self.pointer));
            call_args.push(value);
        }
        let result_slot = match method.ret() {
            TypeRef::Void => None,
            TypeRef::Primitive(kind) => Some(AbiSlot::from(*kind)),
            TypeRef::Reference(_) => Some(AbiSlot::Ptr),
        };
        if let Some(slot) = result_slot {
            call_signature.returns.push(abi_param(slot, self.pointer));
        }

        let callee = if is_virtual {
            let Some(&receiver) = call_args.first().filter(|_| receiver_count == 1) else {
                return Err(self.malformed(format!("virtual call to static `{method}`")));
            };
            let method_ptr = self.pointer_const(std::sync::Arc::as_ptr(method) as usize);
            self.call_helper_value(Helper::ResolveVirtual, &[receiver, method_ptr])?
        } else {
            self.pointer_const(target.entry().as_ptr() as usize)
        };

        self.guard_pending()?;

        let frame = self.pointer_const(method.frame() as *const TraceFrame as usize);
        self.call_helper(Helper::EnterFrame, &[frame])?;
        let result = self.call_indirect(call_signature, callee, &call_args);
        self.call_helper(Helper::ExitFrame, &[])?;

        match (method.ret(), result) {
            (TypeRef::Void, _) => {}
            (TypeRef::Primitive(kind), Some(value)) => self.stack.push(Operand::Scalar(*kind, value)),
            (TypeRef::Reference(_), Some(value)) => self.stack.push(Operand::Owned(value)),
            (_, None) => return Err(self.malformed(format!("`{method}` produced no result"))),
        }
        Ok(())
    }

    /// Leave through the bail block if a helper parked a failure.
    fn guard_pending(&mut self) -> Result<(), CodegenError> {
        let pending = self.call_helper_value(Helper::PendingFailure, &[])?;
        let bail = match self.bail {
            Some(bail) => bail,
            None => {
                let bail = self.builder.create_block();
                self.bail = Some(bail);
                bail
            }
        };
        let proceed = self.builder.create_block();
        self.builder.ins().brif(pending, bail, &[], proceed, &[]);
        self.builder.switch_to_block(proceed);
        Ok(())
    }

    fn call_indirect(&mut self, signature: Signature, callee: Value, args: &[Value]) -> Option<Value> {
        let sig_ref = self.builder.import_signature(signature);
        let call = self.builder.ins().call_indirect(sig_ref, callee, args);
        self.builder.inst_results(call).first().copied()
    }

    fn helper(&mut self, helper: Helper) -> Result<FuncRef, CodegenError> {
        if let Some(func_ref) = self.helpers.get(&helper) {
            return Ok(*func_ref);
        }
        let mut signature = self.module.make_signature();
        for slot in helper.params() {
            signature.params.push(abi_param(*slot, self.pointer));
        }
        if let Some(slot) = helper.result() {
            signature.returns.push(abi_param(slot, self.pointer));
        }
        let func_id = self
            .module
            .declare_function(helper.symbol(), Linkage::Import, &signature)
            .map_err(module_error)?;
        let func_ref = self.module.declare_func_in_func(func_id, self.builder.func);
        self.helpers.insert(helper, func_ref);
        Ok(func_ref)
    }

    fn call_helper(&mut self, helper: Helper, args: &[Value]) -> Result<(), CodegenError> {
        let func_ref = self.helper(helper)?;
        self.builder.ins().call(func_ref, args);
        Ok(())
    }

    fn call_helper_value(&mut self, helper: Helper, args: &[Value]) -> Result<Value, CodegenError> {
        let func_ref = self.helper(helper)?;
        let call = self.builder.ins().call(func_ref, args);
        self.builder
            .inst_results(call)
            .first()
            .copied()
            .ok_or_else(|| self.malformed(format!("helper `{}` returns nothing", helper.symbol())))
    }

    fn pointer_const(&mut self, address: usize) -> Value {
        self.builder.ins().iconst(self.pointer, address as i64)
    }

    fn pop_borrowed(&mut self, op: &ThunkOp) -> Result<Value, CodegenError> {
        match self.stack.pop() {
            Some(Operand::Borrowed(value)) => Ok(value),
            other => Err(self.unexpected(op, other)),
        }
    }

    fn unexpected(&self, op: &ThunkOp, found: Option<Operand>) -> CodegenError {
        match found {
            Some(operand) => self.malformed(format!("`{op}` cannot take {operand:?}")),
            None => self.malformed(format!("`{op}` on an empty stack")),
        }
    }

    fn malformed(&self, detail: impl Into<String>) -> CodegenError {
        CodegenError::MalformedUnit {
            unit: self.unit.name().to_string(),
            detail: detail.into(),
        }
    }
}
