//! VM assembly and lifecycle (component 8, spec §4.6/§6).
//!
//! Builds a runnable [`Vm`] from a [`ModuleImage`]: disassembles and compiles
//! every function body, instantiates globals by evaluating their constant
//! expressions, copies data segments into memory, populates the table with
//! element segments, and runs the module's `start` function if declared.

use crate::compile;
use crate::disasm;
use crate::func::{FuncInstance, FuncRef, Local};
use crate::global::GlobalRef;
use crate::host::{Externals, NopExternals, ProcessHandle};
use crate::memory::{MemoryInstance, MemoryRef};
use crate::module_image::{ExportKind, FunctionDef, InitExpr, ModuleImage};
use crate::table::{TableInstance, TableRef};
use crate::types::{Signature, ValueType};
use crate::validate::{self, ValidationContext};
use crate::{runner, Error, RuntimeValue, Trap, TrapKind};
use alloc::{boxed::Box, format, string::String, vec::Vec};
use core::cell::Cell;
use memory_units::Pages;

/// Options controlling VM construction and execution (spec §6).
#[derive(Debug, Clone, Copy)]
pub struct Options {
    /// Scan compiled function bodies for native-compilable sequences and
    /// install a native backend, if the `virtual_memory` feature is enabled.
    pub enable_aot: bool,
    /// When `false`, a trap poisons the VM: subsequent `exec` calls fail
    /// immediately until `restart()`. When `true` (the default), a trap
    /// leaves the VM usable for further invocations.
    pub recover_traps_as_errors: bool,
    /// Forwarded to the native backend's emitter; the interpreter always
    /// bounds-checks memory regardless of this flag (spec §9 open question).
    pub emit_bounds_checks: bool,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            enable_aot: false,
            recover_traps_as_errors: true,
            emit_bounds_checks: false,
        }
    }
}

/// One active call's saved context (spec §3 "a single-threaded execution
/// context"). `locals_base` is this call's window into the shared
/// [`Vm::value_stack`]: params (left in place by the caller) followed by
/// zeroed declared locals: everything above is this call's operand stack.
pub(crate) struct CallFrame {
    pub(crate) body: alloc::rc::Rc<crate::func::FuncBody>,
    pub(crate) pc: u32,
    pub(crate) locals_base: usize,
    pub(crate) has_result: bool,
}

/// A built, runnable VM instance. Strictly single-threaded (spec §5): only
/// one invocation may be in progress at a time.
pub struct Vm {
    pub(crate) types: Vec<Signature>,
    pub(crate) functions: Vec<FuncRef>,
    pub(crate) table: Option<TableRef>,
    pub(crate) memory: Option<MemoryRef>,
    pub(crate) globals: Vec<GlobalRef>,
    exports: Vec<crate::module_image::Export>,
    start: Option<u32>,
    image: ModuleImage,
    pub(crate) value_stack: Vec<u64>,
    pub(crate) call_stack: Vec<CallFrame>,
    pub(crate) externals: Box<dyn Externals>,
    pub(crate) aborted: Cell<bool>,
    poisoned: bool,
    options: Options,
    #[cfg(feature = "virtual_memory")]
    pub(crate) native: Option<crate::native::NativeBackend>,
}

fn eval_const_expr(expr: &InitExpr, globals: &[GlobalRef]) -> RuntimeValue {
    match expr {
        InitExpr::I32Const(v) => RuntimeValue::I32(*v),
        InitExpr::I64Const(v) => RuntimeValue::I64(*v),
        InitExpr::F32Const(bits) => RuntimeValue::decode_f32(*bits),
        InitExpr::F64Const(bits) => RuntimeValue::decode_f64(*bits),
        InitExpr::GetGlobal(idx) => globals[*idx as usize].get(),
    }
}

impl Vm {
    /// Builds a VM from a decoded module image: validates it, disassembles
    /// and compiles every function body, instantiates globals/table/memory,
    /// copies segments, and runs `start` if declared.
    pub fn new_vm(
        image: ModuleImage,
        options: Options,
        externals: Box<dyn Externals>,
    ) -> Result<Vm, Error> {
        validate::validate_module(&image)?;

        let func_signatures: Vec<Signature> =
            image.functions.iter().map(|f| f.signature().clone()).collect();

        let table = match &image.table {
            Some(limits) => Some(TableInstance::alloc(limits.initial(), limits.maximum())?),
            None => None,
        };
        let memory = match &image.memory {
            Some(limits) => Some(MemoryInstance::alloc(
                Pages(limits.initial() as usize),
                limits.maximum().map(|m| Pages(m as usize)),
            )?),
            None => None,
        };

        // Globals are instantiated in declaration order; each initializer may
        // reference only earlier, already-initialized immutable globals
        // (enforced by `validate_module`).
        let mut globals: Vec<GlobalRef> = Vec::with_capacity(image.globals.len());
        for g in &image.globals {
            let value = eval_const_expr(&g.init, &globals);
            globals.push(crate::global::GlobalInstance::alloc(value, g.mutable));
        }

        let global_types: Vec<(ValueType, bool)> =
            image.globals.iter().map(|g| (g.value_type, g.mutable)).collect();

        #[cfg(feature = "virtual_memory")]
        let mut native_blobs: Vec<Vec<u8>> = Vec::new();
        #[cfg(feature = "virtual_memory")]
        let mut native_meta: Vec<(u32, usize)> = Vec::new();

        let mut functions: Vec<FuncRef> = Vec::with_capacity(image.functions.len());
        for (function_index, def) in image.functions.iter().enumerate() {
            match def {
                FunctionDef::Import {
                    module, field, signature,
                } => {
                    let host_index = functions.len();
                    if let Some(expected) = externals.signature(host_index) {
                        if &expected != signature {
                            return Err(Error::Instantiation(format!(
                                "host signature for import {}.{} is {:?}, module declares {:?}",
                                module, field, expected, signature
                            )));
                        }
                    }
                    functions.push(FuncInstance::alloc_host(signature.clone(), host_index));
                }
                FunctionDef::Local {
                    signature,
                    locals,
                    code,
                } => {
                    let resolve_call = |idx: u32| -> Option<(u32, bool)> {
                        func_signatures
                            .get(idx as usize)
                            .map(|s| (s.params().len() as u32, s.return_type().is_some()))
                    };
                    let resolve_call_indirect = |type_idx: u32| -> Option<(u32, bool)> {
                        image
                            .types
                            .get(type_idx as usize)
                            .map(|s| (s.params().len() as u32, s.return_type().is_some()))
                    };
                    let disassembly = disasm::disassemble(
                        code,
                        signature,
                        &resolve_call,
                        &resolve_call_indirect,
                        function_index as u32,
                    )?;

                    let mut local_types: Vec<ValueType> = signature.params().to_vec();
                    for l in locals {
                        for _ in 0..l.count {
                            local_types.push(l.value_type);
                        }
                    }
                    let ctx = ValidationContext {
                        types: &image.types,
                        func_signatures: &func_signatures,
                        globals: &global_types,
                        has_table: image.table.is_some(),
                        has_memory: image.memory.is_some(),
                    };
                    validate::validate_function(
                        signature,
                        &local_types,
                        &disassembly,
                        &ctx,
                        function_index as u32,
                    )?;

                    let max_operand_depth = disassembly.max_operand_depth;
                    #[allow(unused_mut)]
                    let mut flat = compile::compile(&disassembly);
                    #[cfg(feature = "virtual_memory")]
                    if options.enable_aot {
                        // Splicing happens here, on the still-uniquely-owned
                        // `Instructions` value, before it is wrapped in the
                        // `Rc<FuncBody>` that execution later shares.
                        crate::native::plan_function(&mut flat, &mut native_blobs, &mut native_meta);
                    }
                    functions.push(FuncInstance::alloc_internal(
                        alloc::rc::Rc::new(signature.clone()),
                        crate::func::FuncBody {
                            locals: locals.clone(),
                            code: flat,
                            max_operand_depth,
                        },
                    ));
                }
            }
        }

        for elem in &image.elements {
            let offset = eval_const_expr(&elem.offset, &globals);
            let offset = i32_from(offset) as u32;
            let table = table.as_ref().expect("validated: element segment requires a table");
            for (i, func_idx) in elem.func_indices.iter().enumerate() {
                table.set(offset + i as u32, Some(functions[*func_idx as usize].clone()))?;
            }
        }

        if let Some(memory) = &memory {
            for data in &image.data {
                let offset = eval_const_expr(&data.offset, &globals);
                let offset = i32_from(offset) as u32;
                memory.set(offset, &data.bytes)?;
            }
        }

        #[cfg(feature = "virtual_memory")]
        let native = if options.enable_aot {
            crate::native::NativeBackend::assemble(native_blobs, native_meta).ok()
        } else {
            None
        };

        let mut vm = Vm {
            types: image.types.clone(),
            functions,
            table,
            memory,
            globals,
            exports: image.exports.clone(),
            start: image.start,
            image,
            value_stack: Vec::with_capacity(runner::DEFAULT_VALUE_STACK_LIMIT.min(4096)),
            call_stack: Vec::with_capacity(64),
            externals,
            aborted: Cell::new(false),
            poisoned: false,
            options,
            #[cfg(feature = "virtual_memory")]
            native,
        };

        if let Some(start) = vm.start {
            vm.exec(start as usize, &[])?;
        }

        Ok(vm)
    }

    /// Invokes the function at `function_index` with raw 64-bit argument
    /// slots (spec §6). Returns the raw result slot, or `None` for void
    /// functions.
    pub fn exec(&mut self, function_index: usize, args: &[u64]) -> Result<Option<u64>, Error> {
        if self.poisoned {
            return Err(Error::Instantiation(
                "VM is poisoned by a prior trap; call restart() first".into(),
            ));
        }
        let func = self
            .functions
            .get(function_index)
            .ok_or_else(|| Error::Function(format!("function index {} out of range", function_index)))?
            .clone();
        if func.signature().params().len() != args.len() {
            return Err(Error::Function(format!(
                "argument count mismatch: expected {}, got {}",
                func.signature().params().len(),
                args.len()
            )));
        }

        self.value_stack.clear();
        self.call_stack.clear();
        self.aborted.set(false);

        let result = invoke_guarded(self, &func, args);
        match result {
            Ok(r) => Ok(r),
            Err(trap) => {
                if !self.options.recover_traps_as_errors {
                    self.poisoned = true;
                }
                Err(Error::Trap(trap))
            }
        }
    }

    /// Resets globals, memory and both stacks to their post-construction
    /// state (spec §4.4 "Restart").
    pub fn restart(&mut self) -> Result<(), Error> {
        self.value_stack.clear();
        self.call_stack.clear();
        self.aborted.set(false);
        self.poisoned = false;

        let mut globals: Vec<GlobalRef> = Vec::with_capacity(self.image.globals.len());
        for g in &self.image.globals {
            let value = eval_const_expr(&g.init, &globals);
            globals.push(crate::global::GlobalInstance::alloc(value, g.mutable));
        }
        self.globals = globals;

        if let Some(memory) = &self.memory {
            memory.zero(0, memory_units::Bytes::from(memory.current_size()).0)?;
            memory.reset_lowest_used(u32::MAX);
            for data in &self.image.data {
                let offset = eval_const_expr(&data.offset, &self.globals);
                let offset = i32_from(offset) as u32;
                memory.set(offset, &data.bytes)?;
            }
        }

        if let Some(start) = self.start {
            self.exec(start as usize, &[])?;
        }
        Ok(())
    }

    /// Releases any executable pages held by the native backend.
    pub fn close(&mut self) {
        #[cfg(feature = "virtual_memory")]
        {
            self.native = None;
        }
    }

    /// Replaces the host bridge used to dispatch imported function calls.
    /// Must be called prior to any `exec` that reaches a host import.
    pub fn register_host(&mut self, externals: Box<dyn Externals>) {
        self.externals = externals;
    }

    /// Looks up an export by name (spec §3 "exports: mapping from name to
    /// `(kind, index)`").
    pub fn export(&self, name: &str) -> Option<(ExportKind, u32)> {
        self.exports
            .iter()
            .find(|e| e.name == name)
            .map(|e| (e.kind, e.index))
    }

    pub(crate) fn types(&self) -> &[Signature] {
        &self.types
    }
}

impl Default for Vm {
    fn default() -> Self {
        Vm::new_vm(ModuleImage::new(), Options::default(), Box::new(NopExternals))
            .expect("empty module is always valid")
    }
}

/// Runs one invocation, catching any panic that escapes an opcode routine or
/// a host callable and turning it into a trap rather than unwinding out of
/// the VM (spec §10.2 dispatch-loop boundary).
#[cfg(feature = "std")]
fn invoke_guarded(vm: &mut Vm, func: &FuncRef, args: &[u64]) -> Result<Option<u64>, Trap> {
    std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| runner::invoke(vm, func, args)))
        .unwrap_or_else(|_| Err(Trap::new(TrapKind::Unreachable)))
}

#[cfg(not(feature = "std"))]
fn invoke_guarded(vm: &mut Vm, func: &FuncRef, args: &[u64]) -> Result<Option<u64>, Trap> {
    runner::invoke(vm, func, args)
}

fn i32_from(v: RuntimeValue) -> i32 {
    match v {
        RuntimeValue::I32(v) => v,
        other => panic!("constant expression offset must be i32, got {:?}", other),
    }
}
