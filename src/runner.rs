//! Interpreter core (component 5, spec §4.4) plus the host-call bridge
//! (component 7, spec §4.6).
//!
//! The operand stack and every active call's locals share one `Vec<u64>`
//! (`Vm::value_stack`): a call's params are left in place by its caller, its
//! declared locals are zeroed and pushed on top, and everything above that
//! is its own operand stack. Calls never recurse at the Rust level — `run`
//! drives a flat loop over `Vm::call_stack`, pushing a [`CallFrame`] per
//! Wasm-level call and popping one per `return`/fall-through, so a deep Wasm
//! call chain costs `Vec` growth, not native stack depth.

use crate::func::{FuncBody, FuncInstanceInternal, FuncRef};
use crate::host::ProcessHandle;
use crate::isa::Instruction;
use crate::memory::MemoryRef;
use crate::nan_preserving_float::{F32, F64};
use crate::opcode::Op;
use crate::types::Signature;
use crate::value::{
    ArithmeticOps, ExtendInto, Float, Integer, LittleEndianConvert, RuntimeValue, TransmuteInto,
    TryTruncateInto, WrapInto,
};
use crate::vm::{CallFrame, Vm};
use crate::{Trap, TrapKind};
use alloc::rc::Rc;
use alloc::vec::Vec;
use memory_units::Pages;

/// Maximum number of nested calls (spec §4.4 "call stack exhausted").
pub const DEFAULT_CALL_STACK_LIMIT: usize = 1024;
/// Soft pre-allocation size for `Vm::value_stack`; the stack itself is
/// otherwise unbounded, growing with the `Vec`.
pub const DEFAULT_VALUE_STACK_LIMIT: usize = 1024 * 1024;

/// Invokes `func` with `raw_args` already in the uniform-slot encoding
/// (spec §6 `exec`). The caller (`Vm::exec`) has already cleared both
/// stacks.
pub(crate) fn invoke(vm: &mut Vm, func: &FuncRef, raw_args: &[u64]) -> Result<Option<u64>, Trap> {
    vm.value_stack.extend_from_slice(raw_args);

    let has_result = func.signature().return_type().is_some();
    match func.as_internal() {
        FuncInstanceInternal::Host {
            host_func_index,
            signature,
        } => {
            let idx = *host_func_index;
            let signature = signature.clone();
            invoke_host(vm, idx, &signature)?;
        }
        FuncInstanceInternal::Internal { .. } => {
            let body = func.body().expect("internal function always has a body");
            let params_count = func.signature().params().len();
            push_frame(vm, body, params_count, has_result)?;
            run(vm)?;
        }
    }

    Ok(if has_result {
        Some(vm.value_stack.pop().expect("result left on stack"))
    } else {
        None
    })
}

/// Drives the call stack to empty, one flat-bytecode instruction at a time.
fn run(vm: &mut Vm) -> Result<(), Trap> {
    while !vm.call_stack.is_empty() {
        step(vm)?;
    }
    Ok(())
}

fn step(vm: &mut Vm) -> Result<(), Trap> {
    let frame_idx = vm.call_stack.len() - 1;
    let body: Rc<FuncBody> = Rc::clone(&vm.call_stack[frame_idx].body);
    let pc = vm.call_stack[frame_idx].pc;

    let instr = match body.code.get(pc) {
        Some(instr) => instr,
        None => {
            pop_frame(vm);
            return Ok(());
        }
    };

    // `instr` borrows `body`, an owned `Rc` independent of `vm`, so the
    // match arms below are free to mutate `vm.value_stack`/`vm.call_stack`.
    match instr {
        Instruction::Jmp(target) => {
            vm.call_stack[frame_idx].pc = *target;
        }
        Instruction::JmpZ(target) => {
            let c = pop_i32(&mut vm.value_stack);
            if c == 0 {
                vm.call_stack[frame_idx].pc = *target;
            } else {
                vm.call_stack[frame_idx].pc = pc + 1;
            }
        }
        Instruction::JmpNz {
            target,
            discard,
            preserve_top,
        } => {
            let c = pop_i32(&mut vm.value_stack);
            if c != 0 {
                do_discard(&mut vm.value_stack, *discard, *preserve_top);
                vm.call_stack[frame_idx].pc = *target;
            } else {
                vm.call_stack[frame_idx].pc = pc + 1;
            }
        }
        Instruction::BrTable(table_idx) => {
            let index = pop_i32(&mut vm.value_stack) as u32;
            let table = &body.code.branch_tables[*table_idx as usize];
            let target = table.targets.get(index as usize).unwrap_or(&table.default);
            do_discard(&mut vm.value_stack, target.discard, target.preserve_top);
            vm.call_stack[frame_idx].pc = target.dst_pc;
        }
        Instruction::Discard(n) => {
            do_discard(&mut vm.value_stack, *n, false);
            vm.call_stack[frame_idx].pc = pc + 1;
        }
        Instruction::DiscardPreserveTop(n) => {
            do_discard(&mut vm.value_stack, *n, true);
            vm.call_stack[frame_idx].pc = pc + 1;
        }
        Instruction::NativeExec(n) => {
            #[cfg(feature = "virtual_memory")]
            {
                crate::native::exec_unit(vm, *n)?;
            }
            #[cfg(not(feature = "virtual_memory"))]
            {
                let _ = n;
                unreachable!("native units only exist when the native backend compiled them");
            }
        }
        Instruction::Return(discard) => {
            let has_result = vm.call_stack[frame_idx].has_result;
            do_discard(&mut vm.value_stack, *discard, has_result);
            pop_frame(vm);
        }
        Instruction::Op(op) => match op {
            Op::Call(func_index) => {
                vm.call_stack[frame_idx].pc = pc + 1;
                do_call(vm, *func_index)?;
            }
            Op::CallIndirect(type_idx) => {
                vm.call_stack[frame_idx].pc = pc + 1;
                do_call_indirect(vm, *type_idx)?;
            }
            other => {
                exec_op(other, vm)?;
                vm.call_stack[frame_idx].pc = pc + 1;
            }
        },
    }
    Ok(())
}

/// Pops the active frame, whose operand stack has already been discarded
/// down to (at most) the result arity — by the instruction that triggered
/// this exit, or, on a natural fall-off-the-end, by the function-level
/// block's own compiled `end`.
fn pop_frame(vm: &mut Vm) {
    let frame = vm
        .call_stack
        .pop()
        .expect("pop_frame called with an empty call stack");
    let result = if frame.has_result {
        Some(vm.value_stack.pop().expect("result left on stack"))
    } else {
        None
    };
    vm.value_stack.truncate(frame.locals_base);
    if let Some(result) = result {
        vm.value_stack.push(result);
    }
}

fn push_frame(
    vm: &mut Vm,
    body: Rc<FuncBody>,
    params_count: usize,
    has_result: bool,
) -> Result<(), Trap> {
    if vm.call_stack.len() >= DEFAULT_CALL_STACK_LIMIT {
        return Err(TrapKind::CallStackExhausted.into());
    }
    let locals_base = vm.value_stack.len() - params_count;
    for local in &body.locals {
        for _ in 0..local.count {
            vm.value_stack.push(0u64);
        }
    }
    vm.call_stack.push(CallFrame {
        body,
        pc: 0,
        locals_base,
        has_result,
    });
    Ok(())
}

fn do_call(vm: &mut Vm, func_index: u32) -> Result<(), Trap> {
    let func = vm.functions[func_index as usize].clone();
    invoke_func(vm, &func)
}

fn do_call_indirect(vm: &mut Vm, type_idx: u32) -> Result<(), Trap> {
    let table_index = pop_i32(&mut vm.value_stack) as u32;
    let table = vm
        .table
        .as_ref()
        .expect("validated: call_indirect requires a table");
    let entry = match table.get(table_index) {
        Ok(Some(entry)) => entry,
        Ok(None) | Err(_) => return Err(TrapKind::UndefinedTableEntry.into()),
    };
    if entry.signature() != &vm.types[type_idx as usize] {
        return Err(TrapKind::IndirectCallSignatureMismatch.into());
    }
    invoke_func(vm, &entry)
}

/// Shared call dispatch for `call`/`call_indirect` executed from inside the
/// interpreter loop (as opposed to the top-level [`invoke`] entry point).
fn invoke_func(vm: &mut Vm, func: &FuncRef) -> Result<(), Trap> {
    match func.as_internal() {
        FuncInstanceInternal::Host {
            host_func_index,
            signature,
        } => {
            let idx = *host_func_index;
            let signature = signature.clone();
            invoke_host(vm, idx, &signature)
        }
        FuncInstanceInternal::Internal { .. } => {
            let body = func.body().expect("internal function always has a body");
            let params_count = func.signature().params().len();
            let has_result = func.signature().return_type().is_some();
            push_frame(vm, body, params_count, has_result)
        }
    }
}

fn invoke_host(vm: &mut Vm, host_func_index: usize, signature: &Signature) -> Result<(), Trap> {
    let n = signature.params().len();
    let start = vm.value_stack.len() - n;
    let mut args: Vec<RuntimeValue> = Vec::with_capacity(n);
    for (i, ty) in signature.params().iter().enumerate() {
        args.push(RuntimeValue::from_slot(*ty, vm.value_stack[start + i]));
    }
    vm.value_stack.truncate(start);

    let args_ref = (&args[..]).into();
    let mut process = ProcessHandle::new(vm.memory.as_ref(), &vm.aborted);
    let result = vm
        .externals
        .invoke_index(host_func_index, args_ref, &mut process)?;

    if vm.aborted.get() {
        return Err(TrapKind::HostTerminated.into());
    }
    match (result, signature.return_type()) {
        (Some(v), Some(expected)) if v.value_type() == expected => {
            vm.value_stack.push(v.into_slot());
        }
        (None, None) => {}
        _ => return Err(TrapKind::UnexpectedSignature.into()),
    }
    Ok(())
}

fn do_discard(stack: &mut Vec<u64>, n: u32, preserve_top: bool) {
    if preserve_top {
        if n == 0 {
            return;
        }
        let top = stack.pop().expect("operand stack underflow");
        let new_len = stack.len() - n as usize;
        stack.truncate(new_len);
        stack.push(top);
    } else if n > 0 {
        let new_len = stack.len() - n as usize;
        stack.truncate(new_len);
    }
}

fn pop_i32(stack: &mut Vec<u64>) -> i32 {
    stack.pop().expect("operand stack underflow") as u32 as i32
}
fn push_i32(stack: &mut Vec<u64>, v: i32) {
    stack.push(v as u32 as u64);
}
fn pop_u32(stack: &mut Vec<u64>) -> u32 {
    stack.pop().expect("operand stack underflow") as u32
}
fn push_u32(stack: &mut Vec<u64>, v: u32) {
    stack.push(v as u64);
}
fn pop_i64(stack: &mut Vec<u64>) -> i64 {
    stack.pop().expect("operand stack underflow") as i64
}
fn push_i64(stack: &mut Vec<u64>, v: i64) {
    stack.push(v as u64);
}
fn pop_u64(stack: &mut Vec<u64>) -> u64 {
    stack.pop().expect("operand stack underflow")
}
fn push_u64(stack: &mut Vec<u64>, v: u64) {
    stack.push(v);
}
fn pop_f32(stack: &mut Vec<u64>) -> F32 {
    F32::from_bits(stack.pop().expect("operand stack underflow") as u32)
}
fn push_f32(stack: &mut Vec<u64>, v: F32) {
    stack.push(v.to_bits() as u64);
}
fn pop_f64(stack: &mut Vec<u64>) -> F64 {
    F64::from_bits(stack.pop().expect("operand stack underflow"))
}
fn push_f64(stack: &mut Vec<u64>, v: F64) {
    stack.push(v.to_bits());
}

/// `F32`/`F64` each carry an *inherent* `min`/`max` (plain IEEE minNum,
/// defined alongside `from_bits`/`abs` in `nan_preserving_float`) that would
/// silently shadow `Float::min`/`max`'s NaN-propagating Wasm semantics under
/// ordinary `.min()`/`.max()` method-call syntax. Route through the trait
/// explicitly to get the right one.
fn wasm_min<T: Float<T>>(a: T, b: T) -> T {
    Float::min(a, b)
}
fn wasm_max<T: Float<T>>(a: T, b: T) -> T {
    Float::max(a, b)
}

fn mem_addr(base: i32, offset: u32) -> u64 {
    (base as u32 as u64) + offset as u64
}

fn mem_load<T: LittleEndianConvert>(memory: &MemoryRef, base: i32, offset: u32) -> Result<T, Trap> {
    let addr = mem_addr(base, offset);
    if addr > u32::MAX as u64 {
        return Err(TrapKind::OutOfBoundsMemoryAccess.into());
    }
    memory
        .get_value(addr as u32)
        .map_err(|_| TrapKind::OutOfBoundsMemoryAccess.into())
}

fn mem_store<T: LittleEndianConvert>(
    memory: &MemoryRef,
    base: i32,
    offset: u32,
    value: T,
) -> Result<(), Trap> {
    let addr = mem_addr(base, offset);
    if addr > u32::MAX as u64 {
        return Err(TrapKind::OutOfBoundsMemoryAccess.into());
    }
    memory
        .set_value(addr as u32, value)
        .map_err(|_| TrapKind::OutOfBoundsMemoryAccess.into())
}

/// Executes every opcode whose stack effect needs no structural rewriting:
/// everything `isa::Instruction::Op` can carry (arithmetic, comparisons,
/// conversions, consts, locals/globals, memory, drop/select). `call` and
/// `call_indirect` are intercepted by `step` before reaching here.
fn exec_op(op: &Op, vm: &mut Vm) -> Result<(), Trap> {
    use Op::*;
    match op {
        Unreachable => return Err(TrapKind::Unreachable.into()),
        Nop => {}
        Drop => {
            vm.value_stack.pop().expect("operand stack underflow");
        }
        Select => {
            let c = pop_i32(&mut vm.value_stack);
            let b = pop_u64(&mut vm.value_stack);
            let a = pop_u64(&mut vm.value_stack);
            push_u64(&mut vm.value_stack, if c != 0 { a } else { b });
        }

        GetLocal(idx) => {
            let base = vm.call_stack.last().expect("op executes within a frame").locals_base;
            let v = vm.value_stack[base + *idx as usize];
            vm.value_stack.push(v);
        }
        SetLocal(idx) => {
            let base = vm.call_stack.last().expect("op executes within a frame").locals_base;
            let v = vm.value_stack.pop().expect("operand stack underflow");
            vm.value_stack[base + *idx as usize] = v;
        }
        TeeLocal(idx) => {
            let base = vm.call_stack.last().expect("op executes within a frame").locals_base;
            let v = *vm.value_stack.last().expect("operand stack underflow");
            vm.value_stack[base + *idx as usize] = v;
        }
        GetGlobal(idx) => {
            let v = vm.globals[*idx as usize].get();
            vm.value_stack.push(v.into_slot());
        }
        SetGlobal(idx) => {
            let slot = vm.value_stack.pop().expect("operand stack underflow");
            let global = &vm.globals[*idx as usize];
            let v = RuntimeValue::from_slot(global.value_type(), slot);
            global
                .set(v)
                .expect("validated: global.set type/mutability checked ahead of time");
        }

        I32Load(offset) => {
            let base = pop_i32(&mut vm.value_stack);
            let memory = vm.memory.as_ref().expect("validated: module has memory");
            let v: i32 = mem_load(memory, base, *offset)?;
            push_i32(&mut vm.value_stack, v);
        }
        I64Load(offset) => {
            let base = pop_i32(&mut vm.value_stack);
            let memory = vm.memory.as_ref().expect("validated: module has memory");
            let v: i64 = mem_load(memory, base, *offset)?;
            push_i64(&mut vm.value_stack, v);
        }
        F32Load(offset) => {
            let base = pop_i32(&mut vm.value_stack);
            let memory = vm.memory.as_ref().expect("validated: module has memory");
            let v: F32 = mem_load(memory, base, *offset)?;
            push_f32(&mut vm.value_stack, v);
        }
        F64Load(offset) => {
            let base = pop_i32(&mut vm.value_stack);
            let memory = vm.memory.as_ref().expect("validated: module has memory");
            let v: F64 = mem_load(memory, base, *offset)?;
            push_f64(&mut vm.value_stack, v);
        }
        I32Load8S(offset) => {
            let base = pop_i32(&mut vm.value_stack);
            let memory = vm.memory.as_ref().expect("validated: module has memory");
            let v: i8 = mem_load(memory, base, *offset)?;
            push_i32(&mut vm.value_stack, v.extend_into());
        }
        I32Load8U(offset) => {
            let base = pop_i32(&mut vm.value_stack);
            let memory = vm.memory.as_ref().expect("validated: module has memory");
            let v: u8 = mem_load(memory, base, *offset)?;
            push_i32(&mut vm.value_stack, v.extend_into());
        }
        I32Load16S(offset) => {
            let base = pop_i32(&mut vm.value_stack);
            let memory = vm.memory.as_ref().expect("validated: module has memory");
            let v: i16 = mem_load(memory, base, *offset)?;
            push_i32(&mut vm.value_stack, v.extend_into());
        }
        I32Load16U(offset) => {
            let base = pop_i32(&mut vm.value_stack);
            let memory = vm.memory.as_ref().expect("validated: module has memory");
            let v: u16 = mem_load(memory, base, *offset)?;
            push_i32(&mut vm.value_stack, v.extend_into());
        }
        I64Load8S(offset) => {
            let base = pop_i32(&mut vm.value_stack);
            let memory = vm.memory.as_ref().expect("validated: module has memory");
            let v: i8 = mem_load(memory, base, *offset)?;
            push_i64(&mut vm.value_stack, v.extend_into());
        }
        I64Load8U(offset) => {
            let base = pop_i32(&mut vm.value_stack);
            let memory = vm.memory.as_ref().expect("validated: module has memory");
            let v: u8 = mem_load(memory, base, *offset)?;
            push_i64(&mut vm.value_stack, v.extend_into());
        }
        I64Load16S(offset) => {
            let base = pop_i32(&mut vm.value_stack);
            let memory = vm.memory.as_ref().expect("validated: module has memory");
            let v: i16 = mem_load(memory, base, *offset)?;
            push_i64(&mut vm.value_stack, v.extend_into());
        }
        I64Load16U(offset) => {
            let base = pop_i32(&mut vm.value_stack);
            let memory = vm.memory.as_ref().expect("validated: module has memory");
            let v: u16 = mem_load(memory, base, *offset)?;
            push_i64(&mut vm.value_stack, v.extend_into());
        }
        I64Load32S(offset) => {
            let base = pop_i32(&mut vm.value_stack);
            let memory = vm.memory.as_ref().expect("validated: module has memory");
            let v: i32 = mem_load(memory, base, *offset)?;
            push_i64(&mut vm.value_stack, v.extend_into());
        }
        I64Load32U(offset) => {
            let base = pop_i32(&mut vm.value_stack);
            let memory = vm.memory.as_ref().expect("validated: module has memory");
            let v: u32 = mem_load(memory, base, *offset)?;
            push_i64(&mut vm.value_stack, v.extend_into());
        }

        I32Store(offset) => {
            let v = pop_i32(&mut vm.value_stack);
            let base = pop_i32(&mut vm.value_stack);
            let memory = vm.memory.as_ref().expect("validated: module has memory");
            mem_store(memory, base, *offset, v)?;
        }
        I64Store(offset) => {
            let v = pop_i64(&mut vm.value_stack);
            let base = pop_i32(&mut vm.value_stack);
            let memory = vm.memory.as_ref().expect("validated: module has memory");
            mem_store(memory, base, *offset, v)?;
        }
        F32Store(offset) => {
            let v = pop_f32(&mut vm.value_stack);
            let base = pop_i32(&mut vm.value_stack);
            let memory = vm.memory.as_ref().expect("validated: module has memory");
            mem_store(memory, base, *offset, v)?;
        }
        F64Store(offset) => {
            let v = pop_f64(&mut vm.value_stack);
            let base = pop_i32(&mut vm.value_stack);
            let memory = vm.memory.as_ref().expect("validated: module has memory");
            mem_store(memory, base, *offset, v)?;
        }
        I32Store8(offset) => {
            let v = pop_i32(&mut vm.value_stack);
            let base = pop_i32(&mut vm.value_stack);
            let memory = vm.memory.as_ref().expect("validated: module has memory");
            let v8: i8 = v.wrap_into();
            mem_store(memory, base, *offset, v8)?;
        }
        I32Store16(offset) => {
            let v = pop_i32(&mut vm.value_stack);
            let base = pop_i32(&mut vm.value_stack);
            let memory = vm.memory.as_ref().expect("validated: module has memory");
            let v16: i16 = v.wrap_into();
            mem_store(memory, base, *offset, v16)?;
        }
        I64Store8(offset) => {
            let v = pop_i64(&mut vm.value_stack);
            let base = pop_i32(&mut vm.value_stack);
            let memory = vm.memory.as_ref().expect("validated: module has memory");
            let v8: i8 = v.wrap_into();
            mem_store(memory, base, *offset, v8)?;
        }
        I64Store16(offset) => {
            let v = pop_i64(&mut vm.value_stack);
            let base = pop_i32(&mut vm.value_stack);
            let memory = vm.memory.as_ref().expect("validated: module has memory");
            let v16: i16 = v.wrap_into();
            mem_store(memory, base, *offset, v16)?;
        }
        I64Store32(offset) => {
            let v = pop_i64(&mut vm.value_stack);
            let base = pop_i32(&mut vm.value_stack);
            let memory = vm.memory.as_ref().expect("validated: module has memory");
            let v32: i32 = v.wrap_into();
            mem_store(memory, base, *offset, v32)?;
        }
        CurrentMemory => {
            let memory = vm.memory.as_ref().expect("validated: module has memory");
            push_i32(&mut vm.value_stack, memory.current_size().0 as i32);
        }
        GrowMemory => {
            let delta = pop_u32(&mut vm.value_stack);
            let memory = vm.memory.as_ref().expect("validated: module has memory");
            match memory.grow(Pages(delta as usize)) {
                Ok(prev) => push_i32(&mut vm.value_stack, prev.0 as i32),
                Err(_) => push_i32(&mut vm.value_stack, -1),
            }
        }

        I32Const(v) => push_i32(&mut vm.value_stack, *v),
        I64Const(v) => push_i64(&mut vm.value_stack, *v),
        F32Const(bits) => push_f32(&mut vm.value_stack, F32::from_bits(*bits)),
        F64Const(bits) => push_f64(&mut vm.value_stack, F64::from_bits(*bits)),

        I32Eqz => {
            let a = pop_i32(&mut vm.value_stack);
            push_i32(&mut vm.value_stack, (a == 0) as i32);
        }
        I32Eq => {
            let b = pop_i32(&mut vm.value_stack);
            let a = pop_i32(&mut vm.value_stack);
            push_i32(&mut vm.value_stack, (a == b) as i32);
        }
        I32Ne => {
            let b = pop_i32(&mut vm.value_stack);
            let a = pop_i32(&mut vm.value_stack);
            push_i32(&mut vm.value_stack, (a != b) as i32);
        }
        I32LtS => {
            let b = pop_i32(&mut vm.value_stack);
            let a = pop_i32(&mut vm.value_stack);
            push_i32(&mut vm.value_stack, (a < b) as i32);
        }
        I32LtU => {
            let b = pop_u32(&mut vm.value_stack);
            let a = pop_u32(&mut vm.value_stack);
            push_i32(&mut vm.value_stack, (a < b) as i32);
        }
        I32GtS => {
            let b = pop_i32(&mut vm.value_stack);
            let a = pop_i32(&mut vm.value_stack);
            push_i32(&mut vm.value_stack, (a > b) as i32);
        }
        I32GtU => {
            let b = pop_u32(&mut vm.value_stack);
            let a = pop_u32(&mut vm.value_stack);
            push_i32(&mut vm.value_stack, (a > b) as i32);
        }
        I32LeS => {
            let b = pop_i32(&mut vm.value_stack);
            let a = pop_i32(&mut vm.value_stack);
            push_i32(&mut vm.value_stack, (a <= b) as i32);
        }
        I32LeU => {
            let b = pop_u32(&mut vm.value_stack);
            let a = pop_u32(&mut vm.value_stack);
            push_i32(&mut vm.value_stack, (a <= b) as i32);
        }
        I32GeS => {
            let b = pop_i32(&mut vm.value_stack);
            let a = pop_i32(&mut vm.value_stack);
            push_i32(&mut vm.value_stack, (a >= b) as i32);
        }
        I32GeU => {
            let b = pop_u32(&mut vm.value_stack);
            let a = pop_u32(&mut vm.value_stack);
            push_i32(&mut vm.value_stack, (a >= b) as i32);
        }

        I64Eqz => {
            let a = pop_i64(&mut vm.value_stack);
            push_i32(&mut vm.value_stack, (a == 0) as i32);
        }
        I64Eq => {
            let b = pop_i64(&mut vm.value_stack);
            let a = pop_i64(&mut vm.value_stack);
            push_i32(&mut vm.value_stack, (a == b) as i32);
        }
        I64Ne => {
            let b = pop_i64(&mut vm.value_stack);
            let a = pop_i64(&mut vm.value_stack);
            push_i32(&mut vm.value_stack, (a != b) as i32);
        }
        I64LtS => {
            let b = pop_i64(&mut vm.value_stack);
            let a = pop_i64(&mut vm.value_stack);
            push_i32(&mut vm.value_stack, (a < b) as i32);
        }
        I64LtU => {
            let b = pop_u64(&mut vm.value_stack);
            let a = pop_u64(&mut vm.value_stack);
            push_i32(&mut vm.value_stack, (a < b) as i32);
        }
        I64GtS => {
            let b = pop_i64(&mut vm.value_stack);
            let a = pop_i64(&mut vm.value_stack);
            push_i32(&mut vm.value_stack, (a > b) as i32);
        }
        I64GtU => {
            let b = pop_u64(&mut vm.value_stack);
            let a = pop_u64(&mut vm.value_stack);
            push_i32(&mut vm.value_stack, (a > b) as i32);
        }
        I64LeS => {
            let b = pop_i64(&mut vm.value_stack);
            let a = pop_i64(&mut vm.value_stack);
            push_i32(&mut vm.value_stack, (a <= b) as i32);
        }
        I64LeU => {
            let b = pop_u64(&mut vm.value_stack);
            let a = pop_u64(&mut vm.value_stack);
            push_i32(&mut vm.value_stack, (a <= b) as i32);
        }
        I64GeS => {
            let b = pop_i64(&mut vm.value_stack);
            let a = pop_i64(&mut vm.value_stack);
            push_i32(&mut vm.value_stack, (a >= b) as i32);
        }
        I64GeU => {
            let b = pop_u64(&mut vm.value_stack);
            let a = pop_u64(&mut vm.value_stack);
            push_i32(&mut vm.value_stack, (a >= b) as i32);
        }

        F32Eq => {
            let b = pop_f32(&mut vm.value_stack);
            let a = pop_f32(&mut vm.value_stack);
            push_i32(&mut vm.value_stack, (a == b) as i32);
        }
        F32Ne => {
            let b = pop_f32(&mut vm.value_stack);
            let a = pop_f32(&mut vm.value_stack);
            push_i32(&mut vm.value_stack, (a != b) as i32);
        }
        F32Lt => {
            let b = pop_f32(&mut vm.value_stack);
            let a = pop_f32(&mut vm.value_stack);
            push_i32(&mut vm.value_stack, (a < b) as i32);
        }
        F32Gt => {
            let b = pop_f32(&mut vm.value_stack);
            let a = pop_f32(&mut vm.value_stack);
            push_i32(&mut vm.value_stack, (a > b) as i32);
        }
        F32Le => {
            let b = pop_f32(&mut vm.value_stack);
            let a = pop_f32(&mut vm.value_stack);
            push_i32(&mut vm.value_stack, (a <= b) as i32);
        }
        F32Ge => {
            let b = pop_f32(&mut vm.value_stack);
            let a = pop_f32(&mut vm.value_stack);
            push_i32(&mut vm.value_stack, (a >= b) as i32);
        }

        F64Eq => {
            let b = pop_f64(&mut vm.value_stack);
            let a = pop_f64(&mut vm.value_stack);
            push_i32(&mut vm.value_stack, (a == b) as i32);
        }
        F64Ne => {
            let b = pop_f64(&mut vm.value_stack);
            let a = pop_f64(&mut vm.value_stack);
            push_i32(&mut vm.value_stack, (a != b) as i32);
        }
        F64Lt => {
            let b = pop_f64(&mut vm.value_stack);
            let a = pop_f64(&mut vm.value_stack);
            push_i32(&mut vm.value_stack, (a < b) as i32);
        }
        F64Gt => {
            let b = pop_f64(&mut vm.value_stack);
            let a = pop_f64(&mut vm.value_stack);
            push_i32(&mut vm.value_stack, (a > b) as i32);
        }
        F64Le => {
            let b = pop_f64(&mut vm.value_stack);
            let a = pop_f64(&mut vm.value_stack);
            push_i32(&mut vm.value_stack, (a <= b) as i32);
        }
        F64Ge => {
            let b = pop_f64(&mut vm.value_stack);
            let a = pop_f64(&mut vm.value_stack);
            push_i32(&mut vm.value_stack, (a >= b) as i32);
        }

        I32Clz => {
            let a = pop_i32(&mut vm.value_stack);
            push_i32(&mut vm.value_stack, a.leading_zeros() as i32);
        }
        I32Ctz => {
            let a = pop_i32(&mut vm.value_stack);
            push_i32(&mut vm.value_stack, a.trailing_zeros() as i32);
        }
        I32Popcnt => {
            let a = pop_i32(&mut vm.value_stack);
            push_i32(&mut vm.value_stack, a.count_ones() as i32);
        }
        I32Add => {
            let b = pop_i32(&mut vm.value_stack);
            let a = pop_i32(&mut vm.value_stack);
            push_i32(&mut vm.value_stack, a.add(b));
        }
        I32Sub => {
            let b = pop_i32(&mut vm.value_stack);
            let a = pop_i32(&mut vm.value_stack);
            push_i32(&mut vm.value_stack, a.sub(b));
        }
        I32Mul => {
            let b = pop_i32(&mut vm.value_stack);
            let a = pop_i32(&mut vm.value_stack);
            push_i32(&mut vm.value_stack, a.mul(b));
        }
        I32DivS => {
            let b = pop_i32(&mut vm.value_stack);
            let a = pop_i32(&mut vm.value_stack);
            push_i32(&mut vm.value_stack, a.div(b)?);
        }
        I32DivU => {
            let b = pop_u32(&mut vm.value_stack);
            let a = pop_u32(&mut vm.value_stack);
            push_u32(&mut vm.value_stack, a.div(b)?);
        }
        I32RemS => {
            let b = pop_i32(&mut vm.value_stack);
            let a = pop_i32(&mut vm.value_stack);
            push_i32(&mut vm.value_stack, a.rem(b)?);
        }
        I32RemU => {
            let b = pop_u32(&mut vm.value_stack);
            let a = pop_u32(&mut vm.value_stack);
            push_u32(&mut vm.value_stack, a.rem(b)?);
        }
        I32And => {
            let b = pop_i32(&mut vm.value_stack);
            let a = pop_i32(&mut vm.value_stack);
            push_i32(&mut vm.value_stack, a & b);
        }
        I32Or => {
            let b = pop_i32(&mut vm.value_stack);
            let a = pop_i32(&mut vm.value_stack);
            push_i32(&mut vm.value_stack, a | b);
        }
        I32Xor => {
            let b = pop_i32(&mut vm.value_stack);
            let a = pop_i32(&mut vm.value_stack);
            push_i32(&mut vm.value_stack, a ^ b);
        }
        I32Shl => {
            let b = pop_i32(&mut vm.value_stack);
            let a = pop_i32(&mut vm.value_stack);
            push_i32(&mut vm.value_stack, a.wrapping_shl(b as u32));
        }
        I32ShrS => {
            let b = pop_i32(&mut vm.value_stack);
            let a = pop_i32(&mut vm.value_stack);
            push_i32(&mut vm.value_stack, a.wrapping_shr(b as u32));
        }
        I32ShrU => {
            let b = pop_i32(&mut vm.value_stack);
            let a = pop_u32(&mut vm.value_stack);
            push_u32(&mut vm.value_stack, a.wrapping_shr(b as u32));
        }
        I32Rotl => {
            let b = pop_i32(&mut vm.value_stack);
            let a = pop_i32(&mut vm.value_stack);
            push_i32(&mut vm.value_stack, a.rotl(b));
        }
        I32Rotr => {
            let b = pop_i32(&mut vm.value_stack);
            let a = pop_i32(&mut vm.value_stack);
            push_i32(&mut vm.value_stack, a.rotr(b));
        }

        I64Clz => {
            let a = pop_i64(&mut vm.value_stack);
            push_i64(&mut vm.value_stack, a.leading_zeros() as i64);
        }
        I64Ctz => {
            let a = pop_i64(&mut vm.value_stack);
            push_i64(&mut vm.value_stack, a.trailing_zeros() as i64);
        }
        I64Popcnt => {
            let a = pop_i64(&mut vm.value_stack);
            push_i64(&mut vm.value_stack, a.count_ones() as i64);
        }
        I64Add => {
            let b = pop_i64(&mut vm.value_stack);
            let a = pop_i64(&mut vm.value_stack);
            push_i64(&mut vm.value_stack, a.add(b));
        }
        I64Sub => {
            let b = pop_i64(&mut vm.value_stack);
            let a = pop_i64(&mut vm.value_stack);
            push_i64(&mut vm.value_stack, a.sub(b));
        }
        I64Mul => {
            let b = pop_i64(&mut vm.value_stack);
            let a = pop_i64(&mut vm.value_stack);
            push_i64(&mut vm.value_stack, a.mul(b));
        }
        I64DivS => {
            let b = pop_i64(&mut vm.value_stack);
            let a = pop_i64(&mut vm.value_stack);
            push_i64(&mut vm.value_stack, a.div(b)?);
        }
        I64DivU => {
            let b = pop_u64(&mut vm.value_stack);
            let a = pop_u64(&mut vm.value_stack);
            push_u64(&mut vm.value_stack, a.div(b)?);
        }
        I64RemS => {
            let b = pop_i64(&mut vm.value_stack);
            let a = pop_i64(&mut vm.value_stack);
            push_i64(&mut vm.value_stack, a.rem(b)?);
        }
        I64RemU => {
            let b = pop_u64(&mut vm.value_stack);
            let a = pop_u64(&mut vm.value_stack);
            push_u64(&mut vm.value_stack, a.rem(b)?);
        }
        I64And => {
            let b = pop_i64(&mut vm.value_stack);
            let a = pop_i64(&mut vm.value_stack);
            push_i64(&mut vm.value_stack, a & b);
        }
        I64Or => {
            let b = pop_i64(&mut vm.value_stack);
            let a = pop_i64(&mut vm.value_stack);
            push_i64(&mut vm.value_stack, a | b);
        }
        I64Xor => {
            let b = pop_i64(&mut vm.value_stack);
            let a = pop_i64(&mut vm.value_stack);
            push_i64(&mut vm.value_stack, a ^ b);
        }
        I64Shl => {
            let b = pop_i64(&mut vm.value_stack);
            let a = pop_i64(&mut vm.value_stack);
            push_i64(&mut vm.value_stack, a.wrapping_shl(b as u32));
        }
        I64ShrS => {
            let b = pop_i64(&mut vm.value_stack);
            let a = pop_i64(&mut vm.value_stack);
            push_i64(&mut vm.value_stack, a.wrapping_shr(b as u32));
        }
        I64ShrU => {
            let b = pop_i64(&mut vm.value_stack);
            let a = pop_u64(&mut vm.value_stack);
            push_u64(&mut vm.value_stack, a.wrapping_shr(b as u32));
        }
        I64Rotl => {
            let b = pop_i64(&mut vm.value_stack);
            let a = pop_i64(&mut vm.value_stack);
            push_i64(&mut vm.value_stack, a.rotl(b));
        }
        I64Rotr => {
            let b = pop_i64(&mut vm.value_stack);
            let a = pop_i64(&mut vm.value_stack);
            push_i64(&mut vm.value_stack, a.rotr(b));
        }

        F32Abs => {
            let a = pop_f32(&mut vm.value_stack);
            push_f32(&mut vm.value_stack, Float::abs(a));
        }
        F32Neg => {
            let a = pop_f32(&mut vm.value_stack);
            push_f32(&mut vm.value_stack, -a);
        }
        F32Ceil => {
            let a = pop_f32(&mut vm.value_stack);
            push_f32(&mut vm.value_stack, a.ceil().canonicalize_nan());
        }
        F32Floor => {
            let a = pop_f32(&mut vm.value_stack);
            push_f32(&mut vm.value_stack, a.floor().canonicalize_nan());
        }
        F32Trunc => {
            let a = pop_f32(&mut vm.value_stack);
            push_f32(&mut vm.value_stack, a.trunc().canonicalize_nan());
        }
        F32Nearest => {
            let a = pop_f32(&mut vm.value_stack);
            push_f32(&mut vm.value_stack, a.nearest().canonicalize_nan());
        }
        F32Sqrt => {
            let a = pop_f32(&mut vm.value_stack);
            push_f32(&mut vm.value_stack, a.sqrt().canonicalize_nan());
        }
        F32Add => {
            let b = pop_f32(&mut vm.value_stack);
            let a = pop_f32(&mut vm.value_stack);
            push_f32(&mut vm.value_stack, a.add(b).canonicalize_nan());
        }
        F32Sub => {
            let b = pop_f32(&mut vm.value_stack);
            let a = pop_f32(&mut vm.value_stack);
            push_f32(&mut vm.value_stack, a.sub(b).canonicalize_nan());
        }
        F32Mul => {
            let b = pop_f32(&mut vm.value_stack);
            let a = pop_f32(&mut vm.value_stack);
            push_f32(&mut vm.value_stack, a.mul(b).canonicalize_nan());
        }
        F32Div => {
            let b = pop_f32(&mut vm.value_stack);
            let a = pop_f32(&mut vm.value_stack);
            push_f32(&mut vm.value_stack, a.div(b)?.canonicalize_nan());
        }
        F32Min => {
            let b = pop_f32(&mut vm.value_stack);
            let a = pop_f32(&mut vm.value_stack);
            push_f32(&mut vm.value_stack, wasm_min(a, b).canonicalize_nan());
        }
        F32Max => {
            let b = pop_f32(&mut vm.value_stack);
            let a = pop_f32(&mut vm.value_stack);
            push_f32(&mut vm.value_stack, wasm_max(a, b).canonicalize_nan());
        }
        F32Copysign => {
            let b = pop_f32(&mut vm.value_stack);
            let a = pop_f32(&mut vm.value_stack);
            push_f32(&mut vm.value_stack, a.copysign(b));
        }

        F64Abs => {
            let a = pop_f64(&mut vm.value_stack);
            push_f64(&mut vm.value_stack, Float::abs(a));
        }
        F64Neg => {
            let a = pop_f64(&mut vm.value_stack);
            push_f64(&mut vm.value_stack, -a);
        }
        F64Ceil => {
            let a = pop_f64(&mut vm.value_stack);
            push_f64(&mut vm.value_stack, a.ceil().canonicalize_nan());
        }
        F64Floor => {
            let a = pop_f64(&mut vm.value_stack);
            push_f64(&mut vm.value_stack, a.floor().canonicalize_nan());
        }
        F64Trunc => {
            let a = pop_f64(&mut vm.value_stack);
            push_f64(&mut vm.value_stack, a.trunc().canonicalize_nan());
        }
        F64Nearest => {
            let a = pop_f64(&mut vm.value_stack);
            push_f64(&mut vm.value_stack, a.nearest().canonicalize_nan());
        }
        F64Sqrt => {
            let a = pop_f64(&mut vm.value_stack);
            push_f64(&mut vm.value_stack, a.sqrt().canonicalize_nan());
        }
        F64Add => {
            let b = pop_f64(&mut vm.value_stack);
            let a = pop_f64(&mut vm.value_stack);
            push_f64(&mut vm.value_stack, a.add(b).canonicalize_nan());
        }
        F64Sub => {
            let b = pop_f64(&mut vm.value_stack);
            let a = pop_f64(&mut vm.value_stack);
            push_f64(&mut vm.value_stack, a.sub(b).canonicalize_nan());
        }
        F64Mul => {
            let b = pop_f64(&mut vm.value_stack);
            let a = pop_f64(&mut vm.value_stack);
            push_f64(&mut vm.value_stack, a.mul(b).canonicalize_nan());
        }
        F64Div => {
            let b = pop_f64(&mut vm.value_stack);
            let a = pop_f64(&mut vm.value_stack);
            push_f64(&mut vm.value_stack, a.div(b)?.canonicalize_nan());
        }
        F64Min => {
            let b = pop_f64(&mut vm.value_stack);
            let a = pop_f64(&mut vm.value_stack);
            push_f64(&mut vm.value_stack, wasm_min(a, b).canonicalize_nan());
        }
        F64Max => {
            let b = pop_f64(&mut vm.value_stack);
            let a = pop_f64(&mut vm.value_stack);
            push_f64(&mut vm.value_stack, wasm_max(a, b).canonicalize_nan());
        }
        F64Copysign => {
            let b = pop_f64(&mut vm.value_stack);
            let a = pop_f64(&mut vm.value_stack);
            push_f64(&mut vm.value_stack, a.copysign(b));
        }

        I32WrapI64 => {
            let a = pop_i64(&mut vm.value_stack);
            let v: i32 = a.wrap_into();
            push_i32(&mut vm.value_stack, v);
        }
        I32TruncSF32 => {
            let a = pop_f32(&mut vm.value_stack);
            let v: i32 = a.try_truncate_into()?;
            push_i32(&mut vm.value_stack, v);
        }
        I32TruncUF32 => {
            let a = pop_f32(&mut vm.value_stack);
            let v: u32 = a.try_truncate_into()?;
            push_u32(&mut vm.value_stack, v);
        }
        I32TruncSF64 => {
            let a = pop_f64(&mut vm.value_stack);
            let v: i32 = a.try_truncate_into()?;
            push_i32(&mut vm.value_stack, v);
        }
        I32TruncUF64 => {
            let a = pop_f64(&mut vm.value_stack);
            let v: u32 = a.try_truncate_into()?;
            push_u32(&mut vm.value_stack, v);
        }
        I64ExtendSI32 => {
            let a = pop_i32(&mut vm.value_stack);
            let v: i64 = a.extend_into();
            push_i64(&mut vm.value_stack, v);
        }
        I64ExtendUI32 => {
            let a = pop_u32(&mut vm.value_stack);
            let v: i64 = a.extend_into();
            push_i64(&mut vm.value_stack, v);
        }
        I64TruncSF32 => {
            let a = pop_f32(&mut vm.value_stack);
            let v: i64 = a.try_truncate_into()?;
            push_i64(&mut vm.value_stack, v);
        }
        I64TruncUF32 => {
            let a = pop_f32(&mut vm.value_stack);
            let v: u64 = a.try_truncate_into()?;
            push_u64(&mut vm.value_stack, v);
        }
        I64TruncSF64 => {
            let a = pop_f64(&mut vm.value_stack);
            let v: i64 = a.try_truncate_into()?;
            push_i64(&mut vm.value_stack, v);
        }
        I64TruncUF64 => {
            let a = pop_f64(&mut vm.value_stack);
            let v: u64 = a.try_truncate_into()?;
            push_u64(&mut vm.value_stack, v);
        }
        F32ConvertSI32 => {
            let a = pop_i32(&mut vm.value_stack);
            let v: F32 = a.extend_into();
            push_f32(&mut vm.value_stack, v);
        }
        F32ConvertUI32 => {
            let a = pop_u32(&mut vm.value_stack);
            let v: F32 = a.extend_into();
            push_f32(&mut vm.value_stack, v);
        }
        F32ConvertSI64 => {
            let a = pop_i64(&mut vm.value_stack);
            let v: F32 = a.wrap_into();
            push_f32(&mut vm.value_stack, v);
        }
        F32ConvertUI64 => {
            let a = pop_u64(&mut vm.value_stack);
            let v: F32 = a.wrap_into();
            push_f32(&mut vm.value_stack, v);
        }
        F32DemoteF64 => {
            let a = pop_f64(&mut vm.value_stack);
            let v: F32 = a.wrap_into();
            push_f32(&mut vm.value_stack, v.canonicalize_nan());
        }
        F64ConvertSI32 => {
            let a = pop_i32(&mut vm.value_stack);
            let v: F64 = a.extend_into();
            push_f64(&mut vm.value_stack, v);
        }
        F64ConvertUI32 => {
            let a = pop_u32(&mut vm.value_stack);
            let v: F64 = a.extend_into();
            push_f64(&mut vm.value_stack, v);
        }
        F64ConvertSI64 => {
            let a = pop_i64(&mut vm.value_stack);
            let v: F64 = a.extend_into();
            push_f64(&mut vm.value_stack, v);
        }
        F64ConvertUI64 => {
            let a = pop_u64(&mut vm.value_stack);
            let v: F64 = a.extend_into();
            push_f64(&mut vm.value_stack, v);
        }
        F64PromoteF32 => {
            let a = pop_f32(&mut vm.value_stack);
            let v: F64 = a.extend_into();
            push_f64(&mut vm.value_stack, v.canonicalize_nan());
        }

        I32ReinterpretF32 => {
            let a = pop_f32(&mut vm.value_stack);
            let v: i32 = a.transmute_into();
            push_i32(&mut vm.value_stack, v);
        }
        F32ReinterpretI32 => {
            let a = pop_i32(&mut vm.value_stack);
            let v: F32 = a.transmute_into();
            push_f32(&mut vm.value_stack, v);
        }
        I64ReinterpretF64 => {
            let a = pop_f64(&mut vm.value_stack);
            let v: i64 = a.transmute_into();
            push_i64(&mut vm.value_stack, v);
        }
        F64ReinterpretI64 => {
            let a = pop_i64(&mut vm.value_stack);
            let v: F64 = a.transmute_into();
            push_f64(&mut vm.value_stack, v);
        }

        // Structural opcodes never reach `Instruction::Op` (see
        // `isa::Instruction::Op`'s doc comment): they dissolve into
        // `Jmp`/`JmpZ`/`JmpNz`/`BrTable`/`Discard*`/`Return` during
        // compilation, and `Call`/`CallIndirect` are intercepted in `step`.
        Block(_) | Loop(_) | If(_) | Else | End | Br(_) | BrIf(_) | BrTable(..) | Return
        | Call(_) | CallIndirect(_) => {
            unreachable!("structural/call opcode reached exec_op: {:?}", op)
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::func::{FuncBody, FuncInstance};
    use crate::host::NopExternals;
    use crate::isa::Instructions;
    use crate::types::ValueType;

    /// Builds a VM with one function slot at index 0, wired directly to
    /// hand-assembled flat bytecode. Normal VM construction disassembles raw
    /// `Vec<u8>` bodies instead; these unit tests exercise the interpreter
    /// loop in isolation, so they splice a compiled `FuncBody` straight in.
    fn vm_with_main(
        params: &[ValueType],
        ret: Option<ValueType>,
        locals: Vec<crate::func::Local>,
        code: Instructions,
    ) -> Vm {
        let mut vm = Vm::new_vm(
            crate::module_image::ModuleImage::new(),
            crate::vm::Options::default(),
            alloc::boxed::Box::new(NopExternals),
        )
        .expect("empty module is always valid");
        let signature = Rc::new(Signature::new(params.to_vec(), ret));
        let body = FuncBody {
            locals,
            code,
            max_operand_depth: 16,
        };
        vm.functions.push(FuncInstance::alloc_internal(signature, body));
        vm
    }

    #[test]
    fn add_two_locals() {
        let mut code = Instructions::with_capacity(4);
        code.push(Instruction::Op(Op::GetLocal(0)));
        code.push(Instruction::Op(Op::GetLocal(1)));
        code.push(Instruction::Op(Op::I32Add));
        let mut vm = vm_with_main(&[ValueType::I32, ValueType::I32], Some(ValueType::I32), Vec::new(), code);
        let result = vm.exec(0, &[2u64, 3u64]).unwrap();
        assert_eq!(result, Some(5u64));
    }

    #[test]
    fn i32_div_by_zero_traps() {
        let mut code = Instructions::with_capacity(3);
        code.push(Instruction::Op(Op::GetLocal(0)));
        code.push(Instruction::Op(Op::GetLocal(1)));
        code.push(Instruction::Op(Op::I32DivS));
        let mut vm = vm_with_main(&[ValueType::I32, ValueType::I32], Some(ValueType::I32), Vec::new(), code);
        let err = vm.exec(0, &[10u64, 0u64]).unwrap_err();
        match err {
            crate::Error::Trap(trap) => {
                assert_eq!(*trap.kind(), TrapKind::DivisionByZero);
            }
            other => panic!("expected a trap, got {:?}", other),
        }
    }

    #[test]
    fn f32_min_propagates_nan_not_absorbs_it() {
        let mut code = Instructions::with_capacity(3);
        code.push(Instruction::Op(Op::GetLocal(0)));
        code.push(Instruction::Op(Op::GetLocal(1)));
        code.push(Instruction::Op(Op::F32Min));
        let mut vm = vm_with_main(&[ValueType::F32, ValueType::F32], Some(ValueType::F32), Vec::new(), code);
        let nan = F32::from_bits(0x7fc0_0001);
        let result = vm
            .exec(0, &[nan.to_bits() as u64, 1.0f32.to_bits() as u64])
            .unwrap()
            .unwrap();
        let result = F32::from_bits(result as u32);
        assert!(result.is_nan(), "minNaN must propagate NaN, not return the other operand");
    }

    #[test]
    fn locals_beyond_params_are_zero_initialized() {
        let mut code = Instructions::with_capacity(2);
        code.push(Instruction::Op(Op::GetLocal(1)));
        let locals = alloc::vec![crate::func::Local {
            count: 1,
            value_type: ValueType::I32,
        }];
        let mut vm = vm_with_main(&[ValueType::I32], Some(ValueType::I32), locals, code);
        let result = vm.exec(0, &[42u64]).unwrap();
        assert_eq!(result, Some(0u64));
    }
}
