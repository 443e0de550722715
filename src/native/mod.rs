//! Native backend (spec component 4.5, "compiles hot straight-line sequences
//! to host machine code"). Gated behind the `virtual_memory` feature; even
//! with the feature enabled, this backend only targets `x86_64` — on any
//! other architecture it silently compiles nothing and the interpreter
//! serves every instruction, which spec §4.5 explicitly allows ("if no such
//! primitive exists on a platform, the native backend is simply disabled").
//!
//! See `DESIGN.md` for why the compiled whitelist is narrower here than the
//! one spec §4.5 describes: `get_local`, `set_local`, `i32.const`, `drop`,
//! `i32.add`, `i32.sub`, `i32.mul`. Every compiled unit is therefore
//! guaranteed never to trap, so there is no completion-status byte to
//! interpret on return — `OK` is the only outcome this subset can produce.

#[cfg(target_arch = "x86_64")]
mod emitter;
#[cfg(target_arch = "x86_64")]
mod exec_alloc;
#[cfg(target_arch = "x86_64")]
mod scanner;

use crate::isa::{Instruction, Instructions};
use crate::opcode::Op;
use crate::vm::Vm;
use crate::Trap;
use alloc::vec::Vec;

#[cfg(target_arch = "x86_64")]
struct RuntimeUnit {
    func: emitter::UnitFn,
    resume_pc: u32,
    max_growth: usize,
}

/// Compiled units for one [`Vm`], plus the executable pages backing them.
/// Built once at VM construction when [`crate::vm::Options::enable_aot`] is
/// set; released by [`Vm::close`].
pub struct NativeBackend {
    #[cfg(target_arch = "x86_64")]
    units: Vec<RuntimeUnit>,
    #[cfg(target_arch = "x86_64")]
    _page: Option<exec_alloc::ExecPage>,
}

#[derive(Debug)]
pub enum NativeError {
    #[cfg(target_arch = "x86_64")]
    Alloc(exec_alloc::AllocError),
}

#[cfg(target_arch = "x86_64")]
impl From<exec_alloc::AllocError> for NativeError {
    fn from(e: exec_alloc::AllocError) -> Self {
        NativeError::Alloc(e)
    }
}

/// Scans one function's compiled bytecode for compilable candidates and
/// splices a [`Instruction::NativeExec`] hook over each accepted one's first
/// instruction, overwriting the rest of its range with `unreachable` so
/// nothing can jump into its interior, appending its machine code to
/// `blobs`/`meta`. Called by `vm::Vm::new_vm` once per `Local` function, on
/// the still-uniquely-owned `Instructions` value returned by
/// `compile::compile` (i.e. before it is wrapped in the `Rc<FuncBody>` that
/// execution later shares and clones).
#[cfg(target_arch = "x86_64")]
pub(crate) fn plan_function(flat: &mut Instructions, blobs: &mut Vec<Vec<u8>>, meta: &mut Vec<(u32, usize)>) {
    for candidate in scanner::scan(flat) {
        match emitter::emit(flat, &candidate) {
            Some(unit) => {
                let global_idx = blobs.len() as u32;
                meta.push((unit.resume_pc, unit.max_growth));
                blobs.push(unit.code);
                flat.set(unit.start_pc, Instruction::NativeExec(global_idx));
                for pc in unit.start_pc + 1..candidate.end_pc {
                    flat.set(pc, Instruction::Op(Op::Unreachable));
                }
            }
            None => continue,
        }
    }
}

#[cfg(not(target_arch = "x86_64"))]
pub(crate) fn plan_function(_flat: &mut Instructions, _blobs: &mut Vec<Vec<u8>>, _meta: &mut Vec<(u32, usize)>) {}

impl NativeBackend {
    /// Lays `blobs` out into one executable allocation and resolves each
    /// unit's function pointer against it.
    #[cfg(target_arch = "x86_64")]
    pub(crate) fn assemble(blobs: Vec<Vec<u8>>, meta: Vec<(u32, usize)>) -> Result<NativeBackend, NativeError> {
        if blobs.is_empty() {
            return Ok(NativeBackend { units: Vec::new(), _page: None });
        }
        let (offsets, combined) = exec_alloc::layout(&blobs);
        let page = exec_alloc::ExecPage::new(&combined)?;
        let units = offsets
            .into_iter()
            .zip(meta)
            .map(|(offset, (resume_pc, max_growth))| {
                // Safety: `offset` was computed by `exec_alloc::layout` against
                // this same `combined` buffer, so it lands on a unit's first
                // byte, and `page` keeps that memory mapped RWX for as long
                // as `NativeBackend` (hence this function pointer) lives.
                let code_ptr = unsafe { page.base_ptr().add(offset) };
                let func: emitter::UnitFn = unsafe { core::mem::transmute(code_ptr) };
                RuntimeUnit { func, resume_pc, max_growth }
            })
            .collect();
        Ok(NativeBackend { units, _page: Some(page) })
    }

    #[cfg(not(target_arch = "x86_64"))]
    pub(crate) fn assemble(_blobs: Vec<Vec<u8>>, _meta: Vec<(u32, usize)>) -> Result<NativeBackend, NativeError> {
        Ok(NativeBackend {})
    }
}

/// The `NativeExec(n)` dispatch hook (spec §4.5 "interpreter hook"): invokes
/// compiled unit `n`, grows the value stack to the space it needs, runs it,
/// then resumes interpretation at the unit's recorded `resume_pc`. This
/// backend's whitelist can never produce a non-`OK` completion, so unlike
/// the general contract spec §4.5 describes, this hook never traps.
#[cfg(target_arch = "x86_64")]
pub(crate) fn exec_unit(vm: &mut Vm, n: u32) -> Result<(), Trap> {
    let (func, resume_pc, max_growth) = {
        let backend = vm.native.as_ref().expect("NativeExec is only ever emitted once a backend exists");
        let unit = &backend.units[n as usize];
        (unit.func, unit.resume_pc, unit.max_growth)
    };
    let frame_idx = vm.call_stack.len() - 1;
    let locals_base = vm.call_stack[frame_idx].locals_base;
    let stack_top = vm.value_stack.len();
    vm.value_stack.reserve(max_growth);
    let buf = vm.value_stack.as_mut_ptr();
    // Safety: `reserve` above guarantees capacity for at least
    // `stack_top + max_growth` slots; the compiled unit only ever touches
    // slots in that range (see `scanner`'s height bookkeeping), so this
    // raw-pointer access stays within the allocation for the whole call.
    let new_len = unsafe { func(buf, locals_base, stack_top) };
    // Safety: `new_len` is exactly the slot count the unit wrote through
    // `buf`, which aliases this same `Vec`'s storage.
    unsafe {
        vm.value_stack.set_len(new_len);
    }
    vm.call_stack[frame_idx].pc = resume_pc;
    Ok(())
}

#[cfg(not(target_arch = "x86_64"))]
pub(crate) fn exec_unit(_vm: &mut Vm, _n: u32) -> Result<(), Trap> {
    unreachable!("plan_function never emits NativeExec on this architecture")
}
