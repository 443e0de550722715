//! Hand-encoded x86-64 machine code for the scanner's candidate whitelist
//! (spec §4.5 "builder"). Deliberately narrow: see `DESIGN.md` for why only
//! `get_local`/`set_local`/`i32.const`/`drop`/`i32.add`/`i32.sub`/`i32.mul`
//! are compiled, rather than the full whitelist spec §4.5 describes.
//!
//! Calling convention (System V AMD64, the only ABI this module targets):
//! `extern "sysv64" fn(buf: *mut u64, locals_base: usize, stack_top: usize) -> usize`
//! `buf` is the value stack's backing storage, `locals_base` is the active
//! frame's locals offset into it, `stack_top` is the current stack length.
//! The unit returns the new stack length; because this whitelist can never
//! under/overflow the operand stack or trap (no division, no memory access),
//! every compiled unit always "completes OK" — there is no completion-status
//! byte to decode on return, unlike the richer units spec §4.5 envisions.

use crate::isa::Instructions;
use crate::native::scanner::Candidate;
use crate::opcode::Op;
use alloc::vec::Vec;

/// A compiled unit's machine code, its source range in the original
/// function, and the slot budget a caller must reserve before invoking it.
pub struct CompiledUnit {
    pub start_pc: u32,
    pub resume_pc: u32,
    pub max_growth: usize,
    pub code: Vec<u8>,
}

pub type UnitFn = unsafe extern "sysv64" fn(*mut u64, usize, usize) -> usize;

fn imm32(v: i32) -> [u8; 4] {
    v.to_le_bytes()
}

/// Emits machine code for one candidate, or `None` if a local index's
/// displacement would not fit a signed 32-bit immediate (local counts this
/// large do not occur in practice, but the check keeps the encoder honest).
pub fn emit(code: &Instructions, candidate: &Candidate) -> Option<CompiledUnit> {
    let mut out = Vec::with_capacity(64);

    // Prologue: rcx = cursor (next free slot), r8 = locals base pointer.
    out.extend_from_slice(&[0x48, 0x8D, 0x0C, 0xD7]); // lea rcx, [rdi + rdx*8]
    out.extend_from_slice(&[0x4C, 0x8D, 0x04, 0xF7]); // lea r8, [rdi + rsi*8]

    for pc in candidate.start_pc..candidate.end_pc {
        let op = match code.get(pc).expect("candidate range in bounds") {
            crate::isa::Instruction::Op(op) => op,
            other => unreachable!("scanner only admits Instruction::Op entries into a candidate, got {:?}", other),
        };
        match op {
            Op::I32Const(v) => {
                out.push(0xB8);
                out.extend_from_slice(&imm32(*v));
                out.extend_from_slice(&[0x48, 0x89, 0x01]); // mov [rcx], rax
                out.extend_from_slice(&[0x48, 0x83, 0xC1, 0x08]); // add rcx, 8
            }
            Op::GetLocal(idx) => {
                let disp = local_disp(*idx)?;
                out.extend_from_slice(&[0x49, 0x8B, 0x80]); // mov rax, [r8 + disp32]
                out.extend_from_slice(&disp);
                out.extend_from_slice(&[0x48, 0x89, 0x01]); // mov [rcx], rax
                out.extend_from_slice(&[0x48, 0x83, 0xC1, 0x08]); // add rcx, 8
            }
            Op::SetLocal(idx) => {
                let disp = local_disp(*idx)?;
                out.extend_from_slice(&[0x48, 0x83, 0xE9, 0x08]); // sub rcx, 8
                out.extend_from_slice(&[0x48, 0x8B, 0x01]); // mov rax, [rcx]
                out.extend_from_slice(&[0x49, 0x89, 0x80]); // mov [r8 + disp32], rax
                out.extend_from_slice(&disp);
            }
            Op::Drop => {
                out.extend_from_slice(&[0x48, 0x83, 0xE9, 0x08]); // sub rcx, 8
            }
            Op::I32Add | Op::I32Sub | Op::I32Mul => {
                out.extend_from_slice(&[0x48, 0x83, 0xE9, 0x08]); // sub rcx, 8
                out.extend_from_slice(&[0x8B, 0x19]); // mov ebx, [rcx]
                out.extend_from_slice(&[0x48, 0x83, 0xE9, 0x08]); // sub rcx, 8
                out.extend_from_slice(&[0x8B, 0x01]); // mov eax, [rcx]
                match op {
                    Op::I32Add => out.extend_from_slice(&[0x01, 0xD8]), // add eax, ebx
                    Op::I32Sub => out.extend_from_slice(&[0x29, 0xD8]), // sub eax, ebx
                    Op::I32Mul => out.extend_from_slice(&[0x0F, 0xAF, 0xC3]), // imul eax, ebx
                    _ => unreachable!(),
                }
                out.extend_from_slice(&[0x48, 0x89, 0x01]); // mov [rcx], rax
                out.extend_from_slice(&[0x48, 0x83, 0xC1, 0x08]); // add rcx, 8
            }
            other => unreachable!("non-whitelisted opcode {:?} reached the emitter", other),
        }
    }

    // Epilogue: new_len = (rcx - rdi) / 8, returned in rax.
    out.extend_from_slice(&[0x48, 0x29, 0xF9]); // sub rcx, rdi
    out.extend_from_slice(&[0x48, 0xC1, 0xF9, 0x03]); // sar rcx, 3
    out.extend_from_slice(&[0x48, 0x89, 0xC8]); // mov rax, rcx
    out.push(0xC3); // ret

    Some(CompiledUnit {
        start_pc: candidate.start_pc,
        resume_pc: candidate.end_pc,
        max_growth: candidate.max_growth,
        code: out,
    })
}

fn local_disp(idx: u32) -> Option<[u8; 4]> {
    let bytes = (idx as i64).checked_mul(8)?;
    i32::try_from(bytes).ok().map(imm32)
}
