//! Scans a compiled function's flat bytecode for maximal runs of the narrow
//! opcode subset the emitter knows how to compile (spec §4.5 "scanner").
//!
//! A candidate is a contiguous range of `Instruction::Op(_)` entries, each
//! drawn from [`is_whitelisted`], with no structural/call opcode breaking the
//! run. Because none of the whitelisted opcodes are block boundaries, no
//! branch target can land strictly inside a candidate's interior without also
//! being reachable as an ordinary (uncompiled) continuation — `plan_function`
//! relies on this when it overwrites only a candidate's first instruction.

use crate::isa::{Instruction, Instructions};
use crate::opcode::Op;
use alloc::vec::Vec;

/// One maximal run of compilable opcodes found in a function body.
#[derive(Debug, Clone, Copy)]
pub struct Candidate {
    pub start_pc: u32,
    /// One past the last instruction belonging to this candidate.
    pub end_pc: u32,
    /// Highest number of operand-stack slots this run can hold above its
    /// entry height at any point during execution; callers must reserve this
    /// many spare slots before invoking the compiled unit.
    pub max_growth: usize,
}

/// True for the opcodes the emitter can turn into machine code (spec §4.5's
/// whitelist, restricted to the subset this backend actually implements —
/// see `DESIGN.md`).
fn is_whitelisted(op: &Op) -> bool {
    matches!(
        op,
        Op::GetLocal(_) | Op::SetLocal(_) | Op::I32Const(_) | Op::Drop | Op::I32Add | Op::I32Sub | Op::I32Mul
    )
}

/// Counts how many of the three arithmetic opcodes appear in a candidate —
/// the quality threshold from spec §4.5 ("must include at least two integer
/// ops") expressed against this backend's narrower whitelist.
fn arithmetic_ops(code: &Instructions, start_pc: u32, end_pc: u32) -> usize {
    (start_pc..end_pc)
        .filter(|&pc| {
            matches!(
                code.get(pc),
                Some(Instruction::Op(Op::I32Add)) | Some(Instruction::Op(Op::I32Sub)) | Some(Instruction::Op(Op::I32Mul))
            )
        })
        .count()
}

/// Net stack-height delta of one whitelisted opcode (pushes minus pops).
fn stack_delta(op: &Op) -> i32 {
    match op {
        Op::GetLocal(_) | Op::I32Const(_) => 1,
        Op::SetLocal(_) | Op::Drop => -1,
        Op::I32Add | Op::I32Sub | Op::I32Mul => -1,
        _ => 0,
    }
}

/// Finds every candidate meeting the quality threshold in `code`.
pub fn scan(code: &Instructions) -> Vec<Candidate> {
    let mut candidates = Vec::new();
    let len = code.len() as u32;
    let mut pc = 0u32;
    while pc < len {
        match code.get(pc) {
            Some(Instruction::Op(op)) if is_whitelisted(op) => {}
            _ => {
                pc += 1;
                continue;
            }
        }
        let start_pc = pc;
        let mut height = 0i32;
        let mut max_growth = 0usize;
        while pc < len {
            match code.get(pc) {
                Some(Instruction::Op(op)) if is_whitelisted(op) => {
                    height += stack_delta(op);
                    if height > 0 {
                        max_growth = max_growth.max(height as usize);
                    }
                    pc += 1;
                }
                _ => break,
            }
        }
        let end_pc = pc;
        if end_pc - start_pc >= 2 && arithmetic_ops(code, start_pc, end_pc) >= 2 {
            candidates.push(Candidate { start_pc, end_pc, max_growth });
        }
    }
    candidates
}
