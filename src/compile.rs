//! Structured→flat compiler (component 3, spec §4.2).
//!
//! Rewrites the disassembler's structured control annotations into absolute
//! jumps and explicit discard pseudo-ops, materialising `br_table`'s jump
//! tables as a side array.

use crate::disasm::{Disassembly, Instr, StackUnwind};
use crate::isa::{BranchTable, Instruction, Instructions, Target};
use crate::opcode::Op;
use alloc::{vec, vec::Vec};

struct BlockCtx {
    is_loop: bool,
    loop_target: u32,
    /// pcs of `Jmp`/`JmpZ`/`JmpNz` placeholders to patch once this block's
    /// `end` is reached.
    pending: Vec<u32>,
    /// The `if`'s `JmpZ` placeholder pc, patched at `else` (to the start of
    /// the else-body) or at `end` if no `else` was seen.
    if_patch: Option<u32>,
    /// `(branch_table_index, slot)` pairs to patch once this block's `end`
    /// is reached. `slot == None` means the table's default target.
    br_table_patches: Vec<(u32, Option<usize>)>,
}

fn emit_unwind_discard(out: &mut Instructions, unwind: &StackUnwind) {
    if unwind.discard == 0 {
        return;
    }
    if unwind.preserve_top {
        out.push(Instruction::DiscardPreserveTop(unwind.discard));
    } else {
        out.push(Instruction::Discard(unwind.discard));
    }
}

/// Compiles a disassembled function body into flat bytecode.
pub fn compile(disassembly: &Disassembly) -> Instructions {
    let mut out = Instructions::with_capacity(disassembly.instrs.len());
    // Function-level frame, mirroring disasm's initial `frames` entry.
    let mut ctx_stack: Vec<BlockCtx> = vec![BlockCtx {
        is_loop: false,
        loop_target: 0,
        pending: Vec::new(),
        if_patch: None,
        br_table_patches: Vec::new(),
    }];

    for instr in &disassembly.instrs {
        let Instr {
            op,
            unwind,
            block,
            table_unwinds,
        } = instr;

        match op {
            Op::Block(_) | Op::Loop(_) | Op::If(_) => {
                let is_loop = matches!(op, Op::Loop(_));
                let is_if = matches!(op, Op::If(_));
                let if_patch = if is_if {
                    let pc = out.current_pc();
                    out.push(Instruction::JmpZ(0));
                    Some(pc)
                } else {
                    None
                };
                ctx_stack.push(BlockCtx {
                    is_loop,
                    loop_target: out.current_pc(),
                    pending: Vec::new(),
                    if_patch,
                    br_table_patches: Vec::new(),
                });
                let _ = block;
            }
            Op::Else => {
                if let Some(unwind) = unwind {
                    emit_unwind_discard(&mut out, unwind);
                }
                let ctx = ctx_stack.last_mut().expect("else without open block");
                let jmp_pc = out.current_pc();
                out.push(Instruction::Jmp(0));
                ctx.pending.push(jmp_pc);
                if let Some(if_patch) = ctx.if_patch.take() {
                    out.patch_target(if_patch, out.current_pc());
                }
            }
            Op::End => {
                if let Some(unwind) = unwind {
                    emit_unwind_discard(&mut out, unwind);
                }
                let target = out.current_pc();
                let ctx = ctx_stack.pop().expect("end without open block");
                for pc in ctx.pending {
                    out.patch_target(pc, target);
                }
                if let Some(if_patch) = ctx.if_patch {
                    out.patch_target(if_patch, target);
                }
                for (table_idx, slot) in ctx.br_table_patches {
                    out.patch_branch_table_target(table_idx, slot, target);
                }
            }
            Op::Br(depth) => {
                if let Some(unwind) = unwind {
                    emit_unwind_discard(&mut out, unwind);
                }
                let idx = ctx_stack.len() - 1 - *depth as usize;
                if ctx_stack[idx].is_loop {
                    let target = ctx_stack[idx].loop_target;
                    out.push(Instruction::Jmp(target));
                } else {
                    let pc = out.current_pc();
                    out.push(Instruction::Jmp(0));
                    ctx_stack[idx].pending.push(pc);
                }
            }
            Op::BrIf(depth) => {
                let unwind = unwind.expect("br_if always carries unwind info");
                let idx = ctx_stack.len() - 1 - *depth as usize;
                if ctx_stack[idx].is_loop {
                    let target = ctx_stack[idx].loop_target;
                    out.push(Instruction::JmpNz {
                        target,
                        discard: unwind.discard,
                        preserve_top: unwind.preserve_top,
                    });
                } else {
                    let pc = out.current_pc();
                    out.push(Instruction::JmpNz {
                        target: 0,
                        discard: unwind.discard,
                        preserve_top: unwind.preserve_top,
                    });
                    ctx_stack[idx].pending.push(pc);
                }
            }
            Op::BrTable(depths, default) => {
                let unwinds = table_unwinds
                    .as_ref()
                    .expect("br_table always carries per-target unwind info");
                let mut targets = Vec::with_capacity(depths.len());
                for (i, d) in depths.iter().enumerate() {
                    let idx = ctx_stack.len() - 1 - *d as usize;
                    let u = unwinds[i];
                    if ctx_stack[idx].is_loop {
                        targets.push(Target {
                            dst_pc: ctx_stack[idx].loop_target,
                            discard: u.discard,
                            preserve_top: u.preserve_top,
                        });
                    } else {
                        targets.push(Target {
                            dst_pc: u32::MAX,
                            discard: u.discard,
                            preserve_top: u.preserve_top,
                        });
                    }
                }
                let default_idx = ctx_stack.len() - 1 - *default as usize;
                let default_unwind = unwinds[depths.len()];
                let default_target = if ctx_stack[default_idx].is_loop {
                    Target {
                        dst_pc: ctx_stack[default_idx].loop_target,
                        discard: default_unwind.discard,
                        preserve_top: default_unwind.preserve_top,
                    }
                } else {
                    Target {
                        dst_pc: u32::MAX,
                        discard: default_unwind.discard,
                        preserve_top: default_unwind.preserve_top,
                    }
                };
                let table_idx = out.push_branch_table(BranchTable {
                    targets: targets.into_boxed_slice(),
                    default: default_target,
                });
                for (i, d) in depths.iter().enumerate() {
                    let idx = ctx_stack.len() - 1 - *d as usize;
                    if !ctx_stack[idx].is_loop {
                        ctx_stack[idx].br_table_patches.push((table_idx, Some(i)));
                    }
                }
                if !ctx_stack[default_idx].is_loop {
                    ctx_stack[default_idx]
                        .br_table_patches
                        .push((table_idx, None));
                }
                out.push(Instruction::BrTable(table_idx));
            }
            Op::Return => {
                let unwind = unwind.expect("return always carries unwind info");
                out.push(Instruction::Return(unwind.discard));
            }
            other => {
                out.push(Instruction::Op(other.clone()));
            }
        }
    }

    out
}
