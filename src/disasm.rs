//! Raw function-body disassembler (component 2).
//!
//! Walks a function body's raw bytes, decoding each opcode and its
//! immediates, and annotates control instructions with the operand-stack
//! unwind information the structured→flat compiler will need. The binary
//! module/section format itself is out of scope; this only decodes a single
//! function body's instruction stream, which a decoded module image (see
//! `module_image`) carries as raw bytes per function.

use crate::opcode::{self, BlockType, Op};
use crate::types::{Signature, ValueType};
use crate::Error;
use alloc::{boxed::Box, string::String, vec, vec::Vec};

/// A disassembly failure before it has been attributed to a function; paired
/// with [`disassemble`]'s `function_index` argument to build the public
/// `Error::Validation(message, function_index, byte_offset)`.
struct DisasmFailure(String, u32);

/// Stack-unwind metadata attached to `end`, `else`, `br` and `br_if`: how
/// many operand-stack slots to discard on exit/branch, and whether to
/// preserve the (single) top-of-stack value across that discard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StackUnwind {
    pub discard: u32,
    pub preserve_top: bool,
}

/// Marks an instruction as opening or closing a structured control block.
#[derive(Debug, Clone, Copy)]
pub struct BlockInfo {
    pub signature: BlockType,
    /// Index (into the disassembled instruction vector) of the matching
    /// `end` (for an opener) or opener (for `end`/`else`).
    pub pair_index: usize,
    pub is_loop: bool,
}

/// One disassembled instruction with its annotations.
#[derive(Debug, Clone)]
pub struct Instr {
    pub op: Op,
    pub unwind: Option<StackUnwind>,
    pub block: Option<BlockInfo>,
    /// For `br_table` only: one [`StackUnwind`] per listed target, in
    /// order, followed by one for the default target.
    pub table_unwinds: Option<Vec<StackUnwind>>,
}

/// Output of disassembling one function body.
pub struct Disassembly {
    pub instrs: Vec<Instr>,
    pub max_operand_depth: u32,
}

struct BlockFrame {
    /// Index into `instrs` of the opening instruction.
    opener_index: usize,
    /// Operand-stack depth at block entry (before any params — MVP blocks
    /// take no params).
    entry_depth: u32,
    signature: BlockType,
    is_loop: bool,
}

/// Reads unsigned LEB128.
fn read_uleb(bytes: &[u8], pos: &mut usize) -> Result<u64, DisasmFailure> {
    let mut result: u64 = 0;
    let mut shift = 0;
    loop {
        let byte = *bytes
            .get(*pos)
            .ok_or_else(|| DisasmFailure("unexpected end of body (uleb128)".into(), 0))?;
        *pos += 1;
        result |= ((byte & 0x7f) as u64) << shift;
        if byte & 0x80 == 0 {
            break;
        }
        shift += 7;
    }
    Ok(result)
}

/// Reads signed LEB128.
fn read_sleb(bytes: &[u8], pos: &mut usize) -> Result<i64, DisasmFailure> {
    let mut result: i64 = 0;
    let mut shift = 0;
    let mut byte;
    loop {
        byte = *bytes
            .get(*pos)
            .ok_or_else(|| DisasmFailure("unexpected end of body (sleb128)".into(), 0))?;
        *pos += 1;
        result |= ((byte & 0x7f) as i64) << shift;
        shift += 7;
        if byte & 0x80 == 0 {
            break;
        }
    }
    if shift < 64 && (byte & 0x40) != 0 {
        result |= -1i64 << shift;
    }
    Ok(result)
}

fn read_u32(bytes: &[u8], pos: &mut usize) -> Result<u32, DisasmFailure> {
    Ok(read_uleb(bytes, pos)? as u32)
}

fn read_f32_bits(bytes: &[u8], pos: &mut usize) -> Result<u32, DisasmFailure> {
    let slice = bytes
        .get(*pos..*pos + 4)
        .ok_or_else(|| DisasmFailure("unexpected end of body (f32)".into(), *pos as u32))?;
    *pos += 4;
    let mut buf = [0u8; 4];
    buf.copy_from_slice(slice);
    Ok(u32::from_le_bytes(buf))
}

fn read_f64_bits(bytes: &[u8], pos: &mut usize) -> Result<u64, DisasmFailure> {
    let slice = bytes
        .get(*pos..*pos + 8)
        .ok_or_else(|| DisasmFailure("unexpected end of body (f64)".into(), *pos as u32))?;
    *pos += 8;
    let mut buf = [0u8; 8];
    buf.copy_from_slice(slice);
    Ok(u64::from_le_bytes(buf))
}

fn read_block_type(bytes: &[u8], pos: &mut usize) -> Result<BlockType, DisasmFailure> {
    let byte = *bytes
        .get(*pos)
        .ok_or_else(|| DisasmFailure("unexpected end of body (blocktype)".into(), *pos as u32))?;
    *pos += 1;
    Ok(match byte {
        0x40 => BlockType::Empty,
        0x7f => BlockType::Value(ValueType::I32),
        0x7e => BlockType::Value(ValueType::I64),
        0x7d => BlockType::Value(ValueType::F32),
        0x7c => BlockType::Value(ValueType::F64),
        other => {
            return Err(DisasmFailure(
                alloc::format!("invalid block type byte {:#x}", other),
                *pos as u32,
            ))
        }
    })
}

/// Decodes one opcode byte plus its immediates at `pos`, advancing `pos`.
fn read_op(bytes: &[u8], pos: &mut usize) -> Result<Op, DisasmFailure> {
    let byte = *bytes
        .get(*pos)
        .ok_or_else(|| DisasmFailure("unexpected end of body".into(), *pos as u32))?;
    *pos += 1;
    Ok(match byte {
        0x00 => Op::Unreachable,
        0x01 => Op::Nop,
        0x02 => Op::Block(read_block_type(bytes, pos)?),
        0x03 => Op::Loop(read_block_type(bytes, pos)?),
        0x04 => Op::If(read_block_type(bytes, pos)?),
        0x05 => Op::Else,
        0x0b => Op::End,
        0x0c => Op::Br(read_u32(bytes, pos)?),
        0x0d => Op::BrIf(read_u32(bytes, pos)?),
        0x0e => {
            let count = read_u32(bytes, pos)?;
            let mut targets = Vec::with_capacity(count as usize);
            for _ in 0..count {
                targets.push(read_u32(bytes, pos)?);
            }
            let default = read_u32(bytes, pos)?;
            Op::BrTable(targets.into_boxed_slice(), default)
        }
        0x0f => Op::Return,
        0x10 => Op::Call(read_u32(bytes, pos)?),
        0x11 => {
            let type_idx = read_u32(bytes, pos)?;
            let table_idx = read_u32(bytes, pos)?;
            if table_idx != 0 {
                return Err(DisasmFailure(
                    "call_indirect table index must be 0".into(),
                    *pos as u32,
                ));
            }
            Op::CallIndirect(type_idx)
        }
        0x1a => Op::Drop,
        0x1b => Op::Select,
        0x20 => Op::GetLocal(read_u32(bytes, pos)?),
        0x21 => Op::SetLocal(read_u32(bytes, pos)?),
        0x22 => Op::TeeLocal(read_u32(bytes, pos)?),
        0x23 => Op::GetGlobal(read_u32(bytes, pos)?),
        0x24 => Op::SetGlobal(read_u32(bytes, pos)?),

        0x28..=0x3e => {
            let align_pos = *pos;
            let align = read_u32(bytes, pos)?;
            let offset = read_u32(bytes, pos)?;
            let op = match byte {
                0x28 => Op::I32Load(offset),
                0x29 => Op::I64Load(offset),
                0x2a => Op::F32Load(offset),
                0x2b => Op::F64Load(offset),
                0x2c => Op::I32Load8S(offset),
                0x2d => Op::I32Load8U(offset),
                0x2e => Op::I32Load16S(offset),
                0x2f => Op::I32Load16U(offset),
                0x30 => Op::I64Load8S(offset),
                0x31 => Op::I64Load8U(offset),
                0x32 => Op::I64Load16S(offset),
                0x33 => Op::I64Load16U(offset),
                0x34 => Op::I64Load32S(offset),
                0x35 => Op::I64Load32U(offset),
                0x36 => Op::I32Store(offset),
                0x37 => Op::I64Store(offset),
                0x38 => Op::F32Store(offset),
                0x39 => Op::F64Store(offset),
                0x3a => Op::I32Store8(offset),
                0x3b => Op::I32Store16(offset),
                0x3c => Op::I64Store8(offset),
                0x3d => Op::I64Store16(offset),
                0x3e => Op::I64Store32(offset),
                _ => unreachable!(),
            };
            let max_align = opcode::natural_alignment_log2(&op).unwrap();
            if align > max_align {
                return Err(DisasmFailure(
                    alloc::format!("alignment 2**{} exceeds natural alignment 2**{}", align, max_align),
                    align_pos as u32,
                ));
            }
            op
        }
        0x3f => {
            let reserved = *bytes.get(*pos).unwrap_or(&0xff);
            *pos += 1;
            if reserved != 0 {
                return Err(DisasmFailure(
                    "memory.size reserved byte must be 0".into(),
                    *pos as u32,
                ));
            }
            Op::CurrentMemory
        }
        0x40 => {
            let reserved = *bytes.get(*pos).unwrap_or(&0xff);
            *pos += 1;
            if reserved != 0 {
                return Err(DisasmFailure(
                    "memory.grow reserved byte must be 0".into(),
                    *pos as u32,
                ));
            }
            Op::GrowMemory
        }

        0x41 => Op::I32Const(read_sleb(bytes, pos)? as i32),
        0x42 => Op::I64Const(read_sleb(bytes, pos)?),
        0x43 => Op::F32Const(read_f32_bits(bytes, pos)?),
        0x44 => Op::F64Const(read_f64_bits(bytes, pos)?),

        0x45 => Op::I32Eqz,
        0x46 => Op::I32Eq,
        0x47 => Op::I32Ne,
        0x48 => Op::I32LtS,
        0x49 => Op::I32LtU,
        0x4a => Op::I32GtS,
        0x4b => Op::I32GtU,
        0x4c => Op::I32LeS,
        0x4d => Op::I32LeU,
        0x4e => Op::I32GeS,
        0x4f => Op::I32GeU,

        0x50 => Op::I64Eqz,
        0x51 => Op::I64Eq,
        0x52 => Op::I64Ne,
        0x53 => Op::I64LtS,
        0x54 => Op::I64LtU,
        0x55 => Op::I64GtS,
        0x56 => Op::I64GtU,
        0x57 => Op::I64LeS,
        0x58 => Op::I64LeU,
        0x59 => Op::I64GeS,
        0x5a => Op::I64GeU,

        0x5b => Op::F32Eq,
        0x5c => Op::F32Ne,
        0x5d => Op::F32Lt,
        0x5e => Op::F32Gt,
        0x5f => Op::F32Le,
        0x60 => Op::F32Ge,

        0x61 => Op::F64Eq,
        0x62 => Op::F64Ne,
        0x63 => Op::F64Lt,
        0x64 => Op::F64Gt,
        0x65 => Op::F64Le,
        0x66 => Op::F64Ge,

        0x67 => Op::I32Clz,
        0x68 => Op::I32Ctz,
        0x69 => Op::I32Popcnt,
        0x6a => Op::I32Add,
        0x6b => Op::I32Sub,
        0x6c => Op::I32Mul,
        0x6d => Op::I32DivS,
        0x6e => Op::I32DivU,
        0x6f => Op::I32RemS,
        0x70 => Op::I32RemU,
        0x71 => Op::I32And,
        0x72 => Op::I32Or,
        0x73 => Op::I32Xor,
        0x74 => Op::I32Shl,
        0x75 => Op::I32ShrS,
        0x76 => Op::I32ShrU,
        0x77 => Op::I32Rotl,
        0x78 => Op::I32Rotr,

        0x79 => Op::I64Clz,
        0x7a => Op::I64Ctz,
        0x7b => Op::I64Popcnt,
        0x7c => Op::I64Add,
        0x7d => Op::I64Sub,
        0x7e => Op::I64Mul,
        0x7f => Op::I64DivS,
        0x80 => Op::I64DivU,
        0x81 => Op::I64RemS,
        0x82 => Op::I64RemU,
        0x83 => Op::I64And,
        0x84 => Op::I64Or,
        0x85 => Op::I64Xor,
        0x86 => Op::I64Shl,
        0x87 => Op::I64ShrS,
        0x88 => Op::I64ShrU,
        0x89 => Op::I64Rotl,
        0x8a => Op::I64Rotr,

        0x8b => Op::F32Abs,
        0x8c => Op::F32Neg,
        0x8d => Op::F32Ceil,
        0x8e => Op::F32Floor,
        0x8f => Op::F32Trunc,
        0x90 => Op::F32Nearest,
        0x91 => Op::F32Sqrt,
        0x92 => Op::F32Add,
        0x93 => Op::F32Sub,
        0x94 => Op::F32Mul,
        0x95 => Op::F32Div,
        0x96 => Op::F32Min,
        0x97 => Op::F32Max,
        0x98 => Op::F32Copysign,

        0x99 => Op::F64Abs,
        0x9a => Op::F64Neg,
        0x9b => Op::F64Ceil,
        0x9c => Op::F64Floor,
        0x9d => Op::F64Trunc,
        0x9e => Op::F64Nearest,
        0x9f => Op::F64Sqrt,
        0xa0 => Op::F64Add,
        0xa1 => Op::F64Sub,
        0xa2 => Op::F64Mul,
        0xa3 => Op::F64Div,
        0xa4 => Op::F64Min,
        0xa5 => Op::F64Max,
        0xa6 => Op::F64Copysign,

        0xa7 => Op::I32WrapI64,
        0xa8 => Op::I32TruncSF32,
        0xa9 => Op::I32TruncUF32,
        0xaa => Op::I32TruncSF64,
        0xab => Op::I32TruncUF64,
        0xac => Op::I64ExtendSI32,
        0xad => Op::I64ExtendUI32,
        0xae => Op::I64TruncSF32,
        0xaf => Op::I64TruncUF32,
        0xb0 => Op::I64TruncSF64,
        0xb1 => Op::I64TruncUF64,
        0xb2 => Op::F32ConvertSI32,
        0xb3 => Op::F32ConvertUI32,
        0xb4 => Op::F32ConvertSI64,
        0xb5 => Op::F32ConvertUI64,
        0xb6 => Op::F32DemoteF64,
        0xb7 => Op::F64ConvertSI32,
        0xb8 => Op::F64ConvertUI32,
        0xb9 => Op::F64ConvertSI64,
        0xba => Op::F64ConvertUI64,
        0xbb => Op::F64PromoteF32,

        0xbc => Op::I32ReinterpretF32,
        0xbd => Op::I64ReinterpretF64,
        0xbe => Op::F32ReinterpretI32,
        0xbf => Op::F64ReinterpretI64,

        other => {
            return Err(DisasmFailure(
                alloc::format!("unknown opcode {:#x}", other),
                *pos as u32 - 1,
            ))
        }
    })
}

/// Disassembles the raw body bytes of one function.
///
/// `locals_count` and `signature` size the initial operand-stack depth
/// tracking (the function frame itself does not push operand slots).
/// `function_index` is only used to attribute a failure's
/// `Error::Validation` to the right function.
pub fn disassemble(
    body: &[u8],
    signature: &Signature,
    resolve_call: &dyn Fn(u32) -> Option<(u32, bool)>,
    resolve_call_indirect: &dyn Fn(u32) -> Option<(u32, bool)>,
    function_index: u32,
) -> Result<Disassembly, Error> {
    disassemble_inner(body, signature, resolve_call, resolve_call_indirect)
        .map_err(|DisasmFailure(msg, offset)| Error::Validation(msg, function_index, offset))
}

fn disassemble_inner(
    body: &[u8],
    signature: &Signature,
    resolve_call: &dyn Fn(u32) -> Option<(u32, bool)>,
    resolve_call_indirect: &dyn Fn(u32) -> Option<(u32, bool)>,
) -> Result<Disassembly, DisasmFailure> {
    let mut pos = 0usize;
    let mut instrs: Vec<Instr> = Vec::new();
    let mut depths: Vec<u32> = vec![0];
    let mut max_depth: u32 = 0;
    let mut frames: Vec<BlockFrame> = vec![BlockFrame {
        opener_index: usize::MAX,
        entry_depth: 0,
        signature: signature
            .return_type()
            .map(BlockType::Value)
            .unwrap_or(BlockType::Empty),
        is_loop: false,
    }];

    macro_rules! push_depth {
        ($n:expr) => {{
            let d = depths.last_mut().unwrap();
            *d += $n;
            if *d > max_depth {
                max_depth = *d;
            }
        }};
    }
    macro_rules! pop_depth {
        ($n:expr) => {{
            let d = depths.last_mut().unwrap();
            if ($n) > *d {
                return Err(DisasmFailure("stack underflow".into(), pos as u32));
            }
            *d -= $n;
        }};
    }

    while pos < body.len() {
        let start = pos;
        let op = read_op(body, &mut pos)?;

        let mut unwind = None;
        let mut block = None;
        let mut table_unwinds = None;

        match &op {
            Op::Block(sig) | Op::Loop(sig) | Op::If(sig) => {
                let is_loop = matches!(op, Op::Loop(_));
                if matches!(op, Op::If(_)) {
                    pop_depth!(1);
                }
                frames.push(BlockFrame {
                    opener_index: instrs.len(),
                    entry_depth: *depths.last().unwrap(),
                    signature: *sig,
                    is_loop,
                });
                depths.push(*depths.last().unwrap());
                block = Some(BlockInfo {
                    signature: *sig,
                    pair_index: usize::MAX,
                    is_loop,
                });
            }
            Op::Else => {
                let frame = frames
                    .last()
                    .ok_or_else(|| DisasmFailure("else without if".into(), start as u32))?;
                let opener = frame.opener_index;
                let produced = match frame.signature {
                    BlockType::Empty => 0,
                    BlockType::Value(_) => 1,
                };
                let cur = *depths.last().unwrap();
                let discard = cur - (frame.entry_depth + produced).min(cur);
                unwind = Some(StackUnwind {
                    discard,
                    preserve_top: produced != 0,
                });
                if let Some(opener_instr) = instrs.get_mut(opener) {
                    if let Some(b) = &mut opener_instr.block {
                        b.pair_index = instrs.len();
                    }
                }
                *depths.last_mut().unwrap() = frame.entry_depth;
                block = Some(BlockInfo {
                    signature: frame.signature,
                    pair_index: opener,
                    is_loop: false,
                });
            }
            Op::End => {
                let frame = frames
                    .pop()
                    .ok_or_else(|| DisasmFailure("unmatched end".into(), start as u32))?;
                let produced = match frame.signature {
                    BlockType::Empty => 0,
                    BlockType::Value(_) => 1,
                };
                let before_pop = depths.pop().unwrap();
                let discard = before_pop.saturating_sub(frame.entry_depth + produced);
                unwind = Some(StackUnwind {
                    discard,
                    preserve_top: produced != 0,
                });
                if frame.opener_index != usize::MAX {
                    if let Some(opener_instr) = instrs.get_mut(frame.opener_index) {
                        if let Some(b) = &mut opener_instr.block {
                            if b.pair_index == usize::MAX {
                                b.pair_index = instrs.len();
                            }
                        }
                    }
                }
                push_depth!(produced);
                block = Some(BlockInfo {
                    signature: frame.signature,
                    pair_index: frame.opener_index,
                    is_loop: frame.is_loop,
                });
            }
            Op::Br(depth) | Op::BrIf(depth) => {
                let idx = frames
                    .len()
                    .checked_sub(1 + *depth as usize)
                    .ok_or_else(|| DisasmFailure("br depth out of range".into(), start as u32))?;
                let frame = &frames[idx];
                let produced = if frame.is_loop {
                    0
                } else {
                    match frame.signature {
                        BlockType::Empty => 0,
                        BlockType::Value(_) => 1,
                    }
                };
                if matches!(op, Op::BrIf(_)) {
                    pop_depth!(1);
                }
                let cur = *depths.last().unwrap();
                let discard = cur.saturating_sub(frame.entry_depth + produced);
                unwind = Some(StackUnwind {
                    discard,
                    preserve_top: produced != 0,
                });
                if matches!(op, Op::Br(_)) {
                    *depths.last_mut().unwrap() = frame.entry_depth + produced;
                }
            }
            Op::BrTable(targets, default) => {
                let cur = *depths.last().unwrap();
                let mut unwinds = Vec::with_capacity(targets.len() + 1);
                for d in targets.iter().chain(core::iter::once(default)) {
                    let idx = frames.len().checked_sub(1 + *d as usize).ok_or_else(|| {
                        DisasmFailure("br_table depth out of range".into(), start as u32)
                    })?;
                    let frame = &frames[idx];
                    let produced = if frame.is_loop {
                        0
                    } else {
                        match frame.signature {
                            BlockType::Empty => 0,
                            BlockType::Value(_) => 1,
                        }
                    };
                    let discard = cur
                        .saturating_sub(1)
                        .saturating_sub(frame.entry_depth + produced);
                    unwinds.push(StackUnwind {
                        discard,
                        preserve_top: produced != 0,
                    });
                }
                table_unwinds = Some(unwinds);
                pop_depth!(1);
            }
            Op::Return => {
                let produced = if signature.return_type().is_some() { 1 } else { 0 };
                let cur = *depths.last().unwrap();
                let discard = cur.saturating_sub(produced);
                unwind = Some(StackUnwind {
                    discard,
                    preserve_top: produced != 0,
                });
                pop_depth!(produced);
            }
            Op::Unreachable | Op::Nop => {}
            Op::Drop => pop_depth!(1),
            Op::Select => {
                pop_depth!(3);
                push_depth!(1);
            }
            Op::Call(func_idx) => {
                if *func_idx != u32::MAX {
                    if let Some((params, has_result)) = resolve_call(*func_idx) {
                        pop_depth!(params);
                        if has_result {
                            push_depth!(1);
                        }
                    }
                }
            }
            Op::CallIndirect(type_idx) => {
                pop_depth!(1); // table index operand
                if let Some((params, has_result)) = resolve_call_indirect(*type_idx) {
                    pop_depth!(params);
                    if has_result {
                        push_depth!(1);
                    }
                }
            }
            Op::GetLocal(_) | Op::GetGlobal(_) => push_depth!(1),
            Op::SetLocal(_) | Op::SetGlobal(_) => pop_depth!(1),
            Op::TeeLocal(_) => {
                pop_depth!(1);
                push_depth!(1);
            }
            Op::CurrentMemory => push_depth!(1),
            Op::GrowMemory => {
                pop_depth!(1);
                push_depth!(1);
            }
            other => {
                if let Some((params, has_result)) = opcode::arity(other) {
                    pop_depth!(params);
                    if has_result {
                        push_depth!(1);
                    }
                }
            }
        }

        instrs.push(Instr {
            op,
            unwind,
            block,
            table_unwinds,
        });
    }

    Ok(Disassembly {
        instrs,
        max_operand_depth: max_depth,
    })
}
