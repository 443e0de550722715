//! Static validator (component 4, spec §4.3).
//!
//! Type-checks a function body against its signature and the module's type/
//! import context. Operates on the already-disassembled instruction stream
//! (see `disasm`) rather than re-scanning raw bytes: the disassembler has
//! already resolved every `br`/`br_if`/`br_table`/`end` to its enclosing
//! block, so the validator only has to track value types, not control
//! structure bookkeeping a second time.
//!
//! Module-level checks (export/import ranges, constant-expression typing for
//! globals and segment offsets, the start function's signature) live here
//! too, since they share the same `Error::Validation` reporting.

use crate::disasm::{Disassembly, Instr};
use crate::module_image::{ExportKind, InitExpr, ModuleImage};
use crate::opcode::{BlockType, Op};
use crate::types::{Signature, ValueType};
use crate::Error;
use alloc::{format, string::String, vec, vec::Vec};

/// A validation failure before it has been attributed to a function.
/// `validate_function`/`validate_module` attach the function index (or
/// [`MODULE_LEVEL`] for checks that aren't about any one function) at their
/// single return point rather than threading it through every call site
/// below. The disassembler doesn't carry raw byte positions through
/// [`Instr`], so the byte offset is always `0` — spec §4.3's
/// `ValidationError(function_index, byte_offset, kind)` is honoured in the
/// first and third fields only.
struct ValidationFailure(String, u32);

/// Sentinel function index for `Error::Validation`s raised by module-level
/// checks that aren't about any single function body.
pub const MODULE_LEVEL: u32 = u32::MAX;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StackVal {
    /// Pushed by unreachable code: matches any expectation, including itself
    /// on `select`/comparisons with another `Any`.
    Any,
    Concrete(ValueType),
}

struct Frame {
    /// Type `br`/`br_if`/`br_table` must produce when targeting this frame.
    /// `None` for `loop` frames regardless of the loop's own result type,
    /// since a branch to a loop re-enters at its start.
    label_type: Option<ValueType>,
    /// Type this frame leaves on the stack when its `end` is reached.
    end_type: Option<ValueType>,
    height: usize,
    unreachable: bool,
    is_if: bool,
}

fn block_result(sig: BlockType) -> Option<ValueType> {
    match sig {
        BlockType::Empty => None,
        BlockType::Value(t) => Some(t),
    }
}

/// Module-level context a function body is validated against.
pub struct ValidationContext<'a> {
    pub types: &'a [Signature],
    pub func_signatures: &'a [Signature],
    /// `(value_type, mutable)` per global, in module global-index order.
    pub globals: &'a [(ValueType, bool)],
    pub has_table: bool,
    pub has_memory: bool,
}

struct Validator<'a> {
    stack: Vec<StackVal>,
    frames: Vec<Frame>,
    locals: &'a [ValueType],
    ctx: &'a ValidationContext<'a>,
    signature: &'a Signature,
}

impl<'a> Validator<'a> {
    fn push(&mut self, t: ValueType) {
        self.stack.push(StackVal::Concrete(t));
    }

    fn pop_any(&mut self) -> Result<StackVal, ValidationFailure> {
        let frame = self.frames.last().expect("function frame always present");
        if self.stack.len() == frame.height {
            if frame.unreachable {
                return Ok(StackVal::Any);
            }
            return Err(ValidationFailure("stack underflow".into(), 0));
        }
        Ok(self.stack.pop().expect("checked non-empty above"))
    }

    fn pop_expect(&mut self, expected: ValueType) -> Result<(), ValidationFailure> {
        match self.pop_any()? {
            StackVal::Any => Ok(()),
            StackVal::Concrete(t) if t == expected => Ok(()),
            StackVal::Concrete(t) => Err(ValidationFailure(
                format!("type mismatch: expected {:?}, found {:?}", expected, t),
                0,
            )),
        }
    }

    fn set_unreachable(&mut self) {
        let frame = self.frames.last_mut().expect("function frame always present");
        frame.unreachable = true;
        let height = frame.height;
        self.stack.truncate(height);
    }

    /// Checks the current frame leaves exactly its `end_type` on the stack,
    /// without popping the frame itself.
    fn check_frame_end(&mut self) -> Result<(), ValidationFailure> {
        let end_type = self.frames.last().expect("function frame always present").end_type;
        if let Some(t) = end_type {
            self.pop_expect(t)?;
        }
        let frame = self.frames.last().expect("function frame always present");
        if !frame.unreachable && self.stack.len() != frame.height {
            return Err(ValidationFailure(
                "values remaining on stack at block end".into(),
                0,
            ));
        }
        Ok(())
    }
}

/// Stack effect of an opcode whose operand/result types follow directly from
/// its name (`i32.add`, `f64.sqrt`, `i32.trunc_s/f64`, ...). Control flow,
/// locals/globals, memory access and calls are typed specially in
/// `validate_function` since they need module/function context.
fn simple_op_types(op: &Op) -> (Vec<ValueType>, Option<ValueType>) {
    use Op::*;
    use ValueType::*;
    match op {
        I32Const(_) => (vec![], Some(I32)),
        I64Const(_) => (vec![], Some(I64)),
        F32Const(_) => (vec![], Some(F32)),
        F64Const(_) => (vec![], Some(F64)),

        I32Eqz => (vec![I32], Some(I32)),
        I64Eqz => (vec![I64], Some(I32)),

        I32Eq | I32Ne | I32LtS | I32LtU | I32GtS | I32GtU | I32LeS | I32LeU | I32GeS | I32GeU => {
            (vec![I32, I32], Some(I32))
        }
        I64Eq | I64Ne | I64LtS | I64LtU | I64GtS | I64GtU | I64LeS | I64LeU | I64GeS | I64GeU => {
            (vec![I64, I64], Some(I32))
        }
        F32Eq | F32Ne | F32Lt | F32Gt | F32Le | F32Ge => (vec![F32, F32], Some(I32)),
        F64Eq | F64Ne | F64Lt | F64Gt | F64Le | F64Ge => (vec![F64, F64], Some(I32)),

        I32Clz | I32Ctz | I32Popcnt => (vec![I32], Some(I32)),
        I64Clz | I64Ctz | I64Popcnt => (vec![I64], Some(I64)),
        F32Abs | F32Neg | F32Ceil | F32Floor | F32Trunc | F32Nearest | F32Sqrt => {
            (vec![F32], Some(F32))
        }
        F64Abs | F64Neg | F64Ceil | F64Floor | F64Trunc | F64Nearest | F64Sqrt => {
            (vec![F64], Some(F64))
        }

        I32Add | I32Sub | I32Mul | I32DivS | I32DivU | I32RemS | I32RemU | I32And | I32Or
        | I32Xor | I32Shl | I32ShrS | I32ShrU | I32Rotl | I32Rotr => (vec![I32, I32], Some(I32)),
        I64Add | I64Sub | I64Mul | I64DivS | I64DivU | I64RemS | I64RemU | I64And | I64Or
        | I64Xor | I64Shl | I64ShrS | I64ShrU | I64Rotl | I64Rotr => (vec![I64, I64], Some(I64)),
        F32Add | F32Sub | F32Mul | F32Div | F32Min | F32Max | F32Copysign => {
            (vec![F32, F32], Some(F32))
        }
        F64Add | F64Sub | F64Mul | F64Div | F64Min | F64Max | F64Copysign => {
            (vec![F64, F64], Some(F64))
        }

        I32WrapI64 => (vec![I64], Some(I32)),
        I32TruncSF32 | I32TruncUF32 => (vec![F32], Some(I32)),
        I32TruncSF64 | I32TruncUF64 => (vec![F64], Some(I32)),
        I64ExtendSI32 | I64ExtendUI32 => (vec![I32], Some(I64)),
        I64TruncSF32 | I64TruncUF32 => (vec![F32], Some(I64)),
        I64TruncSF64 | I64TruncUF64 => (vec![F64], Some(I64)),
        F32ConvertSI32 | F32ConvertUI32 => (vec![I32], Some(F32)),
        F32ConvertSI64 | F32ConvertUI64 => (vec![I64], Some(F32)),
        F32DemoteF64 => (vec![F64], Some(F32)),
        F64ConvertSI32 | F64ConvertUI32 => (vec![I32], Some(F64)),
        F64ConvertSI64 | F64ConvertUI64 => (vec![I64], Some(F64)),
        F64PromoteF32 => (vec![F32], Some(F64)),

        I32ReinterpretF32 => (vec![F32], Some(I32)),
        I64ReinterpretF64 => (vec![F64], Some(I64)),
        F32ReinterpretI32 => (vec![I32], Some(F32)),
        F64ReinterpretI64 => (vec![I64], Some(F64)),

        other => unreachable!("{:?} handled explicitly in validate_function", other),
    }
}

fn load_result_type(op: &Op) -> ValueType {
    use Op::*;
    match op {
        I32Load(_) | I32Load8S(_) | I32Load8U(_) | I32Load16S(_) | I32Load16U(_) => ValueType::I32,
        I64Load(_) | I64Load8S(_) | I64Load8U(_) | I64Load16S(_) | I64Load16U(_)
        | I64Load32S(_) | I64Load32U(_) => ValueType::I64,
        F32Load(_) => ValueType::F32,
        F64Load(_) => ValueType::F64,
        other => unreachable!("{:?} is not a load", other),
    }
}

fn store_value_type(op: &Op) -> ValueType {
    use Op::*;
    match op {
        I32Store(_) | I32Store8(_) | I32Store16(_) => ValueType::I32,
        I64Store(_) | I64Store8(_) | I64Store16(_) | I64Store32(_) => ValueType::I64,
        F32Store(_) => ValueType::F32,
        F64Store(_) => ValueType::F64,
        other => unreachable!("{:?} is not a store", other),
    }
}

/// Type-checks one disassembled function body. `function_index` is the
/// function's index in the module's function space, attached to any
/// resulting `Error::Validation` for diagnostics (spec §4.3).
pub fn validate_function(
    signature: &Signature,
    locals: &[ValueType],
    disassembly: &Disassembly,
    ctx: &ValidationContext,
    function_index: u32,
) -> Result<(), Error> {
    validate_function_inner(signature, locals, disassembly, ctx)
        .map_err(|ValidationFailure(msg, offset)| Error::Validation(msg, function_index, offset))
}

fn validate_function_inner(
    signature: &Signature,
    locals: &[ValueType],
    disassembly: &Disassembly,
    ctx: &ValidationContext,
) -> Result<(), ValidationFailure> {
    let mut v = Validator {
        stack: Vec::new(),
        frames: vec![Frame {
            label_type: signature.return_type(),
            end_type: signature.return_type(),
            height: 0,
            unreachable: false,
            is_if: false,
        }],
        locals,
        ctx,
        signature,
    };

    for instr in &disassembly.instrs {
        let Instr { op, .. } = instr;
        match op {
            Op::Unreachable => v.set_unreachable(),
            Op::Nop => {}

            Op::Block(sig) => {
                let t = block_result(*sig);
                v.frames.push(Frame {
                    label_type: t,
                    end_type: t,
                    height: v.stack.len(),
                    unreachable: false,
                    is_if: false,
                });
            }
            Op::Loop(sig) => {
                let t = block_result(*sig);
                v.frames.push(Frame {
                    label_type: None,
                    end_type: t,
                    height: v.stack.len(),
                    unreachable: false,
                    is_if: false,
                });
            }
            Op::If(sig) => {
                v.pop_expect(ValueType::I32)?;
                let t = block_result(*sig);
                v.frames.push(Frame {
                    label_type: t,
                    end_type: t,
                    height: v.stack.len(),
                    unreachable: false,
                    is_if: true,
                });
            }
            Op::Else => {
                v.check_frame_end()?;
                let frame = v
                    .frames
                    .last()
                    .expect("function frame always present");
                if !frame.is_if {
                    return Err(ValidationFailure("else without matching if".into(), 0));
                }
                let (end_type, height) = (frame.end_type, frame.height);
                v.frames.pop();
                v.frames.push(Frame {
                    label_type: end_type,
                    end_type,
                    height,
                    unreachable: false,
                    is_if: false,
                });
            }
            Op::End => {
                v.check_frame_end()?;
                let frame = v
                    .frames
                    .pop()
                    .ok_or_else(|| ValidationFailure("unmatched end".into(), 0))?;
                if frame.is_if && frame.end_type.is_some() {
                    return Err(ValidationFailure(
                        "if with a result type must have a matching else".into(),
                        0,
                    ));
                }
                if let Some(t) = frame.end_type {
                    v.push(t);
                }
            }

            Op::Br(depth) => {
                let idx = v
                    .frames
                    .len()
                    .checked_sub(1 + *depth as usize)
                    .ok_or_else(|| ValidationFailure("br depth out of range".into(), 0))?;
                if let Some(t) = v.frames[idx].label_type {
                    v.pop_expect(t)?;
                }
                v.set_unreachable();
            }
            Op::BrIf(depth) => {
                v.pop_expect(ValueType::I32)?;
                let idx = v
                    .frames
                    .len()
                    .checked_sub(1 + *depth as usize)
                    .ok_or_else(|| ValidationFailure("br_if depth out of range".into(), 0))?;
                if let Some(t) = v.frames[idx].label_type {
                    v.pop_expect(t)?;
                    v.push(t);
                }
            }
            Op::BrTable(depths, default) => {
                v.pop_expect(ValueType::I32)?;
                let default_idx = v
                    .frames
                    .len()
                    .checked_sub(1 + *default as usize)
                    .ok_or_else(|| ValidationFailure("br_table depth out of range".into(), 0))?;
                let expected = v.frames[default_idx].label_type;
                for d in depths.iter() {
                    let idx = v.frames.len().checked_sub(1 + *d as usize).ok_or_else(|| {
                        ValidationFailure("br_table depth out of range".into(), 0)
                    })?;
                    if v.frames[idx].label_type != expected {
                        return Err(ValidationFailure(
                            "br_table targets disagree on result type".into(),
                            0,
                        ));
                    }
                }
                if let Some(t) = expected {
                    v.pop_expect(t)?;
                }
                v.set_unreachable();
            }
            Op::Return => {
                if let Some(t) = v.signature.return_type() {
                    v.pop_expect(t)?;
                }
                v.set_unreachable();
            }

            Op::Call(func_idx) => {
                let sig = ctx
                    .func_signatures
                    .get(*func_idx as usize)
                    .ok_or_else(|| ValidationFailure("call: function index out of range".into(), 0))?;
                for p in sig.params().iter().rev() {
                    v.pop_expect(*p)?;
                }
                if let Some(t) = sig.return_type() {
                    v.push(t);
                }
            }
            Op::CallIndirect(type_idx) => {
                if !ctx.has_table {
                    return Err(ValidationFailure("call_indirect requires a table".into(), 0));
                }
                v.pop_expect(ValueType::I32)?;
                let sig = ctx.types.get(*type_idx as usize).ok_or_else(|| {
                    ValidationFailure("call_indirect: type index out of range".into(), 0)
                })?;
                for p in sig.params().iter().rev() {
                    v.pop_expect(*p)?;
                }
                if let Some(t) = sig.return_type() {
                    v.push(t);
                }
            }

            Op::Drop => {
                v.pop_any()?;
            }
            Op::Select => {
                v.pop_expect(ValueType::I32)?;
                let b = v.pop_any()?;
                let a = v.pop_any()?;
                match (a, b) {
                    (StackVal::Any, StackVal::Any) => v.stack.push(StackVal::Any),
                    (StackVal::Any, StackVal::Concrete(t))
                    | (StackVal::Concrete(t), StackVal::Any) => v.push(t),
                    (StackVal::Concrete(ta), StackVal::Concrete(tb)) => {
                        if ta != tb {
                            return Err(ValidationFailure(
                                "select: operand types differ".into(),
                                0,
                            ));
                        }
                        v.push(ta);
                    }
                }
            }

            Op::GetLocal(idx) => {
                let t = *locals
                    .get(*idx as usize)
                    .ok_or_else(|| ValidationFailure("local.get: index out of range".into(), 0))?;
                v.push(t);
            }
            Op::SetLocal(idx) => {
                let t = *locals
                    .get(*idx as usize)
                    .ok_or_else(|| ValidationFailure("local.set: index out of range".into(), 0))?;
                v.pop_expect(t)?;
            }
            Op::TeeLocal(idx) => {
                let t = *locals
                    .get(*idx as usize)
                    .ok_or_else(|| ValidationFailure("local.tee: index out of range".into(), 0))?;
                v.pop_expect(t)?;
                v.push(t);
            }
            Op::GetGlobal(idx) => {
                let (t, _) = *ctx
                    .globals
                    .get(*idx as usize)
                    .ok_or_else(|| ValidationFailure("global.get: index out of range".into(), 0))?;
                v.push(t);
            }
            Op::SetGlobal(idx) => {
                let (t, mutable) = *ctx
                    .globals
                    .get(*idx as usize)
                    .ok_or_else(|| ValidationFailure("global.set: index out of range".into(), 0))?;
                if !mutable {
                    return Err(ValidationFailure("global.set: global is immutable".into(), 0));
                }
                v.pop_expect(t)?;
            }

            Op::CurrentMemory => {
                if !ctx.has_memory {
                    return Err(ValidationFailure("memory.size requires a memory".into(), 0));
                }
                v.push(ValueType::I32);
            }
            Op::GrowMemory => {
                if !ctx.has_memory {
                    return Err(ValidationFailure("memory.grow requires a memory".into(), 0));
                }
                v.pop_expect(ValueType::I32)?;
                v.push(ValueType::I32);
            }

            op @ (Op::I32Load(_)
            | Op::I64Load(_)
            | Op::F32Load(_)
            | Op::F64Load(_)
            | Op::I32Load8S(_)
            | Op::I32Load8U(_)
            | Op::I32Load16S(_)
            | Op::I32Load16U(_)
            | Op::I64Load8S(_)
            | Op::I64Load8U(_)
            | Op::I64Load16S(_)
            | Op::I64Load16U(_)
            | Op::I64Load32S(_)
            | Op::I64Load32U(_)) => {
                if !ctx.has_memory {
                    return Err(ValidationFailure("memory access requires a memory".into(), 0));
                }
                v.pop_expect(ValueType::I32)?;
                v.push(load_result_type(op));
            }
            op @ (Op::I32Store(_)
            | Op::I64Store(_)
            | Op::F32Store(_)
            | Op::F64Store(_)
            | Op::I32Store8(_)
            | Op::I32Store16(_)
            | Op::I64Store8(_)
            | Op::I64Store16(_)
            | Op::I64Store32(_)) => {
                if !ctx.has_memory {
                    return Err(ValidationFailure("memory access requires a memory".into(), 0));
                }
                v.pop_expect(store_value_type(op))?;
                v.pop_expect(ValueType::I32)?;
            }

            other => {
                let (pops, push) = simple_op_types(other);
                for t in pops.into_iter().rev() {
                    v.pop_expect(t)?;
                }
                if let Some(t) = push {
                    v.push(t);
                }
            }
        }
    }

    if !v.frames.is_empty() {
        return Err(ValidationFailure(
            "function body ends with unclosed blocks".into(),
            0,
        ));
    }
    Ok(())
}

/// Evaluates the static type of a restricted constant expression, per §4.7.
/// This module model has no imported globals, so the usual "must reference
/// an imported global" rule becomes: `get_global` may only name a global
/// declared earlier in the module (its initializer has already run) and
/// that global must be immutable.
fn const_expr_type(expr: &InitExpr, image: &ModuleImage, visible_globals: usize) -> Result<ValueType, ValidationFailure> {
    match expr {
        InitExpr::I32Const(_) => Ok(ValueType::I32),
        InitExpr::I64Const(_) => Ok(ValueType::I64),
        InitExpr::F32Const(_) => Ok(ValueType::F32),
        InitExpr::F64Const(_) => Ok(ValueType::F64),
        InitExpr::GetGlobal(idx) => {
            if *idx as usize >= visible_globals {
                return Err(ValidationFailure(
                    "global.get in a constant expression must reference an earlier, already-initialized global"
                        .into(),
                    0,
                ));
            }
            let global = image
                .globals
                .get(*idx as usize)
                .ok_or_else(|| ValidationFailure("constant expression: global index out of range".into(), 0))?;
            if global.mutable {
                return Err(ValidationFailure(
                    "global.get in a constant expression must reference an immutable global"
                        .into(),
                    0,
                ));
            }
            Ok(global.value_type)
        }
    }
}

/// Module-level checks: constant-expression typing for globals and segment
/// offsets, export/import index ranges, and the start function's signature.
/// Per-function type-checking happens separately via `validate_function`
/// once each body has been disassembled.
pub fn validate_module(image: &ModuleImage) -> Result<(), Error> {
    validate_module_inner(image)
        .map_err(|ValidationFailure(msg, offset)| Error::Validation(msg, MODULE_LEVEL, offset))
}

fn validate_module_inner(image: &ModuleImage) -> Result<(), ValidationFailure> {
    for (i, g) in image.globals.iter().enumerate() {
        let t = const_expr_type(&g.init, image, i)?;
        if t != g.value_type {
            return Err(ValidationFailure(
                "global initializer type does not match declared type".into(),
                0,
            ));
        }
    }

    // Segment offsets run after every global initializer, so all globals are
    // visible to them.
    let all_globals = image.globals.len();

    for elem in &image.elements {
        if image.table.is_none() {
            return Err(ValidationFailure("element segment requires a table".into(), 0));
        }
        if const_expr_type(&elem.offset, image, all_globals)? != ValueType::I32 {
            return Err(ValidationFailure(
                "element segment offset must be i32".into(),
                0,
            ));
        }
        for &idx in &elem.func_indices {
            if idx as usize >= image.functions.len() {
                return Err(ValidationFailure(
                    "element segment: function index out of range".into(),
                    0,
                ));
            }
        }
    }

    for data in &image.data {
        if image.memory.is_none() {
            return Err(ValidationFailure("data segment requires a memory".into(), 0));
        }
        if const_expr_type(&data.offset, image, all_globals)? != ValueType::I32 {
            return Err(ValidationFailure("data segment offset must be i32".into(), 0));
        }
    }

    for exp in &image.exports {
        let in_range = match exp.kind {
            ExportKind::Func => (exp.index as usize) < image.functions.len(),
            ExportKind::Table => exp.index == 0 && image.table.is_some(),
            ExportKind::Memory => exp.index == 0 && image.memory.is_some(),
            ExportKind::Global => (exp.index as usize) < image.globals.len(),
        };
        if !in_range {
            return Err(ValidationFailure(
                format!("export '{}' refers to a non-existent item", exp.name),
                0,
            ));
        }
    }

    if let Some(start) = image.start {
        let sig = image
            .functions
            .get(start as usize)
            .ok_or_else(|| ValidationFailure("start function index out of range".into(), 0))?
            .signature();
        if !sig.params().is_empty() || sig.return_type().is_some() {
            return Err(ValidationFailure(
                "start function must have signature () -> ()".into(),
                0,
            ));
        }
    }

    Ok(())
}
