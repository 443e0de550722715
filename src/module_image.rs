//! The decoded module structure the core consumes (spec component "module
//! image"). Binary/text decoding is out of scope: callers construct a
//! [`ModuleImage`] directly, the same way `VM` construction works once a
//! decoder has done its job upstream.

use crate::func::Local;
use crate::types::{Limits, Signature, ValueType};
use alloc::{string::String, vec::Vec};

/// A restricted constant-expression: exactly one of `i32.const`/`i64.const`/
/// `f32.const`/`f64.const`/`get_global`, used for global initialisers and
/// data/element segment offsets (spec §4.7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitExpr {
    I32Const(i32),
    I64Const(i64),
    F32Const(u32),
    F64Const(u64),
    /// Read-only reference to an earlier-declared, already-initialised,
    /// immutable global by its index in the module's global space.
    GetGlobal(u32),
}

/// One entry of the function space: either a host import (resolved at VM
/// construction time via `register_host`) or a module-defined function body
/// awaiting disassembly/compilation.
#[derive(Debug, Clone)]
pub enum FunctionDef {
    /// Declared but implemented by the embedder. `module`/`field` name the
    /// import for diagnostics; binding happens by signature match.
    Import {
        module: String,
        field: String,
        signature: Signature,
    },
    /// Defined in this module: parameter/result types live in `signature`,
    /// `locals` are the declared local variables beyond the parameters, and
    /// `code` is the raw, not-yet-disassembled function body.
    Local {
        signature: Signature,
        locals: Vec<Local>,
        code: Vec<u8>,
    },
}

impl FunctionDef {
    pub fn signature(&self) -> &Signature {
        match self {
            FunctionDef::Import { signature, .. } => signature,
            FunctionDef::Local { signature, .. } => signature,
        }
    }

    pub fn is_import(&self) -> bool {
        matches!(self, FunctionDef::Import { .. })
    }
}

/// A declared global: its type, mutability, and constant initialiser.
#[derive(Debug, Clone, Copy)]
pub struct GlobalDef {
    pub value_type: ValueType,
    pub mutable: bool,
    pub init: InitExpr,
}

/// An element segment: a list of function indices to be written into the
/// module's single table starting at `offset`.
#[derive(Debug, Clone)]
pub struct ElementSegment {
    pub offset: InitExpr,
    pub func_indices: Vec<u32>,
}

/// A data segment: raw bytes to be written into the module's single linear
/// memory starting at `offset`.
#[derive(Debug, Clone)]
pub struct DataSegment {
    pub offset: InitExpr,
    pub bytes: Vec<u8>,
}

/// The externally observable kind of an export.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportKind {
    Func,
    Table,
    Memory,
    Global,
}

/// One exported name, in declaration order (export order is observable per
/// spec §3).
#[derive(Debug, Clone)]
pub struct Export {
    pub name: String,
    pub kind: ExportKind,
    pub index: u32,
}

/// A fully decoded Wasm 1.0 MVP module, ready for validation and VM
/// construction. All spaces are immutable once built.
#[derive(Debug, Clone, Default)]
pub struct ModuleImage {
    /// Type space: function signatures referenced by index from calls and
    /// `call_indirect`.
    pub types: Vec<Signature>,
    /// Function space: host imports first, then module-defined functions, as
    /// required by spec §3 so that a function index refers into this
    /// combined space.
    pub functions: Vec<FunctionDef>,
    /// The module's single table, if declared.
    pub table: Option<Limits>,
    /// The module's single linear memory, if declared, sized in 64 KiB
    /// pages.
    pub memory: Option<Limits>,
    pub globals: Vec<GlobalDef>,
    pub exports: Vec<Export>,
    pub start: Option<u32>,
    pub elements: Vec<ElementSegment>,
    pub data: Vec<DataSegment>,
}

impl ModuleImage {
    pub fn new() -> Self {
        ModuleImage::default()
    }

    /// Number of functions imported from the host; these occupy indices
    /// `0..import_count` of the function space.
    pub fn import_count(&self) -> usize {
        self.functions.iter().take_while(|f| f.is_import()).count()
    }
}
