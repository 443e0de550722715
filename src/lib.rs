//! # wasmite
//!
//! A WebAssembly 1.0 MVP execution engine. The pipeline is: a caller builds a
//! [`ModuleImage`] (binary/text decoding is out of scope — a decoder's job
//! is to produce one of these), then [`Vm::new_vm`] validates it, disassembles
//! and compiles every function body to flat bytecode, instantiates globals,
//! table and linear memory, copies segments, runs the module's `start`
//! function if declared, and hands back a [`Vm`] ready for [`Vm::exec`].
//!
//! ## Validation
//!
//! Before execution, a module is validated. This process checks that the
//! module is well-formed and only performs allowed operations: a valid
//! module can't access memory outside its sandbox, can't cause stack
//! underflows and can only call functions with correct signatures.
//!
//! ## Execution
//!
//! A function either returns a result or traps; it can never leave
//! execution in an inconsistent, partially-applied state.
//!
//! ## Host functions
//!
//! Imports are bound at construction time via an [`Externals`]
//! implementation, dispatched by index; see [`NopExternals`] for a
//! do-nothing default and [`ProcessHandle`] for the linear-memory access a
//! host callable gets while it runs.
//!
//! # Examples
//!
//! ```rust
//! use wasmite::{Export, ExportKind, FunctionDef, ModuleImage, NopExternals, Options, Signature, ValueType, Vm};
//!
//! let mut image = ModuleImage::new();
//! image.functions.push(FunctionDef::Local {
//!     signature: Signature::new(&[ValueType::I32, ValueType::I32][..], Some(ValueType::I32)),
//!     locals: Vec::new(),
//!     // local.get 0; local.get 1; i32.add; end
//!     code: vec![0x20, 0x00, 0x20, 0x01, 0x6a, 0x0b],
//! });
//! image.exports.push(Export {
//!     name: "add".into(),
//!     kind: ExportKind::Func,
//!     index: 0,
//! });
//!
//! let mut vm = Vm::new_vm(image, Options::default(), Box::new(NopExternals))
//!     .expect("module is valid");
//! assert_eq!(vm.exec(0, &[2u64, 3u64]).unwrap(), Some(5u64));
//! ```

#![warn(missing_docs)]
#![cfg_attr(not(feature = "std"), no_std)]
#![allow(clippy::len_without_is_empty)]
#![allow(clippy::new_ret_no_self)]

#[cfg(not(feature = "std"))]
#[macro_use]
extern crate alloc;
#[cfg(feature = "std")]
extern crate std as alloc;

#[cfg(feature = "std")]
#[macro_use]
extern crate core;

#[cfg(not(feature = "std"))]
extern crate libm;

use alloc::{boxed::Box, format, string::String};
use core::fmt;
#[cfg(feature = "std")]
use std::error;

/// Error type which can be thrown by wasm code or by host environment.
///
/// Under some conditions, wasm execution may produce a `Trap`, which immediately aborts execution.
/// Traps can't be handled by WebAssembly code, but are reported to the embedder.
#[derive(Debug)]
pub struct Trap {
    kind: TrapKind,
}

impl Trap {
    /// Create new trap.
    pub fn new(kind: TrapKind) -> Trap {
        Trap { kind }
    }

    /// Returns kind of this trap.
    pub fn kind(&self) -> &TrapKind {
        &self.kind
    }

    /// Converts into kind of this trap.
    pub fn into_kind(self) -> TrapKind {
        self.kind
    }
}

impl fmt::Display for Trap {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Trap: {:?}", self.kind)
    }
}

#[cfg(feature = "std")]
impl error::Error for Trap {
    fn description(&self) -> &str {
        "runtime trap"
    }
}

/// The specific condition that caused a [`Trap`] (spec §4.4 "Traps").
#[derive(Debug)]
pub enum TrapKind {
    /// Wasm code executed the `unreachable` opcode.
    ///
    /// `unreachable` is a special opcode which always traps upon execution,
    /// serving a similar purpose to `ud2` on x86.
    Unreachable,

    /// Attempt to load or store at an address outside the bounds of linear
    /// memory.
    OutOfBoundsMemoryAccess,

    /// Attempt to access a table element at an index outside the bounds of
    /// the table, or at an uninitialized (`None`) slot. Can only happen via
    /// `call_indirect`.
    UndefinedTableEntry,

    /// Attempt to divide, or take the remainder, by zero.
    DivisionByZero,

    /// A conversion to an integer overflowed: either a signed division (or
    /// remainder) of `-2^(N-1)` by `-1`, whose result `+2^(N-1)` isn't
    /// representable in `N` bits, or a float-to-integer truncation whose
    /// source was NaN, infinite, or out of the target's representable range.
    IntegerOverflow,

    /// The call stack exceeded its configured depth limit. Likely caused by
    /// unbounded or very deep recursion.
    CallStackExhausted,

    /// `call_indirect` resolved a table entry whose signature didn't match
    /// the one declared at the call site.
    IndirectCallSignatureMismatch,

    /// A host callable returned a value (or no value) that didn't match the
    /// arity/type of its declared import signature.
    UnexpectedSignature,

    /// A host callable called [`ProcessHandle::terminate`] during the
    /// current invocation.
    HostTerminated,

    /// Error raised by the host itself.
    ///
    /// Typically returned from an implementation of [`Externals`].
    Host(Box<dyn HostError>),
}

impl TrapKind {
    /// Whether this trap is specified by the host.
    pub fn is_host(&self) -> bool {
        matches!(self, TrapKind::Host(_))
    }
}

/// Internal interpreter error.
#[derive(Debug)]
pub enum Error {
    /// Module or function-body validation failed: `(message, function_index,
    /// byte_offset)`. `function_index` is [`MODULE_LEVEL`] for failures
    /// that aren't about any single function body.
    Validation(String, u32, u32),
    /// Error while building a [`Vm`] from a [`ModuleImage`]. Might occur when
    /// limits, segment offsets, or the module's own declarations are
    /// internally inconsistent.
    Instantiation(String),
    /// Function-level error: bad function index or argument mismatch at
    /// [`Vm::exec`].
    Function(String),
    /// Table-level error: out-of-bounds access or a grow beyond its maximum.
    Table(String),
    /// Memory-level error: out-of-bounds access or a grow beyond its maximum.
    Memory(String),
    /// Global-level error: a write to an immutable global.
    Global(String),
    /// Trap, surfaced as an `Error` at the [`Vm::exec`] boundary.
    Trap(Trap),
    /// Custom embedder error.
    Host(Box<dyn HostError>),
}

impl Error {
    /// Returns a reference to a [`HostError`] if this `Error` represents some host error.
    ///
    /// I.e. if this error have variant [`Host`][`Error::Host`] or [`Trap`][`Error::Trap`] with [host][`TrapKind::Host`] error.
    pub fn as_host_error(&self) -> Option<&dyn HostError> {
        match self {
            Error::Host(host_err) => Some(&**host_err),
            Error::Trap(Trap {
                kind: TrapKind::Host(host_err),
            }) => Some(&**host_err),
            _ => None,
        }
    }

    /// Returns [`HostError`] if this `Error` represents some host error.
    ///
    /// I.e. if this error have variant [`Host`][`Error::Host`] or [`Trap`][`Error::Trap`] with [host][`TrapKind::Host`] error.
    pub fn into_host_error(self) -> Option<Box<dyn HostError>> {
        match self {
            Error::Host(host_err) => Some(host_err),
            Error::Trap(Trap {
                kind: TrapKind::Host(host_err),
            }) => Some(host_err),
            _ => None,
        }
    }

    /// Returns [`HostError`] if this `Error` represents some host error, otherwise returns the original error.
    pub fn try_into_host_error(self) -> Result<Box<dyn HostError>, Self> {
        match self {
            Error::Host(host_err) => Ok(host_err),
            Error::Trap(Trap {
                kind: TrapKind::Host(host_err),
            }) => Ok(host_err),
            other => Err(other),
        }
    }
}

#[allow(clippy::from_over_into)]
impl Into<String> for Error {
    fn into(self) -> String {
        match self {
            Error::Validation(s, ..) => s,
            Error::Instantiation(s) => s,
            Error::Function(s) => s,
            Error::Table(s) => s,
            Error::Memory(s) => s,
            Error::Global(s) => s,
            Error::Trap(s) => format!("trap: {:?}", s),
            Error::Host(e) => format!("user: {}", e),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Error::Validation(ref s, function_index, offset) => {
                if function_index == validate::MODULE_LEVEL {
                    write!(f, "Validation: {} (module, byte {})", s, offset)
                } else {
                    write!(f, "Validation: {} (function {}, byte {})", s, function_index, offset)
                }
            }
            Error::Instantiation(ref s) => write!(f, "Instantiation: {}", s),
            Error::Function(ref s) => write!(f, "Function: {}", s),
            Error::Table(ref s) => write!(f, "Table: {}", s),
            Error::Memory(ref s) => write!(f, "Memory: {}", s),
            Error::Global(ref s) => write!(f, "Global: {}", s),
            Error::Trap(ref s) => write!(f, "Trap: {:?}", s),
            Error::Host(ref e) => write!(f, "User: {}", e),
        }
    }
}

#[cfg(feature = "std")]
impl error::Error for Error {
    fn description(&self) -> &str {
        match *self {
            Error::Validation(ref s, ..) => s,
            Error::Instantiation(ref s) => s,
            Error::Function(ref s) => s,
            Error::Table(ref s) => s,
            Error::Memory(ref s) => s,
            Error::Global(ref s) => s,
            Error::Trap(_) => "Trap",
            Error::Host(_) => "Host error",
        }
    }
}

impl<U> From<U> for Error
where
    U: HostError + Sized,
{
    fn from(e: U) -> Self {
        Error::Host(Box::new(e))
    }
}

impl<U> From<U> for Trap
where
    U: HostError + Sized,
{
    fn from(e: U) -> Self {
        Trap::new(TrapKind::Host(Box::new(e)))
    }
}

impl From<Trap> for Error {
    fn from(e: Trap) -> Error {
        Error::Trap(e)
    }
}

impl From<TrapKind> for Trap {
    fn from(e: TrapKind) -> Trap {
        Trap::new(e)
    }
}

mod compile;
mod disasm;
mod func;
mod global;
mod host;
mod isa;
mod memory;
mod module_image;
#[cfg(feature = "virtual_memory")]
mod native;
pub mod nan_preserving_float;
mod opcode;
mod runner;
mod table;
mod types;
mod validate;
mod value;
mod vm;

pub use self::func::{FuncInstance, FuncRef, Local};
pub use self::global::{GlobalInstance, GlobalRef};
pub use self::host::{BoundsError, Externals, HostError, NopExternals, ProcessHandle, RuntimeArgs};
pub use self::memory::{MemoryInstance, MemoryRef, LINEAR_MEMORY_PAGE_SIZE};
pub use self::module_image::{
    DataSegment, ElementSegment, Export, ExportKind, FunctionDef, GlobalDef, InitExpr, ModuleImage,
};
pub use self::runner::{DEFAULT_CALL_STACK_LIMIT, DEFAULT_VALUE_STACK_LIMIT};
pub use self::table::{TableInstance, TableRef};
pub use self::types::{Limits, Signature, ValueType};
pub use self::validate::MODULE_LEVEL;
pub use self::value::{Error as ValueError, FromRuntimeValue, LittleEndianConvert, RuntimeValue};
pub use self::vm::{Options, Vm};

/// WebAssembly-specific sizes and units.
pub mod memory_units {
    pub use memory_units::wasm32::*;
    pub use memory_units::{size_of, ByteSize, Bytes, RoundUpTo};
}
