use crate::{isa, types::Signature};
use alloc::{rc::Rc, vec::Vec};
use core::fmt;

/// A local variable declaration: `count` consecutive locals all of
/// `value_type`, as they appear in a function's locals vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Local {
    pub count: u32,
    pub value_type: crate::types::ValueType,
}

/// Reference to a function (See [`FuncInstance`] for details).
///
/// This reference has a reference-counting semantics.
///
/// [`FuncInstance`]: struct.FuncInstance.html
#[derive(Clone, Debug)]
pub struct FuncRef(Rc<FuncInstance>);

impl core::ops::Deref for FuncRef {
    type Target = FuncInstance;
    fn deref(&self) -> &FuncInstance {
        &self.0
    }
}

/// Runtime representation of a function: either defined by the module being
/// executed, or bound to a host callable via [`Externals`].
///
/// [`Externals`]: crate::Externals
pub struct FuncInstance(FuncInstanceInternal);

#[derive(Clone)]
pub(crate) enum FuncInstanceInternal {
    Internal {
        signature: Rc<Signature>,
        body: Rc<FuncBody>,
    },
    Host {
        signature: Signature,
        host_func_index: usize,
    },
}

impl fmt::Debug for FuncInstance {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.as_internal() {
            FuncInstanceInternal::Internal { signature, .. } => {
                write!(f, "Internal {{ signature={:?} }}", signature)
            }
            FuncInstanceInternal::Host { signature, .. } => {
                write!(f, "Host {{ signature={:?} }}", signature)
            }
        }
    }
}

impl FuncInstance {
    /// Allocate a function instance for a host function.
    ///
    /// When this function instance is called, the bound [`Externals`] is
    /// invoked via `invoke_index` with the given `host_func_index`.
    ///
    /// [`Externals`]: crate::Externals
    pub fn alloc_host(signature: Signature, host_func_index: usize) -> FuncRef {
        FuncRef(Rc::new(FuncInstance(FuncInstanceInternal::Host {
            signature,
            host_func_index,
        })))
    }

    pub(crate) fn alloc_internal(signature: Rc<Signature>, body: FuncBody) -> FuncRef {
        FuncRef(Rc::new(FuncInstance(FuncInstanceInternal::Internal {
            signature,
            body: Rc::new(body),
        })))
    }

    /// Returns the [signature] of this function instance.
    ///
    /// [signature]: crate::Signature
    pub fn signature(&self) -> &Signature {
        match self.as_internal() {
            FuncInstanceInternal::Internal { signature, .. } => signature,
            FuncInstanceInternal::Host { signature, .. } => signature,
        }
    }

    pub(crate) fn as_internal(&self) -> &FuncInstanceInternal {
        &self.0
    }

    pub(crate) fn body(&self) -> Option<Rc<FuncBody>> {
        match self.as_internal() {
            FuncInstanceInternal::Internal { body, .. } => Some(Rc::clone(body)),
            FuncInstanceInternal::Host { .. } => None,
        }
    }
}

/// A lowered, validated function body: its locals layout and the flat
/// bytecode produced by the structured→flat compiler.
#[derive(Debug, Clone)]
pub struct FuncBody {
    pub locals: Vec<Local>,
    pub code: isa::Instructions,
    /// Maximum operand-stack depth this function can reach, computed by the
    /// disassembler and used to pre-size the VM's operand stack.
    pub max_operand_depth: u32,
}
