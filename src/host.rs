use crate::{memory::MemoryRef, types::Signature, value::{FromRuntimeValue, RuntimeValue}, Trap, TrapKind};
use core::any::TypeId;
use core::cell::Cell;
use core::fmt;
use memory_units::Bytes;

/// Wrapper around slice of [`RuntimeValue`] for using it
/// as an argument list conveniently.
///
/// [`RuntimeValue`]: enum.RuntimeValue.html
#[derive(Debug)]
pub struct RuntimeArgs<'a>(&'a [RuntimeValue]);

impl<'a> From<&'a [RuntimeValue]> for RuntimeArgs<'a> {
    fn from(inner: &'a [RuntimeValue]) -> Self {
        RuntimeArgs(inner)
    }
}

impl<'a> AsRef<[RuntimeValue]> for RuntimeArgs<'a> {
    fn as_ref(&self) -> &[RuntimeValue] {
        self.0
    }
}

impl<'a> RuntimeArgs<'a> {
    /// Extract argument by index `idx`.
    ///
    /// # Errors
    ///
    /// Returns `Err` if cast is invalid or not enough arguments.
    pub fn nth_checked<T>(&self, idx: usize) -> Result<T, Trap>
    where
        T: FromRuntimeValue,
    {
        self.nth_value_checked(idx)?
            .try_into()
            .ok_or_else(|| TrapKind::IndirectCallSignatureMismatch.into())
    }

    /// Extract argument as a [`RuntimeValue`] by index `idx`.
    ///
    /// # Errors
    ///
    /// Returns `Err` if this list has not enough arguments.
    ///
    /// [`RuntimeValue`]: enum.RuntimeValue.html
    pub fn nth_value_checked(&self, idx: usize) -> Result<RuntimeValue, Trap> {
        if self.0.len() <= idx {
            return Err(TrapKind::IndirectCallSignatureMismatch.into());
        }
        Ok(self.0[idx])
    }

    /// Extract argument by index `idx`.
    ///
    /// # Panics
    ///
    /// Panics if cast is invalid or not enough arguments.
    pub fn nth<T>(&self, idx: usize) -> T
    where
        T: FromRuntimeValue,
    {
        let value = self.nth_value_checked(idx).expect("Invalid argument index");
        value.try_into().expect("Unexpected argument type")
    }

    /// Total number of arguments
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether this argument list is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// A bounds violation reported from [`ProcessHandle::read_at`]/[`write_at`],
/// rather than surfaced as a trap: host code decides for itself whether a
/// partial transfer is fatal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundsError {
    /// The offset the host asked for.
    pub offset: u32,
    /// How many bytes were requested.
    pub requested: usize,
    /// The length of linear memory at the time of the request.
    pub memory_len: usize,
}

impl fmt::Display for BoundsError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "access at offset {} of {} bytes exceeds memory length {}",
            self.offset, self.requested, self.memory_len
        )
    }
}

/// The embedder-facing handle given to host functions for linear-memory
/// access and termination requests. Valid only for the duration of a single
/// host call.
pub struct ProcessHandle<'a> {
    memory: Option<&'a MemoryRef>,
    aborted: &'a Cell<bool>,
}

impl<'a> ProcessHandle<'a> {
    pub(crate) fn new(memory: Option<&'a MemoryRef>, aborted: &'a Cell<bool>) -> Self {
        ProcessHandle { memory, aborted }
    }

    /// Copies as many bytes as fit from linear memory starting at `offset`
    /// into `dst`, returning the number of bytes actually copied and a
    /// [`BoundsError`] describing the shortfall, if any.
    pub fn read_at(&self, dst: &mut [u8], offset: u32) -> (usize, Option<BoundsError>) {
        let memory = match self.memory {
            Some(memory) => memory,
            None => {
                return (
                    0,
                    Some(BoundsError {
                        offset,
                        requested: dst.len(),
                        memory_len: 0,
                    }),
                )
            }
        };
        let memory_len = Bytes::from(memory.current_size()).0;
        let available = memory_len.saturating_sub(offset as usize);
        let n_copied = available.min(dst.len());
        if n_copied > 0 {
            // `get_into` requires the full range to be in-bounds; we've
            // already clamped `n_copied` to what's available.
            let _ = memory.get_into(offset, &mut dst[..n_copied]);
        }
        let err = if n_copied < dst.len() {
            Some(BoundsError {
                offset,
                requested: dst.len(),
                memory_len,
            })
        } else {
            None
        };
        (n_copied, err)
    }

    /// Copies as many bytes as fit from `src` into linear memory starting at
    /// `offset`, returning the number of bytes actually copied and a
    /// [`BoundsError`] describing the shortfall, if any.
    pub fn write_at(&self, src: &[u8], offset: u32) -> (usize, Option<BoundsError>) {
        let memory = match self.memory {
            Some(memory) => memory,
            None => {
                return (
                    0,
                    Some(BoundsError {
                        offset,
                        requested: src.len(),
                        memory_len: 0,
                    }),
                )
            }
        };
        let memory_len = Bytes::from(memory.current_size()).0;
        let available = memory_len.saturating_sub(offset as usize);
        let n_copied = available.min(src.len());
        if n_copied > 0 {
            let _ = memory.set(offset, &src[..n_copied]);
        }
        let err = if n_copied < src.len() {
            Some(BoundsError {
                offset,
                requested: src.len(),
                memory_len,
            })
        } else {
            None
        };
        (n_copied, err)
    }

    /// Requests that the VM abort the current invocation as soon as this
    /// host call returns, without dispatching any further opcodes.
    pub fn terminate(&self) {
        self.aborted.set(true);
    }
}

/// Trait that allows the host to return custom error.
///
/// It should be useful for representing custom traps,
/// troubles at instantiation time or other host specific conditions.
///
/// # Examples
///
/// ```rust
/// use std::fmt;
/// use wasmite::{Error, HostError};
///
/// #[derive(Debug)]
/// struct MyError {
///     code: u32,
/// }
///
/// impl fmt::Display for MyError {
///     fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
///         write!(f, "MyError, code={}", self.code)
///     }
/// }
///
/// impl HostError for MyError { }
///
/// fn failable_fn() -> Result<(), Error> {
///     let my_error = MyError { code: 1312 };
///     Err(Error::Host(Box::new(my_error)))
/// }
///
/// match failable_fn() {
///     Err(Error::Host(host_error)) => {
///         let my_error = host_error.downcast_ref::<MyError>().unwrap();
///         assert_eq!(my_error.code, 1312);
///     }
///     _ => panic!(),
/// }
/// ```
pub trait HostError: 'static + fmt::Display + fmt::Debug + Send + Sync {
    #[doc(hidden)]
    fn __private_get_type_id__(&self) -> TypeId {
        TypeId::of::<Self>()
    }
}

impl dyn HostError {
    /// Attempt to downcast this `HostError` to a concrete type by reference.
    pub fn downcast_ref<T: HostError>(&self) -> Option<&T> {
        if self.__private_get_type_id__() == TypeId::of::<T>() {
            unsafe { Some(&*(self as *const dyn HostError as *const T)) }
        } else {
            None
        }
    }

    /// Attempt to downcast this `HostError` to a concrete type by mutable
    /// reference.
    pub fn downcast_mut<T: HostError>(&mut self) -> Option<&mut T> {
        if self.__private_get_type_id__() == TypeId::of::<T>() {
            unsafe { Some(&mut *(self as *mut dyn HostError as *mut T)) }
        } else {
            None
        }
    }
}

/// Binds a registered host function to the interpreter.
///
/// The callable shape is fixed: given the [`ProcessHandle`] and the already
/// popped argument list, produce zero or one result, or trap. `index` lets a
/// single `Externals` implementation multiplex several imports.
pub trait Externals {
    /// Perform invoke of a host function by specified `index`.
    fn invoke_index(
        &mut self,
        index: usize,
        args: RuntimeArgs,
        process: &mut ProcessHandle,
    ) -> Result<Option<RuntimeValue>, Trap>;

    /// The signature this host implementation expects import `index` to
    /// have. Checked once against the module's own declared import
    /// signature at [`Vm::new_vm`](crate::Vm::new_vm) time (spec §4.6): a
    /// mismatch is a fatal construction error, not a trap. Returning `None`
    /// opts the import out of this check.
    fn signature(&self, index: usize) -> Option<Signature> {
        let _ = index;
        None
    }
}

/// Implementation of [`Externals`] that just traps on [`invoke_index`].
///
/// [`Externals`]: trait.Externals.html
/// [`invoke_index`]: trait.Externals.html#tymethod.invoke_index
pub struct NopExternals;

impl Externals for NopExternals {
    fn invoke_index(
        &mut self,
        _index: usize,
        _args: RuntimeArgs,
        _process: &mut ProcessHandle,
    ) -> Result<Option<RuntimeValue>, Trap> {
        Err(TrapKind::Unreachable.into())
    }
}

#[cfg(test)]
mod tests {
    use super::{HostError, RuntimeArgs};
    use crate::value::RuntimeValue;

    #[test]
    fn i32_runtime_args() {
        let args: RuntimeArgs = (&[RuntimeValue::I32(0)][..]).into();
        let val: i32 = args.nth_checked(0).unwrap();
        assert_eq!(val, 0);
    }

    #[test]
    fn i64_invalid_arg_cast() {
        let args: RuntimeArgs = (&[RuntimeValue::I64(90534534545322)][..]).into();
        assert!(args.nth_checked::<i32>(0).is_err());
    }

    // Tests that `HostError` trait is object safe.
    fn _host_error_is_object_safe(_: &dyn HostError) {}
}
