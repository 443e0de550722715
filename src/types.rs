use alloc::borrow::Cow;

/// The four value types the Wasm 1.0 MVP operates on.
///
/// All operand-stack and local slots are a uniform 64-bit word at runtime;
/// `ValueType` is the static tag that says how a slot's bits are to be
/// interpreted at a given program point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueType {
    /// 32-bit signed or unsigned integer.
    I32,
    /// 64-bit signed or unsigned integer.
    I64,
    /// 32-bit IEEE 754-2008 floating point number.
    F32,
    /// 64-bit IEEE 754-2008 floating point number.
    F64,
}

/// Signature of a [function].
///
/// Signature of a function consists of zero or more parameter [types][type] and zero or one
/// return [type].
///
/// Two signatures are considered equal if they have equal list of parameters and equal return
/// types.
///
/// [type]: enum.ValueType.html
/// [function]: struct.FuncInstance.html
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    params: Cow<'static, [ValueType]>,
    return_type: Option<ValueType>,
}

impl Signature {
    /// Creates new signature with givens
    /// parameter types and optional return type.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use wasmite::{Signature, ValueType};
    ///
    /// // s1: (i32) -> ()
    /// let s1 = Signature::new(&[ValueType::I32][..], None);
    ///
    /// // s2: () -> i32
    /// let s2 = Signature::new(&[][..], Some(ValueType::I32));
    ///
    /// // s3: (I64) -> ()
    /// let dynamic_params = vec![ValueType::I64];
    /// let s3 = Signature::new(dynamic_params, None);
    /// ```
    pub fn new<C: Into<Cow<'static, [ValueType]>>>(
        params: C,
        return_type: Option<ValueType>,
    ) -> Signature {
        Signature {
            params: params.into(),
            return_type,
        }
    }

    /// Returns parameter types of this signature.
    pub fn params(&self) -> &[ValueType] {
        self.params.as_ref()
    }

    /// Returns return type of this signature.
    pub fn return_type(&self) -> Option<ValueType> {
        self.return_type
    }
}

/// Resizable limits shared by the module's table and linear memory.
///
/// `initial` is in table-elements for a table and 64 KiB pages for memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    initial: u32,
    maximum: Option<u32>,
}

impl Limits {
    /// Creates new resizable limits.
    ///
    /// # Errors
    ///
    /// Returns `Err` if `maximum` is present and smaller than `initial`.
    pub fn new(initial: u32, maximum: Option<u32>) -> Result<Limits, crate::Error> {
        if let Some(maximum) = maximum {
            if initial > maximum {
                return Err(crate::Error::Instantiation(alloc::format!(
                    "maximum limit {} is less than minimum {}",
                    maximum,
                    initial
                )));
            }
        }
        Ok(Limits { initial, maximum })
    }

    /// Returns the initial size.
    pub fn initial(&self) -> u32 {
        self.initial
    }

    /// Returns the maximum size, if declared.
    pub fn maximum(&self) -> Option<u32> {
        self.maximum
    }
}
