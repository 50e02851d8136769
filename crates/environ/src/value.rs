//! Runtime value representations.

use crate::types::ValType;
use core::fmt;

/// A WebAssembly value stored without its type tag: 16 raw bytes, enough
/// for any value up to `v128`. Mutable-global slots and global initial
/// values are stored in this form and copied bitwise.
#[derive(Copy, Clone, Default, PartialEq, Eq)]
#[repr(C, align(16))]
pub struct UntaggedValue {
    bytes: [u8; 16],
}

impl UntaggedValue {
    /// The all-zero value.
    pub const ZERO: UntaggedValue = UntaggedValue { bytes: [0; 16] };

    /// Stores an `i32` in the low bytes.
    pub fn from_i32(value: i32) -> Self {
        Self::from_u128(value as u32 as u128)
    }

    /// Stores an `i64` in the low bytes.
    pub fn from_i64(value: i64) -> Self {
        Self::from_u128(value as u64 as u128)
    }

    /// Stores an `f32`'s bit pattern in the low bytes.
    pub fn from_f32(value: f32) -> Self {
        Self::from_u128(value.to_bits() as u128)
    }

    /// Stores an `f64`'s bit pattern in the low bytes.
    pub fn from_f64(value: f64) -> Self {
        Self::from_u128(value.to_bits() as u128)
    }

    /// Stores all 128 bits.
    pub fn from_u128(value: u128) -> Self {
        Self {
            bytes: value.to_le_bytes(),
        }
    }

    /// The low 32 bits as an `i32`.
    pub fn as_i32(&self) -> i32 {
        self.as_u128() as u32 as i32
    }

    /// The low 64 bits as an `i64`.
    pub fn as_i64(&self) -> i64 {
        self.as_u128() as u64 as i64
    }

    /// The low 32 bits reinterpreted as an `f32`.
    pub fn as_f32(&self) -> f32 {
        f32::from_bits(self.as_u128() as u32)
    }

    /// The low 64 bits reinterpreted as an `f64`.
    pub fn as_f64(&self) -> f64 {
        f64::from_bits(self.as_u128() as u64)
    }

    /// All 128 bits.
    pub fn as_u128(&self) -> u128 {
        u128::from_le_bytes(self.bytes)
    }
}

impl fmt::Debug for UntaggedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UntaggedValue({:#034x})", self.as_u128())
    }
}

/// A typed WebAssembly value.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum Val {
    /// An `i32`.
    I32(i32),
    /// An `i64`.
    I64(i64),
    /// An `f32`.
    F32(f32),
    /// An `f64`.
    F64(f64),
    /// A `v128`.
    V128(u128),
}

impl Val {
    /// The type of this value.
    pub fn ty(&self) -> ValType {
        match self {
            Val::I32(_) => ValType::I32,
            Val::I64(_) => ValType::I64,
            Val::F32(_) => ValType::F32,
            Val::F64(_) => ValType::F64,
            Val::V128(_) => ValType::V128,
        }
    }

    /// This value without its type tag.
    pub fn untagged(&self) -> UntaggedValue {
        match *self {
            Val::I32(x) => UntaggedValue::from_i32(x),
            Val::I64(x) => UntaggedValue::from_i64(x),
            Val::F32(x) => UntaggedValue::from_f32(x),
            Val::F64(x) => UntaggedValue::from_f64(x),
            Val::V128(x) => UntaggedValue::from_u128(x),
        }
    }
}
