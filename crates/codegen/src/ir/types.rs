//! The type system of the emitted instructions.
//!
//! Memory operations are typed by their in-memory layout, so the set here
//! covers the scalar widths, the full 16-byte vectors, and the 8-byte
//! half-vectors used by the widening SIMD loads.

use core::fmt;

/// The type of an SSA value or of an in-memory access.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum Type {
    /// 8-bit integer.
    I8,
    /// 16-bit integer.
    I16,
    /// 32-bit integer.
    I32,
    /// 64-bit integer (also the pointer type; the sandbox model requires a
    /// 64-bit host).
    I64,
    /// 32-bit float.
    F32,
    /// 64-bit float.
    F64,
    /// 8 lanes of 8-bit integers (half vector).
    I8X8,
    /// 4 lanes of 16-bit integers (half vector).
    I16X4,
    /// 2 lanes of 32-bit integers (half vector).
    I32X2,
    /// 16 lanes of 8-bit integers.
    I8X16,
    /// 8 lanes of 16-bit integers.
    I16X8,
    /// 4 lanes of 32-bit integers.
    I32X4,
    /// 2 lanes of 64-bit integers.
    I64X2,
    /// 4 lanes of 32-bit floats.
    F32X4,
    /// 2 lanes of 64-bit floats.
    F64X2,
}

/// The pointer type of the emitted code.
pub const PTR: Type = Type::I64;

impl Type {
    /// The number of lanes; 1 for scalars.
    pub fn lane_count(self) -> u8 {
        match self {
            Type::I8 | Type::I16 | Type::I32 | Type::I64 | Type::F32 | Type::F64 => 1,
            Type::I8X8 => 8,
            Type::I16X4 => 4,
            Type::I32X2 => 2,
            Type::I8X16 => 16,
            Type::I16X8 => 8,
            Type::I32X4 => 4,
            Type::I64X2 => 2,
            Type::F32X4 => 4,
            Type::F64X2 => 2,
        }
    }

    /// The type of a single lane; the identity for scalars.
    pub fn lane_type(self) -> Type {
        match self {
            Type::I8X8 | Type::I8X16 => Type::I8,
            Type::I16X4 | Type::I16X8 => Type::I16,
            Type::I32X2 | Type::I32X4 => Type::I32,
            Type::I64X2 => Type::I64,
            Type::F32X4 => Type::F32,
            Type::F64X2 => Type::F64,
            scalar => scalar,
        }
    }

    /// The size of one lane, in bytes.
    pub fn lane_bytes(self) -> u8 {
        match self.lane_type() {
            Type::I8 => 1,
            Type::I16 => 2,
            Type::I32 | Type::F32 => 4,
            Type::I64 | Type::F64 => 8,
            _ => unreachable!(),
        }
    }

    /// The total size of a value of this type, in bytes.
    pub fn bytes(self) -> u8 {
        self.lane_count() * self.lane_bytes()
    }

    /// Whether this is a vector type.
    pub fn is_vector(self) -> bool {
        self.lane_count() > 1
    }

    /// Whether this is an integer scalar or integer vector.
    pub fn is_int(self) -> bool {
        matches!(
            self.lane_type(),
            Type::I8 | Type::I16 | Type::I32 | Type::I64
        )
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Type::I8 => "i8",
            Type::I16 => "i16",
            Type::I32 => "i32",
            Type::I64 => "i64",
            Type::F32 => "f32",
            Type::F64 => "f64",
            Type::I8X8 => "i8x8",
            Type::I16X4 => "i16x4",
            Type::I32X2 => "i32x2",
            Type::I8X16 => "i8x16",
            Type::I16X8 => "i16x8",
            Type::I32X4 => "i32x4",
            Type::I64X2 => "i64x2",
            Type::F32X4 => "f32x4",
            Type::F64X2 => "f64x2",
        };
        f.write_str(s)
    }
}
