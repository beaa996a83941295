//! Element data types, memory representations and scalar values.

use std::fmt;
use std::str::FromStr;

use crate::error::ClicError;

/// Element data type of an [`Array`](crate::Array).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum DataType {
    I8,
    U8,
    I16,
    U16,
    I32,
    U32,
    I64,
    U64,
    F32,
    F64,
}

impl DataType {
    /// All supported data types.
    pub const ALL: [DataType; 10] = [
        DataType::I8,
        DataType::U8,
        DataType::I16,
        DataType::U16,
        DataType::I32,
        DataType::U32,
        DataType::I64,
        DataType::U64,
        DataType::F32,
        DataType::F64,
    ];

    /// Size of one element in bytes.
    pub const fn size(&self) -> usize {
        match self {
            DataType::I8 | DataType::U8 => 1,
            DataType::I16 | DataType::U16 => 2,
            DataType::I32 | DataType::U32 | DataType::F32 => 4,
            DataType::I64 | DataType::U64 | DataType::F64 => 8,
        }
    }

    pub const fn is_float(&self) -> bool {
        matches!(self, DataType::F32 | DataType::F64)
    }

    pub const fn is_signed(&self) -> bool {
        matches!(
            self,
            DataType::I8 | DataType::I16 | DataType::I32 | DataType::I64 | DataType::F32 | DataType::F64
        )
    }

    /// Short lowercase name (`"f32"`, `"u8"`, ...).
    pub const fn name(&self) -> &'static str {
        match self {
            DataType::I8 => "i8",
            DataType::U8 => "u8",
            DataType::I16 => "i16",
            DataType::U16 => "u16",
            DataType::I32 => "i32",
            DataType::U32 => "u32",
            DataType::I64 => "i64",
            DataType::U64 => "u64",
            DataType::F32 => "f32",
            DataType::F64 => "f64",
        }
    }

    /// C type used for this element in CUDA kernels.
    pub const fn c_type(&self) -> &'static str {
        match self {
            DataType::I8 => "signed char",
            DataType::U8 => "unsigned char",
            DataType::I16 => "short",
            DataType::U16 => "unsigned short",
            DataType::I32 => "int",
            DataType::U32 => "unsigned int",
            DataType::I64 => "long long",
            DataType::U64 => "unsigned long long",
            DataType::F32 => "float",
            DataType::F64 => "double",
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DataType {
    type Err = ClicError;

    /// Accepts the short names and the long names used by image-processing
    /// catalogs (`"float"`, `"uint8"`, `"int32"`, ...).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "i8" | "int8" | "char" => Ok(DataType::I8),
            "u8" | "uint8" | "uchar" => Ok(DataType::U8),
            "i16" | "int16" | "short" => Ok(DataType::I16),
            "u16" | "uint16" | "ushort" => Ok(DataType::U16),
            "i32" | "int32" | "int" => Ok(DataType::I32),
            "u32" | "uint32" | "uint" => Ok(DataType::U32),
            "i64" | "int64" | "long" => Ok(DataType::I64),
            "u64" | "uint64" | "ulong" => Ok(DataType::U64),
            "f32" | "float32" | "float" => Ok(DataType::F32),
            "f64" | "float64" | "double" => Ok(DataType::F64),
            other => Err(ClicError::UnknownName { kind: "data type", value: other.to_string() }),
        }
    }
}

/// Memory representation of an [`Array`](crate::Array).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum MemoryType {
    /// Linear storage buffer.
    #[default]
    Buffer,
    /// Texture-like image storage.
    Image,
}

impl MemoryType {
    pub const fn name(&self) -> &'static str {
        match self {
            MemoryType::Buffer => "buffer",
            MemoryType::Image => "image",
        }
    }
}

impl fmt::Display for MemoryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for MemoryType {
    type Err = ClicError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "buffer" => Ok(MemoryType::Buffer),
            "image" => Ok(MemoryType::Image),
            other => Err(ClicError::UnknownName { kind: "memory type", value: other.to_string() }),
        }
    }
}

/// Host element type that maps onto a [`DataType`].
pub trait Element: bytemuck::Pod + Send + Sync + 'static {
    const DTYPE: DataType;
}

macro_rules! impl_element {
    ($($t:ty => $v:ident),* $(,)?) => {
        $(impl Element for $t {
            const DTYPE: DataType = DataType::$v;
        })*
    };
}

impl_element!(
    i8 => I8, u8 => U8, i16 => I16, u16 => U16, i32 => I32,
    u32 => U32, i64 => I64, u64 => U64, f32 => F32, f64 => F64,
);

/// A scalar kernel argument.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Scalar {
    I8(i8),
    U8(u8),
    I16(i16),
    U16(u16),
    I32(i32),
    U32(u32),
    I64(i64),
    U64(u64),
    F32(f32),
    F64(f64),
}

impl Scalar {
    pub const fn dtype(&self) -> DataType {
        match self {
            Scalar::I8(_) => DataType::I8,
            Scalar::U8(_) => DataType::U8,
            Scalar::I16(_) => DataType::I16,
            Scalar::U16(_) => DataType::U16,
            Scalar::I32(_) => DataType::I32,
            Scalar::U32(_) => DataType::U32,
            Scalar::I64(_) => DataType::I64,
            Scalar::U64(_) => DataType::U64,
            Scalar::F32(_) => DataType::F32,
            Scalar::F64(_) => DataType::F64,
        }
    }

    /// Numeric conversion with `as` semantics (floats truncate and saturate).
    pub fn cast(self, dtype: DataType) -> Scalar {
        match self {
            Scalar::F32(v) => Self::from_f64(v as f64, dtype),
            Scalar::F64(v) => Self::from_f64(v, dtype),
            other => Self::from_i128(other.as_i128(), dtype),
        }
    }

    pub fn to_f64(self) -> f64 {
        match self {
            Scalar::F32(v) => v as f64,
            Scalar::F64(v) => v,
            other => other.as_i128() as f64,
        }
    }

    /// Native-endian bytes of the value.
    pub fn to_bytes(self) -> Vec<u8> {
        match self {
            Scalar::I8(v) => v.to_ne_bytes().to_vec(),
            Scalar::U8(v) => v.to_ne_bytes().to_vec(),
            Scalar::I16(v) => v.to_ne_bytes().to_vec(),
            Scalar::U16(v) => v.to_ne_bytes().to_vec(),
            Scalar::I32(v) => v.to_ne_bytes().to_vec(),
            Scalar::U32(v) => v.to_ne_bytes().to_vec(),
            Scalar::I64(v) => v.to_ne_bytes().to_vec(),
            Scalar::U64(v) => v.to_ne_bytes().to_vec(),
            Scalar::F32(v) => v.to_ne_bytes().to_vec(),
            Scalar::F64(v) => v.to_ne_bytes().to_vec(),
        }
    }

    fn as_i128(self) -> i128 {
        match self {
            Scalar::I8(v) => v as i128,
            Scalar::U8(v) => v as i128,
            Scalar::I16(v) => v as i128,
            Scalar::U16(v) => v as i128,
            Scalar::I32(v) => v as i128,
            Scalar::U32(v) => v as i128,
            Scalar::I64(v) => v as i128,
            Scalar::U64(v) => v as i128,
            Scalar::F32(v) => v as i128,
            Scalar::F64(v) => v as i128,
        }
    }

    fn from_i128(v: i128, dtype: DataType) -> Scalar {
        match dtype {
            DataType::I8 => Scalar::I8(v as i8),
            DataType::U8 => Scalar::U8(v as u8),
            DataType::I16 => Scalar::I16(v as i16),
            DataType::U16 => Scalar::U16(v as u16),
            DataType::I32 => Scalar::I32(v as i32),
            DataType::U32 => Scalar::U32(v as u32),
            DataType::I64 => Scalar::I64(v as i64),
            DataType::U64 => Scalar::U64(v as u64),
            DataType::F32 => Scalar::F32(v as f32),
            DataType::F64 => Scalar::F64(v as f64),
        }
    }

    fn from_f64(v: f64, dtype: DataType) -> Scalar {
        match dtype {
            DataType::I8 => Scalar::I8(v as i8),
            DataType::U8 => Scalar::U8(v as u8),
            DataType::I16 => Scalar::I16(v as i16),
            DataType::U16 => Scalar::U16(v as u16),
            DataType::I32 => Scalar::I32(v as i32),
            DataType::U32 => Scalar::U32(v as u32),
            DataType::I64 => Scalar::I64(v as i64),
            DataType::U64 => Scalar::U64(v as u64),
            DataType::F32 => Scalar::F32(v as f32),
            DataType::F64 => Scalar::F64(v),
        }
    }
}

macro_rules! impl_scalar_from {
    ($($t:ty => $v:ident),* $(,)?) => {
        $(impl From<$t> for Scalar {
            fn from(value: $t) -> Self {
                Scalar::$v(value)
            }
        })*
    };
}

impl_scalar_from!(
    i8 => I8, u8 => U8, i16 => I16, u16 => U16, i32 => I32,
    u32 => U32, i64 => I64, u64 => U64, f32 => F32, f64 => F64,
);
