//! MATLAB Level-5 MAT文件的读写。
//!
//! 只处理数值矩阵（含logical）；cell、struct、char等类型的变量在读取时会被保留名字和维度，
//! 但无法转换为数组。维度顺序与MATLAB一致，数据在内部从列优先顺序转换为`ndarray`的标准布局。

mod read;
mod write;

pub use read::MatFile;
pub use write::{MatElement, MatWriter};

use crate::error::{Error, Result};
use ndarray::{ArrayD, IxDyn, ShapeBuilder};
use std::fmt;

/// 数据元素类型编号。
pub mod consts {
    pub const MI_INT8: u32 = 1;
    pub const MI_UINT8: u32 = 2;
    pub const MI_INT16: u32 = 3;
    pub const MI_UINT16: u32 = 4;
    pub const MI_INT32: u32 = 5;
    pub const MI_UINT32: u32 = 6;
    pub const MI_SINGLE: u32 = 7;
    pub const MI_DOUBLE: u32 = 9;
    pub const MI_INT64: u32 = 12;
    pub const MI_UINT64: u32 = 13;
    pub const MI_MATRIX: u32 = 14;
    pub const MI_COMPRESSED: u32 = 15;
    pub const MI_UTF8: u32 = 16;

    /// 文件头长度。
    pub const HEADER_LEN: usize = 128;

    /// 文件头中描述文本的长度。
    pub const HEADER_TEXT_LEN: usize = 116;

    /// 数组标志位：复数。
    pub const FLAG_COMPLEX: u32 = 0x0800;

    /// 数组标志位：逻辑型。
    pub const FLAG_LOGICAL: u32 = 0x0200;
}

/// MATLAB数组类别（`mxCLASS`）。
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum MatClass {
    Cell,
    Struct,
    Object,
    Char,
    Sparse,
    Double,
    Single,
    Int8,
    UInt8,
    Int16,
    UInt16,
    Int32,
    UInt32,
    Int64,
    UInt64,
    Other(u8),
}

impl MatClass {
    pub fn from_code(code: u8) -> Self {
        match code {
            1 => MatClass::Cell,
            2 => MatClass::Struct,
            3 => MatClass::Object,
            4 => MatClass::Char,
            5 => MatClass::Sparse,
            6 => MatClass::Double,
            7 => MatClass::Single,
            8 => MatClass::Int8,
            9 => MatClass::UInt8,
            10 => MatClass::Int16,
            11 => MatClass::UInt16,
            12 => MatClass::Int32,
            13 => MatClass::UInt32,
            14 => MatClass::Int64,
            15 => MatClass::UInt64,
            c => MatClass::Other(c),
        }
    }

    pub fn code(self) -> u8 {
        match self {
            MatClass::Cell => 1,
            MatClass::Struct => 2,
            MatClass::Object => 3,
            MatClass::Char => 4,
            MatClass::Sparse => 5,
            MatClass::Double => 6,
            MatClass::Single => 7,
            MatClass::Int8 => 8,
            MatClass::UInt8 => 9,
            MatClass::Int16 => 10,
            MatClass::UInt16 => 11,
            MatClass::Int32 => 12,
            MatClass::UInt32 => 13,
            MatClass::Int64 => 14,
            MatClass::UInt64 => 15,
            MatClass::Other(c) => c,
        }
    }

    #[inline]
    pub fn is_integer(self) -> bool {
        matches!(
            self,
            MatClass::Int8
                | MatClass::UInt8
                | MatClass::Int16
                | MatClass::UInt16
                | MatClass::Int32
                | MatClass::UInt32
                | MatClass::Int64
                | MatClass::UInt64
        )
    }

    #[inline]
    pub fn is_numeric(self) -> bool {
        self.is_integer() || matches!(self, MatClass::Double | MatClass::Single)
    }
}

impl fmt::Display for MatClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MatClass::Cell => "cell",
            MatClass::Struct => "struct",
            MatClass::Object => "object",
            MatClass::Char => "char",
            MatClass::Sparse => "sparse",
            MatClass::Double => "double",
            MatClass::Single => "single",
            MatClass::Int8 => "int8",
            MatClass::UInt8 => "uint8",
            MatClass::Int16 => "int16",
            MatClass::UInt16 => "uint16",
            MatClass::Int32 => "int32",
            MatClass::UInt32 => "uint32",
            MatClass::Int64 => "int64",
            MatClass::UInt64 => "uint64",
            MatClass::Other(c) => return write!(f, "class#{c}"),
        };
        f.pad(s)
    }
}

/// 数组实部数据，按列优先顺序存放。
#[derive(Clone, Debug, PartialEq)]
pub enum MatData {
    Double(Vec<f64>),
    Single(Vec<f32>),
    /// 所有整数类别（含logical）。`uint64`超出`i64`范围的值会回绕。
    Integer(Vec<i64>),
    /// 非数值类别，内容未解析。
    Unsupported,
}

/// MAT文件中的一个变量。
#[derive(Clone, Debug, PartialEq)]
pub struct MatArray {
    pub name: String,
    pub class: MatClass,
    /// MATLAB顺序的维度，至少两维。
    pub dims: Vec<usize>,
    pub logical: bool,
    /// 复数数组只保留实部。
    pub complex: bool,
    pub data: MatData,
}

impl MatArray {
    /// 元素个数。
    #[inline]
    pub fn len(&self) -> usize {
        self.dims.iter().product()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    pub fn is_numeric(&self) -> bool {
        !matches!(self.data, MatData::Unsupported)
    }

    /// 转换为`f32`数组，维度顺序与MATLAB相同。
    pub fn to_f32(&self) -> Result<ArrayD<f32>> {
        let v: Vec<f32> = match &self.data {
            MatData::Double(v) => v.iter().map(|&x| x as f32).collect(),
            MatData::Single(v) => v.clone(),
            MatData::Integer(v) => v.iter().map(|&x| x as f32).collect(),
            MatData::Unsupported => return Err(self.unsupported()),
        };
        self.column_major(v)
    }

    /// 转换为`f64`数组，维度顺序与MATLAB相同。
    pub fn to_f64(&self) -> Result<ArrayD<f64>> {
        let v: Vec<f64> = match &self.data {
            MatData::Double(v) => v.clone(),
            MatData::Single(v) => v.iter().map(|&x| x as f64).collect(),
            MatData::Integer(v) => v.iter().map(|&x| x as f64).collect(),
            MatData::Unsupported => return Err(self.unsupported()),
        };
        self.column_major(v)
    }

    fn column_major<T: Clone>(&self, v: Vec<T>) -> Result<ArrayD<T>> {
        let arr = ArrayD::from_shape_vec(IxDyn(&self.dims).f(), v)?;
        Ok(arr.as_standard_layout().into_owned())
    }

    fn unsupported(&self) -> Error {
        Error::Unsupported {
            name: self.name.clone(),
            class: self.class.to_string(),
        }
    }
}
