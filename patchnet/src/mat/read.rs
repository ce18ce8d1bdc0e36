use super::consts::*;
use super::{MatArray, MatClass, MatData};
use crate::error::{Error, Result};
use flate2::read::ZlibDecoder;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum Endian {
    Little,
    Big,
}

/// 一个已完整读入内存的MAT文件。
#[derive(Clone, Debug)]
pub struct MatFile {
    header: String,
    arrays: Vec<MatArray>,
}

/// 数据元素：类型编号与负载。
struct Element<'a> {
    mi_type: u32,
    data: &'a [u8],
}

macro_rules! read_all {
    ($data:expr, $endian:expr, $t:ty, $cast:expr) => {{
        const N: usize = std::mem::size_of::<$t>();
        if $data.len() % N != 0 {
            return Err(format_err(format!(
                "数据长度{}不是元素大小{}的整数倍",
                $data.len(),
                N
            )));
        }
        $data
            .chunks_exact(N)
            .map(|c| {
                let mut b = [0_u8; N];
                b.copy_from_slice(c);
                let v = match $endian {
                    Endian::Little => <$t>::from_le_bytes(b),
                    Endian::Big => <$t>::from_be_bytes(b),
                };
                $cast(v)
            })
            .collect::<Vec<_>>()
    }};
}

#[inline]
fn format_err(msg: impl Into<String>) -> Error {
    Error::MatFormat(msg.into())
}

#[inline]
fn read_u32(b: &[u8], endian: Endian) -> u32 {
    let b = [b[0], b[1], b[2], b[3]];
    match endian {
        Endian::Little => u32::from_le_bytes(b),
        Endian::Big => u32::from_be_bytes(b),
    }
}

impl MatFile {
    /// 从文件路径读取。
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path.as_ref())?;
        Self::parse(BufReader::new(file))
    }

    /// 从任意读取器读取全部内容并解析。
    pub fn parse<R: Read>(mut reader: R) -> Result<Self> {
        let mut buf = Vec::new();
        reader.read_to_end(&mut buf)?;
        Self::from_bytes(&buf)
    }

    pub fn from_bytes(buf: &[u8]) -> Result<Self> {
        if buf.len() < HEADER_LEN {
            return Err(format_err("文件长度不足128字节"));
        }
        let endian = match &buf[126..128] {
            b"IM" => Endian::Little,
            b"MI" => Endian::Big,
            _ => return Err(format_err("文件头中的字节序标记无效（可能是v7.3或v4格式）")),
        };
        let header = String::from_utf8_lossy(&buf[..HEADER_TEXT_LEN])
            .trim_end_matches(|c: char| c == ' ' || c == '\0')
            .to_string();

        let mut arrays = Vec::new();
        parse_elements(buf, HEADER_LEN, endian, &mut arrays)?;
        Ok(Self { header, arrays })
    }

    /// 文件头的描述文本。
    #[inline]
    pub fn header(&self) -> &str {
        &self.header
    }

    #[inline]
    pub fn arrays(&self) -> &[MatArray] {
        &self.arrays
    }

    /// 按变量名查找。
    pub fn get(&self, name: &str) -> Option<&MatArray> {
        self.arrays.iter().find(|a| a.name == name)
    }

    /// 按变量名查找，不存在时返回错误。
    pub fn require(&self, name: &str) -> Result<&MatArray> {
        self.get(name)
            .ok_or_else(|| Error::MissingVariable(name.to_string()))
    }

    /// 取出变量的所有权。
    pub fn take(&mut self, name: &str) -> Result<MatArray> {
        let idx = self
            .arrays
            .iter()
            .position(|a| a.name == name)
            .ok_or_else(|| Error::MissingVariable(name.to_string()))?;
        Ok(self.arrays.swap_remove(idx))
    }
}

fn parse_elements(
    buf: &[u8],
    mut pos: usize,
    endian: Endian,
    arrays: &mut Vec<MatArray>,
) -> Result<()> {
    while pos < buf.len() {
        let (el, next) = next_element(buf, pos, endian)?;
        match el.mi_type {
            MI_COMPRESSED => {
                let mut inflated = Vec::new();
                ZlibDecoder::new(el.data).read_to_end(&mut inflated)?;
                parse_elements(&inflated, 0, endian, arrays)?;
            }
            MI_MATRIX => {
                if let Some(arr) = parse_matrix(el.data, endian)? {
                    arrays.push(arr);
                }
            }
            other => log::warn!("跳过顶层数据元素(type = {other})"),
        }
        pos = next;
    }
    Ok(())
}

/// 读取`pos`处的数据元素，返回元素与下一个元素的起始位置。
fn next_element(buf: &[u8], pos: usize, endian: Endian) -> Result<(Element<'_>, usize)> {
    if pos + 8 > buf.len() {
        return Err(format_err(format!("位置{pos}处的数据元素标签被截断")));
    }
    let first = read_u32(&buf[pos..], endian);
    let small_len = (first >> 16) as usize;
    if small_len != 0 {
        // 小数据元素：标签与数据共占8字节
        if small_len > 4 {
            return Err(format_err(format!("位置{pos}处小数据元素长度{small_len}非法")));
        }
        let el = Element {
            mi_type: first & 0xFFFF,
            data: &buf[pos + 4..pos + 4 + small_len],
        };
        return Ok((el, pos + 8));
    }

    let len = read_u32(&buf[pos + 4..], endian) as usize;
    let start = pos + 8;
    let end = start
        .checked_add(len)
        .filter(|&e| e <= buf.len())
        .ok_or_else(|| format_err(format!("位置{pos}处的数据元素被截断")))?;
    let next = if first == MI_COMPRESSED {
        end
    } else {
        (end + 7) / 8 * 8
    };
    let el = Element {
        mi_type: first,
        data: &buf[start..end],
    };
    Ok((el, next.min(buf.len())))
}

fn parse_matrix(body: &[u8], endian: Endian) -> Result<Option<MatArray>> {
    if body.is_empty() {
        return Ok(None);
    }
    let (flags, pos) = next_element(body, 0, endian)?;
    if flags.mi_type != MI_UINT32 || flags.data.len() < 8 {
        return Err(format_err("数组标志子元素无效"));
    }
    let f0 = read_u32(flags.data, endian);
    let class = MatClass::from_code((f0 & 0xFF) as u8);
    let complex = f0 & FLAG_COMPLEX != 0;
    let logical = f0 & FLAG_LOGICAL != 0;

    let (dims_el, pos) = next_element(body, pos, endian)?;
    if dims_el.mi_type != MI_INT32 {
        return Err(format_err("维度子元素类型应为miINT32"));
    }
    let dims = read_all!(dims_el.data, endian, i32, |v: i32| v)
        .into_iter()
        .map(|d| usize::try_from(d).map_err(|_| format_err(format!("维度{d}为负数"))))
        .collect::<Result<Vec<usize>>>()?;

    let (name_el, pos) = next_element(body, pos, endian)?;
    let name = String::from_utf8_lossy(name_el.data).into_owned();

    if !class.is_numeric() {
        log::warn!("变量`{name}`的类型为{class}，内容不会被解析");
        return Ok(Some(MatArray {
            name,
            class,
            dims,
            logical,
            complex,
            data: MatData::Unsupported,
        }));
    }

    let (real, _) = next_element(body, pos, endian)?;
    let data = match class {
        MatClass::Double => MatData::Double(decode_float(&real, endian, |v| v)?),
        MatClass::Single => MatData::Single(decode_float(&real, endian, |v| v as f32)?),
        _ => MatData::Integer(decode_integer(&real, endian)?),
    };
    let arr = MatArray {
        name,
        class,
        dims,
        logical,
        complex,
        data,
    };
    let count = match &arr.data {
        MatData::Double(v) => v.len(),
        MatData::Single(v) => v.len(),
        MatData::Integer(v) => v.len(),
        MatData::Unsupported => 0,
    };
    if count != arr.len() {
        return Err(format_err(format!(
            "变量`{}`的元素个数{}与维度{:?}不符",
            arr.name, count, arr.dims
        )));
    }
    if complex {
        log::warn!("变量`{}`为复数数组，只保留实部", arr.name);
    }
    Ok(Some(arr))
}

/// 把任意数值元素解码为浮点数组。
fn decode_float<T>(el: &Element<'_>, endian: Endian, cast: fn(f64) -> T) -> Result<Vec<T>> {
    let data = el.data;
    let out = match el.mi_type {
        MI_INT8 => read_all!(data, endian, i8, |v: i8| cast(v as f64)),
        MI_UINT8 => read_all!(data, endian, u8, |v: u8| cast(v as f64)),
        MI_INT16 => read_all!(data, endian, i16, |v: i16| cast(v as f64)),
        MI_UINT16 => read_all!(data, endian, u16, |v: u16| cast(v as f64)),
        MI_INT32 => read_all!(data, endian, i32, |v: i32| cast(v as f64)),
        MI_UINT32 => read_all!(data, endian, u32, |v: u32| cast(v as f64)),
        MI_INT64 => read_all!(data, endian, i64, |v: i64| cast(v as f64)),
        MI_UINT64 => read_all!(data, endian, u64, |v: u64| cast(v as f64)),
        MI_SINGLE => read_all!(data, endian, f32, |v: f32| cast(v as f64)),
        MI_DOUBLE => read_all!(data, endian, f64, cast),
        other => return Err(format_err(format!("数值子元素类型{other}未知"))),
    };
    Ok(out)
}

fn decode_integer(el: &Element<'_>, endian: Endian) -> Result<Vec<i64>> {
    let data = el.data;
    let out = match el.mi_type {
        MI_INT8 => read_all!(data, endian, i8, |v: i8| v as i64),
        MI_UINT8 => read_all!(data, endian, u8, |v: u8| v as i64),
        MI_INT16 => read_all!(data, endian, i16, |v: i16| v as i64),
        MI_UINT16 => read_all!(data, endian, u16, |v: u16| v as i64),
        MI_INT32 => read_all!(data, endian, i32, |v: i32| v as i64),
        MI_UINT32 => read_all!(data, endian, u32, |v: u32| v as i64),
        MI_INT64 => read_all!(data, endian, i64, |v: i64| v),
        MI_UINT64 => read_all!(data, endian, u64, |v: u64| v as i64),
        MI_SINGLE => read_all!(data, endian, f32, |v: f32| v as i64),
        MI_DOUBLE => read_all!(data, endian, f64, |v: f64| v as i64),
        other => return Err(format_err(format!("数值子元素类型{other}未知"))),
    };
    Ok(out)
}
