use super::consts::*;
use super::MatClass;
use crate::error::{Error, Result};
use flate2::write::ZlibEncoder;
use flate2::Compression;
use ndarray::{ArrayBase, Data, Dimension};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

/// 可以写入MAT文件的元素类型。
pub trait MatElement: Copy {
    const CLASS: MatClass;
    const MI_TYPE: u32;

    fn put_le(self, out: &mut Vec<u8>);
}

impl MatElement for f32 {
    const CLASS: MatClass = MatClass::Single;
    const MI_TYPE: u32 = MI_SINGLE;

    #[inline]
    fn put_le(self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.to_le_bytes());
    }
}

impl MatElement for f64 {
    const CLASS: MatClass = MatClass::Double;
    const MI_TYPE: u32 = MI_DOUBLE;

    #[inline]
    fn put_le(self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.to_le_bytes());
    }
}

/// Level-5 MAT文件写入器（小端）。
///
/// 默认不压缩。
pub struct MatWriter {
    compress: bool,
    /// 已编码的miMATRIX元素。
    matrices: Vec<Vec<u8>>,
}

impl MatWriter {
    #[inline]
    pub fn new() -> Self {
        Self {
            compress: false,
            matrices: Vec::new(),
        }
    }

    /// 是否对每个变量使用zlib压缩（v7格式）。
    #[inline]
    pub fn compressed(mut self, compress: bool) -> Self {
        self.compress = compress;
        self
    }

    /// 添加一个变量。零维数组写为1x1，一维数组写为1xN，其余维度保持不变。
    pub fn add<T, S, D>(&mut self, name: &str, array: &ArrayBase<S, D>) -> Result<&mut Self>
    where
        T: MatElement,
        S: Data<Elem = T>,
        D: Dimension,
    {
        check_name(name)?;
        let dims: Vec<usize> = match array.ndim() {
            0 => vec![1, 1],
            1 => vec![1, array.len()],
            _ => array.shape().to_vec(),
        };

        // 反转轴后按逻辑顺序遍历即为列优先顺序
        let mut data = Vec::with_capacity(array.len() * std::mem::size_of::<T>());
        array.t().iter().for_each(|&v| v.put_le(&mut data));

        let matrix = encode_matrix(name, T::CLASS, &dims, T::MI_TYPE, &data)?;
        self.matrices.push(matrix);
        Ok(self)
    }

    pub fn write_to<W: Write>(&self, mut w: W) -> Result<()> {
        w.write_all(&header())?;
        for m in &self.matrices {
            if self.compress {
                let mut enc = ZlibEncoder::new(Vec::new(), Compression::default());
                enc.write_all(m)?;
                let comp = enc.finish()?;
                w.write_all(&MI_COMPRESSED.to_le_bytes())?;
                w.write_all(&(len_u32(comp.len())?).to_le_bytes())?;
                w.write_all(&comp)?;
            } else {
                w.write_all(m)?;
            }
        }
        w.flush()?;
        Ok(())
    }

    /// 写入到文件（覆盖已有文件）。
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let file = File::create(path.as_ref())?;
        self.write_to(BufWriter::new(file))
    }
}

impl Default for MatWriter {
    fn default() -> Self {
        Self::new()
    }
}

fn check_name(name: &str) -> Result<()> {
    let mut chars = name.chars();
    let ok = matches!(chars.next(), Some(c) if c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        && name.len() <= 63;
    if ok {
        Ok(())
    } else {
        Err(Error::MatFormat(format!("非法的MATLAB变量名`{name}`")))
    }
}

fn len_u32(len: usize) -> Result<u32> {
    u32::try_from(len).map_err(|_| Error::MatFormat(format!("数据元素长度{len}超过4GiB")))
}

fn header() -> Vec<u8> {
    let mut h = vec![b' '; HEADER_TEXT_LEN];
    let text = b"MATLAB 5.0 MAT-file, written by patchnet";
    h[..text.len()].copy_from_slice(text);
    // 子系统偏移
    h.extend_from_slice(&[0; 8]);
    h.extend_from_slice(&0x0100_u16.to_le_bytes());
    h.extend_from_slice(b"IM");
    h
}

#[inline]
fn pad8(v: &mut Vec<u8>) {
    while v.len() % 8 != 0 {
        v.push(0);
    }
}

fn put_tag(v: &mut Vec<u8>, mi_type: u32, len: usize) -> Result<()> {
    v.extend_from_slice(&mi_type.to_le_bytes());
    v.extend_from_slice(&len_u32(len)?.to_le_bytes());
    Ok(())
}

fn encode_matrix(
    name: &str,
    class: MatClass,
    dims: &[usize],
    mi_type: u32,
    data: &[u8],
) -> Result<Vec<u8>> {
    let mut body = Vec::with_capacity(data.len() + 64);

    put_tag(&mut body, MI_UINT32, 8)?;
    body.extend_from_slice(&(class.code() as u32).to_le_bytes());
    body.extend_from_slice(&0_u32.to_le_bytes());

    put_tag(&mut body, MI_INT32, dims.len() * 4)?;
    for &d in dims {
        let d = i32::try_from(d).map_err(|_| Error::Shape(format!("维度{d}超出int32范围")))?;
        body.extend_from_slice(&d.to_le_bytes());
    }
    pad8(&mut body);

    let name = name.as_bytes();
    if name.len() <= 4 {
        body.extend_from_slice(&(((name.len() as u32) << 16) | MI_INT8).to_le_bytes());
        body.extend_from_slice(name);
    } else {
        put_tag(&mut body, MI_INT8, name.len())?;
        body.extend_from_slice(name);
    }
    pad8(&mut body);

    put_tag(&mut body, mi_type, data.len())?;
    body.extend_from_slice(data);
    pad8(&mut body);

    let mut out = Vec::with_capacity(body.len() + 8);
    put_tag(&mut out, MI_MATRIX, body.len())?;
    out.extend(body);
    Ok(out)
}
