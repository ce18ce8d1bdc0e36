use std::io;
use thiserror::Error;

/// 库内统一的错误类型。
#[derive(Debug, Error)]
pub enum Error {
    #[error("I/O错误: {0}")]
    Io(#[from] io::Error),
    /// MAT文件结构不合法（文件头、数据元素标签、截断等）。
    #[error("MAT文件格式错误: {0}")]
    MatFormat(String),
    #[error("MAT文件中缺少变量`{0}`")]
    MissingVariable(String),
    /// 变量存在，但类型无法转换为数值数组。
    #[error("变量`{name}`的类型`{class}`不受支持")]
    Unsupported { name: String, class: String },
    #[error("数组形状不符: {0}")]
    Shape(String),
    #[error(transparent)]
    NdShape(#[from] ndarray::ShapeError),
    /// 张量数据无法转换回`ndarray`。
    #[error("张量数据转换失败: {0}")]
    Tensor(String),
    #[error("权重文件读写失败: {0}")]
    Record(String),
    #[error("模型描述文件解析失败: {0}")]
    Json(#[from] json::Error),
    #[error("模型描述文件内容错误: {0}")]
    Manifest(String),
}

pub type Result<T> = std::result::Result<T, Error>;
