//! 三维图像块（patch）的匹配代价计算与有监督嵌入网络训练。

pub mod data;
pub mod error;
pub mod mat;
pub mod metrics;
pub mod model;
pub mod nn;
pub mod prelude;
pub mod timer;
pub mod train;

pub use error::{Error, Result};
