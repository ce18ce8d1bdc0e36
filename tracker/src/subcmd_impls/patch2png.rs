use super::utils::{min_max_to_u8, positive};
use anyhow::{anyhow, bail, Context};
use clap::Args;
use image::GrayImage;
use ndarray::{ArrayD, ArrayView3, Axis, Ix5};
use patchnet::prelude::*;
use std::fs;
use std::path::PathBuf;

#[derive(Args, Debug)]
pub struct Patch2png {
    /// 输入`.mat`文件。
    #[arg(long, short)]
    input: PathBuf,
    /// 图像块变量名，形状为`(N, D, H, W)`或`(N, C, D, H, W)`。
    #[arg(long, short, default_value = "x")]
    variable: String,
    /// 输出目录。
    #[arg(long, short)]
    out: PathBuf,
    /// 最多输出的图像块个数。
    #[arg(long, short, default_value_t = 10, value_parser = positive)]
    count: usize,
    /// 使用的通道。
    #[arg(long, default_value_t = 0)]
    channel: usize,
}

impl Patch2png {
    pub fn run(&mut self) -> anyhow::Result<()> {
        let arr = MatFile::open(&self.input)
            .and_then(|mut m| m.take(&self.variable))
            .and_then(|a| a.to_f32())
            .with_context(|| format!("无法读取`{}`", self.input.display()))?;
        let patches = to_patches(arr)?;
        if self.channel >= patches.len_of(Axis(1)) {
            bail!(
                "通道{}超出范围，共{}个通道",
                self.channel,
                patches.len_of(Axis(1))
            );
        }
        fs::create_dir_all(&self.out)
            .with_context(|| format!("无法创建目录`{}`", self.out.display()))?;

        let total = self.count.min(patches.len_of(Axis(0)));
        println!("输出{total}个图像块到`{}`", self.out.display());
        for (seq, patch) in patches.outer_iter().take(total).enumerate() {
            let png = central_slice(patch.index_axis(Axis(0), self.channel))?;
            let path = self.out.join(format!("patch_{seq}.png"));
            png.save(&path)
                .with_context(|| format!("无法写入`{}`", path.display()))?;
        }
        Ok(())
    }
}

/// 四维数据补出通道维。
fn to_patches(arr: ArrayD<f32>) -> anyhow::Result<ndarray::Array5<f32>> {
    let arr = match arr.ndim() {
        4 => arr.insert_axis(Axis(1)),
        5 => arr,
        _ => bail!("图像块应为四维或五维，实际为{:?}", arr.shape()),
    };
    Ok(arr.into_dimensionality::<Ix5>()?)
}

/// `(D, H, W)`体数据沿第一维取中间切片，拉伸为8位灰度图。
fn central_slice(volume: ArrayView3<f32>) -> anyhow::Result<GrayImage> {
    let (d, h, w) = volume.dim();
    if d == 0 || h == 0 || w == 0 {
        bail!("空的图像块");
    }
    let slice = volume.index_axis(Axis(0), d / 2);
    let values: Vec<f32> = slice.iter().copied().collect();
    GrayImage::from_raw(w as u32, h as u32, min_max_to_u8(&values))
        .ok_or_else(|| anyhow!("图像尺寸{w}x{h}与数据长度不符"))
}
