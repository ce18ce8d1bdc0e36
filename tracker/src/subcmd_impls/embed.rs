use super::utils::positive;
use anyhow::{bail, Context};
use clap::Args;
use patchnet::model::PREDICT_BATCH;
use patchnet::prelude::*;
use std::path::PathBuf;

/// 嵌入向量的输出变量名。
const EMBEDDING_VARIABLE: &str = "embedding";

#[derive(Args, Debug)]
pub struct Embed {
    /// 编码器（或分类网络、匹配网络）的模型目录。
    #[arg(long, short)]
    encoder: PathBuf,
    /// 输入`.mat`文件。
    #[arg(long, short)]
    input: PathBuf,
    /// 图像块变量名，形状为`(N, D, H, W)`或`(N, 1, D, H, W)`。
    #[arg(long, short, default_value = "x")]
    variable: String,
    /// 输出`.mat`文件，变量名为`embedding`。
    #[arg(long, short)]
    output: PathBuf,
    #[arg(long = "batch-size", default_value_t = PREDICT_BATCH, value_parser = positive)]
    batch_size: usize,
}

impl Embed {
    pub fn run(&mut self) -> anyhow::Result<()> {
        let matcher = load_matcher(&self.encoder)
            .with_context(|| format!("无法读取模型`{}`", self.encoder.display()))?;
        let x = load_patches(&self.input, &self.variable)
            .with_context(|| format!("无法读取`{}`", self.input.display()))?;
        if &x.shape()[1..] != matcher.input_shape() {
            bail!(
                "图像块形状{:?}与模型输入{:?}不符",
                &x.shape()[1..],
                matcher.input_shape()
            );
        }

        let watch = Stopwatch::started();
        let embedding = matcher.embed(x.view(), self.batch_size)?;
        MatWriter::new()
            .add(EMBEDDING_VARIABLE, &embedding)?
            .save(&self.output)
            .with_context(|| format!("无法写入`{}`", self.output.display()))?;
        log::info!(
            "{}个图像块 -> {}维嵌入，用时{}ms",
            embedding.nrows(),
            embedding.ncols(),
            watch.total_ms()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array4;

    #[test]
    fn test_embed_writes_features() {
        let dir = tempfile::tempdir().unwrap();
        let model = dir.path().join("enc");
        save_encoder(&model, &cnn_encoder(&[1, 15, 15, 15], 31).unwrap()).unwrap();

        let input = dir.path().join("in.mat");
        let x = Array4::from_shape_fn((2, 15, 15, 15), |(n, a, b, c)| ((n + a + b + c) % 4) as f32);
        MatWriter::new().add("x", &x).unwrap().save(&input).unwrap();

        let output = dir.path().join("out.mat");
        let mut cmd = Embed {
            encoder: model,
            input,
            variable: "x".to_string(),
            output: output.clone(),
            batch_size: 1,
        };
        cmd.run().unwrap();

        let mat = MatFile::open(&output).unwrap();
        assert_eq!(mat.require(EMBEDDING_VARIABLE).unwrap().dims, vec![2, 360]);

        cmd.variable = "missing".to_string();
        assert!(cmd.run().is_err());
    }
}
