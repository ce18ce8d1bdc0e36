use super::utils::positive;
use anyhow::{bail, Context};
use clap::Args;
use patchnet::model::PREDICT_BATCH;
use patchnet::prelude::*;
use std::path::PathBuf;

#[derive(Args, Debug)]
pub struct FitIntensity {
    /// 存放`nbor_int_all_<i>.mat`的目录。
    src: PathBuf,
    /// 需要处理的帧数，帧号从1开始。
    count: usize,
    /// 孪生匹配网络（或编码器）的模型目录。
    #[arg(long, short, default_value = "shape_match_model_int_patch")]
    model: PathBuf,
    /// 推理时的批大小。
    #[arg(long = "batch-size", default_value_t = PREDICT_BATCH, value_parser = positive)]
    batch_size: usize,
    /// 以zlib压缩输出文件。
    #[arg(long)]
    compress: bool,
}

impl FitIntensity {
    pub fn run(&mut self) -> anyhow::Result<()> {
        // 只有第一帧存在时才读取模型
        let first = intensity_file_name(1);
        if !self.src.join(&first).is_file() {
            println!("{first} not found");
            return Ok(());
        }
        let matcher = load_matcher(&self.model)
            .with_context(|| format!("无法读取模型`{}`", self.model.display()))?;
        println!("processing total of: {} files.", self.count);
        Program::new(self, matcher).run()
    }
}

struct Program<'a> {
    args: &'a FitIntensity,
    matcher: Matcher,
    seq: usize,
}

impl<'a> Program<'a> {
    #[inline]
    pub fn new(args: &'a FitIntensity, matcher: Matcher) -> Self {
        Self {
            args,
            matcher,
            seq: 1,
        }
    }

    pub fn run(&mut self) -> anyhow::Result<()> {
        while self.seq <= self.args.count {
            self.run_seq()?;
            println!("match cost generated for frame: {}", self.seq);
            self.seq += 1;
        }
        Ok(())
    }

    fn run_seq(&mut self) -> anyhow::Result<()> {
        let watch = Stopwatch::started();
        let input = self.args.src.join(intensity_file_name(self.seq));
        let (left, right) = load_pair_frame(&input, INTENSITY_VARIABLE)
            .with_context(|| format!("无法读取`{}`", input.display()))?;
        if &left.shape()[1..] != self.matcher.input_shape() {
            bail!(
                "`{}`中的图像块形状{:?}与模型输入{:?}不符",
                input.display(),
                &left.shape()[1..],
                self.matcher.input_shape()
            );
        }

        let cost = self.matcher.predict(left.view(), right.view(), self.args.batch_size)?;
        let output = self.args.src.join(cost_file_name(self.seq));
        MatWriter::new()
            .compressed(self.args.compress)
            .add(COST_VARIABLE, &cost)?
            .save(&output)
            .with_context(|| format!("无法写入`{}`", output.display()))?;
        log::info!(
            "第{}帧：{}对邻域，用时{}ms",
            self.seq,
            cost.nrows(),
            watch.total_ms()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array5;

    fn args(src: PathBuf, count: usize, model: PathBuf) -> FitIntensity {
        FitIntensity {
            src,
            count,
            model,
            batch_size: 4,
            compress: false,
        }
    }

    #[test]
    fn test_missing_first_frame_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut cmd = args(dir.path().to_path_buf(), 3, dir.path().join("no_model"));
        assert!(cmd.run().is_ok());
        assert!(!dir.path().join(cost_file_name(1)).exists());
    }

    #[test]
    fn test_cost_files_generated() {
        let dir = tempfile::tempdir().unwrap();
        let model_dir = dir.path().join("model");
        let encoder = cnn_encoder(&[1, 12, 12, 12], 21).unwrap();
        save_encoder(&model_dir, &encoder).unwrap();

        for i in 1..=2 {
            let pairs = Array5::from_shape_fn((3, 2, 12, 12, 12), |(n, p, a, b, c)| {
                ((n + p * i + a * b + c) % 9) as f32 / 9.0
            });
            MatWriter::new()
                .add(INTENSITY_VARIABLE, &pairs)
                .unwrap()
                .save(dir.path().join(intensity_file_name(i)))
                .unwrap();
        }

        let mut cmd = args(dir.path().to_path_buf(), 2, model_dir);
        cmd.run().unwrap();
        for i in 1..=2 {
            let mat = MatFile::open(dir.path().join(cost_file_name(i))).unwrap();
            let cost = mat.require(COST_VARIABLE).unwrap();
            assert_eq!(cost.dims, vec![3, 1]);
            assert!(cost.to_f32().unwrap().iter().all(|v| v.is_finite() && *v > 0.0));
        }

        // 缺少后续帧时报错
        let mut cmd = args(dir.path().to_path_buf(), 3, dir.path().join("model"));
        assert!(cmd.run().is_err());
    }
}
