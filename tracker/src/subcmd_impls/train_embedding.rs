use super::utils::{id_list, positive, split_fraction};
use anyhow::Context;
use burn::module::Module;
use clap::Args;
use patchnet::model::PREDICT_BATCH;
use patchnet::prelude::*;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::path::PathBuf;

#[derive(Args, Debug)]
pub struct TrainEmbedding {
    /// 带标签图像块文件所在目录。
    #[arg(
        long,
        short = 'D',
        default_value = "/home/nripesh/Dropbox/research_matlab/feature_tracking/generating_train_data_forNNet/"
    )]
    src: PathBuf,
    /// 文件名前缀，完整文件名为`<stem><id>.mat`。
    #[arg(long, default_value = "leuven_labeled_patches_")]
    stem: String,
    /// 训练集编号，如`25,26,28,29`或`25-29`。
    #[arg(long = "train-ids", default_value = "25,26,28,29", value_parser = id_list)]
    train_ids: ::std::vec::Vec<u32>,
    /// 测试集编号。
    #[arg(long = "test-id", default_value_t = 27)]
    test_id: u32,
    /// 图像块变量名。
    #[arg(long = "x-var", default_value = "x")]
    x_var: String,
    /// 标签变量名。
    #[arg(long = "y-var", default_value = "y")]
    y_var: String,
    /// 整数标签的起始类别号，MATLAB导出的标签通常为1。
    #[arg(long = "first-label", default_value_t = 0)]
    first_label: usize,
    /// 从训练集中有放回抽取的样本数，0表示使用全部样本。
    #[arg(long, default_value_t = 200000)]
    samples: usize,
    #[arg(long = "batch-size", default_value_t = 128, value_parser = positive)]
    batch_size: usize,
    #[arg(long, default_value_t = 20, value_parser = positive)]
    epochs: usize,
    /// 验证集比例，取训练数据的末尾部分。
    #[arg(long = "validation-split", default_value_t = 0.25, value_parser = split_fraction)]
    validation_split: f64,
    /// 验证损失连续不下降的容忍轮数。
    #[arg(long, default_value_t = 3)]
    patience: usize,
    /// 不使用提前停止。
    #[arg(long = "no-early-stopping")]
    no_early_stopping: bool,
    /// Adadelta的学习率。
    #[arg(long = "learning-rate", default_value_t = 1.0)]
    learning_rate: f64,
    #[arg(long, default_value_t = 0)]
    seed: u64,
    /// 编码器输出目录。
    #[arg(long = "encoder-out", short, default_value = "leuven_sup_encoder")]
    encoder_out: PathBuf,
    /// 同时保存完整的分类网络。
    #[arg(long = "classifier-out")]
    classifier_out: Option<PathBuf>,
}

impl TrainEmbedding {
    pub fn run(&mut self) -> anyhow::Result<()> {
        Program::new(self).run()
    }

    fn fit_config(&self) -> FitConfig {
        FitConfig {
            batch_size: self.batch_size,
            epochs: self.epochs,
            validation_split: self.validation_split,
            patience: (!self.no_early_stopping).then_some(self.patience),
            shuffle: true,
            learning_rate: self.learning_rate,
            seed: self.seed,
        }
    }
}

struct Program<'a> {
    args: &'a TrainEmbedding,
    rng: StdRng,
}

impl<'a> Program<'a> {
    #[inline]
    pub fn new(args: &'a TrainEmbedding) -> Self {
        Self {
            args,
            rng: StdRng::seed_from_u64(SeedStream::Resample.derive(args.seed)),
        }
    }

    pub fn run(&mut self) -> anyhow::Result<()> {
        let vars = PatchVars {
            x: self.args.x_var.clone(),
            y: self.args.y_var.clone(),
            first_label: self.args.first_label,
        };
        let (train, test) = create_train_test_set(
            &self.args.src,
            &self.args.stem,
            &self.args.train_ids,
            self.args.test_id,
            &vars,
        )
        .with_context(|| format!("无法读取`{}`中的训练数据", self.args.src.display()))?;
        let train = train.resample(self.args.samples, &mut self.rng)?;
        log::info!(
            "训练样本{}个，测试样本{}个，{}类",
            train.len(),
            test.len(),
            train.classes()
        );

        let config = ClassifierConfig::new(EncoderConfig::from_shape(train.patch_shape())?, train.classes());
        let mut clf = Classifier::new(config, self.args.seed)?;
        log::info!("网络参数{}个:\n{}", clf.net().num_params(), clf.net());

        let watch = Stopwatch::started();
        let history = fit(&mut clf, train.x.view(), train.y.view(), &self.args.fit_config())?;
        log::info!(
            "训练{}轮，用时{}ms{}",
            history.epochs.len(),
            watch.total_ms(),
            if history.stopped_early { "（提前停止）" } else { "" }
        );

        self.report(&clf, &test)?;

        save_encoder(&self.args.encoder_out, &clf.encoder())
            .with_context(|| format!("无法保存编码器到`{}`", self.args.encoder_out.display()))?;
        if let Some(dir) = &self.args.classifier_out {
            clf.save(dir)
                .with_context(|| format!("无法保存分类网络到`{}`", dir.display()))?;
        }
        Ok(())
    }

    fn report(&self, clf: &Classifier, test: &LabeledPatches) -> anyhow::Result<()> {
        let probs = clf.predict(test.x.view(), PREDICT_BATCH)?;
        let y_pred = argmax_rows(probs.view());
        let y_true = argmax_rows(test.y.view());
        println!("accuracy is: {}", accuracy_score(&y_true, &y_pred)?);
        println!("confusion matrix:");
        println!("{}", ConfusionMatrix::new(&y_true, &y_pred)?);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::subcmd_impls::args::Cli;
    use clap::Parser;
    use ndarray::{Array2, Array5};

    #[derive(Parser, Debug)]
    struct Wrapper {
        #[command(flatten)]
        args: TrainEmbedding,
    }

    #[test]
    fn test_defaults() {
        let w = Wrapper::try_parse_from(["train"]).unwrap();
        let args = w.args;
        assert_eq!(args.stem, "leuven_labeled_patches_");
        assert_eq!(args.train_ids, vec![25, 26, 28, 29]);
        assert_eq!(args.test_id, 27);
        assert_eq!(args.samples, 200000);
        assert_eq!(args.encoder_out, PathBuf::from("leuven_sup_encoder"));

        let cfg = args.fit_config();
        assert_eq!(cfg.batch_size, 128);
        assert_eq!(cfg.epochs, 20);
        assert_eq!(cfg.validation_split, 0.25);
        assert_eq!(cfg.patience, Some(3));
        assert_eq!(cfg.learning_rate, 1.0);
        assert_eq!(args.first_label, 0);

        assert!(Wrapper::try_parse_from(["train", "--validation-split", "1.5"]).is_err());
        assert!(Wrapper::try_parse_from(["train", "--train-ids", "x"]).is_err());
        let w = Wrapper::try_parse_from(["train", "--no-early-stopping"]).unwrap();
        assert_eq!(w.args.fit_config().patience, None);
    }

    fn write_set(dir: &std::path::Path, id: u32, n: usize) {
        let x = Array5::from_shape_fn((n, 1, 12, 12, 12), |(i, _, a, b, _)| {
            if (i % 2 == 0) == (a < 6) {
                (b % 3) as f32
            } else {
                0.0
            }
        });
        let y = Array2::from_shape_fn((n, 2), |(i, c)| if i % 2 == c { 1.0_f32 } else { 0.0 });
        MatWriter::new()
            .add("x", &x)
            .unwrap()
            .add("y", &y)
            .unwrap()
            .save(dir.join(format!("set_{id}.mat")))
            .unwrap();
    }

    #[test]
    fn test_train_and_save_encoder() {
        let dir = tempfile::tempdir().unwrap();
        for id in 1..=3 {
            write_set(dir.path(), id, 6);
        }
        let out = dir.path().join("encoder");
        let clf_out = dir.path().join("classifier");
        let src = dir.path().to_string_lossy().to_string();
        let out_s = out.to_string_lossy().to_string();
        let clf_s = clf_out.to_string_lossy().to_string();
        let mut cli = Cli::try_parse_from([
            "tracker",
            "train-embedding",
            "--src",
            src.as_str(),
            "--stem",
            "set_",
            "--train-ids",
            "1-2",
            "--test-id",
            "3",
            "--samples",
            "0",
            "--batch-size",
            "4",
            "--epochs",
            "2",
            "--encoder-out",
            out_s.as_str(),
            "--classifier-out",
            clf_s.as_str(),
        ])
        .unwrap();
        cli.run_program().unwrap();

        let encoder = load_encoder(&out).unwrap();
        assert_eq!(encoder.input_shape(), &[1, 12, 12, 12]);
        assert_eq!(encoder.features().unwrap(), 45);
        let clf = Classifier::load(&clf_out).unwrap();
        assert_eq!(clf.classes(), 2);
    }
}
