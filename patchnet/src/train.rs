//! 分类网络的训练循环。

use crate::error::{Error, Result};
use crate::metrics::argmax_rows;
use crate::model::{Classifier, ClassifierNet};
use crate::nn::{
    batch_ranges, class_tensor, patches_tensor, scalar, seed_backend, AdadeltaConfig, Device,
    InferBackend, SeedStream, TrainBackend,
};
use crate::timer::Stopwatch;
use burn::module::AutodiffModule;
use burn::nn::loss::CrossEntropyLossConfig;
use burn::optim::{GradientsParams, Optimizer};
use burn::tensor::backend::Backend;
use burn::tensor::{ElementConversion, Int, Tensor};
use ndarray::{ArrayView2, ArrayView5, Axis, Slice};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::time::Duration;

/// 训练参数。
#[derive(Clone, Debug, PartialEq)]
pub struct FitConfig {
    pub batch_size: usize,
    pub epochs: usize,
    /// 取样本末尾这一比例作为验证集，取值范围`[0, 1)`。
    pub validation_split: f64,
    /// 验证损失连续不下降的容忍轮数，`None`表示不提前停止。
    pub patience: Option<usize>,
    pub shuffle: bool,
    /// Adadelta的学习率。
    pub learning_rate: f64,
    pub seed: u64,
}

impl Default for FitConfig {
    fn default() -> Self {
        Self {
            batch_size: 128,
            epochs: 20,
            validation_split: 0.25,
            patience: Some(3),
            shuffle: true,
            learning_rate: 1.0,
            seed: 0,
        }
    }
}

/// 监控损失的提前停止。
#[derive(Clone, Debug)]
pub struct EarlyStopping {
    patience: usize,
    best: f32,
    wait: usize,
}

impl EarlyStopping {
    #[inline]
    pub fn new(patience: usize) -> Self {
        Self {
            patience,
            best: f32::INFINITY,
            wait: 0,
        }
    }

    #[inline]
    pub fn best(&self) -> f32 {
        self.best
    }

    /// 记录本轮的损失，返回是否应当停止。
    pub fn should_stop(&mut self, current: f32) -> bool {
        if current < self.best {
            self.best = current;
            self.wait = 0;
            return false;
        }
        if self.wait >= self.patience {
            return true;
        }
        self.wait += 1;
        false
    }
}

/// 一轮训练的记录。
#[derive(Clone, Debug)]
pub struct EpochLog {
    pub epoch: usize,
    pub loss: f32,
    pub acc: f64,
    pub val_loss: Option<f32>,
    pub val_acc: Option<f64>,
    pub elapsed: Duration,
}

#[derive(Clone, Debug, Default)]
pub struct History {
    pub epochs: Vec<EpochLog>,
    pub stopped_early: bool,
    pub train_samples: usize,
    pub val_samples: usize,
}

impl History {
    #[inline]
    pub fn last(&self) -> Option<&EpochLog> {
        self.epochs.last()
    }
}

/// 训练集的样本数`floor(n * (1 - split))`，其后的样本为验证集。
pub fn split_index(n: usize, validation_split: f64) -> Result<usize> {
    if !(0.0..1.0).contains(&validation_split) {
        return Err(Error::Shape(format!(
            "验证集比例{validation_split}不在[0, 1)内"
        )));
    }
    let split_at = (n as f64 * (1.0 - validation_split)) as usize;
    if split_at == 0 {
        return Err(Error::Shape("训练样本为空".to_string()));
    }
    Ok(split_at)
}

fn count_hits<B: Backend>(logits: Tensor<B, 2>, targets: Tensor<B, 1, Int>) -> usize {
    let [n, _] = logits.dims();
    let hits = logits
        .argmax(1)
        .reshape([n])
        .equal(targets)
        .int()
        .sum()
        .into_scalar();
    hits.elem::<i64>() as usize
}

fn evaluate_net(
    net: &ClassifierNet<InferBackend>,
    device: &Device,
    x: ArrayView5<f32>,
    y: ArrayView2<f32>,
    batch_size: usize,
) -> (f32, f64) {
    let n = x.len_of(Axis(0));
    if n == 0 {
        return (0.0, 0.0);
    }
    let loss_fn = CrossEntropyLossConfig::new().init::<InferBackend>(device);
    let targets = argmax_rows(y);
    let (mut loss_sum, mut hits) = (0.0_f64, 0_usize);
    for r in batch_ranges(n, batch_size) {
        let xb = patches_tensor::<InferBackend>(x.slice_axis(Axis(0), Slice::from(r.clone())), device);
        let tb = class_tensor::<InferBackend>(&targets[r.clone()], device);
        let logits = net.forward(xb);
        hits += count_hits(logits.clone(), tb.clone());
        loss_sum += scalar(loss_fn.forward(logits, tb)) as f64 * r.len() as f64;
    }
    ((loss_sum / n as f64) as f32, hits as f64 / n as f64)
}

fn check_data(clf: &Classifier, x: &ArrayView5<f32>, y: &ArrayView2<f32>) -> Result<()> {
    let n = x.len_of(Axis(0));
    if y.nrows() != n {
        return Err(Error::Shape(format!("图像块{n}个，标签{}个", y.nrows())));
    }
    if &x.shape()[1..] != clf.input_shape() || y.ncols() != clf.classes() {
        return Err(Error::Shape(format!(
            "数据{:?}/{}类与网络{:?}/{}类不符",
            &x.shape()[1..],
            y.ncols(),
            clf.input_shape(),
            clf.classes()
        )));
    }
    Ok(())
}

/// 推理阶段的平均交叉熵与准确率。
pub fn evaluate(
    clf: &Classifier,
    x: ArrayView5<f32>,
    y: ArrayView2<f32>,
    batch_size: usize,
) -> Result<(f32, f64)> {
    check_data(clf, &x, &y)?;
    Ok(evaluate_net(&clf.net().valid(), clf.device(), x, y, batch_size))
}

/// 以Adadelta与交叉熵训练分类网络。
pub fn fit(
    clf: &mut Classifier,
    x: ArrayView5<f32>,
    y: ArrayView2<f32>,
    cfg: &FitConfig,
) -> Result<History> {
    check_data(clf, &x, &y)?;
    let n = x.len_of(Axis(0));
    let split_at = split_index(n, cfg.validation_split)?;
    // 在打乱之前划分，验证集固定为末尾的样本
    let (x_val, y_val) = (
        x.slice_axis(Axis(0), Slice::from(split_at..)),
        y.slice_axis(Axis(0), Slice::from(split_at..)),
    );
    let has_val = split_at < n;
    log::info!(
        "Train on {split_at} samples, validate on {} samples",
        n - split_at
    );

    let batch_size = cfg.batch_size.max(1);
    let device = clf.device().clone();
    seed_backend(SeedStream::Dropout.derive(cfg.seed));
    let mut rng = StdRng::seed_from_u64(SeedStream::Shuffle.derive(cfg.seed));
    let mut optim = AdadeltaConfig::new().init::<TrainBackend, ClassifierNet<TrainBackend>>();
    let loss_fn = CrossEntropyLossConfig::new().init::<TrainBackend>(&device);
    let targets = argmax_rows(y);

    let mut net = clf.net().clone();
    let mut stopper = cfg.patience.map(EarlyStopping::new);
    let mut history = History {
        train_samples: split_at,
        val_samples: n - split_at,
        ..History::default()
    };
    let mut order: Vec<usize> = (0..split_at).collect();

    for epoch in 1..=cfg.epochs {
        let watch = Stopwatch::started();
        if cfg.shuffle {
            order.shuffle(&mut rng);
        }

        let (mut loss_sum, mut hits) = (0.0_f64, 0_usize);
        for chunk in order.chunks(batch_size) {
            let xb = patches_tensor::<TrainBackend>(x.select(Axis(0), chunk).view(), &device);
            let ids: Vec<usize> = chunk.iter().map(|&i| targets[i]).collect();
            let tb = class_tensor::<TrainBackend>(&ids, &device);

            let logits = net.forward(xb);
            hits += count_hits(logits.clone(), tb.clone());
            let loss = loss_fn.forward(logits, tb);
            let batch_loss = scalar(loss.clone());
            loss_sum += batch_loss as f64 * chunk.len() as f64;

            let grads = GradientsParams::from_grads(loss.backward(), &net);
            net = optim.step(cfg.learning_rate, net, grads);
            log::debug!("batch of {}: loss {batch_loss:.4}", chunk.len());
        }
        let loss = (loss_sum / split_at as f64) as f32;
        let acc = hits as f64 / split_at as f64;

        let (val_loss, val_acc) = if has_val {
            let (l, a) = evaluate_net(&net.valid(), &device, x_val, y_val, batch_size);
            (Some(l), Some(a))
        } else {
            (None, None)
        };
        let elapsed = watch.total();
        match (val_loss, val_acc) {
            (Some(vl), Some(va)) => log::info!(
                "Epoch {epoch}/{} - {}s - loss: {loss:.4} - acc: {acc:.4} - val_loss: {vl:.4} - val_acc: {va:.4}",
                cfg.epochs,
                elapsed.as_secs()
            ),
            _ => log::info!(
                "Epoch {epoch}/{} - {}s - loss: {loss:.4} - acc: {acc:.4}",
                cfg.epochs,
                elapsed.as_secs()
            ),
        }
        history.epochs.push(EpochLog {
            epoch,
            loss,
            acc,
            val_loss,
            val_acc,
            elapsed,
        });

        if let Some(stopper) = stopper.as_mut() {
            if stopper.should_stop(val_loss.unwrap_or(loss)) {
                log::info!("Epoch {epoch}: early stopping");
                history.stopped_early = true;
                break;
            }
        }
    }
    clf.set_net(net);
    Ok(history)
}
