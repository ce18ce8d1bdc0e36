//! 网络的公共部分：`burn`后端、随机数种子以及`ndarray`与张量之间的转换。
//!
//! 训练在`Autodiff<NdArray>`上进行，推理只用`NdArray`。卷积部分的数据布局为`(N, C, D, H, W)`。

mod optim;
mod pool;

pub use optim::{Adadelta, AdadeltaConfig, AdadeltaState};
pub use pool::max_pool3d;

use crate::error::{Error, Result};
use burn::nn::Initializer;
use burn::tensor::backend::Backend;
use burn::tensor::{ElementConversion, Int, Tensor, TensorData};
use burn_autodiff::Autodiff;
use burn_ndarray::{NdArray, NdArrayDevice};
use ndarray::{concatenate, Array2, ArrayView5};
use std::ops::Range;

/// 推理用的后端。
pub type InferBackend = NdArray<f32>;

/// 训练用的后端。
pub type TrainBackend = Autodiff<InferBackend>;

pub type Device = NdArrayDevice;

#[inline]
pub fn device() -> Device {
    NdArrayDevice::Cpu
}

/// 卷积核与全连接权重的初始化方式（Glorot均匀分布）。
#[inline]
pub fn glorot() -> Initializer {
    Initializer::XavierUniform { gain: 1.0 }
}

/// 由同一个`--seed`派生出的几路随机数。各路的种子互不相同。
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SeedStream {
    /// 训练样本的重采样。
    Resample,
    /// 网络参数的初始化。
    Init,
    /// 每轮训练前打乱样本顺序。
    Shuffle,
    /// 训练阶段的dropout。
    Dropout,
}

fn splitmix64(mut z: u64) -> u64 {
    z = z.wrapping_add(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

impl SeedStream {
    #[inline]
    pub fn derive(self, seed: u64) -> u64 {
        splitmix64(seed ^ splitmix64(self as u64 + 1))
    }
}

/// 设置后端的随机数种子，影响其后的参数初始化与dropout。
#[inline]
pub fn seed_backend(seed: u64) {
    InferBackend::seed(&device(), seed);
}

/// `(N, C, D, H, W)`的图像块转为张量。
pub fn patches_tensor<B: Backend>(x: ArrayView5<f32>, device: &B::Device) -> Tensor<B, 5> {
    let shape = x.shape().to_vec();
    let values: Vec<f32> = x.iter().copied().collect();
    Tensor::from_data(TensorData::new(values, shape), device)
}

/// 类别号转为交叉熵损失使用的整数张量。
pub fn class_tensor<B: Backend>(ids: &[usize], device: &B::Device) -> Tensor<B, 1, Int> {
    let values: Vec<i64> = ids.iter().map(|&c| c as i64).collect();
    Tensor::from_data(TensorData::new(values, [ids.len()]), device)
}

pub fn to_array2<B: Backend>(t: Tensor<B, 2>) -> Result<Array2<f32>> {
    let [rows, cols] = t.dims();
    let values = t
        .into_data()
        .to_vec::<f32>()
        .map_err(|e| Error::Tensor(format!("{e:?}")))?;
    Ok(Array2::from_shape_vec((rows, cols), values)?)
}

/// 单元素张量的值，用于读出损失。
#[inline]
pub fn scalar<B: Backend>(t: Tensor<B, 1>) -> f32 {
    t.into_scalar().elem::<f32>()
}

/// 按批大小划分`0..n`。
pub fn batch_ranges(n: usize, batch_size: usize) -> impl Iterator<Item = Range<usize>> {
    let step = batch_size.max(1);
    (0..n).step_by(step).map(move |start| start..(start + step).min(n))
}

/// 分批推理，每批得到`(批大小, width)`的结果，按行拼接。
pub fn predict_batched<F>(n: usize, batch_size: usize, width: usize, mut f: F) -> Result<Array2<f32>>
where
    F: FnMut(Range<usize>) -> Tensor<InferBackend, 2>,
{
    let mut parts = Vec::new();
    for range in batch_ranges(n, batch_size) {
        let part = to_array2(f(range))?;
        if part.ncols() != width {
            return Err(Error::Shape(format!(
                "每行应有{width}个值，实际为{}",
                part.ncols()
            )));
        }
        parts.push(part);
    }
    if parts.is_empty() {
        return Ok(Array2::zeros((0, width)));
    }
    let views: Vec<_> = parts.iter().map(|p| p.view()).collect();
    Ok(concatenate(ndarray::Axis(0), &views)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{arr2, Array5};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    #[test]
    fn test_patches_tensor_keeps_order() {
        let x = Array5::from_shape_fn((2, 1, 2, 2, 3), |(n, _, a, b, c)| {
            (n * 100 + a * 10 + b * 3 + c) as f32
        });
        let t = patches_tensor::<InferBackend>(x.view(), &device());
        assert_eq!(t.dims(), [2, 1, 2, 2, 3]);
        let flat = to_array2(t.reshape([2, 12])).unwrap();
        assert_eq!(flat[[1, 0]], 100.0);
        assert_eq!(flat[[1, 11]], 100.0 + 10.0 + 3.0 + 2.0);
        assert_eq!(flat.row(0).to_vec(), x.index_axis(ndarray::Axis(0), 0).iter().copied().collect::<Vec<_>>());
    }

    #[test]
    fn test_batch_ranges() {
        let ranges: Vec<_> = batch_ranges(5, 2).collect();
        assert_eq!(ranges, vec![0..2, 2..4, 4..5]);
        assert_eq!(batch_ranges(0, 4).count(), 0);
        assert_eq!(batch_ranges(3, 0).count(), 3);
    }

    #[test]
    fn test_predict_batched_concatenates() {
        let device = device();
        let out = predict_batched(5, 2, 2, |r| {
            let rows: Vec<f32> = r.flat_map(|i| [i as f32, (i * i) as f32]).collect();
            let len = rows.len() / 2;
            Tensor::from_data(TensorData::new(rows, [len, 2]), &device)
        })
        .unwrap();
        assert_eq!(
            out,
            arr2(&[[0.0, 0.0], [1.0, 1.0], [2.0, 4.0], [3.0, 9.0], [4.0, 16.0]])
        );

        let empty = predict_batched(0, 2, 7, |_| unreachable!()).unwrap();
        assert_eq!(empty.dim(), (0, 7));
    }

    #[test]
    fn test_seed_streams_differ() {
        let streams = [
            SeedStream::Resample,
            SeedStream::Init,
            SeedStream::Shuffle,
            SeedStream::Dropout,
        ];
        for seed in [0, 1, 42] {
            let seeds: Vec<u64> = streams.iter().map(|s| s.derive(seed)).collect();
            for (i, a) in seeds.iter().enumerate() {
                assert!(!seeds[i + 1..].contains(a));
                assert_ne!(*a, seed);
            }
            assert_eq!(SeedStream::Shuffle.derive(seed), SeedStream::Shuffle.derive(seed));
        }

        // 重采样与打乱顺序不再是同一个随机序列
        let mut a = StdRng::seed_from_u64(SeedStream::Resample.derive(0));
        let mut b = StdRng::seed_from_u64(SeedStream::Shuffle.derive(0));
        let xs: Vec<u32> = (0..8).map(|_| a.gen_range(0..1000)).collect();
        let ys: Vec<u32> = (0..8).map(|_| b.gen_range(0..1000)).collect();
        assert_ne!(xs, ys);
    }

    #[test]
    fn test_class_tensor_and_scalar() {
        let t = class_tensor::<InferBackend>(&[2, 0, 1], &device());
        assert_eq!(t.dims(), [3]);
        let v = t.into_data().to_vec::<i64>().unwrap();
        assert_eq!(v, vec![2, 0, 1]);

        let s = Tensor::<InferBackend, 1>::from_data(TensorData::new(vec![0.25_f32], [1]), &device());
        assert_eq!(scalar(s), 0.25);
    }
}
