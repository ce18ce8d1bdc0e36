//! 固定拓扑的网络：三维卷积编码器、分类网络以及孪生匹配网络。

mod artifact;

pub use artifact::{load_encoder, load_matcher, save_encoder, ModelKind, MANIFEST_FILE, WEIGHTS_FILE};

use crate::error::{self, Error};
use crate::nn::{
    device, glorot, max_pool3d, patches_tensor, predict_batched, seed_backend, Device,
    InferBackend, SeedStream, TrainBackend,
};
use burn::config::Config;
use burn::module::{AutodiffModule, Module};
use burn::nn::conv::{Conv3d, Conv3dConfig};
use burn::nn::{Dropout, DropoutConfig, Linear, LinearConfig, Relu};
use burn::tensor::activation::softmax;
use burn::tensor::backend::Backend;
use burn::tensor::Tensor;
use ndarray::{Array2, ArrayView5, Axis, Slice};

/// 卷积核边长。
pub const KERNEL: usize = 3;

/// 编码器三个卷积层的卷积核个数。
pub const ENCODER_FILTERS: [usize; 3] = [5, 15, 45];

pub const POOL_SIZE: usize = 2;

pub const DROPOUT_RATE: f64 = 0.2;

/// 编码器之后的隐藏层宽度。
pub const HIDDEN_UNITS: usize = 50;

/// 推理时的默认批大小。
pub const PREDICT_BATCH: usize = 32;

/// 孪生网络欧氏距离的下界（平方意义下）。
pub const DISTANCE_EPSILON: f32 = 1e-7;

/// 无填充卷积后的边长，不足一个卷积核时为`None`。
#[inline]
fn conv_side(side: usize) -> Option<usize> {
    side.checked_sub(KERNEL - 1).filter(|&s| s > 0)
}

/// 编码器结构参数。
#[derive(Config, Debug)]
pub struct EncoderConfig {
    /// 单个图像块的形状`(C, D, H, W)`。
    pub input_shape: [usize; 4],
    #[config(default = "DROPOUT_RATE")]
    pub dropout: f64,
}

impl EncoderConfig {
    pub fn from_shape(input_shape: &[usize]) -> error::Result<Self> {
        match *input_shape {
            [c, d, h, w] => Ok(Self::new([c, d, h, w])),
            _ => Err(Error::Shape(format!(
                "编码器输入应为(C, D, H, W)，实际为{input_shape:?}"
            ))),
        }
    }

    /// 输出特征的维数。图像块不足以通过三层卷积与一次池化时报错。
    pub fn features(&self) -> error::Result<usize> {
        let [channels, d, h, w] = self.input_shape;
        let too_small = || {
            Error::Shape(format!(
                "图像块{:?}过小，无法通过编码器",
                self.input_shape
            ))
        };
        if channels == 0 {
            return Err(too_small());
        }
        let mut volume = 1;
        for side in [d, h, w] {
            let side = conv_side(side)
                .map(|s| s / POOL_SIZE)
                .and_then(conv_side)
                .and_then(conv_side)
                .ok_or_else(too_small)?;
            volume *= side;
        }
        Ok(ENCODER_FILTERS[2] * volume)
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> error::Result<EncoderNet<B>> {
        self.features()?;
        let [f1, f2, f3] = ENCODER_FILTERS;
        let conv = |channels: [usize; 2]| {
            Conv3dConfig::new(channels, [KERNEL; 3])
                .with_initializer(glorot())
                .init(device)
        };
        Ok(EncoderNet {
            conv1: conv([self.input_shape[0], f1]),
            conv2: conv([f1, f2]),
            conv3: conv([f2, f3]),
            dropout: DropoutConfig::new(self.dropout).init(),
            activation: Relu::new(),
        })
    }
}

/// 特征提取网络：
/// Conv3d(5) + ReLU → Dropout → MaxPool3d(2) → Conv3d(15) + ReLU → Conv3d(45) + ReLU → Dropout → Flatten。
#[derive(Module, Debug)]
pub struct EncoderNet<B: Backend> {
    conv1: Conv3d<B>,
    conv2: Conv3d<B>,
    conv3: Conv3d<B>,
    dropout: Dropout,
    activation: Relu,
}

impl<B: Backend> EncoderNet<B> {
    /// `(N, C, D, H, W)` -> `(N, features)`
    pub fn forward(&self, x: Tensor<B, 5>) -> Tensor<B, 2> {
        let x = self.activation.forward(self.conv1.forward(x));
        let x = max_pool3d(self.dropout.forward(x), POOL_SIZE);
        let x = self.activation.forward(self.conv2.forward(x));
        let x = self.activation.forward(self.conv3.forward(x));
        let x = self.dropout.forward(x);
        let [n, c, d, h, w] = x.dims();
        x.reshape([n, c * d * h * w])
    }
}

/// 分类网络结构参数。
#[derive(Config, Debug)]
pub struct ClassifierConfig {
    pub encoder: EncoderConfig,
    pub classes: usize,
    #[config(default = "HIDDEN_UNITS")]
    pub hidden: usize,
}

impl ClassifierConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> error::Result<ClassifierNet<B>> {
        if self.classes == 0 {
            return Err(Error::Shape("类别数不能为0".to_string()));
        }
        let features = self.encoder.features()?;
        Ok(ClassifierNet {
            encoder: self.encoder.init(device)?,
            hidden: LinearConfig::new(features, self.hidden)
                .with_initializer(glorot())
                .init(device),
            output: LinearConfig::new(self.hidden, self.classes)
                .with_initializer(glorot())
                .init(device),
            dropout: DropoutConfig::new(self.encoder.dropout).init(),
            activation: Relu::new(),
        })
    }
}

/// 编码器加分类头：Dense(50) + ReLU → Dropout → Dense(classes)。
#[derive(Module, Debug)]
pub struct ClassifierNet<B: Backend> {
    encoder: EncoderNet<B>,
    hidden: Linear<B>,
    output: Linear<B>,
    dropout: Dropout,
    activation: Relu,
}

impl<B: Backend> ClassifierNet<B> {
    /// 未经softmax的输出，形状为`(N, classes)`。
    pub fn forward(&self, x: Tensor<B, 5>) -> Tensor<B, 2> {
        let x = self.encoder.forward(x);
        let x = self.activation.forward(self.hidden.forward(x));
        self.output.forward(self.dropout.forward(x))
    }

    #[inline]
    pub fn encoder(&self) -> &EncoderNet<B> {
        &self.encoder
    }

    #[inline]
    pub fn into_encoder(self) -> EncoderNet<B> {
        self.encoder
    }
}

fn check_input(expected: &[usize], x: &ArrayView5<f32>) -> error::Result<()> {
    if &x.shape()[1..] != expected {
        return Err(Error::Shape(format!(
            "图像块形状{:?}与网络输入{expected:?}不符",
            &x.shape()[1..]
        )));
    }
    Ok(())
}

/// 推理用的编码器。
#[derive(Clone, Debug)]
pub struct Encoder {
    config: EncoderConfig,
    net: EncoderNet<InferBackend>,
    device: Device,
}

/// 按给定输入形状构造并随机初始化编码器。
pub fn cnn_encoder(input_shape: &[usize], seed: u64) -> error::Result<Encoder> {
    let config = EncoderConfig::from_shape(input_shape)?;
    seed_backend(SeedStream::Init.derive(seed));
    let device = device();
    let net = config.init::<InferBackend>(&device)?;
    Ok(Encoder::from_parts(config, net, device))
}

impl Encoder {
    pub(crate) fn from_parts(
        config: EncoderConfig,
        net: EncoderNet<InferBackend>,
        device: Device,
    ) -> Self {
        Self {
            config,
            net,
            device,
        }
    }

    #[inline]
    pub fn config(&self) -> &EncoderConfig {
        &self.config
    }

    #[inline]
    pub fn net(&self) -> &EncoderNet<InferBackend> {
        &self.net
    }

    #[inline]
    pub fn input_shape(&self) -> &[usize] {
        &self.config.input_shape
    }

    /// 嵌入向量的维数。
    pub fn features(&self) -> error::Result<usize> {
        self.config.features()
    }

    /// 嵌入向量，形状为`(N, features)`。
    pub fn embed(&self, x: ArrayView5<f32>, batch_size: usize) -> error::Result<Array2<f32>> {
        check_input(self.input_shape(), &x)?;
        predict_batched(x.len_of(Axis(0)), batch_size, self.features()?, |r| {
            let xb = x.slice_axis(Axis(0), Slice::from(r));
            self.net.forward(patches_tensor(xb, &self.device))
        })
    }
}

/// 可训练的分类网络。参数保存在自动微分后端上，推理时取其内层。
#[derive(Clone, Debug)]
pub struct Classifier {
    config: ClassifierConfig,
    net: ClassifierNet<TrainBackend>,
    device: Device,
}

impl Classifier {
    /// 新建并随机初始化。同一个`seed`得到相同的初始参数。
    pub fn new(config: ClassifierConfig, seed: u64) -> error::Result<Self> {
        seed_backend(SeedStream::Init.derive(seed));
        let device = device();
        let net = config.init::<TrainBackend>(&device)?;
        Ok(Self {
            config,
            net,
            device,
        })
    }

    pub(crate) fn from_parts(
        config: ClassifierConfig,
        net: ClassifierNet<TrainBackend>,
        device: Device,
    ) -> Self {
        Self {
            config,
            net,
            device,
        }
    }

    #[inline]
    pub fn config(&self) -> &ClassifierConfig {
        &self.config
    }

    #[inline]
    pub fn classes(&self) -> usize {
        self.config.classes
    }

    #[inline]
    pub fn input_shape(&self) -> &[usize] {
        &self.config.encoder.input_shape
    }

    #[inline]
    pub fn device(&self) -> &Device {
        &self.device
    }

    #[inline]
    pub fn net(&self) -> &ClassifierNet<TrainBackend> {
        &self.net
    }

    #[inline]
    pub(crate) fn set_net(&mut self, net: ClassifierNet<TrainBackend>) {
        self.net = net;
    }

    /// 截取编码器部分（权重为拷贝）。
    pub fn encoder(&self) -> Encoder {
        Encoder::from_parts(
            self.config.encoder.clone(),
            self.net.valid().into_encoder(),
            self.device.clone(),
        )
    }

    /// 各类别的概率，形状为`(N, classes)`。
    pub fn predict(&self, x: ArrayView5<f32>, batch_size: usize) -> error::Result<Array2<f32>> {
        check_input(self.input_shape(), &x)?;
        let net = self.net.valid();
        predict_batched(x.len_of(Axis(0)), batch_size, self.classes(), |r| {
            let xb = x.slice_axis(Axis(0), Slice::from(r));
            softmax(net.forward(patches_tensor(xb, &self.device)), 1)
        })
    }
}

/// 孪生匹配网络：两个图像块共享同一个编码器，输出两者嵌入之间的欧氏距离作为匹配代价。
#[derive(Clone, Debug)]
pub struct Matcher {
    encoder: Encoder,
}

impl Matcher {
    #[inline]
    pub fn new(encoder: Encoder) -> Self {
        Self { encoder }
    }

    #[inline]
    pub fn encoder(&self) -> &Encoder {
        &self.encoder
    }

    #[inline]
    pub fn input_shape(&self) -> &[usize] {
        self.encoder.input_shape()
    }

    #[inline]
    pub fn embed(&self, x: ArrayView5<f32>, batch_size: usize) -> error::Result<Array2<f32>> {
        self.encoder.embed(x, batch_size)
    }

    /// 每对图像块的匹配代价，形状为`(N, 1)`。
    pub fn predict(
        &self,
        left: ArrayView5<f32>,
        right: ArrayView5<f32>,
        batch_size: usize,
    ) -> error::Result<Array2<f32>> {
        if left.shape() != right.shape() {
            return Err(Error::Shape(format!(
                "两组图像块形状不同: {:?} / {:?}",
                left.shape(),
                right.shape()
            )));
        }
        check_input(self.input_shape(), &left)?;
        let (net, device) = (&self.encoder.net, &self.encoder.device);
        predict_batched(left.len_of(Axis(0)), batch_size, 1, |r| {
            let slice = Slice::from(r);
            let a = net.forward(patches_tensor(left.slice_axis(Axis(0), slice), device));
            let b = net.forward(patches_tensor(right.slice_axis(Axis(0), slice), device));
            euclidean_cost(a, b)
        })
    }
}

/// `sqrt(max(sum((a - b)^2), eps))`，逐行计算，形状为`(N, 1)`。
pub fn euclidean_cost<B: Backend>(a: Tensor<B, 2>, b: Tensor<B, 2>) -> Tensor<B, 2> {
    let diff = a - b;
    (diff.clone() * diff)
        .sum_dim(1)
        .clamp_min(DISTANCE_EPSILON)
        .sqrt()
}
