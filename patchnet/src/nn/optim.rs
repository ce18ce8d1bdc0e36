use burn::config::Config;
use burn::module::AutodiffModule;
use burn::optim::adaptor::OptimizerAdaptor;
use burn::optim::SimpleOptimizer;
use burn::record::Record;
use burn::tensor::backend::{AutodiffBackend, Backend};
use burn::tensor::Tensor;
use burn::optim::LearningRate;

/// Adadelta的超参数。学习率在每一步传入，通常为1.0。
#[derive(Config, Debug)]
pub struct AdadeltaConfig {
    /// 梯度平方与更新量平方的滑动平均系数。
    #[config(default = 0.95)]
    pub rho: f32,
    #[config(default = 1e-8)]
    pub epsilon: f32,
}

impl AdadeltaConfig {
    pub fn init<B: AutodiffBackend, M: AutodiffModule<B>>(&self) -> OptimizerAdaptor<Adadelta, M, B> {
        OptimizerAdaptor::from(Adadelta {
            rho: self.rho,
            epsilon: self.epsilon,
        })
    }
}

/// Adadelta优化器：
///
/// ```text
/// Eg  = rho * Eg + (1 - rho) * g^2
/// dx  = g * sqrt(Edx + eps) / sqrt(Eg + eps)
/// Edx = rho * Edx + (1 - rho) * dx^2
/// x   = x - lr * dx
/// ```
#[derive(Clone, Debug)]
pub struct Adadelta {
    rho: f32,
    epsilon: f32,
}

/// 每个参数张量各自的滑动平均。
#[derive(Record, Clone)]
pub struct AdadeltaState<B: Backend, const D: usize> {
    pub square_avg: Tensor<B, D>,
    pub delta_avg: Tensor<B, D>,
}

impl<B: Backend> SimpleOptimizer<B> for Adadelta {
    type State<const D: usize> = AdadeltaState<B, D>;

    fn step<const D: usize>(
        &self,
        lr: LearningRate,
        tensor: Tensor<B, D>,
        grad: Tensor<B, D>,
        state: Option<Self::State<D>>,
    ) -> (Tensor<B, D>, Option<Self::State<D>>) {
        let (square_avg, delta_avg) = match state {
            Some(s) => (s.square_avg, s.delta_avg),
            None => (grad.zeros_like(), grad.zeros_like()),
        };
        let keep = 1.0 - self.rho;

        let square_avg = square_avg
            .mul_scalar(self.rho)
            .add(grad.clone().mul(grad.clone()).mul_scalar(keep));
        let delta = grad
            .mul(delta_avg.clone().add_scalar(self.epsilon).sqrt())
            .div(square_avg.clone().add_scalar(self.epsilon).sqrt());
        let delta_avg = delta_avg
            .mul_scalar(self.rho)
            .add(delta.clone().mul(delta.clone()).mul_scalar(keep));

        let tensor = tensor.sub(delta.mul_scalar(lr));
        (
            tensor,
            Some(AdadeltaState {
                square_avg,
                delta_avg,
            }),
        )
    }

    fn to_device<const D: usize>(state: Self::State<D>, device: &B::Device) -> Self::State<D> {
        AdadeltaState {
            square_avg: state.square_avg.to_device(device),
            delta_avg: state.delta_avg.to_device(device),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nn::{device, scalar, InferBackend, TrainBackend};
    use burn::module::Module;
    use burn::nn::{Linear, LinearConfig};
    use burn::optim::{GradientsParams, Optimizer};
    use burn::tensor::TensorData;

    fn one(v: f32) -> Tensor<InferBackend, 1> {
        Tensor::from_data(TensorData::new(vec![v], [1]), &device())
    }

    #[test]
    fn test_adadelta_step_matches_formula() {
        let opt = Adadelta {
            rho: 0.95,
            epsilon: 1e-8,
        };
        let (p1, state) = SimpleOptimizer::<InferBackend>::step(&opt, 1.0, one(1.0), one(0.5), None);

        let eg = 0.05_f64 * 0.25;
        let dx = 0.5 * (1e-8_f64).sqrt() / (eg + 1e-8).sqrt();
        assert!((scalar(p1.clone()) as f64 - (1.0 - dx)).abs() < 1e-6);

        // 第二步使用上一步的滑动平均
        let edx = 0.05 * dx * dx;
        let eg2 = 0.95 * eg + 0.05 * 0.25;
        let dx2 = 0.5 * (edx + 1e-8).sqrt() / (eg2 + 1e-8).sqrt();
        let (p2, _) = SimpleOptimizer::<InferBackend>::step(&opt, 1.0, p1, one(0.5), state);
        assert!((scalar(p2) as f64 - (1.0 - dx - dx2)).abs() < 1e-5);
    }

    fn mse(
        model: &Linear<TrainBackend>,
        x: Tensor<TrainBackend, 2>,
        y: Tensor<TrainBackend, 2>,
    ) -> Tensor<TrainBackend, 1> {
        let diff = model.forward(x) - y;
        (diff.clone() * diff).mean()
    }

    #[test]
    fn test_adadelta_reduces_loss() {
        let device = device();
        let values = vec![0.0_f32, 1.0, 2.0, 3.0];
        let x = Tensor::<TrainBackend, 2>::from_data(TensorData::new(values, [4, 1]), &device);
        let y = x.clone().mul_scalar(2.0).add_scalar(1.0);
        let mut model: Linear<TrainBackend> = LinearConfig::new(1, 1).init(&device);
        let mut opt = AdadeltaConfig::new().init::<TrainBackend, Linear<TrainBackend>>();

        let first = scalar(mse(&model, x.clone(), y.clone()));
        for _ in 0..50 {
            let loss = mse(&model, x.clone(), y.clone());
            let grads = GradientsParams::from_grads(loss.backward(), &model);
            model = opt.step(1.0, model, grads);
        }
        let last = scalar(mse(&model, x, y));
        assert!(last < first, "{last} >= {first}");
        assert_eq!(model.num_params(), 2);
    }
}
