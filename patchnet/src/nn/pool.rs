use burn::tensor::backend::Backend;
use burn::tensor::Tensor;

/// 立方窗口、步长等于窗口边长的三维最大池化，不足一个窗口的边缘舍去。
///
/// 以`reshape`与`max_dim`实现，反向传播由自动微分完成。
pub fn max_pool3d<B: Backend>(x: Tensor<B, 5>, size: usize) -> Tensor<B, 5> {
    let [n, c, d, h, w] = x.dims();
    let (od, oh, ow) = (d / size, h / size, w / size);
    x.slice([0..n, 0..c, 0..od * size, 0..oh * size, 0..ow * size])
        .reshape([n, c, od, size, oh, size, ow, size])
        .max_dim(7)
        .max_dim(5)
        .max_dim(3)
        .reshape([n, c, od, oh, ow])
}
