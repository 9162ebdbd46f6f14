use burn::tensor::backend::Backend;
use burn::tensor::Tensor;

/// Pick the pooling window for one axis: `k` when the axis is long enough, else 1.
pub fn window_for(extent: usize, k: usize) -> usize {
    if extent >= k {
        k
    } else {
        1
    }
}

/// Non-overlapping 3D max pooling over `[batch, channels, depth, height, width]`.
///
/// Stride equals the window. Trailing elements that do not fill a window are dropped.
pub fn max_pool3d<B: Backend>(x: Tensor<B, 5>, window: [usize; 3]) -> Tensor<B, 5> {
    let [b, c, d, h, w] = x.dims();
    let [kt, kh, kw] = window;
    let (d2, h2, w2) = (d / kt, h / kh, w / kw);
    let x = x.slice([0..b, 0..c, 0..d2 * kt, 0..h2 * kh, 0..w2 * kw]);

    // Reduce one axis at a time; each reshape only splits a contiguous axis.
    // `max_dim` gradients scatter along the last axis only, so windows go last.
    let x = x.reshape([b * c * d2 * kt * h2 * kh, w2, kw]).max_dim(2);
    let x = x
        .reshape([b * c * d2 * kt, h2, kh, w2])
        .swap_dims(2, 3)
        .max_dim(3);
    let x = x
        .reshape([b * c, d2, kt, h2 * w2])
        .swap_dims(2, 3)
        .max_dim(3);
    x.reshape([b, c, d2, h2, w2])
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::Autodiff;
    use burn::tensor::TensorData;
    use burn_ndarray::NdArray;

    type B = NdArray<f32>;
    type AB = Autodiff<B>;

    #[test]
    fn window_shrinks_on_short_axes() {
        assert_eq!(window_for(16, 2), 2);
        assert_eq!(window_for(2, 2), 2);
        assert_eq!(window_for(1, 2), 1);
    }

    #[test]
    fn pool_takes_max_of_each_window() {
        let device = Default::default();
        // [1, 1, 2, 2, 2] with values 0..8; a single 2x2x2 window.
        let values: Vec<f32> = (0..8).map(|v| v as f32).collect();
        let x = Tensor::<B, 5>::from_data(TensorData::new(values, [1, 1, 2, 2, 2]), &device);
        let out = max_pool3d(x, [2, 2, 2]);
        assert_eq!(out.dims(), [1, 1, 1, 1, 1]);
        let v = out.into_data().to_vec::<f32>().unwrap();
        assert_eq!(v, vec![7.0]);
    }

    #[test]
    fn spatial_only_pool_keeps_depth() {
        let device = Default::default();
        // depth 2, 2x2 spatial: frame 0 holds 0..4, frame 1 holds 4..8.
        let values: Vec<f32> = (0..8).map(|v| v as f32).collect();
        let x = Tensor::<B, 5>::from_data(TensorData::new(values, [1, 1, 2, 2, 2]), &device);
        let out = max_pool3d(x, [1, 2, 2]);
        assert_eq!(out.dims(), [1, 1, 2, 1, 1]);
        let v = out.into_data().to_vec::<f32>().unwrap();
        assert_eq!(v, vec![3.0, 7.0]);
    }

    #[test]
    fn odd_extent_drops_remainder() {
        let device = Default::default();
        let values: Vec<f32> = (0..27).map(|v| v as f32).collect();
        let x = Tensor::<B, 5>::from_data(TensorData::new(values, [1, 1, 3, 3, 3]), &device);
        let out = max_pool3d(x, [2, 2, 2]);
        assert_eq!(out.dims(), [1, 1, 1, 1, 1]);
        // Window covers t,y,x in 0..2: max index = 1*9 + 1*3 + 1 = 13.
        let v = out.into_data().to_vec::<f32>().unwrap();
        assert_eq!(v, vec![13.0]);
    }

    #[test]
    fn gradient_flows_to_each_window_max() {
        let device = Default::default();
        // [1, 1, 2, 2, 4]: two 2x2x2 windows side by side along width.
        let values: Vec<f32> = (0..16).map(|v| v as f32).collect();
        let x = Tensor::<AB, 5>::from_data(TensorData::new(values, [1, 1, 2, 2, 4]), &device)
            .require_grad();
        let out = max_pool3d(x.clone(), [2, 2, 2]);
        assert_eq!(out.dims(), [1, 1, 1, 1, 2]);
        let grads = out.sum().backward();
        let grad = x.grad(&grads).unwrap().into_data().to_vec::<f32>().unwrap();
        // Maxima sit at t=1, y=1, x in {1, 3}: flat indices 13 and 15.
        let hot: Vec<usize> = grad
            .iter()
            .enumerate()
            .filter(|(_, g)| **g != 0.0)
            .map(|(i, _)| i)
            .collect();
        assert_eq!(hot, vec![13, 15]);
        assert!(grad.iter().filter(|g| **g != 0.0).all(|g| (*g - 1.0).abs() < 1e-6));
    }
}
