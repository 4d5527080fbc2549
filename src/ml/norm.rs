use burn::prelude::*;
use serde::{Deserialize, Serialize};

/// Epsilon added to the batch variance.
pub const BN_EPSILON: f64 = 1e-3;

/// Which axes the batch moments are taken over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NormKind {
    /// Per channel: over batch and spatial axes.
    Conv,
    /// Per feature: over the batch axis only.
    Fc,
}

impl NormKind {
    fn axes(&self, rank: usize) -> Vec<usize> {
        match self {
            NormKind::Conv => (0..rank).filter(|&axis| axis != 1).collect(),
            NormKind::Fc => vec![0],
        }
    }
}

/// Training-time batch normalization: `(x - mean) / sqrt(var + eps)`
/// with biased moments of the current batch. No running statistics
/// are kept.
pub fn batch_norm<B: Backend, const D: usize>(x: Tensor<B, D>, kind: NormKind, epsilon: f64) -> Tensor<B, D> {
    let axes = kind.axes(D);
    let mean = reduce_mean(x.clone(), &axes);
    let centered = x - mean;
    let var = reduce_mean(centered.clone().powf_scalar(2.0), &axes);
    centered / var.add_scalar(epsilon).sqrt()
}

fn reduce_mean<B: Backend, const D: usize>(x: Tensor<B, D>, axes: &[usize]) -> Tensor<B, D> {
    axes.iter().fold(x, |acc, &axis| acc.mean_dim(axis))
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::{backend::NdArray, tensor::Distribution};

    type B = NdArray;

    #[test]
    fn conv_norm_centers_every_channel() {
        let device = Default::default();
        let x = Tensor::<B, 4>::random([4, 3, 5, 5], Distribution::Uniform(2.0, 9.0), &device);
        let y = batch_norm(x, NormKind::Conv, BN_EPSILON);

        let means: Vec<f32> = y
            .clone()
            .mean_dim(0)
            .mean_dim(2)
            .mean_dim(3)
            .into_data()
            .to_vec()
            .unwrap();
        assert_eq!(means.len(), 3);
        assert!(means.iter().all(|m| m.abs() < 1e-4));

        let var: f32 = y.powf_scalar(2.0).mean().into_scalar();
        assert!((var - 1.0).abs() < 0.01);
    }

    #[test]
    fn fc_norm_uses_the_batch_axis() {
        let device = Default::default();
        let x = Tensor::<B, 2>::from_floats([[1.0, 10.0], [3.0, 30.0]], &device);
        let y: Vec<f32> = batch_norm(x, NormKind::Fc, 0.0).into_data().to_vec().unwrap();
        // each column becomes [-1, 1]
        let expected = [-1.0, -1.0, 1.0, 1.0];
        for (got, want) in y.iter().zip(expected) {
            assert!((got - want).abs() < 1e-5);
        }
    }
}
