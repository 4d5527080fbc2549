use burn::{prelude::*, tensor::activation};
use serde::{Deserialize, Serialize};

/// Non-linearity applied at the end of a layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Activation {
    #[default]
    Relu,
    Sigmoid,
    Tanh,
    /// No activation.
    Identity,
}

impl Activation {
    pub fn forward<B: Backend, const D: usize>(&self, x: Tensor<B, D>) -> Tensor<B, D> {
        match self {
            Activation::Relu => activation::relu(x),
            Activation::Sigmoid => activation::sigmoid(x),
            Activation::Tanh => activation::tanh(x),
            Activation::Identity => x,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    #[test]
    fn relu_clips_negatives() {
        let device = Default::default();
        let x = Tensor::<NdArray, 1>::from_floats([-1.0, 0.0, 2.0], &device);
        let y: Vec<f32> = Activation::Relu.forward(x).into_data().to_vec().unwrap();
        assert_eq!(y, vec![0.0, 0.0, 2.0]);
    }

    #[test]
    fn identity_passes_through() {
        let device = Default::default();
        let x = Tensor::<NdArray, 1>::from_floats([-1.5, 3.0], &device);
        let y: Vec<f32> = Activation::Identity.forward(x).into_data().to_vec().unwrap();
        assert_eq!(y, vec![-1.5, 3.0]);
    }
}
