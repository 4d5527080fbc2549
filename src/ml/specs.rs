// ============================================================
// Layer Specifications
// ============================================================
// Hyperparameters for each builder method, expressed as burn
// Configs so they get `new(required..)` plus `with_*` setters and
// can be saved next to a checkpoint as JSON.

use burn::prelude::*;
use serde::{Deserialize, Serialize};

use super::activation::Activation;
use crate::error::LayerError;

/// TensorFlow-style padding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Padding {
    /// Output spatial size is ceil(in / stride).
    #[default]
    Same,
    /// No padding; output is (in - k) / stride + 1.
    Valid,
}

/// One convolution or transposed convolution layer.
#[derive(Config, Debug)]
pub struct ConvSpec {
    /// Square filter side. `0` means "the whole input map".
    pub filter_size:     usize,
    pub output_channels: usize,
    #[config(default = 1)]
    pub stride:          usize,
    #[config(default = "Padding::Same")]
    pub padding:         Padding,
    #[config(default = "Activation::Relu")]
    pub activation:      Activation,
    #[config(default = true)]
    pub batch_norm:      bool,
    /// Initial bias value; `None` means no bias.
    #[config(default = "Some(0.0)")]
    pub b_value:         Option<f64>,
    /// Initial scale value; `None` means no scale.
    #[config(default = "Some(1.0)")]
    pub s_value:         Option<f64>,
    #[config(default = true)]
    pub trainable:       bool,
}

/// A stack of conv (or deconv) layers described column-wise.
/// Lists left as `None` fall back to the single-layer defaults.
#[derive(Config, Debug)]
pub struct ConvNetSpec {
    pub filter_sizes:    Vec<usize>,
    pub output_channels: Vec<usize>,
    #[config(default = "None")]
    pub strides:         Option<Vec<usize>>,
    #[config(default = "None")]
    pub padding:         Option<Vec<Padding>>,
    #[config(default = "None")]
    pub activations:     Option<Vec<Activation>>,
    #[config(default = "None")]
    pub b_values:        Option<Vec<Option<f64>>>,
    #[config(default = "None")]
    pub s_values:        Option<Vec<Option<f64>>>,
    #[config(default = "None")]
    pub batch_norm:      Option<Vec<bool>>,
    #[config(default = true)]
    pub trainable:       bool,
}

impl ConvNetSpec {
    pub fn depth(&self) -> usize {
        self.filter_sizes.len()
    }

    /// Expand into one spec per layer, checking every list against
    /// the depth first.
    pub fn layer_specs(&self) -> Result<Vec<ConvSpec>, LayerError> {
        let depth = self.depth();
        check_len("output_channels", depth, Some(self.output_channels.len()))?;
        check_len("strides", depth, self.strides.as_ref().map(Vec::len))?;
        check_len("padding", depth, self.padding.as_ref().map(Vec::len))?;
        check_len("activations", depth, self.activations.as_ref().map(Vec::len))?;
        check_len("b_values", depth, self.b_values.as_ref().map(Vec::len))?;
        check_len("s_values", depth, self.s_values.as_ref().map(Vec::len))?;
        check_len("batch_norm", depth, self.batch_norm.as_ref().map(Vec::len))?;

        Ok((0..depth)
            .map(|l| {
                let mut spec = ConvSpec::new(self.filter_sizes[l], self.output_channels[l])
                    .with_trainable(self.trainable);
                if let Some(strides) = &self.strides {
                    spec = spec.with_stride(strides[l]);
                }
                if let Some(padding) = &self.padding {
                    spec = spec.with_padding(padding[l]);
                }
                if let Some(activations) = &self.activations {
                    spec = spec.with_activation(activations[l]);
                }
                if let Some(b_values) = &self.b_values {
                    spec = spec.with_b_value(b_values[l]);
                }
                if let Some(s_values) = &self.s_values {
                    spec = spec.with_s_value(s_values[l]);
                }
                if let Some(batch_norm) = &self.batch_norm {
                    spec = spec.with_batch_norm(batch_norm[l]);
                }
                spec
            })
            .collect())
    }
}

fn check_len(field: &'static str, expected: usize, found: Option<usize>) -> Result<(), LayerError> {
    match found {
        Some(found) if found != expected => Err(LayerError::DepthMismatch { field, expected, found }),
        _ => Ok(()),
    }
}

/// One fully-connected layer.
#[derive(Config, Debug)]
pub struct FcSpec {
    pub output_nodes: usize,
    /// Dropout keep probability; `1.0` disables dropout.
    #[config(default = 1.0)]
    pub keep_prob:    f64,
    #[config(default = "Activation::Relu")]
    pub activation:   Activation,
    #[config(default = true)]
    pub batch_norm:   bool,
    #[config(default = "Some(0.0)")]
    pub b_value:      Option<f64>,
    #[config(default = "Some(1.0)")]
    pub s_value:      Option<f64>,
    #[config(default = true)]
    pub trainable:    bool,
}

/// One pre-activation residual block.
#[derive(Config, Debug)]
pub struct ResSpec {
    pub output_channels: usize,
    #[config(default = 3)]
    pub filter_size:     usize,
    #[config(default = 1)]
    pub stride:          usize,
    #[config(default = "Activation::Relu")]
    pub activation:      Activation,
    /// 1×1 → k×k → 1×1 bottleneck with a 4× channel reduction.
    #[config(default = false)]
    pub bottle:          bool,
    #[config(default = true)]
    pub trainable:       bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mismatched_lists_are_rejected() {
        let spec = ConvNetSpec::new(vec![3, 3, 3], vec![8, 16]);
        let err = spec.layer_specs().unwrap_err();
        assert!(matches!(
            err,
            LayerError::DepthMismatch { field: "output_channels", expected: 3, found: 2 }
        ));

        let spec = ConvNetSpec::new(vec![3, 3], vec![8, 16]).with_strides(Some(vec![1]));
        assert!(matches!(
            spec.layer_specs(),
            Err(LayerError::DepthMismatch { field: "strides", .. })
        ));
    }

    #[test]
    fn missing_lists_use_layer_defaults() {
        let spec = ConvNetSpec::new(vec![5, 3], vec![8, 16])
            .with_strides(Some(vec![2, 1]))
            .with_batch_norm(Some(vec![false, true]));
        let layers = spec.layer_specs().unwrap();

        assert_eq!(layers.len(), 2);
        assert_eq!(layers[0].filter_size, 5);
        assert_eq!(layers[0].stride, 2);
        assert!(!layers[0].batch_norm);
        assert_eq!(layers[1].padding, Padding::Same);
        assert_eq!(layers[1].activation, Activation::Relu);
        assert_eq!(layers[1].b_value, Some(0.0));
        assert_eq!(layers[1].s_value, Some(1.0));
    }
}
