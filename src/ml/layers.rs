// ============================================================
// Layer Builder
// ============================================================
// A stateful builder that appends one operation at a time to a
// running tensor:
//
//   let mut net = Layers::new(images, &mut vars);
//   net.conv2d(&ConvSpec::new(3, 16))?
//      .maxpool(2, None, false)?
//      .fc(&FcSpec::new(10))?;
//   let logits = net.get_output().into_flat();
//
// Each call takes a kind-scoped name (conv_1, conv_2, fc_1, ...)
// and keeps its variables under that scope in the VarStore. Two
// builds with the same call sequence use the same variables.
//
// Layout is NCHW. Padding follows TensorFlow: SAME may pad more on
// the bottom/right than on the top/left, which burn's symmetric
// padding cannot express, so the input is padded by hand first.

use std::collections::BTreeMap;

use burn::{
    nn::DropoutConfig,
    prelude::*,
    tensor::{
        activation::sigmoid,
        module::{avg_pool2d, conv2d, conv_transpose2d, max_pool2d},
        ops::{ConvOptions, ConvTransposeOptions},
    },
};

use super::{
    norm::{batch_norm, NormKind, BN_EPSILON},
    specs::{ConvNetSpec, ConvSpec, FcSpec, Padding, ResSpec},
    var_store::{Collection, Init, VarStore},
};
use crate::error::LayerError;

/// The builder's current tensor.
#[derive(Debug, Clone)]
pub enum Features<B: Backend> {
    /// `[batch, channels, height, width]`
    Map(Tensor<B, 4>),
    /// `[batch, features]`
    Flat(Tensor<B, 2>),
}

impl<B: Backend> Features<B> {
    pub fn dims(&self) -> Vec<usize> {
        match self {
            Features::Map(x) => x.dims().to_vec(),
            Features::Flat(x) => x.dims().to_vec(),
        }
    }

    /// The 2-D view; feature maps are flattened per example.
    pub fn into_flat(self) -> Tensor<B, 2> {
        match self {
            Features::Map(x) => flatten_map(x),
            Features::Flat(x) => x,
        }
    }
}

impl<B: Backend> From<Tensor<B, 4>> for Features<B> {
    fn from(x: Tensor<B, 4>) -> Self {
        Features::Map(x)
    }
}

impl<B: Backend> From<Tensor<B, 2>> for Features<B> {
    fn from(x: Tensor<B, 2>) -> Self {
        Features::Flat(x)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LayerKind {
    Conv,
    Deconv,
    Flat,
    Fc,
    MaxPool,
    AvgPool,
    Resnet,
    NoisyAnd,
}

impl LayerKind {
    pub fn prefix(&self) -> &'static str {
        match self {
            LayerKind::Conv => "conv",
            LayerKind::Deconv => "deconv",
            LayerKind::Flat => "flat",
            LayerKind::Fc => "fc",
            LayerKind::MaxPool => "maxpool",
            LayerKind::AvgPool => "avgpool",
            LayerKind::Resnet => "resnet",
            LayerKind::NoisyAnd => "noisy_and",
        }
    }
}

/// How a residual block carries its input to the sum.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResidualShortcut {
    /// The unmodified input.
    Identity,
    /// A strided 1×1 convolution with bias.
    Projection,
}

impl ResidualShortcut {
    pub fn for_block(input_channels: usize, output_channels: usize, stride: usize) -> Self {
        if stride == 1 && input_channels == output_channels {
            ResidualShortcut::Identity
        } else {
            ResidualShortcut::Projection
        }
    }
}

pub struct Layers<'a, B: Backend> {
    input:  Features<B>,
    counts: BTreeMap<LayerKind, usize>,
    shapes: Vec<(String, Vec<usize>)>,
    vars:   &'a mut VarStore<B>,
}

impl<'a, B: Backend> Layers<'a, B> {
    pub fn new(input: impl Into<Features<B>>, vars: &'a mut VarStore<B>) -> Self {
        Self {
            input: input.into(),
            counts: BTreeMap::new(),
            shapes: Vec::new(),
            vars,
        }
    }

    // ── Convolution ──────────────────────────────────────────

    /// 2-D convolution, then optional batch norm, bias, scale and
    /// activation. `filter_size == 0` convolves the whole map with
    /// VALID padding, leaving a 1×1 output.
    pub fn conv2d(&mut self, spec: &ConvSpec) -> Result<&mut Self, LayerError> {
        let scope = self.next_scope(LayerKind::Conv);
        let x = self.feature_map(&scope)?;
        let [_, in_ch, height, width] = x.dims();

        let (kernel, padding) = if spec.filter_size == 0 {
            ([height, width], Padding::Valid)
        } else {
            ([spec.filter_size, spec.filter_size], spec.padding)
        };
        let weights = self.vars.get_or_init(
            &format!("{scope}/weights"),
            [spec.output_channels, in_ch, kernel[0], kernel[1]],
            spec.trainable,
            Collection::Weights,
            Init::HeNormal { fan_in: in_ch * kernel[0] * kernel[1] },
        )?;
        let x = conv_padded(x, weights, spec.stride, padding);
        let x = self.post_process(&scope, x, spec)?;
        Ok(self.emit(scope, Features::Map(x)))
    }

    /// Transposed convolution. SAME gives `in * stride` outputs,
    /// VALID gives `(in - 1) * stride + k`.
    pub fn deconv2d(&mut self, spec: &ConvSpec) -> Result<&mut Self, LayerError> {
        let scope = self.next_scope(LayerKind::Deconv);
        let x = self.feature_map(&scope)?;
        let [_, in_ch, _, _] = x.dims();
        let k = spec.filter_size;
        if k == 0 {
            return Err(LayerError::InvalidSpec {
                scope,
                reason: "deconv2d needs a filter size of at least 1".into(),
            });
        }

        let weights = self.vars.get_or_init(
            &format!("{scope}/weights"),
            [in_ch, spec.output_channels, k, k],
            spec.trainable,
            Collection::Weights,
            Init::HeNormal { fan_in: spec.output_channels * k * k },
        )?;
        let x = deconv_padded(x, weights, spec.stride, spec.padding);
        let x = self.post_process(&scope, x, spec)?;
        Ok(self.emit(scope, Features::Map(x)))
    }

    /// Stack conv2d layers described column-wise. Every list is
    /// checked against the depth before anything is built.
    pub fn convnet(&mut self, spec: &ConvNetSpec) -> Result<&mut Self, LayerError> {
        for layer in spec.layer_specs()? {
            self.conv2d(&layer)?;
        }
        Ok(self)
    }

    /// Stack deconv2d layers; same rules as `convnet`.
    pub fn deconvnet(&mut self, spec: &ConvNetSpec) -> Result<&mut Self, LayerError> {
        for layer in spec.layer_specs()? {
            self.deconv2d(&layer)?;
        }
        Ok(self)
    }

    /// BN → bias → scale → activation, shared by conv and deconv.
    fn post_process(&mut self, scope: &str, x: Tensor<B, 4>, spec: &ConvSpec) -> Result<Tensor<B, 4>, LayerError> {
        let channels = spec.output_channels;
        let mut x = x;
        if spec.batch_norm {
            x = batch_norm(x, NormKind::Conv, BN_EPSILON);
        }
        if let Some(value) = spec.b_value {
            let b = self.channel_var(&format!("{scope}/bias"), channels, value, spec.trainable)?;
            x = x + b.reshape([1, channels, 1, 1]);
        }
        if let Some(value) = spec.s_value {
            let s = self.channel_var(&format!("{scope}/scale"), channels, value, spec.trainable)?;
            x = x * s.reshape([1, channels, 1, 1]);
        }
        Ok(spec.activation.forward(x))
    }

    // ── Fully connected ──────────────────────────────────────

    /// Reshape a feature map to `[batch, c·h·w]`, with optional dropout.
    pub fn flatten(&mut self, keep_prob: f64) -> Result<&mut Self, LayerError> {
        let scope = self.next_scope(LayerKind::Flat);
        let x = dropout(self.input.clone().into_flat(), keep_prob);
        Ok(self.emit(scope, Features::Flat(x)))
    }

    /// Dense layer; flattens a feature map input first.
    pub fn fc(&mut self, spec: &FcSpec) -> Result<&mut Self, LayerError> {
        let scope = self.next_scope(LayerKind::Fc);
        let x = self.input.clone().into_flat();
        let [_, in_nodes] = x.dims();
        let out = spec.output_nodes;

        let weights: Tensor<B, 2> = self.vars.get_or_init(
            &format!("{scope}/weights"),
            [in_nodes, out],
            spec.trainable,
            Collection::Weights,
            Init::HeNormal { fan_in: in_nodes },
        )?;
        let mut x = x.matmul(weights);
        if spec.batch_norm {
            x = batch_norm(x, NormKind::Fc, BN_EPSILON);
        }
        if let Some(value) = spec.b_value {
            let b = self.channel_var(&format!("{scope}/bias"), out, value, spec.trainable)?;
            x = x + b.reshape([1, out]);
        }
        if let Some(value) = spec.s_value {
            let s = self.channel_var(&format!("{scope}/scale"), out, value, spec.trainable)?;
            x = x * s.reshape([1, out]);
        }
        let x = dropout(spec.activation.forward(x), spec.keep_prob);
        Ok(self.emit(scope, Features::Flat(x)))
    }

    // ── Pooling ──────────────────────────────────────────────

    /// Max over k×k windows (stride defaults to k, SAME padding), or
    /// over each whole map when `global`.
    pub fn maxpool(&mut self, k: usize, s: Option<usize>, global: bool) -> Result<&mut Self, LayerError> {
        let scope = self.next_scope(LayerKind::MaxPool);
        let x = self.feature_map(&scope)?;
        let window = PoolWindow::new(&x, k, s, global);
        let x = window.max(x);
        Ok(self.emit(scope, Features::Map(x)))
    }

    /// Average over k×k windows; padded positions are not counted.
    pub fn avgpool(&mut self, k: usize, s: Option<usize>, global: bool) -> Result<&mut Self, LayerError> {
        let scope = self.next_scope(LayerKind::AvgPool);
        let x = self.feature_map(&scope)?;
        let window = PoolWindow::new(&x, k, s, global);
        let x = window.avg(x);
        Ok(self.emit(scope, Features::Map(x)))
    }

    // ── Residual block ───────────────────────────────────────

    /// Pre-activation residual block: main path of BN → act → conv
    /// steps, summed with the (possibly projected) input.
    pub fn res_layer(&mut self, spec: &ResSpec) -> Result<&mut Self, LayerError> {
        let scope = self.next_scope(LayerKind::Resnet);
        let x = self.feature_map(&scope)?;
        let [_, in_ch, _, _] = x.dims();
        let out = spec.output_channels;
        if spec.bottle && out < 4 {
            return Err(LayerError::InvalidSpec {
                scope,
                reason: format!("bottleneck needs at least 4 output channels, got {out}"),
            });
        }

        let shortcut = match ResidualShortcut::for_block(in_ch, out, spec.stride) {
            ResidualShortcut::Identity => x.clone(),
            ResidualShortcut::Projection => {
                let step = ConvStep { name: format!("{scope}/conv0"), out, k: 1, stride: spec.stride };
                self.plain_conv(x.clone(), &step, spec.trainable)?
            }
        };

        let inner = if spec.bottle { out / 4 } else { out };
        let first_k = if spec.bottle { 1 } else { spec.filter_size };
        let mut steps = vec![
            ConvStep { name: format!("{scope}/conv1"), out: inner, k: first_k, stride: spec.stride },
            ConvStep { name: format!("{scope}/conv2"), out: inner, k: spec.filter_size, stride: 1 },
        ];
        if spec.bottle {
            steps.push(ConvStep { name: format!("{scope}/conv3"), out, k: 1, stride: 1 });
        }

        let mut main = x;
        for step in &steps {
            main = batch_norm(main, NormKind::Conv, BN_EPSILON);
            main = spec.activation.forward(main);
            main = self.plain_conv(main, step, spec.trainable)?;
        }
        Ok(self.emit(scope, Features::Map(main + shortcut)))
    }

    /// SAME conv plus a zero-initialized bias.
    fn plain_conv(&mut self, x: Tensor<B, 4>, step: &ConvStep, trainable: bool) -> Result<Tensor<B, 4>, LayerError> {
        let [_, in_ch, _, _] = x.dims();
        let weights = self.vars.get_or_init(
            &format!("{}/weights", step.name),
            [step.out, in_ch, step.k, step.k],
            trainable,
            Collection::Weights,
            Init::HeNormal { fan_in: in_ch * step.k * step.k },
        )?;
        let x = conv_padded(x, weights, step.stride, Padding::Same);
        let b = self.channel_var(&format!("{}/bias", step.name), step.out, 0.0, trainable)?;
        Ok(x + b.reshape([1, step.out, 1, 1]))
    }

    // ── Noisy-AND ────────────────────────────────────────────

    /// Multiple-instance pooling: one probability per class from the
    /// spatial mean of its channel, with learned slope `a` and
    /// per-class threshold `b`.
    pub fn noisy_and(&mut self, num_classes: usize, trainable: bool) -> Result<&mut Self, LayerError> {
        let scope = self.next_scope(LayerKind::NoisyAnd);
        let x = self.feature_map(&scope)?;
        let [batch, channels, _, _] = x.dims();
        if channels != num_classes {
            return Err(LayerError::ChannelMismatch { scope, expected: num_classes, found: channels });
        }

        let a: Tensor<B, 2> = self
            .vars
            .get_or_init(&format!("{scope}/a"), [1, 1], trainable, Collection::Constant, Init::Constant(1.0))?;
        let b: Tensor<B, 2> = self.vars.get_or_init(
            &format!("{scope}/b"),
            [1, num_classes],
            trainable,
            Collection::Constant,
            Init::Constant(0.0),
        )?;

        let mean = x.mean_dim(2).mean_dim(3).reshape([batch, channels]);
        let floor = sigmoid(a.clone().neg() * b.clone());
        let top = sigmoid(a.clone() * (mean - b.clone())) - floor.clone();
        let bottom = sigmoid(a * b.neg().add_scalar(1.0)) - floor;
        Ok(self.emit(scope, Features::Flat(top / bottom)))
    }

    // ── Misc ─────────────────────────────────────────────────

    /// Normalize the current tensor in place with batch moments.
    pub fn batch_norm(&mut self, epsilon: f64) -> &mut Self {
        self.input = match self.input.clone() {
            Features::Map(x) => Features::Map(batch_norm(x, NormKind::Conv, epsilon)),
            Features::Flat(x) => Features::Flat(batch_norm(x, NormKind::Fc, epsilon)),
        };
        self
    }

    pub fn get_output(&self) -> Features<B> {
        self.input.clone()
    }

    /// `(scope, output shape)` for every layer built so far.
    pub fn layer_shapes(&self) -> &[(String, Vec<usize>)] {
        &self.shapes
    }

    pub fn count(&self, kind: LayerKind) -> usize {
        self.counts.get(&kind).copied().unwrap_or(0)
    }

    fn next_scope(&mut self, kind: LayerKind) -> String {
        let n = self.counts.entry(kind).or_insert(0);
        *n += 1;
        format!("{}_{}", kind.prefix(), n)
    }

    fn feature_map(&self, scope: &str) -> Result<Tensor<B, 4>, LayerError> {
        match &self.input {
            Features::Map(x) => Ok(x.clone()),
            Features::Flat(_) => Err(LayerError::ExpectedFeatureMap { scope: scope.to_string() }),
        }
    }

    fn channel_var(&mut self, name: &str, size: usize, value: f64, trainable: bool) -> Result<Tensor<B, 1>, LayerError> {
        self.vars
            .get_or_init(name, [size], trainable, Collection::Constant, Init::Constant(value))
    }

    fn emit(&mut self, scope: String, output: Features<B>) -> &mut Self {
        let dims = output.dims();
        tracing::debug!("{} output: {:?}", scope, dims);
        self.shapes.push((scope, dims));
        self.input = output;
        self
    }
}

struct ConvStep {
    name:   String,
    out:    usize,
    k:      usize,
    stride: usize,
}

/// TensorFlow SAME padding along one axis: `(before, after)`.
pub fn same_padding(input: usize, kernel: usize, stride: usize) -> (usize, usize) {
    let stride = stride.max(1);
    let out = input.div_ceil(stride);
    let total = ((out.max(1) - 1) * stride + kernel).saturating_sub(input);
    (total / 2, total - total / 2)
}

fn conv_padded<B: Backend>(x: Tensor<B, 4>, weights: Tensor<B, 4>, stride: usize, padding: Padding) -> Tensor<B, 4> {
    let stride = stride.max(1);
    let [_, _, kh, kw] = weights.dims();
    let [_, _, height, width] = x.dims();

    let (x, pad) = match padding {
        Padding::Valid => (x, [0, 0]),
        Padding::Same => {
            let (top, bottom) = same_padding(height, kh, stride);
            let (left, right) = same_padding(width, kw, stride);
            if top == bottom && left == right {
                (x, [top, left])
            } else {
                (x.pad((left, right, top, bottom), 0.0), [0, 0])
            }
        }
    };
    conv2d(x, weights, None, ConvOptions::new([stride, stride], pad, [1, 1], 1))
}

fn deconv_padded<B: Backend>(x: Tensor<B, 4>, weights: Tensor<B, 4>, stride: usize, padding: Padding) -> Tensor<B, 4> {
    let stride = stride.max(1);
    let [_, _, k, _] = weights.dims();
    let [_, _, height, width] = x.dims();

    let full = conv_transpose2d(
        x,
        weights,
        None,
        ConvTransposeOptions::new([stride, stride], [0, 0], [0, 0], [1, 1], 1),
    );
    if padding == Padding::Valid {
        return full;
    }

    let [n, c, full_h, full_w] = full.dims();
    let (out_h, out_w) = (height * stride, width * stride);
    if k >= stride {
        let offset = (k - stride) / 2;
        full.slice([0..n, 0..c, offset..offset + out_h, offset..offset + out_w])
    } else {
        full.pad((0, out_w - full_w, 0, out_h - full_h), 0.0)
    }
}

/// Window geometry for the pooling layers.
struct PoolWindow {
    kernel:  [usize; 2],
    stride:  [usize; 2],
    padding: Padding,
}

impl PoolWindow {
    fn new<B: Backend>(x: &Tensor<B, 4>, k: usize, s: Option<usize>, global: bool) -> Self {
        let [_, _, height, width] = x.dims();
        if global {
            return Self { kernel: [height, width], stride: [1, 1], padding: Padding::Valid };
        }
        let k = k.max(1);
        let s = s.unwrap_or(k).max(1);
        Self { kernel: [k, k], stride: [s, s], padding: Padding::Same }
    }

    /// `(left, right, top, bottom)` for SAME, zeros for VALID.
    fn pads(&self, height: usize, width: usize) -> (usize, usize, usize, usize) {
        match self.padding {
            Padding::Valid => (0, 0, 0, 0),
            Padding::Same => {
                let (top, bottom) = same_padding(height, self.kernel[0], self.stride[0]);
                let (left, right) = same_padding(width, self.kernel[1], self.stride[1]);
                (left, right, top, bottom)
            }
        }
    }

    fn max<B: Backend>(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let [_, _, height, width] = x.dims();
        let x = x.pad(self.pads(height, width), f32::NEG_INFINITY);
        max_pool2d(x, self.kernel, self.stride, [0, 0], [1, 1])
    }

    /// Sum pooling over zero padding, divided by how many real
    /// positions each window covers.
    fn avg<B: Backend>(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let [_, _, height, width] = x.dims();
        let pads = self.pads(height, width);
        let ones = Tensor::<B, 4>::ones([1, 1, height, width], &x.device());

        let sums = avg_pool2d(x.pad(pads, 0.0), self.kernel, self.stride, [0, 0], true);
        let counts = avg_pool2d(ones.pad(pads, 0.0), self.kernel, self.stride, [0, 0], true);
        sums / counts
    }
}

fn flatten_map<B: Backend>(x: Tensor<B, 4>) -> Tensor<B, 2> {
    let [batch, channels, height, width] = x.dims();
    x.reshape([batch, channels * height * width])
}

fn dropout<B: Backend, const D: usize>(x: Tensor<B, D>, keep_prob: f64) -> Tensor<B, D> {
    if keep_prob >= 1.0 {
        return x;
    }
    DropoutConfig::new(1.0 - keep_prob).init().forward(x)
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::{backend::NdArray, tensor::Distribution};

    type B = NdArray;

    fn input(shape: [usize; 4]) -> Tensor<B, 4> {
        Tensor::random(shape, Distribution::Uniform(-1.0, 1.0), &Default::default())
    }

    #[test]
    fn same_padding_matches_tensorflow() {
        assert_eq!(same_padding(7, 3, 2), (1, 1));
        assert_eq!(same_padding(8, 3, 2), (0, 1));
        assert_eq!(same_padding(5, 2, 2), (0, 1));
        assert_eq!(same_padding(4, 1, 1), (0, 0));
    }

    #[test]
    fn conv_output_shapes() {
        let mut vars = VarStore::<B>::new(&Default::default());
        let mut net = Layers::new(input([2, 3, 7, 7]), &mut vars);

        net.conv2d(&ConvSpec::new(3, 4).with_stride(2)).unwrap();
        assert_eq!(net.get_output().dims(), vec![2, 4, 4, 4]);

        net.conv2d(&ConvSpec::new(3, 5).with_padding(Padding::Valid)).unwrap();
        assert_eq!(net.get_output().dims(), vec![2, 5, 2, 2]);

        net.conv2d(&ConvSpec::new(0, 6)).unwrap();
        assert_eq!(net.get_output().dims(), vec![2, 6, 1, 1]);

        assert_eq!(vars.info("conv_1/weights").unwrap().shape, vec![4, 3, 3, 3]);
        assert_eq!(vars.info("conv_3/weights").unwrap().shape, vec![6, 5, 2, 2]);
    }

    #[test]
    fn deconv_output_shapes() {
        let mut vars = VarStore::<B>::new(&Default::default());
        let mut net = Layers::new(input([1, 4, 4, 4]), &mut vars);

        net.deconv2d(&ConvSpec::new(3, 2).with_stride(2)).unwrap();
        assert_eq!(net.get_output().dims(), vec![1, 2, 8, 8]);

        net.deconv2d(&ConvSpec::new(3, 2).with_stride(2).with_padding(Padding::Valid)).unwrap();
        assert_eq!(net.get_output().dims(), vec![1, 2, 17, 17]);

        let mut vars = VarStore::<B>::new(&Default::default());
        let mut net = Layers::new(input([1, 1, 3, 3]), &mut vars);
        net.deconv2d(&ConvSpec::new(1, 1).with_stride(2)).unwrap();
        assert_eq!(net.get_output().dims(), vec![1, 1, 6, 6]);
    }

    #[test]
    fn convnet_checks_lengths_before_building() {
        let mut vars = VarStore::<B>::new(&Default::default());
        let mut net = Layers::new(input([1, 1, 8, 8]), &mut vars);

        let spec = ConvNetSpec::new(vec![3, 3, 3], vec![4, 4]);
        let err = net.convnet(&spec).err().unwrap();
        assert!(matches!(err, LayerError::DepthMismatch { expected: 3, found: 2, .. }));
        assert_eq!(net.count(LayerKind::Conv), 0);
        assert!(net.layer_shapes().is_empty());
        assert!(vars.is_empty());
    }

    #[test]
    fn convnet_stacks_layers_in_order() {
        let mut vars = VarStore::<B>::new(&Default::default());
        let mut net = Layers::new(input([2, 1, 8, 8]), &mut vars);
        let spec = ConvNetSpec::new(vec![5, 3], vec![4, 8]).with_strides(Some(vec![2, 2]));
        net.convnet(&spec).unwrap();

        let names: Vec<&str> = net.layer_shapes().iter().map(|(name, _)| name.as_str()).collect();
        assert_eq!(names, vec!["conv_1", "conv_2"]);
        assert_eq!(net.get_output().dims(), vec![2, 8, 2, 2]);
    }

    #[test]
    fn pooling_shapes_and_counters() {
        let mut vars = VarStore::<B>::new(&Default::default());
        let mut net = Layers::new(input([1, 2, 5, 5]), &mut vars);

        net.maxpool(2, None, false).unwrap();
        assert_eq!(net.get_output().dims(), vec![1, 2, 3, 3]);
        net.avgpool(2, Some(1), false).unwrap();
        assert_eq!(net.get_output().dims(), vec![1, 2, 3, 3]);
        net.maxpool(2, None, true).unwrap();
        assert_eq!(net.get_output().dims(), vec![1, 2, 1, 1]);

        let names: Vec<&str> = net.layer_shapes().iter().map(|(name, _)| name.as_str()).collect();
        assert_eq!(names, vec!["maxpool_1", "avgpool_1", "maxpool_2"]);
    }

    #[test]
    fn avgpool_ignores_padding() {
        let mut vars = VarStore::<B>::new(&Default::default());
        let ones = Tensor::<B, 4>::ones([1, 1, 5, 5], &Default::default());
        let mut net = Layers::new(ones, &mut vars);
        net.avgpool(2, None, false).unwrap();

        let Features::Map(out) = net.get_output() else { panic!("expected a feature map") };
        let values: Vec<f32> = out.into_data().to_vec().unwrap();
        assert!(values.iter().all(|v| (v - 1.0).abs() < 1e-6));
    }

    #[test]
    fn fc_flattens_feature_maps() {
        let mut vars = VarStore::<B>::new(&Default::default());
        let mut net = Layers::new(input([2, 3, 4, 4]), &mut vars);
        net.fc(&FcSpec::new(5)).unwrap();

        assert_eq!(net.get_output().dims(), vec![2, 5]);
        assert_eq!(vars.info("fc_1/weights").unwrap().shape, vec![48, 5]);
        assert!(vars.contains("fc_1/bias"));
        assert!(vars.contains("fc_1/scale"));
    }

    #[test]
    fn pooling_a_flat_input_is_an_error() {
        let mut vars = VarStore::<B>::new(&Default::default());
        let flat = Tensor::<B, 2>::zeros([2, 3], &Default::default());
        let mut net = Layers::new(flat, &mut vars);
        assert!(matches!(net.maxpool(2, None, false), Err(LayerError::ExpectedFeatureMap { .. })));
    }

    #[test]
    fn residual_shortcut_decision() {
        assert_eq!(ResidualShortcut::for_block(8, 8, 1), ResidualShortcut::Identity);
        assert_eq!(ResidualShortcut::for_block(8, 16, 1), ResidualShortcut::Projection);
        assert_eq!(ResidualShortcut::for_block(8, 8, 2), ResidualShortcut::Projection);
    }

    #[test]
    fn res_layer_identity_has_no_projection() {
        let mut vars = VarStore::<B>::new(&Default::default());
        let mut net = Layers::new(input([2, 8, 6, 6]), &mut vars);
        net.res_layer(&ResSpec::new(8)).unwrap();

        assert_eq!(net.get_output().dims(), vec![2, 8, 6, 6]);
        assert!(!vars.contains("resnet_1/conv0/weights"));
        assert!(vars.contains("resnet_1/conv2/weights"));
    }

    #[test]
    fn res_layer_projects_and_bottlenecks() {
        let mut vars = VarStore::<B>::new(&Default::default());
        let mut net = Layers::new(input([2, 8, 6, 6]), &mut vars);
        net.res_layer(&ResSpec::new(16).with_stride(2).with_bottle(true)).unwrap();

        assert_eq!(net.get_output().dims(), vec![2, 16, 3, 3]);
        assert_eq!(vars.info("resnet_1/conv0/weights").unwrap().shape, vec![16, 8, 1, 1]);
        assert_eq!(vars.info("resnet_1/conv1/weights").unwrap().shape, vec![4, 8, 1, 1]);
        assert_eq!(vars.info("resnet_1/conv2/weights").unwrap().shape, vec![4, 4, 3, 3]);
        assert_eq!(vars.info("resnet_1/conv3/weights").unwrap().shape, vec![16, 4, 1, 1]);
    }

    #[test]
    fn noisy_and_checks_channels() {
        let mut vars = VarStore::<B>::new(&Default::default());
        let mut net = Layers::new(input([1, 3, 4, 4]), &mut vars);
        let err = net.noisy_and(5, true).err().unwrap();
        assert!(matches!(err, LayerError::ChannelMismatch { expected: 5, found: 3, .. }));
    }

    #[test]
    fn noisy_and_of_all_ones_is_one() {
        let mut vars = VarStore::<B>::new(&Default::default());
        let ones = Tensor::<B, 4>::ones([2, 3, 4, 4], &Default::default());
        let mut net = Layers::new(ones, &mut vars);
        net.noisy_and(3, true).unwrap();

        let out = net.get_output().into_flat();
        assert_eq!(out.dims(), [2, 3]);
        let values: Vec<f32> = out.into_data().to_vec().unwrap();
        assert!(values.iter().all(|v| (v - 1.0).abs() < 1e-5));
    }

    #[test]
    fn rebuilding_reuses_variables() {
        let mut vars = VarStore::<B>::new(&Default::default());
        let x = input([2, 1, 6, 6]);

        let build = |vars: &mut VarStore<B>| {
            let mut net = Layers::new(x.clone(), vars);
            net.conv2d(&ConvSpec::new(3, 4)).unwrap()
                .maxpool(2, None, false).unwrap()
                .fc(&FcSpec::new(2).with_batch_norm(false)).unwrap();
            net.get_output().into_flat()
        };

        let first = build(&mut vars);
        let count = vars.len();
        let second = build(&mut vars);

        assert_eq!(vars.len(), count);
        first.into_data().assert_approx_eq(&second.into_data(), 5);
    }
}
