// ============================================================
// TrainUseCase
// ============================================================
// Trains a small convolutional classifier on the synthetic
// two-class image set, driven entirely by the Model lifecycle:
//
//   Step 1: Bootstrap the Model     (flags + YAML + defaults,
//                                    data, network, restore)
//   Step 2: Epoch loop              next_train_batch → forward →
//                                    cross-entropy + weight decay →
//                                    apply_gradients → summary
//   Step 3: Validation pass         every validation example once
//   Step 4: Checkpoint              part_<epoch>.ckpt
//   Step 5: Test pass               after the last epoch
//
// Hyperparameters live in the configuration record like every
// other key, so `--flag BATCH_SIZE=32` or a YAML file override
// the defaults below.
//
// Reference: Burn Book §5 (Training)
//            Kingma & Ba (2015) Adam

use std::path::PathBuf;

use anyhow::{Context, Result};
use burn::{
    backend::Autodiff,
    nn::loss::CrossEntropyLossConfig,
    optim::{adaptor::OptimizerAdaptor, Adam, AdamConfig},
    prelude::*,
    tensor::backend::AutodiffBackend,
};
use rand::{rngs::StdRng, Rng};
use serde::{Deserialize, Serialize};
use serde_yaml::{Number, Value};

use crate::config::{parse_flags, ConfigMap, Flags, YAML_FILE_KEY};
use crate::data::{batches_per_epoch, Data, SyntheticSource};
use crate::error::{ConfigError, LayerError};
use crate::infra::{layer_records, LayerRecord, Logger, Summary};
use crate::ml::{Activation, ConvSpec, FcSpec, Layers, Parameters, ResSpec, VarStore};
use crate::model::{Experiment, Model};

#[cfg(not(feature = "wgpu"))]
pub type MyBackend = Autodiff<burn::backend::NdArray>;
#[cfg(feature = "wgpu")]
pub type MyBackend = Autodiff<burn::backend::Wgpu>;

/// The synthetic set has two classes: bright top half or not.
pub const NUM_CLASSES: usize = 2;

// ─── Training Configuration ──────────────────────────────────────────────────
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrainConfig {
    /// `KEY=VALUE` pairs, highest precedence.
    pub flags:     Vec<String>,
    /// YAML file merged between the defaults and the flags.
    pub yaml_file: Option<String>,
}

/// Defaults for every key the classifier reads.
pub fn default_dict() -> ConfigMap {
    let mut dict = ConfigMap::new();
    let mut set = |key: &str, value: Value| {
        dict.insert(key.to_string(), value);
    };
    set("MODEL_DIRECTORY", Value::String("conv_classifier".into()));
    set("SAVE_DIRECTORY", Value::String("runs".into()));
    set("NUM_EPOCHS", Value::Number(Number::from(5)));
    set("BATCH_SIZE", Value::Number(Number::from(16)));
    set("LEARNING_RATE", Value::Number(Number::from(1e-3)));
    set("WEIGHT_DECAY", Value::Number(Number::from(1e-4)));
    set("NUM_SAMPLES", Value::Number(Number::from(512)));
    set("IMAGE_SIZE", Value::Number(Number::from(16)));
    set("CHANNELS", Value::Number(Number::from(1)));
    set("VALID_PERCENT", Value::Number(Number::from(0.2)));
    set("TEST_PERCENT", Value::Number(Number::from(0.15)));
    dict
}

/// The classifier's hyperparameters, read from the checked flags.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Hyperparams {
    pub batch_size:    usize,
    pub learning_rate: f64,
    pub weight_decay:  f64,
    pub num_samples:   usize,
    pub image_size:    usize,
    pub channels:      usize,
    pub valid_percent: f64,
    pub test_percent:  f64,
}

impl Hyperparams {
    pub fn from_flags(flags: &Flags) -> Result<Self, ConfigError> {
        Ok(Self {
            batch_size:    positive_usize(flags, "BATCH_SIZE")?,
            learning_rate: number(flags, "LEARNING_RATE")?,
            weight_decay:  number(flags, "WEIGHT_DECAY")?,
            num_samples:   positive_usize(flags, "NUM_SAMPLES")?,
            image_size:    positive_usize(flags, "IMAGE_SIZE")?,
            channels:      positive_usize(flags, "CHANNELS")?,
            valid_percent: number(flags, "VALID_PERCENT")?,
            test_percent:  number(flags, "TEST_PERCENT")?,
        })
    }
}

fn positive_usize(flags: &Flags, key: &str) -> Result<usize, ConfigError> {
    match flags.get_usize(key) {
        Some(n) if n > 0 => Ok(n),
        _ => Err(ConfigError::InvalidValue {
            key:    key.to_string(),
            reason: "expected a positive integer".into(),
        }),
    }
}

fn number(flags: &Flags, key: &str) -> Result<f64, ConfigError> {
    flags.get_f64(key).ok_or_else(|| ConfigError::InvalidValue {
        key:    key.to_string(),
        reason: "expected a number".into(),
    })
}

// ─── The Network ──────────────────────────────────────────────────────────────

/// conv → maxpool → residual block → global average → dense.
/// Declares its variables on the first call and reuses them after.
pub fn classifier_logits<B: Backend>(
    vars:   &mut VarStore<B>,
    images: Tensor<B, 4>,
) -> Result<(Tensor<B, 2>, Vec<LayerRecord>), LayerError> {
    let mut net = Layers::new(images, vars);
    net.conv2d(&ConvSpec::new(3, 8))?
        .maxpool(2, None, false)?
        .res_layer(&ResSpec::new(16).with_stride(2))?
        .avgpool(0, None, true)?
        .fc(&FcSpec::new(NUM_CLASSES)
            .with_activation(Activation::Identity)
            .with_batch_norm(false)
            .with_s_value(None))?;
    let records = layer_records(net.layer_shapes());
    Ok((net.get_output().into_flat(), records))
}

fn count_correct<B: Backend>(logits: Tensor<B, 2>, labels: Tensor<B, 1, Int>) -> usize {
    // argmax(1) returns [batch, 1]
    let predicted = logits.argmax(1).flatten::<1>(0, 1);
    predicted.equal(labels).int().sum().into_scalar().elem::<i64>() as usize
}

// ─── The Experiment ───────────────────────────────────────────────────────────

#[derive(Default)]
pub struct ConvClassifier {
    data:   Option<Data<usize>>,
    params: Option<Hyperparams>,
}

impl ConvClassifier {
    pub fn data_mut(&mut self) -> Result<&mut Data<usize>> {
        self.data.as_mut().context("Data has not been loaded")
    }

    pub fn hyperparams(&self) -> Result<Hyperparams> {
        self.params.context("Hyperparameters have not been read")
    }
}

impl<B: AutodiffBackend> Experiment<B> for ConvClassifier {
    type Optim = OptimizerAdaptor<Adam, Parameters<B>, B>;

    fn data(&mut self, flags: &Flags, mut rng: StdRng) -> Result<()> {
        let params = Hyperparams::from_flags(flags)?;
        let source = SyntheticSource::new(params.num_samples, params.channels, params.image_size, rng.gen());
        self.data = Some(Data::new(&source, params.valid_percent, params.test_percent, rng)?);
        self.params = Some(params);
        Ok(())
    }

    fn network(&mut self, vars: &mut VarStore<B>, device: &B::Device) -> Result<Vec<LayerRecord>> {
        let params = self.hyperparams()?;
        let images = Tensor::<B, 4>::zeros(
            [params.batch_size, params.channels, params.image_size, params.image_size],
            device,
        );
        let (_, records) = classifier_logits(vars, images)?;
        Ok(records)
    }

    fn optimizer(&mut self, _flags: &Flags) -> Result<Self::Optim> {
        Ok(AdamConfig::new().with_epsilon(1e-8).init())
    }
}

// ─── TrainUseCase ─────────────────────────────────────────────────────────────

/// What a finished run reports back to the CLI.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainReport {
    pub epochs:         usize,
    pub steps:          u64,
    pub final_loss:     f64,
    pub valid_accuracy: f64,
    pub test_accuracy:  f64,
    pub checkpoint:     Option<PathBuf>,
    pub log_dir:        PathBuf,
}

#[derive(Debug, Clone, Copy)]
enum Split {
    Valid,
    Test,
}

type ClassifierModel = Model<MyBackend, ConvClassifier>;

pub struct TrainUseCase {
    config: TrainConfig,
}

impl TrainUseCase {
    pub fn new(config: TrainConfig) -> Self {
        Self { config }
    }

    pub fn execute(&self, logger: &Logger) -> Result<TrainReport> {
        // ── Step 1: Bootstrap ─────────────────────────────────────────────────
        let mut flags = parse_flags(&self.config.flags)?;
        if let Some(yaml) = &self.config.yaml_file {
            flags.insert(YAML_FILE_KEY.to_string(), Value::String(yaml.clone()));
        }
        let device = Default::default();
        let mut model = ClassifierModel::new(ConvClassifier::default(), flags, Some(default_dict()), &device, logger)?;

        let params = model.experiment().hyperparams()?;
        let num_epochs = model.get_flags().num_epochs;
        let num_train = model.parts_mut().0.data_mut()?.num_train_images();
        let steps_per_epoch = batches_per_epoch(num_train, params.batch_size);
        if steps_per_epoch == 0 && num_epochs > 0 {
            anyhow::bail!(
                "BATCH_SIZE {} is larger than the {} training images",
                params.batch_size,
                num_train
            );
        }
        tracing::info!(
            "Training {} epochs of {} steps (batch {}, lr {})",
            num_epochs,
            steps_per_epoch,
            params.batch_size,
            params.learning_rate
        );

        let ce = CrossEntropyLossConfig::new().init(&device);
        let mut final_loss = f64::NAN;
        let mut valid_accuracy = f64::NAN;
        let mut checkpoint = None;

        // ── Step 2: Epoch loop ────────────────────────────────────────────────
        for epoch in 1..=num_epochs {
            let mut loss_sum = 0.0f64;

            for _ in 0..steps_per_epoch {
                let (experiment, vars) = model.parts_mut();
                let batch = experiment.data_mut()?.next_train_batch(params.batch_size)?;
                let images = batch.images_tensor::<MyBackend>(&device)?;
                let labels = batch.labels_tensor::<MyBackend>(&device);

                let (logits, _) = classifier_logits(vars, images)?;
                let correct = count_correct(logits.clone(), labels.clone());
                let loss = ce.forward(logits, labels)
                    + vars.weight_decay_loss().mul_scalar(params.weight_decay);
                let loss_val: f64 = loss.clone().into_scalar().elem::<f64>();
                loss_sum += loss_val;

                model.apply_gradients(loss, params.learning_rate);
                model.record_training_step(
                    Summary::new()
                        .scalar("loss", loss_val)
                        .scalar("accuracy", correct as f64 / batch.len() as f64)
                        .scalar("learning_rate", params.learning_rate),
                )?;
            }
            final_loss = loss_sum / steps_per_epoch as f64;

            // ── Step 3: Validation ────────────────────────────────────────────
            valid_accuracy = evaluate(&mut model, &device, params.batch_size, Split::Valid)?;
            tracing::info!(
                "Epoch {}/{} | loss: {:.4} | valid accuracy: {:.3}",
                epoch,
                num_epochs,
                final_loss,
                valid_accuracy
            );

            // ── Step 4: Checkpoint ────────────────────────────────────────────
            checkpoint = Some(model.save_model(epoch)?);
        }

        // ── Step 5: Test ──────────────────────────────────────────────────────
        let test_accuracy = evaluate(&mut model, &device, params.batch_size, Split::Test)?;
        tracing::info!("Test accuracy: {:.3}", test_accuracy);

        Ok(TrainReport {
            epochs: num_epochs,
            steps: model.step() - 1,
            final_loss,
            valid_accuracy,
            test_accuracy,
            checkpoint,
            log_dir: model.logging_directory().to_path_buf(),
        })
    }
}

/// Accuracy over every example of a split, read through the
/// clamping cursor. `NaN` for an empty split.
fn evaluate(
    model:      &mut ClassifierModel,
    device:     &<MyBackend as Backend>::Device,
    batch_size: usize,
    split:      Split,
) -> Result<f64> {
    let (experiment, vars) = model.parts_mut();
    let data = experiment.data_mut()?;
    let total = match split {
        Split::Valid => data.num_valid_images(),
        Split::Test => data.num_test_images(),
    };
    if total == 0 {
        return Ok(f64::NAN);
    }

    let mut seen = 0usize;
    let mut correct = 0usize;
    while seen < total {
        let eval = match split {
            Split::Valid => data.next_valid_batch(batch_size),
            Split::Test => data.next_test_batch(batch_size),
        };
        // a cursor sitting at the end serves one empty batch, then restarts
        if eval.batch.is_empty() {
            continue;
        }
        let images = eval.batch.images_tensor::<MyBackend>(device)?;
        let labels = eval.batch.labels_tensor::<MyBackend>(device);
        let (logits, _) = classifier_logits(vars, images)?;
        correct += count_correct(logits, labels);
        seen += eval.batch.len();
    }
    Ok(correct as f64 / total as f64)
}
