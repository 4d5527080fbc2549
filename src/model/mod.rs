// ============================================================
// Model Lifecycle
// ============================================================
// Model drives an Experiment through one training session:
//
//   configure   flags + YAML + dict → checked Flags
//       │       logging directory, ModelInformation.log
//       ▼
//   build       seed → data → network → optimizer → summaries
//       │
//       ▼
//   runtime     GPU visibility, Saver, SummaryWriter
//       │
//       ▼
//   restore     meta checkpoint | slim checkpoint | scratch
//       │
//       ▼
//   train loop  (the caller) with record_training_step / save_model
//
// The Experiment supplies what differs between projects: where the
// data comes from, what the network looks like, which optimizer
// steps it.

pub mod restore;

use std::{
    fmt::Display,
    fs,
    io,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use burn::{optim::Optimizer, prelude::*, tensor::backend::AutodiffBackend};
use rand::{rngs::StdRng, SeedableRng};

use crate::config::{load_config, ConfigMap, Flags};
use crate::infra::{CheckpointContext, LayerRecord, LogFile, Logger, Saver, Summary, SummaryWriter};
use crate::ml::{Parameters, VarStore};

pub use restore::{restore_meta, restore_slim, RestoreSource};

/// The project-specific parts of a training session.
pub trait Experiment<B: AutodiffBackend> {
    type Optim: Optimizer<Parameters<B>, B>;

    /// Load the data. `rng` is seeded from `SEED` when set.
    fn data(&mut self, flags: &Flags, rng: StdRng) -> Result<()>;

    /// Build the network once so that every variable is declared in
    /// `vars`. Returns the layer log.
    fn network(&mut self, vars: &mut VarStore<B>, device: &B::Device) -> Result<Vec<LayerRecord>>;

    fn optimizer(&mut self, flags: &Flags) -> Result<Self::Optim>;

    /// Variables to summarize each step; every trainable one unless
    /// overridden.
    fn summaries(&self, vars: &VarStore<B>) -> Vec<String> {
        vars.trainable_infos().map(|info| info.name.clone()).collect()
    }
}

pub struct Model<B: AutodiffBackend, E: Experiment<B>> {
    experiment:   E,
    vars:         VarStore<B>,
    optim:        E::Optim,
    flags:        Flags,
    device:       B::Device,
    step:         u64,
    layers:       Vec<LayerRecord>,
    summary_vars: Vec<String>,
    saver:        Saver,
    writer:       SummaryWriter,
    restored:     RestoreSource,
    log_file:     LogFile,
}

impl<B: AutodiffBackend, E: Experiment<B>> Model<B, E> {
    /// Run the whole bootstrap. `flags` are the command-line pairs,
    /// `dict` the experiment defaults. Output is duplicated into the
    /// run's log file through `logger`.
    pub fn new(
        mut experiment: E,
        flags:          ConfigMap,
        dict:           Option<ConfigMap>,
        device:         &B::Device,
        logger:         &Logger,
    ) -> Result<Self> {
        // ── Configure ────────────────────────────────────────────
        let config = load_config(flags, dict)?;
        let mut flags = Flags::from_config(config)?;
        let log_file = check_file_io(&mut flags, logger)?;

        // ── Build ────────────────────────────────────────────────
        let rng = set_seed::<B>(flags.seed);
        experiment.data(&flags, rng).context("Failed to load data")?;

        let mut vars = VarStore::new(device);
        let layers = experiment
            .network(&mut vars, device)
            .context("Failed to build the network")?;
        for layer in &layers {
            tracing::info!("{} output: {:?}", layer.scope, layer.shape);
        }

        let optim = experiment.optimizer(&flags)?;
        let summary_vars = experiment.summaries(&vars);
        for name in &summary_vars {
            tracing::info!("{}", name);
        }

        // ── Runtime ──────────────────────────────────────────────
        if let Some(gpu) = flags.gpu {
            std::env::set_var("CUDA_VISIBLE_DEVICES", gpu.to_string());
            tracing::info!("Using GPU {}", gpu);
        }
        let saver = Saver::new(&flags.logging_directory);
        let writer = SummaryWriter::new(&flags.logging_directory)?;

        // ── Restore ──────────────────────────────────────────────
        let restored = RestoreSource::from_flags(&flags)?;
        initialize_model(&mut vars, &restored)?;

        Ok(Self {
            experiment,
            vars,
            optim,
            flags,
            device: device.clone(),
            step: 1,
            layers,
            summary_vars,
            saver,
            writer,
            restored,
            log_file,
        })
    }

    /// Histograms of every summarized variable plus `scalars`.
    pub fn merged_summary(&self, scalars: Summary) -> Summary {
        let mut summary = Summary::new();
        for name in &self.summary_vars {
            let Some(value) = self.vars.value(name) else { continue };
            match value.into_data().to_vec::<f32>() {
                Ok(values) => summary.add_histogram(name.clone(), &values),
                Err(e) => tracing::warn!("Cannot summarize {}: {:?}", name, e),
            }
        }
        summary.merge(scalars);
        summary
    }

    /// Append one summary at the current step, then advance the step.
    pub fn record_training_step(&mut self, scalars: Summary) -> Result<()> {
        let summary = self.merged_summary(scalars);
        self.writer.add_summary(&summary, self.step)?;
        self.step += 1;
        Ok(())
    }

    /// Backpropagate `loss` and apply one optimizer step.
    pub fn apply_gradients(&mut self, loss: Tensor<B, 1>, lr: f64) {
        let grads = loss.backward();
        self.vars.step(&mut self.optim, lr, grads);
    }

    /// Save `LOGGING_DIRECTORY/part_<section>.ckpt` and its meta.
    pub fn save_model(&self, section: impl Display) -> Result<PathBuf> {
        let context = CheckpointContext {
            step:   self.step,
            layers: self.layers.clone(),
            flags:  self.flags.raw().clone(),
        };
        let path = self.saver.save(&self.vars, &section.to_string(), &context)?;
        tracing::info!("Model saved in file: {}", path.display());
        Ok(path)
    }

    pub fn get_flags(&self) -> &Flags {
        &self.flags
    }

    pub fn step(&self) -> u64 {
        self.step
    }

    pub fn device(&self) -> &B::Device {
        &self.device
    }

    pub fn vars(&self) -> &VarStore<B> {
        &self.vars
    }

    pub fn experiment(&self) -> &E {
        &self.experiment
    }

    /// The experiment and the variables, borrowed together for a
    /// forward pass.
    pub fn parts_mut(&mut self) -> (&mut E, &mut VarStore<B>) {
        (&mut self.experiment, &mut self.vars)
    }

    pub fn restored_from(&self) -> &RestoreSource {
        &self.restored
    }

    pub fn logging_directory(&self) -> &Path {
        &self.flags.logging_directory
    }

    /// The run's ModelInformation.log.
    pub fn log_path(&self) -> &Path {
        self.log_file.path()
    }
}

/// Derive the run directories, create the logging directory and
/// start duplicating output into its log file.
fn check_file_io(flags: &mut Flags, logger: &Logger) -> Result<LogFile> {
    flags.resolve_directories();
    make_directory(&flags.logging_directory).with_context(|| {
        format!("Cannot create logging directory '{}'", flags.logging_directory.display())
    })?;

    let log_file = logger.attach(&flags.logging_directory).with_context(|| {
        format!("Cannot open the log file in '{}'", flags.logging_directory.display())
    })?;
    tracing::info!("{}", serde_json::to_string(flags.raw())?);
    Ok(log_file)
}

/// Seed the backend and return the data RNG.
fn set_seed<B: Backend>(seed: Option<u64>) -> StdRng {
    match seed {
        Some(seed) => {
            B::seed(seed);
            StdRng::seed_from_u64(seed)
        }
        None => StdRng::from_entropy(),
    }
}

fn initialize_model<B: Backend>(vars: &mut VarStore<B>, source: &RestoreSource) -> Result<()> {
    match source {
        RestoreSource::Meta(path) => {
            tracing::info!("Restoring from .meta file");
            restore_meta(vars, path)?;
        }
        RestoreSource::Slim(path) => {
            tracing::info!("Restoring slim model.");
            restore_slim(vars, path)?;
        }
        RestoreSource::Scratch => tracing::info!("Model training from scratch."),
    }
    Ok(())
}

/// Create `path` (and its parents) if it does not exist.
pub fn make_directory(path: &Path) -> io::Result<()> {
    if !path.exists() {
        fs::create_dir_all(path)?;
    }
    Ok(())
}
