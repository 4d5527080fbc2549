// ============================================================
// Error Types
// ============================================================
// One enum per layer of the crate. Library code returns these;
// the application and CLI layers wrap them in anyhow::Error
// with extra context.

use std::path::PathBuf;

/// Errors raised while merging and validating configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("You must define {key}")]
    MissingKey { key: String },

    #[error("Type mismatch ({expected} vs. {found}) for config key: {key}")]
    TypeMismatch {
        key:      String,
        expected: &'static str,
        found:    &'static str,
    },

    #[error("Invalid value for config key {key}: {reason}")]
    InvalidValue { key: String, reason: String },

    #[error("Malformed flag '{flag}', expected KEY=VALUE")]
    MalformedFlag { flag: String },

    #[error("Cannot read config file '{path}': {source}")]
    Read {
        path:   PathBuf,
        source: std::io::Error,
    },

    #[error("Cannot parse config file '{path}': {source}")]
    Parse {
        path:   PathBuf,
        source: serde_yaml::Error,
    },
}

/// Errors raised by in-memory batching and the record pipeline.
#[derive(Debug, thiserror::Error)]
pub enum DataError {
    #[error("Batch size {batch_size} exceeds the {partition} partition size {size}")]
    BatchTooLarge {
        partition:  &'static str,
        batch_size: usize,
        size:       usize,
    },

    #[error("Image and label counts differ: {images} images, {labels} labels")]
    LengthMismatch { images: usize, labels: usize },

    #[error("Image has {found} pixels but shape {shape:?} needs {expected}")]
    BadImage {
        shape:    [usize; 3],
        expected: usize,
        found:    usize,
    },

    #[error("Image {index} has shape {found:?}, expected {expected:?} like the images before it")]
    MixedShapes {
        index:    usize,
        expected: [usize; 3],
        found:    [usize; 3],
    },

    #[error("Truncated record in '{path}': wanted {wanted} bytes, got {got}")]
    TruncatedRecord {
        path:   PathBuf,
        wanted: usize,
        got:    usize,
    },

    #[error("Queue closed")]
    QueueClosed,

    #[error("No record files given to the input pipeline")]
    NoInputFiles,

    #[error("Input pipeline stopped: {message}")]
    Pipeline { message: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Errors raised by the layer builder.
#[derive(Debug, thiserror::Error)]
pub enum LayerError {
    #[error("Layer list '{field}' has {found} entries, expected depth {expected}")]
    DepthMismatch {
        field:    &'static str,
        expected: usize,
        found:    usize,
    },

    #[error("{scope} needs a 4-D feature map input")]
    ExpectedFeatureMap { scope: String },

    #[error("{scope}: input has {found} channels, expected {expected}")]
    ChannelMismatch {
        scope:    String,
        expected: usize,
        found:    usize,
    },

    #[error("Variable '{name}' exists with shape {existing:?}, requested {requested:?}")]
    ShapeConflict {
        name:      String,
        existing:  Vec<usize>,
        requested: Vec<usize>,
    },

    #[error("Variable '{name}' has rank {found}, requested rank {expected}")]
    RankMismatch {
        name:     String,
        expected: usize,
        found:    usize,
    },

    #[error("Unknown variable '{name}'")]
    UnknownVariable { name: String },

    #[error("{scope}: {reason}")]
    InvalidSpec { scope: String, reason: String },
}

/// Errors raised while writing or reading checkpoints.
#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    #[error("Cannot access checkpoint '{path}': {source}")]
    Io {
        path:   PathBuf,
        source: std::io::Error,
    },

    #[error("Malformed checkpoint metadata '{path}': {source}")]
    Meta {
        path:   PathBuf,
        source: serde_json::Error,
    },

    #[error("Cannot decode checkpoint '{path}': {message}")]
    Record { path: PathBuf, message: String },

    #[error("Checkpoint '{path}' lists {listed} variables but stores {stored}")]
    Inconsistent {
        path:   PathBuf,
        listed: usize,
        stored: usize,
    },
}

/// Errors raised while restoring a model.
#[derive(Debug, thiserror::Error)]
pub enum RestoreError {
    #[error("No model variables matched the checkpoint variables in '{path}'")]
    NoMatchingVariables { path: PathBuf },

    #[error("Variable '{name}' has shape {model:?} in the model but {checkpoint:?} in the checkpoint")]
    ShapeMismatch {
        name:       String,
        model:      Vec<usize>,
        checkpoint: Vec<usize>,
    },

    #[error("{key} must be set to restore from a meta file")]
    MissingKey { key: &'static str },

    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),

    #[error(transparent)]
    Layer(#[from] LayerError),
}
