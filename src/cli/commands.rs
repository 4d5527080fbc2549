// ============================================================
// CLI Commands and Arguments
// ============================================================
// Four subcommands:
//
//   train    — run the convolutional classifier; every run option
//              is a KEY=VALUE flag, e.g.
//              --flag RUN_NUM=2 --flag NUM_EPOCHS=10
//   inspect  — list the variables of a checkpoint
//   pack     — write synthetic images into record files
//   stream   — read record files back through the input pipeline
//
// Reference: Rust Book §12 (Building a CLI Program)

use std::path::PathBuf;

use clap::{Args, Subcommand};

use crate::application::{
    records_use_case::{PackConfig, StreamConfig},
    train_use_case::TrainConfig,
};

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Train the demo classifier
    Train(TrainArgs),

    /// Show the variables, layers and flags stored in a checkpoint
    Inspect(InspectArgs),

    /// Pack synthetic images into record files
    Pack(PackArgs),

    /// Stream record files through the threaded input pipeline
    Stream(StreamArgs),
}

#[derive(Args, Debug)]
pub struct TrainArgs {
    /// A configuration entry as KEY=VALUE; repeatable
    #[arg(long = "flag", value_name = "KEY=VALUE")]
    pub flags: Vec<String>,

    /// YAML file merged between the defaults and the flags
    #[arg(long)]
    pub yaml: Option<String>,
}

impl From<TrainArgs> for TrainConfig {
    fn from(a: TrainArgs) -> Self {
        TrainConfig {
            flags:     a.flags,
            yaml_file: a.yaml,
        }
    }
}

#[derive(Args, Debug)]
pub struct InspectArgs {
    /// part_N.ckpt or part_N.ckpt.meta
    pub checkpoint: PathBuf,

    /// Also print the layer log and the stored flags
    #[arg(long)]
    pub all: bool,
}

#[derive(Args, Debug)]
pub struct PackArgs {
    /// Directory receiving the shard files
    #[arg(long, default_value = "records")]
    pub output_dir: PathBuf,

    #[arg(long, default_value_t = 4)]
    pub num_files: usize,

    /// Number of images
    #[arg(long, default_value_t = 1000)]
    pub count: usize,

    #[arg(long, default_value_t = 1)]
    pub channels: usize,

    /// Image side in pixels
    #[arg(long, default_value_t = 16)]
    pub size: usize,

    #[arg(long, default_value_t = 0)]
    pub seed: u64,
}

impl From<PackArgs> for PackConfig {
    fn from(a: PackArgs) -> Self {
        PackConfig {
            output_dir: a.output_dir,
            num_files:  a.num_files,
            count:      a.count,
            channels:   a.channels,
            size:       a.size,
            seed:       a.seed,
        }
    }
}

#[derive(Args, Debug)]
pub struct StreamArgs {
    /// Directory holding the *.rec files
    #[arg(long, default_value = "records")]
    pub input_dir: PathBuf,

    #[arg(long, default_value_t = 32)]
    pub batch_size: usize,

    /// Reader threads
    #[arg(long, default_value_t = 4)]
    pub num_readers: usize,

    /// Decoder threads
    #[arg(long, default_value_t = 4)]
    pub num_threads: usize,

    /// Examples kept buffered by the shuffle queue in train mode
    #[arg(long, default_value_t = 1000)]
    pub min_examples: usize,

    /// Shuffle and cycle instead of reading in order
    #[arg(long)]
    pub train: bool,

    /// Passes over the files; unlimited when omitted
    #[arg(long)]
    pub num_epochs: Option<usize>,

    /// Stop after this many batches
    #[arg(long)]
    pub max_batches: Option<usize>,

    #[arg(long)]
    pub seed: Option<u64>,
}

impl From<StreamArgs> for StreamConfig {
    fn from(a: StreamArgs) -> Self {
        // eval mode reads every file once unless told otherwise
        let num_epochs = match (a.train, a.num_epochs) {
            (false, None) => Some(1),
            (_, epochs) => epochs,
        };
        StreamConfig {
            input_dir:    a.input_dir,
            batch_size:   a.batch_size,
            num_readers:  a.num_readers,
            num_threads:  a.num_threads,
            min_examples: a.min_examples,
            train:        a.train,
            num_epochs,
            max_batches:  a.max_batches,
            seed:         a.seed,
        }
    }
}
