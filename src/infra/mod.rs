// ============================================================
// Infrastructure Layer
// ============================================================
// Cross-cutting concerns used by the model lifecycle:
//
//   checkpoint.rs — Saving and loading variable values
//                   part_N.ckpt (Burn BinBytesRecorder) plus a
//                   JSON part_N.ckpt.meta describing them
//
//   summary.rs    — Per-step scalar and histogram summaries
//                   appended to events.jsonl
//
//   logger.rs     — A tracing writer that duplicates all output
//                   into ModelInformation.log
//
// Reference: Rust Book §9 (Error Handling with anyhow)
//            Burn Book §5 (Checkpointing)

/// Model checkpoint saving and loading
pub mod checkpoint;

/// Training summaries event log
pub mod summary;

/// stdout + file duplicating log writer
pub mod logger;

pub use checkpoint::{
    checkpoint_path, get_variables_in_checkpoint_file, layer_records, load_checkpoint, meta_path, name_in_checkpoint,
    CheckpointContext, CheckpointMeta, LayerRecord, Saver,
};
pub use logger::{LogFile, Logger, LOG_FILE};
pub use summary::{Histogram, Summary, SummaryWriter};
