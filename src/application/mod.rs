// ============================================================
// Application / Use Cases
// ============================================================
// Each use case wires the library layers into one workflow the
// CLI can run. No argument parsing or printing happens here.
//
//   train_use_case.rs   — a convolutional classifier trained
//                         through the Model lifecycle
//   inspect_use_case.rs — variables and meta of a checkpoint
//   records_use_case.rs — pack images into record files, stream
//                         them back through the threaded pipeline
//
// Reference: Clean Architecture pattern
//            Rust Book §7 (Module System)

/// The training workflow
pub mod train_use_case;

/// Checkpoint inspection
pub mod inspect_use_case;

/// Record packing and streaming
pub mod records_use_case;
