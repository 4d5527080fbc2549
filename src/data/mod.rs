// ============================================================
// Data Layer
// ============================================================
// Everything between a data source and a batch of tensors.
//
//   DataSource        → loads (images, labels), optionally a test set
//       │
//       ▼
//   splitter          → carves test and validation partitions
//       │
//       ▼
//   Data              → shuffled train batches, cursor-based
//                       validation and test batches
//
// Two alternatives share the same Image type:
//
//   ImageDataset / ImageBatcher  → burn's Dataset + Batcher pair
//   stream                       → threaded record-file pipeline
//
// Reference: Burn Book §4 (Datasets and Dataloaders)

/// Raw images and pixel normalization
pub mod image;

/// The DataSource trait and the bundled sources
pub mod source;

/// Train / validation / test partitioning
pub mod splitter;

/// Epoch-aware batch feeder over in-memory data
pub mod feeder;

/// Implements Burn's Dataset trait for labelled images
pub mod dataset;

/// Implements Burn's Batcher trait to create tensor batches
pub mod batcher;

/// Threaded record-file input pipeline
pub mod stream;

pub use feeder::{batches_per_epoch, Batch, Data, EvalBatch};
pub use image::{img_norm, Image};
pub use source::{DataSource, InMemorySource, LoadedData, SyntheticSource};
