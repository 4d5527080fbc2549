// ============================================================
// Record Streaming
// ============================================================
// Threaded input for record files that do not fit in memory.
//
//   records      — length-prefixed record files
//   queue        — bounded FIFO and random-shuffle queues
//   coordinator  — stop flag, first error, bounded join
//   pipeline     — batch_inputs / init_threads / exit_threads

pub mod coordinator;
pub mod pipeline;
pub mod queue;
pub mod records;

pub use coordinator::{Coordinator, STOP_GRACE_PERIOD};
pub use pipeline::{batch_inputs, exit_threads, init_threads, BatchStream, Mode, PipelineOptions};
pub use queue::{BoundedQueue, QueueKind};
pub use records::{RecordReader, RecordWriter};
