// ============================================================
// Streaming Input Pipeline
// ============================================================
// For datasets too large for memory. Record files are read by a
// pool of reader threads and decoded by a pool of decoder threads:
//
//   files ──▶ filename queue (cap 16, shuffled each pass)
//                 │
//                 ▼  num_readers reader threads
//   examples queue (cap min_examples + 3·batch)
//     train: random-shuffle, keeps min_examples buffered
//     eval:  FIFO
//                 │
//                 ▼  num_threads decoder threads
//   decoded queue ──▶ BatchStream::next_batch (batch_size items)
//
// Nothing runs until `init_threads`; `exit_threads` stops and
// joins everything within the grace period.

use std::{
    path::PathBuf,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
};

use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};

use super::coordinator::{Coordinator, STOP_GRACE_PERIOD};
use super::queue::BoundedQueue;
use super::records::RecordReader;
use crate::error::DataError;

const FILENAME_QUEUE_CAPACITY: usize = 16;
const BATCH_QUEUE_CAPACITY: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Train,
    Eval,
}

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub batch_size:   usize,
    pub mode:         Mode,
    pub num_readers:  usize,
    pub num_threads:  usize,
    pub min_examples: usize,
    /// Passes over the file list; `None` cycles forever.
    pub num_epochs:   Option<usize>,
    /// Serve a short last batch when the stream ends.
    pub allow_smaller_final_batch: bool,
    pub seed:         Option<u64>,
}

impl PipelineOptions {
    pub fn new(batch_size: usize) -> Self {
        Self {
            batch_size,
            mode: Mode::Train,
            num_readers: 4,
            num_threads: 4,
            min_examples: 1000,
            num_epochs: None,
            allow_smaller_final_batch: false,
            seed: None,
        }
    }

    pub fn with_mode(mut self, mode: Mode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_threads(mut self, num_readers: usize, num_threads: usize) -> Self {
        self.num_readers = num_readers.max(1);
        self.num_threads = num_threads.max(1);
        self
    }

    pub fn with_min_examples(mut self, min_examples: usize) -> Self {
        self.min_examples = min_examples;
        self
    }

    pub fn with_num_epochs(mut self, num_epochs: usize) -> Self {
        self.num_epochs = Some(num_epochs);
        self
    }

    pub fn with_smaller_final_batch(mut self, allow: bool) -> Self {
        self.allow_smaller_final_batch = allow;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }
}

type ThreadBody = Box<dyn FnOnce(Coordinator) + Send + 'static>;

/// A named group of thread bodies that keep one queue filled.
pub struct QueueRunner {
    name:    &'static str,
    threads: Vec<ThreadBody>,
}

impl QueueRunner {
    fn new(name: &'static str) -> Self {
        Self { name, threads: Vec::new() }
    }

    fn add(&mut self, body: impl FnOnce(Coordinator) + Send + 'static) {
        self.threads.push(Box::new(body));
    }

    fn create_threads(self, coord: &Coordinator) -> Vec<JoinHandle<()>> {
        self.threads
            .into_iter()
            .enumerate()
            .filter_map(|(i, body)| {
                let coord = coord.clone();
                let spawned = thread::Builder::new()
                    .name(format!("{}-{}", self.name, i))
                    .spawn(move || body(coord));
                match spawned {
                    Ok(handle) => Some(handle),
                    Err(e) => {
                        tracing::error!("Cannot start {} thread: {}", self.name, e);
                        None
                    }
                }
            })
            .collect()
    }
}

/// The consumer end of the pipeline.
pub struct BatchStream<T> {
    output:     Arc<BoundedQueue<T>>,
    batch_size: usize,
    allow_smaller_final_batch: bool,
    coord:      Coordinator,
    runners:    Vec<QueueRunner>,
}

impl<T: Send + 'static> BatchStream<T> {
    /// Block until `batch_size` decoded examples are available.
    /// `Ok(None)` once the stream is exhausted.
    pub fn next_batch(&self) -> Result<Option<Vec<T>>, DataError> {
        let mut batch = Vec::with_capacity(self.batch_size);
        while batch.len() < self.batch_size {
            match self.output.dequeue() {
                Ok(item) => batch.push(item),
                Err(DataError::QueueClosed) => {
                    if let Some(message) = self.coord.error() {
                        return Err(DataError::Pipeline { message });
                    }
                    if self.allow_smaller_final_batch && !batch.is_empty() {
                        return Ok(Some(batch));
                    }
                    return Ok(None);
                }
                Err(e) => return Err(e),
            }
        }
        Ok(Some(batch))
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn coordinator(&self) -> &Coordinator {
        &self.coord
    }
}

/// Build the reader/decoder pipeline over `files`. Threads start
/// with `init_threads`.
pub fn batch_inputs<T, E, F>(
    read_and_decode: F,
    files:           Vec<PathBuf>,
    options:         &PipelineOptions,
) -> Result<BatchStream<T>, DataError>
where
    T: Send + 'static,
    E: std::fmt::Display,
    F: Fn(Vec<u8>) -> Result<T, E> + Send + Sync + 'static,
{
    if files.is_empty() {
        return Err(DataError::NoInputFiles);
    }
    let coord = Coordinator::new();
    let (examples, mut runners) = queue_setup(files, options, &coord);
    let (output, decoder) = thread_setup(read_and_decode, examples, options.num_threads, &coord);
    runners.push(decoder);

    tracing::info!(
        "Input pipeline ready: {:?} mode, {} readers, {} decoders, batch {}",
        options.mode,
        options.num_readers,
        options.num_threads,
        options.batch_size,
    );

    Ok(BatchStream {
        output,
        batch_size: options.batch_size.max(1),
        allow_smaller_final_batch: options.allow_smaller_final_batch,
        coord,
        runners,
    })
}

/// Filename producer plus reader threads feeding the examples queue.
fn queue_setup(
    files:   Vec<PathBuf>,
    options: &PipelineOptions,
    coord:   &Coordinator,
) -> (Arc<BoundedQueue<Vec<u8>>>, Vec<QueueRunner>) {
    let filenames = Arc::new(BoundedQueue::<PathBuf>::fifo(FILENAME_QUEUE_CAPACITY));
    let capacity = options.min_examples + 3 * options.batch_size.max(1);
    let examples = Arc::new(match options.mode {
        Mode::Train => BoundedQueue::random_shuffle(capacity, options.min_examples, options.seed),
        Mode::Eval => BoundedQueue::fifo(capacity),
    });
    coord.register_queue(filenames.clone());
    coord.register_queue(examples.clone());

    let mut producer = QueueRunner::new("filename_producer");
    {
        let filenames  = Arc::clone(&filenames);
        let num_epochs = options.num_epochs;
        let mut rng = match options.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        producer.add(move |coord| {
            let mut order = files;
            let mut pass = 0usize;
            while num_epochs.map_or(true, |n| pass < n) && !coord.should_stop() {
                order.shuffle(&mut rng);
                for path in &order {
                    if filenames.enqueue(path.clone()).is_err() {
                        return;
                    }
                }
                pass += 1;
            }
            filenames.close();
        });
    }

    let mut readers = QueueRunner::new("record_reader");
    let live_readers = Arc::new(AtomicUsize::new(options.num_readers.max(1)));
    for _ in 0..options.num_readers.max(1) {
        let filenames = Arc::clone(&filenames);
        let examples  = Arc::clone(&examples);
        let live      = Arc::clone(&live_readers);
        readers.add(move |coord| {
            read_files(&filenames, &examples, &coord);
            if live.fetch_sub(1, Ordering::SeqCst) == 1 {
                examples.close();
            }
        });
    }

    (examples, vec![producer, readers])
}

fn read_files(
    filenames: &BoundedQueue<PathBuf>,
    examples:  &BoundedQueue<Vec<u8>>,
    coord:     &Coordinator,
) {
    while let Ok(path) = filenames.dequeue() {
        tracing::debug!("Reading records from '{}'", path.display());
        let reader = match RecordReader::open(&path) {
            Ok(reader) => reader,
            Err(e) => {
                coord.request_stop_with_error(format!("{}: {}", path.display(), e));
                return;
            }
        };
        for record in reader {
            if coord.should_stop() {
                return;
            }
            match record {
                Ok(record) => {
                    if examples.enqueue(record).is_err() {
                        return;
                    }
                }
                Err(e) => {
                    coord.request_stop_with_error(e.to_string());
                    return;
                }
            }
        }
    }
}

/// Decoder threads turning serialized records into examples.
fn thread_setup<T, E, F>(
    read_and_decode: F,
    examples:        Arc<BoundedQueue<Vec<u8>>>,
    num_threads:     usize,
    coord:           &Coordinator,
) -> (Arc<BoundedQueue<T>>, QueueRunner)
where
    T: Send + 'static,
    E: std::fmt::Display,
    F: Fn(Vec<u8>) -> Result<T, E> + Send + Sync + 'static,
{
    let output = Arc::new(BoundedQueue::<T>::fifo(BATCH_QUEUE_CAPACITY));
    coord.register_queue(output.clone());

    let decode = Arc::new(read_and_decode);
    let live = Arc::new(AtomicUsize::new(num_threads.max(1)));
    let mut runner = QueueRunner::new("decoder");
    for _ in 0..num_threads.max(1) {
        let decode   = Arc::clone(&decode);
        let examples = Arc::clone(&examples);
        let output   = Arc::clone(&output);
        let live     = Arc::clone(&live);
        runner.add(move |coord| {
            while let Ok(record) = examples.dequeue() {
                match (*decode)(record) {
                    Ok(example) => {
                        if output.enqueue(example).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        coord.request_stop_with_error(format!("decode failed: {e}"));
                        break;
                    }
                }
            }
            if live.fetch_sub(1, Ordering::SeqCst) == 1 {
                output.close();
            }
        });
    }
    (output, runner)
}

/// Start every queue runner of `stream`. Returns the thread handles
/// and the coordinator that stops them.
pub fn init_threads<T: Send + 'static>(stream: &mut BatchStream<T>) -> (Vec<JoinHandle<()>>, Coordinator) {
    let coord = stream.coord.clone();
    let threads: Vec<JoinHandle<()>> = stream
        .runners
        .drain(..)
        .flat_map(|runner| runner.create_threads(&coord))
        .collect();
    tracing::debug!("Started {} input pipeline threads", threads.len());
    (threads, coord)
}

/// Stop and join the pipeline threads, waiting at most the grace
/// period. Returns the number of threads left running.
pub fn exit_threads(threads: Vec<JoinHandle<()>>, coord: &Coordinator) -> usize {
    coord.request_stop();
    coord.join(threads, STOP_GRACE_PERIOD)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::stream::records::RecordWriter;
    use std::path::Path;

    fn write_file(dir: &Path, name: &str, values: std::ops::Range<u32>) -> PathBuf {
        let path = dir.join(name);
        let mut writer = RecordWriter::create(&path).unwrap();
        for v in values {
            writer.write(&v.to_le_bytes()).unwrap();
        }
        writer.finish().unwrap();
        path
    }

    fn decode(bytes: Vec<u8>) -> Result<u32, String> {
        let raw: [u8; 4] = bytes.try_into().map_err(|_| "bad length".to_string())?;
        Ok(u32::from_le_bytes(raw))
    }

    #[test]
    fn eval_pipeline_delivers_every_record_once() {
        let dir   = tempfile::tempdir().unwrap();
        let files = vec![
            write_file(dir.path(), "a", 0..25),
            write_file(dir.path(), "b", 25..50),
        ];
        let options = PipelineOptions::new(8)
            .with_mode(Mode::Eval)
            .with_threads(2, 3)
            .with_min_examples(4)
            .with_num_epochs(1)
            .with_smaller_final_batch(true)
            .with_seed(5);
        let mut stream = batch_inputs(decode, files, &options).unwrap();
        let (threads, coord) = init_threads(&mut stream);

        let mut seen = Vec::new();
        while let Some(batch) = stream.next_batch().unwrap() {
            assert!(batch.len() <= 8);
            seen.extend(batch);
        }
        seen.sort_unstable();
        assert_eq!(seen, (0..50).collect::<Vec<_>>());
        assert_eq!(exit_threads(threads, &coord), 0);
    }

    #[test]
    fn train_pipeline_cycles_until_stopped() {
        let dir   = tempfile::tempdir().unwrap();
        let files = vec![write_file(dir.path(), "a", 0..10)];
        let options = PipelineOptions::new(4).with_min_examples(5).with_seed(1);
        let mut stream = batch_inputs(decode, files, &options).unwrap();
        let (threads, coord) = init_threads(&mut stream);

        // more batches than one pass holds: the file list cycles
        for _ in 0..6 {
            let batch = stream.next_batch().unwrap().unwrap();
            assert_eq!(batch.len(), 4);
            assert!(batch.iter().all(|v| *v < 10));
        }
        assert_eq!(exit_threads(threads, &coord), 0);
        assert!(stream.coordinator().should_stop());
        assert!(stream.coordinator().error().is_none());
    }

    #[test]
    fn decode_failure_stops_the_pipeline() {
        let dir  = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad");
        let mut writer = RecordWriter::create(&path).unwrap();
        writer.write(b"xy").unwrap();
        writer.finish().unwrap();

        let options = PipelineOptions::new(1)
            .with_mode(Mode::Eval)
            .with_min_examples(0)
            .with_num_epochs(1);
        let mut stream = batch_inputs(decode, vec![path], &options).unwrap();
        let (threads, coord) = init_threads(&mut stream);

        let err = stream.next_batch().unwrap_err();
        assert!(matches!(err, DataError::Pipeline { .. }));
        exit_threads(threads, &coord);
    }

    #[test]
    fn zero_batch_size_still_produces_batches() {
        let dir   = tempfile::tempdir().unwrap();
        let files = vec![write_file(dir.path(), "a", 0..10)];
        let options = PipelineOptions::new(0).with_min_examples(5).with_seed(2);
        let mut stream = batch_inputs(decode, files, &options).unwrap();
        let (threads, coord) = init_threads(&mut stream);

        assert_eq!(stream.batch_size(), 1);
        for _ in 0..3 {
            assert_eq!(stream.next_batch().unwrap().unwrap().len(), 1);
        }
        assert_eq!(exit_threads(threads, &coord), 0);
    }

    #[test]
    fn empty_file_list_is_rejected() {
        let result = batch_inputs(decode, Vec::new(), &PipelineOptions::new(1));
        assert!(matches!(result, Err(DataError::NoInputFiles)));
    }
}
