// ============================================================
// PackUseCase / StreamUseCase
// ============================================================
// The record-file side of the data layer:
//
//   pack:    SyntheticSource → ImageDataset → N shard files
//            (one JSON-encoded ImageItem per record, dealt
//            round-robin over the shards)
//
//   stream:  shard files → batch_inputs (reader + decoder
//            threads) → ImageBatcher → [N, C, H, W] tensors
//
// Streaming in eval mode reads every record once per epoch and
// stops on its own; train mode cycles forever, so a batch limit
// is required there.

use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use burn::{backend::NdArray, data::dataset::Dataset};
use serde::{Deserialize, Serialize};

use crate::data::{
    batcher::ImageBatcher,
    dataset::{ImageDataset, ImageItem},
    stream::{batch_inputs, exit_threads, init_threads, Mode, PipelineOptions, RecordWriter},
    DataSource, SyntheticSource,
};

pub const RECORD_EXTENSION: &str = "rec";

// ─── Pack ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackConfig {
    pub output_dir: PathBuf,
    pub num_files:  usize,
    pub count:      usize,
    pub channels:   usize,
    pub size:       usize,
    pub seed:       u64,
}

pub struct PackUseCase {
    config: PackConfig,
}

impl PackUseCase {
    pub fn new(config: PackConfig) -> Self {
        Self { config }
    }

    /// Write the shards. Returns their paths.
    pub fn execute(&self) -> Result<Vec<PathBuf>> {
        let cfg = &self.config;
        anyhow::ensure!(cfg.num_files > 0, "At least one record file is needed");

        let source = SyntheticSource::new(cfg.count, cfg.channels, cfg.size, cfg.seed);
        let loaded = source.load_data(0.0)?;
        let dataset = ImageDataset::new(loaded.train_images, loaded.train_labels);
        tracing::info!("Packing {} images into {} files", dataset.sample_count(), cfg.num_files);

        fs::create_dir_all(&cfg.output_dir)
            .with_context(|| format!("Cannot create '{}'", cfg.output_dir.display()))?;
        let paths: Vec<PathBuf> = (0..cfg.num_files)
            .map(|i| cfg.output_dir.join(format!("shard_{i:03}.{RECORD_EXTENSION}")))
            .collect();
        let mut writers = paths
            .iter()
            .map(RecordWriter::create)
            .collect::<Result<Vec<_>, _>>()?;

        for (i, item) in dataset.iter().enumerate() {
            let payload = serde_json::to_vec(&item)?;
            writers[i % cfg.num_files].write(&payload)?;
        }
        for (writer, path) in writers.into_iter().zip(&paths) {
            let written = writer.finish()?;
            tracing::debug!("{}: {} records", path.display(), written);
        }
        Ok(paths)
    }
}

/// Every `*.rec` file in `dir`, sorted by name.
pub fn record_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files: Vec<PathBuf> = fs::read_dir(dir)
        .with_context(|| format!("Cannot read directory '{}'", dir.display()))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.extension().is_some_and(|ext| ext == RECORD_EXTENSION))
        .collect();
    files.sort();
    Ok(files)
}

// ─── Stream ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    pub input_dir:    PathBuf,
    pub batch_size:   usize,
    pub num_readers:  usize,
    pub num_threads:  usize,
    pub min_examples: usize,
    /// Train mode shuffles and cycles; eval mode reads in order.
    pub train:        bool,
    pub num_epochs:   Option<usize>,
    pub max_batches:  Option<usize>,
    pub seed:         Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamReport {
    pub batches:     usize,
    pub examples:    usize,
    pub batch_shape: Option<[usize; 4]>,
    /// Threads that ignored the stop request.
    pub stragglers:  usize,
}

pub struct StreamUseCase {
    config: StreamConfig,
}

impl StreamUseCase {
    pub fn new(config: StreamConfig) -> Self {
        Self { config }
    }

    pub fn execute(&self) -> Result<StreamReport> {
        let cfg = &self.config;
        if cfg.train && cfg.max_batches.is_none() && cfg.num_epochs.is_none() {
            anyhow::bail!("Train mode cycles forever; set a batch limit or an epoch count");
        }

        let files = record_files(&cfg.input_dir)?;
        let mut options = PipelineOptions::new(cfg.batch_size)
            .with_mode(if cfg.train { Mode::Train } else { Mode::Eval })
            .with_threads(cfg.num_readers, cfg.num_threads)
            .with_min_examples(cfg.min_examples)
            .with_smaller_final_batch(!cfg.train);
        if let Some(epochs) = cfg.num_epochs {
            options = options.with_num_epochs(epochs);
        }
        if let Some(seed) = cfg.seed {
            options = options.with_seed(seed);
        }

        let decode = |payload: Vec<u8>| serde_json::from_slice::<ImageItem>(&payload);
        let mut stream = batch_inputs(decode, files, &options)?;
        let (threads, coord) = init_threads(&mut stream);

        let batcher = ImageBatcher::<NdArray>::new(Default::default());
        let mut report = StreamReport::default();
        let outcome: Result<()> = (|| {
            while cfg.max_batches.map_or(true, |max| report.batches < max) {
                let Some(items) = stream.next_batch()? else { break };
                let batch = batcher.try_batch(items)?;
                let dims = batch.images.dims();
                tracing::debug!("Batch {}: images {:?}", report.batches + 1, dims);
                report.batches += 1;
                report.examples += dims[0];
                if report.batch_shape.is_none() {
                    report.batch_shape = Some(dims);
                }
            }
            Ok(())
        })();

        report.stragglers = exit_threads(threads, &coord);
        outcome?;
        tracing::info!("Streamed {} batches ({} examples)", report.batches, report.examples);
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pack(dir: &Path, count: usize, num_files: usize) -> Vec<PathBuf> {
        PackUseCase::new(PackConfig {
            output_dir: dir.to_path_buf(),
            num_files,
            count,
            channels: 1,
            size: 4,
            seed: 5,
        })
        .execute()
        .unwrap()
    }

    fn stream_config(dir: &Path) -> StreamConfig {
        StreamConfig {
            input_dir:    dir.to_path_buf(),
            batch_size:   4,
            num_readers:  2,
            num_threads:  2,
            min_examples: 8,
            train:        false,
            num_epochs:   Some(1),
            max_batches:  None,
            seed:         Some(1),
        }
    }

    #[test]
    fn pack_deals_records_over_shards() {
        let dir = tempfile::tempdir().unwrap();
        let paths = pack(dir.path(), 10, 3);
        assert_eq!(paths.len(), 3);
        assert_eq!(record_files(dir.path()).unwrap(), paths);

        let counts: Vec<usize> = paths
            .iter()
            .map(|p| crate::data::stream::RecordReader::open(p).unwrap().count())
            .collect();
        assert_eq!(counts, vec![4, 3, 3]);
    }

    #[test]
    fn eval_stream_reads_every_image_once() {
        let dir = tempfile::tempdir().unwrap();
        pack(dir.path(), 10, 3);

        let report = StreamUseCase::new(stream_config(dir.path())).execute().unwrap();
        assert_eq!(report.examples, 10);
        assert_eq!(report.batches, 3);
        assert_eq!(report.batch_shape, Some([4, 1, 4, 4]));
        assert_eq!(report.stragglers, 0);
    }

    #[test]
    fn train_stream_stops_at_the_batch_limit() {
        let dir = tempfile::tempdir().unwrap();
        pack(dir.path(), 6, 2);

        let mut config = stream_config(dir.path());
        config.train = true;
        config.num_epochs = None;
        config.max_batches = Some(5);
        let report = StreamUseCase::new(config).execute().unwrap();
        assert_eq!(report.batches, 5);
        assert_eq!(report.examples, 20);
    }

    #[test]
    fn mixed_shape_records_fail_the_stream() {
        use crate::data::image::Image;
        use crate::error::DataError;

        let dir = tempfile::tempdir().unwrap();
        let mut writer = RecordWriter::create(dir.path().join("mixed.rec")).unwrap();
        for (shape, label) in [([1, 2, 2], 0), ([1, 1, 1], 1)] {
            let pixels = vec![0; shape.iter().product()];
            let item = ImageItem { image: Image::new(shape, pixels).unwrap(), label };
            writer.write(&serde_json::to_vec(&item).unwrap()).unwrap();
        }
        writer.finish().unwrap();

        let mut config = stream_config(dir.path());
        config.batch_size = 2;
        config.num_readers = 1;
        config.num_threads = 1;
        let err = StreamUseCase::new(config).execute().unwrap_err();
        assert!(matches!(err.downcast_ref::<DataError>(), Some(DataError::MixedShapes { .. })));
    }

    #[test]
    fn unbounded_train_stream_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = stream_config(dir.path());
        config.train = true;
        config.num_epochs = None;
        assert!(StreamUseCase::new(config).execute().is_err());
    }
}
