// ============================================================
// In-Memory Data with Epoch Cursors
// ============================================================
// Holds the train / valid / test partitions and one cursor per
// partition. Batches are served in order from the cursor.
//
// Train:  overrunning the partition finishes the epoch: the
//         partition is reshuffled (images and labels with the
//         same permutation) and the batch restarts at 0.
// Valid/test: no reshuffle. Overrunning clamps the batch to a
//         single example, so callers must read back the effective
//         batch size. A cursor already past the end restarts at 0.

use burn::prelude::*;
use rand::{rngs::StdRng, seq::SliceRandom};

use crate::data::image::{img_norm, Image};
use crate::data::source::DataSource;
use crate::data::splitter::split_train_valid;
use crate::error::DataError;

pub const DEFAULT_VALID_PERCENT: f64 = 0.2;
pub const DEFAULT_TEST_PERCENT: f64 = 0.15;

/// A batch of labels and normalized images.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch<L> {
    pub labels: Vec<L>,
    /// One `[-1, 1]` vector per image, channel-major.
    pub images: Vec<Vec<f32>>,
    pub image_shape: [usize; 3],
}

impl<L> Batch<L> {
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Stack the images into a `[batch, channels, height, width]` tensor.
    /// Every image must hold `image_shape` worth of values.
    pub fn images_tensor<B: Backend>(&self, device: &B::Device) -> Result<Tensor<B, 4>, DataError> {
        let [c, h, w] = self.image_shape;
        let expected = c * h * w;
        if let Some(image) = self.images.iter().find(|image| image.len() != expected) {
            return Err(DataError::BadImage { shape: self.image_shape, expected, found: image.len() });
        }
        let flat: Vec<f32> = self.images.iter().flatten().copied().collect();
        Ok(Tensor::<B, 1>::from_floats(flat.as_slice(), device).reshape([self.images.len(), c, h, w]))
    }
}

impl Batch<usize> {
    pub fn labels_tensor<B: Backend>(&self, device: &B::Device) -> Tensor<B, 1, Int> {
        let labels: Vec<i32> = self.labels.iter().map(|&l| l as i32).collect();
        Tensor::<B, 1, Int>::from_ints(labels.as_slice(), device)
    }
}

/// A validation or test batch together with the cursor position
/// after the call and the batch size actually served.
#[derive(Debug, Clone, PartialEq)]
pub struct EvalBatch<L> {
    pub batch:      Batch<L>,
    pub cursor:     usize,
    pub batch_size: usize,
}

/// In-memory partitions and their cursors.
pub struct Data<L> {
    train_images: Vec<Image>,
    train_labels: Vec<L>,
    valid_images: Vec<Image>,
    valid_labels: Vec<L>,
    test_images:  Vec<Image>,
    test_labels:  Vec<L>,

    train_epochs_completed: usize,
    index_in_train_epoch:   usize,
    index_in_valid_epoch:   usize,
    index_in_test_epoch:    usize,

    rng: StdRng,
}

impl<L: Clone> Data<L> {
    /// Load from `source` and split the training pool into train and
    /// validation partitions.
    pub fn new<S: DataSource<L>>(
        source:        &S,
        valid_percent: f64,
        test_percent:  f64,
        rng:           StdRng,
    ) -> Result<Self, DataError> {
        let loaded = source.load_data(test_percent)?;
        loaded.check()?;
        let (train_images, valid_images) = split_train_valid(loaded.train_images, valid_percent);
        let (train_labels, valid_labels) = split_train_valid(loaded.train_labels, valid_percent);

        tracing::info!(
            "Data loaded: {} train, {} valid, {} test",
            train_labels.len(),
            valid_labels.len(),
            loaded.test_labels.len(),
        );

        Ok(Self {
            train_images,
            train_labels,
            valid_images,
            valid_labels,
            test_images: loaded.test_images,
            test_labels: loaded.test_labels,
            train_epochs_completed: 0,
            index_in_train_epoch: 0,
            index_in_valid_epoch: 0,
            index_in_test_epoch: 0,
            rng,
        })
    }

    pub fn with_defaults<S: DataSource<L>>(source: &S, rng: StdRng) -> Result<Self, DataError> {
        Self::new(source, DEFAULT_VALID_PERCENT, DEFAULT_TEST_PERCENT, rng)
    }

    pub fn num_train_images(&self) -> usize {
        self.train_labels.len()
    }

    pub fn num_valid_images(&self) -> usize {
        self.valid_labels.len()
    }

    pub fn num_test_images(&self) -> usize {
        self.test_labels.len()
    }

    pub fn train_epochs_completed(&self) -> usize {
        self.train_epochs_completed
    }

    /// Image shape of the first training image, if any.
    pub fn image_shape(&self) -> Option<[usize; 3]> {
        self.train_images
            .first()
            .or_else(|| self.valid_images.first())
            .or_else(|| self.test_images.first())
            .map(Image::shape)
    }

    /// Next `batch_size` training examples.
    pub fn next_train_batch(&mut self, batch_size: usize) -> Result<Batch<L>, DataError> {
        let num_train = self.num_train_images();
        let mut start = self.index_in_train_epoch;
        self.index_in_train_epoch += batch_size;

        if self.index_in_train_epoch > num_train {
            if batch_size > num_train {
                return Err(DataError::BatchTooLarge {
                    partition: "train",
                    batch_size,
                    size: num_train,
                });
            }
            self.train_epochs_completed += 1;
            self.shuffle_train();
            start = 0;
            self.index_in_train_epoch = batch_size;
        }

        let end = self.index_in_train_epoch;
        Ok(make_batch(&self.train_images[start..end], &self.train_labels[start..end]))
    }

    /// Next validation batch. See the module notes for clamping.
    pub fn next_valid_batch(&mut self, batch_size: usize) -> EvalBatch<L> {
        next_eval_batch(
            &self.valid_images,
            &self.valid_labels,
            &mut self.index_in_valid_epoch,
            batch_size,
        )
    }

    /// Next test batch. See the module notes for clamping.
    pub fn next_test_batch(&mut self, batch_size: usize) -> EvalBatch<L> {
        tracing::debug!("Test cursor at {}", self.index_in_test_epoch);
        next_eval_batch(
            &self.test_images,
            &self.test_labels,
            &mut self.index_in_test_epoch,
            batch_size,
        )
    }

    fn shuffle_train(&mut self) {
        let mut perm: Vec<usize> = (0..self.num_train_images()).collect();
        perm.shuffle(&mut self.rng);
        self.train_images = perm.iter().map(|&i| self.train_images[i].clone()).collect();
        self.train_labels = perm.iter().map(|&i| self.train_labels[i].clone()).collect();
    }
}

fn next_eval_batch<L: Clone>(
    images:     &[Image],
    labels:     &[L],
    cursor:     &mut usize,
    batch_size: usize,
) -> EvalBatch<L> {
    let size = labels.len();
    if *cursor > size {
        *cursor = 0;
    }
    let start = *cursor;
    let batch_size = if start + batch_size > size { 1 } else { batch_size };
    *cursor += batch_size;
    let end = *cursor;

    let (lo, hi) = (start.min(size), end.min(size));
    EvalBatch {
        batch: make_batch(&images[lo..hi], &labels[lo..hi]),
        cursor: end,
        batch_size,
    }
}

fn make_batch<L: Clone>(images: &[Image], labels: &[L]) -> Batch<L> {
    Batch {
        labels:      labels.to_vec(),
        images:      images.iter().map(|img| img_norm(img.pixels())).collect(),
        image_shape: images.first().map(Image::shape).unwrap_or([0, 0, 0]),
    }
}

/// Number of full training batches in one epoch.
pub fn batches_per_epoch(num_train: usize, batch_size: usize) -> usize {
    if batch_size == 0 {
        return 0;
    }
    num_train / batch_size
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::source::{InMemorySource, LoadedData};
    use burn::backend::NdArray;
    use rand::SeedableRng;
    use std::collections::BTreeSet;

    /// Pool of `n` single-pixel images whose label equals the pixel.
    fn data(pool: usize, test: usize, valid_percent: f64) -> Data<usize> {
        let img = |i: usize| Image::new([1, 1, 1], vec![i as u8]).unwrap();
        let source = InMemorySource::new((0..pool).map(img).collect(), (0..pool).collect())
            .with_test_set((100..100 + test).map(img).collect(), (100..100 + test).collect());
        Data::new(&source, valid_percent, 0.0, StdRng::seed_from_u64(0)).unwrap()
    }

    #[test]
    fn partition_sizes_follow_fractions() {
        let d = data(10, 3, 0.2);
        assert_eq!(d.num_train_images(), 8);
        assert_eq!(d.num_valid_images(), 2);
        assert_eq!(d.num_test_images(), 3);
    }

    #[test]
    fn train_batches_cover_each_element_once_per_epoch() {
        let mut d = data(12, 0, 0.0);
        for epoch in 0..3 {
            let mut seen = BTreeSet::new();
            for _ in 0..4 {
                let batch = d.next_train_batch(3).unwrap();
                assert_eq!(batch.len(), 3);
                seen.extend(batch.labels);
            }
            assert_eq!(seen.len(), 12, "epoch {epoch}");
            // the rollover happens on the first batch of the next epoch
            assert_eq!(d.train_epochs_completed(), epoch);
        }
    }

    #[test]
    fn labels_stay_paired_with_images_after_shuffle() {
        let mut d = data(6, 0, 0.0);
        for _ in 0..10 {
            let batch = d.next_train_batch(4).unwrap();
            for (label, image) in batch.labels.iter().zip(&batch.images) {
                let expected = img_norm(&[*label as u8])[0];
                assert_eq!(image[0], expected);
            }
        }
    }

    #[test]
    fn oversized_train_batch_is_rejected() {
        let mut d = data(4, 0, 0.0);
        let err = d.next_train_batch(5).unwrap_err();
        assert!(matches!(err, DataError::BatchTooLarge { batch_size: 5, size: 4, .. }));
    }

    #[test]
    fn valid_batch_clamps_to_one_on_overrun() {
        let mut d = data(10, 0, 0.5);
        let first = d.next_valid_batch(4);
        assert_eq!((first.batch_size, first.cursor), (4, 4));
        assert_eq!(first.batch.labels, vec![0, 1, 2, 3]);

        // 4 + 4 > 5 → one example, cursor moves by one
        let second = d.next_valid_batch(4);
        assert_eq!((second.batch_size, second.cursor), (1, 5));
        assert_eq!(second.batch.labels, vec![4]);
    }

    #[test]
    fn exhausted_eval_cursor_restarts() {
        let mut d = data(0, 2, 0.0);
        assert_eq!(d.next_test_batch(2).cursor, 2);
        let past_end = d.next_test_batch(2);
        assert!(past_end.batch.is_empty());
        assert_eq!(past_end.cursor, 3);
        let restarted = d.next_test_batch(2);
        assert_eq!(restarted.batch.labels, vec![100, 101]);
    }

    #[test]
    fn batch_converts_to_tensors() {
        let mut d = data(4, 0, 0.0);
        let batch  = d.next_train_batch(2).unwrap();
        let device = Default::default();
        let images = batch.images_tensor::<NdArray>(&device).unwrap();
        assert_eq!(images.dims(), [2, 1, 1, 1]);
        assert_eq!(batch.labels_tensor::<NdArray>(&device).dims(), [2]);
    }

    struct RaggedSource;

    impl DataSource<usize> for RaggedSource {
        fn load_data(&self, _test_percent: f64) -> Result<LoadedData<usize>, DataError> {
            // built directly, skipping LoadedData::new
            Ok(LoadedData {
                train_images: vec![
                    Image::new([1, 1, 1], vec![0]).unwrap(),
                    Image::new([1, 2, 1], vec![0, 0]).unwrap(),
                ],
                train_labels: vec![0, 1],
                test_images:  vec![],
                test_labels:  vec![],
            })
        }
    }

    #[test]
    fn mixed_shapes_fail_to_load() {
        let result = Data::new(&RaggedSource, 0.0, 0.0, StdRng::seed_from_u64(0));
        assert!(matches!(result, Err(DataError::MixedShapes { index: 1, .. })));
    }

    #[test]
    fn ragged_batch_is_an_error_not_a_panic() {
        let batch = Batch { labels: vec![0usize, 1], images: vec![vec![0.0], vec![0.0, 0.5]], image_shape: [1, 1, 1] };
        let err = batch.images_tensor::<NdArray>(&Default::default()).unwrap_err();
        assert!(matches!(err, DataError::BadImage { expected: 1, found: 2, .. }));
    }

    #[test]
    fn batches_per_epoch_rounds_down() {
        assert_eq!(batches_per_epoch(10, 3), 3);
        assert_eq!(batches_per_epoch(10, 0), 0);
    }
}
