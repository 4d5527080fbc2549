// ============================================================
// Data Sources
// ============================================================
// A DataSource hands `Data` everything it needs in one call:
// the training pool and the test set. Sources that do not keep a
// separate test set carve one off the end of the pool using
// `test_percent`.

use rand::{rngs::StdRng, Rng, SeedableRng};

use crate::data::image::Image;
use crate::data::splitter::split_test;
use crate::error::DataError;

/// Everything a source loads into memory.
#[derive(Debug, Clone)]
pub struct LoadedData<L> {
    pub train_images: Vec<Image>,
    pub train_labels: Vec<L>,
    pub test_images:  Vec<Image>,
    pub test_labels:  Vec<L>,
}

impl<L> LoadedData<L> {
    pub fn new(
        train_images: Vec<Image>,
        train_labels: Vec<L>,
        test_images:  Vec<Image>,
        test_labels:  Vec<L>,
    ) -> Result<Self, DataError> {
        let loaded = Self { train_images, train_labels, test_images, test_labels };
        loaded.check()?;
        Ok(loaded)
    }

    /// Every image has a label and all images share one shape.
    pub fn check(&self) -> Result<(), DataError> {
        check_lengths(&self.train_images, &self.train_labels)?;
        check_lengths(&self.test_images, &self.test_labels)?;
        check_shapes(self.train_images.iter().chain(&self.test_images))?;
        Ok(())
    }
}

/// The shape shared by all `images`, or `None` when there are none.
pub fn check_shapes<'a>(images: impl IntoIterator<Item = &'a Image>) -> Result<Option<[usize; 3]>, DataError> {
    let mut expected = None;
    for (index, image) in images.into_iter().enumerate() {
        match expected {
            None => expected = Some(image.shape()),
            Some(shape) if shape != image.shape() => {
                return Err(DataError::MixedShapes { index, expected: shape, found: image.shape() });
            }
            Some(_) => {}
        }
    }
    Ok(expected)
}

fn check_lengths<L>(images: &[Image], labels: &[L]) -> Result<(), DataError> {
    if images.len() != labels.len() {
        return Err(DataError::LengthMismatch { images: images.len(), labels: labels.len() });
    }
    Ok(())
}

/// Anything that can load a labelled image set into memory.
pub trait DataSource<L> {
    fn load_data(&self, test_percent: f64) -> Result<LoadedData<L>, DataError>;
}

// ─── InMemorySource ───────────────────────────────────────────────────────────

/// Images already in memory. Without an explicit test set the last
/// `test_percent` of the pool becomes the test set.
#[derive(Debug, Clone)]
pub struct InMemorySource<L> {
    images: Vec<Image>,
    labels: Vec<L>,
    test:   Option<(Vec<Image>, Vec<L>)>,
}

impl<L: Clone> InMemorySource<L> {
    pub fn new(images: Vec<Image>, labels: Vec<L>) -> Self {
        Self { images, labels, test: None }
    }

    pub fn with_test_set(mut self, images: Vec<Image>, labels: Vec<L>) -> Self {
        self.test = Some((images, labels));
        self
    }
}

impl<L: Clone> DataSource<L> for InMemorySource<L> {
    fn load_data(&self, test_percent: f64) -> Result<LoadedData<L>, DataError> {
        check_lengths(&self.images, &self.labels)?;
        match &self.test {
            Some((test_images, test_labels)) => LoadedData::new(
                self.images.clone(),
                self.labels.clone(),
                test_images.clone(),
                test_labels.clone(),
            ),
            None => {
                let (train_images, test_images) = split_test(self.images.clone(), test_percent);
                let (train_labels, test_labels) = split_test(self.labels.clone(), test_percent);
                LoadedData::new(train_images, train_labels, test_images, test_labels)
            }
        }
    }
}

// ─── SyntheticSource ──────────────────────────────────────────────────────────

/// A seeded two-class image set: label 1 when the top half of the
/// image is brighter than the bottom half, label 0 otherwise.
#[derive(Debug, Clone)]
pub struct SyntheticSource {
    pub count:    usize,
    pub channels: usize,
    pub size:     usize,
    pub seed:     u64,
}

impl SyntheticSource {
    pub fn new(count: usize, channels: usize, size: usize, seed: u64) -> Self {
        Self { count, channels, size, seed }
    }

    fn sample(&self, rng: &mut StdRng) -> Result<(Image, usize), DataError> {
        let label: usize = rng.gen_range(0..2);
        let half = self.size / 2;
        let mut pixels = Vec::with_capacity(self.channels * self.size * self.size);
        for _ in 0..self.channels {
            for row in 0..self.size {
                let bright = (row < half) == (label == 1);
                for _ in 0..self.size {
                    let base: u8 = if bright { 160 } else { 40 };
                    pixels.push(base.saturating_add(rng.gen_range(0..64)));
                }
            }
        }
        Ok((Image::new([self.channels, self.size, self.size], pixels)?, label))
    }
}

impl DataSource<usize> for SyntheticSource {
    fn load_data(&self, test_percent: f64) -> Result<LoadedData<usize>, DataError> {
        let mut rng = StdRng::seed_from_u64(self.seed);
        let (images, labels): (Vec<_>, Vec<_>) = (0..self.count)
            .map(|_| self.sample(&mut rng))
            .collect::<Result<Vec<_>, _>>()?
            .into_iter()
            .unzip();
        InMemorySource::new(images, labels).load_data(test_percent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mixed_image_shapes_are_rejected() {
        let small = Image::new([1, 2, 2], vec![0; 4]).unwrap();
        let large = Image::new([1, 3, 3], vec![0; 9]).unwrap();

        let err = LoadedData::new(vec![small.clone(), large.clone()], vec![0, 1], vec![], vec![]).unwrap_err();
        assert!(matches!(err, DataError::MixedShapes { index: 1, expected: [1, 2, 2], found: [1, 3, 3] }));

        // the test set has to match the training pool too
        let err = LoadedData::new(vec![small], vec![0], vec![large], vec![1]).unwrap_err();
        assert!(matches!(err, DataError::MixedShapes { index: 1, .. }));
    }

    #[test]
    fn in_memory_source_carves_test_set() {
        let images: Vec<Image> = (0..20).map(|i| Image::new([1, 1, 1], vec![i]).unwrap()).collect();
        let labels: Vec<u8>    = (0..20).collect();
        let loaded = InMemorySource::new(images, labels).load_data(0.15).unwrap();
        assert_eq!(loaded.test_labels, vec![17, 18, 19]);
        assert_eq!(loaded.train_labels.len(), 17);
    }

    #[test]
    fn explicit_test_set_is_kept() {
        let img = || Image::new([1, 1, 1], vec![0]).unwrap();
        let loaded = InMemorySource::new(vec![img(), img()], vec![0, 1])
            .with_test_set(vec![img()], vec![2])
            .load_data(0.5)
            .unwrap();
        assert_eq!(loaded.train_labels, vec![0, 1]);
        assert_eq!(loaded.test_labels, vec![2]);
    }

    #[test]
    fn mismatched_lengths_are_rejected() {
        let img = Image::new([1, 1, 1], vec![0]).unwrap();
        let err = InMemorySource::new(vec![img], vec![0, 1]).load_data(0.0).unwrap_err();
        assert!(matches!(err, DataError::LengthMismatch { images: 1, labels: 2 }));
    }

    #[test]
    fn synthetic_source_is_seeded() {
        let a = SyntheticSource::new(10, 1, 4, 3).load_data(0.2).unwrap();
        let b = SyntheticSource::new(10, 1, 4, 3).load_data(0.2).unwrap();
        assert_eq!(a.train_labels, b.train_labels);
        assert_eq!(a.train_images, b.train_images);
        assert_eq!(a.train_images[0].shape(), [1, 4, 4]);
    }
}
