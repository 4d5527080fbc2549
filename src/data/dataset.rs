use burn::data::dataset::Dataset;
use serde::{Deserialize, Serialize};

use crate::data::image::Image;

/// One labelled image, as served by `ImageDataset`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageItem {
    pub image: Image,
    pub label: usize,
}

/// A partition exposed through burn's `Dataset` trait, so burn's
/// `DataLoader` can iterate it alongside the cursor API on `Data`.
pub struct ImageDataset {
    items: Vec<ImageItem>,
}

impl ImageDataset {
    pub fn new(images: Vec<Image>, labels: Vec<usize>) -> Self {
        let items = images
            .into_iter()
            .zip(labels)
            .map(|(image, label)| ImageItem { image, label })
            .collect();
        Self { items }
    }

    pub fn sample_count(&self) -> usize {
        self.items.len()
    }
}

impl Dataset<ImageItem> for ImageDataset {
    fn get(&self, index: usize) -> Option<ImageItem> {
        self.items.get(index).cloned()
    }

    fn len(&self) -> usize {
        self.items.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dataset_pairs_images_with_labels() {
        let images = vec![
            Image::new([1, 1, 1], vec![3]).unwrap(),
            Image::new([1, 1, 1], vec![9]).unwrap(),
        ];
        let ds = ImageDataset::new(images, vec![0, 1]);
        assert_eq!(ds.len(), 2);
        assert_eq!(ds.get(1).unwrap().image.pixels(), &[9]);
        assert!(ds.get(2).is_none());
    }
}
