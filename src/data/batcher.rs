// ============================================================
// Image Batcher
// ============================================================
// Implements burn's Batcher trait: a Vec<ImageItem> becomes one
// normalized `[N, C, H, W]` float tensor plus `[N]` labels.
// All images in a batch must share a shape: `try_batch` checks
// this, the Batcher impl assumes it.

use burn::{
    data::dataloader::batcher::Batcher,
    prelude::*,
};

use crate::data::dataset::ImageItem;
use crate::data::image::img_norm;
use crate::data::source::check_shapes;
use crate::error::DataError;

#[derive(Debug, Clone)]
pub struct ImageBatch<B: Backend> {
    /// Normalized images, shape [batch, channels, height, width]
    pub images: Tensor<B, 4>,
    /// Class labels, shape [batch]
    pub labels: Tensor<B, 1, Int>,
}

#[derive(Clone, Debug)]
pub struct ImageBatcher<B: Backend> {
    pub device: B::Device,
}

impl<B: Backend> ImageBatcher<B> {
    pub fn new(device: B::Device) -> Self {
        Self { device }
    }

    /// Like `batch`, but items of differing shapes are an error.
    pub fn try_batch(&self, items: Vec<ImageItem>) -> Result<ImageBatch<B>, DataError> {
        check_shapes(items.iter().map(|item| &item.image))?;
        Ok(self.batch(items))
    }
}

impl<B: Backend> Batcher<ImageItem, ImageBatch<B>> for ImageBatcher<B> {
    /// # Panics
    /// When the items do not share one image shape.
    fn batch(&self, items: Vec<ImageItem>) -> ImageBatch<B> {
        let batch_size = items.len();
        let [c, h, w] = items.first().map(|i| i.image.shape()).unwrap_or([0, 0, 0]);

        let pixels: Vec<f32> = items
            .iter()
            .flat_map(|item| img_norm(item.image.pixels()))
            .collect();
        let labels: Vec<i32> = items.iter().map(|item| item.label as i32).collect();

        let images = Tensor::<B, 1>::from_floats(pixels.as_slice(), &self.device)
            .reshape([batch_size, c, h, w]);
        let labels = Tensor::<B, 1, Int>::from_ints(labels.as_slice(), &self.device);

        ImageBatch { images, labels }
    }
}
