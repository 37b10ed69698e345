use burn::{data::dataloader::batcher::Batcher, prelude::*};
use image::RgbImage;

use super::kitti::SegmentationItem;

#[derive(Clone)]
pub struct SegmentationBatcher<B: Backend> {
    device: B::Device,
    image_shape: [usize; 2],
}

impl<B: Backend> SegmentationBatcher<B> {
    pub fn new(device: B::Device, image_shape: [usize; 2]) -> Self {
        Self {
            device,
            image_shape,
        }
    }
}

#[derive(Clone, Debug)]
pub struct SegmentationBatch<B: Backend> {
    /// `[batch, 3, height, width]`, raw 0-255 pixel values.
    pub images: Tensor<B, 4, Float>,
    /// `[batch, 1, height, width]` class indices.
    pub masks: Tensor<B, 4, Int>,
}

/// `[3, height, width]` float tensor from interleaved RGB bytes.
pub fn rgb_to_tensor<B: Backend>(
    pixels: &[u8],
    image_shape: [usize; 2],
    device: &B::Device,
) -> Tensor<B, 3> {
    let [height, width] = image_shape;
    assert_eq!(
        pixels.len(),
        height * width * 3,
        "Expected {}x{} RGB pixels, got {} bytes",
        height,
        width,
        pixels.len()
    );

    let data: Vec<f32> = pixels.iter().map(|&v| v as f32).collect();

    Tensor::<B, 3>::from_data(
        TensorData::new(data, Shape::new([height, width, 3])).convert::<B::FloatElem>(),
        device,
    )
    .permute([2, 0, 1])
}

/// `[1, 3, height, width]` batch holding a single image.
pub fn image_to_batch<B: Backend>(image: &RgbImage, device: &B::Device) -> Tensor<B, 4> {
    let (width, height) = image.dimensions();

    rgb_to_tensor::<B>(image.as_raw(), [height as usize, width as usize], device).unsqueeze()
}

impl<B: Backend> Batcher<SegmentationItem, SegmentationBatch<B>> for SegmentationBatcher<B> {
    fn batch(&self, items: Vec<SegmentationItem>) -> SegmentationBatch<B> {
        let [height, width] = self.image_shape;

        let mut images = Vec::with_capacity(items.len());
        let mut masks = Vec::with_capacity(items.len());

        for item in items {
            images.push(rgb_to_tensor::<B>(&item.image, self.image_shape, &self.device));

            let classes: Vec<i32> = item.mask.iter().map(|&c| c as i32).collect();
            masks.push(Tensor::<B, 3, Int>::from_data(
                TensorData::new(classes, Shape::new([1, height, width]))
                    .convert::<B::IntElem>(),
                &self.device,
            ));
        }

        let images: Tensor<B, 4> = Tensor::stack::<4>(images, 0);
        let masks: Tensor<B, 4, Int> = Tensor::stack::<4>(masks, 0);

        SegmentationBatch { images, masks }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type TestBackend = NdArray;

    fn item(value: u8, class: u8) -> SegmentationItem {
        SegmentationItem {
            name: format!("{value}.png"),
            image: vec![value; 2 * 4 * 3],
            mask: vec![class; 2 * 4],
        }
    }

    #[test]
    fn batches_images_channels_first() {
        let device = Default::default();
        let batcher = SegmentationBatcher::<TestBackend>::new(device, [2, 4]);

        let batch = batcher.batch(vec![item(10, 0), item(200, 1)]);

        assert_eq!(batch.images.dims(), [2, 3, 2, 4]);
        assert_eq!(batch.masks.dims(), [2, 1, 2, 4]);

        let second_sum = batch
            .images
            .clone()
            .narrow(0, 1, 1)
            .sum()
            .into_scalar()
            .elem::<f32>();
        assert!((second_sum - 200.0 * 24.0).abs() < 1e-3);

        let road_pixels = batch.masks.sum().into_scalar().elem::<i64>();
        assert_eq!(road_pixels, 8);
    }

    #[test]
    fn keeps_channel_order() {
        let device = Default::default();
        let image = RgbImage::from_pixel(2, 1, image::Rgb([1, 2, 3]));

        let tensor = image_to_batch::<TestBackend>(&image, &device);

        assert_eq!(tensor.dims(), [1, 3, 1, 2]);
        let values = tensor.into_data().to_vec::<f32>().unwrap();
        assert_eq!(values, vec![1.0, 1.0, 2.0, 2.0, 3.0, 3.0]);
    }
}
