use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use burn::{prelude::*, tensor::activation::softmax};
use image::RgbImage;

use crate::{
    dataset::{ROAD_CLASS, file_name, image_to_batch, list_images, load_resized_image},
    error::{FcnError, FcnResult},
    model::FcnVgg,
};

/// Overlay colour painted over road pixels.
pub const ROAD_OVERLAY: [u8; 3] = [0, 255, 0];
/// Overlay opacity out of 255.
pub const ROAD_OVERLAY_ALPHA: u8 = 127;

const ROAD_THRESHOLD: f64 = 0.5;

/// Road mask of a single image already resized to the model's input shape.
///
/// Both sides of the image must be multiples of 32.
pub fn segment_image<B: Backend>(
    model: &FcnVgg<B>,
    image: &RgbImage,
    device: &B::Device,
) -> FcnResult<Vec<bool>> {
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 || width % 32 != 0 || height % 32 != 0 {
        return Err(FcnError::Config(format!(
            "image sides must be positive multiples of 32, got {}x{}",
            width, height
        )));
    }

    let logits = model.forward(image_to_batch::<B>(image, device));
    let road = softmax(logits, 1).narrow(1, ROAD_CLASS as usize, 1);

    road.greater_elem(ROAD_THRESHOLD)
        .into_data()
        .to_vec::<bool>()
        .map_err(|e| FcnError::TensorData(format!("{:?}", e)))
}

/// Blend [ROAD_OVERLAY] into every pixel flagged in `mask`.
pub fn overlay_segmentation(image: &RgbImage, mask: &[bool]) -> RgbImage {
    let alpha = ROAD_OVERLAY_ALPHA as u32;
    let mut street = image.clone();

    for (pixel, _) in street.pixels_mut().zip(mask).filter(|(_, road)| **road) {
        for (channel, overlay) in pixel.0.iter_mut().zip(ROAD_OVERLAY) {
            let blended = (overlay as u32 * alpha + *channel as u32 * (255 - alpha) + 127) / 255;
            *channel = blended as u8;
        }
    }

    street
}

/// Segment every image in `data_dir/data_road/testing/image_2` and write the overlays to a
/// fresh `runs_dir/<unix seconds>` directory, which is returned.
pub fn save_inference_samples<B: Backend>(
    runs_dir: &Path,
    data_dir: &Path,
    model: &FcnVgg<B>,
    image_shape: [usize; 2],
    device: &B::Device,
) -> FcnResult<PathBuf> {
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or_default();
    let output_dir = runs_dir.join(timestamp.to_string());

    if output_dir.exists() {
        std::fs::remove_dir_all(&output_dir).map_err(|e| FcnError::io(&output_dir, e))?;
    }
    std::fs::create_dir_all(&output_dir).map_err(|e| FcnError::io(&output_dir, e))?;

    tracing::info!("Saving test images to: {}", output_dir.display());

    let test_dir = data_dir.join("data_road").join("testing").join("image_2");
    for image_path in list_images(&test_dir)? {
        let image = load_resized_image(&image_path, image_shape)?;
        let mask = segment_image(model, &image, device)?;

        let output_path = output_dir.join(file_name(&image_path));
        overlay_segmentation(&image, &mask)
            .save(&output_path)
            .map_err(|source| FcnError::Image {
                path: output_path.clone(),
                source,
            })?;
        tracing::debug!("Wrote {}", output_path.display());
    }

    Ok(output_dir)
}
