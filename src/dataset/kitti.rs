use std::collections::HashMap;
use std::path::{Path, PathBuf};

use burn::data::dataset::{Dataset, InMemDataset};
use image::{RgbImage, imageops::FilterType};

use crate::error::{FcnError, FcnResult};

/// Ground-truth colour of everything that is not road.
pub const BACKGROUND_COLOR: [u8; 3] = [255, 0, 0];

pub const BACKGROUND_CLASS: u8 = 0;
pub const ROAD_CLASS: u8 = 1;

const SUPPORTED_FILES: [&str; 3] = ["png", "jpg", "jpeg"];

/// One resized training example.
#[derive(Debug, Clone)]
pub struct SegmentationItem {
    pub name: String,
    /// Interleaved RGB, `height * width * 3` bytes.
    pub image: Vec<u8>,
    /// One class index per pixel, `height * width` bytes.
    pub mask: Vec<u8>,
}

/// The KITTI road training split (`image_2` + `gt_image_2`), loaded and resized up front.
pub struct KittiRoadDataset {
    dataset: InMemDataset<SegmentationItem>,
    image_shape: [usize; 2],
}

impl Dataset<SegmentationItem> for KittiRoadDataset {
    fn get(&self, index: usize) -> Option<SegmentationItem> {
        self.dataset.get(index)
    }

    fn len(&self) -> usize {
        self.dataset.len()
    }
}

impl KittiRoadDataset {
    /// Load `<root>/image_2/*.png` with the matching `<root>/gt_image_2/*_road_*.png`.
    pub fn training<P: AsRef<Path>>(root: P, image_shape: [usize; 2]) -> FcnResult<Self> {
        let root = root.as_ref();
        let images_dir = root.join("image_2");
        let gt_dir = root.join("gt_image_2");

        let label_paths: HashMap<String, PathBuf> = list_images(&gt_dir)?
            .into_iter()
            .filter_map(|path| {
                let name = path.file_name()?.to_string_lossy().into_owned();
                image_name_for_label(&name).map(|image_name| (image_name, path))
            })
            .collect();

        let mut pairs = Vec::new();
        for image_path in list_images(&images_dir)? {
            let name = file_name(&image_path);
            match label_paths.get(&name) {
                Some(gt_path) => pairs.push((image_path, gt_path.clone())),
                None => tracing::warn!("No road ground truth for {}, skipping", name),
            }
        }

        if pairs.is_empty() {
            return Err(FcnError::Dataset(format!(
                "No image/ground-truth pairs found under {}",
                root.display()
            )));
        }

        Self::new_with_pairs(pairs, image_shape)
    }

    /// Build a dataset from explicit `(image, ground truth)` paths.
    pub fn new_with_pairs<P: AsRef<Path>>(
        pairs: Vec<(P, P)>,
        image_shape: [usize; 2],
    ) -> FcnResult<Self> {
        let items = pairs
            .iter()
            .map(|(image_path, gt_path)| {
                let image = load_resized_image(image_path.as_ref(), image_shape)?;
                let gt_image = load_resized_label(gt_path.as_ref(), image_shape)?;

                Ok(SegmentationItem {
                    name: file_name(image_path.as_ref()),
                    image: image.into_raw(),
                    mask: gt_to_classes(&gt_image),
                })
            })
            .collect::<FcnResult<Vec<_>>>()?;

        tracing::info!("Loaded {} training samples", items.len());

        Ok(Self {
            dataset: InMemDataset::new(items),
            image_shape,
        })
    }

    pub fn image_shape(&self) -> [usize; 2] {
        self.image_shape
    }
}

/// Image file name a road ground-truth file labels: `um_road_000000.png` -> `um_000000.png`.
///
/// Lane annotations (`*_lane_*`) are not used.
pub fn image_name_for_label(label_name: &str) -> Option<String> {
    label_name
        .contains("_road_")
        .then(|| label_name.replacen("_road_", "_", 1))
}

/// Class index per pixel: background colour is [BACKGROUND_CLASS], anything else is road.
pub fn gt_to_classes(gt_image: &RgbImage) -> Vec<u8> {
    gt_image
        .pixels()
        .map(|pixel| {
            if pixel.0 == BACKGROUND_COLOR {
                BACKGROUND_CLASS
            } else {
                ROAD_CLASS
            }
        })
        .collect()
}

/// Sorted supported image files directly inside `dir`.
pub fn list_images(dir: &Path) -> FcnResult<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Err(FcnError::Dataset(format!(
            "Directory does not exist: {}",
            dir.display()
        )));
    }

    let mut paths = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(|e| FcnError::io(dir, e))? {
        let path = entry.map_err(|e| FcnError::io(dir, e))?.path();

        if path.is_file()
            && path
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| {
                    SUPPORTED_FILES
                        .iter()
                        .any(|&valid_ext| valid_ext.eq_ignore_ascii_case(ext))
                })
        {
            paths.push(path);
        }
    }
    paths.sort();

    Ok(paths)
}

/// Check the `data_road` layout under `data_dir` before any training starts.
pub fn check_kitti_dataset<P: AsRef<Path>>(data_dir: P) -> FcnResult<()> {
    let data_road = data_dir.as_ref().join("data_road");
    let required = [
        data_road.join("training").join("image_2"),
        data_road.join("training").join("gt_image_2"),
        data_road.join("testing").join("image_2"),
    ];

    for dir in &required {
        let count = list_images(dir)?.len();
        if count == 0 {
            return Err(FcnError::Dataset(format!(
                "Expected images in {}, found none",
                dir.display()
            )));
        }
        tracing::info!("Found {} images in {}", count, dir.display());
    }

    Ok(())
}

pub fn load_resized_image(path: &Path, image_shape: [usize; 2]) -> FcnResult<RgbImage> {
    load_resized(path, image_shape, FilterType::Triangle)
}

fn load_resized_label(path: &Path, image_shape: [usize; 2]) -> FcnResult<RgbImage> {
    load_resized(path, image_shape, FilterType::Nearest)
}

fn load_resized(path: &Path, image_shape: [usize; 2], filter: FilterType) -> FcnResult<RgbImage> {
    let [height, width] = image_shape;
    let image = image::open(path)
        .map_err(|source| FcnError::Image {
            path: path.to_path_buf(),
            source,
        })?
        .to_rgb8();

    if image.dimensions() == (width as u32, height as u32) {
        return Ok(image);
    }

    Ok(image::imageops::resize(
        &image,
        width as u32,
        height as u32,
        filter,
    ))
}

pub(crate) fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}
