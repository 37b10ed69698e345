mod kitti;
mod segmentation;

pub use kitti::{
    BACKGROUND_CLASS, BACKGROUND_COLOR, KittiRoadDataset, ROAD_CLASS, SegmentationItem,
    check_kitti_dataset, gt_to_classes, image_name_for_label, list_images, load_resized_image,
};
pub use segmentation::{SegmentationBatch, SegmentationBatcher, image_to_batch, rgb_to_tensor};

pub(crate) use kitti::file_name;
