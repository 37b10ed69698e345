pub mod error;
pub mod model;

#[cfg(feature = "dataset")]
pub mod dataset;

#[cfg(feature = "dataset")]
pub mod inference;

#[cfg(feature = "training")]
pub mod training;

pub use error::{FcnError, FcnResult};
pub use model::{FcnVgg, FcnVggConfig, Vgg16Config};

#[cfg(feature = "dataset")]
pub use dataset::{KittiRoadDataset, check_kitti_dataset};

#[cfg(feature = "dataset")]
pub use inference::save_inference_samples;

#[cfg(feature = "training")]
pub use training::{SegmentationOutput, TrainingConfig};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
