mod blocks;
mod fcn;
mod import;
mod vgg;

pub use blocks::{ConvStage, ConvStageConfig, UpsampleBlock, UpsampleBlockConfig};

pub use fcn::{FcnHead, FcnHeadConfig, FcnVgg, FcnVggConfig, ModelSummary};
pub use import::import_torchvision_vgg16;
pub use vgg::{BackboneRecorder, Vgg16, Vgg16Config, VggFeatures, load_vgg};
