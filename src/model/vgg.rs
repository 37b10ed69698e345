use std::path::Path;

use burn::{
    nn::{
        Dropout, DropoutConfig, PaddingConfig2d, Relu,
        conv::{Conv2d, Conv2dConfig},
    },
    prelude::*,
    record::{FullPrecisionSettings, NamedMpkFileRecorder},
};

use super::blocks::{ConvStage, ConvStageConfig};
use crate::error::{FcnError, FcnResult};

/// VGG16 with its fully-connected layers expressed as convolutions, so it accepts any input
/// whose sides are multiples of 32.
#[derive(Module, Debug)]
pub struct Vgg16<B: Backend> {
    pub(super) stage1: ConvStage<B>,
    pub(super) stage2: ConvStage<B>,
    pub(super) stage3: ConvStage<B>,
    pub(super) stage4: ConvStage<B>,
    pub(super) stage5: ConvStage<B>,
    pub(super) fc6: Conv2d<B>,
    pub(super) fc7: Conv2d<B>,
    activation: Relu,
    dropout: Dropout,
}

/// Intermediate activations the decoder reads from.
#[derive(Debug, Clone)]
pub struct VggFeatures<B: Backend> {
    /// pool3, 1/8 of the input resolution.
    pub layer3: Tensor<B, 4>,
    /// pool4, 1/16 of the input resolution.
    pub layer4: Tensor<B, 4>,
    /// fc7, 1/32 of the input resolution.
    pub layer7: Tensor<B, 4>,
}

#[derive(Config, Debug)]
pub struct Vgg16Config {
    #[config(default = "64")]
    pub base_channels: usize,
    #[config(default = "4096")]
    pub fc_channels: usize,
    /// Probability of keeping an activation in the fc6/fc7 dropout layers while training.
    #[config(default = "0.75")]
    pub keep_prob: f64,
}

impl Vgg16Config {
    pub fn init<B: Backend>(&self, device: &B::Device) -> Vgg16<B> {
        self.assertions();
        let base = self.base_channels;

        Vgg16 {
            stage1: ConvStageConfig::new(3, base, 2).init(device),
            stage2: ConvStageConfig::new(base, base * 2, 2).init(device),
            stage3: ConvStageConfig::new(base * 2, base * 4, 3).init(device),
            stage4: ConvStageConfig::new(base * 4, base * 8, 3).init(device),
            stage5: ConvStageConfig::new(base * 8, base * 8, 3).init(device),
            fc6: Conv2dConfig::new([base * 8, self.fc_channels], [7, 7])
                .with_padding(PaddingConfig2d::Same)
                .init(device),
            fc7: Conv2dConfig::new([self.fc_channels, self.fc_channels], [1, 1]).init(device),
            activation: Relu::new(),
            dropout: DropoutConfig::new(1.0 - self.keep_prob).init(),
        }
    }

    pub fn layer3_channels(&self) -> usize {
        self.base_channels * 4
    }

    pub fn layer4_channels(&self) -> usize {
        self.base_channels * 8
    }

    pub fn layer7_channels(&self) -> usize {
        self.fc_channels
    }

    fn assertions(&self) {
        assert!(
            self.keep_prob > 0.0 && self.keep_prob <= 1.0,
            "Keep probability should be in interval (0, 1]. Got {}",
            self.keep_prob
        );
        assert!(self.base_channels > 0, "Base channels must be positive");
        assert!(self.fc_channels > 0, "Fully-connected channels must be positive");
    }
}

impl<B: Backend> Vgg16<B> {
    pub fn forward(&self, images: Tensor<B, 4>) -> VggFeatures<B> {
        let x = self.stage1.forward(images);
        let x = self.stage2.forward(x);
        let layer3 = self.stage3.forward(x);
        let layer4 = self.stage4.forward(layer3.clone());
        let x = self.stage5.forward(layer4.clone());

        let x = self.fc6.forward(x);
        let x = self.activation.forward(x);
        let x = self.dropout.forward(x);

        let x = self.fc7.forward(x);
        let x = self.activation.forward(x);
        let layer7 = self.dropout.forward(x);

        VggFeatures {
            layer3,
            layer4,
            layer7,
        }
    }
}

/// Recorder for pretrained backbone weights, kept at full precision.
pub type BackboneRecorder = NamedMpkFileRecorder<FullPrecisionSettings>;

/// Restore pretrained VGG16 weights from a [BackboneRecorder] file.
///
/// The recorder appends its own extension, so `data/vgg/vgg16` reads `data/vgg/vgg16.mpk`.
pub fn load_vgg<B: Backend, P: AsRef<Path>>(
    config: &Vgg16Config,
    path: P,
    device: &B::Device,
) -> FcnResult<Vgg16<B>> {
    let path = path.as_ref();
    tracing::info!("Restoring VGG16 weights from {}", path.display());

    config
        .init::<B>(device)
        .load_file(path.to_path_buf(), &BackboneRecorder::new(), device)
        .map_err(|source| FcnError::Backbone {
            path: path.to_path_buf(),
            source,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type TestBackend = NdArray;

    fn tiny_config() -> Vgg16Config {
        Vgg16Config::new().with_base_channels(2).with_fc_channels(8)
    }

    #[test]
    fn features_have_expected_strides_and_channels() {
        let device = Default::default();
        let config = tiny_config();
        let vgg = config.init::<TestBackend>(&device);

        let images = Tensor::<TestBackend, 4>::zeros([1, 3, 64, 96], &device);
        let features = vgg.forward(images);

        assert_eq!(features.layer3.dims(), [1, config.layer3_channels(), 8, 12]);
        assert_eq!(features.layer4.dims(), [1, config.layer4_channels(), 4, 6]);
        assert_eq!(features.layer7.dims(), [1, config.layer7_channels(), 2, 3]);
    }

    #[test]
    fn load_vgg_round_trips_a_saved_record() {
        let device = Default::default();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vgg16");
        let config = tiny_config();

        let vgg = config.init::<TestBackend>(&device);
        let images = Tensor::<TestBackend, 4>::ones([1, 3, 32, 32], &device);
        let expected = vgg.forward(images.clone()).layer7;
        vgg.save_file(path.clone(), &BackboneRecorder::new()).unwrap();

        let restored = load_vgg::<TestBackend, _>(&config, &path, &device).unwrap();
        let actual = restored.forward(images).layer7;

        expected
            .into_data()
            .assert_approx_eq(&actual.into_data(), 4);
    }

    #[test]
    fn load_vgg_reports_missing_weights() {
        let device = Default::default();
        let dir = tempfile::tempdir().unwrap();

        let result = load_vgg::<TestBackend, _>(&tiny_config(), dir.path().join("absent"), &device);

        assert!(matches!(result, Err(FcnError::Backbone { .. })));
    }
}
