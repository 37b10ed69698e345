use std::path::Path;

use burn::{
    nn::{
        Initializer,
        conv::{Conv2d, Conv2dConfig},
    },
    module::AutodiffModule,
    prelude::*,
    tensor::backend::AutodiffBackend,
};

#[cfg(feature = "training")]
use crate::{
    dataset::SegmentationBatch,
    training::{SegmentationOutput, loss::SegmentationCrossEntropyLossConfig},
};
#[cfg(feature = "training")]
use burn::train::{TrainOutput, TrainStep, ValidStep};

use super::blocks::{UpsampleBlock, UpsampleBlockConfig};
use super::vgg::{Vgg16, Vgg16Config, VggFeatures, load_vgg};
use crate::error::FcnResult;

/// FCN-8s decoder: a 1x1 classifier on layer7, then three transpose-convolution stages with
/// skip connections from layer4 and layer3 back to the input resolution.
#[derive(Module, Debug)]
pub struct FcnHead<B: Backend> {
    conv_1x1: Conv2d<B>,
    upsample1: UpsampleBlock<B>,
    upsample2: UpsampleBlock<B>,
    upsample3: UpsampleBlock<B>,
}

#[derive(Config, Debug)]
pub struct FcnHeadConfig {
    num_classes: usize,
    layer3_channels: usize,
    layer4_channels: usize,
    layer7_channels: usize,
}

impl FcnHeadConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> FcnHead<B> {
        FcnHead {
            conv_1x1: Conv2dConfig::new([self.layer7_channels, self.num_classes], [1, 1])
                .with_initializer(Initializer::XavierUniform { gain: 1.0 })
                .init(device),
            upsample1: UpsampleBlockConfig::new(self.num_classes, self.layer4_channels, 4, 2)
                .init(device),
            upsample2: UpsampleBlockConfig::new(self.layer4_channels, self.layer3_channels, 4, 2)
                .init(device),
            upsample3: UpsampleBlockConfig::new(self.layer3_channels, self.num_classes, 16, 8)
                .init(device),
        }
    }
}

impl<B: Backend> FcnHead<B> {
    pub fn forward(&self, features: VggFeatures<B>) -> Tensor<B, 4> {
        let x = self.conv_1x1.forward(features.layer7);
        let x = self.upsample1.forward_with_skip(x, features.layer4);
        let x = self.upsample2.forward_with_skip(x, features.layer3);

        self.upsample3.forward(x)
    }
}

#[derive(Module, Debug)]
pub struct FcnVgg<B: Backend> {
    backbone: Vgg16<B>,
    head: FcnHead<B>,
    num_classes: usize,
}

#[derive(Config, Debug)]
pub struct FcnVggConfig {
    /// `[height, width]`; both must be multiples of 32.
    #[config(default = "[160, 576]")]
    pub image_shape: [usize; 2],
    #[config(default = "2")]
    pub num_classes: usize,
    #[config(default = "Vgg16Config::new()")]
    pub backbone: Vgg16Config,
    #[config(default = "false")]
    pub freeze_backbone: bool,
}

/// Number of parameters per part of the network.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelSummary {
    pub backbone: usize,
    pub head: usize,
    pub total: usize,
}

impl FcnVggConfig {
    /// Build the network with a randomly initialized backbone.
    pub fn init<B: Backend>(&self, device: &B::Device) -> FcnVgg<B> {
        self.assertions();
        self.build(self.backbone.init(device), device)
    }

    /// Build the network on top of pretrained VGG16 weights.
    pub fn init_with_backbone<B: Backend, P: AsRef<Path>>(
        &self,
        weights: P,
        device: &B::Device,
    ) -> FcnResult<FcnVgg<B>> {
        self.assertions();
        let backbone = load_vgg(&self.backbone, weights, device)?;

        Ok(self.build(backbone, device))
    }

    fn build<B: Backend>(&self, backbone: Vgg16<B>, device: &B::Device) -> FcnVgg<B> {
        let backbone = if self.freeze_backbone {
            tracing::info!("Freezing backbone parameters");
            backbone.no_grad()
        } else {
            backbone
        };

        let head = FcnHeadConfig::new(
            self.num_classes,
            self.backbone.layer3_channels(),
            self.backbone.layer4_channels(),
            self.backbone.layer7_channels(),
        )
        .init(device);

        FcnVgg {
            backbone,
            head,
            num_classes: self.num_classes,
        }
    }

    fn assertions(&self) {
        let [height, width] = self.image_shape;
        assert!(
            height > 0 && width > 0 && height % 32 == 0 && width % 32 == 0,
            "Image shape must be a positive multiple of 32 on both sides. Got ({},{})",
            height,
            width
        );
        assert!(
            self.num_classes >= 2,
            "Number of classes must be at least 2. Got {}",
            self.num_classes
        );
    }
}

impl<B: Backend> FcnVgg<B> {
    /// Per-pixel class logits `[batch, num_classes, height, width]`.
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 4> {
        let features = self.backbone.forward(images);

        self.head.forward(features)
    }

    pub fn num_classes(&self) -> usize {
        self.num_classes
    }

    pub fn backbone(&self) -> &Vgg16<B> {
        &self.backbone
    }

    pub fn head(&self) -> &FcnHead<B> {
        &self.head
    }

    pub fn model_summary(&self) -> ModelSummary {
        let summary = ModelSummary {
            backbone: self.backbone.num_params(),
            head: self.head.num_params(),
            total: self.num_params(),
        };

        tracing::info!("Backbone parameters: {}", summary.backbone);
        tracing::info!("Decoder parameters: {}", summary.head);
        tracing::info!("Total parameters: {}", summary.total);

        summary
    }

    #[cfg(feature = "training")]
    pub fn forward_segmentation(&self, item: SegmentationBatch<B>) -> SegmentationOutput<B> {
        let targets = item.masks;
        let output = self.forward(item.images);
        let valid = targets.ones_like().bool();

        let loss = SegmentationCrossEntropyLossConfig::new()
            .init(&output.device())
            .forward(output.clone(), targets.clone(), valid);

        SegmentationOutput::new(loss, output, targets)
    }
}

impl<B: AutodiffBackend> FcnVgg<B> {
    /// Copy of the model on the inner backend, with dropout disabled.
    pub fn for_inference(&self) -> FcnVgg<B::InnerBackend> {
        self.valid()
    }
}

#[cfg(feature = "training")]
impl<B: AutodiffBackend> TrainStep<SegmentationBatch<B>, SegmentationOutput<B>> for FcnVgg<B> {
    fn step(&self, batch: SegmentationBatch<B>) -> TrainOutput<SegmentationOutput<B>> {
        let item = self.forward_segmentation(batch);
        TrainOutput::new(self, item.loss.backward(), item)
    }
}

#[cfg(feature = "training")]
impl<B: Backend> ValidStep<SegmentationBatch<B>, SegmentationOutput<B>> for FcnVgg<B> {
    fn step(&self, batch: SegmentationBatch<B>) -> SegmentationOutput<B> {
        self.forward_segmentation(batch)
    }
}
