use burn::{
    nn::{
        Initializer, Relu,
        conv::{Conv2d, Conv2dConfig, ConvTranspose2d, ConvTranspose2dConfig},
        pool::MaxPool2d,
    },
    prelude::*,
};
use nn::{PaddingConfig2d, pool::MaxPool2dConfig};

/// A VGG stage: `num_convs` same-padded 3x3 convolutions with ReLU, then a 2x2 max-pool.
#[derive(Module, Debug)]
pub struct ConvStage<B: Backend> {
    pub(super) convs: Vec<Conv2d<B>>,
    activation: Relu,
    max_pool: MaxPool2d,
}

impl<B: Backend> ConvStage<B> {
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self
            .convs
            .iter()
            .fold(x, |x, conv| self.activation.forward(conv.forward(x)));

        self.max_pool.forward(x)
    }
}

#[derive(Config, Debug)]
pub struct ConvStageConfig {
    input_channels: usize,
    num_filters: usize,
    num_convs: usize,
}

impl ConvStageConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> ConvStage<B> {
        assert!(self.num_convs > 0, "A conv stage needs at least one convolution");

        let convs = (0..self.num_convs)
            .map(|i| {
                let input_channels = if i == 0 {
                    self.input_channels
                } else {
                    self.num_filters
                };
                Conv2dConfig::new([input_channels, self.num_filters], [3, 3])
                    .with_padding(PaddingConfig2d::Same)
                    .init(device)
            })
            .collect();

        ConvStage {
            convs,
            activation: Relu::new(),
            max_pool: MaxPool2dConfig::new([2, 2]).with_strides([2, 2]).init(),
        }
    }
}

/// Transpose convolution that scales the spatial size by exactly `stride`.
#[derive(Module, Debug)]
pub struct UpsampleBlock<B: Backend> {
    conv_transpose: ConvTranspose2d<B>,
}

impl<B: Backend> UpsampleBlock<B> {
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        self.conv_transpose.forward(x)
    }

    /// Upsample `x` and add the skip activation element-wise.
    pub fn forward_with_skip(&self, x: Tensor<B, 4>, skip_features: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.forward(x);
        let [_, _, height, width] = x.dims();
        let [_, _, skip_height, skip_width] = skip_features.dims();

        assert!(
            height == skip_height && width == skip_width,
            "Skip connection mismatch: upsampled ({},{}) vs skip ({},{})",
            height,
            width,
            skip_height,
            skip_width
        );

        x + skip_features
    }
}

#[derive(Config, Debug)]
pub struct UpsampleBlockConfig {
    input_channels: usize,
    num_filters: usize,
    kernel_size: usize,
    stride: usize,
}

impl UpsampleBlockConfig {
    /// Padding pair giving `out = stride * in` for a transpose convolution:
    /// `2 * padding + padding_out == kernel_size - stride`.
    pub fn same_padding(&self) -> (usize, usize) {
        assert!(
            self.kernel_size >= self.stride,
            "Kernel size ({}) must be at least the stride ({})",
            self.kernel_size,
            self.stride
        );
        let excess = self.kernel_size - self.stride;

        (excess / 2, excess % 2)
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> UpsampleBlock<B> {
        let (padding, padding_out) = self.same_padding();

        UpsampleBlock {
            conv_transpose: ConvTranspose2dConfig::new(
                [self.input_channels, self.num_filters],
                [self.kernel_size, self.kernel_size],
            )
            .with_stride([self.stride, self.stride])
            .with_padding([padding, padding])
            .with_padding_out([padding_out, padding_out])
            .with_initializer(Initializer::XavierUniform { gain: 1.0 })
            .init(device),
        }
    }
}
