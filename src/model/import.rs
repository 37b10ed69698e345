use std::path::Path;

use burn::{module::Param, nn::conv::Conv2d, prelude::*};
use safetensors::{Dtype, SafeTensors};

use super::vgg::{Vgg16, Vgg16Config};
use crate::error::{FcnError, FcnResult};

/// Positions of the thirteen convolutions inside torchvision's `features` sequential.
const FEATURE_CONVS: [usize; 13] = [0, 2, 5, 7, 10, 12, 14, 17, 19, 21, 24, 26, 28];

/// timm stores fc6/fc7 as convolutions under `pre_logits`, torchvision as linear layers under
/// `classifier`.
const FC6_PREFIXES: [&str; 2] = ["pre_logits.fc1", "classifier.0"];
const FC7_PREFIXES: [&str; 2] = ["pre_logits.fc2", "classifier.3"];

/// Build a [Vgg16] from an ImageNet VGG16 `.safetensors` export (torchvision or timm naming).
///
/// The first two classifier layers become the `fc6` 7x7 and `fc7` 1x1 convolutions. The
/// 1000-way ImageNet classifier is not used.
pub fn import_torchvision_vgg16<B: Backend, P: AsRef<Path>>(
    config: &Vgg16Config,
    path: P,
    device: &B::Device,
) -> FcnResult<Vgg16<B>> {
    let path = path.as_ref();
    tracing::info!("Importing VGG16 weights from {}", path.display());

    let bytes = std::fs::read(path).map_err(|e| FcnError::io(path, e))?;
    let weights = Weights {
        path,
        tensors: SafeTensors::deserialize(&bytes).map_err(|e| FcnError::Weights {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?,
    };

    let mut vgg = config.init::<B>(device);

    let shapes = feature_shapes(config);
    let convs = [
        &mut vgg.stage1,
        &mut vgg.stage2,
        &mut vgg.stage3,
        &mut vgg.stage4,
        &mut vgg.stage5,
    ]
    .into_iter()
    .flat_map(|stage| stage.convs.iter_mut());
    for ((conv, index), shape) in convs.zip(FEATURE_CONVS).zip(shapes) {
        weights.load_conv(conv, &format!("features.{index}"), shape, device)?;
    }

    let fc6_shape = [config.fc_channels, config.base_channels * 8, 7, 7];
    let fc6 = weights.find_prefix(&FC6_PREFIXES)?;
    weights.load_conv(&mut vgg.fc6, fc6, fc6_shape, device)?;

    let fc7_shape = [config.fc_channels, config.fc_channels, 1, 1];
    let fc7 = weights.find_prefix(&FC7_PREFIXES)?;
    weights.load_conv(&mut vgg.fc7, fc7, fc7_shape, device)?;

    Ok(vgg)
}

/// Weight shapes `[out, in, 3, 3]` of the convolutions, in forward order.
fn feature_shapes(config: &Vgg16Config) -> Vec<[usize; 4]> {
    let base = config.base_channels;
    let stages = [
        (3, base, 2),
        (base, base * 2, 2),
        (base * 2, base * 4, 3),
        (base * 4, base * 8, 3),
        (base * 8, base * 8, 3),
    ];

    stages
        .into_iter()
        .flat_map(|(input, output, num_convs)| {
            (0..num_convs).map(move |i| [output, if i == 0 { input } else { output }, 3, 3])
        })
        .collect()
}

struct Weights<'a> {
    path: &'a Path,
    tensors: SafeTensors<'a>,
}

impl Weights<'_> {
    fn error(&self, reason: String) -> FcnError {
        FcnError::Weights {
            path: self.path.to_path_buf(),
            reason,
        }
    }

    fn find_prefix<'p>(&self, prefixes: &[&'p str]) -> FcnResult<&'p str> {
        prefixes
            .iter()
            .copied()
            .find(|prefix| self.tensors.tensor(&format!("{prefix}.weight")).is_ok())
            .ok_or_else(|| self.error(format!("none of {:?} found", prefixes)))
    }

    fn load_conv<B: Backend>(
        &self,
        conv: &mut Conv2d<B>,
        prefix: &str,
        shape: [usize; 4],
        device: &B::Device,
    ) -> FcnResult<()> {
        let weight = self.tensor::<B, 4>(&format!("{prefix}.weight"), shape, device)?;
        let bias = self.tensor::<B, 1>(&format!("{prefix}.bias"), [shape[0]], device)?;

        conv.weight = Param::from_tensor(weight);
        conv.bias = Some(Param::from_tensor(bias));

        Ok(())
    }

    /// Read `name` into `shape`. A stored shape with the same leading dimension and element
    /// count is reshaped, which turns a flattened linear weight into its convolution form.
    fn tensor<B: Backend, const D: usize>(
        &self,
        name: &str,
        shape: [usize; D],
        device: &B::Device,
    ) -> FcnResult<Tensor<B, D>> {
        let view = self
            .tensors
            .tensor(name)
            .map_err(|e| self.error(format!("{name}: {e}")))?;

        if view.dtype() != Dtype::F32 {
            return Err(self.error(format!("{name} is {:?}, expected F32", view.dtype())));
        }

        let stored = view.shape().to_vec();
        if stored.iter().product::<usize>() != shape.iter().product::<usize>()
            || stored.first() != shape.first()
        {
            return Err(self.error(format!(
                "{name} has shape {:?}, expected {:?}",
                stored, shape
            )));
        }

        let values: Vec<f32> = view
            .data()
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect();

        Ok(Tensor::from_data(
            TensorData::new(values, shape).convert::<B::FloatElem>(),
            device,
        ))
    }
}
