//! EfficientNet backbones without the classification top.
//!
//! B1..B3 are derived from the B0 block table by compound scaling: the
//! width coefficient scales channel counts, the depth coefficient scales the
//! number of repeats per stage.

use crate::catalog::Architecture;
use crate::error::Result;
use crate::model::Model;
use crate::nn::{
    Activation, ActivationLayer, BatchNorm, Conv2d, MbConv, MbConvConfig, Normalization,
    Rescaling, Sequential,
};

const DIVISOR: usize = 8;
const STEM_FILTERS: usize = 32;
const TOP_FILTERS: usize = 1280;

struct StageArgs {
    kernel_size: usize,
    repeats: usize,
    filters_in: usize,
    filters_out: usize,
    expand_ratio: usize,
    stride: usize,
    se_ratio: f32,
}

const fn stage(
    kernel_size: usize,
    repeats: usize,
    filters_in: usize,
    filters_out: usize,
    expand_ratio: usize,
    stride: usize,
) -> StageArgs {
    StageArgs {
        kernel_size,
        repeats,
        filters_in,
        filters_out,
        expand_ratio,
        stride,
        se_ratio: 0.25,
    }
}

const B0_STAGES: [StageArgs; 7] = [
    stage(3, 1, 32, 16, 1, 1),
    stage(3, 2, 16, 24, 6, 2),
    stage(5, 2, 24, 40, 6, 2),
    stage(3, 3, 40, 80, 6, 2),
    stage(5, 3, 80, 112, 6, 1),
    stage(5, 4, 112, 192, 6, 2),
    stage(3, 1, 192, 320, 6, 1),
];

/// Channel count scaled by `width`, rounded to a multiple of 8 without
/// dropping more than 10%.
pub(crate) fn round_filters(filters: usize, width: f32) -> usize {
    let scaled = filters as f32 * width;
    let mut rounded =
        (((scaled + DIVISOR as f32 / 2.0) as usize) / DIVISOR * DIVISOR).max(DIVISOR);
    if (rounded as f32) < 0.9 * scaled {
        rounded += DIVISOR;
    }
    rounded
}

pub(crate) fn round_repeats(repeats: usize, depth: f32) -> usize {
    (depth * repeats as f32).ceil() as usize
}

/// Layer stack of `architecture` for `(height, width, channels)` inputs,
/// randomly initialized.
pub fn build(architecture: Architecture, input_shape: [usize; 3]) -> Result<Model> {
    let (width, depth) = architecture.coefficients();
    let channels = input_shape[2];
    let stem = round_filters(STEM_FILTERS, width);

    let mut builder = Sequential::builder()
        .add_named("rescaling", Box::new(Rescaling::new(1.0 / 255.0, 0.0)))
        .add_named("normalization", Box::new(Normalization::new(channels)))
        .add_named("stem_conv", Box::new(Conv2d::new(channels, stem, 3, 2)))
        .add_named("stem_bn", Box::new(BatchNorm::new(stem)))
        .add_named(
            "stem_activation",
            Box::new(ActivationLayer::new(Activation::Swish)),
        );

    for (i, args) in B0_STAGES.iter().enumerate() {
        let filters_out = round_filters(args.filters_out, width);
        let mut filters_in = round_filters(args.filters_in, width);
        for j in 0..round_repeats(args.repeats, depth) {
            // Only the first block of a stage changes resolution and width
            let config = MbConvConfig {
                in_channels: filters_in,
                out_channels: filters_out,
                kernel_size: args.kernel_size,
                stride: if j == 0 { args.stride } else { 1 },
                expand_ratio: args.expand_ratio,
                se_ratio: args.se_ratio,
            };
            let name = format!("block{}{}", i + 1, block_letter(j));
            builder = builder.add_named(name, Box::new(MbConv::new(config)));
            filters_in = filters_out;
        }
    }

    let last = round_filters(B0_STAGES[B0_STAGES.len() - 1].filters_out, width);
    let top = round_filters(TOP_FILTERS, width);
    let body = builder
        .add_named("top_conv", Box::new(Conv2d::new(last, top, 1, 1)))
        .add_named("top_bn", Box::new(BatchNorm::new(top)))
        .add_named(
            "top_activation",
            Box::new(ActivationLayer::new(Activation::Swish)),
        )
        .build()?;

    Model::new(architecture.slug(), &input_shape, body)
}

/// `a`, `b`, ... for the blocks of a stage
fn block_letter(index: usize) -> char {
    (b'a' + index as u8) as char
}

#[cfg(test)]
mod efficientnet_tests {
    use super::*;
    use crate::nn::{Module, Network};
    use crate::tensor::{RawTensor, TensorOps};

    #[test]
    fn test_round_filters() {
        assert_eq!(round_filters(32, 1.0), 32);
        assert_eq!(round_filters(1280, 1.0), 1280);
        // 35.2 rounds down to 32, which is within 10%
        assert_eq!(round_filters(32, 1.1), 32);
        assert_eq!(round_filters(1280, 1.1), 1408);
        // 19.2 would round down to 16, losing more than 10%
        assert_eq!(round_filters(16, 1.2), 24);
        assert_eq!(round_filters(1280, 1.2), 1536);
    }

    #[test]
    fn test_round_repeats() {
        assert_eq!(round_repeats(4, 1.0), 4);
        assert_eq!(round_repeats(1, 1.1), 2);
        assert_eq!(round_repeats(3, 1.4), 5);
    }

    #[test]
    fn test_b0_layout() {
        let model = build(Architecture::EfficientNetB0, [224, 224, 3]).unwrap();
        let names = model.body().layer_names();
        assert_eq!(
            names[..5],
            ["rescaling", "normalization", "stem_conv", "stem_bn", "stem_activation"]
        );
        // 16 MBConv blocks between stem and top
        let blocks: Vec<&str> = names
            .iter()
            .copied()
            .filter(|n| n.starts_with("block"))
            .collect();
        assert_eq!(blocks.len(), 16);
        assert_eq!(blocks.first(), Some(&"block1a"));
        assert!(blocks.contains(&"block6d"));
        assert_eq!(blocks.last(), Some(&"block7a"));
        assert_eq!(names.last(), Some(&"top_activation"));

        assert_eq!(model.name(), "efficientnetb0");
        assert_eq!(model.input_shape(), vec![None, Some(224), Some(224), Some(3)]);
        assert_eq!(model.output_shape(), vec![None, Some(7), Some(7), Some(1280)]);
    }

    #[test]
    fn test_scaled_variants() {
        let b1 = build(Architecture::EfficientNetB1, [240, 240, 3]).unwrap();
        assert_eq!(b1.output_shape(), vec![None, Some(8), Some(8), Some(1280)]);
        // depth 1.1 turns every single-block stage into two blocks
        assert!(b1.layer("block1b").is_some());

        let b3 = build(Architecture::EfficientNetB3, [64, 64, 3]).unwrap();
        assert_eq!(b3.output_shape(), vec![None, Some(2), Some(2), Some(1536)]);
    }

    #[test]
    fn test_small_input_forward() {
        let mut model = build(Architecture::EfficientNetB0, [32, 32, 3]).unwrap();
        model.train(false);
        let x = RawTensor::uniform(&[1, 32, 32, 3], 255.0);
        let y = model.predict(&x).unwrap();
        assert_eq!(y.shape(), vec![1, 1, 1, 1280]);
        assert!(y.to_vec().iter().all(|v| v.is_finite()));
        assert!(model.body().state_dict().contains_key("block2a.se_reduce.kernel"));
    }
}
