//! Forward-pass benchmarks for the backbone building blocks and the
//! assembled classifier.

use cnn_classifier::catalog::efficientnet;
use cnn_classifier::nn::MbConvConfig;
use cnn_classifier::{
    Activation, Architecture, Conv2d, Dense, MbConv, Module, RawTensor, Tensor,
    build_classification_head,
};
use criterion::{Criterion, black_box, criterion_group, criterion_main};

/// Deterministic NHWC input
fn input_nhwc(batch: usize, height: usize, width: usize, channels: usize) -> Tensor {
    let size = batch * height * width * channels;
    let data: Vec<f32> = (0..size).map(|i| (i as f32 * 0.01).sin()).collect();
    RawTensor::new(data, &[batch, height, width, channels], false)
}

fn bench_layers(c: &mut Criterion) {
    let mut group = c.benchmark_group("layer_forward");

    group.bench_function("stem_conv_3x3_s2_64px", |b| {
        let layer = Conv2d::new(3, 32, 3, 2);
        let input = input_nhwc(1, 64, 64, 3);
        b.iter(|| black_box(&layer).forward(black_box(&input)));
    });

    group.bench_function("mbconv6_k5_40ch_16px", |b| {
        let layer = MbConv::new(MbConvConfig {
            in_channels: 40,
            out_channels: 40,
            kernel_size: 5,
            stride: 1,
            expand_ratio: 6,
            se_ratio: 0.25,
        });
        let input = input_nhwc(1, 16, 16, 40);
        b.iter(|| black_box(&layer).forward(black_box(&input)));
    });

    group.bench_function("dense_softmax_1280x10", |b| {
        let layer = Dense::new(1280, 10, Activation::Softmax);
        let input = RawTensor::randn(&[8, 1280]);
        b.iter(|| black_box(&layer).forward(black_box(&input)));
    });

    group.finish();
}

fn bench_classifier(c: &mut Criterion) {
    let mut group = c.benchmark_group("classifier");
    group.sample_size(10);

    group.bench_function("efficientnetb0_build_224px", |b| {
        b.iter(|| efficientnet::build(Architecture::EfficientNetB0, black_box([224, 224, 3])));
    });

    group.bench_function("efficientnetb0_head_predict_64px", |b| {
        let backbone = efficientnet::build(Architecture::EfficientNetB0, [64, 64, 3])
            .expect("backbone");
        let model = build_classification_head(backbone, 5, 1e-3).expect("head");
        let input = input_nhwc(2, 64, 64, 3);
        b.iter(|| model.predict(black_box(&input)));
    });

    group.finish();
}

criterion_group!(benches, bench_layers, bench_classifier);
criterion_main!(benches);
