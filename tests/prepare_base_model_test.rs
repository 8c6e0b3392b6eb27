use cnn_classifier::io::TensorData;
use cnn_classifier::*;
use safetensors::tensor::{Dtype, TensorView};
use std::fs;
use std::path::Path;
use tempfile::TempDir;

fn write_config(dir: &Path, weights_dir: &Path) -> std::path::PathBuf {
    let root = dir.display();
    let config = format!(
        "artifacts_root: {root}/artifacts\n\
         prepare_base_model:\n  \
           root_dir: {root}/artifacts/prepare_base_model\n  \
           base_model_path: {root}/artifacts/prepare_base_model/base_model.bin\n  \
           updated_base_model_path: {root}/artifacts/prepare_base_model/base_model_updated.bin\n  \
           weights_dir: {}\n",
        weights_dir.display()
    );
    let path = dir.join("config.yaml");
    fs::write(&path, config).unwrap();
    path
}

fn write_params(dir: &Path, image_size: &str, weights: &str) -> std::path::PathBuf {
    let params = format!(
        "IMAGE_SIZE: {image_size}\nCLASSES: 3\nLEARNING_RATE: 0.0001\nWEIGHTS: {weights}\n"
    );
    let path = dir.join("params.yaml");
    fs::write(&path, params).unwrap();
    path
}

fn assembler(dir: &TempDir, image_size: &str, weights: &str) -> Result<ModelAssembler> {
    let weights_dir = dir.path().join("weights");
    fs::create_dir_all(&weights_dir).unwrap();
    let config = write_config(dir.path(), &weights_dir);
    let params = write_params(dir.path(), image_size, weights);
    let manager = ConfigurationManager::new(config, params)?;
    Ok(ModelAssembler::new(manager.prepare_base_model_config()?))
}

fn artifact(dir: &TempDir, name: &str) -> std::path::PathBuf {
    dir.path()
        .join("artifacts")
        .join("prepare_base_model")
        .join(name)
}

#[test]
fn test_stage_writes_frozen_backbone_and_head() {
    let dir = TempDir::new().unwrap();
    let compiled = assembler(&dir, "[32, 32, 3]", "none")
        .unwrap()
        .run()
        .unwrap();

    let backbone_layers = compiled.layers().len() - 2;
    assert!(compiled.layers()[..backbone_layers]
        .iter()
        .all(|l| !l.trainable()));
    assert!(compiled.layers()[backbone_layers..]
        .iter()
        .all(|l| l.trainable()));

    let base = load_model(artifact(&dir, "base_model.bin")).unwrap();
    assert_eq!(base.layers().len(), backbone_layers);
    assert!(base.layers().iter().all(|l| l.trainable()));

    let updated = load_compiled_model(artifact(&dir, "base_model_updated.bin")).unwrap();
    assert_eq!(updated.input_shape(), vec![None, Some(32), Some(32), Some(3)]);
    assert_eq!(updated.output_shape(), vec![None, Some(3)]);
    assert_eq!(updated.loss(), Loss::CategoricalCrossentropy);
    assert_eq!(updated.metrics(), &[Metric::Accuracy]);
    assert!((updated.optimizer().learning_rate() - 1e-4).abs() < 1e-9);

    let flags: Vec<bool> = updated.layers().iter().map(|l| l.trainable()).collect();
    let expected: Vec<bool> = compiled.layers().iter().map(|l| l.trainable()).collect();
    assert_eq!(flags, expected);
}

#[test]
fn test_predictions_sum_to_one() {
    let dir = TempDir::new().unwrap();
    let compiled = assembler(&dir, "[32, 32, 3]", "none")
        .unwrap()
        .run()
        .unwrap();

    let x = RawTensor::uniform(&[2, 32, 32, 3], 1.0);
    let y = compiled.predict(&x).unwrap();
    assert_eq!(y.shape(), vec![2, 3]);
    for row in y.to_vec().chunks(3) {
        assert!((row.iter().sum::<f32>() - 1.0).abs() < 1e-5);
    }
}

#[test]
fn test_default_resolution_shapes() {
    let dir = TempDir::new().unwrap();
    let assembler = assembler(&dir, "[224, 224, 3]", "none").unwrap();
    let backbone = assembler.load_backbone().unwrap();
    assert_eq!(backbone.input_shape(), vec![None, Some(224), Some(224), Some(3)]);
    assert_eq!(
        backbone.output_shape(),
        vec![None, Some(7), Some(7), Some(1280)]
    );

    let full = assembler.update_base_model(backbone).unwrap();
    assert_eq!(full.input_shape(), vec![None, Some(224), Some(224), Some(3)]);
    assert_eq!(full.output_shape(), vec![None, Some(3)]);
    assert!(artifact(&dir, "base_model_updated.bin").is_file());
}

/// Variable name and layout Keras uses for one of our keys:
/// `block2a.dwconv.kernel` is `efficientnetb0/block2a_dwconv/depthwise_kernel:0`
/// with shape `(k, k, C, 1)`.
fn keras_variable(key: &str, value: &TensorData) -> (String, TensorData) {
    let parts: Vec<&str> = key.split('.').collect();
    let (layer, var) = match parts.as_slice() {
        [block, layer, var] => (format!("{block}_{layer}"), *var),
        [layer, var] => (layer.to_string(), *var),
        _ => panic!("unexpected key {key}"),
    };
    let mut value = value.clone();
    let var = if layer.ends_with("_dwconv") {
        value.shape.swap(2, 3);
        "depthwise_kernel"
    } else {
        var
    };
    (format!("efficientnetb0/{layer}/{var}:0"), value)
}

#[test]
fn test_pretrained_weights_from_safetensors() {
    let dir = TempDir::new().unwrap();
    let weights_dir = dir.path().join("weights");
    fs::create_dir_all(&weights_dir).unwrap();

    let donor = ModelCatalog::new(&weights_dir)
        .fetch(&BackboneRequest {
            architecture: Architecture::EfficientNetB0,
            input_shape: [32, 32, 3],
            weights: WeightSet::Random,
        })
        .unwrap();
    let keras: Vec<(String, TensorData)> = donor
        .state_dict()
        .iter()
        .map(|(k, v)| keras_variable(k, v))
        .collect();
    let dwconv = keras
        .iter()
        .find(|(name, _)| name == "efficientnetb0/block1a_dwconv/depthwise_kernel:0")
        .unwrap();
    assert_eq!(dwconv.1.shape, vec![3, 3, 32, 1]);
    assert!(keras
        .iter()
        .any(|(name, _)| name == "efficientnetb0/block7a_project_bn/moving_variance:0"));

    // Keras also stores the sample count of the normalization layer, as int64
    let count = [1_281_167i64];
    let mut views: Vec<(String, TensorView)> = keras
        .iter()
        .map(|(name, td)| {
            let view =
                TensorView::new(Dtype::F32, td.shape.clone(), bytemuck::cast_slice(&td.data))
                    .unwrap();
            (name.clone(), view)
        })
        .collect();
    views.push((
        "efficientnetb0/normalization/count:0".to_string(),
        TensorView::new(Dtype::I64, vec![], bytemuck::cast_slice(&count)).unwrap(),
    ));
    safetensors::serialize_to_file(
        views,
        &None,
        &weights_dir.join("efficientnetb0_imagenet_notop.safetensors"),
    )
    .unwrap();

    let assembler = assembler(&dir, "[32, 32, 3]", "imagenet").unwrap();
    let backbone = assembler.load_backbone().unwrap();
    assert_eq!(backbone.state_dict(), donor.state_dict());

    let saved = load_model(artifact(&dir, "base_model.bin")).unwrap();
    assert_eq!(saved.state_dict(), donor.state_dict());
}

#[test]
fn test_missing_pretrained_weights() {
    let dir = TempDir::new().unwrap();
    let err = assembler(&dir, "[32, 32, 3]", "imagenet")
        .unwrap()
        .run()
        .unwrap_err();
    assert!(matches!(err, ClassifierError::ResourceUnavailable(_)));
    assert!(!artifact(&dir, "base_model.bin").exists());
    assert!(!artifact(&dir, "base_model_updated.bin").exists());
}

#[test]
fn test_unusable_input_shape() {
    let dir = TempDir::new().unwrap();
    let err = assembler(&dir, "[16, 16, 3]", "none")
        .unwrap()
        .run()
        .unwrap_err();
    assert!(matches!(err, ClassifierError::InvalidConfig(_)));

    let dir = TempDir::new().unwrap();
    let err = assembler(&dir, "[64, 64, 1]", "imagenet")
        .unwrap()
        .run()
        .unwrap_err();
    assert!(matches!(err, ClassifierError::InvalidConfig(_)));
}

#[test]
fn test_unwritable_artifact_path() {
    let dir = TempDir::new().unwrap();
    let config = PrepareBaseModelConfig {
        root_dir: dir.path().to_path_buf(),
        base_model_path: dir.path().join("missing").join("base_model.bin"),
        updated_base_model_path: dir.path().join("base_model_updated.bin"),
        weights_dir: dir.path().join("weights"),
        params_architecture: Architecture::EfficientNetB0,
        params_image_size: [32, 32, 3],
        params_classes: 3,
        params_learning_rate: 1e-4,
        params_weights: WeightSet::Random,
    };
    let err = ModelAssembler::new(config).run().unwrap_err();
    assert!(matches!(err, ClassifierError::Io(_)));
}

#[test]
fn test_shared_artifact_path_is_rejected() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("model.bin");
    let config = PrepareBaseModelConfig {
        root_dir: dir.path().to_path_buf(),
        base_model_path: path.clone(),
        updated_base_model_path: path.clone(),
        weights_dir: dir.path().join("weights"),
        params_architecture: Architecture::EfficientNetB0,
        params_image_size: [32, 32, 3],
        params_classes: 3,
        params_learning_rate: 1e-4,
        params_weights: WeightSet::Random,
    };
    let err = ModelAssembler::new(config).run().unwrap_err();
    assert!(matches!(err, ClassifierError::InvalidConfig(_)));
    assert!(!path.exists());
}
