use crate::error::{ClassifierError, Result};
use crate::model::{CompileOptions, CompiledModel, Model, compile};
use crate::nn::{Activation, Dense, GlobalAveragePooling2d, LayerEntry, Network};
use tracing::info;

pub const POOLING_LAYER: &str = "global_average_pooling2d";
pub const PREDICTIONS_LAYER: &str = "predictions";

/// Append pooling and a softmax classifier to `backbone` and compile the result.
///
/// The backbone's layers keep their trainable flags. The compiled model uses
/// Adam at `learning_rate`, categorical cross-entropy and accuracy.
pub fn build_classification_head(
    backbone: Model,
    num_classes: usize,
    learning_rate: f32,
) -> Result<CompiledModel> {
    if num_classes == 0 {
        return Err(ClassifierError::InvalidConfig(
            "a classifier needs at least one class".to_string(),
        ));
    }
    let channels = match backbone.output_dims() {
        &[_, _, c] => c,
        other => {
            return Err(ClassifierError::InvalidConfig(format!(
                "backbone {} must end in a (height, width, channels) feature map, got {:?}",
                backbone.name(),
                other
            )));
        }
    };

    let name = format!("{}_classifier", backbone.name());
    let head = vec![
        LayerEntry::new(POOLING_LAYER, Box::new(GlobalAveragePooling2d)),
        LayerEntry::new(
            PREDICTIONS_LAYER,
            Box::new(Dense::new(channels, num_classes, Activation::Softmax)),
        ),
    ];
    let model = backbone.extend(name, head)?;
    let compiled = compile(model, CompileOptions::classification(learning_rate))?;

    info!("\n{}", compiled.model().summary());
    Ok(compiled)
}

#[cfg(test)]
mod head_tests {
    use super::*;
    use crate::nn::{Conv2d, Loss, Metric, Sequential};
    use crate::tensor::{RawTensor, TensorOps};

    fn backbone() -> Model {
        let body = Sequential::builder()
            .add_named("conv", Box::new(Conv2d::new(3, 8, 3, 2)))
            .build()
            .unwrap();
        Model::new("toy", &[16, 16, 3], body).unwrap()
    }

    #[test]
    fn test_head_shapes_and_compilation() {
        let compiled = build_classification_head(backbone(), 3, 1e-4).unwrap();
        assert_eq!(compiled.input_shape(), vec![None, Some(16), Some(16), Some(3)]);
        assert_eq!(compiled.output_shape(), vec![None, Some(3)]);
        assert_eq!(
            compiled.model().body().layer_names(),
            vec!["conv", POOLING_LAYER, PREDICTIONS_LAYER]
        );
        assert_eq!(compiled.loss(), Loss::CategoricalCrossentropy);
        assert_eq!(compiled.metrics(), &[Metric::Accuracy]);
        assert_eq!(compiled.optimizer().learning_rate(), 1e-4);
    }

    #[test]
    fn test_predictions_are_distributions() {
        let compiled = build_classification_head(backbone(), 4, 1e-3).unwrap();
        let y = compiled.predict(&RawTensor::randn(&[3, 16, 16, 3])).unwrap();
        assert_eq!(y.shape(), vec![3, 4]);
        for row in y.to_vec().chunks(4) {
            assert!((row.iter().sum::<f32>() - 1.0).abs() < 1e-5);
            assert!(row.iter().all(|&p| (0.0..=1.0).contains(&p)));
        }
    }

    #[test]
    fn test_single_class_head() {
        let compiled = build_classification_head(backbone(), 1, 1e-3).unwrap();
        let y = compiled.predict(&RawTensor::randn(&[2, 16, 16, 3])).unwrap();
        assert!(y.to_vec().iter().all(|&p| (p - 1.0).abs() < 1e-6));
    }

    #[test]
    fn test_frozen_backbone_only_head_is_optimized() {
        let mut frozen = backbone();
        frozen.layers_mut()[0].set_trainable(false);
        let compiled = build_classification_head(frozen, 2, 1e-3).unwrap();
        assert_eq!(
            compiled.optimizer().param_names(),
            vec!["predictions.kernel", "predictions.bias"]
        );
        assert!(!compiled.layers()[0].trainable());
    }

    #[test]
    fn test_invalid_heads() {
        assert!(matches!(
            build_classification_head(backbone(), 0, 1e-3),
            Err(ClassifierError::InvalidConfig(_))
        ));
        assert!(matches!(
            build_classification_head(backbone(), 3, f32::INFINITY),
            Err(ClassifierError::InvalidConfig(_))
        ));

        let flat = Sequential::builder()
            .add_named("fc", Box::new(Dense::new(4, 4, Activation::Relu)))
            .build()
            .unwrap();
        let flat = Model::new("flat", &[4], flat).unwrap();
        assert!(matches!(
            build_classification_head(flat, 3, 1e-3),
            Err(ClassifierError::InvalidConfig(_))
        ));
    }
}
