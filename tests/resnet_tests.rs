use briny_resnet::graph::{ActivationKind, Graph, Initializer, Layer, Padding};
use briny_resnet::resnet::{block_label, stage, ResidualBlock, StageSpec, RESNET50_STAGES};
use briny_resnet::tensors::Tensor;
use briny_resnet::{convolutional_block, identity_block, resnet50, GraphError, Model, ResNetConfig};
use std::sync::OnceLock;

fn default_model() -> &'static Model {
    static MODEL: OnceLock<Model> = OnceLock::new();
    MODEL.get_or_init(|| resnet50(&ResNetConfig::default()).unwrap())
}

fn count(model: &Model, class: &str) -> usize {
    model.layers().iter().filter(|l| l.class == class).count()
}

fn shape_of<'a>(model: &'a Model, name: &str) -> &'a [usize] {
    model
        .layer(name)
        .unwrap_or_else(|| panic!("missing layer {name}"))
        .shape()
}

fn block(stage: usize, label: &str, filters: [usize; 3]) -> ResidualBlock {
    ResidualBlock {
        stage,
        block: label.to_owned(),
        kernel_size: 3,
        filters,
        activation: ActivationKind::ReLU,
        initializer: Initializer::glorot_uniform(1),
    }
}

#[test]
fn test_default_model_io() {
    let model = default_model();
    assert_eq!(model.name(), "ResNet50");
    assert_eq!(model.input_shape(), &[64, 64, 3]);
    assert_eq!(model.output_shape(), &[6]);
}

#[test]
fn test_layer_counts() {
    let model = default_model();
    assert_eq!(model.len(), 177);
    assert_eq!(count(model, "InputLayer"), 1);
    assert_eq!(count(model, "Add"), 16);
    assert_eq!(count(model, "Conv2D"), 53);
    assert_eq!(count(model, "BatchNormalization"), 53);
    assert_eq!(count(model, "Activation"), 49);
    assert_eq!(count(model, "Dense"), 1);
}

#[test]
fn test_parameter_totals() {
    let model = default_model();
    assert_eq!(model.count_params(), 23_600_006);
    assert_eq!(model.trainable_params(), 23_546_886);
    assert_eq!(model.non_trainable_params(), 53_120);
}

#[test]
fn test_stage_resolutions() {
    let model = default_model();
    assert_eq!(shape_of(model, "zero_padding2d_1"), &[70, 70, 3]);
    assert_eq!(shape_of(model, "conv1"), &[32, 32, 64]);
    assert_eq!(shape_of(model, "bn_conv1"), &[32, 32, 64]);
    assert_eq!(shape_of(model, "max_pooling2d_1"), &[15, 15, 64]);
    assert_eq!(shape_of(model, "bn2c_branch2c"), &[15, 15, 256]);
    assert_eq!(shape_of(model, "res3a_branch1"), &[8, 8, 512]);
    assert_eq!(shape_of(model, "bn4f_branch2c"), &[4, 4, 1024]);
    assert_eq!(shape_of(model, "res5c_branch2b"), &[2, 2, 512]);
    assert_eq!(shape_of(model, "bn5c_branch2c"), &[2, 2, 2048]);
    assert_eq!(shape_of(model, "average_pooling2d_1"), &[1, 1, 2048]);
    assert_eq!(shape_of(model, "flatten_1"), &[2048]);
    assert_eq!(shape_of(model, "fc6"), &[6]);
}

#[test]
fn test_block_naming() {
    let model = default_model();
    for (spec, last) in RESNET50_STAGES.iter().zip(["c", "d", "f", "c"]) {
        let stage = spec.stage;
        assert!(model.layer(&format!("res{stage}a_branch1")).is_some());
        assert!(model.layer(&format!("bn{stage}a_branch1")).is_some());
        assert!(model.layer(&format!("res{stage}b_branch1")).is_none());
        assert!(model.layer(&format!("res{stage}{last}_branch2c")).is_some());
    }
    assert!(model.layer("res4g_branch2a").is_none());
    assert!(model.layer("res5d_branch2a").is_none());
}

#[test]
fn test_stem_and_head_layers() {
    let model = default_model();
    match model.layer("conv1").unwrap().layer() {
        Layer::Conv2d(conv) => {
            assert_eq!(conv.filters, 64);
            assert_eq!(conv.kernel, (7, 7));
            assert_eq!(conv.strides, (2, 2));
            assert_eq!(conv.padding, Padding::Valid);
        }
        other => panic!("conv1 is {other:?}"),
    }
    match model.layer("bn_conv1").unwrap().layer() {
        Layer::BatchNorm(bn) => assert_eq!(bn.axis, 3),
        other => panic!("bn_conv1 is {other:?}"),
    }
    match model.layer("res2a_branch2b").unwrap().layer() {
        Layer::Conv2d(conv) => {
            assert_eq!(conv.kernel, (3, 3));
            assert_eq!(conv.padding, Padding::Same);
        }
        other => panic!("res2a_branch2b is {other:?}"),
    }
    match model.layer("fc6").unwrap().layer() {
        Layer::Dense(dense) => assert_eq!(dense.activation, ActivationKind::Softmax),
        other => panic!("fc6 is {other:?}"),
    }
}

#[test]
fn test_strided_blocks() {
    let model = default_model();
    for (name, stride) in [
        ("res2a_branch2a", 1),
        ("res2a_branch1", 1),
        ("res3a_branch2a", 2),
        ("res3a_branch1", 2),
        ("res4a_branch1", 2),
        ("res5a_branch2a", 2),
        ("res3b_branch2a", 1),
    ] {
        match model.layer(name).unwrap().layer() {
            Layer::Conv2d(conv) => assert_eq!(conv.strides, (stride, stride), "{name}"),
            other => panic!("{name} is {other:?}"),
        }
    }
}

#[test]
fn test_add_inputs_have_equal_shapes() {
    let model = default_model();
    let adds: Vec<_> = model.layers().into_iter().filter(|l| l.class == "Add").collect();
    assert_eq!(adds.len(), 16);
    for add in &adds {
        assert_eq!(add.inputs.len(), 2);
        assert_eq!(
            shape_of(model, &add.inputs[0]),
            shape_of(model, &add.inputs[1]),
            "{}",
            add.name
        );
    }
    assert_eq!(adds[0].inputs, ["bn2a_branch2c", "bn2a_branch1"]);
    assert_eq!(adds[1].inputs, ["bn2b_branch2c", "activation_4"]);
}

#[test]
fn test_kernels_respect_glorot_limit() {
    let model = default_model();
    let conv1 = model.weights("conv1").unwrap();
    assert_eq!(conv1[0].value.shape, vec![7, 7, 3, 64]);
    let limit = (6.0f32 / (147.0 + 3136.0)).sqrt();
    assert!(conv1[0].value.data.iter().all(|v| v.abs() <= limit));
    assert!(conv1[1].value.data.iter().all(|&v| v == 0.0));

    let fc = model.weights("fc6").unwrap();
    assert_eq!(fc[0].value.shape, vec![2048, 6]);
    let limit = (6.0f32 / 2054.0).sqrt();
    assert!(fc[0].value.data.iter().all(|v| v.abs() <= limit));
}

#[test]
fn test_same_seed_same_weights() {
    let a = default_model();
    let b = resnet50(&ResNetConfig::default()).unwrap();
    for name in ["conv1", "res3b_branch2b", "res5a_branch1", "fc6"] {
        assert_eq!(a.weights(name).unwrap(), b.weights(name).unwrap(), "{name}");
    }
    let c1 = a.weights("res2a_branch2a").unwrap();
    let c2 = a.weights("res2b_branch2a").unwrap();
    assert_ne!(c1[0].value.data[..64], c2[0].value.data[..64]);
}

#[test]
fn test_predict_outputs_probabilities() {
    let model = default_model();
    let data = (0..64 * 64 * 3)
        .map(|i| ((i % 255) as f32) / 255.0)
        .collect();
    let batch = Tensor::new(vec![1, 64, 64, 3], data);
    let probs = model.predict(&batch).unwrap();
    assert_eq!(probs.shape, vec![1, 6]);
    assert!(probs.data.iter().all(|p| p.is_finite() && *p >= 0.0));
    assert!((probs.data.iter().sum::<f32>() - 1.0).abs() < 1e-4);
}

#[test]
fn test_small_custom_network() {
    let config = ResNetConfig {
        input_shape: vec![16, 16, 3],
        classes: 3,
        stages: vec![StageSpec {
            stage: 2,
            filters: [4, 4, 8],
            stride: 1,
            blocks: 2,
            kernel_size: 3,
        }],
        ..ResNetConfig::default()
    };
    let model = resnet50(&config).unwrap();
    assert_eq!(model.len(), 31);
    assert_eq!(model.output_shape(), &[3]);
    assert_eq!(shape_of(&model, "bn2b_branch2c"), &[3, 3, 8]);
    assert_eq!(model.count_params(), 11_179);
    assert_eq!(model.non_trainable_params(), 208);

    let batch = Tensor::filled(vec![2, 16, 16, 3], 0.5);
    let probs = model.predict(&batch).unwrap();
    assert_eq!(probs.shape, vec![2, 3]);
    for row in probs.data.chunks(3) {
        assert!((row.iter().sum::<f32>() - 1.0).abs() < 1e-5);
    }
    assert_eq!(probs.data[..3], probs.data[3..]);
}

#[test]
fn test_input_too_small() {
    let err = resnet50(&ResNetConfig::new([1, 1, 3], 6)).unwrap_err();
    assert!(matches!(err, GraphError::InvalidArgument { layer, .. } if layer == "max_pooling2d_1"));
}

#[test]
fn test_identity_block_needs_matching_channels() {
    let mut g = Graph::new();
    let x = g.input([8, 8, 32]).unwrap();
    let y = identity_block(&mut g, &x, &block(2, "a", [16, 16, 32])).unwrap();
    assert_eq!(y.shape(), &[8, 8, 32]);
    assert!(g.find("res2a_branch2c").is_some());
    assert!(g.find("bn2a_branch2b").is_some());

    let mut g = Graph::new();
    let x = g.input([8, 8, 64]).unwrap();
    let err = identity_block(&mut g, &x, &block(2, "a", [16, 16, 32])).unwrap_err();
    assert!(matches!(err, GraphError::ShapeMismatch { .. }));
}

#[test]
fn test_convolutional_block_projects_shortcut() {
    let mut g = Graph::new();
    let x = g.input([8, 8, 64]).unwrap();
    let y = convolutional_block(&mut g, &x, &block(9, "a", [16, 16, 32]), 2).unwrap();
    assert_eq!(y.shape(), &[4, 4, 32]);
    let shortcut = g.find("bn9a_branch1").unwrap();
    assert_eq!(g.node(shortcut).unwrap().shape(), &[4, 4, 32]);
    // main path first, then the shortcut
    assert!(g.find("bn9a_branch2c").unwrap() < g.find("res9a_branch1").unwrap());
}

#[test]
fn test_stage_builds_all_blocks() {
    let mut g = Graph::new();
    let x = g.input([8, 8, 16]).unwrap();
    let spec = StageSpec {
        stage: 7,
        filters: [4, 4, 16],
        stride: 2,
        blocks: 3,
        kernel_size: 3,
    };
    let y = stage(&mut g, &x, &spec, ActivationKind::ReLU, Initializer::Zeros).unwrap();
    assert_eq!(y.shape(), &[4, 4, 16]);
    assert!(g.find("res7c_branch2a").is_some());
    assert!(g.find("res7d_branch2a").is_none());
    assert!(g.find("res7b_branch1").is_none());
}

#[test]
fn test_block_labels() {
    assert_eq!(block_label(0), "a");
    assert_eq!(block_label(5), "f");
    assert_eq!(block_label(25), "z");
    assert_eq!(block_label(26), "b26");
    assert_eq!(block_label(300), "b300");
}
