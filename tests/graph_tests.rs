use briny_resnet::graph::{
    fans, ActivationKind, BatchNorm, Conv2d, Dense, Graph, Initializer, Layer, Padding, Pool2d,
};
use briny_resnet::GraphError;

#[test]
fn test_padding_resolve() {
    assert_eq!(Padding::Valid.resolve(70, 7, 2), Some((32, 0)));
    assert_eq!(Padding::Valid.resolve(2, 3, 1), None);
    assert_eq!(Padding::Same.resolve(15, 3, 1), Some((15, 1)));
    assert_eq!(Padding::Same.resolve(3, 2, 2), Some((2, 0)));
    assert_eq!(Padding::Same.resolve(1, 2, 2), Some((1, 0)));
    assert_eq!(Padding::Same.resolve(0, 2, 2), None);
}

#[test]
fn test_conv_shape_inference() {
    let mut g = Graph::new();
    let x = g.input([64, 64, 3]).unwrap();
    let conv = Conv2d::new(64, (7, 7)).strides((2, 2));
    let y = g.apply(Layer::Conv2d(conv), &[&x]).unwrap();
    assert_eq!(y.shape(), &[29, 29, 64]);

    let same = Conv2d::new(8, (3, 3)).padding(Padding::Same);
    let z = g.apply(Layer::Conv2d(same), &[&y]).unwrap();
    assert_eq!(z.shape(), &[29, 29, 8]);
    assert_eq!(z.channels(), 8);
}

#[test]
fn test_pooling_and_flatten_shapes() {
    let mut g = Graph::new();
    let x = g.input([15, 15, 4]).unwrap();
    let p = g
        .apply(Layer::MaxPool2d(Pool2d::new((3, 3)).strides((2, 2))), &[&x])
        .unwrap();
    assert_eq!(p.shape(), &[7, 7, 4]);
    let a = g
        .apply(Layer::AvgPool2d(Pool2d::new((2, 2)).padding(Padding::Same)), &[&p])
        .unwrap();
    assert_eq!(a.shape(), &[4, 4, 4]);
    let f = g.apply(Layer::Flatten, &[&a]).unwrap();
    assert_eq!(f.shape(), &[64]);
    let d = g.apply(Layer::Dense(Dense::new(10)), &[&f]).unwrap();
    assert_eq!(d.shape(), &[10]);
}

#[test]
fn test_zero_padding_shape() {
    let mut g = Graph::new();
    let x = g.input([64, 64, 3]).unwrap();
    let y = g.apply(Layer::zero_padding(3, 3), &[&x]).unwrap();
    assert_eq!(y.shape(), &[70, 70, 3]);
}

#[test]
fn test_duplicate_name_rejected() {
    let mut g = Graph::new();
    let x = g.input([4, 4, 3]).unwrap();
    g.apply_named(Layer::Conv2d(Conv2d::new(2, (1, 1))), "conv", &[&x])
        .unwrap();
    let err = g
        .apply_named(Layer::Conv2d(Conv2d::new(2, (1, 1))), "conv", &[&x])
        .unwrap_err();
    assert!(matches!(err, GraphError::DuplicateName(name) if name == "conv"));
}

#[test]
fn test_auto_names_count_per_kind() {
    let mut g = Graph::new();
    let x = g.input([4, 4, 3]).unwrap();
    let a = g.apply(Layer::Activation(ActivationKind::ReLU), &[&x]).unwrap();
    let b = g.apply(Layer::Activation(ActivationKind::ReLU), &[&a]).unwrap();
    let s = g.add(&[&a, &b]).unwrap();

    assert_eq!(g.node(x.id()).unwrap().name(), "input_1");
    assert_eq!(g.node(a.id()).unwrap().name(), "activation_1");
    assert_eq!(g.node(b.id()).unwrap().name(), "activation_2");
    assert_eq!(g.node(s.id()).unwrap().name(), "add_1");
    assert_eq!(g.find("activation_2"), Some(b.id()));
}

#[test]
fn test_auto_name_skips_taken_names() {
    let mut g = Graph::new();
    let x = g.input([4, 4, 3]).unwrap();
    g.apply_named(Layer::Flatten, "flatten_1", &[&x]).unwrap();
    let f = g.apply(Layer::Flatten, &[&x]).unwrap();
    assert_eq!(g.node(f.id()).unwrap().name(), "flatten_2");
}

#[test]
fn test_add_shape_mismatch() {
    let mut g = Graph::new();
    let x = g.input([4, 4, 3]).unwrap();
    let y = g.apply(Layer::Conv2d(Conv2d::new(4, (1, 1))), &[&x]).unwrap();
    let err = g.add(&[&y, &x]).unwrap_err();
    match err {
        GraphError::ShapeMismatch {
            expected, found, ..
        } => {
            assert_eq!(expected, vec![4, 4, 4]);
            assert_eq!(found, vec![4, 4, 3]);
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_add_needs_two_inputs() {
    let mut g = Graph::new();
    let x = g.input([4]).unwrap();
    let err = g.add(&[&x]).unwrap_err();
    assert!(matches!(err, GraphError::Arity { expected: 2, found: 1, .. }));
}

#[test]
fn test_invalid_layer_arguments() {
    let mut g = Graph::new();
    let x = g.input([2, 2, 1]).unwrap();

    let too_big = g.apply(Layer::Conv2d(Conv2d::new(1, (3, 3))), &[&x]);
    assert!(matches!(too_big, Err(GraphError::InvalidArgument { .. })));

    let no_filters = g.apply(Layer::Conv2d(Conv2d::new(0, (1, 1))), &[&x]);
    assert!(matches!(no_filters, Err(GraphError::InvalidArgument { .. })));

    let zero_stride = g.apply(Layer::Conv2d(Conv2d::new(1, (1, 1)).strides((0, 1))), &[&x]);
    assert!(matches!(zero_stride, Err(GraphError::InvalidArgument { .. })));

    let dense_on_image = g.apply(Layer::Dense(Dense::new(3)), &[&x]);
    assert!(matches!(dense_on_image, Err(GraphError::InvalidArgument { .. })));

    let bad_axis = g.apply(Layer::BatchNorm(BatchNorm::new(4)), &[&x]);
    assert!(matches!(bad_axis, Err(GraphError::InvalidArgument { .. })));

    assert!(matches!(g.input([0, 3]), Err(GraphError::InvalidArgument { .. })));
    assert!(matches!(g.input(Vec::<usize>::new()), Err(GraphError::InvalidArgument { .. })));
}

#[test]
fn test_failed_apply_leaves_graph_untouched() {
    let mut g = Graph::new();
    let x = g.input([2, 2, 1]).unwrap();
    let before = g.len();
    assert!(g.apply_named(Layer::Conv2d(Conv2d::new(1, (5, 5))), "big", &[&x]).is_err());
    assert_eq!(g.len(), before);
    assert_eq!(g.find("big"), None);
}

#[test]
fn test_spatial_layer_rejects_flat_input() {
    let mut g = Graph::new();
    let x = g.input([12]).unwrap();
    let err = g.apply(Layer::MaxPool2d(Pool2d::new((2, 2))), &[&x]);
    assert!(matches!(err, Err(GraphError::InvalidArgument { .. })));
}

#[test]
fn test_foreign_tensor_rejected() {
    let mut g1 = Graph::new();
    let mut g2 = Graph::new();
    let x = g1.input([4, 4, 3]).unwrap();
    g2.input([4, 4, 3]).unwrap();
    let err = g2.apply(Layer::Flatten, &[&x]).unwrap_err();
    assert!(matches!(err, GraphError::ForeignTensor(_)));
}

#[test]
fn test_param_slots() {
    let conv = Layer::Conv2d(Conv2d::new(64, (7, 7)));
    let slots = conv.param_slots(&[&[70, 70, 3]]);
    assert_eq!(slots.len(), 2);
    assert_eq!(slots[0].name, "kernel");
    assert_eq!(slots[0].shape, vec![7, 7, 3, 64]);
    assert_eq!(slots[1].shape, vec![64]);

    let no_bias = Layer::Conv2d(Conv2d::new(8, (1, 1)).use_bias(false));
    assert_eq!(no_bias.param_slots(&[&[4, 4, 3]]).len(), 1);

    let bn = Layer::BatchNorm(BatchNorm::new(3));
    let slots = bn.param_slots(&[&[8, 8, 16]]);
    let names: Vec<_> = slots.iter().map(|s| s.name).collect();
    assert_eq!(names, ["gamma", "beta", "moving_mean", "moving_variance"]);
    assert_eq!(slots.iter().filter(|s| s.trainable).count(), 2);

    let dense = Layer::Dense(Dense::new(6));
    let slots = dense.param_slots(&[&[2048]]);
    assert_eq!(slots[0].shape, vec![2048, 6]);

    assert!(Layer::Add.param_slots(&[&[4], &[4]]).is_empty());
}

#[test]
fn test_ancestors() {
    let mut g = Graph::new();
    let x = g.input([4]).unwrap();
    let a = g.apply(Layer::Activation(ActivationKind::ReLU), &[&x]).unwrap();
    let _unused = g.apply(Layer::Activation(ActivationKind::Tanh), &[&x]).unwrap();
    let b = g.apply(Layer::Activation(ActivationKind::Sigmoid), &[&a]).unwrap();
    assert_eq!(g.ancestors(b.id()), vec![x.id(), a.id(), b.id()]);
}

#[test]
fn test_activation_parsing() {
    assert_eq!("relu".parse::<ActivationKind>().unwrap(), ActivationKind::ReLU);
    assert_eq!("ReLU".parse::<ActivationKind>().unwrap(), ActivationKind::ReLU);
    assert_eq!("silu".parse::<ActivationKind>().unwrap(), ActivationKind::Swish);
    assert_eq!(ActivationKind::Softmax.to_string(), "softmax");
    assert!(matches!(
        "leaky".parse::<ActivationKind>(),
        Err(GraphError::UnknownActivation(_))
    ));
}

#[test]
fn test_activation_values() {
    assert_eq!(ActivationKind::ReLU.apply(-2.0), 0.0);
    assert_eq!(ActivationKind::ReLU.apply(3.0), 3.0);
    assert_eq!(ActivationKind::Linear.apply(-1.5), -1.5);
    assert!((ActivationKind::Sigmoid.apply(0.0) - 0.5).abs() < 1e-6);
    assert!((ActivationKind::Tanh.apply(0.5) - 0.5f32.tanh()).abs() < 1e-6);
    assert!((ActivationKind::Elu.apply(-1.0) - (-0.632_120_6)).abs() < 1e-5);
    assert!(ActivationKind::Gelu.apply(0.0).abs() < 1e-6);
    assert!((ActivationKind::Swish.apply(1.0) - 0.731_058_6).abs() < 1e-5);
}

#[test]
fn test_fans() {
    assert_eq!(fans(&[7, 7, 3, 64]), (147, 3136));
    assert_eq!(fans(&[2048, 6]), (2048, 6));
    assert_eq!(fans(&[5]), (5, 5));
    assert_eq!(fans(&[]), (1, 1));
}

#[test]
fn test_glorot_uniform_is_bounded_and_deterministic() {
    let init = Initializer::glorot_uniform(0);
    let a = init.sample(&[7, 7, 3, 64], 0);
    let b = init.sample(&[7, 7, 3, 64], 0);
    let c = init.sample(&[7, 7, 3, 64], 1);

    let limit = (6.0f32 / (147.0 + 3136.0)).sqrt();
    assert!(a.data.iter().all(|v| v.abs() <= limit));
    assert_eq!(a, b);
    assert_ne!(a, c);
    assert_eq!(a.shape, vec![7, 7, 3, 64]);
}

#[test]
fn test_he_uniform_bound() {
    let t = Initializer::HeUniform { seed: Some(3) }.sample(&[3, 3, 8, 4], 0);
    let limit = (6.0f32 / 72.0).sqrt();
    assert!(t.data.iter().all(|v| v.abs() <= limit));
}

#[test]
fn test_constant_initializers() {
    assert!(Initializer::Zeros.sample(&[4], 0).data.iter().all(|&v| v == 0.0));
    assert!(Initializer::Ones.sample(&[4], 0).data.iter().all(|&v| v == 1.0));
    let c = Initializer::Constant { value: 0.25 }.sample(&[2, 2], 9);
    assert_eq!(c.data, vec![0.25; 4]);
}

#[test]
fn test_unseeded_initializer_has_requested_shape() {
    let t = Initializer::GlorotUniform { seed: None }.sample(&[3, 5], 0);
    assert_eq!(t.shape, vec![3, 5]);
    assert_eq!(t.len(), 15);
}

#[test]
fn test_rejected_layer_does_not_consume_auto_name() {
    let mut g = Graph::new();
    let x = g.input([2, 2, 1]).unwrap();
    let too_big = Layer::MaxPool2d(Pool2d::new((3, 3)));
    assert!(g.apply(too_big, &[&x]).is_err());

    let p = g.apply(Layer::MaxPool2d(Pool2d::new((2, 2))), &[&x]).unwrap();
    assert_eq!(g.node(p.id()).unwrap().name(), "max_pooling2d_1");
    assert_eq!(g.len(), 2);
}

#[test]
fn test_element_count_overflow_is_an_error() {
    let huge = 1usize << 62;
    let mut g = Graph::new();
    assert!(matches!(
        g.input([huge, huge, 3]),
        Err(GraphError::InvalidArgument { .. })
    ));

    let x = g.input([huge, 2, 1]).unwrap();
    assert_eq!(g.apply(Layer::Flatten, &[&x]).unwrap().shape(), &[huge * 2]);

    let padded = g.apply(Layer::zero_padding(usize::MAX, 0), &[&x]);
    assert!(matches!(padded, Err(GraphError::InvalidArgument { .. })));
    let doubled = g.apply(Layer::zero_padding(huge, 0), &[&x]);
    assert!(matches!(doubled, Err(GraphError::InvalidArgument { .. })));

    let wide = g.apply(Layer::Conv2d(Conv2d::new(8, (1, 1))), &[&x]);
    assert!(matches!(wide, Err(GraphError::InvalidArgument { .. })));

    let v = g.input([1usize << 40]).unwrap();
    let dense = g.apply(Layer::Dense(Dense::new(1 << 30)), &[&v]);
    assert!(matches!(dense, Err(GraphError::InvalidArgument { .. })));

    let strided = Pool2d::new((2, 2)).strides((usize::MAX, 1)).padding(Padding::Same);
    let y = g.input([4, 4, 1]).unwrap();
    assert!(g.apply(Layer::MaxPool2d(strided), &[&y]).is_ok());
    assert_eq!(Padding::Same.resolve(5, usize::MAX, 2), None);
}
