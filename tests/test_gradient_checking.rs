// Finite-difference checks of the analytical gradients.
//
// The convolution fixtures keep every unit strictly inside the rectifier's
// linear region (positive inputs, weights and biases) and pool with k equal
// to the convolved length, so the scalar loss is smooth in each parameter
// and a central difference is trustworthy at f32 precision. Pooling and
// rectifier routing have their own exact unit tests beside the layer code.

use sentconv::layers::{ConvFoldPoolLayer, SoftmaxClassifier};
use sentconv::params::ParamRegistry;
use sentconv::utils::rng::SimpleRng;

const EPSILON: f32 = 1e-2;
const TOLERANCE: f64 = 1e-2;

// Relative error between numerical and analytical gradients.
fn relative_error(numerical: f64, analytical: f64) -> f64 {
    let numerator = (numerical - analytical).abs();
    let denominator = (numerical.abs() + analytical.abs()).max(1e-8);
    numerator / denominator
}

// Conv fixture: batch of 2, one input map of 2x3, two 1x2 filters, k = 4
// spans the whole convolved length. All values positive.
fn conv_fixture() -> (ParamRegistry, ConvFoldPoolLayer, Vec<f32>) {
    let mut params = ParamRegistry::new();
    let mut rng = SimpleRng::new(42);
    let layer = ConvFoldPoolLayer::new(&mut params, &mut rng, "conv", 1, 2, 3, 2, 1, 2, 4, 0.0)
        .expect("fixture geometry is valid");
    params
        .values_mut(layer.weight_id())
        .copy_from_slice(&[0.3, 0.5, 0.2, 0.4]);
    params.values_mut(layer.bias_id()).copy_from_slice(&[0.1, 0.2]);
    let input = vec![
        0.5, 1.0, 1.5, 0.8, 0.6, 1.2, // instance 0
        0.9, 0.4, 0.7, 1.1, 0.5, 0.3, // instance 1
    ];
    (params, layer, input)
}

// Loss for the conv stage: plain sum of the outputs, so the output gradient
// is all ones.
fn conv_sum_loss(layer: &ConvFoldPoolLayer, params: &ParamRegistry, input: &[f32]) -> f32 {
    let mut output = vec![0.0; 2 * layer.output_size()];
    layer.forward(params, input, &mut output, 2);
    output.iter().sum()
}

#[test]
fn test_conv_weight_gradients_match_finite_differences() {
    let (mut params, layer, input) = conv_fixture();

    let mut output = vec![0.0; 2 * layer.output_size()];
    layer.forward(&params, &input, &mut output, 2);
    let ones = vec![1.0; output.len()];
    let mut grad_input = vec![0.0; input.len()];
    layer.backward(&mut params, &input, &output, &ones, &mut grad_input, 2);
    let analytical: Vec<f32> = params.grad(layer.weight_id()).to_vec();

    for i in 0..analytical.len() {
        let original = params.values(layer.weight_id())[i];
        params.values_mut(layer.weight_id())[i] = original + EPSILON;
        let loss_plus = conv_sum_loss(&layer, &params, &input);
        params.values_mut(layer.weight_id())[i] = original - EPSILON;
        let loss_minus = conv_sum_loss(&layer, &params, &input);
        params.values_mut(layer.weight_id())[i] = original;

        let numerical = ((loss_plus - loss_minus) / (2.0 * EPSILON)) as f64;
        let rel_error = relative_error(numerical, analytical[i] as f64);
        assert!(
            rel_error < TOLERANCE,
            "filter weight gradient mismatch at {}: numerical={:.6}, analytical={:.6}, rel_error={:.6}",
            i,
            numerical,
            analytical[i],
            rel_error
        );
    }
}

#[test]
fn test_conv_bias_gradients_match_finite_differences() {
    let (mut params, layer, input) = conv_fixture();

    let mut output = vec![0.0; 2 * layer.output_size()];
    layer.forward(&params, &input, &mut output, 2);
    let ones = vec![1.0; output.len()];
    let mut grad_input = vec![0.0; input.len()];
    layer.backward(&mut params, &input, &output, &ones, &mut grad_input, 2);
    let analytical: Vec<f32> = params.grad(layer.bias_id()).to_vec();

    for i in 0..analytical.len() {
        let original = params.values(layer.bias_id())[i];
        params.values_mut(layer.bias_id())[i] = original + EPSILON;
        let loss_plus = conv_sum_loss(&layer, &params, &input);
        params.values_mut(layer.bias_id())[i] = original - EPSILON;
        let loss_minus = conv_sum_loss(&layer, &params, &input);
        params.values_mut(layer.bias_id())[i] = original;

        let numerical = ((loss_plus - loss_minus) / (2.0 * EPSILON)) as f64;
        let rel_error = relative_error(numerical, analytical[i] as f64);
        assert!(
            rel_error < TOLERANCE,
            "bias gradient mismatch at {}: numerical={:.6}, analytical={:.6}, rel_error={:.6}",
            i,
            numerical,
            analytical[i],
            rel_error
        );
    }
}

#[test]
fn test_conv_input_gradients_match_finite_differences() {
    let (mut params, layer, input) = conv_fixture();

    let mut output = vec![0.0; 2 * layer.output_size()];
    layer.forward(&params, &input, &mut output, 2);
    let ones = vec![1.0; output.len()];
    let mut grad_input = vec![0.0; input.len()];
    layer.backward(&mut params, &input, &output, &ones, &mut grad_input, 2);

    for i in 0..input.len() {
        let mut perturbed = input.clone();
        perturbed[i] = input[i] + EPSILON;
        let loss_plus = conv_sum_loss(&layer, &params, &perturbed);
        perturbed[i] = input[i] - EPSILON;
        let loss_minus = conv_sum_loss(&layer, &params, &perturbed);

        let numerical = ((loss_plus - loss_minus) / (2.0 * EPSILON)) as f64;
        let rel_error = relative_error(numerical, grad_input[i] as f64);
        assert!(
            rel_error < TOLERANCE,
            "input gradient mismatch at {}: numerical={:.6}, analytical={:.6}, rel_error={:.6}",
            i,
            numerical,
            grad_input[i],
            rel_error
        );
    }
}

// Classifier fixture: 3 features, 2 classes, batch of 2 with one label per
// class so the batch averaging enters the gradients.
fn classifier_fixture() -> (ParamRegistry, SoftmaxClassifier, Vec<f32>, Vec<u8>) {
    let mut params = ParamRegistry::new();
    let mut rng = SimpleRng::new(7);
    let layer = SoftmaxClassifier::new(&mut params, &mut rng, 3, 2, 0.0);
    params
        .values_mut(layer.weight_id())
        .copy_from_slice(&[0.2, -0.1, 0.4, 0.3, -0.2, 0.1]);
    params.values_mut(layer.bias_id()).copy_from_slice(&[0.05, -0.05]);
    let input = vec![1.0, -0.5, 0.8, -0.3, 0.6, 0.2];
    let labels = vec![0u8, 1u8];
    (params, layer, input, labels)
}

fn classifier_nll(
    layer: &SoftmaxClassifier,
    params: &ParamRegistry,
    input: &[f32],
    labels: &[u8],
) -> f32 {
    let mut probs = vec![0.0; 2 * layer.n_classes()];
    layer.forward(params, input, &mut probs, 2);
    layer.loss(&probs, labels, 2)
}

#[test]
fn test_classifier_weight_gradients_match_finite_differences() {
    let (mut params, layer, input, labels) = classifier_fixture();

    let mut probs = vec![0.0; 2 * layer.n_classes()];
    layer.forward(&params, &input, &mut probs, 2);
    let mut grad_input = vec![0.0; input.len()];
    layer.backward(&mut params, &input, &probs, &labels, &mut grad_input, 2);
    let analytical: Vec<f32> = params.grad(layer.weight_id()).to_vec();

    for i in 0..analytical.len() {
        let original = params.values(layer.weight_id())[i];
        params.values_mut(layer.weight_id())[i] = original + EPSILON;
        let loss_plus = classifier_nll(&layer, &params, &input, &labels);
        params.values_mut(layer.weight_id())[i] = original - EPSILON;
        let loss_minus = classifier_nll(&layer, &params, &input, &labels);
        params.values_mut(layer.weight_id())[i] = original;

        let numerical = ((loss_plus - loss_minus) / (2.0 * EPSILON)) as f64;
        let rel_error = relative_error(numerical, analytical[i] as f64);
        assert!(
            rel_error < TOLERANCE,
            "classifier weight gradient mismatch at {}: numerical={:.6}, analytical={:.6}, rel_error={:.6}",
            i,
            numerical,
            analytical[i],
            rel_error
        );
    }
}

#[test]
fn test_classifier_bias_gradients_match_finite_differences() {
    let (mut params, layer, input, labels) = classifier_fixture();

    let mut probs = vec![0.0; 2 * layer.n_classes()];
    layer.forward(&params, &input, &mut probs, 2);
    let mut grad_input = vec![0.0; input.len()];
    layer.backward(&mut params, &input, &probs, &labels, &mut grad_input, 2);
    let analytical: Vec<f32> = params.grad(layer.bias_id()).to_vec();

    for i in 0..analytical.len() {
        let original = params.values(layer.bias_id())[i];
        params.values_mut(layer.bias_id())[i] = original + EPSILON;
        let loss_plus = classifier_nll(&layer, &params, &input, &labels);
        params.values_mut(layer.bias_id())[i] = original - EPSILON;
        let loss_minus = classifier_nll(&layer, &params, &input, &labels);
        params.values_mut(layer.bias_id())[i] = original;

        let numerical = ((loss_plus - loss_minus) / (2.0 * EPSILON)) as f64;
        let rel_error = relative_error(numerical, analytical[i] as f64);
        assert!(
            rel_error < TOLERANCE,
            "classifier bias gradient mismatch at {}: numerical={:.6}, analytical={:.6}, rel_error={:.6}",
            i,
            numerical,
            analytical[i],
            rel_error
        );
    }
}

#[test]
fn test_classifier_input_gradients_match_finite_differences() {
    let (mut params, layer, input, labels) = classifier_fixture();

    let mut probs = vec![0.0; 2 * layer.n_classes()];
    layer.forward(&params, &input, &mut probs, 2);
    let mut grad_input = vec![0.0; input.len()];
    layer.backward(&mut params, &input, &probs, &labels, &mut grad_input, 2);

    for i in 0..input.len() {
        let mut perturbed = input.clone();
        perturbed[i] = input[i] + EPSILON;
        let loss_plus = classifier_nll(&layer, &params, &perturbed, &labels);
        perturbed[i] = input[i] - EPSILON;
        let loss_minus = classifier_nll(&layer, &params, &perturbed, &labels);

        let numerical = ((loss_plus - loss_minus) / (2.0 * EPSILON)) as f64;
        let rel_error = relative_error(numerical, grad_input[i] as f64);
        assert!(
            rel_error < TOLERANCE,
            "classifier input gradient mismatch at {}: numerical={:.6}, analytical={:.6}, rel_error={:.6}",
            i,
            numerical,
            grad_input[i],
            rel_error
        );
    }
}
