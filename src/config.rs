//! Configuration structures for the model and the training driver.
//!
//! Both structs deserialize from JSON with every field optional; missing
//! fields fall back to the defaults of the reference configuration. Loading
//! runs a validation pass so a bad rate or size is reported up front rather
//! than as a panic mid-training.

use crate::diagnostics::Diagnostic;
use serde::Deserialize;
use std::error::Error;
use std::fs;
use std::io;

/// Optimizer selection: `"adadelta"` or `"sgd"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OptimizerKind {
    AdaDelta,
    Sgd,
}

/// Network architecture parameters.
///
/// The two convolution stages are fixed; `nkerns` and `filter_widths` give
/// their filter counts and widths in order. `dropout_rates` are the drop
/// probabilities before stage one, stage two and the classifier.
///
/// # Example
///
/// ```json
/// {
///   "embed_dim": 48,
///   "nkerns": [6, 12],
///   "filter_widths": [10, 7],
///   "k_top": 5,
///   "train_embeddings": false
/// }
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Embedding dimension (rows of the sentence matrix).
    pub embed_dim: usize,

    /// Filters per convolution stage.
    pub nkerns: [usize; 2],

    /// Filter width per convolution stage, along the sequence axis.
    pub filter_widths: [usize; 2],

    /// Pooling size of the topmost stage.
    pub k_top: usize,

    /// Drop probabilities for the three dropout layers.
    pub dropout_rates: [f32; 3],

    /// L2 coefficient of the embedding table.
    pub embed_l2: f32,

    /// L2 coefficients of the two filter banks.
    pub conv_l2: [f32; 2],

    /// L2 coefficient of the classifier weight matrix.
    pub classifier_l2: f32,

    /// When false the embedding table is frozen: gradients still flow but
    /// the optimizer leaves the table (and its pad row) untouched.
    pub train_embeddings: bool,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            embed_dim: 48,
            nkerns: [6, 12],
            filter_widths: [10, 7],
            k_top: 5,
            dropout_rates: [0.5, 0.5, 0.5],
            embed_l2: 1e-5,
            conv_l2: [3e-4, 3e-4],
            classifier_l2: 1e-4,
            train_embeddings: true,
        }
    }
}

impl ModelConfig {
    /// Range checks on the architecture parameters.
    ///
    /// Geometric compatibility between stages (even fold heights, k against
    /// the convolved length) depends on the data and is checked when the
    /// model is built.
    pub fn validate(&self) -> Result<(), Box<dyn Error>> {
        if self.embed_dim == 0 {
            return Err(invalid("embed_dim must be positive"));
        }
        if self.nkerns.iter().any(|&n| n == 0) {
            return Err(invalid("nkerns entries must be positive"));
        }
        if self.filter_widths.iter().any(|&w| w == 0) {
            return Err(invalid("filter_widths entries must be positive"));
        }
        if self.k_top == 0 {
            return Err(invalid("k_top must be positive"));
        }
        for &rate in &self.dropout_rates {
            if !(0.0..1.0).contains(&rate) {
                return Err(invalid(&format!(
                    "dropout rate {} outside [0, 1)",
                    rate
                )));
            }
        }
        for &l2 in [self.embed_l2, self.conv_l2[0], self.conv_l2[1], self.classifier_l2].iter() {
            if l2 < 0.0 {
                return Err(invalid(&format!("L2 coefficient {} is negative", l2)));
            }
        }
        Ok(())
    }
}

/// Training driver parameters.
///
/// `patience`, `patience_increase` and `improvement_threshold` control early
/// stopping; with `early_stopping` false the driver always runs the full
/// epoch budget and the patience fields are ignored.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TrainConfig {
    pub optimizer: OptimizerKind,

    /// Step size for `sgd`; carried but unused by `adadelta`.
    pub learning_rate: f32,

    /// AdaDelta decay.
    pub rho: f32,

    /// AdaDelta stability floor.
    pub epsilon: f32,

    pub batch_size: usize,

    pub n_epochs: usize,

    /// Progress-report cadence in minibatches.
    pub report_every: usize,

    /// Minimum number of iterations before early stopping may trigger.
    pub patience: usize,

    /// Patience multiplier applied on significant improvement.
    pub patience_increase: usize,

    /// Relative validation-error factor counted as significant.
    pub improvement_threshold: f32,

    pub early_stopping: bool,

    pub seed: u64,

    /// Extra per-report measurements; an unknown name fails parsing.
    pub diagnostics: Vec<Diagnostic>,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            optimizer: OptimizerKind::AdaDelta,
            learning_rate: 0.1,
            rho: 0.95,
            epsilon: 1e-6,
            batch_size: 500,
            n_epochs: 2000,
            report_every: 50,
            patience: 10000,
            patience_increase: 2,
            improvement_threshold: 0.995,
            early_stopping: true,
            seed: 1234,
            diagnostics: Vec::new(),
        }
    }
}

impl TrainConfig {
    pub fn validate(&self) -> Result<(), Box<dyn Error>> {
        if self.learning_rate < 0.0 {
            return Err(invalid("learning_rate must be non-negative"));
        }
        if !(0.0 < self.rho && self.rho < 1.0) {
            return Err(invalid(&format!("rho {} outside (0, 1)", self.rho)));
        }
        if self.epsilon <= 0.0 {
            return Err(invalid("epsilon must be positive"));
        }
        if self.batch_size == 0 {
            return Err(invalid("batch_size must be positive"));
        }
        if self.n_epochs == 0 {
            return Err(invalid("n_epochs must be positive"));
        }
        if self.report_every == 0 {
            return Err(invalid("report_every must be positive"));
        }
        if self.patience == 0 {
            return Err(invalid("patience must be positive"));
        }
        if self.patience_increase == 0 {
            return Err(invalid("patience_increase must be positive"));
        }
        if !(0.0 < self.improvement_threshold && self.improvement_threshold <= 1.0) {
            return Err(invalid(&format!(
                "improvement_threshold {} outside (0, 1]",
                self.improvement_threshold
            )));
        }
        Ok(())
    }
}

/// Loads and validates a model configuration from a JSON file.
pub fn load_model_config(path: &str) -> Result<ModelConfig, Box<dyn Error>> {
    let contents = fs::read_to_string(path)?;
    let config: ModelConfig = serde_json::from_str(&contents)?;
    config.validate()?;
    Ok(config)
}

/// Loads and validates a training configuration from a JSON file.
pub fn load_train_config(path: &str) -> Result<TrainConfig, Box<dyn Error>> {
    let contents = fs::read_to_string(path)?;
    let config: TrainConfig = serde_json::from_str(&contents)?;
    config.validate()?;
    Ok(config)
}

fn invalid(msg: &str) -> Box<dyn Error> {
    Box::new(io::Error::new(io::ErrorKind::InvalidData, msg))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_reference_configuration() {
        let model = ModelConfig::default();
        assert_eq!(model.embed_dim, 48);
        assert_eq!(model.nkerns, [6, 12]);
        assert_eq!(model.filter_widths, [10, 7]);
        assert_eq!(model.k_top, 5);
        assert_eq!(model.dropout_rates, [0.5, 0.5, 0.5]);
        assert!(model.train_embeddings);

        let train = TrainConfig::default();
        assert_eq!(train.optimizer, OptimizerKind::AdaDelta);
        assert_eq!(train.batch_size, 500);
        assert_eq!(train.n_epochs, 2000);
        assert_eq!(train.rho, 0.95);
        assert_eq!(train.epsilon, 1e-6);
        assert_eq!(train.seed, 1234);
        assert_eq!(train.patience, 10000);
        assert!(train.early_stopping);
        assert!(train.diagnostics.is_empty());

        assert!(model.validate().is_ok());
        assert!(train.validate().is_ok());
    }

    #[test]
    fn rejects_dropout_rate_of_one() {
        let mut model = ModelConfig::default();
        model.dropout_rates[1] = 1.0;
        let err = model.validate().unwrap_err();
        assert!(err.to_string().contains("dropout rate"));
    }

    #[test]
    fn rejects_zero_batch_size() {
        let train = TrainConfig {
            batch_size: 0,
            ..TrainConfig::default()
        };
        assert!(train.validate().is_err());
    }

    #[test]
    fn rejects_rho_outside_unit_interval() {
        let train = TrainConfig {
            rho: 1.0,
            ..TrainConfig::default()
        };
        assert!(train.validate().is_err());
    }

    #[test]
    fn parses_optimizer_and_diagnostic_names() {
        let train: TrainConfig = serde_json::from_str(
            r#"{"optimizer": "sgd", "diagnostics": ["nll", "step-scale", "class-probabilities"]}"#,
        )
        .unwrap();
        assert_eq!(train.optimizer, OptimizerKind::Sgd);
        assert_eq!(
            train.diagnostics,
            vec![
                Diagnostic::Nll,
                Diagnostic::StepScale,
                Diagnostic::ClassProbabilities
            ]
        );
        // Other fields keep their defaults.
        assert_eq!(train.batch_size, 500);
    }

    #[test]
    fn unknown_diagnostic_name_fails_parsing() {
        let result: Result<TrainConfig, _> =
            serde_json::from_str(r#"{"diagnostics": ["learning-rate"]}"#);
        assert!(result.is_err());
    }
}
