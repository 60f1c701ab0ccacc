//! Optional per-report training diagnostics.
//!
//! The configuration names a set of measurements; the driver feeds a
//! [`DiagnosticsCollector`] once per minibatch and drains it into a
//! [`DiagnosticsRecord`] at every progress report. Records are read-only
//! snapshots; producing one never touches parameters or optimizer state.

use crate::params::ParamRegistry;
use serde::Deserialize;

/// One switchable measurement.
///
/// The kebab-case names are the configuration strings; deserializing an
/// unknown name is a parse error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Diagnostic {
    /// Windowed mean negative log-likelihood.
    Nll,
    /// Windowed mean weighted L2 penalty.
    L2Penalty,
    /// Mean absolute gradient per parameter tensor, from the last step.
    GradAbsMean,
    /// Mean effective AdaDelta step scale per parameter tensor.
    StepScale,
    /// Mean absolute value of the embedding table.
    Embeddings,
    /// Mean absolute value of the first filter bank.
    Conv1Weights,
    /// Mean absolute value of the second filter bank.
    Conv2Weights,
    /// Mean absolute value of the classifier weight matrix.
    ClassifierWeights,
    /// Windowed mean predicted probability per class.
    ClassProbabilities,
}

/// Snapshot of the enabled diagnostics at one report boundary.
///
/// Fields for disabled diagnostics stay `None` (or empty for the per-tensor
/// lists).
#[derive(Debug, Clone, Default)]
pub struct DiagnosticsRecord {
    pub nll: Option<f32>,
    pub l2_penalty: Option<f32>,
    pub grad_abs_means: Vec<(String, f32)>,
    pub step_scales: Vec<(String, f32)>,
    pub embeddings_abs_mean: Option<f32>,
    pub conv1_abs_mean: Option<f32>,
    pub conv2_abs_mean: Option<f32>,
    pub classifier_abs_mean: Option<f32>,
    pub class_probabilities: Option<Vec<f32>>,
}

impl DiagnosticsRecord {
    pub fn is_empty(&self) -> bool {
        self.nll.is_none()
            && self.l2_penalty.is_none()
            && self.grad_abs_means.is_empty()
            && self.step_scales.is_empty()
            && self.embeddings_abs_mean.is_none()
            && self.conv1_abs_mean.is_none()
            && self.conv2_abs_mean.is_none()
            && self.classifier_abs_mean.is_none()
            && self.class_probabilities.is_none()
    }

    /// One-line rendering for the progress report.
    pub fn summary(&self) -> String {
        let mut parts: Vec<String> = Vec::new();
        if let Some(nll) = self.nll {
            parts.push(format!("nll {:.6}", nll));
        }
        if let Some(l2) = self.l2_penalty {
            parts.push(format!("l2 {:.6}", l2));
        }
        for (name, value) in &self.grad_abs_means {
            parts.push(format!("|g|({}) {:.6}", name, value));
        }
        for (name, value) in &self.step_scales {
            parts.push(format!("step({}) {:.6}", name, value));
        }
        if let Some(v) = self.embeddings_abs_mean {
            parts.push(format!("|embeddings| {:.6}", v));
        }
        if let Some(v) = self.conv1_abs_mean {
            parts.push(format!("|conv1_W| {:.6}", v));
        }
        if let Some(v) = self.conv2_abs_mean {
            parts.push(format!("|conv2_W| {:.6}", v));
        }
        if let Some(v) = self.classifier_abs_mean {
            parts.push(format!("|softmax_W| {:.6}", v));
        }
        if let Some(probs) = &self.class_probabilities {
            let rendered: Vec<String> = probs.iter().map(|p| format!("{:.4}", p)).collect();
            parts.push(format!("p(class) [{}]", rendered.join(", ")));
        }
        parts.join(" | ")
    }
}

/// Accumulates per-step measurements between report boundaries.
pub struct DiagnosticsCollector {
    enabled: Vec<Diagnostic>,
    n_classes: usize,
    nll_sum: f32,
    l2_sum: f32,
    prob_sums: Vec<f32>,
    steps: usize,
}

impl DiagnosticsCollector {
    pub fn new(enabled: &[Diagnostic], n_classes: usize) -> Self {
        Self {
            enabled: enabled.to_vec(),
            n_classes,
            nll_sum: 0.0,
            l2_sum: 0.0,
            prob_sums: vec![0.0; n_classes],
            steps: 0,
        }
    }

    fn wants(&self, diagnostic: Diagnostic) -> bool {
        self.enabled.contains(&diagnostic)
    }

    /// Folds one minibatch into the current window.
    ///
    /// `probs` is the forward pass's probability matrix for the minibatch,
    /// one row per instance.
    pub fn observe_step(&mut self, nll: f32, l2_penalty: f32, probs: &[f32], batch_size: usize) {
        self.steps += 1;
        if self.wants(Diagnostic::Nll) {
            self.nll_sum += nll;
        }
        if self.wants(Diagnostic::L2Penalty) {
            self.l2_sum += l2_penalty;
        }
        if self.wants(Diagnostic::ClassProbabilities) && batch_size > 0 {
            for row in probs.chunks_exact(self.n_classes).take(batch_size) {
                for (sum, &p) in self.prob_sums.iter_mut().zip(row) {
                    *sum += p / batch_size as f32;
                }
            }
        }
    }

    /// Drains the window into a record and clears it.
    ///
    /// `epsilon` is the AdaDelta floor used by the step-scale measurement.
    pub fn take_record(&mut self, params: &ParamRegistry, epsilon: f32) -> DiagnosticsRecord {
        let mut record = DiagnosticsRecord::default();
        let steps = self.steps.max(1) as f32;

        if self.wants(Diagnostic::Nll) {
            record.nll = Some(self.nll_sum / steps);
        }
        if self.wants(Diagnostic::L2Penalty) {
            record.l2_penalty = Some(self.l2_sum / steps);
        }
        if self.wants(Diagnostic::GradAbsMean) {
            record.grad_abs_means = params
                .iter()
                .map(|t| (t.name().to_string(), t.grad_abs_mean()))
                .collect();
        }
        if self.wants(Diagnostic::StepScale) {
            record.step_scales = params
                .iter()
                .map(|t| (t.name().to_string(), t.step_scale_mean(epsilon)))
                .collect();
        }
        if self.wants(Diagnostic::Embeddings) {
            record.embeddings_abs_mean = abs_mean(params, "embeddings");
        }
        if self.wants(Diagnostic::Conv1Weights) {
            record.conv1_abs_mean = abs_mean(params, "conv1_W");
        }
        if self.wants(Diagnostic::Conv2Weights) {
            record.conv2_abs_mean = abs_mean(params, "conv2_W");
        }
        if self.wants(Diagnostic::ClassifierWeights) {
            record.classifier_abs_mean = abs_mean(params, "softmax_W");
        }
        if self.wants(Diagnostic::ClassProbabilities) {
            record.class_probabilities =
                Some(self.prob_sums.iter().map(|s| s / steps).collect());
        }

        self.nll_sum = 0.0;
        self.l2_sum = 0.0;
        for s in &mut self.prob_sums {
            *s = 0.0;
        }
        self.steps = 0;
        record
    }
}

fn abs_mean(params: &ParamRegistry, name: &str) -> Option<f32> {
    params.find(name).map(|id| {
        let values = params.values(id);
        if values.is_empty() {
            return 0.0;
        }
        let sum: f32 = values.iter().map(|v| v.abs()).sum();
        sum / values.len() as f32
    })
}
