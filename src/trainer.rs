//! Minibatch training driver.
//!
//! Runs the epoch/minibatch loop of the original experiment: per epoch a
//! fresh joint shuffle of the training split, per minibatch one
//! forward/backward/update step, periodic windowed progress reports, and a
//! patience-based early-stopping rule over the validation error. The ragged
//! tail of the training split is skipped each epoch; evaluation always
//! covers whole splits.

use crate::config::TrainConfig;
use crate::dataset::SentenceSet;
use crate::diagnostics::DiagnosticsCollector;
use crate::model::Dcnn;
use crate::optimizers::Optimizer;
use crate::utils::rng::SimpleRng;
use std::error::Error;
use std::io;
use std::time::Instant;

/// Outcome of one training run.
#[derive(Debug, Clone)]
pub struct TrainReport {
    pub epochs_run: usize,
    /// Minibatch steps executed.
    pub iterations: usize,
    pub best_validation_error: f32,
    /// 0-based global iteration of the best validation error.
    pub best_iteration: usize,
    pub final_train_error: f32,
    pub final_validation_error: f32,
    pub test_error: Option<f32>,
    pub stopped_early: bool,
    /// Mean training NLL per epoch (partial for an interrupted epoch).
    pub epoch_mean_nll: Vec<f32>,
    /// Cumulative wall-clock seconds at each epoch boundary.
    pub epoch_seconds: Vec<f32>,
}

/// Trains `model` on `train_set`, tracking the best validation error.
///
/// The test split, when given, is evaluated once after training with the
/// final parameters. Returns an error for configuration problems and for a
/// non-finite loss or gradient; in the latter case the failing step has not
/// touched parameters or optimizer accumulators.
pub fn train(
    model: &mut Dcnn,
    optimizer: &mut dyn Optimizer,
    train_set: &SentenceSet,
    valid_set: &SentenceSet,
    test_set: Option<&SentenceSet>,
    cfg: &TrainConfig,
    rng: &mut SimpleRng,
) -> Result<TrainReport, Box<dyn Error>> {
    cfg.validate()?;
    check_split(model, train_set, "train")?;
    check_split(model, valid_set, "validation")?;
    if let Some(set) = test_set {
        check_split(model, set, "test")?;
    }
    if cfg.batch_size > train_set.len() {
        return Err(invalid(&format!(
            "batch_size {} exceeds training split of {} sentences",
            cfg.batch_size,
            train_set.len()
        )));
    }
    if cfg.batch_size > model.batch_capacity() {
        return Err(invalid(&format!(
            "batch_size {} exceeds model batch capacity {}",
            cfg.batch_size,
            model.batch_capacity()
        )));
    }

    let batch = cfg.batch_size;
    let seq_len = model.seq_len();
    let n_train_batches = train_set.len() / batch;
    let validation_frequency = n_train_batches.min((cfg.patience / 2).max(1));

    let mut order: Vec<usize> = (0..train_set.len()).collect();
    let mut tokens = vec![0u32; batch * seq_len];
    let mut labels = vec![0u8; batch];
    let mut collector = DiagnosticsCollector::new(&cfg.diagnostics, model.n_classes());

    let mut patience = cfg.patience;
    let mut best_validation_error = f32::INFINITY;
    let mut best_iteration = 0usize;
    let mut iterations = 0usize;
    let mut epochs_run = 0usize;
    let mut stopped_early = false;
    let mut epoch_mean_nll = Vec::new();
    let mut epoch_seconds = Vec::new();
    let started = Instant::now();

    println!(
        "training: {} sentences, {} minibatches of {} per epoch, validating every {} iterations",
        train_set.len(),
        n_train_batches,
        batch,
        validation_frequency
    );

    model.set_training(true);
    'epochs: for epoch in 0..cfg.n_epochs {
        rng.shuffle_usize(&mut order);
        epochs_run = epoch + 1;
        let mut epoch_nll_sum = 0.0f32;
        let mut batches_done = 0usize;

        for i in 0..n_train_batches {
            let iter = epoch * n_train_batches + i;
            train_set.gather_batch(&order, i * batch, batch, &mut tokens, &mut labels);

            model.params_mut().zero_grads();
            model.forward(&tokens, batch);
            let nll = model.loss(&labels, batch);
            let l2 = model.l2_penalty();
            let cost = nll + l2;
            if !cost.is_finite() {
                return Err(invalid(&format!(
                    "non-finite training loss {} at iteration {}",
                    cost, iter
                )));
            }
            model.backward(&tokens, &labels, batch);
            model.params_mut().add_l2_gradients();
            model.params_mut().check_finite_grads()?;
            optimizer.step(model.params_mut());

            collector.observe_step(nll, l2, model.probs(batch), batch);
            epoch_nll_sum += nll;
            batches_done = i + 1;
            iterations = iter + 1;

            if (i + 1) % cfg.report_every == 0 || i + 1 == n_train_batches {
                println!(
                    "epoch {}, {} / {} minibatches completed",
                    epoch + 1,
                    i + 1,
                    n_train_batches
                );
                let record = collector.take_record(model.params(), cfg.epsilon);
                if !record.is_empty() {
                    println!("  {}", record.summary());
                }
            }

            if (iter + 1) % validation_frequency == 0 {
                let validation_error = model.error_rate(valid_set);
                let train_error = model.error_rate(train_set);
                println!(
                    "epoch {}, minibatch {}/{}: train error {:.4} %, validation error {:.4} %",
                    epoch + 1,
                    i + 1,
                    n_train_batches,
                    train_error * 100.0,
                    validation_error * 100.0
                );
                if validation_error < best_validation_error {
                    if significant_improvement(
                        validation_error,
                        best_validation_error,
                        cfg.improvement_threshold,
                    ) {
                        patience = patience.max(iter * cfg.patience_increase);
                    }
                    best_validation_error = validation_error;
                    best_iteration = iter;
                }
            }

            if cfg.early_stopping && patience <= iter {
                stopped_early = true;
                epoch_mean_nll.push(epoch_nll_sum / batches_done as f32);
                epoch_seconds.push(started.elapsed().as_secs_f32());
                println!(
                    "early stopping at iteration {}: patience {} exhausted",
                    iter, patience
                );
                break 'epochs;
            }
        }

        epoch_mean_nll.push(epoch_nll_sum / batches_done.max(1) as f32);
        epoch_seconds.push(started.elapsed().as_secs_f32());
    }
    model.set_training(false);

    let final_train_error = model.error_rate(train_set);
    let final_validation_error = model.error_rate(valid_set);
    let test_error = test_set.map(|set| model.error_rate(set));

    println!(
        "training finished after {} iterations in {:.1} s: best validation error {:.4} % at iteration {}",
        iterations,
        started.elapsed().as_secs_f32(),
        best_validation_error * 100.0,
        best_iteration
    );
    if let Some(err) = test_error {
        println!("test error with final parameters: {:.4} %", err * 100.0);
    }

    Ok(TrainReport {
        epochs_run,
        iterations,
        best_validation_error,
        best_iteration,
        final_train_error,
        final_validation_error,
        test_error,
        stopped_early,
        epoch_mean_nll,
        epoch_seconds,
    })
}

/// The early-stopping significance rule: a new error counts as significant
/// when it beats the best by the relative threshold factor.
fn significant_improvement(error: f32, best: f32, threshold: f32) -> bool {
    error < best * threshold
}

fn check_split(model: &Dcnn, set: &SentenceSet, name: &str) -> Result<(), Box<dyn Error>> {
    if set.seq_len() != model.seq_len() {
        return Err(invalid(&format!(
            "{} split seq_len {} does not match model seq_len {}",
            name,
            set.seq_len(),
            model.seq_len()
        )));
    }
    if set.class_count() > model.n_classes() {
        return Err(invalid(&format!(
            "{} split contains label {} but the model has {} classes",
            name,
            set.class_count() - 1,
            model.n_classes()
        )));
    }
    Ok(())
}

fn invalid(msg: &str) -> Box<dyn Error> {
    Box::new(io::Error::new(io::ErrorKind::InvalidData, msg))
}
