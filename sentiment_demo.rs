// sentiment_demo.rs
// Trains a small dynamic convolutional sentence classifier on a synthetic
// two-class corpus (class-banded token ids, varying sentence lengths) and
// reports train/validation/test error.
//
// Output:
//   - logs/sentiment_demo_loss.csv (epoch,mean_nll,seconds)
//   - progress and a final error summary on stdout.

use sentconv::config::{ModelConfig, TrainConfig};
use sentconv::dataset::{synthetic_split, synthetic_vocab};
use sentconv::diagnostics::Diagnostic;
use sentconv::model::Dcnn;
use sentconv::optimizers;
use sentconv::trainer::train;
use sentconv::utils::rng::SimpleRng;
use std::error::Error;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::process;

// Corpus shape.
const N_CLASSES: usize = 2;
const TOKENS_PER_CLASS: usize = 40;
const SEQ_LEN: usize = 20;
const TRAIN_SENTENCES: usize = 600;
const VALID_SENTENCES: usize = 200;
const TEST_SENTENCES: usize = 200;

// Training budget.
const BATCH_SIZE: usize = 50;
const N_EPOCHS: usize = 12;
const SEED: u64 = 1234;

fn fail(err: Box<dyn Error>) -> ! {
    eprintln!("sentiment_demo: {}", err);
    process::exit(1);
}

fn main() {
    let mut rng = SimpleRng::new(SEED);

    let vocab = synthetic_vocab(N_CLASSES, TOKENS_PER_CLASS).unwrap_or_else(|e| fail(e));
    let train_set = synthetic_split(&mut rng, TRAIN_SENTENCES, N_CLASSES, TOKENS_PER_CLASS, SEQ_LEN)
        .unwrap_or_else(|e| fail(e));
    let valid_set = synthetic_split(&mut rng, VALID_SENTENCES, N_CLASSES, TOKENS_PER_CLASS, SEQ_LEN)
        .unwrap_or_else(|e| fail(e));
    let test_set = synthetic_split(&mut rng, TEST_SENTENCES, N_CLASSES, TOKENS_PER_CLASS, SEQ_LEN)
        .unwrap_or_else(|e| fail(e));
    println!(
        "synthetic corpus: vocabulary {} (pad id {}), train {} / valid {} / test {}",
        vocab.len(),
        vocab.pad_id(),
        train_set.len(),
        valid_set.len(),
        test_set.len()
    );

    let model_cfg = ModelConfig {
        embed_dim: 16,
        nkerns: [4, 6],
        filter_widths: [6, 4],
        k_top: 4,
        dropout_rates: [0.2, 0.2, 0.2],
        ..ModelConfig::default()
    };
    let train_cfg = TrainConfig {
        batch_size: BATCH_SIZE,
        n_epochs: N_EPOCHS,
        report_every: 5,
        seed: SEED,
        diagnostics: vec![Diagnostic::Nll, Diagnostic::L2Penalty, Diagnostic::StepScale],
        ..TrainConfig::default()
    };

    let mut model = Dcnn::new(
        &model_cfg,
        vocab.len(),
        SEQ_LEN,
        N_CLASSES,
        BATCH_SIZE,
        &mut rng,
    )
    .unwrap_or_else(|e| fail(e));
    let mut optimizer = optimizers::from_config(&train_cfg);

    let report = train(
        &mut model,
        optimizer.as_mut(),
        &train_set,
        &valid_set,
        Some(&test_set),
        &train_cfg,
        &mut rng,
    )
    .unwrap_or_else(|e| fail(e));

    // Per-epoch loss log.
    fs::create_dir_all("./logs").ok();
    let log_file = File::create("./logs/sentiment_demo_loss.csv").unwrap_or_else(|_| {
        eprintln!("Could not create logs/sentiment_demo_loss.csv");
        process::exit(1);
    });
    let mut log = BufWriter::new(log_file);
    writeln!(log, "epoch,mean_nll,seconds").ok();
    for (epoch, (nll, seconds)) in report
        .epoch_mean_nll
        .iter()
        .zip(report.epoch_seconds.iter())
        .enumerate()
    {
        writeln!(log, "{},{:.6},{:.3}", epoch + 1, nll, seconds).ok();
    }

    println!(
        "done: {} epochs, train error {:.2} %, validation error {:.2} %, test error {:.2} %",
        report.epochs_run,
        report.final_train_error * 100.0,
        report.final_validation_error * 100.0,
        report.test_error.unwrap_or(f32::NAN) * 100.0
    );
}
