//! The sentence convolution network.
//!
//! Fixed pipeline: embedding lookup → dropout → conv/fold/k-max stage one →
//! dropout → conv/fold/k-max stage two → dropout → softmax classifier. The
//! model owns the parameter registry and a preallocated workspace for every
//! inter-layer tensor, sized once for the largest batch it will see.

use crate::config::ModelConfig;
use crate::dataset::SentenceSet;
use crate::layers::{ConvFoldPoolLayer, DropoutLayer, EmbeddingLayer, SoftmaxClassifier};
use crate::params::ParamRegistry;
use crate::utils::rng::SimpleRng;
use std::error::Error;
use std::io;

/// Inter-layer buffers for one minibatch, forward and backward.
#[derive(Debug)]
struct Workspace {
    embedded: Vec<f32>,
    dropped1: Vec<f32>,
    pooled1: Vec<f32>,
    dropped2: Vec<f32>,
    pooled2: Vec<f32>,
    dropped3: Vec<f32>,
    probs: Vec<f32>,
    grad_dropped3: Vec<f32>,
    grad_pooled2: Vec<f32>,
    grad_dropped2: Vec<f32>,
    grad_pooled1: Vec<f32>,
    grad_dropped1: Vec<f32>,
    grad_embedded: Vec<f32>,
}

impl Workspace {
    fn new(capacity: usize, embed_size: usize, out1: usize, out2: usize, n_classes: usize) -> Self {
        Self {
            embedded: vec![0.0; capacity * embed_size],
            dropped1: vec![0.0; capacity * embed_size],
            pooled1: vec![0.0; capacity * out1],
            dropped2: vec![0.0; capacity * out1],
            pooled2: vec![0.0; capacity * out2],
            dropped3: vec![0.0; capacity * out2],
            probs: vec![0.0; capacity * n_classes],
            grad_dropped3: vec![0.0; capacity * out2],
            grad_pooled2: vec![0.0; capacity * out2],
            grad_dropped2: vec![0.0; capacity * out1],
            grad_pooled1: vec![0.0; capacity * out1],
            grad_dropped1: vec![0.0; capacity * embed_size],
            grad_embedded: vec![0.0; capacity * embed_size],
        }
    }
}

/// Dynamic convolutional sentence classifier.
#[derive(Debug)]
pub struct Dcnn {
    embedding: EmbeddingLayer,
    dropout1: DropoutLayer,
    conv1: ConvFoldPoolLayer,
    dropout2: DropoutLayer,
    conv2: ConvFoldPoolLayer,
    dropout3: DropoutLayer,
    classifier: SoftmaxClassifier,
    params: ParamRegistry,
    n_classes: usize,
    batch_capacity: usize,
    training: bool,
    ws: Workspace,
}

impl Dcnn {
    /// Builds the network for fixed sentence geometry.
    ///
    /// The first stage pools to k1 = max(k_top, ceil(seq_len / 2)), the
    /// second to k_top. All parameter tensors register in pipeline order so
    /// a fixed seed reproduces the same initialization; each dropout layer
    /// forks its own child generator from `rng`.
    ///
    /// Fails on incompatible geometry: an odd embedding-axis length at
    /// either fold (embed_dim must be a multiple of 4), k_top exceeding the
    /// convolved sequence length, or degenerate sizes.
    pub fn new(
        cfg: &ModelConfig,
        vocab_size: usize,
        seq_len: usize,
        n_classes: usize,
        batch_capacity: usize,
        rng: &mut SimpleRng,
    ) -> Result<Self, Box<dyn Error>> {
        cfg.validate()?;
        if vocab_size < 2 {
            return Err(invalid(
                "vocabulary must hold at least one real token plus the pad token",
            ));
        }
        if seq_len == 0 {
            return Err(invalid("seq_len must be positive"));
        }
        if !(2..=256).contains(&n_classes) {
            return Err(invalid(&format!(
                "n_classes {} outside the supported range [2, 256]",
                n_classes
            )));
        }
        if batch_capacity == 0 {
            return Err(invalid("batch capacity must be positive"));
        }

        let k1 = cfg.k_top.max((seq_len + 1) / 2);

        let mut params = ParamRegistry::new();
        let embedding = EmbeddingLayer::new(
            &mut params,
            rng,
            vocab_size,
            cfg.embed_dim,
            seq_len,
            cfg.embed_l2,
            cfg.train_embeddings,
        );
        let dropout1 = DropoutLayer::new(cfg.dropout_rates[0], rng);
        let conv1 = ConvFoldPoolLayer::new(
            &mut params,
            rng,
            "conv1",
            1,
            cfg.embed_dim,
            seq_len,
            cfg.nkerns[0],
            1,
            cfg.filter_widths[0],
            k1,
            cfg.conv_l2[0],
        )?;
        let dropout2 = DropoutLayer::new(cfg.dropout_rates[1], rng);
        let conv2 = ConvFoldPoolLayer::new(
            &mut params,
            rng,
            "conv2",
            cfg.nkerns[0],
            conv1.output_rows(),
            k1,
            cfg.nkerns[1],
            1,
            cfg.filter_widths[1],
            cfg.k_top,
            cfg.conv_l2[1],
        )?;
        let dropout3 = DropoutLayer::new(cfg.dropout_rates[2], rng);
        let classifier = SoftmaxClassifier::new(
            &mut params,
            rng,
            conv2.output_size(),
            n_classes,
            cfg.classifier_l2,
        );

        let ws = Workspace::new(
            batch_capacity,
            embedding.output_size(),
            conv1.output_size(),
            conv2.output_size(),
            n_classes,
        );

        Ok(Self {
            embedding,
            dropout1,
            conv1,
            dropout2,
            conv2,
            dropout3,
            classifier,
            params,
            n_classes,
            batch_capacity,
            training: false,
            ws,
        })
    }

    pub fn n_classes(&self) -> usize {
        self.n_classes
    }

    pub fn seq_len(&self) -> usize {
        self.embedding.seq_len()
    }

    pub fn batch_capacity(&self) -> usize {
        self.batch_capacity
    }

    pub fn is_training(&self) -> bool {
        self.training
    }

    pub fn embedding(&self) -> &EmbeddingLayer {
        &self.embedding
    }

    pub fn conv1(&self) -> &ConvFoldPoolLayer {
        &self.conv1
    }

    pub fn conv2(&self) -> &ConvFoldPoolLayer {
        &self.conv2
    }

    pub fn classifier(&self) -> &SoftmaxClassifier {
        &self.classifier
    }

    pub fn params(&self) -> &ParamRegistry {
        &self.params
    }

    pub fn params_mut(&mut self) -> &mut ParamRegistry {
        &mut self.params
    }

    /// Weighted L2 penalty of the current parameters.
    pub fn l2_penalty(&self) -> f32 {
        self.params.l2_penalty()
    }

    /// Switches the dropout layers between training and inference behavior.
    pub fn set_training(&mut self, training: bool) {
        self.training = training;
        self.dropout1.set_training(training);
        self.dropout2.set_training(training);
        self.dropout3.set_training(training);
    }

    /// Runs the pipeline, leaving class probabilities in the workspace.
    pub fn forward(&mut self, tokens: &[u32], batch_size: usize) {
        assert!(
            batch_size >= 1 && batch_size <= self.batch_capacity,
            "batch size {} outside workspace capacity {}",
            batch_size,
            self.batch_capacity
        );

        let esize = self.embedding.output_size();
        let o1 = self.conv1.output_size();
        let o2 = self.conv2.output_size();
        let c = self.n_classes;
        let ws = &mut self.ws;

        self.embedding
            .forward(&self.params, tokens, &mut ws.embedded[..batch_size * esize], batch_size);
        self.dropout1
            .forward(&ws.embedded[..batch_size * esize], &mut ws.dropped1[..batch_size * esize]);
        self.conv1.forward(
            &self.params,
            &ws.dropped1[..batch_size * esize],
            &mut ws.pooled1[..batch_size * o1],
            batch_size,
        );
        self.dropout2
            .forward(&ws.pooled1[..batch_size * o1], &mut ws.dropped2[..batch_size * o1]);
        self.conv2.forward(
            &self.params,
            &ws.dropped2[..batch_size * o1],
            &mut ws.pooled2[..batch_size * o2],
            batch_size,
        );
        self.dropout3
            .forward(&ws.pooled2[..batch_size * o2], &mut ws.dropped3[..batch_size * o2]);
        self.classifier.forward(
            &self.params,
            &ws.dropped3[..batch_size * o2],
            &mut ws.probs[..batch_size * c],
            batch_size,
        );
    }

    /// Probability rows of the last forward pass.
    pub fn probs(&self, batch_size: usize) -> &[f32] {
        &self.ws.probs[..batch_size * self.n_classes]
    }

    /// Mean negative log-likelihood of the last forward pass.
    pub fn loss(&self, labels: &[u8], batch_size: usize) -> f32 {
        self.classifier
            .loss(&self.ws.probs[..batch_size * self.n_classes], labels, batch_size)
    }

    /// Accumulates parameter gradients from the last forward pass.
    ///
    /// `tokens` must be the batch of the matching forward call. Gradients
    /// add into the registry, so the caller zeroes them between minibatches.
    pub fn backward(&mut self, tokens: &[u32], labels: &[u8], batch_size: usize) {
        let esize = self.embedding.output_size();
        let o1 = self.conv1.output_size();
        let o2 = self.conv2.output_size();
        let c = self.n_classes;
        let ws = &mut self.ws;

        self.classifier.backward(
            &mut self.params,
            &ws.dropped3[..batch_size * o2],
            &ws.probs[..batch_size * c],
            labels,
            &mut ws.grad_dropped3[..batch_size * o2],
            batch_size,
        );
        self.dropout3.backward(
            &ws.grad_dropped3[..batch_size * o2],
            &mut ws.grad_pooled2[..batch_size * o2],
        );
        self.conv2.backward(
            &mut self.params,
            &ws.dropped2[..batch_size * o1],
            &ws.pooled2[..batch_size * o2],
            &ws.grad_pooled2[..batch_size * o2],
            &mut ws.grad_dropped2[..batch_size * o1],
            batch_size,
        );
        self.dropout2.backward(
            &ws.grad_dropped2[..batch_size * o1],
            &mut ws.grad_pooled1[..batch_size * o1],
        );
        self.conv1.backward(
            &mut self.params,
            &ws.dropped1[..batch_size * esize],
            &ws.pooled1[..batch_size * o1],
            &ws.grad_pooled1[..batch_size * o1],
            &mut ws.grad_dropped1[..batch_size * esize],
            batch_size,
        );
        self.dropout1.backward(
            &ws.grad_dropped1[..batch_size * esize],
            &mut ws.grad_embedded[..batch_size * esize],
        );
        self.embedding.backward(
            &mut self.params,
            tokens,
            &ws.grad_embedded[..batch_size * esize],
            batch_size,
        );
    }

    /// Fraction of misclassified sentences over a whole split.
    ///
    /// Runs in inference mode (dropout off) in capacity-sized chunks,
    /// including the ragged tail, and restores the previous mode. Never
    /// touches parameters or gradients.
    pub fn error_rate(&mut self, set: &SentenceSet) -> f32 {
        assert_eq!(
            set.seq_len(),
            self.seq_len(),
            "split seq_len {} does not match model seq_len {}",
            set.seq_len(),
            self.seq_len()
        );

        let was_training = self.training;
        self.set_training(false);

        let seq_len = self.seq_len();
        let mut wrong = 0usize;
        let mut start = 0usize;
        while start < set.len() {
            let m = self.batch_capacity.min(set.len() - start);
            let tokens = &set.ids()[start * seq_len..(start + m) * seq_len];
            let labels = &set.labels()[start..start + m];
            self.forward(tokens, m);
            wrong += self
                .classifier
                .errors(&self.ws.probs[..m * self.n_classes], labels, m);
            start += m;
        }

        self.set_training(was_training);
        wrong as f32 / set.len() as f32
    }
}

fn invalid(msg: &str) -> Box<dyn Error> {
    Box::new(io::Error::new(io::ErrorKind::InvalidData, msg))
}
