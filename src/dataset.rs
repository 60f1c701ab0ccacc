//! Tokenized sentence splits and minibatch gathering.
//!
//! The corpus pipeline proper (tokenization, padding, serialization) lives
//! outside this crate; training consumes pre-padded integer matrices. Every
//! sentence in a split shares one fixed `seq_len`, short sentences carrying
//! the pad token in their tail positions.

use crate::utils::rng::SimpleRng;
use std::collections::HashMap;
use std::error::Error;
use std::io;

/// Token/string mapping. The pad token `<PAD>` is always the last index.
pub struct Vocab {
    words: Vec<String>,
    index: HashMap<String, u32>,
}

impl Vocab {
    /// Builds a vocabulary from the real words, appending `<PAD>` last.
    pub fn new(mut words: Vec<String>) -> Result<Self, Box<dyn Error>> {
        if words.is_empty() {
            return Err(invalid("vocabulary needs at least one real word"));
        }
        if words.iter().any(|w| w == "<PAD>") {
            return Err(invalid("<PAD> is reserved for the padding slot"));
        }
        words.push("<PAD>".to_string());

        let mut index = HashMap::with_capacity(words.len());
        for (i, word) in words.iter().enumerate() {
            if index.insert(word.clone(), i as u32).is_some() {
                return Err(invalid(&format!("duplicate word '{}' in vocabulary", word)));
            }
        }
        Ok(Self { words, index })
    }

    /// Total size including the pad slot.
    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    /// The reserved padding id, always the last index.
    pub fn pad_id(&self) -> u32 {
        (self.words.len() - 1) as u32
    }

    pub fn word(&self, id: u32) -> Option<&str> {
        self.words.get(id as usize).map(|w| w.as_str())
    }

    pub fn id(&self, word: &str) -> Option<u32> {
        self.index.get(word).copied()
    }
}

/// One split of the corpus: `n` sentences of `seq_len` token ids each, with
/// one label per sentence.
pub struct SentenceSet {
    ids: Vec<u32>,
    labels: Vec<u8>,
    n: usize,
    seq_len: usize,
}

impl SentenceSet {
    /// Validates the flat id matrix against the labels.
    pub fn new(ids: Vec<u32>, labels: Vec<u8>, seq_len: usize) -> Result<Self, Box<dyn Error>> {
        if seq_len == 0 {
            return Err(invalid("seq_len must be positive"));
        }
        if ids.len() % seq_len != 0 {
            return Err(invalid(&format!(
                "id matrix length {} is not a multiple of seq_len {}",
                ids.len(),
                seq_len
            )));
        }
        let n = ids.len() / seq_len;
        if n == 0 {
            return Err(invalid("split contains no sentences"));
        }
        if labels.len() != n {
            return Err(invalid(&format!(
                "{} labels for {} sentences",
                labels.len(),
                n
            )));
        }
        Ok(Self {
            ids,
            labels,
            n,
            seq_len,
        })
    }

    /// Number of sentences.
    pub fn len(&self) -> usize {
        self.n
    }

    pub fn is_empty(&self) -> bool {
        self.n == 0
    }

    pub fn seq_len(&self) -> usize {
        self.seq_len
    }

    pub fn ids(&self) -> &[u32] {
        &self.ids
    }

    pub fn labels(&self) -> &[u8] {
        &self.labels
    }

    pub fn sentence(&self, i: usize) -> &[u32] {
        &self.ids[i * self.seq_len..(i + 1) * self.seq_len]
    }

    pub fn label(&self, i: usize) -> u8 {
        self.labels[i]
    }

    /// Highest label plus one.
    pub fn class_count(&self) -> usize {
        self.labels.iter().copied().max().unwrap_or(0) as usize + 1
    }

    /// Copies sentences `order[start..start + batch_size]` and their labels
    /// into the preallocated minibatch buffers, preserving pairing.
    pub fn gather_batch(
        &self,
        order: &[usize],
        start: usize,
        batch_size: usize,
        tokens_out: &mut [u32],
        labels_out: &mut [u8],
    ) {
        assert!(
            start + batch_size <= order.len(),
            "batch window {}..{} exceeds order length {}",
            start,
            start + batch_size,
            order.len()
        );
        assert!(
            tokens_out.len() >= batch_size * self.seq_len,
            "token buffer holds {} ids, batch needs {}",
            tokens_out.len(),
            batch_size * self.seq_len
        );
        assert!(
            labels_out.len() >= batch_size,
            "label buffer holds {} labels, batch needs {}",
            labels_out.len(),
            batch_size
        );

        for (slot, &idx) in order[start..start + batch_size].iter().enumerate() {
            tokens_out[slot * self.seq_len..(slot + 1) * self.seq_len]
                .copy_from_slice(self.sentence(idx));
            labels_out[slot] = self.label(idx);
        }
    }
}

/// Vocabulary for the synthetic corpus: `tokens_per_class` words per class
/// plus the pad slot.
pub fn synthetic_vocab(n_classes: usize, tokens_per_class: usize) -> Result<Vocab, Box<dyn Error>> {
    if n_classes < 2 {
        return Err(invalid("synthetic corpus needs at least two classes"));
    }
    if tokens_per_class == 0 {
        return Err(invalid("tokens_per_class must be positive"));
    }
    let words = (0..n_classes * tokens_per_class)
        .map(|i| format!("tok{:03}", i))
        .collect();
    Vocab::new(words)
}

/// Generates one synthetic split.
///
/// Class c draws its tokens from the vocabulary band
/// [c * tokens_per_class, (c + 1) * tokens_per_class), so the classes are
/// separable by construction. Labels cycle through the classes; true sentence
/// lengths vary between half of `seq_len` and `seq_len`, the tail padded.
pub fn synthetic_split(
    rng: &mut SimpleRng,
    n_sentences: usize,
    n_classes: usize,
    tokens_per_class: usize,
    seq_len: usize,
) -> Result<SentenceSet, Box<dyn Error>> {
    if n_classes < 2 || n_classes > u8::MAX as usize {
        return Err(invalid("n_classes must lie in [2, 255]"));
    }
    if tokens_per_class == 0 {
        return Err(invalid("tokens_per_class must be positive"));
    }
    if n_sentences == 0 || seq_len == 0 {
        return Err(invalid("split dimensions must be positive"));
    }

    let pad_id = (n_classes * tokens_per_class) as u32;
    let min_len = (seq_len + 1) / 2;
    let mut ids = vec![pad_id; n_sentences * seq_len];
    let mut labels = vec![0u8; n_sentences];

    for i in 0..n_sentences {
        let label = (i % n_classes) as u8;
        labels[i] = label;
        let band_start = label as usize * tokens_per_class;
        let true_len = min_len + rng.gen_usize(seq_len - min_len + 1);
        for t in 0..true_len {
            ids[i * seq_len + t] = (band_start + rng.gen_usize(tokens_per_class)) as u32;
        }
    }

    SentenceSet::new(ids, labels, seq_len)
}

fn invalid(msg: &str) -> Box<dyn Error> {
    Box::new(io::Error::new(io::ErrorKind::InvalidData, msg))
}
