use candle_core::{Device, Tensor};
use rand::Rng;
use rand::rngs::StdRng;

use crate::error::{Error, Result};
use crate::vocab::Vocabulary;

/// Fraction of the corpus, by position, used for training.
pub const TRAIN_FRACTION: f64 = 0.9;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Split {
    Train,
    Val,
}

impl Split {
    pub fn name(self) -> &'static str {
        match self {
            Split::Train => "train",
            Split::Val => "val",
        }
    }
}

/// Encoded corpus with a fixed positional train/validation split.
///
/// The first 90% of the token stream is training data and the rest is
/// validation data. The split is not shuffled, so reference losses are
/// reproducible for a given corpus.
pub struct Dataset {
    vocab: Vocabulary,
    train: Vec<u32>,
    val: Vec<u32>,
}

impl Dataset {
    pub fn from_text(text: &str) -> Result<Self> {
        let vocab = Vocabulary::from_corpus(text)?;
        let tokens = vocab.encode(text)?;
        let n = (TRAIN_FRACTION * tokens.len() as f64) as usize;
        let val = tokens[n..].to_vec();
        let mut train = tokens;
        train.truncate(n);
        Ok(Self { vocab, train, val })
    }

    pub fn vocab(&self) -> &Vocabulary {
        &self.vocab
    }

    pub fn tokens(&self, split: Split) -> &[u32] {
        match split {
            Split::Train => &self.train,
            Split::Val => &self.val,
        }
    }

    /// Fails unless every split can hold at least one `block_size` window plus its target.
    pub fn check_block_size(&self, block_size: usize) -> Result<()> {
        for split in [Split::Train, Split::Val] {
            let len = self.tokens(split).len();
            if len <= block_size {
                return Err(Error::CorpusTooShort {
                    split: split.name(),
                    len,
                    needed: block_size + 1,
                });
            }
        }
        Ok(())
    }

    /// Samples `batch_size` random windows of `block_size` tokens.
    ///
    /// Returns `(inputs, targets)`, both `(batch_size, block_size)` u32 tensors,
    /// where `targets` is `inputs` shifted left by one position.
    pub fn get_batch(
        &self,
        split: Split,
        batch_size: usize,
        block_size: usize,
        rng: &mut StdRng,
        device: &Device,
    ) -> Result<(Tensor, Tensor)> {
        let data = self.tokens(split);
        if data.len() <= block_size {
            return Err(Error::CorpusTooShort {
                split: split.name(),
                len: data.len(),
                needed: block_size + 1,
            });
        }

        let mut input_data = Vec::with_capacity(batch_size * block_size);
        let mut target_data = Vec::with_capacity(batch_size * block_size);
        for _ in 0..batch_size {
            let start = rng.random_range(0..data.len() - block_size);
            input_data.extend_from_slice(&data[start..start + block_size]);
            target_data.extend_from_slice(&data[start + 1..start + block_size + 1]);
        }

        let input = Tensor::from_vec(input_data, (batch_size, block_size), device)?;
        let target = Tensor::from_vec(target_data, (batch_size, block_size), device)?;
        Ok((input, target))
    }
}
