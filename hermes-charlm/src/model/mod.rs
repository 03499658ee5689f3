//! Decoder-only character transformer.
//!
//! ```text
//! ids (B, T) -> wte(ids) + wpe(0..T) -> [TransformerBlock; n_layer] -> ln_f -> lm_head -> logits (B, T, vocab)
//! ```
//!
//! Every forward pass takes a [`Mode`]. `Mode::Train` carries the RNG used for
//! dropout masks; `Mode::Eval` disables dropout and makes the pass deterministic.

mod attention;
mod block;
mod dropout;
mod feed_forward;
mod init;
mod norm;

use candle_core::{DType, Device, Module, Tensor};
use candle_nn::{Embedding, Linear, VarBuilder, VarMap, embedding, linear};
use rand::rngs::StdRng;

pub use attention::{AttentionHead, MultiHeadAttention, causal_mask};
pub use block::TransformerBlock;
pub use dropout::{Dropout, Mode};
pub use feed_forward::FeedForward;
pub use init::{INIT_STD, count_parameters, init_parameters};
pub use norm::LayerNorm;

use crate::config::ModelConfig;
use crate::error::{Error, Result};
use crate::generate::{SamplingConfig, sample_next_tokens};

pub struct LanguageModel {
    token_embedding: Embedding,
    position_embedding: Embedding,
    blocks: Vec<TransformerBlock>,
    ln_f: LayerNorm,
    lm_head: Linear,
    config: ModelConfig,
}

impl LanguageModel {
    pub fn new(config: &ModelConfig, vb: VarBuilder) -> Result<Self> {
        config.validate()?;
        let mask = causal_mask(config.block_size, vb.device())?;

        let token_embedding = embedding(config.vocab_size, config.n_embd, vb.pp("wte"))?;
        let position_embedding = embedding(config.block_size, config.n_embd, vb.pp("wpe"))?;
        let blocks = (0..config.n_layer)
            .map(|i| TransformerBlock::new(config, &mask, vb.pp(format!("blocks.{i}"))))
            .collect::<Result<Vec<_>>>()?;
        let ln_f = LayerNorm::new(config.n_embd, config.layer_norm_eps, vb.pp("ln_f"))?;
        let lm_head = linear(config.n_embd, config.vocab_size, vb.pp("lm_head"))?;

        Ok(Self {
            token_embedding,
            position_embedding,
            blocks,
            ln_f,
            lm_head,
            config: config.clone(),
        })
    }

    /// Builds a model on `device` with parameters drawn from `rng`.
    ///
    /// The returned [`VarMap`] owns every parameter and is what an optimizer trains.
    pub fn init(config: &ModelConfig, device: &Device, rng: &mut StdRng) -> Result<(Self, VarMap)> {
        let var_map = VarMap::new();
        let vb = VarBuilder::from_varmap(&var_map, DType::F32, device);
        let model = Self::new(config, vb)?;
        init_parameters(&var_map, rng)?;
        Ok((model, var_map))
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    /// Next-token logits `(B, T, vocab_size)` for ids `(B, T)`.
    pub fn logits(&self, idx: &Tensor, mode: &mut Mode<'_>) -> Result<Tensor> {
        let (_, seq_len) = idx.dims2()?;
        if seq_len > self.config.block_size {
            return Err(Error::ContextOverflow {
                len: seq_len,
                block_size: self.config.block_size,
            });
        }

        let token_emb = self.token_embedding.forward(idx)?;
        let positions = Tensor::arange(0u32, seq_len as u32, idx.device())?;
        let pos_emb = self.position_embedding.forward(&positions)?;
        let mut x = token_emb.broadcast_add(&pos_emb)?;

        for block in &self.blocks {
            x = block.forward(&x, mode)?;
        }

        let x = self.ln_f.forward(&x)?;
        Ok(self.lm_head.forward(&x)?)
    }

    /// Mean cross-entropy of `targets (B, T)` under the logits for `idx (B, T)`.
    pub fn loss(&self, idx: &Tensor, targets: &Tensor, mode: &mut Mode<'_>) -> Result<Tensor> {
        check_targets(idx, targets)?;
        let logits = self.logits(idx, mode)?;
        Ok(cross_entropy_loss(&logits, targets)?)
    }

    /// Logits, plus the loss when `targets` is given.
    pub fn forward(
        &self,
        idx: &Tensor,
        targets: Option<&Tensor>,
        mode: &mut Mode<'_>,
    ) -> Result<(Tensor, Option<Tensor>)> {
        if let Some(targets) = targets {
            check_targets(idx, targets)?;
        }
        let logits = self.logits(idx, mode)?;
        let loss = match targets {
            Some(targets) => Some(cross_entropy_loss(&logits, targets)?),
            None => None,
        };
        Ok((logits, loss))
    }

    /// Extends every row of `idx (B, T)` by `max_new_tokens` ids sampled from the
    /// softmax of the last-position logits. Returns `(B, T + max_new_tokens)`.
    pub fn generate(&self, idx: &Tensor, max_new_tokens: usize, rng: &mut StdRng) -> Result<Tensor> {
        self.generate_with(idx, max_new_tokens, &SamplingConfig::default(), rng)
    }

    pub fn generate_with(
        &self,
        idx: &Tensor,
        max_new_tokens: usize,
        sampling: &SamplingConfig,
        rng: &mut StdRng,
    ) -> Result<Tensor> {
        sampling.validate()?;
        let mut idx = idx.clone();
        for _ in 0..max_new_tokens {
            let (batch_size, seq_len) = idx.dims2()?;
            let context_len = seq_len.min(self.config.block_size);
            let context = idx.narrow(1, seq_len - context_len, context_len)?;

            let logits = self.logits(&context, &mut Mode::Eval)?;
            // (B, T, vocab) -> (B, vocab)
            let last = logits.narrow(1, context_len - 1, 1)?.squeeze(1)?;

            let next = sample_next_tokens(&last, sampling, rng)?;
            let next = Tensor::from_vec(next, (batch_size, 1), idx.device())?;
            idx = Tensor::cat(&[&idx, &next], 1)?;
        }
        Ok(idx)
    }
}

fn check_targets(idx: &Tensor, targets: &Tensor) -> Result<()> {
    if idx.dims() != targets.dims() {
        return Err(Error::ShapeMismatch(format!(
            "targets {:?} do not match inputs {:?}",
            targets.dims(),
            idx.dims()
        )));
    }
    Ok(())
}

pub fn cross_entropy_loss(logits: &Tensor, targets: &Tensor) -> candle_core::Result<Tensor> {
    let (batch_size, seq_len, vocab_size) = logits.dims3()?;
    let logits = logits.reshape((batch_size * seq_len, vocab_size))?;
    let targets = targets.reshape((batch_size * seq_len,))?;
    candle_nn::loss::cross_entropy(&logits, &targets)
}
