//! Sampling utilities for autoregressive generation.

use candle_core::{DType, Device, Tensor};
use rand::rngs::StdRng;
use rand_distr::Distribution;
use rand_distr::weighted::WeightedIndex;

use crate::error::{Error, Result};
use crate::model::LanguageModel;

/// How the next token is drawn from the last-position logits.
///
/// The default (temperature 1.0, no top-k) samples straight from the softmax.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplingConfig {
    pub temperature: f64,
    pub top_k: Option<usize>,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            temperature: 1.0,
            top_k: None,
        }
    }
}

impl SamplingConfig {
    /// Rejects temperatures that are not strictly positive and finite, and `top_k == 0`.
    pub fn validate(&self) -> Result<()> {
        if !self.temperature.is_finite() || self.temperature <= 0.0 {
            return Err(Error::InvalidConfig(format!(
                "temperature must be positive and finite, got {}",
                self.temperature
            )));
        }
        if self.top_k == Some(0) {
            return Err(Error::InvalidConfig("top_k must be at least 1".into()));
        }
        Ok(())
    }
}

/// Samples one id per row of `logits (B, vocab)`.
pub fn sample_next_tokens(
    logits: &Tensor,
    sampling: &SamplingConfig,
    rng: &mut StdRng,
) -> Result<Vec<u32>> {
    sampling.validate()?;
    let (batch_size, _) = logits.dims2()?;
    let logits = logits.to_dtype(DType::F32)?;
    let logits = if sampling.temperature != 1.0 {
        logits.affine(1.0 / sampling.temperature, 0.0)?
    } else {
        logits
    };

    (0..batch_size)
        .map(|row| -> Result<u32> {
            let row = logits.get(row)?;
            let row = match sampling.top_k {
                Some(k) => top_k_filter(&row, k, row.device())?,
                None => row,
            };
            sample_from_logits(&row, rng)
        })
        .collect()
}

/// Keeps the `k` largest logits and sets the rest to `-inf`.
fn top_k_filter(logits: &Tensor, k: usize, device: &Device) -> Result<Tensor> {
    let logits_vec: Vec<f32> = logits.to_vec1()?;
    let mut indexed: Vec<(usize, f32)> = logits_vec.iter().copied().enumerate().collect();
    indexed.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

    let mut masked = vec![f32::NEG_INFINITY; logits_vec.len()];
    for &(i, v) in indexed.iter().take(k.max(1)) {
        masked[i] = v;
    }

    Ok(Tensor::new(masked, device)?)
}

/// Draws an index from `softmax(logits)`.
fn sample_from_logits(logits: &Tensor, rng: &mut StdRng) -> Result<u32> {
    let probs = candle_nn::ops::softmax_last_dim(logits)?;
    let probs_vec: Vec<f32> = probs.to_vec1()?;
    let dist = WeightedIndex::new(&probs_vec).map_err(|e| Error::Sampling(e.to_string()))?;
    Ok(dist.sample(rng) as u32)
}

/// Generates continuations of token-id prompts.
pub struct TextGenerator<'a> {
    model: &'a LanguageModel,
    device: &'a Device,
    sampling: SamplingConfig,
}

impl<'a> TextGenerator<'a> {
    pub fn new(model: &'a LanguageModel, device: &'a Device) -> Self {
        Self {
            model,
            device,
            sampling: SamplingConfig::default(),
        }
    }

    pub fn with_sampling(mut self, sampling: SamplingConfig) -> Self {
        self.sampling = sampling;
        self
    }

    /// Returns the prompt followed by `max_new_tokens` sampled ids.
    pub fn generate(
        &self,
        prompt_tokens: &[u32],
        max_new_tokens: usize,
        rng: &mut StdRng,
    ) -> Result<Vec<u32>> {
        self.sampling.validate()?;
        if prompt_tokens.is_empty() {
            return Err(Error::ShapeMismatch("prompt must hold at least one token".into()));
        }
        let input = Tensor::new(prompt_tokens, self.device)?.unsqueeze(0)?;
        let output = self
            .model
            .generate_with(&input, max_new_tokens, &self.sampling, rng)?;
        Ok(output.squeeze(0)?.to_vec1()?)
    }
}
