use candle_core::{Module, Tensor};
use candle_nn::{Linear, VarBuilder, linear};

use super::dropout::{Dropout, Mode};
use crate::config::ModelConfig;
use crate::error::Result;

/// Position-wise MLP: `n_embd -> 4 * n_embd -> n_embd` with a ReLU in between.
pub struct FeedForward {
    fc1: Linear,
    fc2: Linear,
    dropout: Dropout,
}

impl FeedForward {
    pub fn new(config: &ModelConfig, vb: VarBuilder) -> Result<Self> {
        let hidden = 4 * config.n_embd;
        let fc1 = linear(config.n_embd, hidden, vb.pp("fc1"))?;
        let fc2 = linear(hidden, config.n_embd, vb.pp("fc2"))?;
        Ok(Self {
            fc1,
            fc2,
            dropout: Dropout::new(config.dropout),
        })
    }

    pub fn forward(&self, x: &Tensor, mode: &mut Mode<'_>) -> Result<Tensor> {
        let hidden = self.fc1.forward(x)?.relu()?;
        let out = self.fc2.forward(&hidden)?;
        self.dropout.forward(&out, mode)
    }
}
