use candle_core::{Module, Tensor};
use candle_nn::VarBuilder;

use super::attention::MultiHeadAttention;
use super::dropout::Mode;
use super::feed_forward::FeedForward;
use super::norm::LayerNorm;
use crate::config::ModelConfig;
use crate::error::Result;

/// Pre-norm transformer block.
///
/// ```text
/// x' = x + attn(ln_1(x))
/// y  = x' + ffn(ln_2(x'))
/// ```
///
/// The residual stream itself is never normalized here.
pub struct TransformerBlock {
    ln_1: LayerNorm,
    attn: MultiHeadAttention,
    ln_2: LayerNorm,
    ffn: FeedForward,
}

impl TransformerBlock {
    pub fn new(config: &ModelConfig, mask: &Tensor, vb: VarBuilder) -> Result<Self> {
        let ln_1 = LayerNorm::new(config.n_embd, config.layer_norm_eps, vb.pp("ln_1"))?;
        let attn = MultiHeadAttention::new(config, mask, vb.pp("attn"))?;
        let ln_2 = LayerNorm::new(config.n_embd, config.layer_norm_eps, vb.pp("ln_2"))?;
        let ffn = FeedForward::new(config, vb.pp("ffn"))?;
        Ok(Self {
            ln_1,
            attn,
            ln_2,
            ffn,
        })
    }

    pub fn forward(&self, x: &Tensor, mode: &mut Mode<'_>) -> Result<Tensor> {
        let residual = x;
        let h = self.attn.forward(&self.ln_1.forward(x)?, mode)?;
        let x = (residual + h)?;

        let residual = &x;
        let h = self.ffn.forward(&self.ln_2.forward(&x)?, mode)?;
        Ok((residual + h)?)
    }
}
