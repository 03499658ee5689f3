use candle_core::{D, Device, Module, Tensor};
use candle_nn::{Linear, VarBuilder, linear, linear_no_bias};

use super::dropout::{Dropout, Mode};
use crate::config::ModelConfig;
use crate::error::{Error, Result};

fn masked_fill(on_false: &Tensor, mask: &Tensor, on_true: f32) -> candle_core::Result<Tensor> {
    let shape = on_false.shape();
    let mask = mask.broadcast_as(shape.dims())?;
    let on_true = Tensor::new(on_true, on_false.device())?.broadcast_as(shape.dims())?;
    mask.where_cond(&on_true, on_false)
}

/// `block_size × block_size` u8 mask, 1 where key position `j` is after query position `i`.
pub fn causal_mask(block_size: usize, device: &Device) -> candle_core::Result<Tensor> {
    let mask: Vec<u8> = (0..block_size)
        .flat_map(|i| (0..block_size).map(move |j| u8::from(j > i)))
        .collect();
    Tensor::from_vec(mask, (block_size, block_size), device)
}

/// One head of causal scaled dot-product self-attention.
///
/// Maps `(B, T, n_embd)` to `(B, T, head_size)`.
pub struct AttentionHead {
    query: Linear,
    key: Linear,
    value: Linear,
    mask: Tensor,
    dropout: Dropout,
    scale: f64,
}

impl AttentionHead {
    /// `mask` is the model-wide causal mask from [`causal_mask`], shared by every head.
    pub fn new(config: &ModelConfig, mask: &Tensor, vb: VarBuilder) -> Result<Self> {
        let head_size = config.head_size();
        let query = linear_no_bias(config.n_embd, head_size, vb.pp("query"))?;
        let key = linear_no_bias(config.n_embd, head_size, vb.pp("key"))?;
        let value = linear_no_bias(config.n_embd, head_size, vb.pp("value"))?;
        Ok(Self {
            query,
            key,
            value,
            mask: mask.clone(),
            dropout: Dropout::new(config.dropout),
            scale: 1.0 / (head_size as f64).sqrt(),
        })
    }

    fn block_size(&self) -> usize {
        self.mask.dims()[0]
    }

    /// Post-softmax (and, in training, post-dropout) attention weights, `(B, T, T)`.
    pub fn attention_weights(&self, x: &Tensor, mode: &mut Mode<'_>) -> Result<Tensor> {
        let (_, seq_len, _) = x.dims3()?;
        if seq_len > self.block_size() {
            return Err(Error::ContextOverflow {
                len: seq_len,
                block_size: self.block_size(),
            });
        }

        let q = self.query.forward(x)?;
        let k = self.key.forward(x)?;
        let scores = q.matmul(&k.t()?.contiguous()?)?.affine(self.scale, 0.0)?;

        let mask = self.mask.narrow(0, 0, seq_len)?.narrow(1, 0, seq_len)?;
        let scores = masked_fill(&scores, &mask, f32::NEG_INFINITY)?;
        let weights = candle_nn::ops::softmax(&scores, D::Minus1)?;

        self.dropout.forward(&weights, mode)
    }

    pub fn forward(&self, x: &Tensor, mode: &mut Mode<'_>) -> Result<Tensor> {
        let weights = self.attention_weights(x, mode)?;
        let v = self.value.forward(x)?;
        Ok(weights.matmul(&v)?)
    }
}

/// `n_heads` heads in parallel, concatenated and projected back to `n_embd`.
pub struct MultiHeadAttention {
    heads: Vec<AttentionHead>,
    proj: Linear,
    dropout: Dropout,
}

impl MultiHeadAttention {
    pub fn new(config: &ModelConfig, mask: &Tensor, vb: VarBuilder) -> Result<Self> {
        config.validate()?;
        let heads = (0..config.n_heads)
            .map(|i| AttentionHead::new(config, mask, vb.pp(format!("heads.{i}"))))
            .collect::<Result<Vec<_>>>()?;
        let proj = linear(config.n_embd, config.n_embd, vb.pp("proj"))?;
        Ok(Self {
            heads,
            proj,
            dropout: Dropout::new(config.dropout),
        })
    }

    pub fn forward(&self, x: &Tensor, mode: &mut Mode<'_>) -> Result<Tensor> {
        let outputs = self
            .heads
            .iter()
            .map(|head| head.forward(x, mode))
            .collect::<Result<Vec<_>>>()?;
        // (B, T, n_heads * head_size)
        let concatenated = Tensor::cat(&outputs, D::Minus1)?;
        let projected = self.proj.forward(&concatenated)?;
        self.dropout.forward(&projected, mode)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::DType;
    use candle_nn::VarMap;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn config(n_heads: usize, dropout: f32) -> ModelConfig {
        ModelConfig {
            vocab_size: 11,
            block_size: 8,
            n_embd: 16,
            n_heads,
            n_layer: 1,
            dropout,
            layer_norm_eps: 1e-5,
        }
    }

    fn random_input(batch: usize, seq_len: usize) -> Tensor {
        Tensor::randn(0f32, 1f32, (batch, seq_len, 16), &Device::Cpu).unwrap()
    }

    fn row_sums(weights: &Tensor) -> Vec<Vec<f32>> {
        weights.sum(D::Minus1).unwrap().to_vec2().unwrap()
    }

    fn build_head(config: &ModelConfig) -> (VarMap, AttentionHead) {
        let var_map = VarMap::new();
        let vb = VarBuilder::from_varmap(&var_map, DType::F32, &Device::Cpu);
        let mask = causal_mask(config.block_size, &Device::Cpu).unwrap();
        let head = AttentionHead::new(config, &mask, vb).unwrap();
        (var_map, head)
    }

    fn build_mha(config: &ModelConfig) -> (VarMap, MultiHeadAttention) {
        let var_map = VarMap::new();
        let vb = VarBuilder::from_varmap(&var_map, DType::F32, &Device::Cpu);
        let mask = causal_mask(config.block_size, &Device::Cpu).unwrap();
        let mha = MultiHeadAttention::new(config, &mask, vb).unwrap();
        (var_map, mha)
    }

    #[test]
    fn test_causal_mask_layout() {
        let mask: Vec<Vec<u8>> = causal_mask(3, &Device::Cpu).unwrap().to_vec2().unwrap();
        assert_eq!(mask, vec![vec![0, 1, 1], vec![0, 0, 1], vec![0, 0, 0]]);
    }

    #[test]
    fn test_head_output_shape() {
        let (_vm, head) = build_head(&config(4, 0.0));
        let out = head.forward(&random_input(2, 5), &mut Mode::Eval).unwrap();
        assert_eq!(out.dims(), &[2, 5, 4]);
    }

    #[test]
    fn test_weights_are_causal_distributions() {
        let (_vm, head) = build_head(&config(2, 0.0));
        for seq_len in 1..=8 {
            let weights = head
                .attention_weights(&random_input(3, seq_len), &mut Mode::Eval)
                .unwrap();
            assert_eq!(weights.dims(), &[3, seq_len, seq_len]);

            for row in row_sums(&weights).into_iter().flatten() {
                assert!((row - 1.0).abs() < 1e-5, "row sum {row}");
            }
            let weights: Vec<Vec<Vec<f32>>> = weights.to_vec3().unwrap();
            for batch in &weights {
                for (i, row) in batch.iter().enumerate() {
                    for &w in &row[i + 1..] {
                        assert_eq!(w, 0.0, "future weight leaked at T={seq_len}");
                    }
                }
            }
        }
    }

    #[test]
    fn test_first_position_attends_only_to_itself() {
        let (_vm, head) = build_head(&config(2, 0.0));
        let weights: Vec<Vec<Vec<f32>>> = head
            .attention_weights(&random_input(1, 6), &mut Mode::Eval)
            .unwrap()
            .to_vec3()
            .unwrap();
        assert!((weights[0][0][0] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_future_tokens_do_not_change_past_outputs() {
        let (_vm, head) = build_head(&config(2, 0.0));
        let a = random_input(1, 6);
        let noise = random_input(1, 1);
        let b = Tensor::cat(&[&a.narrow(1, 0, 5).unwrap(), &noise], 1).unwrap();

        let out_a: Vec<Vec<Vec<f32>>> = head.forward(&a, &mut Mode::Eval).unwrap().to_vec3().unwrap();
        let out_b: Vec<Vec<Vec<f32>>> = head.forward(&b, &mut Mode::Eval).unwrap().to_vec3().unwrap();
        for pos in 0..5 {
            for (x, y) in out_a[0][pos].iter().zip(&out_b[0][pos]) {
                assert!((x - y).abs() < 1e-5, "position {pos} changed");
            }
        }
        let diff: f32 = out_a[0][5]
            .iter()
            .zip(&out_b[0][5])
            .map(|(x, y)| (x - y).abs())
            .sum();
        assert!(diff > 1e-5, "last position should see its own change");
    }

    #[test]
    fn test_sequence_longer_than_block_size_fails() {
        let (_vm, head) = build_head(&config(2, 0.0));
        let err = head.forward(&random_input(1, 9), &mut Mode::Eval).unwrap_err();
        assert!(matches!(
            err,
            Error::ContextOverflow {
                len: 9,
                block_size: 8
            }
        ));
    }

    #[test]
    fn test_dropout_only_in_training() {
        let (_vm, head) = build_head(&config(2, 0.5));
        let x = random_input(2, 8);
        let eval_a: Vec<Vec<Vec<f32>>> = head.forward(&x, &mut Mode::Eval).unwrap().to_vec3().unwrap();
        let eval_b: Vec<Vec<Vec<f32>>> = head.forward(&x, &mut Mode::Eval).unwrap().to_vec3().unwrap();
        assert_eq!(eval_a, eval_b);

        let mut rng = StdRng::seed_from_u64(0);
        let train: Vec<Vec<Vec<f32>>> = head
            .forward(&x, &mut Mode::Train(&mut rng))
            .unwrap()
            .to_vec3()
            .unwrap();
        assert_ne!(eval_a, train);
    }

    #[test]
    fn test_multi_head_output_shape() {
        let (_vm, mha) = build_mha(&config(4, 0.0));
        let out = mha.forward(&random_input(2, 7), &mut Mode::Eval).unwrap();
        assert_eq!(out.dims(), &[2, 7, 16]);
    }

    #[test]
    fn test_single_head_equals_projected_head() {
        let (_vm, mha) = build_mha(&config(1, 0.0));
        let x = random_input(2, 5);
        let full: Vec<Vec<Vec<f32>>> = mha.forward(&x, &mut Mode::Eval).unwrap().to_vec3().unwrap();

        let head_out = mha.heads[0].forward(&x, &mut Mode::Eval).unwrap();
        let manual: Vec<Vec<Vec<f32>>> = mha.proj.forward(&head_out).unwrap().to_vec3().unwrap();

        for (a, b) in full.iter().flatten().flatten().zip(manual.iter().flatten().flatten()) {
            assert!((a - b).abs() < 1e-6);
        }
    }

    #[test]
    fn test_indivisible_heads_rejected() {
        let var_map = VarMap::new();
        let vb = VarBuilder::from_varmap(&var_map, DType::F32, &Device::Cpu);
        let mask = causal_mask(8, &Device::Cpu).unwrap();
        let result = MultiHeadAttention::new(&config(3, 0.0), &mask, vb);
        assert!(matches!(result, Err(Error::ShapeMismatch(_))));
    }
}
