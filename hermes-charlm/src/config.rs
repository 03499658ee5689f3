use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Number of distinct characters; overwritten from the corpus vocabulary
    pub vocab_size: usize,
    /// Maximum context length; bounds the causal mask and the generation window
    pub block_size: usize,
    /// Model width, must be divisible by `n_heads`
    pub n_embd: usize,
    /// Number of attention heads per block
    pub n_heads: usize,
    /// Number of transformer blocks
    pub n_layer: usize,
    /// Dropout probability, only active in training-mode forward passes
    pub dropout: f32,
    /// Layer norm epsilon
    #[serde(default = "default_layer_norm_eps")]
    pub layer_norm_eps: f64,
}

fn default_layer_norm_eps() -> f64 {
    1e-5
}

impl ModelConfig {
    /// Shakespeare-scale character model (~10.8M parameters for a 65-symbol vocabulary)
    pub fn reference() -> Self {
        Self {
            vocab_size: 65,
            block_size: 256,
            n_embd: 384,
            n_heads: 6,
            n_layer: 6,
            dropout: 0.2,
            layer_norm_eps: 1e-5,
        }
    }

    /// Small enough to train on a laptop CPU in minutes
    pub fn tiny() -> Self {
        Self {
            vocab_size: 65,
            block_size: 64,
            n_embd: 128,
            n_heads: 4,
            n_layer: 4,
            dropout: 0.1,
            layer_norm_eps: 1e-5,
        }
    }

    /// Nano configuration for tests and smoke runs
    pub fn nano() -> Self {
        Self {
            vocab_size: 65,
            block_size: 16,
            n_embd: 32,
            n_heads: 2,
            n_layer: 2,
            dropout: 0.0,
            layer_norm_eps: 1e-5,
        }
    }

    pub fn preset(name: &str) -> Result<Self> {
        match name {
            "reference" => Ok(Self::reference()),
            "tiny" => Ok(Self::tiny()),
            "nano" => Ok(Self::nano()),
            other => Err(Error::InvalidConfig(format!(
                "unknown preset '{other}' (expected reference, tiny or nano)"
            ))),
        }
    }

    pub fn head_size(&self) -> usize {
        self.n_embd / self.n_heads
    }

    pub fn validate(&self) -> Result<()> {
        if self.n_heads == 0 || self.n_embd % self.n_heads != 0 {
            return Err(Error::ShapeMismatch(format!(
                "n_embd ({}) must be divisible by n_heads ({})",
                self.n_embd, self.n_heads
            )));
        }
        if self.vocab_size == 0 || self.block_size == 0 || self.n_layer == 0 {
            return Err(Error::InvalidConfig(
                "vocab_size, block_size and n_layer must be non-zero".to_string(),
            ));
        }
        if !(0.0..1.0).contains(&self.dropout) {
            return Err(Error::InvalidConfig(format!(
                "dropout must be in [0, 1), got {}",
                self.dropout
            )));
        }
        Ok(())
    }

    /// Exact number of trainable scalars for this configuration.
    pub fn num_parameters(&self) -> usize {
        let (v, t, c) = (self.vocab_size, self.block_size, self.n_embd);
        let embed_params = v * c + t * c;
        let attn_params = 3 * c * c + (c * c + c);
        let ff_params = (c * 4 * c + 4 * c) + (4 * c * c + c);
        let norm_params = 2 * c;
        let layer_params = attn_params + ff_params + 2 * norm_params;
        let head_params = c * v + v;
        embed_params + self.n_layer * layer_params + norm_params + head_params
    }

    pub fn from_json(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    pub fn save_json(&self, path: &str) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingConfig {
    /// Independent sequences per optimizer step
    pub batch_size: usize,
    /// AdamW learning rate
    pub learning_rate: f64,
    /// Number of optimizer steps
    pub max_iters: usize,
    /// Estimate train/val loss every N steps
    pub eval_interval: usize,
    /// Batches averaged per loss estimate
    pub eval_iters: usize,
    /// Seed for initialization, batch sampling, dropout and generation
    pub seed: u64,
}

impl TrainingConfig {
    pub fn reference() -> Self {
        Self {
            batch_size: 64,
            learning_rate: 3e-4,
            max_iters: 5000,
            eval_interval: 300,
            eval_iters: 200,
            seed: 1337,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(Error::InvalidConfig("batch_size must be non-zero".into()));
        }
        if self.eval_interval == 0 || self.eval_iters == 0 {
            return Err(Error::InvalidConfig(
                "eval_interval and eval_iters must be non-zero".into(),
            ));
        }
        Ok(())
    }
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            batch_size: 32,
            learning_rate: 1e-3,
            max_iters: 2000,
            eval_interval: 200,
            eval_iters: 50,
            seed: 1337,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presets_are_valid() {
        for name in ["reference", "tiny", "nano"] {
            ModelConfig::preset(name).unwrap().validate().unwrap();
        }
        TrainingConfig::reference().validate().unwrap();
        TrainingConfig::default().validate().unwrap();
    }

    #[test]
    fn test_indivisible_width_is_shape_mismatch() {
        let config = ModelConfig {
            n_embd: 30,
            n_heads: 4,
            ..ModelConfig::nano()
        };
        assert!(matches!(config.validate(), Err(Error::ShapeMismatch(_))));
    }

    #[test]
    fn test_unknown_preset() {
        assert!(matches!(
            ModelConfig::preset("gpt2-small"),
            Err(Error::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_reference_parameter_count() {
        // 10.79M for the 65-character Shakespeare vocabulary
        let n = ModelConfig::reference().num_parameters();
        assert_eq!(n, 10_788_929);
    }

    #[test]
    fn test_json_round_trip_keeps_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let path = path.to_str().unwrap();

        let config = ModelConfig::tiny();
        config.save_json(path).unwrap();
        assert_eq!(ModelConfig::from_json(path).unwrap(), config);
    }

    #[test]
    fn test_layer_norm_eps_defaults_when_missing() {
        let json = r#"{"vocab_size":2,"block_size":4,"n_embd":8,"n_heads":2,"n_layer":1,"dropout":0.0}"#;
        let config: ModelConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.layer_norm_eps, 1e-5);
    }
}
