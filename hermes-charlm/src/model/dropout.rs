use candle_core::Tensor;
use rand::Rng;
use rand::rngs::StdRng;

use crate::error::Result;

/// Execution mode threaded through every forward pass.
///
/// Dropout draws its masks from the RNG carried by `Train`; `Eval` makes the
/// forward pass a pure function of parameters and input.
pub enum Mode<'r> {
    Eval,
    Train(&'r mut StdRng),
}

/// Inverted dropout: kept activations are scaled by `1 / (1 - p)`.
#[derive(Debug, Clone)]
pub struct Dropout {
    p: f32,
}

impl Dropout {
    pub fn new(p: f32) -> Self {
        Self { p }
    }

    pub fn forward(&self, x: &Tensor, mode: &mut Mode<'_>) -> Result<Tensor> {
        let rng = match mode {
            Mode::Train(rng) if self.p > 0.0 => rng,
            _ => return Ok(x.clone()),
        };

        let scale = 1.0 / (1.0 - self.p);
        let mask: Vec<f32> = (0..x.elem_count())
            .map(|_| if rng.random::<f32>() < self.p { 0.0 } else { scale })
            .collect();
        let mask = Tensor::from_vec(mask, x.dims(), x.device())?.to_dtype(x.dtype())?;
        Ok(x.mul(&mask)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use rand::SeedableRng;

    #[test]
    fn test_eval_is_identity() {
        let x = Tensor::ones((2, 8), DType::F32, &Device::Cpu).unwrap();
        let out = Dropout::new(0.5).forward(&x, &mut Mode::Eval).unwrap();
        assert_eq!(out.to_vec2::<f32>().unwrap(), x.to_vec2::<f32>().unwrap());
    }

    #[test]
    fn test_train_zeroes_and_rescales() {
        let mut rng = StdRng::seed_from_u64(3);
        let x = Tensor::ones((64, 64), DType::F32, &Device::Cpu).unwrap();
        let out = Dropout::new(0.25)
            .forward(&x, &mut Mode::Train(&mut rng))
            .unwrap();
        let values: Vec<f32> = out.flatten_all().unwrap().to_vec1().unwrap();

        let dropped = values.iter().filter(|&&v| v == 0.0).count();
        assert!(values.iter().all(|&v| v == 0.0 || (v - 4.0 / 3.0).abs() < 1e-6));
        // 4096 draws at p = 0.25
        assert!((800..1250).contains(&dropped), "dropped {dropped}");
    }

    #[test]
    fn test_zero_rate_skips_rng() {
        let mut rng = StdRng::seed_from_u64(9);
        let mut untouched = StdRng::seed_from_u64(9);
        let x = Tensor::ones(4, DType::F32, &Device::Cpu).unwrap();
        Dropout::new(0.0)
            .forward(&x, &mut Mode::Train(&mut rng))
            .unwrap();
        assert_eq!(rng.random::<u64>(), untouched.random::<u64>());
    }
}
