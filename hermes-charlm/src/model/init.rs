use candle_core::{Tensor, Var};
use candle_nn::VarMap;
use rand::rngs::StdRng;
use rand_distr::{Distribution, Normal};
use tracing::debug;

use crate::error::{Error, Result};

/// Standard deviation for weight matrices and embedding tables.
pub const INIT_STD: f32 = 0.02;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParamKind {
    NormGain,
    NormShift,
    Bias,
    Weight,
}

impl ParamKind {
    /// Classifies a variable by its path, e.g. `blocks.0.ln_1.weight` or `lm_head.bias`.
    fn of(name: &str) -> Self {
        let mut segments = name.rsplit('.');
        let leaf = segments.next().unwrap_or_default();
        let is_norm = segments.next().is_some_and(|owner| owner.starts_with("ln"));
        match (is_norm, leaf) {
            (true, "weight") => ParamKind::NormGain,
            (true, _) => ParamKind::NormShift,
            (false, "bias") => ParamKind::Bias,
            (false, _) => ParamKind::Weight,
        }
    }
}

/// Overwrites every variable in `var_map` from `rng`, visiting names in sorted order.
///
/// Weights and embeddings get `N(0, INIT_STD)`, biases zero, norm gains one and
/// norm shifts zero, so the same seed always yields the same parameters.
pub fn init_parameters(var_map: &VarMap, rng: &mut StdRng) -> Result<()> {
    let mut vars: Vec<(String, Var)> = {
        let data = var_map
            .data()
            .lock()
            .map_err(|_| candle_core::Error::Msg("var map lock poisoned".into()))?;
        data.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
    };
    vars.sort_by(|a, b| a.0.cmp(&b.0));

    let normal = Normal::new(0f32, INIT_STD).map_err(|e| Error::InvalidConfig(e.to_string()))?;
    for (name, var) in &vars {
        let kind = ParamKind::of(name);
        let value = match kind {
            ParamKind::NormGain => var.ones_like()?,
            ParamKind::NormShift | ParamKind::Bias => var.zeros_like()?,
            ParamKind::Weight => {
                let values: Vec<f32> = (0..var.elem_count()).map(|_| normal.sample(rng)).collect();
                Tensor::from_vec(values, var.dims(), var.device())?.to_dtype(var.dtype())?
            }
        };
        var.set(&value)?;
        debug!("initialized {} {:?} as {:?}", name, var.dims(), kind);
    }
    Ok(())
}

/// Total number of trainable scalars held by `var_map`.
pub fn count_parameters(var_map: &VarMap) -> usize {
    var_map.all_vars().iter().map(|v| v.elem_count()).sum()
}
