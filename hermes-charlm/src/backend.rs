use candle_core::Device;
use candle_core::utils::{cuda_is_available, metal_is_available};
use tracing::warn;

use crate::error::Result;

/// Tensor compute backend the model is placed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum Backend {
    #[default]
    Cpu,
    Cuda,
    Metal,
}

impl Backend {
    /// Resolves to a candle device, falling back to CPU when the requested
    /// accelerator was not compiled in.
    pub fn device(self, ordinal: usize) -> Result<Device> {
        match self {
            Backend::Cpu => Ok(Device::Cpu),
            Backend::Cuda if cuda_is_available() => Ok(Device::new_cuda(ordinal)?),
            Backend::Metal if metal_is_available() => Ok(Device::new_metal(ordinal)?),
            other => {
                warn!(
                    "{:?} support not compiled in, using CPU. Build with --features cuda or --features metal",
                    other
                );
                Ok(Device::Cpu)
            }
        }
    }
}
