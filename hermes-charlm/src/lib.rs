pub mod backend;
pub mod config;
pub mod data;
pub mod error;
pub mod generate;
pub mod io;
pub mod model;
pub mod training;
pub mod vocab;

pub use backend::Backend;
pub use config::{ModelConfig, TrainingConfig};
pub use data::{Dataset, Split};
pub use error::{Error, Result};
pub use generate::{SamplingConfig, TextGenerator};
pub use model::{LanguageModel, Mode};
pub use training::{LossEstimate, Trainer};
pub use vocab::Vocabulary;
