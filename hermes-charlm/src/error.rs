//! Error types for hermes-charlm

use std::io;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Tensor error: {0}")]
    Candle(#[from] candle_core::Error),

    #[error("Config parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Shape mismatch: {0}")]
    ShapeMismatch(String),

    #[error("Context length {len} exceeds block size {block_size}")]
    ContextOverflow { len: usize, block_size: usize },

    #[error("Unknown symbol {0:?} is not in the vocabulary")]
    UnknownSymbol(char),

    #[error("Unknown token id {0}")]
    UnknownToken(u32),

    #[error("Corpus is empty")]
    EmptyCorpus,

    #[error("{split} split has {len} tokens, need at least {needed}")]
    CorpusTooShort {
        split: &'static str,
        len: usize,
        needed: usize,
    },

    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    #[error("Sampling error: {0}")]
    Sampling(String),
}

pub type Result<T> = std::result::Result<T, Error>;
