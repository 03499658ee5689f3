//! Character-level vocabulary built from a training corpus.

use std::collections::{BTreeSet, HashMap};

use crate::error::{Error, Result};

/// Bijection between the distinct characters of a corpus and `0..len()`.
///
/// Codes follow ascending code-point order so the same corpus always yields
/// the same ids.
#[derive(Debug, Clone)]
pub struct Vocabulary {
    itos: Vec<char>,
    stoi: HashMap<char, u32>,
}

impl Vocabulary {
    pub fn from_corpus(text: &str) -> Result<Self> {
        if text.is_empty() {
            return Err(Error::EmptyCorpus);
        }
        let itos: Vec<char> = text.chars().collect::<BTreeSet<_>>().into_iter().collect();
        let stoi = itos
            .iter()
            .enumerate()
            .map(|(i, &c)| (c, i as u32))
            .collect();
        Ok(Self { itos, stoi })
    }

    pub fn encode(&self, text: &str) -> Result<Vec<u32>> {
        text.chars()
            .map(|c| self.stoi.get(&c).copied().ok_or(Error::UnknownSymbol(c)))
            .collect()
    }

    pub fn decode(&self, ids: &[u32]) -> Result<String> {
        ids.iter()
            .map(|&id| {
                self.itos
                    .get(id as usize)
                    .copied()
                    .ok_or(Error::UnknownToken(id))
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.itos.len()
    }

    pub fn is_empty(&self) -> bool {
        self.itos.is_empty()
    }

    pub fn symbols(&self) -> &[char] {
        &self.itos
    }
}
