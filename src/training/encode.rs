use ndarray::Array2;
use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use thiserror::Error;

/// Ids below this are reserved for padding, sequence start and unknown words.
pub const DEFAULT_INDEX_OFFSET: usize = 3;
pub const UNKNOWN_WORD: &str = "?";

#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("Index {index} in sequence {row} is out of range for dimension {dim}")]
    IndexOutOfRange { row: usize, index: usize, dim: usize },

    #[error("IO error reading {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid word index: {0}")]
    Parse(#[from] serde_json::Error),
}

/// One row per sequence with `1.0` at every index the sequence contains.
pub fn multi_hot(sequences: &[Vec<usize>], dim: usize) -> Result<Array2<f32>, EncodeError> {
    let mut encoded = Array2::<f32>::zeros((sequences.len(), dim));
    for (row, sequence) in sequences.iter().enumerate() {
        for &index in sequence {
            if index >= dim {
                return Err(EncodeError::IndexOutOfRange { row, index, dim });
            }
            encoded[[row, index]] = 1.0;
        }
    }
    Ok(encoded)
}

/// Vocabulary mapping words to integer ids, with the reverse lookup built once.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(from = "HashMap<String, usize>")]
pub struct WordIndex {
    reverse: HashMap<usize, String>,
}

impl From<HashMap<String, usize>> for WordIndex {
    fn from(word_to_id: HashMap<String, usize>) -> Self {
        let reverse = word_to_id.into_iter().map(|(word, id)| (id, word)).collect();
        Self { reverse }
    }
}

impl WordIndex {
    pub fn from_json_str(text: &str) -> Result<Self, EncodeError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn load(path: &Path) -> Result<Self, EncodeError> {
        let text = fs::read_to_string(path).map_err(|source| EncodeError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json_str(&text)
    }

    pub fn len(&self) -> usize {
        self.reverse.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reverse.is_empty()
    }

    pub fn word(&self, id: usize) -> Option<&str> {
        self.reverse.get(&id).map(String::as_str)
    }

    /// Turn encoded ids back into text. Each id is shifted down by `offset`
    /// before lookup; reserved or unknown ids become `?`.
    pub fn decode(&self, ids: &[usize], offset: usize) -> String {
        ids.iter()
            .map(|&id| {
                id.checked_sub(offset)
                    .and_then(|shifted| self.word(shifted))
                    .unwrap_or(UNKNOWN_WORD)
            })
            .collect::<Vec<_>>()
            .join(" ")
    }
}
