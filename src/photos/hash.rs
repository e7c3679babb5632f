use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HashError {
    #[error("IO error hashing {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Digest used as a proxy for content equality.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum DigestAlgorithm {
    #[default]
    Blake3,
    Sha256,
}

impl fmt::Display for DigestAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DigestAlgorithm::Blake3 => write!(f, "blake3"),
            DigestAlgorithm::Sha256 => write!(f, "sha256"),
        }
    }
}

enum Hasher {
    Blake3(Box<blake3::Hasher>),
    Sha256(Sha256),
}

impl Hasher {
    fn new(algorithm: DigestAlgorithm) -> Self {
        match algorithm {
            DigestAlgorithm::Blake3 => Hasher::Blake3(Box::new(blake3::Hasher::new())),
            DigestAlgorithm::Sha256 => Hasher::Sha256(Sha256::new()),
        }
    }

    fn update(&mut self, bytes: &[u8]) {
        match self {
            Hasher::Blake3(h) => {
                h.update(bytes);
            }
            Hasher::Sha256(h) => h.update(bytes),
        }
    }

    fn finalize_hex(self) -> String {
        match self {
            Hasher::Blake3(h) => h.finalize().to_hex().to_string(),
            Hasher::Sha256(h) => format!("{:x}", h.finalize()),
        }
    }
}

/// Computes whole-file content digests
#[derive(Debug, Clone, Copy, Default)]
pub struct HashService {
    algorithm: DigestAlgorithm,
}

impl HashService {
    pub fn new(algorithm: DigestAlgorithm) -> Self {
        Self { algorithm }
    }

    pub fn algorithm(&self) -> DigestAlgorithm {
        self.algorithm
    }

    /// Stream the file through the hasher and return the lowercase hex digest.
    pub fn compute(&self, file_path: &Path) -> Result<String, HashError> {
        let io_err = |source| HashError::Io {
            path: file_path.display().to_string(),
            source,
        };

        let file = File::open(file_path).map_err(io_err)?;
        let mut reader = BufReader::new(file);
        let mut hasher = Hasher::new(self.algorithm);
        let mut buffer = [0; 8192];

        loop {
            let bytes_read = reader.read(&mut buffer).map_err(io_err)?;
            if bytes_read == 0 {
                break;
            }
            hasher.update(&buffer[..bytes_read]);
        }

        Ok(hasher.finalize_hex())
    }

    /// Hash many files in parallel. Output order matches input order.
    pub fn compute_batch(&self, file_paths: &[PathBuf]) -> Vec<(PathBuf, Result<String, HashError>)> {
        use rayon::prelude::*;

        file_paths
            .par_iter()
            .map(|path| (path.clone(), self.compute(path)))
            .collect()
    }
}
