//! Content digests for integrity verification and duplicate detection.
//!
//! - Streams files in fixed 64 KiB blocks so memory use does not depend on file size.
//! - Algorithms are pluggable through `DigestAlgorithm` and the `Digester` trait.
//! - Nothing is cached: every call re-reads the file.

use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256};
use std::fmt;
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;
use std::str::FromStr;
use std::time::{Duration, Instant};
use tracing::trace;

use crate::errors::{IntegrityError, ReadStage};

/// Read block size for streaming digests.
pub const DIGEST_BLOCK_SIZE: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DigestAlgorithm {
    #[default]
    Sha256,
    Blake3,
}

impl DigestAlgorithm {
    /// Length of the lowercase hex rendering.
    pub fn hex_len(self) -> usize {
        match self {
            DigestAlgorithm::Sha256 => 64,
            DigestAlgorithm::Blake3 => 64,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            DigestAlgorithm::Sha256 => "sha256",
            DigestAlgorithm::Blake3 => "blake3",
        }
    }

    /// Check a declared digest for length and alphabet before trusting it.
    pub fn validate_hex(self, digest: &str) -> Result<(), IntegrityError> {
        let ok = digest.len() == self.hex_len()
            && digest.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
        if ok {
            Ok(())
        } else {
            Err(IntegrityError::MalformedDigest {
                algorithm: self.name(),
                digest: digest.to_string(),
                expected_len: self.hex_len(),
            })
        }
    }

    /// Digest an in-memory buffer (used by callers that already hold the bytes).
    pub fn digest_bytes(self, bytes: &[u8]) -> String {
        match self {
            DigestAlgorithm::Sha256 => format!("{:x}", Sha256::digest(bytes)),
            DigestAlgorithm::Blake3 => blake3::hash(bytes).to_hex().to_string(),
        }
    }
}

impl fmt::Display for DigestAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DigestAlgorithm {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sha256" | "sha-256" => Ok(DigestAlgorithm::Sha256),
            "blake3" => Ok(DigestAlgorithm::Blake3),
            other => Err(format!("unknown digest algorithm: '{other}'")),
        }
    }
}

/// Result of comparing a file against an expected digest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verification {
    pub matches: bool,
    pub actual: String,
    pub elapsed: Duration,
}

/// Anything that can fingerprint a file on disk.
pub trait Digester: Send + Sync {
    fn algorithm(&self) -> DigestAlgorithm;

    fn digest(&self, path: &Path) -> Result<String, IntegrityError>;

    fn verify(&self, path: &Path, expected: &str) -> Result<Verification, IntegrityError> {
        let start = Instant::now();
        let actual = self.digest(path)?;
        Ok(Verification {
            matches: actual.eq_ignore_ascii_case(expected),
            actual,
            elapsed: start.elapsed(),
        })
    }
}

/// Streaming file digester.
#[derive(Debug, Clone, Copy, Default)]
pub struct IntegrityVerifier {
    algorithm: DigestAlgorithm,
}

enum Hasher {
    Sha256(Sha256),
    Blake3(Box<blake3::Hasher>),
}

impl Hasher {
    fn new(algorithm: DigestAlgorithm) -> Self {
        match algorithm {
            DigestAlgorithm::Sha256 => Hasher::Sha256(Sha256::new()),
            DigestAlgorithm::Blake3 => Hasher::Blake3(Box::new(blake3::Hasher::new())),
        }
    }

    fn update(&mut self, block: &[u8]) {
        match self {
            Hasher::Sha256(h) => h.update(block),
            Hasher::Blake3(h) => {
                h.update(block);
            }
        }
    }

    fn finalize_hex(self) -> String {
        match self {
            Hasher::Sha256(h) => format!("{:x}", h.finalize()),
            Hasher::Blake3(h) => h.finalize().to_hex().to_string(),
        }
    }
}

impl IntegrityVerifier {
    pub fn new(algorithm: DigestAlgorithm) -> Self {
        Self { algorithm }
    }

    /// Digest any reader; `path` only labels errors.
    pub fn digest_reader<R: Read>(&self, mut reader: R, path: &Path) -> Result<String, IntegrityError> {
        let mut hasher = Hasher::new(self.algorithm);
        let mut buf = vec![0u8; DIGEST_BLOCK_SIZE];
        let mut total: u64 = 0;
        loop {
            let n = match reader.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(source) => {
                    return Err(IntegrityError::Io {
                        path: path.to_path_buf(),
                        stage: ReadStage::MidStream,
                        source,
                    });
                }
            };
            hasher.update(&buf[..n]);
            total += n as u64;
        }
        trace!(path = %path.display(), bytes = total, algorithm = %self.algorithm, "digest computed");
        Ok(hasher.finalize_hex())
    }
}

impl Digester for IntegrityVerifier {
    fn algorithm(&self) -> DigestAlgorithm {
        self.algorithm
    }

    fn digest(&self, path: &Path) -> Result<String, IntegrityError> {
        let f = File::open(path).map_err(|source| IntegrityError::Io {
            path: path.to_path_buf(),
            stage: ReadStage::Open,
            source,
        })?;
        self.digest_reader(f, path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    const ABC_SHA256: &str = "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad";

    #[test]
    fn sha256_of_known_content() {
        let dir = tempdir().unwrap();
        let p = dir.path().join("abc.txt");
        fs::write(&p, b"abc").unwrap();
        let v = IntegrityVerifier::default();
        assert_eq!(v.digest(&p).unwrap(), ABC_SHA256);
    }

    #[test]
    fn blake3_matches_in_memory_hash() {
        let dir = tempdir().unwrap();
        let p = dir.path().join("b.bin");
        // Cross several block boundaries.
        let data: Vec<u8> = (0..(3 * DIGEST_BLOCK_SIZE + 17)).map(|i| (i % 251) as u8).collect();
        fs::write(&p, &data).unwrap();
        let v = IntegrityVerifier::new(DigestAlgorithm::Blake3);
        assert_eq!(v.digest(&p).unwrap(), DigestAlgorithm::Blake3.digest_bytes(&data));
    }

    #[test]
    fn verify_reports_mismatch() {
        let dir = tempdir().unwrap();
        let p = dir.path().join("abc.txt");
        fs::write(&p, b"abd").unwrap();
        let res = IntegrityVerifier::default().verify(&p, ABC_SHA256).unwrap();
        assert!(!res.matches);
        assert_ne!(res.actual, ABC_SHA256);
    }

    #[test]
    fn missing_file_fails_at_open() {
        let dir = tempdir().unwrap();
        let err = IntegrityVerifier::default()
            .digest(&dir.path().join("nope"))
            .unwrap_err();
        assert!(matches!(err, IntegrityError::Io { stage: ReadStage::Open, .. }));
    }

    #[test]
    fn validate_hex_rejects_bad_input() {
        let alg = DigestAlgorithm::Sha256;
        assert!(alg.validate_hex(ABC_SHA256).is_ok());
        assert!(alg.validate_hex("abc").is_err());
        assert!(alg.validate_hex(&ABC_SHA256.to_uppercase()).is_err());
    }

    #[test]
    fn algorithm_parses_case_insensitively() {
        assert_eq!("SHA256".parse::<DigestAlgorithm>().unwrap(), DigestAlgorithm::Sha256);
        assert_eq!("blake3".parse::<DigestAlgorithm>().unwrap(), DigestAlgorithm::Blake3);
        assert!("md5".parse::<DigestAlgorithm>().is_err());
    }
}
