//! Content-addressable identifiers.
//!
//! Every [`Identifier`] carries the algorithm that produced it, so identifiers
//! minted with different hash functions can sit side by side in storage and
//! still be told apart. The algorithm set is closed: adding one means adding a
//! variant to [`Algorithm`] and [`Identifier`], never changing existing ones.
//!
//! # Example
//!
//! ```
//! use tributary::identity::{Algorithm, Identifier};
//!
//! let id = Identifier::from_content(Algorithm::Sha224, b"https://example.com/feed.xml");
//! assert_eq!(id.hex_string().len(), 56);
//!
//! let decoded = Identifier::from_hex(Algorithm::Sha224, &id.hex_string()).unwrap();
//! assert_eq!(decoded, id);
//! ```

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha224, Sha256};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

const SHA224_LEN: usize = 28;
const SHA256_LEN: usize = 32;

/// Errors produced while decoding or naming identifiers.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IdentityError {
    /// Hex string length does not match `2 * algo.byte_len()`.
    #[error("invalid {algo} identifier length: expected {expected} hex characters, got {actual}")]
    InvalidLength {
        algo: Algorithm,
        expected: usize,
        actual: usize,
    },
    /// Hex string contains characters outside `[0-9a-fA-F]`.
    #[error("invalid identifier encoding: {0}")]
    InvalidEncoding(String),
    /// Numeric algorithm code not assigned to any algorithm.
    #[error("unknown identifier algorithm code: {0}")]
    UnknownAlgorithmCode(u8),
    /// Algorithm name not recognized.
    #[error("unknown identifier algorithm: {0}")]
    UnknownAlgorithm(String),
}

/// Hash algorithm used to derive an [`Identifier`].
///
/// The numeric code is stable and is what external systems should persist
/// next to the hex value when they do not store the name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum Algorithm {
    /// SHA-224, 28 byte digests.
    #[default]
    Sha224 = 1,
    /// SHA-256, 32 byte digests.
    Sha256 = 2,
}

impl Algorithm {
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Digest length in bytes.
    pub const fn byte_len(self) -> usize {
        match self {
            Algorithm::Sha224 => SHA224_LEN,
            Algorithm::Sha256 => SHA256_LEN,
        }
    }

    /// Length of the hex encoding in characters.
    pub const fn hex_len(self) -> usize {
        self.byte_len() * 2
    }

    pub fn name(self) -> &'static str {
        match self {
            Algorithm::Sha224 => "sha224",
            Algorithm::Sha256 => "sha256",
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl TryFrom<u8> for Algorithm {
    type Error = IdentityError;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        match code {
            1 => Ok(Algorithm::Sha224),
            2 => Ok(Algorithm::Sha256),
            other => Err(IdentityError::UnknownAlgorithmCode(other)),
        }
    }
}

impl FromStr for Algorithm {
    type Err = IdentityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sha224" | "sha-224" => Ok(Algorithm::Sha224),
            "sha256" | "sha-256" => Ok(Algorithm::Sha256),
            _ => Err(IdentityError::UnknownAlgorithm(s.to_owned())),
        }
    }
}

/// A fixed-length digest tagged with the algorithm that produced it.
///
/// Equality compares both the algorithm and the digest bytes, so a SHA-224
/// and a SHA-256 identifier are never equal even if one were a prefix of the
/// other.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "StoredIdentifier", into = "StoredIdentifier")]
pub enum Identifier {
    Sha224([u8; SHA224_LEN]),
    Sha256([u8; SHA256_LEN]),
}

impl Identifier {
    /// Hashes `content` with `algo`. Deterministic and total.
    pub fn from_content(algo: Algorithm, content: impl AsRef<[u8]>) -> Self {
        let content = content.as_ref();
        match algo {
            Algorithm::Sha224 => {
                let mut value = [0u8; SHA224_LEN];
                value.copy_from_slice(&Sha224::digest(content));
                Identifier::Sha224(value)
            }
            Algorithm::Sha256 => {
                let mut value = [0u8; SHA256_LEN];
                value.copy_from_slice(&Sha256::digest(content));
                Identifier::Sha256(value)
            }
        }
    }

    /// Decodes a hex string produced by [`Identifier::hex_string`].
    ///
    /// # Errors
    ///
    /// - [`IdentityError::InvalidLength`] if `hex.len() != algo.hex_len()`
    /// - [`IdentityError::InvalidEncoding`] if `hex` contains non-hex characters
    pub fn from_hex(algo: Algorithm, hex: &str) -> Result<Self, IdentityError> {
        if hex.len() != algo.hex_len() {
            return Err(IdentityError::InvalidLength {
                algo,
                expected: algo.hex_len(),
                actual: hex.len(),
            });
        }

        match algo {
            Algorithm::Sha224 => {
                let mut value = [0u8; SHA224_LEN];
                decode_into(hex, &mut value)?;
                Ok(Identifier::Sha224(value))
            }
            Algorithm::Sha256 => {
                let mut value = [0u8; SHA256_LEN];
                decode_into(hex, &mut value)?;
                Ok(Identifier::Sha256(value))
            }
        }
    }

    pub fn algo(&self) -> Algorithm {
        match self {
            Identifier::Sha224(_) => Algorithm::Sha224,
            Identifier::Sha256(_) => Algorithm::Sha256,
        }
    }

    pub fn value(&self) -> &[u8] {
        match self {
            Identifier::Sha224(value) => value,
            Identifier::Sha256(value) => value,
        }
    }

    /// Lowercase hex encoding of the digest bytes.
    pub fn hex_string(&self) -> String {
        hex::encode(self.value())
    }
}

fn decode_into(hex: &str, out: &mut [u8]) -> Result<(), IdentityError> {
    hex::decode_to_slice(hex, out).map_err(|e| IdentityError::InvalidEncoding(e.to_string()))
}

impl fmt::Debug for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hex = self.hex_string();
        write!(f, "Identifier({}:{})", self.algo(), hex.get(..16).unwrap_or(&hex))
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.hex_string())
    }
}

/// Serialized shape: `{ "algo": "sha224", "hex": "..." }`.
#[derive(Serialize, Deserialize)]
struct StoredIdentifier {
    algo: Algorithm,
    hex: String,
}

impl From<Identifier> for StoredIdentifier {
    fn from(id: Identifier) -> Self {
        StoredIdentifier {
            algo: id.algo(),
            hex: id.hex_string(),
        }
    }
}

impl TryFrom<StoredIdentifier> for Identifier {
    type Error = IdentityError;

    fn try_from(stored: StoredIdentifier) -> Result<Self, Self::Error> {
        Identifier::from_hex(stored.algo, &stored.hex)
    }
}
