//! Hashing for build unit fingerprints.
//!
//! A fingerprint is a 20-character truncated SHA-256 of the JSON form of a
//! value. Completion markers store the fingerprint of the unit that produced
//! them so a marker written for different inputs is never reused.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Number of hex characters kept from the full digest.
const FINGERPRINT_LEN: usize = 20;

pub type HashError = serde_json::Error;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Fingerprint(pub String);

impl std::fmt::Display for Fingerprint {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}", self.0)
  }
}

pub trait Fingerprintable: Serialize {
  fn fingerprint(&self) -> Result<Fingerprint, HashError> {
    let serialized = serde_json::to_string(self)?;
    Ok(Fingerprint(hash_bytes(serialized.as_bytes())[..FINGERPRINT_LEN].to_string()))
  }
}

/// Full lowercase hex SHA-256 of `data`.
pub fn hash_bytes(data: &[u8]) -> String {
  let mut hasher = Sha256::new();
  hasher.update(data);
  hex::encode(hasher.finalize())
}
