use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::Error;

/// Maximum length of a chunk hash in characters.
const MAX_HASH_LEN: usize = 64;

/// The address of a chunk within a [`ChunkStore`](crate::ChunkStore).
///
/// Hashes are opaque to the store, but they double as file names. They are therefore restricted to
/// lowercase ASCII letters and digits, between 1 and 64 characters long.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct ChunkHash(String);

impl ChunkHash {
    /// Returns the hash as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for ChunkHash {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let valid = !s.is_empty()
            && s.len() <= MAX_HASH_LEN
            && s.bytes()
                .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit());

        if !valid {
            return Err(Error::InvalidHash(s.to_owned()));
        }

        Ok(Self(s.to_owned()))
    }
}

impl<'de> Deserialize<'de> for ChunkHash {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

impl fmt::Display for ChunkHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_lowercase_alphanumeric() {
        let hash: ChunkHash = "0a1b2c3d4e5f6g7h8i9j".parse().unwrap();
        assert_eq!(hash.as_str(), "0a1b2c3d4e5f6g7h8i9j");
    }

    #[test]
    fn rejects_path_like_values() {
        for value in ["", "../etc", "a/b", "ABC", "a.b", &"a".repeat(65)] {
            assert!(
                value.parse::<ChunkHash>().is_err(),
                "{value:?} should be rejected"
            );
        }
    }

    #[test]
    fn deserialize_validates() {
        let hash: ChunkHash = serde_json::from_str(r#""abc123""#).unwrap();
        assert_eq!(hash.as_str(), "abc123");

        assert!(serde_json::from_str::<ChunkHash>(r#""../abc""#).is_err());
    }
}
