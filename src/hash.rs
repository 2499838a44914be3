//! Keyed content digests.
//!
//! A digest is the configured hash function applied to the secret key bytes
//! followed by the full payload, in a single streaming pass, rendered as
//! lowercase hex. With an empty key this is a plain content hash.

use std::fmt;
use std::io::{self, Read};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Result, StashError};

/// Hash algorithms accepted in `common.alg`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashAlgorithm {
    Sha224,
    Sha256,
    Sha384,
    Sha512,
    Sha512_256,
    Blake3,
}

impl HashAlgorithm {
    /// Canonical lowercase name.
    pub fn name(self) -> &'static str {
        match self {
            Self::Sha224 => "sha224",
            Self::Sha256 => "sha256",
            Self::Sha384 => "sha384",
            Self::Sha512 => "sha512",
            Self::Sha512_256 => "sha512_256",
            Self::Blake3 => "blake3",
        }
    }

    /// Length of the hex digest produced by this algorithm.
    pub fn hex_len(self) -> usize {
        match self {
            Self::Sha224 => 56,
            Self::Sha256 | Self::Sha512_256 | Self::Blake3 => 64,
            Self::Sha384 => 96,
            Self::Sha512 => 128,
        }
    }
}

impl FromStr for HashAlgorithm {
    type Err = StashError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "sha224" => Ok(Self::Sha224),
            "sha256" => Ok(Self::Sha256),
            "sha384" => Ok(Self::Sha384),
            "sha512" => Ok(Self::Sha512),
            "sha512_256" => Ok(Self::Sha512_256),
            "blake3" => Ok(Self::Blake3),
            _ => Err(StashError::UnsupportedAlgorithm(s.to_string())),
        }
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Identity of a stored payload: a lowercase hex string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Digest(String);

impl Digest {
    /// Extract a candidate digest from an HTTP request path.
    ///
    /// Every character that is not an ASCII hex digit is dropped and the rest
    /// is lowercased, so `/ABC-123` yields `abc123`. Returns `None` when
    /// nothing is left.
    pub fn from_request_path(path: &str) -> Option<Self> {
        let hex: String = path
            .chars()
            .filter(char::is_ascii_hexdigit)
            .map(|c| c.to_ascii_lowercase())
            .collect();
        if hex.is_empty() {
            None
        } else {
            Some(Self(hex))
        }
    }

    /// Get the digest as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consume and return the inner string.
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Digest {
    type Err = StashError;

    /// Parse a complete digest. Unlike [`Digest::from_request_path`] this
    /// rejects anything that is not pure hex.
    fn from_str(s: &str) -> Result<Self> {
        if s.is_empty() || !s.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(StashError::NotFound(s.to_string()));
        }
        Ok(Self(s.to_ascii_lowercase()))
    }
}

impl AsRef<str> for Digest {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Compute the keyed digest of everything `reader` yields.
///
/// The key is fed to the hash before the content. The reader is consumed
/// with `io::copy`, so payloads are never buffered whole.
pub fn digest(algorithm: HashAlgorithm, key: &[u8], mut reader: impl Read) -> io::Result<Digest> {
    let bytes = match algorithm {
        HashAlgorithm::Sha224 => keyed::<sha2::Sha224>(key, &mut reader)?,
        HashAlgorithm::Sha256 => keyed::<sha2::Sha256>(key, &mut reader)?,
        HashAlgorithm::Sha384 => keyed::<sha2::Sha384>(key, &mut reader)?,
        HashAlgorithm::Sha512 => keyed::<sha2::Sha512>(key, &mut reader)?,
        HashAlgorithm::Sha512_256 => keyed::<sha2::Sha512_256>(key, &mut reader)?,
        HashAlgorithm::Blake3 => {
            let mut hasher = blake3::Hasher::new();
            hasher.update(key);
            io::copy(&mut reader, &mut hasher)?;
            hasher.finalize().as_bytes().to_vec()
        }
    };
    Ok(Digest(hex::encode(bytes)))
}

fn keyed<D>(key: &[u8], reader: &mut impl Read) -> io::Result<Vec<u8>>
where
    D: sha2::Digest + io::Write,
{
    let mut hasher = D::new();
    hasher.update(key);
    io::copy(reader, &mut hasher)?;
    Ok(hasher.finalize().to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sha256_empty_key_is_plain_hash() {
        let d = digest(HashAlgorithm::Sha256, b"", &b"abc"[..]).unwrap();
        assert_eq!(
            d.as_str(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_key_is_prefixed_to_content() {
        let keyed = digest(HashAlgorithm::Sha256, b"ab", &b"c"[..]).unwrap();
        let plain = digest(HashAlgorithm::Sha256, b"", &b"abc"[..]).unwrap();
        assert_eq!(keyed, plain);
    }

    #[test]
    fn test_deterministic() {
        let a = digest(HashAlgorithm::Blake3, b"secret", &b"payload"[..]).unwrap();
        let b = digest(HashAlgorithm::Blake3, b"secret", &b"payload"[..]).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_key_changes_digest() {
        for alg in [HashAlgorithm::Sha256, HashAlgorithm::Sha512, HashAlgorithm::Blake3] {
            let a = digest(alg, b"key-one", &b"same content"[..]).unwrap();
            let b = digest(alg, b"key-two", &b"same content"[..]).unwrap();
            assert_ne!(a, b, "{alg} ignored the key");
        }
    }

    #[test]
    fn test_one_byte_flip_changes_digest() {
        let mut data = vec![0x5au8; 4096];
        let before = digest(HashAlgorithm::Sha256, b"k", &data[..]).unwrap();
        data[2048] ^= 0x01;
        let after = digest(HashAlgorithm::Sha256, b"k", &data[..]).unwrap();
        assert_ne!(before, after);

        // Roughly half the bits should differ.
        let differing: u32 = hex::decode(before.as_str())
            .unwrap()
            .iter()
            .zip(hex::decode(after.as_str()).unwrap())
            .map(|(a, b)| (a ^ b).count_ones())
            .sum();
        assert!(differing > 64 && differing < 192, "only {differing} bits changed");
    }

    #[test]
    fn test_hex_lengths() {
        for alg in [
            HashAlgorithm::Sha224,
            HashAlgorithm::Sha256,
            HashAlgorithm::Sha384,
            HashAlgorithm::Sha512,
            HashAlgorithm::Sha512_256,
            HashAlgorithm::Blake3,
        ] {
            let d = digest(alg, b"", &b"x"[..]).unwrap();
            assert_eq!(d.as_str().len(), alg.hex_len(), "{alg}");
            assert!(d.as_str().chars().all(|c| matches!(c, '0'..='9' | 'a'..='f')));
        }
    }

    #[test]
    fn test_algorithm_names() {
        assert_eq!("SHA256".parse::<HashAlgorithm>().unwrap(), HashAlgorithm::Sha256);
        assert_eq!("sha512-256".parse::<HashAlgorithm>().unwrap(), HashAlgorithm::Sha512_256);
        assert_eq!("blake3".parse::<HashAlgorithm>().unwrap(), HashAlgorithm::Blake3);
        let err = "md4".parse::<HashAlgorithm>().unwrap_err();
        assert!(matches!(err, StashError::UnsupportedAlgorithm(ref n) if n == "md4"));
    }

    #[test]
    fn test_from_request_path() {
        let d = Digest::from_request_path("/ABCdef-12.bin").unwrap();
        assert_eq!(d.as_str(), "abcdef12b");
        assert_eq!(
            Digest::from_request_path("/deadbeef").unwrap().as_str(),
            "deadbeef"
        );
        assert!(Digest::from_request_path("/").is_none());
        assert!(Digest::from_request_path("/xyz/").is_none());
    }

    #[test]
    fn test_from_str_rejects_non_hex() {
        assert!("abc123".parse::<Digest>().is_ok());
        assert!("../etc".parse::<Digest>().is_err());
        assert!("".parse::<Digest>().is_err());
    }
}
