//! Block identity — fixed 32-byte BLAKE3 digests.
//!
//! A digest is the BLAKE3 hash of a block's **uncompressed** contents and is
//! the block's one and only identity: equality of digests is equality of
//! blocks.  Two textual forms exist and are never mixed:
//!
//! - **hex** — 64 lowercase characters over `[0-9a-f]`; used in URLs and as
//!   the on-disk storage path.
//! - **base64** — used in every JSON body and in the metadata log.
//!
//! Parsing is strict: a wrong length or a stray character is an error, never
//! a truncation.  Callers surface that as a malformed request.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use thiserror::Error;

/// Raw digest length in bytes.
pub const DIGEST_LEN: usize = 32;

/// Length of the hexadecimal form.
pub const DIGEST_HEX_LEN: usize = 2 * DIGEST_LEN;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum DigestError {
    #[error("digest has {0} bytes, expected {DIGEST_LEN}")]
    BadLength(usize),
    #[error("digest hex form must be {DIGEST_HEX_LEN} hex characters")]
    BadHex,
    #[error("digest base64 form does not decode")]
    BadBase64,
}

/// A 32-byte content digest.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Digest([u8; DIGEST_LEN]);

impl Digest {
    /// Hash `data` and return its digest.
    pub fn of(data: &[u8]) -> Self {
        Self(blake3::hash(data).into())
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DigestError> {
        let arr: [u8; DIGEST_LEN] = bytes
            .try_into()
            .map_err(|_| DigestError::BadLength(bytes.len()))?;
        Ok(Self(arr))
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8; DIGEST_LEN] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse the 64-character hex form.
    pub fn from_hex(s: &str) -> Result<Self, DigestError> {
        if s.len() != DIGEST_HEX_LEN {
            return Err(DigestError::BadHex);
        }
        let bytes = hex::decode(s).map_err(|_| DigestError::BadHex)?;
        Self::from_bytes(&bytes)
    }

    pub fn to_base64(&self) -> String {
        base64::encode(self.0)
    }

    /// Parse the base64 form used on the wire and in the metadata log.
    pub fn from_base64(s: &str) -> Result<Self, DigestError> {
        let bytes = base64::decode(s.trim()).map_err(|_| DigestError::BadBase64)?;
        Self::from_bytes(&bytes)
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Abbreviated for readable logs; the full form is 64 characters.
        write!(f, "Digest({}…)", hex::encode(&self.0[..6]))
    }
}

// JSON carries digests in base64, matching `hash` and `hash_list` fields.
impl Serialize for Digest {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_base64())
    }
}

impl<'de> Deserialize<'de> for Digest {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Digest::from_base64(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_roundtrip() {
        let d = Digest::of(b"some block payload");
        let hex = d.to_hex();
        assert_eq!(hex.len(), DIGEST_HEX_LEN);
        assert_eq!(Digest::from_hex(&hex).unwrap(), d);
    }

    #[test]
    fn base64_roundtrip() {
        let d = Digest::of(b"another payload");
        assert_eq!(Digest::from_base64(&d.to_base64()).unwrap(), d);
    }

    #[test]
    fn rejects_bad_hex() {
        assert_eq!(Digest::from_hex("abcd"), Err(DigestError::BadHex));
        let not_hex = "g".repeat(DIGEST_HEX_LEN);
        assert_eq!(Digest::from_hex(&not_hex), Err(DigestError::BadHex));
    }

    #[test]
    fn rejects_wrong_length_bytes() {
        assert_eq!(
            Digest::from_bytes(&[0u8; 16]),
            Err(DigestError::BadLength(16))
        );
    }
}
