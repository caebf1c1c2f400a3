//! Object identifiers (§3).
//!
//! SHA-1 hashing goes through the `sha1` crate everywhere.

use sha1::{Digest, Sha1};
use std::fmt;

/// SHA-1 hash width in bytes. SHA-256 repositories (width 32) are
/// representable via [`ObjectId::width`] even though this crate only
/// exercises SHA-1 in its own tests.
pub const SHA1_WIDTH: usize = 20;

/// An opaque object identifier of fixed byte width (§3).
///
/// The distinguished "zero hash" (all-zero bytes) is not a valid object id;
/// it signals absence in reference-update commands.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId(Vec<u8>);

impl ObjectId {
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn width(&self) -> usize {
        self.0.len()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn zero(width: usize) -> Self {
        Self(vec![0u8; width])
    }

    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|&b| b == 0)
    }

    pub fn to_hex(&self) -> String {
        hex::encode(&self.0)
    }

    /// Parse a hex string into an `ObjectId`, rejecting lengths that don't
    /// match `expected_width` bytes (§4.C: "Hex hashes whose length does not
    /// match the repository's hash width are discarded silently").
    pub fn from_hex(hex_str: &str, expected_width: usize) -> Option<Self> {
        if hex_str.len() != expected_width * 2 {
            return None;
        }
        hex::decode(hex_str).ok().map(Self)
    }

    /// SHA-1 of `"<kind> <len>\0<content>"` (§3's object encoding).
    pub fn hash_loose_content(kind: &str, content: &[u8]) -> Self {
        let header = format!("{} {}\0", kind, content.len());
        let mut hasher = Sha1::new();
        hasher.update(header.as_bytes());
        hasher.update(content);
        Self(hasher.finalize().to_vec())
    }

    /// Running SHA-1 over arbitrary bytes (pack trailer / checksum verification).
    pub fn hash_bytes(data: &[u8]) -> Self {
        let mut hasher = Sha1::new();
        hasher.update(data);
        Self(hasher.finalize().to_vec())
    }
}

impl fmt::Debug for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectId({})", self.to_hex())
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// Streaming SHA-1 hasher, used to compute the pack trailer on the fly
/// while writing (§4.D.3) and to verify it while reading (§4.E.3).
#[derive(Default)]
pub struct RunningHash(Sha1);

impl RunningHash {
    pub fn new() -> Self {
        Self(Sha1::new())
    }

    pub fn update(&mut self, data: &[u8]) {
        self.0.update(data);
    }

    pub fn finalize(self) -> ObjectId {
        ObjectId(self.0.finalize().to_vec())
    }
}
