use sha1::Sha1;
use sha2::{Digest, Sha256, Sha384};

use crate::types::HashAlgorithm;

/// Running record of handshake message bytes in wire order.
///
/// The raw bytes are kept so the hash can be chosen after the cipher suite
/// is known. Only [`TranscriptDigest::reset`] removes data.
#[derive(Debug, Clone, Default)]
pub struct TranscriptDigest {
    bytes: Vec<u8>,
}

impl TranscriptDigest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, data: &[u8]) {
        self.bytes.extend_from_slice(data);
    }

    pub fn reset(&mut self) {
        self.bytes.clear();
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Hash of everything appended so far.
    pub fn digest(&self, algorithm: HashAlgorithm) -> Vec<u8> {
        match algorithm {
            HashAlgorithm::Sha1 => Sha1::digest(&self.bytes).to_vec(),
            HashAlgorithm::Sha256 => Sha256::digest(&self.bytes).to_vec(),
            HashAlgorithm::Sha384 => Sha384::digest(&self.bytes).to_vec(),
        }
    }
}
