//! Record MACs and the MAC-only record protection of the NULL suites.

use std::fmt;

use hmac::{Hmac, Mac};
use sha1::Sha1;
use sha2::{Sha256, Sha384};
use zeroize::Zeroize;

use super::{CipherKind, CipherState, Protected, RecordBinding, Unprotected};
use crate::types::HashAlgorithm;
use crate::Error;

enum Keyed {
    Sha1(Hmac<Sha1>),
    Sha256(Hmac<Sha256>),
    Sha384(Hmac<Sha384>),
}

/// HMAC over the record pseudo-header followed by the plaintext.
pub(super) struct RecordMac(Keyed);

impl RecordMac {
    pub fn new(
        algorithm: HashAlgorithm,
        key: &[u8],
        binding: &RecordBinding,
        plaintext: &[u8],
    ) -> Result<Self, Error> {
        let invalid = |_| Error::CryptoError("Invalid HMAC key".into());
        let mut keyed = match algorithm {
            HashAlgorithm::Sha1 => {
                Keyed::Sha1(<Hmac<Sha1> as Mac>::new_from_slice(key).map_err(invalid)?)
            }
            HashAlgorithm::Sha256 => {
                Keyed::Sha256(<Hmac<Sha256> as Mac>::new_from_slice(key).map_err(invalid)?)
            }
            HashAlgorithm::Sha384 => {
                Keyed::Sha384(<Hmac<Sha384> as Mac>::new_from_slice(key).map_err(invalid)?)
            }
        };

        let header = binding.additional_data(plaintext.len() as u16);
        for part in [&*header, plaintext] {
            match &mut keyed {
                Keyed::Sha1(m) => m.update(part),
                Keyed::Sha256(m) => m.update(part),
                Keyed::Sha384(m) => m.update(part),
            }
        }
        Ok(RecordMac(keyed))
    }

    pub fn finalize(self) -> Vec<u8> {
        match self.0 {
            Keyed::Sha1(m) => m.finalize().into_bytes().to_vec(),
            Keyed::Sha256(m) => m.finalize().into_bytes().to_vec(),
            Keyed::Sha384(m) => m.finalize().into_bytes().to_vec(),
        }
    }

    /// Constant time check of a received tag.
    pub fn verify(self, tag: &[u8]) -> Result<(), Error> {
        let checked = match self.0 {
            Keyed::Sha1(m) => m.verify_slice(tag),
            Keyed::Sha256(m) => m.verify_slice(tag),
            Keyed::Sha384(m) => m.verify_slice(tag),
        };
        checked.map_err(|_| Error::CryptoError("Bad record MAC".into()))
    }
}

/// HMAC without encryption.
///
/// Layout of a protected fragment: `[plaintext][mac]`.
pub struct MacOnlyCipherState {
    mac_key: Vec<u8>,
    mac: HashAlgorithm,
}

impl MacOnlyCipherState {
    pub fn new(mac_key: &[u8], mac: HashAlgorithm) -> Result<Self, Error> {
        if mac_key.is_empty() {
            return Err(Error::CryptoError("Empty MAC key".into()));
        }
        Ok(MacOnlyCipherState {
            mac_key: mac_key.to_vec(),
            mac,
        })
    }
}

impl fmt::Debug for MacOnlyCipherState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MacOnlyCipherState")
            .field("mac", &self.mac)
            .finish()
    }
}

impl Drop for MacOnlyCipherState {
    fn drop(&mut self) {
        self.mac_key.zeroize();
    }
}

impl CipherState for MacOnlyCipherState {
    fn kind(&self) -> CipherKind {
        CipherKind::MacOnly
    }

    fn min_ciphertext_len(&self) -> usize {
        self.mac.output_len()
    }

    fn encrypt(&mut self, binding: &RecordBinding, plaintext: &[u8]) -> Result<Protected, Error> {
        let mac = RecordMac::new(self.mac, &self.mac_key, binding, plaintext)?.finalize();
        let mut fragment = Vec::with_capacity(plaintext.len() + mac.len());
        fragment.extend_from_slice(plaintext);
        fragment.extend_from_slice(&mac);
        Ok(Protected {
            fragment,
            mac,
            padding: Vec::new(),
        })
    }

    fn decrypt(&mut self, binding: &RecordBinding, fragment: &[u8]) -> Result<Unprotected, Error> {
        if fragment.len() < self.min_ciphertext_len() {
            return Err(Error::CryptoError(format!(
                "Fragment shorter than MAC: {}",
                fragment.len()
            )));
        }
        let (plaintext, mac) = fragment.split_at(fragment.len() - self.mac.output_len());
        RecordMac::new(self.mac, &self.mac_key, binding, plaintext)?.verify(mac)?;
        Ok(Unprotected {
            plaintext: plaintext.to_vec(),
            mac: mac.to_vec(),
            padding: Vec::new(),
        })
    }
}
