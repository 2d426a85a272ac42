//! Record protection state.
//!
//! A [`CipherState`] is everything needed to protect or unprotect records for
//! one direction under one epoch. The record codec drives it; key derivation
//! that produces states lives outside the crate and hands finished states to
//! the [`ConnectionContext`][crate::ConnectionContext].
//!
//! # States
//!
//! * [`NullCipherState`] passes payloads through. It is the initial state of
//!   every epoch slot and the fallback whenever a record cannot be decrypted.
//! * [`AeadCipherState`] implements AES-GCM with the TLS 1.2 nonce layout.
//! * [`BlockCipherState`] implements AES-CBC with HMAC (MAC, then pad, then
//!   encrypt).
//! * [`MacOnlyCipherState`] appends an HMAC and leaves the plaintext readable,
//!   as the NULL suites do.
//!
//! States are superseded, never re-keyed: a key change means a new boxed
//! state in a new slot.

mod aead;
mod block;
mod mac;
mod transcript;

use std::fmt;

use tinyvec::ArrayVec;
use zeroize::Zeroize;

pub use aead::AeadCipherState;
pub use block::BlockCipherState;
pub use mac::MacOnlyCipherState;
pub use transcript::TranscriptDigest;

use crate::types::{BulkCipher, CipherSuite, ContentType, ProtocolVersion};
use crate::Error;

/// Marker for state that may travel with a connection context to a worker
/// thread.
pub trait CryptoSafe: Send + Sync + fmt::Debug {}

impl<T: Send + Sync + fmt::Debug> CryptoSafe for T {}

/// Broad class of a cipher state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CipherKind {
    Null,
    MacOnly,
    Block,
    Aead,
}

/// The header fields a record's protection is bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordBinding {
    pub content_type: ContentType,
    pub version: ProtocolVersion,
    /// `Some` for DTLS.
    pub epoch: Option<u16>,
    pub sequence_number: u64,
}

impl RecordBinding {
    /// The 64 bit sequence field used in MAC input and AEAD nonces.
    ///
    /// For DTLS the epoch occupies the top two bytes.
    pub fn sequence_bytes(&self) -> [u8; 8] {
        let mut bytes = self.sequence_number.to_be_bytes();
        if let Some(epoch) = self.epoch {
            bytes[..2].copy_from_slice(&epoch.to_be_bytes());
        }
        bytes
    }

    /// MAC pseudo-header / AEAD additional data for a plaintext of `length`.
    pub fn additional_data(&self, length: u16) -> Aad {
        let mut aad = ArrayVec::new();
        aad.extend_from_slice(&self.sequence_bytes());
        aad.push(self.content_type.as_u8());
        aad.extend_from_slice(&self.version.as_u16().to_be_bytes());
        aad.extend_from_slice(&length.to_be_bytes());
        Aad(aad)
    }
}

/// Additional authenticated data: seq(8) + type(1) + version(2) + length(2).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Aad(pub ArrayVec<[u8; 13]>);

impl std::ops::Deref for Aad {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// Output of protecting one record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Protected {
    /// What goes on the wire as the record fragment.
    pub fragment: Vec<u8>,
    /// MAC or AEAD tag.
    pub mac: Vec<u8>,
    pub padding: Vec<u8>,
}

/// Output of unprotecting one record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Unprotected {
    pub plaintext: Vec<u8>,
    pub mac: Vec<u8>,
    pub padding: Vec<u8>,
}

/// Protection for records of one direction under one epoch.
pub trait CipherState: CryptoSafe {
    fn kind(&self) -> CipherKind;

    /// Records with a shorter fragment cannot have been produced by this state.
    fn min_ciphertext_len(&self) -> usize;

    /// Protect a plaintext fragment.
    fn encrypt(&mut self, binding: &RecordBinding, plaintext: &[u8]) -> Result<Protected, Error>;

    /// Unprotect a fragment, verifying its MAC or tag.
    fn decrypt(&mut self, binding: &RecordBinding, fragment: &[u8]) -> Result<Unprotected, Error>;

    fn is_null(&self) -> bool {
        self.kind() == CipherKind::Null
    }
}

/// No confidentiality, no integrity.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullCipherState;

impl CipherState for NullCipherState {
    fn kind(&self) -> CipherKind {
        CipherKind::Null
    }

    fn min_ciphertext_len(&self) -> usize {
        0
    }

    fn encrypt(&mut self, _: &RecordBinding, plaintext: &[u8]) -> Result<Protected, Error> {
        Ok(Protected {
            fragment: plaintext.to_vec(),
            ..Default::default()
        })
    }

    fn decrypt(&mut self, _: &RecordBinding, fragment: &[u8]) -> Result<Unprotected, Error> {
        Ok(Unprotected {
            plaintext: fragment.to_vec(),
            ..Default::default()
        })
    }
}

/// Keys for one direction, as produced by an external key schedule.
///
/// Wiped on drop.
pub struct KeyMaterial {
    pub enc_key: Vec<u8>,
    pub mac_key: Vec<u8>,
    /// AEAD: the 4 byte implicit nonce part. Block ciphers without explicit
    /// IVs: the initial chaining block.
    pub iv: Vec<u8>,
}

impl KeyMaterial {
    pub fn new(enc_key: &[u8], mac_key: &[u8], iv: &[u8]) -> Self {
        KeyMaterial {
            enc_key: enc_key.to_vec(),
            mac_key: mac_key.to_vec(),
            iv: iv.to_vec(),
        }
    }
}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyMaterial")
            .field("enc_key_len", &self.enc_key.len())
            .field("mac_key_len", &self.mac_key.len())
            .field("iv_len", &self.iv.len())
            .finish()
    }
}

impl Drop for KeyMaterial {
    fn drop(&mut self) {
        self.enc_key.zeroize();
        self.mac_key.zeroize();
        self.iv.zeroize();
    }
}

/// Build the state a cipher suite uses for the given keys.
pub fn cipher_state_for(
    suite: CipherSuite,
    version: ProtocolVersion,
    keys: &KeyMaterial,
) -> Result<Box<dyn CipherState>, Error> {
    match suite.bulk_cipher() {
        Some(BulkCipher::AesGcm { key_len }) => {
            check_key_len(&keys.enc_key, key_len)?;
            Ok(Box::new(AeadCipherState::new(&keys.enc_key, &keys.iv)?))
        }
        Some(BulkCipher::AesCbc { key_len, mac }) => {
            check_key_len(&keys.enc_key, key_len)?;
            let mut state = BlockCipherState::new(&keys.enc_key, &keys.mac_key, mac)?;
            if !version.has_explicit_iv() {
                state = state.with_chained_iv(&keys.iv)?;
            }
            Ok(Box::new(state))
        }
        Some(BulkCipher::Null { mac }) => {
            Ok(Box::new(MacOnlyCipherState::new(&keys.mac_key, mac)?))
        }
        None => Err(Error::CryptoError(format!(
            "No record protection for suite {:?}",
            suite
        ))),
    }
}

fn check_key_len(key: &[u8], expected: usize) -> Result<(), Error> {
    if key.len() != expected {
        return Err(Error::CryptoError(format!(
            "Expected key length {} but got {}",
            expected,
            key.len()
        )));
    }
    Ok(())
}
