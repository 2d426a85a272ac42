//! AES-GCM record protection (RFC 5288 layout).

use std::fmt;

use aes_gcm::aead::generic_array::GenericArray;
use aes_gcm::aead::{AeadInPlace, KeyInit};
use aes_gcm::{Aes128Gcm, Aes256Gcm, Key};

use super::{CipherKind, CipherState, Protected, RecordBinding, Unprotected};
use crate::Error;

/// Explicit nonce length, transmitted in front of each record's ciphertext.
pub(crate) const EXPLICIT_NONCE_LEN: usize = 8;

/// GCM authentication tag length.
pub(crate) const GCM_TAG_LEN: usize = 16;

/// Overhead per AEAD record (explicit nonce + tag).
pub(crate) const AEAD_OVERHEAD: usize = EXPLICIT_NONCE_LEN + GCM_TAG_LEN; // 24

enum AesGcm {
    Aes128(Box<Aes128Gcm>),
    Aes256(Box<Aes256Gcm>),
}

impl AesGcm {
    fn new(key: &[u8]) -> Result<Self, Error> {
        match key.len() {
            16 => {
                let key = Key::<Aes128Gcm>::from_slice(key);
                Ok(AesGcm::Aes128(Box::new(Aes128Gcm::new(key))))
            }
            32 => {
                let key = Key::<Aes256Gcm>::from_slice(key);
                Ok(AesGcm::Aes256(Box::new(Aes256Gcm::new(key))))
            }
            _ => Err(Error::CryptoError(format!(
                "Invalid key size for AES-GCM: {}",
                key.len()
            ))),
        }
    }
}

/// AES-GCM state for one direction and epoch.
///
/// The explicit nonce is the record's 64 bit sequence field, so a record's
/// bytes are a pure function of keys, header and plaintext.
pub struct AeadCipherState {
    cipher: AesGcm,
    fixed_iv: [u8; 4],
}

impl AeadCipherState {
    pub fn new(key: &[u8], fixed_iv: &[u8]) -> Result<Self, Error> {
        let fixed_iv: [u8; 4] = fixed_iv.try_into().map_err(|_| {
            Error::CryptoError(format!("AES-GCM fixed IV must be 4 bytes, got {}", fixed_iv.len()))
        })?;
        Ok(AeadCipherState {
            cipher: AesGcm::new(key)?,
            fixed_iv,
        })
    }

    fn nonce(&self, explicit: &[u8]) -> [u8; 12] {
        let mut nonce = [0u8; 12];
        nonce[..4].copy_from_slice(&self.fixed_iv);
        nonce[4..].copy_from_slice(explicit);
        nonce
    }
}

impl fmt::Debug for AeadCipherState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self.cipher {
            AesGcm::Aes128(_) => "AES-128-GCM",
            AesGcm::Aes256(_) => "AES-256-GCM",
        };
        f.debug_tuple("AeadCipherState").field(&name).finish()
    }
}

impl CipherState for AeadCipherState {
    fn kind(&self) -> CipherKind {
        CipherKind::Aead
    }

    fn min_ciphertext_len(&self) -> usize {
        AEAD_OVERHEAD
    }

    fn encrypt(&mut self, binding: &RecordBinding, plaintext: &[u8]) -> Result<Protected, Error> {
        let explicit = binding.sequence_bytes();
        let nonce = self.nonce(&explicit);
        let aad = binding.additional_data(plaintext.len() as u16);

        let mut data = plaintext.to_vec();
        let nonce = GenericArray::from_slice(&nonce);
        let result = match &self.cipher {
            AesGcm::Aes128(c) => c.encrypt_in_place(nonce, &aad, &mut data),
            AesGcm::Aes256(c) => c.encrypt_in_place(nonce, &aad, &mut data),
        };
        result.map_err(|_| Error::CryptoError("AES-GCM encryption failed".into()))?;

        let mac = data[data.len() - GCM_TAG_LEN..].to_vec();

        let mut fragment = Vec::with_capacity(EXPLICIT_NONCE_LEN + data.len());
        fragment.extend_from_slice(&explicit);
        fragment.extend_from_slice(&data);

        Ok(Protected {
            fragment,
            mac,
            padding: Vec::new(),
        })
    }

    fn decrypt(&mut self, binding: &RecordBinding, fragment: &[u8]) -> Result<Unprotected, Error> {
        if fragment.len() < AEAD_OVERHEAD {
            return Err(Error::CryptoError(format!(
                "Ciphertext too short: {}",
                fragment.len()
            )));
        }

        let (explicit, ciphertext) = fragment.split_at(EXPLICIT_NONCE_LEN);
        let nonce = self.nonce(explicit);
        let plaintext_len = ciphertext.len() - GCM_TAG_LEN;
        let aad = binding.additional_data(plaintext_len as u16);
        let mac = ciphertext[plaintext_len..].to_vec();

        let mut data = ciphertext.to_vec();
        let nonce = GenericArray::from_slice(&nonce);
        let result = match &self.cipher {
            AesGcm::Aes128(c) => c.decrypt_in_place(nonce, &aad, &mut data),
            AesGcm::Aes256(c) => c.decrypt_in_place(nonce, &aad, &mut data),
        };
        result.map_err(|_| Error::CryptoError("AES-GCM decryption failed".into()))?;

        Ok(Unprotected {
            plaintext: data,
            mac,
            padding: Vec::new(),
        })
    }
}
