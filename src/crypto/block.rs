//! AES-CBC with HMAC record protection.
//!
//! Layout of a protected fragment: `[iv][cbc(plaintext || mac || padding)]`
//! where the explicit IV is absent for TLS 1.0 (the last ciphertext block of
//! the previous record chains instead).

use std::fmt;

use aes_gcm::aes::cipher::{BlockDecrypt, BlockEncrypt, KeyInit};
use aes_gcm::aes::{Aes128, Aes256, Block};
use zeroize::Zeroize;

use super::mac::RecordMac;
use super::{CipherKind, CipherState, Protected, RecordBinding, Unprotected};
use crate::rng::SeededRng;
use crate::types::HashAlgorithm;
use crate::Error;

const BLOCK_LEN: usize = 16;

enum AesBlock {
    Aes128(Box<Aes128>),
    Aes256(Box<Aes256>),
}

impl AesBlock {
    fn new(key: &[u8]) -> Result<Self, Error> {
        let invalid = |_| Error::CryptoError(format!("Invalid AES key size: {}", key.len()));
        match key.len() {
            16 => Ok(AesBlock::Aes128(Box::new(
                Aes128::new_from_slice(key).map_err(invalid)?,
            ))),
            32 => Ok(AesBlock::Aes256(Box::new(
                Aes256::new_from_slice(key).map_err(invalid)?,
            ))),
            _ => Err(Error::CryptoError(format!(
                "Invalid AES key size: {}",
                key.len()
            ))),
        }
    }

    fn encrypt_cbc(&self, iv: &[u8; BLOCK_LEN], data: &mut [u8]) {
        let mut prev = *iv;
        for chunk in data.chunks_exact_mut(BLOCK_LEN) {
            for (b, p) in chunk.iter_mut().zip(prev.iter()) {
                *b ^= p;
            }
            let block = Block::from_mut_slice(chunk);
            match self {
                AesBlock::Aes128(c) => c.encrypt_block(block),
                AesBlock::Aes256(c) => c.encrypt_block(block),
            }
            prev.copy_from_slice(chunk);
        }
    }

    fn decrypt_cbc(&self, iv: &[u8; BLOCK_LEN], data: &mut [u8]) {
        let mut prev = *iv;
        for chunk in data.chunks_exact_mut(BLOCK_LEN) {
            let mut this = [0u8; BLOCK_LEN];
            this.copy_from_slice(chunk);
            let block = Block::from_mut_slice(chunk);
            match self {
                AesBlock::Aes128(c) => c.decrypt_block(block),
                AesBlock::Aes256(c) => c.decrypt_block(block),
            }
            for (b, p) in chunk.iter_mut().zip(prev.iter()) {
                *b ^= p;
            }
            prev = this;
        }
    }
}

/// AES-CBC + HMAC state for one direction and epoch.
pub struct BlockCipherState {
    cipher: AesBlock,
    mac_key: Vec<u8>,
    mac: HashAlgorithm,
    /// `Some` when the IV is implicit (TLS 1.0): the chaining block.
    chained_iv: Option<[u8; BLOCK_LEN]>,
    rng: SeededRng,
}

impl BlockCipherState {
    pub fn new(key: &[u8], mac_key: &[u8], mac: HashAlgorithm) -> Result<Self, Error> {
        if mac_key.is_empty() {
            return Err(Error::CryptoError("Empty MAC key".into()));
        }
        Ok(BlockCipherState {
            cipher: AesBlock::new(key)?,
            mac_key: mac_key.to_vec(),
            mac,
            chained_iv: None,
            rng: SeededRng::new(None),
        })
    }

    /// Use an implicit IV chain starting at `iv` instead of per-record IVs.
    pub fn with_chained_iv(mut self, iv: &[u8]) -> Result<Self, Error> {
        let iv: [u8; BLOCK_LEN] = iv.try_into().map_err(|_| {
            Error::CryptoError(format!("CBC IV must be {} bytes, got {}", BLOCK_LEN, iv.len()))
        })?;
        self.chained_iv = Some(iv);
        Ok(self)
    }

    /// Make the explicit IVs reproducible.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = SeededRng::new(Some(seed));
        self
    }

    fn mac_len(&self) -> usize {
        self.mac.output_len()
    }

    fn iv_len(&self) -> usize {
        if self.chained_iv.is_some() {
            0
        } else {
            BLOCK_LEN
        }
    }

    fn compute_mac(&self, binding: &RecordBinding, plaintext: &[u8]) -> Result<Vec<u8>, Error> {
        Ok(RecordMac::new(self.mac, &self.mac_key, binding, plaintext)?.finalize())
    }
}

impl fmt::Debug for BlockCipherState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self.cipher {
            AesBlock::Aes128(_) => "AES-128-CBC",
            AesBlock::Aes256(_) => "AES-256-CBC",
        };
        f.debug_struct("BlockCipherState")
            .field("cipher", &name)
            .field("mac", &self.mac)
            .field("chained_iv", &self.chained_iv.is_some())
            .finish()
    }
}

impl Drop for BlockCipherState {
    fn drop(&mut self) {
        self.mac_key.zeroize();
    }
}

impl CipherState for BlockCipherState {
    fn kind(&self) -> CipherKind {
        CipherKind::Block
    }

    fn min_ciphertext_len(&self) -> usize {
        // At least one block holding the MAC and the padding length byte.
        let body = (self.mac_len() + 1).div_ceil(BLOCK_LEN) * BLOCK_LEN;
        self.iv_len() + body
    }

    fn encrypt(&mut self, binding: &RecordBinding, plaintext: &[u8]) -> Result<Protected, Error> {
        let mac = self.compute_mac(binding, plaintext)?;

        let unpadded = plaintext.len() + mac.len() + 1;
        let pad_len = (BLOCK_LEN - unpadded % BLOCK_LEN) % BLOCK_LEN;
        let padding = vec![pad_len as u8; pad_len + 1];

        let mut data = Vec::with_capacity(unpadded + pad_len);
        data.extend_from_slice(plaintext);
        data.extend_from_slice(&mac);
        data.extend_from_slice(&padding);

        let mut fragment = Vec::with_capacity(self.iv_len() + data.len());
        let iv = match self.chained_iv {
            Some(iv) => iv,
            None => {
                let mut iv = [0u8; BLOCK_LEN];
                self.rng.fill(&mut iv);
                fragment.extend_from_slice(&iv);
                iv
            }
        };

        self.cipher.encrypt_cbc(&iv, &mut data);

        if let Some(chain) = self.chained_iv.as_mut() {
            chain.copy_from_slice(&data[data.len() - BLOCK_LEN..]);
        }

        fragment.extend_from_slice(&data);

        Ok(Protected {
            fragment,
            mac,
            padding,
        })
    }

    fn decrypt(&mut self, binding: &RecordBinding, fragment: &[u8]) -> Result<Unprotected, Error> {
        if fragment.len() < self.min_ciphertext_len() {
            return Err(Error::CryptoError(format!(
                "Ciphertext too short: {}",
                fragment.len()
            )));
        }
        let (iv, ciphertext) = fragment.split_at(self.iv_len());
        if ciphertext.len() % BLOCK_LEN != 0 {
            return Err(Error::CryptoError(format!(
                "Ciphertext not block aligned: {}",
                ciphertext.len()
            )));
        }

        let iv: [u8; BLOCK_LEN] = match self.chained_iv {
            Some(chain) => chain,
            None => iv
                .try_into()
                .map_err(|_| Error::CryptoError("Bad IV".into()))?,
        };

        let mut data = ciphertext.to_vec();
        self.cipher.decrypt_cbc(&iv, &mut data);

        if let Some(chain) = self.chained_iv.as_mut() {
            chain.copy_from_slice(&ciphertext[ciphertext.len() - BLOCK_LEN..]);
        }

        // Padding: the last byte gives the count of preceding padding bytes,
        // all of which carry that same value.
        let pad_len = data[data.len() - 1] as usize;
        let mac_len = self.mac_len();
        if pad_len + 1 + mac_len > data.len() {
            return Err(Error::CryptoError("Bad padding length".into()));
        }
        let padding = data.split_off(data.len() - pad_len - 1);
        if padding.iter().any(|b| *b as usize != pad_len) {
            return Err(Error::CryptoError("Bad padding".into()));
        }
        let mac = data.split_off(data.len() - mac_len);

        RecordMac::new(self.mac, &self.mac_key, binding, &data)?.verify(&mac)?;

        Ok(Unprotected {
            plaintext: data,
            mac,
            padding,
        })
    }
}
