use std::fmt;

use crate::crypto::{CipherState, NullCipherState};
use crate::util::MAX_U48;
use crate::Error;

/// Epoch, sequence and cipher tracking for one direction.
///
/// Read and write each own one of these; nothing is shared across
/// directions.
pub struct DirectionState {
    epoch: u16,

    /// Next sequence number to use (write) or expected (read) in `epoch`.
    sequence: u64,

    /// Sequence counters of the epochs below `epoch`, saved on advance so a
    /// revert can restore them.
    saved: Vec<u64>,

    /// Sequence counters of epochs left by a revert, indexed by epoch. A
    /// later advance into such an epoch continues where it stopped, so no
    /// sequence number is used twice.
    resume: Vec<u64>,

    /// Cipher state per epoch. Empty slots and epochs past the end resolve
    /// to the null cipher.
    ciphers: Vec<Option<Box<dyn CipherState>>>,

    null: NullCipherState,
}

impl DirectionState {
    pub fn new() -> Self {
        DirectionState {
            epoch: 0,
            sequence: 0,
            saved: Vec::new(),
            resume: Vec::new(),
            ciphers: Vec::new(),
            null: NullCipherState,
        }
    }

    pub fn epoch(&self) -> u16 {
        self.epoch
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Hand out the current sequence number and move past it.
    ///
    /// DTLS sequence numbers are 48 bits and may not wrap.
    pub fn take_sequence(&mut self, dtls: bool) -> Result<u64, Error> {
        let max = if dtls { MAX_U48 } else { u64::MAX };
        let seq = self.sequence;
        if seq > max {
            return Err(Error::SequenceOverflow(seq));
        }
        self.sequence = seq.checked_add(1).ok_or(Error::SequenceOverflow(seq))?;
        Ok(seq)
    }

    /// Note a sequence number seen on an inbound DTLS record.
    ///
    /// Only records of the current epoch move the counter, and only forward.
    pub fn observe(&mut self, epoch: u16, sequence_number: u64) {
        if epoch == self.epoch && sequence_number >= self.sequence {
            self.sequence = sequence_number.saturating_add(1);
        }
    }

    /// Move to the next epoch with a fresh sequence counter.
    ///
    /// An epoch entered before and left by [`revert_epoch`][Self::revert_epoch]
    /// continues its old counter instead of restarting at 0. Retransmitted
    /// flights therefore never repeat a sequence number, and so never repeat
    /// an AEAD nonce, under the same key.
    pub fn advance_epoch(&mut self) -> Result<(), Error> {
        let next = self.epoch.checked_add(1).ok_or(Error::WrappedEpoch)?;
        self.saved.push(self.sequence);
        self.epoch = next;
        self.sequence = self.resume.get(next as usize).copied().unwrap_or(0);
        debug!("Advance epoch to {}", self.epoch);
        Ok(())
    }

    /// Go back to the previous epoch and its saved sequence counter.
    ///
    /// Returns `false` (and changes nothing) at epoch 0.
    pub fn revert_epoch(&mut self) -> bool {
        if self.epoch == 0 {
            return false;
        }
        let idx = self.epoch as usize;
        if self.resume.len() <= idx {
            self.resume.resize(idx + 1, 0);
        }
        self.resume[idx] = self.sequence;
        self.epoch -= 1;
        self.sequence = self.saved.pop().unwrap_or(0);
        debug!(
            "Revert epoch to {} (sequence {})",
            self.epoch, self.sequence
        );
        true
    }

    /// Put `state` in the slot for `epoch`, superseding what was there.
    pub fn install(&mut self, epoch: u16, state: Box<dyn CipherState>) {
        let idx = epoch as usize;
        if self.ciphers.len() <= idx {
            self.ciphers.resize_with(idx + 1, || None);
        }
        self.ciphers[idx] = Some(state);
    }

    /// Drop the state of `epoch`, making it resolve to the null cipher.
    pub fn clear(&mut self, epoch: u16) {
        if let Some(slot) = self.ciphers.get_mut(epoch as usize) {
            *slot = None;
        }
    }

    /// Whether a non-null state sits in the slot for `epoch`.
    pub fn has_cipher(&self, epoch: u16) -> bool {
        matches!(self.ciphers.get(epoch as usize), Some(Some(_)))
    }

    /// Cipher for `epoch`, null when nothing was installed.
    pub fn cipher_mut(&mut self, epoch: u16) -> &mut dyn CipherState {
        match self.ciphers.get_mut(epoch as usize) {
            Some(Some(state)) => state.as_mut(),
            _ => &mut self.null,
        }
    }

    pub fn current_cipher_mut(&mut self) -> &mut dyn CipherState {
        self.cipher_mut(self.epoch)
    }

    /// Replace the cipher of the current epoch and restart its sequence.
    ///
    /// This is the TLS cipher change, where the epoch is not on the wire.
    pub fn replace_current(&mut self, state: Option<Box<dyn CipherState>>) {
        match state {
            Some(state) => self.install(self.epoch, state),
            None => self.clear(self.epoch),
        }
        self.sequence = 0;
    }

    /// Back to epoch 0, sequence 0, null ciphers.
    pub fn reset(&mut self) {
        self.epoch = 0;
        self.sequence = 0;
        self.saved.clear();
        self.resume.clear();
        self.ciphers.clear();
    }
}

impl Default for DirectionState {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for DirectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DirectionState")
            .field("epoch", &self.epoch)
            .field("sequence", &self.sequence)
            .field("saved", &self.saved)
            .field("ciphers", &self.ciphers.len())
            .finish()
    }
}
