//! Record layer: wire framing, per-direction epoch state and the codec that
//! ties them to cipher states.

mod codec;
mod epoch;

pub use codec::{Decoded, RecordCodec};
pub use epoch::DirectionState;

use std::fmt;

use nom::number::complete::be_u16;
use nom::IResult;

use crate::types::{ContentType, ProtocolVersion};
use crate::util::{be_u48, put_u48};

/// Largest plaintext fragment a record may carry (2^14).
pub const MAX_PLAINTEXT_LEN: usize = 16_384;

/// Largest protected fragment a conforming peer sends (2^14 + 2048).
pub const MAX_CIPHERTEXT_LEN: usize = MAX_PLAINTEXT_LEN + 2048;

/// Record header as found on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordHeader {
    pub content_type: ContentType,
    pub version: ProtocolVersion,
    /// `Some` for DTLS.
    pub epoch: Option<u16>,
    /// Always 0 for TLS, where the sequence number is implicit.
    pub sequence_number: u64,
    pub length: u16,
}

impl RecordHeader {
    /// content_type(1) + version(2) + length(2)
    pub const TLS_LEN: usize = 5;

    /// content_type(1) + version(2) + epoch(2) + seq(6) + length(2)
    pub const DTLS_LEN: usize = 13;

    pub fn size(dtls: bool) -> usize {
        if dtls {
            Self::DTLS_LEN
        } else {
            Self::TLS_LEN
        }
    }

    pub fn parse(input: &[u8], dtls: bool) -> IResult<&[u8], RecordHeader> {
        let (input, content_type) = ContentType::parse(input)?;
        let (input, version) = ProtocolVersion::parse(input)?;

        let (input, epoch, sequence_number) = if dtls {
            let (input, epoch) = be_u16(input)?;
            let (input, seq) = be_u48(input)?;
            (input, Some(epoch), seq)
        } else {
            (input, None, 0)
        };

        let (input, length) = be_u16(input)?;

        Ok((
            input,
            RecordHeader {
                content_type,
                version,
                epoch,
                sequence_number,
                length,
            },
        ))
    }

    pub fn serialize(&self, output: &mut Vec<u8>) {
        output.push(self.content_type.as_u8());
        self.version.serialize(output);
        if let Some(epoch) = self.epoch {
            output.extend_from_slice(&epoch.to_be_bytes());
            put_u48(output, self.sequence_number);
        }
        output.extend_from_slice(&self.length.to_be_bytes());
    }
}

/// How a record's fragment was processed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protection {
    /// The null cipher was in effect, or the record is a ChangeCipherSpec.
    Plaintext,
    /// Protected by (or successfully unprotected with) a real cipher state.
    Protected,
    /// Decryption failed or the fragment was too short. The fragment is kept
    /// as plaintext, as if the null cipher were in effect.
    NullFallback,
}

/// One record, outbound or inbound.
#[derive(Clone, PartialEq, Eq)]
pub struct Record {
    pub content_type: ContentType,
    pub version: ProtocolVersion,
    /// `Some` for DTLS.
    pub epoch: Option<u16>,
    pub sequence_number: u64,
    /// Declared length, always `fragment.len()`.
    pub length: u16,
    /// The payload before protection (outbound) or after it (inbound).
    pub plaintext: Vec<u8>,
    /// The bytes after the header on the wire.
    pub fragment: Vec<u8>,
    pub mac: Vec<u8>,
    pub padding: Vec<u8>,
    pub protection: Protection,
}

impl Record {
    pub fn header(&self) -> RecordHeader {
        RecordHeader {
            content_type: self.content_type,
            version: self.version,
            epoch: self.epoch,
            // TLS headers do not carry it.
            sequence_number: if self.epoch.is_some() {
                self.sequence_number
            } else {
                0
            },
            length: self.length,
        }
    }

    pub fn is_null_fallback(&self) -> bool {
        self.protection == Protection::NullFallback
    }

    /// Bytes this record occupies on the wire.
    pub fn wire_len(&self) -> usize {
        RecordHeader::size(self.epoch.is_some()) + self.fragment.len()
    }

    pub fn serialize(&self, output: &mut Vec<u8>) {
        self.header().serialize(output);
        output.extend_from_slice(&self.fragment);
    }
}

impl fmt::Debug for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Record")
            .field("content_type", &self.content_type)
            .field("version", &self.version)
            .field("epoch", &self.epoch)
            .field("sequence_number", &self.sequence_number)
            .field("length", &self.length)
            .field("plaintext_len", &self.plaintext.len())
            .field("protection", &self.protection)
            .finish()
    }
}
