use std::collections::BTreeMap;

use nom::number::complete::{be_u16, be_u24, be_u8};
use nom::IResult;

use crate::util::put_u24;
use crate::Error;

/// Handshake bodies larger than this are treated as malformed.
const MAX_HANDSHAKE_LEN: u32 = 1 << 18;

/// How far ahead of the next expected message_seq fragments are buffered.
const MAX_MESSAGES_AHEAD: u16 = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandshakeType {
    HelloRequest,
    ClientHello,
    ServerHello,
    HelloVerifyRequest,
    NewSessionTicket,
    Certificate,
    ServerKeyExchange,
    CertificateRequest,
    ServerHelloDone,
    CertificateVerify,
    ClientKeyExchange,
    Finished,
    Unknown(u8),
}

impl HandshakeType {
    pub fn from_u8(value: u8) -> Self {
        match value {
            0 => HandshakeType::HelloRequest,
            1 => HandshakeType::ClientHello,
            2 => HandshakeType::ServerHello,
            3 => HandshakeType::HelloVerifyRequest,
            4 => HandshakeType::NewSessionTicket,
            11 => HandshakeType::Certificate,
            12 => HandshakeType::ServerKeyExchange,
            13 => HandshakeType::CertificateRequest,
            14 => HandshakeType::ServerHelloDone,
            15 => HandshakeType::CertificateVerify,
            16 => HandshakeType::ClientKeyExchange,
            20 => HandshakeType::Finished,
            _ => HandshakeType::Unknown(value),
        }
    }

    pub fn as_u8(&self) -> u8 {
        match self {
            HandshakeType::HelloRequest => 0,
            HandshakeType::ClientHello => 1,
            HandshakeType::ServerHello => 2,
            HandshakeType::HelloVerifyRequest => 3,
            HandshakeType::NewSessionTicket => 4,
            HandshakeType::Certificate => 11,
            HandshakeType::ServerKeyExchange => 12,
            HandshakeType::CertificateRequest => 13,
            HandshakeType::ServerHelloDone => 14,
            HandshakeType::CertificateVerify => 15,
            HandshakeType::ClientKeyExchange => 16,
            HandshakeType::Finished => 20,
            HandshakeType::Unknown(value) => *value,
        }
    }

    /// Messages that never enter the transcript.
    pub fn excluded_from_transcript(&self) -> bool {
        matches!(
            self,
            HandshakeType::HelloRequest | HandshakeType::HelloVerifyRequest
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandshakeHeader {
    pub msg_type: HandshakeType,
    pub length: u32,
    /// DTLS only, 0 for TLS.
    pub message_seq: u16,
    pub fragment_offset: u32,
    pub fragment_length: u32,
}

impl HandshakeHeader {
    pub const TLS_LEN: usize = 4;
    pub const DTLS_LEN: usize = 12;

    pub fn size(dtls: bool) -> usize {
        if dtls {
            Self::DTLS_LEN
        } else {
            Self::TLS_LEN
        }
    }

    pub fn parse(input: &[u8], dtls: bool) -> IResult<&[u8], HandshakeHeader> {
        let (input, msg_type) = be_u8(input)?;
        let (input, length) = be_u24(input)?;

        if !dtls {
            return Ok((
                input,
                HandshakeHeader {
                    msg_type: HandshakeType::from_u8(msg_type),
                    length,
                    message_seq: 0,
                    fragment_offset: 0,
                    fragment_length: length,
                },
            ));
        }

        let (input, message_seq) = be_u16(input)?;
        let (input, fragment_offset) = be_u24(input)?;
        let (input, fragment_length) = be_u24(input)?;

        Ok((
            input,
            HandshakeHeader {
                msg_type: HandshakeType::from_u8(msg_type),
                length,
                message_seq,
                fragment_offset,
                fragment_length,
            },
        ))
    }

    pub fn serialize(&self, output: &mut Vec<u8>, dtls: bool) {
        output.push(self.msg_type.as_u8());
        put_u24(output, self.length);
        if dtls {
            output.extend_from_slice(&self.message_seq.to_be_bytes());
            put_u24(output, self.fragment_offset);
            put_u24(output, self.fragment_length);
        }
    }
}

/// A handshake body framed for sending.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Framed {
    /// What goes into records: one entry for TLS, one per fragment for DTLS.
    pub fragments: Vec<Vec<u8>>,
    /// The unfragmented message, as it enters the transcript.
    pub message: Vec<u8>,
}

/// Put a handshake header in front of `body`.
///
/// For DTLS (`message_seq` set) the body is split so that no fragment body
/// exceeds `max_fragment` bytes.
pub fn frame(
    msg_type: HandshakeType,
    body: &[u8],
    message_seq: Option<u16>,
    max_fragment: usize,
) -> Framed {
    let length = body.len() as u32;
    let dtls = message_seq.is_some();
    let message_seq = message_seq.unwrap_or(0);

    let header = |offset: usize, len: usize| HandshakeHeader {
        msg_type,
        length,
        message_seq,
        fragment_offset: offset as u32,
        fragment_length: len as u32,
    };

    let mut message = Vec::with_capacity(HandshakeHeader::size(dtls) + body.len());
    header(0, body.len()).serialize(&mut message, dtls);
    message.extend_from_slice(body);

    if !dtls || body.len() <= max_fragment {
        return Framed {
            fragments: vec![message.clone()],
            message,
        };
    }

    let fragments = body
        .chunks(max_fragment.max(1))
        .enumerate()
        .map(|(i, chunk)| {
            let mut f = Vec::with_capacity(HandshakeHeader::DTLS_LEN + chunk.len());
            header(i * max_fragment.max(1), chunk.len()).serialize(&mut f, true);
            f.extend_from_slice(chunk);
            f
        })
        .collect();

    Framed { fragments, message }
}

/// A complete handshake message out of the assembler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssembledHandshake {
    pub msg_type: HandshakeType,
    pub message_seq: u16,
    pub body: Vec<u8>,
    /// Header and body as one unfragmented message.
    pub message: Vec<u8>,
}

#[derive(Debug)]
struct Partial {
    msg_type: HandshakeType,
    data: Vec<u8>,
    /// Received byte ranges, kept sorted and merged.
    have: Vec<(usize, usize)>,
}

impl Partial {
    fn insert(&mut self, offset: usize, bytes: &[u8]) {
        let end = offset + bytes.len();
        self.data[offset..end].copy_from_slice(bytes);

        self.have.push((offset, end));
        self.have.sort_unstable();
        let mut merged: Vec<(usize, usize)> = Vec::with_capacity(self.have.len());
        for &(s, e) in &self.have {
            match merged.last_mut() {
                Some(last) if s <= last.1 => last.1 = last.1.max(e),
                _ => merged.push((s, e)),
            }
        }
        self.have = merged;
    }

    fn is_complete(&self) -> bool {
        self.data.is_empty() || self.have == [(0, self.data.len())]
    }
}

/// Reassembles handshake messages from record payloads.
///
/// TLS handshake messages are a byte stream that may span records. DTLS
/// messages arrive as fragments with their own headers; they are collected
/// per message sequence and released in sequence order once complete.
#[derive(Debug, Default)]
pub struct HandshakeAssembler {
    stream: Vec<u8>,
    partials: BTreeMap<u16, Partial>,
    next_seq: u16,
}

impl HandshakeAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add the payload of one handshake record.
    ///
    /// Fails on DTLS fragments that cannot be placed. Fragments already
    /// handed out are ignored.
    pub fn push(&mut self, payload: &[u8], dtls: bool) -> Result<(), Error> {
        if !dtls {
            self.stream.extend_from_slice(payload);
            return Ok(());
        }

        let mut input = payload;
        while !input.is_empty() {
            let (rest, header) = HandshakeHeader::parse(input, true)?;
            let frag_len = header.fragment_length as usize;
            if rest.len() < frag_len {
                return Err(Error::Parse(format!(
                    "Handshake fragment length {} exceeds record ({} bytes left)",
                    frag_len,
                    rest.len()
                )));
            }
            if header.length > MAX_HANDSHAKE_LEN
                || header.fragment_offset + header.fragment_length > header.length
            {
                return Err(Error::Parse(format!(
                    "Handshake fragment {}+{} outside message of length {}",
                    header.fragment_offset, header.fragment_length, header.length
                )));
            }
            let (bytes, rest) = rest.split_at(frag_len);
            input = rest;

            if header.message_seq < self.next_seq {
                debug!(
                    "Ignore fragment of already assembled message_seq {}",
                    header.message_seq
                );
                continue;
            }
            if header.message_seq - self.next_seq >= MAX_MESSAGES_AHEAD {
                debug!(
                    "Drop fragment of message_seq {} outside window at {}",
                    header.message_seq, self.next_seq
                );
                continue;
            }

            let partial = self
                .partials
                .entry(header.message_seq)
                .or_insert_with(|| Partial {
                    msg_type: header.msg_type,
                    data: vec![0; header.length as usize],
                    have: Vec::new(),
                });

            if partial.msg_type != header.msg_type || partial.data.len() != header.length as usize
            {
                return Err(Error::Parse(format!(
                    "Inconsistent fragments for message_seq {}",
                    header.message_seq
                )));
            }

            partial.insert(header.fragment_offset as usize, bytes);
        }

        Ok(())
    }

    /// Take the next complete message, if any.
    ///
    /// DTLS messages are released strictly in message_seq order, so a later
    /// message that completes first waits for the ones before it.
    pub fn pop(&mut self, dtls: bool) -> Option<AssembledHandshake> {
        if !dtls {
            let (_, header) = HandshakeHeader::parse(&self.stream, false).ok()?;
            let total = HandshakeHeader::TLS_LEN + header.length as usize;
            if self.stream.len() < total {
                return None;
            }
            let message: Vec<u8> = self.stream.drain(..total).collect();
            let body = message[HandshakeHeader::TLS_LEN..].to_vec();
            return Some(AssembledHandshake {
                msg_type: header.msg_type,
                message_seq: 0,
                body,
                message,
            });
        }

        let seq = self.next_seq;
        if !self.partials.get(&seq)?.is_complete() {
            return None;
        }
        let partial = self.partials.remove(&seq)?;
        self.next_seq = seq.wrapping_add(1);

        let framed = frame(partial.msg_type, &partial.data, Some(seq), usize::MAX);
        Some(AssembledHandshake {
            msg_type: partial.msg_type,
            message_seq: seq,
            body: partial.data,
            message: framed.message,
        })
    }

    /// Bytes held that do not yet form a complete message.
    pub fn pending(&self) -> usize {
        self.stream.len()
            + self
                .partials
                .values()
                .map(|p| p.have.iter().map(|(s, e)| e - s).sum::<usize>())
                .sum::<usize>()
    }

    pub fn reset(&mut self) {
        self.stream.clear();
        self.partials.clear();
        self.next_seq = 0;
    }
}
