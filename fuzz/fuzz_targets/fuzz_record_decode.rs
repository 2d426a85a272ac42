#![no_main]

//! Fuzz target for inbound record decoding.
//!
//! Arbitrary bytes are decoded as TLS and DTLS record streams, once in the
//! clear and once with an AEAD read state so the null fallback path runs.
//! Decoding must never panic, whatever the peer sends.

use libfuzzer_sys::fuzz_target;

use tlsprobe::crypto::AeadCipherState;
use tlsprobe::types::{ProtocolVersion, Role};
use tlsprobe::{ConnectionContext, RecordCodec};

/// DTLS record header length
const DTLS_HEADER_LEN: usize = 13;

fuzz_target!(|data: &[u8]| {
    let codec = RecordCodec::default();

    for version in [ProtocolVersion::TLS1_2, ProtocolVersion::DTLS1_2] {
        let mut ctx = ConnectionContext::new("fuzz", Role::Initiator, version);
        let _ = codec.decode_inbound(data, &mut ctx);

        if let Ok(aead) = AeadCipherState::new(&[0x42; 16], &[1, 2, 3, 4]) {
            ctx.read_state_mut().install(0, Box::new(aead));
            let _ = codec.decode_inbound(data, &mut ctx);
        }
    }

    // A well formed DTLS header in front of the input.
    if !data.is_empty() {
        let frag_len = data.len().min(u16::MAX as usize);
        let mut record = Vec::with_capacity(DTLS_HEADER_LEN + frag_len);
        record.push(22u8); // Handshake
        record.extend_from_slice(&[0xFE, 0xFD]);
        record.extend_from_slice(&[0, 0]);
        record.extend_from_slice(&[0, 0, 0, 0, 0, 1]);
        record.extend_from_slice(&(frag_len as u16).to_be_bytes());
        record.extend_from_slice(&data[..frag_len]);

        let mut ctx = ConnectionContext::new("fuzz", Role::Initiator, ProtocolVersion::DTLS1_2);
        let _ = codec.decode_inbound(&record, &mut ctx);
    }
});
