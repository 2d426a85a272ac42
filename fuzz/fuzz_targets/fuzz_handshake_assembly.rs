#![no_main]

//! Fuzz target for handshake reassembly and message parsing.
//!
//! The input is fed as record plaintext to the assembler. Every message it
//! yields goes through the default message factory.

use libfuzzer_sys::fuzz_target;

use tlsprobe::message::{DefaultMessageFactory, HandshakeAssembler, MessageFactory};
use tlsprobe::types::{ProtocolVersion, Role};
use tlsprobe::ConnectionContext;

fuzz_target!(|data: &[u8]| {
    for (version, dtls) in [
        (ProtocolVersion::TLS1_2, false),
        (ProtocolVersion::DTLS1_2, true),
    ] {
        let ctx = ConnectionContext::new("fuzz", Role::Responder, version);
        let mut assembler = HandshakeAssembler::new();

        // Split in two to exercise fragments spanning records.
        let (a, b) = data.split_at(data.len() / 2);
        for part in [a, b] {
            if assembler.push(part, dtls).is_err() {
                break;
            }
            while let Some(msg) = assembler.pop(dtls) {
                let _ = DefaultMessageFactory.parse_handshake(msg.msg_type, &msg.body, &ctx);
            }
        }
    }
});
