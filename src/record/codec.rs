use super::{Protection, Record, RecordHeader, MAX_CIPHERTEXT_LEN, MAX_PLAINTEXT_LEN};
use crate::crypto::{CipherState, RecordBinding};
use crate::types::ContentType;
use crate::{Config, ConnectionContext, Error};

/// Records decoded from a byte buffer.
#[derive(Debug, Default)]
pub struct Decoded {
    pub records: Vec<Record>,
    /// Bytes of the input covered by `records`. A trailing partial record is
    /// not consumed.
    pub consumed: usize,
}

/// Converts payloads to protected records and back.
///
/// The codec is stateless. Epochs, sequence numbers and cipher states live
/// in the [`ConnectionContext`] passed to each call.
#[derive(Debug, Clone)]
pub struct RecordCodec {
    max_record_size: usize,
}

impl RecordCodec {
    pub fn new(config: &Config) -> Self {
        RecordCodec {
            max_record_size: config.max_record_size(),
        }
    }

    /// Plaintext bytes per record.
    pub fn max_record_size(&self) -> usize {
        self.max_record_size
    }

    /// Split `payload` into records of `content_type` and protect each with
    /// the current write state.
    ///
    /// One record is produced for an empty payload. ChangeCipherSpec is never
    /// encrypted. The caller switches epochs after a ChangeCipherSpec.
    pub fn encode_outbound(
        &self,
        payload: &[u8],
        content_type: ContentType,
        ctx: &mut ConnectionContext,
    ) -> Result<Vec<Record>, Error> {
        let dtls = ctx.is_dtls();
        let version = ctx.record_version();

        let chunks: Vec<&[u8]> = if payload.is_empty() {
            vec![payload]
        } else {
            payload.chunks(self.max_record_size.max(1)).collect()
        };

        let mut records = Vec::with_capacity(chunks.len());

        for chunk in chunks {
            let write = ctx.write_state_mut();
            let epoch = dtls.then(|| write.epoch());
            let sequence_number = write.take_sequence(dtls)?;

            let binding = RecordBinding {
                content_type,
                version,
                epoch,
                sequence_number,
            };

            let cipher = write.current_cipher_mut();
            let (fragment, mac, padding, protection) =
                if content_type == ContentType::ChangeCipherSpec || cipher.is_null() {
                    (chunk.to_vec(), vec![], vec![], Protection::Plaintext)
                } else {
                    let p = cipher.encrypt(&binding, chunk)?;
                    (p.fragment, p.mac, p.padding, Protection::Protected)
                };

            let length = u16::try_from(fragment.len()).map_err(|_| {
                Error::Serialize(format!("Record fragment too long: {}", fragment.len()))
            })?;

            trace!(
                "Encode {} record epoch {:?} seq {} len {}",
                content_type,
                epoch,
                sequence_number,
                length
            );

            records.push(Record {
                content_type,
                version,
                epoch,
                sequence_number,
                length,
                plaintext: chunk.to_vec(),
                fragment,
                mac,
                padding,
                protection,
            });
        }

        Ok(records)
    }

    /// Decode every complete record in `input`.
    ///
    /// Never fails: undecryptable records come back flagged as
    /// [`Protection::NullFallback`].
    pub fn decode_inbound(&self, input: &[u8], ctx: &mut ConnectionContext) -> Decoded {
        let mut decoded = Decoded::default();
        while let Some((record, used)) = self.decode_one(&input[decoded.consumed..], ctx) {
            decoded.records.push(record);
            decoded.consumed += used;
        }
        decoded
    }

    /// Decode the first record in `input`, if it is complete.
    ///
    /// Returns the record and the number of bytes it occupied. Callers that
    /// need to act between records (a received ChangeCipherSpec switches the
    /// read state for the records after it) loop over this.
    pub fn decode_one(&self, input: &[u8], ctx: &mut ConnectionContext) -> Option<(Record, usize)> {
        let dtls = ctx.is_dtls();
        let header_len = RecordHeader::size(dtls);

        if input.len() < header_len {
            return None;
        }
        let (_, header) = RecordHeader::parse(input, dtls).ok()?;

        let total = header_len + header.length as usize;
        if input.len() < total {
            return None;
        }
        let fragment = &input[header_len..total];

        if fragment.len() > MAX_CIPHERTEXT_LEN {
            warn!(
                "Oversized {} record: {} > {}",
                header.content_type,
                fragment.len(),
                MAX_CIPHERTEXT_LEN
            );
        }

        let read = ctx.read_state_mut();
        let (epoch, sequence_number) = match header.epoch {
            Some(epoch) => {
                read.observe(epoch, header.sequence_number);
                (Some(epoch), header.sequence_number)
            }
            // TLS has implicit sequence numbers. A peer overflowing them is
            // out of our hands; keep counting from zero.
            None => (None, read.take_sequence(false).unwrap_or(0)),
        };

        let binding = RecordBinding {
            content_type: header.content_type,
            version: header.version,
            epoch,
            sequence_number,
        };

        let cipher: &mut dyn CipherState = match epoch {
            Some(epoch) => read.cipher_mut(epoch),
            None => read.current_cipher_mut(),
        };

        let mut record = Record {
            content_type: header.content_type,
            version: header.version,
            epoch,
            sequence_number,
            length: header.length,
            plaintext: fragment.to_vec(),
            fragment: fragment.to_vec(),
            mac: vec![],
            padding: vec![],
            protection: Protection::Plaintext,
        };

        if header.content_type == ContentType::ChangeCipherSpec || cipher.is_null() {
            // plaintext as is
        } else if fragment.len() < cipher.min_ciphertext_len() {
            warn!(
                "{} record shorter than cipher minimum ({} < {}), using null cipher",
                header.content_type,
                fragment.len(),
                cipher.min_ciphertext_len()
            );
            record.protection = Protection::NullFallback;
        } else {
            match cipher.decrypt(&binding, fragment) {
                Ok(u) => {
                    record.plaintext = u.plaintext;
                    record.mac = u.mac;
                    record.padding = u.padding;
                    record.protection = Protection::Protected;
                }
                Err(e) => {
                    warn!(
                        "Failed to decrypt {} record epoch {:?} seq {}: {}, using null cipher",
                        header.content_type, epoch, sequence_number, e
                    );
                    record.protection = Protection::NullFallback;
                }
            }
        }

        trace!("Decoded {:?}", record);

        Some((record, total))
    }
}

impl Default for RecordCodec {
    fn default() -> Self {
        RecordCodec {
            max_record_size: MAX_PLAINTEXT_LEN,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{AeadCipherState, BlockCipherState};
    use crate::types::{HashAlgorithm, ProtocolVersion, Role};

    fn ctx(version: ProtocolVersion) -> ConnectionContext {
        ConnectionContext::new("client", Role::Initiator, version)
    }

    fn codec(max: usize) -> RecordCodec {
        let config = Config::builder().max_record_size(max).build().unwrap();
        RecordCodec::new(&config)
    }

    fn wire(records: &[Record]) -> Vec<u8> {
        let mut out = Vec::new();
        for r in records {
            r.serialize(&mut out);
        }
        out
    }

    fn aead() -> Box<dyn CipherState> {
        Box::new(AeadCipherState::new(&[9; 16], &[1, 2, 3, 4]).unwrap())
    }

    fn block() -> Box<dyn CipherState> {
        Box::new(BlockCipherState::new(&[9; 16], &[8; 32], HashAlgorithm::Sha256).unwrap())
    }

    #[test]
    fn fragments_to_max_record_size() {
        let codec = codec(100);
        let mut tx = ctx(ProtocolVersion::TLS1_2);
        let records = codec
            .encode_outbound(&[7; 250], ContentType::ApplicationData, &mut tx)
            .unwrap();
        let lens: Vec<u16> = records.iter().map(|r| r.length).collect();
        assert_eq!(lens, [100, 100, 50]);
        assert!(records.iter().all(|r| r.length as usize == r.fragment.len()));
    }

    #[test]
    fn empty_payload_is_one_record() {
        let codec = codec(100);
        let mut tx = ctx(ProtocolVersion::TLS1_2);
        let records = codec
            .encode_outbound(&[], ContentType::ApplicationData, &mut tx)
            .unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].length, 0);
        assert_eq!(tx.write_sequence(), 1);
    }

    #[test]
    fn roundtrip_under_cipher_states() {
        let codec = codec(64);
        for version in [ProtocolVersion::TLS1_2, ProtocolVersion::DTLS1_2] {
            for use_block in [false, true] {
                for size in [0usize, 1, 63, 64, 65, 200, 1000] {
                    let mut tx = ctx(version);
                    let mut rx = ctx(version);
                    let (w, r): (Box<dyn CipherState>, Box<dyn CipherState>) = if use_block {
                        (block(), block())
                    } else {
                        (aead(), aead())
                    };
                    tx.write_state_mut().install(0, w);
                    rx.read_state_mut().install(0, r);

                    let payload: Vec<u8> = (0..size).map(|i| i as u8).collect();
                    let records = codec
                        .encode_outbound(&payload, ContentType::ApplicationData, &mut tx)
                        .unwrap();
                    assert!(records.iter().all(|r| r.protection == Protection::Protected));

                    let bytes = wire(&records);
                    let decoded = codec.decode_inbound(&bytes, &mut rx);
                    assert_eq!(decoded.consumed, bytes.len());
                    assert_eq!(decoded.records.len(), records.len());

                    let back: Vec<u8> = decoded
                        .records
                        .iter()
                        .flat_map(|r| {
                            assert_eq!(r.protection, Protection::Protected);
                            r.plaintext.clone()
                        })
                        .collect();
                    assert_eq!(back, payload, "{:?} block={} size={}", version, use_block, size);
                }
            }
        }
    }

    #[test]
    fn sequence_numbers_per_epoch() {
        let codec = codec(16_384);
        let mut tx = ctx(ProtocolVersion::DTLS1_2);
        let mut seqs = Vec::new();
        for _ in 0..4 {
            let r = codec
                .encode_outbound(b"x", ContentType::Handshake, &mut tx)
                .unwrap();
            seqs.push(r[0].sequence_number);
            assert_eq!(r[0].epoch, Some(0));
        }
        assert_eq!(seqs, [0, 1, 2, 3]);

        tx.write_state_mut().advance_epoch().unwrap();
        let r = codec
            .encode_outbound(b"x", ContentType::Handshake, &mut tx)
            .unwrap();
        assert_eq!(r[0].epoch, Some(1));
        assert_eq!(r[0].sequence_number, 0);
    }

    #[test]
    fn bad_mac_falls_back_to_null() {
        let codec = codec(16_384);
        let mut tx = ctx(ProtocolVersion::TLS1_2);
        let mut rx = ctx(ProtocolVersion::TLS1_2);
        tx.write_state_mut().install(0, aead());
        rx.read_state_mut()
            .install(0, Box::new(AeadCipherState::new(&[10; 16], &[1, 2, 3, 4]).unwrap()));

        let records = codec
            .encode_outbound(b"secret", ContentType::ApplicationData, &mut tx)
            .unwrap();
        let bytes = wire(&records);

        let decoded = codec.decode_inbound(&bytes, &mut rx);
        assert_eq!(decoded.records.len(), 1);
        let r = &decoded.records[0];
        assert!(r.is_null_fallback());
        assert_eq!(r.plaintext, r.fragment);
        assert_eq!(r.length as usize, r.fragment.len());
    }

    #[test]
    fn short_fragment_falls_back_to_null() {
        let codec = codec(16_384);
        let mut rx = ctx(ProtocolVersion::DTLS1_2);
        rx.read_state_mut().install(0, aead());

        // DTLS application data, epoch 0, seq 0, 3 byte fragment
        let bytes = [23, 0xfe, 0xfd, 0, 0, 0, 0, 0, 0, 0, 0, 0, 3, 1, 2, 3];
        let decoded = codec.decode_inbound(&bytes, &mut rx);
        assert_eq!(decoded.records.len(), 1);
        assert!(decoded.records[0].is_null_fallback());
        assert_eq!(decoded.records[0].plaintext, [1, 2, 3]);
    }

    #[test]
    fn epoch_selects_cipher() {
        let codec = codec(16_384);
        let mut tx = ctx(ProtocolVersion::DTLS1_2);
        let mut rx = ctx(ProtocolVersion::DTLS1_2);

        let mut bytes = wire(
            &codec
                .encode_outbound(b"plain", ContentType::Handshake, &mut tx)
                .unwrap(),
        );
        tx.write_state_mut().advance_epoch().unwrap();
        tx.write_state_mut().install(1, aead());
        bytes.extend(wire(
            &codec
                .encode_outbound(b"sealed", ContentType::Handshake, &mut tx)
                .unwrap(),
        ));

        // Reader has epoch 1 keys but still sits at epoch 0.
        rx.read_state_mut().install(1, aead());
        let decoded = codec.decode_inbound(&bytes, &mut rx);
        assert_eq!(decoded.records.len(), 2);
        assert_eq!(decoded.records[0].plaintext, b"plain");
        assert_eq!(decoded.records[0].protection, Protection::Plaintext);
        assert_eq!(decoded.records[1].plaintext, b"sealed");
        assert_eq!(decoded.records[1].protection, Protection::Protected);
    }

    #[test]
    fn partial_record_is_not_consumed() {
        let codec = codec(16_384);
        let mut tx = ctx(ProtocolVersion::TLS1_2);
        let mut rx = ctx(ProtocolVersion::TLS1_2);
        let mut bytes = wire(
            &codec
                .encode_outbound(b"one", ContentType::ApplicationData, &mut tx)
                .unwrap(),
        );
        let first = bytes.len();
        bytes.extend_from_slice(&[23, 3, 3, 0, 10, 1, 2]);

        let decoded = codec.decode_inbound(&bytes, &mut rx);
        assert_eq!(decoded.records.len(), 1);
        assert_eq!(decoded.consumed, first);
    }

    #[test]
    fn unknown_content_type_is_framed() {
        let codec = codec(16_384);
        let mut rx = ctx(ProtocolVersion::TLS1_2);
        let bytes = [99, 3, 3, 0, 2, 0xde, 0xad];
        let decoded = codec.decode_inbound(&bytes, &mut rx);
        assert_eq!(decoded.records.len(), 1);
        assert_eq!(decoded.records[0].content_type, ContentType::Unknown(99));
        assert_eq!(decoded.records[0].plaintext, [0xde, 0xad]);
    }

    #[test]
    fn change_cipher_spec_stays_plain() {
        let codec = codec(16_384);
        let mut tx = ctx(ProtocolVersion::TLS1_2);
        tx.write_state_mut().install(0, aead());
        let r = codec
            .encode_outbound(&[1], ContentType::ChangeCipherSpec, &mut tx)
            .unwrap();
        assert_eq!(r[0].fragment, [1]);
        assert_eq!(r[0].protection, Protection::Plaintext);
    }
}
