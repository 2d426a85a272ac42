use std::mem;

use crate::message::{
    frame, DefaultMessageFactory, HandshakeHeader, MessageFactory, MessageKind, ObservedMessage,
    UnknownMessage,
};
use crate::record::{Record, RecordCodec, RecordHeader};
use crate::rng::SeededRng;
use crate::trace::{Action, ActionResult, Anomaly, Direction, Expected, MatchPolicy, Trace};
use crate::transport::Received;
use crate::types::ContentType;
use crate::{Config, ConnectionContext, Error};

/// Largest expansion of a protected record: CBC IV, SHA-384 MAC and a full
/// padding block.
const MAX_PROTECTION_OVERHEAD: usize = 16 + 48 + 16;

/// Why execution stopped before the end of the trace.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HaltReason {
    /// Received bytes did not parse as a message.
    MalformedMessage,
    /// The peer sent a fatal alert.
    FatalAlert,
}

/// Summary of one action after a run.
#[derive(Debug, Clone)]
pub struct ActionReport {
    pub direction: Direction,
    pub alias: String,
    pub executed: bool,
    pub may_fail: bool,
    pub as_planned: bool,
    pub kinds: Vec<MessageKind>,
    pub anomalies: Vec<Anomaly>,
}

/// Summary of one run. The full results stay on the trace.
#[derive(Debug, Clone)]
pub struct ExecutionReport {
    pub actions: Vec<ActionReport>,
    pub executed_as_planned: bool,
    pub halted: Option<HaltReason>,
}

impl ExecutionReport {
    fn new(trace: &Trace, policy: &MatchPolicy, halted: Option<HaltReason>) -> Self {
        let actions = trace
            .actions()
            .iter()
            .map(|a| ActionReport {
                direction: a.direction(),
                alias: a.alias().to_string(),
                executed: a.is_executed(),
                may_fail: a.is_may_fail(),
                as_planned: a.executed_as_planned(policy),
                kinds: a.result().map(|r| r.kinds()).unwrap_or_default(),
                anomalies: a.result().map(|r| r.anomalies.clone()).unwrap_or_default(),
            })
            .collect();

        ExecutionReport {
            actions,
            executed_as_planned: trace.executed_as_planned(policy),
            halted,
        }
    }
}

/// A record payload as it was handed to the codec, kept for resending.
#[derive(Debug)]
struct FlightEntry {
    content_type: ContentType,
    payload: Vec<u8>,
}

/// The last DTLS flight sent.
#[derive(Debug, Default)]
struct Flight {
    alias: String,
    /// Write epoch when the flight started.
    start_epoch: u16,
    entries: Vec<FlightEntry>,
    /// Consecutive send actions extend the flight until input arrives.
    open: bool,
}

/// Executes traces.
///
/// One engine can run any number of traces, one at a time. All connection
/// state lives in the contexts passed to [`run`][Self::run]; the engine only
/// keeps the last DTLS flight for retransmission.
pub struct Engine {
    config: Config,
    codec: RecordCodec,
    factory: Box<dyn MessageFactory>,
    flight: Flight,
    rng: SeededRng,
}

impl Engine {
    pub fn new(config: Config) -> Self {
        Self::with_factory(config, Box::new(DefaultMessageFactory))
    }

    /// Engine parsing received messages with `factory`.
    pub fn with_factory(config: Config, factory: Box<dyn MessageFactory>) -> Self {
        Engine {
            codec: RecordCodec::new(&config),
            rng: SeededRng::new(config.rng_seed()),
            config,
            factory,
            flight: Flight::default(),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Source for hello randoms and session ids when building traces.
    ///
    /// Reproducible when [`Config::rng_seed`] is set.
    pub fn rng(&mut self) -> &mut SeededRng {
        &mut self.rng
    }

    /// Execute every action of `trace` against `ctx`.
    ///
    /// Each reached action gets its result stored, including the action
    /// during which a transport error ended the run. Decode anomalies are
    /// recorded on the action, never returned as errors.
    pub fn run(
        &mut self,
        trace: &mut Trace,
        ctx: &mut ConnectionContext,
    ) -> Result<ExecutionReport, Error> {
        self.run_contexts(trace, std::slice::from_mut(ctx))
    }

    /// Like [`run`][Self::run], with actions dispatched to the context named
    /// by their alias.
    pub fn run_contexts(
        &mut self,
        trace: &mut Trace,
        contexts: &mut [ConnectionContext],
    ) -> Result<ExecutionReport, Error> {
        self.flight = Flight::default();
        let mut halted = None;

        for (index, action) in trace.actions_mut().iter_mut().enumerate() {
            if action.is_executed() {
                return Err(Error::ActionAlreadyExecuted);
            }
            let ctx = contexts
                .iter_mut()
                .find(|c| c.alias() == action.alias())
                .ok_or_else(|| Error::UnknownAlias(action.alias().to_string()))?;

            debug!(
                "{}: action {} {:?}",
                ctx.alias(),
                index,
                action.direction()
            );

            let mut result = ActionResult::default();
            let outcome = match action.direction() {
                Direction::Send => self.execute_send(action, ctx, &mut result).map(|()| None),
                Direction::Receive => self.execute_receive(action, ctx, &mut result),
            };
            action.set_result(result)?;

            match outcome {
                Ok(None) => {}
                Ok(Some(reason)) => {
                    debug!("{}: halt after action {}: {:?}", ctx.alias(), index, reason);
                    halted = Some(reason);
                    break;
                }
                Err(e) => {
                    warn!("{}: action {} failed: {}", ctx.alias(), index, e);
                    return Err(e);
                }
            }
        }

        Ok(ExecutionReport::new(
            trace,
            &self.config.match_policy(),
            halted,
        ))
    }

    fn execute_send(
        &mut self,
        action: &Action,
        ctx: &mut ConnectionContext,
        result: &mut ActionResult,
    ) -> Result<(), Error> {
        let dtls = ctx.is_dtls();

        if dtls && !(self.flight.open && self.flight.alias == ctx.alias()) {
            self.flight = Flight {
                alias: ctx.alias().to_string(),
                start_epoch: ctx.write_epoch(),
                entries: Vec::new(),
                open: true,
            };
        }

        let mut wire: Vec<Vec<u8>> = Vec::new();
        let mut pending: Option<(ContentType, Vec<u8>)> = None;

        for configured in action.messages() {
            let Some(msg) = configured.message() else {
                warn!("{}: send slot without a message", ctx.alias());
                continue;
            };
            let kind = msg.kind();
            let content_type = kind.content_type();

            let body = msg.serialize(ctx)?;
            let (fragments, message) = match kind.handshake_type() {
                Some(handshake_type) => {
                    let message_seq = dtls.then(|| ctx.take_message_seq());
                    let framed = frame(
                        handshake_type,
                        &body,
                        message_seq,
                        self.max_handshake_fragment(),
                    );
                    (framed.fragments, framed.message)
                }
                None => (vec![body.clone()], body),
            };

            ctx.adjust(msg, &message);
            trace!("{}: send {} ({} bytes)", ctx.alias(), kind, message.len());
            result.messages.push(ObservedMessage::sent(kind, message));

            // DTLS handshake fragments are sized to fit a datagram each.
            let shares_records = self.config.flush_on_content_type_change()
                && content_type != ContentType::ChangeCipherSpec
                && !(dtls && content_type == ContentType::Handshake);

            if !shares_records || pending.as_ref().is_some_and(|(ct, _)| *ct != content_type) {
                self.flush(pending.take(), ctx, result, &mut wire)?;
            }

            if shares_records {
                let (_, buf) = pending.get_or_insert_with(|| (content_type, Vec::new()));
                for fragment in fragments {
                    buf.extend_from_slice(&fragment);
                }
            } else {
                for fragment in fragments {
                    self.flush(Some((content_type, fragment)), ctx, result, &mut wire)?;
                }
            }

            if content_type == ContentType::ChangeCipherSpec {
                ctx.activate_write_cipher()?;
            }
        }

        self.flush(pending.take(), ctx, result, &mut wire)?;
        self.transmit(ctx, &wire)
    }

    fn flush(
        &mut self,
        group: Option<(ContentType, Vec<u8>)>,
        ctx: &mut ConnectionContext,
        result: &mut ActionResult,
        wire: &mut Vec<Vec<u8>>,
    ) -> Result<(), Error> {
        let Some((content_type, payload)) = group else {
            return Ok(());
        };

        self.encode(content_type, &payload, ctx, &mut result.records, wire)?;

        if ctx.is_dtls() {
            self.flight.entries.push(FlightEntry {
                content_type,
                payload,
            });
        }
        Ok(())
    }

    fn encode(
        &self,
        content_type: ContentType,
        payload: &[u8],
        ctx: &mut ConnectionContext,
        records: &mut Vec<Record>,
        wire: &mut Vec<Vec<u8>>,
    ) -> Result<(), Error> {
        for record in self.codec.encode_outbound(payload, content_type, ctx)? {
            let mut bytes = Vec::with_capacity(record.wire_len());
            record.serialize(&mut bytes);
            wire.push(bytes);
            records.push(record);
        }
        Ok(())
    }

    /// Send serialized records: one write for TLS, packed into datagrams of
    /// at most `max_datagram_size` for DTLS.
    fn transmit(&self, ctx: &mut ConnectionContext, wire: &[Vec<u8>]) -> Result<(), Error> {
        if wire.is_empty() {
            return Ok(());
        }
        let dtls = ctx.is_dtls();
        let max = self.config.max_datagram_size();
        let transport = ctx.transport_mut()?;

        if !dtls {
            return transport.send(&wire.concat());
        }

        let mut datagram = Vec::new();
        for record in wire {
            if !datagram.is_empty() && datagram.len() + record.len() > max {
                transport.send(&datagram)?;
                datagram.clear();
            }
            datagram.extend_from_slice(record);
        }
        transport.send(&datagram)
    }

    fn max_handshake_fragment(&self) -> usize {
        let datagram = self.config.max_datagram_size().saturating_sub(
            RecordHeader::DTLS_LEN + HandshakeHeader::DTLS_LEN + MAX_PROTECTION_OVERHEAD,
        );
        let record = self
            .codec
            .max_record_size()
            .saturating_sub(HandshakeHeader::DTLS_LEN);
        datagram.min(record).max(1)
    }

    /// Resend the saved flight from the write epoch it started in.
    ///
    /// Records get fresh sequence numbers; a ChangeCipherSpec in the flight
    /// re-enters the epoch it opened, with its cipher state.
    fn retransmit(&mut self, ctx: &mut ConnectionContext) -> Result<(), Error> {
        while ctx.write_epoch() > self.flight.start_epoch {
            if !ctx.write_state_mut().revert_epoch() {
                break;
            }
        }

        let entries = mem::take(&mut self.flight.entries);
        let mut records = Vec::new();
        let mut wire = Vec::new();
        let mut outcome = Ok(());

        for entry in &entries {
            outcome = self
                .encode(entry.content_type, &entry.payload, ctx, &mut records, &mut wire)
                .and_then(|()| {
                    if entry.content_type == ContentType::ChangeCipherSpec {
                        ctx.activate_write_cipher()
                    } else {
                        Ok(())
                    }
                });
            if outcome.is_err() {
                break;
            }
        }
        self.flight.entries = entries;
        outcome?;

        debug!(
            "{}: retransmit {} records from epoch {}",
            ctx.alias(),
            records.len(),
            self.flight.start_epoch
        );
        self.transmit(ctx, &wire)
    }

    fn execute_receive(
        &mut self,
        action: &Action,
        ctx: &mut ConnectionContext,
        result: &mut ActionResult,
    ) -> Result<Option<HaltReason>, Error> {
        let dtls = ctx.is_dtls();
        let policy = self.config.match_policy();

        // A wildcard takes whatever the peer sends until it goes quiet.
        let stop_when_matched = self.config.wait_only_for_expected()
            && !action
                .messages()
                .iter()
                .any(|m| m.expected() == Expected::Any);

        let mut retransmits = 0;
        let mut received_any = false;
        let mut quiet = false;

        loop {
            if let Some(reason) = self.process_inbound(ctx, result)? {
                return Ok(Some(reason));
            }
            if stop_when_matched && action.matches(&result.kinds(), &policy) {
                break;
            }

            match ctx.transport_mut()?.receive(self.config.receive_timeout())? {
                Received::Data(bytes) => {
                    trace!("{}: received {} bytes", ctx.alias(), bytes.len());
                    received_any = true;
                    self.flight.open = false;
                    ctx.inbound_mut().extend_from_slice(&bytes);

                    if dtls {
                        // A record cannot span datagrams.
                        if let Some(reason) = self.process_inbound(ctx, result)? {
                            return Ok(Some(reason));
                        }
                        let left = ctx.inbound_mut().len();
                        if left > 0 {
                            warn!("{}: dropping {} bytes of partial record", ctx.alias(), left);
                            result.anomalies.push(Anomaly::Leftover(left));
                            ctx.inbound_mut().clear();
                        }
                    }
                }
                Received::Timeout => {
                    let can_retransmit = dtls
                        && !received_any
                        && retransmits < self.config.max_retransmits()
                        && self.flight.alias == ctx.alias()
                        && !self.flight.entries.is_empty();
                    if can_retransmit {
                        retransmits += 1;
                        self.retransmit(ctx)?;
                        continue;
                    }
                    debug!("{}: receive timeout", ctx.alias());
                    quiet = true;
                    break;
                }
                Received::Closed => {
                    debug!("{}: peer closed", ctx.alias());
                    result.anomalies.push(Anomaly::PeerClosed);
                    quiet = true;
                    break;
                }
            }
        }

        if quiet {
            let left = ctx.inbound_mut().len() + ctx.assembler_mut().pending();
            if left > 0 {
                warn!("{}: {} bytes never completed a message", ctx.alias(), left);
                result.anomalies.push(Anomaly::Leftover(left));
            }
        }

        Ok(None)
    }

    /// Decode and handle every complete record in the inbound buffer.
    ///
    /// Records are taken one at a time so that a ChangeCipherSpec switches
    /// the read state before the record after it is decoded.
    fn process_inbound(
        &self,
        ctx: &mut ConnectionContext,
        result: &mut ActionResult,
    ) -> Result<Option<HaltReason>, Error> {
        let input = mem::take(ctx.inbound_mut());
        let mut offset = 0;
        let mut outcome = Ok(None);

        while let Some((record, used)) = self.codec.decode_one(&input[offset..], ctx) {
            offset += used;
            outcome = self.process_record(&record, ctx, result);
            result.records.push(record);
            if !matches!(outcome, Ok(None)) {
                break;
            }
        }

        ctx.inbound_mut().extend_from_slice(&input[offset..]);
        outcome
    }

    fn process_record(
        &self,
        record: &Record,
        ctx: &mut ConnectionContext,
        result: &mut ActionResult,
    ) -> Result<Option<HaltReason>, Error> {
        let dtls = ctx.is_dtls();

        if record.is_null_fallback() {
            result.anomalies.push(Anomaly::NullFallback {
                content_type: record.content_type,
                epoch: record.epoch,
                sequence_number: record.sequence_number,
            });
        }

        if record.content_type == ContentType::Handshake {
            if let Err(e) = ctx.assembler_mut().push(&record.plaintext, dtls) {
                return Ok(Some(malformed(
                    result,
                    ContentType::Handshake,
                    &record.plaintext,
                    e,
                )));
            }

            while let Some(assembled) = ctx.assembler_mut().pop(dtls) {
                match self
                    .factory
                    .parse_handshake(assembled.msg_type, &assembled.body, ctx)
                {
                    Ok(msg) => {
                        ctx.adjust(msg.as_ref(), &assembled.message);
                        trace!("{}: received {}", ctx.alias(), msg.kind());
                        result
                            .messages
                            .push(ObservedMessage::received(msg, assembled.message));
                    }
                    Err(e) => {
                        return Ok(Some(malformed(
                            result,
                            ContentType::Handshake,
                            &assembled.message,
                            e,
                        )))
                    }
                }
            }
            return Ok(None);
        }

        let content_type = record.content_type;
        let mut offset = 0;

        while offset < record.plaintext.len() {
            let bytes = &record.plaintext[offset..];
            let (msg, used) = match self.factory.parse(content_type, bytes, ctx) {
                Ok((msg, used)) if used > 0 => (msg, used.min(bytes.len())),
                Ok(_) => {
                    let e = Error::Parse("Message of zero length".into());
                    return Ok(Some(malformed(result, content_type, bytes, e)));
                }
                Err(e) => return Ok(Some(malformed(result, content_type, bytes, e))),
            };
            offset += used;

            let message = bytes[..used].to_vec();
            ctx.adjust(msg.as_ref(), &message);
            trace!("{}: received {}", ctx.alias(), msg.kind());

            let observed = ObservedMessage::received(msg, message);
            let fatal = observed.is_fatal_alert();
            result.messages.push(observed);

            if content_type == ContentType::ChangeCipherSpec {
                ctx.activate_read_cipher()?;
            }
            if fatal && self.config.stop_on_fatal_alert() {
                return Ok(Some(HaltReason::FatalAlert));
            }
        }

        Ok(None)
    }
}

fn malformed(
    result: &mut ActionResult,
    content_type: ContentType,
    bytes: &[u8],
    e: Error,
) -> HaltReason {
    warn!("Malformed {} message: {}", content_type, e);
    result.anomalies.push(Anomaly::MalformedMessage {
        content_type,
        reason: e.to_string(),
    });
    let unknown = UnknownMessage::new(content_type.as_u8(), bytes);
    result
        .messages
        .push(ObservedMessage::received(Box::new(unknown), bytes.to_vec()));
    HaltReason::MalformedMessage
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use super::*;
    use crate::crypto::{AeadCipherState, CipherState};
    use crate::message::{
        ChangeCipherSpec, ClientHello, Finished, HandshakeType, OpaqueHandshake,
        ProtocolMessage, Random, ServerHello, ServerHelloDone,
    };
    use crate::record::Protection;
    use crate::trace::ConfiguredMessage;
    use crate::transport::Transport;
    use crate::types::{CipherSuite, ProtocolVersion, Role};

    type Sent = Arc<Mutex<Vec<Vec<u8>>>>;

    struct Scripted {
        replies: VecDeque<Result<Received, Error>>,
        sent: Sent,
    }

    impl Transport for Scripted {
        fn send(&mut self, data: &[u8]) -> Result<(), Error> {
            self.sent.lock().unwrap().push(data.to_vec());
            Ok(())
        }

        fn receive(&mut self, _max_wait: Duration) -> Result<Received, Error> {
            self.replies.pop_front().unwrap_or(Ok(Received::Timeout))
        }

        fn close(&mut self) -> Result<(), Error> {
            Ok(())
        }
    }

    fn client(version: ProtocolVersion, replies: Vec<Result<Received, Error>>) -> (ConnectionContext, Sent) {
        let sent = Sent::default();
        let mut ctx = ConnectionContext::new("client", Role::Initiator, version);
        ctx.attach_transport(Box::new(Scripted {
            replies: replies.into(),
            sent: sent.clone(),
        }));
        (ctx, sent)
    }

    fn aead() -> Box<dyn CipherState> {
        Box::new(AeadCipherState::new(&[3; 16], &[4; 4]).unwrap())
    }

    /// Records as the peer would put them on the wire.
    fn peer_records(peer: &mut ConnectionContext, msg: &dyn ProtocolMessage) -> Vec<u8> {
        let body = msg.serialize(peer).unwrap();
        let kind = msg.kind();
        let payload = match kind.handshake_type() {
            Some(t) => {
                let seq = peer.is_dtls().then(|| peer.take_message_seq());
                frame(t, &body, seq, usize::MAX).message
            }
            None => body,
        };
        let mut out = Vec::new();
        for r in RecordCodec::default()
            .encode_outbound(&payload, kind.content_type(), peer)
            .unwrap()
        {
            r.serialize(&mut out);
        }
        out
    }

    fn server_hello() -> ServerHello {
        ServerHello::new(
            ProtocolVersion::TLS1_1,
            Random([7; 32]),
            CipherSuite::ECDHE_RSA_AES128_GCM_SHA256,
        )
    }

    fn client_hello(version: ProtocolVersion) -> ClientHello {
        ClientHello::new(
            version,
            Random([1; 32]),
            vec![CipherSuite::ECDHE_RSA_AES128_GCM_SHA256],
        )
    }

    const SERVER_HELLO: MessageKind = MessageKind::Handshake(HandshakeType::ServerHello);

    /// (epoch, sequence) of every DTLS record in a datagram.
    fn dtls_headers(mut datagram: &[u8]) -> Vec<(u16, u64)> {
        let mut out = Vec::new();
        while !datagram.is_empty() {
            let (rest, h) = RecordHeader::parse(datagram, true).unwrap();
            out.push((h.epoch.unwrap(), h.sequence_number));
            datagram = &rest[h.length as usize..];
        }
        out
    }

    #[test]
    fn tls_hello_exchange() {
        let _ = env_logger::try_init();

        let mut peer = ConnectionContext::new("server", Role::Responder, ProtocolVersion::TLS1_2);
        let reply = peer_records(&mut peer, &server_hello());
        let (mut ctx, sent) = client(ProtocolVersion::TLS1_2, vec![Ok(Received::Data(reply))]);

        let mut trace = Trace::new()
            .with(Action::send(
                "client",
                vec![ConfiguredMessage::send(client_hello(ProtocolVersion::TLS1_2))],
            ))
            .with(Action::receive(
                "client",
                vec![ConfiguredMessage::expect(SERVER_HELLO)],
            ));

        let report = Engine::new(Config::default()).run(&mut trace, &mut ctx).unwrap();

        assert!(report.executed_as_planned);
        assert_eq!(report.halted, None);
        assert_eq!(ctx.negotiated_version(), Some(ProtocolVersion::TLS1_1));
        assert_eq!(ctx.write_sequence(), 1);
        assert_eq!(ctx.read_sequence(), 1);
        assert_eq!(ctx.client_random(), Some(Random([1; 32])));

        let sent = sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(&sent[0][..3], &[22, 3, 3]);

        let received = &trace.actions()[1].result().unwrap().messages[0];
        assert_eq!(
            ctx.transcript().len(),
            sent[0].len() - RecordHeader::TLS_LEN + received.bytes.len()
        );
    }

    #[test]
    fn malformed_message_halts_trace() {
        let (mut ctx, _) = client(
            ProtocolVersion::TLS1_2,
            vec![Ok(Received::Data(vec![99, 3, 3, 0, 1, 0]))],
        );
        let mut trace = Trace::new()
            .with(Action::receive(
                "client",
                vec![ConfiguredMessage::expect(SERVER_HELLO)],
            ))
            .with(Action::send(
                "client",
                vec![ConfiguredMessage::send(ServerHelloDone)],
            ));

        let report = Engine::new(Config::default()).run(&mut trace, &mut ctx).unwrap();

        assert_eq!(report.halted, Some(HaltReason::MalformedMessage));
        assert!(!report.executed_as_planned);
        assert_eq!(report.actions[0].kinds, [MessageKind::Unknown(99)]);
        assert!(matches!(
            report.actions[0].anomalies[0],
            Anomaly::MalformedMessage { .. }
        ));
        assert!(!trace.actions()[1].is_executed());
    }

    #[test]
    fn fatal_alert_halts_trace() {
        let (mut ctx, _) = client(
            ProtocolVersion::TLS1_2,
            vec![Ok(Received::Data(vec![21, 3, 3, 0, 2, 2, 40]))],
        );
        let mut trace = Trace::new()
            .with(Action::receive(
                "client",
                vec![ConfiguredMessage::expect(SERVER_HELLO)],
            ))
            .with(Action::receive("client", vec![ConfiguredMessage::wildcard()]));

        let report = Engine::new(Config::default()).run(&mut trace, &mut ctx).unwrap();

        assert_eq!(report.halted, Some(HaltReason::FatalAlert));
        assert_eq!(ctx.last_alert().map(|a| a.description), Some(40));
        assert!(!report.actions[1].executed);
    }

    #[test]
    fn change_cipher_spec_switches_read_state_mid_buffer() {
        let mut peer = ConnectionContext::new("server", Role::Responder, ProtocolVersion::TLS1_2);
        peer.set_pending_write_cipher(aead());
        let mut reply = peer_records(&mut peer, &ChangeCipherSpec::new());
        peer.activate_write_cipher().unwrap();
        reply.extend(peer_records(&mut peer, &Finished::new(&[0xaa; 12])));

        let (mut ctx, _) = client(ProtocolVersion::TLS1_2, vec![Ok(Received::Data(reply))]);
        ctx.set_pending_read_cipher(aead());

        let mut trace = Trace::new().with(Action::receive(
            "client",
            vec![
                ConfiguredMessage::expect(MessageKind::ChangeCipherSpec),
                ConfiguredMessage::expect(MessageKind::Handshake(HandshakeType::Finished)),
            ],
        ));

        let report = Engine::new(Config::default()).run(&mut trace, &mut ctx).unwrap();
        assert!(report.executed_as_planned);

        let result = trace.actions()[0].result().unwrap();
        assert_eq!(result.records.len(), 2);
        assert_eq!(result.records[0].protection, Protection::Plaintext);
        assert_eq!(result.records[1].protection, Protection::Protected);
        assert!(result.anomalies.is_empty());
    }

    #[test]
    fn undecryptable_record_is_recorded() {
        let mut peer = ConnectionContext::new("server", Role::Responder, ProtocolVersion::TLS1_2);
        peer.write_state_mut()
            .install(0, Box::new(AeadCipherState::new(&[9; 16], &[4; 4]).unwrap()));
        let reply = peer_records(&mut peer, &Finished::new(&[1; 12]));

        let (mut ctx, _) = client(ProtocolVersion::TLS1_2, vec![Ok(Received::Data(reply))]);
        ctx.read_state_mut().install(0, aead());

        let mut trace = Trace::new().with(Action::receive("client", vec![ConfiguredMessage::wildcard()]));
        let report = Engine::new(Config::default()).run(&mut trace, &mut ctx).unwrap();

        assert!(matches!(
            report.actions[0].anomalies[0],
            Anomaly::NullFallback { sequence_number: 0, .. }
        ));
    }

    #[test]
    fn dtls_flight_with_epoch_change_and_retransmit() {
        let config = Config::builder().max_retransmits(1).build().unwrap();
        let (mut ctx, sent) = client(
            ProtocolVersion::DTLS1_2,
            vec![Ok(Received::Timeout), Ok(Received::Timeout)],
        );
        ctx.set_pending_write_cipher(aead());

        let mut trace = Trace::new()
            .with(Action::send(
                "client",
                vec![
                    ConfiguredMessage::send(OpaqueHandshake::new(
                        HandshakeType::ClientKeyExchange,
                        &[5; 33],
                    )),
                    ConfiguredMessage::send(ChangeCipherSpec::new()),
                    ConfiguredMessage::send(Finished::new(&[6; 12])),
                ],
            ))
            .with(Action::receive(
                "client",
                vec![ConfiguredMessage::expect(MessageKind::ChangeCipherSpec)],
            ));

        let report = Engine::new(config).run(&mut trace, &mut ctx).unwrap();
        assert!(!report.executed_as_planned);
        assert!(report.actions[0].as_planned);
        assert_eq!(ctx.write_epoch(), 1);
        assert_eq!(ctx.next_send_message_seq(), 2);

        let sent = sent.lock().unwrap();
        assert_eq!(sent.len(), 2);
        assert_eq!(dtls_headers(&sent[0]), [(0, 0), (0, 1), (1, 0)]);
        assert_eq!(dtls_headers(&sent[1]), [(0, 2), (0, 3), (1, 1)]);
    }

    #[test]
    fn dtls_handshake_fragments_fit_datagrams() {
        let config = Config::builder().max_datagram_size(200).build().unwrap();
        let (mut ctx, sent) = client(ProtocolVersion::DTLS1_2, vec![]);
        let mut trace = Trace::new().with(Action::send(
            "client",
            vec![ConfiguredMessage::send(OpaqueHandshake::new(
                HandshakeType::Certificate,
                &[8; 500],
            ))],
        ));

        Engine::new(config).run(&mut trace, &mut ctx).unwrap();

        let sent = sent.lock().unwrap();
        assert!(sent.len() > 1);
        assert!(sent.iter().all(|d| d.len() <= 200));

        let mut assembler = crate::message::HandshakeAssembler::new();
        for datagram in sent.iter() {
            let mut rest = &datagram[..];
            while !rest.is_empty() {
                let (body, h) = RecordHeader::parse(rest, true).unwrap();
                assembler.push(&body[..h.length as usize], true).unwrap();
                rest = &body[h.length as usize..];
            }
        }
        assert_eq!(assembler.pop(true).unwrap().body, vec![8; 500]);
    }

    #[test]
    fn reads_until_quiet_when_configured() {
        let mut peer = ConnectionContext::new("server", Role::Responder, ProtocolVersion::TLS1_2);
        let hello = peer_records(&mut peer, &server_hello());
        let done = peer_records(&mut peer, &ServerHelloDone);

        for (wait, expected) in [(true, 1), (false, 2)] {
            let (mut ctx, _) = client(
                ProtocolVersion::TLS1_2,
                vec![
                    Ok(Received::Data(hello.clone())),
                    Ok(Received::Data(done.clone())),
                ],
            );
            let mut trace = Trace::new().with(Action::receive(
                "client",
                vec![ConfiguredMessage::expect(SERVER_HELLO)],
            ));
            let config = Config::builder().wait_only_for_expected(wait).build().unwrap();
            let report = Engine::new(config).run(&mut trace, &mut ctx).unwrap();
            assert_eq!(report.actions[0].kinds.len(), expected);
            assert_eq!(report.executed_as_planned, wait);
        }
    }

    #[test]
    fn partial_record_is_leftover() {
        let (mut ctx, _) = client(
            ProtocolVersion::TLS1_2,
            vec![Ok(Received::Data(vec![22, 3, 3, 0, 40, 1]))],
        );
        let mut trace = Trace::new().with(Action::receive("client", vec![ConfiguredMessage::wildcard()]));
        let report = Engine::new(Config::default()).run(&mut trace, &mut ctx).unwrap();
        assert_eq!(report.actions[0].anomalies, [Anomaly::Leftover(6)]);
    }

    #[test]
    fn unknown_alias() {
        let (mut ctx, _) = client(ProtocolVersion::TLS1_2, vec![]);
        let mut trace = Trace::new().with(Action::send("server", vec![]));
        let err = Engine::new(Config::default())
            .run(&mut trace, &mut ctx)
            .unwrap_err();
        assert!(matches!(err, Error::UnknownAlias(a) if a == "server"));
    }

    #[test]
    fn transport_error_keeps_partial_result() {
        let mut peer = ConnectionContext::new("server", Role::Responder, ProtocolVersion::TLS1_2);
        let hello = peer_records(&mut peer, &server_hello());
        let (mut ctx, _) = client(
            ProtocolVersion::TLS1_2,
            vec![
                Ok(Received::Data(hello)),
                Err(Error::Transport("connection reset".into())),
            ],
        );
        let mut trace = Trace::new().with(Action::receive(
            "client",
            vec![
                ConfiguredMessage::expect(SERVER_HELLO),
                ConfiguredMessage::expect(MessageKind::Handshake(HandshakeType::Certificate)),
            ],
        ));

        let err = Engine::new(Config::default())
            .run(&mut trace, &mut ctx)
            .unwrap_err();
        assert!(err.is_transient());

        let result = trace.actions()[0].result().unwrap();
        assert_eq!(result.kinds(), [SERVER_HELLO]);
    }

    #[test]
    fn executed_trace_must_be_reset() {
        let (mut ctx, _) = client(ProtocolVersion::TLS1_2, vec![]);
        let mut trace = Trace::new().with(Action::send(
            "client",
            vec![ConfiguredMessage::send(ServerHelloDone)],
        ));
        let mut engine = Engine::new(Config::default());
        engine.run(&mut trace, &mut ctx).unwrap();
        assert!(matches!(
            engine.run(&mut trace, &mut ctx),
            Err(Error::ActionAlreadyExecuted)
        ));
        trace.reset();
        engine.run(&mut trace, &mut ctx).unwrap();
    }

    #[test]
    fn seeded_randoms_repeat() {
        let config = Config::builder().rng_seed(Some(42)).build().unwrap();
        let mut a = Engine::new(config.clone());
        let mut b = Engine::new(config);
        assert_eq!(Random::new(a.rng()), Random::new(b.rng()));
        assert_ne!(Random::new(a.rng()), Random::new(&mut SeededRng::new(Some(43))));
    }
}
