use std::fmt;

use crate::crypto::{cipher_state_for, CipherState, KeyMaterial, TranscriptDigest};
use crate::message::{Alert, HandshakeAssembler, HandshakeType, ProtocolMessage, Random};
use crate::record::DirectionState;
use crate::transport::Transport;
use crate::types::{CipherSuite, ProtocolVersion, Role};
use crate::Error;

/// State of one connection, owned by whoever runs it.
///
/// Holds everything that changes as messages flow: negotiated parameters,
/// read and write record state, the handshake transcript and the transport.
/// The engine passes it by `&mut` to the record codec and to every message.
pub struct ConnectionContext {
    alias: String,
    role: Role,
    version: ProtocolVersion,

    negotiated_version: Option<ProtocolVersion>,
    cipher_suite: Option<CipherSuite>,
    offered_cipher_suites: Vec<CipherSuite>,
    client_random: Option<Random>,
    server_random: Option<Random>,
    session_id: Vec<u8>,
    cookie: Vec<u8>,

    write: DirectionState,
    read: DirectionState,

    /// Installed by key derivation, activated by ChangeCipherSpec.
    pending_write: Option<Box<dyn CipherState>>,
    pending_read: Option<Box<dyn CipherState>>,

    transcript: TranscriptDigest,
    assembler: HandshakeAssembler,
    next_send_message_seq: u16,

    /// Received bytes not yet decoded into records.
    inbound: Vec<u8>,

    last_alert: Option<Alert>,

    transport: Option<Box<dyn Transport>>,
}

impl ConnectionContext {
    pub fn new(alias: &str, role: Role, version: ProtocolVersion) -> Self {
        ConnectionContext {
            alias: alias.to_string(),
            role,
            version,
            negotiated_version: None,
            cipher_suite: None,
            offered_cipher_suites: Vec::new(),
            client_random: None,
            server_random: None,
            session_id: Vec::new(),
            cookie: Vec::new(),
            write: DirectionState::new(),
            read: DirectionState::new(),
            pending_write: None,
            pending_read: None,
            transcript: TranscriptDigest::new(),
            assembler: HandshakeAssembler::new(),
            next_send_message_seq: 0,
            inbound: Vec::new(),
            last_alert: None,
            transport: None,
        }
    }

    pub fn alias(&self) -> &str {
        &self.alias
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// The version this context was configured for.
    pub fn version(&self) -> ProtocolVersion {
        self.version
    }

    /// DTLS framing is decided by the configured version, never by what is
    /// on the wire.
    pub fn is_dtls(&self) -> bool {
        self.version.is_dtls()
    }

    /// Version stamped on outgoing records.
    pub fn record_version(&self) -> ProtocolVersion {
        self.negotiated_version.unwrap_or(self.version)
    }

    pub fn negotiated_version(&self) -> Option<ProtocolVersion> {
        self.negotiated_version
    }

    pub fn set_negotiated_version(&mut self, version: ProtocolVersion) {
        self.negotiated_version = Some(version);
    }

    pub fn cipher_suite(&self) -> Option<CipherSuite> {
        self.cipher_suite
    }

    pub fn set_cipher_suite(&mut self, suite: CipherSuite) {
        self.cipher_suite = Some(suite);
    }

    pub fn offered_cipher_suites(&self) -> &[CipherSuite] {
        &self.offered_cipher_suites
    }

    pub fn set_offered_cipher_suites(&mut self, suites: &[CipherSuite]) {
        self.offered_cipher_suites = suites.to_vec();
    }

    pub fn client_random(&self) -> Option<Random> {
        self.client_random
    }

    pub fn set_client_random(&mut self, random: Random) {
        self.client_random = Some(random);
    }

    pub fn server_random(&self) -> Option<Random> {
        self.server_random
    }

    pub fn set_server_random(&mut self, random: Random) {
        self.server_random = Some(random);
    }

    pub fn session_id(&self) -> &[u8] {
        &self.session_id
    }

    pub fn set_session_id(&mut self, session_id: &[u8]) {
        self.session_id = session_id.to_vec();
    }

    /// Last DTLS cookie received in a HelloVerifyRequest.
    pub fn cookie(&self) -> &[u8] {
        &self.cookie
    }

    pub fn set_cookie(&mut self, cookie: &[u8]) {
        self.cookie = cookie.to_vec();
    }

    pub fn last_alert(&self) -> Option<Alert> {
        self.last_alert
    }

    pub fn record_alert(&mut self, alert: Alert) {
        debug!("{}: alert {:?}", self.alias, alert);
        self.last_alert = Some(alert);
    }

    // ===== Record state =====

    pub fn write_state(&self) -> &DirectionState {
        &self.write
    }

    pub fn write_state_mut(&mut self) -> &mut DirectionState {
        &mut self.write
    }

    pub fn read_state(&self) -> &DirectionState {
        &self.read
    }

    pub fn read_state_mut(&mut self) -> &mut DirectionState {
        &mut self.read
    }

    /// Sequence number the next outgoing record gets.
    pub fn write_sequence(&self) -> u64 {
        self.write.sequence()
    }

    pub fn read_sequence(&self) -> u64 {
        self.read.sequence()
    }

    pub fn write_epoch(&self) -> u16 {
        self.write.epoch()
    }

    pub fn read_epoch(&self) -> u16 {
        self.read.epoch()
    }

    pub fn set_pending_write_cipher(&mut self, state: Box<dyn CipherState>) {
        self.pending_write = Some(state);
    }

    pub fn set_pending_read_cipher(&mut self, state: Box<dyn CipherState>) {
        self.pending_read = Some(state);
    }

    /// Build both pending states from externally derived keys, using the
    /// negotiated cipher suite.
    ///
    /// `local` protects what this side writes, `remote` what it reads.
    pub fn set_pending_keys(
        &mut self,
        local: &KeyMaterial,
        remote: &KeyMaterial,
    ) -> Result<(), Error> {
        let suite = self
            .cipher_suite
            .ok_or_else(|| Error::CryptoError("No cipher suite negotiated".into()))?;
        let version = self.record_version();
        self.pending_write = Some(cipher_state_for(suite, version, local)?);
        self.pending_read = Some(cipher_state_for(suite, version, remote)?);
        Ok(())
    }

    /// Switch the write direction after sending ChangeCipherSpec.
    pub fn activate_write_cipher(&mut self) -> Result<(), Error> {
        let dtls = self.is_dtls();
        let pending = self.pending_write.take();
        debug!(
            "{}: activate write cipher ({})",
            self.alias,
            if pending.is_some() { "pending" } else { "none pending" }
        );
        activate(&mut self.write, pending, dtls)
    }

    /// Switch the read direction after receiving ChangeCipherSpec.
    pub fn activate_read_cipher(&mut self) -> Result<(), Error> {
        let dtls = self.is_dtls();
        let pending = self.pending_read.take();
        debug!(
            "{}: activate read cipher ({})",
            self.alias,
            if pending.is_some() { "pending" } else { "none pending" }
        );
        activate(&mut self.read, pending, dtls)
    }

    // ===== Handshake state =====

    pub fn transcript(&self) -> &TranscriptDigest {
        &self.transcript
    }

    pub fn assembler_mut(&mut self) -> &mut HandshakeAssembler {
        &mut self.assembler
    }

    /// Hand out the DTLS message_seq for the next sent handshake message.
    pub fn take_message_seq(&mut self) -> u16 {
        let seq = self.next_send_message_seq;
        self.next_send_message_seq = seq.wrapping_add(1);
        seq
    }

    pub fn next_send_message_seq(&self) -> u16 {
        self.next_send_message_seq
    }

    pub(crate) fn inbound_mut(&mut self) -> &mut Vec<u8> {
        &mut self.inbound
    }

    /// Apply a sent or received message, in wire order.
    ///
    /// Handshake messages enter the transcript as `message_bytes`, the
    /// unfragmented message with its header. A HelloVerifyRequest restarts
    /// the transcript. Then the message adjusts the negotiated parameters.
    pub fn adjust(&mut self, msg: &dyn ProtocolMessage, message_bytes: &[u8]) {
        if let Some(handshake_type) = msg.kind().handshake_type() {
            if handshake_type == HandshakeType::HelloVerifyRequest {
                self.transcript.reset();
            } else if !handshake_type.excluded_from_transcript() {
                self.transcript.append(message_bytes);
            }
        }
        trace!("{}: adjust for {}", self.alias, msg.kind());
        msg.adjust_context(self);
    }

    // ===== Transport =====

    pub fn attach_transport(&mut self, transport: Box<dyn Transport>) {
        self.transport = Some(transport);
    }

    pub fn has_transport(&self) -> bool {
        self.transport.is_some()
    }

    pub fn transport_mut(&mut self) -> Result<&mut dyn Transport, Error> {
        match self.transport.as_mut() {
            Some(t) => Ok(t.as_mut()),
            None => Err(Error::NotConnected),
        }
    }

    /// Close and release the transport, if any.
    pub fn close_transport(&mut self) -> Result<(), Error> {
        match self.transport.take() {
            Some(mut t) => t.close(),
            None => Ok(()),
        }
    }

    /// Back to the pre-handshake state.
    ///
    /// The transport is closed and released; a close failure is reported as
    /// `Error::ResetFailed` after the rest of the state was cleared.
    pub fn reset(&mut self) -> Result<(), Error> {
        let closed = self.close_transport();
        self.reset_state();
        closed.map_err(|e| Error::ResetFailed(format!("{}: {}", self.alias, e)))
    }

    /// Back to the pre-handshake state, keeping the transport attached.
    ///
    /// For re-running a trace over the same stream when no fresh connection
    /// can be made.
    pub fn reset_state(&mut self) {
        self.negotiated_version = None;
        self.cipher_suite = None;
        self.offered_cipher_suites.clear();
        self.client_random = None;
        self.server_random = None;
        self.session_id.clear();
        self.cookie.clear();
        self.write.reset();
        self.read.reset();
        self.pending_write = None;
        self.pending_read = None;
        self.transcript.reset();
        self.assembler.reset();
        self.next_send_message_seq = 0;
        self.inbound.clear();
        self.last_alert = None;

        debug!("{}: reset", self.alias);
    }
}

fn activate(
    state: &mut DirectionState,
    pending: Option<Box<dyn CipherState>>,
    dtls: bool,
) -> Result<(), Error> {
    if !dtls {
        state.replace_current(pending);
        return Ok(());
    }

    state.advance_epoch()?;
    let epoch = state.epoch();
    match pending {
        Some(cipher) => state.install(epoch, cipher),
        // A retransmitted flight re-enters an epoch whose state is kept.
        None if state.has_cipher(epoch) => {}
        None => state.clear(epoch),
    }
    Ok(())
}

impl fmt::Debug for ConnectionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionContext")
            .field("alias", &self.alias)
            .field("role", &self.role)
            .field("version", &self.version)
            .field("negotiated_version", &self.negotiated_version)
            .field("cipher_suite", &self.cipher_suite)
            .field("write", &self.write)
            .field("read", &self.read)
            .field("transcript_len", &self.transcript.len())
            .field("connected", &self.transport.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{AeadCipherState, CipherKind};
    use crate::message::{HelloVerifyRequest, OpaqueHandshake, ServerHello};
    use crate::transport::Received;
    use std::time::Duration;

    struct FailingClose;

    impl Transport for FailingClose {
        fn send(&mut self, _: &[u8]) -> Result<(), Error> {
            Ok(())
        }
        fn receive(&mut self, _: Duration) -> Result<Received, Error> {
            Ok(Received::Timeout)
        }
        fn close(&mut self) -> Result<(), Error> {
            Err(Error::Transport("stuck".into()))
        }
    }

    fn aead() -> Box<dyn CipherState> {
        Box::new(AeadCipherState::new(&[1; 16], &[0; 4]).unwrap())
    }

    #[test]
    fn adjust_builds_transcript_in_order() {
        let mut ctx = ConnectionContext::new("c", Role::Initiator, ProtocolVersion::TLS1_2);
        let a = OpaqueHandshake::new(HandshakeType::Certificate, &[1]);
        ctx.adjust(&a, &[11, 0, 0, 1, 1]);
        ctx.adjust(&a, &[11, 0, 0, 1, 2]);
        assert_eq!(ctx.transcript().as_bytes(), &[11, 0, 0, 1, 1, 11, 0, 0, 1, 2]);

        let hr = OpaqueHandshake::new(HandshakeType::HelloRequest, &[]);
        ctx.adjust(&hr, &[0, 0, 0, 0]);
        assert_eq!(ctx.transcript().len(), 10);
    }

    #[test]
    fn hello_verify_request_restarts_transcript() {
        let mut ctx = ConnectionContext::new("c", Role::Initiator, ProtocolVersion::DTLS1_2);
        let ch = OpaqueHandshake::new(HandshakeType::ClientHello, &[]);
        ctx.adjust(&ch, &[1; 12]);
        let hvr = HelloVerifyRequest {
            version: ProtocolVersion::DTLS1_0,
            cookie: vec![7, 7],
        };
        ctx.adjust(&hvr, &[3; 17]);
        assert!(ctx.transcript().is_empty());
        assert_eq!(ctx.cookie(), &[7, 7]);
    }

    #[test]
    fn server_hello_negotiates() {
        let mut ctx = ConnectionContext::new("c", Role::Initiator, ProtocolVersion::TLS1_2);
        let sh = ServerHello::new(
            ProtocolVersion::TLS1_1,
            Random([5; 32]),
            CipherSuite::from_u16(0xc02f),
        );
        ctx.adjust(&sh, &[2, 0, 0, 0]);
        assert_eq!(ctx.negotiated_version(), Some(ProtocolVersion::TLS1_1));
        assert_eq!(ctx.record_version(), ProtocolVersion::TLS1_1);
        assert_eq!(ctx.server_random(), Some(Random([5; 32])));
        assert_eq!(ctx.cipher_suite(), Some(CipherSuite::from_u16(0xc02f)));
    }

    #[test]
    fn tls_activation_keeps_epoch_zero() {
        let mut ctx = ConnectionContext::new("c", Role::Initiator, ProtocolVersion::TLS1_2);
        ctx.write_state_mut().take_sequence(false).unwrap();
        ctx.set_pending_write_cipher(aead());
        ctx.activate_write_cipher().unwrap();
        assert_eq!(ctx.write_epoch(), 0);
        assert_eq!(ctx.write_sequence(), 0);
        assert_eq!(ctx.write_state_mut().current_cipher_mut().kind(), CipherKind::Aead);
        assert_eq!(ctx.read_state_mut().current_cipher_mut().kind(), CipherKind::Null);
    }

    #[test]
    fn dtls_activation_advances_epoch() {
        let mut ctx = ConnectionContext::new("c", Role::Initiator, ProtocolVersion::DTLS1_2);
        ctx.set_pending_read_cipher(aead());
        ctx.activate_read_cipher().unwrap();
        assert_eq!(ctx.read_epoch(), 1);
        assert!(ctx.read_state().has_cipher(1));
        assert_eq!(ctx.write_epoch(), 0);

        // Re-entering epoch 1 after a revert keeps its state.
        assert!(ctx.read_state_mut().revert_epoch());
        ctx.activate_read_cipher().unwrap();
        assert_eq!(ctx.read_epoch(), 1);
        assert!(ctx.read_state().has_cipher(1));

        // Nothing pending and nothing kept: null.
        ctx.activate_read_cipher().unwrap();
        assert_eq!(ctx.read_epoch(), 2);
        assert!(!ctx.read_state().has_cipher(2));
    }

    #[test]
    fn pending_keys_need_a_suite() {
        let mut ctx = ConnectionContext::new("c", Role::Initiator, ProtocolVersion::TLS1_2);
        let keys = KeyMaterial::new(&[1; 16], &[], &[2; 4]);
        assert!(ctx.set_pending_keys(&keys, &keys).is_err());
        ctx.set_cipher_suite(CipherSuite::from_u16(0xc02f));
        ctx.set_pending_keys(&keys, &keys).unwrap();
        ctx.activate_write_cipher().unwrap();
        assert_eq!(ctx.write_state_mut().current_cipher_mut().kind(), CipherKind::Aead);
    }

    #[test]
    fn reset_restores_pristine_state() {
        let mut ctx = ConnectionContext::new("c", Role::Initiator, ProtocolVersion::DTLS1_2);
        ctx.set_negotiated_version(ProtocolVersion::DTLS1_0);
        ctx.set_cookie(&[1]);
        ctx.take_message_seq();
        ctx.write_state_mut().take_sequence(true).unwrap();
        ctx.set_pending_write_cipher(aead());
        ctx.activate_write_cipher().unwrap();
        ctx.adjust(&OpaqueHandshake::new(HandshakeType::Finished, &[]), &[20; 12]);
        ctx.inbound_mut().extend_from_slice(&[1, 2, 3]);
        ctx.attach_transport(Box::new(FailingClose));

        let err = ctx.reset().unwrap_err();
        assert!(matches!(err, Error::ResetFailed(_)));

        assert!(!ctx.has_transport());
        assert_eq!(ctx.negotiated_version(), None);
        assert!(ctx.cookie().is_empty());
        assert_eq!(ctx.next_send_message_seq(), 0);
        assert_eq!(ctx.write_epoch(), 0);
        assert_eq!(ctx.write_sequence(), 0);
        assert!(!ctx.write_state().has_cipher(1));
        assert!(ctx.transcript().is_empty());
        assert!(ctx.inbound_mut().is_empty());
        assert!(matches!(ctx.transport_mut(), Err(Error::NotConnected)));

        ctx.reset().unwrap();
    }

    #[test]
    fn reset_state_keeps_transport() {
        let mut ctx = ConnectionContext::new("c", Role::Initiator, ProtocolVersion::TLS1_2);
        ctx.attach_transport(Box::new(FailingClose));
        ctx.set_cookie(&[1]);
        ctx.inbound_mut().extend_from_slice(&[1, 2, 3]);

        ctx.reset_state();

        assert!(ctx.has_transport());
        assert!(ctx.cookie().is_empty());
        assert!(ctx.inbound_mut().is_empty());
    }
}
