//! Protocol messages as seen by the engine.
//!
//! The engine never looks inside a message. It asks for a [`MessageKind`],
//! serialized bytes and a context adjustment through [`ProtocolMessage`], and
//! it turns received bytes into messages through a [`MessageFactory`].
//!
//! Handshake framing is not part of a message: bodies are serialized without
//! the handshake header, which the engine adds (4 bytes for TLS, 12 for DTLS)
//! so that DTLS fragmentation and message sequence numbers stay in one place.
//!
//! The built-in set covers what a trace needs to get a peer through its first
//! flights. Anything else can be plugged in by implementing the two traits.

mod basic;
mod handshake;
mod hello;

use std::fmt;

pub use basic::{
    Alert, AlertLevel, ApplicationData, ChangeCipherSpec, Finished, Heartbeat, OpaqueHandshake,
    ServerHelloDone, UnknownMessage,
};
pub use handshake::{
    frame, AssembledHandshake, Framed, HandshakeAssembler, HandshakeHeader, HandshakeType,
};
pub use hello::{ClientHello, HelloVerifyRequest, Random, ServerHello};

use crate::types::ContentType;
use crate::{ConnectionContext, Error};

/// What a message is, independent of its content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    ChangeCipherSpec,
    Alert,
    Handshake(HandshakeType),
    ApplicationData,
    Heartbeat,
    /// Content that could not be attributed to a known content type.
    Unknown(u8),
}

impl MessageKind {
    pub fn content_type(&self) -> ContentType {
        match self {
            MessageKind::ChangeCipherSpec => ContentType::ChangeCipherSpec,
            MessageKind::Alert => ContentType::Alert,
            MessageKind::Handshake(_) => ContentType::Handshake,
            MessageKind::ApplicationData => ContentType::ApplicationData,
            MessageKind::Heartbeat => ContentType::Heartbeat,
            MessageKind::Unknown(v) => ContentType::from_u8(*v),
        }
    }

    pub fn handshake_type(&self) -> Option<HandshakeType> {
        match self {
            MessageKind::Handshake(t) => Some(*t),
            _ => None,
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageKind::Handshake(t) => write!(f, "{:?}", t),
            MessageKind::Unknown(v) => write!(f, "Unknown({})", v),
            _ => write!(f, "{:?}", self),
        }
    }
}

/// One protocol message.
pub trait ProtocolMessage: fmt::Debug + Send {
    fn kind(&self) -> MessageKind;

    /// Serialize the message body. Handshake messages leave out the
    /// handshake header.
    fn serialize(&self, ctx: &ConnectionContext) -> Result<Vec<u8>, Error>;

    /// Apply what this message negotiates to the context.
    ///
    /// Called once per sent or received message, in wire order.
    fn adjust_context(&self, _ctx: &mut ConnectionContext) {}
}

/// Turns received bytes into messages.
pub trait MessageFactory: Send + Sync {
    /// Parse one reassembled handshake body.
    fn parse_handshake(
        &self,
        handshake_type: HandshakeType,
        body: &[u8],
        ctx: &ConnectionContext,
    ) -> Result<Box<dyn ProtocolMessage>, Error>;

    /// Parse one message of a non-handshake content type from the front of
    /// `bytes`, returning it and the number of bytes it used.
    fn parse(
        &self,
        content_type: ContentType,
        bytes: &[u8],
        ctx: &ConnectionContext,
    ) -> Result<(Box<dyn ProtocolMessage>, usize), Error>;
}

/// Factory for the built-in messages.
///
/// Handshake types without a dedicated message become [`OpaqueHandshake`];
/// unknown content types are an error, which the engine turns into an
/// [`UnknownMessage`] and a halt.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultMessageFactory;

impl MessageFactory for DefaultMessageFactory {
    fn parse_handshake(
        &self,
        handshake_type: HandshakeType,
        body: &[u8],
        ctx: &ConnectionContext,
    ) -> Result<Box<dyn ProtocolMessage>, Error> {
        let msg: Box<dyn ProtocolMessage> = match handshake_type {
            HandshakeType::ClientHello => Box::new(ClientHello::parse(body, ctx.is_dtls())?),
            HandshakeType::ServerHello => Box::new(ServerHello::parse(body)?),
            HandshakeType::HelloVerifyRequest => Box::new(HelloVerifyRequest::parse(body)?),
            HandshakeType::ServerHelloDone => Box::new(ServerHelloDone::parse(body)?),
            HandshakeType::Finished => Box::new(Finished::new(body)),
            other => Box::new(OpaqueHandshake::new(other, body)),
        };
        Ok(msg)
    }

    fn parse(
        &self,
        content_type: ContentType,
        bytes: &[u8],
        _ctx: &ConnectionContext,
    ) -> Result<(Box<dyn ProtocolMessage>, usize), Error> {
        match content_type {
            ContentType::ChangeCipherSpec => {
                let (msg, n) = ChangeCipherSpec::parse(bytes)?;
                Ok((Box::new(msg), n))
            }
            ContentType::Alert => {
                let (msg, n) = Alert::parse(bytes)?;
                Ok((Box::new(msg), n))
            }
            ContentType::ApplicationData => {
                Ok((Box::new(ApplicationData::new(bytes)), bytes.len()))
            }
            ContentType::Heartbeat => Ok((Box::new(Heartbeat::new(bytes)), bytes.len())),
            ContentType::Handshake => Err(Error::Parse(
                "Handshake content goes through the assembler".into(),
            )),
            ContentType::Unknown(v) => Err(Error::Parse(format!("Unknown content type {}", v))),
        }
    }
}

/// A message as it was actually sent or received.
#[derive(Debug)]
pub struct ObservedMessage {
    pub kind: MessageKind,
    /// Bytes as framed on the wire: handshake messages include their header.
    pub bytes: Vec<u8>,
    /// The parsed message for received ones.
    pub parsed: Option<Box<dyn ProtocolMessage>>,
}

impl ObservedMessage {
    pub fn sent(kind: MessageKind, bytes: Vec<u8>) -> Self {
        ObservedMessage {
            kind,
            bytes,
            parsed: None,
        }
    }

    pub fn received(message: Box<dyn ProtocolMessage>, bytes: Vec<u8>) -> Self {
        ObservedMessage {
            kind: message.kind(),
            bytes,
            parsed: Some(message),
        }
    }

    /// Alert with level fatal.
    pub fn is_fatal_alert(&self) -> bool {
        self.kind == MessageKind::Alert && self.bytes.first() == Some(&AlertLevel::Fatal.as_u8())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ProtocolVersion, Role};

    #[test]
    fn kind_content_types() {
        assert_eq!(
            MessageKind::Handshake(HandshakeType::Finished).content_type(),
            ContentType::Handshake
        );
        assert_eq!(MessageKind::Unknown(99).content_type(), ContentType::Unknown(99));
        assert_eq!(MessageKind::Alert.handshake_type(), None);
    }

    #[test]
    fn factory_parses_records() {
        let ctx = ConnectionContext::new("c", Role::Initiator, ProtocolVersion::TLS1_2);
        let f = DefaultMessageFactory;

        let (msg, n) = f.parse(ContentType::Alert, &[2, 40, 1, 0], &ctx).unwrap();
        assert_eq!(msg.kind(), MessageKind::Alert);
        assert_eq!(n, 2);

        let (msg, n) = f.parse(ContentType::ApplicationData, b"data", &ctx).unwrap();
        assert_eq!(msg.kind(), MessageKind::ApplicationData);
        assert_eq!(n, 4);

        assert!(f.parse(ContentType::Unknown(77), &[1], &ctx).is_err());
        assert!(f.parse(ContentType::Alert, &[2], &ctx).is_err());
    }

    #[test]
    fn factory_unknown_handshake_is_opaque() {
        let ctx = ConnectionContext::new("c", Role::Initiator, ProtocolVersion::TLS1_2);
        let msg = DefaultMessageFactory
            .parse_handshake(HandshakeType::Unknown(99), &[1, 2, 3], &ctx)
            .unwrap();
        assert_eq!(msg.kind(), MessageKind::Handshake(HandshakeType::Unknown(99)));
    }

    #[test]
    fn fatal_alert_detection() {
        let fatal = ObservedMessage::sent(MessageKind::Alert, vec![2, 40]);
        let warning = ObservedMessage::sent(MessageKind::Alert, vec![1, 0]);
        assert!(fatal.is_fatal_alert());
        assert!(!warning.is_fatal_alert());
    }
}
