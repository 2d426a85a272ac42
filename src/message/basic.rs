use super::{HandshakeType, MessageKind, ProtocolMessage};
use crate::{ConnectionContext, Error};

/// The cipher-change signal, a single byte of value 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChangeCipherSpec {
    pub value: u8,
}

impl ChangeCipherSpec {
    pub fn new() -> Self {
        ChangeCipherSpec { value: 1 }
    }

    pub fn parse(input: &[u8]) -> Result<(ChangeCipherSpec, usize), Error> {
        match input.first() {
            Some(&value) => Ok((ChangeCipherSpec { value }, 1)),
            None => Err(Error::Parse("Empty ChangeCipherSpec".into())),
        }
    }
}

impl Default for ChangeCipherSpec {
    fn default() -> Self {
        Self::new()
    }
}

impl ProtocolMessage for ChangeCipherSpec {
    fn kind(&self) -> MessageKind {
        MessageKind::ChangeCipherSpec
    }

    fn serialize(&self, _ctx: &ConnectionContext) -> Result<Vec<u8>, Error> {
        Ok(vec![self.value])
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertLevel {
    Warning,
    Fatal,
    Unknown(u8),
}

impl AlertLevel {
    pub fn from_u8(value: u8) -> Self {
        match value {
            1 => AlertLevel::Warning,
            2 => AlertLevel::Fatal,
            _ => AlertLevel::Unknown(value),
        }
    }

    pub fn as_u8(&self) -> u8 {
        match self {
            AlertLevel::Warning => 1,
            AlertLevel::Fatal => 2,
            AlertLevel::Unknown(v) => *v,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Alert {
    pub level: AlertLevel,
    pub description: u8,
}

impl Alert {
    pub fn new(level: AlertLevel, description: u8) -> Self {
        Alert { level, description }
    }

    pub fn parse(input: &[u8]) -> Result<(Alert, usize), Error> {
        match input {
            [level, description, ..] => Ok((
                Alert {
                    level: AlertLevel::from_u8(*level),
                    description: *description,
                },
                2,
            )),
            _ => Err(Error::Parse(format!("Alert of {} bytes", input.len()))),
        }
    }
}

impl ProtocolMessage for Alert {
    fn kind(&self) -> MessageKind {
        MessageKind::Alert
    }

    fn serialize(&self, _ctx: &ConnectionContext) -> Result<Vec<u8>, Error> {
        Ok(vec![self.level.as_u8(), self.description])
    }

    fn adjust_context(&self, ctx: &mut ConnectionContext) {
        ctx.record_alert(*self);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplicationData {
    pub data: Vec<u8>,
}

impl ApplicationData {
    pub fn new(data: &[u8]) -> Self {
        ApplicationData {
            data: data.to_vec(),
        }
    }
}

impl ProtocolMessage for ApplicationData {
    fn kind(&self) -> MessageKind {
        MessageKind::ApplicationData
    }

    fn serialize(&self, _ctx: &ConnectionContext) -> Result<Vec<u8>, Error> {
        Ok(self.data.clone())
    }
}

/// Heartbeat content, kept opaque.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Heartbeat {
    pub payload: Vec<u8>,
}

impl Heartbeat {
    pub fn new(payload: &[u8]) -> Self {
        Heartbeat {
            payload: payload.to_vec(),
        }
    }
}

impl ProtocolMessage for Heartbeat {
    fn kind(&self) -> MessageKind {
        MessageKind::Heartbeat
    }

    fn serialize(&self, _ctx: &ConnectionContext) -> Result<Vec<u8>, Error> {
        Ok(self.payload.clone())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ServerHelloDone;

impl ServerHelloDone {
    pub fn parse(input: &[u8]) -> Result<ServerHelloDone, Error> {
        if !input.is_empty() {
            return Err(Error::Parse(format!(
                "ServerHelloDone with {} byte body",
                input.len()
            )));
        }
        Ok(ServerHelloDone)
    }
}

impl ProtocolMessage for ServerHelloDone {
    fn kind(&self) -> MessageKind {
        MessageKind::Handshake(HandshakeType::ServerHelloDone)
    }

    fn serialize(&self, _ctx: &ConnectionContext) -> Result<Vec<u8>, Error> {
        Ok(Vec::new())
    }
}

/// Finished, with verify data computed by the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Finished {
    pub verify_data: Vec<u8>,
}

impl Finished {
    pub fn new(verify_data: &[u8]) -> Self {
        Finished {
            verify_data: verify_data.to_vec(),
        }
    }
}

impl ProtocolMessage for Finished {
    fn kind(&self) -> MessageKind {
        MessageKind::Handshake(HandshakeType::Finished)
    }

    fn serialize(&self, _ctx: &ConnectionContext) -> Result<Vec<u8>, Error> {
        Ok(self.verify_data.clone())
    }
}

/// Any handshake message carried as an uninterpreted body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpaqueHandshake {
    pub handshake_type: HandshakeType,
    pub body: Vec<u8>,
}

impl OpaqueHandshake {
    pub fn new(handshake_type: HandshakeType, body: &[u8]) -> Self {
        OpaqueHandshake {
            handshake_type,
            body: body.to_vec(),
        }
    }
}

impl ProtocolMessage for OpaqueHandshake {
    fn kind(&self) -> MessageKind {
        MessageKind::Handshake(self.handshake_type)
    }

    fn serialize(&self, _ctx: &ConnectionContext) -> Result<Vec<u8>, Error> {
        Ok(self.body.clone())
    }
}

/// Bytes that could not be parsed as any message.
///
/// Received: produced by the engine when parsing fails. Sent: written as
/// is under the given content type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownMessage {
    pub content_type: u8,
    pub bytes: Vec<u8>,
}

impl UnknownMessage {
    pub fn new(content_type: u8, bytes: &[u8]) -> Self {
        UnknownMessage {
            content_type,
            bytes: bytes.to_vec(),
        }
    }
}

impl ProtocolMessage for UnknownMessage {
    fn kind(&self) -> MessageKind {
        MessageKind::Unknown(self.content_type)
    }

    fn serialize(&self, _ctx: &ConnectionContext) -> Result<Vec<u8>, Error> {
        Ok(self.bytes.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn change_cipher_spec() {
        let (ccs, n) = ChangeCipherSpec::parse(&[1, 1]).unwrap();
        assert_eq!(ccs.value, 1);
        assert_eq!(n, 1);
        assert!(ChangeCipherSpec::parse(&[]).is_err());
    }

    #[test]
    fn alert_levels() {
        let (alert, n) = Alert::parse(&[2, 20]).unwrap();
        assert_eq!(alert.level, AlertLevel::Fatal);
        assert_eq!(alert.description, 20);
        assert_eq!(n, 2);
        assert_eq!(AlertLevel::from_u8(9), AlertLevel::Unknown(9));
        assert!(Alert::parse(&[1]).is_err());
    }

    #[test]
    fn server_hello_done_must_be_empty() {
        assert!(ServerHelloDone::parse(&[]).is_ok());
        assert!(ServerHelloDone::parse(&[0]).is_err());
    }
}
