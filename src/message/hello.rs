use nom::bytes::complete::take;
use nom::number::complete::be_u8;
use nom::IResult;

use super::{HandshakeType, MessageKind, ProtocolMessage};
use crate::rng::SeededRng;
use crate::types::{CipherSuite, ProtocolVersion};
use crate::util::{put_vec_u16, put_vec_u8, vec_u16, vec_u8};
use crate::{ConnectionContext, Error};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Random(pub [u8; 32]);

impl Random {
    pub fn new(rng: &mut SeededRng) -> Self {
        let mut bytes = [0u8; 32];
        rng.fill(&mut bytes);
        Random(bytes)
    }

    pub fn parse(input: &[u8]) -> IResult<&[u8], Random> {
        let (input, bytes) = take(32usize)(input)?;
        let mut random = [0u8; 32];
        random.copy_from_slice(bytes);
        Ok((input, Random(random)))
    }
}

fn finish<T>(result: IResult<&[u8], T>, what: &str) -> Result<T, Error> {
    let (rest, value) = result?;
    if !rest.is_empty() {
        return Err(Error::Parse(format!(
            "{} bytes trailing {}",
            rest.len(),
            what
        )));
    }
    Ok(value)
}

/// ClientHello with the fields the engine negotiates on.
///
/// Extensions are carried as raw bytes (without the outer length).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientHello {
    pub version: ProtocolVersion,
    pub random: Random,
    pub session_id: Vec<u8>,
    /// DTLS only. `None` sends the cookie last received in a
    /// HelloVerifyRequest.
    pub cookie: Option<Vec<u8>>,
    pub cipher_suites: Vec<CipherSuite>,
    pub compression_methods: Vec<u8>,
    pub extensions: Option<Vec<u8>>,
}

impl ClientHello {
    pub fn new(version: ProtocolVersion, random: Random, cipher_suites: Vec<CipherSuite>) -> Self {
        ClientHello {
            version,
            random,
            session_id: Vec::new(),
            cookie: None,
            cipher_suites,
            compression_methods: vec![0],
            extensions: None,
        }
    }

    pub fn parse(input: &[u8], dtls: bool) -> Result<ClientHello, Error> {
        finish(Self::parse_inner(input, dtls), "ClientHello")
    }

    fn parse_inner(input: &[u8], dtls: bool) -> IResult<&[u8], ClientHello> {
        let (input, version) = ProtocolVersion::parse(input)?;
        let (input, random) = Random::parse(input)?;
        let (input, session_id) = vec_u8(input)?;
        let (input, cookie) = if dtls {
            let (input, cookie) = vec_u8(input)?;
            (input, Some(cookie.to_vec()))
        } else {
            (input, None)
        };
        let (input, suites) = vec_u16(input)?;
        let cipher_suites = suites
            .chunks_exact(2)
            .map(|c| CipherSuite::from_u16(u16::from_be_bytes([c[0], c[1]])))
            .collect();
        let (input, compression_methods) = vec_u8(input)?;
        let (input, extensions) = if input.is_empty() {
            (input, None)
        } else {
            let (input, ext) = vec_u16(input)?;
            (input, Some(ext.to_vec()))
        };

        Ok((
            input,
            ClientHello {
                version,
                random,
                session_id: session_id.to_vec(),
                cookie,
                cipher_suites,
                compression_methods: compression_methods.to_vec(),
                extensions,
            },
        ))
    }
}

impl ProtocolMessage for ClientHello {
    fn kind(&self) -> MessageKind {
        MessageKind::Handshake(HandshakeType::ClientHello)
    }

    fn serialize(&self, ctx: &ConnectionContext) -> Result<Vec<u8>, Error> {
        let mut out = Vec::new();
        self.version.serialize(&mut out);
        out.extend_from_slice(&self.random.0);
        put_vec_u8(&mut out, &self.session_id)?;
        if ctx.is_dtls() {
            let cookie = self.cookie.as_deref().unwrap_or(ctx.cookie());
            put_vec_u8(&mut out, cookie)?;
        }
        let mut suites = Vec::with_capacity(self.cipher_suites.len() * 2);
        for s in &self.cipher_suites {
            suites.extend_from_slice(&s.as_u16().to_be_bytes());
        }
        put_vec_u16(&mut out, &suites)?;
        put_vec_u8(&mut out, &self.compression_methods)?;
        if let Some(ext) = &self.extensions {
            put_vec_u16(&mut out, ext)?;
        }
        Ok(out)
    }

    fn adjust_context(&self, ctx: &mut ConnectionContext) {
        ctx.set_client_random(self.random);
        ctx.set_offered_cipher_suites(&self.cipher_suites);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerHello {
    pub version: ProtocolVersion,
    pub random: Random,
    pub session_id: Vec<u8>,
    pub cipher_suite: CipherSuite,
    pub compression_method: u8,
    pub extensions: Option<Vec<u8>>,
}

impl ServerHello {
    pub fn new(version: ProtocolVersion, random: Random, cipher_suite: CipherSuite) -> Self {
        ServerHello {
            version,
            random,
            session_id: Vec::new(),
            cipher_suite,
            compression_method: 0,
            extensions: None,
        }
    }

    pub fn parse(input: &[u8]) -> Result<ServerHello, Error> {
        finish(Self::parse_inner(input), "ServerHello")
    }

    fn parse_inner(input: &[u8]) -> IResult<&[u8], ServerHello> {
        let (input, version) = ProtocolVersion::parse(input)?;
        let (input, random) = Random::parse(input)?;
        let (input, session_id) = vec_u8(input)?;
        let (input, cipher_suite) = CipherSuite::parse(input)?;
        let (input, compression_method) = be_u8(input)?;
        let (input, extensions) = if input.is_empty() {
            (input, None)
        } else {
            let (input, ext) = vec_u16(input)?;
            (input, Some(ext.to_vec()))
        };

        Ok((
            input,
            ServerHello {
                version,
                random,
                session_id: session_id.to_vec(),
                cipher_suite,
                compression_method,
                extensions,
            },
        ))
    }
}

impl ProtocolMessage for ServerHello {
    fn kind(&self) -> MessageKind {
        MessageKind::Handshake(HandshakeType::ServerHello)
    }

    fn serialize(&self, _ctx: &ConnectionContext) -> Result<Vec<u8>, Error> {
        let mut out = Vec::new();
        self.version.serialize(&mut out);
        out.extend_from_slice(&self.random.0);
        put_vec_u8(&mut out, &self.session_id)?;
        out.extend_from_slice(&self.cipher_suite.as_u16().to_be_bytes());
        out.push(self.compression_method);
        if let Some(ext) = &self.extensions {
            put_vec_u16(&mut out, ext)?;
        }
        Ok(out)
    }

    fn adjust_context(&self, ctx: &mut ConnectionContext) {
        ctx.set_negotiated_version(self.version);
        ctx.set_cipher_suite(self.cipher_suite);
        ctx.set_server_random(self.random);
        ctx.set_session_id(&self.session_id);
    }
}

/// DTLS cookie exchange (RFC 6347 4.2.1).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HelloVerifyRequest {
    pub version: ProtocolVersion,
    pub cookie: Vec<u8>,
}

impl HelloVerifyRequest {
    pub fn parse(input: &[u8]) -> Result<HelloVerifyRequest, Error> {
        finish(Self::parse_inner(input), "HelloVerifyRequest")
    }

    fn parse_inner(input: &[u8]) -> IResult<&[u8], HelloVerifyRequest> {
        let (input, version) = ProtocolVersion::parse(input)?;
        let (input, cookie) = vec_u8(input)?;
        Ok((
            input,
            HelloVerifyRequest {
                version,
                cookie: cookie.to_vec(),
            },
        ))
    }
}

impl ProtocolMessage for HelloVerifyRequest {
    fn kind(&self) -> MessageKind {
        MessageKind::Handshake(HandshakeType::HelloVerifyRequest)
    }

    fn serialize(&self, _ctx: &ConnectionContext) -> Result<Vec<u8>, Error> {
        let mut out = Vec::new();
        self.version.serialize(&mut out);
        put_vec_u8(&mut out, &self.cookie)?;
        Ok(out)
    }

    fn adjust_context(&self, ctx: &mut ConnectionContext) {
        ctx.set_cookie(&self.cookie);
    }
}
