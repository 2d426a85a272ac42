//! Byte transports the engine runs over.
//!
//! The engine only needs to send bytes and to wait a bounded time for more.
//! TCP and UDP adapters over `std::net` are provided; anything else (in
//! memory pipes for tests, proxies) implements [`Transport`].

use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs, UdpSocket};
use std::time::Duration;

use crate::{ConnectionContext, Error};

/// Result of one bounded read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Received {
    Data(Vec<u8>),
    /// Nothing arrived within the wait.
    Timeout,
    /// The peer closed the connection.
    Closed,
}

pub trait Transport: Send {
    /// Send all of `data`. For datagram transports, one call is one datagram.
    fn send(&mut self, data: &[u8]) -> Result<(), Error>;

    /// Wait at most `max_wait` for input.
    fn receive(&mut self, max_wait: Duration) -> Result<Received, Error>;

    /// Release the underlying resources. Closing twice is not an error.
    fn close(&mut self) -> Result<(), Error>;
}

/// Acquires a fresh transport for a connection context.
///
/// The retry harness calls this once per attempt, after the previous
/// transport was released by the context reset.
pub trait Connector: Send {
    /// Failures to reach the peer are reported as `Error::Connect`.
    fn connect(&mut self, ctx: &ConnectionContext) -> Result<Box<dyn Transport>, Error>;
}

const READ_BUFFER: usize = 16 * 1024 + 2048;

fn is_timeout(e: &io::Error) -> bool {
    matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut)
}

// std rejects a zero read timeout.
fn read_timeout(max_wait: Duration) -> Duration {
    max_wait.max(Duration::from_millis(1))
}

pub struct TcpTransport {
    stream: Option<TcpStream>,
}

impl TcpTransport {
    pub fn new(stream: TcpStream) -> Self {
        TcpTransport {
            stream: Some(stream),
        }
    }

    fn stream(&mut self) -> Result<&mut TcpStream, Error> {
        self.stream.as_mut().ok_or(Error::NotConnected)
    }
}

impl Transport for TcpTransport {
    fn send(&mut self, data: &[u8]) -> Result<(), Error> {
        let stream = self.stream()?;
        stream.write_all(data)?;
        stream.flush()?;
        Ok(())
    }

    fn receive(&mut self, max_wait: Duration) -> Result<Received, Error> {
        let stream = self.stream()?;
        stream.set_read_timeout(Some(read_timeout(max_wait)))?;

        let mut buf = vec![0; READ_BUFFER];
        match stream.read(&mut buf) {
            Ok(0) => Ok(Received::Closed),
            Ok(n) => {
                buf.truncate(n);
                Ok(Received::Data(buf))
            }
            Err(e) if is_timeout(&e) => Ok(Received::Timeout),
            Err(e) if e.kind() == io::ErrorKind::ConnectionReset => Ok(Received::Closed),
            Err(e) => Err(e.into()),
        }
    }

    fn close(&mut self) -> Result<(), Error> {
        let Some(stream) = self.stream.take() else {
            return Ok(());
        };
        match stream.shutdown(std::net::Shutdown::Both) {
            Ok(()) => Ok(()),
            // Peer already gone.
            Err(e) if e.kind() == io::ErrorKind::NotConnected => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

pub struct UdpTransport {
    socket: Option<UdpSocket>,
}

impl UdpTransport {
    /// Wrap a socket that is already connected to the peer.
    pub fn new(socket: UdpSocket) -> Self {
        UdpTransport {
            socket: Some(socket),
        }
    }

    fn socket(&mut self) -> Result<&mut UdpSocket, Error> {
        self.socket.as_mut().ok_or(Error::NotConnected)
    }
}

impl Transport for UdpTransport {
    fn send(&mut self, data: &[u8]) -> Result<(), Error> {
        let socket = self.socket()?;
        let n = socket.send(data)?;
        if n != data.len() {
            return Err(Error::Transport(format!(
                "Datagram truncated: {} of {} bytes",
                n,
                data.len()
            )));
        }
        Ok(())
    }

    fn receive(&mut self, max_wait: Duration) -> Result<Received, Error> {
        let socket = self.socket()?;
        socket.set_read_timeout(Some(read_timeout(max_wait)))?;

        let mut buf = vec![0; u16::MAX as usize];
        match socket.recv(&mut buf) {
            Ok(n) => {
                buf.truncate(n);
                Ok(Received::Data(buf))
            }
            Err(e) if is_timeout(&e) => Ok(Received::Timeout),
            // ICMP port unreachable surfaces on the next read.
            Err(e) if e.kind() == io::ErrorKind::ConnectionRefused => Ok(Received::Closed),
            Err(e) => Err(e.into()),
        }
    }

    fn close(&mut self) -> Result<(), Error> {
        self.socket = None;
        Ok(())
    }
}

fn resolve(addr: &str) -> Result<Vec<SocketAddr>, Error> {
    let addrs: Vec<SocketAddr> = addr
        .to_socket_addrs()
        .map_err(|e| Error::Connect(format!("{}: {}", addr, e)))?
        .collect();
    if addrs.is_empty() {
        return Err(Error::Connect(format!("{}: no address", addr)));
    }
    Ok(addrs)
}

/// Opens a TCP connection per attempt.
#[derive(Debug, Clone)]
pub struct TcpConnector {
    addr: String,
    timeout: Duration,
}

impl TcpConnector {
    pub fn new(addr: impl Into<String>, timeout: Duration) -> Self {
        TcpConnector {
            addr: addr.into(),
            timeout,
        }
    }
}

impl Connector for TcpConnector {
    fn connect(&mut self, ctx: &ConnectionContext) -> Result<Box<dyn Transport>, Error> {
        let mut last = None;
        for addr in resolve(&self.addr)? {
            match TcpStream::connect_timeout(&addr, self.timeout) {
                Ok(stream) => {
                    stream.set_nodelay(true)?;
                    debug!("{}: connected to {}", ctx.alias(), addr);
                    return Ok(Box::new(TcpTransport::new(stream)));
                }
                Err(e) => last = Some(e),
            }
        }
        Err(Error::Connect(match last {
            Some(e) => format!("{}: {}", self.addr, e),
            None => self.addr.clone(),
        }))
    }
}

/// Binds an ephemeral UDP socket connected to the peer per attempt.
#[derive(Debug, Clone)]
pub struct UdpConnector {
    addr: String,
}

impl UdpConnector {
    pub fn new(addr: impl Into<String>) -> Self {
        UdpConnector { addr: addr.into() }
    }
}

impl Connector for UdpConnector {
    fn connect(&mut self, ctx: &ConnectionContext) -> Result<Box<dyn Transport>, Error> {
        let peer = resolve(&self.addr)?[0];
        let local: SocketAddr = if peer.is_ipv4() {
            ([0, 0, 0, 0], 0).into()
        } else {
            ([0u16; 8], 0).into()
        };
        let socket = UdpSocket::bind(local).map_err(|e| Error::Connect(e.to_string()))?;
        socket
            .connect(peer)
            .map_err(|e| Error::Connect(format!("{}: {}", peer, e)))?;
        debug!("{}: udp socket to {}", ctx.alias(), peer);
        Ok(Box::new(UdpTransport::new(socket)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ProtocolVersion, Role};
    use std::net::TcpListener;

    #[test]
    fn tcp_roundtrip_and_close() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let ctx = ConnectionContext::new("client", Role::Initiator, ProtocolVersion::TLS1_2);

        let mut connector = TcpConnector::new(addr.to_string(), Duration::from_secs(2));
        let mut transport = connector.connect(&ctx).unwrap();
        let (mut peer, _) = listener.accept().unwrap();

        transport.send(b"hello").unwrap();
        let mut buf = [0; 5];
        peer.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"hello");

        assert_eq!(
            transport.receive(Duration::from_millis(20)).unwrap(),
            Received::Timeout
        );

        peer.write_all(b"back").unwrap();
        assert_eq!(
            transport.receive(Duration::from_secs(2)).unwrap(),
            Received::Data(b"back".to_vec())
        );

        drop(peer);
        assert_eq!(
            transport.receive(Duration::from_secs(2)).unwrap(),
            Received::Closed
        );

        transport.close().unwrap();
        transport.close().unwrap();
        assert!(matches!(transport.send(b"x"), Err(Error::NotConnected)));
    }

    #[test]
    fn udp_datagrams() {
        let peer = UdpSocket::bind("127.0.0.1:0").unwrap();
        let ctx = ConnectionContext::new("client", Role::Initiator, ProtocolVersion::DTLS1_2);
        let mut transport = UdpConnector::new(peer.local_addr().unwrap().to_string())
            .connect(&ctx)
            .unwrap();

        transport.send(&[1, 2, 3]).unwrap();
        let mut buf = [0; 16];
        let (n, from) = peer.recv_from(&mut buf).unwrap();
        assert_eq!(&buf[..n], &[1, 2, 3]);

        peer.send_to(&[4, 5], from).unwrap();
        assert_eq!(
            transport.receive(Duration::from_secs(2)).unwrap(),
            Received::Data(vec![4, 5])
        );
    }

    #[test]
    fn unreachable_is_connect_error() {
        let ctx = ConnectionContext::new("client", Role::Initiator, ProtocolVersion::TLS1_2);
        let err = TcpConnector::new("256.0.0.1:1", Duration::from_millis(100))
            .connect(&ctx)
            .err()
            .expect("address cannot resolve");
        assert!(err.is_connect_failure());
    }
}
