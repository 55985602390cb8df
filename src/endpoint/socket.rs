use std::{
    io,
    net::{SocketAddr, UdpSocket},
    time::Duration,
};

use super::EndpointConfig;

/// The socket operations an endpoint needs.
pub trait DatagramSocket: Send {
    fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    fn send_to(&mut self, buf: &[u8], peer: SocketAddr) -> io::Result<usize>;

    fn set_read_timeout(&mut self, timeout: Option<Duration>) -> io::Result<()>;
}

/// Opens a fresh socket each time an endpoint (re)binds.
pub trait SocketFactory: Send + 'static {
    type Socket: DatagramSocket;

    fn open(&mut self, config: &EndpointConfig) -> io::Result<Self::Socket>;
}

impl DatagramSocket for UdpSocket {
    fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let (len, _src) = self.recv_from(buf)?;
        Ok(len)
    }

    fn send_to(&mut self, buf: &[u8], peer: SocketAddr) -> io::Result<usize> {
        UdpSocket::send_to(self, buf, peer)
    }

    fn set_read_timeout(&mut self, timeout: Option<Duration>) -> io::Result<()> {
        UdpSocket::set_read_timeout(self, timeout)
    }
}

/// Binds real UDP sockets at the configured address.
#[derive(Debug, Clone, Copy, Default)]
pub struct UdpFactory;

impl SocketFactory for UdpFactory {
    type Socket = UdpSocket;

    fn open(&mut self, config: &EndpointConfig) -> io::Result<UdpSocket> {
        UdpSocket::bind(config.address)
    }
}

/// Receive timeouts surface as either kind depending on the platform.
pub(crate) fn is_timeout(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
    )
}
