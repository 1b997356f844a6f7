//! Socket setup and the secure transport seam

use std::io;
use std::net::SocketAddr;

use async_trait::async_trait;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream, UdpSocket};

use crate::error::NetworkError;

/// Byte stream carrying one DoIP data connection, plain or secured
pub trait DoipStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> DoipStream for T {}

/// Wraps accepted TCP streams on the TLS port.
///
/// Certificates, keys and cipher suites are the implementor's concern; the
/// simulator only needs a finished secure stream back.
#[async_trait]
pub trait SecureAcceptor: Send + Sync {
    async fn accept(&self, stream: TcpStream) -> io::Result<Box<dyn DoipStream>>;
}

fn domain_of(addr: &SocketAddr) -> Domain {
    match addr {
        SocketAddr::V4(_) => Domain::IPV4,
        SocketAddr::V6(_) => Domain::IPV6,
    }
}

/// TCP listener with address reuse, so a reset entity can rebind its port
pub fn bind_tcp_listener(addr: SocketAddr, kind: &'static str) -> Result<TcpListener, NetworkError> {
    let bind = || -> io::Result<TcpListener> {
        let socket = Socket::new(domain_of(&addr), Type::STREAM, Some(Protocol::TCP))?;
        socket.set_reuse_address(true)?;
        socket.set_nonblocking(true)?;
        socket.bind(&addr.into())?;
        socket.listen(128)?;
        let std_listener: std::net::TcpListener = socket.into();
        TcpListener::from_std(std_listener)
    };
    bind().map_err(|source| NetworkError::Bind { kind, addr, source })
}

/// Broadcast-capable UDP socket for discovery
pub fn bind_udp_socket(addr: SocketAddr) -> Result<UdpSocket, NetworkError> {
    let bind = || -> io::Result<UdpSocket> {
        let socket = Socket::new(domain_of(&addr), Type::DGRAM, Some(Protocol::UDP))?;
        socket.set_reuse_address(true)?;
        if addr.is_ipv4() {
            socket.set_broadcast(true)?;
        }
        socket.set_nonblocking(true)?;
        socket.bind(&addr.into())?;
        let std_socket: std::net::UdpSocket = socket.into();
        UdpSocket::from_std(std_socket)
    };
    bind().map_err(|source| NetworkError::Bind {
        kind: "UDP",
        addr,
        source,
    })
}
