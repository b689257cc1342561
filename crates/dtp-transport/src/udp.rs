//! Thin UDP-backed implementation of the sender/receiver I/O boundary.
//!
//! Exists only so the simulation harness and CLI binaries have something
//! concrete to hand to [`crate::sender::Sender`] and drive
//! [`crate::receiver::Receiver`] with; none of the core logic depends on it.

use std::io;
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use std::time::Duration;

use crate::sender::DatagramSink;

/// Read timeout used so the receive loop can periodically check a shutdown
/// flag instead of blocking forever in `recv_from`.
const READ_TIMEOUT: Duration = Duration::from_millis(100);

/// Blocking `std::net::UdpSocket` wrapper satisfying [`DatagramSink`].
pub struct UdpTransport {
    socket: UdpSocket,
}

impl UdpTransport {
    pub fn bind(addr: impl ToSocketAddrs) -> io::Result<Self> {
        let socket = UdpSocket::bind(addr)?;
        socket.set_read_timeout(Some(READ_TIMEOUT))?;
        Ok(UdpTransport { socket })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Receive one datagram, distinguishing "nothing arrived within the read
    /// timeout" (`Ok(None)`) from a real socket error.
    pub fn recv(&self, buf: &mut [u8]) -> io::Result<Option<(usize, SocketAddr)>> {
        match self.socket.recv_from(buf) {
            Ok((n, from)) => Ok(Some((n, from))),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock || e.kind() == io::ErrorKind::TimedOut => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub fn try_clone(&self) -> io::Result<Self> {
        Ok(UdpTransport { socket: self.socket.try_clone()? })
    }
}

impl DatagramSink for UdpTransport {
    fn send_to(&self, data: &[u8], dest: SocketAddr) -> io::Result<()> {
        self.socket.send_to(data, dest)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{Packet, Priority};
    use bytes::Bytes;

    #[test]
    fn roundtrips_a_packet_over_loopback() {
        let server = UdpTransport::bind("127.0.0.1:0").unwrap();
        let server_addr = server.local_addr().unwrap();
        let client = UdpTransport::bind("127.0.0.1:0").unwrap();

        let packet = Packet::create_data(Bytes::from_static(b"hello"), Priority::High, 1, Some(2000));
        client.send_to(&packet.serialize(), server_addr).unwrap();

        let mut buf = [0u8; 1500];
        let (n, _from) = server
            .recv(&mut buf)
            .unwrap()
            .expect("datagram should arrive within the read timeout");
        let decoded = Packet::deserialize(&buf[..n]).unwrap();
        assert_eq!(decoded.header.sequence, 1);
        assert_eq!(decoded.payload.as_ref(), b"hello");
    }

    #[test]
    fn recv_times_out_cleanly_when_nothing_arrives() {
        let server = UdpTransport::bind("127.0.0.1:0").unwrap();
        let mut buf = [0u8; 64];
        assert!(server.recv(&mut buf).unwrap().is_none());
    }
}
