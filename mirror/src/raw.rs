//! Raw-socket transmission of fully formed IPv4 datagrams.

use std::net::{Ipv4Addr, SocketAddrV4};

use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransmitError {
    #[error("raw send failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("short send: {sent} of {len} bytes")]
    Partial { sent: usize, len: usize },
}

/// Sends one complete datagram toward a destination address.
///
/// The seam exists so the relay can be exercised in tests with a recording
/// transmitter instead of a privileged raw socket.
pub trait Transmit: Send + Sync {
    fn transmit(&self, datagram: &[u8], dst: Ipv4Addr) -> Result<(), TransmitError>;
}

/// The one shared raw socket all replicated transmissions go through.
///
/// IPPROTO_RAW implies IP_HDRINCL: the kernel sends the caller-supplied
/// header unmodified, which is what lets the source endpoint be forged.
pub struct RawSender {
    socket: Socket,
}

impl RawSender {
    /// Opening a raw socket requires root or CAP_NET_RAW; a permission
    /// failure here is a deployment problem, surfaced as-is.
    pub fn open() -> std::io::Result<Self> {
        let socket = Socket::new(Domain::IPV4, Type::RAW, Some(Protocol::from(libc::IPPROTO_RAW)))?;
        Ok(Self { socket })
    }
}

impl Transmit for RawSender {
    fn transmit(&self, datagram: &[u8], dst: Ipv4Addr) -> Result<(), TransmitError> {
        // The port is carried inside the datagram; the raw destination only
        // routes the packet.
        let dst = SockAddr::from(SocketAddrV4::new(dst, 0));
        let sent = self.socket.send_to(datagram, &dst)?;
        if sent != datagram.len() {
            return Err(TransmitError::Partial {
                sent,
                len: datagram.len(),
            });
        }
        Ok(())
    }
}
