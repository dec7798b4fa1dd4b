//! Packet transport.
//!
//! The overlay runs over a single UDP socket. The transport delivers
//! received datagrams with their source endpoint into a channel owned by
//! the link layer and exposes a best-effort send. Send failures are
//! logged by callers, never retried at this layer.

pub mod udp;

use std::net::SocketAddrV4;
use thiserror::Error;
use tokio::sync::mpsc;

pub use udp::UdpPacketTransport;

/// Errors related to transport operations.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport already started")]
    AlreadyStarted,

    #[error("transport not started")]
    NotStarted,

    #[error("bind failed: {0}")]
    BindFailed(String),

    #[error("send failed: {0}")]
    SendFailed(String),
}

/// A datagram delivered by the transport.
#[derive(Clone, Debug)]
pub struct ReceivedPacket {
    /// Raw datagram payload.
    pub data: Vec<u8>,
    /// Source endpoint the datagram arrived from.
    pub source: SocketAddrV4,
}

/// Sender half of the transport-to-link packet channel.
pub type PacketTx = mpsc::Sender<ReceivedPacket>;

/// Receiver half of the transport-to-link packet channel.
pub type PacketRx = mpsc::Receiver<ReceivedPacket>;

/// Create a bounded packet channel.
pub fn packet_channel(capacity: usize) -> (PacketTx, PacketRx) {
    mpsc::channel(capacity)
}
