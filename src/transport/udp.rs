//! UDP packet transport.
//!
//! One socket serves every peer; datagrams are matched to peers by
//! source endpoint at the link layer.

use super::{PacketTx, ReceivedPacket, TransportError};
use std::net::{SocketAddr, SocketAddrV4};
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Largest datagram the receive loop will accept.
const RECV_BUFFER_SIZE: usize = 65536;

/// Connectionless UDP transport for the overlay control and data plane.
pub struct UdpPacketTransport {
    bind_addr: SocketAddrV4,
    socket: Option<Arc<UdpSocket>>,
    packet_tx: PacketTx,
    recv_task: Option<JoinHandle<()>>,
    local_port: Option<u16>,
}

impl UdpPacketTransport {
    /// Create a transport bound to nothing yet.
    pub fn new(bind_addr: SocketAddrV4, packet_tx: PacketTx) -> Self {
        Self {
            bind_addr,
            socket: None,
            packet_tx,
            recv_task: None,
            local_port: None,
        }
    }

    /// Local UDP port (only valid after start).
    pub fn local_port(&self) -> Option<u16> {
        self.local_port
    }

    pub fn is_started(&self) -> bool {
        self.socket.is_some()
    }

    /// Bind the socket and spawn the receive loop.
    pub async fn start(&mut self) -> Result<(), TransportError> {
        if self.socket.is_some() {
            return Err(TransportError::AlreadyStarted);
        }

        let socket = UdpSocket::bind(self.bind_addr)
            .await
            .map_err(|e| TransportError::BindFailed(format!("{}: {}", self.bind_addr, e)))?;

        let local_addr = socket
            .local_addr()
            .map_err(|e| TransportError::BindFailed(e.to_string()))?;
        self.local_port = Some(local_addr.port());

        let socket = Arc::new(socket);
        self.socket = Some(socket.clone());

        let packet_tx = self.packet_tx.clone();
        self.recv_task = Some(tokio::spawn(async move {
            udp_receive_loop(socket, packet_tx).await;
        }));

        info!(local_addr = %local_addr, "UDP transport started");
        Ok(())
    }

    /// Stop the receive loop and drop the socket.
    pub async fn stop(&mut self) -> Result<(), TransportError> {
        if self.socket.is_none() {
            return Err(TransportError::NotStarted);
        }

        if let Some(task) = self.recv_task.take() {
            task.abort();
            let _ = task.await;
        }
        self.socket.take();
        self.local_port = None;

        debug!("UDP transport stopped");
        Ok(())
    }

    /// Send a datagram, best-effort.
    pub async fn send(&self, data: &[u8], dest: SocketAddrV4) -> Result<usize, TransportError> {
        let socket = self.socket.as_ref().ok_or(TransportError::NotStarted)?;
        socket
            .send_to(data, SocketAddr::V4(dest))
            .await
            .map_err(|e| TransportError::SendFailed(format!("{}: {}", dest, e)))
    }
}

/// Receive loop, spawned per transport. Non-IPv4 sources are ignored;
/// the overlay addresses peers by IPv4 endpoint only.
async fn udp_receive_loop(socket: Arc<UdpSocket>, packet_tx: PacketTx) {
    let mut buf = vec![0u8; RECV_BUFFER_SIZE];

    debug!("UDP receive loop starting");

    loop {
        match socket.recv_from(&mut buf).await {
            Ok((len, SocketAddr::V4(source))) => {
                let packet = ReceivedPacket {
                    data: buf[..len].to_vec(),
                    source,
                };
                if packet_tx.send(packet).await.is_err() {
                    info!("packet channel closed, stopping receive loop");
                    break;
                }
            }
            Ok((len, source)) => {
                debug!(%source, bytes = len, "dropping non-IPv4 datagram");
            }
            Err(e) => {
                // Transient receive errors are expected; keep going.
                warn!(error = %e, "UDP receive error");
            }
        }
    }

    debug!("UDP receive loop stopped");
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::packet_channel;
    use std::net::Ipv4Addr;
    use tokio::time::{timeout, Duration};

    fn loopback() -> SocketAddrV4 {
        SocketAddrV4::new(Ipv4Addr::LOCALHOST, 0)
    }

    #[tokio::test]
    async fn test_start_stop() {
        let (tx, _rx) = packet_channel(16);
        let mut transport = UdpPacketTransport::new(loopback(), tx);

        assert!(!transport.is_started());
        transport.start().await.unwrap();
        assert!(transport.is_started());
        assert!(transport.local_port().unwrap() != 0);

        transport.stop().await.unwrap();
        assert!(!transport.is_started());
    }

    #[tokio::test]
    async fn test_double_start_fails() {
        let (tx, _rx) = packet_channel(16);
        let mut transport = UdpPacketTransport::new(loopback(), tx);

        transport.start().await.unwrap();
        assert!(matches!(
            transport.start().await,
            Err(TransportError::AlreadyStarted)
        ));
        transport.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_send_not_started() {
        let (tx, _rx) = packet_channel(16);
        let transport = UdpPacketTransport::new(loopback(), tx);

        let dest = SocketAddrV4::new(Ipv4Addr::LOCALHOST, 9);
        assert!(matches!(
            transport.send(b"x", dest).await,
            Err(TransportError::NotStarted)
        ));
    }

    #[tokio::test]
    async fn test_send_recv() {
        let (tx1, _rx1) = packet_channel(16);
        let (tx2, mut rx2) = packet_channel(16);

        let mut t1 = UdpPacketTransport::new(loopback(), tx1);
        let mut t2 = UdpPacketTransport::new(loopback(), tx2);
        t1.start().await.unwrap();
        t2.start().await.unwrap();

        let dest = SocketAddrV4::new(Ipv4Addr::LOCALHOST, t2.local_port().unwrap());
        let sent = t1.send(b"hello overlay", dest).await.unwrap();
        assert_eq!(sent, 13);

        let packet = timeout(Duration::from_secs(1), rx2.recv())
            .await
            .expect("timeout")
            .expect("channel closed");

        assert_eq!(packet.data, b"hello overlay");
        assert_eq!(packet.source.port(), t1.local_port().unwrap());

        t1.stop().await.unwrap();
        t2.stop().await.unwrap();
    }
}
