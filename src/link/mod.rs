//! Link layer: the peer-to-peer control plane.
//!
//! Owns every piece of overlay state (the router, the cookie table,
//! the set of peers mid-handshake, the join state machine) and drives
//! it from a single task: packets arrive over the transport channel,
//! deadlines fire on a periodic tick, and handlers run to completion
//! without preemption.
//!
//! Outbound encrypted traffic passes through the handshake gate: frames
//! for a peer without negotiated session keys are queued on its record
//! and a public-key exchange is started; the queue drains the moment
//! both directional keys exist.

mod dispatch;
mod exit;
mod gossip;
mod handshake;
mod join;
mod membership;
mod nat;
#[cfg(test)]
mod tests;

use crate::config::Config;
use crate::crypto::{CryptoError, RsaKeyPair};
use crate::identity::OverlayIdentity;
use crate::protocol::{self, Opcode};
use crate::router::Router;
use crate::transport::{packet_channel, PacketRx, TransportError, UdpPacketTransport};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::time::Instant;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Capacity of the transport-to-link packet channel.
const PACKET_CHANNEL_CAPACITY: usize = 256;

/// Errors surfaced by link-layer entry points.
///
/// Packet handlers never return these; malformed or unexpected traffic
/// is logged and dropped without touching state.
#[derive(Debug, Error)]
pub enum LinkError {
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("not a member of a network")]
    NotJoined,

    #[error("already joined or joining a network")]
    AlreadyJoined,
}

/// Progress of the client-side join procedure.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JoinStep {
    /// Not joining and not joined.
    Idle,
    /// Waiting for the bootstrap node's protocol version.
    VersionRequest,
    /// Waiting to be pointed at a master.
    MasterNodeRequest,
    /// Collecting NAT-probe pings from the join master.
    AwaitingPings,
    /// Waiting for the master's registration reply.
    Registration,
    /// Member of the overlay.
    Finished,
}

impl fmt::Display for JoinStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            JoinStep::Idle => "idle",
            JoinStep::VersionRequest => "version-request",
            JoinStep::MasterNodeRequest => "master-node-request",
            JoinStep::AwaitingPings => "awaiting-pings",
            JoinStep::Registration => "registration",
            JoinStep::Finished => "finished",
        };
        write!(f, "{}", name)
    }
}

/// This node's own overlay membership, as reported on join.
#[derive(Clone, Copy, Debug)]
pub struct SelfIdentity {
    pub endpoint: SocketAddrV4,
    pub overlay: OverlayIdentity,
    pub is_master: bool,
    pub is_behind_nat: bool,
}

/// Events emitted by the link layer.
#[derive(Clone, Debug)]
pub enum LinkEvent {
    /// The node became a member (created a network or finished a join).
    Joined(SelfIdentity),
    /// A join attempt failed; all peer state was reverted.
    JoinFailed,
    /// Pending negotiations have drained; safe to drop the process.
    ReadyForShutdown,
    /// A decrypted data frame for the application layer.
    Data {
        source: SocketAddrV4,
        overlay_ip: Option<Ipv4Addr>,
        payload: Vec<u8>,
    },
}

/// Sender half for link events, registered at construction.
pub type LinkEventTx = mpsc::UnboundedSender<LinkEvent>;

/// Receiver half for link events.
pub type LinkEventRx = mpsc::UnboundedReceiver<LinkEvent>;

/// Create an event channel for a link layer.
pub fn event_channel() -> (LinkEventTx, LinkEventRx) {
    mpsc::unbounded_channel()
}

/// The protocol state machine driving one overlay node.
pub struct LinkLayer {
    config: Config,
    host_key: RsaKeyPair,
    router: Router,
    transport: UdpPacketTransport,
    packet_rx: Option<PacketRx>,
    events: LinkEventTx,

    /// Correlates the two legs of a public-key exchange.
    cookies: HashMap<u32, SocketAddrV4>,
    /// Peers with a handshake in flight.
    awaiting_negotiation: HashSet<SocketAddrV4>,

    network_divisor: u8,

    join_step: JoinStep,
    join_master: Option<SocketAddrV4>,
    force_behind_nat: bool,
    join_ping: Option<protocol::Ping>,
    join_pings_emitted: u32,
    join_pings_arrived: u32,
    join_deadline: Option<Instant>,
    ping_deadline: Option<Instant>,

    preparing_for_shutdown: bool,
    shutdown_complete: bool,
}

impl LinkLayer {
    /// Create a link layer. The transport is not bound until a network
    /// is created or joined.
    pub fn new(config: Config, host_key: RsaKeyPair, events: LinkEventTx) -> Self {
        let (packet_tx, packet_rx) = packet_channel(PACKET_CHANNEL_CAPACITY);
        let bind = SocketAddrV4::new(config.node.bind, config.node.port);
        let transport = UdpPacketTransport::new(bind, packet_tx);
        let network_divisor = config.node.network_divisor;

        Self {
            config,
            host_key,
            router: Router::new(),
            transport,
            packet_rx: Some(packet_rx),
            events,
            cookies: HashMap::new(),
            awaiting_negotiation: HashSet::new(),
            network_divisor,
            join_step: JoinStep::Idle,
            join_master: None,
            force_behind_nat: false,
            join_ping: None,
            join_pings_emitted: 0,
            join_pings_arrived: 0,
            join_deadline: None,
            ping_deadline: None,
            preparing_for_shutdown: false,
            shutdown_complete: false,
        }
    }

    // === Accessors ===

    pub fn router(&self) -> &Router {
        &self.router
    }

    pub fn join_step(&self) -> JoinStep {
        self.join_step
    }

    pub fn is_master(&self) -> bool {
        self.router.is_master()
    }

    pub fn network_divisor(&self) -> u8 {
        self.network_divisor
    }

    /// Local UDP port, once the transport is up.
    pub fn local_port(&self) -> Option<u16> {
        self.transport.local_port()
    }

    fn self_identity(&self) -> Option<SelfIdentity> {
        let node = self.router.self_node()?;
        Some(SelfIdentity {
            endpoint: node.endpoint(),
            overlay: *node.identity()?,
            is_master: node.is_master(),
            is_behind_nat: node.is_behind_nat(),
        })
    }

    fn emit(&mut self, event: LinkEvent) {
        if matches!(event, LinkEvent::ReadyForShutdown) {
            self.shutdown_complete = true;
        }
        // A dropped receiver just means nobody is listening anymore.
        let _ = self.events.send(event);
    }

    // === Bring-up ===

    async fn init_transport(&mut self) -> Result<(), LinkError> {
        if self.transport.is_started() {
            return Ok(());
        }
        self.transport.start().await?;
        debug!(
            port = self.transport.local_port().unwrap_or(0),
            "transport initiated"
        );
        Ok(())
    }

    /// Create a fresh overlay with this node as its first master.
    ///
    /// `local_ip` is the address other nodes will reach us at.
    pub async fn create_network(&mut self, local_ip: Ipv4Addr) -> Result<(), LinkError> {
        if self.join_step != JoinStep::Idle {
            return Err(LinkError::AlreadyJoined);
        }
        self.init_transport().await?;

        let port = self
            .transport
            .local_port()
            .ok_or(TransportError::NotStarted)?;
        let endpoint = SocketAddrV4::new(local_ip, port);

        let node = self.router.wrap(endpoint);
        node.set_master(true);
        node.set_auth_key(self.host_key.public_der())?;
        self.router.set_self_node(endpoint);

        info!(%endpoint, divisor = self.network_divisor, "created network");

        self.join_step = JoinStep::Finished;
        if let Some(identity) = self.self_identity() {
            self.emit(LinkEvent::Joined(identity));
        }
        Ok(())
    }

    /// Join an existing overlay through a bootstrap endpoint.
    pub async fn join_network(
        &mut self,
        bootstrap: SocketAddrV4,
        force_behind_nat: bool,
    ) -> Result<(), LinkError> {
        if self.join_step != JoinStep::Idle {
            return Err(LinkError::AlreadyJoined);
        }
        self.init_transport().await?;

        info!(%bootstrap, "joining network");

        self.force_behind_nat = force_behind_nat;
        self.join_step = JoinStep::VersionRequest;
        self.send_protocol_version_request(bootstrap).await;
        self.arm_join_timer();
        Ok(())
    }

    fn arm_join_timer(&mut self) {
        self.join_deadline = Some(Instant::now() + self.config.timing.join_timeout());
    }

    // === Event loop ===

    /// Run the receive loop until shutdown completes or the transport
    /// channel closes. The periodic tick drives every deadline.
    pub async fn run(&mut self) {
        let mut packet_rx = match self.packet_rx.take() {
            Some(rx) => rx,
            None => return,
        };
        let mut tick = tokio::time::interval(self.config.timing.tick_interval());

        loop {
            if self.shutdown_complete {
                break;
            }
            tokio::select! {
                packet = packet_rx.recv() => {
                    match packet {
                        Some(p) => self.process_datagram(&p.data, p.source).await,
                        None => break,
                    }
                }
                _ = tick.tick() => {
                    self.check_timers().await;
                }
            }
        }

        self.packet_rx = Some(packet_rx);
    }

    /// Fire any expired deadline: the NAT-probe window, the join step
    /// timer, and per-peer negotiation timers.
    pub async fn check_timers(&mut self) {
        let now = Instant::now();

        if self.join_step == JoinStep::AwaitingPings
            && self.ping_deadline.is_some_and(|d| now >= d)
        {
            self.ping_deadline = None;
            self.ping_window_elapsed().await;
        }

        if !matches!(self.join_step, JoinStep::Idle | JoinStep::Finished)
            && self.join_deadline.is_some_and(|d| now >= d)
        {
            error!(step = %self.join_step, "join timed out");
            self.revert_join();
            self.emit(LinkEvent::JoinFailed);
        }

        let expired: Vec<SocketAddrV4> = self
            .awaiting_negotiation
            .iter()
            .copied()
            .filter(|ep| {
                self.router
                    .node(ep)
                    .is_some_and(|n| n.negotiation_expired(now))
            })
            .collect();
        for endpoint in expired {
            self.negotiation_timed_out(endpoint);
        }
    }

    // === Sending ===

    /// Frame and transmit a plaintext packet. Sending to self is a bug
    /// upstream and is suppressed.
    pub(crate) async fn send_frame(&self, opcode: Opcode, payload: &[u8], dest: SocketAddrV4) {
        if self.router.self_endpoint() == Some(dest) {
            error!(%opcode, "attempted to send packet to self, dropping");
            return;
        }
        let framed = protocol::frame(opcode, payload);
        if let Err(e) = self.transport.send(&framed, dest).await {
            warn!(%dest, %opcode, error = %e, "transport send failed");
        }
    }

    /// The encrypted-send gate. Frames for peers without negotiated
    /// keys queue on the peer record and kick off a handshake.
    pub(crate) async fn send_encrypted(&mut self, opcode: Opcode, payload: &[u8], dest: SocketAddrV4) {
        if self.router.self_endpoint() == Some(dest) {
            error!(%opcode, "attempted to send encrypted packet to self, dropping");
            return;
        }
        let framed = protocol::frame(opcode, payload);

        if self.router.wrap(dest).keys_negotiated() {
            self.encrypt_and_send(&framed, dest).await;
            return;
        }

        self.router.wrap(dest).push_queue(framed);
        if self.awaiting_negotiation.contains(&dest) {
            debug!(dest = %dest, "still awaiting negotiation, queued");
        } else {
            debug!(dest = %dest, "initiating negotiation");
            let deadline = Instant::now() + self.config.timing.negotiation_timeout();
            self.router.wrap(dest).start_negotiation(deadline);
            self.awaiting_negotiation.insert(dest);
            self.send_public_key_exchange(dest, true, 0).await;
        }
    }

    /// Cipher and transmit an already-framed packet. Keys must be
    /// negotiated; the gate guarantees it.
    pub(crate) async fn encrypt_and_send(&self, framed: &[u8], dest: SocketAddrV4) {
        let ciphertext = match self.router.node(&dest).and_then(|n| n.my_session_key()) {
            Some(key) => key.encrypt(framed),
            None => {
                error!(%dest, "encrypted send without negotiated keys, dropping");
                return;
            }
        };
        self.send_frame(Opcode::EncryptedPacket, &ciphertext, dest).await;
    }

    // === Data plane ===

    /// Send an application frame to an overlay address.
    ///
    /// Unknown destinations trigger a route query to a master and the
    /// frame is dropped; retries are the application's concern.
    pub async fn send_data(&mut self, payload: &[u8], dest: Ipv4Addr) -> Result<(), LinkError> {
        if self.join_step != JoinStep::Finished {
            return Err(LinkError::NotJoined);
        }
        match self.router.find_by_overlay_ip(dest) {
            Some(endpoint) => {
                self.send_encrypted(Opcode::DataPacket, payload, endpoint).await;
            }
            None => {
                info!(%dest, "no route to overlay address, querying a master");
                self.send_route_request(dest).await;
            }
        }
        Ok(())
    }
}

impl fmt::Debug for LinkLayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LinkLayer")
            .field("join_step", &self.join_step)
            .field("nodes", &self.router.node_count())
            .field("spool", &self.router.spool_len())
            .field("awaiting_negotiation", &self.awaiting_negotiation.len())
            .field("cookies", &self.cookies.len())
            .finish()
    }
}
