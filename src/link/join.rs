//! Client-side join procedure.
//!
//! A join walks `VersionRequest → MasterNodeRequest → AwaitingPings →
//! Registration → Finished`, each step under a fresh 5-second deadline.
//! The ping-collection step doubles as NAT detection: the join master
//! fires a burst of pings at our public endpoint, and silence inside
//! the window means a NAT swallowed them. Any failure along the way
//! hard-resets every bit of peer state.

use super::{JoinStep, LinkEvent, LinkLayer};
use crate::identity::OverlayIdentity;
use crate::protocol::{
    self, MasterNodeReply, Opcode, Ping, RegisterReply, RegisterRequest, VersionReply,
};
use std::net::{Ipv4Addr, SocketAddrV4};
use std::time::Instant;
use tracing::{debug, error, warn};

impl LinkLayer {
    // === ProtocolVersionRequest ===

    pub(crate) async fn send_protocol_version_request(&mut self, dest: SocketAddrV4) {
        self.send_frame(Opcode::ProtocolVersionRequest, &[], dest).await;
    }

    pub(crate) async fn handle_protocol_version_request(&mut self, payload: &[u8], source: SocketAddrV4) {
        if !self.check_size(payload, 0, source, "ProtocolVersionRequest") {
            return;
        }
        let msg = VersionReply {
            version: protocol::PROTOCOL_VERSION,
        };
        self.send_frame(Opcode::ProtocolVersionReply, &msg.encode(), source).await;
    }

    // === ProtocolVersionReply ===

    pub(crate) async fn handle_protocol_version_reply(&mut self, payload: &[u8], source: SocketAddrV4) {
        let msg = match VersionReply::decode(payload) {
            Ok(m) => m,
            Err(e) => {
                warn!(%source, error = %e, "malformed ProtocolVersionReply packet");
                return;
            }
        };
        if !self.check_join_step(JoinStep::VersionRequest, source, "ProtocolVersionReply") {
            return;
        }

        debug!(version = msg.version, "remote protocol version");
        if msg.version != protocol::PROTOCOL_VERSION {
            error!(
                got = msg.version,
                expected = protocol::PROTOCOL_VERSION,
                "protocol version mismatch"
            );
            self.revert_join();
            self.emit(LinkEvent::JoinFailed);
            return;
        }

        self.join_step = JoinStep::MasterNodeRequest;
        self.send_encrypted(Opcode::MasterNodeRequest, &[], source).await;
        self.arm_join_timer();
    }

    // === MasterNodeReply ===

    pub(crate) async fn handle_master_node_reply(&mut self, payload: &[u8], source: SocketAddrV4) {
        let msg = match MasterNodeReply::decode(payload) {
            Ok(m) => m,
            Err(e) => {
                warn!(%source, error = %e, "malformed MasterNodeReply packet");
                return;
            }
        };
        if !self.check_join_step(JoinStep::MasterNodeRequest, source, "MasterNodeReply") {
            return;
        }

        let master = SocketAddrV4::new(msg.addr, msg.port);
        self.router.wrap(master);
        self.join_master = Some(master);
        debug!(%master, "determined master node");

        if !self.force_behind_nat {
            self.join_step = JoinStep::AwaitingPings;
            self.join_ping = None;
            self.join_pings_emitted = protocol::NAT_PROBE_PINGS;
            self.join_pings_arrived = 0;
            self.ping_deadline = Some(Instant::now() + self.config.timing.ping_timeout());
            self.send_ping_request(source, master, protocol::NAT_PROBE_PINGS as u8)
                .await;
        } else {
            debug!("skipping NAT detection");
            self.join_step = JoinStep::Registration;
            self.send_register_request(master, true).await;
        }

        self.arm_join_timer();
    }

    // === Ping collection ===

    pub(crate) async fn handle_ping(&mut self, payload: &[u8], source: SocketAddrV4) {
        let msg = match Ping::decode(payload) {
            Ok(m) => m,
            Err(e) => {
                warn!(%source, error = %e, "malformed Ping packet");
                return;
            }
        };
        if !self.check_join_step(JoinStep::AwaitingPings, source, "Ping") {
            return;
        }
        if Some(source) != self.join_master {
            warn!(%source, "unexpected ping");
            return;
        }

        self.join_pings_arrived += 1;
        match self.join_ping {
            None => self.join_ping = Some(msg),
            Some(first) if first != msg => {
                error!("got nonidentical pings");
                self.revert_join();
                self.emit(LinkEvent::JoinFailed);
                return;
            }
            Some(_) => {}
        }

        if self.join_pings_arrived == self.join_pings_emitted {
            self.join_got_pinged().await;
        }
    }

    /// The ping window closed. Silence means a NAT ate the burst;
    /// partial arrival still tells us our public endpoint.
    pub(crate) async fn ping_window_elapsed(&mut self) {
        if self.join_pings_arrived == 0 {
            debug!("no pings arrived, NAT is detected");
            let Some(master) = self.join_master else { return };

            self.join_step = JoinStep::Registration;
            debug!(%master, "registering");
            self.send_register_request(master, true).await;
            self.arm_join_timer();
        } else {
            self.join_got_pinged().await;
        }
    }

    async fn join_got_pinged(&mut self) {
        debug!(
            percent = self.join_pings_arrived * 100 / self.join_pings_emitted,
            "pings arrived"
        );
        self.ping_deadline = None;
        self.join_step = JoinStep::Registration;

        let Some(ping) = self.join_ping else { return };
        debug!(
            addr = %ping.addr,
            port = ping.port,
            "no NAT detected, learned real address"
        );

        let Some(master) = self.join_master else { return };
        debug!(%master, "registering");
        self.send_register_request(master, false).await;
        self.arm_join_timer();
    }

    // === Registration (client side) ===

    async fn send_register_request(&mut self, dest: SocketAddrV4, is_behind_nat: bool) {
        let msg = RegisterRequest { is_behind_nat };
        self.send_encrypted(Opcode::RegisterRequest, &msg.encode(), dest).await;
    }

    pub(crate) async fn handle_register_reply(&mut self, payload: &[u8], source: SocketAddrV4) {
        let msg = match RegisterReply::decode(payload) {
            Ok(m) => m,
            Err(e) => {
                warn!(%source, error = %e, "malformed RegisterReply packet");
                return;
            }
        };
        if !self.check_join_step(JoinStep::Registration, source, "RegisterReply") {
            return;
        }

        let (endpoint, behind_nat) = if msg.real_ip != Ipv4Addr::UNSPECIFIED {
            debug!("external endpoint was assigned by NAT passthrough");
            (SocketAddrV4::new(msg.real_ip, msg.real_port), true)
        } else {
            match self.join_ping {
                Some(ping) => (SocketAddrV4::new(ping.addr, ping.port), false),
                None => {
                    warn!(%source, "registration reply carries no endpoint to install");
                    return;
                }
            }
        };

        let host_der = self.host_key.public_der().to_vec();
        let node = self.router.wrap(endpoint);
        if let Err(e) = node.set_auth_key(&host_der) {
            warn!(error = %e, "installing own key failed");
            return;
        }
        // The master's assignment is authoritative over the local
        // derivation (they agree when both sides are honest).
        node.set_identity(OverlayIdentity::from_parts(msg.overlay_ip, msg.overlay_mac));
        node.set_master(msg.is_master);
        node.set_behind_nat(behind_nat);
        self.router.set_self_node(endpoint);

        self.network_divisor = msg.network_divisor;
        debug!(divisor = self.network_divisor, "network divisor adopted");

        self.join_deadline = None;
        self.join_step = JoinStep::Finished;
        if let Some(identity) = self.self_identity() {
            self.emit(LinkEvent::Joined(identity));
        }
    }

    // === Failure reset ===

    /// Hard reset after a failed join: every peer record, queue and
    /// cookie goes away.
    pub(crate) fn revert_join(&mut self) {
        self.router.clear();
        self.awaiting_negotiation.clear();
        self.cookies.clear();
        self.join_step = JoinStep::Idle;
        self.join_master = None;
        self.join_ping = None;
        self.join_pings_emitted = 0;
        self.join_pings_arrived = 0;
        self.join_deadline = None;
        self.ping_deadline = None;
    }
}
