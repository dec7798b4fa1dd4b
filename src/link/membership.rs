//! Master-side admission: answering master queries and registering new
//! members.
//!
//! Registration is where roles are decided. The overlay targets at
//! least `1/divisor` of its nodes as masters, compared with integer
//! cross-multiplication so no float rounding can flip a decision.
//! Peers behind NAT are never promoted.

use super::LinkLayer;
use crate::protocol::{MasterNodeReply, Opcode, RegisterReply, RegisterRequest};
use std::net::{Ipv4Addr, SocketAddrV4};
use tracing::{debug, error, warn};

impl LinkLayer {
    // === MasterNodeRequest ===

    pub(crate) async fn handle_master_node_request(&mut self, payload: &[u8], source: SocketAddrV4) {
        if !self.check_size(payload, 0, source, "MasterNodeRequest") {
            return;
        }

        // Scatter joiners over the whole master set.
        let Some(master) = self.router.select_master() else {
            error!("cannot choose a master, this is probably a bug");
            return;
        };

        let msg = MasterNodeReply {
            addr: *master.ip(),
            port: master.port(),
        };
        self.send_encrypted(Opcode::MasterNodeReply, &msg.encode(), source).await;
    }

    // === RegisterRequest ===

    pub(crate) async fn handle_register_request(&mut self, payload: &[u8], source: SocketAddrV4) {
        let msg = match RegisterRequest::decode(payload) {
            Ok(m) => m,
            Err(e) => {
                warn!(%source, error = %e, "malformed RegisterRequest packet");
                return;
            }
        };
        if !self.router.is_master() {
            warn!(%source, "got RegisterRequest while not master");
            return;
        }
        if self.router.node(&source).and_then(|n| n.identity()).is_none() {
            warn!(%source, "registration without a completed key exchange");
            return;
        }

        let promote = self.decide_role(msg.is_behind_nat);
        {
            let node = self.router.wrap(source);
            node.set_behind_nat(msg.is_behind_nat);
            node.set_master(promote);
        }

        // New masters learn every member; new slaves only the masters.
        // Reciprocal routes introduce the newcomer to each of them.
        let updates = if promote {
            self.router.others()
        } else {
            self.router.other_masters()
        };
        for update in updates {
            self.send_route(source, update).await;
            self.send_route(update, source).await;
        }
        if let Some(self_endpoint) = self.router.self_endpoint() {
            self.send_route(source, self_endpoint).await;
        }

        self.router.register(source);
        self.send_register_reply(source).await;
    }

    /// Master-ratio election: promote while the master share would
    /// otherwise fall under `1/divisor`, and always promote the second
    /// master. NAT'd peers stay slaves.
    fn decide_role(&self, is_behind_nat: bool) -> bool {
        if is_behind_nat {
            return false;
        }
        let masters = self.router.master_count();
        let total = self.router.node_count();
        if masters == 1 {
            return true;
        }
        let promote = masters * (self.network_divisor as usize) < total + 1;
        if promote {
            debug!(masters, total, divisor = self.network_divisor, "insufficient masters, adding one");
        }
        promote
    }

    async fn send_register_reply(&mut self, dest: SocketAddrV4) {
        let Some(node) = self.router.node(&dest) else { return };
        let Some(identity) = node.identity().copied() else {
            warn!(%dest, "no identity to register");
            return;
        };
        let (real_ip, real_port) = if node.is_behind_nat() {
            (node.real_ip(), node.real_port())
        } else {
            (Ipv4Addr::UNSPECIFIED, 0)
        };
        let msg = RegisterReply {
            overlay_ip: identity.ip(),
            overlay_mac: *identity.mac().as_bytes(),
            real_ip,
            real_port,
            is_master: node.is_master(),
            network_divisor: self.network_divisor,
        };
        self.send_encrypted(Opcode::RegisterReply, &msg.encode(), dest).await;
    }
}
