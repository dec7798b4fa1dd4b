//! Role maintenance and graceful departure.
//!
//! A leaving node tells one master; that master withdraws its routes
//! everywhere and re-balances the master ratio, promoting a slave if
//! the departure left the overlay short. A departing last master
//! promotes a successor itself before going away.

use super::{JoinStep, LinkEvent, LinkLayer};
use crate::protocol::{Opcode, RoleUpdate};
use std::net::SocketAddrV4;
use tracing::{debug, info, warn};

impl LinkLayer {
    // === RoleUpdate ===

    pub(crate) async fn send_role_update(&mut self, dest: SocketAddrV4, is_master_now: bool) {
        let msg = RoleUpdate { is_master_now };
        self.send_encrypted(Opcode::RoleUpdate, &msg.encode(), dest).await;
    }

    pub(crate) fn handle_role_update(&mut self, payload: &[u8], source: SocketAddrV4) {
        let msg = match RoleUpdate::decode(payload) {
            Ok(m) => m,
            Err(e) => {
                warn!(%source, error = %e, "malformed RoleUpdate packet");
                return;
            }
        };

        let sender_is_master = self.router.node(&source).is_some_and(|n| n.is_master());
        if !sender_is_master {
            warn!(%source, "RoleUpdate from a slave, dropping");
            return;
        }
        let Some(self_node) = self.router.self_node_mut() else {
            warn!(%source, "RoleUpdate before registration, dropping");
            return;
        };

        info!(
            commanded_by = %source,
            role = if msg.is_master_now { "master" } else { "slave" },
            "switching role"
        );
        self_node.set_master(msg.is_master_now);
    }

    // === ExitNotification ===

    pub(crate) async fn handle_exit_notification(&mut self, payload: &[u8], source: SocketAddrV4) {
        if !self.check_size(payload, 0, source, "ExitNotification") {
            return;
        }
        if !self.router.is_master() {
            warn!(%source, "ExitNotification received, but i am slave");
            return;
        }

        info!(%source, "peer is leaving the network");
        self.router.evict(&source);
        self.awaiting_negotiation.remove(&source);
        self.cookies.retain(|_, target| *target != source);

        for member in self.router.others() {
            self.send_route_invalidate(member, source).await;
        }

        let masters = self.router.master_count();
        let total = self.router.node_count();
        if masters == 1 || masters * (self.network_divisor as usize) < total {
            debug!(masters, total, "insufficient masters after exit");
            self.reincarnate_someone().await;
        }
    }

    // === Reincarnation ===

    /// Promote an eligible slave to master and introduce it to every
    /// remaining slave with reciprocal routes.
    pub(crate) async fn reincarnate_someone(&mut self) {
        if self.router.node_count() == 1 {
            warn!("there are no nodes to reincarnate");
            return;
        }
        let Some(target) = self.router.select_reincarnation_target() else {
            warn!("no slave is eligible for reincarnation");
            return;
        };
        debug!(%target, "selected reincarnation target");

        self.router.wrap(target).set_master(true);

        let others = self.router.others();
        for member in others {
            if member == target {
                continue;
            }
            let is_master = self
                .router
                .node(&member)
                .is_some_and(|n| n.is_master());
            if is_master {
                continue;
            }
            self.send_route(member, target).await;
            self.send_route(target, member).await;
        }

        self.send_role_update(target, true).await;
    }

    // === Graceful exit ===

    /// Leave the overlay. A last master reincarnates a successor first;
    /// the chosen master is then told so our routes are withdrawn.
    /// Shutdown readiness is signalled once in-flight negotiations have
    /// drained (or timed out).
    pub async fn exit_network(&mut self) {
        if self.join_step != JoinStep::Finished {
            debug!("join isn't finished, skipping finalization");
            self.emit(LinkEvent::ReadyForShutdown);
            return;
        }

        if self.router.is_master() && self.router.master_count() == 1 {
            debug!("i'm the last master");
            self.reincarnate_someone().await;
        }

        let selected = self.router.select_master();
        let notify = selected.filter(|m| Some(*m) != self.router.self_endpoint());
        if let Some(master) = notify {
            debug!(%master, "sending exit notification");
            self.send_encrypted(Opcode::ExitNotification, &[], master).await;
        }

        if self.awaiting_negotiation.is_empty() {
            self.emit(LinkEvent::ReadyForShutdown);
        } else {
            debug!(
                pending = self.awaiting_negotiation.len(),
                "waiting for negotiations to drain before shutdown"
            );
            self.preparing_for_shutdown = true;
        }
    }
}
