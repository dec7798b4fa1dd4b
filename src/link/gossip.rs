//! Routing gossip: route announcements, lookups, invalidation and the
//! introduce announcement slaves make after dialing a peer.
//!
//! Routes are accepted only from masters, or from anyone while the
//! join is still in flight and there is no self node yet, which is how
//! a joiner bootstraps its table.

use super::LinkLayer;
use crate::identity::OverlayIdentity;
use crate::protocol::{Introduce, Opcode, Route, RouteAddress, RouteInvalidate};
use std::net::{Ipv4Addr, SocketAddrV4};
use tracing::{debug, info, warn};

impl LinkLayer {
    // === Route ===

    /// Tell `dest` how to reach `target`.
    pub(crate) async fn send_route(&mut self, dest: SocketAddrV4, target: SocketAddrV4) {
        let msg = {
            let Some(node) = self.router.node(&target) else {
                warn!(%target, "no record to build a route from");
                return;
            };
            let Some(identity) = node.identity() else {
                warn!(%target, "no overlay identity to build a route from");
                return;
            };
            Route {
                real_ip: node.real_ip(),
                real_port: node.real_port(),
                overlay_ip: identity.ip(),
                overlay_mac: *identity.mac().as_bytes(),
                is_master: node.is_master(),
                is_behind_nat: node.is_behind_nat(),
            }
        };
        self.send_encrypted(Opcode::Route, &msg.encode(), dest).await;
    }

    pub(crate) async fn handle_route(&mut self, payload: &[u8], source: SocketAddrV4) {
        let msg = match Route::decode(payload) {
            Ok(m) => m,
            Err(e) => {
                warn!(%source, error = %e, "malformed Route packet");
                return;
            }
        };

        let sender_is_master = self.router.node(&source).is_some_and(|n| n.is_master());
        if !sender_is_master && self.router.self_endpoint().is_some() {
            warn!(%source, "Route packet from unauthoritative source");
            return;
        }

        let target = SocketAddrV4::new(msg.real_ip, msg.real_port);
        if Some(target) == self.router.self_endpoint() {
            warn!(%source, "attempt to add myself by Route packet");
            return;
        }

        debug!(%source, %target, overlay_ip = %msg.overlay_ip, "route received");

        let node = self.router.wrap(target);
        node.set_identity(OverlayIdentity::from_parts(msg.overlay_ip, msg.overlay_mac));
        node.set_master(msg.is_master);
        node.set_behind_nat(msg.is_behind_nat);
        self.router.register(target);
    }

    // === RouteRequest / RouteMissing ===

    /// Ask a master to resolve an overlay address.
    pub(crate) async fn send_route_request(&mut self, overlay_ip: Ipv4Addr) {
        let Some(master) = self.router.select_master() else {
            warn!(%overlay_ip, "no master to query for a route");
            return;
        };
        let msg = RouteAddress { overlay_ip };
        self.send_encrypted(Opcode::RouteRequest, &msg.encode(), master).await;
    }

    pub(crate) async fn handle_route_request(&mut self, payload: &[u8], source: SocketAddrV4) {
        let msg = match RouteAddress::decode(payload) {
            Ok(m) => m,
            Err(e) => {
                warn!(%source, error = %e, "malformed RouteRequest packet");
                return;
            }
        };
        if !self.router.is_master() {
            warn!(%source, "i'm slave and got a route request");
            return;
        }

        match self.router.find_by_overlay_ip(msg.overlay_ip) {
            Some(target) => {
                self.send_route(source, target).await;
            }
            None => {
                let missing = RouteAddress {
                    overlay_ip: msg.overlay_ip,
                };
                self.send_encrypted(Opcode::RouteMissing, &missing.encode(), source).await;
            }
        }
    }

    pub(crate) fn handle_route_missing(&mut self, payload: &[u8], source: SocketAddrV4) {
        let msg = match RouteAddress::decode(payload) {
            Ok(m) => m,
            Err(e) => {
                warn!(%source, error = %e, "malformed RouteMissing packet");
                return;
            }
        };
        info!(overlay_ip = %msg.overlay_ip, "no route to overlay address");
    }

    // === RouteInvalidate ===

    pub(crate) async fn send_route_invalidate(&mut self, dest: SocketAddrV4, target: SocketAddrV4) {
        let msg = RouteInvalidate {
            real_ip: *target.ip(),
            real_port: target.port(),
        };
        self.send_encrypted(Opcode::RouteInvalidate, &msg.encode(), dest).await;
    }

    pub(crate) fn handle_route_invalidate(&mut self, payload: &[u8], source: SocketAddrV4) {
        let msg = match RouteInvalidate::decode(payload) {
            Ok(m) => m,
            Err(e) => {
                warn!(%source, error = %e, "malformed RouteInvalidate packet");
                return;
            }
        };
        let target = SocketAddrV4::new(msg.real_ip, msg.real_port);
        debug!(%target, commanded_by = %source, "invalidating route");

        self.router.evict(&target);
        self.awaiting_negotiation.remove(&target);
        self.cookies.retain(|_, t| *t != target);
    }

    // === IntroducePacket ===

    /// Announce our overlay identity to a peer we dialed. Masters skip
    /// this; their routes are gossiped authoritatively instead.
    pub(crate) async fn send_introduce(&mut self, dest: SocketAddrV4) {
        let msg = {
            let Some(identity) = self.router.self_node().and_then(|n| n.identity()) else {
                return;
            };
            Introduce {
                overlay_ip: identity.ip(),
                overlay_mac: *identity.mac().as_bytes(),
            }
        };
        self.send_encrypted(Opcode::IntroducePacket, &msg.encode(), dest).await;
    }

    pub(crate) async fn handle_introduce(&mut self, payload: &[u8], source: SocketAddrV4) {
        let msg = match Introduce::decode(payload) {
            Ok(m) => m,
            Err(e) => {
                warn!(%source, error = %e, "malformed IntroducePacket packet");
                return;
            }
        };

        if self.router.is_registered(&source) {
            warn!(%source, "node is already introduced");
            return;
        }

        let node = self.router.wrap(source);
        node.set_identity(OverlayIdentity::from_parts(msg.overlay_ip, msg.overlay_mac));
        node.set_master(false);
        self.router.register(source);

        debug!(%source, overlay_ip = %msg.overlay_ip, "node introduced itself");
    }
}
