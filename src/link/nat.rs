//! NAT-traversal assist.
//!
//! `PingRequest` asks a peer to arrange pings; if that peer is not the
//! named target it relays a `PingInitiate` to the target, which fires
//! the burst itself. The pings open a return path through the
//! requester's NAT and carry the endpoint the sender observes, so the
//! requester also learns its public address. Burst sizes are capped;
//! a large count is someone trying to use us as an amplifier.

use super::LinkLayer;
use crate::protocol::{self, Opcode, Ping, PingParams};
use std::net::SocketAddrV4;
use tracing::warn;

impl LinkLayer {
    /// Ask `dest` to have `target` pinged `count` times.
    pub(crate) async fn send_ping_request(
        &mut self,
        dest: SocketAddrV4,
        target: SocketAddrV4,
        count: u8,
    ) {
        let msg = PingParams {
            addr: *target.ip(),
            port: target.port(),
            count,
        };
        self.send_encrypted(Opcode::PingRequest, &msg.encode(), dest).await;
    }

    pub(crate) async fn handle_ping_request(&mut self, payload: &[u8], source: SocketAddrV4) {
        let msg = match PingParams::decode(payload) {
            Ok(m) => m,
            Err(e) => {
                warn!(%source, error = %e, "malformed PingRequest packet");
                return;
            }
        };

        let target = SocketAddrV4::new(msg.addr, msg.port);
        if Some(target) == self.router.self_endpoint() {
            // We are the target; ping the requester directly.
            self.do_ping(source, msg.count).await;
            return;
        }
        self.send_ping_initiate(target, source, msg.count).await;
    }

    /// Relay: tell `dest` to start pinging `target`.
    async fn send_ping_initiate(&mut self, dest: SocketAddrV4, target: SocketAddrV4, count: u8) {
        let msg = PingParams {
            addr: *target.ip(),
            port: target.port(),
            count,
        };
        self.send_encrypted(Opcode::PingInitiate, &msg.encode(), dest).await;
    }

    pub(crate) async fn handle_ping_initiate(&mut self, payload: &[u8], source: SocketAddrV4) {
        let msg = match PingParams::decode(payload) {
            Ok(m) => m,
            Err(e) => {
                warn!(%source, error = %e, "malformed PingInitiate packet");
                return;
            }
        };
        let target = SocketAddrV4::new(msg.addr, msg.port);
        self.router.wrap(target);
        self.do_ping(target, msg.count).await;
    }

    /// Fire a burst of plaintext pings, each echoing the destination
    /// endpoint as we see it.
    pub(crate) async fn do_ping(&mut self, dest: SocketAddrV4, count: u8) {
        if count > protocol::MAX_PING_BURST {
            warn!(
                count,
                %dest,
                "request for too many pings, possible DoS attempt, dropping"
            );
            return;
        }
        let msg = Ping {
            addr: *dest.ip(),
            port: dest.port(),
        };
        let encoded = msg.encode();
        for _ in 0..count {
            self.send_frame(Opcode::Ping, &encoded, dest).await;
        }
    }
}
