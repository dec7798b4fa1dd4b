//! Pairwise handshake: public-key exchange, RSA-wrapped session-key
//! exchange, cookie correlation and the same-NAT endpoint merge.
//!
//! The exchange binds a real endpoint to an RSA public key and then
//! moves one random session key in each direction, wrapped under the
//! receiver's public key. Once both keys exist the peer's queued frames
//! drain through the encrypted path.

use super::LinkLayer;
use crate::crypto::SessionKey;
use crate::protocol::{KeyExchange, Opcode};
use std::net::SocketAddrV4;
use tracing::{debug, info, warn};

impl LinkLayer {
    // === PublicKeyExchange ===

    /// Send our public key. The requesting leg mints a cookie and
    /// remembers which peer it was aimed at; the replying leg echoes
    /// the cookie it was sent.
    pub(crate) async fn send_public_key_exchange(
        &mut self,
        dest: SocketAddrV4,
        need_others_key: bool,
        cookie: u32,
    ) {
        let cookie = if need_others_key {
            let minted: u32 = rand::random();
            self.cookies.insert(minted, dest);
            minted
        } else {
            cookie
        };
        let msg = KeyExchange {
            need_others_key,
            cookie,
            key: self.host_key.public_der().to_vec(),
        };
        self.send_frame(Opcode::PublicKeyExchange, &msg.encode(), dest).await;
    }

    pub(crate) async fn handle_public_key_exchange(&mut self, payload: &[u8], source: SocketAddrV4) {
        let msg = match KeyExchange::decode(payload) {
            Ok(m) => m,
            Err(e) => {
                warn!(%source, error = %e, "malformed PublicKeyExchange packet");
                return;
            }
        };

        // A reply must match an outstanding cookie.
        let original = if msg.need_others_key {
            None
        } else {
            match self.cookies.remove(&msg.cookie) {
                Some(endpoint) => Some(endpoint),
                None => {
                    warn!(%source, "unexpected public key reply");
                    return;
                }
            }
        };

        if let Err(e) = self.router.wrap(source).set_auth_key(&msg.key) {
            warn!(%source, error = %e, "received malformed public key");
            self.awaiting_negotiation.remove(&source);
            return;
        }
        debug!(%source, "received public key");

        if msg.need_others_key {
            self.send_public_key_exchange(source, false, msg.cookie).await;
            return;
        }

        // The reply leg: if it came from a different endpoint than the
        // one we targeted, both of us sit behind the same NAT and the
        // original record (with its queue) moves to the reply source.
        let original = original.expect("reply leg always carries a cookie target");
        if original != source {
            info!(
                original = %original,
                observed = %source,
                "peer is apparently behind the same NAT, rewriting"
            );
            if self.awaiting_negotiation.remove(&original) {
                self.awaiting_negotiation.insert(source);
            }
            self.router.rekey(original, source);
            if let Err(e) = self.router.wrap(source).set_auth_key(&msg.key) {
                warn!(%source, error = %e, "key install failed after endpoint rewrite");
                self.abort_negotiation(source);
                return;
            }
        }

        // Slaves announce their overlay identity to peers they dial.
        if self.router.self_node().is_some_and(|n| !n.is_master()) {
            self.send_introduce(source).await;
        }

        self.send_session_key_exchange(source, true).await;
    }

    // === SessionKeyExchange ===

    /// RSA-wrap our session key for this peer. Requires the peer's
    /// public key from the preceding exchange.
    fn wrap_session_key(&mut self, dest: SocketAddrV4) -> Option<Vec<u8>> {
        let node = self.router.wrap(dest);
        let key_bytes = node.ensure_my_session_key().key_bytes().to_vec();
        let auth = match node.auth_key() {
            Some(key) => key,
            None => {
                warn!(%dest, "no public key to wrap session key under");
                return None;
            }
        };
        match auth.encrypt(&key_bytes) {
            Ok(wrapped) => Some(wrapped),
            Err(e) => {
                warn!(%dest, error = %e, "session key wrap failed");
                None
            }
        }
    }

    pub(crate) async fn send_session_key_exchange(&mut self, dest: SocketAddrV4, need_others_key: bool) {
        let wrapped = match self.wrap_session_key(dest) {
            Some(w) => w,
            None => {
                self.abort_negotiation(dest);
                return;
            }
        };
        let msg = KeyExchange {
            need_others_key,
            cookie: 0,
            key: wrapped,
        };
        self.send_frame(Opcode::SessionKeyExchange, &msg.encode(), dest).await;
    }

    pub(crate) async fn handle_session_key_exchange(&mut self, payload: &[u8], source: SocketAddrV4) {
        let msg = match KeyExchange::decode(payload) {
            Ok(m) => m,
            Err(e) => {
                warn!(%source, error = %e, "malformed SessionKeyExchange packet");
                return;
            }
        };

        let key_bytes = match self.host_key.decrypt(&msg.key) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(%source, error = %e, "session key unwrap failed");
                self.abort_negotiation(source);
                return;
            }
        };
        let session = match SessionKey::from_bytes(&key_bytes) {
            Ok(key) => key,
            Err(e) => {
                warn!(%source, error = %e, "invalid session key material");
                self.abort_negotiation(source);
                return;
            }
        };

        self.router.wrap(source).set_his_session_key(session);
        debug!(%source, "stored session key");

        if msg.need_others_key {
            self.send_session_key_exchange(source, false).await;
        }

        if self.router.wrap(source).keys_negotiated() {
            self.negotiation_finished(source).await;
        }
    }

    // === Negotiation lifecycle ===

    /// Both directional keys are in place: clear the timer and flush
    /// the queued frames through the encrypted path, in order.
    async fn negotiation_finished(&mut self, endpoint: SocketAddrV4) {
        info!(%endpoint, "session keys negotiated");
        self.router.wrap(endpoint).finish_negotiation();
        self.awaiting_negotiation.remove(&endpoint);

        loop {
            let framed = match self.router.node_mut(&endpoint).and_then(|n| n.pop_queue()) {
                Some(f) => f,
                None => break,
            };
            self.encrypt_and_send(&framed, endpoint).await;
        }

        self.maybe_finish_shutdown();
    }

    /// Tear down an in-flight handshake: drop the queue, forget the
    /// cookie trail, release any shutdown waiter.
    pub(crate) fn abort_negotiation(&mut self, endpoint: SocketAddrV4) {
        if let Some(node) = self.router.node_mut(&endpoint) {
            let dropped = node.flush_queue();
            node.finish_negotiation();
            if dropped > 0 {
                debug!(%endpoint, dropped, "flushed queued frames");
            }
        }
        self.awaiting_negotiation.remove(&endpoint);
        self.cookies.retain(|_, target| *target != endpoint);
        self.maybe_finish_shutdown();
    }

    pub(crate) fn negotiation_timed_out(&mut self, endpoint: SocketAddrV4) {
        warn!(%endpoint, "negotiation timed out, dropping queue");
        self.abort_negotiation(endpoint);
    }

    pub(crate) fn maybe_finish_shutdown(&mut self) {
        if self.preparing_for_shutdown && self.awaiting_negotiation.is_empty() {
            self.preparing_for_shutdown = false;
            self.emit(super::LinkEvent::ReadyForShutdown);
        }
    }
}
