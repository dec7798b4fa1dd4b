//! Per-peer record.
//!
//! A `SparkleNode` is everything the link layer knows about one remote
//! endpoint: its authentication key and derived overlay identity, the
//! two directional session keys, role and NAT flags, and the queue of
//! frames waiting for the handshake to finish.
//!
//! Records are keyed by real endpoint inside the router's spool; the
//! link layer refers to them by endpoint only.

use crate::crypto::{CryptoError, PeerPublicKey, SessionKey};
use crate::identity::OverlayIdentity;
use std::collections::VecDeque;
use std::fmt;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::time::Instant;

/// State for a single known peer (or for this node itself, once its
/// public endpoint is known).
pub struct SparkleNode {
    endpoint: SocketAddrV4,
    auth_key: Option<PeerPublicKey>,
    identity: Option<OverlayIdentity>,
    my_session_key: Option<SessionKey>,
    his_session_key: Option<SessionKey>,
    master: bool,
    behind_nat: bool,
    send_queue: VecDeque<Vec<u8>>,
    negotiation_deadline: Option<Instant>,
}

impl SparkleNode {
    pub fn new(endpoint: SocketAddrV4) -> Self {
        Self {
            endpoint,
            auth_key: None,
            identity: None,
            my_session_key: None,
            his_session_key: None,
            master: false,
            behind_nat: false,
            send_queue: VecDeque::new(),
            negotiation_deadline: None,
        }
    }

    pub fn endpoint(&self) -> SocketAddrV4 {
        self.endpoint
    }

    pub fn real_ip(&self) -> Ipv4Addr {
        *self.endpoint.ip()
    }

    pub fn real_port(&self) -> u16 {
        self.endpoint.port()
    }

    /// Move this record to a new real endpoint. Used only by the
    /// handshake NAT merge; the router re-keys its spool accordingly.
    pub(crate) fn set_endpoint(&mut self, endpoint: SocketAddrV4) {
        self.endpoint = endpoint;
    }

    // === Identity ===

    /// Install the peer's public key and derive its overlay identity.
    ///
    /// Malformed key bytes leave the record untouched.
    pub fn set_auth_key(&mut self, der: &[u8]) -> Result<(), CryptoError> {
        let key = PeerPublicKey::from_der(der)?;
        self.identity = Some(OverlayIdentity::from_key(key.der()));
        self.auth_key = Some(key);
        Ok(())
    }

    pub fn auth_key(&self) -> Option<&PeerPublicKey> {
        self.auth_key.as_ref()
    }

    /// Set the overlay identity directly, without a key. Route gossip
    /// and registration replies carry the address pair pre-derived.
    pub fn set_identity(&mut self, identity: OverlayIdentity) {
        self.identity = Some(identity);
    }

    pub fn identity(&self) -> Option<&OverlayIdentity> {
        self.identity.as_ref()
    }

    pub fn overlay_ip(&self) -> Option<Ipv4Addr> {
        self.identity.map(|i| i.ip())
    }

    // === Roles ===

    pub fn is_master(&self) -> bool {
        self.master
    }

    pub fn set_master(&mut self, master: bool) {
        self.master = master;
    }

    pub fn is_behind_nat(&self) -> bool {
        self.behind_nat
    }

    pub fn set_behind_nat(&mut self, behind_nat: bool) {
        self.behind_nat = behind_nat;
    }

    // === Session keys ===

    /// The key this side encrypts with, generating it on first use.
    pub fn ensure_my_session_key(&mut self) -> &SessionKey {
        self.my_session_key.get_or_insert_with(SessionKey::generate)
    }

    pub fn my_session_key(&self) -> Option<&SessionKey> {
        self.my_session_key.as_ref()
    }

    pub fn set_his_session_key(&mut self, key: SessionKey) {
        self.his_session_key = Some(key);
    }

    pub fn his_session_key(&self) -> Option<&SessionKey> {
        self.his_session_key.as_ref()
    }

    /// Both directional keys installed; the encrypted path is open.
    pub fn keys_negotiated(&self) -> bool {
        self.my_session_key.is_some() && self.his_session_key.is_some()
    }

    // === Send queue ===

    /// Queue a pre-framed payload until the handshake completes.
    pub fn push_queue(&mut self, framed: Vec<u8>) {
        self.send_queue.push_back(framed);
    }

    pub fn pop_queue(&mut self) -> Option<Vec<u8>> {
        self.send_queue.pop_front()
    }

    pub fn queue_len(&self) -> usize {
        self.send_queue.len()
    }

    /// Drop everything queued. Called when a negotiation times out.
    pub fn flush_queue(&mut self) -> usize {
        let dropped = self.send_queue.len();
        self.send_queue.clear();
        dropped
    }

    // === Negotiation timer ===

    pub fn start_negotiation(&mut self, deadline: Instant) {
        self.negotiation_deadline = Some(deadline);
    }

    pub fn finish_negotiation(&mut self) {
        self.negotiation_deadline = None;
    }

    pub fn negotiation_expired(&self, now: Instant) -> bool {
        self.negotiation_deadline.is_some_and(|d| now >= d)
    }
}

impl fmt::Display for SparkleNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]:{}", self.endpoint.ip(), self.endpoint.port())
    }
}

impl fmt::Debug for SparkleNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SparkleNode")
            .field("endpoint", &self.endpoint)
            .field("identity", &self.identity)
            .field("master", &self.master)
            .field("behind_nat", &self.behind_nat)
            .field("keys_negotiated", &self.keys_negotiated())
            .field("queued", &self.send_queue.len())
            .finish()
    }
}
