//! Peer indices and selection primitives.
//!
//! The router owns two things: the node spool (every endpoint the link
//! layer has ever wrapped, handshaken or not) and the routing table (the
//! subset of spool entries that have been registered as overlay
//! members). Records are stored in an endpoint-keyed map, so no two
//! entries can ever share a real endpoint, and everything else holds
//! plain `SocketAddrV4` handles instead of pointers.

use crate::node::SparkleNode;
use std::collections::{BTreeSet, HashMap};
use std::net::{Ipv4Addr, SocketAddrV4};
use tracing::debug;

/// Endpoint-keyed peer store with routing-table queries.
#[derive(Default)]
pub struct Router {
    spool: HashMap<SocketAddrV4, SparkleNode>,
    registered: BTreeSet<SocketAddrV4>,
    self_endpoint: Option<SocketAddrV4>,
    master_rotation: usize,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    // === Spool ===

    /// Fetch the record for an endpoint, creating it on first sight.
    pub fn wrap(&mut self, endpoint: SocketAddrV4) -> &mut SparkleNode {
        self.spool
            .entry(endpoint)
            .or_insert_with(|| SparkleNode::new(endpoint))
    }

    pub fn node(&self, endpoint: &SocketAddrV4) -> Option<&SparkleNode> {
        self.spool.get(endpoint)
    }

    pub fn node_mut(&mut self, endpoint: &SocketAddrV4) -> Option<&mut SparkleNode> {
        self.spool.get_mut(endpoint)
    }

    pub fn contains(&self, endpoint: &SocketAddrV4) -> bool {
        self.spool.contains_key(endpoint)
    }

    pub fn spool_len(&self) -> usize {
        self.spool.len()
    }

    /// Every endpoint currently in the spool, registered or not.
    pub fn spool_endpoints(&self) -> impl Iterator<Item = SocketAddrV4> + '_ {
        self.spool.keys().copied()
    }

    /// Move a record to a new endpoint, replacing whatever record may
    /// already sit there. Preserves the record's queue and key state;
    /// this is the NAT-merge primitive.
    pub fn rekey(&mut self, from: SocketAddrV4, to: SocketAddrV4) -> bool {
        let Some(mut node) = self.spool.remove(&from) else {
            return false;
        };
        node.set_endpoint(to);
        self.spool.insert(to, node);
        if self.registered.remove(&from) {
            self.registered.insert(to);
        }
        debug!(%from, %to, "peer record re-keyed");
        true
    }

    /// Drop an endpoint from both the spool and the routing table.
    pub fn evict(&mut self, endpoint: &SocketAddrV4) -> Option<SparkleNode> {
        self.registered.remove(endpoint);
        if self.self_endpoint == Some(*endpoint) {
            self.self_endpoint = None;
        }
        self.spool.remove(endpoint)
    }

    // === Self node ===

    /// Install this node's own record (it must already be in the spool)
    /// and register it as an overlay member.
    pub fn set_self_node(&mut self, endpoint: SocketAddrV4) {
        debug_assert!(self.spool.contains_key(&endpoint));
        self.self_endpoint = Some(endpoint);
        self.registered.insert(endpoint);
    }

    pub fn self_endpoint(&self) -> Option<SocketAddrV4> {
        self.self_endpoint
    }

    pub fn self_node(&self) -> Option<&SparkleNode> {
        self.self_endpoint.and_then(|ep| self.spool.get(&ep))
    }

    pub fn self_node_mut(&mut self) -> Option<&mut SparkleNode> {
        let ep = self.self_endpoint?;
        self.spool.get_mut(&ep)
    }

    pub fn is_master(&self) -> bool {
        self.self_node().map(|n| n.is_master()).unwrap_or(false)
    }

    // === Routing table ===

    /// Publish an endpoint in the routing table.
    pub fn register(&mut self, endpoint: SocketAddrV4) {
        debug_assert!(self.spool.contains_key(&endpoint));
        self.registered.insert(endpoint);
    }

    /// Remove an endpoint from the routing table, keeping its spool
    /// record.
    pub fn unregister(&mut self, endpoint: &SocketAddrV4) {
        self.registered.remove(endpoint);
    }

    pub fn is_registered(&self, endpoint: &SocketAddrV4) -> bool {
        self.registered.contains(endpoint)
    }

    /// All registered members, self included.
    pub fn nodes(&self) -> impl Iterator<Item = &SparkleNode> {
        self.registered.iter().filter_map(|ep| self.spool.get(ep))
    }

    pub fn node_count(&self) -> usize {
        self.registered.len()
    }

    /// Registered members except self.
    pub fn others(&self) -> Vec<SocketAddrV4> {
        self.registered
            .iter()
            .copied()
            .filter(|ep| Some(*ep) != self.self_endpoint)
            .collect()
    }

    /// Registered masters, self included.
    pub fn masters(&self) -> Vec<SocketAddrV4> {
        self.registered
            .iter()
            .copied()
            .filter(|ep| self.spool.get(ep).is_some_and(|n| n.is_master()))
            .collect()
    }

    pub fn master_count(&self) -> usize {
        self.masters().len()
    }

    /// Registered masters except self.
    pub fn other_masters(&self) -> Vec<SocketAddrV4> {
        self.masters()
            .into_iter()
            .filter(|ep| Some(*ep) != self.self_endpoint)
            .collect()
    }

    /// Resolve an overlay address to a registered endpoint.
    pub fn find_by_overlay_ip(&self, ip: Ipv4Addr) -> Option<SocketAddrV4> {
        self.registered
            .iter()
            .copied()
            .find(|ep| {
                self.spool
                    .get(ep)
                    .and_then(|n| n.overlay_ip())
                    .is_some_and(|oip| oip == ip)
            })
    }

    // === Selection ===

    /// Pick a master to talk to, scattering load round-robin over the
    /// masters other than self. Falls back to self when it is the only
    /// master (a freshly created network answering its first join).
    pub fn select_master(&mut self) -> Option<SocketAddrV4> {
        let candidates = self.other_masters();
        if candidates.is_empty() {
            return self
                .self_endpoint
                .filter(|_| self.is_master());
        }
        let pick = candidates[self.master_rotation % candidates.len()];
        self.master_rotation = self.master_rotation.wrapping_add(1);
        Some(pick)
    }

    /// Pick a slave eligible for promotion: registered, not self, not a
    /// master, and not behind NAT (NAT'd peers can never be masters).
    pub fn select_reincarnation_target(&self) -> Option<SocketAddrV4> {
        self.registered
            .iter()
            .copied()
            .filter(|ep| Some(*ep) != self.self_endpoint)
            .find(|ep| {
                self.spool
                    .get(ep)
                    .is_some_and(|n| !n.is_master() && !n.is_behind_nat())
            })
    }

    /// Forget everything. Used by the join hard-reset and shutdown.
    pub fn clear(&mut self) {
        self.spool.clear();
        self.registered.clear();
        self.self_endpoint = None;
        self.master_rotation = 0;
    }
}
