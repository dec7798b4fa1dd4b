//! Datagram dispatch.
//!
//! Two stages: the outer header selects between the handful of
//! plaintext opcodes and the `EncryptedPacket` envelope; decrypted
//! envelope bodies go through the same framing again and reach the
//! protected handlers. Encrypted-only opcodes arriving in the clear are
//! dropped; decryption is never re-entered.

use super::{LinkEvent, LinkLayer};
use crate::protocol::{self, Opcode};
use std::net::SocketAddrV4;
use tracing::{debug, warn};

impl LinkLayer {
    /// Handle one datagram from the transport.
    pub(crate) async fn process_datagram(&mut self, data: &[u8], source: SocketAddrV4) {
        let (opcode_raw, payload) = match protocol::parse_frame(data) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!(%source, error = %e, "malformed packet");
                return;
            }
        };

        self.router.wrap(source);

        let opcode = match Opcode::from_u16(opcode_raw) {
            Some(op) => op,
            None => {
                warn!(%source, opcode = opcode_raw, "packet of unknown type");
                return;
            }
        };

        match opcode {
            Opcode::ProtocolVersionRequest => {
                self.handle_protocol_version_request(payload, source).await;
            }
            Opcode::ProtocolVersionReply => {
                self.handle_protocol_version_reply(payload, source).await;
            }
            Opcode::PublicKeyExchange => {
                self.handle_public_key_exchange(payload, source).await;
            }
            Opcode::SessionKeyExchange => {
                self.handle_session_key_exchange(payload, source).await;
            }
            Opcode::Ping => {
                self.handle_ping(payload, source).await;
            }
            Opcode::EncryptedPacket => {
                self.handle_encrypted_envelope(payload, source).await;
            }
            _ => {
                // Encrypted-only opcode at the datagram level.
                warn!(%source, %opcode, "protected packet arrived unencrypted, dropping");
            }
        }
    }

    /// Decrypt an `EncryptedPacket` body and dispatch the inner frame.
    async fn handle_encrypted_envelope(&mut self, ciphertext: &[u8], source: SocketAddrV4) {
        let decrypted = {
            let node = match self.router.node(&source) {
                Some(n) => n,
                None => return,
            };
            if !node.keys_negotiated() {
                warn!(%source, "no session keys for encrypted packet");
                return;
            }
            let key = node
                .his_session_key()
                .expect("negotiated peers have both session keys");
            match key.decrypt(ciphertext) {
                Ok(plain) => plain,
                Err(e) => {
                    warn!(%source, error = %e, "undecryptable packet");
                    return;
                }
            }
        };

        let (opcode_raw, payload) = match protocol::parse_inner_frame(&decrypted) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!(%source, error = %e, "malformed encrypted payload");
                return;
            }
        };

        let opcode = match Opcode::from_u16(opcode_raw) {
            Some(op) if !op.is_plaintext() => op,
            Some(op) => {
                warn!(%source, opcode = %op, "plaintext opcode inside encrypted envelope");
                return;
            }
            None => {
                warn!(%source, opcode = opcode_raw, "encrypted packet of unknown type");
                return;
            }
        };

        match opcode {
            Opcode::IntroducePacket => {
                self.handle_introduce(payload, source).await;
            }
            Opcode::MasterNodeRequest => {
                self.handle_master_node_request(payload, source).await;
            }
            Opcode::MasterNodeReply => {
                self.handle_master_node_reply(payload, source).await;
            }
            Opcode::PingRequest => {
                self.handle_ping_request(payload, source).await;
            }
            Opcode::PingInitiate => {
                self.handle_ping_initiate(payload, source).await;
            }
            Opcode::RegisterRequest => {
                self.handle_register_request(payload, source).await;
            }
            Opcode::RegisterReply => {
                self.handle_register_reply(payload, source).await;
            }
            Opcode::Route => {
                self.handle_route(payload, source).await;
            }
            Opcode::RouteRequest => {
                self.handle_route_request(payload, source).await;
            }
            Opcode::RouteMissing => {
                self.handle_route_missing(payload, source);
            }
            Opcode::RouteInvalidate => {
                self.handle_route_invalidate(payload, source);
            }
            Opcode::RoleUpdate => {
                self.handle_role_update(payload, source);
            }
            Opcode::ExitNotification => {
                self.handle_exit_notification(payload, source).await;
            }
            Opcode::DataPacket => {
                let overlay_ip = self.router.node(&source).and_then(|n| n.overlay_ip());
                debug!(%source, bytes = payload.len(), "data frame for application layer");
                self.emit(LinkEvent::Data {
                    source,
                    overlay_ip,
                    payload: payload.to_vec(),
                });
            }
            _ => unreachable!("plaintext opcodes are filtered above"),
        }
    }

    /// Common payload size validation: log and refuse on mismatch.
    pub(crate) fn check_size(
        &self,
        payload: &[u8],
        expected: usize,
        source: SocketAddrV4,
        packet_name: &str,
    ) -> bool {
        if payload.len() != expected {
            warn!(
                %source,
                packet = packet_name,
                expected,
                got = payload.len(),
                "malformed packet"
            );
            return false;
        }
        true
    }

    /// Join-step gating: log and refuse packets arriving out of order.
    pub(crate) fn check_join_step(
        &self,
        needed: super::JoinStep,
        source: SocketAddrV4,
        packet_name: &str,
    ) -> bool {
        if self.join_step != needed {
            warn!(
                %source,
                packet = packet_name,
                step = %self.join_step,
                "unexpected packet"
            );
            return false;
        }
        true
    }
}
