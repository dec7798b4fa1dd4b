//! Fixed-layout payload structs with explicit little-endian codecs.
//!
//! Each struct documents its wire layout in a byte table. `decode` is
//! strict about sizes; a size mismatch is a malformed packet and the
//! caller drops it.

use super::ProtocolError;
use std::net::Ipv4Addr;

fn read_u16(data: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([data[at], data[at + 1]])
}

fn read_u32(data: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([data[at], data[at + 1], data[at + 2], data[at + 3]])
}

fn read_ipv4(data: &[u8], at: usize) -> Ipv4Addr {
    Ipv4Addr::from(read_u32(data, at))
}

fn push_ipv4(buf: &mut Vec<u8>, addr: Ipv4Addr) {
    buf.extend_from_slice(&u32::from(addr).to_le_bytes());
}

fn expect_exact(payload: &[u8], size: usize) -> Result<(), ProtocolError> {
    if payload.len() != size {
        return Err(ProtocolError::PayloadSizeMismatch {
            expected: size,
            got: payload.len(),
        });
    }
    Ok(())
}

// ============================================================================
// ProtocolVersionReply
// ============================================================================

/// Protocol version announcement.
///
/// | Offset | Field   | Size |
/// |--------|---------|------|
/// | 0      | version | 4    |
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VersionReply {
    pub version: u32,
}

impl VersionReply {
    pub const SIZE: usize = 4;

    pub fn encode(&self) -> Vec<u8> {
        self.version.to_le_bytes().to_vec()
    }

    pub fn decode(payload: &[u8]) -> Result<Self, ProtocolError> {
        expect_exact(payload, Self::SIZE)?;
        Ok(Self {
            version: read_u32(payload, 0),
        })
    }
}

// ============================================================================
// KeyExchange (PublicKeyExchange and SessionKeyExchange)
// ============================================================================

/// Two-phase key exchange: a fixed prefix followed by variable key bytes.
///
/// | Offset | Field           | Size | Notes                              |
/// |--------|-----------------|------|------------------------------------|
/// | 0      | need_others_key | 1    | 1 = please reply with your key     |
/// | 1      | cookie          | 4    | request correlator; 0 when unused  |
/// | 5      | key             | var  | DER public key / RSA-wrapped key   |
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeyExchange {
    pub need_others_key: bool,
    pub cookie: u32,
    pub key: Vec<u8>,
}

impl KeyExchange {
    pub const PREFIX_SIZE: usize = 5;

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::PREFIX_SIZE + self.key.len());
        buf.push(self.need_others_key as u8);
        buf.extend_from_slice(&self.cookie.to_le_bytes());
        buf.extend_from_slice(&self.key);
        buf
    }

    pub fn decode(payload: &[u8]) -> Result<Self, ProtocolError> {
        // key bytes must follow the prefix
        if payload.len() <= Self::PREFIX_SIZE {
            return Err(ProtocolError::PayloadTooShort {
                expected: Self::PREFIX_SIZE + 1,
                got: payload.len(),
            });
        }
        Ok(Self {
            need_others_key: payload[0] != 0,
            cookie: read_u32(payload, 1),
            key: payload[Self::PREFIX_SIZE..].to_vec(),
        })
    }
}

// ============================================================================
// IntroducePacket
// ============================================================================

/// Overlay identity announcement sent by a slave after a handshake it
/// initiated.
///
/// | Offset | Field       | Size |
/// |--------|-------------|------|
/// | 0      | overlay_ip  | 4    |
/// | 4      | overlay_mac | 6    |
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Introduce {
    pub overlay_ip: Ipv4Addr,
    pub overlay_mac: [u8; 6],
}

impl Introduce {
    pub const SIZE: usize = 10;

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::SIZE);
        push_ipv4(&mut buf, self.overlay_ip);
        buf.extend_from_slice(&self.overlay_mac);
        buf
    }

    pub fn decode(payload: &[u8]) -> Result<Self, ProtocolError> {
        expect_exact(payload, Self::SIZE)?;
        let mut overlay_mac = [0u8; 6];
        overlay_mac.copy_from_slice(&payload[4..10]);
        Ok(Self {
            overlay_ip: read_ipv4(payload, 0),
            overlay_mac,
        })
    }
}

// ============================================================================
// MasterNodeReply
// ============================================================================

/// Endpoint of the master a joiner should register against.
///
/// | Offset | Field | Size |
/// |--------|-------|------|
/// | 0      | addr  | 4    |
/// | 4      | port  | 2    |
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MasterNodeReply {
    pub addr: Ipv4Addr,
    pub port: u16,
}

impl MasterNodeReply {
    pub const SIZE: usize = 6;

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::SIZE);
        push_ipv4(&mut buf, self.addr);
        buf.extend_from_slice(&self.port.to_le_bytes());
        buf
    }

    pub fn decode(payload: &[u8]) -> Result<Self, ProtocolError> {
        expect_exact(payload, Self::SIZE)?;
        Ok(Self {
            addr: read_ipv4(payload, 0),
            port: read_u16(payload, 4),
        })
    }
}

// ============================================================================
// PingRequest / PingInitiate
// ============================================================================

/// Ping relay parameters, shared by `PingRequest` and `PingInitiate`.
///
/// | Offset | Field | Size |
/// |--------|-------|------|
/// | 0      | addr  | 4    |
/// | 4      | port  | 2    |
/// | 6      | count | 1    |
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PingParams {
    pub addr: Ipv4Addr,
    pub port: u16,
    pub count: u8,
}

impl PingParams {
    pub const SIZE: usize = 7;

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::SIZE);
        push_ipv4(&mut buf, self.addr);
        buf.extend_from_slice(&self.port.to_le_bytes());
        buf.push(self.count);
        buf
    }

    pub fn decode(payload: &[u8]) -> Result<Self, ProtocolError> {
        expect_exact(payload, Self::SIZE)?;
        Ok(Self {
            addr: read_ipv4(payload, 0),
            port: read_u16(payload, 4),
            count: payload[6],
        })
    }
}

// ============================================================================
// Ping
// ============================================================================

/// NAT probe ping. Carries the destination endpoint as the sender sees
/// it, so the receiver learns its own public address.
///
/// | Offset | Field | Size |
/// |--------|-------|------|
/// | 0      | addr  | 4    |
/// | 4      | port  | 2    |
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Ping {
    pub addr: Ipv4Addr,
    pub port: u16,
}

impl Ping {
    pub const SIZE: usize = 6;

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::SIZE);
        push_ipv4(&mut buf, self.addr);
        buf.extend_from_slice(&self.port.to_le_bytes());
        buf
    }

    pub fn decode(payload: &[u8]) -> Result<Self, ProtocolError> {
        expect_exact(payload, Self::SIZE)?;
        Ok(Self {
            addr: read_ipv4(payload, 0),
            port: read_u16(payload, 4),
        })
    }
}

// ============================================================================
// RegisterRequest
// ============================================================================

/// Membership registration sent to the join master.
///
/// | Offset | Field         | Size |
/// |--------|---------------|------|
/// | 0      | is_behind_nat | 1    |
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RegisterRequest {
    pub is_behind_nat: bool,
}

impl RegisterRequest {
    pub const SIZE: usize = 1;

    pub fn encode(&self) -> Vec<u8> {
        vec![self.is_behind_nat as u8]
    }

    pub fn decode(payload: &[u8]) -> Result<Self, ProtocolError> {
        expect_exact(payload, Self::SIZE)?;
        Ok(Self {
            is_behind_nat: payload[0] != 0,
        })
    }
}

// ============================================================================
// RegisterReply
// ============================================================================

/// Identity assignment from the master. `real_ip`/`real_port` are zero
/// unless the joiner is behind NAT, in which case they carry the
/// endpoint the master observed.
///
/// | Offset | Field           | Size |
/// |--------|-----------------|------|
/// | 0      | overlay_ip      | 4    |
/// | 4      | overlay_mac     | 6    |
/// | 10     | real_ip         | 4    |
/// | 14     | real_port       | 2    |
/// | 16     | is_master       | 1    |
/// | 17     | network_divisor | 1    |
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RegisterReply {
    pub overlay_ip: Ipv4Addr,
    pub overlay_mac: [u8; 6],
    pub real_ip: Ipv4Addr,
    pub real_port: u16,
    pub is_master: bool,
    pub network_divisor: u8,
}

impl RegisterReply {
    pub const SIZE: usize = 18;

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::SIZE);
        push_ipv4(&mut buf, self.overlay_ip);
        buf.extend_from_slice(&self.overlay_mac);
        push_ipv4(&mut buf, self.real_ip);
        buf.extend_from_slice(&self.real_port.to_le_bytes());
        buf.push(self.is_master as u8);
        buf.push(self.network_divisor);
        buf
    }

    pub fn decode(payload: &[u8]) -> Result<Self, ProtocolError> {
        expect_exact(payload, Self::SIZE)?;
        let mut overlay_mac = [0u8; 6];
        overlay_mac.copy_from_slice(&payload[4..10]);
        Ok(Self {
            overlay_ip: read_ipv4(payload, 0),
            overlay_mac,
            real_ip: read_ipv4(payload, 10),
            real_port: read_u16(payload, 14),
            is_master: payload[16] != 0,
            network_divisor: payload[17],
        })
    }
}

// ============================================================================
// Route
// ============================================================================

/// Routing table entry gossip: "this peer lives at this real endpoint
/// with this overlay identity and role".
///
/// | Offset | Field         | Size |
/// |--------|---------------|------|
/// | 0      | real_ip       | 4    |
/// | 4      | real_port     | 2    |
/// | 6      | overlay_ip    | 4    |
/// | 10     | overlay_mac   | 6    |
/// | 16     | is_master     | 1    |
/// | 17     | is_behind_nat | 1    |
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Route {
    pub real_ip: Ipv4Addr,
    pub real_port: u16,
    pub overlay_ip: Ipv4Addr,
    pub overlay_mac: [u8; 6],
    pub is_master: bool,
    pub is_behind_nat: bool,
}

impl Route {
    pub const SIZE: usize = 18;

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::SIZE);
        push_ipv4(&mut buf, self.real_ip);
        buf.extend_from_slice(&self.real_port.to_le_bytes());
        push_ipv4(&mut buf, self.overlay_ip);
        buf.extend_from_slice(&self.overlay_mac);
        buf.push(self.is_master as u8);
        buf.push(self.is_behind_nat as u8);
        buf
    }

    pub fn decode(payload: &[u8]) -> Result<Self, ProtocolError> {
        expect_exact(payload, Self::SIZE)?;
        let mut overlay_mac = [0u8; 6];
        overlay_mac.copy_from_slice(&payload[10..16]);
        Ok(Self {
            real_ip: read_ipv4(payload, 0),
            real_port: read_u16(payload, 4),
            overlay_ip: read_ipv4(payload, 6),
            overlay_mac,
            is_master: payload[16] != 0,
            is_behind_nat: payload[17] != 0,
        })
    }
}

// ============================================================================
// RouteRequest / RouteMissing
// ============================================================================

/// Overlay address being resolved, shared by `RouteRequest` and
/// `RouteMissing`.
///
/// | Offset | Field      | Size |
/// |--------|------------|------|
/// | 0      | overlay_ip | 4    |
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RouteAddress {
    pub overlay_ip: Ipv4Addr,
}

impl RouteAddress {
    pub const SIZE: usize = 4;

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::SIZE);
        push_ipv4(&mut buf, self.overlay_ip);
        buf
    }

    pub fn decode(payload: &[u8]) -> Result<Self, ProtocolError> {
        expect_exact(payload, Self::SIZE)?;
        Ok(Self {
            overlay_ip: read_ipv4(payload, 0),
        })
    }
}

// ============================================================================
// RouteInvalidate
// ============================================================================

/// Instruction to forget the peer at the named real endpoint.
///
/// | Offset | Field     | Size |
/// |--------|-----------|------|
/// | 0      | real_ip   | 4    |
/// | 4      | real_port | 2    |
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RouteInvalidate {
    pub real_ip: Ipv4Addr,
    pub real_port: u16,
}

impl RouteInvalidate {
    pub const SIZE: usize = 6;

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::SIZE);
        push_ipv4(&mut buf, self.real_ip);
        buf.extend_from_slice(&self.real_port.to_le_bytes());
        buf
    }

    pub fn decode(payload: &[u8]) -> Result<Self, ProtocolError> {
        expect_exact(payload, Self::SIZE)?;
        Ok(Self {
            real_ip: read_ipv4(payload, 0),
            real_port: read_u16(payload, 4),
        })
    }
}

// ============================================================================
// RoleUpdate
// ============================================================================

/// Master-issued role flip for the receiving node.
///
/// | Offset | Field         | Size |
/// |--------|---------------|------|
/// | 0      | is_master_now | 1    |
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RoleUpdate {
    pub is_master_now: bool,
}

impl RoleUpdate {
    pub const SIZE: usize = 1;

    pub fn encode(&self) -> Vec<u8> {
        vec![self.is_master_now as u8]
    }

    pub fn decode(payload: &[u8]) -> Result<Self, ProtocolError> {
        expect_exact(payload, Self::SIZE)?;
        Ok(Self {
            is_master_now: payload[0] != 0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_reply_codec() {
        let msg = VersionReply { version: 5 };
        let bytes = msg.encode();
        assert_eq!(bytes, vec![5, 0, 0, 0]);
        assert_eq!(VersionReply::decode(&bytes).unwrap(), msg);
        assert!(VersionReply::decode(&bytes[..3]).is_err());
    }

    #[test]
    fn test_key_exchange_codec() {
        let msg = KeyExchange {
            need_others_key: true,
            cookie: 0xDEADBEEF,
            key: vec![1, 2, 3, 4],
        };
        let bytes = msg.encode();
        assert_eq!(bytes[0], 1);
        // cookie is little-endian at offset 1
        assert_eq!(&bytes[1..5], &[0xEF, 0xBE, 0xAD, 0xDE]);

        let decoded = KeyExchange::decode(&bytes).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn test_key_exchange_requires_key_bytes() {
        let msg = KeyExchange {
            need_others_key: false,
            cookie: 7,
            key: Vec::new(),
        };
        // prefix alone is not a valid exchange
        assert!(KeyExchange::decode(&msg.encode()).is_err());
    }

    #[test]
    fn test_master_node_reply_codec() {
        let msg = MasterNodeReply {
            addr: Ipv4Addr::new(10, 4, 0, 1),
            port: 1801,
        };
        let decoded = MasterNodeReply::decode(&msg.encode()).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn test_ping_params_codec() {
        let msg = PingParams {
            addr: Ipv4Addr::new(192, 168, 1, 7),
            port: 40000,
            count: 4,
        };
        let decoded = PingParams::decode(&msg.encode()).unwrap();
        assert_eq!(decoded, msg);
        assert!(PingParams::decode(&msg.encode()[..6]).is_err());
    }

    #[test]
    fn test_register_reply_codec() {
        let msg = RegisterReply {
            overlay_ip: Ipv4Addr::new(44, 190, 12, 14),
            overlay_mac: [0x02, 0x2C, 0xBE, 0x0C, 0x55, 0x66],
            real_ip: Ipv4Addr::UNSPECIFIED,
            real_port: 0,
            is_master: true,
            network_divisor: 10,
        };
        let bytes = msg.encode();
        assert_eq!(bytes.len(), RegisterReply::SIZE);
        assert_eq!(RegisterReply::decode(&bytes).unwrap(), msg);
    }

    #[test]
    fn test_route_codec() {
        let msg = Route {
            real_ip: Ipv4Addr::new(203, 0, 113, 9),
            real_port: 1801,
            overlay_ip: Ipv4Addr::new(17, 0, 3, 14),
            overlay_mac: [0x02, 0x11, 0x00, 0x03, 0xAB, 0xCD],
            is_master: false,
            is_behind_nat: true,
        };
        let bytes = msg.encode();
        assert_eq!(bytes.len(), Route::SIZE);
        assert_eq!(Route::decode(&bytes).unwrap(), msg);

        // oversized payload is malformed, not truncated
        let mut long = bytes.clone();
        long.push(0);
        assert!(Route::decode(&long).is_err());
    }

    #[test]
    fn test_route_invalidate_codec() {
        let msg = RouteInvalidate {
            real_ip: Ipv4Addr::new(10, 0, 0, 2),
            real_port: 9000,
        };
        assert_eq!(RouteInvalidate::decode(&msg.encode()).unwrap(), msg);
    }

    #[test]
    fn test_flag_messages_codec() {
        for flag in [false, true] {
            let reg = RegisterRequest { is_behind_nat: flag };
            assert_eq!(RegisterRequest::decode(&reg.encode()).unwrap(), reg);

            let role = RoleUpdate { is_master_now: flag };
            assert_eq!(RoleUpdate::decode(&role.encode()).unwrap(), role);
        }
        assert!(RegisterRequest::decode(&[]).is_err());
        assert!(RoleUpdate::decode(&[1, 1]).is_err());
    }

    #[test]
    fn test_introduce_codec() {
        let msg = Introduce {
            overlay_ip: Ipv4Addr::new(9, 9, 9, 14),
            overlay_mac: [0x02, 9, 9, 9, 9, 9],
        };
        assert_eq!(Introduce::decode(&msg.encode()).unwrap(), msg);
    }

    #[test]
    fn test_route_address_codec() {
        let msg = RouteAddress {
            overlay_ip: Ipv4Addr::new(1, 2, 3, 14),
        };
        assert_eq!(RouteAddress::decode(&msg.encode()).unwrap(), msg);
    }
}
