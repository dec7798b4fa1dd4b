//! Sparkle wire protocol.
//!
//! Every datagram starts with a 4-byte header:
//!
//! ```text
//! [length:2 LE][opcode:2 LE]
//! ```
//!
//! `length` is the total datagram size including the header. Six opcodes
//! travel in the clear (version probing, key exchange, pings and the
//! `EncryptedPacket` envelope itself); everything else is framed the same
//! way and carried as the session-encrypted body of an `EncryptedPacket`.
//!
//! All integers are little-endian and IPv4 addresses are carried as a
//! 32-bit value, encoded and decoded explicitly. No struct punning, so
//! mixed-endian overlays interoperate.

mod error;
mod messages;

pub use error::ProtocolError;
pub use messages::{
    KeyExchange, Introduce, MasterNodeReply, PingParams, Ping, RegisterRequest, RegisterReply,
    Route, RouteAddress, RouteInvalidate, RoleUpdate, VersionReply,
};

/// Protocol version spoken by this implementation.
pub const PROTOCOL_VERSION: u32 = 5;

/// Size of the common datagram header.
pub const HEADER_SIZE: usize = 4;

/// Session cipher block size; decrypted frames may carry up to
/// `BLOCK_SIZE - 1` trailing alignment zeroes.
pub const BLOCK_SIZE: usize = 8;

/// Maximum pings a single request may ask for. Larger counts are treated
/// as denial-of-service attempts and dropped.
pub const MAX_PING_BURST: u8 = 16;

/// Number of pings used for the NAT probe during join.
pub const NAT_PROBE_PINGS: u32 = 4;

/// Packet type identifiers.
///
/// Opcodes 1-6 are valid at the datagram level; the rest appear only
/// inside a decrypted `EncryptedPacket` body.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u16)]
pub enum Opcode {
    ProtocolVersionRequest = 1,
    ProtocolVersionReply = 2,
    PublicKeyExchange = 3,
    SessionKeyExchange = 4,
    Ping = 5,
    EncryptedPacket = 6,
    IntroducePacket = 7,
    MasterNodeRequest = 8,
    MasterNodeReply = 9,
    PingRequest = 10,
    PingInitiate = 11,
    RegisterRequest = 12,
    RegisterReply = 13,
    Route = 14,
    RouteRequest = 15,
    RouteMissing = 16,
    RouteInvalidate = 17,
    RoleUpdate = 18,
    ExitNotification = 19,
    DataPacket = 20,
}

impl Opcode {
    /// Try to convert from a wire value.
    pub fn from_u16(v: u16) -> Option<Self> {
        match v {
            1 => Some(Opcode::ProtocolVersionRequest),
            2 => Some(Opcode::ProtocolVersionReply),
            3 => Some(Opcode::PublicKeyExchange),
            4 => Some(Opcode::SessionKeyExchange),
            5 => Some(Opcode::Ping),
            6 => Some(Opcode::EncryptedPacket),
            7 => Some(Opcode::IntroducePacket),
            8 => Some(Opcode::MasterNodeRequest),
            9 => Some(Opcode::MasterNodeReply),
            10 => Some(Opcode::PingRequest),
            11 => Some(Opcode::PingInitiate),
            12 => Some(Opcode::RegisterRequest),
            13 => Some(Opcode::RegisterReply),
            14 => Some(Opcode::Route),
            15 => Some(Opcode::RouteRequest),
            16 => Some(Opcode::RouteMissing),
            17 => Some(Opcode::RouteInvalidate),
            18 => Some(Opcode::RoleUpdate),
            19 => Some(Opcode::ExitNotification),
            20 => Some(Opcode::DataPacket),
            _ => None,
        }
    }

    /// Convert to the wire value.
    pub fn to_u16(self) -> u16 {
        self as u16
    }

    /// Whether this opcode is allowed at the datagram level.
    pub fn is_plaintext(self) -> bool {
        matches!(
            self,
            Opcode::ProtocolVersionRequest
                | Opcode::ProtocolVersionReply
                | Opcode::PublicKeyExchange
                | Opcode::SessionKeyExchange
                | Opcode::Ping
                | Opcode::EncryptedPacket
        )
    }
}

impl std::fmt::Display for Opcode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Opcode::ProtocolVersionRequest => "ProtocolVersionRequest",
            Opcode::ProtocolVersionReply => "ProtocolVersionReply",
            Opcode::PublicKeyExchange => "PublicKeyExchange",
            Opcode::SessionKeyExchange => "SessionKeyExchange",
            Opcode::Ping => "Ping",
            Opcode::EncryptedPacket => "EncryptedPacket",
            Opcode::IntroducePacket => "IntroducePacket",
            Opcode::MasterNodeRequest => "MasterNodeRequest",
            Opcode::MasterNodeReply => "MasterNodeReply",
            Opcode::PingRequest => "PingRequest",
            Opcode::PingInitiate => "PingInitiate",
            Opcode::RegisterRequest => "RegisterRequest",
            Opcode::RegisterReply => "RegisterReply",
            Opcode::Route => "Route",
            Opcode::RouteRequest => "RouteRequest",
            Opcode::RouteMissing => "RouteMissing",
            Opcode::RouteInvalidate => "RouteInvalidate",
            Opcode::RoleUpdate => "RoleUpdate",
            Opcode::ExitNotification => "ExitNotification",
            Opcode::DataPacket => "DataPacket",
        };
        write!(f, "{}", name)
    }
}

/// Frame a payload under the common header.
pub fn frame(opcode: Opcode, payload: &[u8]) -> Vec<u8> {
    let total = HEADER_SIZE + payload.len();
    let mut buf = Vec::with_capacity(total);
    buf.extend_from_slice(&(total as u16).to_le_bytes());
    buf.extend_from_slice(&opcode.to_u16().to_le_bytes());
    buf.extend_from_slice(payload);
    buf
}

/// Parse a datagram-level frame.
///
/// The header length must match the datagram size exactly.
pub fn parse_frame(data: &[u8]) -> Result<(u16, &[u8]), ProtocolError> {
    if data.len() < HEADER_SIZE {
        return Err(ProtocolError::DatagramTooShort {
            expected: HEADER_SIZE,
            got: data.len(),
        });
    }
    let length = u16::from_le_bytes([data[0], data[1]]) as usize;
    let opcode = u16::from_le_bytes([data[2], data[3]]);
    if length != data.len() {
        return Err(ProtocolError::LengthMismatch {
            header: length,
            actual: data.len(),
        });
    }
    Ok((opcode, &data[HEADER_SIZE..]))
}

/// Parse a decrypted inner frame.
///
/// The session cipher pads to 8-byte blocks, so up to 7 trailing
/// alignment zeroes beyond the header length are tolerated and cut off.
pub fn parse_inner_frame(data: &[u8]) -> Result<(u16, &[u8]), ProtocolError> {
    if data.len() < HEADER_SIZE {
        return Err(ProtocolError::DatagramTooShort {
            expected: HEADER_SIZE,
            got: data.len(),
        });
    }
    let length = u16::from_le_bytes([data[0], data[1]]) as usize;
    let opcode = u16::from_le_bytes([data[2], data[3]]);
    if length < HEADER_SIZE || length > data.len() || data.len() >= length + BLOCK_SIZE {
        return Err(ProtocolError::LengthMismatch {
            header: length,
            actual: data.len(),
        });
    }
    Ok((opcode, &data[HEADER_SIZE..length]))
}
