//! Sparkle: a zero-configuration, fully distributed, self-organizing
//! encrypting overlay network.
//!
//! Peers cooperatively form a flat virtual network over untrusted UDP.
//! Each peer is identified by an RSA public key; its virtual IPv4 and
//! MAC addresses are derived from the key's SHA-1 fingerprint. There is
//! no central directory: one bootstrap endpoint is enough to join, and
//! a fraction of the nodes self-elect as masters that admit newcomers,
//! gossip routes and keep the overlay balanced as peers leave.

pub mod config;
pub mod crypto;
pub mod identity;
pub mod link;
pub mod node;
pub mod protocol;
pub mod router;
pub mod transport;

// Re-export config types
pub use config::{Config, ConfigError, IdentityConfig, NodeConfig, TimingConfig};

// Re-export crypto types
pub use crypto::{CryptoError, PeerPublicKey, RsaKeyPair, SessionKey, SESSION_KEY_SIZE};

// Re-export identity types
pub use identity::{Fingerprint, MacAddr, OverlayIdentity, OVERLAY_HOST_OCTET};

// Re-export link types
pub use link::{
    event_channel, JoinStep, LinkError, LinkEvent, LinkEventRx, LinkEventTx, LinkLayer,
    SelfIdentity,
};

// Re-export peer record and router types
pub use node::SparkleNode;
pub use router::Router;

// Re-export protocol types
pub use protocol::{Opcode, ProtocolError, PROTOCOL_VERSION};

// Re-export transport types
pub use transport::{
    packet_channel, PacketRx, PacketTx, ReceivedPacket, TransportError, UdpPacketTransport,
};
