//! Overlay identity derivation.
//!
//! Every peer's virtual address is a pure function of its public key:
//! the SHA-1 fingerprint of the key's DER encoding yields both the
//! overlay IPv4 (`fp0.fp1.fp2.14`, the host octet fixed) and the
//! locally-administered MAC (`02` followed by the first five fingerprint
//! bytes). Once the key is known the identity never changes.

use sha1::{Digest, Sha1};
use std::fmt;
use std::net::Ipv4Addr;

/// Fixed host octet of every overlay IPv4 address.
pub const OVERLAY_HOST_OCTET: u8 = 14;

/// SHA-1 fingerprint of a public key.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint([u8; 20]);

impl Fingerprint {
    /// Fingerprint the DER encoding of a public key.
    pub fn of_key(der: &[u8]) -> Self {
        let mut hasher = Sha1::new();
        hasher.update(der);
        let digest = hasher.finalize();
        let mut bytes = [0u8; 20];
        bytes.copy_from_slice(&digest);
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint(")?;
        for b in &self.0 {
            write!(f, "{:02x}", b)?;
        }
        write!(f, ")")
    }
}

/// A 48-bit overlay MAC address.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct MacAddr([u8; 6]);

impl MacAddr {
    pub fn from_bytes(bytes: [u8; 6]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 6] {
        &self.0
    }
}

impl fmt::Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            self.0[0], self.0[1], self.0[2], self.0[3], self.0[4], self.0[5]
        )
    }
}

impl fmt::Debug for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MacAddr({})", self)
    }
}

/// The `(overlay IPv4, overlay MAC)` pair derived from a public key.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OverlayIdentity {
    ip: Ipv4Addr,
    mac: MacAddr,
}

impl OverlayIdentity {
    /// Derive the identity from a public key's DER encoding.
    pub fn from_key(der: &[u8]) -> Self {
        let fp = Fingerprint::of_key(der);
        Self::from_fingerprint(&fp)
    }

    /// Derive the identity from an already-computed fingerprint.
    pub fn from_fingerprint(fp: &Fingerprint) -> Self {
        let b = fp.as_bytes();
        let ip = Ipv4Addr::new(b[0], b[1], b[2], OVERLAY_HOST_OCTET);
        let mut mac = [0u8; 6];
        mac[0] = 0x02; // locally administered
        mac[1..6].copy_from_slice(&b[0..5]);
        Self {
            ip,
            mac: MacAddr(mac),
        }
    }

    /// Reassemble an identity from wire fields (route gossip carries the
    /// address pair without the key it came from).
    pub fn from_parts(ip: Ipv4Addr, mac: [u8; 6]) -> Self {
        Self {
            ip,
            mac: MacAddr(mac),
        }
    }

    pub fn ip(&self) -> Ipv4Addr {
        self.ip
    }

    pub fn mac(&self) -> MacAddr {
        self.mac
    }
}

impl fmt::Display for OverlayIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.ip, self.mac)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_fingerprint() {
        // SHA-1("abc") = a9993e364706816aba3e25717850c26c9cd0d89d
        let fp = Fingerprint::of_key(b"abc");
        assert_eq!(
            &fp.as_bytes()[..5],
            &[0xa9, 0x99, 0x3e, 0x36, 0x47]
        );
    }

    #[test]
    fn test_derivation_shape() {
        let id = OverlayIdentity::from_key(b"abc");
        assert_eq!(id.ip(), Ipv4Addr::new(0xa9, 0x99, 0x3e, 14));
        assert_eq!(id.mac().as_bytes(), &[0x02, 0xa9, 0x99, 0x3e, 0x36, 0x47]);
    }

    #[test]
    fn test_host_octet_is_fixed() {
        for key in [&b"abc"[..], b"def", b"another key", b""] {
            let id = OverlayIdentity::from_key(key);
            assert_eq!(id.ip().octets()[3], OVERLAY_HOST_OCTET);
            assert_eq!(id.mac().as_bytes()[0], 0x02);
        }
    }

    #[test]
    fn test_derivation_is_deterministic() {
        let a = OverlayIdentity::from_key(b"some key material");
        let b = OverlayIdentity::from_key(b"some key material");
        assert_eq!(a, b);

        let c = OverlayIdentity::from_key(b"other key material");
        assert_ne!(a, c);
    }

    #[test]
    fn test_ip_mac_share_prefix() {
        let id = OverlayIdentity::from_key(b"prefix check");
        let octets = id.ip().octets();
        let mac_addr = id.mac();
        let mac = mac_addr.as_bytes();
        assert_eq!(&mac[1..4], &octets[..3]);
    }

    #[test]
    fn test_mac_display() {
        let mac = MacAddr::from_bytes([0x02, 0xa9, 0x99, 0x3e, 0x36, 0x47]);
        assert_eq!(mac.to_string(), "02:a9:99:3e:36:47");
    }
}
