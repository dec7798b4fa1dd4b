use super::*;
use crate::config::Config;
use crate::crypto::RsaKeyPair;
use tokio::time::{timeout, Duration};

mod exit;
mod genesis;
mod handshake;

/// Small keys keep handshake tests fast; payloads stay within the
/// PKCS#1 v1.5 limit either way.
pub(super) const TEST_KEY_BITS: usize = 512;

/// Config with loopback binding, an ephemeral port and timing bounds
/// shrunk enough for deadline tests to elapse quickly.
pub(super) fn make_config() -> Config {
    let mut config = Config::new();
    config.node.bind = Ipv4Addr::LOCALHOST;
    config.node.port = 0;
    config.node.network_divisor = 1;
    config.timing.join_timeout_ms = 2000;
    config.timing.ping_timeout_ms = 200;
    config.timing.negotiation_timeout_ms = 500;
    config
}

pub(super) fn make_link(config: Config) -> (LinkLayer, LinkEventRx) {
    let host_key = RsaKeyPair::generate(TEST_KEY_BITS).unwrap();
    let (event_tx, event_rx) = event_channel();
    (LinkLayer::new(config, host_key, event_tx), event_rx)
}

pub(super) fn endpoint_of(link: &LinkLayer) -> SocketAddrV4 {
    SocketAddrV4::new(Ipv4Addr::LOCALHOST, link.local_port().unwrap())
}

pub(super) fn is_ping(data: &[u8]) -> bool {
    data.len() >= protocol::HEADER_SIZE
        && u16::from_le_bytes([data[2], data[3]]) == Opcode::Ping.to_u16()
}

/// Deliver at most one pending datagram to `link`. Returns whether
/// anything was pulled off the channel.
pub(super) async fn pump_one(link: &mut LinkLayer, drop_pings: bool) -> bool {
    let packet = {
        let rx = link.packet_rx.as_mut().expect("packet channel present");
        match timeout(Duration::from_millis(100), rx.recv()).await {
            Ok(Some(p)) => p,
            _ => return false,
        }
    };
    if drop_pings && is_ping(&packet.data) {
        return true;
    }
    link.process_datagram(&packet.data, packet.source).await;
    true
}

/// Shuttle datagrams between nodes until everyone goes quiet.
pub(super) async fn pump(links: &mut [&mut LinkLayer], drop_pings: bool) {
    let mut idle_rounds = 0;
    while idle_rounds < 2 {
        let mut progressed = false;
        for link in links.iter_mut() {
            while pump_one(link, drop_pings).await {
                progressed = true;
            }
        }
        if progressed {
            idle_rounds = 0;
        } else {
            idle_rounds += 1;
        }
    }
}

pub(super) fn drain_events(rx: &mut LinkEventRx) -> Vec<LinkEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}
