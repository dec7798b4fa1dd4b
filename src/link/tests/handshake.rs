use super::*;
use crate::crypto::RsaKeyPair;
use crate::protocol::KeyExchange;

#[tokio::test]
async fn test_queue_drains_when_keys_negotiate() {
    let (mut a, _a_events) = make_link(make_config());
    let (mut b, mut b_events) = make_link(make_config());
    a.create_network(Ipv4Addr::LOCALHOST).await.unwrap();
    b.create_network(Ipv4Addr::LOCALHOST).await.unwrap();
    let b_endpoint = endpoint_of(&b);

    // frames queue behind the handshake gate, in order
    a.send_encrypted(Opcode::DataPacket, b"first", b_endpoint).await;
    a.send_encrypted(Opcode::DataPacket, b"second", b_endpoint).await;
    {
        let node = a.router().node(&b_endpoint).unwrap();
        assert!(!node.keys_negotiated());
        assert_eq!(node.queue_len(), 2);
    }
    assert!(a.awaiting_negotiation.contains(&b_endpoint));

    pump(&mut [&mut a, &mut b], false).await;

    // the gate opened and emptied
    let node = a.router().node(&b_endpoint).unwrap();
    assert!(node.keys_negotiated());
    assert_eq!(node.queue_len(), 0);
    assert!(a.awaiting_negotiation.is_empty());
    assert!(a.cookies.is_empty());

    // frames arrived decrypted, FIFO order preserved
    let payloads: Vec<Vec<u8>> = drain_events(&mut b_events)
        .into_iter()
        .filter_map(|e| match e {
            LinkEvent::Data { payload, .. } => Some(payload),
            _ => None,
        })
        .collect();
    assert_eq!(payloads, vec![b"first".to_vec(), b"second".to_vec()]);
}

#[tokio::test]
async fn test_cookie_nat_merge() {
    let (mut x, _x_events) = make_link(make_config());
    x.create_network(Ipv4Addr::LOCALHOST).await.unwrap();

    let y_original = SocketAddrV4::new(Ipv4Addr::LOCALHOST, 45001);
    let y_observed = SocketAddrV4::new(Ipv4Addr::LOCALHOST, 45002);

    // a queued frame kicks off the exchange toward Y's known endpoint
    x.send_encrypted(Opcode::DataPacket, b"payload", y_original).await;
    assert_eq!(x.router().node(&y_original).unwrap().queue_len(), 1);
    assert_eq!(x.cookies.len(), 1);
    let cookie = *x.cookies.keys().next().unwrap();

    // the reply comes back from a different endpoint: Y shares our NAT
    let y_key = RsaKeyPair::generate(TEST_KEY_BITS).unwrap();
    let reply = KeyExchange {
        need_others_key: false,
        cookie,
        key: y_key.public_der().to_vec(),
    };
    let framed = protocol::frame(Opcode::PublicKeyExchange, &reply.encode());
    x.process_datagram(&framed, y_observed).await;

    // the original record moved, queue intact; cookies drained
    assert!(x.cookies.is_empty());
    assert!(x.router().node(&y_original).is_none());
    let merged = x.router().node(&y_observed).unwrap();
    assert_eq!(merged.endpoint(), y_observed);
    assert_eq!(merged.queue_len(), 1);
    assert!(merged.auth_key().is_some());

    // the pending negotiation follows the rewritten endpoint
    assert!(x.awaiting_negotiation.contains(&y_observed));
    assert!(!x.awaiting_negotiation.contains(&y_original));
}

#[tokio::test]
async fn test_reply_with_unknown_cookie_is_dropped() {
    let (mut x, _x_events) = make_link(make_config());
    x.create_network(Ipv4Addr::LOCALHOST).await.unwrap();

    let stranger = SocketAddrV4::new(Ipv4Addr::LOCALHOST, 45003);
    let key = RsaKeyPair::generate(TEST_KEY_BITS).unwrap();
    let reply = KeyExchange {
        need_others_key: false,
        cookie: 0x1234_5678,
        key: key.public_der().to_vec(),
    };
    let framed = protocol::frame(Opcode::PublicKeyExchange, &reply.encode());
    x.process_datagram(&framed, stranger).await;

    // wrapped into the spool but no key installed, no negotiation
    assert!(x.router().node(&stranger).unwrap().auth_key().is_none());
    assert!(x.awaiting_negotiation.is_empty());
}

#[tokio::test]
async fn test_negotiation_timeout_flushes_queue() {
    let (mut x, _x_events) = make_link(make_config());
    x.create_network(Ipv4Addr::LOCALHOST).await.unwrap();

    // nobody answers at this endpoint
    let ghost = SocketAddrV4::new(Ipv4Addr::LOCALHOST, 45999);
    x.send_encrypted(Opcode::DataPacket, b"doomed", ghost).await;
    assert!(x.awaiting_negotiation.contains(&ghost));
    assert_eq!(x.router().node(&ghost).unwrap().queue_len(), 1);
    assert_eq!(x.cookies.len(), 1);

    tokio::time::sleep(Duration::from_millis(600)).await;
    x.check_timers().await;

    assert!(x.awaiting_negotiation.is_empty());
    assert_eq!(x.router().node(&ghost).unwrap().queue_len(), 0);
    assert!(x.cookies.is_empty());

    // a later send re-arms a fresh handshake
    x.send_encrypted(Opcode::DataPacket, b"retry", ghost).await;
    assert!(x.awaiting_negotiation.contains(&ghost));
    assert_eq!(x.cookies.len(), 1);
}

#[tokio::test]
async fn test_send_to_self_is_suppressed() {
    let (mut x, _x_events) = make_link(make_config());
    x.create_network(Ipv4Addr::LOCALHOST).await.unwrap();
    let self_endpoint = x.router().self_endpoint().unwrap();

    x.send_encrypted(Opcode::DataPacket, b"echo", self_endpoint).await;

    // nothing queued, no negotiation started
    assert_eq!(x.router().self_node().unwrap().queue_len(), 0);
    assert!(x.awaiting_negotiation.is_empty());
    assert!(x.cookies.is_empty());
}
