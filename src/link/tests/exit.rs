use super::*;
use crate::crypto::SessionKey;
use crate::identity::OverlayIdentity;

/// Stitch two running link layers into one overlay with pre-negotiated
/// session keys, bypassing the join procedure. `a` is the master, `b`
/// the slave.
async fn stitch_master_and_slave(a: &mut LinkLayer, b: &mut LinkLayer) {
    let a_endpoint = endpoint_of(a);
    let b_endpoint = endpoint_of(b);

    // demote B; create_network made it a master of its own overlay
    b.router.self_node_mut().unwrap().set_master(false);
    b.network_divisor = a.network_divisor;

    let a_identity = *a.router.self_node().unwrap().identity().unwrap();
    let b_identity = *b.router.self_node().unwrap().identity().unwrap();

    // A's record of B: a registered slave on the open internet
    {
        let node = a.router.wrap(b_endpoint);
        node.set_identity(b_identity);
        node.set_master(false);
        node.set_behind_nat(false);
        a.router.register(b_endpoint);
    }
    // B's record of A: its master
    {
        let node = b.router.wrap(a_endpoint);
        node.set_identity(a_identity);
        node.set_master(true);
        node.set_behind_nat(false);
        b.router.register(a_endpoint);
    }

    // install the directional session keys crosswise
    let a_to_b = a.router.wrap(b_endpoint).ensure_my_session_key().key_bytes().to_vec();
    let b_to_a = b.router.wrap(a_endpoint).ensure_my_session_key().key_bytes().to_vec();
    a.router
        .wrap(b_endpoint)
        .set_his_session_key(SessionKey::from_bytes(&b_to_a).unwrap());
    b.router
        .wrap(a_endpoint)
        .set_his_session_key(SessionKey::from_bytes(&a_to_b).unwrap());

    assert!(a.router.node(&b_endpoint).unwrap().keys_negotiated());
    assert!(b.router.node(&a_endpoint).unwrap().keys_negotiated());
}

#[tokio::test]
async fn test_last_master_reincarnates_slave_on_exit() {
    let (mut a, mut a_events) = make_link(make_config());
    let (mut b, _b_events) = make_link(make_config());
    a.create_network(Ipv4Addr::LOCALHOST).await.unwrap();
    b.create_network(Ipv4Addr::LOCALHOST).await.unwrap();
    stitch_master_and_slave(&mut a, &mut b).await;

    let a_endpoint = endpoint_of(&a);
    let b_endpoint = endpoint_of(&b);
    assert!(a.is_master());
    assert!(!b.is_master());

    drain_events(&mut a_events);
    a.exit_network().await;

    // nothing was mid-handshake, so A is immediately done
    assert!(drain_events(&mut a_events)
        .iter()
        .any(|e| matches!(e, LinkEvent::ReadyForShutdown)));

    // B processes the RoleUpdate then the ExitNotification
    while pump_one(&mut b, false).await {}

    assert!(b.is_master());
    assert!(!b.router().is_registered(&a_endpoint));
    assert!(b.router().node(&a_endpoint).is_none());
    assert_eq!(b.router().node_count(), 1);

    // A promoted B in its own table before leaving
    assert!(a.router().node(&b_endpoint).unwrap().is_master());
}

#[tokio::test]
async fn test_master_rebalances_after_peer_exit() {
    // A (master) holds routes for B (master) and C, D (slaves).
    let (mut a, _a_events) = make_link(make_config());
    a.create_network(Ipv4Addr::LOCALHOST).await.unwrap();
    a.network_divisor = 2;

    let b = SocketAddrV4::new(Ipv4Addr::LOCALHOST, 47001);
    let c = SocketAddrV4::new(Ipv4Addr::LOCALHOST, 47002);
    let d = SocketAddrV4::new(Ipv4Addr::LOCALHOST, 47003);
    for (endpoint, master) in [(b, true), (c, false), (d, false)] {
        let node = a.router.wrap(endpoint);
        node.set_identity(OverlayIdentity::from_key(&endpoint.port().to_le_bytes()));
        node.set_master(master);
        node.set_behind_nat(false);
        a.router.register(endpoint);
    }
    assert_eq!(a.router().node_count(), 4);
    assert_eq!(a.router().master_count(), 2);

    // B announces its departure: 1 master of 3 nodes violates 1/2, so
    // one of the remaining slaves gets reincarnated.
    let framed = protocol::frame(Opcode::ExitNotification, &[]);
    let exit_payload = {
        // deliver through the encrypted path: stitch keys for B first
        let key = a.router.wrap(b).ensure_my_session_key().key_bytes().to_vec();
        let session = SessionKey::from_bytes(&key).unwrap();
        a.router.wrap(b).set_his_session_key(session.clone());
        session.encrypt(&framed)
    };
    let datagram = protocol::frame(Opcode::EncryptedPacket, &exit_payload);
    a.process_datagram(&datagram, b).await;

    assert!(a.router().node(&b).is_none());
    assert_eq!(a.router().node_count(), 3);
    assert_eq!(a.router().master_count(), 2);
    let promoted = [c, d]
        .iter()
        .filter(|ep| a.router().node(ep).unwrap().is_master())
        .count();
    assert_eq!(promoted, 1);
}

#[tokio::test]
async fn test_exit_before_join_finishes_is_immediate() {
    let (mut lone, mut events) = make_link(make_config());
    lone.join_network(SocketAddrV4::new(Ipv4Addr::LOCALHOST, 9), false)
        .await
        .unwrap();

    lone.exit_network().await;

    assert!(drain_events(&mut events)
        .iter()
        .any(|e| matches!(e, LinkEvent::ReadyForShutdown)));
}

#[tokio::test]
async fn test_role_update_from_slave_is_rejected() {
    let (mut a, _a_events) = make_link(make_config());
    let (mut b, _b_events) = make_link(make_config());
    a.create_network(Ipv4Addr::LOCALHOST).await.unwrap();
    b.create_network(Ipv4Addr::LOCALHOST).await.unwrap();
    stitch_master_and_slave(&mut a, &mut b).await;

    // a slave (B) tries to demote the master (A)
    b.send_role_update(endpoint_of(&a), false).await;
    while pump_one(&mut a, false).await {}

    assert!(a.is_master());
}
