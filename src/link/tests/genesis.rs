use super::*;
use crate::identity::OverlayIdentity;

#[tokio::test]
async fn test_two_node_genesis() {
    let (mut a, mut a_events) = make_link(make_config());
    a.create_network(Ipv4Addr::LOCALHOST).await.unwrap();
    let a_endpoint = endpoint_of(&a);

    assert_eq!(a.join_step(), JoinStep::Finished);
    assert!(matches!(
        drain_events(&mut a_events).as_slice(),
        [LinkEvent::Joined(_)]
    ));

    let (mut b, mut b_events) = make_link(make_config());
    b.join_network(a_endpoint, false).await.unwrap();

    pump(&mut [&mut a, &mut b], false).await;

    assert_eq!(a.join_step(), JoinStep::Finished);
    assert_eq!(b.join_step(), JoinStep::Finished);

    // divisor 1: everyone is a master
    assert!(a.is_master());
    assert!(b.is_master());
    assert_eq!(b.network_divisor(), 1);

    // reciprocal routes
    let b_endpoint = b.router().self_endpoint().unwrap();
    assert!(a.router().is_registered(&b_endpoint));
    assert!(b.router().is_registered(&a_endpoint));
    assert_eq!(a.router().node_count(), 2);
    assert_eq!(b.router().node_count(), 2);

    // B's overlay identity is the fingerprint derivation of its key
    let b_identity = b.router().self_node().unwrap().identity().copied().unwrap();
    assert_eq!(b_identity, OverlayIdentity::from_key(b.host_key.public_der()));
    assert_eq!(b_identity.ip().octets()[3], 14);

    // and A assigned exactly that identity on its side
    let b_at_a = a.router().node(&b_endpoint).unwrap().identity().copied().unwrap();
    assert_eq!(b_at_a, b_identity);

    assert!(drain_events(&mut b_events)
        .iter()
        .any(|e| matches!(e, LinkEvent::Joined(_))));

    // the data plane works over the established routes
    a.send_data(b"overlay frame", b_identity.ip()).await.unwrap();
    pump(&mut [&mut a, &mut b], false).await;
    let delivered = drain_events(&mut b_events).into_iter().any(|e| {
        matches!(e, LinkEvent::Data { payload, overlay_ip, .. }
            if payload == b"overlay frame" && overlay_ip.is_some())
    });
    assert!(delivered);
}

#[tokio::test]
async fn test_third_node_stays_slave_with_divisor_two() {
    let mut config = make_config();
    config.node.network_divisor = 2;
    let (mut a, _a_events) = make_link(config);
    a.create_network(Ipv4Addr::LOCALHOST).await.unwrap();
    let a_endpoint = endpoint_of(&a);

    // B joins: a lone master always promotes its first peer.
    let (mut b, _b_events) = make_link(make_config());
    b.join_network(a_endpoint, false).await.unwrap();
    pump(&mut [&mut a, &mut b], false).await;
    assert!(b.is_master());
    assert_eq!(b.network_divisor(), 2);

    // C joins: 2 masters of (2 + 1) nodes keeps the ratio at or above
    // 1/2, so C stays a slave.
    let (mut c, _c_events) = make_link(make_config());
    c.join_network(a_endpoint, false).await.unwrap();
    pump(&mut [&mut a, &mut b, &mut c], false).await;

    assert_eq!(c.join_step(), JoinStep::Finished);
    assert!(!c.is_master());

    // a slave's table holds the masters (plus itself)
    assert_eq!(c.router().masters().len(), 2);
    assert!(c.router().is_registered(&a_endpoint));
    assert!(c.router().is_registered(&endpoint_of(&b)));

    // an unknown overlay destination resolves to a master query that
    // comes back negative, leaving the table untouched
    let before = c.router().node_count();
    c.send_data(b"frame", Ipv4Addr::new(99, 99, 99, 14)).await.unwrap();
    pump(&mut [&mut a, &mut b, &mut c], false).await;
    assert_eq!(c.router().node_count(), before);
}

#[tokio::test]
async fn test_join_via_event_loops() {
    let (mut a, _a_events) = make_link(make_config());
    a.create_network(Ipv4Addr::LOCALHOST).await.unwrap();
    let a_endpoint = endpoint_of(&a);

    let (mut b, mut b_events) = make_link(make_config());
    b.join_network(a_endpoint, false).await.unwrap();

    // run both real event loops and watch for the join event
    let a_task = tokio::spawn(async move { a.run().await });
    let b_task = tokio::spawn(async move { b.run().await });

    let joined = timeout(Duration::from_secs(5), async {
        loop {
            match b_events.recv().await {
                Some(LinkEvent::Joined(identity)) => break identity,
                Some(_) => continue,
                None => panic!("event channel closed before join"),
            }
        }
    })
    .await
    .expect("join should complete");

    assert_eq!(*joined.endpoint.ip(), Ipv4Addr::LOCALHOST);
    assert!(joined.is_master);
    assert!(!joined.is_behind_nat);

    a_task.abort();
    b_task.abort();
}

#[tokio::test]
async fn test_join_times_out_without_bootstrap() {
    let mut config = make_config();
    config.timing.join_timeout_ms = 150;
    let (mut lone, mut events) = make_link(config);

    // nobody listens here
    let bootstrap = SocketAddrV4::new(Ipv4Addr::LOCALHOST, 9);
    lone.join_network(bootstrap, false).await.unwrap();
    assert_eq!(lone.join_step(), JoinStep::VersionRequest);

    tokio::time::sleep(Duration::from_millis(200)).await;
    lone.check_timers().await;

    assert_eq!(lone.join_step(), JoinStep::Idle);
    assert_eq!(lone.router().spool_len(), 0);
    assert!(drain_events(&mut events)
        .iter()
        .any(|e| matches!(e, LinkEvent::JoinFailed)));
}
