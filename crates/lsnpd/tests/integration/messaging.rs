//! DM delivery: acknowledgment, retry under loss, idempotent receive, and
//! token expiry.

use std::net::Ipv4Addr;
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::time::timeout;

use lsnp_core::message::{new_message_id, Dm};
use lsnp_core::token::{mint_at, Scope};
use lsnp_core::{now_unix, PeerId, Record};
use lsnpd::reliability::Delivery;

use crate::harness::{spawn_relay, wait_for, TestPeer};

#[tokio::test]
async fn dm_is_delivered_and_acknowledged() {
    let a = TestPeer::spawn("alice").await;
    let b = TestPeer::spawn("bob").await;
    a.introduce(&b, None);

    let delivery = timeout(
        Duration::from_secs(5),
        a.controller.send_dm(&b.controller.me, "hi"),
    )
    .await
    .expect("send_dm should resolve")
    .expect("peer is known");
    assert_eq!(delivery, Delivery::Acked);

    let inbox = b.controller.social.inbox();
    assert_eq!(inbox.len(), 1);
    assert_eq!(inbox[0].content, "hi");
    assert_eq!(inbox[0].from, a.controller.me);

    // The reliability entry self-evicted on ACK.
    assert_eq!(a.controller.reliability.inflight_len(), 0);
}

#[tokio::test]
async fn dm_survives_a_dropped_first_transmission() {
    let a = TestPeer::spawn("alice").await;
    let b = TestPeer::spawn("bob").await;

    // A reaches B only through a relay that eats the first DM datagram.
    let relay = spawn_relay(a.addr, b.addr, "TYPE: DM", 1).await;
    a.introduce(&b, Some(relay));

    let started = tokio::time::Instant::now();
    let delivery = timeout(
        Duration::from_secs(10),
        a.controller.send_dm(&b.controller.me, "hi"),
    )
    .await
    .expect("retry should get through")
    .unwrap();
    assert_eq!(delivery, Delivery::Acked);

    // Delivery required the first retry, so at least the base interval passed.
    assert!(started.elapsed() >= Duration::from_secs(2));

    let inbox = b.controller.social.inbox();
    assert_eq!(inbox.len(), 1, "exactly one copy lands");
    assert_eq!(inbox[0].content, "hi");
    assert_eq!(a.controller.reliability.inflight_len(), 0);
}

#[tokio::test]
async fn replayed_dm_datagrams_ack_but_do_not_redispatch() {
    let b = TestPeer::spawn("bob").await;

    // A hand-rolled sender, so the exact same datagram can be replayed.
    let socket = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
    let mallory: PeerId = "mallory@127.0.0.1".parse().unwrap();
    let dm = Dm {
        from: mallory.clone(),
        to: b.controller.me.clone(),
        content: "knock knock".into(),
        message_id: new_message_id(),
        timestamp: now_unix(),
        token: mint_at(&mallory, Scope::Chat, 600, now_unix()),
    };
    let datagram = dm.to_record().serialize().unwrap();

    let mut acks = 0;
    let mut buf = [0u8; 2048];
    for _ in 0..5 {
        socket.send_to(&datagram, b.addr).await.unwrap();
        let (len, _) = timeout(Duration::from_secs(3), socket.recv_from(&mut buf))
            .await
            .expect("every replay is ACKed")
            .unwrap();
        let record = Record::parse(&buf[..len]).unwrap();
        assert_eq!(record.message_type(), Some("ACK"));
        assert_eq!(record.get("MESSAGE_ID"), Some(dm.message_id.as_str()));
        acks += 1;
    }

    assert_eq!(acks, 5);
    let inbox = b.controller.social.inbox();
    assert_eq!(inbox.len(), 1, "inbox grows by exactly one entry");
}

#[tokio::test]
async fn expired_token_drops_the_message_silently() {
    let b = TestPeer::spawn("bob").await;

    let socket = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
    let mallory: PeerId = "mallory@127.0.0.1".parse().unwrap();
    let dm = Dm {
        from: mallory.clone(),
        to: b.controller.me.clone(),
        content: "too late".into(),
        message_id: new_message_id(),
        timestamp: now_unix(),
        // ttl 1, minted 2 seconds ago: already expired on arrival.
        token: mint_at(&mallory, Scope::Chat, 1, now_unix() - 2),
    };
    let datagram = dm.to_record().serialize().unwrap();
    socket.send_to(&datagram, b.addr).await.unwrap();

    // No ACK comes back and the inbox stays empty.
    let mut buf = [0u8; 2048];
    let reply = timeout(Duration::from_secs(2), socket.recv_from(&mut buf)).await;
    assert!(reply.is_err(), "expired token must not be ACKed");
    assert!(b.controller.social.inbox().is_empty());
}

#[tokio::test]
async fn wrong_scope_token_is_rejected() {
    let b = TestPeer::spawn("bob").await;

    let socket = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
    let mallory: PeerId = "mallory@127.0.0.1".parse().unwrap();
    let dm = Dm {
        from: mallory.clone(),
        to: b.controller.me.clone(),
        content: "wrong papers".into(),
        message_id: new_message_id(),
        timestamp: now_unix(),
        token: mint_at(&mallory, Scope::File, 600, now_unix()),
    };
    socket
        .send_to(&dm.to_record().serialize().unwrap(), b.addr)
        .await
        .unwrap();

    let mut buf = [0u8; 2048];
    let reply = timeout(Duration::from_secs(2), socket.recv_from(&mut buf)).await;
    assert!(reply.is_err());
    assert!(b.controller.social.inbox().is_empty());
}

#[tokio::test]
async fn unknown_sender_is_upserted_from_source() {
    let b = TestPeer::spawn("bob").await;

    let socket = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
    let mallory: PeerId = "mallory@127.0.0.1".parse().unwrap();
    let dm = Dm {
        from: mallory.clone(),
        to: b.controller.me.clone(),
        content: "hello stranger".into(),
        message_id: new_message_id(),
        timestamp: now_unix(),
        token: mint_at(&mallory, Scope::Chat, 600, now_unix()),
    };
    socket
        .send_to(&dm.to_record().serialize().unwrap(), b.addr)
        .await
        .unwrap();

    let found = wait_for(Duration::from_secs(3), || {
        b.controller.registry.lookup(&mallory)
    })
    .await
    .expect("discovery via use");
    assert_eq!(found.port, socket.local_addr().unwrap().port());
}
