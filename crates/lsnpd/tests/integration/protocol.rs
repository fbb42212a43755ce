//! Group routing, token revocation, and game message transport.

use std::net::Ipv4Addr;
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::time::timeout;

use lsnp_core::message::{new_message_id, Dm, Revoke};
use lsnp_core::token::{mint_at, Scope};
use lsnp_core::{now_unix, PeerId, Record};

use crate::harness::{wait_for, TestPeer};

#[tokio::test]
async fn group_create_and_message_route_to_members() {
    let a = TestPeer::spawn("alice").await;
    let b = TestPeer::spawn("bob").await;
    a.introduce(&b, None);

    let group_id = a
        .controller
        .create_group("lunch", vec![b.controller.me.clone()])
        .await
        .unwrap();

    // B learns the group from the wire.
    wait_for(Duration::from_secs(5), || {
        b.controller.groups.get(&group_id).map(|_| ())
    })
    .await
    .expect("GROUP_CREATE reaches B");

    // B answers into the group; A's inbox shows the routed line.
    let sent = b.controller.group_message("lunch", "im in").await.unwrap();
    assert_eq!(sent, 1);
    wait_for(Duration::from_secs(5), || {
        a.controller
            .social
            .inbox()
            .iter()
            .any(|e| e.content.contains("im in") && e.content.contains("lunch"))
            .then_some(())
    })
    .await
    .expect("group message reaches A");
}

#[tokio::test]
async fn group_messages_from_unknown_groups_drop() {
    let b = TestPeer::spawn("bob").await;

    let socket = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
    let mallory: PeerId = "mallory@127.0.0.1".parse().unwrap();
    let record = Record::of_type("GROUP_MSG")
        .with("FROM", &mallory)
        .with("GROUP_ID", "no-such-group")
        .with("TIMESTAMP", now_unix())
        .with("MESSAGE_ID", new_message_id())
        .with("TOKEN", mint_at(&mallory, Scope::Group, 600, now_unix()))
        .with("CONTENT", "psst");
    socket
        .send_to(&record.serialize().unwrap(), b.addr)
        .await
        .unwrap();

    let mut buf = [0u8; 2048];
    let reply = timeout(Duration::from_secs(2), socket.recv_from(&mut buf)).await;
    assert!(reply.is_err(), "unroutable group message is not ACKed");
    assert!(b.controller.social.inbox().is_empty());
}

#[tokio::test]
async fn revoked_token_stops_authorizing() {
    let b = TestPeer::spawn("bob").await;

    let socket = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
    let mallory: PeerId = "mallory@127.0.0.1".parse().unwrap();
    let tok = mint_at(&mallory, Scope::Chat, 600, now_unix());

    // First DM with the token goes through.
    let dm = Dm {
        from: mallory.clone(),
        to: b.controller.me.clone(),
        content: "one".into(),
        message_id: new_message_id(),
        timestamp: now_unix(),
        token: tok.clone(),
    };
    socket
        .send_to(&dm.to_record().serialize().unwrap(), b.addr)
        .await
        .unwrap();
    wait_for(Duration::from_secs(3), || {
        (b.controller.social.inbox().len() == 1).then_some(())
    })
    .await
    .expect("first dm delivered");

    // Mallory revokes the token.
    let revoke = Revoke {
        from: mallory.clone(),
        revoked_token: tok.clone(),
        message_id: new_message_id(),
        timestamp: now_unix(),
    };
    socket
        .send_to(&revoke.to_record().serialize().unwrap(), b.addr)
        .await
        .unwrap();

    // Wait for the revocation to be recorded (its ACK is the signal).
    let mut buf = [0u8; 2048];
    let mut acked_revoke = false;
    // Drain ACKs from the DM and the REVOKE.
    for _ in 0..2 {
        if let Ok(Ok((len, _))) =
            timeout(Duration::from_secs(3), socket.recv_from(&mut buf)).await
        {
            let record = Record::parse(&buf[..len]).unwrap();
            if record.get("MESSAGE_ID") == Some(revoke.message_id.as_str()) {
                acked_revoke = true;
            }
        }
    }
    assert!(acked_revoke, "revocation is acknowledged");

    // The same token no longer authorizes anything.
    let dm2 = Dm {
        content: "two".into(),
        message_id: new_message_id(),
        ..dm
    };
    socket
        .send_to(&dm2.to_record().serialize().unwrap(), b.addr)
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(b.controller.social.inbox().len(), 1, "revoked token drops");
}

#[tokio::test]
async fn game_records_are_transported_and_sessions_tracked() {
    let b = TestPeer::spawn("bob").await;

    let socket = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
    let mallory: PeerId = "mallory@127.0.0.1".parse().unwrap();
    let game_token = || mint_at(&mallory, Scope::Game, 600, now_unix());

    let invite = Record::of_type("GAME_INVITE")
        .with("FROM", &mallory)
        .with("TO", &b.controller.me)
        .with("GAMEID", "g7")
        .with("SYMBOL", "X")
        .with("TIMESTAMP", now_unix())
        .with("MESSAGE_ID", new_message_id())
        .with("TOKEN", game_token());
    socket
        .send_to(&invite.serialize().unwrap(), b.addr)
        .await
        .unwrap();

    wait_for(Duration::from_secs(3), || {
        b.controller
            .games
            .active_games()
            .contains(&"g7".to_string())
            .then_some(())
    })
    .await
    .expect("invite opens a session");

    let result = Record::of_type("GAME_RESULT")
        .with("FROM", &mallory)
        .with("GAMEID", "g7")
        .with("RESULT", "FORFEIT")
        .with("TIMESTAMP", now_unix())
        .with("MESSAGE_ID", new_message_id())
        .with("TOKEN", game_token());
    socket
        .send_to(&result.serialize().unwrap(), b.addr)
        .await
        .unwrap();

    wait_for(Duration::from_secs(3), || {
        b.controller.games.active_games().is_empty().then_some(())
    })
    .await
    .expect("result destroys the session");
}
