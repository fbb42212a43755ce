//! Follow, post fan-out, and like scenarios across two live peers.

use std::time::Duration;

use tokio::time::timeout;

use lsnp_core::message::LikeAction;
use lsnpd::reliability::Delivery;

use crate::harness::{wait_for, TestPeer};

#[tokio::test]
async fn posts_reach_followers_and_stop_after_unfollow() {
    let a = TestPeer::spawn("alice").await;
    let b = TestPeer::spawn("bob").await;
    a.introduce(&b, None);

    // A follows B; B learns about A's address from the FOLLOW itself.
    let delivery = timeout(Duration::from_secs(5), a.controller.follow(&b.controller.me))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(delivery, Delivery::Acked);
    assert!(a.controller.social.is_following(&b.controller.me));

    wait_for(Duration::from_secs(3), || {
        b.controller
            .social
            .followers()
            .contains(&a.controller.me)
            .then_some(())
    })
    .await
    .expect("B records A as a follower");

    // B posts; A stores it.
    let sent = b.controller.post("hello").await.unwrap();
    assert_eq!(sent, 1);
    wait_for(Duration::from_secs(5), || {
        let posts = a.controller.social.posts_seen(lsnp_core::now_unix());
        posts.iter().any(|p| p.content == "hello").then_some(())
    })
    .await
    .expect("post reaches the follower");

    // A unfollows; the next post goes nowhere.
    let delivery = timeout(
        Duration::from_secs(5),
        a.controller.unfollow(&b.controller.me),
    )
    .await
    .unwrap()
    .unwrap();
    assert_eq!(delivery, Delivery::Acked);
    wait_for(Duration::from_secs(3), || {
        (!b.controller.social.followers().contains(&a.controller.me)).then_some(())
    })
    .await
    .expect("B drops A from followers");

    let sent = b.controller.post("world").await.unwrap();
    assert_eq!(sent, 0, "no followers left to fan out to");

    tokio::time::sleep(Duration::from_millis(300)).await;
    let posts = a.controller.social.posts_seen(lsnp_core::now_unix());
    assert!(
        !posts.iter().any(|p| p.content == "world"),
        "unfollowed author's posts are not stored"
    );
}

#[tokio::test]
async fn posts_from_unfollowed_peers_are_not_stored() {
    let a = TestPeer::spawn("alice").await;
    let b = TestPeer::spawn("bob").await;
    // B knows A but A never followed B.
    b.introduce(&a, None);
    b.controller.social.add_follower(a.controller.me.clone());

    let sent = b.controller.post("unsolicited").await.unwrap();
    assert_eq!(sent, 1);

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert!(
        a.controller
            .social
            .posts_seen(lsnp_core::now_unix())
            .is_empty(),
        "receiver-side follow check drops the post"
    );
}

#[tokio::test]
async fn like_toggles_on_the_authors_copy() {
    let a = TestPeer::spawn("alice").await;
    let b = TestPeer::spawn("bob").await;
    a.introduce(&b, None);

    // B authors a post locally.
    let post = b.controller.social.create_post(
        b.controller.me.clone(),
        "nice weather".into(),
        60,
        lsnp_core::now_unix(),
    );

    // A likes it: B's authoritative like set gains A.
    let delivery = timeout(
        Duration::from_secs(5),
        a.controller.like(&post.id, &b.controller.me),
    )
    .await
    .unwrap()
    .unwrap();
    assert_eq!(delivery, Delivery::Acked);
    wait_for(Duration::from_secs(3), || {
        b.controller
            .social
            .likes_on(&post.id)
            .contains(&a.controller.me)
            .then_some(())
    })
    .await
    .expect("like lands on the author");

    // Liking again toggles to UNLIKE.
    assert_eq!(
        a.controller
            .social
            .toggle_my_like("some-other-post"),
        LikeAction::Like
    );
    let delivery = timeout(
        Duration::from_secs(5),
        a.controller.like(&post.id, &b.controller.me),
    )
    .await
    .unwrap()
    .unwrap();
    assert_eq!(delivery, Delivery::Acked);
    wait_for(Duration::from_secs(3), || {
        b.controller.social.likes_on(&post.id).is_empty().then_some(())
    })
    .await
    .expect("unlike removes A from the like set");
}
