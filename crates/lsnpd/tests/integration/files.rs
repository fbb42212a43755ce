//! End-to-end file transfer: accept, chunk loss, rejection, and the final
//! byte-for-byte comparison.

use std::time::Duration;

use tokio::time::timeout;

use crate::harness::{spawn_relay, wait_for, TestPeer};

/// 3172 bytes → 4 chunks at 1024, one chunk dropped once and repaired by
/// the per-chunk retry.
#[tokio::test]
async fn file_transfer_survives_chunk_loss() {
    let a = TestPeer::spawn("alice").await;
    let b = TestPeer::spawn("bob").await;

    // Drop the first FILE_CHUNK that flows A→B.
    let relay = spawn_relay(a.addr, b.addr, "TYPE: FILE_CHUNK", 1).await;
    a.introduce(&b, Some(relay));

    let payload: Vec<u8> = (0..3172u32).map(|i| (i * 7 % 256) as u8).collect();
    let source = a.data_dir.join("payload.bin");
    std::fs::create_dir_all(&a.data_dir).unwrap();
    std::fs::write(&source, &payload).unwrap();

    // Sender's offer blocks until B decides, so run it as its own task.
    let sender = a.controller.clone();
    let to = b.controller.me.clone();
    let offer_task =
        tokio::spawn(async move { sender.send_file(&to, &source, "test payload").await });

    // B sees the offer and accepts it.
    let offer = wait_for(Duration::from_secs(5), || {
        b.controller.transfers.pending_offers().into_iter().next()
    })
    .await
    .expect("offer reaches B");
    assert_eq!(offer.filename, "payload.bin");
    assert_eq!(offer.filesize, 3172);
    b.controller.transfers.accept(&offer.file_id).await.unwrap();

    let file_id = timeout(Duration::from_secs(15), offer_task)
        .await
        .expect("offer resolves once accepted")
        .unwrap()
        .unwrap();
    assert_eq!(file_id, offer.file_id);

    // All 4 chunks eventually land (one needed a retry) and the file is
    // written under the sender-scoped download directory.
    let written = wait_for(Duration::from_secs(15), || {
        let path = b
            .data_dir
            .join(a.controller.me.to_string())
            .join("downloads")
            .join("payload.bin");
        path.exists().then_some(path)
    })
    .await
    .expect("file reassembles despite the dropped chunk");
    assert_eq!(std::fs::read(&written).unwrap(), payload);

    // A received FILE_RECEIVED, so its outgoing entry is gone.
    wait_for(Duration::from_secs(10), || {
        a.controller.transfers.transfers().is_empty().then_some(())
    })
    .await
    .expect("sender sees the terminal receipt");
}

#[tokio::test]
async fn rejected_offer_aborts_the_transfer() {
    let a = TestPeer::spawn("alice").await;
    let b = TestPeer::spawn("bob").await;
    a.introduce(&b, None);

    let source = a.data_dir.join("unwanted.txt");
    std::fs::create_dir_all(&a.data_dir).unwrap();
    std::fs::write(&source, b"no thanks").unwrap();

    let sender = a.controller.clone();
    let to = b.controller.me.clone();
    let offer_task = tokio::spawn(async move { sender.send_file(&to, &source, "").await });

    let offer = wait_for(Duration::from_secs(5), || {
        b.controller.transfers.pending_offers().into_iter().next()
    })
    .await
    .expect("offer reaches B");
    b.controller.transfers.reject(&offer.file_id).await.unwrap();

    let result = timeout(Duration::from_secs(10), offer_task)
        .await
        .unwrap()
        .unwrap();
    assert!(result.is_err(), "rejection aborts the send");

    // Neither side keeps transfer state.
    assert!(a.controller.transfers.transfers().is_empty());
    assert!(b.controller.transfers.transfers().is_empty());

    // No chunk was ever sent, so nothing can have been written.
    let downloads = b.data_dir.join(a.controller.me.to_string());
    assert!(!downloads.exists());
}

#[tokio::test]
async fn duplicate_offer_records_are_ignored() {
    let a = TestPeer::spawn("alice").await;
    let b = TestPeer::spawn("bob").await;
    a.introduce(&b, None);

    let source = a.data_dir.join("once.txt");
    std::fs::create_dir_all(&a.data_dir).unwrap();
    std::fs::write(&source, b"exactly once").unwrap();

    let sender = a.controller.clone();
    let to = b.controller.me.clone();
    let offer_task = tokio::spawn(async move { sender.send_file(&to, &source, "").await });

    wait_for(Duration::from_secs(5), || {
        (!b.controller.transfers.pending_offers().is_empty()).then_some(())
    })
    .await
    .expect("offer arrives");
    assert_eq!(b.controller.transfers.pending_offers().len(), 1);

    let offer = &b.controller.transfers.pending_offers()[0];
    b.controller.transfers.accept(&offer.file_id).await.unwrap();

    timeout(Duration::from_secs(10), offer_task)
        .await
        .unwrap()
        .unwrap()
        .unwrap();

    let written = wait_for(Duration::from_secs(10), || {
        let path = b
            .data_dir
            .join(a.controller.me.to_string())
            .join("downloads")
            .join("once.txt");
        path.exists().then_some(path)
    })
    .await
    .unwrap();
    assert_eq!(std::fs::read(written).unwrap(), b"exactly once");
}
