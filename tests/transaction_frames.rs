//! Tests for transaction frames and transaction lifecycle rules

mod common;

use common::connected;
use stompwire::{AckMode, Command, ConnError, Frame, TransactionState};

/// Assert `frame` has the expected command and transaction header
fn verify_transaction_frame(frame: &Frame, expected_command: Command, expected_tx_id: &str) {
    assert_eq!(frame.command, expected_command);
    assert_eq!(frame.get_header("transaction"), Some(expected_tx_id));
}

#[tokio::test]
async fn begin_send_commit_frames() {
    let (conn, mut broker) = connected("1.2").await;
    let tx = conn.begin().await.unwrap();
    assert_eq!(tx.id(), "tx-1");
    verify_transaction_frame(&broker.recv().await, Command::Begin, "tx-1");

    tx.send("/queue/a", "text/plain", "in tx").await.unwrap();
    let send = broker.recv().await;
    verify_transaction_frame(&send, Command::Send, "tx-1");
    assert_eq!(send.body, b"in tx");

    tx.commit().await.unwrap();
    verify_transaction_frame(&broker.recv().await, Command::Commit, "tx-1");
    assert_eq!(tx.state(), TransactionState::Committed);
}

#[tokio::test]
async fn abort_frame_and_state() {
    let (conn, mut broker) = connected("1.2").await;
    let tx = conn.begin_with_id("batch-9").await.unwrap();
    verify_transaction_frame(&broker.recv().await, Command::Begin, "batch-9");

    tx.abort().await.unwrap();
    verify_transaction_frame(&broker.recv().await, Command::Abort, "batch-9");
    assert_eq!(
        conn.transaction_state("batch-9").await,
        Some(TransactionState::Aborted)
    );
}

#[tokio::test]
async fn generated_ids_increase() {
    let (conn, _broker) = connected("1.2").await;
    let a = conn.begin().await.unwrap();
    let b = conn.begin().await.unwrap();
    assert_eq!(a.id(), "tx-1");
    assert_eq!(b.id(), "tx-2");
}

#[tokio::test]
async fn committed_transaction_rejects_further_use() {
    let (conn, mut broker) = connected("1.2").await;
    let tx = conn.begin().await.unwrap();
    tx.commit().await.unwrap();
    broker.recv().await;
    broker.recv().await;

    assert!(matches!(
        tx.send("/queue/a", "text/plain", "late").await,
        Err(ConnError::Usage(_))
    ));
    let tagged = Frame::new(Command::Send)
        .header("destination", "/queue/a")
        .header("transaction", tx.id());
    assert!(matches!(conn.send_frame(tagged).await, Err(ConnError::Usage(_))));
    assert!(matches!(tx.commit().await, Err(ConnError::Usage(_))));
    assert!(matches!(tx.abort().await, Err(ConnError::Usage(_))));

    // nothing above reached the wire
    conn.send("/queue/marker", "text/plain", "m").await.unwrap();
    assert_eq!(
        broker.recv().await.get_header("destination"),
        Some("/queue/marker")
    );
}

#[tokio::test]
async fn duplicate_and_unknown_ids_are_usage_errors() {
    let (conn, _broker) = connected("1.2").await;
    conn.begin_with_id("dup").await.unwrap();
    assert!(matches!(
        conn.begin_with_id("dup").await,
        Err(ConnError::Usage(_))
    ));
    assert!(matches!(conn.commit("never-begun").await, Err(ConnError::Usage(_))));
    assert_eq!(conn.transaction_state("never-begun").await, None);
}

#[tokio::test]
async fn ack_inside_transaction_carries_header() {
    let (conn, mut broker) = connected("1.2").await;
    let mut sub = conn.subscribe("/queue/a", AckMode::Client).await.unwrap();
    broker.recv().await;
    broker.message(sub.id(), "5", "x").await;
    let message = sub.next_message().await.unwrap();

    let tx = conn.begin().await.unwrap();
    broker.recv().await;
    tx.ack(&sub, &message).await.unwrap();

    let ack = broker.recv().await;
    verify_transaction_frame(&ack, Command::Ack, tx.id());
    assert_eq!(ack.get_header("id"), Some("ack-5"));
}

#[tokio::test]
async fn commit_by_id_is_seen_by_the_handle() {
    let (conn, mut broker) = connected("1.2").await;
    let tx = conn.begin_with_id("by-id").await.unwrap();
    broker.recv().await;

    conn.commit("by-id").await.unwrap();
    verify_transaction_frame(&broker.recv().await, Command::Commit, "by-id");
    assert_eq!(tx.state(), TransactionState::Committed);
    assert!(matches!(
        tx.send("/queue/a", "text/plain", "late").await,
        Err(ConnError::Usage(_))
    ));
}
