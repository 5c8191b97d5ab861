//! Block monitor: the new-heads and finalized-heads listeners of one
//! connection.
//!
//! Both listeners write the same rolling window through the connection's
//! lock. A failed block fetch never ends a listener; it is logged and the
//! head is kept as a degraded record so the window still tracks height.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use subwatch_chain::{ChainHead, HeadStream};
use subwatch_core::{BlockRecord, unix_millis};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::connection::ChainConnection;

/// Fetch the body of `head`, falling back to a degraded record.
pub(crate) async fn build_record(
    conn: &ChainConnection,
    head: ChainHead,
    fetch_timeout: Duration,
) -> BlockRecord {
    let received_at = unix_millis();

    match tokio::time::timeout(fetch_timeout, conn.rpc().fetch_block(&head)).await {
        Ok(Ok(record)) => record,
        Ok(Err(e)) => {
            tracing::warn!(
                "Failed to fetch block #{} on {}: {}",
                head.number,
                conn.id(),
                e
            );
            BlockRecord::degraded(head.number, head.hash, head.parent_hash, received_at)
        }
        Err(_) => {
            tracing::warn!(
                "Fetching block #{} on {} timed out after {:?}",
                head.number,
                conn.id(),
                fetch_timeout
            );
            BlockRecord::degraded(head.number, head.hash, head.parent_hash, received_at)
        }
    }
}

/// Handle one new-head notification.
pub(crate) async fn on_new_head(conn: &ChainConnection, head: ChainHead, fetch_timeout: Duration) {
    let number = head.number;
    let record = build_record(conn, head, fetch_timeout).await;
    if conn.record_block(record).await {
        tracing::debug!("New block #{} on {}", number, conn.id());
    }
}

/// Handle one finalized-head notification.
pub(crate) async fn on_finalized_head(conn: &ChainConnection, head: ChainHead) {
    if conn.mark_finalized(head.number).await {
        tracing::debug!("Block #{} finalized on {}", head.number, conn.id());
    }
}

pub(crate) fn spawn_new_heads(
    conn: Arc<ChainConnection>,
    mut heads: HeadStream,
    token: CancellationToken,
    fetch_timeout: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let next = tokio::select! {
                _ = token.cancelled() => break,
                next = heads.next() => next,
            };

            match next {
                Some(Ok(head)) => on_new_head(&conn, head, fetch_timeout).await,
                Some(Err(e)) => {
                    tracing::warn!("Bad new head on {}: {}", conn.id(), e);
                }
                None => {
                    if !token.is_cancelled() {
                        tracing::warn!("New heads subscription for {} ended", conn.id());
                        conn.mark_heads_closed();
                    }
                    break;
                }
            }
        }
        tracing::debug!("New heads listener for {} stopped", conn.id());
    })
}

pub(crate) fn spawn_finalized_heads(
    conn: Arc<ChainConnection>,
    mut heads: HeadStream,
    token: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let next = tokio::select! {
                _ = token.cancelled() => break,
                next = heads.next() => next,
            };

            match next {
                Some(Ok(head)) => on_finalized_head(&conn, head).await,
                Some(Err(e)) => {
                    tracing::warn!("Bad finalized head on {}: {}", conn.id(), e);
                }
                None => {
                    if !token.is_cancelled() {
                        tracing::warn!("Finalized heads subscription for {} ended", conn.id());
                        conn.mark_heads_closed();
                    }
                    break;
                }
            }
        }
        tracing::debug!("Finalized heads listener for {} stopped", conn.id());
    })
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use subwatch_chain::ChainRpc;

    use super::*;
    use crate::testing::{FakeRpc, detached_connection, fake_facts, full_capabilities, head};

    const FETCH: Duration = Duration::from_millis(300);

    fn fake() -> (Arc<FakeRpc>, Arc<ChainConnection>) {
        let rpc = Arc::new(FakeRpc::new(fake_facts(full_capabilities())));
        let conn = detached_connection(rpc.clone());
        (rpc, conn)
    }

    fn numbers(blocks: &[BlockRecord]) -> Vec<u64> {
        blocks.iter().map(|b| b.number).collect()
    }

    #[tokio::test]
    async fn test_heads_then_finality() {
        let (_rpc, conn) = fake();

        for n in [100, 101, 102] {
            on_new_head(&conn, head(n), FETCH).await;
        }
        on_finalized_head(&conn, head(101)).await;

        let blocks = conn.blocks().await;
        assert_eq!(numbers(&blocks), vec![102, 101, 100]);
        let finalized: Vec<_> = blocks.iter().map(|b| b.finalized).collect();
        assert_eq!(finalized, vec![false, true, false]);
        assert_eq!(blocks[0].extrinsics_count, 3);
    }

    #[tokio::test]
    async fn test_window_is_bounded_and_newest_first() {
        let (_rpc, conn) = fake();

        for n in 1..=15 {
            on_new_head(&conn, head(n), FETCH).await;
        }

        let blocks = conn.blocks().await;
        assert_eq!(blocks.len(), 10);
        assert_eq!(numbers(&blocks), (6..=15).rev().collect::<Vec<_>>());
        assert_eq!(conn.latest_block().await.unwrap().number, 15);
    }

    #[tokio::test]
    async fn test_finality_outside_window_is_ignored() {
        let (_rpc, conn) = fake();
        on_new_head(&conn, head(50), FETCH).await;

        on_finalized_head(&conn, head(49)).await;

        let blocks = conn.blocks().await;
        assert_eq!(blocks.len(), 1);
        assert!(!blocks[0].finalized);
    }

    #[tokio::test]
    async fn test_failed_fetch_keeps_degraded_record() {
        let (rpc, conn) = fake();
        rpc.fail_block(200);

        on_new_head(&conn, head(200), FETCH).await;
        on_new_head(&conn, head(201), FETCH).await;

        let blocks = conn.blocks().await;
        assert_eq!(numbers(&blocks), vec![201, 200]);
        assert!(!blocks[0].degraded);
        assert!(blocks[1].degraded);
        assert_eq!(blocks[1].hash, head(200).hash);
        assert_eq!(blocks[1].extrinsics_count, 0);
        assert_eq!(rpc.fetch_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_no_commit_after_cancel() {
        let (_rpc, conn) = fake();
        on_new_head(&conn, head(1), FETCH).await;

        conn.cancel_token().cancel();
        on_new_head(&conn, head(2), FETCH).await;
        on_finalized_head(&conn, head(1)).await;

        let blocks = conn.blocks().await;
        assert_eq!(numbers(&blocks), vec![1]);
        assert!(!blocks[0].finalized);
    }

    #[tokio::test]
    async fn test_listeners_follow_streams() {
        let (rpc, conn) = fake();
        let token = CancellationToken::new();
        let new_heads = rpc.subscribe_new_heads().await.unwrap();
        let finalized = rpc.subscribe_finalized_heads().await.unwrap();
        let heads_task = spawn_new_heads(conn.clone(), new_heads, token.clone(), FETCH);
        let finality_task = spawn_finalized_heads(conn.clone(), finalized, token.clone());

        rpc.push_head(100);
        rpc.push_head(101);
        rpc.push_head(102);
        assert!(wait_for!(conn.blocks().await.len() == 3));

        rpc.push_finalized(101);
        assert!(wait_for!(conn.blocks().await[1].finalized));
        assert_eq!(numbers(&conn.blocks().await), vec![102, 101, 100]);

        token.cancel();
        heads_task.await.unwrap();
        finality_task.await.unwrap();
        assert!(conn.is_connected());
    }

    #[tokio::test]
    async fn test_stream_end_marks_disconnected() {
        let (rpc, conn) = fake();
        let token = CancellationToken::new();
        let new_heads = rpc.subscribe_new_heads().await.unwrap();
        let task = spawn_new_heads(conn.clone(), new_heads, token, FETCH);

        rpc.end_new_heads();
        task.await.unwrap();

        assert!(!conn.is_connected());
        assert_eq!(
            conn.status(),
            subwatch_core::ConnectionStatus::Disconnected
        );
    }
}
