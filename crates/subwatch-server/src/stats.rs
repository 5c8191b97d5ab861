//! Stats refresher: periodic recomputation of a connection's
//! [`NetworkStats`] snapshot.

use std::sync::Arc;
use std::time::Duration;

use subwatch_chain::ChainError;
use subwatch_core::{EraProgress, NetworkStats, ValidatorCounts, unix_millis};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::connection::ChainConnection;

/// Query everything for one snapshot.
///
/// The best and finalized heads are required. Issuance, validator counts
/// and era counters are only queried when the runtime has the modules,
/// and a failure there degrades to zero instead of failing the tick.
pub(crate) async fn collect_stats(conn: &ChainConnection) -> Result<NetworkStats, ChainError> {
    let rpc = conn.rpc();
    let metadata = conn.metadata();
    let capabilities = metadata.capabilities;

    let best = rpc.best_head().await?;
    let finalized = rpc.finalized_head().await?;

    let total_issuance = if capabilities.has_balances {
        rpc.total_issuance().await.unwrap_or_else(|e| {
            tracing::debug!("Total issuance unavailable on {}: {}", conn.id(), e);
            0
        })
    } else {
        0
    };

    let validators = if capabilities.has_validator_set() {
        rpc.validator_counts().await.unwrap_or_else(|e| {
            tracing::debug!("Validator counts unavailable on {}: {}", conn.id(), e);
            ValidatorCounts::default()
        })
    } else {
        ValidatorCounts::default()
    };

    let progress = if capabilities.has_staking || capabilities.has_session || capabilities.has_babe
    {
        rpc.era_progress(capabilities).await.unwrap_or_else(|e| {
            tracing::debug!("Era progress unavailable on {}: {}", conn.id(), e);
            EraProgress::default()
        })
    } else {
        EraProgress::default()
    };

    Ok(NetworkStats {
        chain_id: conn.id().clone(),
        timestamp_ms: unix_millis(),
        block_number: best.number,
        block_hash: best.hash,
        block_time_ms: metadata.block_time_ms,
        finalized_block: finalized.number,
        total_issuance: total_issuance.to_string(),
        active_validators: validators.active,
        waiting_validators: validators.waiting(),
        total_validators: validators.total,
        era: progress.era,
        epoch: progress.epoch,
        session_progress: progress.session_progress,
    })
}

/// Run one refresh tick within `query_timeout`.
///
/// On failure the tick is abandoned and the previous snapshot stays
/// visible. Returns whether a new snapshot was committed.
pub(crate) async fn refresh_once(conn: &ChainConnection, query_timeout: Duration) -> bool {
    let stats = match tokio::time::timeout(query_timeout, collect_stats(conn)).await {
        Ok(Ok(stats)) => stats,
        Ok(Err(e)) => {
            tracing::warn!("Stats refresh for {} failed: {}", conn.id(), e);
            return false;
        }
        Err(_) => {
            tracing::warn!(
                "Stats refresh for {} failed: {}",
                conn.id(),
                ChainError::Timeout("stats query")
            );
            return false;
        }
    };

    let block = stats.block_number;
    let committed = conn.replace_stats(stats).await;
    if committed {
        tracing::debug!("Stats for {} refreshed at #{}", conn.id(), block);
    }
    committed
}

/// Refresh on a fixed interval, starting immediately, until cancelled.
pub(crate) fn spawn_stats_refresher(
    conn: Arc<ChainConnection>,
    token: CancellationToken,
    interval: Duration,
    query_timeout: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticker.tick() => {}
            }
            refresh_once(&conn, query_timeout).await;
        }
        tracing::debug!("Stats refresher for {} stopped", conn.id());
    })
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use subwatch_core::ChainCapabilities;

    use super::*;
    use crate::testing::{FakeRpc, detached_connection, fake_facts, full_capabilities};

    const QUERY: Duration = Duration::from_millis(300);

    fn fake(capabilities: ChainCapabilities) -> (Arc<FakeRpc>, Arc<ChainConnection>) {
        let rpc = Arc::new(FakeRpc::new(fake_facts(capabilities)));
        let conn = detached_connection(rpc.clone());
        (rpc, conn)
    }

    #[tokio::test]
    async fn test_failed_tick_then_success() {
        let (rpc, conn) = fake(full_capabilities());
        rpc.fail_stats(1);

        assert!(!refresh_once(&conn, QUERY).await);
        assert!(conn.stats().await.is_none());

        assert!(refresh_once(&conn, QUERY).await);
        let stats = conn.stats().await.unwrap();
        assert_eq!(stats.block_number, 100);
        assert_eq!(stats.finalized_block, 98);
        assert_eq!(stats.active_validators, 297);
        assert_eq!(stats.waiting_validators, 53);
        assert_eq!(stats.total_validators, 350);
        assert_eq!(stats.total_issuance, "12000000000000000000");
        assert_eq!(stats.era, 1_500);
        assert_eq!(stats.block_time_ms, 6_000);
        assert_eq!(&stats.chain_id, conn.id());
    }

    #[tokio::test]
    async fn test_failed_tick_keeps_previous_snapshot() {
        let (rpc, conn) = fake(full_capabilities());
        assert!(refresh_once(&conn, QUERY).await);
        let before = conn.stats().await.unwrap();

        rpc.set_best(120);
        rpc.fail_stats(1);
        assert!(!refresh_once(&conn, QUERY).await);
        assert_eq!(conn.stats().await.unwrap().block_number, before.block_number);

        assert!(refresh_once(&conn, QUERY).await);
        assert_eq!(conn.stats().await.unwrap().block_number, 120);
    }

    #[tokio::test]
    async fn test_missing_modules_degrade_to_zero() {
        let (_rpc, conn) = fake(ChainCapabilities::default());

        assert!(refresh_once(&conn, QUERY).await);

        let stats = conn.stats().await.unwrap();
        assert_eq!(stats.block_number, 100);
        assert_eq!(stats.total_issuance, "0");
        assert_eq!(stats.active_validators, 0);
        assert_eq!(stats.total_validators, 0);
        assert_eq!(stats.era, 0);
        assert_eq!(stats.session_progress, 0.0);
    }

    #[tokio::test]
    async fn test_no_snapshot_after_cancel() {
        let (_rpc, conn) = fake(full_capabilities());
        conn.cancel_token().cancel();

        assert!(!refresh_once(&conn, QUERY).await);
        assert!(conn.stats().await.is_none());
    }

    #[tokio::test]
    async fn test_refresher_ticks_immediately_and_stops() {
        let (rpc, conn) = fake(full_capabilities());
        let token = CancellationToken::new();
        let task = spawn_stats_refresher(
            conn.clone(),
            token.clone(),
            Duration::from_secs(3600),
            QUERY,
        );

        assert!(wait_for!(conn.stats().await.is_some()));
        assert_eq!(rpc.best_head_calls.load(Ordering::SeqCst), 1);

        token.cancel();
        task.await.unwrap();
    }
}
