//! Checks against a live node. Needs network access, so ignored by default.
//!
//! Run with: cargo test -p subwatch-chain --test live_endpoint -- --ignored --nocapture
//! Set SUBWATCH_TEST_ENDPOINT to use another node.

use std::time::Duration;

use futures::StreamExt;
use subwatch_chain::{ChainConnector, SubxtConnector};

fn endpoint() -> String {
    std::env::var("SUBWATCH_TEST_ENDPOINT").unwrap_or_else(|_| "wss://rpc.polkadot.io".into())
}

fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("subwatch_chain=debug,info")
        .try_init();
}

#[tokio::test]
#[ignore]
async fn live_facts_and_heads() {
    init_logging();

    let rpc = SubxtConnector
        .connect(&endpoint())
        .await
        .expect("Failed to connect");

    let facts = rpc.chain_facts().await.expect("Failed to fetch chain facts");
    println!("Connected to {} ({})", facts.chain_name, facts.token_symbol);
    assert!(!facts.chain_name.is_empty());
    assert!(facts.block_time_ms > 0);
    assert_eq!(facts.genesis_hash.len(), 66);

    let mut heads = rpc.subscribe_new_heads().await.expect("Failed to subscribe");
    let head = tokio::time::timeout(Duration::from_secs(30), heads.next())
        .await
        .expect("No head within 30s")
        .expect("Stream ended")
        .expect("Bad head");
    println!("Head #{} {}", head.number, head.hash);

    let block = rpc.fetch_block(&head).await.expect("Failed to fetch block");
    assert_eq!(block.number, head.number);
    assert!(block.size > 0);
    assert!(!block.degraded);

    let finalized = rpc.finalized_head().await.expect("Failed to fetch finalized head");
    assert!(finalized.number <= head.number + 1);

    rpc.close().await;
    assert!(!rpc.is_connected());
}

#[tokio::test]
#[ignore]
async fn live_stats_queries() {
    init_logging();

    let rpc = SubxtConnector
        .connect(&endpoint())
        .await
        .expect("Failed to connect");
    let facts = rpc.chain_facts().await.expect("Failed to fetch chain facts");

    let best = rpc.best_head().await.expect("Failed to fetch best head");
    println!("Best #{}", best.number);

    if facts.capabilities.has_balances {
        let issuance = rpc.total_issuance().await.expect("Failed to fetch issuance");
        assert!(issuance > 0);
    }

    if facts.capabilities.has_validator_set() {
        let counts = rpc.validator_counts().await.expect("Failed to count validators");
        println!("Validators: {} active of {}", counts.active, counts.total);
        assert!(counts.total >= counts.active);

        let validators = rpc
            .active_validators(0, 5, facts.ss58_format)
            .await
            .expect("Failed to list validators");
        assert!(validators.len() <= 5);
    }

    let progress = rpc
        .era_progress(facts.capabilities)
        .await
        .expect("Failed to fetch era progress");
    assert!((0.0..=1.0).contains(&progress.session_progress));
}
