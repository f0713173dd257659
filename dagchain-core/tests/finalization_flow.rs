use dagchain_core::{
    ContentClient, CoreConfig, DagChainBuilder, FinalizationReconciler, FinalityEvent, IndexStore,
    MemoryContentStore, MemoryIndexStore, PendingTransactionLedger, RetrievalEngine,
    SlidingWindowIndexer, TimePeriod, keys,
};
use std::sync::Arc;

fn finality_event(name: &str, height: u64, timestamp: i64) -> Vec<u8> {
    serde_json::json!({
        "txHash": format!("0x{:04}", height),
        "requestID": format!("req-{}", height),
        "event_name": name,
        "event_data": {
            "apiKeyHash": "0xkey",
            "tentativeBlockHeight": height,
            "projectId": "pair_total_reserves",
            "snapshotCid": format!("snapshot-{}", height),
            "payloadCommitId": format!("commit-{}", height),
            "timestamp": timestamp,
        }
    })
    .to_string()
    .into_bytes()
}

#[tokio::test]
async fn test_commit_to_indexed_window() {
    let project = "pair_total_reserves";
    let config = CoreConfig::default();
    let index = Arc::new(MemoryIndexStore::new());
    let content = ContentClient::new(
        Arc::new(MemoryContentStore::new()),
        config.content_timeout(),
    );

    let ledger = PendingTransactionLedger::new(index.clone());
    let builder = DagChainBuilder::new(index.clone(), content.clone());
    let reconciler = FinalizationReconciler::new(builder.clone(), ledger.clone());
    let engine = RetrievalEngine::new(index.clone(), content.clone(), &config);
    let indexer = SlidingWindowIndexer::new(index.clone(), content, config.indexer.clone());

    for height in 1..=12u64 {
        ledger
            .add_pending(project, height, &format!("0x{:04}", height))
            .await
            .unwrap();
    }

    // Signals arrive out of order and height 7 is discarded upstream.
    let base = 1_700_000_000i64;
    for height in (1..=12u64).rev() {
        let name = if height == 7 { "RecordDiscarded" } else { "RecordAppended" };
        let event = FinalityEvent::parse(&finality_event(name, height, base + height as i64 * 600)).unwrap();
        reconciler.apply(event).await.unwrap();
    }

    let report = reconciler.finalize_ready(project).await.unwrap();
    assert_eq!(report.built.len(), 6);
    assert_eq!(report.stopped_at, Some(7));
    assert_eq!(
        ledger.discarded(project).await.unwrap(),
        vec![("0x0007".to_string(), 7)]
    );

    let fetched = engine.retrieve(1, 6, project).await.unwrap();
    assert!(fetched.is_complete());
    assert_eq!(fetched.blocks.len(), 6);
    let top = &fetched.blocks[&report.built[5].cid];
    assert_eq!(top.prev_cid.as_deref(), Some(report.built[4].cid.as_str()));
    assert_eq!(top.payload.cid, "snapshot-6");

    let plan = engine.plan(1, 6, project).await.unwrap();
    assert_eq!(plan.overlap.max_overlap, 100.0);
    assert!(plan.containers.required.is_empty());

    index
        .hset(keys::INDEXES_REQUESTED, project, r#"{"series": ["1h"]}"#)
        .await
        .unwrap();
    let cycle = indexer.build_all().await.unwrap();
    assert_eq!(cycle.succeeded, 1);
    // Blocks are ten minutes apart; the hour before block 6 starts at 1.
    let marker = indexer.markers(project, TimePeriod::Hour).await.unwrap().unwrap();
    assert_eq!((marker.head, marker.tail), (6, 1));
}
