//! Both synchronizers against a real LMDB store and a scripted upstream.

use std::sync::Arc;
use std::time::Duration;

use tezdel_nullables::{NullDelegationStore, NullUpstream, ScriptedResponse};
use tezdel_store::DelegationStore;
use tezdel_store_lmdb::LmdbDelegationStore;
use tezdel_sync::{DelegationClient, HistorySync, LiveSync, SyncMetrics};
use tokio_util::sync::CancellationToken;

const MAP_SIZE: usize = 64 * 1024 * 1024;

const THREE: &str = r#"[
  {"timestamp":"2018-07-01T10:00:00Z","sender":{"address":"tz1a"},"amount":100,"level":10,"id":1},
  {"timestamp":"2018-07-01T11:00:00Z","sender":{"address":"tz1b"},"amount":200,"level":11,"id":2},
  {"timestamp":"2019-02-03T04:05:06Z","sender":{"address":"tz1c"},"amount":300,"level":12,"id":3}
]"#;

const LATE: &str = r#"[
  {"timestamp":"2019-02-03T04:05:06Z","sender":{"address":"tz1c"},"amount":300,"level":12,"id":3},
  {"timestamp":"2019-02-03T04:05:09Z","sender":{"address":"tz1d"},"amount":400,"level":13,"id":4}
]"#;

fn lmdb() -> (tempfile::TempDir, Arc<LmdbDelegationStore>) {
    let dir = tempfile::tempdir().unwrap();
    let store = LmdbDelegationStore::open(dir.path(), MAP_SIZE).unwrap();
    (dir, Arc::new(store))
}

#[tokio::test]
async fn history_then_live_stores_each_delegation_once() {
    let upstream = NullUpstream::start().await;
    upstream.push(ScriptedResponse::ok(THREE));
    upstream.push(ScriptedResponse::ok(LATE));
    let (_dir, store) = lmdb();
    let client = DelegationClient::new(&upstream.url()).unwrap();
    let metrics = Arc::new(SyncMetrics::new());
    let root = CancellationToken::new();

    let history = HistorySync::new(client.clone(), store.clone(), Arc::clone(&metrics));
    history.sync(&root, None, None).await.unwrap();
    assert_eq!(store.count().unwrap(), 3);

    let mut live = LiveSync::new(client, Duration::from_secs(60), store.clone(), Arc::clone(&metrics));
    live.start(&root, Some("2019-02-03T04:05:06Z")).await.unwrap();
    live.stop().await;

    assert_eq!(store.count().unwrap(), 4);
    let y2019 = store.get_by_year("2019").unwrap();
    assert_eq!(y2019.len(), 2);
    assert_eq!(y2019[0].timestamp, "2019-02-03T04:05:09Z");
    assert_eq!(store.get_by_year("2018").unwrap().len(), 2);

    let exposition = metrics.encode().unwrap();
    assert!(exposition.contains("tezdel_delegations_fetched_total 5"));
    assert!(exposition.contains("tezdel_delegations_inserted_total 4"));
}

#[tokio::test]
async fn second_backfill_over_same_range_changes_nothing() {
    let upstream = NullUpstream::start().await;
    upstream.set_fallback(ScriptedResponse::ok(THREE));
    let (_dir, store) = lmdb();
    let client = DelegationClient::new(&upstream.url()).unwrap();
    let history = HistorySync::new(client, store.clone(), Arc::new(SyncMetrics::new()));
    let root = CancellationToken::new();

    history.sync(&root, None, None).await.unwrap();
    history.sync(&root, None, None).await.unwrap();

    assert_eq!(store.count().unwrap(), 3);
    let requests = upstream.requests();
    assert_eq!(requests[1].param("timestamp.ge"), Some("2019-02-03T04:05:06Z"));
}

#[tokio::test]
async fn live_loop_survives_a_failed_tick() {
    let upstream = NullUpstream::start().await;
    upstream.push(ScriptedResponse::empty_page());
    upstream.push(ScriptedResponse::status(500, "upstream down"));
    upstream.push(ScriptedResponse::ok(LATE));
    let store = Arc::new(NullDelegationStore::new());
    let metrics = Arc::new(SyncMetrics::new());
    let mut live = LiveSync::new(
        DelegationClient::new(&upstream.url()).unwrap(),
        Duration::from_secs(1),
        store.clone(),
        Arc::clone(&metrics),
    );

    live.start(&CancellationToken::new(), None).await.unwrap();
    tokio::time::timeout(Duration::from_secs(6), async {
        while store.all().len() < 2 {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    })
    .await
    .expect("live sync should recover after the failed tick");
    live.stop().await;

    assert!(upstream.request_count() >= 3);
    assert_eq!(metrics.live_poll_failures.get(), 1);
}

#[tokio::test]
async fn stopped_synchronizers_leave_store_closable() {
    let upstream = NullUpstream::start().await;
    upstream.set_delay(Duration::from_millis(1500));
    let (_dir, store) = lmdb();
    let client = DelegationClient::new(&upstream.url()).unwrap();
    let history = Arc::new(HistorySync::new(client, store.clone(), Arc::new(SyncMetrics::new())));
    let root = CancellationToken::new();

    let runner = {
        let history = Arc::clone(&history);
        let root = root.clone();
        tokio::spawn(async move { history.sync(&root, None, None).await })
    };
    while upstream.request_count() == 0 {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    root.cancel();
    history.stop().await;
    runner.await.unwrap().unwrap();

    store.close().unwrap();
    assert!(store.count().is_err());
}
