#![forbid(unsafe_code)]

use std::sync::Arc;
use std::time::Duration;

use dex_core::LoadProgress;
use dex_gateway::testing::FakeTransport;
use dex_gateway::Gateway;
use dex_store::{Aggregator, BulkConfig, LoadError, LoadState};

fn catalog(n: u32) -> Vec<(u32, String)> {
    (1..=n).map(|id| (id, format!("mon-{}", id))).collect()
}

fn seed(fake: &FakeTransport, entries: &[(u32, String)]) {
    let refs: Vec<(u32, &str)> = entries.iter().map(|(id, n)| (*id, n.as_str())).collect();
    fake.seed_catalog(&refs);
}

fn aggregator(fake: &Arc<FakeTransport>, cfg: BulkConfig) -> Arc<Aggregator> {
    let gw = Arc::new(Gateway::new(fake.clone(), 64));
    Arc::new(Aggregator::new(gw, cfg))
}

fn small_waves(group_size: usize, wave_width: usize) -> BulkConfig {
    BulkConfig { group_size, wave_width, wave_delay: Duration::from_millis(1) }
}

#[tokio::test]
async fn partial_failure_still_loads() {
    let fake = Arc::new(FakeTransport::new());
    seed(&fake, &catalog(3));
    fake.fail("/pokemon/2");
    let agg = aggregator(&fake, BulkConfig::default());

    let coll = agg.load().await.expect("load");
    let ids: Vec<u32> = coll.items.iter().map(|e| e.id).collect();
    assert_eq!(ids, vec![1, 3]);
    assert_eq!(coll.total, 3);
    assert_eq!(agg.state(), LoadState::Loaded(LoadProgress { current: 2, total: 3 }));
}

#[tokio::test]
async fn waves_bound_concurrency_and_publish_snapshots() {
    let fake = Arc::new(FakeTransport::new().with_delay(Duration::from_millis(5)));
    seed(&fake, &catalog(9));
    let agg = aggregator(&fake, small_waves(2, 2));

    let coll = agg.load().await.expect("load");
    assert_eq!(coll.items.len(), 9);
    // 9 ids in groups of 2 -> 5 groups -> 3 waves, one snapshot per wave.
    assert_eq!(coll.epoch, 3);
    assert!(fake.peak_in_flight() <= 4, "peak {}", fake.peak_in_flight());
    assert_eq!(fake.calls("/pokemon?offset=0&limit=1"), 1);
    assert_eq!(fake.calls("/pokemon?offset=0&limit=9"), 1);
}

#[tokio::test]
async fn progress_never_goes_backwards() {
    let fake = Arc::new(FakeTransport::new().with_delay(Duration::from_millis(2)));
    seed(&fake, &catalog(12));
    let agg = aggregator(&fake, small_waves(2, 1));
    let mut rx = agg.subscribe();

    let watcher = tokio::spawn(async move {
        let mut seen = Vec::new();
        while rx.changed().await.is_ok() {
            let s = rx.borrow_and_update().clone();
            let done = !s.is_loading();
            seen.push(s);
            if done {
                break;
            }
        }
        seen
    });

    let handle = agg.start().expect("claimed");
    handle.await.expect("join").expect("load");
    let seen = watcher.await.expect("watcher");

    let currents: Vec<u32> = seen.iter().filter_map(|s| s.progress()).map(|p| p.current).collect();
    assert!(currents.windows(2).all(|w| w[0] <= w[1]), "{:?}", currents);
    assert_eq!(seen.last(), Some(&LoadState::Loaded(LoadProgress { current: 12, total: 12 })));
}

#[tokio::test]
async fn start_is_ignored_while_loading_and_after_loaded() {
    let fake = Arc::new(FakeTransport::new().with_delay(Duration::from_millis(5)));
    seed(&fake, &catalog(4));
    let agg = aggregator(&fake, BulkConfig::default());

    let first = agg.start().expect("first start runs");
    assert!(agg.start().is_none());
    assert_eq!(agg.load().await.unwrap_err(), LoadError::InProgress);
    first.await.expect("join").expect("load");

    assert!(agg.start().is_none());
    let again = agg.load().await.expect("loaded collection");
    assert_eq!(again.items.len(), 4);
    assert_eq!(fake.calls("/pokemon/1"), 1);
}

#[tokio::test]
async fn listing_failure_is_fatal_and_retryable() {
    let fake = Arc::new(FakeTransport::new());
    fake.route_status("/pokemon?offset=0&limit=1", 503);
    let agg = aggregator(&fake, BulkConfig::default());

    let err = agg.load().await.unwrap_err();
    assert!(matches!(err, LoadError::InitialCount(_)), "{:?}", err);
    assert!(matches!(agg.state(), LoadState::Error(_)));
    assert!(agg.current().items.is_empty());

    seed(&fake, &catalog(2));
    let coll = agg.load().await.expect("retry");
    assert_eq!(coll.items.len(), 2);
    assert!(agg.state().is_loaded());
}

#[tokio::test]
async fn empty_catalog_loads_empty() {
    let fake = Arc::new(FakeTransport::new());
    fake.route_page(0, 1, 0, &[]);
    let agg = aggregator(&fake, BulkConfig::default());

    let coll = agg.load().await.expect("load");
    assert!(coll.items.is_empty());
    assert_eq!(agg.state(), LoadState::Loaded(LoadProgress { current: 0, total: 0 }));
    assert_eq!(fake.total_calls(), 1);
}
