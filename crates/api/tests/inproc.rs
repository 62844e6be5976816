#![forbid(unsafe_code)]

use std::sync::Arc;
use std::time::Duration;

use dex_api::{DexApi, DexError, InProcApi, LoadEvent, MockApi, Settings};
use dex_core::{EntityKey, FilterSpec};
use dex_gateway::testing::{entity_json, FakeTransport};
use dex_gateway::{Gateway, GatewayConfig};
use dex_store::{Aggregator, BulkConfig};

fn api(fake: &Arc<FakeTransport>) -> InProcApi {
    let gateway = Arc::new(Gateway::new(fake.clone(), 8));
    let bulk = BulkConfig { group_size: 2, wave_width: 2, wave_delay: Duration::from_millis(1) };
    let aggregator = Arc::new(Aggregator::new(Arc::clone(&gateway), bulk));
    InProcApi::new(gateway, aggregator, Settings::new(&GatewayConfig::default(), &bulk))
}

fn seed(fake: &FakeTransport) {
    fake.seed_catalog(&[(1, "bulbasaur"), (4, "charmander"), (7, "squirtle"), (25, "pikachu"), (152, "chikorita")]);
    fake.route_entity(entity_json(4, "charmander", &["fire"], [39, 52, 43, 60, 50, 65]));
    fake.route_entity(entity_json(7, "squirtle", &["water"], [44, 48, 65, 50, 64, 43]));
}

#[tokio::test]
async fn page_keeps_listing_order_and_omits_failures() {
    let fake = Arc::new(FakeTransport::new());
    seed(&fake);
    fake.fail("/pokemon/4");
    let api = api(&fake);

    let res = api.get_page(0, 5).await.expect("page");
    let ids: Vec<u32> = res.entities.iter().map(|e| e.id).collect();
    assert_eq!(ids, vec![1, 7, 25, 152]);
    assert_eq!(res.omitted(), 1);
    assert_eq!(api.get_page(0, 0).await.unwrap_err(), DexError::Validation("limit must be at least 1".into()));
}

#[tokio::test]
async fn errors_map_to_api_kinds() {
    let fake = Arc::new(FakeTransport::new());
    fake.route_status("/pokemon/3", 502);
    let api = api(&fake);

    assert!(matches!(api.get_entity(EntityKey::Id(999)).await, Err(DexError::NotFound(_))));
    assert!(matches!(api.get_entity(EntityKey::Id(3)).await, Err(DexError::Network(_))));
    assert!(matches!(api.search("missingno").await, Err(DexError::NotFound(q)) if q == "missingno"));
    assert!(api.species(3).await.expect("never fails").is_empty());
    assert_eq!(api.ability_description("nope", "en").await.expect("never fails"), "");
}

#[tokio::test]
async fn load_all_streams_progress_then_collection() {
    let fake = Arc::new(FakeTransport::new());
    seed(&fake);
    let api = api(&fake);

    let mut handle = api.load_all().await.expect("stream");
    let mut progress = Vec::new();
    let mut loaded = None;
    while let Some(ev) = handle.rx.recv().await {
        match ev {
            LoadEvent::Progress(p) => progress.push(p.current),
            LoadEvent::Loaded(c) => loaded = Some(c),
            LoadEvent::Failed(e) => panic!("unexpected failure: {e}"),
        }
    }
    let coll = loaded.expect("loaded event");
    assert_eq!(coll.items.len(), 5);
    assert!(progress.windows(2).all(|w| w[0] <= w[1]), "{:?}", progress);

    let fire = api.apply_filters(&coll, &FilterSpec::new().with_category("fire"));
    assert_eq!(fire.iter().map(|e| e.name.as_str()).collect::<Vec<_>>(), vec!["charmander"]);

    // A second subscriber after completion gets the collection straight away.
    let mut again = api.load_all().await.expect("stream");
    assert!(matches!(again.rx.recv().await, Some(LoadEvent::Loaded(c)) if c.items.len() == 5));
    assert_eq!(fake.calls("/pokemon?offset=0&limit=1"), 1);
}

#[tokio::test]
async fn load_all_reports_listing_failure() {
    let fake = Arc::new(FakeTransport::new());
    fake.route_status("/pokemon?offset=0&limit=1", 500);
    let api = api(&fake);

    let mut handle = api.load_all().await.expect("stream");
    let mut last = None;
    while let Some(ev) = handle.rx.recv().await {
        last = Some(ev);
    }
    assert!(matches!(last, Some(LoadEvent::Failed(DexError::Network(_)))), "{:?}", last);
}

#[tokio::test]
async fn load_all_works_with_a_single_slot_queue() {
    let fake = Arc::new(FakeTransport::new());
    seed(&fake);
    let gateway = Arc::new(Gateway::new(fake.clone(), 8));
    let bulk = BulkConfig { group_size: 1, wave_width: 1, wave_delay: Duration::from_millis(1) };
    let aggregator = Arc::new(Aggregator::new(Arc::clone(&gateway), bulk));
    let settings = Settings { queue_cap: 1, ..Settings::new(&GatewayConfig::default(), &bulk) };
    let api = InProcApi::new(gateway, aggregator, settings);
    assert_eq!(api.settings().await.expect("settings").queue_cap, 1);

    let mut handle = api.load_all().await.expect("stream");
    let mut last = None;
    while let Some(ev) = handle.rx.recv().await {
        last = Some(ev);
    }
    assert!(matches!(last, Some(LoadEvent::Loaded(c)) if c.items.len() == 5));
}

#[tokio::test]
async fn mock_api_serves_canned_data() {
    let fake = Arc::new(FakeTransport::new());
    seed(&fake);
    let real = api(&fake);
    let bulba = real.get_entity(EntityKey::Id(1)).await.expect("entity");

    let mock = MockApi { entities: vec![bulba], ..MockApi::new() };
    assert_eq!(mock.search("Bulbasaur").await.expect("hit").id, 1);
    assert!(mock.get_batch(&[1, 2]).await.expect("batch").len() == 1);
    let mut h = mock.load_all().await.expect("stream");
    assert!(matches!(h.rx.recv().await, Some(LoadEvent::Progress(_))));
    assert!(matches!(h.rx.recv().await, Some(LoadEvent::Loaded(_))));
    let json = serde_json::to_value(&mock.settings().await.expect("settings")).expect("json");
    assert!(json.get("max_in_flight").is_some());
    assert!(json.get("queue_cap").is_some());
}
