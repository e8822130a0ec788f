mod support;

use std::collections::HashMap;
use std::rc::Rc;
use std::time::Duration;

use metrics_util::MetricKind;
use metrics_util::debugging::{DebugValue, DebuggingRecorder};
use portal_query::application::session::Session;
use portal_query::cache::CacheConfig;
use tokio::task::LocalSet;

use support::ScriptedCatalog;

#[tokio::test(start_paused = true)]
async fn query_paths_emit_expected_metric_keys() {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    let _guard = metrics::set_default_local_recorder(&recorder);

    LocalSet::new()
        .run_until(async {
            let catalog = Rc::new(ScriptedCatalog::new());
            let session = Session::new(catalog.clone(), CacheConfig::default());

            // miss, then a coalesced join and a hit
            let first = session.character_search();
            let second = session.character_search();
            first.ready().await;
            second.ready().await;
            let _third = session.character_search();

            // debounced input, then a superseded refresh
            first.set_name("rick");
            tokio::time::sleep(Duration::from_millis(400)).await;
            first.ready().await;
            catalog.script_latency([Duration::from_millis(300), Duration::from_millis(10)]);
            first.refresh();
            first.refresh();
            tokio::time::sleep(Duration::from_millis(500)).await;

            // failing location
            let explorer = session.location_explorer();
            explorer.select(Some(404));
            explorer.ready().await;
        })
        .await;

    let mut counters: HashMap<String, u64> = HashMap::new();
    let mut histograms = Vec::new();
    for (key, _, _, value) in snapshotter.snapshot().into_vec() {
        let name = key.key().name().to_string();
        match (key.kind(), value) {
            (MetricKind::Counter, DebugValue::Counter(count)) => {
                *counters.entry(name).or_default() += count;
            }
            (MetricKind::Histogram, DebugValue::Histogram(_)) => histograms.push(name),
            _ => {}
        }
    }

    for expected in [
        "portal_query_cache_miss_total",
        "portal_query_cache_hit_total",
        "portal_query_fetch_coalesced_total",
        "portal_query_fetch_discarded_total",
        "portal_query_fetch_error_total",
        "portal_query_debounce_emit_total",
    ] {
        assert!(
            counters.get(expected).is_some_and(|count| *count > 0),
            "expected counter {expected} in {counters:?}"
        );
    }
    assert!(histograms.iter().any(|name| name == "portal_query_fetch_ms"));
}
