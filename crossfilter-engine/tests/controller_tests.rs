//! Interaction controller and cube store behavior over an in-process backend
//!
//! The scripted backend wraps the columnar backend so tests can slow down cube
//! builds for one active dimension and make chosen requests fail.

use async_trait::async_trait;
use crossfilter_core::{
    Aggregate, AggregationBackend, BackendStats, BoxedBackend, ColumnarBackend, ColumnarTable,
    CrossfilterError, CrossfilterResult, Cube, Dimension, FilterContext, Interval, View, ViewId,
};
use crossfilter_engine::{
    BuildOutcome, CollectingRenderer, CubeSlot, EngineConfig, InteractionController, ViewUpdate,
};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

const COUNT: ViewId = ViewId(0);
const ARR: ViewId = ViewId(1);
const DIST: ViewId = ViewId(2);
const HEAT: ViewId = ViewId(3);

const CONFIG: &str = r#"{
    "dimensions": [
        {"name": "ARR_DELAY", "extent": [-10, 100], "bins": 22},
        {"name": "DISTANCE", "extent": [50, 2000], "bins": 25},
        {"name": "DEP_TIME", "extent": [0, 24], "bins": 24}
    ],
    "views": [
        {"type": "scalar", "title": "Flights"},
        {"type": "univariate", "title": "Arrival delay", "dimensions": ["ARR_DELAY"], "width": 500},
        {"type": "univariate", "title": "Distance", "dimensions": ["DISTANCE"], "width": 390},
        {"type": "bivariate", "title": "Departure time vs distance", "dimensions": ["DEP_TIME", "DISTANCE"], "width": 200}
    ]
}"#;

#[derive(Default)]
struct Script {
    cube_delay: Mutex<HashMap<String, Duration>>,
    failing_cubes: Mutex<HashSet<ViewId>>,
    fail_heatmaps: AtomicBool,
}

struct ScriptedBackend {
    inner: ColumnarBackend,
    script: Arc<Script>,
}

#[async_trait]
impl AggregationBackend for ScriptedBackend {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn count(&self, filter: &FilterContext) -> CrossfilterResult<u64> {
        self.inner.count(filter).await
    }

    async fn histogram(
        &self,
        dimension: &Dimension,
        filter: &FilterContext,
    ) -> CrossfilterResult<Aggregate> {
        self.inner.histogram(dimension, filter).await
    }

    async fn heatmap(
        &self,
        x: &Dimension,
        y: &Dimension,
        filter: &FilterContext,
    ) -> CrossfilterResult<Aggregate> {
        if self.script.fail_heatmaps.load(Ordering::SeqCst) {
            return Err(CrossfilterError::timeout(50));
        }
        self.inner.heatmap(x, y, filter).await
    }

    async fn cumulative_cube(
        &self,
        active: &Dimension,
        passive: &View,
        filter: &FilterContext,
        resolution: usize,
    ) -> CrossfilterResult<Cube> {
        let delay = self.script.cube_delay.lock().get(active.name()).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.script.failing_cubes.lock().contains(&passive.id()) {
            return Err(CrossfilterError::backend("cube query rejected"));
        }
        self.inner
            .cumulative_cube(active, passive, filter, resolution)
            .await
    }

    fn stats(&self) -> BackendStats {
        self.inner.stats()
    }
}

fn flights(rows: usize, seed: u64) -> ColumnarTable {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut arr = Vec::with_capacity(rows);
    let mut dist = Vec::with_capacity(rows);
    let mut dep = Vec::with_capacity(rows);
    for _ in 0..rows {
        arr.push(rng.gen_range(-10.0..99.9));
        dist.push(rng.gen_range(50.0..2000.0));
        dep.push(rng.gen_range(0.0..24.0));
    }
    ColumnarTable::builder()
        .column("ARR_DELAY", arr)
        .column("DISTANCE", dist)
        .column("DEP_TIME", dep)
        .build()
        .unwrap()
}

fn backend() -> (BoxedBackend, Arc<Script>) {
    let script = Arc::new(Script::default());
    let backend = ScriptedBackend {
        inner: ColumnarBackend::new(flights(5_000, 17)),
        script: script.clone(),
    };
    (Arc::new(backend), script)
}

fn config() -> EngineConfig {
    EngineConfig::from_json_str(CONFIG).unwrap()
}

fn controller(
    config: EngineConfig,
    backend: BoxedBackend,
) -> InteractionController<CollectingRenderer> {
    InteractionController::new(config, backend, CollectingRenderer::new()).unwrap()
}

fn cached_cubes(
    controller: &InteractionController<CollectingRenderer>,
    views: &[ViewId],
) -> Vec<Cube> {
    views
        .iter()
        .map(|id| controller.store().cube(*id).unwrap().as_ref().clone())
        .collect()
}

#[tokio::test]
async fn test_last_activation_wins() {
    let (backend, script) = backend();
    script
        .cube_delay
        .lock()
        .insert("ARR_DELAY".to_string(), Duration::from_millis(150));
    let mut controller = controller(config(), backend);

    controller.hover(ARR).unwrap();
    controller.hover(DIST).unwrap();
    let outcomes = controller.settle().await.unwrap();

    assert_eq!(outcomes[0], BuildOutcome::Superseded);
    assert_eq!(outcomes[1], BuildOutcome::Installed { ready: 3, failed: 0 });

    let epoch = controller.store().epoch().unwrap();
    assert_eq!(epoch.active.id(), DIST);
    for id in [COUNT, ARR, HEAT] {
        let cube = controller.store().cube(id).unwrap();
        assert_eq!(cube.active_dimension().name(), "DISTANCE");
    }
    assert_eq!(controller.metrics().snapshot().builds_discarded_total, 3);
}

#[tokio::test]
async fn test_cached_mode_issues_one_build_per_passive_view() {
    let (backend, _) = backend();
    let mut controller = controller(config(), backend.clone());
    controller.hover(ARR).unwrap();
    controller.settle().await.unwrap();
    controller.tick().await.unwrap();

    let before = backend.stats();
    assert_eq!(before.cube_requests, 3);

    let mut rng = StdRng::seed_from_u64(1);
    for _ in 0..25 {
        let lo = rng.gen_range(-10.0..60.0);
        controller
            .brush_changed("ARR_DELAY", Some(Interval::new(lo, lo + 25.0)))
            .unwrap();
        let report = controller.tick().await.unwrap();
        assert_eq!(report.served_from_cache, 3);
        assert_eq!(report.served_from_backend, 0);
    }

    let after = backend.stats();
    assert_eq!(after.requests, before.requests);
    assert_eq!(after.cube_requests, 3);
    assert_eq!(controller.metrics().snapshot().cache_hits_total, 3 * 26);
}

#[tokio::test]
async fn test_baseline_mode_issues_one_call_per_view_per_move() {
    let (backend, _) = backend();
    let mut config = config();
    config.cache.enable_caching = false;
    let mut controller = controller(config, backend.clone());
    controller.hover(ARR).unwrap();
    assert!(controller.settle().await.unwrap().is_empty());
    controller.tick().await.unwrap();

    let before = backend.stats();
    for i in 0..25 {
        let lo = -10.0 + i as f64;
        controller
            .brush_changed("ARR_DELAY", Some(Interval::new(lo, lo + 25.0)))
            .unwrap();
        let report = controller.tick().await.unwrap();
        assert_eq!(report.served_from_backend, 3);
    }

    let after = backend.stats();
    assert_eq!(after.requests - before.requests, 25 * 3);
    assert_eq!(after.cube_requests, 0);
    assert!(controller.store().epoch().is_none());
}

#[tokio::test]
async fn test_cached_frames_match_baseline_on_snapped_brush() {
    let (backend, _) = backend();
    let mut cached = controller(config(), backend.clone());
    let mut baseline_config = config();
    baseline_config.cache.enable_caching = false;
    let mut baseline = controller(baseline_config, backend);

    cached.hover(ARR).unwrap();
    cached.settle().await.unwrap();
    baseline.hover(ARR).unwrap();

    let arr = cached.registry().dimension("ARR_DELAY").unwrap().clone();
    cached
        .brush_changed("ARR_DELAY", Some(Interval::new(10.0, 50.0)))
        .unwrap();
    baseline
        .brush_changed(
            "ARR_DELAY",
            Some(Interval::new(arr.boundary(91, 500), arr.boundary(273, 500))),
        )
        .unwrap();

    let cached_report = cached.tick().await.unwrap();
    let baseline_report = baseline.tick().await.unwrap();
    assert_eq!(cached_report.served_from_cache, 3);
    assert_eq!(baseline_report.served_from_backend, 3);

    for id in [COUNT, DIST, HEAT] {
        assert_eq!(
            cached.renderer().latest(id),
            baseline.renderer().latest(id),
            "view {}",
            id
        );
    }
    assert!(cached.renderer().latest(ARR).is_none());
}

#[tokio::test]
async fn test_reactivation_reproduces_cubes_exactly() {
    let (backend, _) = backend();
    let mut controller = controller(config(), backend);
    controller
        .brush_changed("DEP_TIME", Some(Interval::new(6.0, 18.0)))
        .unwrap();
    controller.tick().await.unwrap();

    controller.hover(ARR).unwrap();
    controller.settle().await.unwrap();
    let first = cached_cubes(&controller, &[COUNT, DIST, HEAT]);

    controller.hover(DIST).unwrap();
    controller.settle().await.unwrap();
    assert_eq!(
        controller.store().cube(COUNT).unwrap().active_dimension().name(),
        "DISTANCE"
    );

    controller.hover(ARR).unwrap();
    controller.settle().await.unwrap();
    let again = cached_cubes(&controller, &[COUNT, DIST, HEAT]);
    assert_eq!(first, again);
}

#[tokio::test]
async fn test_passive_brush_changes_coalesce_into_one_invalidation() {
    let (backend, _) = backend();
    let mut controller = controller(config(), backend);
    controller.hover(ARR).unwrap();
    controller.settle().await.unwrap();
    controller.tick().await.unwrap();
    let generation = controller.store().generation();

    for hi in [500.0, 700.0, 900.0, 1100.0, 1300.0] {
        controller
            .brush_changed("DISTANCE", Some(Interval::new(200.0, hi)))
            .unwrap();
    }
    assert!(controller.is_dirty());
    assert_eq!(controller.store().generation(), generation);

    controller.tick().await.unwrap();
    controller.settle().await.unwrap();

    let metrics = controller.metrics().snapshot();
    assert_eq!(metrics.epochs_started_total, 2);
    assert_eq!(metrics.frames_coalesced_total, 4);
    let epoch = controller.store().epoch().unwrap();
    assert_eq!(epoch.generation, generation + 1);
    assert_eq!(
        epoch.filter.get("DISTANCE"),
        Some(&Interval::new(200.0, 1300.0))
    );

    // Nothing changed since the last tick
    let report = controller.tick().await.unwrap();
    assert_eq!(report.rendered, 0);
}

#[tokio::test]
async fn test_active_brush_never_invalidates() {
    let (backend, _) = backend();
    let mut controller = controller(config(), backend);
    controller.hover(ARR).unwrap();
    controller.settle().await.unwrap();

    for lo in [0.0, 10.0, 20.0] {
        controller
            .brush_changed("ARR_DELAY", Some(Interval::new(lo, lo + 30.0)))
            .unwrap();
        controller.tick().await.unwrap();
    }
    controller.brush_changed("ARR_DELAY", None).unwrap();
    let report = controller.tick().await.unwrap();
    assert_eq!(report.served_from_cache, 3);

    assert_eq!(controller.metrics().snapshot().epochs_started_total, 1);
    assert!(controller.filter_context().is_empty());
    assert!(controller.brushes().is_empty());
}

#[tokio::test]
async fn test_failed_build_is_isolated_to_its_view() {
    let (backend, script) = backend();
    script.failing_cubes.lock().insert(HEAT);
    let mut controller = controller(config(), backend);

    controller.hover(ARR).unwrap();
    let outcomes = controller.settle().await.unwrap();
    assert_eq!(outcomes, vec![BuildOutcome::Installed { ready: 2, failed: 1 }]);
    assert!(matches!(controller.store().slot(HEAT), Some(CubeSlot::Failed(_))));
    assert!(matches!(controller.store().slot(DIST), Some(CubeSlot::Ready(_))));

    controller
        .brush_changed("ARR_DELAY", Some(Interval::new(0.0, 40.0)))
        .unwrap();
    let report = controller.tick().await.unwrap();
    assert_eq!(report.rendered, 3);
    assert_eq!(report.served_from_cache, 2);
    assert_eq!(report.served_from_backend, 1);

    // The fallback fails too: only the heatmap reports an error
    script.fail_heatmaps.store(true, Ordering::SeqCst);
    controller
        .brush_changed("ARR_DELAY", Some(Interval::new(5.0, 40.0)))
        .unwrap();
    let report = controller.tick().await.unwrap();
    assert_eq!(report.failed, 1);
    assert_eq!(report.rendered, 2);
    assert!(controller.renderer().errors.contains_key(&HEAT));
    assert!(!controller.renderer().errors.contains_key(&DIST));
    assert_eq!(controller.metrics().snapshot().view_errors_total, 1);
}

#[tokio::test]
async fn test_without_preload_build_waits_for_first_active_brush() {
    let (backend, _) = backend();
    let mut config = config();
    config.cache.preload_on_activation = false;
    let mut controller = controller(config, backend.clone());

    controller.hover(ARR).unwrap();
    assert!(controller.settle().await.unwrap().is_empty());
    let report = controller.tick().await.unwrap();
    assert_eq!(report.served_from_backend, 3);
    assert_eq!(backend.stats().cube_requests, 0);

    controller
        .brush_changed("ARR_DELAY", Some(Interval::new(0.0, 30.0)))
        .unwrap();
    controller.tick().await.unwrap();
    assert!(controller.store().epoch().is_some());
    controller.settle().await.unwrap();
    assert_eq!(backend.stats().cube_requests, 3);

    controller
        .brush_changed("ARR_DELAY", Some(Interval::new(5.0, 30.0)))
        .unwrap();
    let report = controller.tick().await.unwrap();
    assert_eq!(report.served_from_cache, 3);
}

#[tokio::test]
async fn test_bivariate_active_view_is_served_directly() {
    let (backend, _) = backend();
    let mut controller = controller(config(), backend.clone());
    controller
        .brush_changed("ARR_DELAY", Some(Interval::new(0.0, 50.0)))
        .unwrap();
    controller.hover(HEAT).unwrap();
    assert!(controller.store().epoch().is_none());

    controller
        .brush_changed("DEP_TIME", Some(Interval::new(8.0, 12.0)))
        .unwrap();
    controller
        .brush_changed("DISTANCE", Some(Interval::new(100.0, 900.0)))
        .unwrap();
    let filter = controller.filter_context();
    assert!(!filter.constrains("DEP_TIME"));
    assert!(!filter.constrains("DISTANCE"));
    assert!(filter.constrains("ARR_DELAY"));

    let report = controller.tick().await.unwrap();
    assert_eq!(report.served_from_backend, 3);
    assert_eq!(backend.stats().cube_requests, 0);

    let direct = backend.count(controller.brushes()).await.unwrap();
    assert_eq!(
        controller.renderer().latest(COUNT),
        Some(&ViewUpdate::Scalar(direct))
    );
}

#[tokio::test]
async fn test_hover_and_brush_edge_cases() {
    let (backend, _) = backend();
    let mut controller = controller(config(), backend);

    // Scalar views have no axis to sweep
    controller.hover(COUNT).unwrap();
    assert!(controller.active_view().is_none());

    assert!(matches!(
        controller.hover(ViewId(42)),
        Err(CrossfilterError::InvalidRequest(_))
    ));
    assert!(matches!(
        controller.brush_changed("AIR_TIME", None),
        Err(CrossfilterError::InvalidRequest(_))
    ));

    controller.hover(ARR).unwrap();
    controller.settle().await.unwrap();
    let generation = controller.store().generation();
    controller.hover(ARR).unwrap();
    assert_eq!(controller.store().generation(), generation);

    // A zero-width brush selects nothing
    controller
        .brush_changed("ARR_DELAY", Some(Interval::new(20.0, 20.0)))
        .unwrap();
    controller.tick().await.unwrap();
    assert_eq!(controller.renderer().latest(COUNT), Some(&ViewUpdate::Scalar(0)));

    controller.leave();
    assert!(controller.active_view().is_none());
    assert!(controller.store().epoch().is_none());
    let report = controller.tick().await.unwrap();
    assert_eq!(report.rendered, 4);
    assert_eq!(report.served_from_backend, 4);
}

#[tokio::test]
async fn test_invalid_config_is_rejected_at_startup() {
    let (backend, _) = backend();
    let mut config = config();
    config.views[2].dimensions = vec!["MISSING".to_string()];
    let err = InteractionController::new(config, backend, CollectingRenderer::new())
        .err()
        .unwrap();
    assert!(matches!(err, CrossfilterError::Configuration(_)));
}
