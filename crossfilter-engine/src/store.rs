//! Epoch-tagged cube cache
//!
//! An epoch is the pair (active view, filter context). Starting an epoch bumps
//! a generation counter and marks every passive view's slot pending; the build
//! task installs its cubes only if the generation is still the one it was
//! spawned under, so a superseded build is discarded when it lands. Ready cubes
//! sit behind an `Arc` and are replaced, never edited.

use crossfilter_core::{
    Aggregate, CrossfilterError, CrossfilterResult, Cube, Dimension, FilterContext, Interval,
    View, ViewId,
};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::baseline;
use crate::builder::CubeBuilder;
use crate::metrics::EngineMetricsCollector;

/// State of one passive view's cube in the current epoch
#[derive(Debug, Clone)]
pub enum CubeSlot {
    Pending,
    Ready(Arc<Cube>),
    Failed(String),
}

/// The validity scope of the stored cubes
#[derive(Debug, Clone)]
pub struct Epoch {
    pub generation: u64,
    pub active: View,
    pub dimension: Arc<Dimension>,
    pub filter: FilterContext,
    pub resolution: usize,
    pub passive: Vec<View>,
}

#[derive(Debug, Default)]
struct StoreState {
    generation: u64,
    epoch: Option<Epoch>,
    slots: HashMap<ViewId, CubeSlot>,
}

/// Where a query's answer came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    Cube,
    Backend,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Served {
    pub aggregate: Aggregate,
    pub source: Source,
}

/// What happened to a build once it finished
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildOutcome {
    Installed { ready: usize, failed: usize },
    /// A newer epoch started before the build finished; its cubes were dropped
    Superseded,
}

/// Awaitable handle on an epoch's background build
#[derive(Debug)]
pub struct BuildHandle {
    generation: u64,
    task: JoinHandle<BuildOutcome>,
}

impl BuildHandle {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    pub async fn wait(self) -> CrossfilterResult<BuildOutcome> {
        self.task
            .await
            .map_err(|e| CrossfilterError::backend(format!("Cube build task failed: {}", e)))
    }
}

/// Owns the current epoch and the passive views' cubes
pub struct CubeStore {
    builder: CubeBuilder,
    state: Arc<RwLock<StoreState>>,
    metrics: Arc<EngineMetricsCollector>,
}

impl CubeStore {
    pub fn new(builder: CubeBuilder, metrics: Arc<EngineMetricsCollector>) -> Self {
        Self {
            builder,
            state: Arc::new(RwLock::new(StoreState::default())),
            metrics,
        }
    }

    /// Start a new epoch for `active` and build a cube per passive view.
    ///
    /// Prior cubes stop being served immediately; queries fall back to the
    /// backend until the new ones land. Only univariate views can be active.
    pub fn activate(
        &self,
        active: &View,
        passive: Vec<View>,
        filter: FilterContext,
        resolution: usize,
    ) -> CrossfilterResult<BuildHandle> {
        let dimension = match active {
            View::Univariate { dimension, .. } => dimension.clone(),
            other => {
                return Err(CrossfilterError::invalid_request(format!(
                    "{:?} view '{}' cannot drive a cube sweep",
                    other.kind(),
                    other.title()
                )))
            }
        };
        let filter = filter.without([dimension.name()]);
        let passive: Vec<View> = passive
            .into_iter()
            .filter(|view| view.id() != active.id())
            .collect();

        let epoch = {
            let mut state = self.state.write();
            state.generation += 1;
            let epoch = Epoch {
                generation: state.generation,
                active: active.clone(),
                dimension,
                filter,
                resolution,
                passive,
            };
            state.slots = epoch
                .passive
                .iter()
                .map(|view| (view.id(), CubeSlot::Pending))
                .collect();
            state.epoch = Some(epoch.clone());
            epoch
        };

        self.metrics.record_epoch(epoch.passive.len());
        info!(
            "Epoch {}: {} active over {} under {} ({} cube(s), resolution {})",
            epoch.generation,
            epoch.active.id(),
            epoch.dimension.name(),
            epoch.filter,
            epoch.passive.len(),
            epoch.resolution
        );

        let generation = epoch.generation;
        let builder = self.builder.clone();
        let state = self.state.clone();
        let metrics = self.metrics.clone();
        let task = tokio::spawn(async move {
            let start = Instant::now();
            let results = builder
                .build_each(&epoch.dimension, &epoch.passive, &epoch.filter, epoch.resolution)
                .await;
            install(&state, &metrics, generation, results, start)
        });

        Ok(BuildHandle { generation, task })
    }

    /// Restart the current epoch under a new filter context. No-op without an epoch.
    pub fn invalidate_on_filter_change(
        &self,
        filter: FilterContext,
    ) -> CrossfilterResult<Option<BuildHandle>> {
        let current = self.state.read().epoch.clone();
        match current {
            Some(epoch) => self
                .activate(&epoch.active, epoch.passive, filter, epoch.resolution)
                .map(Some),
            None => Ok(None),
        }
    }

    /// Drop the current epoch; any in-flight build will be discarded
    pub fn clear(&self) {
        let mut state = self.state.write();
        state.generation += 1;
        if state.epoch.take().is_some() {
            debug!("Cube store cleared at generation {}", state.generation);
        }
        state.slots.clear();
    }

    pub fn epoch(&self) -> Option<Epoch> {
        self.state.read().epoch.clone()
    }

    pub fn generation(&self) -> u64 {
        self.state.read().generation
    }

    pub fn slot(&self, view: ViewId) -> Option<CubeSlot> {
        self.state.read().slots.get(&view).cloned()
    }

    pub fn cube(&self, view: ViewId) -> Option<Arc<Cube>> {
        match self.slot(view) {
            Some(CubeSlot::Ready(cube)) => Some(cube),
            _ => None,
        }
    }

    /// Whether every slot of the current epoch has settled
    pub fn is_settled(&self) -> bool {
        self.state
            .read()
            .slots
            .values()
            .all(|slot| !matches!(slot, CubeSlot::Pending))
    }

    /// Bytes held by ready cubes
    pub fn memory_bytes(&self) -> usize {
        self.state
            .read()
            .slots
            .values()
            .map(|slot| match slot {
                CubeSlot::Ready(cube) => cube.memory_bytes(),
                _ => 0,
            })
            .sum()
    }

    /// Answer a passive view under the active brush.
    ///
    /// A ready cube answers by snapped diff. Pending and failed slots, and a
    /// cube whose diff comes out negative, fall back to a direct backend call.
    pub async fn query(&self, view: &View, brush: Option<&Interval>) -> CrossfilterResult<Served> {
        let (epoch, mut slot) = {
            let state = self.state.read();
            let epoch = state.epoch.clone().ok_or_else(|| {
                CrossfilterError::invalid_request("No active view; cube store is empty")
            })?;
            (epoch, state.slots.get(&view.id()).cloned())
        };

        // One retry against a replacement cube after a stale diff
        for _ in 0..2 {
            let cube = match &slot {
                Some(CubeSlot::Ready(cube)) => cube.clone(),
                _ => break,
            };
            match cube.query(brush) {
                Ok(aggregate) => {
                    self.metrics.record_cache_hit();
                    return Ok(Served {
                        aggregate,
                        source: Source::Cube,
                    });
                }
                Err(CrossfilterError::StaleResult(reason)) => {
                    warn!("Discarding stale cube for {}: {}", view.id(), reason);
                    self.metrics.record_stale_discard();
                    slot = self.discard_stale(view.id(), &cube);
                }
                Err(err) => return Err(err),
            }
        }

        self.metrics.record_baseline_query();
        let active = brush.map(|b| (epoch.dimension.as_ref(), b));
        let aggregate =
            baseline::query(self.builder.backend().as_ref(), view, &epoch.filter, active).await?;
        Ok(Served {
            aggregate,
            source: Source::Backend,
        })
    }

    /// Mark `stale` failed if it is still installed and return whatever the slot now holds
    fn discard_stale(&self, view: ViewId, stale: &Arc<Cube>) -> Option<CubeSlot> {
        let mut state = self.state.write();
        let slot = state.slots.get_mut(&view)?;
        if let CubeSlot::Ready(current) = slot {
            if Arc::ptr_eq(current, stale) {
                *slot = CubeSlot::Failed("stale cube discarded".to_string());
            }
        }
        Some(slot.clone())
    }
}

/// Install a finished build if its generation is still current
fn install(
    state: &RwLock<StoreState>,
    metrics: &EngineMetricsCollector,
    generation: u64,
    results: Vec<(ViewId, CrossfilterResult<Cube>)>,
    start: Instant,
) -> BuildOutcome {
    let mut state = state.write();
    if state.generation != generation {
        warn!(
            "Discarding {} cube(s) from superseded generation {} (now {})",
            results.len(),
            generation,
            state.generation
        );
        metrics.record_discard(results.len());
        return BuildOutcome::Superseded;
    }

    let (mut ready, mut failed) = (0, 0);
    for (view, result) in results {
        let slot = match result {
            Ok(cube) => {
                ready += 1;
                CubeSlot::Ready(Arc::new(cube))
            }
            Err(err) => {
                error!("Cube build for {} failed [{}]: {}", view, err.category(), err);
                failed += 1;
                CubeSlot::Failed(err.to_string())
            }
        };
        state.slots.insert(view, slot);
    }

    let elapsed = start.elapsed();
    metrics.record_build(elapsed, ready, failed);
    info!(
        "Generation {} installed {} cube(s), {} failed, in {:?}",
        generation, ready, failed, elapsed
    );
    BuildOutcome::Installed { ready, failed }
}
