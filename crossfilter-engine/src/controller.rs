//! Active-view and brush state machine
//!
//! Pointer input only records state and sets a dirty flag. All work happens in
//! [`InteractionController::tick`], which runs once per frame: it folds every
//! brush change since the previous tick into a single update, restarts the
//! cube epoch if the filter context moved, then queries and renders each view.

use crossfilter_core::{
    BoxedBackend, CrossfilterError, CrossfilterResult, FilterContext, Interval, View, ViewId,
    ViewKind, ViewRegistry,
};
use futures::future::join_all;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, error, info};

use crate::baseline;
use crate::builder::CubeBuilder;
use crate::config::EngineConfig;
use crate::metrics::EngineMetricsCollector;
use crate::render::{ViewRenderer, ViewUpdate};
use crate::store::{BuildHandle, BuildOutcome, CubeStore, Served, Source};

/// Summary of one tick
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct UpdateReport {
    pub rendered: usize,
    pub failed: usize,
    pub served_from_cache: usize,
    pub served_from_backend: usize,
}

pub struct InteractionController<R: ViewRenderer> {
    config: EngineConfig,
    registry: ViewRegistry,
    backend: BoxedBackend,
    store: CubeStore,
    renderer: R,
    metrics: Arc<EngineMetricsCollector>,
    active: Option<ViewId>,
    /// Every brush, including the active view's own
    brushes: FilterContext,
    /// Filter context the current epoch was started under
    epoch_filter: Option<FilterContext>,
    cube_requested: bool,
    active_brush_moved: bool,
    dirty: bool,
    pending_changes: u64,
    builds: Vec<BuildHandle>,
}

impl<R: ViewRenderer> InteractionController<R> {
    pub fn new(
        config: EngineConfig,
        backend: BoxedBackend,
        renderer: R,
    ) -> CrossfilterResult<Self> {
        config.validate()?;
        let registry = config.registry()?;
        let metrics = Arc::new(EngineMetricsCollector::new());
        let builder = CubeBuilder::new(
            backend.clone(),
            config.cache.retry_failed_build,
            metrics.clone(),
        );
        let store = CubeStore::new(builder, metrics.clone());

        info!(
            "Interaction controller over {} view(s) on backend '{}' (caching: {}, preload: {})",
            registry.views().len(),
            backend.name(),
            config.cache.enable_caching,
            config.cache.preload_on_activation
        );

        Ok(Self {
            config,
            registry,
            backend,
            store,
            renderer,
            metrics,
            active: None,
            brushes: FilterContext::new(),
            epoch_filter: None,
            cube_requested: false,
            active_brush_moved: false,
            dirty: true,
            pending_changes: 0,
            builds: Vec::new(),
        })
    }

    pub fn registry(&self) -> &ViewRegistry {
        &self.registry
    }

    pub fn store(&self) -> &CubeStore {
        &self.store
    }

    pub fn metrics(&self) -> &Arc<EngineMetricsCollector> {
        &self.metrics
    }

    pub fn renderer(&self) -> &R {
        &self.renderer
    }

    pub fn renderer_mut(&mut self) -> &mut R {
        &mut self.renderer
    }

    pub fn active_view(&self) -> Option<&View> {
        self.active.and_then(|id| self.registry.view(id))
    }

    pub fn brushes(&self) -> &FilterContext {
        &self.brushes
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// All brushes except those on the active view's dimensions
    pub fn filter_context(&self) -> FilterContext {
        match self.active_view() {
            Some(view) => self.brushes.without(view.dimension_names()),
            None => self.brushes.clone(),
        }
    }

    /// Make `id` the active view. Scalar views have no axis and are ignored.
    pub fn hover(&mut self, id: ViewId) -> CrossfilterResult<()> {
        let view = self
            .registry
            .view(id)
            .cloned()
            .ok_or_else(|| CrossfilterError::invalid_request(format!("Unknown view {}", id)))?;
        if view.kind() == ViewKind::Scalar {
            debug!("Ignoring hover on scalar view '{}'", view.title());
            return Ok(());
        }
        if self.active == Some(id) {
            return Ok(());
        }
        if let Some(previous) = self.active {
            debug!("Deactivating {}", previous);
        }

        self.active = Some(id);
        self.active_brush_moved = false;
        let filter = self.filter_context();
        self.start_epoch(&view, filter, self.config.cache.preload_on_activation)?;
        self.dirty = true;
        Ok(())
    }

    /// Release the active view; every view is then served directly
    pub fn leave(&mut self) {
        if let Some(previous) = self.active.take() {
            debug!("Deactivating {}", previous);
            self.store.clear();
            self.epoch_filter = None;
            self.cube_requested = false;
            self.active_brush_moved = false;
            self.dirty = true;
        }
    }

    /// Record a brush change. Work is deferred to the next tick.
    pub fn brush_changed(
        &mut self,
        dimension: &str,
        interval: Option<Interval>,
    ) -> CrossfilterResult<()> {
        if self.registry.dimension(dimension).is_none() {
            return Err(CrossfilterError::invalid_request(format!(
                "Unknown dimension '{}'",
                dimension
            )));
        }

        let changed = match interval {
            Some(interval) => self.brushes.insert(dimension, interval) != Some(interval),
            None => self.brushes.remove(dimension).is_some(),
        };
        if !changed {
            return Ok(());
        }

        if self
            .active_view()
            .map(|view| view.uses_dimension(dimension))
            .unwrap_or(false)
        {
            self.active_brush_moved = true;
        }
        self.dirty = true;
        self.pending_changes += 1;
        Ok(())
    }

    /// Run at most one update for everything that changed since the last tick
    pub async fn tick(&mut self) -> CrossfilterResult<UpdateReport> {
        self.builds.retain(|handle| !handle.is_finished());
        if !self.dirty {
            return Ok(UpdateReport::default());
        }
        self.metrics.record_frame(self.pending_changes);
        self.pending_changes = 0;
        self.dirty = false;

        let filter = self.filter_context();
        if let Some(view) = self.active_view().cloned() {
            if self.epoch_filter.as_ref() != Some(&filter) {
                debug!("Filter context changed to {}", filter);
                self.start_epoch(&view, filter.clone(), self.config.cache.preload_on_activation)?;
            }
            if !self.cube_requested && self.active_brush_moved {
                self.start_epoch(&view, filter.clone(), true)?;
            }
        }
        self.active_brush_moved = false;

        let active_brush = self.active_brush();
        let use_store = self.store_serves(&filter);
        let views: Vec<View> = self
            .registry
            .views()
            .iter()
            .filter(|view| Some(view.id()) != self.active)
            .cloned()
            .collect();

        let results = join_all(
            views
                .iter()
                .map(|view| self.query_view(view, use_store, active_brush.as_ref())),
        )
        .await;

        let mut report = UpdateReport::default();
        for (view, result) in views.iter().zip(results) {
            let rendered = result.and_then(|served| {
                ViewUpdate::from_aggregate(view, &served.aggregate).map(|u| (served.source, u))
            });
            match rendered {
                Ok((source, update)) => {
                    self.renderer.render(view, update);
                    report.rendered += 1;
                    match source {
                        Source::Cube => report.served_from_cache += 1,
                        Source::Backend => report.served_from_backend += 1,
                    }
                }
                Err(err) => {
                    error!("Update for {} failed [{}]: {}", view.id(), err.category(), err);
                    self.metrics.record_view_error();
                    self.renderer.render_error(view, &err);
                    report.failed += 1;
                }
            }
        }

        debug!("Tick: {:?}", report);
        Ok(report)
    }

    /// Wait for every build started so far
    pub async fn settle(&mut self) -> CrossfilterResult<Vec<BuildOutcome>> {
        let mut outcomes = Vec::with_capacity(self.builds.len());
        for handle in self.builds.drain(..) {
            outcomes.push(handle.wait().await?);
        }
        Ok(outcomes)
    }

    fn active_brush(&self) -> Option<Interval> {
        match self.active_view()? {
            View::Univariate { dimension, .. } => self.brushes.get(dimension.name()).copied(),
            _ => None,
        }
    }

    /// The store answers only for the epoch matching the current state
    fn store_serves(&self, filter: &FilterContext) -> bool {
        if !self.config.cache.enable_caching {
            return false;
        }
        match self.store.epoch() {
            Some(epoch) => Some(epoch.active.id()) == self.active && &epoch.filter == filter,
            None => false,
        }
    }

    async fn query_view(
        &self,
        view: &View,
        use_store: bool,
        active_brush: Option<&Interval>,
    ) -> CrossfilterResult<Served> {
        if use_store {
            return self.store.query(view, active_brush).await;
        }
        self.metrics.record_baseline_query();
        let aggregate = baseline::query(self.backend.as_ref(), view, &self.brushes, None).await?;
        Ok(Served {
            aggregate,
            source: Source::Backend,
        })
    }

    /// Begin a new epoch for `view`, building cubes now or leaving them for later
    fn start_epoch(
        &mut self,
        view: &View,
        filter: FilterContext,
        build_now: bool,
    ) -> CrossfilterResult<()> {
        self.epoch_filter = Some(filter.clone());
        let cube_capable =
            self.config.cache.enable_caching && view.kind() == ViewKind::Univariate;
        if !(cube_capable && build_now) {
            self.store.clear();
            self.cube_requested = false;
            return Ok(());
        }

        let same_view = self
            .store
            .epoch()
            .map(|epoch| epoch.active.id() == view.id())
            .unwrap_or(false);
        let handle = if same_view {
            self.store.invalidate_on_filter_change(filter)?
        } else {
            let passive: Vec<View> = self.registry.passive_views(view.id()).cloned().collect();
            let resolution = self.config.resolution_for(view);
            Some(self.store.activate(view, passive, filter, resolution)?)
        };
        self.builds.extend(handle);
        self.cube_requested = true;
        Ok(())
    }
}
