//! Aggregation backend abstraction
//!
//! The cube cache and the controller only ever talk to an [`AggregationBackend`].
//! Two strategies are provided: an in-process columnar scan over a resident
//! table, and a pooled remote SQL backend that turns the same four operations
//! into queries sent over a bounded set of connections.

pub mod columnar;
pub mod http;
pub mod pooled;
pub mod sql;

use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::aggregate::Aggregate;
use crate::cube::Cube;
use crate::dimension::Dimension;
use crate::error::{CrossfilterError, CrossfilterResult};
use crate::filter::FilterContext;
use crate::view::View;

pub use columnar::{ColumnarBackend, ColumnarTable, ColumnarTableBuilder};
pub use http::HttpSqlConnector;
pub use pooled::{ConnectionPool, PoolConfig, PooledSqlBackend, SqlConnection, SqlConnector};
pub use sql::{SqlRequest, SqlRow, StatementBuilder};

/// Exact aggregates over an already loaded or connected dataset.
///
/// Every operation takes the filter context as a dimension-to-interval mapping
/// and returns plain counts. Backends never retry; retry policy belongs to the
/// caller.
#[async_trait]
pub trait AggregationBackend: Send + Sync {
    /// Short name for logs
    fn name(&self) -> &str;

    /// Rows satisfying every brush in the context
    async fn count(&self, filter: &FilterContext) -> CrossfilterResult<u64>;

    /// Per-bin counts for one dimension
    async fn histogram(
        &self,
        dimension: &Dimension,
        filter: &FilterContext,
    ) -> CrossfilterResult<Aggregate>;

    /// Per-cell counts for two dimensions, row-major over X then Y
    async fn heatmap(
        &self,
        x: &Dimension,
        y: &Dimension,
        filter: &FilterContext,
    ) -> CrossfilterResult<Aggregate>;

    /// The passive view's aggregate swept across `resolution + 1` boundaries
    /// of `active`. The filter context must not constrain `active`.
    async fn cumulative_cube(
        &self,
        active: &Dimension,
        passive: &View,
        filter: &FilterContext,
        resolution: usize,
    ) -> CrossfilterResult<Cube>;

    /// Aggregate matching the view's variant
    async fn aggregate(&self, view: &View, filter: &FilterContext) -> CrossfilterResult<Aggregate> {
        match view {
            View::Scalar { .. } => self.count(filter).await.map(Aggregate::scalar),
            View::Univariate { dimension, .. } => self.histogram(dimension, filter).await,
            View::Bivariate { x, y, .. } => self.heatmap(x, y, filter).await,
        }
    }

    /// Request statistics
    fn stats(&self) -> BackendStats;
}

/// Type alias for a shared backend trait object
pub type BoxedBackend = Arc<dyn AggregationBackend>;

/// Snapshot of backend request statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BackendStats {
    pub requests: u64,
    pub failed_requests: u64,
    pub count_requests: u64,
    pub histogram_requests: u64,
    pub heatmap_requests: u64,
    pub cube_requests: u64,
    pub rows_scanned: u64,
}

/// Which backend operation a request belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    Count,
    Histogram,
    Heatmap,
    Cube,
}

/// Internal statistics tracking shared by the backend implementations
#[derive(Debug, Default)]
pub struct BackendStatsCollector {
    requests: AtomicU64,
    failed_requests: AtomicU64,
    count_requests: AtomicU64,
    histogram_requests: AtomicU64,
    heatmap_requests: AtomicU64,
    cube_requests: AtomicU64,
    rows_scanned: AtomicU64,
}

impl BackendStatsCollector {
    pub fn record_request(&self, kind: RequestKind) {
        self.requests.fetch_add(1, Ordering::Relaxed);
        let counter = match kind {
            RequestKind::Count => &self.count_requests,
            RequestKind::Histogram => &self.histogram_requests,
            RequestKind::Heatmap => &self.heatmap_requests,
            RequestKind::Cube => &self.cube_requests,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.failed_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rows_scanned(&self, rows: usize) {
        self.rows_scanned.fetch_add(rows as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> BackendStats {
        BackendStats {
            requests: self.requests.load(Ordering::Relaxed),
            failed_requests: self.failed_requests.load(Ordering::Relaxed),
            count_requests: self.count_requests.load(Ordering::Relaxed),
            histogram_requests: self.histogram_requests.load(Ordering::Relaxed),
            heatmap_requests: self.heatmap_requests.load(Ordering::Relaxed),
            cube_requests: self.cube_requests.load(Ordering::Relaxed),
            rows_scanned: self.rows_scanned.load(Ordering::Relaxed),
        }
    }
}

/// Reject a cube request whose filter context constrains its own sweep axis
pub(crate) fn ensure_sweepable(
    active: &Dimension,
    filter: &FilterContext,
    resolution: usize,
) -> CrossfilterResult<()> {
    if resolution == 0 {
        return Err(CrossfilterError::invalid_request(
            "Cube resolution must be greater than 0",
        ));
    }
    if filter.constrains(active.name()) {
        return Err(CrossfilterError::invalid_request(format!(
            "Filter context must not constrain the active dimension '{}'",
            active.name()
        )));
    }
    Ok(())
}
