//! In-process columnar backend
//!
//! Holds the whole dataset resident as named `f64` columns. A cube is built in
//! two passes: one scan filling a dense `[slot][passive cell]` table of raw
//! counts, then a prefix sum along the slot axis. The table is read-only after
//! load, so concurrent scans share it through an `Arc` without locking.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use super::{ensure_sweepable, AggregationBackend, BackendStats, BackendStatsCollector, RequestKind};
use crate::aggregate::{Aggregate, AggregateShape};
use crate::cube::Cube;
use crate::dimension::{BinConfig, Dimension, Interval};
use crate::error::{CrossfilterError, CrossfilterResult};
use crate::filter::FilterContext;
use crate::view::View;

/// Named columns of equal length
#[derive(Debug, Clone, Default)]
pub struct ColumnarTable {
    columns: HashMap<String, Vec<f64>>,
    rows: usize,
}

impl ColumnarTable {
    pub fn builder() -> ColumnarTableBuilder {
        ColumnarTableBuilder::default()
    }

    /// Build from `(name, values)` pairs
    pub fn from_columns<I, S>(columns: I) -> CrossfilterResult<Self>
    where
        I: IntoIterator<Item = (S, Vec<f64>)>,
        S: Into<String>,
    {
        columns
            .into_iter()
            .fold(Self::builder(), |builder, (name, values)| {
                builder.column(name, values)
            })
            .build()
    }

    pub fn row_count(&self) -> usize {
        self.rows
    }

    pub fn column(&self, name: &str) -> Option<&[f64]> {
        self.columns.get(name).map(Vec::as_slice)
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.keys().map(String::as_str)
    }

    fn require(&self, name: &str) -> CrossfilterResult<&[f64]> {
        self.column(name).ok_or_else(|| {
            CrossfilterError::invalid_request(format!("Unknown column '{}'", name))
        })
    }
}

/// Accumulates columns and checks their lengths on `build`
#[derive(Debug, Default)]
pub struct ColumnarTableBuilder {
    columns: Vec<(String, Vec<f64>)>,
}

impl ColumnarTableBuilder {
    pub fn column<S: Into<String>>(mut self, name: S, values: Vec<f64>) -> Self {
        self.columns.push((name.into(), values));
        self
    }

    pub fn build(self) -> CrossfilterResult<ColumnarTable> {
        let rows = self.columns.first().map(|(_, v)| v.len()).unwrap_or(0);
        let mut columns = HashMap::with_capacity(self.columns.len());
        for (name, values) in self.columns {
            if values.len() != rows {
                return Err(CrossfilterError::configuration(format!(
                    "Column '{}' has {} rows, expected {}",
                    name,
                    values.len(),
                    rows
                )));
            }
            if columns.insert(name.clone(), values).is_some() {
                return Err(CrossfilterError::configuration(format!(
                    "Duplicate column '{}'",
                    name
                )));
            }
        }
        Ok(ColumnarTable { columns, rows })
    }
}

/// Conjunction of interval predicates resolved against table columns
struct RowFilter<'a> {
    predicates: Vec<(&'a [f64], Interval)>,
}

impl<'a> RowFilter<'a> {
    fn resolve(table: &'a ColumnarTable, filter: &FilterContext) -> CrossfilterResult<Self> {
        let mut predicates = Vec::with_capacity(filter.len());
        for (name, interval) in filter.iter() {
            predicates.push((table.require(name)?, *interval));
        }
        Ok(Self { predicates })
    }

    #[inline]
    fn matches(&self, row: usize) -> bool {
        self.predicates
            .iter()
            .all(|(column, interval)| interval.contains(column[row]))
    }
}

/// Maps a row to its cell in a passive aggregate
enum CellLocator<'a> {
    Scalar,
    Bins(&'a [f64], BinConfig),
    Grid {
        x: &'a [f64],
        x_bins: BinConfig,
        y: &'a [f64],
        y_bins: BinConfig,
    },
}

impl<'a> CellLocator<'a> {
    fn for_view(table: &'a ColumnarTable, view: &View) -> CrossfilterResult<Self> {
        match view {
            View::Scalar { .. } => Ok(Self::Scalar),
            View::Univariate { dimension, .. } => Self::for_histogram(table, dimension),
            View::Bivariate { x, y, .. } => Self::for_heatmap(table, x, y),
        }
    }

    fn for_histogram(table: &'a ColumnarTable, dimension: &Dimension) -> CrossfilterResult<Self> {
        Ok(Self::Bins(table.require(dimension.name())?, *dimension.bins()))
    }

    fn for_heatmap(
        table: &'a ColumnarTable,
        x: &Dimension,
        y: &Dimension,
    ) -> CrossfilterResult<Self> {
        Ok(Self::Grid {
            x: table.require(x.name())?,
            x_bins: *x.bins(),
            y: table.require(y.name())?,
            y_bins: *y.bins(),
        })
    }

    fn shape(&self) -> AggregateShape {
        match self {
            Self::Scalar => AggregateShape::Scalar,
            Self::Bins(_, bins) => AggregateShape::Bins(bins.count),
            Self::Grid { x_bins, y_bins, .. } => AggregateShape::Grid {
                x: x_bins.count,
                y: y_bins.count,
            },
        }
    }

    #[inline]
    fn cell(&self, row: usize) -> Option<usize> {
        match self {
            Self::Scalar => Some(0),
            Self::Bins(column, bins) => bins.bin_of(column[row]),
            Self::Grid {
                x,
                x_bins,
                y,
                y_bins,
            } => {
                let bx = x_bins.bin_of(x[row])?;
                let by = y_bins.bin_of(y[row])?;
                Some(bx * y_bins.count + by)
            }
        }
    }
}

/// Single pass producing one aggregate
fn scan_aggregate(
    table: &ColumnarTable,
    locator: &CellLocator<'_>,
    filter: &RowFilter<'_>,
) -> CrossfilterResult<Aggregate> {
    let shape = locator.shape();
    let mut counts = vec![0u64; shape.len()];
    for row in 0..table.row_count() {
        if !filter.matches(row) {
            continue;
        }
        if let Some(cell) = locator.cell(row) {
            counts[cell] += 1;
        }
    }
    Aggregate::from_counts(shape, counts)
}

/// Single pass producing raw slot counts, then the prefix sum
fn scan_cube(
    table: &ColumnarTable,
    active: &Dimension,
    locator: &CellLocator<'_>,
    filter: &RowFilter<'_>,
    resolution: usize,
) -> CrossfilterResult<Cube> {
    let sweep = table.require(active.name())?;
    let shape = locator.shape();
    let width = shape.len();
    let mut raw = vec![0u64; (resolution + 1) * width];

    for (row, value) in sweep.iter().enumerate() {
        if !filter.matches(row) {
            continue;
        }
        if let Some(cell) = locator.cell(row) {
            let slot = active.sweep_slot(*value, resolution);
            raw[slot * width + cell] += 1;
        }
    }

    Cube::from_slot_counts(active, shape, resolution, raw)
}

/// Backend computing exact aggregates over a resident [`ColumnarTable`]
pub struct ColumnarBackend {
    table: Arc<ColumnarTable>,
    stats: Arc<BackendStatsCollector>,
}

impl ColumnarBackend {
    pub fn new(table: ColumnarTable) -> Self {
        Self::from_shared(Arc::new(table))
    }

    pub fn from_shared(table: Arc<ColumnarTable>) -> Self {
        debug!(
            "Columnar backend holding {} rows across {} columns",
            table.row_count(),
            table.columns.len()
        );
        Self {
            table,
            stats: Arc::new(BackendStatsCollector::default()),
        }
    }

    pub fn table(&self) -> &Arc<ColumnarTable> {
        &self.table
    }

    /// Run a scan on the blocking pool and track its outcome
    async fn run_scan<T, F>(&self, kind: RequestKind, scan: F) -> CrossfilterResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&ColumnarTable) -> CrossfilterResult<T> + Send + 'static,
    {
        self.stats.record_request(kind);
        let table = self.table.clone();
        let rows = table.row_count();
        let result = tokio::task::spawn_blocking(move || scan(&table))
            .await
            .map_err(|e| CrossfilterError::backend(format!("Scan task failed: {}", e)))
            .and_then(|inner| inner);

        match &result {
            Ok(_) => self.stats.record_rows_scanned(rows),
            Err(_) => self.stats.record_failure(),
        }
        result
    }
}

#[async_trait]
impl AggregationBackend for ColumnarBackend {
    fn name(&self) -> &str {
        "columnar"
    }

    async fn count(&self, filter: &FilterContext) -> CrossfilterResult<u64> {
        let filter = filter.clone();
        self.run_scan(RequestKind::Count, move |table| {
            let rows = RowFilter::resolve(table, &filter)?;
            let aggregate = scan_aggregate(table, &CellLocator::Scalar, &rows)?;
            Ok(aggregate.value())
        })
        .await
    }

    async fn histogram(
        &self,
        dimension: &Dimension,
        filter: &FilterContext,
    ) -> CrossfilterResult<Aggregate> {
        let dimension = dimension.clone();
        let filter = filter.clone();
        self.run_scan(RequestKind::Histogram, move |table| {
            let rows = RowFilter::resolve(table, &filter)?;
            let locator = CellLocator::for_histogram(table, &dimension)?;
            scan_aggregate(table, &locator, &rows)
        })
        .await
    }

    async fn heatmap(
        &self,
        x: &Dimension,
        y: &Dimension,
        filter: &FilterContext,
    ) -> CrossfilterResult<Aggregate> {
        let (x, y) = (x.clone(), y.clone());
        let filter = filter.clone();
        self.run_scan(RequestKind::Heatmap, move |table| {
            let rows = RowFilter::resolve(table, &filter)?;
            let locator = CellLocator::for_heatmap(table, &x, &y)?;
            scan_aggregate(table, &locator, &rows)
        })
        .await
    }

    async fn cumulative_cube(
        &self,
        active: &Dimension,
        passive: &View,
        filter: &FilterContext,
        resolution: usize,
    ) -> CrossfilterResult<Cube> {
        ensure_sweepable(active, filter, resolution)?;
        let active = active.clone();
        let passive = passive.clone();
        let filter = filter.clone();
        self.run_scan(RequestKind::Cube, move |table| {
            let rows = RowFilter::resolve(table, &filter)?;
            let locator = CellLocator::for_view(table, &passive)?;
            scan_cube(table, &active, &locator, &rows, resolution)
        })
        .await
    }

    fn stats(&self) -> BackendStats {
        self.stats.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> ColumnarTable {
        ColumnarTable::builder()
            .column("A", vec![0.5, 1.5, 2.5, 3.5, 1.2, f64::NAN])
            .column("B", vec![10.0, 20.0, 30.0, 10.0, 25.0, 15.0])
            .build()
            .unwrap()
    }

    #[test]
    fn test_builder_rejects_ragged_columns() {
        let result = ColumnarTable::builder()
            .column("A", vec![1.0, 2.0])
            .column("B", vec![1.0])
            .build();
        assert!(matches!(result, Err(CrossfilterError::Configuration(_))));
    }

    #[tokio::test]
    async fn test_count_and_histogram() {
        let backend = ColumnarBackend::new(table());
        let b = Dimension::new("B", [10.0, 30.0], 2, None).unwrap();

        assert_eq!(backend.count(&FilterContext::new()).await.unwrap(), 6);

        let filter = FilterContext::new().with("A", Interval::new(1.0, 3.0));
        assert_eq!(backend.count(&filter).await.unwrap(), 3);

        let hist = backend.histogram(&b, &filter).await.unwrap();
        // B values under the filter: 20, 30, 25
        assert_eq!(hist.counts(), &[0, 3]);

        let stats = backend.stats();
        assert_eq!(stats.requests, 3);
        assert_eq!(stats.histogram_requests, 1);
        assert_eq!(stats.rows_scanned, 18);
    }

    #[tokio::test]
    async fn test_unknown_column_is_invalid_request() {
        let backend = ColumnarBackend::new(table());
        let filter = FilterContext::new().with("C", Interval::new(0.0, 1.0));
        let err = backend.count(&filter).await.unwrap_err();
        assert!(matches!(err, CrossfilterError::InvalidRequest(_)));
        assert_eq!(backend.stats().failed_requests, 1);
    }

    #[tokio::test]
    async fn test_cube_rejects_constrained_active_dimension() {
        let backend = ColumnarBackend::new(table());
        let a = Dimension::new("A", [0.0, 4.0], 4, None).unwrap();
        let view = View::Scalar {
            id: crate::view::ViewId(0),
            title: "count".to_string(),
        };
        let filter = FilterContext::new().with("A", Interval::new(0.0, 1.0));
        let err = backend.cumulative_cube(&a, &view, &filter, 8).await.unwrap_err();
        assert!(matches!(err, CrossfilterError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn test_scalar_cube_counts_nan_only_in_total() {
        let backend = ColumnarBackend::new(table());
        let a = Dimension::new("A", [0.0, 4.0], 4, None).unwrap();
        let view = View::Scalar {
            id: crate::view::ViewId(0),
            title: "count".to_string(),
        };
        let cube = backend
            .cumulative_cube(&a, &view, &FilterContext::new(), 4)
            .await
            .unwrap();
        let slices: Vec<u64> = (0..=4).map(|i| cube.slice(i).unwrap().value()).collect();
        assert_eq!(slices, vec![0, 1, 3, 4, 6]);
    }
}
