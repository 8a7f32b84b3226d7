//! Cube construction: one cumulative cube request per passive view

use crossfilter_core::{
    BoxedBackend, CrossfilterResult, Cube, Dimension, FilterContext, View, ViewId,
};
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::metrics::EngineMetricsCollector;

/// Issues cube requests against a backend, optionally retrying once
#[derive(Clone)]
pub struct CubeBuilder {
    backend: BoxedBackend,
    retry_failed_build: bool,
    metrics: Arc<EngineMetricsCollector>,
}

impl CubeBuilder {
    pub fn new(
        backend: BoxedBackend,
        retry_failed_build: bool,
        metrics: Arc<EngineMetricsCollector>,
    ) -> Self {
        Self {
            backend,
            retry_failed_build,
            metrics,
        }
    }

    pub fn backend(&self) -> &BoxedBackend {
        &self.backend
    }

    /// Build one passive view's cube, retrying a retriable failure once
    pub async fn build_one(
        &self,
        active: &Dimension,
        passive: &View,
        filter: &FilterContext,
        resolution: usize,
    ) -> CrossfilterResult<Cube> {
        match self
            .backend
            .cumulative_cube(active, passive, filter, resolution)
            .await
        {
            Ok(cube) => Ok(cube),
            Err(err) if self.retry_failed_build && err.is_retriable() => {
                warn!(
                    "Cube build for {} over {} failed ({}), retrying once",
                    passive.id(),
                    active.name(),
                    err
                );
                self.metrics.record_retry();
                self.backend
                    .cumulative_cube(active, passive, filter, resolution)
                    .await
            }
            Err(err) => Err(err),
        }
    }

    /// Build every passive view's cube concurrently; one result per view, in input order
    pub async fn build_each(
        &self,
        active: &Dimension,
        passive: &[View],
        filter: &FilterContext,
        resolution: usize,
    ) -> Vec<(ViewId, CrossfilterResult<Cube>)> {
        debug!(
            "Building {} cube(s) over {} at resolution {} under {}",
            passive.len(),
            active.name(),
            resolution,
            filter
        );
        let builds = passive.iter().map(|view| async move {
            (
                view.id(),
                self.build_one(active, view, filter, resolution).await,
            )
        });
        join_all(builds).await
    }

    /// All-or-nothing build: the first failure fails the whole call
    pub async fn build(
        &self,
        active: &Dimension,
        passive: &[View],
        filter: &FilterContext,
        resolution: usize,
    ) -> CrossfilterResult<HashMap<ViewId, Cube>> {
        let mut cubes = HashMap::with_capacity(passive.len());
        for (id, result) in self.build_each(active, passive, filter, resolution).await {
            cubes.insert(id, result?);
        }
        Ok(cubes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use crossfilter_core::{
        Aggregate, AggregationBackend, BackendStats, ColumnarBackend, ColumnarTable,
        CrossfilterError,
    };
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Fails the first `failures` cube requests with the given error kind
    struct FlakyBackend {
        inner: ColumnarBackend,
        failures: AtomicUsize,
        retriable: bool,
    }

    #[async_trait]
    impl AggregationBackend for FlakyBackend {
        fn name(&self) -> &str {
            "flaky"
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
            self.inner.heatmap(x, y, filter).await
        }

        async fn cumulative_cube(
            &self,
            active: &Dimension,
            passive: &View,
            filter: &FilterContext,
            resolution: usize,
        ) -> CrossfilterResult<Cube> {
            let remaining = self.failures.load(Ordering::SeqCst);
            if remaining > 0 {
                self.failures.store(remaining - 1, Ordering::SeqCst);
                return Err(if self.retriable {
                    CrossfilterError::connection("reset by peer")
                } else {
                    CrossfilterError::backend("syntax error")
                });
            }
            self.inner
                .cumulative_cube(active, passive, filter, resolution)
                .await
        }

        fn stats(&self) -> BackendStats {
            self.inner.stats()
        }
    }

    fn table() -> ColumnarTable {
        ColumnarTable::builder()
            .column("A", vec![0.5, 1.5, 2.5, 3.5])
            .column("B", vec![0.0, 1.0, 2.0, 3.0])
            .build()
            .unwrap()
    }

    fn setup(
        failures: usize,
        retriable: bool,
        retry: bool,
    ) -> (CubeBuilder, Arc<EngineMetricsCollector>) {
        let metrics = Arc::new(EngineMetricsCollector::new());
        let backend: BoxedBackend = Arc::new(FlakyBackend {
            inner: ColumnarBackend::new(table()),
            failures: AtomicUsize::new(failures),
            retriable,
        });
        (CubeBuilder::new(backend, retry, metrics.clone()), metrics)
    }

    fn views() -> (Dimension, Vec<View>) {
        let a = Dimension::new("A", [0.0, 4.0], 4, None).unwrap();
        let b = Dimension::new("B", [0.0, 4.0], 4, None).unwrap();
        let passive = vec![
            View::Scalar {
                id: ViewId(0),
                title: "Count".to_string(),
            },
            View::Univariate {
                id: ViewId(2),
                title: "B".to_string(),
                dimension: Arc::new(b),
                width: 100,
            },
        ];
        (a, passive)
    }

    #[tokio::test]
    async fn test_build_returns_one_cube_per_view() {
        let (builder, _) = setup(0, true, true);
        let (active, passive) = views();
        let cubes = builder
            .build(&active, &passive, &FilterContext::new(), 4)
            .await
            .unwrap();
        assert_eq!(cubes.len(), 2);
        assert_eq!(cubes[&ViewId(0)].total().value(), 4);
        assert_eq!(cubes[&ViewId(2)].total().counts(), &[1, 1, 1, 1]);
    }

    #[tokio::test]
    async fn test_retriable_failure_is_retried_once() {
        let (builder, metrics) = setup(1, true, true);
        let (active, passive) = views();
        let cube = builder
            .build_one(&active, &passive[0], &FilterContext::new(), 4)
            .await
            .unwrap();
        assert_eq!(cube.total().value(), 4);
        assert_eq!(metrics.snapshot().build_retries_total, 1);
    }

    #[tokio::test]
    async fn test_non_retriable_failure_is_not_retried() {
        let (builder, metrics) = setup(1, false, true);
        let (active, passive) = views();
        let err = builder
            .build_one(&active, &passive[0], &FilterContext::new(), 4)
            .await
            .unwrap_err();
        assert!(matches!(err, CrossfilterError::Backend(_)));
        assert_eq!(metrics.snapshot().build_retries_total, 0);
    }

    #[tokio::test]
    async fn test_one_failure_fails_whole_build_but_not_build_each() {
        let (builder, _) = setup(1, true, false);
        let (active, passive) = views();
        let each = builder
            .build_each(&active, &passive, &FilterContext::new(), 4)
            .await;
        assert_eq!(each.iter().filter(|(_, r)| r.is_err()).count(), 1);
        assert_eq!(each[0].0, ViewId(0));
        assert_eq!(each[1].0, ViewId(2));

        let (builder, _) = setup(1, true, false);
        assert!(builder
            .build(&active, &passive, &FilterContext::new(), 4)
            .await
            .is_err());
    }
}
