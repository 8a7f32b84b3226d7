//! Pooled remote SQL backend
//!
//! Requests lease a connection from a bounded pool. The pool hands out at most
//! `max_connections` leases; further requests wait on a fair semaphore and are
//! served in arrival order. Each request only waits on its own lease.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, trace, warn};

use super::sql::{decode_aggregate, decode_count, decode_cube, SqlRequest, SqlRow, StatementBuilder};
use super::{ensure_sweepable, AggregationBackend, BackendStats, BackendStatsCollector, RequestKind};
use crate::aggregate::Aggregate;
use crate::cube::Cube;
use crate::dimension::Dimension;
use crate::error::{CrossfilterError, CrossfilterResult};
use crate::filter::FilterContext;
use crate::view::View;

/// A live connection able to run one statement at a time
#[async_trait]
pub trait SqlConnection: Send {
    async fn execute(&mut self, request: &SqlRequest) -> CrossfilterResult<Vec<SqlRow>>;
}

/// Opens new connections for the pool
#[async_trait]
pub trait SqlConnector: Send + Sync {
    type Connection: SqlConnection + 'static;

    async fn connect(&self) -> CrossfilterResult<Self::Connection>;
}

/// Pool and statement settings
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Maximum concurrent connection leases
    pub max_connections: usize,

    /// Per-request timeout, covering the connect if one is needed
    pub query_timeout: Duration,

    /// Bind values as placeholders so statements can be prepared once
    pub use_prepared_statements: bool,

    /// Table holding the dataset
    pub table: String,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: 8,
            query_timeout: Duration::from_secs(30),
            use_prepared_statements: true,
            table: "data".to_string(),
        }
    }
}

/// Counts a lease for as long as it is held, including when the request is dropped
struct InFlight<'a>(&'a AtomicUsize);

impl<'a> InFlight<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::Relaxed);
        Self(counter)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::Relaxed);
    }
}

/// Bounded pool of reusable connections
pub struct ConnectionPool<C: SqlConnector> {
    connector: C,
    idle: Mutex<Vec<C::Connection>>,
    permits: Arc<Semaphore>,
    max_connections: usize,
    query_timeout: Duration,
    in_flight: AtomicUsize,
}

impl<C: SqlConnector> ConnectionPool<C> {
    pub fn new(
        connector: C,
        max_connections: usize,
        query_timeout: Duration,
    ) -> CrossfilterResult<Self> {
        if max_connections == 0 {
            return Err(CrossfilterError::configuration(
                "Connection pool needs at least one connection",
            ));
        }
        Ok(Self {
            connector,
            idle: Mutex::new(Vec::with_capacity(max_connections)),
            permits: Arc::new(Semaphore::new(max_connections)),
            max_connections,
            query_timeout,
            in_flight: AtomicUsize::new(0),
        })
    }

    pub fn max_connections(&self) -> usize {
        self.max_connections
    }

    /// Leases currently held
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Relaxed)
    }

    /// Connections parked for reuse
    pub fn idle_connections(&self) -> usize {
        self.idle.lock().len()
    }

    /// Run one statement on a leased connection.
    ///
    /// A connection that fails or times out is dropped instead of being
    /// returned to the pool.
    pub async fn execute(&self, request: &SqlRequest) -> CrossfilterResult<Vec<SqlRow>> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| CrossfilterError::connection("Connection pool closed"))?;
        let _lease = InFlight::enter(&self.in_flight);

        let timeout_ms = self.query_timeout.as_millis() as u64;
        let outcome = tokio::time::timeout(self.query_timeout, self.run_leased(request)).await;

        match outcome {
            Ok(result) => result,
            Err(_) => {
                warn!("Statement timed out after {}ms: {}", timeout_ms, request.sql);
                Err(CrossfilterError::timeout(timeout_ms))
            }
        }
    }

    async fn run_leased(&self, request: &SqlRequest) -> CrossfilterResult<Vec<SqlRow>> {
        let pooled = self.idle.lock().pop();
        let mut connection = match pooled {
            Some(connection) => connection,
            None => {
                debug!("Opening new connection");
                self.connector.connect().await?
            }
        };

        trace!("Executing: {} {:?}", request.sql, request.params);
        let rows = connection.execute(request).await?;
        self.idle.lock().push(connection);
        Ok(rows)
    }
}

/// [`AggregationBackend`] translating operations to SQL over a [`ConnectionPool`]
pub struct PooledSqlBackend<C: SqlConnector> {
    pool: ConnectionPool<C>,
    statements: StatementBuilder,
    stats: Arc<BackendStatsCollector>,
}

impl<C: SqlConnector> PooledSqlBackend<C> {
    pub fn new(connector: C, config: PoolConfig) -> CrossfilterResult<Self> {
        let pool = ConnectionPool::new(connector, config.max_connections, config.query_timeout)?;
        Ok(Self {
            pool,
            statements: StatementBuilder::new(config.table, config.use_prepared_statements),
            stats: Arc::new(BackendStatsCollector::default()),
        })
    }

    pub fn pool(&self) -> &ConnectionPool<C> {
        &self.pool
    }

    async fn run(&self, kind: RequestKind, request: SqlRequest) -> CrossfilterResult<Vec<SqlRow>> {
        self.stats.record_request(kind);
        let result = self.pool.execute(&request).await;
        if let Err(ref err) = result {
            self.stats.record_failure();
            debug!("Remote {:?} request failed ({}): {}", kind, err.category(), err);
        }
        result
    }
}

#[async_trait]
impl<C: SqlConnector> AggregationBackend for PooledSqlBackend<C> {
    fn name(&self) -> &str {
        "pooled-sql"
    }

    async fn count(&self, filter: &FilterContext) -> CrossfilterResult<u64> {
        let rows = self
            .run(RequestKind::Count, self.statements.count(filter))
            .await?;
        decode_count(&rows)
    }

    async fn histogram(
        &self,
        dimension: &Dimension,
        filter: &FilterContext,
    ) -> CrossfilterResult<Aggregate> {
        let rows = self
            .run(RequestKind::Histogram, self.statements.histogram(dimension, filter))
            .await?;
        decode_aggregate(&[dimension], &rows)
    }

    async fn heatmap(
        &self,
        x: &Dimension,
        y: &Dimension,
        filter: &FilterContext,
    ) -> CrossfilterResult<Aggregate> {
        let rows = self
            .run(RequestKind::Heatmap, self.statements.heatmap(x, y, filter))
            .await?;
        decode_aggregate(&[x, y], &rows)
    }

    async fn cumulative_cube(
        &self,
        active: &Dimension,
        passive: &View,
        filter: &FilterContext,
        resolution: usize,
    ) -> CrossfilterResult<Cube> {
        ensure_sweepable(active, filter, resolution)?;
        let request = self.statements.cube(active, passive, filter, resolution);
        let rows = self.run(RequestKind::Cube, request).await?;
        decode_cube(active, passive, resolution, &rows)
    }

    fn stats(&self) -> BackendStats {
        self.stats.snapshot()
    }
}
