//! # Crossfilter Core Library
//!
//! Shared data model, cumulative cubes and aggregation backends for linked-view
//! cross-filtering.
//!
//! ## Features
//!
//! - **Data Model**: dimensions with equal-width bins, half-open brush
//!   intervals, filter contexts and scalar/univariate/bivariate views
//! - **Cubes**: cumulative aggregates swept along an active dimension, so a
//!   brush is answered by subtracting two slices
//! - **Backends**: an in-process columnar scan and a pooled remote SQL backend
//!   behind one [`AggregationBackend`] trait
//!
//! ## Architecture
//!
//! The engine crate builds on this library for:
//! - Cube construction per passive view
//! - Epoch-tagged cube caching and invalidation
//! - Baseline (cache-free) querying for verification

pub mod aggregate;
pub mod backend;
pub mod cube;
pub mod dimension;
pub mod error;
pub mod filter;
pub mod view;

// Re-export commonly used types
pub use aggregate::{Aggregate, AggregateShape};
pub use backend::{AggregationBackend, BackendStats, BoxedBackend, ColumnarBackend, ColumnarTable};
pub use cube::Cube;
pub use dimension::{BinConfig, Dimension, DimensionConfig, Interval};
pub use error::{CrossfilterError, CrossfilterResult};
pub use filter::FilterContext;
pub use view::{View, ViewConfig, ViewId, ViewKind, ViewRegistry};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Upper bound on cube resolution accepted by the engine
pub const MAX_CUBE_RESOLUTION: usize = 8_192;
