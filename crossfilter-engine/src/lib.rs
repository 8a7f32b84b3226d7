//! Crossfilter Engine Library
//!
//! Cube building, epoch-tagged cube caching and the interaction controller
//! that ties brush input to per-view updates.
//!
//! ## Components
//!
//! - [`builder::CubeBuilder`]: one cumulative cube request per passive view
//! - [`store::CubeStore`]: epochs, supersession and query-by-diff with snapping
//! - [`controller::InteractionController`]: active view and brush state, one
//!   coalesced update per tick
//! - [`baseline`]: direct backend querying used for fallback and verification

pub mod baseline;
pub mod builder;
pub mod config;
pub mod controller;
pub mod metrics;
pub mod render;
pub mod store;
pub mod synthetic;

// Re-export commonly used types
pub use builder::CubeBuilder;
pub use config::{BackendConfig, CacheConfig, EngineConfig, ResolutionPolicy};
pub use controller::{InteractionController, UpdateReport};
pub use metrics::{EngineMetricsCollector, EngineMetricsSnapshot};
pub use render::{BinValue, CellValue, CollectingRenderer, ViewRenderer, ViewUpdate};
pub use store::{BuildHandle, BuildOutcome, CubeSlot, CubeStore, Epoch, Served, Source};
