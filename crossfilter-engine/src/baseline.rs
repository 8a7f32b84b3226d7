//! Cache-free querying: every request goes straight to the backend
//!
//! The active brush is folded into the filter context as an ordinary
//! constraint, so results carry no snapping. Used when caching is disabled,
//! while a cube is still pending, and for views whose build failed.

use crossfilter_core::{
    Aggregate, AggregationBackend, CrossfilterResult, Dimension, FilterContext, Interval, View,
};

/// Exact aggregate for `view` under `filter`, plus the active brush if any
pub async fn query(
    backend: &dyn AggregationBackend,
    view: &View,
    filter: &FilterContext,
    active: Option<(&Dimension, &Interval)>,
) -> CrossfilterResult<Aggregate> {
    match active {
        Some((dimension, brush)) => {
            let folded = filter.clone().with(dimension.name(), *brush);
            backend.aggregate(view, &folded).await
        }
        None => backend.aggregate(view, filter).await,
    }
}
