//! Outbound rendering contract
//!
//! The engine hands each passive view a [`ViewUpdate`] keyed by data-domain bin
//! boundaries, never raw bin indices. Drawing is up to the implementor.

use crossfilter_core::{Aggregate, CrossfilterError, CrossfilterResult, View, ViewId};
use serde::Serialize;
use std::collections::HashMap;

/// One bin of a histogram update
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BinValue {
    pub key: f64,
    pub key_end: f64,
    pub value: u64,
}

/// One cell of a heatmap update
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CellValue {
    pub key_x: f64,
    pub key_y: f64,
    pub value: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "values", rename_all = "snake_case")]
pub enum ViewUpdate {
    Scalar(u64),
    Bins(Vec<BinValue>),
    Cells(Vec<CellValue>),
}

impl ViewUpdate {
    /// Attach bin keys to an aggregate computed for `view`
    pub fn from_aggregate(view: &View, aggregate: &Aggregate) -> CrossfilterResult<Self> {
        if aggregate.shape() != view.shape() {
            return Err(CrossfilterError::backend(format!(
                "Aggregate shape {:?} does not match view '{}' ({:?})",
                aggregate.shape(),
                view.title(),
                view.shape()
            )));
        }

        let update = match view {
            View::Scalar { .. } => ViewUpdate::Scalar(aggregate.value()),
            View::Univariate { dimension, .. } => {
                let bins = dimension.bins();
                ViewUpdate::Bins(
                    aggregate
                        .counts()
                        .iter()
                        .enumerate()
                        .map(|(i, &value)| BinValue {
                            key: bins.key(i),
                            key_end: bins.key_end(i),
                            value,
                        })
                        .collect(),
                )
            }
            View::Bivariate { x, y, .. } => {
                let (xb, yb) = (x.bins(), y.bins());
                let mut cells = Vec::with_capacity(aggregate.counts().len());
                for i in 0..xb.count {
                    for j in 0..yb.count {
                        cells.push(CellValue {
                            key_x: xb.key(i),
                            key_y: yb.key(j),
                            value: aggregate.cell(i, j).unwrap_or(0),
                        });
                    }
                }
                ViewUpdate::Cells(cells)
            }
        };
        Ok(update)
    }

    /// Sum of all values
    pub fn total(&self) -> u64 {
        match self {
            ViewUpdate::Scalar(value) => *value,
            ViewUpdate::Bins(bins) => bins.iter().map(|b| b.value).sum(),
            ViewUpdate::Cells(cells) => cells.iter().map(|c| c.value).sum(),
        }
    }
}

/// Receives per-view updates from the controller
pub trait ViewRenderer {
    fn render(&mut self, view: &View, update: ViewUpdate);

    /// A view's update failed; other views are unaffected
    fn render_error(&mut self, view: &View, error: &CrossfilterError);
}

/// Keeps the latest update and error per view
#[derive(Debug, Default)]
pub struct CollectingRenderer {
    pub updates: HashMap<ViewId, ViewUpdate>,
    pub errors: HashMap<ViewId, String>,
    pub frames: usize,
}

impl CollectingRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn latest(&self, view: ViewId) -> Option<&ViewUpdate> {
        self.updates.get(&view)
    }
}

impl ViewRenderer for CollectingRenderer {
    fn render(&mut self, view: &View, update: ViewUpdate) {
        self.frames += 1;
        self.errors.remove(&view.id());
        self.updates.insert(view.id(), update);
    }

    fn render_error(&mut self, view: &View, error: &CrossfilterError) {
        self.errors.insert(view.id(), error.to_string());
    }
}
