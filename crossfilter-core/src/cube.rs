//! Cumulative aggregate cubes swept along an active dimension
//!
//! A cube for a passive view holds `resolution + 1` slices, each shaped like the
//! view's own aggregate. Slice `i < resolution` counts rows whose active value is
//! strictly below boundary `i`; the last slice counts every row matching the
//! filter context. A brush on the active dimension is answered by snapping its
//! ends to slice indices and subtracting two slices, without touching the data.

use crate::aggregate::{diff_counts, Aggregate, AggregateShape};
use crate::dimension::{Dimension, Interval};
use crate::error::{CrossfilterError, CrossfilterResult};

/// Immutable cumulative cube. Replaced wholesale, never edited.
#[derive(Debug, Clone, PartialEq)]
pub struct Cube {
    active: Dimension,
    shape: AggregateShape,
    resolution: usize,
    /// `(resolution + 1) * shape.len()` counts, slice-major
    slices: Vec<u64>,
}

impl Cube {
    /// Build from raw per-slot counts by running a prefix sum along the slot axis.
    ///
    /// `raw[slot * shape.len() + cell]` holds the rows whose first contributing
    /// slice is `slot` (see [`Dimension::sweep_slot`]).
    pub fn from_slot_counts(
        active: &Dimension,
        shape: AggregateShape,
        resolution: usize,
        mut raw: Vec<u64>,
    ) -> CrossfilterResult<Self> {
        if resolution == 0 {
            return Err(CrossfilterError::invalid_request(
                "Cube resolution must be greater than 0",
            ));
        }
        let width = shape.len();
        let expected = (resolution + 1) * width;
        if raw.len() != expected {
            return Err(CrossfilterError::invalid_request(format!(
                "Raw cube counts for '{}' need {} cells, got {}",
                active.name(),
                expected,
                raw.len()
            )));
        }

        for slot in 1..=resolution {
            let (done, rest) = raw.split_at_mut(slot * width);
            let previous = &done[(slot - 1) * width..];
            for (cell, prior) in rest[..width].iter_mut().zip(previous.iter()) {
                *cell += *prior;
            }
        }

        Ok(Self {
            active: active.clone(),
            shape,
            resolution,
            slices: raw,
        })
    }

    pub fn active_dimension(&self) -> &Dimension {
        &self.active
    }

    pub fn shape(&self) -> AggregateShape {
        self.shape
    }

    pub fn resolution(&self) -> usize {
        self.resolution
    }

    /// Counts of slice `index`, `None` when out of range
    pub fn slice_counts(&self, index: usize) -> Option<&[u64]> {
        if index > self.resolution {
            return None;
        }
        let width = self.shape.len();
        Some(&self.slices[index * width..(index + 1) * width])
    }

    pub fn slice(&self, index: usize) -> Option<Aggregate> {
        self.slice_counts(index)
            .map(|counts| Aggregate::from_counts(self.shape, counts.to_vec()))
            .and_then(Result::ok)
    }

    /// The view's aggregate under the filter context alone
    pub fn total(&self) -> Aggregate {
        let width = self.shape.len();
        let start = self.resolution * width;
        match Aggregate::from_counts(self.shape, self.slices[start..].to_vec()) {
            Ok(aggregate) => aggregate,
            Err(_) => Aggregate::zeros(self.shape),
        }
    }

    /// Slice indices a brush snaps to
    pub fn snap(&self, interval: &Interval) -> (usize, usize) {
        (
            self.active.snap(interval.lo, self.resolution),
            self.active.snap(interval.hi, self.resolution),
        )
    }

    /// Data-domain value of boundary `index`
    pub fn boundary(&self, index: usize) -> f64 {
        self.active.boundary(index, self.resolution)
    }

    /// `slice(hi) - slice(lo)`; a negative cell yields `StaleResult`
    pub fn diff(&self, lo: usize, hi: usize) -> CrossfilterResult<Aggregate> {
        let upper = self.slice_counts(hi).ok_or_else(|| {
            CrossfilterError::invalid_request(format!("Slice {} out of range", hi))
        })?;
        let lower = self.slice_counts(lo).ok_or_else(|| {
            CrossfilterError::invalid_request(format!("Slice {} out of range", lo))
        })?;
        let counts = diff_counts(upper, lower)?;
        Aggregate::from_counts(self.shape, counts)
    }

    /// Answer a brush on the active dimension, or the unbrushed total for `None`
    pub fn query(&self, brush: Option<&Interval>) -> CrossfilterResult<Aggregate> {
        match brush {
            None => Ok(self.total()),
            Some(interval) => {
                let (lo, hi) = self.snap(interval);
                self.diff(lo, hi)
            }
        }
    }

    /// Slices never decrease element-wise along the sweep
    pub fn is_monotone(&self) -> bool {
        let width = self.shape.len();
        (1..=self.resolution).all(|slot| {
            let previous = &self.slices[(slot - 1) * width..slot * width];
            let current = &self.slices[slot * width..(slot + 1) * width];
            current.iter().zip(previous.iter()).all(|(c, p)| c >= p)
        })
    }

    /// Approximate heap footprint
    pub fn memory_bytes(&self) -> usize {
        self.slices.len() * std::mem::size_of::<u64>()
    }
}
