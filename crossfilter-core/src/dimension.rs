//! Dimensions, bin configuration and brush intervals

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{CrossfilterError, CrossfilterResult};

/// Declarative dimension definition as it appears in configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DimensionConfig {
    /// Column name in the dataset
    pub name: String,

    /// Continuous extent `[min, max]`
    pub extent: [f64; 2],

    /// Number of bins used when the dimension is aggregated
    pub bins: usize,

    /// Display format handed through to the renderer
    #[serde(default)]
    pub format: Option<String>,
}

/// Equal-width binning over a dimension's extent
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BinConfig {
    pub start: f64,
    pub stop: f64,
    pub step: f64,
    pub count: usize,
}

impl BinConfig {
    /// Bin index for a value, or `None` when the value lies outside `[start, stop]`.
    ///
    /// A value equal to `stop` lands in the last bin.
    pub fn bin_of(&self, value: f64) -> Option<usize> {
        if !(value >= self.start && value <= self.stop) {
            return None;
        }
        let raw = ((value - self.start) / self.step).floor();
        let index = if raw < 0.0 { 0 } else { raw as usize };
        Some(index.min(self.count - 1))
    }

    /// Clamp a raw bin index reported by an external engine
    pub fn clamp_index(&self, raw: i64) -> Option<usize> {
        if raw < 0 {
            return None;
        }
        let raw = raw as usize;
        if raw == self.count {
            Some(self.count - 1)
        } else if raw < self.count {
            Some(raw)
        } else {
            None
        }
    }

    /// Lower boundary of a bin (data-domain key)
    pub fn key(&self, index: usize) -> f64 {
        self.start + self.step * index as f64
    }

    /// Upper boundary of a bin
    pub fn key_end(&self, index: usize) -> f64 {
        if index + 1 >= self.count {
            self.stop
        } else {
            self.key(index + 1)
        }
    }
}

/// A named continuous attribute with a fixed extent and bin count
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dimension {
    name: String,
    min: f64,
    max: f64,
    bins: BinConfig,
    format: Option<String>,
}

impl Dimension {
    /// Create a dimension, rejecting empty names, zero bins and degenerate extents
    pub fn new<S: Into<String>>(
        name: S,
        extent: [f64; 2],
        bins: usize,
        format: Option<String>,
    ) -> CrossfilterResult<Self> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(CrossfilterError::configuration(
                "Dimension name cannot be empty",
            ));
        }
        if bins == 0 {
            return Err(CrossfilterError::configuration(format!(
                "Dimension '{}' must have at least one bin",
                name
            )));
        }
        let [min, max] = extent;
        if !min.is_finite() || !max.is_finite() {
            return Err(CrossfilterError::configuration(format!(
                "Dimension '{}' has a non-finite extent [{}, {}]",
                name, min, max
            )));
        }
        if min >= max {
            return Err(CrossfilterError::configuration(format!(
                "Dimension '{}' extent min {} must be below max {}",
                name, min, max
            )));
        }

        let bins = BinConfig {
            start: min,
            stop: max,
            step: (max - min) / bins as f64,
            count: bins,
        };

        Ok(Self {
            name,
            min,
            max,
            bins,
            format,
        })
    }

    /// Build from a configuration entry
    pub fn from_config(config: &DimensionConfig) -> CrossfilterResult<Self> {
        Self::new(
            config.name.clone(),
            config.extent,
            config.bins,
            config.format.clone(),
        )
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn extent(&self) -> [f64; 2] {
        [self.min, self.max]
    }

    pub fn bins(&self) -> &BinConfig {
        &self.bins
    }

    pub fn bin_count(&self) -> usize {
        self.bins.count
    }

    pub fn format(&self) -> Option<&str> {
        self.format.as_deref()
    }

    /// Boundary `index` of `resolution + 1` equally spaced boundaries across the extent
    pub fn boundary(&self, index: usize, resolution: usize) -> f64 {
        if index >= resolution {
            return self.max;
        }
        self.min + (self.max - self.min) * index as f64 / resolution as f64
    }

    /// Snap a data-domain value to the nearest boundary index, clamped to `[0, resolution]`
    pub fn snap(&self, value: f64, resolution: usize) -> usize {
        if value.is_nan() {
            return 0;
        }
        let position = (value - self.min) / (self.max - self.min) * resolution as f64;
        let rounded = position.round();
        if rounded <= 0.0 {
            0
        } else if rounded >= resolution as f64 {
            resolution
        } else {
            rounded as usize
        }
    }

    /// First cube slice a row with this active value contributes to.
    ///
    /// Slice `i < resolution` holds rows strictly below `boundary(i)`, slice
    /// `resolution` holds every row. Values at or above `max` and NaN only
    /// reach the last slice. The estimate from division is corrected against
    /// `boundary` so cube slices agree exactly with interval filters built
    /// from the same boundaries.
    pub fn sweep_slot(&self, value: f64, resolution: usize) -> usize {
        if resolution == 0 {
            return 0;
        }
        if value.is_nan() || value >= self.max {
            return resolution;
        }
        if value < self.min {
            return 0;
        }
        let estimate = ((value - self.min) / (self.max - self.min) * resolution as f64).floor();
        let mut k = (estimate.max(0.0) as usize).min(resolution - 1);
        while k + 1 < resolution && self.boundary(k + 1, resolution) <= value {
            k += 1;
        }
        while k > 0 && self.boundary(k, resolution) > value {
            k -= 1;
        }
        k + 1
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} [{}, {}] x{}",
            self.name, self.min, self.max, self.bins.count
        )
    }
}

/// Brush interval in data-domain units, half-open `lo <= v < hi`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Interval {
    pub lo: f64,
    pub hi: f64,
}

impl Interval {
    /// Create an interval; reversed ends are swapped
    pub fn new(lo: f64, hi: f64) -> Self {
        if lo > hi {
            Self { lo: hi, hi: lo }
        } else {
            Self { lo, hi }
        }
    }

    pub fn contains(&self, value: f64) -> bool {
        value >= self.lo && value < self.hi
    }

    /// A zero-width interval selects nothing
    pub fn is_empty(&self) -> bool {
        self.lo >= self.hi
    }

    pub fn width(&self) -> f64 {
        self.hi - self.lo
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.lo, self.hi)
    }
}
