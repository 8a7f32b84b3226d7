//! Aggregate values: a scalar count, a 1D bin array or a 2D bin matrix

use serde::{Deserialize, Serialize};

use crate::error::{CrossfilterError, CrossfilterResult};

/// Shape of an aggregate, fixed by the view variant that produces it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AggregateShape {
    Scalar,
    Bins(usize),
    Grid { x: usize, y: usize },
}

impl AggregateShape {
    /// Number of counts held by an aggregate of this shape
    pub fn len(&self) -> usize {
        match *self {
            AggregateShape::Scalar => 1,
            AggregateShape::Bins(n) => n,
            AggregateShape::Grid { x, y } => x * y,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Row counts laid out flat; grids are row-major over X then Y
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Aggregate {
    shape: AggregateShape,
    counts: Vec<u64>,
}

impl Aggregate {
    pub fn zeros(shape: AggregateShape) -> Self {
        Self {
            shape,
            counts: vec![0; shape.len()],
        }
    }

    pub fn scalar(count: u64) -> Self {
        Self {
            shape: AggregateShape::Scalar,
            counts: vec![count],
        }
    }

    pub fn bins(counts: Vec<u64>) -> Self {
        Self {
            shape: AggregateShape::Bins(counts.len()),
            counts,
        }
    }

    /// Wrap a flat buffer, checking it matches the shape
    pub fn from_counts(shape: AggregateShape, counts: Vec<u64>) -> CrossfilterResult<Self> {
        if counts.len() != shape.len() {
            return Err(CrossfilterError::invalid_request(format!(
                "Aggregate of shape {:?} needs {} counts, got {}",
                shape,
                shape.len(),
                counts.len()
            )));
        }
        Ok(Self { shape, counts })
    }

    pub fn shape(&self) -> AggregateShape {
        self.shape
    }

    pub fn counts(&self) -> &[u64] {
        &self.counts
    }

    pub fn into_counts(self) -> Vec<u64> {
        self.counts
    }

    /// Scalar value; for non-scalar aggregates the total over all cells
    pub fn value(&self) -> u64 {
        match self.shape {
            AggregateShape::Scalar => self.counts[0],
            _ => self.total(),
        }
    }

    pub fn total(&self) -> u64 {
        self.counts.iter().sum()
    }

    pub fn cell(&self, x: usize, y: usize) -> Option<u64> {
        match self.shape {
            AggregateShape::Grid { x: nx, y: ny } if x < nx && y < ny => {
                Some(self.counts[x * ny + y])
            }
            _ => None,
        }
    }

    /// Element-wise `self - lower`. Underflow means `lower` is not a prefix of `self`.
    pub fn checked_sub(&self, lower: &Aggregate) -> CrossfilterResult<Aggregate> {
        if self.shape != lower.shape {
            return Err(CrossfilterError::invalid_request(format!(
                "Cannot subtract aggregate of shape {:?} from {:?}",
                lower.shape, self.shape
            )));
        }
        let counts = diff_counts(&self.counts, &lower.counts)?;
        Ok(Self {
            shape: self.shape,
            counts,
        })
    }

    /// True when every count is at least the matching count in `other`
    pub fn dominates(&self, other: &Aggregate) -> bool {
        self.shape == other.shape
            && self
                .counts
                .iter()
                .zip(other.counts.iter())
                .all(|(a, b)| a >= b)
    }
}

/// Element-wise difference of two equally sized count buffers
pub(crate) fn diff_counts(upper: &[u64], lower: &[u64]) -> CrossfilterResult<Vec<u64>> {
    upper
        .iter()
        .zip(lower.iter())
        .enumerate()
        .map(|(i, (hi, lo))| {
            hi.checked_sub(*lo).ok_or_else(|| {
                CrossfilterError::stale(format!(
                    "negative count at cell {}: {} - {}",
                    i, hi, lo
                ))
            })
        })
        .collect()
}
