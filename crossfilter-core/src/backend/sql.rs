//! SQL generation and result decoding for the remote backend
//!
//! Every backend operation becomes one grouped `COUNT(*)` query. With prepared
//! statements on, values are bound as `$n` placeholders so the statement text
//! only depends on which dimensions are filtered, letting a connection reuse
//! the prepared statement across brush moves. Otherwise values are inlined.

use serde::{Deserialize, Serialize};

use crate::aggregate::{Aggregate, AggregateShape};
use crate::cube::Cube;
use crate::dimension::{BinConfig, Dimension};
use crate::error::{CrossfilterError, CrossfilterResult};
use crate::filter::FilterContext;
use crate::view::View;

/// One result row: group keys followed by the count
pub type SqlRow = Vec<f64>;

/// A statement ready to send over a connection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SqlRequest {
    pub sql: String,
    #[serde(default)]
    pub params: Vec<f64>,
    /// Whether `sql` uses placeholders and may be prepared once per connection
    #[serde(default)]
    pub prepared: bool,
}

/// Collects bound values or renders them inline
struct Binder {
    prepared: bool,
    params: Vec<f64>,
}

impl Binder {
    fn bind(&mut self, value: f64) -> String {
        if self.prepared {
            self.params.push(value);
            format!("${}", self.params.len())
        } else {
            format!("{:?}", value)
        }
    }
}

fn quote(identifier: &str) -> String {
    format!("\"{}\"", identifier.replace('"', "\"\""))
}

/// Builds SQL for one table
#[derive(Debug, Clone)]
pub struct StatementBuilder {
    table: String,
    prepared: bool,
}

impl StatementBuilder {
    pub fn new<S: Into<String>>(table: S, prepared: bool) -> Self {
        Self {
            table: table.into(),
            prepared,
        }
    }

    pub fn uses_prepared_statements(&self) -> bool {
        self.prepared
    }

    fn binder(&self) -> Binder {
        Binder {
            prepared: self.prepared,
            params: Vec::new(),
        }
    }

    fn finish(&self, sql: String, binder: Binder) -> SqlRequest {
        SqlRequest {
            sql,
            params: binder.params,
            prepared: self.prepared,
        }
    }

    fn bin_expr(binder: &mut Binder, column: &str, bins: &BinConfig) -> String {
        let start = binder.bind(bins.start);
        let step = binder.bind(bins.step);
        format!("FLOOR(({} - {}) / {})", quote(column), start, step)
    }

    fn range_predicate(binder: &mut Binder, column: &str, bins: &BinConfig) -> String {
        let start = binder.bind(bins.start);
        let stop = binder.bind(bins.stop);
        format!("{col} >= {} AND {col} <= {}", start, stop, col = quote(column))
    }

    fn filter_predicates(binder: &mut Binder, filter: &FilterContext) -> Vec<String> {
        filter
            .iter()
            .map(|(name, interval)| {
                let lo = binder.bind(interval.lo);
                let hi = binder.bind(interval.hi);
                format!("{col} >= {} AND {col} < {}", lo, hi, col = quote(name))
            })
            .collect()
    }

    fn select(&self, keys: &[String], predicates: &[String]) -> String {
        let mut sql = String::from("SELECT ");
        for key in keys {
            sql.push_str(key);
            sql.push_str(", ");
        }
        sql.push_str("COUNT(*) FROM ");
        sql.push_str(&quote(&self.table));
        if !predicates.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&predicates.join(" AND "));
        }
        if !keys.is_empty() {
            let ordinals: Vec<String> = (1..=keys.len()).map(|i| i.to_string()).collect();
            sql.push_str(" GROUP BY ");
            sql.push_str(&ordinals.join(", "));
        }
        sql
    }

    pub fn count(&self, filter: &FilterContext) -> SqlRequest {
        let mut binder = self.binder();
        let predicates = Self::filter_predicates(&mut binder, filter);
        let sql = self.select(&[], &predicates);
        self.finish(sql, binder)
    }

    pub fn histogram(&self, dimension: &Dimension, filter: &FilterContext) -> SqlRequest {
        let mut binder = self.binder();
        let key = Self::bin_expr(&mut binder, dimension.name(), dimension.bins());
        let mut predicates = Self::filter_predicates(&mut binder, filter);
        predicates.push(Self::range_predicate(
            &mut binder,
            dimension.name(),
            dimension.bins(),
        ));
        let sql = self.select(&[key], &predicates);
        self.finish(sql, binder)
    }

    pub fn heatmap(&self, x: &Dimension, y: &Dimension, filter: &FilterContext) -> SqlRequest {
        let mut binder = self.binder();
        let keys = vec![
            Self::bin_expr(&mut binder, x.name(), x.bins()),
            Self::bin_expr(&mut binder, y.name(), y.bins()),
        ];
        let mut predicates = Self::filter_predicates(&mut binder, filter);
        predicates.push(Self::range_predicate(&mut binder, x.name(), x.bins()));
        predicates.push(Self::range_predicate(&mut binder, y.name(), y.bins()));
        let sql = self.select(&keys, &predicates);
        self.finish(sql, binder)
    }

    /// Raw slot counts for a cube; the prefix sum happens client side.
    ///
    /// The slot is a `FLOOR` estimate corrected by one step against the
    /// boundary values, computed the same way as [`Dimension::boundary`], so a
    /// row sitting exactly on a boundary lands in the same slot as the
    /// in-process sweep and agrees with `>=` interval filters.
    pub fn cube(
        &self,
        active: &Dimension,
        passive: &View,
        filter: &FilterContext,
        resolution: usize,
    ) -> SqlRequest {
        let mut binder = self.binder();
        let [min, max] = active.extent();
        let column = quote(active.name());
        let last = binder.bind(resolution as f64);
        let upper = binder.bind(max);
        let lower = binder.bind(min);
        let origin = binder.bind(min);
        let span = binder.bind(max - min);
        let scale = binder.bind(resolution as f64);
        let top = binder.bind(resolution.saturating_sub(1) as f64);
        let estimate = format!(
            "LEAST(GREATEST(FLOOR(({col} - {origin}) / {span} * {scale}), 0), {top})",
            col = column,
            origin = origin,
            span = span,
            scale = scale,
            top = top,
        );
        let slot = format!(
            "CASE WHEN {col} IS NULL OR {col} >= {upper} THEN {last} \
             WHEN {col} < {lower} THEN 0 \
             WHEN {est} < {top} AND {col} >= {origin} + {span} * ({est} + 1) / {scale} THEN {est} + 2 \
             WHEN {est} > 0 AND {col} < {origin} + {span} * {est} / {scale} THEN {est} \
             ELSE {est} + 1 END",
            col = column,
            upper = upper,
            last = last,
            lower = lower,
            est = estimate,
            top = top,
            origin = origin,
            span = span,
            scale = scale,
        );

        let mut keys = vec![slot];
        let mut ranges = Vec::new();
        for dimension in passive.dimensions() {
            keys.push(Self::bin_expr(&mut binder, dimension.name(), dimension.bins()));
            ranges.push(Self::range_predicate(
                &mut binder,
                dimension.name(),
                dimension.bins(),
            ));
        }
        let mut predicates = Self::filter_predicates(&mut binder, filter);
        predicates.extend(ranges);

        let sql = self.select(&keys, &predicates);
        self.finish(sql, binder)
    }
}

fn row_count(row: &[f64]) -> CrossfilterResult<u64> {
    let value = *row
        .last()
        .ok_or_else(|| CrossfilterError::backend("Empty result row"))?;
    if !(value >= 0.0) {
        return Err(CrossfilterError::backend(format!(
            "Invalid count {} in result row",
            value
        )));
    }
    Ok(value as u64)
}

fn row_key(row: &[f64], index: usize, width: usize) -> CrossfilterResult<i64> {
    if row.len() != width {
        return Err(CrossfilterError::backend(format!(
            "Expected {} columns per row, got {}",
            width,
            row.len()
        )));
    }
    Ok(row[index].floor() as i64)
}

/// Decode a `COUNT(*)` result; an empty result counts as zero
pub fn decode_count(rows: &[SqlRow]) -> CrossfilterResult<u64> {
    match rows.first() {
        Some(row) => row_count(row),
        None => Ok(0),
    }
}

/// Cell of a passive aggregate addressed by the keys in `row[offset..]`
fn decode_cell(
    view_bins: &[&BinConfig],
    row: &[f64],
    offset: usize,
) -> CrossfilterResult<Option<usize>> {
    let width = offset + view_bins.len() + 1;
    match view_bins {
        [] => Ok(Some(0)),
        [bins] => Ok(bins.clamp_index(row_key(row, offset, width)?)),
        [x, y] => {
            let bx = x.clamp_index(row_key(row, offset, width)?);
            let by = y.clamp_index(row_key(row, offset + 1, width)?);
            Ok(bx.zip(by).map(|(bx, by)| bx * y.count + by))
        }
        _ => Err(CrossfilterError::invalid_request(
            "Aggregates span at most two dimensions",
        )),
    }
}

fn shape_of(bins: &[&BinConfig]) -> AggregateShape {
    match bins {
        [] => AggregateShape::Scalar,
        [b] => AggregateShape::Bins(b.count),
        [x, y, ..] => AggregateShape::Grid {
            x: x.count,
            y: y.count,
        },
    }
}

/// Decode a grouped histogram or heatmap result
pub fn decode_aggregate(
    dimensions: &[&Dimension],
    rows: &[SqlRow],
) -> CrossfilterResult<Aggregate> {
    let bins: Vec<&BinConfig> = dimensions.iter().map(|d| d.bins()).collect();
    let shape = shape_of(&bins);
    let mut counts = vec![0u64; shape.len()];
    for row in rows {
        if let Some(cell) = decode_cell(&bins, row, 0)? {
            counts[cell] += row_count(row)?;
        }
    }
    Aggregate::from_counts(shape, counts)
}

/// Decode a grouped cube result into raw slot counts and prefix-sum them
pub fn decode_cube(
    active: &Dimension,
    passive: &View,
    resolution: usize,
    rows: &[SqlRow],
) -> CrossfilterResult<Cube> {
    let dimensions = passive.dimensions();
    let bins: Vec<&BinConfig> = dimensions.iter().map(|d| d.bins()).collect();
    let shape = shape_of(&bins);
    let width = shape.len();
    let mut raw = vec![0u64; (resolution + 1) * width];
    for row in rows {
        let slot = row_key(row, 0, bins.len() + 2)?.clamp(0, resolution as i64) as usize;
        if let Some(cell) = decode_cell(&bins, row, 1)? {
            raw[slot * width + cell] += row_count(row)?;
        }
    }
    Cube::from_slot_counts(active, shape, resolution, raw)
}
