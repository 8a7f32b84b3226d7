//! Synthetic flights dataset for benchmarks and demos

use crossfilter_core::{
    ColumnarTable, CrossfilterError, CrossfilterResult, DimensionConfig, ViewConfig, ViewKind,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, LogNormal, Normal};
use tracing::info;

use crate::config::EngineConfig;

/// Configuration for flights generation
#[derive(Debug, Clone)]
pub struct GeneratorConfig {
    pub rows: usize,
    pub seed: u64,
    /// Share of rows with a missing arrival delay (cancelled flights)
    pub missing_rate: f64,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            rows: 1_000_000,
            seed: 42,
            missing_rate: 0.01,
        }
    }
}

/// Generates correlated flight columns: delays, distance, air time and departure hour
pub struct FlightsGenerator {
    config: GeneratorConfig,
}

impl FlightsGenerator {
    pub fn new(config: GeneratorConfig) -> Self {
        Self { config }
    }

    pub fn generate(&self) -> CrossfilterResult<ColumnarTable> {
        let rows = self.config.rows;
        let mut rng = StdRng::seed_from_u64(self.config.seed);
        let dep_noise = Normal::new(0.0, 12.0).map_err(distribution_error)?;
        let delay = LogNormal::new(2.5, 0.9).map_err(distribution_error)?;
        let distance = LogNormal::new(6.5, 0.6).map_err(distribution_error)?;
        let speed = Normal::<f64>::new(7.5, 0.8).map_err(distribution_error)?;

        let mut dep_delay = Vec::with_capacity(rows);
        let mut arr_delay = Vec::with_capacity(rows);
        let mut dist = Vec::with_capacity(rows);
        let mut air_time = Vec::with_capacity(rows);
        let mut dep_time = Vec::with_capacity(rows);

        for _ in 0..rows {
            // Most flights leave early or on time; a long tail is late
            let dep: f64 = if rng.gen_bool(0.6) {
                rng.gen_range(-15.0..5.0)
            } else {
                delay.sample(&mut rng) - 5.0
            };
            let miles: f64 = distance.sample(&mut rng);
            let miles = miles.clamp(50.0, 4_500.0);
            let minutes = miles / speed.sample(&mut rng).max(4.0) + 20.0;
            let arr = if rng.gen_bool(self.config.missing_rate) {
                f64::NAN
            } else {
                dep + dep_noise.sample(&mut rng) - 3.0
            };

            dep_delay.push(dep);
            arr_delay.push(arr);
            dist.push(miles);
            air_time.push(minutes);
            dep_time.push(rng.gen_range(0.0..24.0));
        }

        info!("Generated {} synthetic flights (seed {})", rows, self.config.seed);
        ColumnarTable::builder()
            .column("DEP_DELAY", dep_delay)
            .column("ARR_DELAY", arr_delay)
            .column("DISTANCE", dist)
            .column("AIR_TIME", air_time)
            .column("DEP_TIME", dep_time)
            .build()
    }
}

fn distribution_error<E: std::fmt::Display>(err: E) -> CrossfilterError {
    CrossfilterError::configuration(format!("Invalid distribution: {}", err))
}

fn dimension(name: &str, extent: [f64; 2], bins: usize, format: &str) -> DimensionConfig {
    DimensionConfig {
        name: name.to_string(),
        extent,
        bins,
        format: Some(format.to_string()),
    }
}

fn view(kind: ViewKind, title: &str, dimensions: &[&str], width: usize) -> ViewConfig {
    ViewConfig {
        kind,
        title: title.to_string(),
        dimensions: dimensions.iter().map(|d| d.to_string()).collect(),
        width: if kind == ViewKind::Scalar { None } else { Some(width) },
    }
}

/// Dimensions and views over the synthetic flights columns
pub fn flights_config() -> EngineConfig {
    EngineConfig {
        dimensions: vec![
            dimension("ARR_DELAY", [-10.0, 100.0], 22, ".0f"),
            dimension("DEP_DELAY", [-20.0, 60.0], 16, ".0f"),
            dimension("DISTANCE", [50.0, 2_000.0], 25, ".0f"),
            dimension("AIR_TIME", [20.0, 500.0], 24, ".0f"),
            dimension("DEP_TIME", [0.0, 24.0], 24, ".1f"),
        ],
        views: vec![
            view(ViewKind::Scalar, "Flights", &[], 0),
            view(ViewKind::Univariate, "Arrival delay", &["ARR_DELAY"], 500),
            view(ViewKind::Univariate, "Departure delay", &["DEP_DELAY"], 400),
            view(ViewKind::Univariate, "Distance", &["DISTANCE"], 500),
            view(ViewKind::Univariate, "Air time", &["AIR_TIME"], 400),
            view(
                ViewKind::Bivariate,
                "Departure time vs delay",
                &["DEP_TIME", "DEP_DELAY"],
                300,
            ),
        ],
        ..EngineConfig::default()
    }
}
