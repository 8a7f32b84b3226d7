//! Cached vs baseline cross-filter benchmark
//!
//! Drives the same sequence of brush moves through two controllers: one
//! answering from cumulative cubes, one calling the backend directly with the
//! brush already snapped to the cube's boundaries. Reports latency and backend
//! request counts for both, and fails if any rendered frame differs.

use anyhow::{bail, Context, Result};
use clap::Parser;
use crossfilter_core::backend::{HttpSqlConnector, PooledSqlBackend};
use crossfilter_core::{BoxedBackend, ColumnarBackend, Interval, View, ViewId};
use crossfilter_engine::synthetic::{flights_config, FlightsGenerator, GeneratorConfig};
use crossfilter_engine::{CollectingRenderer, EngineConfig, InteractionController, ViewUpdate};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "crossfilter-bench")]
#[command(about = "Compare cube-cached brushing against direct backend querying")]
#[command(version)]
struct Cli {
    /// Engine configuration file (JSON); defaults to the synthetic flights layout
    #[arg(short, long, env = "CROSSFILTER_CONFIG")]
    config: Option<PathBuf>,

    /// Synthetic rows to generate when no remote endpoint is configured
    #[arg(long, default_value_t = 1_000_000)]
    rows: usize,

    /// Share of synthetic rows with a missing arrival delay
    #[arg(long, default_value_t = 0.0)]
    missing_rate: f64,

    /// Seed for data generation and brush moves
    #[arg(long, default_value_t = 42)]
    seed: u64,

    /// Number of brush moves to replay
    #[arg(long, default_value_t = 200)]
    moves: usize,

    /// Title of the view to brush
    #[arg(long, default_value = "Arrival delay")]
    active: String,

    /// Print the report as JSON
    #[arg(long)]
    json: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Debug, Serialize)]
struct ModeReport {
    mode: &'static str,
    moves: usize,
    build_ms: f64,
    mean_tick_ms: f64,
    p95_tick_ms: f64,
    max_tick_ms: f64,
    backend_requests: u64,
    cube_requests: u64,
    cache_hits: u64,
    baseline_queries: u64,
}

#[derive(Debug, Serialize)]
struct BenchReport {
    backend: String,
    active_view: String,
    resolution: usize,
    cached: ModeReport,
    baseline: ModeReport,
    mismatched_frames: usize,
    /// Open-ended frames left out of the comparison
    skipped_frames: usize,
    speedup: f64,
}

type Frame = HashMap<ViewId, ViewUpdate>;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if cli.verbose { "debug" } else { "info" }));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mut config = match &cli.config {
        Some(path) => EngineConfig::from_file(path)?,
        None => EngineConfig::load()?,
    };
    if config.views.is_empty() {
        let flights = flights_config();
        config.dimensions = flights.dimensions;
        config.views = flights.views;
    }
    config.validate()?;
    info!("Loaded configuration: {:?}", config.cache);

    let backend = connect(&config, &cli)?;
    let registry = config.registry()?;
    let active = registry
        .views()
        .iter()
        .find(|view| view.title() == cli.active)
        .cloned()
        .with_context(|| format!("No view titled '{}'", cli.active))?;
    let dimension = match &active {
        View::Univariate { dimension, .. } => dimension.clone(),
        _ => bail!("View '{}' is not univariate and cannot drive a cube", cli.active),
    };
    let resolution = config.resolution_for(&active);

    let brushes = brush_moves(dimension.extent(), cli.moves, cli.seed);
    // The top slice has no upper edge, so a brush snapped to it is open-ended.
    // Rows with a missing active value also sit in that slice and no baseline
    // interval selects them, so those frames only agree on complete data.
    let complete = config.backend.endpoint.is_none() && cli.missing_rate == 0.0;
    let comparable: Vec<bool> = brushes
        .iter()
        .map(|brush| complete || dimension.snap(brush.hi, resolution) < resolution)
        .collect();
    let snapped: Vec<Interval> = brushes
        .iter()
        .map(|brush| {
            let lo = dimension.snap(brush.lo, resolution);
            let hi = dimension.snap(brush.hi, resolution);
            if lo == hi {
                let edge = dimension.boundary(lo, resolution);
                return Interval::new(edge, edge);
            }
            let upper = if hi == resolution {
                f64::INFINITY
            } else {
                dimension.boundary(hi, resolution)
            };
            Interval::new(dimension.boundary(lo, resolution), upper)
        })
        .collect();

    let mut cached_config = config.clone();
    cached_config.cache.enable_caching = true;
    let (cached, cached_frames) =
        replay("cached", cached_config, backend.clone(), &active, &brushes).await?;

    let mut baseline_config = config.clone();
    baseline_config.cache.enable_caching = false;
    let (baseline, baseline_frames) =
        replay("baseline", baseline_config, backend.clone(), &active, &snapped).await?;

    let mismatched_frames = cached_frames
        .iter()
        .zip(&baseline_frames)
        .zip(&comparable)
        .filter(|((a, b), compare)| **compare && a != b)
        .count();
    let skipped_frames = comparable.iter().filter(|compare| !**compare).count();
    if skipped_frames > 0 {
        warn!(
            "Skipping {} open-ended frame(s): rows with a missing '{}' only appear in cached mode",
            skipped_frames,
            dimension.name()
        );
    }
    let speedup = if cached.mean_tick_ms > 0.0 {
        baseline.mean_tick_ms / cached.mean_tick_ms
    } else {
        0.0
    };

    let report = BenchReport {
        backend: backend.name().to_string(),
        active_view: active.title().to_string(),
        resolution,
        cached,
        baseline,
        mismatched_frames,
        skipped_frames,
        speedup,
    };

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        for mode in [&report.cached, &report.baseline] {
            info!(
                "{:>8}: build {:.1}ms, tick mean {:.3}ms p95 {:.3}ms max {:.3}ms, {} backend request(s) ({} cube), {} cache hit(s)",
                mode.mode,
                mode.build_ms,
                mode.mean_tick_ms,
                mode.p95_tick_ms,
                mode.max_tick_ms,
                mode.backend_requests,
                mode.cube_requests,
                mode.cache_hits
            );
        }
        info!(
            "Speedup {:.1}x over {} moves; {} mismatched frame(s)",
            report.speedup, cli.moves, report.mismatched_frames
        );
    }

    if report.mismatched_frames > 0 {
        bail!(
            "{} frame(s) differ between cached and baseline modes",
            report.mismatched_frames
        );
    }
    Ok(())
}

fn connect(config: &EngineConfig, cli: &Cli) -> Result<BoxedBackend> {
    match &config.backend.endpoint {
        Some(endpoint) => {
            info!(
                "Using pooled backend at {} ({} connections)",
                endpoint, config.backend.max_connections
            );
            let connector =
                HttpSqlConnector::new(endpoint.clone(), config.backend.enable_compression);
            Ok(Arc::new(PooledSqlBackend::new(connector, config.pool_config())?))
        }
        None => {
            let table = FlightsGenerator::new(GeneratorConfig {
                rows: cli.rows,
                seed: cli.seed,
                missing_rate: cli.missing_rate,
            })
            .generate()?;
            Ok(Arc::new(ColumnarBackend::new(table)))
        }
    }
}

/// A drag that wanders across the extent, occasionally jumping
fn brush_moves(extent: [f64; 2], moves: usize, seed: u64) -> Vec<Interval> {
    let mut rng = StdRng::seed_from_u64(seed ^ 0x5eed);
    let span = extent[1] - extent[0];
    let mut lo = extent[0] + span * 0.25;
    let mut width = span * 0.2;
    (0..moves)
        .map(|_| {
            if rng.gen_bool(0.05) {
                lo = rng.gen_range(extent[0]..extent[1]);
            } else {
                lo += rng.gen_range(-0.02..0.02) * span;
                width += rng.gen_range(-0.01..0.01) * span;
            }
            width = width.clamp(span * 0.01, span * 0.8);
            lo = lo.clamp(extent[0] - span * 0.05, extent[1]);
            Interval::new(lo, lo + width)
        })
        .collect()
}

async fn replay(
    mode: &'static str,
    config: EngineConfig,
    backend: BoxedBackend,
    active: &View,
    brushes: &[Interval],
) -> Result<(ModeReport, Vec<Frame>)> {
    let dimension = active.dimension_names()[0].to_string();
    let mut controller =
        InteractionController::new(config, backend.clone(), CollectingRenderer::new())?;

    let initial = backend.stats();
    let build_start = Instant::now();
    controller.hover(active.id())?;
    for outcome in controller.settle().await? {
        info!("{}: initial build {:?}", mode, outcome);
    }
    let build_time = build_start.elapsed();

    controller.tick().await?;
    let before = backend.stats();

    let mut latencies = Vec::with_capacity(brushes.len());
    let mut frames = Vec::with_capacity(brushes.len());
    for brush in brushes {
        controller.brush_changed(&dimension, Some(*brush))?;
        let start = Instant::now();
        let report = controller.tick().await?;
        latencies.push(start.elapsed());
        if report.failed > 0 {
            warn!("{}: {} view(s) failed for brush {}", mode, report.failed, brush);
        }
        frames.push(controller.renderer().updates.clone());
    }

    let after = backend.stats();
    let engine = controller.metrics().snapshot();
    latencies.sort();
    let millis = |d: Duration| d.as_secs_f64() * 1_000.0;
    let mean = if latencies.is_empty() {
        0.0
    } else {
        latencies.iter().map(|d| millis(*d)).sum::<f64>() / latencies.len() as f64
    };
    let p95 = latencies
        .get((latencies.len() * 95 / 100).min(latencies.len().saturating_sub(1)))
        .map(|d| millis(*d))
        .unwrap_or(0.0);

    Ok((
        ModeReport {
            mode,
            moves: brushes.len(),
            build_ms: millis(build_time),
            mean_tick_ms: mean,
            p95_tick_ms: p95,
            max_tick_ms: latencies.last().map(|d| millis(*d)).unwrap_or(0.0),
            backend_requests: after.requests - before.requests,
            cube_requests: after.cube_requests - initial.cube_requests,
            cache_hits: engine.cache_hits_total,
            baseline_queries: engine.baseline_queries_total,
        },
        frames,
    ))
}
