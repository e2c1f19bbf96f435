use anyhow::{bail, Result};
use clap::{Parser, ValueEnum};
use hiveline::config::Config;
use hiveline::journeys::Mode;
use hiveline::pipeline::{Pipeline, DEFAULT_WORKERS};
use log::info;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Sink {
    /// Modal share totals over a boundary, printed as JSON.
    Stats,
    /// Per-tile modal shares for the tiles the traces touch.
    TileHeatmap,
    /// Per-origin-tile contribution shares over the place's tiles.
    OriginHeatmap,
    /// Per-trace polylines segmented by transport mode.
    ModePolylines,
    /// Cluster-reduced traffic graph, stored per (simulation, mode).
    TraceGraph,
    /// Street-network traffic graph via map-matching.
    StreetGraph,
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Trace analytics for hiveline simulations")]
struct Args {
    /// Simulation identifier.
    sim_id: String,

    /// Artifact to produce.
    #[arg(long, value_enum, default_value = "stats")]
    sink: Sink,

    /// Transport mode for the graph sinks.
    #[arg(long, default_value = "car")]
    mode: Mode,

    /// Boundary GeoJSON (FeatureCollection) for the stats sink.
    #[arg(long)]
    boundary: Option<PathBuf>,

    /// GraphML street network for the street-graph sink.
    #[arg(long, env = "HIVELINE_STREET_GRAPH")]
    street_graph: Option<PathBuf>,

    /// Cache directory override; defaults to <project root>/cache.
    #[arg(long)]
    cache: Option<PathBuf>,

    /// Worker count for the parallel trace steps.
    #[arg(long, default_value_t = DEFAULT_WORKERS)]
    workers: usize,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    env_logger::init();

    let args = Args::parse();
    let config = Config::from_env()?;

    let pipeline = Pipeline::open(&config, args.cache.clone(), args.workers).await?;
    let outcome = run(&pipeline, &args).await;
    pipeline.close().await;

    outcome
}

async fn run(pipeline: &Pipeline, args: &Args) -> Result<()> {
    match args.sink {
        Sink::Stats => {
            let Some(boundary) = &args.boundary else {
                bail!("--boundary is required for the stats sink");
            };

            let (totals, shares) = pipeline.run_boundary_stats(&args.sim_id, boundary).await?;
            println!("{}", serde_json::to_string_pretty(&totals)?);
            println!("{}", serde_json::to_string_pretty(&shares)?);
        }
        Sink::TileHeatmap => {
            let path = pipeline.run_tile_heatmap(&args.sim_id).await?;
            info!("tile heatmap at {}", path.display());
        }
        Sink::OriginHeatmap => {
            let path = pipeline.run_origin_heatmap(&args.sim_id).await?;
            info!("origin heatmap at {}", path.display());
        }
        Sink::ModePolylines => {
            let path = pipeline.run_mode_polylines(&args.sim_id).await?;
            info!("mode polylines at {}", path.display());
        }
        Sink::TraceGraph => {
            pipeline.run_trace_graph(&args.sim_id, args.mode).await?;
        }
        Sink::StreetGraph => {
            let Some(graphml) = &args.street_graph else {
                bail!("--street-graph is required for the street-graph sink");
            };

            pipeline
                .run_street_graph(&args.sim_id, args.mode, graphml)
                .await?;
        }
    }

    Ok(())
}
