use crate::cache;
use crate::config::Config;
use crate::decimate;
use crate::geometry::read_boundary;
use crate::journeys::{self, Mode, RouteResult, SelectedOption};
use crate::stats::{self, JourneyStats, TransportShares};
use crate::store::DocStore;
use crate::street_graph;
use crate::tiles::{self, TileIndex};
use crate::trace_graph;
use crate::traces::{self, ModeTraces, Trace};
use ahash::AHashSet;
use anyhow::Result;
use log::info;
use rayon::prelude::*;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Instant;

pub const DEFAULT_WORKERS: usize = 12;

/// One engine run: a store handle acquired at entry and released at
/// exit, a cache directory, and the worker count for the parallel
/// trace steps.
pub struct Pipeline {
    cache_dir: PathBuf,
    workers: usize,
    store: DocStore,
}

impl Pipeline {
    pub async fn open(
        config: &Config,
        cache_dir: Option<PathBuf>,
        workers: usize,
    ) -> Result<Pipeline> {
        let store = DocStore::connect(config).await?;
        Ok(Pipeline {
            cache_dir: cache_dir.unwrap_or_else(|| config.cache_dir()),
            workers: workers.max(1),
            store,
        })
    }

    pub async fn close(self) {
        self.store.close().await;
    }

    /// Route results for a simulation: filesystem cache first, store
    /// otherwise, writing through on a miss.
    pub async fn load_results(&self, sim_id: &str) -> Result<Vec<RouteResult>> {
        let path = cache::journeys_path(&self.cache_dir, sim_id);
        if path.exists() {
            info!("reading route results from {}", path.display());
            return cache::read_json(&path);
        }

        let started = Instant::now();
        let results = self.store.route_results(sim_id).await?;
        info!(
            "fetched {} route results in {:?}",
            results.len(),
            started.elapsed()
        );

        cache::write_json(&path, &results)?;
        Ok(results)
    }

    /// Modal share totals over a boundary.
    pub async fn run_boundary_stats(
        &self,
        sim_id: &str,
        boundary_path: &Path,
    ) -> Result<(JourneyStats, TransportShares)> {
        let boundary = read_boundary(boundary_path)?;
        let results = self.load_results(sim_id).await?;

        let started = Instant::now();
        let selected = journeys::select_options(&results);
        info!(
            "selected {} of {} results in {:?}",
            selected.len(),
            results.len(),
            started.elapsed()
        );

        let started = Instant::now();
        let all = traces::extract_traces(&selected);
        let filtered = traces::filter_traces(&all, &boundary, self.workers);
        info!(
            "extracted and filtered {} traces in {:?}",
            filtered.len(),
            started.elapsed()
        );

        let totals = stats::stats_for_traces(&filtered);
        Ok((totals, totals.shares()))
    }

    /// Per-tile shares for the tiles the traces touch.
    pub async fn run_tile_heatmap(&self, sim_id: &str) -> Result<PathBuf> {
        let results = self.load_results(sim_id).await?;
        let selected = journeys::select_options(&results);
        let all = traces::extract_traces(&selected);

        let started = Instant::now();
        let index = TileIndex::new(tiles::tiles_from_traces(&all)?);
        info!(
            "derived and indexed {} tiles in {:?}",
            index.len(),
            started.elapsed()
        );

        let heat = tile_heat(&all, &index);

        let path = cache::heatmap_path(&self.cache_dir, "tiles", sim_id);
        cache::write_json(&path, &heat)?;
        info!("wrote {}", path.display());
        Ok(path)
    }

    /// Contribution shares keyed by the origin tile, over the
    /// place's tile set.
    pub async fn run_origin_heatmap(&self, sim_id: &str) -> Result<PathBuf> {
        let index = TileIndex::new(self.store.place_tiles(sim_id).await?);
        let results = self.load_results(sim_id).await?;
        let selected = journeys::select_options(&results);
        let all = traces::extract_traces(&selected);

        let heat = origin_heat(&selected, &all, &index);

        let path = cache::heatmap_path(&self.cache_dir, "contribution-origin", sim_id);
        cache::write_json(&path, &heat)?;
        info!("wrote {}", path.display());
        Ok(path)
    }

    /// Mode-segmented polyline records for every extracted trace.
    pub async fn run_mode_polylines(&self, sim_id: &str) -> Result<PathBuf> {
        let results = self.load_results(sim_id).await?;
        let selected = journeys::select_options(&results);
        let all = traces::extract_traces(&selected);

        let records = mode_polyline_records(&all)?;

        let path = cache::mode_polylines_path(&self.cache_dir, sim_id);
        cache::write_json(&path, &records)?;
        info!("wrote {} trace records to {}", records.len(), path.display());
        Ok(path)
    }

    /// Cluster-reduced traffic graph, decimated and stored.
    pub async fn run_trace_graph(&self, sim_id: &str, mode: Mode) -> Result<()> {
        let results = self.load_results(sim_id).await?;
        let selected = journeys::select_options(&results);

        let started = Instant::now();
        let graph = trace_graph::reduced_trace_graph(&selected, mode);
        let graph = decimate::decimate(&graph);
        info!("built trace graph in {:?}", started.elapsed());

        self.store.save_trace_graph(sim_id, &graph).await
    }

    /// Street-network traffic graph via map-matching, decimated and
    /// stored.
    pub async fn run_street_graph(&self, sim_id: &str, mode: Mode, graphml: &Path) -> Result<()> {
        let results = self.load_results(sim_id).await?;
        let selected = journeys::select_options(&results);

        let started = Instant::now();
        let street = street_graph::load_street_graph(graphml, self.workers)?;
        info!("loaded street graph in {:?}", started.elapsed());

        let started = Instant::now();
        let graph = trace_graph::street_trace_graph(&selected, &street, mode, self.workers);
        let graph = decimate::decimate(&graph);
        info!("built street-based graph in {:?}", started.elapsed());

        self.store.save_trace_graph(sim_id, &graph).await
    }
}

/// Per-tile per-bucket shares: every tile aggregates the traces that
/// touch it, each clipped to the tile's bounds first. Candidate
/// tiles per element come from the bounding-box index.
pub fn tile_heat(traces_in: &[Trace], index: &TileIndex) -> BTreeMap<String, TransportShares> {
    let mut by_tile: Vec<Vec<usize>> = vec![Vec::new(); index.len()];
    for (trace_index, trace) in traces_in.iter().enumerate() {
        let mut seen: AHashSet<usize> = AHashSet::new();
        for elem in &trace.elements {
            for (tile_index, _) in index.tiles_containing(elem.point) {
                if seen.insert(tile_index) {
                    by_tile[tile_index].push(trace_index);
                }
            }
        }
    }

    index
        .tiles()
        .par_iter()
        .enumerate()
        .map(|(tile_index, tile)| {
            let mut acc = JourneyStats::default();

            for &trace_index in &by_tile[tile_index] {
                let clipped = traces::filter_trace(&traces_in[trace_index], &tile.bounds);
                if clipped.elements.len() < 2 {
                    continue;
                }
                acc = acc.add(&stats::trace_stats(&clipped));
            }

            (u64::from(tile.cell).to_string(), acc.shares())
        })
        .collect::<Vec<_>>()
        .into_iter()
        .collect()
}

/// Contribution shares by origin tile: traces grouped by the tile
/// containing their option's origin, normalized by the
/// simulation-wide passenger-meter total. Origins outside the tile
/// set still count toward the global total.
pub fn origin_heat(
    selected: &[SelectedOption],
    traces_in: &[Trace],
    index: &TileIndex,
) -> BTreeMap<String, TransportShares> {
    let global_total = stats::stats_for_traces(traces_in).passenger_meter_total();

    let mut per_tile: Vec<JourneyStats> = vec![JourneyStats::default(); index.len()];

    for (sel, trace) in selected.iter().zip(traces_in) {
        if trace.elements.len() < 2 {
            continue;
        }
        let origin = &sel.option.origin;
        if origin.len() < 2 {
            continue;
        }

        for (tile_index, _) in index.tiles_containing([origin[0], origin[1]]) {
            per_tile[tile_index] = per_tile[tile_index].add(&stats::trace_stats(trace));
        }
    }

    index
        .tiles()
        .iter()
        .zip(&per_tile)
        .map(|(tile, tile_stats)| {
            (
                u64::from(tile.cell).to_string(),
                tile_stats.contribution_shares(global_total),
            )
        })
        .collect()
}

/// Mode-segmented polyline records for a batch of traces. Traces
/// with no elements are skipped.
pub fn mode_polyline_records(traces_in: &[Trace]) -> Result<Vec<ModeTraces>> {
    traces_in
        .iter()
        .filter(|trace| !trace.elements.is_empty())
        .map(traces::mode_polylines)
        .collect()
}
