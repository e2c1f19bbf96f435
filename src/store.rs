use crate::config::Config;
use crate::journeys::{Mode, RouteResult};
use crate::tiles::{self, Tile};
use crate::trace_graph::{ArcVisitor, TraceGraph};
use anyhow::{Context, Result};
use futures::TryStreamExt;
use log::info;
use mongodb::bson::{doc, oid::ObjectId};
use mongodb::{Client, Database};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize)]
pub struct Simulation {
    #[serde(rename = "_id")]
    pub id: ObjectId,
    #[serde(rename = "sim-id")]
    pub sim_id: String,
    #[serde(rename = "place-id")]
    pub place_id: ObjectId,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Place {
    #[serde(rename = "_id")]
    pub id: ObjectId,
    pub name: String,
    #[serde(default)]
    pub country: String,
    /// WKT outline, kept verbatim for downstream consumers.
    #[serde(default)]
    pub shape: String,
    #[serde(default)]
    pub bbox: String,
    /// H3 cells covering the place.
    #[serde(default)]
    pub tiles: Vec<i64>,
    #[serde(default, rename = "nuts-3")]
    pub nuts3: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct TraceGraphDoc {
    #[serde(rename = "simId")]
    sim_id: String,
    mode: Mode,
    nodes: Vec<[f64; 2]>,
    edges: Vec<[u32; 2]>,
}

#[derive(Debug, Serialize, Deserialize)]
struct TraceArcDoc {
    #[serde(rename = "simId")]
    sim_id: String,
    mode: Mode,
    from: u32,
    to: u32,
    visitors: Vec<ArcVisitor>,
}

/// Narrow client over the document store. One handle per run.
pub struct DocStore {
    client: Client,
    database: Database,
}

impl DocStore {
    pub async fn connect(config: &Config) -> Result<DocStore> {
        let client = Client::with_uri_str(config.store_uri())
            .await
            .context("connecting to document store")?;
        let database = client.database(&config.mongo_database);
        Ok(DocStore { client, database })
    }

    pub async fn close(self) {
        self.client.shutdown().await;
    }

    pub async fn route_results(&self, sim_id: &str) -> Result<Vec<RouteResult>> {
        let collection = self.database.collection::<RouteResult>("route-results");
        let cursor = collection
            .find(doc! { "sim-id": sim_id })
            .await
            .context("querying route-results")?;
        cursor
            .try_collect()
            .await
            .context("draining route-results cursor")
    }

    pub async fn simulation(&self, sim_id: &str) -> Result<Simulation> {
        self.database
            .collection::<Simulation>("simulations")
            .find_one(doc! { "sim-id": sim_id })
            .await
            .context("querying simulations")?
            .with_context(|| format!("simulation {} not found", sim_id))
    }

    pub async fn place(&self, id: ObjectId) -> Result<Place> {
        self.database
            .collection::<Place>("places")
            .find_one(doc! { "_id": id })
            .await
            .context("querying places")?
            .with_context(|| format!("place {} not found", id))
    }

    /// The H3 tiles of the simulation's place.
    pub async fn place_tiles(&self, sim_id: &str) -> Result<Vec<Tile>> {
        let simulation = self.simulation(sim_id).await?;
        let place = self.place(simulation.place_id).await?;

        place
            .tiles
            .iter()
            .map(|&id| tiles::tile_from_id(id as u64))
            .collect()
    }

    /// Persists a traffic graph. Existing documents for the
    /// (simulation, mode) pair are deleted first, so reruns are
    /// idempotent.
    pub async fn save_trace_graph(&self, sim_id: &str, graph: &TraceGraph) -> Result<()> {
        let graphs = self.database.collection::<TraceGraphDoc>("trace-graphs");
        let arcs = self.database.collection::<TraceArcDoc>("trace-arcs");

        let filter = doc! { "simId": sim_id, "mode": graph.mode.as_str() };
        graphs
            .delete_many(filter.clone())
            .await
            .context("clearing trace-graphs")?;
        arcs.delete_many(filter)
            .await
            .context("clearing trace-arcs")?;

        let mut edges: Vec<(u32, u32, &[ArcVisitor])> = graph.iter_edges().collect();
        edges.sort_by_key(|(from, to, _)| (*from, *to));

        let mut edge_pairs = Vec::with_capacity(edges.len());
        let mut arc_docs = Vec::with_capacity(edges.len());
        for (from, to, visitors) in edges {
            edge_pairs.push([from, to]);
            arc_docs.push(TraceArcDoc {
                sim_id: sim_id.to_string(),
                mode: graph.mode,
                from,
                to,
                visitors: visitors.to_vec(),
            });
        }

        let graph_doc = TraceGraphDoc {
            sim_id: sim_id.to_string(),
            mode: graph.mode,
            nodes: graph.nodes.clone(),
            edges: edge_pairs,
        };

        graphs
            .insert_one(graph_doc)
            .await
            .context("writing trace-graph")?;
        if !arc_docs.is_empty() {
            arcs.insert_many(arc_docs)
                .await
                .context("writing trace-arcs")?;
        }

        info!(
            "stored {} {} graph: {} nodes, {} edges",
            sim_id,
            graph.mode,
            graph.nodes.len(),
            graph.edge_count()
        );
        Ok(())
    }
}
