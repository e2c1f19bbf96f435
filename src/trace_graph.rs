use crate::dbscan::{self, ClusterParams, ClusterPoint};
use crate::geometry::distance_sq;
use crate::journeys::{Mode, SelectedOption};
use crate::kdtree::{KdPoint, KdTree};
use crate::matching;
use crate::street_graph::StreetGraph;
use crate::traces;
use ahash::AHashMap;
use log::info;
use serde::{Deserialize, Serialize};

/// Spatial deduplication radius in degrees for trace nodes; compared
/// squared.
const DEDUP_EPSILON_DEG: f64 = 1e-4;

const CLUSTER_PARAMS: ClusterParams = ClusterParams {
    min_density: 2,
    epsilon: 1e-5,
    k: 50,
};

/// Non-leg-start elements kept per trace before map-matching.
const STREET_MATCH_TARGET: usize = 100;

/// Attribution record tying a graph edge traversal back to the
/// journey that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ArcVisitor {
    #[serde(rename = "vcId")]
    pub vc_id: String,
    #[serde(rename = "routeOptionId")]
    pub route_option_id: String,
}

#[derive(Debug, Clone, Copy)]
pub struct GraphNode {
    pub id: u32,
    pub point: [f64; 2],
}

impl KdPoint for GraphNode {
    fn point(&self) -> [f64; 2] {
        self.point
    }
}

impl ClusterPoint for GraphNode {
    fn id(&self) -> u32 {
        self.id
    }
}

/// Undirected traffic graph with visitor-annotated edges. Edges are
/// keyed by their canonical (lower-id) endpoint; self-loops never
/// enter the structure.
#[derive(Debug, Clone)]
pub struct TraceGraph {
    pub nodes: Vec<[f64; 2]>,
    pub edges: Vec<AHashMap<u32, Vec<ArcVisitor>>>,
    pub mode: Mode,
}

impl TraceGraph {
    pub fn with_nodes(nodes: Vec<[f64; 2]>, mode: Mode) -> TraceGraph {
        let edges = vec![AHashMap::new(); nodes.len()];
        TraceGraph { nodes, edges, mode }
    }

    pub fn add_visitor(&mut self, a: u32, b: u32, visitor: ArcVisitor) {
        if a == b {
            return;
        }
        let (from, to) = if a < b { (a, b) } else { (b, a) };
        self.edges[from as usize].entry(to).or_default().push(visitor);
    }

    pub fn edge_count(&self) -> usize {
        self.edges.iter().map(|targets| targets.len()).sum()
    }

    pub fn iter_edges(&self) -> impl Iterator<Item = (u32, u32, &[ArcVisitor])> {
        self.edges.iter().enumerate().flat_map(|(from, targets)| {
            targets
                .iter()
                .map(move |(to, visitors)| (from as u32, *to, visitors.as_slice()))
        })
    }
}

struct ReducedTraces {
    tree: KdTree<GraphNode>,
    nodes: Vec<GraphNode>,
    traces: Vec<(ArcVisitor, Vec<u32>)>,
}

/// Rewrites every same-mode trace run as a sequence of deduplicated
/// node ids: an element within the dedup radius of an existing node
/// reuses it, otherwise a fresh node is allocated and indexed.
fn reduce_traces(selected: &[SelectedOption], mode: Mode) -> ReducedTraces {
    let mut tree: KdTree<GraphNode> = KdTree::new();
    let mut nodes: Vec<GraphNode> = Vec::new();
    let mut reduced = Vec::new();

    for sel in selected {
        let trace = traces::extract_trace(sel);

        for sub in traces::split_trace_by_mode(&trace, mode) {
            let visitor = ArcVisitor {
                vc_id: sub.vc_id.clone(),
                route_option_id: sub.route_option_id.clone(),
            };

            let ids = sub
                .elements
                .iter()
                .map(|elem| match dedup_node_id(&tree, elem.point) {
                    Some(id) => id,
                    None => {
                        let id = nodes.len() as u32;
                        let node = GraphNode {
                            id,
                            point: elem.point,
                        };
                        tree.insert(node);
                        nodes.push(node);
                        id
                    }
                })
                .collect();

            reduced.push((visitor, ids));
        }
    }

    ReducedTraces {
        tree,
        nodes,
        traces: reduced,
    }
}

fn dedup_node_id(tree: &KdTree<GraphNode>, point: [f64; 2]) -> Option<u32> {
    let nearest = tree.knn(point, 1);
    let node = nearest.first()?;
    if distance_sq(point, node.point) > DEDUP_EPSILON_DEG * DEDUP_EPSILON_DEG {
        return None;
    }
    Some(node.id)
}

/// Builds the traffic graph from spatially reduced traces: DBSCAN
/// merges dense node groups into centroids, unclustered nodes pass
/// through as singletons, and each consecutive trace pair landing in
/// distinct remapped nodes contributes one visitor.
pub fn reduced_trace_graph(selected: &[SelectedOption], mode: Mode) -> TraceGraph {
    let reduced = reduce_traces(selected, mode);
    info!(
        "clustering {} trace nodes from {} runs",
        reduced.nodes.len(),
        reduced.traces.len()
    );

    let clusters = dbscan::cluster_with_tree(&CLUSTER_PARAMS, &reduced.tree, &reduced.nodes);

    let mut nodes: Vec<[f64; 2]> = Vec::with_capacity(clusters.len());
    let mut remap: AHashMap<u32, u32> = AHashMap::with_capacity(reduced.nodes.len());

    for cluster in &clusters {
        let centroid_id = nodes.len() as u32;
        let mut sum = [0.0, 0.0];
        for &member in cluster {
            let point = reduced.nodes[member as usize].point;
            sum[0] += point[0];
            sum[1] += point[1];
            remap.insert(member, centroid_id);
        }
        nodes.push([
            sum[0] / cluster.len() as f64,
            sum[1] / cluster.len() as f64,
        ]);
    }

    for node in &reduced.nodes {
        if remap.contains_key(&node.id) {
            continue;
        }
        remap.insert(node.id, nodes.len() as u32);
        nodes.push(node.point);
    }

    let mut graph = TraceGraph::with_nodes(nodes, mode);

    for (visitor, ids) in &reduced.traces {
        for pair in ids.windows(2) {
            graph.add_visitor(remap[&pair[0]], remap[&pair[1]], visitor.clone());
        }
    }

    info!(
        "reduced trace graph: {} nodes, {} edges",
        graph.nodes.len(),
        graph.edge_count()
    );
    graph
}

/// Builds the traffic graph on the real street network: same-mode
/// runs are downsampled, map-matched, and every consecutive matched
/// pair contributes one visitor on the canonical edge.
pub fn street_trace_graph(
    selected: &[SelectedOption],
    street: &StreetGraph,
    mode: Mode,
    workers: usize,
) -> TraceGraph {
    let traces = traces::extract_traces(selected);
    let split = traces::split_traces_by_mode(&traces, mode);
    let down = traces::downsample_traces(&split, STREET_MATCH_TARGET, workers);
    let matched = matching::match_traces(&down, street, workers);

    // Renumber the occurring street nodes to a dense range, in first
    // occurrence order.
    let mut remap: AHashMap<u32, u32> = AHashMap::new();
    let mut nodes: Vec<[f64; 2]> = Vec::new();
    for walk in &matched {
        for &id in walk {
            remap.entry(id).or_insert_with(|| {
                nodes.push(street.nodes[id as usize].point);
                (nodes.len() - 1) as u32
            });
        }
    }

    let mut graph = TraceGraph::with_nodes(nodes, mode);

    for (trace, walk) in down.iter().zip(&matched) {
        let visitor = ArcVisitor {
            vc_id: trace.vc_id.clone(),
            route_option_id: trace.route_option_id.clone(),
        };
        for pair in walk.windows(2) {
            graph.add_visitor(remap[&pair[0]], remap[&pair[1]], visitor.clone());
        }
    }

    info!(
        "street trace graph: {} nodes, {} edges",
        graph.nodes.len(),
        graph.edge_count()
    );
    graph
}
