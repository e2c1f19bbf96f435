use crate::geometry::planar_distance;
use crate::kdtree::{KdPoint, KdTree};
use ahash::AHashMap;
use anyhow::{bail, Context, Result};
use log::info;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

// osmnx GraphML attribute keys.
const KEY_LAT: &str = "d4";
const KEY_LON: &str = "d5";
const KEY_LENGTH: &str = "d16";
const KEY_GEOMETRY: &str = "d17";

/// Spacing of interpolated edge samples in degrees.
const MAX_SAMPLE_SPACING_DEG: f64 = 5e-4;

#[derive(Debug, Clone, Copy)]
pub struct StreetNode {
    pub id: u32,
    /// Node id carried by the source network (an OSM node id).
    pub source_id: u64,
    pub point: [f64; 2],
}

/// What the spatial index stores: street nodes and densified samples
/// along edges, the latter pointing back at their owning edge.
#[derive(Debug, Clone, Copy)]
pub enum StreetPoint {
    Node { id: u32, point: [f64; 2] },
    EdgeSample { from: u32, to: u32, point: [f64; 2] },
}

impl KdPoint for StreetPoint {
    fn point(&self) -> [f64; 2] {
        match self {
            StreetPoint::Node { point, .. } | StreetPoint::EdgeSample { point, .. } => *point,
        }
    }
}

/// Weighted adjacency for shortest-path queries. Weights are
/// centimetres so they stay integral.
#[derive(Debug, Clone, Default)]
pub struct DijkstraGraph {
    adjacency: Vec<Vec<(u32, u32)>>,
}

#[derive(Copy, Clone, Eq, PartialEq)]
struct HeapEntry {
    cost: u64,
    node: u32,
}

// Flip the ordering so the BinaryHeap becomes a min-heap.
impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .cost
            .cmp(&self.cost)
            .then_with(|| other.node.cmp(&self.node))
    }
}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl DijkstraGraph {
    pub fn new(node_count: usize) -> DijkstraGraph {
        DijkstraGraph {
            adjacency: vec![Vec::new(); node_count],
        }
    }

    pub fn add_arc(&mut self, from: u32, to: u32, weight_cm: u32) {
        self.adjacency[from as usize].push((to, weight_cm));
    }

    /// Node sequence of the cheapest path, endpoints included, or
    /// None when `to` is unreachable.
    pub fn shortest_path(&self, from: u32, to: u32) -> Option<Vec<u32>> {
        let n = self.adjacency.len();
        if from as usize >= n || to as usize >= n {
            return None;
        }
        if from == to {
            return Some(vec![from]);
        }

        let mut dist = vec![u64::MAX; n];
        let mut prev = vec![u32::MAX; n];
        let mut heap = BinaryHeap::new();

        dist[from as usize] = 0;
        heap.push(HeapEntry {
            cost: 0,
            node: from,
        });

        while let Some(HeapEntry { cost, node }) = heap.pop() {
            if node == to {
                break;
            }
            if cost > dist[node as usize] {
                continue;
            }

            for &(next, weight) in &self.adjacency[node as usize] {
                let candidate = cost + weight as u64;
                if candidate < dist[next as usize] {
                    dist[next as usize] = candidate;
                    prev[next as usize] = node;
                    heap.push(HeapEntry {
                        cost: candidate,
                        node: next,
                    });
                }
            }
        }

        if dist[to as usize] == u64::MAX {
            return None;
        }

        let mut path = vec![to];
        let mut current = to;
        while current != from {
            current = prev[current as usize];
            path.push(current);
        }
        path.reverse();
        Some(path)
    }
}

/// Immutable street network: nodes, a spatial index over nodes and
/// edge samples, and one Dijkstra copy per matching worker so workers
/// never contend on graph state.
pub struct StreetGraph {
    pub nodes: Vec<StreetNode>,
    pub tree: KdTree<StreetPoint>,
    pub graphs: Vec<DijkstraGraph>,
}

impl StreetGraph {
    pub fn copies(&self) -> usize {
        self.graphs.len()
    }

    pub fn dijkstra(&self, worker: usize) -> &DijkstraGraph {
        &self.graphs[worker % self.graphs.len()]
    }
}

struct RawNode {
    id: String,
    lat: Option<f64>,
    lon: Option<f64>,
}

struct RawEdge {
    source: String,
    target: String,
    length: Option<f64>,
    geometry: Option<String>,
}

/// Loads an undirected street network from a GraphML file, building
/// `copies` identical Dijkstra graphs for parallel queries.
pub fn load_street_graph(path: &Path, copies: usize) -> Result<StreetGraph> {
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let mut reader = Reader::from_reader(BufReader::new(file));
    let (nodes, edges) =
        parse_graphml(&mut reader).with_context(|| format!("parsing {}", path.display()))?;
    build_street_graph(nodes, edges, copies)
}

fn required_attr(start: &BytesStart, name: &str) -> Result<String> {
    let attribute = start
        .try_get_attribute(name)?
        .with_context(|| format!("element without {} attribute", name))?;
    Ok(attribute.unescape_value()?.into_owned())
}

fn parse_graphml<R: BufRead>(reader: &mut Reader<R>) -> Result<(Vec<RawNode>, Vec<RawEdge>)> {
    reader.trim_text(true);

    let mut nodes = Vec::new();
    let mut edges = Vec::new();
    let mut current_node: Option<RawNode> = None;
    let mut current_edge: Option<RawEdge> = None;
    let mut data_key: Option<String> = None;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(start) => match start.name().as_ref() {
                b"node" => {
                    current_node = Some(RawNode {
                        id: required_attr(&start, "id")?,
                        lat: None,
                        lon: None,
                    });
                }
                b"edge" => {
                    current_edge = Some(RawEdge {
                        source: required_attr(&start, "source")?,
                        target: required_attr(&start, "target")?,
                        length: None,
                        geometry: None,
                    });
                }
                b"data" => {
                    data_key = Some(required_attr(&start, "key")?);
                }
                _ => {}
            },
            Event::Text(text) => {
                let Some(key) = data_key.as_deref() else {
                    continue;
                };
                let value = text.unescape()?.into_owned();

                if let Some(node) = current_node.as_mut() {
                    match key {
                        KEY_LAT => {
                            node.lat = Some(value.parse().with_context(|| {
                                format!("node {}: bad latitude {:?}", node.id, value)
                            })?)
                        }
                        KEY_LON => {
                            node.lon = Some(value.parse().with_context(|| {
                                format!("node {}: bad longitude {:?}", node.id, value)
                            })?)
                        }
                        _ => {}
                    }
                } else if let Some(edge) = current_edge.as_mut() {
                    match key {
                        KEY_LENGTH => {
                            edge.length = Some(value.parse().with_context(|| {
                                format!(
                                    "edge {} -> {}: bad length {:?}",
                                    edge.source, edge.target, value
                                )
                            })?)
                        }
                        KEY_GEOMETRY => edge.geometry = Some(value),
                        _ => {}
                    }
                }
            }
            Event::End(end) => match end.name().as_ref() {
                b"node" => {
                    if let Some(node) = current_node.take() {
                        nodes.push(node);
                    }
                }
                b"edge" => {
                    if let Some(edge) = current_edge.take() {
                        edges.push(edge);
                    }
                }
                b"data" => data_key = None,
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    Ok((nodes, edges))
}

fn weight_cm(length_m: f64) -> u32 {
    (length_m * 100.0).round() as u32
}

fn build_street_graph(
    raw_nodes: Vec<RawNode>,
    raw_edges: Vec<RawEdge>,
    copies: usize,
) -> Result<StreetGraph> {
    let mut nodes = Vec::with_capacity(raw_nodes.len());
    let mut id_index: AHashMap<String, u32> = AHashMap::with_capacity(raw_nodes.len());
    let mut tree_points: Vec<StreetPoint> = Vec::with_capacity(raw_nodes.len());

    for (index, raw) in raw_nodes.into_iter().enumerate() {
        let id = index as u32;
        let source_id: u64 = raw
            .id
            .parse()
            .with_context(|| format!("non-numeric node id {:?}", raw.id))?;
        let (Some(lat), Some(lon)) = (raw.lat, raw.lon) else {
            bail!("node {} without coordinates", raw.id);
        };

        let point = [lon, lat];
        nodes.push(StreetNode {
            id,
            source_id,
            point,
        });
        tree_points.push(StreetPoint::Node { id, point });
        id_index.insert(raw.id, id);
    }

    let mut graph = DijkstraGraph::new(nodes.len());

    for raw in &raw_edges {
        let from = *id_index
            .get(&raw.source)
            .with_context(|| format!("edge references unknown node {}", raw.source))?;
        let to = *id_index
            .get(&raw.target)
            .with_context(|| format!("edge references unknown node {}", raw.target))?;
        let length = raw
            .length
            .with_context(|| format!("edge {} -> {} without length", raw.source, raw.target))?;

        let weight = weight_cm(length);
        graph.add_arc(from, to, weight);
        graph.add_arc(to, from, weight);

        let mut line = vec![nodes[from as usize].point];
        if let Some(geometry) = &raw.geometry {
            line.extend(parse_linestring(geometry)?);
        }
        line.push(nodes[to as usize].point);

        tree_points.extend(edge_samples(&line, from, to));
    }

    info!(
        "street graph: {} nodes, {} edges, {} spatial points",
        nodes.len(),
        raw_edges.len(),
        tree_points.len()
    );

    let tree = KdTree::build(tree_points);
    let graphs = vec![graph; copies.max(1)];

    Ok(StreetGraph {
        nodes,
        tree,
        graphs,
    })
}

/// Samples along an edge polyline: every vertex, plus interpolated
/// points wherever consecutive vertices are further apart than the
/// sample spacing.
fn edge_samples(line: &[[f64; 2]], from: u32, to: u32) -> Vec<StreetPoint> {
    let mut samples = Vec::new();

    for i in 0..line.len() {
        if i != 0 {
            let dist = planar_distance(line[i - 1], line[i]);
            if dist > MAX_SAMPLE_SPACING_DEG {
                let steps = (dist / MAX_SAMPLE_SPACING_DEG) as usize;
                for j in 1..steps {
                    let t = j as f64 / steps as f64;
                    samples.push(StreetPoint::EdgeSample {
                        from,
                        to,
                        point: [
                            line[i - 1][0] + (line[i][0] - line[i - 1][0]) * t,
                            line[i - 1][1] + (line[i][1] - line[i - 1][1]) * t,
                        ],
                    });
                }
            }
        }

        samples.push(StreetPoint::EdgeSample {
            from,
            to,
            point: line[i],
        });
    }

    samples
}

/// Parses a `LINESTRING (lon lat, lon lat, ...)` edge geometry.
fn parse_linestring(input: &str) -> Result<Vec<[f64; 2]>> {
    let trimmed = input
        .trim()
        .strip_prefix("LINESTRING")
        .unwrap_or(input)
        .trim()
        .trim_start_matches('(')
        .trim_end_matches(')');

    let mut points = Vec::new();

    for pair in trimmed.split(',') {
        let mut coords = pair.split_whitespace();
        let (Some(lon), Some(lat), None) = (coords.next(), coords.next(), coords.next()) else {
            bail!("invalid coordinate pair {:?} in LINESTRING", pair);
        };

        let lon: f64 = lon
            .parse()
            .with_context(|| format!("invalid longitude {:?}", lon))?;
        let lat: f64 = lat
            .parse()
            .with_context(|| format!("invalid latitude {:?}", lat))?;

        points.push([lon, lat]);
    }

    Ok(points)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<graphml xmlns="http://graphml.graphdrawing.org/xmlns">
  <key id="d4" for="node" attr.name="y" attr.type="string"/>
  <key id="d5" for="node" attr.name="x" attr.type="string"/>
  <key id="d16" for="edge" attr.name="length" attr.type="string"/>
  <key id="d17" for="edge" attr.name="geometry" attr.type="string"/>
  <graph edgedefault="undirected">
    <node id="100"><data key="d4">0.0</data><data key="d5">0.0</data></node>
    <node id="101"><data key="d4">0.0</data><data key="d5">0.001</data></node>
    <node id="102"><data key="d4">0.001</data><data key="d5">0.001</data></node>
    <edge source="100" target="101"><data key="d16">111.2</data></edge>
    <edge source="101" target="102"><data key="d16">111.2</data></edge>
    <edge source="100" target="102"><data key="d16">500.0</data><data key="d17">LINESTRING (0 0, 0.001 0.001)</data></edge>
  </graph>
</graphml>"#;

    fn load_sample(copies: usize) -> StreetGraph {
        let mut reader = Reader::from_str(SAMPLE);
        let (nodes, edges) = parse_graphml(&mut reader).unwrap();
        build_street_graph(nodes, edges, copies).unwrap()
    }

    #[test]
    fn parses_nodes_edges_and_builds_copies() {
        let graph = load_sample(3);

        assert_eq!(graph.nodes.len(), 3);
        assert_eq!(graph.copies(), 3);
        assert_eq!(graph.nodes[0].source_id, 100);
        assert_eq!(graph.nodes[2].point, [0.001, 0.001]);
        assert!(graph.tree.len() > graph.nodes.len());
    }

    #[test]
    fn shortest_path_prefers_cheap_detour() {
        let graph = load_sample(1);

        // The direct 100 -> 102 edge costs 500 m; the detour via 101
        // costs 222.4 m.
        let path = graph.dijkstra(0).shortest_path(0, 2).unwrap();
        assert_eq!(path, vec![0, 1, 2]);
    }

    #[test]
    fn shortest_path_handles_trivial_and_unreachable_queries() {
        let mut graph = DijkstraGraph::new(3);
        graph.add_arc(0, 1, 100);
        graph.add_arc(1, 0, 100);

        assert_eq!(graph.shortest_path(1, 1), Some(vec![1]));
        assert_eq!(graph.shortest_path(0, 2), None);
    }

    #[test]
    fn weights_round_to_centimetres() {
        assert_eq!(weight_cm(111.2), 11120);
        assert_eq!(weight_cm(12.345), 1235);
        assert_eq!(weight_cm(0.004), 0);
    }

    #[test]
    fn long_segments_get_interpolated_samples() {
        let samples = edge_samples(&[[0.0, 0.0], [0.0021, 0.0]], 0, 1);
        // Two vertices plus three interpolated points at 5e-4 spacing.
        assert_eq!(samples.len(), 5);

        let all_tagged = samples.iter().all(|sample| match sample {
            StreetPoint::EdgeSample { from, to, .. } => *from == 0 && *to == 1,
            StreetPoint::Node { .. } => false,
        });
        assert!(all_tagged);
    }

    #[test]
    fn short_segments_keep_vertices_only() {
        let samples = edge_samples(&[[0.0, 0.0], [0.0003, 0.0]], 0, 1);
        assert_eq!(samples.len(), 2);
    }

    #[test]
    fn linestring_parsing() {
        let points = parse_linestring("LINESTRING (5.47 51.44, 5.48 51.45)").unwrap();
        assert_eq!(points, vec![[5.47, 51.44], [5.48, 51.45]]);

        assert!(parse_linestring("LINESTRING (5.47)").is_err());
        assert!(parse_linestring("LINESTRING (a b)").is_err());
    }

    #[test]
    fn missing_node_coordinates_fail_the_load() {
        let broken = r#"<graphml><graph>
            <node id="1"><data key="d4">0.0</data></node>
        </graph></graphml>"#;
        let mut reader = Reader::from_str(broken);
        let (nodes, edges) = parse_graphml(&mut reader).unwrap();
        assert!(build_street_graph(nodes, edges, 1).is_err());
    }
}
