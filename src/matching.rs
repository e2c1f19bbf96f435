use crate::geometry::distance_sq;
use crate::parallel;
use crate::street_graph::{DijkstraGraph, StreetGraph, StreetPoint};
use crate::traces::Trace;
use log::debug;

/// Sentinel for trace elements that found no street node.
pub const NO_NODE: u32 = u32::MAX;

/// Snaps every trace element to a candidate street node: the nearest
/// spatial point, resolved to the nearer edge endpoint when the hit
/// is an edge sample.
pub fn snap_trace(trace: &Trace, graph: &StreetGraph) -> Vec<u32> {
    trace
        .elements
        .iter()
        .map(|elem| {
            let hits = graph.tree.knn(elem.point, 1);
            let Some(hit) = hits.first() else {
                return NO_NODE;
            };

            match **hit {
                StreetPoint::Node { id, .. } => id,
                StreetPoint::EdgeSample { from, to, .. } => {
                    let from_dist = distance_sq(elem.point, graph.nodes[from as usize].point);
                    let to_dist = distance_sq(elem.point, graph.nodes[to as usize].point);
                    if from_dist < to_dist {
                        from
                    } else {
                        to
                    }
                }
            }
        })
        .collect()
}

/// Stitches a snapped node sequence into a connected walk using
/// shortest paths. Consecutive snapped nodes with no connecting path
/// degrade to a straight two-node bridge.
fn stitch(snapped: &[u32], dijkstra: &DijkstraGraph) -> Vec<u32> {
    let mut matched = Vec::new();
    let mut last = NO_NODE;

    for &node in snapped {
        if node == NO_NODE {
            continue;
        }
        if last == NO_NODE {
            last = node;
            continue;
        }

        let path = dijkstra
            .shortest_path(last, node)
            .unwrap_or_else(|| vec![last, node]);

        // The join node is already part of the output.
        let skip = usize::from(!matched.is_empty());
        matched.extend(path.into_iter().skip(skip));

        last = node;
    }

    matched
}

pub fn match_trace(trace: &Trace, graph: &StreetGraph, worker: usize) -> Vec<u32> {
    let snapped = snap_trace(trace, graph);
    stitch(&snapped, graph.dijkstra(worker))
}

/// Map-matches a batch of traces. Worker `w` owns traces `j ≡ w (mod
/// workers)` and queries its private Dijkstra copy.
pub fn match_traces(traces: &[Trace], graph: &StreetGraph, workers: usize) -> Vec<Vec<u32>> {
    let workers = workers.clamp(1, graph.copies());

    parallel::strided_map(traces.len(), workers, |worker, index| {
        if index % 100 == 0 {
            debug!("matching trace {} of {}", index, traces.len());
        }
        match_trace(&traces[index], graph, worker)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::journeys::Mode;
    use crate::kdtree::KdTree;
    use crate::street_graph::StreetNode;
    use crate::traces::TraceElement;
    use chrono::{TimeZone, Utc};

    fn node(id: u32, point: [f64; 2]) -> StreetNode {
        StreetNode {
            id,
            source_id: 1000 + id as u64,
            point,
        }
    }

    /// Line 0 - 1 - 2 plus an isolated node 3.
    fn line_graph(copies: usize) -> StreetGraph {
        let nodes = vec![
            node(0, [0.0, 0.0]),
            node(1, [0.001, 0.0]),
            node(2, [0.002, 0.0]),
            node(3, [1.0, 1.0]),
        ];

        let mut graph = DijkstraGraph::new(nodes.len());
        for (a, b) in [(0u32, 1u32), (1, 2)] {
            graph.add_arc(a, b, 11120);
            graph.add_arc(b, a, 11120);
        }

        let tree = KdTree::build(
            nodes
                .iter()
                .map(|n| StreetPoint::Node {
                    id: n.id,
                    point: n.point,
                })
                .collect(),
        );

        StreetGraph {
            nodes,
            tree,
            graphs: vec![graph; copies],
        }
    }

    fn trace_at(points: &[[f64; 2]]) -> Trace {
        let t0 = Utc.with_ymd_and_hms(2023, 10, 4, 8, 0, 0).unwrap();
        Trace {
            vc_id: "vc-1".into(),
            route_option_id: "opt-1".into(),
            elements: points
                .iter()
                .enumerate()
                .map(|(i, &point)| TraceElement {
                    point,
                    time: t0 + chrono::Duration::seconds(i as i64),
                    mode: Mode::Car,
                    is_leg_start: i == 0,
                })
                .collect(),
        }
    }

    #[test]
    fn stitching_fills_gaps_with_shortest_paths() {
        let graph = line_graph(1);
        let trace = trace_at(&[[0.0001, 0.0001], [0.0019, 0.0001]]);

        assert_eq!(match_trace(&trace, &graph, 0), vec![0, 1, 2]);
    }

    #[test]
    fn disconnected_nodes_bridge_pairwise() {
        let graph = line_graph(1);
        let trace = trace_at(&[[0.0, 0.0001], [0.9, 0.9]]);

        assert_eq!(match_trace(&trace, &graph, 0), vec![0, 3]);
    }

    #[test]
    fn edge_samples_resolve_to_nearer_endpoint() {
        let mut graph = line_graph(1);
        // A sample sitting two thirds along the 1 - 2 edge.
        graph.tree.insert(StreetPoint::EdgeSample {
            from: 1,
            to: 2,
            point: [0.00166, 0.0],
        });

        let trace = trace_at(&[[0.00167, 0.00001]]);
        let snapped = snap_trace(&trace, &graph);
        assert_eq!(snapped, vec![2]);
    }

    #[test]
    fn single_matched_element_yields_no_walk() {
        let graph = line_graph(1);
        let trace = trace_at(&[[0.0, 0.0]]);
        assert!(match_trace(&trace, &graph, 0).is_empty());

        let empty = trace_at(&[]);
        assert!(match_trace(&empty, &graph, 0).is_empty());
    }

    #[test]
    fn matching_is_deterministic_across_workers() {
        let graph = line_graph(3);
        let traces = vec![
            trace_at(&[[0.0, 0.0], [0.002, 0.0]]),
            trace_at(&[[0.001, 0.0], [0.0, 0.0]]),
            trace_at(&[[0.002, 0.0], [0.001, 0.0], [0.0, 0.0]]),
        ];

        let one = match_traces(&traces, &graph, 1);
        let three = match_traces(&traces, &graph, 3);
        assert_eq!(one, three);
        assert_eq!(one[2], vec![2, 1, 0]);
    }
}
