use crate::trace_graph::{ArcVisitor, TraceGraph};
use ahash::{AHashMap, AHashSet};
use log::info;
use std::collections::BTreeSet;

type EdgeKey = (u32, u32);

fn edge_key(a: u32, b: u32) -> EdgeKey {
    if a < b {
        (a, b)
    } else {
        (b, a)
    }
}

/// Removes flow-equivalent vertices: a vertex of degree exactly two
/// whose incident edges carry equal visitor sets adds no information,
/// so it is dropped and its edges fuse into one carrying the shared
/// set. A fusion that would create a parallel edge is skipped and the
/// vertex kept. Passes repeat until a fixed point.
pub fn decimate(graph: &TraceGraph) -> TraceGraph {
    let node_count = graph.nodes.len();

    let mut edges: AHashMap<EdgeKey, Vec<ArcVisitor>> = AHashMap::new();
    let mut adjacency: Vec<AHashSet<u32>> = vec![AHashSet::new(); node_count];

    for (from, to, visitors) in graph.iter_edges() {
        edges.insert((from, to), visitors.to_vec());
        adjacency[from as usize].insert(to);
        adjacency[to as usize].insert(from);
    }

    let mut removed = vec![false; node_count];

    loop {
        let mut changed = false;

        for vertex in 0..node_count as u32 {
            if removed[vertex as usize] || adjacency[vertex as usize].len() != 2 {
                continue;
            }

            let mut neighbours = adjacency[vertex as usize].iter().copied();
            let a = neighbours.next().unwrap();
            let b = neighbours.next().unwrap();

            let set_a: BTreeSet<&ArcVisitor> = edges[&edge_key(a, vertex)].iter().collect();
            let set_b: BTreeSet<&ArcVisitor> = edges[&edge_key(vertex, b)].iter().collect();
            if set_a != set_b {
                continue;
            }

            if edges.contains_key(&edge_key(a, b)) {
                continue;
            }

            let shared: Vec<ArcVisitor> = set_a.into_iter().cloned().collect();

            edges.remove(&edge_key(a, vertex));
            edges.remove(&edge_key(vertex, b));
            edges.insert(edge_key(a, b), shared);

            adjacency[a as usize].remove(&vertex);
            adjacency[b as usize].remove(&vertex);
            adjacency[a as usize].insert(b);
            adjacency[b as usize].insert(a);
            adjacency[vertex as usize].clear();

            removed[vertex as usize] = true;
            changed = true;
        }

        if !changed {
            break;
        }
    }

    // Compact the surviving vertices to a dense range. The remap is
    // monotonic, so canonical edge orientation survives.
    let mut remap: AHashMap<u32, u32> = AHashMap::new();
    let mut nodes = Vec::new();
    for (old, point) in graph.nodes.iter().enumerate() {
        if removed[old] {
            continue;
        }
        remap.insert(old as u32, nodes.len() as u32);
        nodes.push(*point);
    }

    let mut out = TraceGraph::with_nodes(nodes, graph.mode);

    let mut keys: Vec<EdgeKey> = edges.keys().copied().collect();
    keys.sort_unstable();
    for (a, b) in keys {
        for visitor in &edges[&(a, b)] {
            out.add_visitor(remap[&a], remap[&b], visitor.clone());
        }
    }

    info!(
        "decimated {} -> {} nodes, {} -> {} edges",
        graph.nodes.len(),
        out.nodes.len(),
        graph.edge_count(),
        out.edge_count()
    );
    out
}
