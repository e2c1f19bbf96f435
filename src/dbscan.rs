use crate::geometry::distance_sq;
use crate::kdtree::{KdPoint, KdTree};
use ahash::AHashSet;

/// A clusterable point. The id doubles as the point's index in the
/// slice handed to [`cluster_with_tree`].
pub trait ClusterPoint: KdPoint {
    fn id(&self) -> u32;
}

#[derive(Debug, Clone, Copy)]
pub struct ClusterParams {
    pub min_density: usize,
    /// Neighbourhood radius, compared against squared planar
    /// distance.
    pub epsilon: f64,
    /// Cap on the k-NN lookup that feeds the neighbourhood filter.
    pub k: usize,
}

/// Density-based clustering over a prebuilt k-d tree. A seed with at
/// least `min_density - 1` neighbours opens a cluster; expansion
/// absorbs neighbours of neighbours, recursing only through points
/// that meet the density criterion themselves. Visited membership
/// guarantees no point joins two clusters. Points left out of every
/// cluster are the caller's to emit as singletons.
pub fn cluster_with_tree<P: ClusterPoint>(
    params: &ClusterParams,
    tree: &KdTree<P>,
    points: &[P],
) -> Vec<Vec<u32>> {
    let mut visited: AHashSet<u32> = AHashSet::with_capacity(points.len());
    let mut clusters = Vec::new();

    for point in points {
        if visited.contains(&point.id()) {
            continue;
        }

        let neighbours = neighbours_within(params, tree, point);
        if neighbours.len() + 1 < params.min_density {
            continue;
        }

        visited.insert(point.id());
        let mut cluster = vec![point.id()];
        let mut queue = neighbours;

        while let Some(id) = queue.pop() {
            if !visited.insert(id) {
                continue;
            }
            cluster.push(id);

            let member = &points[id as usize];
            let expansion = neighbours_within(params, tree, member);
            if expansion.len() + 1 >= params.min_density {
                queue.extend(expansion);
            }
        }

        if cluster.len() >= params.min_density {
            clusters.push(cluster);
        }
    }

    clusters
}

fn neighbours_within<P: ClusterPoint>(
    params: &ClusterParams,
    tree: &KdTree<P>,
    point: &P,
) -> Vec<u32> {
    tree.knn(point.point(), params.k)
        .into_iter()
        .filter(|candidate| {
            candidate.id() != point.id()
                && distance_sq(point.point(), candidate.point()) <= params.epsilon
        })
        .map(|candidate| candidate.id())
        .collect()
}
