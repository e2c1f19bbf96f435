use crate::geometry::distance_sq;
use ordered_float::OrderedFloat;
use std::collections::BinaryHeap;

/// Anything with a position on the `[lon, lat]` plane.
pub trait KdPoint {
    fn point(&self) -> [f64; 2];
}

struct KdNode<P> {
    item: P,
    left: Option<usize>,
    right: Option<usize>,
}

/// A 2-D k-d tree. Built balanced from a batch of points, with
/// unbalanced incremental inserts on top.
pub struct KdTree<P: KdPoint> {
    nodes: Vec<KdNode<P>>,
    root: Option<usize>,
}

impl<P: KdPoint> KdTree<P> {
    pub fn new() -> KdTree<P> {
        KdTree {
            nodes: Vec::new(),
            root: None,
        }
    }

    pub fn build(items: Vec<P>) -> KdTree<P> {
        let mut tree = KdTree {
            nodes: Vec::with_capacity(items.len()),
            root: None,
        };
        tree.root = tree.build_rec(items, 0);
        tree
    }

    fn build_rec(&mut self, mut items: Vec<P>, depth: usize) -> Option<usize> {
        if items.is_empty() {
            return None;
        }

        let axis = depth % 2;
        items.sort_by(|a, b| a.point()[axis].total_cmp(&b.point()[axis]));

        let mid = items.len() / 2;
        let right_items = items.split_off(mid + 1);
        let item = items.pop().unwrap();

        let left = self.build_rec(items, depth + 1);
        let right = self.build_rec(right_items, depth + 1);

        let index = self.nodes.len();
        self.nodes.push(KdNode { item, left, right });
        Some(index)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn insert(&mut self, item: P) {
        let index = self.nodes.len();
        self.nodes.push(KdNode {
            item,
            left: None,
            right: None,
        });

        let Some(mut current) = self.root else {
            self.root = Some(index);
            return;
        };

        let mut depth = 0;
        loop {
            let axis = depth % 2;
            let go_left =
                self.nodes[index].item.point()[axis] < self.nodes[current].item.point()[axis];
            let next = if go_left {
                self.nodes[current].left
            } else {
                self.nodes[current].right
            };

            match next {
                Some(child) => {
                    current = child;
                    depth += 1;
                }
                None => {
                    if go_left {
                        self.nodes[current].left = Some(index);
                    } else {
                        self.nodes[current].right = Some(index);
                    }
                    return;
                }
            }
        }
    }

    /// The `k` stored points nearest to `query`, ascending by planar
    /// distance.
    pub fn knn(&self, query: [f64; 2], k: usize) -> Vec<&P> {
        if k == 0 || self.nodes.is_empty() {
            return Vec::new();
        }

        let mut best: BinaryHeap<(OrderedFloat<f64>, usize)> = BinaryHeap::with_capacity(k + 1);
        self.knn_rec(self.root, query, k, 0, &mut best);

        best.into_sorted_vec()
            .into_iter()
            .map(|(_, index)| &self.nodes[index].item)
            .collect()
    }

    fn knn_rec(
        &self,
        node: Option<usize>,
        query: [f64; 2],
        k: usize,
        depth: usize,
        best: &mut BinaryHeap<(OrderedFloat<f64>, usize)>,
    ) {
        let Some(index) = node else {
            return;
        };

        let point = self.nodes[index].item.point();
        let dist = distance_sq(query, point);
        if best.len() < k {
            best.push((OrderedFloat(dist), index));
        } else if dist < best.peek().unwrap().0 .0 {
            best.pop();
            best.push((OrderedFloat(dist), index));
        }

        let axis = depth % 2;
        let delta = query[axis] - point[axis];
        let (near, far) = if delta < 0.0 {
            (self.nodes[index].left, self.nodes[index].right)
        } else {
            (self.nodes[index].right, self.nodes[index].left)
        };

        self.knn_rec(near, query, k, depth + 1, best);

        // The far side can only win if the splitting plane is closer
        // than the current worst candidate.
        if best.len() < k || delta * delta <= best.peek().unwrap().0 .0 {
            self.knn_rec(far, query, k, depth + 1, best);
        }
    }
}

impl<P: KdPoint> Default for KdTree<P> {
    fn default() -> Self {
        KdTree::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq)]
    struct Labelled {
        id: u32,
        at: [f64; 2],
    }

    impl KdPoint for Labelled {
        fn point(&self) -> [f64; 2] {
            self.at
        }
    }

    fn grid() -> Vec<Labelled> {
        let mut points = Vec::new();
        let mut id = 0;
        for x in 0..5 {
            for y in 0..5 {
                points.push(Labelled {
                    id,
                    at: [x as f64, y as f64],
                });
                id += 1;
            }
        }
        points
    }

    #[test]
    fn knn_orders_by_distance() {
        let tree = KdTree::build(grid());
        let hits = tree.knn([0.1, 0.1], 4);

        assert_eq!(hits.len(), 4);
        assert_eq!(hits[0].at, [0.0, 0.0]);
        for pair in hits.windows(2) {
            assert!(
                distance_sq([0.1, 0.1], pair[0].at) <= distance_sq([0.1, 0.1], pair[1].at)
            );
        }
    }

    #[test]
    fn knn_matches_linear_scan() {
        let points = grid();
        let tree = KdTree::build(points.clone());
        let query = [2.3, 1.7];

        let mut expected = points;
        expected.sort_by(|a, b| {
            distance_sq(query, a.at).total_cmp(&distance_sq(query, b.at))
        });

        let hits = tree.knn(query, 6);
        for (hit, want) in hits.iter().zip(&expected) {
            assert_eq!(
                distance_sq(query, hit.at),
                distance_sq(query, want.at)
            );
        }
    }

    #[test]
    fn insert_then_query() {
        let mut tree = KdTree::new();
        assert!(tree.knn([0.0, 0.0], 1).is_empty());

        for point in grid() {
            tree.insert(point);
        }
        assert_eq!(tree.len(), 25);

        let hits = tree.knn([3.9, 4.1], 1);
        assert_eq!(hits[0].at, [4.0, 4.0]);
    }

    #[test]
    fn knn_caps_at_tree_size() {
        let tree = KdTree::build(vec![
            Labelled { id: 0, at: [0.0, 0.0] },
            Labelled { id: 1, at: [1.0, 1.0] },
        ]);
        assert_eq!(tree.knn([0.0, 0.0], 10).len(), 2);
    }
}
