//! Nearest-neighbour lookup over a fixed point set
//!
//! The index is trained once on the measurement set and then queried many
//! times, which is the access pattern of both ICP and the particle filter.
//! Search is brute force: O(n × m) for n queries against m points, which is
//! fine for the few dozen spots on a well.

use nalgebra::Vector2;

/// Result of a nearest-neighbour query
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    /// Index of the matched point in the trained set
    pub index: usize,
    /// Euclidean distance to the matched point
    pub distance: f64,
}

/// Trained nearest-neighbour index
#[derive(Debug, Clone)]
pub struct NearestNeighbors {
    points: Vec<Vector2<f64>>,
}

impl NearestNeighbors {
    /// Index a set of points
    pub fn train(points: &[Vector2<f64>]) -> Self {
        Self {
            points: points.to_vec(),
        }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn points(&self) -> &[Vector2<f64>] {
        &self.points
    }

    /// Closest trained point to `query`, or `None` for an empty index.
    ///
    /// Ties resolve to the lowest index.
    pub fn nearest(&self, query: &Vector2<f64>) -> Option<Neighbor> {
        let mut best: Option<(usize, f64)> = None;

        for (j, point) in self.points.iter().enumerate() {
            let dist = (query - point).norm_squared();
            match best {
                Some((_, best_dist)) if dist >= best_dist => {}
                _ => best = Some((j, dist)),
            }
        }

        best.map(|(index, dist)| Neighbor {
            index,
            distance: dist.sqrt(),
        })
    }

    /// Nearest neighbour of every query point. Empty when the index is empty.
    pub fn query_all(&self, queries: &[Vector2<f64>]) -> Vec<Neighbor> {
        queries.iter().filter_map(|q| self.nearest(q)).collect()
    }

    /// Root of the summed squared nearest-neighbour distances of `queries`.
    ///
    /// This is the aggregate alignment cost used to score candidate grids.
    pub fn aggregate_distance(&self, queries: &[Vector2<f64>]) -> f64 {
        self.query_all(queries)
            .iter()
            .map(|n| n.distance * n.distance)
            .sum::<f64>()
            .sqrt()
    }
}

/// Distance from each point to its closest *other* point in the same set.
///
/// A single point has no neighbour and gets `f64::INFINITY`.
pub fn nearest_neighbor_distances(points: &[Vector2<f64>]) -> Vec<f64> {
    points
        .iter()
        .enumerate()
        .map(|(i, p)| {
            points
                .iter()
                .enumerate()
                .filter(|(j, _)| *j != i)
                .map(|(_, q)| (p - q).norm())
                .fold(f64::INFINITY, f64::min)
        })
        .collect()
}
