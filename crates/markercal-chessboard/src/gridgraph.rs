use crate::geom::{angle_diff_abs, angle_to_unit, dominant_grid_angle};
use crate::params::GridGraphParams;
use kiddo::{KdTree, SquaredEuclidean};
use markercal_core::Corner;
use nalgebra::Vector2;
use std::collections::{HashMap, VecDeque};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum NeighborDirection {
    Right,
    Left,
    Up,
    Down,
}

impl NeighborDirection {
    pub fn opposite(self) -> Self {
        match self {
            Self::Right => Self::Left,
            Self::Left => Self::Right,
            Self::Up => Self::Down,
            Self::Down => Self::Up,
        }
    }

    /// Grid step `(di, dj)` taken along this direction.
    pub fn step(self) -> (i32, i32) {
        match self {
            Self::Right => (1, 0),
            Self::Left => (-1, 0),
            Self::Up => (0, -1),
            Self::Down => (0, 1),
        }
    }

    fn slot(self) -> usize {
        match self {
            Self::Right => 0,
            Self::Left => 1,
            Self::Up => 2,
            Self::Down => 3,
        }
    }
}

#[derive(Clone, Debug)]
pub struct NodeNeighbor {
    pub direction: NeighborDirection,
    pub index: usize,
    pub distance: f32,
    /// Lower is better.
    pub score: f32,
}

/// Two global grid axes in image space.
///
/// `u` is the axis closer to image `+x` and points toward `+x`; `v` is `u`
/// rotated by +90°, i.e. toward image `+y` (down).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GridAxes {
    pub u: Vector2<f32>,
    pub v: Vector2<f32>,
}

impl GridAxes {
    pub fn from_angle(theta: f32) -> Self {
        let a = angle_to_unit(theta);
        let b = Vector2::new(-a.y, a.x);
        let mut u = if a.x.abs() >= b.x.abs() { a } else { b };
        if u.x < 0.0 {
            u = -u;
        }
        Self {
            u,
            v: Vector2::new(-u.y, u.x),
        }
    }

    /// Closest axis direction of `edge` and the angle to it.
    fn classify(&self, edge: &Vector2<f32>) -> (NeighborDirection, f32) {
        let angle = edge.y.atan2(edge.x);
        let u = self.u.y.atan2(self.u.x);
        let v = self.v.y.atan2(self.v.x);
        [
            (NeighborDirection::Right, angle_diff_abs(angle, u)),
            (NeighborDirection::Left, angle_diff_abs(angle, u + std::f32::consts::PI)),
            (NeighborDirection::Down, angle_diff_abs(angle, v)),
            (NeighborDirection::Up, angle_diff_abs(angle, v + std::f32::consts::PI)),
        ]
        .into_iter()
        .min_by(|a, b| a.1.total_cmp(&b.1))
        .unwrap_or((NeighborDirection::Right, f32::INFINITY))
    }
}

/// Keep at most one neighbor per direction, choosing the lowest-score candidate.
pub(crate) fn select_neighbors(candidates: Vec<NodeNeighbor>) -> Vec<NodeNeighbor> {
    let mut best: [Option<NodeNeighbor>; 4] = [None, None, None, None];

    for candidate in candidates.into_iter() {
        let slot = &mut best[candidate.direction.slot()];
        let replace = match slot {
            None => true,
            Some(current) => {
                candidate.score < current.score
                    || (candidate.score == current.score && candidate.distance < current.distance)
            }
        };
        if replace {
            *slot = Some(candidate);
        }
    }

    best.into_iter().flatten().collect()
}

/// 4-connected neighbor graph over a corner cloud.
#[derive(Clone, Debug)]
pub struct GridGraph {
    /// For each node, its accepted (mutual) neighbors.
    pub neighbors: Vec<Vec<NodeNeighbor>>,
    pub axes: Option<GridAxes>,
    /// Median nearest-neighbor distance in pixels.
    pub base_spacing: f32,
}

impl GridGraph {
    pub fn new(corners: &[Corner], params: &GridGraphParams) -> Self {
        let empty = Self {
            neighbors: vec![Vec::new(); corners.len()],
            axes: None,
            base_spacing: 0.0,
        };
        if corners.len() < 2 {
            return empty;
        }

        let coords = corners
            .iter()
            .map(|c| [c.position.x, c.position.y])
            .collect::<Vec<_>>();
        let tree: KdTree<f32, 2> = (&coords).into();
        let k = params.k_neighbors.max(1) + 1;

        // (index, vector, distance) for the k nearest other corners.
        let knn: Vec<Vec<(usize, Vector2<f32>, f32)>> = corners
            .iter()
            .enumerate()
            .map(|(i, corner)| {
                let query = [corner.position.x, corner.position.y];
                tree.nearest_n::<SquaredEuclidean>(&query, k)
                    .into_iter()
                    .map(|nn| nn.item as usize)
                    .filter(|&j| j != i)
                    .map(|j| {
                        let vec = corners[j].position - corner.position;
                        (j, vec, vec.norm())
                    })
                    .collect()
            })
            .collect();

        let mut nearest: Vec<(Vector2<f32>, f32)> = knn
            .iter()
            .filter_map(|list| {
                list.iter()
                    .filter(|(_, _, d)| *d > f32::EPSILON)
                    .min_by(|a, b| a.2.total_cmp(&b.2))
                    .map(|(_, v, d)| (*v, *d))
            })
            .collect();
        if nearest.is_empty() {
            return empty;
        }
        let vectors: Vec<Vector2<f32>> = nearest.iter().map(|(v, _)| *v).collect();
        nearest.sort_by(|a, b| a.1.total_cmp(&b.1));
        let base_spacing = nearest[nearest.len() / 2].1;

        let Some(axes) = dominant_grid_angle(&vectors).map(GridAxes::from_angle) else {
            log::debug!("no dominant grid direction among {} corners", corners.len());
            return Self {
                base_spacing,
                ..empty
            };
        };

        let min_dist = params.min_spacing_rel * base_spacing;
        let max_dist = params.max_spacing_rel * base_spacing;
        let tol = params.axis_tolerance_deg.to_radians().max(1e-3);

        let candidates: Vec<Vec<NodeNeighbor>> = knn
            .into_iter()
            .map(|list| {
                let found = list
                    .into_iter()
                    .filter(|(_, _, d)| *d >= min_dist && *d <= max_dist)
                    .filter_map(|(index, vec, distance)| {
                        let (direction, deviation) = axes.classify(&vec);
                        (deviation <= tol).then(|| NodeNeighbor {
                            direction,
                            index,
                            distance,
                            score: distance * (1.0 + deviation / tol),
                        })
                    })
                    .collect();
                select_neighbors(found)
            })
            .collect();

        let neighbors = candidates
            .iter()
            .enumerate()
            .map(|(i, list)| {
                list.iter()
                    .filter(|n| {
                        candidates[n.index]
                            .iter()
                            .any(|m| m.index == i && m.direction == n.direction.opposite())
                    })
                    .cloned()
                    .collect()
            })
            .collect();

        Self {
            neighbors,
            axes: Some(axes),
            base_spacing,
        }
    }
}

pub fn connected_components(graph: &GridGraph) -> Vec<Vec<usize>> {
    let mut visited = vec![false; graph.neighbors.len()];
    let mut components = Vec::new();

    for start in 0..graph.neighbors.len() {
        if visited[start] {
            continue;
        }

        let mut component = Vec::new();
        let mut stack = vec![start];

        while let Some(node) = stack.pop() {
            if visited[node] {
                continue;
            }
            visited[node] = true;
            component.push(node);

            for neighbor in &graph.neighbors[node] {
                if !visited[neighbor.index] {
                    stack.push(neighbor.index);
                }
            }
        }

        components.push(component);
    }

    components
}

/// BFS integer coordinates `(node, i, j)` for a component.
///
/// Returns `None` when two paths disagree on a node's coordinate or two nodes
/// claim the same coordinate.
pub fn assign_grid_coordinates(
    graph: &GridGraph,
    component: &[usize],
) -> Option<Vec<(usize, i32, i32)>> {
    let start = *component.first()?;
    let mut coords = Vec::with_capacity(component.len());
    let mut coord_of: HashMap<usize, (i32, i32)> = HashMap::new();
    let mut node_at: HashMap<(i32, i32), usize> = HashMap::new();
    let mut queue = VecDeque::new();
    queue.push_back((start, 0, 0));

    while let Some((node, i, j)) = queue.pop_front() {
        if let Some(&seen) = coord_of.get(&node) {
            if seen != (i, j) {
                return None;
            }
            continue;
        }
        if node_at.get(&(i, j)).is_some_and(|&other| other != node) {
            return None;
        }
        coord_of.insert(node, (i, j));
        node_at.insert((i, j), node);
        coords.push((node, i, j));

        for neighbor in &graph.neighbors[node] {
            let (di, dj) = neighbor.direction.step();
            queue.push_back((neighbor.index, i + di, j + dj));
        }
    }

    Some(coords)
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::{Point2, Rotation2};

    fn neighbor_map(neighbors: &[NodeNeighbor]) -> HashMap<NeighborDirection, &NodeNeighbor> {
        neighbors.iter().map(|n| (n.direction, n)).collect()
    }

    fn grid(rows: usize, cols: usize, spacing: f32, angle: f32) -> Vec<Corner> {
        let rot = Rotation2::new(angle);
        let mut corners = Vec::new();
        for j in 0..rows {
            for i in 0..cols {
                let p = rot * Point2::new(i as f32 * spacing, j as f32 * spacing);
                corners.push(Corner::new(p.x + 100.0, p.y + 100.0, 1.0));
            }
        }
        corners
    }

    #[test]
    fn finds_axis_neighbors_in_regular_grid() {
        let spacing = 10.0;
        let cols = 3;
        let corners = grid(3, cols, spacing, 0.0);
        let graph = GridGraph::new(&corners, &GridGraphParams::default());
        assert!((graph.base_spacing - spacing).abs() < 1e-4);

        let idx = |i: usize, j: usize| j * cols + i;

        let center = neighbor_map(&graph.neighbors[idx(1, 1)]);
        assert_eq!(4, center.len());
        assert_eq!(idx(0, 1), center[&NeighborDirection::Left].index);
        assert_eq!(idx(2, 1), center[&NeighborDirection::Right].index);
        assert_eq!(idx(1, 0), center[&NeighborDirection::Up].index);
        assert_eq!(idx(1, 2), center[&NeighborDirection::Down].index);
        for dir in [
            NeighborDirection::Left,
            NeighborDirection::Right,
            NeighborDirection::Up,
            NeighborDirection::Down,
        ] {
            assert!((center[&dir].distance - spacing).abs() < 1e-4);
        }

        let top_left = neighbor_map(&graph.neighbors[idx(0, 0)]);
        assert_eq!(2, top_left.len());
        assert!(top_left.contains_key(&NeighborDirection::Right));
        assert!(top_left.contains_key(&NeighborDirection::Down));

        let top_mid = neighbor_map(&graph.neighbors[idx(1, 0)]);
        assert_eq!(3, top_mid.len());
        assert!(top_mid.contains_key(&NeighborDirection::Left));
        assert!(top_mid.contains_key(&NeighborDirection::Right));
        assert!(top_mid.contains_key(&NeighborDirection::Down));
    }

    #[test]
    fn rejects_neighbors_outside_distance_window() {
        let mut corners = grid(1, 3, 10.0, 0.0);
        corners.push(Corner::new(150.0, 100.0, 1.0));
        let graph = GridGraph::new(&corners, &GridGraphParams::default());

        assert!((graph.base_spacing - 10.0).abs() < 1e-4);
        assert!(graph.neighbors[3].is_empty());
        assert_eq!(graph.neighbors[2].len(), 1);
    }

    #[test]
    fn keeps_best_candidate_per_direction() {
        let candidates = vec![
            NodeNeighbor {
                direction: NeighborDirection::Right,
                index: 2,
                distance: 12.0,
                score: 14.0,
            },
            NodeNeighbor {
                direction: NeighborDirection::Right,
                index: 1,
                distance: 10.0,
                score: 10.5,
            },
            NodeNeighbor {
                direction: NeighborDirection::Left,
                index: 3,
                distance: 10.0,
                score: 10.0,
            },
        ];
        let selected = select_neighbors(candidates);
        let map = neighbor_map(&selected);
        assert_eq!(2, map.len());
        assert_eq!(1, map[&NeighborDirection::Right].index);
        assert_eq!(3, map[&NeighborDirection::Left].index);
    }

    #[test]
    fn rotated_grid_gets_consistent_coordinates() {
        let (rows, cols) = (4, 5);
        let corners = grid(rows, cols, 20.0, 0.35);
        let graph = GridGraph::new(&corners, &GridGraphParams::default());
        let axes = graph.axes.expect("axes");
        assert!((axes.u.y.atan2(axes.u.x) - 0.35).abs() < 1e-3);

        let components = connected_components(&graph);
        assert_eq!(components.len(), 1);
        let coords = assign_grid_coordinates(&graph, &components[0]).expect("consistent");
        assert_eq!(coords.len(), rows * cols);

        let (_, i0, j0) = coords.iter().find(|(n, _, _)| *n == 0).copied().unwrap();
        for (node, i, j) in coords {
            assert_eq!(((i - i0) as usize, (j - j0) as usize), (node % cols, node / cols));
        }
    }

    #[test]
    fn conflicting_paths_drop_the_component() {
        let edge = |direction, index| NodeNeighbor {
            direction,
            index,
            distance: 1.0,
            score: 1.0,
        };
        let graph = GridGraph {
            neighbors: vec![
                vec![edge(NeighborDirection::Right, 1), edge(NeighborDirection::Down, 2)],
                vec![edge(NeighborDirection::Left, 0), edge(NeighborDirection::Right, 2)],
                vec![edge(NeighborDirection::Left, 1), edge(NeighborDirection::Up, 0)],
            ],
            axes: None,
            base_spacing: 1.0,
        };
        assert!(assign_grid_coordinates(&graph, &[0, 1, 2]).is_none());
    }
}
