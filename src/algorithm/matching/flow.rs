//! Minimum-cost flow by successive shortest augmenting paths
//!
//! Shortest paths are found with Dijkstra on reduced costs, keeping node
//! potentials so that every residual edge has a non-negative reduced cost.
//! Initial potentials come from Bellman-Ford, which admits the negative
//! edge costs the solver uses to enforce lower bounds.
//!
//! Node order is the tie-break order: equal-cost paths resolve towards
//! lower node indices and earlier-inserted edges.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

#[derive(Debug, Clone)]
struct Edge {
    to: usize,
    capacity: usize,
    cost: f64,
}

/// Outcome of a flow computation
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FlowSummary {
    /// Units of flow pushed from source to sink
    pub flow: usize,
    /// Total cost of that flow
    pub cost: f64,
    /// Augmenting paths used
    pub augmentations: usize,
}

/// Directed network with integral capacities and real costs
#[derive(Debug, Clone)]
pub struct FlowNetwork {
    edges: Vec<Edge>,
    adjacency: Vec<Vec<usize>>,
    tolerance: f64,
}

#[derive(Debug, Clone, Copy)]
struct HeapEntry {
    dist: f64,
    node: usize,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    // Reversed so the max-heap pops the smallest distance, then lowest node
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .dist
            .total_cmp(&self.dist)
            .then_with(|| other.node.cmp(&self.node))
    }
}

impl FlowNetwork {
    /// Create a network with `nodes` nodes and no edges
    ///
    /// Path costs within `tolerance` of each other are treated as tied.
    #[must_use]
    pub fn new(nodes: usize, tolerance: f64) -> Self {
        Self {
            edges: Vec::new(),
            adjacency: vec![Vec::new(); nodes],
            tolerance,
        }
    }

    /// Number of nodes
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.adjacency.len()
    }

    /// Add an edge and its residual twin, returning the forward edge id
    pub fn add_edge(&mut self, from: usize, to: usize, capacity: usize, cost: f64) -> usize {
        let id = self.edges.len();
        self.edges.push(Edge { to, capacity, cost });
        self.edges.push(Edge {
            to: from,
            capacity: 0,
            cost: -cost,
        });
        self.adjacency[from].push(id);
        self.adjacency[to].push(id + 1);
        id
    }

    /// Flow currently carried by a forward edge
    #[must_use]
    pub fn flow(&self, edge: usize) -> usize {
        self.edges[edge ^ 1].capacity
    }

    /// Push as much flow as possible from `source` to `sink` at minimum cost
    pub fn min_cost_max_flow(&mut self, source: usize, sink: usize) -> FlowSummary {
        let n = self.node_count();
        let mut potential = self.initial_potentials(source);
        let mut summary = FlowSummary {
            flow: 0,
            cost: 0.0,
            augmentations: 0,
        };

        let mut dist = vec![f64::INFINITY; n];
        let mut via = vec![usize::MAX; n];

        loop {
            self.shortest_paths(source, &potential, &mut dist, &mut via);
            if !dist[sink].is_finite() {
                break;
            }

            let farthest = dist
                .iter()
                .filter(|d| d.is_finite())
                .fold(0.0_f64, |acc, &d| acc.max(d));
            for (p, &d) in potential.iter_mut().zip(&dist) {
                *p += if d.is_finite() { d } else { farthest };
            }

            // Bottleneck along the path
            let mut push = usize::MAX;
            let mut node = sink;
            while node != source {
                let edge = via[node];
                push = push.min(self.edges[edge].capacity);
                node = self.edges[edge ^ 1].to;
            }

            let mut node = sink;
            while node != source {
                let edge = via[node];
                self.edges[edge].capacity -= push;
                self.edges[edge ^ 1].capacity += push;
                summary.cost += push as f64 * self.edges[edge].cost;
                node = self.edges[edge ^ 1].to;
            }

            summary.flow += push;
            summary.augmentations += 1;
        }

        summary
    }

    /// Bellman-Ford distances from `source` over edges with spare capacity
    fn initial_potentials(&self, source: usize) -> Vec<f64> {
        let n = self.node_count();
        let mut dist = vec![f64::INFINITY; n];
        dist[source] = 0.0;

        for _ in 0..n {
            let mut changed = false;
            for from in 0..n {
                if !dist[from].is_finite() {
                    continue;
                }
                for &e in &self.adjacency[from] {
                    let edge = &self.edges[e];
                    if edge.capacity == 0 {
                        continue;
                    }
                    let candidate = dist[from] + edge.cost;
                    if candidate < dist[edge.to] {
                        dist[edge.to] = candidate;
                        changed = true;
                    }
                }
            }
            if !changed {
                break;
            }
        }

        dist.into_iter()
            .map(|d| if d.is_finite() { d } else { 0.0 })
            .collect()
    }

    fn shortest_paths(
        &self,
        source: usize,
        potential: &[f64],
        dist: &mut [f64],
        via: &mut [usize],
    ) {
        dist.fill(f64::INFINITY);
        via.fill(usize::MAX);
        dist[source] = 0.0;

        let mut heap = BinaryHeap::new();
        heap.push(HeapEntry {
            dist: 0.0,
            node: source,
        });

        while let Some(HeapEntry { dist: d, node }) = heap.pop() {
            if d > dist[node] {
                continue;
            }
            for &e in &self.adjacency[node] {
                let edge = &self.edges[e];
                if edge.capacity == 0 {
                    continue;
                }
                // Rounding can leave reduced costs a hair below zero
                let reduced = (edge.cost + potential[node] - potential[edge.to]).max(0.0);
                let candidate = d + reduced;
                if candidate + self.tolerance < dist[edge.to] {
                    dist[edge.to] = candidate;
                    via[edge.to] = e;
                    heap.push(HeapEntry {
                        dist: candidate,
                        node: edge.to,
                    });
                }
            }
        }
    }
}
