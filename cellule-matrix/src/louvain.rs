use log::info;

/// Parameters for graph community detection.
pub struct LouvainArgs {
    /// Modularity resolution; larger values give more, smaller communities.
    pub resolution: f32,
    /// Maximum number of coarsening levels.
    pub max_levels: usize,
    /// Maximum local-moving sweeps per level.
    pub max_sweeps: usize,
}

impl Default for LouvainArgs {
    fn default() -> Self {
        Self {
            resolution: 1.0,
            max_levels: 20,
            max_sweeps: 50,
        }
    }
}

/// Louvain community detection on an undirected weighted graph.
///
/// * `n_nodes` - number of nodes
/// * `edges` - canonical edge list (i < j), no duplicates
/// * `weights` - positive edge weights parallel to `edges`
///
/// Returns one label per node, relabelled so community 0 is the largest
/// and labels are contiguous `0..k`. The node sweep order is fixed, so
/// results are deterministic for a given graph.
pub fn cluster_graph(
    n_nodes: usize,
    edges: &[(usize, usize)],
    weights: &[f32],
    args: &LouvainArgs,
) -> anyhow::Result<Vec<u32>> {
    if edges.len() != weights.len() {
        anyhow::bail!(
            "edge list ({}) and weights ({}) differ in length",
            edges.len(),
            weights.len()
        );
    }
    if n_nodes == 0 {
        return Ok(vec![]);
    }

    let mut graph = Level::from_edges(n_nodes, edges, weights)?;

    // node -> community, composed across levels
    let mut membership: Vec<usize> = (0..n_nodes).collect();

    for level in 0..args.max_levels {
        let (assignment, improved) = graph.local_moving(args.resolution as f64, args.max_sweeps);
        if !improved && level > 0 {
            break;
        }

        for m in membership.iter_mut() {
            *m = assignment[*m];
        }

        let n_communities = assignment.iter().max().map(|&x| x + 1).unwrap_or(0);
        info!(
            "louvain level {}: {} -> {} communities",
            level, graph.n_nodes, n_communities
        );

        if n_communities == graph.n_nodes {
            break;
        }
        graph = graph.aggregate(&assignment, n_communities);
    }

    Ok(relabel_by_size(&membership))
}

/// One coarsening level: adjacency lists plus per-node self-loop weight.
struct Level {
    n_nodes: usize,
    neighbors: Vec<Vec<(usize, f64)>>,
    self_loops: Vec<f64>,
    total_weight: f64,
}

impl Level {
    fn from_edges(n_nodes: usize, edges: &[(usize, usize)], weights: &[f32]) -> anyhow::Result<Self> {
        let mut neighbors = vec![Vec::new(); n_nodes];
        let mut self_loops = vec![0.0f64; n_nodes];
        let mut total = 0.0f64;

        for (&(i, j), &w) in edges.iter().zip(weights.iter()) {
            if i >= n_nodes || j >= n_nodes {
                anyhow::bail!("edge ({}, {}) out of bounds for {} nodes", i, j, n_nodes);
            }
            if w <= 0.0 {
                anyhow::bail!("edge ({}, {}) has non-positive weight {}", i, j, w);
            }
            let w = w as f64;
            total += w;
            if i == j {
                self_loops[i] += w;
            } else {
                neighbors[i].push((j, w));
                neighbors[j].push((i, w));
            }
        }

        Ok(Self {
            n_nodes,
            neighbors,
            self_loops,
            total_weight: total,
        })
    }

    fn degree(&self, node: usize) -> f64 {
        self.neighbors[node].iter().map(|&(_, w)| w).sum::<f64>() + 2.0 * self.self_loops[node]
    }

    /// Greedy local moving; returns (node -> community, any move happened).
    /// Communities in the result are renumbered contiguously.
    fn local_moving(&self, resolution: f64, max_sweeps: usize) -> (Vec<usize>, bool) {
        let n = self.n_nodes;
        let two_m = (2.0 * self.total_weight).max(f64::MIN_POSITIVE);

        let degrees: Vec<f64> = (0..n).map(|i| self.degree(i)).collect();
        let mut community: Vec<usize> = (0..n).collect();
        let mut community_degree = degrees.clone();

        let mut improved = false;
        let mut weight_to = vec![0.0f64; n];

        for _ in 0..max_sweeps {
            let mut moved = false;

            for node in 0..n {
                let old = community[node];
                community_degree[old] -= degrees[node];

                // tally edge weight from node to each adjacent community
                let mut touched = vec![old];
                for &(nb, w) in &self.neighbors[node] {
                    let c = community[nb];
                    if weight_to[c] == 0.0 && c != old {
                        touched.push(c);
                    }
                    weight_to[c] += w;
                }

                let gain = |c: usize| {
                    weight_to[c] - resolution * community_degree[c] * degrees[node] / two_m
                };

                let mut best = old;
                let mut best_gain = gain(old);
                for &c in &touched {
                    let g = gain(c);
                    if g > best_gain + 1e-12 {
                        best = c;
                        best_gain = g;
                    }
                }

                for &c in &touched {
                    weight_to[c] = 0.0;
                }

                community[node] = best;
                community_degree[best] += degrees[node];
                if best != old {
                    moved = true;
                    improved = true;
                }
            }

            if !moved {
                break;
            }
        }

        // renumber communities contiguously
        let mut remap = vec![usize::MAX; n];
        let mut next = 0;
        for c in community.iter_mut() {
            if remap[*c] == usize::MAX {
                remap[*c] = next;
                next += 1;
            }
            *c = remap[*c];
        }

        (community, improved)
    }

    /// Collapse communities into super-nodes.
    fn aggregate(&self, assignment: &[usize], n_communities: usize) -> Level {
        let mut self_loops = vec![0.0f64; n_communities];
        let mut edge_weight = fnv::FnvHashMap::<(usize, usize), f64>::default();

        for node in 0..self.n_nodes {
            let a = assignment[node];
            self_loops[a] += self.self_loops[node];
            for &(nb, w) in &self.neighbors[node] {
                if nb < node {
                    continue; // count each undirected edge once
                }
                let b = assignment[nb];
                if a == b {
                    self_loops[a] += w;
                } else {
                    let key = (a.min(b), a.max(b));
                    *edge_weight.entry(key).or_insert(0.0) += w;
                }
            }
        }

        let mut neighbors = vec![Vec::new(); n_communities];
        for (&(a, b), &w) in edge_weight.iter() {
            neighbors[a].push((b, w));
            neighbors[b].push((a, w));
        }

        Level {
            n_nodes: n_communities,
            neighbors,
            self_loops,
            total_weight: self.total_weight,
        }
    }
}

/// Relabel so the largest community gets label 0, then by size descending
/// (ties broken by first appearance).
fn relabel_by_size(membership: &[usize]) -> Vec<u32> {
    let n_communities = membership.iter().max().map(|&x| x + 1).unwrap_or(0);
    let mut sizes = vec![0usize; n_communities];
    for &c in membership {
        sizes[c] += 1;
    }

    let mut order: Vec<usize> = (0..n_communities).collect();
    order.sort_by_key(|&c| std::cmp::Reverse(sizes[c]));

    let mut remap = vec![0u32; n_communities];
    for (new, &old) in order.iter().enumerate() {
        remap[old] = new as u32;
    }

    membership.iter().map(|&c| remap[c]).collect()
}
