use dashmap::DashMap;
use indicatif::ParallelProgressIterator;
use log::info;
use nalgebra::DMatrix;
use nalgebra_sparse::{CooMatrix, CscMatrix};
use rayon::prelude::*;

const DEFAULT_BLOCK_SIZE: usize = 1000;

/// A point wrapper so `instant_distance` can index column vectors.
#[derive(Clone, Debug)]
pub struct ColumnPoint {
    pub data: Vec<f32>,
}

impl instant_distance::Point for ColumnPoint {
    fn distance(&self, other: &Self) -> f32 {
        self.data
            .iter()
            .zip(other.data.iter())
            .map(|(x, y)| (x - y) * (x - y))
            .sum::<f32>()
            .sqrt()
    }
}

struct ColumnIndex {
    map: instant_distance::HnswMap<ColumnPoint, usize>,
    points: Vec<ColumnPoint>,
}

impl ColumnIndex {
    fn from_columns(points: &DMatrix<f32>) -> Self {
        let columns: Vec<ColumnPoint> = points
            .column_iter()
            .map(|x| ColumnPoint {
                data: x.iter().cloned().collect(),
            })
            .collect();
        let names = (0..columns.len()).collect::<Vec<_>>();
        let map = instant_distance::Builder::default().build(columns.clone(), names);
        Self {
            map,
            points: columns,
        }
    }

    /// Nearest neighbours of column `query`, excluding itself.
    fn search_others(&self, query: usize, num: usize) -> Vec<(usize, f32)> {
        let mut search = instant_distance::Search::default();
        self.map
            .search(&self.points[query], &mut search)
            .map(|item| (*item.value, item.distance))
            .filter(|&(j, _)| j != query)
            .take(num)
            .collect()
    }
}

pub struct NeighborGraphArgs {
    pub knn: usize,
    pub block_size: usize,
}

/// Symmetric k-nearest-neighbour graph over the columns of a matrix.
pub struct NeighborGraph {
    /// Symmetric CSC adjacency holding edge distances (n x n)
    pub adjacency: CscMatrix<f32>,
    /// Canonical edge list (i < j), deduplicated
    pub edges: Vec<(usize, usize)>,
    /// Distances parallel to `edges`
    pub distances: Vec<f32>,
    pub n_nodes: usize,
}

impl NeighborGraph {
    /// Build the graph from column vectors (d x n), one point per column.
    ///
    /// Directed kNN hits are symmetrized by union: an edge survives when
    /// either endpoint lists the other, keeping the smaller distance.
    pub fn from_columns(
        points: &DMatrix<f32>,
        args: &NeighborGraphArgs,
    ) -> anyhow::Result<NeighborGraph> {
        let nn = points.ncols();
        if nn == 0 {
            anyhow::bail!("cannot build a neighbour graph over zero points");
        }

        let index = ColumnIndex::from_columns(points);
        let nquery = args.knn.clamp(1, nn.saturating_sub(1).max(1));

        let jobs = create_jobs(nn, args.block_size);
        let njobs = jobs.len() as u64;

        let hits: DashMap<(usize, usize), f32> = DashMap::new();

        jobs.into_par_iter().progress_count(njobs).for_each(|(lb, ub)| {
            for i in lb..ub {
                for (j, d_ij) in index.search_others(i, nquery) {
                    hits.insert((i, j), d_ij);
                }
            }
        });

        if hits.is_empty() {
            anyhow::bail!("neighbour search produced no edges");
        }

        let mut edges: Vec<((usize, usize), f32)> = hits
            .par_iter()
            .filter_map(|entry| {
                let &(i, j) = entry.key();
                if i < j {
                    let d_ij = *entry.value();
                    let d_ji = hits.get(&(j, i)).map(|e| *e).unwrap_or(d_ij);
                    Some(((i, j), d_ij.min(d_ji)))
                } else if !hits.contains_key(&(j, i)) {
                    Some(((j, i), *entry.value()))
                } else {
                    None
                }
            })
            .collect();

        edges.par_sort_by_key(|&(ij, _)| ij);
        edges.dedup_by_key(|&mut (ij, _)| ij);

        info!("{} union edges over {} nodes", edges.len(), nn);

        let mut coo = CooMatrix::new(nn, nn);
        for &((i, j), v) in edges.iter() {
            coo.push(i, j, v);
            coo.push(j, i, v);
        }
        let adjacency = CscMatrix::from(&coo);

        let (edge_pairs, distances): (Vec<_>, Vec<_>) = edges.into_iter().unzip();

        Ok(NeighborGraph {
            adjacency,
            edges: edge_pairs,
            distances,
            n_nodes: nn,
        })
    }

    pub fn num_edges(&self) -> usize {
        self.edges.len()
    }

    pub fn num_nodes(&self) -> usize {
        self.n_nodes
    }

    /// Neighbours of `node` from the CSC adjacency.
    pub fn neighbors(&self, node: usize) -> &[usize] {
        let offsets = self.adjacency.col_offsets();
        &self.adjacency.row_indices()[offsets[node]..offsets[node + 1]]
    }

    /// Membership weights in (0, 1] parallel to `self.edges`.
    ///
    /// Per-node bandwidths follow the smooth-kNN calibration used for
    /// fuzzy simplicial sets (rho subtraction, binary search for sigma
    /// targeting log2(k)), then directed weights are combined with the
    /// fuzzy union w_ij + w_ji - w_ij * w_ji.
    pub fn fuzzy_weights(&self) -> Vec<f32> {
        if self.distances.is_empty() {
            return Vec::new();
        }

        let offsets = self.adjacency.col_offsets();
        let values = self.adjacency.values();

        let mut rho = vec![0.0f32; self.n_nodes];
        let mut sigma = vec![1.0f32; self.n_nodes];

        for i in 0..self.n_nodes {
            let dists = &values[offsets[i]..offsets[i + 1]];
            if dists.is_empty() {
                continue;
            }
            rho[i] = dists.iter().cloned().fold(f32::INFINITY, f32::min);
            let target = (dists.len() as f32).log2().max(1.0);
            sigma[i] = smooth_knn_sigma(dists, rho[i], target);
        }

        self.edges
            .iter()
            .zip(self.distances.iter())
            .map(|(&(i, j), &d)| {
                let w_ij = directed_weight(d, rho[i], sigma[i]);
                let w_ji = directed_weight(d, rho[j], sigma[j]);
                w_ij + w_ji - w_ij * w_ji
            })
            .collect()
    }
}

/// Binary search for the per-point bandwidth:
/// sum_j exp(-max(0, d_j - rho) / sigma) = target
fn smooth_knn_sigma(dists: &[f32], rho: f32, target: f32) -> f32 {
    const TOLERANCE: f32 = 1e-5;
    const MAX_ITER: usize = 64;

    let mean_dist: f32 = dists.iter().sum::<f32>() / dists.len().max(1) as f32;
    let min_sigma = 1e-3 * mean_dist;

    let mut lo = 0.0f32;
    let mut hi = f32::INFINITY;
    let mut mid = 1.0f32;

    for _ in 0..MAX_ITER {
        let psum: f32 = dists
            .iter()
            .map(|&d| {
                let gap = d - rho;
                if gap > 0.0 {
                    (-gap / mid).exp()
                } else {
                    1.0
                }
            })
            .sum();

        if (psum - target).abs() < TOLERANCE {
            break;
        }
        if psum > target {
            hi = mid;
            mid = (lo + hi) / 2.0;
        } else {
            lo = mid;
            mid = if hi.is_infinite() { mid * 2.0 } else { (lo + hi) / 2.0 };
        }
    }

    mid.max(min_sigma)
}

fn directed_weight(d: f32, rho: f32, sigma: f32) -> f32 {
    if !d.is_finite() || sigma <= 0.0 {
        return 0.0;
    }
    let gap = d - rho;
    if gap <= 0.0 {
        1.0
    } else {
        (-gap / sigma).exp()
    }
}

pub(crate) fn create_jobs(ntot: usize, block_size: usize) -> Vec<(usize, usize)> {
    let block_size = if block_size == 0 {
        DEFAULT_BLOCK_SIZE
    } else {
        block_size
    };
    let nblock = ntot.div_ceil(block_size);
    (0..nblock)
        .map(|block| {
            let lb = block * block_size;
            let ub = ((block + 1) * block_size).min(ntot);
            (lb, ub)
        })
        .collect()
}
