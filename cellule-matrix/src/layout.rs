use log::info;
use nalgebra::DMatrix;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Curve parameters fitted for min_dist = 0.1, spread = 1.0.
const CURVE_A: f32 = 1.577;
const CURVE_B: f32 = 0.895;

pub struct LayoutArgs {
    /// Number of optimization epochs.
    pub num_epochs: usize,
    /// Initial learning rate, decayed linearly to zero.
    pub learning_rate: f32,
    /// Negative samples drawn per positive edge update.
    pub negative_samples: usize,
    pub seed: u64,
}

impl Default for LayoutArgs {
    fn default() -> Self {
        Self {
            num_epochs: 200,
            learning_rate: 1.0,
            negative_samples: 5,
            seed: 42,
        }
    }
}

/// Two-dimensional layout of a weighted neighbour graph by stochastic
/// gradient descent on the fuzzy cross-entropy, in the manner of UMAP
/// (McInnes et al. 2018). Heavier edges are sampled more often.
///
/// * `n_nodes` - number of graph nodes
/// * `edges` - canonical edge list (i < j)
/// * `weights` - membership weights in (0, 1] parallel to `edges`
/// * `init` - optional 2 x n initial coordinates; random when `None`
///
/// Returns a 2 x n matrix, one embedded point per column.
pub fn embed_graph(
    n_nodes: usize,
    edges: &[(usize, usize)],
    weights: &[f32],
    init: Option<&DMatrix<f32>>,
    args: &LayoutArgs,
) -> anyhow::Result<DMatrix<f32>> {
    if edges.len() != weights.len() {
        anyhow::bail!(
            "edge list ({}) and weights ({}) differ in length",
            edges.len(),
            weights.len()
        );
    }
    if n_nodes == 0 {
        return Ok(DMatrix::zeros(2, 0));
    }

    let mut rng = StdRng::seed_from_u64(args.seed);

    let mut coords = match init {
        Some(x0) => {
            if x0.nrows() != 2 || x0.ncols() != n_nodes {
                anyhow::bail!(
                    "initial coordinates are {} x {}, expected 2 x {}",
                    x0.nrows(),
                    x0.ncols(),
                    n_nodes
                );
            }
            x0.clone()
        }
        None => DMatrix::from_fn(2, n_nodes, |_, _| 20.0 * (rng.random::<f32>() - 0.5)),
    };

    if edges.is_empty() {
        return Ok(coords);
    }

    let w_max = weights.iter().cloned().fold(f32::MIN, f32::max).max(1e-6);

    // epochs between updates per edge, proportional to 1/weight
    let epochs_per_sample: Vec<f32> = weights.iter().map(|&w| w_max / w.max(1e-6)).collect();
    let mut epoch_of_next_sample = epochs_per_sample.clone();

    info!(
        "embedding {} nodes / {} edges over {} epochs",
        n_nodes,
        edges.len(),
        args.num_epochs
    );

    for epoch in 0..args.num_epochs {
        let alpha = args.learning_rate * (1.0 - epoch as f32 / args.num_epochs as f32);

        for (e, &(i, j)) in edges.iter().enumerate() {
            if epoch_of_next_sample[e] > epoch as f32 {
                continue;
            }
            epoch_of_next_sample[e] += epochs_per_sample[e];

            attract(&mut coords, i, j, alpha);
            for _ in 0..args.negative_samples {
                let k = rng.random_range(0..n_nodes);
                if k != i {
                    repel(&mut coords, i, k, alpha);
                }
            }
        }
    }

    Ok(coords)
}

fn clip(x: f32) -> f32 {
    x.clamp(-4.0, 4.0)
}

fn attract(coords: &mut DMatrix<f32>, i: usize, j: usize, alpha: f32) {
    let dx = coords[(0, i)] - coords[(0, j)];
    let dy = coords[(1, i)] - coords[(1, j)];
    let d2 = dx * dx + dy * dy;
    if d2 <= 0.0 {
        return;
    }

    let coeff = -2.0 * CURVE_A * CURVE_B * d2.powf(CURVE_B - 1.0) / (1.0 + CURVE_A * d2.powf(CURVE_B));

    let gx = clip(coeff * dx) * alpha;
    let gy = clip(coeff * dy) * alpha;
    coords[(0, i)] += gx;
    coords[(1, i)] += gy;
    coords[(0, j)] -= gx;
    coords[(1, j)] -= gy;
}

fn repel(coords: &mut DMatrix<f32>, i: usize, k: usize, alpha: f32) {
    let dx = coords[(0, i)] - coords[(0, k)];
    let dy = coords[(1, i)] - coords[(1, k)];
    let d2 = dx * dx + dy * dy;

    let coeff = if d2 > 0.0 {
        2.0 * CURVE_B / ((0.001 + d2) * (1.0 + CURVE_A * d2.powf(CURVE_B)))
    } else {
        // coincident points get a fixed kick apart
        4.0
    };

    coords[(0, i)] += clip(coeff * dx) * alpha;
    coords[(1, i)] += clip(coeff * dy) * alpha;
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Two 5-cliques with heavy internal edges and one light bridge.
    fn two_communities() -> (usize, Vec<(usize, usize)>, Vec<f32>) {
        let mut edges = vec![];
        let mut weights = vec![];
        for block in [0usize, 5] {
            for i in block..block + 5 {
                for j in (i + 1)..block + 5 {
                    edges.push((i, j));
                    weights.push(1.0);
                }
            }
        }
        edges.push((4, 5));
        weights.push(0.01);
        (10, edges, weights)
    }

    fn centroid(coords: &DMatrix<f32>, nodes: std::ops::Range<usize>) -> (f32, f32) {
        let n = nodes.len() as f32;
        let (mut cx, mut cy) = (0.0, 0.0);
        for i in nodes {
            cx += coords[(0, i)];
            cy += coords[(1, i)];
        }
        (cx / n, cy / n)
    }

    #[test]
    fn communities_separate_in_the_plane() {
        let (n, edges, weights) = two_communities();
        let coords = embed_graph(n, &edges, &weights, None, &LayoutArgs::default()).unwrap();
        assert_eq!(coords.shape(), (2, n));

        let (ax, ay) = centroid(&coords, 0..5);
        let (bx, by) = centroid(&coords, 5..10);
        let between = ((ax - bx).powi(2) + (ay - by).powi(2)).sqrt();

        // mean within-community spread around each centroid
        let mut within = 0.0;
        for i in 0..5 {
            within += ((coords[(0, i)] - ax).powi(2) + (coords[(1, i)] - ay).powi(2)).sqrt();
        }
        for i in 5..10 {
            within += ((coords[(0, i)] - bx).powi(2) + (coords[(1, i)] - by).powi(2)).sqrt();
        }
        within /= 10.0;

        assert!(
            between > within,
            "communities did not separate: between {} vs within {}",
            between,
            within
        );
    }

    #[test]
    fn same_seed_is_reproducible() {
        let (n, edges, weights) = two_communities();
        let a = embed_graph(n, &edges, &weights, None, &LayoutArgs::default()).unwrap();
        let b = embed_graph(n, &edges, &weights, None, &LayoutArgs::default()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn initial_coordinates_must_match_shape() {
        let init = DMatrix::zeros(2, 3);
        let out = embed_graph(5, &[(0, 1)], &[1.0], Some(&init), &LayoutArgs::default());
        assert!(out.is_err());
    }

    #[test]
    fn empty_graph_yields_empty_layout() {
        let coords = embed_graph(0, &[], &[], None, &LayoutArgs::default()).unwrap();
        assert_eq!(coords.ncols(), 0);
    }
}
