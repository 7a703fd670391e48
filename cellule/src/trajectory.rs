use crate::dataset::{ClusterGraph, ClusterSet, Dataset};
use crate::plots;
use fnv::FnvHashMap;
use log::info;

pub struct TrajectoryArgs {
    /// Cell index anchoring the ordering
    pub root_cell: usize,
    pub cluster_set: ClusterSet,
}

/// Cluster-level trajectory abstraction.
///
/// The designated root cell is validated and recorded, then the cell
/// neighbour graph is collapsed onto the selected clustering: fuzzy edge
/// weight between two clusters, normalized by the expected weight for
/// their sizes, then rescaled so the strongest connection is 1.
pub fn run_trajectory(data: &mut Dataset, args: &TrajectoryArgs, out_dir: &str) -> anyhow::Result<()> {
    if args.root_cell >= data.num_cells() {
        anyhow::bail!(
            "root cell {} out of range for {} cells",
            args.root_cell,
            data.num_cells()
        );
    }
    data.artifacts.root_cell = Some(args.root_cell);

    let labels = data.clusters(args.cluster_set)?;
    let graph = data
        .artifacts
        .neighbors
        .as_ref()
        .ok_or_else(|| anyhow::anyhow!("neighbour graph is missing; run the embedding stages first"))?;

    let abstracted = abstract_graph(graph.n_nodes, &graph.edges, &graph.weights, labels)?;
    info!(
        "trajectory rooted at cell {} ({} clusters, {} connections)",
        args.root_cell,
        abstracted.n_clusters,
        abstracted.edges.len()
    );

    if let Some(xy) = &data.artifacts.embedding {
        plots::trajectory_graph(
            xy,
            labels,
            &abstracted,
            &format!("{}/trajectory.html", out_dir),
        )?;
    }

    data.artifacts.trajectory = Some(abstracted);
    Ok(())
}

/// Collapse a cell-level weighted graph onto cluster labels.
pub fn abstract_graph(
    n_nodes: usize,
    edges: &[(usize, usize)],
    weights: &[f32],
    labels: &[u32],
) -> anyhow::Result<ClusterGraph> {
    if labels.len() != n_nodes {
        anyhow::bail!("{} labels for {} graph nodes", labels.len(), n_nodes);
    }

    let mut sizes: FnvHashMap<u32, usize> = FnvHashMap::default();
    for &c in labels {
        *sizes.entry(c).or_insert(0) += 1;
    }

    let mut between: FnvHashMap<(u32, u32), f32> = FnvHashMap::default();
    for (&(i, j), &w) in edges.iter().zip(weights.iter()) {
        let (a, b) = (labels[i], labels[j]);
        if a != b {
            *between.entry((a.min(b), a.max(b))).or_insert(0.0) += w;
        }
    }

    // normalize by the expected edge mass for the cluster sizes
    let mut scaled: Vec<((u32, u32), f32)> = between
        .into_iter()
        .map(|((a, b), w)| {
            let expected = (sizes[&a] as f32 * sizes[&b] as f32).sqrt();
            ((a, b), w / expected)
        })
        .collect();
    scaled.sort_by_key(|&(ab, _)| ab);

    let peak = scaled.iter().map(|&(_, w)| w).fold(0.0f32, f32::max);
    let (edges, weights): (Vec<_>, Vec<_>) = scaled
        .into_iter()
        .map(|(ab, w)| (ab, if peak > 0.0 { w / peak } else { 0.0 }))
        .unzip();

    Ok(ClusterGraph {
        n_clusters: sizes.len(),
        edges,
        weights,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::tests::small_dataset;
    use crate::dataset::NeighborSet;

    #[test]
    fn root_cell_must_be_in_range() {
        let mut data = small_dataset();
        data.obs.fine_cluster = vec![0, 1, 0];
        let dir = tempfile::tempdir().unwrap();
        let out = run_trajectory(
            &mut data,
            &TrajectoryArgs {
                root_cell: 99,
                cluster_set: ClusterSet::Fine,
            },
            dir.path().to_str().unwrap(),
        );
        assert!(out.is_err());
    }

    #[test]
    fn cross_cluster_edges_are_aggregated() {
        // clusters {0,1} over 6 nodes with two bridges between them
        let labels = [0u32, 0, 0, 1, 1, 1];
        let edges = vec![(0usize, 1usize), (1, 2), (3, 4), (4, 5), (2, 3), (0, 5)];
        let weights = vec![1.0f32, 1.0, 1.0, 1.0, 0.4, 0.2];

        let graph = abstract_graph(6, &edges, &weights, &labels).unwrap();
        assert_eq!(graph.n_clusters, 2);
        assert_eq!(graph.edges, vec![(0, 1)]);
        // single inter-cluster connection rescales to 1
        assert_eq!(graph.weights, vec![1.0]);
    }

    #[test]
    fn records_the_root_and_the_graph() {
        let mut data = small_dataset();
        data.obs.fine_cluster = vec![0, 0, 1];
        data.artifacts.neighbors = Some(NeighborSet {
            n_nodes: 3,
            edges: vec![(0, 1), (1, 2)],
            weights: vec![1.0, 0.3],
        });

        let dir = tempfile::tempdir().unwrap();
        run_trajectory(
            &mut data,
            &TrajectoryArgs {
                root_cell: 0,
                cluster_set: ClusterSet::Fine,
            },
            dir.path().to_str().unwrap(),
        )
        .unwrap();

        assert_eq!(data.artifacts.root_cell, Some(0));
        let graph = data.artifacts.trajectory.as_ref().unwrap();
        assert_eq!(graph.n_clusters, 2);
        assert_eq!(graph.edges, vec![(0, 1)]);
        assert!(data.validate().is_ok());
    }
}
