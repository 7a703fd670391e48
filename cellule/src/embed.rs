use crate::dataset::{ClusterSet, Dataset, NeighborSet};
use crate::plots;
use cellule_matrix::knn::{NeighborGraph, NeighborGraphArgs};
use cellule_matrix::layout::{embed_graph, LayoutArgs};
use cellule_matrix::louvain::{cluster_graph, LouvainArgs};
use cellule_matrix::rsvd::RandomizedSvd;
use log::info;
use nalgebra::DMatrix;

pub struct EmbedArgs {
    /// Neighbours for the gene-space graph feeding the first clustering
    pub knn: usize,
    /// Neighbours for the graph rebuilt on the PCA coordinates
    pub knn_embedding: usize,
    pub num_components: usize,
    pub coarse_resolution: f32,
    pub block_size: usize,
    pub seed: u64,
}

/// First clustering and the principal-component embedding.
///
/// A kNN graph is built in the highly-variable-gene log space; Louvain on
/// its fuzzy weights gives the coarse labels; randomized SVD of the
/// mean-centered matrix gives the component coordinates.
pub fn run_pca(data: &mut Dataset, args: &EmbedArgs, out_dir: &str) -> anyhow::Result<()> {
    if !data.artifacts.normalized {
        anyhow::bail!("normalize the counts before embedding");
    }
    let dense = hvg_submatrix(data)?;
    info!(
        "embedding space: {} highly variable genes x {} cells",
        dense.nrows(),
        dense.ncols()
    );

    let graph = NeighborGraph::from_columns(
        &dense,
        &NeighborGraphArgs {
            knn: args.knn,
            block_size: args.block_size,
        },
    )?;
    let weights = graph.fuzzy_weights();
    let labels = cluster_graph(
        graph.num_nodes(),
        &graph.edges,
        &weights,
        &LouvainArgs {
            resolution: args.coarse_resolution,
            ..Default::default()
        },
    )?;
    let k = labels.iter().max().map(|&c| c + 1).unwrap_or(0);
    info!(
        "coarse clustering (resolution {}): {} clusters",
        args.coarse_resolution, k
    );
    data.obs.coarse_cluster = labels;

    // PCA: center gene rows, project cells onto the leading components
    let mut centered = dense;
    for mut row in centered.row_iter_mut() {
        let mu = row.mean();
        row.add_scalar_mut(-mu);
    }
    let rank = args.num_components.min(centered.nrows().min(centered.ncols()));
    let (_, s, v) = RandomizedSvd::new(rank, 5)
        .with_seed(args.seed)
        .compute(&centered)?;

    // components x cells, scaled by the singular values
    let mut pca = v.transpose();
    for (i, mut row) in pca.row_iter_mut().enumerate() {
        row *= s[i];
    }
    info!("PCA embedding: {} components x {} cells", pca.nrows(), pca.ncols());

    if pca.nrows() >= 2 {
        plots::embedding_by_cluster(
            &pca,
            data.clusters(ClusterSet::Coarse)?,
            "PCA colored by coarse cluster",
            "PC",
            &format!("{}/pca.html", out_dir),
        )?;
    }

    data.artifacts.pca = Some(pca);
    Ok(())
}

/// Nonlinear 2D embedding.
///
/// The neighbour graph is rebuilt on the PCA coordinates with a wider
/// neighbourhood, converted to fuzzy weights, and laid out in the plane;
/// the graph is kept for the summarization and trajectory stages.
pub fn run_umap(data: &mut Dataset, args: &EmbedArgs, out_dir: &str) -> anyhow::Result<()> {
    let pca = data
        .artifacts
        .pca
        .as_ref()
        .ok_or_else(|| anyhow::anyhow!("run the PCA stage before the 2D embedding"))?;

    let graph = NeighborGraph::from_columns(
        pca,
        &NeighborGraphArgs {
            knn: args.knn_embedding,
            block_size: args.block_size,
        },
    )?;
    let weights = graph.fuzzy_weights();

    let coords = embed_graph(
        graph.num_nodes(),
        &graph.edges,
        &weights,
        None,
        &LayoutArgs {
            seed: args.seed,
            ..Default::default()
        },
    )?;

    plots::embedding_by_cluster(
        &coords,
        data.clusters(ClusterSet::Coarse)?,
        "2D embedding colored by coarse cluster",
        "UMAP",
        &format!("{}/umap.html", out_dir),
    )?;

    data.artifacts.neighbors = Some(NeighborSet {
        n_nodes: graph.num_nodes(),
        edges: graph.edges,
        weights,
    });
    data.artifacts.embedding = Some(coords);
    Ok(())
}

/// Dense log-expression submatrix restricted to the highly variable genes
/// (genes x cells). Selection must have run first.
fn hvg_submatrix(data: &Dataset) -> anyhow::Result<DMatrix<f32>> {
    if data.var.highly_variable.len() != data.num_genes() {
        anyhow::bail!("highly variable genes are not flagged; run the selection stage first");
    }
    let rows: Vec<usize> = data
        .var
        .highly_variable
        .iter()
        .enumerate()
        .filter_map(|(g, &hv)| hv.then_some(g))
        .collect();
    if rows.is_empty() {
        anyhow::bail!("no genes are flagged highly variable");
    }

    let mut row_of = vec![usize::MAX; data.num_genes()];
    for (i, &g) in rows.iter().enumerate() {
        row_of[g] = i;
    }

    let mut dense = DMatrix::zeros(rows.len(), data.num_cells());
    for (cell, col) in data.counts.col_iter().enumerate() {
        for (&row, &val) in col.row_indices().iter().zip(col.values()) {
            if row_of[row] != usize::MAX {
                dense[(row_of[row], cell)] = val;
            }
        }
    }
    Ok(dense)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::Dataset;
    use crate::normalize::{run_normalize, NormalizeArgs};
    use cellule_matrix::mtx::csc_from_triplets;

    fn args() -> EmbedArgs {
        EmbedArgs {
            knn: 5,
            knn_embedding: 5,
            num_components: 4,
            coarse_resolution: 1.0,
            block_size: 100,
            seed: 7,
        }
    }

    /// 6 genes x 20 cells in two expression programs: cells 0-9 express
    /// genes 0-2, cells 10-19 express genes 3-5.
    fn two_population_dataset() -> Dataset {
        let mut triplets = vec![];
        for cell in 0..20u64 {
            let base = if cell < 10 { 0u64 } else { 3 };
            for offset in 0..3u64 {
                let bump = ((cell + offset) % 3) as f32;
                triplets.push((base + offset, cell, 20.0 + bump));
            }
        }
        let counts = csc_from_triplets(6, 20, &triplets).unwrap();
        let barcodes = (0..20).map(|i| format!("BC{}", i).into_boxed_str()).collect();
        let genes = (0..6).map(|i| format!("G{}", i).into_boxed_str()).collect();
        let mut data = Dataset::from_parts(counts, barcodes, genes).unwrap();
        data.var.highly_variable = vec![true; 6];
        run_normalize(&mut data, &NormalizeArgs { target_sum: 1e4 }).unwrap();
        data
    }

    #[test]
    fn coarse_clustering_separates_the_populations() {
        let mut data = two_population_dataset();
        let dir = tempfile::tempdir().unwrap();
        run_pca(&mut data, &args(), dir.path().to_str().unwrap()).unwrap();

        let labels = &data.obs.coarse_cluster;
        assert_eq!(labels.len(), 20);
        assert!(labels[..10].iter().all(|&c| c == labels[0]));
        assert!(labels[10..].iter().all(|&c| c == labels[10]));
        assert_ne!(labels[0], labels[10]);

        let pca = data.artifacts.pca.as_ref().unwrap();
        assert_eq!(pca.ncols(), 20);
        assert!(pca.nrows() <= 4);
        assert!(data.validate().is_ok());
    }

    #[test]
    fn umap_requires_pca() {
        let mut data = two_population_dataset();
        let dir = tempfile::tempdir().unwrap();
        assert!(run_umap(&mut data, &args(), dir.path().to_str().unwrap()).is_err());
    }

    #[test]
    fn umap_stores_embedding_and_graph() {
        let mut data = two_population_dataset();
        let dir = tempfile::tempdir().unwrap();
        run_pca(&mut data, &args(), dir.path().to_str().unwrap()).unwrap();
        run_umap(&mut data, &args(), dir.path().to_str().unwrap()).unwrap();

        let xy = data.artifacts.embedding.as_ref().unwrap();
        assert_eq!(xy.shape(), (2, 20));
        let graph = data.artifacts.neighbors.as_ref().unwrap();
        assert_eq!(graph.n_nodes, 20);
        assert_eq!(graph.edges.len(), graph.weights.len());
        assert!(data.validate().is_ok());
    }
}
