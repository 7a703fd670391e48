use crate::dataset::Dataset;
use crate::plots;
use cellule_matrix::louvain::{cluster_graph, LouvainArgs};
use log::info;
use nalgebra_sparse::CscMatrix;
use std::collections::BTreeMap;

pub struct SummarizeArgs {
    pub fine_resolution: f32,
    /// Genes listed per cluster, by descending summed expression
    pub num_top_genes: usize,
}

/// Second clustering plus per-cluster expression summaries.
///
/// Louvain re-runs on the stored neighbour graph at the summarization
/// resolution, giving the fine labels (kept separately from the coarse
/// ones). Each cluster gets its top genes by summed expression and its
/// single top gene as representative, broadcast to every member cell.
pub fn run_summarize(data: &mut Dataset, args: &SummarizeArgs, out_dir: &str) -> anyhow::Result<()> {
    let graph = data
        .artifacts
        .neighbors
        .as_ref()
        .ok_or_else(|| anyhow::anyhow!("neighbour graph is missing; run the embedding stages first"))?;

    let labels = cluster_graph(
        graph.n_nodes,
        &graph.edges,
        &graph.weights,
        &LouvainArgs {
            resolution: args.fine_resolution,
            ..Default::default()
        },
    )?;
    let k = labels.iter().max().map(|&c| c + 1).unwrap_or(0);
    info!(
        "fine clustering (resolution {}): {} clusters",
        args.fine_resolution, k
    );

    let top_genes = top_genes_by_cluster(&data.counts, &data.var.names, &labels, args.num_top_genes);
    log_marker_table(&top_genes);

    // representative gene: the first of each cluster's top list
    let representative: BTreeMap<u32, &Box<str>> = top_genes
        .iter()
        .filter_map(|(&c, genes)| genes.first().map(|g| (c, g)))
        .collect();
    data.obs.representative_gene = labels
        .iter()
        .map(|c| {
            representative
                .get(c)
                .map(|g| (*g).clone())
                .unwrap_or_else(|| "NA".into())
        })
        .collect();

    data.obs.fine_cluster = labels;
    data.artifacts.top_genes = top_genes;

    if let Some(xy) = &data.artifacts.embedding {
        plots::embedding_by_gene_name(
            xy,
            &data.obs.representative_gene,
            "2D embedding colored by representative gene",
            "UMAP",
            &format!("{}/representative_genes.html", out_dir),
        )?;
    }
    Ok(())
}

/// Sum expression per gene over each cluster's member cells and keep the
/// `num_top` highest, descending.
pub fn top_genes_by_cluster(
    counts: &CscMatrix<f32>,
    gene_names: &[Box<str>],
    labels: &[u32],
    num_top: usize,
) -> BTreeMap<u32, Vec<Box<str>>> {
    let ng = counts.nrows();
    let mut sums: BTreeMap<u32, Vec<f32>> = BTreeMap::new();

    for (cell, col) in counts.col_iter().enumerate() {
        let sum = sums.entry(labels[cell]).or_insert_with(|| vec![0.0; ng]);
        for (&row, &val) in col.row_indices().iter().zip(col.values()) {
            sum[row] += val;
        }
    }

    sums.into_iter()
        .map(|(cluster, sum)| {
            let mut order: Vec<usize> = (0..ng).collect();
            order.sort_by(|&a, &b| {
                sum[b].partial_cmp(&sum[a]).unwrap_or(std::cmp::Ordering::Equal)
            });
            let genes = order
                .into_iter()
                .take(num_top)
                .map(|g| gene_names[g].clone())
                .collect();
            (cluster, genes)
        })
        .collect()
}

/// Row-aligned table of the top genes, one column per cluster.
fn log_marker_table(top_genes: &BTreeMap<u32, Vec<Box<str>>>) {
    let width = top_genes
        .values()
        .flatten()
        .map(|g| g.len())
        .max()
        .unwrap_or(4)
        .max(4);
    let depth = top_genes.values().map(|g| g.len()).max().unwrap_or(0);

    let header: Vec<String> = top_genes
        .keys()
        .map(|c| format!("{:>w$}", format!("c{}", c), w = width))
        .collect();
    info!("rank {}", header.join(" "));

    for rank in 0..depth {
        let row: Vec<String> = top_genes
            .values()
            .map(|genes| {
                let name = genes.get(rank).map(|g| g.as_ref()).unwrap_or("");
                format!("{:>w$}", name, w = width)
            })
            .collect();
        info!("{:>4} {}", rank + 1, row.join(" "));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::NeighborSet;
    use cellule_matrix::mtx::csc_from_triplets;

    fn names(n: usize) -> Vec<Box<str>> {
        (0..n).map(|i| format!("G{}", i).into_boxed_str()).collect()
    }

    #[test]
    fn top_lists_are_sorted_and_capped() {
        // 5 genes x 4 cells, one cluster
        let triplets = vec![
            (0u64, 0u64, 1.0f32),
            (1, 1, 5.0),
            (2, 2, 3.0),
            (3, 3, 2.0),
            (4, 3, 4.0),
        ];
        let counts = csc_from_triplets(5, 4, &triplets).unwrap();
        let top = top_genes_by_cluster(&counts, &names(5), &[0, 0, 0, 0], 3);

        let genes: Vec<&str> = top[&0].iter().map(|g| g.as_ref()).collect();
        assert_eq!(genes, vec!["G1", "G4", "G2"]);
        assert!(top[&0].len() <= 3);
    }

    #[test]
    fn requesting_more_than_the_gene_count_caps_at_the_gene_count() {
        let counts = csc_from_triplets(2, 2, &[(0, 0, 1.0), (1, 1, 2.0)]).unwrap();
        let top = top_genes_by_cluster(&counts, &names(2), &[0, 0], 30);
        assert_eq!(top[&0].len(), 2);
    }

    #[test]
    fn representative_gene_is_broadcast_per_cluster() {
        // 3 genes x 6 cells; cells 0-2 express G0, cells 3-5 express G2
        let mut triplets = vec![];
        for cell in 0..6u64 {
            let gene = if cell < 3 { 0u64 } else { 2 };
            triplets.push((gene, cell, 10.0f32));
            triplets.push((1, cell, 1.0));
        }
        let counts = csc_from_triplets(3, 6, &triplets).unwrap();
        let barcodes = (0..6).map(|i| format!("BC{}", i).into_boxed_str()).collect();
        let mut data = Dataset::from_parts(counts, barcodes, names(3)).unwrap();

        // dense-enough graph with a clean two-community split
        let edges = vec![(0, 1), (1, 2), (0, 2), (3, 4), (4, 5), (3, 5), (2, 3)];
        let weights = vec![1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 0.01];
        data.artifacts.neighbors = Some(NeighborSet {
            n_nodes: 6,
            edges,
            weights,
        });

        let dir = tempfile::tempdir().unwrap();
        run_summarize(
            &mut data,
            &SummarizeArgs {
                fine_resolution: 1.0,
                num_top_genes: 2,
            },
            dir.path().to_str().unwrap(),
        )
        .unwrap();

        assert_eq!(data.obs.fine_cluster.len(), 6);
        for (cell, &c) in data.obs.fine_cluster.iter().enumerate() {
            assert_eq!(
                data.obs.representative_gene[cell],
                data.artifacts.top_genes[&c][0],
                "cell {} does not carry its cluster's top gene",
                cell
            );
        }
        // the two populations get their own representative
        assert_eq!(data.obs.representative_gene[0].as_ref(), "G0");
        assert_eq!(data.obs.representative_gene[5].as_ref(), "G2");
        assert!(data.validate().is_ok());
    }
}
