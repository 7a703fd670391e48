use nalgebra::DMatrix;
use nalgebra_sparse::{CooMatrix, CscMatrix};
use std::collections::BTreeMap;

/// Which of the two clusterings feeds a downstream stage.
#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum ClusterSet {
    /// Labels from the graph clustering run before PCA (higher resolution)
    Coarse,
    /// Labels from the summarization clustering (lower resolution)
    Fine,
}

/// Per-cell annotation columns. Empty vectors mean the producing stage has
/// not run yet; once filled, a column's length must equal the cell count.
pub struct ObsTable {
    pub barcodes: Vec<Box<str>>,
    pub total_counts: Vec<f32>,
    pub n_genes: Vec<u32>,
    pub pct_mt: Vec<f32>,
    pub outlier_n_genes: Vec<bool>,
    pub outlier_total: Vec<bool>,
    pub outlier_mt: Vec<bool>,
    pub coarse_cluster: Vec<u32>,
    pub fine_cluster: Vec<u32>,
    pub representative_gene: Vec<Box<str>>,
}

impl ObsTable {
    fn new(barcodes: Vec<Box<str>>) -> Self {
        Self {
            barcodes,
            total_counts: vec![],
            n_genes: vec![],
            pct_mt: vec![],
            outlier_n_genes: vec![],
            outlier_total: vec![],
            outlier_mt: vec![],
            coarse_cluster: vec![],
            fine_cluster: vec![],
            representative_gene: vec![],
        }
    }
}

/// Per-gene annotation columns, same empty-until-filled convention.
pub struct VarTable {
    pub names: Vec<Box<str>>,
    pub mito: Vec<bool>,
    pub mean_counts: Vec<f32>,
    pub residual_variance: Vec<f32>,
    pub highly_variable: Vec<bool>,
}

impl VarTable {
    fn new(names: Vec<Box<str>>) -> Self {
        Self {
            names,
            mito: vec![],
            mean_counts: vec![],
            residual_variance: vec![],
            highly_variable: vec![],
        }
    }
}

/// One ranked marker gene for a cluster.
#[derive(Debug, Clone)]
pub struct MarkerGene {
    pub gene: Box<str>,
    pub auc: f32,
    pub log2_fold_change: f32,
    pub z: f32,
    pub p_value: f64,
    pub p_adjusted: f64,
}

/// Cell-level neighbour graph kept for the summarization and trajectory
/// stages; `weights` are fuzzy membership weights parallel to `edges`.
pub struct NeighborSet {
    pub n_nodes: usize,
    pub edges: Vec<(usize, usize)>,
    pub weights: Vec<f32>,
}

/// Cluster-level abstracted graph; edge weights scaled to (0, 1].
pub struct ClusterGraph {
    pub n_clusters: usize,
    pub edges: Vec<(u32, u32)>,
    pub weights: Vec<f32>,
}

/// Derived artifacts accumulated across stages.
#[derive(Default)]
pub struct Artifacts {
    /// components x cells
    pub pca: Option<DMatrix<f32>>,
    /// 2 x cells
    pub embedding: Option<DMatrix<f32>>,
    pub neighbors: Option<NeighborSet>,
    /// top genes per cluster, descending by summed expression
    pub top_genes: BTreeMap<u32, Vec<Box<str>>>,
    /// marker ranking keyed by cluster label
    pub ranking: BTreeMap<u32, Vec<MarkerGene>>,
    pub root_cell: Option<usize>,
    pub trajectory: Option<ClusterGraph>,
    /// set once the count matrix holds normalized log values
    pub normalized: bool,
}

/// The one mutable dataset threaded through the pipeline stages.
/// Genes are matrix rows, cells are columns.
pub struct Dataset {
    pub counts: CscMatrix<f32>,
    pub obs: ObsTable,
    pub var: VarTable,
    pub artifacts: Artifacts,
}

impl Dataset {
    pub fn from_parts(
        counts: CscMatrix<f32>,
        barcodes: Vec<Box<str>>,
        gene_names: Vec<Box<str>>,
    ) -> anyhow::Result<Self> {
        if counts.ncols() != barcodes.len() {
            anyhow::bail!(
                "{} matrix columns vs {} barcodes",
                counts.ncols(),
                barcodes.len()
            );
        }
        if counts.nrows() != gene_names.len() {
            anyhow::bail!(
                "{} matrix rows vs {} gene names",
                counts.nrows(),
                gene_names.len()
            );
        }
        Ok(Self {
            counts,
            obs: ObsTable::new(barcodes),
            var: VarTable::new(gene_names),
            artifacts: Artifacts::default(),
        })
    }

    pub fn num_cells(&self) -> usize {
        self.counts.ncols()
    }

    pub fn num_genes(&self) -> usize {
        self.counts.nrows()
    }

    /// Cell and gene counts must agree across the matrix, both annotation
    /// tables, and any embedding artifacts. Called after every stage.
    pub fn validate(&self) -> anyhow::Result<()> {
        let nc = self.num_cells();
        let ng = self.num_genes();

        let obs_cols: [(&str, usize); 10] = [
            ("barcodes", self.obs.barcodes.len()),
            ("total_counts", self.obs.total_counts.len()),
            ("n_genes", self.obs.n_genes.len()),
            ("pct_mt", self.obs.pct_mt.len()),
            ("outlier_n_genes", self.obs.outlier_n_genes.len()),
            ("outlier_total", self.obs.outlier_total.len()),
            ("outlier_mt", self.obs.outlier_mt.len()),
            ("coarse_cluster", self.obs.coarse_cluster.len()),
            ("fine_cluster", self.obs.fine_cluster.len()),
            ("representative_gene", self.obs.representative_gene.len()),
        ];
        for (name, len) in obs_cols {
            if len != 0 && len != nc {
                anyhow::bail!("obs column {} has {} rows, expected {}", name, len, nc);
            }
        }

        let var_cols: [(&str, usize); 5] = [
            ("names", self.var.names.len()),
            ("mito", self.var.mito.len()),
            ("mean_counts", self.var.mean_counts.len()),
            ("residual_variance", self.var.residual_variance.len()),
            ("highly_variable", self.var.highly_variable.len()),
        ];
        for (name, len) in var_cols {
            if len != 0 && len != ng {
                anyhow::bail!("var column {} has {} rows, expected {}", name, len, ng);
            }
        }

        if let Some(pca) = &self.artifacts.pca {
            if pca.ncols() != nc {
                anyhow::bail!("PCA holds {} cells, expected {}", pca.ncols(), nc);
            }
        }
        if let Some(xy) = &self.artifacts.embedding {
            if xy.nrows() != 2 || xy.ncols() != nc {
                anyhow::bail!(
                    "embedding is {} x {}, expected 2 x {}",
                    xy.nrows(),
                    xy.ncols(),
                    nc
                );
            }
        }
        if let Some(graph) = &self.artifacts.neighbors {
            if graph.n_nodes != nc {
                anyhow::bail!("neighbour graph has {} nodes, expected {}", graph.n_nodes, nc);
            }
        }
        Ok(())
    }

    /// The only row-dropping mutation: keep genes where `keep` is true,
    /// preserving order, and filter every var column in lockstep.
    ///
    /// Returns the number of genes removed.
    pub fn retain_genes(&mut self, keep: &[bool]) -> anyhow::Result<usize> {
        let ng = self.num_genes();
        if keep.len() != ng {
            anyhow::bail!("keep mask has {} entries for {} genes", keep.len(), ng);
        }

        let mut new_row = vec![usize::MAX; ng];
        let mut kept = 0;
        for (row, &flag) in keep.iter().enumerate() {
            if flag {
                new_row[row] = kept;
                kept += 1;
            }
        }

        let mut coo = CooMatrix::new(kept, self.num_cells());
        for (cell, col) in self.counts.col_iter().enumerate() {
            for (&row, &val) in col.row_indices().iter().zip(col.values()) {
                if keep[row] {
                    coo.push(new_row[row], cell, val);
                }
            }
        }
        self.counts = CscMatrix::from(&coo);

        fn filter_column<T: Clone>(column: &mut Vec<T>, keep: &[bool]) {
            if column.is_empty() {
                return;
            }
            *column = column
                .iter()
                .zip(keep.iter())
                .filter(|(_, &flag)| flag)
                .map(|(v, _)| v.clone())
                .collect();
        }
        filter_column(&mut self.var.names, keep);
        filter_column(&mut self.var.mito, keep);
        filter_column(&mut self.var.mean_counts, keep);
        filter_column(&mut self.var.residual_variance, keep);
        filter_column(&mut self.var.highly_variable, keep);

        Ok(ng - kept)
    }

    /// The selected clustering's labels; an error when that clustering has
    /// not been computed yet.
    pub fn clusters(&self, which: ClusterSet) -> anyhow::Result<&[u32]> {
        let labels = match which {
            ClusterSet::Coarse => &self.obs.coarse_cluster,
            ClusterSet::Fine => &self.obs.fine_cluster,
        };
        if labels.len() != self.num_cells() {
            anyhow::bail!("{:?} clustering has not been computed", which);
        }
        Ok(labels)
    }
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use cellule_matrix::mtx::csc_from_triplets;

    /// 4 genes x 3 cells fixture shared by stage tests.
    pub fn small_dataset() -> Dataset {
        let triplets = vec![
            (0u64, 0u64, 5.0f32),
            (1, 0, 1.0),
            (0, 1, 2.0),
            (2, 1, 4.0),
            (3, 2, 3.0),
            (0, 2, 1.0),
        ];
        let counts = csc_from_triplets(4, 3, &triplets).unwrap();
        let barcodes = ["AAA-1", "CCC-1", "GGG-1"]
            .map(|x| x.to_string().into_boxed_str())
            .to_vec();
        let genes = ["MT-CO1", "ACTB", "CD3E", "LYZ"]
            .map(|x| x.to_string().into_boxed_str())
            .to_vec();
        Dataset::from_parts(counts, barcodes, genes).unwrap()
    }

    #[test]
    fn from_parts_checks_dimensions() {
        let counts = csc_from_triplets(2, 2, &[(0, 0, 1.0)]).unwrap();
        let two = vec!["a".into(), "b".into()];
        let three = vec!["a".into(), "b".into(), "c".into()];
        assert!(Dataset::from_parts(counts, two, three).is_err());
    }

    #[test]
    fn validate_rejects_short_columns() {
        let mut data = small_dataset();
        assert!(data.validate().is_ok());
        data.obs.total_counts = vec![1.0];
        assert!(data.validate().is_err());
    }

    #[test]
    fn retain_genes_filters_matrix_and_var_together() {
        let mut data = small_dataset();
        data.var.mito = vec![true, false, false, false];

        let dropped = data.retain_genes(&[true, false, true, true]).unwrap();
        assert_eq!(dropped, 1);
        assert_eq!(data.num_genes(), 3);
        assert_eq!(data.var.names.len(), 3);
        assert_eq!(data.var.names[1].as_ref(), "CD3E");
        assert_eq!(data.var.mito, vec![true, false, false]);
        assert!(data.validate().is_ok());
    }

    #[test]
    fn clusters_requires_the_selected_set() {
        let mut data = small_dataset();
        assert!(data.clusters(ClusterSet::Fine).is_err());
        data.obs.fine_cluster = vec![0, 1, 0];
        assert_eq!(data.clusters(ClusterSet::Fine).unwrap(), &[0, 1, 0]);
        assert!(data.clusters(ClusterSet::Coarse).is_err());
    }
}
