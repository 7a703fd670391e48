use crate::dataset::Dataset;
use crate::plots;
use log::info;

pub struct QcArgs {
    /// Gene-name prefix marking mitochondrial genes (case sensitive)
    pub mito_prefix: Box<str>,
}

/// Per-cell quality metrics: total counts, detected genes, and the
/// percentage of counts from mitochondrial genes. Also flags mitochondrial
/// genes in the gene table and writes the two diagnostic plots.
pub fn run_qc(data: &mut Dataset, args: &QcArgs, out_dir: &str) -> anyhow::Result<()> {
    data.var.mito = data
        .var
        .names
        .iter()
        .map(|name| name.starts_with(args.mito_prefix.as_ref()))
        .collect();
    let n_mito = data.var.mito.iter().filter(|&&m| m).count();

    let nc = data.num_cells();
    let mut total_counts = vec![0.0f32; nc];
    let mut n_genes = vec![0u32; nc];
    let mut pct_mt = vec![0.0f32; nc];

    for (cell, col) in data.counts.col_iter().enumerate() {
        let mut total = 0.0f32;
        let mut mito = 0.0f32;
        let mut genes = 0u32;
        for (&row, &val) in col.row_indices().iter().zip(col.values()) {
            total += val;
            if val > 0.0 {
                genes += 1;
            }
            if data.var.mito[row] {
                mito += val;
            }
        }
        total_counts[cell] = total;
        n_genes[cell] = genes;
        pct_mt[cell] = if total > 0.0 { 100.0 * mito / total } else { 0.0 };
    }

    data.obs.total_counts = total_counts;
    data.obs.n_genes = n_genes;
    data.obs.pct_mt = pct_mt;

    info!(
        "QC over {} cells; {} mitochondrial genes ({}*)",
        nc, n_mito, args.mito_prefix
    );

    let n_genes_f: Vec<f32> = data.obs.n_genes.iter().map(|&x| x as f32).collect();
    plots::qc_distributions(
        &[
            ("total_counts", &data.obs.total_counts),
            ("n_genes", &n_genes_f),
            ("pct_mt", &data.obs.pct_mt),
        ],
        &format!("{}/qc_distributions.html", out_dir),
    )?;
    plots::qc_scatter(
        &data.obs.total_counts,
        &data.obs.n_genes,
        &data.obs.pct_mt,
        &format!("{}/qc_scatter.html", out_dir),
    )?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::tests::small_dataset;
    use approx::assert_relative_eq;

    fn run(data: &mut Dataset) {
        let dir = tempfile::tempdir().unwrap();
        let args = QcArgs {
            mito_prefix: "MT-".into(),
        };
        run_qc(data, &args, dir.path().to_str().unwrap()).unwrap();
    }

    #[test]
    fn per_cell_metrics() {
        // fixture: gene 0 is MT-CO1; cell 0 = {MT-CO1: 5, ACTB: 1}
        let mut data = small_dataset();
        run(&mut data);

        assert_relative_eq!(data.obs.total_counts[0], 6.0);
        assert_eq!(data.obs.n_genes[0], 2);
        assert_relative_eq!(data.obs.pct_mt[0], 100.0 * 5.0 / 6.0);

        // cell 1 = {MT-CO1: 2, CD3E: 4}
        assert_relative_eq!(data.obs.pct_mt[1], 100.0 * 2.0 / 6.0);
        assert!(data.validate().is_ok());
    }

    #[test]
    fn mito_flags_follow_the_prefix() {
        let mut data = small_dataset();
        run(&mut data);
        assert_eq!(data.var.mito, vec![true, false, false, false]);
    }
}
