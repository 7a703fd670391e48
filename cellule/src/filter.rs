use crate::dataset::Dataset;
use cellule_matrix::stat::RunningStatistics;
use log::info;

pub struct FilterArgs {
    pub max_genes: u32,
    pub max_counts: f32,
    pub max_pct_mt: f32,
    pub min_cells: usize,
}

/// Flag outlier cells by three independent strict thresholds and remove
/// genes detected in too few cells.
///
/// The flags are pass-through: no cell is removed here, downstream stages
/// see every cell. Boundary values equal to a threshold are not flagged.
pub fn run_filter(data: &mut Dataset, args: &FilterArgs) -> anyhow::Result<()> {
    if data.obs.total_counts.len() != data.num_cells() {
        anyhow::bail!("QC metrics are missing; run the QC stage first");
    }

    data.obs.outlier_n_genes = data.obs.n_genes.iter().map(|&x| x > args.max_genes).collect();
    data.obs.outlier_total = data
        .obs
        .total_counts
        .iter()
        .map(|&x| x > args.max_counts)
        .collect();
    data.obs.outlier_mt = data.obs.pct_mt.iter().map(|&x| x > args.max_pct_mt).collect();

    let count = |flags: &[bool]| flags.iter().filter(|&&f| f).count();
    info!(
        "outlier cells: {} by gene count (> {}), {} by total counts (> {}), {} by mito (> {}%)",
        count(&data.obs.outlier_n_genes),
        args.max_genes,
        count(&data.obs.outlier_total),
        args.max_counts,
        count(&data.obs.outlier_mt),
        args.max_pct_mt,
    );

    // unconditional, irreversible: drop genes seen in < min_cells cells
    let mut stat = RunningStatistics::new(data.num_genes());
    for col in data.counts.col_iter() {
        stat.add_sparse(col.row_indices(), col.values());
    }
    let keep: Vec<bool> = stat
        .count_positives()
        .iter()
        .map(|&n| n as usize >= args.min_cells)
        .collect();
    let before = data.num_genes();
    let dropped = data.retain_genes(&keep)?;
    info!(
        "removed {} of {} genes detected in fewer than {} cells",
        dropped, before, args.min_cells
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::tests::small_dataset;
    use crate::qc::{run_qc, QcArgs};

    fn qc(data: &mut Dataset) {
        let dir = tempfile::tempdir().unwrap();
        run_qc(
            data,
            &QcArgs {
                mito_prefix: "MT-".into(),
            },
            dir.path().to_str().unwrap(),
        )
        .unwrap();
    }

    #[test]
    fn boundary_values_are_not_flagged() {
        let mut data = small_dataset();
        qc(&mut data);
        // force exact boundary and one cell past it
        data.obs.pct_mt = vec![20.0, 20.0001, 5.0];

        run_filter(
            &mut data,
            &FilterArgs {
                max_genes: 5000,
                max_counts: 2500.0,
                max_pct_mt: 20.0,
                min_cells: 0,
            },
        )
        .unwrap();

        assert_eq!(data.obs.outlier_mt, vec![false, true, false]);
    }

    #[test]
    fn flags_do_not_drop_cells() {
        let mut data = small_dataset();
        qc(&mut data);
        run_filter(
            &mut data,
            &FilterArgs {
                max_genes: 1,
                max_counts: 1.0,
                max_pct_mt: 0.0,
                min_cells: 0,
            },
        )
        .unwrap();
        assert_eq!(data.num_cells(), 3);
        assert!(data.obs.outlier_total.iter().all(|&f| f));
    }

    #[test]
    fn gene_filter_is_monotonic() {
        let mut data = small_dataset();
        qc(&mut data);
        let before = data.num_genes();

        // MT-CO1 appears in 3 cells, every other gene in 1
        run_filter(
            &mut data,
            &FilterArgs {
                max_genes: 5000,
                max_counts: 2500.0,
                max_pct_mt: 20.0,
                min_cells: 2,
            },
        )
        .unwrap();

        assert!(data.num_genes() <= before);
        assert_eq!(data.num_genes(), 1);
        assert_eq!(data.var.names[0].as_ref(), "MT-CO1");
        assert!(data.validate().is_ok());
    }

    #[test]
    fn requires_qc_first() {
        let mut data = small_dataset();
        let out = run_filter(
            &mut data,
            &FilterArgs {
                max_genes: 5000,
                max_counts: 2500.0,
                max_pct_mt: 20.0,
                min_cells: 3,
            },
        );
        assert!(out.is_err());
    }
}
