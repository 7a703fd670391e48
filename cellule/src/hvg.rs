use crate::dataset::Dataset;
use crate::plots;
use cellule_matrix::stat::RunningStatistics;
use log::info;

pub struct HvgArgs {
    /// How many genes to flag as highly variable
    pub num_genes: usize,
    /// Externally supplied marker genes highlighted in the diagnostic plot
    pub highlight: Vec<Box<str>>,
}

const TREND_BINS: usize = 20;

/// Flag the most variable genes by a residual-variance statistic that is
/// robust to the mean-variance scaling of count data.
///
/// Per gene, values are log1p-transformed and standardized against a
/// binned mean-to-dispersion trend; standardized values are clipped at
/// sqrt(n) before the residual variance is accumulated.
pub fn run_hvg(data: &mut Dataset, args: &HvgArgs, out_dir: &str) -> anyhow::Result<()> {
    let ng = data.num_genes();
    let nc = data.num_cells();
    if ng == 0 || nc < 2 {
        anyhow::bail!("need at least one gene and two cells ({} x {})", ng, nc);
    }

    // pass 1: per-gene mean/sd of log1p values (zeros contribute zero)
    let mut log_stat = RunningStatistics::new(ng);
    let mut raw_stat = RunningStatistics::new(ng);
    let mut log_values: Vec<f32> = vec![];
    for col in data.counts.col_iter() {
        log_values.clear();
        log_values.extend(col.values().iter().map(|&v| v.ln_1p()));
        log_stat.add_sparse(col.row_indices(), &log_values);
        raw_stat.add_sparse(col.row_indices(), col.values());
    }
    let n = nc as f32;
    let mean: Vec<f32> = log_stat.mean().iter().cloned().collect();
    let sd: Vec<f32> = log_stat.variance().iter().map(|&v| v.sqrt()).collect();

    let expected_sd = trend_by_bins(&mean, &sd);

    // pass 2: variance of clipped standardized values; the zero entries of
    // a gene all standardize to the same value, so only a count is needed
    let clip = n.sqrt();
    let mut residual = vec![0.0f32; ng];
    let mut nnz = vec![0usize; ng];
    for col in data.counts.col_iter() {
        for (&row, &val) in col.row_indices().iter().zip(col.values()) {
            nnz[row] += 1;
            if expected_sd[row] > 0.0 {
                let z = ((val.ln_1p() - mean[row]) / expected_sd[row]).clamp(-clip, clip);
                residual[row] += z * z;
            }
        }
    }
    for g in 0..ng {
        if expected_sd[g] > 0.0 {
            let z0 = ((0.0 - mean[g]) / expected_sd[g]).clamp(-clip, clip);
            residual[g] += z0 * z0 * (nc - nnz[g]) as f32;
            residual[g] /= n - 1.0;
        }
    }

    let mut order: Vec<usize> = (0..ng).collect();
    order.sort_by(|&a, &b| {
        residual[b]
            .partial_cmp(&residual[a])
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    let cutoff = args.num_genes.min(ng);
    let mut highly_variable = vec![false; ng];
    for &g in order.iter().take(cutoff) {
        highly_variable[g] = true;
    }

    data.var.mean_counts = raw_stat.mean().iter().cloned().collect();
    data.var.residual_variance = residual;
    data.var.highly_variable = highly_variable;

    info!("flagged {} of {} genes as highly variable", cutoff, ng);

    let highlighted: Vec<bool> = data
        .var
        .names
        .iter()
        .map(|name| args.highlight.iter().any(|h| h.as_ref() == name.as_ref()))
        .collect();
    plots::mean_variance(
        &data.var.mean_counts,
        &data.var.residual_variance,
        &data.var.highly_variable,
        &highlighted,
        &format!("{}/highly_variable.html", out_dir),
    )?;

    Ok(())
}

/// Expected dispersion per gene: genes are binned by mean and each bin
/// contributes its median sd.
fn trend_by_bins(mean: &[f32], sd: &[f32]) -> Vec<f32> {
    let lo = mean.iter().cloned().fold(f32::INFINITY, f32::min);
    let hi = mean.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
    let span = (hi - lo).max(1e-12);

    let bin_of = |m: f32| {
        (((m - lo) / span * TREND_BINS as f32) as usize).min(TREND_BINS - 1)
    };

    let mut bins: Vec<Vec<f32>> = vec![vec![]; TREND_BINS];
    for (g, &m) in mean.iter().enumerate() {
        bins[bin_of(m)].push(sd[g]);
    }

    let medians: Vec<f32> = bins
        .iter()
        .map(|b| {
            if b.is_empty() {
                return 0.0;
            }
            let mut sorted = b.clone();
            sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
            sorted[sorted.len() / 2]
        })
        .collect();

    mean.iter()
        .enumerate()
        .map(|(g, &m)| {
            let med = medians[bin_of(m)];
            if med > 0.0 {
                med
            } else {
                sd[g]
            }
        })
        .collect()
}
