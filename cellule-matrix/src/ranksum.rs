use statrs::distribution::{ContinuousCDF, Normal};

/// Wilcoxon rank-sum (Mann-Whitney U) summary for one group against the rest.
#[derive(Debug, Clone, Copy)]
pub struct RankSumResult {
    /// U statistic of the first sample
    pub u: f64,
    /// U / (n1 * n2), the probability a group value exceeds a rest value
    pub auc: f64,
    /// Normal-approximation z score with tie correction
    pub z: f64,
    /// Two-sided p-value
    pub p_value: f64,
}

/// Two-sided Wilcoxon rank-sum test with average ranks and tie-corrected
/// normal approximation.
///
/// * `group` - values in the group of interest
/// * `rest` - values in the complement
pub fn rank_sum_test(group: &[f32], rest: &[f32]) -> anyhow::Result<RankSumResult> {
    let n1 = group.len();
    let n2 = rest.len();
    if n1 == 0 || n2 == 0 {
        anyhow::bail!("rank-sum test needs both samples non-empty ({}, {})", n1, n2);
    }

    let ntot = n1 + n2;
    let mut pooled: Vec<(f32, bool)> = Vec::with_capacity(ntot);
    pooled.extend(group.iter().map(|&x| (x, true)));
    pooled.extend(rest.iter().map(|&x| (x, false)));
    pooled.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));

    // average ranks within ties, accumulating the tie correction term
    let mut rank_sum_group = 0.0f64;
    let mut tie_term = 0.0f64;
    let mut start = 0;
    while start < ntot {
        let mut stop = start + 1;
        while stop < ntot && pooled[stop].0 == pooled[start].0 {
            stop += 1;
        }
        let t = (stop - start) as f64;
        // ranks are 1-based; ties share the midpoint rank
        let avg_rank = (start + stop + 1) as f64 / 2.0;
        for item in &pooled[start..stop] {
            if item.1 {
                rank_sum_group += avg_rank;
            }
        }
        if t > 1.0 {
            tie_term += t * t * t - t;
        }
        start = stop;
    }

    let (n1f, n2f, nf) = (n1 as f64, n2 as f64, ntot as f64);
    let u = rank_sum_group - n1f * (n1f + 1.0) / 2.0;
    let auc = u / (n1f * n2f);

    let mu = n1f * n2f / 2.0;
    let var = n1f * n2f / 12.0 * ((nf + 1.0) - tie_term / (nf * (nf - 1.0)));

    let (z, p_value) = if var <= 0.0 {
        // all values tied
        (0.0, 1.0)
    } else {
        let z = (u - mu) / var.sqrt();
        let normal = Normal::new(0.0, 1.0)?;
        (z, 2.0 * normal.cdf(-z.abs()))
    };

    Ok(RankSumResult { u, auc, z, p_value })
}

/// log2 fold change of group mean over rest mean, with a pseudo count.
pub fn log2_fold_change(group_mean: f32, rest_mean: f32, pseudo: f32) -> f32 {
    ((group_mean + pseudo) / (rest_mean + pseudo)).log2()
}

/// Benjamini-Hochberg adjusted p-values.
pub fn adjust_fdr(p_values: &[f64]) -> Vec<f64> {
    let m = p_values.len();
    if m == 0 {
        return vec![];
    }

    let mut order: Vec<usize> = (0..m).collect();
    order.sort_by(|&a, &b| {
        p_values[a]
            .partial_cmp(&p_values[b])
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut adjusted = vec![0.0f64; m];
    let mut running_min = 1.0f64;
    for (rank, &idx) in order.iter().enumerate().rev() {
        let q = p_values[idx] * m as f64 / (rank + 1) as f64;
        running_min = running_min.min(q).min(1.0);
        adjusted[idx] = running_min;
    }
    adjusted
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn separated_samples_give_extreme_auc() {
        let hi: Vec<f32> = (0..30).map(|i| 10.0 + i as f32 * 0.1).collect();
        let lo: Vec<f32> = (0..30).map(|i| i as f32 * 0.1).collect();

        let res = rank_sum_test(&hi, &lo).unwrap();
        assert_relative_eq!(res.auc, 1.0);
        assert!(res.z > 0.0);
        assert!(res.p_value < 1e-6);
    }

    #[test]
    fn identical_samples_give_half_auc() {
        let xs: Vec<f32> = (0..20).map(|i| i as f32).collect();
        let res = rank_sum_test(&xs, &xs).unwrap();
        assert_relative_eq!(res.auc, 0.5);
        assert!(res.p_value > 0.9);
    }

    #[test]
    fn all_tied_values_are_inconclusive() {
        let res = rank_sum_test(&[1.0; 10], &[1.0; 10]).unwrap();
        assert_eq!(res.z, 0.0);
        assert_eq!(res.p_value, 1.0);
        assert_relative_eq!(res.auc, 0.5);
    }

    #[test]
    fn empty_sample_is_an_error() {
        assert!(rank_sum_test(&[], &[1.0]).is_err());
        assert!(rank_sum_test(&[1.0], &[]).is_err());
    }

    #[test]
    fn fold_change_sign() {
        assert!(log2_fold_change(4.0, 1.0, 1e-9) > 0.0);
        assert!(log2_fold_change(1.0, 4.0, 1e-9) < 0.0);
        assert_relative_eq!(log2_fold_change(2.0, 2.0, 1e-9), 0.0);
    }

    #[test]
    fn fdr_is_monotone_and_bounded() {
        let p = [0.001, 0.01, 0.02, 0.8];
        let q = adjust_fdr(&p);
        assert_eq!(q.len(), 4);
        for (&pi, &qi) in p.iter().zip(q.iter()) {
            assert!(qi >= pi);
            assert!(qi <= 1.0);
        }
        assert_relative_eq!(q[0], 0.004);
    }
}
