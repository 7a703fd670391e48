use crate::dataset::Dataset;
use log::info;

pub struct NormalizeArgs {
    /// Every cell's counts are rescaled to this total before the log
    pub target_sum: f32,
}

/// Rescale each cell to a common total, then apply `ln(1 + x)` in place.
///
/// The scaling must precede the log transform, and the combination is not
/// idempotent: a second invocation would distort values, so the dataset
/// records that normalization has happened and a repeat call is an error.
pub fn run_normalize(data: &mut Dataset, args: &NormalizeArgs) -> anyhow::Result<()> {
    if data.artifacts.normalized {
        anyhow::bail!("the count matrix is already normalized");
    }
    if args.target_sum <= 0.0 {
        anyhow::bail!("target sum must be positive, got {}", args.target_sum);
    }

    let nc = data.num_cells();
    let (col_offsets, _, values) = data.counts.csc_data_mut();

    for cell in 0..nc {
        let range = col_offsets[cell]..col_offsets[cell + 1];
        let total: f32 = values[range.clone()].iter().sum();
        if total <= 0.0 {
            continue;
        }
        let scale = args.target_sum / total;
        for v in &mut values[range] {
            *v = (*v * scale).ln_1p();
        }
    }

    data.artifacts.normalized = true;
    info!("normalized {} cells to total {} and log1p", nc, args.target_sum);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::tests::small_dataset;
    use approx::assert_relative_eq;

    #[test]
    fn cells_scale_to_the_target_before_the_log() {
        let mut data = small_dataset();
        run_normalize(&mut data, &NormalizeArgs { target_sum: 100.0 }).unwrap();

        // undoing the log recovers the target sum per cell
        for col in data.counts.col_iter() {
            let total: f32 = col.values().iter().map(|&v| v.exp_m1()).sum();
            assert_relative_eq!(total, 100.0, epsilon = 1e-3);
        }
        assert!(data.artifacts.normalized);
    }

    #[test]
    fn a_second_normalization_is_rejected() {
        let mut data = small_dataset();
        run_normalize(&mut data, &NormalizeArgs { target_sum: 1e4 }).unwrap();
        assert!(run_normalize(&mut data, &NormalizeArgs { target_sum: 1e4 }).is_err());
    }

    #[test]
    fn non_positive_target_is_rejected() {
        let mut data = small_dataset();
        assert!(run_normalize(&mut data, &NormalizeArgs { target_sum: 0.0 }).is_err());
    }
}
