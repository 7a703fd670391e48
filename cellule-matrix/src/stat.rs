use nalgebra::{DVector, DVectorView};

/// Running first and second moments over a stream of equally sized vectors.
///
/// Used for per-gene summary statistics where the matrix is visited one
/// cell (column) at a time.
pub struct RunningStatistics {
    size: usize,
    nobs: f32,
    sum: DVector<f32>,
    sum_sq: DVector<f32>,
    npos: DVector<f32>,
}

impl RunningStatistics {
    pub fn new(size: usize) -> Self {
        Self {
            size,
            nobs: 0.0,
            sum: DVector::zeros(size),
            sum_sq: DVector::zeros(size),
            npos: DVector::zeros(size),
        }
    }

    pub fn len(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    pub fn num_observations(&self) -> usize {
        self.nobs as usize
    }

    /// Accumulate one observation vector.
    pub fn add(&mut self, x: &DVectorView<f32>) {
        debug_assert_eq!(x.len(), self.size);
        self.nobs += 1.0;
        for (i, &v) in x.iter().enumerate() {
            self.sum[i] += v;
            self.sum_sq[i] += v * v;
            if v > 0.0 {
                self.npos[i] += 1.0;
            }
        }
    }

    /// Accumulate a sparse observation: only the listed indices are nonzero.
    pub fn add_sparse(&mut self, indices: &[usize], values: &[f32]) {
        debug_assert_eq!(indices.len(), values.len());
        self.nobs += 1.0;
        for (&i, &v) in indices.iter().zip(values.iter()) {
            self.sum[i] += v;
            self.sum_sq[i] += v * v;
            if v > 0.0 {
                self.npos[i] += 1.0;
            }
        }
    }

    pub fn mean(&self) -> DVector<f32> {
        let denom = self.nobs.max(1.0);
        self.sum.map(|s| s / denom)
    }

    /// Unbiased sample variance per coordinate.
    pub fn variance(&self) -> DVector<f32> {
        if self.nobs < 2.0 {
            return DVector::zeros(self.size);
        }
        let n = self.nobs;
        DVector::from_fn(self.size, |i, _| {
            let mu = self.sum[i] / n;
            ((self.sum_sq[i] - n * mu * mu) / (n - 1.0)).max(0.0)
        })
    }

    /// Number of strictly positive observations per coordinate.
    pub fn count_positives(&self) -> DVector<f32> {
        self.npos.clone()
    }
}
