use nalgebra::{DMatrix, DVector};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

type Mat = DMatrix<f32>;

pub trait Rsvd {
    /// Truncated SVD by randomized subspace iteration.
    fn rsvd(&self, rank: usize) -> anyhow::Result<(Mat, DVector<f32>, Mat)>;
}

impl Rsvd for Mat {
    fn rsvd(&self, rank: usize) -> anyhow::Result<(Mat, DVector<f32>, Mat)> {
        RandomizedSvd::new(rank, 5).compute(self)
    }
}

/// Randomized SVD following the sketch-and-solve scheme of
/// Halko, Martinsson and Tropp (2009), Alg. 4.4.
pub struct RandomizedSvd {
    max_rank: usize,
    iter: usize,
    seed: u64,
}

impl RandomizedSvd {
    pub fn new(max_rank: usize, iter: usize) -> Self {
        Self {
            max_rank,
            iter,
            seed: 42,
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Compute the truncated factorization `xx ≈ U diag(S) Vᵀ`.
    pub fn compute(&self, xx: &Mat) -> anyhow::Result<(Mat, DVector<f32>, Mat)> {
        let nr = xx.nrows();
        let nc = xx.ncols();
        if nr == 0 || nc == 0 {
            anyhow::bail!("cannot factorize an empty {} x {} matrix", nr, nc);
        }

        let full = nr.min(nc);
        let (rank, oversample) = if self.max_rank > 0 && self.max_rank < full {
            (self.max_rank, 5.min(full - self.max_rank))
        } else {
            (full, 0)
        };

        let mut rng = StdRng::seed_from_u64(self.seed);
        let sketch = rank + oversample;

        // range finder with power iterations for spectral decay
        let omega = Mat::from_fn(nc, sketch, |_, _| rng.random::<f32>() - 0.5);
        let mut qq = orthonormalize(&(xx * omega));
        for _ in 0..self.iter {
            let zz = orthonormalize(&(xx.transpose() * &qq));
            qq = orthonormalize(&(xx * zz));
        }

        let bb = qq.transpose() * xx;
        let svd = bb.svd(true, true);

        let (Some(svd_u), Some(svd_vt)) = (svd.u, svd.v_t) else {
            anyhow::bail!("small-matrix SVD failed");
        };

        let rank = rank.min(svd.singular_values.len());
        let u = &qq * svd_u.columns(0, rank).into_owned();
        let v = svd_vt.transpose().columns(0, rank).into_owned();
        let s = svd.singular_values.rows(0, rank).into_owned();

        Ok((u, s, v))
    }
}

fn orthonormalize(xx: &Mat) -> Mat {
    let qr = xx.clone().qr();
    let kk = xx.ncols().min(xx.nrows());
    qr.q().columns(0, kk).into_owned()
}
