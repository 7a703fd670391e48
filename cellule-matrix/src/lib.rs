//! Numerical building blocks for droplet-based single-cell analysis.
//!
//! The pipeline crate treats everything in here as an opaque library call:
//! matrix-market I/O, running summary statistics, approximate k-nearest
//! neighbour graphs, randomized SVD, Louvain community detection, a
//! fuzzy-graph 2D layout, and the Wilcoxon rank-sum test.

pub mod common_io;
pub mod knn;
pub mod layout;
pub mod louvain;
pub mod mtx;
pub mod ranksum;
pub mod rsvd;
pub mod stat;
