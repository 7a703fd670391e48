use crate::common_io::*;
use nalgebra_sparse::{CooMatrix, CscMatrix};
use rayon::prelude::*;
use std::io::Write;

/// Read a MatrixMarket coordinate file into 0-based triplets.
///
/// Returns the triplets sorted by column then row, along with the
/// `(nrow, ncol, nnz)` header.
///
/// * `mtx_file` - path to the matrix market file (plain or gzipped)
pub fn read_mtx_triplets(
    mtx_file: &str,
) -> anyhow::Result<(Vec<(u64, u64, f32)>, (usize, usize, usize))> {
    let lines = read_lines(mtx_file)?;

    let mut body = lines
        .iter()
        .filter(|x| !x.starts_with('%') && !x.trim().is_empty());

    let header = body
        .next()
        .ok_or_else(|| anyhow::anyhow!("{}: empty matrix market file", mtx_file))?;

    let dims = header
        .split_whitespace()
        .map(|x| x.parse::<usize>())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|_| anyhow::anyhow!("{}: malformed size header '{}'", mtx_file, header))?;

    if dims.len() != 3 {
        anyhow::bail!("{}: malformed size header '{}'", mtx_file, header);
    }
    let shape = (dims[0], dims[1], dims[2]);

    // 1-based on disk, 0-based in memory
    fn parse_row_col_val(line: &str) -> Option<(u64, u64, f32)> {
        let mut it = line.split_whitespace();
        let row = it.next()?.parse::<u64>().ok()?.checked_sub(1)?;
        let col = it.next()?.parse::<u64>().ok()?.checked_sub(1)?;
        let val = match it.next() {
            Some(v) => v.parse::<f32>().ok()?,
            None => 1.0,
        };
        Some((row, col, val))
    }

    let mut triplets = body
        .par_bridge()
        .filter_map(|line| parse_row_col_val(line))
        .collect::<Vec<_>>();

    if triplets.len() != shape.2 {
        anyhow::bail!(
            "{}: header promised {} entries but {} were parsed",
            mtx_file,
            shape.2,
            triplets.len()
        );
    }

    triplets.sort_by_key(|&(row, _, _)| row);
    triplets.sort_by_key(|&(_, col, _)| col);
    Ok((triplets, shape))
}

/// Write 0-based triplets into a MatrixMarket file with 1-based indices.
///
/// * `triplets` - the triplets to write
/// * `nrow` - number of rows
/// * `ncol` - number of columns
/// * `mtx_file` - the output file (e.g., "matrix.mtx.gz")
pub fn write_mtx_triplets(
    triplets: &[(u64, u64, f32)],
    nrow: usize,
    ncol: usize,
    mtx_file: &str,
) -> anyhow::Result<()> {
    let mut buf = open_buf_writer(mtx_file)?;
    writeln!(buf, "%%MatrixMarket matrix coordinate real general")?;
    writeln!(buf, "{}\t{}\t{}", nrow, ncol, triplets.len())?;
    for (row, col, val) in triplets {
        writeln!(buf, "{}\t{}\t{}", row + 1, col + 1, val)?;
    }
    buf.flush()?;
    Ok(())
}

/// Assemble a CSC matrix from 0-based triplets.
pub fn csc_from_triplets(
    nrow: usize,
    ncol: usize,
    triplets: &[(u64, u64, f32)],
) -> anyhow::Result<CscMatrix<f32>> {
    let mut coo = CooMatrix::new(nrow, ncol);
    for &(row, col, val) in triplets {
        let (row, col) = (row as usize, col as usize);
        if row >= nrow || col >= ncol {
            anyhow::bail!(
                "triplet ({}, {}) out of bounds for {} x {} matrix",
                row,
                col,
                nrow,
                ncol
            );
        }
        coo.push(row, col, val);
    }
    Ok(CscMatrix::from(&coo))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mtx_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir
            .path()
            .join("matrix.mtx.gz")
            .to_string_lossy()
            .into_owned();

        let triplets = vec![(0u64, 0u64, 2.0f32), (2, 1, 1.0), (1, 2, 5.0)];
        write_mtx_triplets(&triplets, 3, 3, &path).unwrap();

        let (back, shape) = read_mtx_triplets(&path).unwrap();
        assert_eq!(shape, (3, 3, 3));
        // sorted by column then row
        assert_eq!(back, vec![(0, 0, 2.0), (2, 1, 1.0), (1, 2, 5.0)]);

        let csc = csc_from_triplets(3, 3, &back).unwrap();
        assert_eq!(csc.nrows(), 3);
        assert_eq!(csc.ncols(), 3);
        assert_eq!(csc.nnz(), 3);
    }

    #[test]
    fn header_mismatch_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.mtx").to_string_lossy().into_owned();
        crate::common_io::write_lines(
            &[
                "%%MatrixMarket matrix coordinate real general",
                "2\t2\t5",
                "1\t1\t1.0",
            ],
            &path,
        )
        .unwrap();
        assert!(read_mtx_triplets(&path).is_err());
    }

    #[test]
    fn out_of_bounds_triplet_is_rejected() {
        assert!(csc_from_triplets(2, 2, &[(2, 0, 1.0)]).is_err());
    }
}
