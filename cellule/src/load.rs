use crate::dataset::Dataset;
use cellule_matrix::common_io::read_lines;
use cellule_matrix::mtx::{csc_from_triplets, read_mtx_triplets};
use fnv::FnvHashMap;
use log::info;
use std::path::Path;

/// Load a 10x-style matrix directory (or file prefix) into a new dataset.
///
/// Expects `matrix.mtx`, `barcodes.tsv` and `features.tsv` (or the older
/// `genes.tsv`), each optionally gzipped, with genes as matrix rows and
/// cells as columns. Gene names are made unique by suffixing duplicates
/// with `.1`, `.2`, and so on.
pub fn run_load(input: &str) -> anyhow::Result<Dataset> {
    let mtx_file = resolve(input, &["matrix.mtx.gz", "matrix.mtx"])?;
    let barcode_file = resolve(input, &["barcodes.tsv.gz", "barcodes.tsv"])?;
    let feature_file = resolve(
        input,
        &["features.tsv.gz", "features.tsv", "genes.tsv.gz", "genes.tsv"],
    )?;

    let (triplets, (nrow, ncol, nnz)) = read_mtx_triplets(&mtx_file)?;
    info!("{}: {} genes x {} cells, {} entries", mtx_file, nrow, ncol, nnz);

    let barcodes = read_lines(&barcode_file)?;
    if barcodes.len() != ncol {
        anyhow::bail!(
            "{}: {} barcodes for {} matrix columns",
            barcode_file,
            barcodes.len(),
            ncol
        );
    }

    let gene_names = read_feature_names(&feature_file)?;
    if gene_names.len() != nrow {
        anyhow::bail!(
            "{}: {} features for {} matrix rows",
            feature_file,
            gene_names.len(),
            nrow
        );
    }

    let counts = csc_from_triplets(nrow, ncol, &triplets)?;
    Dataset::from_parts(counts, barcodes, deduplicate_names(gene_names))
}

/// Pick the first existing candidate under a directory, or with a plain
/// string prefix when `input` is not a directory.
fn resolve(input: &str, candidates: &[&str]) -> anyhow::Result<String> {
    let base = Path::new(input);
    for name in candidates {
        let path = if base.is_dir() {
            base.join(name).to_string_lossy().into_owned()
        } else {
            format!("{}{}", input, name)
        };
        if Path::new(&path).exists() {
            return Ok(path);
        }
    }
    anyhow::bail!("{}: none of {:?} found", input, candidates);
}

/// Gene symbols from a features TSV: second column when present (10x id,
/// symbol, type), otherwise the whole line.
fn read_feature_names(feature_file: &str) -> anyhow::Result<Vec<Box<str>>> {
    Ok(read_lines(feature_file)?
        .iter()
        .map(|line| {
            let mut fields = line.split('\t');
            let first = fields.next().unwrap_or(line);
            fields.next().unwrap_or(first).to_string().into_boxed_str()
        })
        .collect())
}

/// First occurrence keeps its name; later duplicates get `.1`, `.2`, ...
fn deduplicate_names(names: Vec<Box<str>>) -> Vec<Box<str>> {
    let mut seen: FnvHashMap<Box<str>, usize> = FnvHashMap::default();
    let mut duplicates = 0;
    let out = names
        .into_iter()
        .map(|name| match seen.get_mut(&name) {
            None => {
                seen.insert(name.clone(), 0);
                name
            }
            Some(count) => {
                *count += 1;
                duplicates += 1;
                format!("{}.{}", name, count).into_boxed_str()
            }
        })
        .collect();
    if duplicates > 0 {
        info!("renamed {} duplicated gene names", duplicates);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use cellule_matrix::common_io::write_lines;
    use cellule_matrix::mtx::write_mtx_triplets;

    fn write_tenx_dir(dir: &Path) {
        let triplets = vec![(0u64, 0u64, 3.0f32), (1, 1, 2.0), (2, 1, 1.0)];
        write_mtx_triplets(&triplets, 3, 2, dir.join("matrix.mtx").to_str().unwrap()).unwrap();
        write_lines(
            &["ENSG01\tCD3E\tGene", "ENSG02\tCD3E\tGene", "ENSG03\tLYZ\tGene"],
            dir.join("features.tsv").to_str().unwrap(),
        )
        .unwrap();
        write_lines(
            &["AAA-1", "CCC-1"],
            dir.join("barcodes.tsv").to_str().unwrap(),
        )
        .unwrap();
    }

    #[test]
    fn loads_a_matrix_directory_and_deduplicates() {
        let dir = tempfile::tempdir().unwrap();
        write_tenx_dir(dir.path());

        let data = run_load(dir.path().to_str().unwrap()).unwrap();
        assert_eq!(data.num_genes(), 3);
        assert_eq!(data.num_cells(), 2);
        assert_eq!(data.obs.barcodes[0].as_ref(), "AAA-1");

        let names: Vec<&str> = data.var.names.iter().map(|x| x.as_ref()).collect();
        assert_eq!(names, vec!["CD3E", "CD3E.1", "LYZ"]);
        assert!(data.validate().is_ok());
    }

    #[test]
    fn missing_directory_is_fatal() {
        assert!(run_load("/no/such/place").is_err());
    }

    #[test]
    fn barcode_count_mismatch_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        write_tenx_dir(dir.path());
        write_lines(&["AAA-1"], dir.path().join("barcodes.tsv").to_str().unwrap()).unwrap();
        assert!(run_load(dir.path().to_str().unwrap()).is_err());
    }

    #[test]
    fn triple_duplicates_count_up() {
        let names = vec!["A".into(), "A".into(), "A".into(), "B".into()];
        let out = deduplicate_names(names);
        let out: Vec<&str> = out.iter().map(|x| x.as_ref()).collect();
        assert_eq!(out, vec!["A", "A.1", "A.2", "B"]);
    }
}
