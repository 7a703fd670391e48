use crate::dataset::{ClusterSet, Dataset, MarkerGene};
use crate::plots;
use cellule_matrix::common_io::{open_buf_writer, read_lines};
use cellule_matrix::ranksum::{adjust_fdr, log2_fold_change, rank_sum_test};
use log::info;
use nalgebra_sparse::{CscMatrix, CsrMatrix};
use rayon::prelude::*;
use std::collections::BTreeMap;
use std::io::Write;

pub struct RankArgs {
    /// Which clustering defines the groups
    pub cluster_set: ClusterSet,
    /// Ranked genes kept per cluster
    pub num_ranked: usize,
}

const PSEUDO_COUNT: f32 = 1e-9;

/// One-vs-rest Wilcoxon ranking of genes per cluster on the normalized
/// values; results are keyed by cluster label and written to a compressed
/// TSV next to the plots.
pub fn run_rank_genes(data: &mut Dataset, args: &RankArgs, out_dir: &str) -> anyhow::Result<()> {
    let labels = data.clusters(args.cluster_set)?;
    let ranking = rank_clusters(&data.counts, &data.var.names, labels, args.num_ranked)?;

    for (cluster, markers) in ranking.iter() {
        let preview: Vec<&str> = markers.iter().take(5).map(|m| m.gene.as_ref()).collect();
        info!("cluster {}: {}", cluster, preview.join(", "));
    }

    let table = format!("{}/rank_genes.tsv.gz", out_dir);
    write_ranking(&ranking, &table)?;
    info!("wrote {}", table);

    plots::ranked_markers(&ranking, &format!("{}/rank_genes.html", out_dir))?;

    data.artifacts.ranking = ranking;
    Ok(())
}

/// The ranking itself, independent of the dataset plumbing. Cluster labels
/// need not be contiguous; each distinct label gets its own entry.
pub fn rank_clusters(
    counts: &CscMatrix<f32>,
    gene_names: &[Box<str>],
    labels: &[u32],
    num_ranked: usize,
) -> anyhow::Result<BTreeMap<u32, Vec<MarkerGene>>> {
    if labels.len() != counts.ncols() {
        anyhow::bail!(
            "{} labels for {} cells",
            labels.len(),
            counts.ncols()
        );
    }

    let mut distinct: Vec<u32> = labels.to_vec();
    distinct.sort_unstable();
    distinct.dedup();
    if distinct.len() < 2 {
        anyhow::bail!("need at least two clusters to rank genes, found {}", distinct.len());
    }

    // row-major access: one dense row per gene on demand
    let by_gene = CsrMatrix::from(counts);
    let nc = counts.ncols();
    let ng = counts.nrows();

    let mut ranking = BTreeMap::new();
    for &cluster in &distinct {
        let in_cluster: Vec<bool> = labels.iter().map(|&c| c == cluster).collect();
        let n1 = in_cluster.iter().filter(|&&f| f).count();

        let mut scored: Vec<(usize, _, f32)> = (0..ng)
            .into_par_iter()
            .map(|gene| {
                let mut group = Vec::with_capacity(n1);
                let mut rest = Vec::with_capacity(nc - n1);
                let mut dense = vec![0.0f32; nc];
                let lane = by_gene.row(gene);
                for (&cell, &val) in lane.col_indices().iter().zip(lane.values()) {
                    dense[cell] = val;
                }
                for (cell, &val) in dense.iter().enumerate() {
                    if in_cluster[cell] {
                        group.push(val);
                    } else {
                        rest.push(val);
                    }
                }
                let test = rank_sum_test(&group, &rest)?;
                let lfc = log2_fold_change(
                    group.iter().sum::<f32>() / group.len() as f32,
                    rest.iter().sum::<f32>() / rest.len() as f32,
                    PSEUDO_COUNT,
                );
                Ok((gene, test, lfc))
            })
            .collect::<anyhow::Result<Vec<_>>>()?;

        let adjusted = adjust_fdr(&scored.iter().map(|(_, t, _)| t.p_value).collect::<Vec<_>>());

        scored.sort_by(|a, b| b.1.z.partial_cmp(&a.1.z).unwrap_or(std::cmp::Ordering::Equal));
        let markers: Vec<MarkerGene> = scored
            .into_iter()
            .map(|(gene, test, lfc)| MarkerGene {
                gene: gene_names[gene].clone(),
                auc: test.auc as f32,
                log2_fold_change: lfc,
                z: test.z as f32,
                p_value: test.p_value,
                p_adjusted: adjusted[gene],
            })
            .take(num_ranked)
            .collect();
        ranking.insert(cluster, markers);
    }
    Ok(ranking)
}

fn write_ranking(ranking: &BTreeMap<u32, Vec<MarkerGene>>, file: &str) -> anyhow::Result<()> {
    let mut buf = open_buf_writer(file)?;
    writeln!(buf, "cluster\trank\tgene\tauc\tlog2_fc\tz\tp_value\tp_adjusted")?;
    for (cluster, markers) in ranking {
        for (rank, m) in markers.iter().enumerate() {
            writeln!(
                buf,
                "{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}",
                cluster,
                rank + 1,
                m.gene,
                m.auc,
                m.log2_fold_change,
                m.z,
                m.p_value,
                m.p_adjusted
            )?;
        }
    }
    buf.flush()?;
    Ok(())
}

/// Read a ranking table previously written by `run_rank_genes`, for
/// replaying the interpretation stage.
pub fn read_ranking(file: &str) -> anyhow::Result<BTreeMap<u32, Vec<MarkerGene>>> {
    let mut ranking: BTreeMap<u32, Vec<MarkerGene>> = BTreeMap::new();
    for (lineno, line) in read_lines(file)?.iter().enumerate().skip(1) {
        let fields: Vec<&str> = line.split('\t').collect();
        if fields.len() != 8 {
            anyhow::bail!("{}:{}: expected 8 columns, got {}", file, lineno + 1, fields.len());
        }
        let cluster: u32 = fields[0].parse()?;
        ranking.entry(cluster).or_default().push(MarkerGene {
            gene: fields[2].to_string().into_boxed_str(),
            auc: fields[3].parse()?,
            log2_fold_change: fields[4].parse()?,
            z: fields[5].parse()?,
            p_value: fields[6].parse()?,
            p_adjusted: fields[7].parse()?,
        });
    }
    if ranking.is_empty() {
        anyhow::bail!("{}: no ranking rows", file);
    }
    Ok(ranking)
}
