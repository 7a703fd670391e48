use crate::dataset::MarkerGene;
use crate::llm::{ChatService, OpenAiChat};
use crate::rank_genes::read_ranking;
use cellule_matrix::common_io::write_lines;
use clap::Args;
use log::{error, info};
use std::collections::BTreeMap;

const SYSTEM_PROMPT: &str =
    "You are an expert in single-cell transcriptomics and cell-type annotation.";

const PROMPT_INSTRUCTION: &str =
    "For each cluster, assign the most likely cell type and explain the reasoning.";

/// Ask the language model to interpret the clusters from their marker
/// genes and write the returned text to `out_file`.
///
/// Preconditions and failure behavior are stage-local: with no ranking
/// available nothing happens (no request, no file); a failed request is
/// logged and swallowed so the surrounding run still completes.
pub fn run_interpret(
    ranking: &BTreeMap<u32, Vec<MarkerGene>>,
    service: &dyn ChatService,
    genes_per_cluster: usize,
    out_file: &str,
) -> anyhow::Result<()> {
    if ranking.is_empty() {
        info!("marker ranking is empty; skipping interpretation");
        return Ok(());
    }

    let prompt = build_prompt(ranking, genes_per_cluster);
    info!("requesting interpretation for {} clusters", ranking.len());

    match service.complete(SYSTEM_PROMPT, &prompt) {
        Ok(interpretation) => {
            info!("interpretation:\n{}", interpretation);
            write_lines(&[interpretation.as_str()], out_file)?;
            info!("wrote {}", out_file);
        }
        Err(err) => {
            error!("interpretation request failed: {:#}", err);
        }
    }
    Ok(())
}

/// One `Cluster N: gene, gene, ...` line per cluster in ascending label
/// order, then the annotation instruction.
pub fn build_prompt(ranking: &BTreeMap<u32, Vec<MarkerGene>>, genes_per_cluster: usize) -> String {
    let mut lines: Vec<String> = ranking
        .iter()
        .map(|(cluster, markers)| {
            let genes: Vec<&str> = markers
                .iter()
                .take(genes_per_cluster)
                .map(|m| m.gene.as_ref())
                .collect();
            format!("Cluster {}: {}", cluster, genes.join(", "))
        })
        .collect();
    lines.push(PROMPT_INSTRUCTION.to_string());
    lines.join("\n")
}

/// `interpret` subcommand: replay the interpretation stage from a ranking
/// table written by a previous run.
#[derive(Args, Debug)]
pub struct InterpretReplayArgs {
    /// Ranking table (rank_genes.tsv.gz) from a previous run
    #[arg(required = true)]
    pub ranking: Box<str>,

    /// Output file for the returned interpretation
    #[arg(long, short, default_value = "output/interpretation.txt")]
    pub out: Box<str>,

    /// Marker genes quoted per cluster in the prompt
    #[arg(long, default_value_t = 10)]
    pub prompt_genes: usize,

    /// Chat-completions endpoint root
    #[arg(long, default_value = "https://api.openai.com/v1")]
    pub llm_url: Box<str>,

    /// Model identifier
    #[arg(long, default_value = "gpt-4o")]
    pub llm_model: Box<str>,

    /// Environment variable holding the API key
    #[arg(long, default_value = "OPENAI_API_KEY")]
    pub api_key_env: Box<str>,
}

pub fn run_replay(args: &InterpretReplayArgs) -> anyhow::Result<()> {
    let ranking = read_ranking(&args.ranking)?;
    let service = OpenAiChat::from_env(&args.llm_url, &args.llm_model, &args.api_key_env)?;
    run_interpret(&ranking, &service, args.prompt_genes, &args.out)
}
