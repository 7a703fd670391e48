mod dataset;
mod embed;
mod filter;
mod hvg;
mod interpret;
mod llm;
mod load;
mod normalize;
mod pipeline;
mod plots;
mod qc;
mod rank_genes;
mod summarize;
mod trajectory;

use clap::{Parser, Subcommand};
use log::info;

#[derive(Parser, Debug)]
#[command(
    version,
    about = "CELLULE",
    long_about = "Exploratory single-cell RNA-seq analysis: \n\
		  load a 10x-style count matrix, apply QC and gene filtering, \n\
		  select variable genes, normalize, embed, cluster, rank marker \n\
		  genes, abstract a trajectory, and ask a language model to \n\
		  interpret the clusters."
)]
struct Cli {
    #[command(subcommand)]
    commands: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    #[command(
        about = "Run the full analysis pipeline",
        long_about = "Run every stage in order on one count matrix: \n\
		      QC -> filter -> variable genes -> normalize -> PCA -> \n\
		      2D embedding -> summarize -> rank genes -> trajectory -> \n\
		      interpretation.\n"
    )]
    Run(pipeline::RunArgs),

    #[command(
        about = "Replay the interpretation stage from a saved ranking table",
        long_about = "Rebuild the marker-gene prompt from a rank_genes.tsv.gz \n\
		      written by a previous run and request a fresh interpretation, \n\
		      without re-running the analysis.\n"
    )]
    Interpret(interpret::InterpretReplayArgs),
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    match &cli.commands {
        Commands::Run(args) => {
            pipeline::run_pipeline(args)?;
        }
        Commands::Interpret(args) => {
            interpret::run_replay(args)?;
        }
    }

    info!("Done");
    Ok(())
}
