use crate::dataset::ClusterSet;
use crate::embed::{run_pca, run_umap, EmbedArgs};
use crate::filter::{run_filter, FilterArgs};
use crate::hvg::{run_hvg, HvgArgs};
use crate::interpret::run_interpret;
use crate::llm::OpenAiChat;
use crate::load::run_load;
use crate::normalize::{run_normalize, NormalizeArgs};
use crate::qc::{run_qc, QcArgs};
use crate::rank_genes::{run_rank_genes, RankArgs};
use crate::summarize::{run_summarize, SummarizeArgs};
use crate::trajectory::{run_trajectory, TrajectoryArgs};
use clap::Args;
use log::{info, warn};

#[derive(Args, Debug)]
pub struct RunArgs {
    /// 10x-style matrix directory (or file prefix)
    #[arg(required = true)]
    pub data: Box<str>,

    /// Output directory for plots, tables and the interpretation
    #[arg(long, short, default_value = "output")]
    pub out: Box<str>,

    /// Gene-name prefix marking mitochondrial genes
    #[arg(long, default_value = "MT-")]
    pub mito_prefix: Box<str>,

    /// Cells with more detected genes are flagged as outliers
    #[arg(long, default_value_t = 5000)]
    pub max_genes: u32,

    /// Cells with higher total counts are flagged as outliers
    #[arg(long, default_value_t = 2500.0)]
    pub max_counts: f32,

    /// Cells with a higher mitochondrial percentage are flagged
    #[arg(long, default_value_t = 20.0)]
    pub max_pct_mt: f32,

    /// Genes detected in fewer cells are removed
    #[arg(long, default_value_t = 3)]
    pub min_cells: usize,

    /// Number of highly variable genes to select
    #[arg(long, default_value_t = 2000)]
    pub num_hvg: usize,

    /// Per-cell total after normalization
    #[arg(long, default_value_t = 1e4)]
    pub target_sum: f32,

    /// Neighbours for the gene-space graph
    #[arg(long, default_value_t = 15)]
    pub knn: usize,

    /// Neighbours for the graph rebuilt on the PCA coordinates
    #[arg(long, default_value_t = 30)]
    pub knn_embedding: usize,

    /// Principal components to keep
    #[arg(long, default_value_t = 50)]
    pub num_components: usize,

    /// Resolution of the first (coarse) clustering
    #[arg(long, default_value_t = 2.4)]
    pub coarse_resolution: f32,

    /// Resolution of the summarization (fine) clustering
    #[arg(long, default_value_t = 1.5)]
    pub fine_resolution: f32,

    /// Genes listed per cluster in the expression summary
    #[arg(long, default_value_t = 30)]
    pub num_top_genes: usize,

    /// Ranked marker genes kept per cluster
    #[arg(long, default_value_t = 100)]
    pub num_ranked: usize,

    /// Which clustering feeds the ranking and trajectory stages
    #[arg(long, value_enum, default_value = "fine")]
    pub cluster_set: ClusterSet,

    /// Cell index anchoring the trajectory
    #[arg(long, default_value_t = 0)]
    pub root_cell: usize,

    /// Marker genes quoted per cluster in the interpretation prompt
    #[arg(long, default_value_t = 10)]
    pub prompt_genes: usize,

    /// Chat-completions endpoint root
    #[arg(long, default_value = "https://api.openai.com/v1")]
    pub llm_url: Box<str>,

    /// Model identifier for the interpretation request
    #[arg(long, default_value = "gpt-4o")]
    pub llm_model: Box<str>,

    /// Environment variable holding the API key
    #[arg(long, default_value = "OPENAI_API_KEY")]
    pub api_key_env: Box<str>,

    /// Cells per parallel job in the neighbour search
    #[arg(long, default_value_t = 1000)]
    pub block_size: usize,

    /// Cap on worker threads (clamped to the logical CPU count)
    #[arg(long, default_value_t = 8)]
    pub max_threads: usize,

    /// Random seed for the sketching and layout steps
    #[arg(long, default_value_t = 42)]
    pub seed: u64,
}

/// The whole analysis, stages in a fixed order, dataset consistency
/// checked between every pair of stages.
pub fn run_pipeline(args: &RunArgs) -> anyhow::Result<()> {
    let max_threads = num_cpus::get().min(args.max_threads.max(1));
    rayon::ThreadPoolBuilder::new()
        .num_threads(max_threads)
        .build_global()?;
    info!("using {} threads", max_threads);

    let out = args.out.as_ref();
    std::fs::create_dir_all(out)?;

    let mut data = run_load(&args.data)?;
    data.validate()?;

    run_qc(
        &mut data,
        &QcArgs {
            mito_prefix: args.mito_prefix.clone(),
        },
        out,
    )?;
    data.validate()?;

    run_filter(
        &mut data,
        &FilterArgs {
            max_genes: args.max_genes,
            max_counts: args.max_counts,
            max_pct_mt: args.max_pct_mt,
            min_cells: args.min_cells,
        },
    )?;
    data.validate()?;

    run_hvg(
        &mut data,
        &HvgArgs {
            num_genes: args.num_hvg,
            highlight: vec![],
        },
        out,
    )?;
    data.validate()?;

    run_normalize(
        &mut data,
        &NormalizeArgs {
            target_sum: args.target_sum,
        },
    )?;
    data.validate()?;

    let embed_args = EmbedArgs {
        knn: args.knn,
        knn_embedding: args.knn_embedding,
        num_components: args.num_components,
        coarse_resolution: args.coarse_resolution,
        block_size: args.block_size,
        seed: args.seed,
    };
    run_pca(&mut data, &embed_args, out)?;
    data.validate()?;

    run_umap(&mut data, &embed_args, out)?;
    data.validate()?;

    run_summarize(
        &mut data,
        &SummarizeArgs {
            fine_resolution: args.fine_resolution,
            num_top_genes: args.num_top_genes,
        },
        out,
    )?;
    data.validate()?;

    run_rank_genes(
        &mut data,
        &RankArgs {
            cluster_set: args.cluster_set,
            num_ranked: args.num_ranked,
        },
        out,
    )?;
    data.validate()?;

    run_trajectory(
        &mut data,
        &TrajectoryArgs {
            root_cell: args.root_cell,
            cluster_set: args.cluster_set,
        },
        out,
    )?;
    data.validate()?;

    match OpenAiChat::from_env(&args.llm_url, &args.llm_model, &args.api_key_env) {
        Ok(service) => {
            run_interpret(
                &data.artifacts.ranking,
                &service,
                args.prompt_genes,
                &format!("{}/interpretation.txt", out),
            )?;
        }
        Err(err) => {
            warn!("skipping interpretation: {:#}", err);
        }
    }

    info!(
        "pipeline complete: {} cells x {} genes, outputs under {}",
        data.num_cells(),
        data.num_genes(),
        out
    );
    Ok(())
}
