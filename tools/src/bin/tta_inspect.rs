use std::path::{Path, PathBuf};

use clap::{Args, Parser, Subcommand};
use medi_dataset::json_loader;
use medi_tools::inspect::{model_input_shape, plan_batches, summarize};
use medi_tools::logging::init_logging;
use medi_tools::ToolConfig;
use tracing::info;

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Inspect datasets and test-time augmentation batches without running a model"
)]
struct Cli {
    /// Tool config path (defaults to $MEDI_TOOLS_CONFIG, then medi-tools.toml).
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Load a JSON dataset descriptor and print a summary.
    Dataset(DatasetArgs),
    /// Build the augmented batch stream for a descriptor and report batch shapes.
    Batches(BatchesArgs),
}

#[derive(Args, Debug)]
struct SourceArgs {
    /// Dataset descriptor (JSON object keyed by sample).
    #[arg(long)]
    json: Option<PathBuf>,
    /// Directory holding the images.
    #[arg(long)]
    image_dir: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct DatasetArgs {
    #[command(flatten)]
    source: SourceArgs,
    /// Parse labels as well as sample identifiers.
    #[arg(long)]
    training: bool,
    /// Labels are one-hot lists instead of class names.
    #[arg(long)]
    ohe: bool,
}

#[derive(Args, Debug)]
struct BatchesArgs {
    #[command(flatten)]
    source: SourceArgs,
    #[arg(long)]
    n_cycles: Option<usize>,
    /// Architecture key, e.g. 2D.ResNet50V2; sets input shape and standardization.
    #[arg(long)]
    architecture: Option<String>,
    #[arg(long)]
    batch_size: Option<usize>,
    #[arg(long)]
    workers: Option<usize>,
    #[arg(long)]
    seed: Option<u64>,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_json);
    let cfg = match &cli.config {
        Some(path) => ToolConfig::from_path(path)
            .ok_or_else(|| anyhow::anyhow!("cannot load tools config {}", path.display()))?,
        None => ToolConfig::load(),
    };
    match cli.command {
        Command::Dataset(args) => run_dataset(&cfg, args),
        Command::Batches(args) => run_batches(&cfg, args),
    }
}

fn resolve_source(cfg: &ToolConfig, source: SourceArgs) -> (PathBuf, PathBuf) {
    (
        source.json.unwrap_or_else(|| cfg.dataset_json.clone()),
        source.image_dir.unwrap_or_else(|| cfg.image_dir.clone()),
    )
}

fn run_dataset(cfg: &ToolConfig, args: DatasetArgs) -> anyhow::Result<()> {
    let (json, image_dir) = resolve_source(cfg, args.source);
    let dataset = json_loader(
        &json,
        &image_dir,
        &cfg.allowed_formats(),
        args.training,
        args.ohe,
    )?;
    let summary = summarize(&dataset);
    info!(
        json = %json.display(),
        samples = summary.samples,
        classes = summary.classes.len(),
        "dataset loaded"
    );
    print!("{summary}");
    Ok(())
}

fn run_batches(cfg: &ToolConfig, args: BatchesArgs) -> anyhow::Result<()> {
    let (json, image_dir) = resolve_source(cfg, args.source);
    let dataset = json_loader(&json, &image_dir, &cfg.allowed_formats(), false, false)?;

    let mut defaults = cfg.augmenting.clone();
    if let Some(n) = args.n_cycles {
        defaults.n_cycles = n;
    }
    if let Some(b) = args.batch_size {
        defaults.batch_size = b;
    }
    if let Some(w) = args.workers {
        defaults.workers = w;
    }
    if args.seed.is_some() {
        defaults.seed = args.seed;
    }
    if args.architecture.is_some() {
        defaults.architecture = args.architecture;
    }
    if defaults.n_cycles == 0 {
        anyhow::bail!("n_cycles must be positive");
    }
    let options = defaults
        .to_options()
        .with_image_format(dataset.image_format.clone());
    let input_shape = model_input_shape(&options, defaults.architecture.as_deref());

    report_batches(&dataset.samples, &image_dir, &options, &input_shape, defaults.n_cycles)
}

fn report_batches(
    samples: &[String],
    image_dir: &Path,
    options: &medi_ensembler::AugmentingOptions,
    input_shape: &[usize],
    n_cycles: usize,
) -> anyhow::Result<()> {
    let generator = plan_batches(samples, image_dir, options, input_shape)?;
    info!(
        samples = samples.len(),
        n_cycles,
        batches = generator.len(),
        input_shape = ?input_shape,
        standardize = %options.standardize_mode,
        "batch plan ready"
    );
    for (index, batch) in generator.enumerate() {
        let batch = batch?;
        let first = batch.positions.first().copied().unwrap_or(0);
        let last = batch.positions.last().copied().unwrap_or(0);
        println!(
            "batch {index:>4}: shape {:?} rows {first}..={last} (samples {}..={})",
            batch.images.shape(),
            first / n_cycles,
            last / n_cycles
        );
    }
    Ok(())
}
