use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use kira_qtl_kgx::cancel::CancelFlag;
use kira_qtl_kgx::config::{ConfigLoader, ConfigOverrides, ResolvedConfig};
use kira_qtl_kgx::download::HttpArchiveDownloader;
use kira_qtl_kgx::error::KiraError;
use kira_qtl_kgx::hgvs;
use kira_qtl_kgx::normalize::{EntityNormalizer, NodeNormHttpClient};
use kira_qtl_kgx::output::{EncodeResult, HumanOutput, JsonOutput, OutputMode};
use kira_qtl_kgx::pipeline::{LogProgress, Pipeline, ProgressSink};
use kira_qtl_kgx::store::Store;
use kira_qtl_kgx::variant_norm::{
    HgvsOnlyNormalizer, NodeNormVariantNormalizer, VariantNormalization, VariantNormalizer,
};

#[derive(Parser)]
#[command(name = "kira-qtl")]
#[command(about = "Convert GTEx eQTL/sQTL archives into a normalized KGX graph")]
#[command(version, author)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Download, normalize and write the KGX document")]
    Run(RunArgs),
    #[command(about = "Print the genomic HGVS expression of GTEx variant ids")]
    Encode(EncodeArgs),
}

#[derive(Args, Clone)]
struct RunArgs {
    #[arg(long)]
    config: Option<String>,

    #[arg(long)]
    output_dir: Option<String>,

    #[arg(long)]
    output_file: Option<String>,

    #[arg(long)]
    gtex_version: Option<u32>,

    /// Only scan the salivary gland members, 5000 rows each.
    #[arg(long)]
    test_mode: bool,

    #[arg(long)]
    keep_archives: bool,

    #[arg(long)]
    workers: Option<usize>,

    #[arg(long)]
    json: bool,
}

#[derive(Args)]
struct EncodeArgs {
    #[arg(required = true)]
    variants: Vec<String>,

    #[arg(long)]
    json: bool,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(kira) = report.downcast_ref::<KiraError>() {
            return ExitCode::from(map_exit_code(kira));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &KiraError) -> u8 {
    match error {
        KiraError::ConfigRead(_)
        | KiraError::ConfigParse(_)
        | KiraError::OutputDirMissing(_)
        | KiraError::OutputExists(_)
        | KiraError::InvalidVariantId(_)
        | KiraError::UnknownReference(_)
        | KiraError::UnsupportedVariant(_) => 2,
        KiraError::DownloadHttp(_)
        | KiraError::DownloadStatus { .. }
        | KiraError::TransferExhausted { .. }
        | KiraError::NormalizationHttp(_)
        | KiraError::NormalizationStatus { .. } => 3,
        KiraError::Cancelled => 130,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Run(args) => run_pipeline(args),
        Commands::Encode(args) => run_encode(args),
    }
}

fn run_pipeline(args: RunArgs) -> miette::Result<()> {
    let output_mode = if args.json {
        OutputMode::Json
    } else {
        OutputMode::Human
    };
    let overrides = ConfigOverrides {
        gtex_version: args.gtex_version,
        output_dir: args.output_dir,
        output_file: args.output_file,
        workers: args.workers,
        test_mode: args.test_mode,
        keep_archives: args.keep_archives,
    };
    let config = ConfigLoader::resolve(args.config.as_deref(), &overrides)?;
    tracing::info!(
        gtex_version = config.gtex_version,
        output = %config.output_path(),
        test_mode = config.test_mode,
        "starting run"
    );

    let cancel = CancelFlag::new();
    install_signal_handler(&cancel)?;

    match config.variant_normalization {
        VariantNormalization::NodeNorm => {
            let client = node_norm_client(&config)?;
            let variants = NodeNormVariantNormalizer::new(entity_normalizer(client, &config));
            execute(config, variants, output_mode, cancel)
        }
        VariantNormalization::HgvsOnly => {
            execute(config, HgvsOnlyNormalizer, output_mode, cancel)
        }
    }
}

/// SIGINT and SIGTERM raise `cancel` instead of ending the process.
fn install_signal_handler(cancel: &CancelFlag) -> miette::Result<()> {
    let flag = cancel.clone();
    ctrlc::set_handler(move || {
        if !flag.is_cancelled() {
            tracing::warn!("shutdown signal received, cleaning up");
        }
        flag.cancel();
    })
    .into_diagnostic()
}

fn node_norm_client(config: &ResolvedConfig) -> miette::Result<NodeNormHttpClient> {
    Ok(NodeNormHttpClient::new(
        &config.node_norm_url,
        &config.edge_norm_url,
    )?)
}

fn entity_normalizer(
    client: NodeNormHttpClient,
    config: &ResolvedConfig,
) -> EntityNormalizer<NodeNormHttpClient> {
    EntityNormalizer::new(client)
        .with_chunk_size(config.chunk_size)
        .with_workers(config.workers)
}

fn execute<V: VariantNormalizer>(
    config: ResolvedConfig,
    variants: V,
    output_mode: OutputMode,
    cancel: CancelFlag,
) -> miette::Result<()> {
    let store = Store::new(config.output_dir.clone());
    let downloader = HttpArchiveDownloader::new()?.with_cancel(cancel.clone());
    let normalizer = entity_normalizer(node_norm_client(&config)?, &config);
    let pipeline =
        Pipeline::new(config, store, downloader, normalizer, variants).with_cancel(cancel);

    let sink: &dyn ProgressSink = match output_mode {
        OutputMode::Json => &JsonOutput,
        OutputMode::Human => &LogProgress,
    };
    let summary = pipeline.run(sink)?;
    match output_mode {
        OutputMode::Json => JsonOutput::print_run(&summary).into_diagnostic()?,
        OutputMode::Human => HumanOutput::print_run(&summary).into_diagnostic()?,
    }
    Ok(())
}

fn run_encode(args: EncodeArgs) -> miette::Result<()> {
    let results = args
        .variants
        .into_iter()
        .map(|variant| match hgvs::encode(&variant) {
            Ok(hgvs) => EncodeResult {
                variant,
                hgvs: Some(hgvs),
                error: None,
            },
            Err(err) => EncodeResult {
                variant,
                hgvs: None,
                error: Some(err.to_string()),
            },
        })
        .collect::<Vec<_>>();

    if args.json {
        JsonOutput::print_encode(&results).into_diagnostic()?;
    } else {
        HumanOutput::print_encode(&results).into_diagnostic()?;
    }
    Ok(())
}
