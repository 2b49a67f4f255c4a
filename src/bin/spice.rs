use std::collections::BTreeMap;
use std::process::ExitCode;

use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use spice_library::builder::{BuildRequest, LibraryBuilder, inspect_library};
use spice_library::config::{ConfigLoader, ResolvedConfig};
use spice_library::domain::{Normalization, SampleName};
use spice_library::error::SpiceError;
use spice_library::output::{JsonOutput, OutputMode, SpinnerSink, print_build_summary};
use spice_library::provider::EnsemblHttpClient;
use spice_library::result::ResultStore;

#[derive(Parser)]
#[command(name = "spice")]
#[command(about = "Build isoform libraries and compare expression-weighted functional diversity")]
#[command(version, author)]
struct Cli {
    #[arg(long, global = true)]
    non_interactive: bool,

    /// Raise the default log level to debug.
    #[arg(long, short, global = true)]
    verbose: bool,

    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Build or inspect a species library")]
    Library(LibraryArgs),
    #[command(about = "Expression results on top of a library")]
    Result(ResultArgs),
}

#[derive(Args)]
struct LibraryArgs {
    #[command(subcommand)]
    command: LibraryCommand,
}

#[derive(Subcommand)]
enum LibraryCommand {
    #[command(about = "Create a library or resume an unfinished one")]
    Build(BuildArgs),
    #[command(about = "Recompute and show the stage flags of a library")]
    Status(StatusArgs),
}

#[derive(Args)]
struct BuildArgs {
    #[arg(long)]
    species: String,

    #[arg(long)]
    taxon: u32,

    #[arg(long)]
    release: String,

    #[arg(long)]
    outdir: Utf8PathBuf,

    /// Ensembl GTF (plain or .gz); needed until ids are collected.
    #[arg(long)]
    annotation: Option<Utf8PathBuf>,

    #[arg(long)]
    force: bool,
}

#[derive(Args)]
struct StatusArgs {
    library: Utf8PathBuf,
}

#[derive(Args)]
struct ResultArgs {
    #[command(subcommand)]
    command: ResultCommand,
}

#[derive(Subcommand)]
enum ResultCommand {
    #[command(about = "Create a result directory for a library")]
    Setup(SetupArgs),
    #[command(about = "Import one replicate from an expression GTF")]
    Expression(ExpressionArgs),
    #[command(about = "Build a condition from imported replicates")]
    Condition(ConditionArgs),
    #[command(about = "Compare two samples")]
    Compare(CompareArgs),
}

#[derive(Args)]
struct SetupArgs {
    #[arg(long)]
    library: Utf8PathBuf,

    #[arg(long)]
    outdir: Utf8PathBuf,
}

#[derive(Args)]
struct ExpressionArgs {
    #[arg(long)]
    outdir: Utf8PathBuf,

    #[arg(long)]
    name: SampleName,

    #[arg(long)]
    gtf: Utf8PathBuf,

    #[arg(long, value_enum, default_value_t = Normalization::Tpm)]
    normalization: Normalization,

    /// Overrides `expression_threshold` from the config file.
    #[arg(long)]
    threshold: Option<f64>,
}

#[derive(Args)]
struct ConditionArgs {
    #[arg(long)]
    outdir: Utf8PathBuf,

    #[arg(long)]
    name: SampleName,

    #[arg(long, value_delimiter = ',', required = true)]
    replicates: Vec<SampleName>,
}

#[derive(Args)]
struct CompareArgs {
    #[arg(long)]
    outdir: Utf8PathBuf,

    first: SampleName,

    second: SampleName,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(spice) = report.downcast_ref::<SpiceError>() {
            return ExitCode::from(map_exit_code(spice));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &SpiceError) -> u8 {
    match error {
        SpiceError::MissingLibrary(_)
        | SpiceError::SampleNotFound(_)
        | SpiceError::InvalidArgument(_) => 2,
        SpiceError::TransientProvider(_) | SpiceError::ProviderStatus { .. } => 3,
        SpiceError::GuardConflict(_) => 4,
        SpiceError::StageAborted { source, .. } => map_exit_code(source),
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let output_mode = if cli.non_interactive {
        OutputMode::NonInteractive
    } else {
        OutputMode::Interactive
    };
    let config = ConfigLoader::resolve(cli.config.as_deref())?;

    match cli.command {
        Commands::Library(args) => match args.command {
            LibraryCommand::Build(args) => run_build(args, config, output_mode),
            LibraryCommand::Status(args) => run_status(args, config, output_mode),
        },
        Commands::Result(args) => run_result(args.command, config, output_mode),
    }
}

fn run_build(args: BuildArgs, config: ResolvedConfig, output_mode: OutputMode) -> miette::Result<()> {
    let mut commandline_args = BTreeMap::new();
    commandline_args.insert("species".to_string(), args.species.clone());
    commandline_args.insert("taxon".to_string(), args.taxon.to_string());
    commandline_args.insert("release".to_string(), args.release.clone());
    commandline_args.insert("outdir".to_string(), args.outdir.to_string());
    if let Some(annotation) = &args.annotation {
        commandline_args.insert("annotation".to_string(), annotation.to_string());
    }

    let request = BuildRequest {
        species: args.species,
        taxon_id: args.taxon,
        release: args.release,
        outdir: args.outdir,
        annotation: args.annotation,
        force: args.force,
        commandline_args,
    };
    let provider = EnsemblHttpClient::new(&config.provider_url)?;
    let builder = LibraryBuilder::new(provider, config);

    match output_mode {
        OutputMode::NonInteractive => {
            let report = builder.build(&request, &JsonOutput)?;
            JsonOutput::print_build(&report).into_diagnostic()?;
        }
        OutputMode::Interactive => {
            let sink = SpinnerSink::new();
            let report = builder.build(&request, &sink);
            sink.finish("library build finished");
            print_build_summary(&report?);
        }
    }
    Ok(())
}

fn run_status(args: StatusArgs, config: ResolvedConfig, output_mode: OutputMode) -> miette::Result<()> {
    let report = inspect_library(&args.library, &config)?;
    match output_mode {
        OutputMode::NonInteractive => JsonOutput::print_build(&report).into_diagnostic()?,
        OutputMode::Interactive => print_build_summary(&report),
    }
    Ok(())
}

fn run_result(
    command: ResultCommand,
    config: ResolvedConfig,
    output_mode: OutputMode,
) -> miette::Result<()> {
    let store = match command {
        ResultCommand::Setup(args) => ResultStore::setup(&args.library, &args.outdir)?,
        ResultCommand::Expression(args) => {
            let mut store = ResultStore::open(&args.outdir)?;
            let threshold = args.threshold.unwrap_or(config.expression_threshold);
            store.import_expression(&args.name, &args.gtf, args.normalization, threshold)?;
            store
        }
        ResultCommand::Condition(args) => {
            let mut store = ResultStore::open(&args.outdir)?;
            store.build_condition(&args.name, &args.replicates)?;
            store
        }
        ResultCommand::Compare(args) => {
            let mut store = ResultStore::open(&args.outdir)?;
            let report = store.compare(&args.first, &args.second)?;
            match output_mode {
                OutputMode::NonInteractive => JsonOutput::print_comparison(&report).into_diagnostic()?,
                OutputMode::Interactive => {
                    println!("compared {} genes, {} notable", report.genes, report.notable);
                    println!("  {}", report.table);
                    println!("  {}", report.sorted_table);
                }
            }
            return Ok(());
        }
    };
    match output_mode {
        OutputMode::NonInteractive => JsonOutput::print_results(store.info()).into_diagnostic()?,
        OutputMode::Interactive => println!("results at {}", store.root()),
    }
    Ok(())
}
