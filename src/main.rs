//! BrawlBuilder - console entry point.
//!
//! Initializes logging, loads `Resources/BrawlBuilder Config.yaml`, builds a
//! multi-thread tokio runtime and runs one build. Ctrl-C cancels the build;
//! the working tree is rolled back before the process exits.
//!
//! Exit codes: 0 completed, 1 failed, 2 cancelled.

use anyhow::{Context, Result};
use brawlbuilder::logging::LoggingGuard;
use brawlbuilder::models::config::parse_hex_u32;
use brawlbuilder::pipeline::{AlwaysNo, AlwaysYes, DecisionProvider};
use brawlbuilder::ui::{ConsolePrompt, spawn_event_printer};
use brawlbuilder::{
    APP_NAME, BuildOutcome, BuildPipeline, BuildRequest, ConfigManager, GameId, StateManager,
    VERSION,
};
use camino::{Utf8Path, Utf8PathBuf};
use clap::{Args, Parser, Subcommand};
use std::process::ExitCode;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "brawlbuilder")]
#[command(version)]
#[command(about = "Build a modded disc image from a base image, mod files, a banner and a GCT")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Directory holding BrawlBuilder Config.yaml
    #[arg(long, global = true, default_value = "Resources")]
    config_dir: Utf8PathBuf,

    /// Enable debug logging (RUST_LOG overrides)
    #[arg(short, long, global = true)]
    debug: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the build pipeline
    Build(BuildArgs),

    /// Write a default settings file
    InitConfig,
}

#[derive(Args)]
struct BuildArgs {
    /// Source disc image; omit to reuse an existing working tree
    image: Option<Utf8PathBuf>,

    /// Output image (.iso or .wbfs)
    #[arg(short, long)]
    output: Utf8PathBuf,

    /// Mod folder whose category folders are merged into the image
    #[arg(short, long)]
    mods: Option<Utf8PathBuf>,

    /// Replacement opening.bnr
    #[arg(short, long)]
    banner: Option<Utf8PathBuf>,

    /// Game code table (GCT) loaded by the patched executable
    #[arg(short, long)]
    gct: Option<Utf8PathBuf>,

    /// Custom game id, e.g. RSBE01
    #[arg(long)]
    id: Option<GameId>,

    /// Custom game title
    #[arg(long)]
    title: Option<String>,

    /// Remove Subspace Emissary files before merging
    #[arg(long)]
    remove_subspace: bool,

    /// Split the output into 4 GB chunks (wbfs on FAT32)
    #[arg(long)]
    split: bool,

    /// Let wit print to the console instead of showing progress
    #[arg(long)]
    show_tool: bool,

    /// Code table load offset (hex)
    #[arg(long, value_parser = parse_offset)]
    offset: Option<u32>,

    /// Answer yes to every question
    #[arg(short, long, conflicts_with = "no")]
    yes: bool,

    /// Answer no to every question
    #[arg(short, long)]
    no: bool,
}

fn parse_offset(text: &str) -> Result<u32, String> {
    parse_hex_u32(text).ok_or_else(|| format!("'{}' is not a hexadecimal offset", text))
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let logging = brawlbuilder::logging::setup_logging_with_console(
        Utf8Path::new("logs"),
        brawlbuilder::logging::LOG_PREFIX,
        cli.debug,
        true,
    )?;

    tracing::info!("Starting {} v{}", APP_NAME, VERSION);

    let config_manager = ConfigManager::new(&cli.config_dir)?;

    match cli.command {
        Commands::InitConfig => {
            if config_manager.init_settings()? {
                println!("Wrote {}", config_manager.settings_path());
            } else {
                println!("{} already exists", config_manager.settings_path());
            }
            Ok(ExitCode::SUCCESS)
        }
        Commands::Build(args) => run_build(&config_manager, &logging, args, cli.debug),
    }
}

fn run_build(
    config_manager: &ConfigManager,
    logging: &LoggingGuard,
    args: BuildArgs,
    debug: bool,
) -> Result<ExitCode> {
    let settings = config_manager.load_settings()?;
    if settings.debug_mode && !debug {
        logging.set_debug(true)?;
        tracing::debug!("Debug logging enabled by settings");
    }

    let default_offset = settings
        .code_offset_value()
        .with_context(|| format!("Invalid code_offset in settings: {}", settings.code_offset))?;

    let mut request = BuildRequest::new(args.image, args.output);
    request.mod_root = args.mods;
    request.banner = args.banner;
    request.code_table = args.gct;
    request.game_id = args.id;
    request.title = args.title;
    request.remove_base_content = args.remove_subspace;
    request.split_output = args.split;
    request.show_tool_window = args.show_tool;
    request.code_offset = args.offset.unwrap_or(default_offset);

    if request.output.extension() == Some("wbfs") && !request.split_output {
        tracing::info!("Output is wbfs without --split; images over 4 GB will not fit on FAT32");
    }

    let decisions: Arc<dyn DecisionProvider> = if args.yes {
        Arc::new(AlwaysYes)
    } else if args.no {
        Arc::new(AlwaysNo)
    } else {
        Arc::new(ConsolePrompt::new())
    };

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .worker_threads(4)
        .thread_name("brawlbuilder-worker")
        .build()
        .context("Failed to create tokio runtime")?;

    let outcome = runtime.block_on(async move {
        let state = StateManager::new();
        let printer = spawn_event_printer(&state);
        let pipeline = BuildPipeline::new(settings, decisions, state);

        let handle = pipeline.start(request)?;
        let token = handle.cancel_token();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                println!("\nCancelling, please wait...");
                token.cancel();
            }
        });

        let outcome = handle.wait().await?;
        let _ = printer.await;
        anyhow::Ok(outcome)
    })?;

    runtime.shutdown_timeout(std::time::Duration::from_secs(5));

    Ok(match outcome {
        BuildOutcome::Completed(report) => {
            if let Some(tally) = &report.patch_tally {
                println!("GCT fixes: {}", tally.summary());
            }
            println!(
                "Merged {} file(s), padded {}, removed {}",
                report.merged, report.padded, report.deleted
            );
            ExitCode::SUCCESS
        }
        BuildOutcome::Cancelled { .. } => ExitCode::from(2),
        BuildOutcome::Failed { .. } => ExitCode::FAILURE,
    })
}
