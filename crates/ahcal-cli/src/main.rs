#![forbid(unsafe_code)]

//! **ahcal** – Command-line entry point of the offline reconstruction.
//!
//! `ahcal <config.yaml> [-i <job-list.txt>]` builds the configured
//! pipeline and processes one input file, or every `(path, runNumber,
//! poolIndex)` line of a job list.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use ahcal_core::config::{load_config, parse_run_config};

#[derive(Parser)]
#[command(name = "ahcal")]
#[command(about = "AHCAL offline event reconstruction")]
#[command(version)]
struct Cli {
    /// Job configuration (YAML with run, reader and algs sections).
    config: PathBuf,

    /// Job list with one "file runNumber poolIndex" line per input.
    #[arg(short = 'i', long = "input-list")]
    input_list: Option<PathBuf>,
}

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) if e.use_stderr() => {
            // Usage problems exit with 1, as the batch wrappers expect.
            eprintln!("{e}");
            return ExitCode::from(1);
        }
        Err(e) => {
            // --help and --version.
            print!("{e}");
            return ExitCode::SUCCESS;
        }
    };

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = ?e, "job failed");
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli) -> Result<()> {
    // The log target comes from the config, so peek at the run section
    // before anything else.
    let root = load_config(&cli.config)?;
    let run_cfg = parse_run_config(&root)?;
    let _guard = init_tracing(&run_cfg.log_level, &run_cfg.log_file)?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %cli.config.display(),
        "AHCAL reconstruction starting"
    );

    ahcal_io::register_builtin()?;
    ahcal_reco::register_builtin()?;

    ahcal_pipeline::run(&cli.config, cli.input_list.as_deref())?;

    info!("AHCAL reconstruction finished");
    Ok(())
}

fn init_tracing(
    log_level: &str,
    log_file: &str,
) -> Result<Option<tracing_appender::non_blocking::WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level.to_lowercase()));

    if log_file.is_empty() {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
        return Ok(None);
    }

    let path = Path::new(log_file);
    let dir = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or_else(|| Path::new("."));
    let file = path
        .file_name()
        .context("log_file has no file name")?;
    let appender = tracing_appender::rolling::never(dir, file);
    let (writer, guard) = tracing_appender::non_blocking(appender);
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(writer).with_ansi(false))
        .init();
    Ok(Some(guard))
}
