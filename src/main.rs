//! Pressy Supervisor - drive the pressy worker through its line protocol.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use pressy_supervisor::config::{AppConfig, ConfigLoader};
use pressy_supervisor::display::{self, ConsoleProgress};
use pressy_supervisor::pipeline::{
    HttpFileTransfer, Job, JobOutcome, JobRunner, JobSource, JsonLinesJobSource, PipelineError,
    ProgressSink, RunSummary, SingleJob,
};
use pressy_supervisor::supervisor::{cancel_on_signal, Outcome, Supervisor};

#[derive(Parser)]
#[command(
    name = "pressy-supervisor",
    about = "Supervise the pressy worker while it presses profile files",
    version
)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short = 'v', long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Configuration file (defaults to ./.pressy.toml, then the user config dir).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Press a local profile file.
    Press {
        /// The profile file to press.
        file: PathBuf,
    },
    /// Download, press and upload one profile file.
    Job {
        /// Identifier of the profile on the file service.
        #[arg(long)]
        id: i64,
        /// Local file name for the download.
        #[arg(long)]
        filename: String,
        /// Job record tracking this press.
        #[arg(long)]
        job_id: Option<i64>,
        /// Directory downloads are stored in.
        #[arg(long, default_value = ".")]
        download_dir: PathBuf,
    },
    /// Process JSON-lines job descriptors one at a time.
    Serve {
        /// File to read jobs from (defaults to stdin).
        #[arg(long)]
        jobs: Option<PathBuf>,
        /// Directory downloads are stored in.
        #[arg(long, default_value = ".")]
        download_dir: PathBuf,
    },
}

fn init_tracing(verbosity: u8) {
    let level = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

fn load_config(path: Option<PathBuf>) -> AppConfig {
    let loader = path.map_or_else(ConfigLoader::new, ConfigLoader::with_path);
    match loader.load() {
        Ok(config) => config,
        Err(e) => {
            display::print_error(&e.to_string());
            std::process::exit(Outcome::Failed.exit_code());
        }
    }
}

fn summary_exit_code(summary: RunSummary) -> i32 {
    if summary.cancelled {
        Outcome::Cancelled.exit_code()
    } else if summary.failed > 0 || summary.errored > 0 {
        Outcome::Failed.exit_code()
    } else {
        Outcome::Succeeded.exit_code()
    }
}

fn console_sink(job: &Job) -> Box<dyn ProgressSink> {
    display::print_job_start(job);
    Box::new(ConsoleProgress::stdout())
}

fn show_published(result: &JobOutcome) {
    if let Some(response) = &result.published {
        display::print_published(response);
    }
}

async fn press(config: AppConfig, file: PathBuf) -> i32 {
    tracing::info!(file = %file.display(), "Starting press");
    let mut supervisor =
        Supervisor::new(config.supervisor).with_progress_sink(ConsoleProgress::stdout());
    match supervisor.run(&file).await {
        Ok(report) => {
            display::print_report(&report);
            report.outcome.exit_code()
        }
        Err(e) => {
            display::print_error(&e.to_string());
            Outcome::Failed.exit_code()
        }
    }
}

async fn process_jobs(
    config: AppConfig,
    download_dir: PathBuf,
    source: &mut dyn JobSource,
) -> Result<RunSummary, PipelineError> {
    let transfer = HttpFileTransfer::new(config.api, download_dir)?;
    let cancel = CancellationToken::new();
    let signals = cancel_on_signal(cancel.clone());

    let runner = JobRunner::new(transfer, config.supervisor)
        .with_cancellation(cancel)
        .with_progress(console_sink)
        .on_outcome(show_published);
    let summary = runner.run(source).await;
    signals.abort();
    let summary = summary?;
    tracing::info!(?summary, "Jobs processed");
    Ok(summary)
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    let config = load_config(cli.config);

    let code = match cli.command {
        Commands::Press { file } => press(config, file).await,
        Commands::Job {
            id,
            filename,
            job_id,
            download_dir,
        } => {
            let mut source = SingleJob::new(Job {
                id,
                filename,
                job_id,
            });
            match process_jobs(config, download_dir, &mut source).await {
                Ok(summary) => summary_exit_code(summary),
                Err(e) => {
                    display::print_error(&e.to_string());
                    Outcome::Failed.exit_code()
                }
            }
        }
        Commands::Serve { jobs, download_dir } => {
            let result = match jobs {
                Some(path) => match tokio::fs::File::open(&path).await {
                    Ok(file) => {
                        let mut source = JsonLinesJobSource::new(file);
                        process_jobs(config, download_dir, &mut source).await
                    }
                    Err(e) => Err(PipelineError::Io(e)),
                },
                None => {
                    let mut source = JsonLinesJobSource::new(tokio::io::stdin());
                    process_jobs(config, download_dir, &mut source).await
                }
            };
            match result {
                Ok(summary) => summary_exit_code(summary),
                Err(e) => {
                    display::print_error(&e.to_string());
                    Outcome::Failed.exit_code()
                }
            }
        }
    };

    std::process::exit(code);
}
