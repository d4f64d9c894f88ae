use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use slow_export::auth::Authenticator;
use slow_export::client::RestClient;
use slow_export::config::{template_toml, ExportConfig};
use slow_export::ledger::TaskLedger;
use slow_export::monitor::{monitor, MonitorOutcome, MonitorSettings};
use slow_export::scale::calculate_scale;
use slow_export::submission::{submit_all, SubmissionPlan};

#[derive(Parser, Debug)]
#[command(version, about = "Submit satellite image exports and wait for them to finish")]
struct Cli {
    /// Export configuration (TOML)
    #[arg(short, long, default_value = "./inputs/export.toml")]
    config: PathBuf,

    /// Raise log verbosity (-v debug, -vv trace); RUST_LOG overrides
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Write the built-in configuration template
    Template { out: PathBuf },
    /// Print the monthly windows and scale inputs without contacting the platform
    Windows {
        /// Region area in square meters, to preview the derived scale
        #[arg(long)]
        area: Option<f64>,
    },
    /// Submit one export per window and product, then monitor them
    Submit {
        #[arg(long)]
        no_monitor: bool,
        #[arg(long, default_value = "./outputs/tasks.json")]
        ledger: PathBuf,
    },
    /// Resume monitoring tasks recorded by a previous submit
    Monitor {
        #[arg(long, default_value = "./outputs/tasks.json")]
        ledger: PathBuf,
    },
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn cancel_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted, remote tasks keep running");
            trigger.cancel();
        }
    });
    cancel
}

async fn connect(config: &ExportConfig) -> Result<RestClient> {
    let http = reqwest::Client::builder()
        .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
        .build()?;
    let auth = Authenticator::new(config.auth.clone(), http.clone());
    let client = RestClient::new(http, auth, &config.project)?;
    client
        .authenticate()
        .await
        .context("unable to authenticate")?;
    Ok(client)
}

async fn run_monitor(
    client: &RestClient,
    ledger: &TaskLedger,
    settings: &MonitorSettings,
) -> bool {
    let cancel = cancel_on_ctrl_c();
    let summary = monitor(client, &ledger.tasks, settings, &cancel).await;
    summary.log_summary();
    summary.outcome == MonitorOutcome::Finished && summary.unsuccessful().is_empty()
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Command::Template { out } => {
            let config = ExportConfig::from_template(&template_toml())?;
            config.write(&out)?;
            info!("wrote template to {}", out.display());
            Ok(ExitCode::SUCCESS)
        }
        Command::Windows { area } => {
            let config = ExportConfig::read(&cli.config)?;
            for window in config.windows() {
                println!("{window}");
            }
            if let Some(area) = area {
                let scale = calculate_scale(area, config.export.max_pixels);
                println!("scale: {scale:.3} m/px for {area} m² at {} px", config.export.max_pixels);
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Submit { no_monitor, ledger } => {
            let config = ExportConfig::read(&cli.config)
                .with_context(|| format!("reading {}", cli.config.display()))?;
            let client = match connect(&config).await {
                Ok(client) => client,
                Err(e) => {
                    error!("{e:#}");
                    return Ok(ExitCode::FAILURE);
                }
            };

            let plan = SubmissionPlan::prepare(&client, &config).await?;
            let report = submit_all(&client, &plan, config.export.failure_policy).await;
            report.log_summary();

            let tasks = TaskLedger::new(&config.project, report.tasks());
            tasks.write(&ledger)?;
            info!("recorded {} task(s) in {}", tasks.tasks.len(), ledger.display());

            let mut ok = report.failures().is_empty();
            if !no_monitor {
                ok &= run_monitor(&client, &tasks, &config.monitor).await;
            }
            Ok(if ok { ExitCode::SUCCESS } else { ExitCode::FAILURE })
        }
        Command::Monitor { ledger } => {
            let config = ExportConfig::read(&cli.config)?;
            let tasks = TaskLedger::read(&ledger)
                .with_context(|| format!("reading {}", ledger.display()))?;
            let client = match connect(&config).await {
                Ok(client) => client,
                Err(e) => {
                    error!("{e:#}");
                    return Ok(ExitCode::FAILURE);
                }
            };
            let ok = run_monitor(&client, &tasks, &config.monitor).await;
            Ok(if ok { ExitCode::SUCCESS } else { ExitCode::FAILURE })
        }
    }
}
