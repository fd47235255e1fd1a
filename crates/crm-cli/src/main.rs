use anyhow::{bail, Result};
use clap::{Args, Parser, Subcommand};
use crm_sync::{ResourceType, SyncJob, SyncStatus};
use std::time::Duration;

mod client;
mod poller;

use client::{HttpSyncClient, StartResponse};

const DEFAULT_INTERVAL_MS: u64 = poller::DEFAULT_POLL_INTERVAL.as_millis() as u64;

#[derive(Parser)]
#[command(name = "crm", version, about = "CRM sync backend")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the sync and record listing API
    AdminApi,
    /// Apply database migrations
    Migrate,
    /// Control a running API's sync job
    Sync(SyncArgs),
}

#[derive(Args)]
struct SyncArgs {
    /// Base URL of the CRM API
    #[arg(long, env = "CRM_API_URL", default_value = "http://localhost:8000", global = true)]
    api_url: String,

    #[command(subcommand)]
    command: SyncCommand,
}

#[derive(Subcommand)]
enum SyncCommand {
    /// Start a sync of everything, or of one resource type
    Start {
        #[arg(long = "type")]
        resource_type: Option<ResourceType>,
        /// Keep polling until the run finishes
        #[arg(long)]
        watch: bool,
        #[arg(long, default_value_t = DEFAULT_INTERVAL_MS)]
        interval_ms: u64,
    },
    Status,
    Stop,
    /// Poll the current run until it reaches a terminal state
    Watch {
        #[arg(long, default_value_t = DEFAULT_INTERVAL_MS)]
        interval_ms: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::AdminApi => {
            let config = crm_admin_api::load_config()?;
            crm_admin_api::run(config).await?;
        }
        Commands::Migrate => {
            crm_core::logging::init("crm-cli");
            let database_url = crm_core::config::required_env("DATABASE_URL")?;
            let settings = crm_core::db::PoolSettings::from_env()?;
            let pool = crm_core::db::connect(&database_url, &settings).await?;
            crm_core::db::migrate(&pool).await?;
        }
        Commands::Sync(args) => {
            crm_core::logging::init_compact("warn");
            run_sync_command(args).await?;
        }
    }

    Ok(())
}

async fn run_sync_command(args: SyncArgs) -> Result<()> {
    let client = HttpSyncClient::new(&args.api_url)?;

    match args.command {
        SyncCommand::Start {
            resource_type,
            watch,
            interval_ms,
        } => {
            let job = match client.start(resource_type).await? {
                StartResponse::Started(job) => job,
                StartResponse::AlreadyRunning(job) => {
                    if !watch {
                        bail!("a sync is already in progress: {}", job.message);
                    }
                    eprintln!("a sync is already in progress; watching it instead");
                    job
                }
            };
            if watch {
                watch_job(&client, job, interval_ms).await
            } else {
                print_json(&job)
            }
        }
        SyncCommand::Status => print_json(&client.status().await?),
        SyncCommand::Stop => {
            let job = client.stop().await?;
            if !job.is_in_progress() {
                eprintln!("no sync in progress");
            }
            print_json(&job)
        }
        SyncCommand::Watch { interval_ms } => {
            let job = client.status().await?;
            watch_job(&client, job, interval_ms).await
        }
    }
}

async fn watch_job(client: &HttpSyncClient, job: SyncJob, interval_ms: u64) -> Result<()> {
    println!("{}", render_line(&job));
    let interval = Duration::from_millis(interval_ms.max(1));
    let last = poller::poll_until_terminal(client, job, interval, |job| {
        println!("{}", render_line(job));
    })
    .await;

    if let Some(stats) = last.stats {
        println!(
            "synced {} products, {} customers, {} orders",
            stats.products, stats.customers, stats.orders
        );
    }
    if last.status == SyncStatus::Error {
        bail!("sync failed: {}", last.message);
    }
    Ok(())
}

fn render_line(job: &SyncJob) -> String {
    match job.progress {
        Some(progress) if progress.total > 0 => format!(
            "[{}] {} ({}%)",
            job.status,
            job.message,
            progress.current * 100 / progress.total
        ),
        _ => format!("[{}] {}", job.status, job.message),
    }
}

fn print_json(job: &SyncJob) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(job)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use crm_sync::{Progress, SyncScope};

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn sync_start_parses_type_and_watch() {
        let cli = Cli::try_parse_from([
            "crm",
            "sync",
            "--api-url",
            "http://crm.test",
            "start",
            "--type",
            "customers",
            "--watch",
            "--interval-ms",
            "250",
        ])
        .unwrap();

        let Commands::Sync(args) = cli.command else {
            panic!("expected sync command");
        };
        assert_eq!(args.api_url, "http://crm.test");
        match args.command {
            SyncCommand::Start {
                resource_type,
                watch,
                interval_ms,
            } => {
                assert_eq!(resource_type, Some(ResourceType::Customers));
                assert!(watch);
                assert_eq!(interval_ms, 250);
            }
            _ => panic!("expected start"),
        }
    }

    #[test]
    fn watch_interval_defaults_to_poll_interval() {
        let cli = Cli::try_parse_from(["crm", "sync", "watch"]).unwrap();
        let Commands::Sync(args) = cli.command else {
            panic!("expected sync command");
        };
        match args.command {
            SyncCommand::Watch { interval_ms } => {
                assert_eq!(
                    Duration::from_millis(interval_ms),
                    poller::DEFAULT_POLL_INTERVAL
                );
                assert_eq!(interval_ms, 1000);
            }
            _ => panic!("expected watch"),
        }
    }

    #[test]
    fn sync_start_rejects_unknown_type() {
        assert!(Cli::try_parse_from(["crm", "sync", "start", "--type", "invoices"]).is_err());
    }

    #[test]
    fn render_line_shows_percentage_when_total_known() {
        let job = SyncJob {
            status: SyncStatus::InProgress,
            message: "Processing customer 5/20".to_string(),
            resource_type: SyncScope::All,
            progress: Some(Progress {
                current: 5,
                total: 20,
                resource: ResourceType::Customers,
            }),
            ..SyncJob::default()
        };
        assert_eq!(
            render_line(&job),
            "[in_progress] Processing customer 5/20 (25%)"
        );
        assert_eq!(
            render_line(&SyncJob::default()),
            "[idle] No sync has been run yet"
        );
    }
}
