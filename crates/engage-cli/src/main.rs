//! Engage - bulk-messaging campaign client

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use engage_common::config::{Config, LoggingConfig};
use engage_common::types::{CampaignStatus, QueueStatus};
use engage_core::{
    can_transition, BulkMessageApi, CampaignBoard, CampaignCommand, CampaignForm, CampaignMonitor,
    CommandDispatcher, MonitorSnapshot, RecipientEstimator, SendTiming,
};
use engage_core::campaigns::format_duration;
use engage_storage::{
    Campaign, CampaignRepository, DatabasePool, DbCampaignRepository, DbQueueRepository,
    PgChangeFeed, TargetingFilters,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(name = "engage", author, version, about = "Bulk-messaging campaign client", long_about = None)]
struct Cli {
    /// Config file (defaults to ./engage.toml, then /etc/engage/engage.toml)
    #[arg(short, long, global = true, env = "ENGAGE_CONFIG")]
    config: Option<PathBuf>,

    /// Organization to act on
    #[arg(long, global = true, env = "ENGAGE_ORG")]
    org: Option<Uuid>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Apply database migrations
    Migrate,
    /// List the organization's campaigns
    List {
        #[arg(long, value_parser = parse_campaign_status)]
        status: Option<CampaignStatus>,
    },
    /// Show a campaign and one page of its queue
    Show {
        id: Uuid,
        #[arg(long, value_parser = parse_queue_status)]
        status: Option<QueueStatus>,
        #[arg(long, default_value_t = 1)]
        page: u32,
        #[arg(long)]
        page_size: Option<u32>,
    },
    /// Follow a campaign's progress live until interrupted
    Watch {
        id: Uuid,
        #[arg(long)]
        page_size: Option<u32>,
    },
    /// Estimate how many customers a targeting matches
    Estimate {
        #[arg(long)]
        channel: Uuid,
        #[arg(long = "stage")]
        stages: Vec<Uuid>,
        #[arg(long = "tag")]
        tags: Vec<Uuid>,
    },
    /// Create a campaign from a TOML form
    Create {
        #[arg(long)]
        file: PathBuf,
        /// Profile recorded as the creator
        #[arg(long)]
        created_by: Option<Uuid>,
    },
    /// Overwrite a draft or scheduled campaign from a TOML form
    Update {
        id: Uuid,
        #[arg(long)]
        file: PathBuf,
    },
    /// Start a draft or scheduled campaign
    Start { id: Uuid },
    /// Pause a processing campaign
    Pause { id: Uuid },
    /// Resume a paused campaign
    Resume { id: Uuid },
    /// Cancel a campaign
    Cancel { id: Uuid },
    /// Delete a campaign
    Delete { id: Uuid },
    /// Show how long a send would take
    Plan {
        #[arg(long)]
        recipients: u64,
        #[arg(long, default_value_t = 50)]
        batch_size: u32,
        /// Milliseconds
        #[arg(long, default_value_t = 1000)]
        delay_between_messages: u64,
        /// Milliseconds
        #[arg(long, default_value_t = 30000)]
        delay_between_batches: u64,
    },
}

fn parse_campaign_status(s: &str) -> std::result::Result<CampaignStatus, String> {
    s.parse().map_err(|e: engage_common::Error| e.to_string())
}

fn parse_queue_status(s: &str) -> std::result::Result<QueueStatus, String> {
    s.parse().map_err(|e: engage_common::Error| e.to_string())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref())?;
    init_logging(&config.logging);

    match cli.command {
        Command::Migrate => {
            let pool = DatabasePool::new(&config.database).await?;
            pool.health_check().await?;
            pool.migrate().await?;
            println!("Migrations applied");
        }
        Command::List { status } => {
            let org = config.organization(cli.org)?;
            let pool = DatabasePool::new(&config.database).await?;
            let campaigns = DbCampaignRepository::new(pool)
                .list_by_organization(org, status)
                .await?;
            if campaigns.is_empty() {
                println!("No campaigns");
            }
            for campaign in &campaigns {
                print_campaign_row(campaign);
            }
        }
        Command::Show {
            id,
            status,
            page,
            page_size,
        } => {
            let org = config.organization(cli.org)?;
            let monitor = open_monitor(&config, org, id, page_size).await?;
            monitor.refresh().await?;
            if status.is_some() {
                monitor.set_status_filter(status).await?;
            }
            if page > 1 {
                monitor.set_page(page).await?;
            }
            print_snapshot(&monitor.snapshot().await);
        }
        Command::Watch { id, page_size } => {
            let org = config.organization(cli.org)?;
            let monitor = open_monitor(&config, org, id, page_size).await?;
            watch(&monitor).await?;
        }
        Command::Estimate {
            channel,
            stages,
            tags,
        } => {
            let org = config.organization(cli.org)?;
            let filters = TargetingFilters {
                channel_id: Some(channel),
                stage_ids: stages,
                tag_ids: tags,
                custom_field_filters: Vec::new(),
            };
            // Failures are logged and read as zero
            let mut estimator = RecipientEstimator::new(BulkMessageApi::new(&config.api)?, org);
            println!("{} recipients", estimator.refresh(&filters).await);
        }
        Command::Create { file, created_by } => {
            let org = config.organization(cli.org)?;
            let form = read_form(&file)?;
            let pool = DatabasePool::new(&config.database).await?;
            let campaign = form
                .submit(&DbCampaignRepository::new(pool), org, created_by)
                .await
                .map_err(|e| anyhow!(e.user_message("Failed to create campaign")))?;
            println!("Created campaign {} ({})", campaign.id, campaign.status);
        }
        Command::Update { id, file } => {
            let org = config.organization(cli.org)?;
            let form = read_form(&file)?;
            let pool = DatabasePool::new(&config.database).await?;
            let repo = DbCampaignRepository::new(pool);
            let existing = repo
                .get(org, id)
                .await?
                .ok_or_else(|| anyhow!("Campaign {} not found", id))?;
            let campaign = form
                .submit_update(&repo, &existing)
                .await
                .map_err(|e| anyhow!(e.user_message("Failed to update campaign")))?;
            println!("Updated campaign {} ({})", campaign.id, campaign.status);
        }
        Command::Start { id } => run_command(&config, cli.org, id, CampaignCommand::Start).await?,
        Command::Pause { id } => run_command(&config, cli.org, id, CampaignCommand::Pause).await?,
        Command::Resume { id } => {
            run_command(&config, cli.org, id, CampaignCommand::Resume).await?
        }
        Command::Cancel { id } => {
            run_command(&config, cli.org, id, CampaignCommand::Cancel).await?
        }
        Command::Delete { id } => {
            run_command(&config, cli.org, id, CampaignCommand::Delete).await?
        }
        Command::Plan {
            recipients,
            batch_size,
            delay_between_messages,
            delay_between_batches,
        } => {
            let timing =
                SendTiming::from_millis(delay_between_messages, batch_size, delay_between_batches);
            let plan = timing.plan(recipients);
            println!(
                "{} recipients in {} batches, about {}",
                plan.recipients,
                plan.batches,
                format_duration(plan.estimated_duration)
            );
        }
    }

    Ok(())
}

fn init_logging(config: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{},sqlx=warn", config.level)));

    // stdout carries command output
    let registry = tracing_subscriber::registry().with(filter);
    if config.format == "json" {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_level(true)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}

fn read_form(path: &Path) -> Result<CampaignForm> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    toml::from_str(&content).with_context(|| format!("Failed to parse {}", path.display()))
}

async fn open_monitor(
    config: &Config,
    org: Uuid,
    id: Uuid,
    page_size: Option<u32>,
) -> Result<CampaignMonitor> {
    let pool = DatabasePool::new(&config.database).await?;
    let feed = PgChangeFeed::new(
        pool.clone(),
        config.realtime.channel.clone(),
        config.realtime.buffer,
    );
    Ok(CampaignMonitor::new(
        org,
        id,
        Arc::new(DbCampaignRepository::new(pool.clone())),
        Arc::new(DbQueueRepository::new(pool)),
        Arc::new(feed),
        page_size.unwrap_or(config.monitor.page_size),
    ))
}

async fn watch(monitor: &CampaignMonitor) -> Result<()> {
    monitor.start().await?;
    print_snapshot(&monitor.snapshot().await);

    let mut events = monitor.processed_events();
    let mut status = current_status(&monitor.snapshot().await);
    let mut tick = tokio::time::interval(Duration::from_secs(1));

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
            changed = events.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = monitor.snapshot().await;
                if let Some((from, to)) = observe_status(&mut status, current_status(&snapshot)) {
                    warn!(%from, %to, "Unexpected campaign status change");
                }
                print_progress(&snapshot);
            }
            _ = tick.tick() => {
                if !monitor.is_realtime_active() {
                    warn!("Realtime stream lost; run `engage show` to refresh");
                    break;
                }
            }
        }
    }

    monitor.stop().await;
    Ok(())
}

async fn run_command(
    config: &Config,
    org: Option<Uuid>,
    id: Uuid,
    command: CampaignCommand,
) -> Result<()> {
    let org = config.organization(org)?;
    let pool = DatabasePool::new(&config.database).await?;
    let feed = PgChangeFeed::new(
        pool.clone(),
        config.realtime.channel.clone(),
        config.realtime.buffer,
    );
    let board = CampaignBoard::new(
        org,
        Arc::new(DbCampaignRepository::new(pool)),
        Arc::new(feed),
        CommandDispatcher::new(BulkMessageApi::new(&config.api)?, org),
    );

    board.reload().await?;
    board
        .execute(id, command)
        .await
        .map_err(|e| anyhow!(e.user_message(command.fallback_message())))?;

    match board.campaign(id).await {
        Some(campaign) => println!("Campaign {} is now {}", id, campaign.status),
        None => println!("Campaign {} removed", id),
    }
    Ok(())
}

fn print_campaign_row(campaign: &Campaign) {
    println!(
        "{}  {:<10}  {:>5.1}%  {:>6}/{:<6} failed {:<5}  {}",
        campaign.id,
        campaign.status,
        campaign.progress_percentage(),
        campaign.messages_sent,
        campaign.total_recipients,
        campaign.messages_failed,
        campaign.name
    );
}

fn current_status(snapshot: &MonitorSnapshot) -> Option<CampaignStatus> {
    snapshot.campaign.as_ref().and_then(Campaign::status_enum)
}

/// Record `current` and return the change when the lifecycle does not allow it
fn observe_status(
    last: &mut Option<CampaignStatus>,
    current: Option<CampaignStatus>,
) -> Option<(CampaignStatus, CampaignStatus)> {
    let (Some(from), Some(to)) = (*last, current) else {
        *last = current.or(*last);
        return None;
    };
    *last = Some(to);
    (from != to && !can_transition(from, to)).then_some((from, to))
}

fn print_progress(snapshot: &MonitorSnapshot) {
    if let Some(campaign) = &snapshot.campaign {
        println!(
            "{}  {:>5.1}%  pending {}  processing {}  sent {}  failed {}",
            campaign.status,
            snapshot.progress_percentage(),
            snapshot.counts.pending,
            snapshot.counts.processing,
            snapshot.counts.sent,
            snapshot.counts.failed
        );
    }
}

fn print_snapshot(snapshot: &MonitorSnapshot) {
    if let Some(campaign) = &snapshot.campaign {
        print_campaign_row(campaign);
        let plan = SendTiming::from_campaign(campaign).plan(campaign.total_recipients.max(0) as u64);
        println!(
            "  {} batches of {}, estimated {}",
            plan.batches,
            campaign.batch_size,
            format_duration(plan.estimated_duration)
        );
    }
    print_progress(snapshot);

    let filter = snapshot
        .status_filter
        .map(|s| format!(" ({})", s))
        .unwrap_or_default();
    println!(
        "Queue page {}/{}{}, {} items",
        snapshot.page,
        snapshot.page_count().max(1),
        filter,
        snapshot.total
    );
    for entry in &snapshot.entries {
        println!(
            "  #{}.{:<3} {:<10} {:<24} {}",
            entry.batch_number,
            entry.position_in_batch,
            entry.status,
            entry.customer_name.as_deref().unwrap_or("-"),
            entry.error_message.as_deref().unwrap_or("")
        );
    }
}
