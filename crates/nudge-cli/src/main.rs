mod daemon;

use std::path::PathBuf;

use anyhow::{Context, bail};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};

use nudge_cron::{JobStore, next_fire_time};
use nudge_types::{DeliverPolicy, Job, JobBatch, JobPatch, JobSpec, Schedule};

#[derive(Parser)]
#[command(name = "nudge", about = "Scheduled reminder and background job engine")]
struct Cli {
    /// Job database path (overrides config)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Add a job
    Add {
        /// Message handed to the execution session on each firing
        message: String,

        /// Human label for listings
        #[arg(short, long)]
        name: Option<String>,

        /// 5-field cron expression (e.g. "0 9 * * mon-fri")
        #[arg(long, conflicts_with_all = ["every", "at"])]
        cron: Option<String>,

        /// IANA timezone for --cron (defaults to UTC)
        #[arg(long, requires = "cron")]
        tz: Option<String>,

        /// Fire every N seconds, starting now
        #[arg(long, conflicts_with = "at")]
        every: Option<u64>,

        /// Fire once at an RFC 3339 instant (e.g. "2026-09-01T09:00:00Z")
        #[arg(long)]
        at: Option<String>,

        /// Delivery policy: always, auto, or never
        #[arg(long, default_value = "always")]
        deliver: String,

        /// Destination channel (falls back to config delivery.channel)
        #[arg(long)]
        channel: Option<String>,

        /// Destination recipient (falls back to config delivery.to)
        #[arg(long)]
        to: Option<String>,

        /// Create the job disabled
        #[arg(long)]
        disabled: bool,
    },
    /// List jobs
    List {
        /// Include disabled jobs
        #[arg(short, long)]
        all: bool,
    },
    /// Show one job as JSON
    Get { id: String },
    /// Update fields of a job
    Update {
        id: String,

        #[arg(short, long)]
        name: Option<String>,

        #[arg(short, long)]
        message: Option<String>,

        #[arg(long, conflicts_with_all = ["every", "at"])]
        cron: Option<String>,

        #[arg(long, requires = "cron")]
        tz: Option<String>,

        #[arg(long, conflicts_with = "at")]
        every: Option<u64>,

        #[arg(long)]
        at: Option<String>,

        #[arg(long)]
        deliver: Option<String>,

        #[arg(long)]
        channel: Option<String>,

        #[arg(long)]
        to: Option<String>,
    },
    /// Re-enable a disabled job
    Enable { id: String },
    /// Disable a job without deleting it
    Disable { id: String },
    /// Delete a job
    Remove { id: String },
    /// Write jobs as a JSON document to stdout or a file
    Export {
        /// Restrict to these job ids
        ids: Vec<String>,

        /// Include disabled jobs
        #[arg(short, long)]
        all: bool,

        /// Output file (stdout if omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Add jobs from a JSON document (fresh ids are assigned)
    Import {
        /// Input file
        file: PathBuf,
    },
    /// Run the scheduler daemon in the foreground
    Run,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = nudge_config::load_config().unwrap_or_default();
    let db_path = match &cli.db {
        Some(p) => p.clone(),
        None => {
            nudge_config::ensure_config_dir()?;
            config.store_path()?
        }
    };

    match cli.command {
        Commands::Add {
            message,
            name,
            cron,
            tz,
            every,
            at,
            deliver,
            channel,
            to,
            disabled,
        } => {
            let schedule = build_schedule(cron, tz, every, at)?
                .context("one of --cron, --every, or --at is required")?;
            let channel = channel
                .or(config.delivery.channel.clone())
                .context("no channel given and no delivery.channel configured")?;
            let to = to
                .or(config.delivery.to.clone())
                .context("no recipient given and no delivery.to configured")?;

            let store = JobStore::open(&db_path)?;
            let job = store.add(&JobSpec {
                id: None,
                name,
                message,
                schedule,
                deliver: parse_deliver(&deliver)?,
                channel,
                to,
                enabled: !disabled,
            })?;
            println!("Added job {} ({})", job.id, job.display_name());
        }
        Commands::List { all } => {
            let store = JobStore::open(&db_path)?;
            let jobs = store.list(all)?;
            if jobs.is_empty() {
                println!("No jobs");
            }
            let now = Utc::now();
            for job in &jobs {
                println!("{}", format_job_line(job, now));
            }
        }
        Commands::Get { id } => {
            let store = JobStore::open(&db_path)?;
            let job = store.get(&id)?;
            println!("{}", serde_json::to_string_pretty(&job)?);
        }
        Commands::Update {
            id,
            name,
            message,
            cron,
            tz,
            every,
            at,
            deliver,
            channel,
            to,
        } => {
            let patch = JobPatch {
                name,
                message,
                schedule: build_schedule(cron, tz, every, at)?,
                deliver: deliver.as_deref().map(parse_deliver).transpose()?,
                channel,
                to,
                enabled: None,
            };
            if patch.is_empty() {
                bail!("nothing to update");
            }
            let store = JobStore::open(&db_path)?;
            let job = store.update(&id, &patch)?;
            println!("Updated job {} ({})", job.id, job.display_name());
        }
        Commands::Enable { id } => {
            let store = JobStore::open(&db_path)?;
            store.set_enabled(&id, true)?;
            println!("Enabled {id}");
        }
        Commands::Disable { id } => {
            let store = JobStore::open(&db_path)?;
            store.set_enabled(&id, false)?;
            println!("Disabled {id}");
        }
        Commands::Remove { id } => {
            let store = JobStore::open(&db_path)?;
            if store.remove(&id)? {
                println!("Removed {id}");
            } else {
                bail!("no job with id {id}");
            }
        }
        Commands::Export { ids, all, output } => {
            let store = JobStore::open(&db_path)?;
            let wanted = if ids.is_empty() { None } else { Some(&ids[..]) };
            let batch = store.export(wanted, all)?;
            let doc = serde_json::to_string_pretty(&batch)?;
            match output {
                Some(path) => {
                    std::fs::write(&path, doc)?;
                    println!("Exported {} jobs to {}", batch.jobs.len(), path.display());
                }
                None => println!("{doc}"),
            }
        }
        Commands::Import { file } => {
            let content = std::fs::read_to_string(&file)
                .with_context(|| format!("reading {}", file.display()))?;
            let batch: JobBatch = serde_json::from_str(&content)?;
            let store = JobStore::open(&db_path)?;
            let ids = store.import(&batch)?;
            println!("Imported {} jobs", ids.len());
            for id in ids {
                println!("  {id}");
            }
        }
        Commands::Run => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(daemon::run_daemon(config, &db_path))?;
        }
    }

    Ok(())
}

/// Assemble a schedule from the mutually exclusive CLI flags. Returns
/// `Ok(None)` when none were given (valid for `update`).
fn build_schedule(
    cron: Option<String>,
    tz: Option<String>,
    every: Option<u64>,
    at: Option<String>,
) -> anyhow::Result<Option<Schedule>> {
    match (cron, every, at) {
        (Some(expr), None, None) => Ok(Some(Schedule::Cron { expr, tz })),
        (None, Some(seconds), None) => Ok(Some(Schedule::Every { seconds })),
        (None, None, Some(at)) => {
            let at = DateTime::parse_from_rfc3339(&at)
                .with_context(|| format!("invalid RFC 3339 timestamp: {at}"))?
                .with_timezone(&Utc);
            Ok(Some(Schedule::At { at }))
        }
        (None, None, None) => Ok(None),
        _ => bail!("--cron, --every, and --at are mutually exclusive"),
    }
}

fn parse_deliver(s: &str) -> anyhow::Result<DeliverPolicy> {
    match s {
        "always" => Ok(DeliverPolicy::Always),
        "auto" => Ok(DeliverPolicy::Auto),
        "never" => Ok(DeliverPolicy::Never),
        other => bail!("unknown deliver policy: {other} (expected always, auto, or never)"),
    }
}

fn format_job_line(job: &Job, now: DateTime<Utc>) -> String {
    let schedule = match &job.schedule {
        Schedule::Cron { expr, tz } => match tz {
            Some(tz) => format!("cron \"{expr}\" ({tz})"),
            None => format!("cron \"{expr}\""),
        },
        Schedule::Every { seconds } => format!("every {seconds}s"),
        Schedule::At { at } => format!("at {}", at.to_rfc3339()),
    };
    let next = if !job.enabled {
        "disabled".to_string()
    } else {
        match next_fire_time(&job.schedule, job.last_fired_at, now) {
            Some(t) => format!("next {}", t.to_rfc3339()),
            None => "done".to_string(),
        }
    };
    let deliver = match job.deliver {
        DeliverPolicy::Always => "always",
        DeliverPolicy::Auto => "auto",
        DeliverPolicy::Never => "never",
    };
    format!(
        "{}  {}  [{}]  deliver={}  {}  -> {}:{}",
        job.id,
        job.display_name(),
        schedule,
        deliver,
        next,
        job.channel,
        job.to
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_schedule_cron() {
        let s = build_schedule(Some("*/5 * * * *".into()), Some("UTC".into()), None, None)
            .unwrap()
            .unwrap();
        assert!(matches!(s, Schedule::Cron { .. }));
    }

    #[test]
    fn test_build_schedule_none() {
        assert!(build_schedule(None, None, None, None).unwrap().is_none());
    }

    #[test]
    fn test_build_schedule_at_rejects_garbage() {
        assert!(build_schedule(None, None, None, Some("tomorrow".into())).is_err());
    }

    #[test]
    fn test_parse_deliver() {
        assert_eq!(parse_deliver("auto").unwrap(), DeliverPolicy::Auto);
        assert!(parse_deliver("sometimes").is_err());
    }
}
