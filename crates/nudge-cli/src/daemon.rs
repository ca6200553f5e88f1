//! Foreground scheduler daemon.
//!
//! Wires the store, the scheduler loop, and a minimal execution boundary:
//! an agent that relays the job message as-is, and a channel that writes
//! notifications to the log. Real channel integrations plug in by swapping
//! the [`NotificationChannel`] given to the session manager.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use tracing::info;

use nudge_config::NudgeConfig;
use nudge_cron::{JobStore, Scheduler};
use nudge_session::{
    Agent, ExecutionSession, NotificationChannel, SendOutcome, SessionManager,
};
use nudge_types::{JobError, OutboundNotification};

/// Passes the job message straight through as the notification payload.
/// Makes exactly one unconfirmed attempt, so `always` jobs notify,
/// `never` jobs run silently, and `auto` jobs stay held at the
/// confirmation step (there is no alert condition to affirm here).
pub struct RelayAgent;

#[async_trait]
impl Agent for RelayAgent {
    async fn run(&self, session: &mut ExecutionSession) -> Result<(), JobError> {
        let message = session.message().to_string();
        match session.send(&message, false).await? {
            SendOutcome::Sent | SendOutcome::Suppressed => Ok(()),
            SendOutcome::ConfirmationRequired { .. } => {
                info!(job_id = %session.job_id(), "Held for confirmation; not delivering");
                Ok(())
            }
        }
    }
}

/// Emits notifications as log lines.
pub struct LogChannel;

#[async_trait]
impl NotificationChannel for LogChannel {
    async fn deliver(&self, notification: &OutboundNotification) -> Result<(), JobError> {
        info!(
            channel = %notification.channel,
            to = %notification.to,
            "{}",
            notification.payload
        );
        Ok(())
    }
}

/// Run the scheduler until interrupted.
pub async fn run_daemon(config: NudgeConfig, db_path: &Path) -> anyhow::Result<()> {
    let store = Arc::new(JobStore::open(db_path).context("opening job store")?);

    let executor = Arc::new(SessionManager::new(
        Arc::new(RelayAgent),
        Arc::new(LogChannel),
        Duration::from_secs(config.scheduler.session_timeout_secs),
    ));

    let scheduler = Arc::new(Scheduler::new(
        store,
        executor,
        Duration::from_secs(config.scheduler.max_tick_secs),
    ));

    info!(db = %db_path.display(), "Starting scheduler daemon");
    let loop_task = tokio::spawn(scheduler.run());

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");
    loop_task.abort();
    Ok(())
}
