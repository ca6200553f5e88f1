//! Execution context manager.
//!
//! Opens one isolated session per firing, tagged with the job's deliver
//! policy, hands the job message to the agent boundary, and closes the
//! session when work concludes or times out. All arbiter state lives
//! inside the session value and dies with it.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use nudge_cron::scheduler::JobExecutor;
use nudge_types::{DeliverPolicy, Job, JobError, OutboundNotification};

use crate::arbiter::{ArbiterState, DeliveryArbiter, SendDecision};

/// External reasoning layer. Reads the session's message, does its work,
/// and may attempt notifications through [`ExecutionSession::send`].
#[async_trait]
pub trait Agent: Send + Sync {
    async fn run(&self, session: &mut ExecutionSession) -> Result<(), JobError>;
}

/// Notification transport. Invoked only once the arbiter decides to send.
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    async fn deliver(&self, notification: &OutboundNotification) -> Result<(), JobError>;
}

/// Result of one notification attempt, as seen by the agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    /// The payload went out on the channel.
    Sent,
    /// Suppressed by policy; treat as success, nothing was emitted.
    Suppressed,
    /// Not sent. Re-attempt with `confirm = true` if the alert condition
    /// holds; otherwise stop and nothing will ever be sent.
    ConfirmationRequired { prompt: String },
}

/// Ephemeral context for one firing.
pub struct ExecutionSession {
    job_id: String,
    message: String,
    deliver: DeliverPolicy,
    channel_id: String,
    to: String,
    arbiter: DeliveryArbiter,
    channel: Arc<dyn NotificationChannel>,
}

impl ExecutionSession {
    fn new(job: &Job, channel: Arc<dyn NotificationChannel>) -> Self {
        Self {
            job_id: job.id.clone(),
            message: job.message.clone(),
            deliver: job.deliver,
            channel_id: job.channel.clone(),
            to: job.to.clone(),
            arbiter: DeliveryArbiter::new(job.deliver),
            channel,
        }
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    /// The job's payload, the unit of work for this session.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// The deliver policy this session was opened with (read-only).
    pub fn deliver(&self) -> DeliverPolicy {
        self.deliver
    }

    pub fn arbiter_state(&self) -> ArbiterState {
        self.arbiter.state()
    }

    /// Attempt a notification. The arbiter decides whether the payload is
    /// forwarded, suppressed, or held pending confirmation. A channel
    /// failure after a send decision surfaces as `Channel` but does not
    /// roll the arbiter back: the message counts as attempted.
    pub async fn send(&mut self, payload: &str, confirm: bool) -> Result<SendOutcome, JobError> {
        match self.arbiter.decide(payload, confirm) {
            SendDecision::Forward => {
                let notification = OutboundNotification {
                    channel: self.channel_id.clone(),
                    to: self.to.clone(),
                    payload: payload.to_string(),
                };
                self.channel.deliver(&notification).await?;
                debug!(job_id = %self.job_id, channel = %self.channel_id, "Notification sent");
                Ok(SendOutcome::Sent)
            }
            SendDecision::Suppress => {
                debug!(job_id = %self.job_id, "Notification suppressed (deliver=never)");
                Ok(SendOutcome::Suppressed)
            }
            SendDecision::Prompt(prompt) => Ok(SendOutcome::ConfirmationRequired { prompt }),
        }
    }
}

/// Opens an execution session per due job and runs the agent in it, under
/// a timeout. Implements the scheduler's execution boundary.
pub struct SessionManager {
    agent: Arc<dyn Agent>,
    channel: Arc<dyn NotificationChannel>,
    session_timeout: Duration,
}

impl SessionManager {
    pub fn new(
        agent: Arc<dyn Agent>,
        channel: Arc<dyn NotificationChannel>,
        session_timeout: Duration,
    ) -> Self {
        Self {
            agent,
            channel,
            session_timeout,
        }
    }
}

#[async_trait]
impl JobExecutor for SessionManager {
    async fn execute(&self, job: &Job) -> Result<(), JobError> {
        let mut session = ExecutionSession::new(job, self.channel.clone());
        debug!(job_id = %job.id, deliver = ?job.deliver, "Execution session opened");

        let result = tokio::time::timeout(self.session_timeout, self.agent.run(&mut session)).await;

        // The session (and its arbiter) drops here whatever happened:
        // anything left awaiting confirmation is silently dropped.
        let state = session.arbiter_state();
        match result {
            Ok(Ok(())) => {
                if state == ArbiterState::AwaitingConfirmation {
                    debug!(job_id = %job.id, "Session ended unconfirmed; nothing sent");
                }
                Ok(())
            }
            Ok(Err(e)) => Err(e),
            Err(_) => {
                warn!(job_id = %job.id, "Execution session timed out");
                Err(JobError::Execution(format!(
                    "session exceeded {:?}",
                    self.session_timeout
                )))
            }
        }
    }
}
