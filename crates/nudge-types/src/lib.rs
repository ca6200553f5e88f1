//! nudge-types: shared data model for the nudge job engine.
//!
//! Defines the persisted job record, its schedule variants, the delivery
//! policy enum, partial-update patches, and the bulk import/export document.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

// ──────────────────── Errors ────────────────────

/// Error taxonomy for job management and execution.
#[derive(Debug, Error)]
pub enum JobError {
    /// Malformed schedule, unknown timezone, missing required field.
    /// Raised synchronously at add/update/import time; nothing is persisted.
    #[error("validation error: {0}")]
    Validation(String),
    /// Operation targeted an unknown job id.
    #[error("job not found: {0}")]
    NotFound(String),
    /// Handoff or agent failure during a firing. Logged; the job keeps
    /// its place in the schedule.
    #[error("execution error: {0}")]
    Execution(String),
    /// Notification delivery failed after the send decision was made.
    #[error("channel error: {0}")]
    Channel(String),
}

// ──────────────────── Delivery policy ────────────────────

/// Governs whether a firing's output reaches the user.
///
/// `Auto` requires the confirm-then-send handshake: the first notification
/// attempt in a session returns a prompt instead of sending, and only a
/// re-attempt carrying the confirmation flag goes out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliverPolicy {
    /// Send on the first attempt, no handshake.
    #[default]
    Always,
    /// Two-phase: prompt first, send only on a confirmed re-attempt.
    Auto,
    /// Suppress every attempt (the caller still gets a success ack).
    Never,
}

// ──────────────────── Schedule ────────────────────

/// When a job fires. Exactly one variant per job, enforced by the type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Schedule {
    /// Standard 5-field cron expression, evaluated in an IANA timezone
    /// (UTC when `tz` is absent).
    Cron {
        expr: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tz: Option<String>,
    },
    /// Fixed-period recurrence. First fire is immediate, then every
    /// `seconds` from the previous fire.
    Every { seconds: u64 },
    /// Single absolute timestamp; fires at most once.
    At { at: DateTime<Utc> },
}

// ──────────────────── Job ────────────────────

/// A persisted schedule + payload + delivery-policy record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// Unique id, assigned at creation, immutable.
    pub id: String,
    /// Human label.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Text payload handed to the execution session on firing.
    pub message: String,
    /// Recurrence specification.
    pub schedule: Schedule,
    /// Delivery policy for session output.
    #[serde(default)]
    pub deliver: DeliverPolicy,
    /// Destination channel (opaque to the engine).
    pub channel: String,
    /// Destination recipient on the channel (opaque to the engine).
    pub to: String,
    /// Disabled jobs stay stored but are never scheduled.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Set after each completed firing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_fired_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// Label to show in listings: the name if set, else a prefix of the
    /// message.
    pub fn display_name(&self) -> String {
        match &self.name {
            Some(n) => n.clone(),
            None => truncate_label(&self.message, 30),
        }
    }
}

fn truncate_label(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        let cut: String = text.chars().take(max_chars).collect();
        format!("{cut}…")
    }
}

fn default_true() -> bool {
    true
}

// ──────────────────── Partial update ────────────────────

/// Partial update for a job. Absent fields are left untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule: Option<Schedule>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deliver: Option<DeliverPolicy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
}

impl JobPatch {
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.message.is_none()
            && self.schedule.is_none()
            && self.deliver.is_none()
            && self.channel.is_none()
            && self.to.is_none()
            && self.enabled.is_none()
    }

    /// Apply the patch to a job. A schedule change resets `last_fired_at`
    /// so the new schedule is evaluated fresh.
    pub fn apply(&self, job: &mut Job) {
        if let Some(name) = &self.name {
            job.name = Some(name.clone());
        }
        if let Some(message) = &self.message {
            job.message = message.clone();
        }
        if let Some(schedule) = &self.schedule {
            job.schedule = schedule.clone();
            job.last_fired_at = None;
        }
        if let Some(deliver) = self.deliver {
            job.deliver = deliver;
        }
        if let Some(channel) = &self.channel {
            job.channel = channel.clone();
        }
        if let Some(to) = &self.to {
            job.to = to.clone();
        }
        if let Some(enabled) = self.enabled {
            job.enabled = enabled;
        }
    }
}

// ──────────────────── Bulk import/export ────────────────────

/// One entry in the bulk document. `id` appears on export but is ignored
/// on import — import always allocates fresh ids.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub message: String,
    pub schedule: Schedule,
    #[serde(default)]
    pub deliver: DeliverPolicy,
    pub channel: String,
    pub to: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl From<&Job> for JobSpec {
    fn from(job: &Job) -> Self {
        Self {
            id: Some(job.id.clone()),
            name: job.name.clone(),
            message: job.message.clone(),
            schedule: job.schedule.clone(),
            deliver: job.deliver,
            channel: job.channel.clone(),
            to: job.to.clone(),
            enabled: job.enabled,
        }
    }
}

/// Top-level bulk document: `{"jobs": [...]}`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobBatch {
    pub jobs: Vec<JobSpec>,
}

// ──────────────────── Notification ────────────────────

/// Payload handed to the notification channel once a send is decided.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundNotification {
    pub channel: String,
    pub to: String,
    pub payload: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn make_job() -> Job {
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        Job {
            id: "job-1".into(),
            name: Some("morning check".into()),
            message: "check the weather".into(),
            schedule: Schedule::Cron {
                expr: "0 9 * * *".into(),
                tz: Some("America/Vancouver".into()),
            },
            deliver: DeliverPolicy::Auto,
            channel: "telegram".into(),
            to: "chat-42".into(),
            enabled: true,
            last_fired_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_schedule_serde_tagged() {
        let s = Schedule::Every { seconds: 60 };
        let json = serde_json::to_string(&s).unwrap();
        assert_eq!(json, r#"{"kind":"every","seconds":60}"#);

        let parsed: Schedule = serde_json::from_str(r#"{"kind":"cron","expr":"0 9 * * *"}"#).unwrap();
        assert_eq!(
            parsed,
            Schedule::Cron {
                expr: "0 9 * * *".into(),
                tz: None
            }
        );
    }

    #[test]
    fn test_deliver_policy_serde() {
        assert_eq!(serde_json::to_string(&DeliverPolicy::Auto).unwrap(), "\"auto\"");
        let p: DeliverPolicy = serde_json::from_str("\"never\"").unwrap();
        assert_eq!(p, DeliverPolicy::Never);
        // Unknown values are not representable
        assert!(serde_json::from_str::<DeliverPolicy>("\"sometimes\"").is_err());
    }

    #[test]
    fn test_deliver_policy_default() {
        let spec: JobSpec = serde_json::from_str(
            r#"{"message":"m","schedule":{"kind":"every","seconds":5},"channel":"c","to":"t"}"#,
        )
        .unwrap();
        assert_eq!(spec.deliver, DeliverPolicy::Always);
        assert!(spec.enabled);
    }

    #[test]
    fn test_patch_apply_partial() {
        let mut job = make_job();
        let patch = JobPatch {
            message: Some("check the surf".into()),
            enabled: Some(false),
            ..Default::default()
        };
        patch.apply(&mut job);
        assert_eq!(job.message, "check the surf");
        assert!(!job.enabled);
        // Untouched fields survive
        assert_eq!(job.deliver, DeliverPolicy::Auto);
        assert_eq!(job.name.as_deref(), Some("morning check"));
    }

    #[test]
    fn test_patch_schedule_resets_last_fired() {
        let mut job = make_job();
        job.last_fired_at = Some(Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap());
        let patch = JobPatch {
            schedule: Some(Schedule::Every { seconds: 120 }),
            ..Default::default()
        };
        patch.apply(&mut job);
        assert!(job.last_fired_at.is_none());
    }

    #[test]
    fn test_job_batch_roundtrip() {
        let batch = JobBatch {
            jobs: vec![JobSpec::from(&make_job())],
        };
        let json = serde_json::to_string_pretty(&batch).unwrap();
        let parsed: JobBatch = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.jobs.len(), 1);
        assert_eq!(parsed.jobs[0].message, "check the weather");
        assert_eq!(parsed.jobs[0].deliver, DeliverPolicy::Auto);
    }

    #[test]
    fn test_display_name_falls_back_to_message() {
        let mut job = make_job();
        job.name = None;
        job.message = "a".repeat(50);
        let label = job.display_name();
        assert!(label.chars().count() <= 31);
        assert!(label.ends_with('…'));
    }
}
