//! Delivery arbiter — the confirm-then-send state machine.
//!
//! One arbiter per execution session. Under `auto` delivery a single blind
//! attempt can never send: the first attempt returns a prompt, and only a
//! re-attempt carrying the confirmation flag forwards the payload. A
//! session that ends without a confirmed attempt sends nothing — silence
//! is the safe default.

use nudge_types::DeliverPolicy;

/// Arbiter position within a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArbiterState {
    NotAttempted,
    AwaitingConfirmation,
    Sent,
}

/// What the session should do with one notification attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendDecision {
    /// Forward the payload to the channel.
    Forward,
    /// Drop the payload, acknowledge success to the caller.
    Suppress,
    /// Don't send; hand this prompt back to the caller instead.
    Prompt(String),
}

pub struct DeliveryArbiter {
    policy: DeliverPolicy,
    state: ArbiterState,
}

impl DeliveryArbiter {
    pub fn new(policy: DeliverPolicy) -> Self {
        Self {
            policy,
            state: ArbiterState::NotAttempted,
        }
    }

    pub fn state(&self) -> ArbiterState {
        self.state
    }

    /// Arbitrate one notification attempt.
    pub fn decide(&mut self, payload: &str, confirm: bool) -> SendDecision {
        match self.policy {
            DeliverPolicy::Always => {
                self.state = ArbiterState::Sent;
                SendDecision::Forward
            }
            DeliverPolicy::Never => {
                // State stays NotAttempted; the caller still sees success.
                SendDecision::Suppress
            }
            DeliverPolicy::Auto => match self.state {
                ArbiterState::NotAttempted => {
                    self.state = ArbiterState::AwaitingConfirmation;
                    SendDecision::Prompt(confirmation_prompt(payload))
                }
                ArbiterState::AwaitingConfirmation if confirm => {
                    self.state = ArbiterState::Sent;
                    SendDecision::Forward
                }
                // Unconfirmed re-attempt: same prompt, no state change.
                ArbiterState::AwaitingConfirmation => {
                    SendDecision::Prompt(confirmation_prompt(payload))
                }
                // Intent was already affirmed this session.
                ArbiterState::Sent => SendDecision::Forward,
            },
        }
    }
}

fn confirmation_prompt(payload: &str) -> String {
    let preview: String = payload.chars().take(200).collect();
    let ellipsis = if payload.chars().count() > 200 { "..." } else { "" };
    format!(
        "[CONFIRM_NEEDED] This job has deliver=auto. Only send if the alert \
         condition is met; do not send for routine completion.\n\n\
         Preview: {preview:?}{ellipsis}\n\n\
         If the condition is met, attempt again with the same content and \
         confirm=true. Otherwise do not attempt again (nothing will be sent)."
    )
}
