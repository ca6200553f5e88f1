//! nudge-session: execution sessions and the delivery arbiter.
//!
//! One [`session::ExecutionSession`] exists per firing. It carries the
//! job's deliver policy as an explicit field (never ambient state, so the
//! tag cannot leak across firings) and owns the [`arbiter::DeliveryArbiter`]
//! that enforces the confirm-then-send handshake for `auto` delivery.

pub mod arbiter;
pub mod session;

pub use arbiter::{ArbiterState, DeliveryArbiter};
pub use session::{Agent, ExecutionSession, NotificationChannel, SendOutcome, SessionManager};
