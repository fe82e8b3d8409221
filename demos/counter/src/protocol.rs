//! Counter-specific protocol types.

use serde::{Deserialize, Serialize};

/// Endpoint name both sides agree on.
pub const ENDPOINT: &str = "counter";

/// Add `by` (default 1) to the counter; returns the new count.
pub const INCREMENT: &str = "increment";
/// Set the counter back to zero.
pub const RESET: &str = "reset";

/// Directive broadcast on every server tick.
pub const TICK: &str = "tick";

/// Counter state as seen by clients.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CounterState {
    pub count: i64,
    /// Who changed the count last (the action name).
    pub last_action: Option<String>,
}

/// Payload of the `tick` directive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tick {
    pub seq: u64,
    /// Seconds since the Unix epoch.
    pub at: u64,
}
