// Clock abstraction so timestamps (and the session ids derived from them) are testable

use chrono::{DateTime, SubsecRound, Utc};

/// Source of wall-clock time, truncated to whole seconds
pub trait Clock: Send + Sync {
    fn now_utc(&self) -> DateTime<Utc>;
}

/// Real system clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_utc(&self) -> DateTime<Utc> {
        Utc::now().trunc_subsecs(0)
    }
}

/// Clock pinned to a single instant
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now_utc(&self) -> DateTime<Utc> {
        self.0.trunc_subsecs(0)
    }
}
