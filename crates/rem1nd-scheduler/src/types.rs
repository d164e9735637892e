use chrono::NaiveDateTime;
use rem1nd_core::Reminder;
use serde::Serialize;

/// One row returned by the due scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DueEntry {
    Ready(Reminder),
    /// The row matched the due scan but its schedule columns cannot be
    /// decoded. The engine retires these instead of looping on them.
    Malformed { id: i64, reason: String },
}

impl DueEntry {
    pub fn id(&self) -> i64 {
        match self {
            DueEntry::Ready(r) => r.id,
            DueEntry::Malformed { id, .. } => *id,
        }
    }
}

/// Schedule-state write applied when a claimed reminder is committed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// `sent = 1`; the reminder never fires again.
    Complete,
    /// `next_trigger_time = next`, `sent = 0`. `last_sent_time` is only
    /// overwritten when `Some`.
    Rearm {
        next_trigger_time: NaiveDateTime,
        last_sent_time: Option<NaiveDateTime>,
    },
}

/// What happened to one reminder during a tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Claim lost: another tick holds it or it is no longer due.
    Skipped,
    /// No credentials configured; claim released untouched.
    NoCredentials,
    /// One-shot delivered and marked sent.
    Completed,
    /// Recurring delivered and re-armed.
    Rearmed,
    /// Recurring delivered, but no next occurrence could be computed; marked sent.
    Exhausted,
    /// Malformed schedule; marked sent without delivery.
    Retired,
    /// Delivery failed; left due for the next tick.
    Failed,
    /// Delivery failed too many times; the occurrence was dropped.
    GaveUp,
}

/// Counters for one tick, logged at the end of the tick.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TickReport {
    pub due: usize,
    pub completed: usize,
    pub rearmed: usize,
    pub exhausted: usize,
    pub retired: usize,
    pub failed: usize,
    pub gave_up: usize,
    pub skipped: usize,
    /// Store or credential lookups that errored for a single reminder.
    pub errors: usize,
    pub no_credentials: bool,
    /// The tick stopped early because shutdown was requested.
    pub interrupted: bool,
}

impl TickReport {
    pub(crate) fn record(&mut self, step: Step) {
        match step {
            Step::Skipped => self.skipped += 1,
            Step::NoCredentials => self.no_credentials = true,
            Step::Completed => self.completed += 1,
            Step::Rearmed => self.rearmed += 1,
            Step::Exhausted => self.exhausted += 1,
            Step::Retired => self.retired += 1,
            Step::Failed => self.failed += 1,
            Step::GaveUp => self.gave_up += 1,
        }
    }

    /// Reminders whose delivery succeeded this tick.
    pub fn delivered(&self) -> usize {
        self.completed + self.rearmed + self.exhausted
    }
}

/// Result of asking the engine to tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    Ran(TickReport),
    /// A previous tick was still running; this one did nothing.
    Overlapped,
}
