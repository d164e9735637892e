//! `rem1nd-scheduler` — persistent reminder store and the dispatch engine.
//!
//! # Overview
//!
//! Reminders live in a SQLite `reminders` table. The [`engine::SchedulerEngine`]
//! polls it on a fixed interval (30 s by default), mails every reminder whose
//! anchor (`next_trigger_time`, else `trigger_time`) has passed, and writes
//! back the new schedule state one row at a time. A per-row claim lease keeps
//! overlapping ticks, even from separate processes, from delivering the same
//! occurrence twice.
//!
//! # Repeat kinds
//!
//! | Kind      | Next anchor                                   |
//! |-----------|-----------------------------------------------|
//! | `none`    | terminal (one-shot)                           |
//! | `daily`   | +1 day                                        |
//! | `weekly`  | +7 days                                       |
//! | `monthly` | +30 days, or +1 calendar month (`calendar`)   |
//! | `yearly`  | +365 days, or +12 calendar months (`calendar`) |
//! | `custom`  | +`repeat_interval` days; terminal if unset    |

pub mod db;
pub mod engine;
pub mod error;
pub mod recurrence;
pub mod store;
pub mod types;

pub use engine::{EngineSettings, SchedulerContext, SchedulerEngine};
pub use error::{Result, SchedulerError};
pub use recurrence::{next_occurrence, Recurrence};
pub use store::{CredentialSource, ReminderStore, SqliteStore};
pub use types::{DueEntry, Step, TickOutcome, TickReport, Transition};
