use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{NaiveDateTime, TimeDelta};
use rem1nd_core::{config::Rem1ndConfig, Clock, Reminder};
use rem1nd_mail::{MailError, Mailer, OutboundMessage};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::{
    error::Result,
    recurrence::Recurrence,
    store::{CredentialSource, ReminderStore},
    types::{DueEntry, Step, TickOutcome, TickReport, Transition},
};

/// Everything the engine talks to, injected at construction.
#[derive(Clone)]
pub struct SchedulerContext {
    pub clock: Arc<dyn Clock>,
    pub store: Arc<dyn ReminderStore>,
    pub credentials: Arc<dyn CredentialSource>,
    pub mailer: Arc<dyn Mailer>,
}

/// Runtime knobs, resolved from `[scheduler]` and `[mail]` config.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub poll_interval: Duration,
    pub delivery_timeout: Duration,
    /// How long a claim keeps other ticks off a reminder.
    pub lease: Duration,
    /// `None` retries a failing delivery forever.
    pub max_delivery_attempts: Option<u32>,
    pub recurrence: Recurrence,
    pub subject_prefix: String,
}

impl EngineSettings {
    pub fn from_config(config: &Rem1ndConfig) -> Self {
        let scheduler = &config.scheduler;
        Self {
            poll_interval: Duration::from_secs(scheduler.poll_interval_secs.max(1)),
            delivery_timeout: Duration::from_secs(scheduler.delivery_timeout_secs.max(1)),
            lease: Duration::from_secs(scheduler.lease_secs()),
            max_delivery_attempts: scheduler.max_delivery_attempts.filter(|n| *n > 0),
            recurrence: Recurrence::new(scheduler.month_policy),
            subject_prefix: config.mail.subject_prefix.clone(),
        }
    }
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self::from_config(&Rem1ndConfig::default())
    }
}

/// Polls the store for due reminders and mails them out.
///
/// All methods take `&self`; share the engine behind an `Arc` to run the loop
/// and trigger manual ticks at the same time. Ticks never overlap: a tick
/// requested while another is in flight returns [`TickOutcome::Overlapped`].
pub struct SchedulerEngine {
    ctx: SchedulerContext,
    settings: EngineSettings,
    tick_lock: tokio::sync::Mutex<()>,
    /// Consecutive failed deliveries per reminder id, with the anchor they
    /// were counted against. A new anchor starts a fresh count.
    failures: Mutex<HashMap<i64, (NaiveDateTime, u32)>>,
}

impl SchedulerEngine {
    pub fn new(ctx: SchedulerContext, settings: EngineSettings) -> Self {
        Self {
            ctx,
            settings,
            tick_lock: tokio::sync::Mutex::new(()),
            failures: Mutex::new(HashMap::new()),
        }
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Main event loop. Ticks every `poll_interval` until `shutdown` broadcasts
    /// `true` or its sender is dropped.
    ///
    /// Missed ticks are skipped rather than bursted. A tick in progress when
    /// shutdown arrives finishes the reminder it is on and then stops.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            poll_interval_secs = self.settings.poll_interval.as_secs(),
            delivery_timeout_secs = self.settings.delivery_timeout.as_secs(),
            "scheduler engine started"
        );

        let mut interval = tokio::time::interval(self.settings.poll_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.tick_with(Some(&shutdown)).await {
                        error!("scheduler tick error: {e}");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("scheduler engine shutting down");
    }

    /// Run one scan-and-dispatch pass now.
    ///
    /// Fails only when the due query itself fails; per-reminder errors are
    /// logged and counted in the report.
    pub async fn tick(&self) -> Result<TickOutcome> {
        self.tick_with(None).await
    }

    async fn tick_with(&self, shutdown: Option<&watch::Receiver<bool>>) -> Result<TickOutcome> {
        let Ok(_guard) = self.tick_lock.try_lock() else {
            warn!("previous tick still running; skipping this one");
            return Ok(TickOutcome::Overlapped);
        };

        let now = self.ctx.clock.now();
        let due = self.ctx.store.find_due(now)?;
        // Counters for reminders that are gone, sent or not yet due again.
        self.failures
            .lock()
            .unwrap()
            .retain(|id, _| due.iter().any(|entry| entry.id() == *id));
        let mut report = TickReport {
            due: due.len(),
            ..TickReport::default()
        };

        for entry in &due {
            if shutdown.is_some_and(|rx| *rx.borrow()) {
                info!(
                    remaining = report.due - processed(&report),
                    "shutdown requested; stopping tick early"
                );
                report.interrupted = true;
                break;
            }
            let id = entry.id();
            match self.process(id).await {
                Ok(Step::NoCredentials) => {
                    info!("no SMTP credentials configured; nothing sent this tick");
                    report.record(Step::NoCredentials);
                    break;
                }
                Ok(step) => report.record(step),
                Err(e) => {
                    error!(reminder_id = id, "reminder processing failed: {e}");
                    report.errors += 1;
                }
            }
        }

        if report.due > 0 {
            info!(
                due = report.due,
                delivered = report.delivered(),
                failed = report.failed,
                skipped = report.skipped,
                retired = report.retired + report.gave_up,
                errors = report.errors,
                "tick finished"
            );
        } else {
            debug!("tick finished; nothing due");
        }
        Ok(TickOutcome::Ran(report))
    }

    /// Claim, deliver and commit a single reminder.
    async fn process(&self, id: i64) -> Result<Step> {
        // Read per attempt so credential edits apply to the very next send.
        let Some(credentials) = self.ctx.credentials.active_credentials()? else {
            return Ok(Step::NoCredentials);
        };

        let now = self.ctx.clock.now();
        let token = Uuid::new_v4().to_string();
        let Some(entry) = self
            .ctx
            .store
            .claim(id, &token, now, lease_deadline(now, self.settings.lease))?
        else {
            debug!(reminder_id = id, "reminder claimed elsewhere or no longer due; skipping");
            self.failures.lock().unwrap().remove(&id);
            return Ok(Step::Skipped);
        };

        let reminder = match entry {
            DueEntry::Ready(reminder) => reminder,
            DueEntry::Malformed { reason, .. } => {
                error!(reminder_id = id, %reason, "unreadable schedule; retiring reminder without delivery");
                self.commit(id, &token, &Transition::Complete)?;
                return Ok(Step::Retired);
            }
        };

        let message = OutboundMessage::for_reminder(&self.settings.subject_prefix, &reminder);
        let timeout = self.settings.delivery_timeout;
        let delivery = match tokio::time::timeout(timeout, self.ctx.mailer.send(&credentials, &message)).await {
            Ok(result) => result,
            Err(_) => Err(MailError::Timeout {
                secs: timeout.as_secs(),
            }),
        };

        match delivery {
            Ok(()) => {
                self.failures.lock().unwrap().remove(&id);
                let sent_at = self.ctx.clock.now();
                let (transition, step) =
                    plan_after_delivery(&self.settings.recurrence, &reminder, sent_at);
                match (&step, &transition) {
                    (Step::Rearmed, Transition::Rearm { next_trigger_time, .. }) => info!(
                        reminder_id = id,
                        repeat_type = %reminder.repeat_type,
                        next_trigger_time = %next_trigger_time,
                        "recurring reminder delivered"
                    ),
                    (Step::Exhausted, _) => error!(
                        reminder_id = id,
                        repeat_type = %reminder.repeat_type,
                        repeat_interval = ?reminder.repeat_interval,
                        "no next occurrence for recurring reminder; marking it sent"
                    ),
                    _ => info!(reminder_id = id, "reminder delivered"),
                }
                self.commit(id, &token, &transition)?;
                Ok(step)
            }
            Err(e) => {
                let attempts = {
                    let mut failures = self.failures.lock().unwrap();
                    let anchor = reminder.anchor();
                    let entry = failures.entry(id).or_insert((anchor, 0));
                    if entry.0 != anchor {
                        *entry = (anchor, 0);
                    }
                    entry.1 += 1;
                    entry.1
                };
                match self.settings.max_delivery_attempts {
                    Some(max) if attempts >= max => {
                        self.failures.lock().unwrap().remove(&id);
                        let transition = plan_after_give_up(&self.settings.recurrence, &reminder);
                        error!(
                            reminder_id = id,
                            attempts,
                            "delivery failed too many times; dropping this occurrence: {e}"
                        );
                        self.commit(id, &token, &transition)?;
                        Ok(Step::GaveUp)
                    }
                    _ => {
                        warn!(reminder_id = id, attempts, "delivery failed; will retry next tick: {e}");
                        self.ctx.store.release(id, &token)?;
                        Ok(Step::Failed)
                    }
                }
            }
        }
    }

    fn commit(&self, id: i64, token: &str, transition: &Transition) -> Result<bool> {
        let applied = self.ctx.store.commit(id, token, transition)?;
        if !applied {
            warn!(
                reminder_id = id,
                "claim lost before commit (edited, deleted or lease expired); state left as is"
            );
        }
        Ok(applied)
    }
}

/// Schedule transition after a successful delivery at `sent_at`.
///
/// One-shot reminders complete. Recurring ones re-arm from their current
/// anchor, or complete as [`Step::Exhausted`] when no next occurrence exists.
pub fn plan_after_delivery(
    recurrence: &Recurrence,
    reminder: &Reminder,
    sent_at: NaiveDateTime,
) -> (Transition, Step) {
    if reminder.repeat_type.is_one_shot() {
        return (Transition::Complete, Step::Completed);
    }
    match recurrence.next(
        reminder.anchor(),
        &reminder.repeat_type,
        reminder.repeat_interval,
    ) {
        Some(next_trigger_time) => (
            Transition::Rearm {
                next_trigger_time,
                last_sent_time: Some(sent_at),
            },
            Step::Rearmed,
        ),
        None => (Transition::Complete, Step::Exhausted),
    }
}

/// Schedule transition once the retry ceiling is hit.
///
/// The failed occurrence is skipped; `last_sent_time` is left alone since
/// nothing was delivered.
pub fn plan_after_give_up(recurrence: &Recurrence, reminder: &Reminder) -> Transition {
    if reminder.repeat_type.is_one_shot() {
        return Transition::Complete;
    }
    match recurrence.next(
        reminder.anchor(),
        &reminder.repeat_type,
        reminder.repeat_interval,
    ) {
        Some(next_trigger_time) => Transition::Rearm {
            next_trigger_time,
            last_sent_time: None,
        },
        None => Transition::Complete,
    }
}

fn lease_deadline(now: NaiveDateTime, lease: Duration) -> NaiveDateTime {
    TimeDelta::from_std(lease)
        .ok()
        .and_then(|lease| now.checked_add_signed(lease))
        .unwrap_or(NaiveDateTime::MAX)
}

fn processed(report: &TickReport) -> usize {
    report.delivered()
        + report.retired
        + report.failed
        + report.gave_up
        + report.skipped
        + report.errors
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use rem1nd_core::{config::MonthPolicy, RepeatType};

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, mo, d)
            .unwrap()
            .and_hms_opt(h, mi, 0)
            .unwrap()
    }

    fn reminder(repeat_type: RepeatType, interval: Option<i64>) -> Reminder {
        Reminder {
            id: 7,
            title: "t".into(),
            content: "c".into(),
            recipient_email: "a@example.com".into(),
            trigger_time: at(2024, 1, 1, 10, 0),
            next_trigger_time: None,
            last_sent_time: None,
            sent: false,
            repeat_type,
            repeat_interval: interval,
            created_at: None,
        }
    }

    #[test]
    fn one_shot_completes() {
        let (t, step) = plan_after_delivery(
            &Recurrence::default(),
            &reminder(RepeatType::None, None),
            at(2024, 1, 1, 10, 1),
        );
        assert_eq!(t, Transition::Complete);
        assert_eq!(step, Step::Completed);
    }

    #[test]
    fn recurring_rearms_from_anchor_not_send_time() {
        let sent_at = at(2024, 1, 1, 10, 7);
        let (t, step) = plan_after_delivery(
            &Recurrence::default(),
            &reminder(RepeatType::Daily, None),
            sent_at,
        );
        assert_eq!(step, Step::Rearmed);
        assert_eq!(
            t,
            Transition::Rearm {
                next_trigger_time: at(2024, 1, 2, 10, 0),
                last_sent_time: Some(sent_at),
            }
        );
    }

    #[test]
    fn recurring_uses_next_trigger_time_when_set() {
        let mut r = reminder(RepeatType::Weekly, None);
        r.next_trigger_time = Some(at(2024, 2, 1, 10, 0));
        let (t, _) = plan_after_delivery(&Recurrence::default(), &r, at(2024, 2, 1, 10, 0));
        assert!(matches!(
            t,
            Transition::Rearm { next_trigger_time, .. } if next_trigger_time == at(2024, 2, 8, 10, 0)
        ));
    }

    #[test]
    fn custom_without_interval_is_exhausted() {
        let (t, step) = plan_after_delivery(
            &Recurrence::default(),
            &reminder(RepeatType::Custom, None),
            at(2024, 1, 1, 10, 0),
        );
        assert_eq!(t, Transition::Complete);
        assert_eq!(step, Step::Exhausted);
    }

    #[test]
    fn unknown_repeat_kind_is_exhausted() {
        let (_, step) = plan_after_delivery(
            &Recurrence::default(),
            &reminder(RepeatType::Unrecognized("hourly".into()), None),
            at(2024, 1, 1, 10, 0),
        );
        assert_eq!(step, Step::Exhausted);
    }

    #[test]
    fn give_up_skips_occurrence_without_touching_last_sent() {
        let calendar = Recurrence::new(MonthPolicy::Calendar);
        let mut r = reminder(RepeatType::Monthly, None);
        r.trigger_time = at(2024, 1, 31, 9, 0);
        assert_eq!(
            plan_after_give_up(&calendar, &r),
            Transition::Rearm {
                next_trigger_time: at(2024, 2, 29, 9, 0),
                last_sent_time: None,
            }
        );
        assert_eq!(
            plan_after_give_up(&calendar, &reminder(RepeatType::None, None)),
            Transition::Complete
        );
    }

    #[test]
    fn settings_follow_config() {
        let mut config = Rem1ndConfig::default();
        config.scheduler.poll_interval_secs = 0;
        config.scheduler.delivery_timeout_secs = 10;
        config.scheduler.max_delivery_attempts = Some(0);
        config.mail.subject_prefix = "[r] ".into();
        let settings = EngineSettings::from_config(&config);
        assert_eq!(settings.poll_interval, Duration::from_secs(1));
        assert_eq!(settings.lease, Duration::from_secs(20));
        assert_eq!(settings.max_delivery_attempts, None);
        assert_eq!(settings.subject_prefix, "[r] ");
    }

    #[test]
    fn lease_deadline_saturates() {
        let now = at(2024, 1, 1, 0, 0);
        assert_eq!(
            lease_deadline(now, Duration::from_secs(90)),
            at(2024, 1, 1, 0, 1) + TimeDelta::seconds(30)
        );
        assert_eq!(lease_deadline(now, Duration::MAX), NaiveDateTime::MAX);
    }
}
