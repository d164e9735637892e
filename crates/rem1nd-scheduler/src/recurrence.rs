use chrono::{Months, NaiveDateTime, TimeDelta};
use rem1nd_core::{config::MonthPolicy, RepeatType};

/// Next anchor for `repeat` under the default (fixed-width) policy.
///
/// See [`Recurrence::next`].
pub fn next_occurrence(
    anchor: NaiveDateTime,
    repeat: &RepeatType,
    interval: Option<i64>,
) -> Option<NaiveDateTime> {
    Recurrence::default().next(anchor, repeat, interval)
}

/// Recurrence calculator.
///
/// `monthly` and `yearly` are fixed-width by default (+30 and +365 days),
/// so a monthly reminder drifts against the calendar and a yearly one slips
/// a day across Feb 29. That is the historical behaviour existing schedules
/// were created under; [`MonthPolicy::Calendar`] opts into calendar months.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Recurrence {
    month_policy: MonthPolicy,
}

impl Recurrence {
    pub fn new(month_policy: MonthPolicy) -> Self {
        Self { month_policy }
    }

    /// Compute the anchor that follows `anchor`.
    ///
    /// Returns `None` (terminal) for one-shot and unrecognized repeat types,
    /// for `custom` without a positive `interval`, and when the result would
    /// leave chrono's representable range. A returned instant is always
    /// strictly later than `anchor`.
    pub fn next(
        &self,
        anchor: NaiveDateTime,
        repeat: &RepeatType,
        interval: Option<i64>,
    ) -> Option<NaiveDateTime> {
        match repeat {
            RepeatType::None | RepeatType::Unrecognized(_) => None,
            RepeatType::Daily => add_days(anchor, 1),
            RepeatType::Weekly => add_days(anchor, 7),
            RepeatType::Monthly => match self.month_policy {
                MonthPolicy::FixedWidth => add_days(anchor, 30),
                MonthPolicy::Calendar => anchor.checked_add_months(Months::new(1)),
            },
            RepeatType::Yearly => match self.month_policy {
                MonthPolicy::FixedWidth => add_days(anchor, 365),
                MonthPolicy::Calendar => anchor.checked_add_months(Months::new(12)),
            },
            RepeatType::Custom => match interval {
                Some(days) if days > 0 => add_days(anchor, days),
                _ => None,
            },
        }
    }
}

fn add_days(anchor: NaiveDateTime, days: i64) -> Option<NaiveDateTime> {
    anchor.checked_add_signed(TimeDelta::try_days(days)?)
}
