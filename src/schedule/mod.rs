//! Recurrence rules deciding whether a task is due on a given calendar date.
//!
//! A task carries a [`PeriodRule`] made of an optional weekday rule and an
//! optional month rule. The task is due when either configured rule fires.

mod day;
mod month;

pub use day::WeekdaysRule;
pub use month::{MonthRule, PartOfMonth};

use chrono::NaiveDate;

/// A predicate over calendar dates
pub trait Rule {
    /// Whether a task governed by this rule should run on `date`
    fn need_to_execute(&self, date: NaiveDate) -> bool;
}

/// Combined recurrence of one task
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PeriodRule {
    pub day: Option<WeekdaysRule>,
    pub month: Option<MonthRule>,
}

impl PeriodRule {
    /// Rule firing on the given ISO weekdays (1 = Monday ... 7 = Sunday)
    pub fn daily(rule: WeekdaysRule) -> Self {
        Self {
            day: Some(rule),
            month: None,
        }
    }

    /// Rule firing on one anchor day of every non-excluded month
    pub fn monthly(rule: MonthRule) -> Self {
        Self {
            day: None,
            month: Some(rule),
        }
    }
}

impl Rule for PeriodRule {
    fn need_to_execute(&self, date: NaiveDate) -> bool {
        let day = self
            .day
            .as_ref()
            .is_some_and(|rule| rule.need_to_execute(date));
        let month = self
            .month
            .as_ref()
            .is_some_and(|rule| rule.need_to_execute(date));

        day || month
    }
}
