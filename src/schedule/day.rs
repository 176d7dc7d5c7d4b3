use chrono::{Datelike, NaiveDate};

use super::Rule;
use crate::config::{ConfigError, Result};

/// Fires on every weekday that is not excluded.
///
/// Built from the days a task should run on; stored as the complement so
/// evaluation is a single membership check.
#[derive(Debug, Clone, PartialEq)]
pub struct WeekdaysRule {
    exclude_days: Vec<u32>,
}

impl WeekdaysRule {
    /// Build from ISO weekday numbers (1 = Monday ... 7 = Sunday).
    ///
    /// An empty list excludes every day.
    pub fn new(repeat: &[u32]) -> Result<Self> {
        if let Some(day) = repeat.iter().find(|d| !(1..=7).contains(*d)) {
            return Err(ConfigError::InvalidWeekday(*day));
        }

        let exclude_days = (1..=7).filter(|d| !repeat.contains(d)).collect();
        Ok(Self { exclude_days })
    }

    pub fn excluded_days(&self) -> &[u32] {
        &self.exclude_days
    }
}

impl Rule for WeekdaysRule {
    fn need_to_execute(&self, date: NaiveDate) -> bool {
        let weekday = date.weekday().number_from_monday();
        !self.exclude_days.contains(&weekday)
    }
}
