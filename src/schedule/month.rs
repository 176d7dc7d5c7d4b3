use std::str::FromStr;

use chrono::{Datelike, Days, NaiveDate};

use super::Rule;
use crate::config::{ConfigError, Result};

/// Anchor day of a month rule
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartOfMonth {
    /// The 1st
    Beginning,
    /// The 15th
    Middle,
    /// The last calendar day
    Finish,
}

impl FromStr for PartOfMonth {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "beginning" | "begin" => Ok(Self::Beginning),
            "middle" => Ok(Self::Middle),
            "finish" | "end" => Ok(Self::Finish),
            other => Err(ConfigError::UnknownPartOfMonth(other.to_string())),
        }
    }
}

/// Fires on the anchor day of every month that is not excluded
#[derive(Debug, Clone, PartialEq)]
pub struct MonthRule {
    part: PartOfMonth,
    exclude_months: Vec<u32>,
}

impl MonthRule {
    pub fn new(part: PartOfMonth, exclude_months: &[u32]) -> Result<Self> {
        if let Some(month) = exclude_months.iter().find(|m| !(1..=12).contains(*m)) {
            return Err(ConfigError::InvalidMonth(*month));
        }

        Ok(Self {
            part,
            exclude_months: exclude_months.to_vec(),
        })
    }

    pub fn part(&self) -> PartOfMonth {
        self.part
    }
}

impl Rule for MonthRule {
    fn need_to_execute(&self, date: NaiveDate) -> bool {
        if self.exclude_months.contains(&date.month()) {
            return false;
        }

        match self.part {
            PartOfMonth::Beginning => date.day() == 1,
            PartOfMonth::Middle => date.day() == 15,
            PartOfMonth::Finish => is_finish_of_month(date),
        }
    }
}

/// Whether `date` is the last day of its month.
///
/// Takes the first day of the next month and steps back one day.
fn is_finish_of_month(date: NaiveDate) -> bool {
    let (year, month) = if date.month() == 12 {
        (date.year() + 1, 1)
    } else {
        (date.year(), date.month() + 1)
    };

    NaiveDate::from_ymd_opt(year, month, 1)
        .and_then(|first| first.checked_sub_days(Days::new(1)))
        .is_some_and(|last| last == date)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_anchors() {
        let beginning = MonthRule::new(PartOfMonth::Beginning, &[]).unwrap();
        let middle = MonthRule::new(PartOfMonth::Middle, &[]).unwrap();
        let finish = MonthRule::new(PartOfMonth::Finish, &[]).unwrap();

        assert!(beginning.need_to_execute(date(2022, 1, 1)));
        assert!(!beginning.need_to_execute(date(2022, 1, 2)));
        assert!(middle.need_to_execute(date(2022, 1, 15)));
        assert!(!middle.need_to_execute(date(2022, 1, 14)));
        assert!(finish.need_to_execute(date(2022, 1, 31)));
        assert!(!finish.need_to_execute(date(2022, 1, 30)));
    }

    #[test]
    fn test_finish_across_leap_years() {
        let finish = MonthRule::new(PartOfMonth::Finish, &[]).unwrap();

        assert!(finish.need_to_execute(date(2022, 2, 28)));
        assert!(!finish.need_to_execute(date(2024, 2, 28)));
        assert!(finish.need_to_execute(date(2024, 2, 29)));
        assert!(finish.need_to_execute(date(2023, 4, 30)));
        assert!(finish.need_to_execute(date(2023, 12, 31)));
        assert!(!finish.need_to_execute(date(2023, 12, 30)));
    }

    #[test]
    fn test_finish_fires_once_per_month() {
        let finish = MonthRule::new(PartOfMonth::Finish, &[]).unwrap();
        for year in [2023, 2024] {
            let mut day = date(year, 1, 1);
            let mut hits = 0;
            while day.year() == year {
                if finish.need_to_execute(day) {
                    hits += 1;
                    assert_eq!(day.succ_opt().unwrap().day(), 1);
                }
                day = day.succ_opt().unwrap();
            }
            assert_eq!(hits, 12);
        }
    }

    #[test]
    fn test_excluded_month_suppresses_anchor() {
        let rule = MonthRule::new(PartOfMonth::Beginning, &[3]).unwrap();
        assert!(!rule.need_to_execute(date(2022, 3, 1)));
        assert!(rule.need_to_execute(date(2022, 4, 1)));
    }

    #[test]
    fn test_parse_part_of_month() {
        assert_eq!("beginning".parse::<PartOfMonth>().unwrap(), PartOfMonth::Beginning);
        assert_eq!("Middle".parse::<PartOfMonth>().unwrap(), PartOfMonth::Middle);
        assert_eq!("finish".parse::<PartOfMonth>().unwrap(), PartOfMonth::Finish);
        assert!(matches!(
            "someday".parse::<PartOfMonth>(),
            Err(ConfigError::UnknownPartOfMonth(_))
        ));
    }

    #[test]
    fn test_invalid_month_rejected() {
        assert!(matches!(
            MonthRule::new(PartOfMonth::Middle, &[13]),
            Err(ConfigError::InvalidMonth(13))
        ));
    }
}
