//! Monthly date windows used to split a period into one query per month.
use chrono::{Datelike, Months, NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use std::fmt;

pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Half-open date range `[start, end)`.
#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TimeWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl TimeWindow {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        Self { start, end }
    }

    pub fn start_str(self: &Self) -> String {
        self.start.format(DATE_FORMAT).to_string()
    }

    pub fn end_str(self: &Self) -> String {
        self.end.format(DATE_FORMAT).to_string()
    }

    /// Start and end as UTC epoch milliseconds, the unit date filters expect.
    pub fn epoch_millis(self: &Self) -> (i64, i64) {
        let millis = |d: NaiveDate| d.and_time(NaiveTime::MIN).and_utc().timestamp_millis();
        (millis(self.start), millis(self.end))
    }
}

impl fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{},{})", self.start_str(), self.end_str())
    }
}

fn first_of_next_month(date: NaiveDate) -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(date.year(), date.month(), 1)?.checked_add_months(Months::new(1))
}

/// Splits `[start, end)` into consecutive windows that each end on the first
/// day of the following month. The last window is clamped to `end`.
pub fn monthly_windows(start: NaiveDate, end: NaiveDate) -> Vec<TimeWindow> {
    let mut windows = vec![];
    let mut current = start;

    while current < end {
        let next = match first_of_next_month(current) {
            Some(next) if next < end => next,
            _ => end,
        };
        windows.push(TimeWindow::new(current, next));
        current = next;
    }
    windows
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, DATE_FORMAT).unwrap()
    }

    #[test]
    fn test_two_month_period() {
        let windows = monthly_windows(date("2017-01-01"), date("2017-03-01"));
        assert_eq!(
            windows,
            vec![
                TimeWindow::new(date("2017-01-01"), date("2017-02-01")),
                TimeWindow::new(date("2017-02-01"), date("2017-03-01")),
            ]
        );
    }

    #[test]
    fn test_full_period_window_count() {
        let windows = monthly_windows(date("2017-01-01"), date("2024-01-01"));
        assert_eq!(windows.len(), 84);
        assert_eq!(windows.last().unwrap().end, date("2024-01-01"));
    }

    #[test]
    fn test_mid_month_bounds() {
        let windows = monthly_windows(date("2017-01-15"), date("2017-03-10"));
        assert_eq!(windows.len(), 3);
        assert_eq!(windows[0], TimeWindow::new(date("2017-01-15"), date("2017-02-01")));
        assert_eq!(windows[2], TimeWindow::new(date("2017-03-01"), date("2017-03-10")));
    }

    #[test]
    fn test_december_rollover() {
        let windows = monthly_windows(date("2019-12-01"), date("2020-02-01"));
        assert_eq!(windows[0].end, date("2020-01-01"));
        assert_eq!(windows[1].start, date("2020-01-01"));
    }

    #[test]
    fn test_empty_period() {
        assert!(monthly_windows(date("2017-03-01"), date("2017-03-01")).is_empty());
        assert!(monthly_windows(date("2017-04-01"), date("2017-03-01")).is_empty());
    }

    #[test]
    fn test_epoch_millis() {
        let w = TimeWindow::new(date("1970-01-01"), date("1970-01-02"));
        assert_eq!(w.epoch_millis(), (0, 86_400_000));
        assert_eq!(w.to_string(), "[1970-01-01,1970-01-02)");
    }
}
