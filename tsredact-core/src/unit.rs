use chrono::{Datelike, NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tsredact_common::StudyError;

/// Most significant unit kept when a timestamp is redacted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Unit {
    Year,
    Month,
    Day,
    Hour,
    Minute,
    Second,
}

/// Component reset by one truncation level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Component {
    Month,
    Day,
    Hour,
    Minute,
    Second,
}

/// Truncation levels from coarsest to finest. A level resets its component
/// whenever the selected unit is coarser than the level's unit.
const LEVELS: [(Unit, Component); 5] = [
    (Unit::Month, Component::Month),
    (Unit::Day, Component::Day),
    (Unit::Hour, Component::Hour),
    (Unit::Minute, Component::Minute),
    (Unit::Second, Component::Second),
];

pub const EXAMPLE_TIMESTAMP: &str = "2020-09-02T23:23:23";
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

impl Unit {
    pub const ALL: [Unit; 6] = [
        Unit::Year,
        Unit::Month,
        Unit::Day,
        Unit::Hour,
        Unit::Minute,
        Unit::Second,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Unit::Year => "year",
            Unit::Month => "month",
            Unit::Day => "day",
            Unit::Hour => "hour",
            Unit::Minute => "minute",
            Unit::Second => "second",
        }
    }

    /// Keep every component at or above `self`, reset the finer ones.
    pub fn truncate(&self, ts: NaiveDateTime) -> NaiveDateTime {
        let (mut month, mut day) = (ts.month(), ts.day());
        let (mut hour, mut minute, mut second) = (ts.hour(), ts.minute(), ts.second());
        for (level, component) in LEVELS {
            if *self >= level {
                continue;
            }
            match component {
                Component::Month => month = 1,
                Component::Day => day = 1,
                Component::Hour => hour = 0,
                Component::Minute => minute = 0,
                Component::Second => second = 0,
            }
        }
        let date = NaiveDate::from_ymd_opt(ts.year(), month, day).unwrap_or(ts.date());
        let time = NaiveTime::from_hms_opt(hour, minute, second).unwrap_or(ts.time());
        date.and_time(time)
    }
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Unit {
    type Err = StudyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Unit::ALL
            .into_iter()
            .find(|u| u.as_str() == s)
            .ok_or_else(|| StudyError::InvalidUnit(s.to_string()))
    }
}

pub fn parse_timestamp(s: &str) -> tsredact_common::Result<NaiveDateTime> {
    NaiveDateTime::parse_from_str(s, TIMESTAMP_FORMAT)
        .map_err(|e| StudyError::InvalidDate(format!("{s}: {e}")))
}

/// Preview of what redaction at `unit` does to a fixed sample timestamp.
pub fn redact_example(unit: Unit) -> String {
    NaiveDateTime::parse_from_str(EXAMPLE_TIMESTAMP, TIMESTAMP_FORMAT)
        .map(|ts| unit.truncate(ts).format(TIMESTAMP_FORMAT).to_string())
        .unwrap_or_else(|_| EXAMPLE_TIMESTAMP.to_string())
}

#[cfg(test)]
mod tests_unit {
    use super::*;

    #[test] fn example_year() { assert_eq!(redact_example(Unit::Year), "2020-01-01T00:00:00"); }
    #[test] fn example_month() { assert_eq!(redact_example(Unit::Month), "2020-09-01T00:00:00"); }
    #[test] fn example_day() { assert_eq!(redact_example(Unit::Day), "2020-09-02T00:00:00"); }
    #[test] fn example_hour() { assert_eq!(redact_example(Unit::Hour), "2020-09-02T23:00:00"); }
    #[test] fn example_minute() { assert_eq!(redact_example(Unit::Minute), "2020-09-02T23:23:00"); }
    #[test] fn example_second() { assert_eq!(redact_example(Unit::Second), EXAMPLE_TIMESTAMP); }

    #[test]
    fn truncate_end_of_month() {
        let ts = parse_timestamp("2021-01-31T12:34:56").unwrap();
        assert_eq!(Unit::Month.truncate(ts), parse_timestamp("2021-01-01T00:00:00").unwrap());
    }

    #[test]
    fn parse_and_display() {
        for u in Unit::ALL {
            assert_eq!(u.to_string().parse::<Unit>().unwrap(), u);
        }
        assert!(matches!("week".parse::<Unit>(), Err(StudyError::InvalidUnit(_))));
    }

    #[test]
    fn serde_is_lowercase() {
        assert_eq!(serde_json::to_string(&Unit::Minute).unwrap(), "\"minute\"");
        let u: Unit = serde_json::from_str("\"hour\"").unwrap();
        assert_eq!(u, Unit::Hour);
    }

    #[test]
    fn ordering_coarse_to_fine() {
        assert!(Unit::Year < Unit::Month);
        assert!(Unit::Minute < Unit::Second);
    }
}
