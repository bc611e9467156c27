use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tsredact_common::{Result, StudyError};

pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Whole calendar days between the opt-in date and an event.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct DayBucket(pub i64);

impl DayBucket {
    pub fn value(&self) -> i64 {
        self.0
    }
}

// canonical decimal form, used as the string key in persisted maps
impl fmt::Display for DayBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for DayBucket {
    type Err = StudyError;

    fn from_str(s: &str) -> Result<Self> {
        let v: i64 = s
            .parse()
            .map_err(|_| StudyError::malformed("viewCounts", format!("not a day bucket: {s:?}")))?;
        // reject "+3", "03" and friends so keys stay canonical
        if v.to_string() != s {
            return Err(StudyError::malformed(
                "viewCounts",
                format!("non-canonical day bucket: {s:?}"),
            ));
        }
        Ok(Self(v))
    }
}

pub fn parse_date(s: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(s, DATE_FORMAT).map_err(|e| StudyError::InvalidDate(format!("{s}: {e}")))
}

pub fn format_date(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

/// Days from `date` to `reference`; positive when `date` is earlier.
pub fn days_since(date: NaiveDate, reference: NaiveDate) -> DayBucket {
    DayBucket(reference.signed_duration_since(date).num_days())
}

/// Source of "today" for day-bucket stamping.
pub trait Clock: Send + Sync {
    fn today(&self) -> NaiveDate;

    fn days_since(&self, date: NaiveDate) -> DayBucket {
        days_since(date, self.today())
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn today(&self) -> NaiveDate {
        Utc::now().date_naive()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub NaiveDate);

impl Clock for FixedClock {
    fn today(&self) -> NaiveDate {
        self.0
    }
}
