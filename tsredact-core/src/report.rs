use crate::clock::DayBucket;
use crate::record::ReportEntry;
use crate::store::ChoiceStore;
use crate::views::ViewCounter;
use serde::{Deserialize, Serialize};
use tsredact_common::Result;

/// Half-open day range `[first, until)`; `until == None` is unbounded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DayRange {
    pub first: DayBucket,
    pub until: Option<DayBucket>,
}

impl DayRange {
    pub fn new(first: i64, until: Option<i64>) -> Self {
        Self {
            first: DayBucket(first),
            until: until.map(DayBucket),
        }
    }

    /// `[0, +inf)`
    pub fn all() -> Self {
        Self::default()
    }

    pub fn contains(&self, day: DayBucket) -> bool {
        day >= self.first && self.until.map_or(true, |until| day < until)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Report {
    pub participant_identifier: Option<String>,
    pub entries: Vec<ReportEntry>,
    pub view_counts: ViewCounter,
}

impl Report {
    /// Project the store and view table onto `range`. Read-only.
    pub fn build(
        participant_identifier: Option<String>,
        choices: &ChoiceStore,
        views: &ViewCounter,
        range: DayRange,
    ) -> Self {
        let entries = choices
            .records()
            .iter()
            .filter(|r| range.contains(r.day_bucket()))
            .map(|r| r.to_report())
            .collect();
        Self {
            participant_identifier,
            entries,
            view_counts: views.filter_days(|day| range.contains(day)),
        }
    }

    pub fn to_json(&self, pretty: bool) -> Result<String> {
        let s = if pretty {
            serde_json::to_string_pretty(self)?
        } else {
            serde_json::to_string(self)?
        };
        Ok(s)
    }
}
