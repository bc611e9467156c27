use crate::clock::DayBucket;
use crate::stats::{RunningStats, StatsSnapshot};
use crate::unit::Unit;
use serde::{Deserialize, Serialize};
use tsredact_common::{Result, StudyError};

/// Identity of a [`ChoiceRecord`]; at most one record per key in a store.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChoiceKey {
    pub day_bucket: DayBucket,
    pub url_category: String,
    pub element_category: String,
    pub unit: Unit,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChoiceRecord {
    key: ChoiceKey,
    frequency: u64,
    distance_stats: RunningStats,
}

/// Persisted form of a record, as stored under `msuChoices`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordSnapshot {
    pub day_bucket: DayBucket,
    pub url_category: String,
    pub element_category: String,
    pub unit: Unit,
    #[serde(default)]
    pub frequency: u64,
    #[serde(default)]
    pub distance_stats: StatsSnapshot,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DistanceSummary {
    pub mean: i64,
    pub stddev: i64,
}

/// A record as it appears in a report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportEntry {
    pub day_bucket: DayBucket,
    pub url_category: String,
    pub element_category: String,
    pub unit: Unit,
    pub frequency: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub distance_stats: Option<DistanceSummary>,
}

// nearest integer, exact halves rounded toward +inf
fn round_half_up(x: f64) -> i64 {
    if x.fract().abs() == 0.5 {
        x.ceil() as i64
    } else {
        x.round() as i64
    }
}

impl ChoiceKey {
    pub fn new(
        day_bucket: DayBucket,
        url_category: impl Into<String>,
        element_category: impl Into<String>,
        unit: Unit,
    ) -> Self {
        Self {
            day_bucket,
            url_category: url_category.into(),
            element_category: element_category.into(),
            unit,
        }
    }
}

impl ChoiceRecord {
    pub fn new(key: ChoiceKey) -> Self {
        Self {
            key,
            frequency: 0,
            distance_stats: RunningStats::new(),
        }
    }

    /// Count one occurrence. A non-finite distance means the element had no
    /// neighbour: it is counted but kept out of the distance statistic. So is
    /// a distance that would overflow the running mean or spread.
    pub fn increment(&mut self, distance: f64) {
        self.frequency += 1;
        if distance.is_finite() && !self.distance_stats.try_update(distance) {
            log::warn!(
                "distance {distance} overflows stats for {}/{}, counted without it",
                self.key.url_category,
                self.key.element_category
            );
        }
    }

    /// Fold another record's counts into this one. Keys are not compared.
    pub fn absorb(&mut self, other: &ChoiceRecord) {
        self.frequency += other.frequency;
        self.distance_stats.merge(&other.distance_stats);
    }

    pub fn matches_key(&self, key: &ChoiceKey) -> bool {
        self.key == *key
    }

    pub fn key(&self) -> &ChoiceKey {
        &self.key
    }

    pub fn day_bucket(&self) -> DayBucket {
        self.key.day_bucket
    }

    pub fn frequency(&self) -> u64 {
        self.frequency
    }

    pub fn distance_stats(&self) -> &RunningStats {
        &self.distance_stats
    }

    pub fn to_report(&self) -> ReportEntry {
        // a single sample has no meaningful spread
        let distance_stats = (self.distance_stats.count() > 1).then(|| DistanceSummary {
            mean: round_half_up(self.distance_stats.mean()),
            stddev: round_half_up(self.distance_stats.std()),
        });
        ReportEntry {
            day_bucket: self.key.day_bucket,
            url_category: self.key.url_category.clone(),
            element_category: self.key.element_category.clone(),
            unit: self.key.unit,
            frequency: self.frequency,
            distance_stats,
        }
    }

    pub fn snapshot(&self) -> RecordSnapshot {
        RecordSnapshot {
            day_bucket: self.key.day_bucket,
            url_category: self.key.url_category.clone(),
            element_category: self.key.element_category.clone(),
            unit: self.key.unit,
            frequency: self.frequency,
            distance_stats: self.distance_stats.snapshot(),
        }
    }

    pub fn from_snapshot(snap: RecordSnapshot) -> Result<Self> {
        if snap.distance_stats.count > snap.frequency {
            return Err(StudyError::malformed(
                "msuChoices",
                format!(
                    "distance count {} exceeds frequency {}",
                    snap.distance_stats.count, snap.frequency
                ),
            ));
        }
        let distance_stats = RunningStats::from_snapshot(snap.distance_stats)?;
        Ok(Self {
            key: ChoiceKey {
                day_bucket: snap.day_bucket,
                url_category: snap.url_category,
                element_category: snap.element_category,
                unit: snap.unit,
            },
            frequency: snap.frequency,
            distance_stats,
        })
    }
}
