use crate::clock::DayBucket;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use tsredact_common::{Result, StudyError};

pub type CategoryCounts = BTreeMap<String, u64>;

/// Page views per day bucket and url category.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ViewCounter {
    days: BTreeMap<DayBucket, CategoryCounts>,
}

impl ViewCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_view(&mut self, day: DayBucket, url_category: &str) -> u64 {
        let count = self
            .days
            .entry(day)
            .or_default()
            .entry(url_category.to_string())
            .or_insert(0);
        *count += 1;
        *count
    }

    pub fn count(&self, day: DayBucket, url_category: &str) -> u64 {
        self.days
            .get(&day)
            .and_then(|cats| cats.get(url_category))
            .copied()
            .unwrap_or(0)
    }

    pub fn days(&self) -> &BTreeMap<DayBucket, CategoryCounts> {
        &self.days
    }

    pub fn is_empty(&self) -> bool {
        self.days.is_empty()
    }

    /// Sub-table of the day buckets accepted by `keep`.
    pub fn filter_days(&self, keep: impl Fn(DayBucket) -> bool) -> Self {
        Self {
            days: self
                .days
                .iter()
                .filter(|(day, _)| keep(**day))
                .map(|(day, cats)| (*day, cats.clone()))
                .collect(),
        }
    }

    /// Persisted form: `{"<day>": {"<category>": n}}` with canonical day keys.
    pub fn to_snapshot(&self) -> Value {
        let mut out = Map::new();
        for (day, cats) in &self.days {
            let inner: Map<String, Value> = cats
                .iter()
                .map(|(cat, n)| (cat.clone(), Value::from(*n)))
                .collect();
            out.insert(day.to_string(), Value::Object(inner));
        }
        Value::Object(out)
    }

    /// Absent or null → empty counter; anything else must have the persisted shape.
    pub fn from_snapshot(value: Option<&Value>) -> Result<Self> {
        let Some(value) = value.filter(|v| !v.is_null()) else {
            return Ok(Self::new());
        };
        let outer = value
            .as_object()
            .ok_or_else(|| StudyError::malformed("viewCounts", "expected an object"))?;
        let mut days = BTreeMap::new();
        for (key, cats) in outer {
            let day: DayBucket = key.parse()?;
            let cats = cats.as_object().ok_or_else(|| {
                StudyError::malformed("viewCounts", format!("day {key}: expected an object"))
            })?;
            let mut counts = CategoryCounts::new();
            for (cat, n) in cats {
                let n = n.as_u64().ok_or_else(|| {
                    StudyError::malformed("viewCounts", format!("day {key} / {cat}: not a count"))
                })?;
                counts.insert(cat.clone(), n);
            }
            days.insert(day, counts);
        }
        Ok(Self { days })
    }
}

impl Serialize for ViewCounter {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.to_snapshot().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for ViewCounter {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Self::from_snapshot(Some(&value)).map_err(serde::de::Error::custom)
    }
}
