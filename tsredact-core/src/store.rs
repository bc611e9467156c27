use crate::record::{ChoiceKey, ChoiceRecord, RecordSnapshot};
use serde_json::Value;
use tsredact_common::{Result, StudyError};

/// Records keyed by (day bucket, url category, element category, unit).
///
/// Lookups are a linear scan: a single participant only ever produces a
/// handful of distinct keys.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChoiceStore {
    records: Vec<ChoiceRecord>,
}

impl ChoiceStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge one observation into the record for `key`, creating it if needed.
    pub fn record_choice(&mut self, key: ChoiceKey, distance: f64) -> &ChoiceRecord {
        let idx = match self.records.iter().position(|r| r.matches_key(&key)) {
            Some(idx) => idx,
            None => {
                log::debug!(
                    "new choice record day={} url={} element={} unit={}",
                    key.day_bucket,
                    key.url_category,
                    key.element_category,
                    key.unit
                );
                self.records.push(ChoiceRecord::new(key));
                self.records.len() - 1
            }
        };
        let record = &mut self.records[idx];
        record.increment(distance);
        record
    }

    pub fn find(&self, key: &ChoiceKey) -> Option<&ChoiceRecord> {
        self.records.iter().find(|r| r.matches_key(key))
    }

    pub fn records(&self) -> &[ChoiceRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn to_snapshot(&self) -> Result<Value> {
        let snaps: Vec<RecordSnapshot> = self.records.iter().map(|r| r.snapshot()).collect();
        Ok(serde_json::to_value(snaps)?)
    }

    /// Absent or null → empty store. A value that is not a list fails; a
    /// single entry that does not decode is logged and skipped. Duplicate keys
    /// in the persisted list are folded together so the one-record-per-key
    /// invariant holds afterwards.
    pub fn from_snapshot(value: Option<&Value>) -> Result<Self> {
        let Some(value) = value.filter(|v| !v.is_null()) else {
            return Ok(Self::new());
        };
        let Some(items) = value.as_array() else {
            return Err(StudyError::malformed("msuChoices", "expected a list of records"));
        };
        let mut store = Self::new();
        for (idx, item) in items.iter().enumerate() {
            let record = match decode_record(item) {
                Ok(record) => record,
                Err(e) => {
                    log::warn!("skipping choice record {idx}: {e}");
                    continue;
                }
            };
            match store.records.iter_mut().find(|r| r.matches_key(record.key())) {
                Some(existing) => {
                    log::warn!("duplicate choice record for day {}, merging", record.day_bucket());
                    existing.absorb(&record);
                }
                None => store.records.push(record),
            }
        }
        Ok(store)
    }
}

fn decode_record(item: &Value) -> Result<ChoiceRecord> {
    let snap: RecordSnapshot = serde_json::from_value(item.clone())
        .map_err(|e| StudyError::malformed("msuChoices", e.to_string()))?;
    ChoiceRecord::from_snapshot(snap)
}

#[cfg(test)]
mod tests_choice_store {
    use super::*;
    use crate::clock::DayBucket;
    use crate::unit::Unit;

    fn key(day: i64, unit: Unit) -> ChoiceKey {
        ChoiceKey::new(DayBucket(day), "github.com", "relative-time", unit)
    }

    #[test]
    fn same_key_merges() {
        let mut store = ChoiceStore::new();
        store.record_choice(key(0, Unit::Day), 120.0);
        store.record_choice(key(0, Unit::Day), 40.0);
        assert_eq!(store.len(), 1);
        let r = store.find(&key(0, Unit::Day)).unwrap();
        assert_eq!(r.frequency(), 2);
        assert_eq!(r.distance_stats().count(), 2);
    }

    #[test]
    fn same_key_with_infinite_distance() {
        let mut store = ChoiceStore::new();
        store.record_choice(key(0, Unit::Day), 120.0);
        let r = store.record_choice(key(0, Unit::Day), f64::INFINITY);
        assert_eq!(r.frequency(), 2);
        assert_eq!(r.distance_stats().count(), 1);
    }

    #[test]
    fn distinct_keys_make_distinct_records() {
        let mut store = ChoiceStore::new();
        store.record_choice(key(0, Unit::Day), 1.0);
        store.record_choice(key(0, Unit::Year), 1.0);
        store.record_choice(key(1, Unit::Day), 1.0);
        assert_eq!(store.len(), 3);
    }

    #[test]
    fn missing_snapshot_is_empty() {
        assert!(ChoiceStore::from_snapshot(None).unwrap().is_empty());
        assert!(ChoiceStore::from_snapshot(Some(&Value::Null)).unwrap().is_empty());
    }

    #[test]
    fn snapshot_round_trip() {
        let mut store = ChoiceStore::new();
        store.record_choice(key(0, Unit::Day), 3.0);
        store.record_choice(key(0, Unit::Day), 5.0);
        store.record_choice(key(2, Unit::Minute), f64::INFINITY);
        let snap = store.to_snapshot().unwrap();
        let back = ChoiceStore::from_snapshot(Some(&snap)).unwrap();
        assert_eq!(back.len(), 2);
        assert_eq!(back.find(&key(0, Unit::Day)).unwrap().frequency(), 2);
        assert_eq!(back.find(&key(2, Unit::Minute)).unwrap().distance_stats().count(), 0);
    }

    #[test]
    fn persisted_shape() {
        let mut store = ChoiceStore::new();
        store.record_choice(key(4, Unit::Hour), 8.0);
        let snap = store.to_snapshot().unwrap();
        assert_eq!(
            snap,
            serde_json::json!([{
                "dayBucket": 4,
                "urlCategory": "github.com",
                "elementCategory": "relative-time",
                "unit": "hour",
                "frequency": 1,
                "distanceStats": { "count": 1, "mean": 8.0, "std": 0.0 }
            }])
        );
    }

    #[test]
    fn wrong_shape_is_malformed() {
        let bad = serde_json::json!({ "not": "a list" });
        assert!(matches!(
            ChoiceStore::from_snapshot(Some(&bad)),
            Err(StudyError::MalformedSnapshot { .. })
        ));
        let bad = serde_json::json!("msu");
        assert!(ChoiceStore::from_snapshot(Some(&bad)).is_err());
    }

    #[test]
    fn undecodable_records_are_skipped() {
        let snap = serde_json::json!([
            { "dayBucket": 0, "urlCategory": "a", "elementCategory": "b", "unit": "fortnight" },
            // a non-finite mean is written out as null
            { "dayBucket": 0, "urlCategory": "a", "elementCategory": "b", "unit": "day",
              "frequency": 2, "distanceStats": { "count": 2, "mean": null, "std": null } },
            { "dayBucket": 0, "urlCategory": "a", "elementCategory": "b", "unit": "day",
              "frequency": 1, "distanceStats": { "count": 3, "mean": 1.0, "std": 0.0 } },
            { "dayBucket": 1, "urlCategory": "a", "elementCategory": "b", "unit": "day",
              "frequency": 2, "distanceStats": { "count": 2, "mean": 4.0, "std": 1.0 } }
        ]);
        let store = ChoiceStore::from_snapshot(Some(&snap)).unwrap();
        assert_eq!(store.len(), 1);
        let k = ChoiceKey::new(DayBucket(1), "a", "b", Unit::Day);
        assert_eq!(store.find(&k).unwrap().frequency(), 2);
    }

    #[test]
    fn duplicate_persisted_keys_fold() {
        let one = serde_json::json!({
            "dayBucket": 1, "urlCategory": "a", "elementCategory": "b", "unit": "day",
            "frequency": 2, "distanceStats": { "count": 2, "mean": 10.0, "std": 0.0 }
        });
        let snap = Value::Array(vec![one.clone(), one]);
        let store = ChoiceStore::from_snapshot(Some(&snap)).unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(store.records()[0].frequency(), 4);
        assert_eq!(store.records()[0].distance_stats().count(), 4);
    }
}
