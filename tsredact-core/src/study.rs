//! Study session lifecycle and the engine entry points.
//!
//! Every entry point brackets its work with one read and at most one write
//! against the [`KeyValueStore`]: read the current snapshots, transform them
//! in memory, write them back. Failures are logged here and returned; nothing
//! is retried, and a failed read abandons the operation before any write.
//! Two overlapping entry points on the same keys are not synchronised, so the
//! last write wins.

use crate::clock::{format_date, parse_date, Clock, DayBucket, SystemClock};
use crate::identity::{IdentifierSource, UuidSource};
use crate::record::ChoiceKey;
use crate::report::{DayRange, Report};
use crate::storage::{Entries, KeyValueStore, StorageKey};
use crate::store::ChoiceStore;
use crate::unit::Unit;
use crate::views::ViewCounter;
use chrono::NaiveDate;
use serde_json::Value;
use tsredact_common::{Result, StudyError};

/// Keys wiped by [`Study::clear_session`].
pub const STUDY_KEYS: [StorageKey; 5] = [
    StorageKey::MsuChoices,
    StorageKey::LastReport,
    StorageKey::ParticipantId,
    StorageKey::OptInDate,
    StorageKey::ViewCounts,
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub participant_id: String,
    pub opt_in_date: NaiveDate,
}

/// Where a participant is in the opt-in lifecycle. There is no submitted
/// state: report submission is permanently disabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StudyState {
    Uninitialized,
    OptedIn,
    Accumulating,
}

pub struct Study<S: KeyValueStore> {
    store: S,
    clock: Box<dyn Clock>,
    ids: Box<dyn IdentifierSource>,
}

fn string_entry(entries: &Entries, key: StorageKey) -> Result<Option<String>> {
    match entries.get(&key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(other) => Err(StudyError::malformed(key.as_str(), format!("expected a string, got {other}"))),
    }
}

fn opt_in_date(entries: &Entries) -> Result<NaiveDate> {
    let raw = string_entry(entries, StorageKey::OptInDate)?.ok_or(StudyError::NotOptedIn)?;
    parse_date(&raw)
}

fn is_present(entries: &Entries, key: StorageKey) -> bool {
    entries.get(&key).is_some_and(|v| !v.is_null())
}

impl<S: KeyValueStore> Study<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            clock: Box::new(SystemClock),
            ids: Box::new(UuidSource),
        }
    }

    pub fn with_clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Box::new(clock);
        self
    }

    pub fn with_identifier_source(mut self, ids: impl IdentifierSource + 'static) -> Self {
        self.ids = Box::new(ids);
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Assign a participant identifier and opt-in date where missing.
    /// Idempotent once both are set.
    pub async fn init_session(&self) -> Result<Session> {
        self.init_session_inner()
            .await
            .inspect_err(|e| log::error!("init session failed: {e}"))
    }

    async fn init_session_inner(&self) -> Result<Session> {
        let res = self
            .store
            .get(&[StorageKey::ParticipantId, StorageKey::OptInDate])
            .await?;
        let mut dirty = Entries::new();

        let participant_id = match string_entry(&res, StorageKey::ParticipantId)? {
            Some(id) => id,
            None => {
                let id = self.ids.generate();
                log::info!("new participant id: {id}");
                dirty.insert(StorageKey::ParticipantId, Value::String(id.clone()));
                id
            }
        };
        let opt_in_date = match string_entry(&res, StorageKey::OptInDate)? {
            Some(raw) => parse_date(&raw)?,
            None => {
                let today = self.clock.today();
                log::info!("new opt-in date: {}", format_date(today));
                dirty.insert(StorageKey::OptInDate, Value::String(format_date(today)));
                today
            }
        };

        if !dirty.is_empty() {
            self.store.set(dirty).await?;
        }
        Ok(Session {
            participant_id,
            opt_in_date,
        })
    }

    /// Remove all study state, including the participant identifier.
    pub async fn clear_session(&self) -> Result<()> {
        self.store
            .remove(&STUDY_KEYS)
            .await
            .inspect_err(|e| log::error!("clear session failed: {e}"))
    }

    /// Clear, then opt in again with a fresh identifier and today's date.
    pub async fn reset_session(&self) -> Result<Session> {
        self.clear_session().await?;
        self.init_session().await
    }

    /// Current session without creating one.
    pub async fn session(&self) -> Result<Option<Session>> {
        let res = self
            .store
            .get(&[StorageKey::ParticipantId, StorageKey::OptInDate])
            .await
            .inspect_err(|e| log::error!("read session failed: {e}"))?;
        let Some(participant_id) = string_entry(&res, StorageKey::ParticipantId)? else {
            return Ok(None);
        };
        match opt_in_date(&res) {
            Ok(opt_in_date) => Ok(Some(Session {
                participant_id,
                opt_in_date,
            })),
            Err(StudyError::NotOptedIn) => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub async fn state(&self) -> Result<StudyState> {
        if self.session().await?.is_none() {
            return Ok(StudyState::Uninitialized);
        }
        let res = self
            .store
            .get(&[StorageKey::MsuChoices, StorageKey::ViewCounts])
            .await?;
        let choices = ChoiceStore::from_snapshot(res.get(&StorageKey::MsuChoices))?;
        let views = ViewCounter::from_snapshot(res.get(&StorageKey::ViewCounts))?;
        if choices.is_empty() && views.is_empty() {
            Ok(StudyState::OptedIn)
        } else {
            Ok(StudyState::Accumulating)
        }
    }

    /// Whether anything suggests this install ever took part in the study.
    pub async fn has_participation_data(&self) -> Result<bool> {
        let res = self
            .store
            .get(&[StorageKey::OptIn, StorageKey::MsuChoices, StorageKey::ViewCounts])
            .await
            .inspect_err(|e| log::error!("read participation data failed: {e}"))?;
        let opted_in = res.get(&StorageKey::OptIn).and_then(Value::as_bool).unwrap_or(false);
        Ok(opted_in
            || is_present(&res, StorageKey::MsuChoices)
            || is_present(&res, StorageKey::ViewCounts))
    }

    /// Today's day bucket relative to the stored opt-in date.
    pub async fn current_day(&self) -> Result<DayBucket> {
        let res = self.store.get(&[StorageKey::OptInDate]).await?;
        Ok(self.clock.days_since(opt_in_date(&res)?))
    }

    /// Count one redaction choice for today's bucket.
    pub async fn record_choice(
        &self,
        url_category: &str,
        element_category: &str,
        unit: Unit,
        distance: f64,
    ) -> Result<()> {
        self.record_choice_inner(url_category, element_category, unit, distance)
            .await
            .inspect_err(|e| log::error!("record choice failed: {e}"))
    }

    async fn record_choice_inner(
        &self,
        url_category: &str,
        element_category: &str,
        unit: Unit,
        distance: f64,
    ) -> Result<()> {
        let res = self
            .store
            .get(&[StorageKey::MsuChoices, StorageKey::OptInDate])
            .await?;
        let day = self.clock.days_since(opt_in_date(&res)?);
        let mut choices = ChoiceStore::from_snapshot(res.get(&StorageKey::MsuChoices))?;

        let key = ChoiceKey::new(day, url_category, element_category, unit);
        let record = choices.record_choice(key, distance);
        log::debug!(
            "choice day={day} unit={unit} frequency={} distances={}",
            record.frequency(),
            record.distance_stats().count()
        );

        let mut out = Entries::new();
        out.insert(StorageKey::MsuChoices, choices.to_snapshot()?);
        self.store.set(out).await
    }

    /// Count one page view for today's bucket; returns the new count.
    pub async fn record_view(&self, url_category: &str) -> Result<u64> {
        self.record_view_inner(url_category)
            .await
            .inspect_err(|e| log::error!("record view failed: {e}"))
    }

    async fn record_view_inner(&self, url_category: &str) -> Result<u64> {
        let res = self
            .store
            .get(&[StorageKey::OptInDate, StorageKey::ViewCounts])
            .await?;
        let day = self.clock.days_since(opt_in_date(&res)?);
        let mut views = ViewCounter::from_snapshot(res.get(&StorageKey::ViewCounts))?;
        let count = views.record_view(day, url_category);

        let mut out = Entries::new();
        out.insert(StorageKey::ViewCounts, views.to_snapshot());
        self.store.set(out).await?;
        Ok(count)
    }

    /// Compile the local report for `range`. Never writes.
    pub async fn build_report(&self, range: DayRange) -> Result<Report> {
        self.build_report_inner(range)
            .await
            .inspect_err(|e| log::error!("build report failed: {e}"))
    }

    async fn build_report_inner(&self, range: DayRange) -> Result<Report> {
        let res = self
            .store
            .get(&[
                StorageKey::MsuChoices,
                StorageKey::ParticipantId,
                StorageKey::ViewCounts,
            ])
            .await?;
        let participant = string_entry(&res, StorageKey::ParticipantId)?;
        let choices = ChoiceStore::from_snapshot(res.get(&StorageKey::MsuChoices))?;
        let views = ViewCounter::from_snapshot(res.get(&StorageKey::ViewCounts))?;
        Ok(Report::build(participant, &choices, &views, range))
    }

    /// Remote reporting was switched off for good. Performs no I/O.
    pub fn submit_report(&self) -> Result<()> {
        log::error!("study discontinued");
        Err(StudyError::Discontinued)
    }

    /// Deletion requests went to the same retired endpoint. Performs no I/O.
    pub fn request_deletion(&self) -> Result<()> {
        log::error!("study discontinued");
        Err(StudyError::Discontinued)
    }
}

#[cfg(test)]
mod tests_study {
    use super::*;
    use crate::clock::FixedClock;
    use crate::identity::SequenceSource;
    use crate::storage::MemoryStore;
    use serde_json::json;

    fn study(today: &str) -> Study<MemoryStore> {
        Study::new(MemoryStore::new())
            .with_clock(FixedClock(parse_date(today).unwrap()))
            .with_identifier_source(SequenceSource::new("p"))
    }

    #[tokio::test]
    async fn init_is_idempotent() {
        let s = study("2020-01-01");
        let a = s.init_session().await.unwrap();
        let b = s.init_session().await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a.participant_id, "p-0");
        assert_eq!(format_date(a.opt_in_date), "2020-01-01");
    }

    #[tokio::test]
    async fn init_fills_only_missing_fields() {
        let mut seed = Entries::new();
        seed.insert(StorageKey::ParticipantId, json!("existing"));
        let s = Study::new(MemoryStore::with_entries(seed))
            .with_clock(FixedClock(parse_date("2021-06-01").unwrap()))
            .with_identifier_source(SequenceSource::new("p"));
        let session = s.init_session().await.unwrap();
        assert_eq!(session.participant_id, "existing");
        assert_eq!(format_date(session.opt_in_date), "2021-06-01");
    }

    #[tokio::test]
    async fn record_before_opt_in_fails() {
        let s = study("2020-01-01");
        let err = s.record_choice("a", "b", Unit::Day, 1.0).await;
        assert!(matches!(err, Err(StudyError::NotOptedIn)));
        assert!(matches!(s.record_view("a").await, Err(StudyError::NotOptedIn)));
        assert!(s.store().dump().await.is_empty());
    }

    #[tokio::test]
    async fn lifecycle_states() {
        let s = study("2020-01-01");
        assert_eq!(s.state().await.unwrap(), StudyState::Uninitialized);
        s.init_session().await.unwrap();
        assert_eq!(s.state().await.unwrap(), StudyState::OptedIn);
        s.record_view("github.com").await.unwrap();
        assert_eq!(s.state().await.unwrap(), StudyState::Accumulating);
        s.clear_session().await.unwrap();
        assert_eq!(s.state().await.unwrap(), StudyState::Uninitialized);
    }

    #[tokio::test]
    async fn failed_write_keeps_previous_state() {
        let s = study("2020-01-01");
        s.init_session().await.unwrap();
        s.record_view("a").await.unwrap();
        s.store().set_fail_writes(true);
        assert!(matches!(s.record_view("a").await, Err(StudyError::Storage(_))));
        s.store().set_fail_writes(false);
        let report = s.build_report(DayRange::all()).await.unwrap();
        assert_eq!(report.view_counts.count(DayBucket(0), "a"), 1);
    }

    #[tokio::test]
    async fn malformed_opt_in_date_is_reported() {
        let mut seed = Entries::new();
        seed.insert(StorageKey::OptInDate, json!("01/01/2020"));
        let s = Study::new(MemoryStore::with_entries(seed));
        assert!(matches!(
            s.record_view("a").await,
            Err(StudyError::InvalidDate(_))
        ));
    }

    #[tokio::test]
    async fn participation_flags() {
        let s = study("2020-01-01");
        assert!(!s.has_participation_data().await.unwrap());
        let mut legacy = Entries::new();
        legacy.insert(StorageKey::OptIn, json!(true));
        s.store().set(legacy).await.unwrap();
        assert!(s.has_participation_data().await.unwrap());
    }

    #[tokio::test]
    async fn submission_is_discontinued() {
        let s = study("2020-01-01");
        s.init_session().await.unwrap();
        let before = s.store().dump().await;
        assert!(matches!(s.submit_report(), Err(StudyError::Discontinued)));
        assert!(matches!(s.request_deletion(), Err(StudyError::Discontinued)));
        assert_eq!(s.store().dump().await, before);
    }
}
