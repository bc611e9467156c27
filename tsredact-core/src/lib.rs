pub mod clock;
pub mod identity;
pub mod record;
pub mod report;
pub mod stats;
pub mod storage;
pub mod store;
pub mod study;
pub mod unit;
pub mod views;

pub use clock::{days_since, format_date, parse_date, Clock, DayBucket, FixedClock, SystemClock};
pub use identity::{IdentifierSource, SequenceSource, UuidSource};
pub use record::{ChoiceKey, ChoiceRecord, DistanceSummary, RecordSnapshot, ReportEntry};
pub use report::{DayRange, Report};
pub use stats::{RunningStats, StatsSnapshot};
pub use storage::{Entries, JsonFileStore, KeyValueStore, MemoryStore, StorageKey};
pub use store::ChoiceStore;
pub use study::{Session, Study, StudyState, STUDY_KEYS};
pub use tsredact_common::{Result, StudyError};
pub use unit::{parse_timestamp, redact_example, Unit};
pub use views::ViewCounter;
