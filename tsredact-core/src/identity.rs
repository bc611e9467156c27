use std::sync::atomic::{AtomicU64, Ordering};

/// Produces opaque participant identifiers.
pub trait IdentifierSource: Send + Sync {
    fn generate(&self) -> String;
}

/// Random v4 UUIDs.
#[derive(Debug, Clone, Copy, Default)]
pub struct UuidSource;

impl IdentifierSource for UuidSource {
    fn generate(&self) -> String {
        uuid::Uuid::new_v4().to_string()
    }
}

/// `{prefix}-0`, `{prefix}-1`, ... for reproducible runs.
#[derive(Debug)]
pub struct SequenceSource {
    prefix: String,
    next: AtomicU64,
}

impl SequenceSource {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            next: AtomicU64::new(0),
        }
    }
}

impl IdentifierSource for SequenceSource {
    fn generate(&self) -> String {
        let n = self.next.fetch_add(1, Ordering::SeqCst);
        format!("{}-{n}", self.prefix)
    }
}

#[cfg(test)]
mod tests_identity {
    use super::*;

    #[test]
    fn uuids_are_distinct_v4() {
        let a = UuidSource.generate();
        let b = UuidSource.generate();
        assert_ne!(a, b);
        let parsed = uuid::Uuid::parse_str(&a).unwrap();
        assert_eq!(parsed.get_version_num(), 4);
    }

    #[test]
    fn sequence_counts_up() {
        let s = SequenceSource::new("p");
        assert_eq!(s.generate(), "p-0");
        assert_eq!(s.generate(), "p-1");
    }
}
