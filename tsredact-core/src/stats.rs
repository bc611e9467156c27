use serde::{Deserialize, Serialize};
use tsredact_common::{Result, StudyError};

/// Persisted form of a [`RunningStats`]: only the derived fields are stored.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct StatsSnapshot {
    #[serde(default)]
    pub count: u64,
    #[serde(default)]
    pub mean: f64,
    #[serde(default)]
    pub std: f64,
}

/// Streaming mean / standard deviation (Welford).
///
/// Uses the sample variance (divisor `count - 1`); `std()` is `0.0` until
/// at least two observations have been seen.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct RunningStats {
    count: u64,
    mean: f64,
    m2: f64, // sum of squared deviations from the running mean
}

impl RunningStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Caller must filter out non-finite values.
    pub fn update(&mut self, x: f64) {
        debug_assert!(x.is_finite(), "RunningStats::update called with {x}");
        self.count += 1;
        let delta = x - self.mean;
        self.mean += delta / self.count as f64;
        let delta2 = x - self.mean;
        self.m2 += delta * delta2;
    }

    /// Like [`update`](Self::update), but leaves the accumulator untouched and
    /// returns `false` when `x` would push the mean or spread out of `f64` range.
    pub fn try_update(&mut self, x: f64) -> bool {
        if !x.is_finite() {
            return false;
        }
        let mut next = *self;
        next.update(x);
        if !next.mean.is_finite() || !next.m2.is_finite() {
            return false;
        }
        *self = next;
        true
    }

    /// Combine two accumulators as if every observation had been fed to one.
    pub fn merge(&mut self, other: &RunningStats) {
        if other.count == 0 {
            return;
        }
        if self.count == 0 {
            *self = *other;
            return;
        }
        let count = self.count + other.count;
        let delta = other.mean - self.mean;
        let (n_a, n_b, n) = (self.count as f64, other.count as f64, count as f64);
        self.mean += delta * n_b / n;
        self.m2 += other.m2 + delta * delta * n_a * n_b / n;
        self.count = count;
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn mean(&self) -> f64 {
        self.mean
    }

    pub fn variance(&self) -> f64 {
        if self.count > 1 {
            self.m2 / (self.count as f64 - 1.0)
        } else {
            0.0
        }
    }

    pub fn std(&self) -> f64 {
        self.variance().sqrt()
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            count: self.count,
            mean: self.mean,
            std: self.std(),
        }
    }

    /// Rebuild an accumulator from its persisted derived fields so that
    /// further updates continue where the persisted one left off.
    pub fn from_snapshot(snap: StatsSnapshot) -> Result<Self> {
        if !snap.mean.is_finite() || !snap.std.is_finite() || snap.std < 0.0 {
            return Err(StudyError::malformed(
                "distanceStats",
                format!("mean={} std={}", snap.mean, snap.std),
            ));
        }
        if snap.count == 0 {
            return Ok(Self::new());
        }
        let m2 = if snap.count > 1 {
            snap.std * snap.std * (snap.count as f64 - 1.0)
        } else {
            0.0
        };
        Ok(Self {
            count: snap.count,
            mean: snap.mean,
            m2,
        })
    }
}
