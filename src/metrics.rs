//! Evaluation counters, drained periodically by the host.
use std::{
    collections::HashMap,
    sync::{Mutex, MutexGuard},
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Counts for one toggle within a metrics window.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToggleStats {
    /// Evaluations that came out enabled.
    pub yes: u64,
    /// Evaluations that came out disabled.
    pub no: u64,
    /// Variant selections by variant name, `"disabled"` included.
    #[serde(default)]
    pub variants: HashMap<String, u64>,
}

/// Counters accumulated between two drains.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricBucket {
    /// Start of the window: engine creation or the previous non-empty drain.
    pub start: DateTime<Utc>,
    /// Instant of the drain.
    pub stop: DateTime<Utc>,
    #[allow(missing_docs)]
    pub toggles: HashMap<String, ToggleStats>,
}

#[derive(Debug)]
struct Window {
    start: DateTime<Utc>,
    toggles: HashMap<String, ToggleStats>,
}

/// `MetricsAggregator` serializes increments and drains through one mutex, so a drain observes
/// every increment either entirely before or entirely after it.
#[derive(Debug)]
pub struct MetricsAggregator {
    window: Mutex<Window>,
}

impl MetricsAggregator {
    #[allow(missing_docs)]
    pub fn new() -> Self {
        MetricsAggregator {
            window: Mutex::new(Window {
                start: Utc::now(),
                toggles: HashMap::new(),
            }),
        }
    }

    /// Record one enabled/disabled evaluation of `toggle_name`.
    pub fn count_toggle(&self, toggle_name: &str, enabled: bool) {
        let mut window = self.lock();
        let stats = window.toggles.entry(toggle_name.to_owned()).or_default();
        if enabled {
            stats.yes += 1;
        } else {
            stats.no += 1;
        }
    }

    /// Record one selection of `variant_name` for `toggle_name`.
    pub fn count_variant(&self, toggle_name: &str, variant_name: &str) {
        let mut window = self.lock();
        let stats = window.toggles.entry(toggle_name.to_owned()).or_default();
        *stats.variants.entry(variant_name.to_owned()).or_default() += 1;
    }

    /// Take the counters accumulated since the previous drain and start a new window.
    ///
    /// Returns `None` when nothing was counted.
    pub fn drain(&self) -> Option<MetricBucket> {
        let now = Utc::now();
        let mut window = self.lock();
        if window.toggles.is_empty() {
            return None;
        }
        let toggles = std::mem::take(&mut window.toggles);
        let start = std::mem::replace(&mut window.start, now);
        drop(window);

        log::trace!(target: "toggle_engine", toggles = toggles.len(); "drained metrics");

        Some(MetricBucket {
            start,
            stop: now,
            toggles,
        })
    }

    fn lock(&self) -> MutexGuard<'_, Window> {
        // Counters are plain integers, a panic mid-increment cannot leave them inconsistent.
        self.window
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for MetricsAggregator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::MetricsAggregator;

    #[test]
    fn drain_reports_and_resets() {
        let metrics = MetricsAggregator::new();
        for _ in 0..3 {
            metrics.count_toggle("t", true);
        }
        for _ in 0..2 {
            metrics.count_toggle("t", false);
        }
        metrics.count_variant("t", "blue");
        metrics.count_variant("t", "blue");
        metrics.count_variant("t", "disabled");

        let bucket = metrics.drain().unwrap();
        let stats = &bucket.toggles["t"];
        assert_eq!(stats.yes, 3);
        assert_eq!(stats.no, 2);
        assert_eq!(stats.variants["blue"], 2);
        assert_eq!(stats.variants["disabled"], 1);
        assert!(bucket.start <= bucket.stop);

        assert!(metrics.drain().is_none());
    }

    #[test]
    fn windows_are_contiguous() {
        let metrics = MetricsAggregator::new();
        metrics.count_toggle("t", true);
        let first = metrics.drain().unwrap();
        metrics.count_toggle("t", true);
        let second = metrics.drain().unwrap();
        assert_eq!(first.stop, second.start);
    }

    #[test]
    fn concurrent_increments_are_not_lost() {
        let metrics = Arc::new(MetricsAggregator::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let metrics = metrics.clone();
                std::thread::spawn(move || {
                    for i in 0..1000 {
                        metrics.count_toggle("t", i % 2 == 0);
                    }
                })
            })
            .collect();

        let mut yes = 0;
        let mut no = 0;
        // Drain while writers are running; every increment must land in exactly one bucket.
        for _ in 0..10 {
            if let Some(bucket) = metrics.drain() {
                yes += bucket.toggles["t"].yes;
                no += bucket.toggles["t"].no;
            }
        }
        for handle in handles {
            handle.join().unwrap();
        }
        if let Some(bucket) = metrics.drain() {
            yes += bucket.toggles["t"].yes;
            no += bucket.toggles["t"].no;
        }

        assert_eq!(yes, 4000);
        assert_eq!(no, 4000);
    }
}
