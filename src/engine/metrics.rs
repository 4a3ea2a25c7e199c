//! Rolling dispatch latency per action tag.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::time::Duration;

use crate::state::ActionTag;

/// Latency summary for one action tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TagMetrics {
    /// Samples currently in the window.
    pub samples: usize,
    pub average: Duration,
    pub worst: Duration,
    pub last: Duration,
    /// Dispatches of this tag over the monitor lifetime.
    pub total: u64,
    /// Lifetime dispatches above the slow threshold.
    pub slow: u64,
}

impl TagMetrics {
    pub fn average_ms(&self) -> f64 {
        self.average.as_secs_f64() * 1_000.0
    }

    pub fn worst_ms(&self) -> f64 {
        self.worst.as_secs_f64() * 1_000.0
    }
}

/// Point-in-time copy of the monitor.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PerformanceMetrics {
    pub by_tag: BTreeMap<ActionTag, TagMetrics>,
    pub total_dispatches: u64,
    pub slow_dispatches: u64,
    pub slow_threshold: Duration,
}

impl PerformanceMetrics {
    pub fn get(&self, tag: ActionTag) -> Option<&TagMetrics> {
        self.by_tag.get(&tag)
    }

    /// The tag with the highest windowed average.
    pub fn slowest(&self) -> Option<(ActionTag, &TagMetrics)> {
        self.by_tag
            .iter()
            .max_by_key(|(_, m)| m.average)
            .map(|(tag, m)| (*tag, m))
    }
}

#[derive(Debug, Default)]
struct Window {
    samples: VecDeque<Duration>,
    total: u64,
    slow: u64,
}

#[derive(Debug)]
pub struct PerformanceMonitor {
    window: usize,
    slow_threshold: Duration,
    tags: HashMap<ActionTag, Window>,
    total: u64,
    slow: u64,
}

impl PerformanceMonitor {
    pub fn new(window: usize, slow_threshold: Duration) -> Self {
        Self {
            window: window.max(1),
            slow_threshold,
            tags: HashMap::new(),
            total: 0,
            slow: 0,
        }
    }

    pub fn slow_threshold(&self) -> Duration {
        self.slow_threshold
    }

    /// Record one sample. Returns true if the dispatch was slow.
    pub fn record(&mut self, tag: ActionTag, elapsed: Duration) -> bool {
        let slow = elapsed > self.slow_threshold;
        let entry = self.tags.entry(tag).or_default();
        if entry.samples.len() == self.window {
            entry.samples.pop_front();
        }
        entry.samples.push_back(elapsed);
        entry.total += 1;
        self.total += 1;
        if slow {
            entry.slow += 1;
            self.slow += 1;
        }
        slow
    }

    pub fn snapshot(&self) -> PerformanceMetrics {
        let by_tag = self
            .tags
            .iter()
            .filter_map(|(tag, w)| {
                let last = *w.samples.back()?;
                let sum: Duration = w.samples.iter().sum();
                let samples = w.samples.len();
                let average = sum / u32::try_from(samples).unwrap_or(u32::MAX);
                let worst = w.samples.iter().copied().max().unwrap_or_default();
                Some((
                    *tag,
                    TagMetrics {
                        samples,
                        average,
                        worst,
                        last,
                        total: w.total,
                        slow: w.slow,
                    },
                ))
            })
            .collect();
        PerformanceMetrics {
            by_tag,
            total_dispatches: self.total,
            slow_dispatches: self.slow,
            slow_threshold: self.slow_threshold,
        }
    }

    pub fn reset(&mut self) {
        self.tags.clear();
        self.total = 0;
        self.slow = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn test_average_and_worst() {
        let mut monitor = PerformanceMonitor::new(10, ms(16));
        monitor.record(ActionTag::StarSelected, ms(2));
        monitor.record(ActionTag::StarSelected, ms(4));
        monitor.record(ActionTag::StarSelected, ms(6));

        let metrics = monitor.snapshot();
        let star = metrics.get(ActionTag::StarSelected).unwrap();
        assert_eq!(star.samples, 3);
        assert_eq!(star.average, ms(4));
        assert_eq!(star.worst, ms(6));
        assert_eq!(star.last, ms(6));
        assert_eq!(metrics.total_dispatches, 3);
        assert_eq!(metrics.slow_dispatches, 0);
    }

    #[test]
    fn test_window_is_bounded() {
        let mut monitor = PerformanceMonitor::new(10, ms(16));
        monitor.record(ActionTag::StatsUpdate, ms(100));
        for _ in 0..10 {
            monitor.record(ActionTag::StatsUpdate, ms(1));
        }
        let metrics = monitor.snapshot();
        let stats = metrics.get(ActionTag::StatsUpdate).unwrap();
        assert_eq!(stats.samples, 10);
        assert_eq!(stats.worst, ms(1));
        assert_eq!(stats.total, 11);
        assert_eq!(stats.slow, 1);
    }

    #[test]
    fn test_slow_flag() {
        let mut monitor = PerformanceMonitor::new(10, ms(16));
        assert!(!monitor.record(ActionTag::GamePaused, ms(16)));
        assert!(monitor.record(ActionTag::GamePaused, ms(17)));
        assert_eq!(monitor.snapshot().slow_dispatches, 1);
    }

    #[test]
    fn test_slowest_and_reset() {
        let mut monitor = PerformanceMonitor::new(2, ms(16));
        monitor.record(ActionTag::GamePaused, ms(1));
        monitor.record(ActionTag::LevelCompleted, ms(9));
        let metrics = monitor.snapshot();
        assert_eq!(metrics.slowest().map(|(tag, _)| tag), Some(ActionTag::LevelCompleted));

        monitor.reset();
        assert_eq!(monitor.snapshot().by_tag.len(), 0);
    }
}
