//! Minimum spacing between outbound requests

use crate::config::{IntervalWindow, RequestIntervalConfig};
use chrono::Timelike;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Minimum time between requests, optionally varying by local hour
#[derive(Debug, Clone)]
pub struct RequestInterval {
    default: Duration,
    windows: Vec<IntervalWindow>,
}

impl RequestInterval {
    /// An interval that never changes
    pub fn fixed(interval: Duration) -> Self {
        Self {
            default: interval,
            windows: Vec::new(),
        }
    }

    pub fn from_config(config: &RequestIntervalConfig) -> Self {
        Self {
            default: Duration::from_millis(config.default),
            windows: config.windows.clone(),
        }
    }

    /// Interval in effect at the given hour (0-23)
    ///
    /// The first matching window wins.
    pub fn at_hour(&self, hour: u32) -> Duration {
        self.windows
            .iter()
            .find(|w| in_window(w, hour))
            .map(|w| Duration::from_millis(w.interval))
            .unwrap_or(self.default)
    }

    /// Interval in effect right now, by local time
    pub fn current(&self) -> Duration {
        if self.windows.is_empty() {
            return self.default;
        }
        self.at_hour(chrono::Local::now().hour())
    }
}

fn in_window(window: &IntervalWindow, hour: u32) -> bool {
    if window.start_hour <= window.end_hour {
        (window.start_hour..=window.end_hour).contains(&hour)
    } else {
        hour >= window.start_hour || hour <= window.end_hour
    }
}

/// Releases callers one at a time, at most one per interval
///
/// Waiters queue on a fair mutex, so they are released in arrival order. The
/// pacer only delays the start of the next request; requests already
/// released keep running.
#[derive(Debug)]
pub struct Pacer {
    interval: RequestInterval,
    last_release: Mutex<Option<Instant>>,
}

impl Pacer {
    pub fn new(interval: RequestInterval) -> Self {
        Self {
            interval,
            last_release: Mutex::new(None),
        }
    }

    /// Waits until this caller may issue its request
    ///
    /// Returns the instant the caller was released.
    pub async fn wait(&self) -> Instant {
        let mut last = self.last_release.lock().await;

        if let Some(previous) = *last {
            let ready_at = previous + self.interval.current();
            tokio::time::sleep_until(ready_at).await;
        }

        let released = Instant::now();
        *last = Some(released);
        released
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn window(start_hour: u32, end_hour: u32, interval: u64) -> IntervalWindow {
        IntervalWindow {
            start_hour,
            end_hour,
            interval,
        }
    }

    #[test]
    fn test_interval_windows() {
        let interval = RequestInterval::from_config(&RequestIntervalConfig {
            default: 1000,
            windows: vec![window(20, 4, 250), window(9, 17, 2000)],
        });

        assert_eq!(interval.at_hour(22), Duration::from_millis(250));
        assert_eq!(interval.at_hour(0), Duration::from_millis(250));
        assert_eq!(interval.at_hour(4), Duration::from_millis(250));
        assert_eq!(interval.at_hour(5), Duration::from_millis(1000));
        assert_eq!(interval.at_hour(9), Duration::from_millis(2000));
        assert_eq!(interval.at_hour(17), Duration::from_millis(2000));
        assert_eq!(interval.at_hour(18), Duration::from_millis(1000));
    }

    #[test]
    fn test_fixed_interval() {
        let interval = RequestInterval::fixed(Duration::from_millis(500));
        assert_eq!(interval.current(), Duration::from_millis(500));
    }

    #[tokio::test]
    async fn test_first_call_is_immediate() {
        let pacer = Pacer::new(RequestInterval::fixed(Duration::from_secs(60)));
        let start = Instant::now();
        pacer.wait().await;
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_back_to_back_calls_are_spaced() {
        let pacer = Arc::new(Pacer::new(RequestInterval::fixed(Duration::from_millis(500))));

        let mut handles = Vec::new();
        for _ in 0..3 {
            let pacer = pacer.clone();
            handles.push(tokio::spawn(async move { pacer.wait().await }));
        }

        let mut released = Vec::new();
        for handle in handles {
            released.push(handle.await.unwrap());
        }
        released.sort();

        for pair in released.windows(2) {
            assert!(pair[1] - pair[0] >= Duration::from_millis(500));
        }
    }
}
