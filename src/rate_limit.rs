//! Per-actor sliding-window counter backing the limiter block.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

/// Window of event timestamps for one actor, oldest-first.
struct Window {
    timestamps: Vec<tokio::time::Instant>,
}

pub struct RateLimiter {
    windows: Mutex<HashMap<String, Window>>,
    time_window: Duration,
    count: u64,
}

impl RateLimiter {
    pub fn new(count: u64, time_window: Duration) -> Self {
        Self {
            windows: Mutex::new(HashMap::new()),
            time_window,
            count,
        }
    }

    /// Records an event for `did` now, evicting timestamps older than the
    /// window, and returns the post-record count. The caller passes iff the
    /// returned count is `<= count`: "the first `count` events in any window pass".
    pub fn record(&self, did: &str) -> u64 {
        let now = tokio::time::Instant::now();
        let cutoff = now.checked_sub(self.time_window);
        let mut windows = self.windows.lock().unwrap();
        let window = windows.entry(did.to_string()).or_insert_with(|| Window {
            timestamps: Vec::new(),
        });
        if let Some(cutoff) = cutoff {
            window.timestamps.retain(|ts| *ts >= cutoff);
        }
        window.timestamps.push(now);
        window.timestamps.len() as u64
    }

    pub fn allows(&self, did: &str) -> bool {
        self.record(did) <= self.count
    }

    pub fn list(&self) -> HashMap<String, u64> {
        let windows = self.windows.lock().unwrap();
        windows
            .iter()
            .map(|(did, window)| (did.clone(), window.timestamps.len() as u64))
            .collect()
    }

    pub fn clear(&self) {
        self.windows.lock().unwrap().clear();
    }

    fn cleanup(&self) {
        let now = tokio::time::Instant::now();
        let cutoff = now.checked_sub(self.time_window);
        let mut windows = self.windows.lock().unwrap();
        windows.retain(|_, window| {
            if let Some(cutoff) = cutoff {
                window.timestamps.retain(|ts| *ts >= cutoff);
            }
            !window.timestamps.is_empty()
        });
    }
}

/// Runs the limiter's background sweep every `cleanup_freq` until `cancel` fires.
pub async fn run_cleanup(
    limiter: std::sync::Arc<RateLimiter>,
    cleanup_freq: Duration,
    cancel: CancellationToken,
) {
    let sleeper = tokio::time::sleep(cleanup_freq);
    tokio::pin!(sleeper);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::debug!("rate limiter cleanup shutting down");
                break;
            }
            _ = &mut sleeper => {
                limiter.cleanup();
                sleeper.as_mut().reset(tokio::time::Instant::now() + cleanup_freq);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_count_events_pass() {
        let limiter = RateLimiter::new(2, Duration::from_secs(60));
        assert!(limiter.allows("did:plc:a"));
        assert!(limiter.allows("did:plc:a"));
        assert!(!limiter.allows("did:plc:a"));
    }

    #[test]
    fn actors_are_independent() {
        let limiter = RateLimiter::new(1, Duration::from_secs(60));
        assert!(limiter.allows("did:plc:a"));
        assert!(limiter.allows("did:plc:b"));
    }

    #[test]
    fn cleanup_drops_empty_actors() {
        let limiter = RateLimiter::new(1, Duration::from_millis(5));
        limiter.allows("did:plc:a");
        std::thread::sleep(Duration::from_millis(20));
        limiter.cleanup();
        assert!(limiter.list().is_empty());
    }

    #[test]
    fn clear_resets_all_windows() {
        let limiter = RateLimiter::new(1, Duration::from_secs(60));
        limiter.allows("did:plc:a");
        limiter.clear();
        assert!(limiter.list().is_empty());
    }
}
