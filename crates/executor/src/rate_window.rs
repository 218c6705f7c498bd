use std::time::Duration;

use tokio::time::Instant;

/// Fixed-window call counter.
///
/// The window rolls over once `now - window_start >= window_size`, resetting
/// the count to zero.
#[derive(Debug, Clone)]
pub struct RateWindow {
    window_start: Instant,
    count_in_window: u32,
    max_per_window: u32,
    window_size: Duration,
}

impl RateWindow {
    pub fn new(max_per_window: u32, window_size: Duration) -> Self {
        Self::starting_at(max_per_window, window_size, Instant::now())
    }

    /// A window whose first period begins at `start`.
    pub fn starting_at(max_per_window: u32, window_size: Duration, start: Instant) -> Self {
        Self {
            window_start: start,
            count_in_window: 0,
            max_per_window,
            window_size,
        }
    }

    fn roll(&mut self, now: Instant) {
        if now.saturating_duration_since(self.window_start) >= self.window_size {
            self.window_start = now;
            self.count_in_window = 0;
        }
    }

    /// Time until a slot frees up, or `None` if one is available now.
    pub fn wait_time(&mut self, now: Instant) -> Option<Duration> {
        self.roll(now);
        if self.count_in_window < self.max_per_window {
            None
        } else {
            let elapsed = now.saturating_duration_since(self.window_start);
            Some(self.window_size.saturating_sub(elapsed))
        }
    }

    /// Take a slot if one is available.
    pub fn try_acquire(&mut self, now: Instant) -> bool {
        if self.wait_time(now).is_some() {
            return false;
        }
        self.count_in_window += 1;
        true
    }

    /// Calls counted in the current window.
    pub fn count(&self) -> u32 {
        self.count_in_window
    }

    pub fn max_per_window(&self) -> u32 {
        self.max_per_window
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allows_up_to_max_then_waits_for_rollover() {
        let start = Instant::now();
        let mut w = RateWindow::starting_at(2, Duration::from_secs(60), start);

        assert!(w.try_acquire(start));
        assert!(w.try_acquire(start + Duration::from_secs(1)));
        assert!(!w.try_acquire(start + Duration::from_secs(2)));
        assert_eq!(
            w.wait_time(start + Duration::from_secs(20)),
            Some(Duration::from_secs(40))
        );
        assert_eq!(w.count(), 2);

        assert!(w.try_acquire(start + Duration::from_secs(60)));
        assert_eq!(w.count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn new_window_starts_now() {
        let mut w = RateWindow::new(1, Duration::from_secs(10));
        assert!(w.try_acquire(Instant::now()));
        assert!(!w.try_acquire(Instant::now()));

        tokio::time::advance(Duration::from_secs(10)).await;
        assert!(w.try_acquire(Instant::now()));
    }

    #[test]
    fn huge_windows_do_not_overflow() {
        let start = Instant::now();
        let mut w = RateWindow::starting_at(1, Duration::MAX, start);
        assert!(w.try_acquire(start));
        assert!(w.wait_time(start + Duration::from_secs(1)).is_some());
    }
}
