//! Viewer-count coalescing.
//!
//! Connects and disconnects can arrive in bursts; broadcasting a count for
//! each one would flood every viewer. The coalescer lets at most one count
//! out per interval and always lets the final, settled count out eventually.

use std::time::{Duration, Instant};

pub struct ViewerCountCoalescer {
    interval: Duration,
    last_sent: Option<usize>,
    last_sent_at: Option<Instant>,
    dirty: bool,
}

impl ViewerCountCoalescer {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_sent: None,
            last_sent_at: None,
            dirty: false,
        }
    }

    /// Record that the number of sessions may have changed.
    pub fn mark_changed(&mut self) {
        self.dirty = true;
    }

    /// The count to broadcast now, if any.
    ///
    /// Returns `None` while nothing changed, while still inside the interval
    /// since the last broadcast, or when the count settled back to the value
    /// last broadcast.
    pub fn poll(&mut self, now: Instant, current: usize) -> Option<usize> {
        if !self.dirty {
            return None;
        }
        if let Some(at) = self.last_sent_at {
            if now.duration_since(at) < self.interval {
                return None;
            }
        }

        self.dirty = false;
        if self.last_sent == Some(current) {
            return None;
        }
        self.last_sent = Some(current);
        self.last_sent_at = Some(now);
        Some(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECOND: Duration = Duration::from_secs(1);

    #[test]
    fn first_change_goes_out_immediately() {
        let mut c = ViewerCountCoalescer::new(SECOND);
        let t0 = Instant::now();
        assert_eq!(c.poll(t0, 0), None);
        c.mark_changed();
        assert_eq!(c.poll(t0, 1), Some(1));
    }

    #[test]
    fn burst_inside_interval_is_coalesced() {
        let mut c = ViewerCountCoalescer::new(SECOND);
        let t0 = Instant::now();
        c.mark_changed();
        assert_eq!(c.poll(t0, 1), Some(1));

        for n in 2..=50 {
            c.mark_changed();
            assert_eq!(c.poll(t0 + Duration::from_millis(n * 10), n as usize), None);
        }

        // Once the interval has passed the settled count goes out.
        assert_eq!(c.poll(t0 + SECOND, 50), Some(50));
        assert_eq!(c.poll(t0 + SECOND * 3, 50), None);
    }

    #[test]
    fn net_zero_change_is_not_rebroadcast() {
        let mut c = ViewerCountCoalescer::new(SECOND);
        let t0 = Instant::now();
        c.mark_changed();
        assert_eq!(c.poll(t0, 5), Some(5));

        c.mark_changed(); // one joins
        c.mark_changed(); // one leaves
        assert_eq!(c.poll(t0 + SECOND * 2, 5), None);
    }

    #[test]
    fn zero_interval_never_holds_back() {
        let mut c = ViewerCountCoalescer::new(Duration::ZERO);
        let t0 = Instant::now();
        for n in 1..=3 {
            c.mark_changed();
            assert_eq!(c.poll(t0, n), Some(n));
        }
    }
}
