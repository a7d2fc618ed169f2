/// Fixed-period tick source for the cooperative control loop.
///
/// Never sleeps: the loop calls [`TickScheduler::poll`] every iteration and
/// runs the periodic work only when it returns `true`. The schedule is
/// drift-corrected (the next deadline is the previous one plus the interval),
/// and resynchronises to `now` after a stall of more than one interval so
/// missed ticks are dropped instead of replayed in a burst.
#[derive(Debug, Clone)]
pub struct TickScheduler {
    interval_ms: u32,
    last_tick_ms: Option<u32>,
    ticks: u64,
}

impl TickScheduler {
    pub fn new(interval_ms: u32) -> Self {
        Self {
            interval_ms: interval_ms.max(1),
            last_tick_ms: None,
            ticks: 0,
        }
    }

    pub fn interval_ms(&self) -> u32 {
        self.interval_ms
    }

    /// Number of ticks fired so far.
    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// Returns `true` when a tick is due. The first poll always fires.
    pub fn poll(&mut self, now_ms: u32) -> bool {
        let due = match self.last_tick_ms {
            None => {
                self.last_tick_ms = Some(now_ms);
                true
            }
            Some(last) => {
                let elapsed = now_ms.wrapping_sub(last);
                if elapsed < self.interval_ms {
                    false
                } else if elapsed < self.interval_ms.saturating_mul(2) {
                    self.last_tick_ms = Some(last.wrapping_add(self.interval_ms));
                    true
                } else {
                    self.last_tick_ms = Some(now_ms);
                    true
                }
            }
        };
        if due {
            self.ticks += 1;
        }
        due
    }

    /// Milliseconds until the next tick is due.
    pub fn remaining_ms(&self, now_ms: u32) -> u32 {
        match self.last_tick_ms {
            None => 0,
            Some(last) => self.interval_ms.saturating_sub(now_ms.wrapping_sub(last)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_poll_fires_immediately() {
        let mut s = TickScheduler::new(1_000);
        assert!(s.poll(0));
        assert!(!s.poll(1));
        assert!(!s.poll(999));
        assert!(s.poll(1_000));
        assert_eq!(s.ticks(), 2);
    }

    #[test]
    fn test_drift_corrected_deadlines() {
        let mut s = TickScheduler::new(1_000);
        assert!(s.poll(0));
        // Late by 30ms: next deadline stays on the 1000ms grid
        assert!(s.poll(1_030));
        assert!(!s.poll(1_999));
        assert!(s.poll(2_000));
    }

    #[test]
    fn test_stall_resyncs_without_burst() {
        let mut s = TickScheduler::new(1_000);
        assert!(s.poll(0));
        assert!(s.poll(5_500));
        assert!(!s.poll(5_600));
        assert!(!s.poll(6_499));
        assert!(s.poll(6_500));
        assert_eq!(s.ticks(), 3);
    }

    #[test]
    fn test_wraparound() {
        let mut s = TickScheduler::new(1_000);
        assert!(s.poll(u32::MAX - 200));
        assert!(!s.poll(u32::MAX));
        assert!(!s.poll(798));
        assert!(s.poll(799));
    }

    #[test]
    fn test_remaining_ms() {
        let mut s = TickScheduler::new(1_000);
        assert_eq!(s.remaining_ms(0), 0);
        s.poll(0);
        assert_eq!(s.remaining_ms(250), 750);
        assert_eq!(s.remaining_ms(1_200), 0);
    }

    #[test]
    fn test_zero_interval_is_clamped() {
        let s = TickScheduler::new(0);
        assert_eq!(s.interval_ms(), 1);
    }
}
