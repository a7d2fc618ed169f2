use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use super::guard::GuardState;

/// Notable guard events, kept in memory only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum GuardEvent {
    EpisodeStarted { power_w: f64 },
    EpisodeEnded { ran_ms: u32 },
    /// Load ran too long and was switched off
    Tripped { ran_ms: u32, power_w: f64 },
    /// Reset button pressed while in the given state
    ManualReset { from: GuardState },
}

/// Bounded history of recent guard events.
#[derive(Debug, Clone)]
pub struct EventLog {
    events: VecDeque<(DateTime<Utc>, GuardEvent)>,
    max_events: usize,
}

impl EventLog {
    pub fn new(max_events: usize) -> Self {
        Self {
            events: VecDeque::with_capacity(max_events.min(256)),
            max_events: max_events.max(1),
        }
    }

    pub fn record(&mut self, event: GuardEvent) {
        self.events.push_back((Utc::now(), event));
        if self.events.len() > self.max_events {
            self.events.pop_front();
        }
    }

    /// The `count` most recent events, oldest first.
    pub fn recent(&self, count: usize) -> Vec<(DateTime<Utc>, GuardEvent)> {
        let start = self.events.len().saturating_sub(count);
        self.events.iter().skip(start).cloned().collect()
    }

    pub fn trip_count(&self) -> usize {
        self.events
            .iter()
            .filter(|(_, e)| matches!(e, GuardEvent::Tripped { .. }))
            .count()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new(100)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_history_is_bounded() {
        let mut log = EventLog::new(3);
        for i in 0..5 {
            log.record(GuardEvent::EpisodeEnded { ran_ms: i });
        }
        assert_eq!(log.len(), 3);

        let recent: Vec<_> = log.recent(10).into_iter().map(|(_, e)| e).collect();
        assert_eq!(
            recent,
            vec![
                GuardEvent::EpisodeEnded { ran_ms: 2 },
                GuardEvent::EpisodeEnded { ran_ms: 3 },
                GuardEvent::EpisodeEnded { ran_ms: 4 },
            ]
        );
    }

    #[test]
    fn test_trip_count() {
        let mut log = EventLog::default();
        log.record(GuardEvent::EpisodeStarted { power_w: 150.0 });
        log.record(GuardEvent::Tripped {
            ran_ms: 900_001,
            power_w: 150.0,
        });
        log.record(GuardEvent::ManualReset {
            from: GuardState::Tripped,
        });
        assert_eq!(log.trip_count(), 1);
        assert_eq!(log.recent(1)[0].1, GuardEvent::ManualReset { from: GuardState::Tripped });
    }
}
