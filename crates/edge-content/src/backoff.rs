//! Exponential backoff used when polling async tasks.

use std::time::Duration;

pub const INITIAL_DELAY: Duration = Duration::from_millis(16);
pub const MAX_DELAY: Duration = Duration::from_millis(2048);

/// Doubling delay sequence starting at 16 ms, held at the maximum forever.
///
/// The sequence never ends; callers bound the total wait with a context.
#[derive(Debug, Clone)]
pub struct Backoff {
    next: Duration,
    max: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new()
    }
}

impl Backoff {
    pub fn new() -> Self {
        Self {
            next: INITIAL_DELAY,
            max: MAX_DELAY,
        }
    }

    /// Cap the delay at `max` instead of 2048 ms.
    pub fn with_max_delay(mut self, max: Duration) -> Self {
        self.max = max.max(Duration::from_millis(1));
        self.next = self.next.min(self.max);
        self
    }

    pub fn next_delay(&mut self) -> Duration {
        let delay = self.next;
        self.next = (self.next * 2).min(self.max);
        delay
    }
}

impl Iterator for Backoff {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        Some(self.next_delay())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn doubles_then_holds() {
        let delays: Vec<u64> = Backoff::new()
            .take(11)
            .map(|d| d.as_millis() as u64)
            .collect();
        assert_eq!(
            delays,
            vec![16, 32, 64, 128, 256, 512, 1024, 2048, 2048, 2048, 2048]
        );
    }

    #[test]
    fn custom_max_caps_sequence() {
        let delays: Vec<u64> = Backoff::new()
            .with_max_delay(Duration::from_millis(100))
            .take(5)
            .map(|d| d.as_millis() as u64)
            .collect();
        assert_eq!(delays, vec![16, 32, 64, 100, 100]);
    }

    #[test]
    fn max_below_initial_clamps_first_delay() {
        let mut backoff = Backoff::new().with_max_delay(Duration::from_millis(5));
        assert_eq!(backoff.next_delay(), Duration::from_millis(5));
        assert_eq!(backoff.next_delay(), Duration::from_millis(5));
    }
}
