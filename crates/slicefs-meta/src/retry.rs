//! Exponential back-off between transaction retries.

use std::time::Duration;

/// Back-off state for one operation.
///
/// Each call to `next_wait` doubles the wait (capped at `max_wait`) and returns
/// `None` once `max_attempts` retries have been handed out.
pub struct ExponentialBackoff {
    max_wait: Duration,
    current_wait: Duration,
    max_attempts: u32,
    attempts: u32,
}

impl ExponentialBackoff {
    pub fn new(init_wait: Duration, max_wait: Duration, max_attempts: u32) -> Self {
        Self {
            max_wait,
            current_wait: init_wait,
            max_attempts,
            attempts: 0,
        }
    }

    pub fn next_wait(&mut self) -> Option<Duration> {
        if self.attempts >= self.max_attempts {
            return None;
        }
        let wait = self.current_wait;
        self.current_wait = (self.current_wait * 2).min(self.max_wait);
        self.attempts += 1;
        Some(wait.min(self.max_wait))
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exponential_backoff_basic() {
        let mut bo = ExponentialBackoff::new(
            Duration::from_millis(100),
            Duration::from_millis(500),
            5,
        );
        assert_eq!(bo.attempts(), 0);
        assert_eq!(bo.next_wait(), Some(Duration::from_millis(100)));
        assert_eq!(bo.next_wait(), Some(Duration::from_millis(200)));
        assert_eq!(bo.next_wait(), Some(Duration::from_millis(400)));
        assert_eq!(bo.next_wait(), Some(Duration::from_millis(500)));
        assert_eq!(bo.next_wait(), Some(Duration::from_millis(500)));
        assert_eq!(bo.attempts(), 5);
        assert_eq!(bo.next_wait(), None);
    }

    #[test]
    fn test_zero_attempts() {
        let mut bo = ExponentialBackoff::new(Duration::from_millis(1), Duration::from_millis(1), 0);
        assert!(bo.next_wait().is_none());
    }
}
