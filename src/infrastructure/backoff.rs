use std::time::Duration;

/// Exponentially growing retry delays with a bounded number of attempts
#[derive(Debug, Clone)]
pub struct Backoff {
    retries: u32,
    limit: u32,
    multiplier: u32,
    current: Duration,
    max: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, limit: u32) -> Self {
        Self {
            retries: 0,
            limit,
            multiplier: 2,
            current: initial,
            max: Duration::from_secs(5),
        }
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(Duration::from_millis(50), 8)
    }
}

impl Iterator for Backoff {
    type Item = Duration;

    fn next(&mut self) -> Option<Self::Item> {
        self.retries += 1;

        if self.retries > self.limit {
            None
        } else {
            let delay = self.current;
            self.current = (self.current * self.multiplier).min(self.max);
            Some(delay)
        }
    }
}
