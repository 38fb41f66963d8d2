/// Exponential backoff for read errors

use std::time::Duration;

/// Initial backoff after a read error
pub const DEFAULT_BACKOFF: Duration = Duration::from_secs(1);

/// Backoff ceiling
pub const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Doubling backoff with a ceiling
///
/// ```
/// use flagstream_shared::pubsub::backoff::Backoff;
/// use std::time::Duration;
///
/// let mut backoff = Backoff::default();
/// assert_eq!(backoff.next(), Duration::from_secs(1));
/// assert_eq!(backoff.next(), Duration::from_secs(2));
/// backoff.reset();
/// assert_eq!(backoff.next(), Duration::from_secs(1));
/// ```
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            current: initial,
        }
    }

    /// Delay to wait now; doubles the delay for next time, up to the ceiling
    pub fn next(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(self.max);
        delay
    }

    /// Delay the next call to [`Backoff::next`] will return
    pub fn current(&self) -> Duration {
        self.current
    }

    pub fn reset(&mut self) {
        self.current = self.initial;
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(DEFAULT_BACKOFF, MAX_BACKOFF)
    }
}
