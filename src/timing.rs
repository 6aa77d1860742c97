use std::time::{Duration, Instant};

#[must_use]
pub fn elapsed_ms(start: Instant) -> u64 {
    let ms = start.elapsed().as_millis();
    u64::try_from(ms).map_or(u64::MAX, |value| value)
}

/// Wall-clock budget that can be paused while waiting on a human.
#[derive(Debug, Clone)]
pub struct Stopwatch {
    start: Instant,
    excluded: Duration,
}

impl Default for Stopwatch {
    fn default() -> Self {
        Self::start()
    }
}

impl Stopwatch {
    #[must_use]
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
            excluded: Duration::ZERO,
        }
    }

    pub fn exclude(&mut self, waited: Duration) {
        self.excluded = self.excluded.saturating_add(waited);
    }

    /// Elapsed time minus excluded waits.
    #[must_use]
    pub fn counted(&self) -> Duration {
        self.start.elapsed().saturating_sub(self.excluded)
    }

    #[must_use]
    pub fn exceeded(&self, budget: Option<Duration>) -> bool {
        budget.is_some_and(|limit| self.counted() >= limit)
    }
}
