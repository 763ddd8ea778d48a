use std::thread;
use std::time::{Duration, Instant};

/// Fixed-rate loop clock for the foreground loop.
///
/// `tick()` sleeps until one period has passed since the previous tick. If the
/// loop body overran (a blocking capture, say), it returns immediately and the
/// schedule restarts from now rather than bursting to catch up. A rate of 0
/// never sleeps.
pub struct Ticker {
    period: Option<Duration>,
    last: Option<Instant>,
}

impl Ticker {
    pub fn new(hz: u32) -> Self {
        let period = (hz > 0).then(|| Duration::from_secs_f64(1.0 / hz as f64));
        Self { period, last: None }
    }

    /// Wait for the next tick; returns the time since the previous one.
    pub fn tick(&mut self) -> Duration {
        let now = Instant::now();
        let Some(last) = self.last else {
            self.last = Some(now);
            return Duration::ZERO;
        };

        if let Some(period) = self.period {
            let elapsed = now.duration_since(last);
            if elapsed < period {
                thread::sleep(period - elapsed);
            }
        }

        let now = Instant::now();
        self.last = Some(now);
        now.duration_since(last)
    }
}
