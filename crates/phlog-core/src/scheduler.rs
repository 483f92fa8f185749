//! Interval Scheduler: a fixed-period wake-up source that reports the
//! boundaries it could not deliver.

use std::time::Duration;

use crate::clock::{Clock, SystemClock};

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SchedulerError {
    #[error("interval period must be a positive number of microseconds")]
    InvalidPeriod,
    #[error("interval timer is not running")]
    NotStarted,
}

pub trait Scheduler {
    fn start(&mut self, period_us: u64) -> Result<(), SchedulerError>;

    /// Blocks until the next period boundary and returns how many boundaries
    /// passed unobserved since the previous call.
    fn wait_next(&mut self) -> Result<u64, SchedulerError>;

    /// Monotonic tick, for durations only.
    fn now(&self) -> Duration;

    /// Idempotent.
    fn stop(&mut self) -> Result<(), SchedulerError>;
}

/// [`Scheduler`] whose boundaries stay aligned to `start + k * period`.
#[derive(Debug)]
pub struct IntervalTimer<C: Clock = SystemClock> {
    clock: C,
    period: Duration,
    next: Option<Duration>,
}

impl<C: Clock> IntervalTimer<C> {
    pub fn new(clock: C) -> Self {
        Self {
            clock,
            period: Duration::ZERO,
            next: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.next.is_some()
    }
}

fn nanos(n: u128) -> Duration {
    Duration::from_nanos(u64::try_from(n).unwrap_or(u64::MAX))
}

impl<C: Clock> Scheduler for IntervalTimer<C> {
    fn start(&mut self, period_us: u64) -> Result<(), SchedulerError> {
        if period_us == 0 {
            return Err(SchedulerError::InvalidPeriod);
        }
        self.period = Duration::from_micros(period_us);
        self.next = Some(self.clock.now() + self.period);
        Ok(())
    }

    fn wait_next(&mut self) -> Result<u64, SchedulerError> {
        let next = self.next.ok_or(SchedulerError::NotStarted)?;
        let now = self.clock.now();

        let skipped = if now > next {
            let period = self.period.as_nanos();
            ((now - next).as_nanos() + period - 1) / period
        } else {
            0
        };
        let target = nanos(next.as_nanos() + self.period.as_nanos() * skipped);
        if target > now {
            self.clock.sleep(target - now);
        }
        self.next = Some(target + self.period);
        Ok(skipped as u64)
    }

    fn now(&self) -> Duration {
        self.clock.now()
    }

    fn stop(&mut self) -> Result<(), SchedulerError> {
        self.next = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    #[test]
    fn rejects_zero_period() {
        let mut timer = IntervalTimer::new(ManualClock::new());
        assert_eq!(timer.start(0), Err(SchedulerError::InvalidPeriod));
        assert_eq!(timer.wait_next(), Err(SchedulerError::NotStarted));
    }

    #[test]
    fn on_time_iterations_skip_nothing() {
        let clock = ManualClock::new();
        let mut timer = IntervalTimer::new(clock.clone());
        timer.start(100_000).unwrap();
        for k in 1..=5 {
            assert_eq!(timer.wait_next(), Ok(0));
            assert_eq!(timer.now(), ms(100 * k));
            clock.advance(ms(30));
        }
    }

    #[test]
    fn overruns_are_counted_and_boundaries_stay_aligned() {
        let clock = ManualClock::new();
        let mut timer = IntervalTimer::new(clock.clone());
        timer.start(1_000_000).unwrap();

        assert_eq!(timer.wait_next(), Ok(0));
        assert_eq!(timer.now(), ms(1000));

        clock.advance(ms(1300));
        assert_eq!(timer.wait_next(), Ok(1));
        assert_eq!(timer.now(), ms(3000));

        clock.advance(ms(2500));
        assert_eq!(timer.wait_next(), Ok(2));
        assert_eq!(timer.now(), ms(6000));

        // landing exactly on a boundary still counts the one before it
        clock.advance(ms(2000));
        assert_eq!(timer.wait_next(), Ok(1));
        assert_eq!(timer.now(), ms(8000));

        assert_eq!(timer.wait_next(), Ok(0));
        assert_eq!(timer.now(), ms(9000));
    }

    #[test]
    fn stop_is_idempotent() {
        let mut timer = IntervalTimer::new(ManualClock::new());
        timer.start(10).unwrap();
        assert!(timer.is_running());
        timer.stop().unwrap();
        timer.stop().unwrap();
        assert!(!timer.is_running());
        assert_eq!(timer.wait_next(), Err(SchedulerError::NotStarted));
    }
}
