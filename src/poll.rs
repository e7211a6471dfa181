//! Bounded retry/poll loop.
//!
//! Repeats an attempt with a fixed delay between attempts until it yields a
//! value, the attempt budget runs out, or a stop flag is raised. Errors from
//! the attempt end the loop immediately; only "nothing yet" is retried.

use crate::error::Result;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

/// How a [`PollLoop`] finished.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PollOutcome<T> {
    Completed { value: T, attempts: usize },
    Exhausted { attempts: usize },
    Stopped { attempts: usize },
}

#[derive(Clone, Copy, Debug)]
pub struct PollLoop {
    interval: Duration,
    max_attempts: Option<usize>,
}

impl PollLoop {
    /// Unbounded loop; ends on success, error, or stop.
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            max_attempts: None,
        }
    }

    pub fn max_attempts(mut self, attempts: usize) -> Self {
        self.max_attempts = Some(attempts);
        self
    }

    /// Run `attempt(n)` for n = 0, 1, ... sleeping `interval` between attempts.
    ///
    /// `Ok(Some(v))` completes the loop, `Ok(None)` schedules another attempt.
    pub fn run<T, F>(&self, stop: &AtomicBool, mut attempt: F) -> Result<PollOutcome<T>>
    where
        F: FnMut(usize) -> Result<Option<T>>,
    {
        let mut attempts = 0usize;
        loop {
            if stop.load(Ordering::SeqCst) {
                return Ok(PollOutcome::Stopped { attempts });
            }
            if self.max_attempts.is_some_and(|max| attempts >= max) {
                return Ok(PollOutcome::Exhausted { attempts });
            }

            let n = attempts;
            attempts += 1;
            if let Some(value) = attempt(n)? {
                return Ok(PollOutcome::Completed { value, attempts });
            }

            if self.max_attempts.is_some_and(|max| attempts >= max) {
                return Ok(PollOutcome::Exhausted { attempts });
            }
            thread::sleep(self.interval);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HidError;

    #[test]
    fn completes_on_first_value() {
        let stop = AtomicBool::new(false);
        let out = PollLoop::new(Duration::from_millis(1))
            .max_attempts(10)
            .run(&stop, |n| Ok(if n == 3 { Some(n * 2) } else { None }))
            .unwrap();
        assert_eq!(out, PollOutcome::Completed { value: 6, attempts: 4 });
    }

    #[test]
    fn exhausts_budget() {
        let stop = AtomicBool::new(false);
        let mut calls = 0;
        let out: PollOutcome<()> = PollLoop::new(Duration::ZERO)
            .max_attempts(5)
            .run(&stop, |_| {
                calls += 1;
                Ok(None)
            })
            .unwrap();
        assert_eq!(out, PollOutcome::Exhausted { attempts: 5 });
        assert_eq!(calls, 5);
    }

    #[test]
    fn stop_flag_ends_unbounded_loop() {
        let stop = AtomicBool::new(false);
        let out: PollOutcome<()> = PollLoop::new(Duration::ZERO)
            .run(&stop, |n| {
                if n == 2 {
                    stop.store(true, Ordering::SeqCst);
                }
                Ok(None)
            })
            .unwrap();
        assert_eq!(out, PollOutcome::Stopped { attempts: 3 });
    }

    #[test]
    fn errors_are_not_retried() {
        let stop = AtomicBool::new(false);
        let mut calls = 0;
        let res: Result<PollOutcome<()>> = PollLoop::new(Duration::ZERO)
            .max_attempts(5)
            .run(&stop, |_| {
                calls += 1;
                Err(HidError::transfer("bus busy"))
            });
        assert!(matches!(res, Err(HidError::Transfer { .. })));
        assert_eq!(calls, 1);
    }
}
