//! Polling helpers

use log::debug;
use std::time::{Duration, Instant};

use super::results::{IsScreenBlackResult, MatchResult};

/// Whether a value counts as success when polling.
pub trait Truthy {
    fn is_truthy(&self) -> bool;
}

impl Truthy for bool {
    fn is_truthy(&self) -> bool {
        *self
    }
}

impl<T> Truthy for Option<T> {
    fn is_truthy(&self) -> bool {
        self.is_some()
    }
}

impl<T> Truthy for Vec<T> {
    fn is_truthy(&self) -> bool {
        !self.is_empty()
    }
}

/// Errors are never truthy; polling carries on past them.
impl<T: Truthy, E> Truthy for Result<T, E> {
    fn is_truthy(&self) -> bool {
        self.as_ref().is_ok_and(|v| v.is_truthy())
    }
}

impl<T: Truthy + ?Sized> Truthy for &T {
    fn is_truthy(&self) -> bool {
        (**self).is_truthy()
    }
}

impl Truthy for MatchResult {
    fn is_truthy(&self) -> bool {
        self.matched
    }
}

impl Truthy for IsScreenBlackResult {
    fn is_truthy(&self) -> bool {
        self.black
    }
}

/// Call `callable` every `interval` until it returns something truthy.
///
/// Gives up after `timeout` and returns the last (falsy) value.
pub fn wait_until<T, F>(mut callable: F, timeout: Duration, interval: Duration) -> T
where
    T: Truthy,
    F: FnMut() -> T,
{
    let expiry = Instant::now() + timeout;
    loop {
        let t = Instant::now();
        let value = callable();
        if value.is_truthy() {
            return value;
        }
        if t >= expiry {
            debug!("wait_until timed out after {timeout:?}");
            return value;
        }
        std::thread::sleep(interval);
    }
}

/// [`wait_until`] judging success by `predicate(value)` and, when `stable`
/// is non-zero, requiring the predicate's value to stay unchanged that long.
///
/// Returns the first value of the stable run on success. On timeout returns
/// the last value if it was falsy, or `None` if it was truthy but failed the
/// predicate or stability checks.
pub fn wait_until_with<T, V, F, P>(
    mut callable: F,
    timeout: Duration,
    interval: Duration,
    mut predicate: P,
    stable: Duration,
) -> Option<T>
where
    T: Truthy + Clone,
    V: Truthy + PartialEq,
    F: FnMut() -> T,
    P: FnMut(&T) -> V,
{
    let expiry = Instant::now() + timeout;
    let mut stable_run: Option<(Instant, T, V)> = None;
    loop {
        let t = Instant::now();
        let value = callable();
        let predicate_value = predicate(&value);

        if stable.is_zero() {
            if predicate_value.is_truthy() {
                return Some(value);
            }
        } else {
            if stable_run.as_ref().is_none_or(|(_, _, v)| *v != predicate_value) {
                stable_run = Some((t, value.clone(), predicate_value));
            }
            if let Some((since, first, v)) = &stable_run
                && v.is_truthy()
                && t.duration_since(*since) >= stable
            {
                return Some(first.clone());
            }
        }

        if t >= expiry {
            debug!("wait_until timed out after {timeout:?}");
            return if value.is_truthy() { None } else { Some(value) };
        }
        std::thread::sleep(interval);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn test_returns_first_truthy_value() {
        let calls = Cell::new(0);
        let value = wait_until(
            || {
                calls.set(calls.get() + 1);
                (calls.get() >= 3).then_some(calls.get())
            },
            Duration::from_secs(5),
            Duration::ZERO,
        );
        assert_eq!(value, Some(3));
    }

    #[test]
    fn test_returns_falsy_value_on_timeout() {
        let started = Instant::now();
        let value = wait_until(|| false, Duration::from_millis(50), Duration::from_millis(10));
        assert!(!value);
        assert!(started.elapsed() >= Duration::from_millis(50));
    }

    #[test]
    fn test_predicate_decides_but_value_is_returned() {
        let n = Cell::new(0u32);
        let value = wait_until_with(
            || {
                n.set(n.get() + 1);
                Some(n.get())
            },
            Duration::from_secs(5),
            Duration::ZERO,
            |v| v.is_some_and(|v| v % 4 == 0),
            Duration::ZERO,
        );
        assert_eq!(value, Some(Some(4)));
    }

    #[test]
    fn test_truthy_value_failing_predicate_gives_none() {
        let value = wait_until_with(
            || Some(1),
            Duration::from_millis(30),
            Duration::from_millis(5),
            |_| false,
            Duration::ZERO,
        );
        assert_eq!(value, None);
    }

    #[test]
    fn test_stable_secs_waits_for_value_to_settle() {
        // Moves for the first few calls, then settles on 10.
        let n = Cell::new(0);
        let started = Instant::now();
        let value = wait_until_with(
            || {
                n.set(n.get() + 1);
                Some(n.get().min(5) * 2)
            },
            Duration::from_secs(5),
            Duration::from_millis(10),
            |v| *v,
            Duration::from_millis(100),
        );
        assert_eq!(value, Some(Some(10)));
        assert!(started.elapsed() >= Duration::from_millis(100));
        // The first settled value is returned, not the latest call's.
        assert!(n.get() > 5);
    }

    #[test]
    fn test_errors_are_falsy() {
        let result: Result<bool, String> = Err("boom".into());
        assert!(!result.is_truthy());
        assert!(Ok::<bool, String>(true).is_truthy());
        assert!(!Vec::<u8>::new().is_truthy());
    }
}
