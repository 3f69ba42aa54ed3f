//! Request coalescing.
//!
//! Concurrent callers asking for the same key share one computation: the
//! first caller becomes the leader and runs it, later callers block until the
//! leader publishes its value. If the leader fails (including cancellation),
//! waiters do not inherit the failure; one of them leads a fresh attempt.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock};

use cartograph_core::CartographError;

type Slot<T> = Arc<OnceLock<Option<Arc<T>>>>;

/// How a caller obtained its value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlightRole {
    /// This caller ran the computation.
    Leader,
    /// This caller waited for another caller's computation.
    Waiter,
}

/// In-flight computations keyed by string.
///
/// # Examples
///
/// ```
/// use cartograph_repomap::flight::{FlightRole, SingleFlight};
///
/// let flights: SingleFlight<u32> = SingleFlight::new();
/// let (value, role) = flights.run("key", || Ok(7)).unwrap();
/// assert_eq!(*value, 7);
/// assert_eq!(role, FlightRole::Leader);
/// ```
pub struct SingleFlight<T> {
    inflight: Mutex<HashMap<String, Slot<T>>>,
}

impl<T> Default for SingleFlight<T> {
    fn default() -> Self {
        Self {
            inflight: Mutex::new(HashMap::new()),
        }
    }
}

impl<T> SingleFlight<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `compute` for `key` unless an identical computation is already in
    /// flight, in which case wait for it and share its value.
    ///
    /// `compute` is invoked at most once per call.
    ///
    /// # Errors
    ///
    /// Returns the error from `compute` when this caller led the computation.
    pub fn run<F>(&self, key: &str, compute: F) -> Result<(Arc<T>, FlightRole), CartographError>
    where
        F: FnOnce() -> Result<T, CartographError>,
    {
        let mut compute = Some(compute);
        loop {
            let slot = self.slot(key);
            let mut led = false;
            let mut failure = None;

            let outcome = slot.get_or_init(|| {
                led = true;
                match compute.take().map(|f| f()) {
                    Some(Ok(value)) => Some(Arc::new(value)),
                    Some(Err(e)) => {
                        failure = Some(e);
                        None
                    }
                    None => None,
                }
            });
            let outcome = outcome.clone();

            if led {
                self.release(key, &slot);
            }

            match (outcome, led) {
                (Some(value), true) => return Ok((value, FlightRole::Leader)),
                (Some(value), false) => return Ok((value, FlightRole::Waiter)),
                (None, true) => return Err(failure.unwrap_or(CartographError::Cancelled)),
                (None, false) => {
                    // The leader gave up; retire its slot and try again.
                    self.release(key, &slot);
                }
            }
        }
    }

    #[cfg(test)]
    fn in_flight(&self) -> usize {
        self.lock().len()
    }

    fn slot(&self, key: &str) -> Slot<T> {
        self.lock()
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(OnceLock::new()))
            .clone()
    }

    fn release(&self, key: &str, slot: &Slot<T>) {
        let mut inflight = self.lock();
        if inflight.get(key).is_some_and(|s| Arc::ptr_eq(s, slot)) {
            inflight.remove(key);
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Slot<T>>> {
        self.inflight.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Barrier;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn concurrent_callers_share_one_computation() {
        let flights = Arc::new(SingleFlight::<usize>::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let barrier = Arc::new(Barrier::new(4));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let flights = Arc::clone(&flights);
                let calls = Arc::clone(&calls);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    flights
                        .run("same", || {
                            calls.fetch_add(1, Ordering::SeqCst);
                            thread::sleep(Duration::from_millis(100));
                            Ok(42)
                        })
                        .unwrap()
                })
            })
            .collect();

        let results: Vec<(Arc<usize>, FlightRole)> =
            handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert!(results.iter().all(|(v, _)| **v == 42));
        let leaders = results
            .iter()
            .filter(|(_, r)| *r == FlightRole::Leader)
            .count();
        assert_eq!(leaders, calls.load(Ordering::SeqCst));
        assert_eq!(flights.in_flight(), 0);
    }

    #[test]
    fn sequential_calls_recompute() {
        let flights = SingleFlight::<u32>::new();
        let (_, first) = flights.run("k", || Ok(1)).unwrap();
        let (value, second) = flights.run("k", || Ok(2)).unwrap();
        assert_eq!(first, FlightRole::Leader);
        assert_eq!(second, FlightRole::Leader);
        assert_eq!(*value, 2);
    }

    #[test]
    fn leader_failure_is_not_shared() {
        let flights = SingleFlight::<u32>::new();
        let err = flights
            .run("k", || Err(CartographError::Cancelled))
            .unwrap_err();
        assert!(matches!(err, CartographError::Cancelled));
        assert_eq!(flights.in_flight(), 0);

        let (value, role) = flights.run("k", || Ok(5)).unwrap();
        assert_eq!(*value, 5);
        assert_eq!(role, FlightRole::Leader);
    }

    #[test]
    fn waiter_recomputes_after_cancelled_leader() {
        let flights = Arc::new(SingleFlight::<u32>::new());
        let started = Arc::new(Barrier::new(2));

        let leader = {
            let flights = Arc::clone(&flights);
            let started = Arc::clone(&started);
            thread::spawn(move || {
                flights.run("k", || {
                    started.wait();
                    thread::sleep(Duration::from_millis(100));
                    Err(CartographError::Cancelled)
                })
            })
        };

        started.wait();
        let (value, role) = flights.run("k", || Ok(9)).unwrap();
        assert_eq!(*value, 9);
        assert_eq!(role, FlightRole::Leader);
        assert!(leader.join().unwrap().is_err());
    }

    #[test]
    fn distinct_keys_do_not_coalesce() {
        let flights = SingleFlight::<&'static str>::new();
        let (a, _) = flights.run("a", || Ok("a")).unwrap();
        let (b, _) = flights.run("b", || Ok("b")).unwrap();
        assert_eq!((*a, *b), ("a", "b"));
    }
}
