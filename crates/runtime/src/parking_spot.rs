//! Address-keyed thread parking for the wait/notify intrinsics.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Instant;

/// The outcome of a wait, in the encoding emitted code receives.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum WaitResult {
    /// The thread parked and was woken by a notify.
    Ok = 0,
    /// The value in memory did not match the expected value; the thread
    /// never parked.
    Mismatch = 1,
    /// The deadline passed without a notify.
    TimedOut = 2,
}

impl WaitResult {
    /// The wire encoding of this result.
    pub fn as_u32(self) -> u32 {
        self as u32
    }
}

#[derive(Default)]
struct Spot {
    state: Mutex<SpotState>,
    condvar: Condvar,
}

#[derive(Default)]
struct SpotState {
    num_parked: u32,
    to_wake: u32,
}

/// A map from host addresses to parked threads.
///
/// The expected-value check happens under the map lock, so a notify on the
/// same address cannot slip between a waiter's validation and its parking:
/// either the notify sees the waiter's registration, or the waiter sees
/// the store that preceded the notify.
pub struct ParkingSpot {
    inner: Mutex<BTreeMap<u64, Arc<Spot>>>,
}

impl ParkingSpot {
    /// Creates an empty parking spot.
    pub const fn new() -> Self {
        Self {
            inner: Mutex::new(BTreeMap::new()),
        }
    }

    /// Parks the current thread if `atomic` holds `expected`, until
    /// notified or until `deadline`.
    pub fn wait32(
        &self,
        atomic: &AtomicU32,
        expected: u32,
        deadline: Option<Instant>,
    ) -> WaitResult {
        self.wait(
            atomic.as_ptr() as u64,
            || atomic.load(Ordering::SeqCst) == expected,
            deadline,
        )
    }

    /// Same as [`ParkingSpot::wait32`] for 64-bit values.
    pub fn wait64(
        &self,
        atomic: &AtomicU64,
        expected: u64,
        deadline: Option<Instant>,
    ) -> WaitResult {
        self.wait(
            atomic.as_ptr() as u64,
            || atomic.load(Ordering::SeqCst) == expected,
            deadline,
        )
    }

    fn wait(&self, key: u64, validate: impl FnOnce() -> bool, deadline: Option<Instant>) -> WaitResult {
        let spot = {
            let mut map = self.inner.lock().unwrap();
            if !validate() {
                return WaitResult::Mismatch;
            }
            let spot = map.entry(key).or_default().clone();
            spot.state.lock().unwrap().num_parked += 1;
            spot
        };

        let mut state = spot.state.lock().unwrap();
        let result = loop {
            if state.to_wake > 0 {
                state.to_wake -= 1;
                break WaitResult::Ok;
            }
            match deadline {
                None => state = spot.condvar.wait(state).unwrap(),
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        break WaitResult::TimedOut;
                    }
                    let (guard, _timeout) = spot
                        .condvar
                        .wait_timeout(state, deadline - now)
                        .unwrap();
                    state = guard;
                }
            }
        };
        state.num_parked -= 1;
        let last_out = state.num_parked == 0;
        drop(state);

        if last_out {
            let mut map = self.inner.lock().unwrap();
            if let Some(entry) = map.get(&key) {
                if Arc::ptr_eq(entry, &spot) && entry.state.lock().unwrap().num_parked == 0 {
                    map.remove(&key);
                }
            }
        }

        result
    }

    /// Wakes up to `count` threads parked on `key`, returning how many
    /// were woken.
    pub fn notify(&self, key: u64, count: u32) -> u32 {
        let map = self.inner.lock().unwrap();
        let Some(spot) = map.get(&key) else {
            return 0;
        };
        let mut state = spot.state.lock().unwrap();
        let waiting = state.num_parked.saturating_sub(state.to_wake);
        let woken = waiting.min(count);
        if woken > 0 {
            state.to_wake += woken;
            spot.condvar.notify_all();
        }
        woken
    }
}

impl Default for ParkingSpot {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;
    use std::time::Duration;

    #[test]
    fn mismatch_does_not_park() {
        let spot = ParkingSpot::new();
        let atomic = AtomicU32::new(7);
        assert_eq!(spot.wait32(&atomic, 8, None), WaitResult::Mismatch);
    }

    #[test]
    fn timeout_elapses() {
        let spot = ParkingSpot::new();
        let atomic = AtomicU32::new(0);
        let deadline = Instant::now() + Duration::from_millis(20);
        assert_eq!(spot.wait32(&atomic, 0, Some(deadline)), WaitResult::TimedOut);
    }

    #[test]
    fn notify_with_no_waiters_wakes_none() {
        let spot = ParkingSpot::new();
        assert_eq!(spot.notify(0x1000, u32::MAX), 0);
    }

    #[test]
    fn notify_wakes_parked_threads() {
        static SPOT: ParkingSpot = ParkingSpot::new();
        static ATOMIC: AtomicU32 = AtomicU32::new(0);

        let threads: Vec<_> = (0..4)
            .map(|_| {
                std::thread::spawn(|| SPOT.wait32(&ATOMIC, 0, None))
            })
            .collect();

        // Wait until every thread is parked before notifying.
        let key = ATOMIC.as_ptr() as u64;
        loop {
            let parked = {
                let map = SPOT.inner.lock().unwrap();
                map.get(&key)
                    .map(|spot| spot.state.lock().unwrap().num_parked)
                    .unwrap_or(0)
            };
            if parked == 4 {
                break;
            }
            std::thread::yield_now();
        }

        assert_eq!(SPOT.notify(key, 2), 2);
        assert_eq!(SPOT.notify(key, u32::MAX), 2);
        for thread in threads {
            assert_eq!(thread.join().unwrap(), WaitResult::Ok);
        }
    }
}
