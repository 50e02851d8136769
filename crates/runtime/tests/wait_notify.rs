//! The wait/notify intrinsics across threads.

use bulkhead_environ::{MemoryType, TrapCode};
use bulkhead_runtime::{
    bulkhead_atomic_notify, bulkhead_atomic_wait_i32, bulkhead_atomic_wait_i64, catch_traps,
    Compartment, Context, Memory,
};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

const WOKEN: u32 = 0;
const MISMATCH: u32 = 1;
const TIMED_OUT: u32 = 2;

struct WaitFixture {
    compartment: Arc<Compartment>,
    memory: Arc<Memory>,
    ctx: usize,
}

impl WaitFixture {
    fn new() -> Self {
        let compartment = Compartment::new().unwrap();
        let memory = Memory::new(&compartment, MemoryType::new(1, None), "m", None).unwrap();
        let context = Context::new(&compartment).unwrap();
        let ctx = context.runtime_data() as usize;
        // Keep the context alive through the compartment.
        drop(context);
        Self {
            compartment,
            memory,
            ctx,
        }
    }
}

impl Drop for WaitFixture {
    fn drop(&mut self) {
        self.compartment.clear();
    }
}

#[test]
fn wait_returns_mismatch_without_blocking() {
    let fixture = WaitFixture::new();
    fixture.memory.write(8, &5u32.to_le_bytes()).unwrap();
    let status = unsafe {
        bulkhead_atomic_wait_i32(fixture.ctx as *mut _, 8, 6, -1, fixture.memory.id())
    };
    assert_eq!(status, MISMATCH);
}

#[test]
fn wait_times_out() {
    let fixture = WaitFixture::new();
    let status = unsafe {
        bulkhead_atomic_wait_i32(
            fixture.ctx as *mut _,
            16,
            0,
            2_000_000, // 2ms
            fixture.memory.id(),
        )
    };
    assert_eq!(status, TIMED_OUT);
}

#[test]
fn wait64_times_out() {
    let fixture = WaitFixture::new();
    let status = unsafe {
        bulkhead_atomic_wait_i64(fixture.ctx as *mut _, 24, 0, 2_000_000, fixture.memory.id())
    };
    assert_eq!(status, TIMED_OUT);
}

#[test]
fn out_of_bounds_wait_and_notify_trap() {
    let fixture = WaitFixture::new();
    let past_end = fixture.memory.committed_bytes() as u32;

    let trap = catch_traps(|| unsafe {
        bulkhead_atomic_wait_i32(fixture.ctx as *mut _, past_end, 0, -1, fixture.memory.id())
    })
    .unwrap_err();
    assert_eq!(trap.code, TrapCode::OutOfBoundsMemoryAccess);

    let trap = catch_traps(|| unsafe {
        bulkhead_atomic_notify(fixture.ctx as *mut _, past_end, 1, fixture.memory.id())
    })
    .unwrap_err();
    assert_eq!(trap.code, TrapCode::OutOfBoundsMemoryAccess);
}

#[test]
fn notify_wakes_waiters() {
    let fixture = WaitFixture::new();
    let ctx = fixture.ctx;
    let memory_id = fixture.memory.id();
    let address = 32u32;

    let waiters: Vec<_> = (0..2)
        .map(|_| {
            thread::spawn(move || unsafe {
                bulkhead_atomic_wait_i32(ctx as *mut _, address, 0, -1, memory_id)
            })
        })
        .collect();

    // A notify that lands before a waiter parks wakes nobody, so keep
    // notifying until both waiters have been woken.
    let mut woken_total = 0;
    while woken_total < 2 {
        woken_total +=
            unsafe { bulkhead_atomic_notify(ctx as *mut _, address, u32::MAX, memory_id) };
        thread::sleep(Duration::from_millis(1));
    }
    for waiter in waiters {
        assert_eq!(waiter.join().unwrap(), WOKEN);
    }
    assert_eq!(woken_total, 2);
}

#[test]
fn wait_observes_the_value_seqcst() {
    let fixture = WaitFixture::new();
    let ctx = fixture.ctx;
    let memory_id = fixture.memory.id();
    let address = 40u32;

    // The notifying thread stores a new value first, so a waiter that
    // validates after the store must return a mismatch rather than park
    // forever.
    let base = fixture.memory.base() as usize;
    let atomic = unsafe { &*((base + address as usize) as *const AtomicU32) };
    atomic.store(1, Ordering::SeqCst);

    let status = unsafe {
        bulkhead_atomic_wait_i32(ctx as *mut _, address, 0, -1, memory_id)
    };
    assert_eq!(status, MISMATCH);
}
