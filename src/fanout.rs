//! Blocking bounded fan-out.
//!
//! Runs a function over every item on its own thread while an admission gate
//! keeps at most `max_concurrent` of them inside the function at once. The
//! caller is blocked until every item has been processed, so this is only for
//! call sites that may block (the non-interactive check command and the probe
//! worker thread); the interactive UI loop uses the orchestrator instead.

use std::thread;

use parking_lot::{Condvar, Mutex};

/// Counting admission gate.
struct Gate {
    available: Mutex<usize>,
    released: Condvar,
}

struct Permit<'a> {
    gate: &'a Gate,
}

impl Gate {
    fn new(permits: usize) -> Self {
        Self {
            available: Mutex::new(permits),
            released: Condvar::new(),
        }
    }

    fn acquire(&self) -> Permit<'_> {
        let mut available = self.available.lock();
        while *available == 0 {
            self.released.wait(&mut available);
        }
        *available -= 1;
        Permit { gate: self }
    }
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        *self.gate.available.lock() += 1;
        self.gate.released.notify_one();
    }
}

/// Run `f` over `items` with at most `max_concurrent` calls in flight.
///
/// Completion order is unspecified. Shared state mutated by `f` must be
/// synchronized by the caller.
pub fn run<T, F>(items: Vec<T>, max_concurrent: usize, f: F)
where
    T: Send,
    F: Fn(T) + Sync,
{
    let gate = Gate::new(max_concurrent.max(1));
    let gate = &gate;
    let f = &f;

    thread::scope(|scope| {
        for item in items {
            scope.spawn(move || {
                let _permit = gate.acquire();
                f(item);
            });
        }
    });
}
