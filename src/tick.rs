//! Background tick loop – one named thread per connection.
//!
//! ```text
//! caller thread                 │  tick thread
//! ───────────────────────────── │ ──────────────────────────────
//! TickLoop::spawn(interval, f)  │  loop {
//!                               │    select! {
//!                               │      shutdown  → break
//!                               │      ticker    → f()   (if !cancelled)
//!                               │    }
//!                               │  }
//! TickLoop::stop()              │
//!   → cancelled = true          │
//!   → drop(shutdown_tx)  ────── │ ─→ wakes select!, loop exits
//!   → join()                    │
//! ```
//!
//! Cancellation is cooperative and silent.  A panic inside `f` is caught and
//! logged; the loop carries on with the next tick.

use std::io;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{select, Receiver, Sender};

use crate::listener::panic_message;

/// One game tick.
pub const TICK_INTERVAL: Duration = Duration::from_millis(50);

pub struct TickLoop {
    cancelled: Arc<AtomicBool>,
    ticks: Arc<AtomicU64>,
    shutdown: Option<Sender<()>>,
    handle: Option<thread::JoinHandle<()>>,
}

impl TickLoop {
    /// Start ticking every `interval`.  `on_tick` runs on the tick thread.
    ///
    /// `on_fault` is called (also on the tick thread) with the panic message
    /// whenever `on_tick` panics.
    pub fn spawn<F, E>(name: &str, interval: Duration, on_tick: F, on_fault: E) -> io::Result<Self>
    where
        F: Fn() + Send + 'static,
        E: Fn(String) + Send + 'static,
    {
        let (shutdown_tx, shutdown_rx) = crossbeam_channel::bounded::<()>(0);
        let cancelled = Arc::new(AtomicBool::new(false));
        let ticks = Arc::new(AtomicU64::new(0));

        let handle = {
            let cancelled = cancelled.clone();
            let ticks = ticks.clone();
            thread::Builder::new().name(name.into()).spawn(move || {
                run(interval, shutdown_rx, &cancelled, &ticks, on_tick, on_fault)
            })?
        };

        Ok(Self {
            cancelled,
            ticks,
            shutdown: Some(shutdown_tx),
            handle: Some(handle),
        })
    }

    /// Number of completed ticks.
    pub fn tick_count(&self) -> u64 {
        self.ticks.load(Ordering::Acquire)
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Signal the loop to exit and wait for it.
    ///
    /// When called from the tick thread itself (a listener stopping the
    /// session from `on_tick`) the loop is only signalled; it exits as soon
    /// as the current callback returns.
    pub fn stop(&mut self) {
        self.cancelled.store(true, Ordering::Release);
        drop(self.shutdown.take());

        let Some(handle) = self.handle.take() else {
            return;
        };
        if handle.thread().id() == thread::current().id() {
            return;
        }
        if handle.join().is_err() {
            log::error!("tick thread terminated abnormally");
        }
    }
}

impl Drop for TickLoop {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for TickLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TickLoop")
            .field("ticks", &self.tick_count())
            .field("running", &self.is_running())
            .finish()
    }
}

fn run<F, E>(
    interval: Duration,
    shutdown: Receiver<()>,
    cancelled: &AtomicBool,
    ticks: &AtomicU64,
    on_tick: F,
    on_fault: E,
) where
    F: Fn(),
    E: Fn(String),
{
    let ticker = crossbeam_channel::tick(interval);
    loop {
        select! {
            recv(shutdown) -> _ => break,
            recv(ticker) -> _ => {
                if cancelled.load(Ordering::Acquire) {
                    break;
                }
                if let Err(payload) = catch_unwind(AssertUnwindSafe(&on_tick)) {
                    on_fault(panic_message(payload.as_ref()));
                }
                ticks.fetch_add(1, Ordering::AcqRel);
            }
        }
    }
    log::debug!("tick loop exited after {} ticks", ticks.load(Ordering::Acquire));
}
