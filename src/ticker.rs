//! Background periodic task with a stop channel.
//!
//! One ticker drives one group's stats refresh. The tick body runs under
//! a re-entrancy guard: if a previous tick has not returned when the next
//! interval fires, the new tick is skipped instead of stacking up.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

pub struct Ticker {
    stop: mpsc::Sender<()>,
    handle: Option<JoinHandle<()>>,
}

impl Ticker {
    /// Runs `tick` once immediately, then every `interval` until stopped.
    pub fn start<F>(interval: Duration, tick: F) -> Ticker
    where
        F: Fn() + Send + 'static,
    {
        let running = Arc::new(AtomicBool::new(false));
        let guarded = move || {
            if running
                .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
                .is_ok()
            {
                tick();
                running.store(false, Ordering::Release);
            }
        };
        guarded();

        let (stop, stop_rx) = mpsc::channel();
        let handle = std::thread::spawn(move || loop {
            match stop_rx.recv_timeout(interval) {
                Err(RecvTimeoutError::Timeout) => guarded(),
                Ok(()) | Err(RecvTimeoutError::Disconnected) => return,
            }
        });

        Ticker {
            stop,
            handle: Some(handle),
        }
    }

    /// Idempotent; joins the background thread.
    pub fn stop(&mut self) {
        let _ = self.stop.send(());
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Ticker {
    fn drop(&mut self) {
        self.stop();
    }
}
