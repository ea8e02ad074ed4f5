// Debounced broadcast scheduler
//
// State machine: at most one pending task plus a coalesce counter.
// - schedule() cancels a still-pending task (coalesce += 1) and reschedules
//   it `delay` in the future
// - once `max_coalesced` cancellations pile up, schedule() returns
//   `Dispatch::Immediate` instead and the caller fires right away
// - a task that ran to completion resets the counter

use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// Caller must broadcast now
    Immediate,
    /// Task will run after the delay unless cancelled
    Scheduled,
}

pub struct Debouncer {
    delay: Duration,
    max_coalesced: u32,
    coalesced: u32,
    pending: Option<JoinHandle<()>>,
}

impl Debouncer {
    pub fn new(delay: Duration, max_coalesced: u32) -> Self {
        Self {
            delay,
            max_coalesced,
            coalesced: 0,
            pending: None,
        }
    }

    pub fn schedule<F>(&mut self, task: F) -> Dispatch
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if let Some(pending) = self.pending.take() {
            if pending.is_finished() {
                self.coalesced = 0;
            } else {
                pending.abort();
                self.coalesced += 1;
            }
        }

        if self.max_coalesced > 0 && self.coalesced >= self.max_coalesced {
            self.coalesced = 0;
            return Dispatch::Immediate;
        }

        let delay = self.delay;
        self.pending = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            task.await;
        }));
        Dispatch::Scheduled
    }

    /// Drop any pending task and reset the counter
    pub fn cancel(&mut self) {
        if let Some(pending) = self.pending.take() {
            pending.abort();
        }
        self.coalesced = 0;
    }

    pub fn is_pending(&self) -> bool {
        self.pending.as_ref().is_some_and(|p| !p.is_finished())
    }

    pub fn coalesced(&self) -> u32 {
        self.coalesced
    }
}

impl Drop for Debouncer {
    fn drop(&mut self) {
        if let Some(pending) = self.pending.take() {
            pending.abort();
        }
    }
}
