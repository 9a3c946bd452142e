//! Request Coalescing
//!
//! Deduplicates concurrent identical calls: the first caller for a
//! signature runs the work, later callers with the same signature wait for
//! and share its result instead of running it again.

use std::future::Future;

use hashbrown::HashMap;
use parking_lot::Mutex;
use tokio::sync::broadcast;

/// In-flight call registry keyed by request signature
#[derive(Debug)]
pub struct Coalescer<T> {
    calls: Mutex<HashMap<String, broadcast::Sender<T>>>,
}

impl<T> Default for Coalescer<T> {
    fn default() -> Self {
        Self {
            calls: Mutex::new(HashMap::new()),
        }
    }
}

/// Removes the registry entry if the leader is dropped before finishing,
/// which closes the channel and lets waiters retry.
struct LeaderGuard<'a, T> {
    calls: &'a Mutex<HashMap<String, broadcast::Sender<T>>>,
    signature: &'a str,
    finished: bool,
}

impl<T> LeaderGuard<'_, T> {
    fn finish(mut self, value: T) {
        self.finished = true;
        let sender = self.calls.lock().remove(self.signature);
        if let Some(sender) = sender {
            // no receivers is fine: nobody joined this call
            let _ = sender.send(value);
        }
    }
}

impl<T> Drop for LeaderGuard<'_, T> {
    fn drop(&mut self) {
        if !self.finished {
            self.calls.lock().remove(self.signature);
        }
    }
}

impl<T: Clone + Send> Coalescer<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `work` once per concurrent `signature`.
    ///
    /// Returns the result and whether it was shared from another caller.
    pub async fn run<F, Fut>(&self, signature: &str, work: F) -> (T, bool)
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        loop {
            let waiter = {
                let mut calls = self.calls.lock();
                match calls.get(signature) {
                    Some(sender) => Some(sender.subscribe()),
                    None => {
                        let (sender, _) = broadcast::channel(1);
                        calls.insert(signature.to_string(), sender);
                        None
                    }
                }
            };

            match waiter {
                Some(mut receiver) => match receiver.recv().await {
                    Ok(value) => return (value, true),
                    // the leader went away without a result; try again
                    Err(_) => continue,
                },
                None => break,
            }
        }

        let guard = LeaderGuard {
            calls: &self.calls,
            signature,
            finished: false,
        };
        let value = work().await;
        guard.finish(value.clone());
        (value, false)
    }

    /// Number of calls currently in flight
    pub fn in_flight(&self) -> usize {
        self.calls.lock().len()
    }
}
