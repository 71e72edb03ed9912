// Single-flight - at most one in-progress computation per key
//
// The first caller for a key becomes the leader and runs the work; callers
// arriving while it runs subscribe to a watch channel and receive a clone of
// the leader's outcome. The in-flight marker is removed when the leader
// settles or is dropped mid-way; in the latter case waiters retry and one of
// them takes over.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use tokio::sync::watch;

/// How a caller obtained its value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Leader,
    Joined,
}

pub struct SingleFlight<T> {
    inflight: Mutex<HashMap<String, watch::Receiver<Option<T>>>>,
}

/// Leader's handle; dropping it clears the marker before closing the channel
struct Flight<'a, T> {
    owner: &'a SingleFlight<T>,
    key: String,
    tx: watch::Sender<Option<T>>,
}

impl<T> Drop for Flight<'_, T> {
    fn drop(&mut self) {
        self.owner.inflight.lock().remove(&self.key);
    }
}

impl<T> SingleFlight<T>
where
    T: Clone + Send + Sync,
{
    pub fn new() -> Self {
        Self {
            inflight: Mutex::new(HashMap::new()),
        }
    }

    /// Run `work` for `key`, or wait for the run already in progress
    pub async fn run<F, Fut>(&self, key: &str, work: F) -> (T, Role)
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let tx = loop {
            let mut rx = {
                let mut inflight = self.inflight.lock();
                match inflight.get(key) {
                    Some(rx) => rx.clone(),
                    None => {
                        let (tx, rx) = watch::channel(None);
                        inflight.insert(key.to_string(), rx);
                        break tx;
                    }
                }
            };

            let settled = match rx.wait_for(Option::is_some).await {
                Ok(value) => value.clone(),
                // Leader went away without an outcome
                Err(_) => None,
            };
            if let Some(value) = settled {
                return (value, Role::Joined);
            }
            tracing::debug!(key, "in-flight leader dropped, retrying");
        };

        let flight = Flight {
            owner: self,
            key: key.to_string(),
            tx,
        };
        let value = work().await;
        flight.tx.send_replace(Some(value.clone()));
        drop(flight);
        (value, Role::Leader)
    }

    /// Keys currently being computed
    pub fn in_flight(&self) -> usize {
        self.inflight.lock().len()
    }
}

impl<T> Default for SingleFlight<T>
where
    T: Clone + Send + Sync,
{
    fn default() -> Self {
        Self::new()
    }
}
