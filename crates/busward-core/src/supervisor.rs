// ── Polling supervisor ──
//
// Owns one cancellable task per polled address. Tasks are children of
// the controller's cancellation token, so shutting the controller down
// stops every poller even if the supervisor itself is never consulted.

use std::collections::{BTreeSet, HashMap};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::driver::{DriverHandle, Reading};
use crate::error::CoreError;
use crate::model::{BusAddress, BusEvent, DeviceReading};

/// What a poller needs for its next cycle.
#[derive(Clone)]
pub struct PollPlan {
    /// Live driver; `None` while the device is degraded.
    pub driver: Option<DriverHandle>,
    pub period: Duration,
}

/// Where pollers look up their device on every cycle.
///
/// Returning `None` means the record is gone, inactive, or no longer
/// pollable, and the poller exits.
pub trait PollSource: Clone + Send + Sync + 'static {
    fn poll_plan(&self, address: BusAddress) -> impl Future<Output = Option<PollPlan>> + Send;
}

struct Poller {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Changes made by one [`PollingSupervisor::reconcile`] call.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct PollerChanges {
    pub started: Vec<BusAddress>,
    pub stopped: Vec<BusAddress>,
}

/// Address → polling task map.
pub struct PollingSupervisor {
    parent: CancellationToken,
    pollers: HashMap<BusAddress, Poller>,
}

impl PollingSupervisor {
    pub fn new(parent: CancellationToken) -> Self {
        Self {
            parent,
            pollers: HashMap::new(),
        }
    }

    /// Make the running set equal `desired`.
    ///
    /// Tasks that exited on their own are forgotten first, so a device
    /// that becomes pollable again gets a fresh task.
    pub fn reconcile<S: PollSource>(
        &mut self,
        desired: &BTreeSet<BusAddress>,
        source: &S,
        events: &broadcast::Sender<Arc<BusEvent>>,
    ) -> PollerChanges {
        self.pollers.retain(|address, poller| {
            let alive = !poller.handle.is_finished();
            if !alive {
                debug!(%address, "reaping finished poller");
            }
            alive
        });

        let mut changes = PollerChanges::default();

        let undesired: Vec<BusAddress> = self
            .pollers
            .keys()
            .filter(|address| !desired.contains(address))
            .copied()
            .collect();
        for address in undesired {
            if self.stop(address) {
                changes.stopped.push(address);
            }
        }

        if self.parent.is_cancelled() {
            return changes;
        }

        for &address in desired {
            if self.pollers.contains_key(&address) {
                continue;
            }
            let cancel = self.parent.child_token();
            let handle = tokio::spawn(poll_task(
                address,
                source.clone(),
                events.clone(),
                cancel.clone(),
            ));
            self.pollers.insert(address, Poller { cancel, handle });
            changes.started.push(address);
        }

        changes.started.sort();
        changes.stopped.sort();
        if !changes.started.is_empty() || !changes.stopped.is_empty() {
            debug!(
                started = changes.started.len(),
                stopped = changes.stopped.len(),
                running = self.pollers.len(),
                "pollers reconciled"
            );
        }
        changes
    }

    /// Cancel the poller for `address`. Returns whether one was running.
    pub fn stop(&mut self, address: BusAddress) -> bool {
        match self.pollers.remove(&address) {
            Some(poller) => {
                poller.cancel.cancel();
                debug!(%address, "poller cancelled");
                true
            }
            None => false,
        }
    }

    /// Addresses with a poller that has not exited, sorted.
    pub fn running(&self) -> Vec<BusAddress> {
        let mut running: Vec<_> = self
            .pollers
            .iter()
            .filter(|(_, poller)| !poller.handle.is_finished())
            .map(|(address, _)| *address)
            .collect();
        running.sort();
        running
    }

    /// Cancel every poller and hand back their join handles.
    pub fn drain(&mut self) -> Vec<JoinHandle<()>> {
        self.pollers
            .drain()
            .map(|(_, poller)| {
                poller.cancel.cancel();
                poller.handle
            })
            .collect()
    }
}

impl Drop for PollingSupervisor {
    fn drop(&mut self) {
        for poller in self.pollers.values() {
            poller.cancel.cancel();
        }
    }
}

/// One device's poll loop: read, publish, sleep, repeat.
async fn poll_task<S: PollSource>(
    address: BusAddress,
    source: S,
    events: broadcast::Sender<Arc<BusEvent>>,
    cancel: CancellationToken,
) {
    debug!(%address, "poller started");

    loop {
        let plan = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            plan = source.poll_plan(address) => plan,
        };
        let Some(plan) = plan else {
            debug!(%address, "device no longer pollable, poller exiting");
            break;
        };

        match plan.driver {
            Some(driver) => match read_device(driver).await {
                Ok(data) => {
                    if cancel.is_cancelled() {
                        break;
                    }
                    let reading = DeviceReading {
                        address,
                        data,
                        timestamp: Utc::now(),
                    };
                    // No subscribers is not an error.
                    let _ = events.send(Arc::new(BusEvent::DeviceData(reading)));
                }
                Err(e) => warn!(%address, error = %e, "device read failed"),
            },
            None => debug!(%address, "no live driver, skipping read"),
        }

        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            () = tokio::time::sleep(plan.period) => {}
        }
    }

    debug!(%address, "poller stopped");
}

async fn read_device(driver: DriverHandle) -> Result<Reading, CoreError> {
    tokio::task::spawn_blocking(move || driver.read())
        .await
        .map_err(|e| CoreError::Internal(format!("poll read task failed: {e}")))?
}
