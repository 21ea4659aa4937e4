// ── Reconciliation ──
//
// Brings driver instances and pollers in line with the registry after
// a scan or a full replacement. Runs with the state lock held.

use tracing::{debug, info, warn};

use super::{Controller, DriverInstance, ManagedState};
use crate::error::CoreError;
use crate::model::{BusAddress, DeviceRecord, RegistrySnapshot};
use crate::registry::MergeOutcome;

impl Controller {
    /// One reconciliation pass: scan the bus, merge the result, bind
    /// missing drivers, publish the registry and adjust the pollers.
    ///
    /// The background scanner calls this on every tick; with the scan
    /// interval set to zero it can be driven by hand.
    pub async fn reconcile_once(&self) -> Result<MergeOutcome, CoreError> {
        let present = self.inner.scanner.scan_async().await?;

        let mut state = self.inner.state.lock().await;
        let outcome = state.registry.merge(&present);
        for address in &outcome.archived {
            info!(%address, "device disappeared, archived");
        }
        for address in &outcome.restored {
            info!(%address, "archived device reappeared, restored");
        }
        for address in &outcome.discovered {
            info!(%address, "new device detected");
        }

        self.bind_drivers(&mut state).await;
        self.publish(&state);
        self.reconcile_pollers(&mut state);
        Ok(outcome)
    }

    /// Replace the registry wholesale, as requested by `update_config`.
    pub(super) async fn apply_config(&self, incoming: RegistrySnapshot) -> RegistrySnapshot {
        let mut state = self.inner.state.lock().await;
        let snapshot = state.registry.replace(incoming);

        self.bind_drivers(&mut state).await;
        self.publish(&state);
        self.reconcile_pollers(&mut state);
        info!(
            active = snapshot.connections.len(),
            pending = snapshot.new_connections.len(),
            archived = snapshot.archived_connections.len(),
            "registry replaced"
        );
        snapshot
    }

    /// Drop instances that no longer match their record, then build one
    /// for every active record without a live driver.
    ///
    /// Construction failures leave the device degraded; it is retried on
    /// the next call.
    pub(super) async fn bind_drivers(&self, state: &mut ManagedState) {
        let stale: Vec<BusAddress> = state
            .instances
            .iter()
            .filter(|(address, instance)| {
                state.wanted_binding(**address)
                    != Some((instance.module.as_str(), instance.class.as_str()))
            })
            .map(|(address, _)| *address)
            .collect();
        for address in stale {
            if let Some(instance) = state.instances.remove(&address) {
                debug!(%address, driver = instance.handle.name(), "driver torn down");
            }
        }

        let unbound: Vec<DeviceRecord> = state
            .registry
            .active()
            .filter(|record| record.active && !state.instances.contains_key(&record.address))
            .cloned()
            .collect();
        state
            .degraded
            .retain(|address| unbound.iter().any(|record| record.address == *address));

        for record in unbound {
            let address = record.address;
            let built = match state.drivers.prepare(&record, &self.inner.bus) {
                Ok(pending) => tokio::task::spawn_blocking(move || pending.build())
                    .await
                    .unwrap_or_else(|e| {
                        Err(CoreError::Internal(format!(
                            "driver construction task failed: {e}"
                        )))
                    }),
                Err(e) => Err(e),
            };

            match built {
                Ok(handle) => {
                    let (module, class) = record.binding();
                    info!(%address, driver = handle.name(), "driver bound");
                    state.degraded.remove(&address);
                    state.instances.insert(
                        address,
                        DriverInstance {
                            handle,
                            module: module.to_owned(),
                            class: class.to_owned(),
                        },
                    );
                }
                Err(e) => {
                    if state.degraded.insert(address) {
                        warn!(%address, error = %e, "driver unavailable, will retry");
                    } else {
                        debug!(%address, error = %e, "driver still unavailable");
                    }
                }
            }
        }
    }
}
