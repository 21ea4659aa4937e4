// ── Controller ──
//
// Owns the device registry, the driver instances and the pollers behind
// one lock, and runs the background tasks: periodic bus reconciliation
// and the command processor. Every registry mutation is persisted and
// broadcast before the lock is released.

mod reconcile;

use std::collections::{BTreeSet, HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::{Mutex, broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::bus::SharedBus;
use crate::command::{Command, CommandEnvelope, CommandResult};
use crate::config::ControllerConfig;
use crate::driver::{DefinitionStore, DriverHandle, DriverRegistry, ModuleOrigin};
use crate::error::CoreError;
use crate::model::{Bucket, BusAddress, BusEvent, DeviceRecord, RegistrySnapshot};
use crate::persist::StateStore;
use crate::registry::DeviceRegistry;
use crate::scanner::BusScanner;
use crate::stream::Subscription;
use crate::supervisor::{PollPlan, PollSource, PollingSupervisor};

// ── Managed state ────────────────────────────────────────────────

/// Everything guarded by the registry lock.
pub(crate) struct ManagedState {
    registry: DeviceRegistry,
    drivers: DriverRegistry,
    instances: HashMap<BusAddress, DriverInstance>,
    /// Active devices whose driver could not be built; warned about once.
    degraded: HashSet<BusAddress>,
    supervisor: PollingSupervisor,
}

struct DriverInstance {
    handle: DriverHandle,
    module: String,
    class: String,
}

impl ManagedState {
    /// Driver binding `address` should currently have, if it is active.
    fn wanted_binding(&self, address: BusAddress) -> Option<(&str, &str)> {
        if self.registry.bucket_of(address) != Some(Bucket::Active) {
            return None;
        }
        self.registry
            .get(address)
            .ok()
            .filter(|record| record.active)
            .map(DeviceRecord::binding)
    }
}

/// Pollers look their device up in the managed state every cycle.
#[derive(Clone)]
struct StatePollSource {
    state: Arc<Mutex<ManagedState>>,
}

impl PollSource for StatePollSource {
    fn poll_plan(&self, address: BusAddress) -> impl Future<Output = Option<PollPlan>> + Send {
        let state = Arc::clone(&self.state);
        async move {
            let state = state.lock().await;
            state.wanted_binding(address)?;
            let period = state.registry.get(address).ok()?.poll_period()?;
            Some(PollPlan {
                driver: state
                    .instances
                    .get(&address)
                    .map(|instance| Arc::clone(&instance.handle)),
                period,
            })
        }
    }
}

// ── Controller ───────────────────────────────────────────────────

/// The main entry point for consumers.
///
/// Cheaply cloneable via `Arc<ControllerInner>`. Construct with
/// [`new`](Self::new), then [`start`](Self::start) the background tasks
/// and drive it through [`execute`](Self::execute) and
/// [`subscribe`](Self::subscribe).
#[derive(Clone)]
pub struct Controller {
    inner: Arc<ControllerInner>,
}

struct ControllerInner {
    config: ControllerConfig,
    bus: SharedBus,
    scanner: BusScanner,
    store: StateStore,
    definitions: DefinitionStore,
    state: Arc<Mutex<ManagedState>>,
    event_tx: broadcast::Sender<Arc<BusEvent>>,
    snapshot_tx: watch::Sender<Arc<RegistrySnapshot>>,
    command_tx: mpsc::Sender<CommandEnvelope>,
    command_rx: Mutex<Option<mpsc::Receiver<CommandEnvelope>>>,
    running: AtomicBool,
    cancel: CancellationToken,
    task_handles: Mutex<Vec<JoinHandle<()>>>,
}

impl Controller {
    /// Create a controller with the built-in drivers.
    ///
    /// Loads the registry document (creating it when absent) and every
    /// definition module. Does not touch the bus; call
    /// [`start`](Self::start) for that.
    ///
    /// # Errors
    /// A malformed or unwritable registry document, or an invalid scan range.
    pub fn new(config: ControllerConfig, bus: SharedBus) -> Result<Self, CoreError> {
        Self::with_drivers(config, bus, DriverRegistry::with_builtins()?)
    }

    /// Like [`new`](Self::new) with a caller-supplied driver registry.
    pub fn with_drivers(
        config: ControllerConfig,
        bus: SharedBus,
        mut drivers: DriverRegistry,
    ) -> Result<Self, CoreError> {
        let scanner = BusScanner::with_range(bus.clone(), config.scan_range.clone())?;

        let store = StateStore::new(&config.state_path);
        let loaded = store.load_or_init()?;
        let registry = DeviceRegistry::from_snapshot(loaded.clone());
        let snapshot = registry.snapshot();
        if snapshot != loaded {
            info!(path = %store.path().display(), "normalized registry document");
            store.save(&snapshot)?;
        }

        let definitions = DefinitionStore::new(&config.definitions_dir);
        load_definitions(&definitions, &mut drivers);

        let (event_tx, _) = broadcast::channel(config.event_channel_size.max(1));
        let (snapshot_tx, _) = watch::channel(Arc::new(snapshot));
        let (command_tx, command_rx) = mpsc::channel(config.command_channel_size.max(1));
        let cancel = CancellationToken::new();

        let state = ManagedState {
            registry,
            drivers,
            instances: HashMap::new(),
            degraded: HashSet::new(),
            supervisor: PollingSupervisor::new(cancel.child_token()),
        };

        Ok(Self {
            inner: Arc::new(ControllerInner {
                config,
                bus,
                scanner,
                store,
                definitions,
                state: Arc::new(Mutex::new(state)),
                event_tx,
                snapshot_tx,
                command_tx,
                command_rx: Mutex::new(Some(command_rx)),
                running: AtomicBool::new(false),
                cancel,
                task_handles: Mutex::new(Vec::new()),
            }),
        })
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.inner.config
    }

    pub fn bus(&self) -> &SharedBus {
        &self.inner.bus
    }

    // ── Lifecycle ────────────────────────────────────────────────

    /// Bind drivers for active devices, start their pollers, and spawn
    /// the command processor and (unless the scan interval is zero) the
    /// periodic scanner.
    pub async fn start(&self) -> Result<(), CoreError> {
        if self.inner.cancel.is_cancelled() {
            return Err(CoreError::ControllerStopped);
        }
        let Some(rx) = self.inner.command_rx.lock().await.take() else {
            return Err(CoreError::Internal("controller already started".into()));
        };

        {
            let mut state = self.inner.state.lock().await;
            self.bind_drivers(&mut state).await;
            self.reconcile_pollers(&mut state);
        }

        let mut handles = self.inner.task_handles.lock().await;
        handles.push(tokio::spawn(command_processor_task(self.clone(), rx)));

        let interval = self.inner.config.scan_interval;
        if !interval.is_zero() {
            let cancel = self.inner.cancel.child_token();
            handles.push(tokio::spawn(scan_task(self.clone(), interval, cancel)));
        }

        self.inner.running.store(true, Ordering::SeqCst);
        info!(
            scan_interval_ms = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX),
            "controller started"
        );
        Ok(())
    }

    /// Cancel the scanner, the command processor and every poller, and
    /// wait for all of them to finish.
    pub async fn shutdown(&self) {
        self.inner.running.store(false, Ordering::SeqCst);
        self.inner.cancel.cancel();

        let handles: Vec<_> = self.inner.task_handles.lock().await.drain(..).collect();
        for handle in handles {
            let _ = handle.await;
        }

        let pollers = {
            let mut state = self.inner.state.lock().await;
            state.instances.clear();
            state.supervisor.drain()
        };
        for handle in pollers {
            let _ = handle.await;
        }
        debug!("controller stopped");
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst) && !self.inner.cancel.is_cancelled()
    }

    // ── Command execution ────────────────────────────────────────

    /// Execute a command through the command processor and await its result.
    pub async fn execute(&self, command: Command) -> Result<CommandResult, CoreError> {
        if !self.is_running() {
            return Err(CoreError::ControllerStopped);
        }

        let (tx, rx) = oneshot::channel();
        self.inner
            .command_tx
            .send(CommandEnvelope {
                command,
                response_tx: tx,
            })
            .await
            .map_err(|_| CoreError::ControllerStopped)?;

        rx.await.map_err(|_| CoreError::ControllerStopped)?
    }

    // ── State observation ────────────────────────────────────────

    /// Subscribe to events, starting with the current `config_update`.
    pub fn subscribe(&self) -> Subscription {
        let receiver = self.inner.event_tx.subscribe();
        let current = Arc::clone(&self.inner.snapshot_tx.borrow());
        Subscription::new(current, receiver)
    }

    /// Raw live event stream, without the initial snapshot.
    pub fn events(&self) -> broadcast::Receiver<Arc<BusEvent>> {
        self.inner.event_tx.subscribe()
    }

    /// Registry as of the last mutation.
    pub fn snapshot(&self) -> Arc<RegistrySnapshot> {
        Arc::clone(&self.inner.snapshot_tx.borrow())
    }

    pub fn watch_snapshot(&self) -> watch::Receiver<Arc<RegistrySnapshot>> {
        self.inner.snapshot_tx.subscribe()
    }

    /// Addresses with a live driver instance, sorted.
    pub async fn bound_devices(&self) -> Vec<BusAddress> {
        let state = self.inner.state.lock().await;
        let mut bound: Vec<_> = state.instances.keys().copied().collect();
        bound.sort();
        bound
    }

    /// Addresses with a running poller, sorted.
    pub async fn running_pollers(&self) -> Vec<BusAddress> {
        self.inner.state.lock().await.supervisor.running()
    }

    // ── Control surface ──────────────────────────────────────────

    async fn write_device(
        &self,
        address: BusAddress,
        value: serde_json::Value,
        channel: Option<String>,
    ) -> Result<(), CoreError> {
        let driver = {
            let state = self.inner.state.lock().await;
            state.registry.get(address)?;
            state
                .instances
                .get(&address)
                .map(|instance| Arc::clone(&instance.handle))
                .ok_or_else(|| CoreError::not_found(format!("live driver for device {address}")))?
        };

        let label = channel.clone().unwrap_or_default();
        tokio::task::spawn_blocking(move || driver.write(&value, channel.as_deref()))
            .await
            .map_err(|e| CoreError::Internal(format!("device write task failed: {e}")))??;

        info!(%address, channel = %label, "device write applied");
        Ok(())
    }

    async fn list_interfaces(&self) -> Result<Vec<String>, CoreError> {
        let mut names: BTreeSet<String> = self
            .inner
            .state
            .lock()
            .await
            .drivers
            .list_modules()
            .into_iter()
            .collect();
        names.extend(self.inner.definitions.list()?);
        Ok(names.into_iter().collect())
    }

    async fn interface_code(&self, module: &str) -> Result<String, CoreError> {
        if self.inner.state.lock().await.drivers.origin(module) == Some(ModuleOrigin::Builtin) {
            return Err(CoreError::unsupported("get_interface_code", module));
        }
        self.inner.definitions.read(module)
    }

    /// Validate, persist and hot-reload a definition module, then rebind
    /// every active device that uses it.
    async fn save_interface_code(&self, module: &str, code: &str) -> Result<(), CoreError> {
        let mut state = self.inner.state.lock().await;
        if state.drivers.origin(module) == Some(ModuleOrigin::Builtin) {
            return Err(CoreError::config(format!(
                "driver module '{module}' is built in and has no editable code"
            )));
        }

        let definition = self.inner.definitions.write(module, code)?;
        state.drivers.install_definition(module, &definition)?;

        let rebound: Vec<BusAddress> = state
            .instances
            .iter()
            .filter(|(_, instance)| instance.module == module)
            .map(|(address, _)| *address)
            .collect();
        for address in &rebound {
            state.instances.remove(address);
        }

        self.bind_drivers(&mut state).await;
        self.reconcile_pollers(&mut state);
        info!(module, rebound = rebound.len(), "driver module reloaded");
        Ok(())
    }

    // ── Internal helpers ─────────────────────────────────────────

    /// Persist and broadcast the registry. Called with the state lock held.
    fn publish(&self, state: &ManagedState) {
        let snapshot = Arc::new(state.registry.snapshot());
        if let Err(e) = self.inner.store.save(&snapshot) {
            warn!(error = %e, "registry save failed, retrying on next change");
        }
        self.inner.snapshot_tx.send_replace(Arc::clone(&snapshot));
        // No subscribers is not an error.
        let _ = self
            .inner
            .event_tx
            .send(Arc::new(BusEvent::ConfigUpdate(snapshot)));
    }

    fn reconcile_pollers(&self, state: &mut ManagedState) {
        let desired: BTreeSet<BusAddress> = state.registry.desired_pollers().into_keys().collect();
        let source = StatePollSource {
            state: Arc::clone(&self.inner.state),
        };
        state
            .supervisor
            .reconcile(&desired, &source, &self.inner.event_tx);
    }
}

fn load_definitions(store: &DefinitionStore, drivers: &mut DriverRegistry) {
    let modules = match store.load_all() {
        Ok(modules) => modules,
        Err(e) => {
            warn!(dir = %store.dir().display(), error = %e, "cannot list driver definitions");
            return;
        }
    };
    for (name, parsed) in modules {
        match parsed.and_then(|definition| drivers.install_definition(&name, &definition)) {
            Ok(()) => debug!(module = %name, "loaded driver definition"),
            Err(e) => warn!(module = %name, error = %e, "skipping driver definition"),
        }
    }
}

// ── Background tasks ─────────────────────────────────────────────

/// Reconcile against the bus, then sleep, until cancelled.
///
/// A pass in progress is allowed to finish so the registry is never
/// left merged but unpublished.
async fn scan_task(controller: Controller, period: Duration, cancel: CancellationToken) {
    loop {
        if let Err(e) = controller.reconcile_once().await {
            warn!(error = %e, "reconciliation pass failed");
        }
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            () = tokio::time::sleep(period) => {}
        }
    }
}

/// Process commands from the mpsc channel until cancelled.
async fn command_processor_task(controller: Controller, mut rx: mpsc::Receiver<CommandEnvelope>) {
    let cancel = controller.inner.cancel.clone();

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            envelope = rx.recv() => {
                let Some(envelope) = envelope else { break };
                let name = envelope.command.name();
                let result = route_command(&controller, envelope.command).await;
                if let Err(e) = &result {
                    warn!(command = name, error = %e, "command failed");
                }
                let _ = envelope.response_tx.send(result);
            }
        }
    }
}

// ── Command routing ──────────────────────────────────────────────

async fn route_command(controller: &Controller, cmd: Command) -> Result<CommandResult, CoreError> {
    match cmd {
        Command::UpdateConfig(snapshot) => Ok(CommandResult::Snapshot(
            controller.apply_config(snapshot).await,
        )),

        Command::WriteDevice {
            address,
            value,
            channel,
        } => {
            controller.write_device(address, value, channel).await?;
            Ok(CommandResult::Ok)
        }

        Command::ListInterfaces => controller
            .list_interfaces()
            .await
            .map(CommandResult::Interfaces),

        Command::GetInterfaceCode { module_name } => {
            let code = controller.interface_code(&module_name).await?;
            Ok(CommandResult::InterfaceCode { module_name, code })
        }

        Command::SaveInterfaceCode { module_name, code } => {
            controller.save_interface_code(&module_name, &code).await?;
            Ok(CommandResult::Ok)
        }
    }
}
