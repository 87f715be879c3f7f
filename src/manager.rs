//! The composition root: a registry of machines, command routing, status
//! composition for external callers, and the wiring that turns discovery
//! sightings into live machines. Constructed by whoever owns the process;
//! nothing in here is a process-wide singleton.

use crate::{
    any::AnyConnection,
    config::{Config, MachineConfig},
    connection::ConnectionHealth,
    discover::{ConnectionParams, DeviceDescriptor, DiscoveryService},
    error::MachineError,
    machine::Machine,
    profile::{MachineCategory, MachineProfile, TemperatureZone},
    retry::BackoffPolicy,
    state::{
        record::{JobInfo, Position, TemperatureReading},
        tracker::{StateChange, StateTracker},
        MachineState,
    },
    Axis,
};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, sync::Arc, time::Duration};
use tokio::task::JoinHandle;

/// Deadline for one REST round trip on configured HTTP machines.
const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// One command for [MachineManager::execute], shaped for JSON callers.
/// File uploads are not a command: bytes travel through
/// [MachineManager::upload_file] directly.
#[derive(Clone, Debug, JsonSchema, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum MachineCommand {
    /// Start the stored job `file`.
    Start {
        /// File name or path on the machine.
        file: String,
    },

    /// Pause the running job.
    Pause,

    /// Resume the paused job.
    Resume,

    /// Cancel the current job.
    Cancel,

    /// Home the named axes, or all of them.
    Home {
        /// Axes to home; empty means all.
        #[serde(default)]
        axes: Vec<Axis>,
    },

    /// Relative move of one axis.
    Jog {
        /// The axis to move.
        axis: Axis,

        /// Signed distance, millimeters.
        distance_mm: f64,

        /// Feedrate, millimeters per minute.
        #[serde(default)]
        feedrate_mm_min: Option<f64>,
    },

    /// Set one zone's target temperature.
    SetTemperature {
        /// The heated zone.
        zone: TemperatureZone,

        /// Target, degrees Celsius.
        celsius: f64,
    },

    /// Hard stop, callable from any state.
    EmergencyStop,

    /// List machine storage.
    ListFiles {
        /// Subtree to list; the storage root when absent.
        #[serde(default)]
        path: Option<String>,
    },

    /// Delete a stored file.
    DeleteFile {
        /// Path of the file to delete.
        path: String,
    },
}

/// What a routed command came back with.
#[derive(Clone, Debug, JsonSchema, PartialEq, Serialize)]
pub struct CommandOutcome {
    /// Short human-readable confirmation.
    pub message: String,

    /// Structured payload for commands that return one.
    pub data: Option<serde_json::Value>,
}

impl CommandOutcome {
    fn message(message: String) -> Self {
        Self {
            message,
            data: None,
        }
    }
}

/// The externally shaped status payload for one machine. Callers get
/// everything in one piece so they never need to know which protocol sits
/// underneath.
#[derive(Clone, Debug, JsonSchema, Serialize)]
pub struct MachineStatus {
    /// The machine's registry id.
    pub id: String,

    /// The machine's category.
    pub category: MachineCategory,

    /// Whether the transport is open and under the failure limit.
    pub connected: bool,

    /// Current normalized state.
    pub state: MachineState,

    /// Dashboard color hint for the state.
    pub state_color: &'static str,

    /// The vendor's own words, for operators who want them.
    pub raw_status: Option<String>,

    /// What the machine said when it entered the error state; absent in
    /// every other state.
    pub error: Option<String>,

    /// Temperatures by zone name.
    pub temperatures: HashMap<String, TemperatureReading>,

    /// The job in progress, when one is.
    pub job: Option<JobInfo>,

    /// Tool position, when the machine reports one.
    pub position: Option<Position>,

    /// Connection health counters.
    pub health: ConnectionHealth,

    /// When the record last changed.
    pub updated_at: DateTime<Utc>,
}

/// One row of [MachineManager::list].
#[derive(Clone, Debug, JsonSchema, PartialEq, Serialize)]
pub struct MachineSummary {
    /// The machine's registry id.
    pub id: String,

    /// The machine's category.
    pub category: MachineCategory,

    /// Whether the transport is open and under the failure limit.
    pub connected: bool,

    /// Current normalized state.
    pub state: MachineState,
}

/// Callback fired with a machine id on add or remove.
pub type MachineCallback = Box<dyn Fn(&str) -> anyhow::Result<()> + Send + Sync>;

fn lock<T>(mutex: &std::sync::Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Owns the machines. Clones share the registry; commands from any clone
/// route to the same machines.
#[derive(Clone)]
pub struct MachineManager {
    machines: Arc<DashMap<String, Machine>>,
    tracker: Arc<StateTracker>,
    backoff: BackoffPolicy,
    poll_interval: Duration,
    added: Arc<std::sync::Mutex<Vec<MachineCallback>>>,
    removed: Arc<std::sync::Mutex<Vec<MachineCallback>>>,
    watch_task: Arc<tokio::sync::Mutex<Option<JoinHandle<()>>>>,
}

impl MachineManager {
    /// An empty registry. Machines built for it must share
    /// [MachineManager::tracker].
    pub fn new(backoff: BackoffPolicy, poll_interval: Duration) -> Self {
        Self {
            machines: Arc::new(DashMap::new()),
            tracker: Arc::new(StateTracker::new()),
            backoff,
            poll_interval,
            added: Arc::new(std::sync::Mutex::new(Vec::new())),
            removed: Arc::new(std::sync::Mutex::new(Vec::new())),
            watch_task: Arc::new(tokio::sync::Mutex::new(None)),
        }
    }

    /// Build a manager and every machine `config` declares. Nothing is
    /// connected yet; call [MachineManager::start].
    pub async fn from_config(config: &Config) -> Self {
        let manager = Self::new(config.retry.backoff(), config.poll_interval());
        for (id, machine_config) in &config.machines {
            let (connection, category): (AnyConnection, MachineCategory) = match machine_config {
                #[cfg(feature = "serial")]
                MachineConfig::Serial {
                    port,
                    baud,
                    category,
                } => (
                    crate::connection::serial::SerialConnection::new(port, *baud, *category)
                        .into(),
                    *category,
                ),
                #[cfg(feature = "octoprint")]
                MachineConfig::OctoPrint { endpoint, api_key } => (
                    crate::octoprint::OctoPrintConnection::new(endpoint, api_key, HTTP_TIMEOUT)
                        .into(),
                    MachineCategory::FdmPrinter,
                ),
                #[cfg(feature = "prusalink")]
                MachineConfig::PrusaLink {
                    endpoint,
                    api_key,
                    username,
                    password,
                } => {
                    let auth = match (api_key, username, password) {
                        (Some(key), _, _) => {
                            crate::connection::rest::HttpAuth::ApiKey(key.clone())
                        }
                        (None, Some(username), Some(password)) => {
                            crate::connection::rest::HttpAuth::Basic {
                                username: username.clone(),
                                password: password.clone(),
                            }
                        }
                        _ => {
                            tracing::warn!(
                                machine_id = %id,
                                "prusalink machine declared without credentials"
                            );
                            crate::connection::rest::HttpAuth::None
                        }
                    };
                    (
                        crate::prusalink::PrusaLinkConnection::new(endpoint, auth, HTTP_TIMEOUT)
                            .into(),
                        MachineCategory::FdmPrinter,
                    )
                }
                MachineConfig::Noop => (
                    crate::noop::NoopConnection::new().into(),
                    MachineCategory::FdmPrinter,
                ),
                #[allow(unreachable_patterns)]
                _ => {
                    tracing::warn!(
                        machine_id = %id,
                        "support for this machine flavor is not built in"
                    );
                    continue;
                }
            };
            let machine = Machine::new(id, category, connection, manager.tracker.clone())
                .with_backoff(manager.backoff);
            manager.add_machine(machine).await;
        }
        manager
    }

    /// The shared state tracker, for building machines that register with
    /// this manager's records.
    pub fn tracker(&self) -> Arc<StateTracker> {
        self.tracker.clone()
    }

    /// Put a machine in the registry and fire the add callbacks. A machine
    /// already registered under the same id is shut down and replaced.
    pub async fn add_machine(&self, machine: Machine) {
        let id = machine.id().to_owned();
        if let Some(previous) = self.machines.insert(id.clone(), machine) {
            tracing::warn!(machine_id = %id, "replacing an existing machine");
            if let Err(err) = previous.shutdown().await {
                tracing::warn!(machine_id = %id, error = %err, "old machine did not shut down cleanly");
            }
        }
        tracing::info!(machine_id = %id, "machine added");
        Self::fire(&self.added, &id);
    }

    /// Shut a machine down, drop its record and fire the remove callbacks.
    pub async fn remove_machine(&self, id: &str) -> Result<(), MachineError> {
        let Some((_, machine)) = self.machines.remove(id) else {
            return Err(MachineError::UnknownDevice(id.to_owned()));
        };
        if let Err(err) = machine.shutdown().await {
            tracing::warn!(machine_id = %id, error = %err, "machine did not shut down cleanly");
        }
        self.tracker.unregister(id);
        tracing::info!(machine_id = %id, "machine removed");
        Self::fire(&self.removed, id);
        Ok(())
    }

    /// Open every registered machine and start its poll loop. A machine
    /// that will not connect is left registered; its poll loop keeps
    /// trying.
    pub async fn start(&self) {
        for machine in self.snapshot() {
            if let Err(err) = machine.connect().await {
                tracing::warn!(machine_id = machine.id(), error = %err, "machine failed to connect");
            }
            machine.start_polling(self.poll_interval).await;
        }
    }

    /// Stop watching discovery and shut every machine down.
    pub async fn shutdown(&self) {
        if let Some(task) = self.watch_task.lock().await.take() {
            task.abort();
            let _ = task.await;
        }
        let ids: Vec<String> = self.machines.iter().map(|entry| entry.key().clone()).collect();
        for id in ids {
            if let Some((_, machine)) = self.machines.remove(&id) {
                if let Err(err) = machine.shutdown().await {
                    tracing::warn!(machine_id = %id, error = %err, "machine did not shut down cleanly");
                }
            }
        }
    }

    /// Route one command to a machine.
    pub async fn execute(
        &self,
        id: &str,
        command: MachineCommand,
    ) -> Result<CommandOutcome, MachineError> {
        let machine = self.machine(id)?;
        match command {
            MachineCommand::Start { file } => {
                machine.start(&file).await?;
                Ok(CommandOutcome::message(format!("starting {file}")))
            }
            MachineCommand::Pause => {
                machine.pause().await?;
                Ok(CommandOutcome::message("pausing".to_owned()))
            }
            MachineCommand::Resume => {
                machine.resume().await?;
                Ok(CommandOutcome::message("resuming".to_owned()))
            }
            MachineCommand::Cancel => {
                machine.cancel().await?;
                Ok(CommandOutcome::message("cancelling".to_owned()))
            }
            MachineCommand::Home { axes } => {
                machine.home(&axes).await?;
                let named = if axes.is_empty() {
                    "all axes".to_owned()
                } else {
                    axes.iter()
                        .map(Axis::to_string)
                        .collect::<Vec<_>>()
                        .join(" ")
                };
                Ok(CommandOutcome::message(format!("homing {named}")))
            }
            MachineCommand::Jog {
                axis,
                distance_mm,
                feedrate_mm_min,
            } => {
                machine.jog(axis, distance_mm, feedrate_mm_min).await?;
                Ok(CommandOutcome::message(format!(
                    "jogging {axis} by {distance_mm}mm"
                )))
            }
            MachineCommand::SetTemperature { zone, celsius } => {
                machine.set_temperature(zone, celsius).await?;
                Ok(CommandOutcome::message(format!(
                    "setting {zone} to {celsius}C"
                )))
            }
            MachineCommand::EmergencyStop => {
                machine.emergency_stop().await?;
                Ok(CommandOutcome::message("emergency stop sent".to_owned()))
            }
            MachineCommand::ListFiles { path } => {
                let files = machine.list_files(path.as_deref()).await?;
                Ok(CommandOutcome {
                    message: format!("{} files", files.len()),
                    data: Some(crate::connection::rest::encode(&files)?),
                })
            }
            MachineCommand::DeleteFile { path } => {
                machine.delete_file(&path).await?;
                Ok(CommandOutcome::message(format!("deleted {path}")))
            }
        }
    }

    /// Store `content` under `path` on a machine.
    pub async fn upload_file(
        &self,
        id: &str,
        path: &str,
        content: Bytes,
    ) -> Result<CommandOutcome, MachineError> {
        let machine = self.machine(id)?;
        machine.upload_file(path, content).await?;
        Ok(CommandOutcome::message(format!("uploaded {path}")))
    }

    /// The full status payload for one machine.
    pub async fn status(&self, id: &str) -> Result<MachineStatus, MachineError> {
        let machine = self.machine(id)?;
        let record = self
            .tracker
            .get(id)
            .ok_or_else(|| MachineError::UnknownDevice(id.to_owned()))?;
        let error = (record.state == MachineState::Error)
            .then(|| record.raw_status.clone())
            .flatten();
        Ok(MachineStatus {
            id: id.to_owned(),
            category: machine.category(),
            connected: machine.healthy().await,
            state: record.state,
            state_color: record.state.color(),
            raw_status: record.raw_status,
            error,
            temperatures: record.temperatures,
            job: record.job,
            position: record.position,
            health: machine.health().await,
            updated_at: record.updated_at,
        })
    }

    /// Every machine in id order.
    pub async fn list(&self) -> Vec<MachineSummary> {
        let mut rows = Vec::new();
        for machine in self.snapshot() {
            rows.push(MachineSummary {
                id: machine.id().to_owned(),
                category: machine.category(),
                connected: machine.healthy().await,
                state: machine.state(),
            });
        }
        rows.sort_by(|a, b| a.id.cmp(&b.id));
        rows
    }

    /// Register a callback fired when a machine is added.
    pub fn on_machine_added(
        &self,
        callback: impl Fn(&str) -> anyhow::Result<()> + Send + Sync + 'static,
    ) {
        lock(&self.added).push(Box::new(callback));
    }

    /// Register a callback fired when a machine is removed.
    pub fn on_machine_removed(
        &self,
        callback: impl Fn(&str) -> anyhow::Result<()> + Send + Sync + 'static,
    ) {
        lock(&self.removed).push(Box::new(callback));
    }

    /// Register a listener for state changes on any machine.
    pub fn on_state_changed(
        &self,
        listener: impl Fn(&StateChange) -> anyhow::Result<()> + Send + Sync + 'static,
    ) {
        self.tracker.on_state_changed(listener);
    }

    /// Publish every state change to `publish` as a topic and a JSON
    /// snapshot, `machines/<id>/state`. The seam an external bus plugs
    /// into.
    pub fn set_telemetry_hook(
        &self,
        publish: impl Fn(&str, serde_json::Value) + Send + Sync + 'static,
    ) {
        self.tracker.on_state_changed(move |change| {
            let topic = format!("machines/{}/state", change.machine_id);
            let payload = serde_json::to_value(change)?;
            publish(&topic, payload);
            Ok(())
        });
    }

    /// Provision machines for devices `discovery` reports, as they come
    /// in. Only transports that need no credentials connect on their own;
    /// everything else stays visible in `discovered()` until an operator
    /// configures it.
    pub async fn attach_discovery(&self, discovery: &DiscoveryService) {
        let mut task_slot = self.watch_task.lock().await;
        if task_slot.is_some() {
            return;
        }
        let mut devices = discovery.subscribe();
        let manager = self.clone();
        *task_slot = Some(tokio::spawn(async move {
            while let Some(descriptor) = devices.recv().await {
                manager.provision_discovered(descriptor).await;
            }
        }));
    }

    async fn provision_discovered(&self, descriptor: DeviceDescriptor) {
        if self.machines.contains_key(&descriptor.id) {
            tracing::debug!(device_id = %descriptor.id, "device is already provisioned");
            return;
        }
        let profile = MachineProfile::for_category(descriptor.category);
        if !profile.supports_transport(descriptor.protocol) {
            tracing::warn!(
                device_id = %descriptor.id,
                protocol = %descriptor.protocol,
                category = %descriptor.category,
                "discovered device claims a transport its category cannot speak"
            );
            return;
        }
        if !descriptor.auto_connectable() {
            tracing::info!(
                device_id = %descriptor.id,
                protocol = %descriptor.protocol,
                "discovered device needs credentials, leaving it unconnected"
            );
            return;
        }
        match descriptor.params {
            ConnectionParams::Serial { port, baud } => {
                #[cfg(feature = "serial")]
                {
                    let connection = crate::connection::serial::SerialConnection::new(
                        &port,
                        baud,
                        descriptor.category,
                    );
                    let machine = Machine::new(
                        &descriptor.id,
                        descriptor.category,
                        connection,
                        self.tracker.clone(),
                    )
                    .with_backoff(self.backoff);
                    if let Err(err) = machine.connect().await {
                        tracing::warn!(
                            device_id = %descriptor.id,
                            error = %err,
                            "auto-provisioned machine failed to connect, keeping it for retry"
                        );
                    }
                    machine.start_polling(self.poll_interval).await;
                    self.add_machine(machine).await;
                }
                #[cfg(not(feature = "serial"))]
                {
                    let _ = (port, baud);
                    tracing::warn!(device_id = %descriptor.id, "serial support is not built in");
                }
            }
            ConnectionParams::Http { .. } => {}
        }
    }

    fn machine(&self, id: &str) -> Result<Machine, MachineError> {
        self.machines
            .get(id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| MachineError::UnknownDevice(id.to_owned()))
    }

    fn snapshot(&self) -> Vec<Machine> {
        self.machines
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    fn fire(callbacks: &std::sync::Mutex<Vec<MachineCallback>>, id: &str) {
        let callbacks = lock(callbacks);
        for callback in callbacks.iter() {
            if let Err(err) = callback(id) {
                tracing::warn!(machine_id = %id, error = %err, "machine callback failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        discover::{StaticDiscover, TransportProtocol},
        noop::{NoopConnection, NoopScript},
    };
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use testresult::TestResult;

    fn manager() -> MachineManager {
        MachineManager::new(BackoffPolicy::default(), Duration::from_secs(5))
    }

    async fn managed_noop(manager: &MachineManager, id: &str) -> NoopScript {
        let noop = NoopConnection::new();
        let script = noop.script();
        let machine = Machine::new(id, MachineCategory::FdmPrinter, noop, manager.tracker());
        machine.connect().await.unwrap();
        manager.add_machine(machine).await;
        script
    }

    #[tokio::test]
    async fn commands_route_to_the_right_machine() -> TestResult {
        let manager = manager();
        let bench = managed_noop(&manager, "bench").await;
        let _other = managed_noop(&manager, "other").await;

        let outcome = manager
            .execute(
                "bench",
                MachineCommand::Start {
                    file: "bracket.gcode".to_owned(),
                },
            )
            .await?;
        assert_eq!(outcome.message, "starting bracket.gcode");
        assert_eq!(bench.commands(), vec!["start bracket.gcode"]);

        let unknown = manager.execute("nope", MachineCommand::Pause).await;
        assert!(matches!(unknown, Err(MachineError::UnknownDevice(_))));
        Ok(())
    }

    #[tokio::test]
    async fn concurrent_commands_all_land() -> TestResult {
        let manager = manager();
        let script = managed_noop(&manager, "bench").await;

        let jogs = (0..8).map(|_| {
            let manager = manager.clone();
            async move {
                manager
                    .execute(
                        "bench",
                        MachineCommand::Jog {
                            axis: Axis::X,
                            distance_mm: 1.0,
                            feedrate_mm_min: None,
                        },
                    )
                    .await
            }
        });
        for outcome in futures::future::join_all(jogs).await {
            outcome?;
        }
        assert_eq!(script.commands().len(), 8);
        Ok(())
    }

    #[tokio::test]
    async fn status_composes_record_and_health() -> TestResult {
        let manager = manager();
        let script = managed_noop(&manager, "bench").await;
        script.set_frame(crate::state::record::StatusFrame {
            temperatures: HashMap::from([(
                "extruder".to_owned(),
                TemperatureReading {
                    current: 210.0,
                    target: Some(215.0),
                },
            )]),
            ..crate::state::record::StatusFrame::status_only("printing")
        });
        manager.machine("bench")?.poll_once().await?;

        let status = manager.status("bench").await?;
        assert!(status.connected);
        assert_eq!(status.state, MachineState::Running);
        assert_eq!(status.state_color, MachineState::Running.color());
        assert_eq!(status.temperatures["extruder"].current, 210.0);
        assert_eq!(status.raw_status.as_deref(), Some("printing"));
        assert_eq!(status.error, None);

        let rows = manager.list().await;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].state, MachineState::Running);

        manager.execute("bench", MachineCommand::EmergencyStop).await?;
        let status = manager.status("bench").await?;
        assert_eq!(status.state, MachineState::Error);
        assert_eq!(status.error.as_deref(), Some("emergency stop"));
        Ok(())
    }

    #[tokio::test]
    async fn add_and_remove_fire_callbacks() -> TestResult {
        let manager = manager();
        let added = Arc::new(AtomicUsize::new(0));
        let removed = Arc::new(AtomicUsize::new(0));
        {
            let added = added.clone();
            manager.on_machine_added(move |_| {
                added.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });
            let removed = removed.clone();
            manager.on_machine_removed(move |_| {
                removed.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });
        }

        managed_noop(&manager, "bench").await;
        assert_eq!(added.load(Ordering::SeqCst), 1);

        manager.remove_machine("bench").await?;
        assert_eq!(removed.load(Ordering::SeqCst), 1);
        assert!(manager.status("bench").await.is_err());
        assert!(manager.tracker().get("bench").is_none());
        Ok(())
    }

    #[tokio::test]
    async fn telemetry_hook_sees_every_change_as_json() -> TestResult {
        let manager = manager();
        let published = Arc::new(std::sync::Mutex::new(Vec::new()));
        {
            let published = published.clone();
            manager.set_telemetry_hook(move |topic, payload| {
                published.lock().unwrap().push((topic.to_owned(), payload));
            });
        }

        managed_noop(&manager, "bench").await;
        let published = published.lock().unwrap().clone();
        assert!(!published.is_empty());
        for (topic, _) in &published {
            assert_eq!(topic, "machines/bench/state");
        }
        let (_, last) = published.last().unwrap();
        assert_eq!(last["to"], "idle");
        Ok(())
    }

    #[tokio::test]
    async fn networked_devices_are_not_auto_provisioned() -> TestResult {
        let manager = manager();
        let descriptor = DeviceDescriptor {
            id: "10.0.0.42:5000".to_owned(),
            label: "Voron 2.4".to_owned(),
            category: MachineCategory::FdmPrinter,
            protocol: TransportProtocol::OctoPrint,
            params: ConnectionParams::Http {
                base_url: "http://10.0.0.42:5000".to_owned(),
                api_key: None,
                username: None,
                password: None,
            },
            metadata: HashMap::new(),
        };
        let discovery =
            DiscoveryService::new(vec![StaticDiscover::new(vec![descriptor]).into()]);
        manager.attach_discovery(&discovery).await;

        discovery.run_once().await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(discovery.discovered().len(), 1);
        assert!(manager.list().await.is_empty());
        manager.shutdown().await;
        Ok(())
    }

    #[tokio::test]
    async fn mismatched_transport_claims_are_refused() -> TestResult {
        let manager = manager();
        // A CNC router cannot speak OctoPrint, whatever the announcement says.
        let descriptor = DeviceDescriptor {
            id: "/dev/ttyUSB9".to_owned(),
            label: "confused router".to_owned(),
            category: MachineCategory::Cnc,
            protocol: TransportProtocol::OctoPrint,
            params: ConnectionParams::Serial {
                port: "/dev/ttyUSB9".to_owned(),
                baud: 115_200,
            },
            metadata: HashMap::new(),
        };
        let discovery =
            DiscoveryService::new(vec![StaticDiscover::new(vec![descriptor]).into()]);
        manager.attach_discovery(&discovery).await;

        discovery.run_once().await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(manager.list().await.is_empty());
        manager.shutdown().await;
        Ok(())
    }

    #[cfg(feature = "serial")]
    #[tokio::test(start_paused = true)]
    async fn dead_serial_devices_are_still_provisioned_for_retry() -> TestResult {
        let manager = manager();
        let descriptor = DeviceDescriptor {
            id: "/dev/tty-no-such-port".to_owned(),
            label: "phantom printer".to_owned(),
            category: MachineCategory::FdmPrinter,
            protocol: TransportProtocol::Serial,
            params: ConnectionParams::Serial {
                port: "/dev/tty-no-such-port".to_owned(),
                baud: 115_200,
            },
            metadata: HashMap::new(),
        };
        let discovery =
            DiscoveryService::new(vec![StaticDiscover::new(vec![descriptor]).into()]);
        manager.attach_discovery(&discovery).await;
        discovery.run_once().await;

        // The watch task needs a few scheduler turns to chew through the
        // open retries; paused time makes the backoff sleeps instant.
        for _ in 0..1000 {
            if !manager.list().await.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let rows = manager.list().await;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].id, "/dev/tty-no-such-port");
        assert!(!rows[0].connected);
        assert_eq!(rows[0].state, MachineState::Disconnected);
        manager.shutdown().await;
        Ok(())
    }
}
