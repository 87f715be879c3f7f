//! Finding machines before anyone has configured them: serial port
//! enumeration, a bounded listen for UDP service announcements, and an
//! optional active HTTP probe. Strategies only report what they see; the
//! [DiscoveryService] owns dedup and who hears about it.

pub mod broadcast;
pub mod probe;
#[cfg(feature = "serial")]
pub mod serial;

pub use broadcast::BroadcastDiscover;
pub use probe::ProbeDiscover;
#[cfg(feature = "serial")]
pub use serial::SerialPortDiscover;

use crate::{error::MachineError, profile::MachineCategory, traits::Discover};
use dashmap::DashMap;
use parse_display::{Display, FromStr};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, sync::Arc, time::Duration};
use tokio::{
    sync::mpsc::{self, error::TrySendError, Receiver, Sender},
    task::JoinHandle,
    time::MissedTickBehavior,
};

/// The wire dialect a discovered device speaks.
#[derive(
    Clone, Copy, Debug, Display, Eq, FromStr, Hash, JsonSchema, PartialEq, Serialize, Deserialize,
)]
#[display(style = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TransportProtocol {
    /// Line-oriented G-code over a serial port.
    Serial,

    /// The OctoPrint REST dialect.
    OctoPrint,

    /// The PrusaLink REST dialect.
    PrusaLink,
}

/// What a connection handler needs to reach the device. Credentials are
/// carried as slots only; discovery never learns them.
#[derive(Clone, Debug, JsonSchema, PartialEq, Serialize, Deserialize)]
#[serde(tag = "transport", rename_all = "snake_case")]
pub enum ConnectionParams {
    /// A locally attached serial port.
    Serial {
        /// Port path, `/dev/ttyACM0` or `COM3`.
        port: String,

        /// Line speed.
        baud: u32,
    },

    /// An HTTP endpoint.
    Http {
        /// Scheme, host and port, no trailing slash.
        base_url: String,

        /// API key, when the operator has supplied one.
        api_key: Option<String>,

        /// Username for digest-style auth.
        username: Option<String>,

        /// Password for digest-style auth.
        password: Option<String>,
    },
}

/// One candidate device as a discovery pass saw it. Immutable; a later pass
/// reporting the same id supersedes the whole record.
#[derive(Clone, Debug, JsonSchema, PartialEq, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    /// Stable identity key: the port path for serial devices, `host:port`
    /// for network ones.
    pub id: String,

    /// Human-readable label, best-effort from whatever the device
    /// advertised.
    pub label: String,

    /// Best-guess category from the identity signature.
    pub category: MachineCategory,

    /// The dialect to use when connecting.
    pub protocol: TransportProtocol,

    /// Transport parameters for the connection handler.
    pub params: ConnectionParams,

    /// Free-form extras: USB vendor/product ids, announcement record
    /// fields.
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl DeviceDescriptor {
    /// Whether a manager may connect this device without an operator
    /// supplying credentials first.
    pub fn auto_connectable(&self) -> bool {
        matches!(self.params, ConnectionParams::Serial { .. })
    }
}

/// A fixed list of descriptors announced once per pass. Scan loops in tests
/// and demos run against this instead of real hardware.
pub struct StaticDiscover(Vec<DeviceDescriptor>);

impl StaticDiscover {
    /// Wrap a fixed descriptor list.
    pub fn new(descriptors: Vec<DeviceDescriptor>) -> Self {
        Self(descriptors)
    }
}

impl Discover for StaticDiscover {
    type Error = MachineError;

    async fn discover(&self, found: Sender<DeviceDescriptor>) -> Result<(), MachineError> {
        for descriptor in &self.0 {
            if found.send(descriptor.clone()).await.is_err() {
                break;
            }
        }
        Ok(())
    }
}

/// AnyStrategy is any way this crate knows to find a device.
pub enum AnyStrategy {
    /// Enumerate locally attached serial ports.
    #[cfg(feature = "serial")]
    SerialPorts(SerialPortDiscover),

    /// Listen for UDP service announcements.
    Broadcast(BroadcastDiscover),

    /// Actively probe configured hosts over HTTP.
    Probe(ProbeDiscover),

    /// Announce a fixed list.
    Static(StaticDiscover),
}

#[cfg(feature = "serial")]
impl From<SerialPortDiscover> for AnyStrategy {
    fn from(strategy: SerialPortDiscover) -> Self {
        Self::SerialPorts(strategy)
    }
}

impl From<BroadcastDiscover> for AnyStrategy {
    fn from(strategy: BroadcastDiscover) -> Self {
        Self::Broadcast(strategy)
    }
}

impl From<ProbeDiscover> for AnyStrategy {
    fn from(strategy: ProbeDiscover) -> Self {
        Self::Probe(strategy)
    }
}

impl From<StaticDiscover> for AnyStrategy {
    fn from(strategy: StaticDiscover) -> Self {
        Self::Static(strategy)
    }
}

impl AnyStrategy {
    /// Short name for log lines.
    pub fn name(&self) -> &'static str {
        match self {
            #[cfg(feature = "serial")]
            Self::SerialPorts(_) => "serial-ports",
            Self::Broadcast(_) => "broadcast",
            Self::Probe(_) => "probe",
            Self::Static(_) => "static",
        }
    }
}

impl Discover for AnyStrategy {
    type Error = MachineError;

    async fn discover(&self, found: Sender<DeviceDescriptor>) -> Result<(), MachineError> {
        match self {
            #[cfg(feature = "serial")]
            Self::SerialPorts(strategy) => strategy.discover(found).await,
            Self::Broadcast(strategy) => strategy.discover(found).await,
            Self::Probe(strategy) => strategy.discover(found).await,
            Self::Static(strategy) => strategy.discover(found).await,
        }
    }
}

/// Callback fired once per newly seen device.
pub type DiscoveryListener = Box<dyn Fn(&DeviceDescriptor) -> anyhow::Result<()> + Send + Sync>;

fn lock<T>(mutex: &std::sync::Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Runs discovery strategies and keeps the set of every device ever seen.
/// A device id is announced the first time it appears and never again;
/// later sightings supersede the stored record quietly.
#[derive(Clone)]
pub struct DiscoveryService {
    strategies: Arc<Vec<AnyStrategy>>,
    known: Arc<DashMap<String, DeviceDescriptor>>,
    listeners: Arc<std::sync::Mutex<Vec<DiscoveryListener>>>,
    subscribers: Arc<std::sync::Mutex<Vec<Sender<DeviceDescriptor>>>>,
    scan_task: Arc<tokio::sync::Mutex<Option<JoinHandle<()>>>>,
}

impl DiscoveryService {
    /// A service over the given strategies. Nothing runs until
    /// [DiscoveryService::run_once] or [DiscoveryService::start].
    pub fn new(strategies: Vec<AnyStrategy>) -> Self {
        Self {
            strategies: Arc::new(strategies),
            known: Arc::new(DashMap::new()),
            listeners: Arc::new(std::sync::Mutex::new(Vec::new())),
            subscribers: Arc::new(std::sync::Mutex::new(Vec::new())),
            scan_task: Arc::new(tokio::sync::Mutex::new(None)),
        }
    }

    /// Run every strategy once, in order, and return the devices this pass
    /// saw for the first time. A failing strategy is logged and the pass
    /// moves on to the next one.
    pub async fn run_once(&self) -> Vec<DeviceDescriptor> {
        let mut new_devices = Vec::new();
        for strategy in self.strategies.iter() {
            let (found, mut sightings) = mpsc::channel(32);
            let drain = async {
                let mut seen = Vec::new();
                while let Some(descriptor) = sightings.recv().await {
                    seen.push(descriptor);
                }
                seen
            };
            let (result, seen) = tokio::join!(strategy.discover(found), drain);
            if let Err(err) = result {
                tracing::warn!(
                    strategy = strategy.name(),
                    error = %err,
                    "discovery strategy failed"
                );
            }
            for descriptor in seen {
                if let Some(descriptor) = self.ingest(descriptor) {
                    new_devices.push(descriptor);
                }
            }
        }
        new_devices
    }

    /// Scan on `interval` until [DiscoveryService::stop]. The first pass
    /// runs immediately. Starting twice is a no-op.
    pub async fn start(&self, interval: Duration) {
        let mut task_slot = self.scan_task.lock().await;
        if task_slot.is_some() {
            return;
        }
        let service = self.clone();
        *task_slot = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                service.run_once().await;
            }
        }));
    }

    /// Stop the periodic scan and wait for it to wind down.
    pub async fn stop(&self) {
        if let Some(task) = self.scan_task.lock().await.take() {
            task.abort();
            let _ = task.await;
        }
    }

    /// Every device seen so far, in id order.
    pub fn discovered(&self) -> Vec<DeviceDescriptor> {
        let mut devices: Vec<_> = self
            .known
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        devices.sort_by(|a, b| a.id.cmp(&b.id));
        devices
    }

    /// Register a callback for newly seen devices. A failing callback is
    /// logged and does not stop the others.
    pub fn on_discovered(
        &self,
        listener: impl Fn(&DeviceDescriptor) -> anyhow::Result<()> + Send + Sync + 'static,
    ) {
        lock(&self.listeners).push(Box::new(listener));
    }

    /// A channel carrying newly seen devices, for async consumers. A
    /// receiver that falls behind loses announcements; one that is dropped
    /// is forgotten.
    pub fn subscribe(&self) -> Receiver<DeviceDescriptor> {
        let (tx, rx) = mpsc::channel(32);
        lock(&self.subscribers).push(tx);
        rx
    }

    /// Store one sighting. Returns the descriptor when the id is new,
    /// None when it merely superseded a known record.
    fn ingest(&self, descriptor: DeviceDescriptor) -> Option<DeviceDescriptor> {
        let previous = self.known.insert(descriptor.id.clone(), descriptor.clone());
        if previous.is_some() {
            return None;
        }
        tracing::info!(
            device_id = %descriptor.id,
            label = %descriptor.label,
            protocol = %descriptor.protocol,
            "discovered new device"
        );
        self.announce(&descriptor);
        Some(descriptor)
    }

    fn announce(&self, descriptor: &DeviceDescriptor) {
        {
            let listeners = lock(&self.listeners);
            for listener in listeners.iter() {
                if let Err(err) = listener(descriptor) {
                    tracing::warn!(
                        device_id = %descriptor.id,
                        error = %err,
                        "discovery listener failed"
                    );
                }
            }
        }
        lock(&self.subscribers).retain(|tx| match tx.try_send(descriptor.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                tracing::warn!(device_id = %descriptor.id, "discovery subscriber is full");
                true
            }
            Err(TrySendError::Closed(_)) => false,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn port_descriptor(id: &str) -> DeviceDescriptor {
        DeviceDescriptor {
            id: id.to_owned(),
            label: format!("printer on {id}"),
            category: MachineCategory::FdmPrinter,
            protocol: TransportProtocol::Serial,
            params: ConnectionParams::Serial {
                port: id.to_owned(),
                baud: 115_200,
            },
            metadata: HashMap::new(),
        }
    }

    fn static_service(descriptors: Vec<DeviceDescriptor>) -> DiscoveryService {
        DiscoveryService::new(vec![StaticDiscover::new(descriptors).into()])
    }

    #[tokio::test]
    async fn a_second_pass_over_the_same_devices_is_silent() {
        let service = static_service(vec![port_descriptor("/dev/ttyACM0")]);
        let announcements = Arc::new(AtomicUsize::new(0));
        {
            let announcements = announcements.clone();
            service.on_discovered(move |_| {
                announcements.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });
        }

        let first = service.run_once().await;
        assert_eq!(first.len(), 1);
        let second = service.run_once().await;
        assert_eq!(second.len(), 0);
        assert_eq!(announcements.load(Ordering::SeqCst), 1);
        assert_eq!(service.discovered().len(), 1);
    }

    #[tokio::test]
    async fn a_failing_listener_does_not_block_the_rest() {
        let service = static_service(vec![port_descriptor("/dev/ttyACM0")]);
        service.on_discovered(|_| anyhow::bail!("listener fell over"));
        let announcements = Arc::new(AtomicUsize::new(0));
        {
            let announcements = announcements.clone();
            service.on_discovered(move |_| {
                announcements.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });
        }

        service.run_once().await;
        assert_eq!(announcements.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn subscribers_hear_about_new_devices_once() {
        let service = static_service(vec![port_descriptor("/dev/ttyACM0")]);
        let mut devices = service.subscribe();

        service.run_once().await;
        let descriptor = devices.recv().await.unwrap();
        assert_eq!(descriptor.id, "/dev/ttyACM0");

        service.run_once().await;
        assert!(devices.try_recv().is_err());
    }

    #[tokio::test]
    async fn later_sightings_supersede_the_record_quietly() {
        let service = static_service(Vec::new());
        assert!(service.ingest(port_descriptor("/dev/ttyACM0")).is_some());

        let mut renamed = port_descriptor("/dev/ttyACM0");
        renamed.label = "relabeled".to_owned();
        assert!(service.ingest(renamed).is_none());

        let devices = service.discovered();
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].label, "relabeled");
    }

    #[test]
    fn serial_descriptors_need_no_credentials() {
        assert!(port_descriptor("/dev/ttyACM0").auto_connectable());
        let networked = DeviceDescriptor {
            params: ConnectionParams::Http {
                base_url: "http://10.0.0.7".to_owned(),
                api_key: None,
                username: None,
                password: None,
            },
            protocol: TransportProtocol::OctoPrint,
            ..port_descriptor("10.0.0.7:80")
        };
        assert!(!networked.auto_connectable());
    }
}
