//! Simulated network stack.
//!
//! The "IP task" is a Tokio task that owns the [`LinkGate`] and receives
//! link events through a bounded queue.  Whoever models the physical link
//! (the CLI's link script, a test) pushes [`LinkEvent`]s with
//! [`LinkEventSender::notify`]; the IP task runs the gate callback for each
//! one, publishes what happened on the bus and exposes the resulting
//! [`LinkStatus`] through a watch channel.

use std::net::Ipv4Addr;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info};
use vigil_kernel::{AddressSource, LinkGate};
use vigil_middleware::EventBus;
use vigil_types::{EventPayload, LinkEvent, LinkState, NetworkConfig, VigilError};

/// Bus `source` of everything the IP task publishes.
pub const NETWORK_SOURCE: &str = "vigil-runtime::network";

/// Name reported in [`VigilError::CommandQueueFull`].
pub const LINK_QUEUE: &str = "link";

/// Address source backed by static configuration.  DHCP is not modelled, so
/// the configured address is always the active one.
pub struct StaticAddressSource {
    ip: Ipv4Addr,
}

impl StaticAddressSource {
    pub fn new(config: &NetworkConfig) -> Self {
        Self { ip: config.ip }
    }
}

impl AddressSource for StaticAddressSource {
    fn address_configuration(&self) -> Result<Ipv4Addr, VigilError> {
        if self.ip.is_unspecified() {
            return Err(VigilError::AddressUnavailable(
                "no address configured".to_string(),
            ));
        }
        Ok(self.ip)
    }
}

/// What the IP task last observed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LinkStatus {
    pub state: LinkState,
    pub tasks_created: bool,
    pub displayed_address: String,
    /// Link events processed so far.
    pub events: u64,
}

/// Cloneable, zero-wait producer side of the link-event queue.
#[derive(Clone)]
pub struct LinkEventSender {
    tx: mpsc::Sender<LinkEvent>,
}

impl LinkEventSender {
    /// Queue `event` for the IP task.
    ///
    /// # Errors
    ///
    /// [`VigilError::CommandQueueFull`] when the queue has no free slot,
    /// [`VigilError::Channel`] once the IP task has stopped.
    pub fn notify(&self, event: LinkEvent) -> Result<(), VigilError> {
        self.tx.try_send(event).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => VigilError::CommandQueueFull {
                queue: LINK_QUEUE.to_string(),
            },
            mpsc::error::TrySendError::Closed(_) => {
                VigilError::Channel("IP task has stopped".to_string())
            }
        })
    }
}

/// Handles to a running IP task.
pub struct IpTask {
    pub events: LinkEventSender,
    pub status: watch::Receiver<LinkStatus>,
    pub handle: JoinHandle<()>,
}

/// Spawn the IP task around `gate`.
pub fn spawn_ip_task(gate: LinkGate, bus: EventBus, queue_depth: usize) -> IpTask {
    let (tx, rx) = mpsc::channel(queue_depth.max(1));
    let (status_tx, status) = watch::channel(LinkStatus::default());
    let handle = tokio::spawn(run_ip_task(gate, bus, rx, status_tx));
    IpTask {
        events: LinkEventSender { tx },
        status,
        handle,
    }
}

async fn run_ip_task(
    mut gate: LinkGate,
    bus: EventBus,
    mut rx: mpsc::Receiver<LinkEvent>,
    status: watch::Sender<LinkStatus>,
) {
    debug!("IP task started");
    let mut events = 0u64;
    while let Some(event) = rx.recv().await {
        events += 1;
        let outcome = gate.on_link_event(event);

        for (task, id) in &outcome.created {
            let priority = gate
                .network_tasks()
                .iter()
                .find(|spec| &spec.name == task)
                .map(|spec| spec.priority)
                .unwrap_or_default();
            bus.emit(
                NETWORK_SOURCE,
                EventPayload::TaskCreated {
                    task: task.clone(),
                    id: *id,
                    priority,
                },
            );
        }
        for failure in &outcome.creation_failures {
            bus.emit(
                NETWORK_SOURCE,
                EventPayload::Alert {
                    component: "link_gate".to_string(),
                    message: failure.to_string(),
                },
            );
        }
        bus.emit(
            NETWORK_SOURCE,
            EventPayload::LinkChanged {
                state: outcome.state,
                address: outcome.address.clone(),
            },
        );

        status.send_replace(LinkStatus {
            state: gate.link_state(),
            tasks_created: gate.activation().tasks_created(),
            displayed_address: gate.displayed_address().to_string(),
            events,
        });
    }
    info!(events, "IP task stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use vigil_hal::sim::SimDisplay;
    use vigil_kernel::link_gate::{GateConfig, GateHooks, standard_network_tasks};
    use vigil_middleware::Topic;
    use vigil_types::Priority;

    use crate::net_tasks::{NetTaskContext, NetworkTaskLauncher};
    use crate::tasks::TaskRegistry;

    fn ip_task(registry: &TaskRegistry, bus: &EventBus) -> IpTask {
        let ip_id = registry.register("ip_task", Priority::IDLE).unwrap();
        let (lcd, _probe) = SimDisplay::new("lcd");
        let ctx = NetTaskContext {
            bind: Ipv4Addr::LOCALHOST,
            network: NetworkConfig::default(),
            registry: registry.clone(),
        };
        let hooks = GateHooks {
            spawner: Box::new(NetworkTaskLauncher::new(ctx)),
            priority: Box::new(registry.priority_handle(ip_id)),
            addresses: Box::new(StaticAddressSource::new(&NetworkConfig::default())),
            display: lcd,
        };
        let gate = LinkGate::new(GateConfig::default(), standard_network_tasks(0, None), hooks);
        spawn_ip_task(gate, bus.clone(), 4)
    }

    #[test]
    fn unspecified_static_address_is_unavailable() {
        let config = NetworkConfig {
            ip: Ipv4Addr::UNSPECIFIED,
            ..NetworkConfig::default()
        };
        assert!(matches!(
            StaticAddressSource::new(&config).address_configuration(),
            Err(VigilError::AddressUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn link_up_creates_tasks_and_publishes() {
        let registry = TaskRegistry::default();
        let bus = EventBus::default();
        let mut tasks_rx = bus.subscribe_to(Topic::Tasks);
        let mut link_rx = bus.subscribe_to(Topic::Link);
        let mut ip = ip_task(&registry, &bus);

        ip.events.notify(LinkEvent::Up).unwrap();
        ip.status.wait_for(|s| s.events == 1).await.unwrap();

        let status = ip.status.borrow().clone();
        assert_eq!(status.state, LinkState::Connected);
        assert!(status.tasks_created);
        assert_eq!(status.displayed_address, "192.168.0.200");

        let created = tasks_rx.next().await.unwrap();
        assert!(matches!(created.payload, EventPayload::TaskCreated { ref task, .. } if task == "udp_cli"));
        let link = link_rx.next().await.unwrap();
        assert!(matches!(link.payload, EventPayload::LinkChanged { state: LinkState::Connected, .. }));

        let ip_id = registry.find("ip_task").unwrap();
        assert_eq!(registry.priority(ip_id), Some(Priority(4)));
        registry.abort_all();
        ip.handle.abort();
    }

    #[tokio::test]
    async fn flapping_link_creates_tasks_once() {
        let registry = TaskRegistry::default();
        let bus = EventBus::default();
        let mut ip = ip_task(&registry, &bus);

        for event in [LinkEvent::Up, LinkEvent::Down, LinkEvent::Up, LinkEvent::Down] {
            ip.events.notify(event).unwrap();
        }
        ip.status.wait_for(|s| s.events == 4).await.unwrap();

        let names: Vec<_> = registry.snapshot().into_iter().map(|t| t.name).collect();
        assert_eq!(names, vec!["ip_task", "udp_cli"]);
        let ip_id = registry.find("ip_task").unwrap();
        assert_eq!(registry.priority(ip_id), Some(Priority::IDLE));
        assert_eq!(ip.status.borrow().displayed_address, "");
        registry.abort_all();
        ip.handle.abort();
    }

    #[tokio::test]
    async fn full_link_queue_rejects_without_blocking() {
        let (tx, _rx) = mpsc::channel(1);
        let sender = LinkEventSender { tx };
        sender.notify(LinkEvent::Up).unwrap();
        assert!(matches!(
            sender.notify(LinkEvent::Down),
            Err(VigilError::CommandQueueFull { .. })
        ));
    }
}
