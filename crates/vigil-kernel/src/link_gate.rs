//! [`LinkGate`] – link-state driven activation of network tasks.
//!
//! The network stack calls [`LinkGate::on_link_event`] from its own
//! event-dispatch context whenever the physical link changes.  The gate:
//!
//! - on the **first** [`LinkEvent::Up`] creates the network-dependent task
//!   set (command interpreter, echo clients).  Creation is never repeated,
//!   even after the link drops and returns; created tasks live for the
//!   process lifetime and are not managed on link loss.
//! - on **every** `Up` reads the interface address, draws it on the display
//!   and raises the dispatching task to the *connected* priority tier.
//! - on **every** `Down` lowers the dispatching task back to the *idle* tier
//!   and blanks the displayed address.
//!
//! The priority dance exists because the Ethernet driver busy-polls for a
//! link while disconnected; running it at idle priority keeps that polling
//! from starving every other task.
//!
//! # Example
//!
//! ```
//! use std::net::Ipv4Addr;
//! use vigil_hal::sim::SimDisplay;
//! use vigil_kernel::link_gate::{GateConfig, GateHooks, LinkGate, standard_network_tasks};
//! use vigil_kernel::scheduler::{AddressSource, PriorityControl, TaskSpawner};
//! use vigil_types::{LinkEvent, NetworkTaskSpec, Priority, TaskId, VigilError};
//!
//! struct Spawner(u64);
//! impl TaskSpawner for Spawner {
//!     fn spawn(&mut self, _spec: &NetworkTaskSpec) -> Result<TaskId, VigilError> {
//!         self.0 += 1;
//!         Ok(TaskId(self.0))
//!     }
//! }
//! struct Prio(Priority);
//! impl PriorityControl for Prio {
//!     fn set_priority(&mut self, p: Priority) -> Result<(), VigilError> { self.0 = p; Ok(()) }
//!     fn priority(&self) -> Priority { self.0 }
//! }
//! struct Addr;
//! impl AddressSource for Addr {
//!     fn address_configuration(&self) -> Result<Ipv4Addr, VigilError> {
//!         Ok(Ipv4Addr::new(10, 0, 0, 7))
//!     }
//! }
//!
//! let (lcd, _probe) = SimDisplay::new("lcd");
//! let hooks = GateHooks {
//!     spawner: Box::new(Spawner(0)),
//!     priority: Box::new(Prio(Priority::IDLE)),
//!     addresses: Box::new(Addr),
//!     display: lcd,
//! };
//! let mut gate = LinkGate::new(GateConfig::default(), standard_network_tasks(5001, None), hooks);
//!
//! let outcome = gate.on_link_event(LinkEvent::Up);
//! assert_eq!(outcome.created.len(), 1);
//! assert_eq!(gate.displayed_address(), "10.0.0.7");
//!
//! // A second Up refreshes the display but creates nothing.
//! assert!(gate.on_link_event(LinkEvent::Up).created.is_empty());
//! ```

use std::net::SocketAddrV4;

use tracing::{error, info, instrument, warn};
use vigil_hal::TextDisplay;
use vigil_types::{
    LinkEvent, LinkState, NetworkTaskKind, NetworkTaskSpec, Priority, TaskId, VigilError,
};

use crate::scheduler::{AddressSource, PriorityControl, TaskSpawner};

// ────────────────────────────────────────────────────────────────────────────
// Constants
// ────────────────────────────────────────────────────────────────────────────

/// Well-known UDP port of the command interpreter.
pub const DEFAULT_UDP_CLI_PORT: u16 = 5001;

/// Smallest stack a task may be created with, in words.
pub const MINIMAL_STACK_DEPTH: u16 = 130;

/// Number of echo client tasks in the standard task set.
pub const ECHO_CLIENT_COUNT: usize = 2;

/// Label drawn in front of the address.
pub const ADDRESS_LABEL: &str = "IP: ";

/// Width of the address field; wide enough for `255.255.255.255`.
pub const ADDRESS_FIELD_WIDTH: usize = 15;

// ────────────────────────────────────────────────────────────────────────────
// Configuration
// ────────────────────────────────────────────────────────────────────────────

/// Where the address row is drawn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisplayLayout {
    pub x: u32,
    pub y: u32,
    /// Horizontal distance between the label and the address text.
    pub address_offset: u32,
}

impl Default for DisplayLayout {
    fn default() -> Self {
        Self {
            x: 3,
            y: 3,
            address_offset: 45,
        }
    }
}

/// Static configuration of a [`LinkGate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GateConfig {
    /// Priority of the dispatching task while the link is up.
    pub connected_priority: Priority,
    /// Priority of the dispatching task while the link is down.
    pub idle_priority: Priority,
    pub layout: DisplayLayout,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            connected_priority: Priority::highest(5),
            idle_priority: Priority::IDLE,
            layout: DisplayLayout::default(),
        }
    }
}

/// The standard network task set: one command interpreter on `cli_port`
/// and, when `echo_server` is given, [`ECHO_CLIENT_COUNT`] echo clients.
/// Every task starts at idle priority.
pub fn standard_network_tasks(
    cli_port: u16,
    echo_server: Option<SocketAddrV4>,
) -> Vec<NetworkTaskSpec> {
    let mut tasks = vec![NetworkTaskSpec {
        name: "udp_cli".to_string(),
        kind: NetworkTaskKind::CommandInterpreter { port: cli_port },
        priority: Priority::IDLE,
        stack_depth: MINIMAL_STACK_DEPTH * 2,
    }];
    if let Some(server) = echo_server {
        tasks.extend((0..ECHO_CLIENT_COUNT).map(|i| NetworkTaskSpec {
            name: format!("echo_client{i}"),
            kind: NetworkTaskKind::EchoClient { server },
            priority: Priority::IDLE,
            stack_depth: MINIMAL_STACK_DEPTH,
        }));
    }
    tasks
}

// ────────────────────────────────────────────────────────────────────────────
// Collaborators & state
// ────────────────────────────────────────────────────────────────────────────

/// Scheduler, network and display primitives the gate drives.
pub struct GateHooks {
    pub spawner: Box<dyn TaskSpawner>,
    /// Priority control over the task that dispatches link events.
    pub priority: Box<dyn PriorityControl>,
    pub addresses: Box<dyn AddressSource>,
    pub display: Box<dyn TextDisplay>,
}

/// Latched record of whether the network task set has been created.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LinkActivationState {
    tasks_created: bool,
}

impl LinkActivationState {
    pub fn tasks_created(&self) -> bool {
        self.tasks_created
    }
}

/// Everything one link event caused.
#[derive(Debug, Clone, Default)]
pub struct GateOutcome {
    pub state: LinkState,
    /// Tasks created by this event (only ever non-empty on the first `Up`).
    pub created: Vec<(String, TaskId)>,
    /// Tasks whose creation was attempted by this event and failed.
    pub creation_failures: Vec<VigilError>,
    /// Address drawn by this event, if any.
    pub address: Option<String>,
}

// ────────────────────────────────────────────────────────────────────────────
// LinkGate
// ────────────────────────────────────────────────────────────────────────────

/// Creates network tasks once and tracks link state with the dispatching
/// task's priority.
///
/// Owned by the network dispatch context; every mutation happens inside
/// [`on_link_event`][Self::on_link_event].
pub struct LinkGate {
    config: GateConfig,
    network_tasks: Vec<NetworkTaskSpec>,
    hooks: GateHooks,
    activation: LinkActivationState,
    link: LinkState,
    displayed_address: String,
}

impl LinkGate {
    /// Build a gate in the `Disconnected` state with no tasks created.
    pub fn new(config: GateConfig, network_tasks: Vec<NetworkTaskSpec>, hooks: GateHooks) -> Self {
        Self {
            config,
            network_tasks,
            hooks,
            activation: LinkActivationState::default(),
            link: LinkState::Disconnected,
            displayed_address: String::new(),
        }
    }

    pub fn activation(&self) -> LinkActivationState {
        self.activation
    }

    pub fn link_state(&self) -> LinkState {
        self.link
    }

    /// The address currently shown on the display; empty while disconnected.
    pub fn displayed_address(&self) -> &str {
        &self.displayed_address
    }

    pub fn network_tasks(&self) -> &[NetworkTaskSpec] {
        &self.network_tasks
    }

    /// Link-event callback.  Runs synchronously in the dispatch context.
    #[instrument(skip(self))]
    pub fn on_link_event(&mut self, event: LinkEvent) -> GateOutcome {
        match event {
            LinkEvent::Up => self.link_up(),
            LinkEvent::Down => self.link_down(),
        }
    }

    fn link_up(&mut self) -> GateOutcome {
        let mut outcome = GateOutcome::default();

        if !self.activation.tasks_created {
            self.create_network_tasks(&mut outcome);
            self.activation.tasks_created = true;
        }

        match self.hooks.addresses.address_configuration() {
            Ok(ip) => {
                let address = ip.to_string();
                match self.draw_address_row(&address) {
                    Ok(()) => {
                        self.displayed_address = address.clone();
                        outcome.address = Some(address);
                    }
                    Err(e) => warn!(error = %e, "failed to draw address; display unchanged"),
                }
            }
            Err(e) => warn!(error = %e, "address configuration unavailable; display unchanged"),
        }

        self.apply_priority(self.config.connected_priority);
        self.link = LinkState::Connected;
        outcome.state = self.link;
        info!(
            address = %self.displayed_address,
            priority = %self.config.connected_priority,
            "network up"
        );
        outcome
    }

    fn link_down(&mut self) -> GateOutcome {
        self.apply_priority(self.config.idle_priority);

        match self.draw_address_row("") {
            Ok(()) => self.displayed_address.clear(),
            Err(e) => warn!(error = %e, "failed to blank address; display unchanged"),
        }

        self.link = LinkState::Disconnected;
        info!(priority = %self.config.idle_priority, "network down");
        GateOutcome {
            state: self.link,
            ..GateOutcome::default()
        }
    }

    fn create_network_tasks(&mut self, outcome: &mut GateOutcome) {
        for spec in &self.network_tasks {
            match self.hooks.spawner.spawn(spec) {
                Ok(id) => {
                    info!(task = %spec.name, %id, priority = %spec.priority, "network task created");
                    outcome.created.push((spec.name.clone(), id));
                }
                Err(e) => {
                    error!(task = %spec.name, error = %e, "network task creation failed");
                    outcome.creation_failures.push(e);
                }
            }
        }
    }

    fn apply_priority(&mut self, priority: Priority) {
        if let Err(e) = self.hooks.priority.set_priority(priority) {
            warn!(error = %e, %priority, "failed to change network task priority");
        }
    }

    /// Draw the label and `address` padded to the full field width so a
    /// shorter address fully covers a longer one.
    fn draw_address_row(&mut self, address: &str) -> Result<(), VigilError> {
        let DisplayLayout {
            x,
            y,
            address_offset,
        } = self.config.layout;
        self.hooks.display.draw_string(x, y, ADDRESS_LABEL)?;
        self.hooks.display.draw_string(
            x + address_offset,
            y,
            &format!("{address:<ADDRESS_FIELD_WIDTH$}"),
        )
    }
}
