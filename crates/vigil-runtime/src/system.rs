//! [`VigilSystem`] – boots and owns a complete simulated board.
//!
//! Start-up mirrors what firmware does before handing control to the
//! scheduler:
//!
//! 1. Register and start the self-test worker battery.
//! 2. Build one [`LoopCounterCheck`][vigil_kernel::LoopCounterCheck] per
//!    worker (plus any extra checks supplied to the builder) into the health
//!    supervisor.
//! 3. Create the auto-reload `"CheckTimer"` in the timer service with the
//!    supervisor as its callback and start it with a zero-wait request.
//! 4. Create one LED flash timer per flash LED.
//! 5. Register the IP task at idle priority and spawn it around the link
//!    gate.
//!
//! Everything observable is published on the [`EventBus`] and summarised in
//! two watch channels ([`SupervisorStatus`], [`LinkStatus`]).
//!
//! # Example
//!
//! ```rust,no_run
//! use vigil_runtime::system::{SystemConfig, VigilSystem};
//! use vigil_types::LinkEvent;
//!
//! # async fn run() -> Result<(), vigil_types::VigilError> {
//! let system = VigilSystem::builder(SystemConfig::default()).start()?;
//! system.link_events().notify(LinkEvent::Up)?;
//! // ...
//! system.shutdown().await;
//! # Ok(())
//! # }
//! ```

use std::net::{Ipv4Addr, SocketAddrV4};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use vigil_hal::sim::{SimDisplay, SimPanel};
use vigil_hal::{PanelRegistry, SharedPanel, StatusSink, TextDisplay};
use vigil_kernel::health_supervisor::{
    DEFAULT_CHECK_INDICATOR, DEFAULT_DEGRADED_PERIOD, DEFAULT_NORMAL_PERIOD,
};
use vigil_kernel::link_gate::{DEFAULT_UDP_CLI_PORT, DisplayLayout, standard_network_tasks};
use vigil_kernel::{
    CheckSet, GateConfig, GateHooks, HealthSupervisor, LinkGate, LivenessCheck, SupervisorConfig,
};
use vigil_middleware::EventBus;
use vigil_types::{
    CheckPeriod, EventPayload, FaultMask, NetworkConfig, Priority, VigilError,
};

use crate::net_tasks::{NetTaskContext, NetworkTaskLauncher};
use crate::network::{LinkEventSender, LinkStatus, StaticAddressSource, spawn_ip_task};
use crate::self_test::{Battery, WorkerSpec, standard_battery, start_battery};
use crate::tasks::{DEFAULT_MAX_PRIORITIES, DEFAULT_MAX_TASKS, TaskRegistry};
use crate::timer::{DEFAULT_TIMER_QUEUE_DEPTH, TimerHandle, TimerServiceHandle, timer_service};

/// Bus `source` of everything the supervisor publishes.
pub const SUPERVISOR_SOURCE: &str = "vigil-runtime::supervisor";

/// Name of the supervisor's timer.
pub const CHECK_TIMER_NAME: &str = "CheckTimer";

/// Name under which the IP task is registered.
pub const IP_TASK_NAME: &str = "ip_task";

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

fn default_check_period_ms() -> u64 {
    DEFAULT_NORMAL_PERIOD.as_millis() as u64
}
fn default_error_period_ms() -> u64 {
    DEFAULT_DEGRADED_PERIOD.as_millis() as u64
}
fn default_check_led() -> usize {
    DEFAULT_CHECK_INDICATOR
}
fn default_flash_leds() -> usize {
    1
}
fn default_flash_base_ms() -> u64 {
    200
}
fn default_timer_queue_depth() -> usize {
    DEFAULT_TIMER_QUEUE_DEPTH
}
fn default_link_queue_depth() -> usize {
    8
}
fn default_worker_priority() -> u8 {
    1
}
fn default_bind_address() -> Ipv4Addr {
    Ipv4Addr::LOCALHOST
}
fn default_udp_cli_port() -> u16 {
    DEFAULT_UDP_CLI_PORT
}
fn default_echo_server() -> SocketAddrV4 {
    SocketAddrV4::new(Ipv4Addr::LOCALHOST, 7)
}
fn default_max_priorities() -> u8 {
    DEFAULT_MAX_PRIORITIES
}
fn default_max_tasks() -> usize {
    DEFAULT_MAX_TASKS
}

/// Where the address row is drawn on the display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplayConfig {
    pub x: u32,
    pub y: u32,
    pub address_offset: u32,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        let layout = DisplayLayout::default();
        Self {
            x: layout.x,
            y: layout.y,
            address_offset: layout.address_offset,
        }
    }
}

impl From<DisplayConfig> for DisplayLayout {
    fn from(c: DisplayConfig) -> Self {
        DisplayLayout {
            x: c.x,
            y: c.y,
            address_offset: c.address_offset,
        }
    }
}

/// Everything needed to boot a [`VigilSystem`].  Every field has a default,
/// so a partial TOML table is a valid configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemConfig {
    /// Supervisor period while healthy.
    #[serde(default = "default_check_period_ms")]
    pub check_period_ms: u64,
    /// Supervisor period once a fault has been seen.
    #[serde(default = "default_error_period_ms")]
    pub error_period_ms: u64,
    /// Panel slot toggled by the supervisor.
    #[serde(default = "default_check_led")]
    pub check_led: usize,
    /// LEDs `0..flash_leds` blink on their own timers.
    #[serde(default = "default_flash_leds")]
    pub flash_leds: usize,
    /// LED *i* toggles every `flash_base_ms * (i + 1)`.
    #[serde(default = "default_flash_base_ms")]
    pub flash_base_ms: u64,
    #[serde(default = "default_timer_queue_depth")]
    pub timer_queue_depth: usize,
    #[serde(default = "default_link_queue_depth")]
    pub link_queue_depth: usize,
    #[serde(default = "standard_battery")]
    pub workers: Vec<WorkerSpec>,
    #[serde(default = "default_worker_priority")]
    pub worker_priority: u8,
    #[serde(default)]
    pub network: NetworkConfig,
    /// Host address the simulated sockets bind to.
    #[serde(default = "default_bind_address")]
    pub bind_address: Ipv4Addr,
    #[serde(default = "default_udp_cli_port")]
    pub udp_cli_port: u16,
    #[serde(default)]
    pub echo_clients: bool,
    #[serde(default = "default_echo_server")]
    pub echo_server: SocketAddrV4,
    /// Number of scheduler priority levels; the connected tier is the top one.
    #[serde(default = "default_max_priorities")]
    pub max_priorities: u8,
    #[serde(default = "default_max_tasks")]
    pub max_tasks: usize,
    #[serde(default)]
    pub display: DisplayConfig,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            check_period_ms: default_check_period_ms(),
            error_period_ms: default_error_period_ms(),
            check_led: default_check_led(),
            flash_leds: default_flash_leds(),
            flash_base_ms: default_flash_base_ms(),
            timer_queue_depth: default_timer_queue_depth(),
            link_queue_depth: default_link_queue_depth(),
            workers: standard_battery(),
            worker_priority: default_worker_priority(),
            network: NetworkConfig::default(),
            bind_address: default_bind_address(),
            udp_cli_port: default_udp_cli_port(),
            echo_clients: false,
            echo_server: default_echo_server(),
            max_priorities: default_max_priorities(),
            max_tasks: default_max_tasks(),
            display: DisplayConfig::default(),
        }
    }
}

impl SystemConfig {
    /// Reject values the scheduler could not honour.
    pub fn validate(&self) -> Result<(), VigilError> {
        if self.check_period_ms == 0 || self.error_period_ms == 0 {
            return Err(VigilError::Config(
                "check periods must be greater than zero".to_string(),
            ));
        }
        if self.max_priorities < 2 {
            return Err(VigilError::Config(
                "at least two priority levels are required".to_string(),
            ));
        }
        if self.worker_priority >= self.max_priorities {
            return Err(VigilError::Config(format!(
                "worker priority {} exceeds the highest level {}",
                self.worker_priority,
                self.max_priorities - 1
            )));
        }
        if self.timer_queue_depth < self.startup_timer_requests() {
            return Err(VigilError::Config(format!(
                "timer queue depth {} cannot hold the {} start-up requests of {} timers",
                self.timer_queue_depth,
                self.startup_timer_requests(),
                1 + self.flash_timer_count()
            )));
        }
        Ok(())
    }

    pub fn supervisor(&self) -> SupervisorConfig {
        SupervisorConfig {
            normal_period: Duration::from_millis(self.check_period_ms),
            degraded_period: Duration::from_millis(self.error_period_ms),
            indicator: self.check_led,
        }
    }

    pub fn gate(&self) -> GateConfig {
        GateConfig {
            connected_priority: Priority::highest(self.max_priorities),
            idle_priority: Priority::IDLE,
            layout: self.display.into(),
        }
    }

    /// LEDs that get their own flash timer; the check LED is never one.
    pub fn flash_timer_count(&self) -> usize {
        (0..self.flash_leds).filter(|i| *i != self.check_led).count()
    }

    /// Timer commands queued during start-up, before the timer service has
    /// had a chance to run: a create and a start for every timer.
    pub fn startup_timer_requests(&self) -> usize {
        2 * (1 + self.flash_timer_count())
    }

    /// Number of LED slots the panel must provide.
    pub fn required_leds(&self) -> usize {
        self.flash_leds.max(self.check_led + 1)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Status
// ─────────────────────────────────────────────────────────────────────────────

/// What the supervisor observed on its most recent tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SupervisorStatus {
    pub ticks: u64,
    pub period: CheckPeriod,
    pub last_mask: FaultMask,
    pub indicator_lit: Option<bool>,
}

/// Output surfaces of the board.
pub struct Panel {
    pub leds: PanelRegistry,
    pub display: Box<dyn TextDisplay>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Builder
// ─────────────────────────────────────────────────────────────────────────────

/// Builder for [`VigilSystem`].
pub struct VigilSystemBuilder {
    config: SystemConfig,
    panel: Option<Panel>,
    bus: Option<EventBus>,
    extra_checks: Vec<Box<dyn LivenessCheck>>,
}

impl VigilSystemBuilder {
    pub fn with_panel(mut self, panel: Panel) -> Self {
        self.panel = Some(panel);
        self
    }

    pub fn with_bus(mut self, bus: EventBus) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Monitor `check` after the worker battery.
    pub fn with_check(mut self, check: Box<dyn LivenessCheck>) -> Self {
        self.extra_checks.push(check);
        self
    }

    /// Boot the system.  Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Fails on invalid configuration, when a task cannot be registered,
    /// when more than the supported number of checks are supplied, or when
    /// the timer queue refuses a start-up request.
    pub fn start(self) -> Result<VigilSystem, VigilError> {
        self.config.validate()?;
        let registry = TaskRegistry::new(self.config.max_priorities, self.config.max_tasks);
        let (service, timers) = timer_service(self.config.timer_queue_depth);
        let timer_task = service.spawn();
        let timer_abort = timer_task.abort_handle();

        self.boot(registry.clone(), timers, timer_task).inspect_err(|e| {
            warn!(error = %e, "start-up failed; stopping everything already spawned");
            timer_abort.abort();
            registry.abort_all();
        })
    }

    fn boot(
        self,
        registry: TaskRegistry,
        timers: TimerServiceHandle,
        timer_task: JoinHandle<()>,
    ) -> Result<VigilSystem, VigilError> {
        let config = self.config;
        let bus = self.bus.unwrap_or_default();
        let panel = match self.panel {
            Some(panel) => panel,
            None => {
                let (leds, _) = SimPanel::new().with_leds(config.required_leds()).build();
                let (display, _) = SimDisplay::new("lcd");
                Panel { leds, display }
            }
        };
        let leds = SharedPanel::new(panel.leds);

        let battery = start_battery(
            &config.workers,
            &registry,
            Priority::above_idle(config.worker_priority),
        )?;
        let mut checks = CheckSet::new();
        battery.register_checks(&mut checks)?;
        for check in self.extra_checks {
            checks.push(check)?;
        }
        info!(checks = checks.len(), "liveness checks registered");

        let (status_tx, supervisor_status) = watch::channel(SupervisorStatus::default());
        let mut supervisor =
            HealthSupervisor::new(config.supervisor(), checks, Box::new(leds.clone()));
        let tick_bus = bus.clone();
        let degraded_ms = config.error_period_ms;
        let check_timer = timers.create(CHECK_TIMER_NAME, supervisor.current_period_duration(), true, move |timer| {
            let outcome = supervisor.on_tick(timer);
            tick_bus.emit(SUPERVISOR_SOURCE, EventPayload::Health(outcome.report.clone()));
            if outcome.degraded_now {
                tick_bus.emit(
                    SUPERVISOR_SOURCE,
                    EventPayload::PeriodChanged {
                        period: CheckPeriod::Degraded,
                        period_ms: degraded_ms,
                    },
                );
            }
            if let Some(e) = &outcome.reschedule_error {
                tick_bus.emit(
                    SUPERVISOR_SOURCE,
                    EventPayload::Alert {
                        component: CHECK_TIMER_NAME.to_string(),
                        message: e.to_string(),
                    },
                );
            }
            status_tx.send_replace(SupervisorStatus {
                ticks: supervisor.ticks(),
                period: outcome.period,
                last_mask: outcome.mask,
                indicator_lit: outcome.indicator_lit,
            });
        })?;
        check_timer.start()?;

        let flash_timers = start_flash_timers(&config, &timers, &leds)?;

        let ip_id = registry.register(IP_TASK_NAME, Priority::IDLE)?;
        let hooks = GateHooks {
            spawner: Box::new(NetworkTaskLauncher::new(NetTaskContext {
                bind: config.bind_address,
                network: config.network.clone(),
                registry: registry.clone(),
            })),
            priority: Box::new(registry.priority_handle(ip_id)),
            addresses: Box::new(StaticAddressSource::new(&config.network)),
            display: panel.display,
        };
        let echo_server = config.echo_clients.then_some(config.echo_server);
        let gate = LinkGate::new(
            config.gate(),
            standard_network_tasks(config.udp_cli_port, echo_server),
            hooks,
        );
        let ip = spawn_ip_task(gate, bus.clone(), config.link_queue_depth);
        registry.attach(ip_id, ip.handle);

        info!(
            workers = config.workers.len(),
            period_ms = config.check_period_ms,
            ip = %config.network.ip,
            "vigil system started"
        );

        Ok(VigilSystem {
            config,
            bus,
            registry,
            battery,
            leds,
            timers,
            timer_task,
            check_timer,
            flash_timers,
            link_events: ip.events,
            link_status: ip.status,
            supervisor_status,
        })
    }
}

fn start_flash_timers(
    config: &SystemConfig,
    timers: &TimerServiceHandle,
    leds: &SharedPanel,
) -> Result<Vec<TimerHandle>, VigilError> {
    let mut handles = Vec::with_capacity(config.flash_timer_count());
    for index in 0..config.flash_leds {
        if index == config.check_led {
            warn!(index, "flash LED overlaps the check LED; not flashing it");
            continue;
        }
        let period = Duration::from_millis(config.flash_base_ms * (index as u64 + 1));
        let mut led = leds.clone();
        let timer = timers.create(format!("LEDFlash{index}"), period, true, move |_| {
            if let Err(e) = led.toggle_indicator(index) {
                warn!(index, error = %e, "flash LED toggle failed");
            }
        })?;
        timer.start()?;
        handles.push(timer);
    }
    Ok(handles)
}

// ─────────────────────────────────────────────────────────────────────────────
// VigilSystem
// ─────────────────────────────────────────────────────────────────────────────

/// A running board.
pub struct VigilSystem {
    config: SystemConfig,
    bus: EventBus,
    registry: TaskRegistry,
    battery: Battery,
    leds: SharedPanel,
    timers: TimerServiceHandle,
    timer_task: JoinHandle<()>,
    check_timer: TimerHandle,
    flash_timers: Vec<TimerHandle>,
    link_events: LinkEventSender,
    link_status: watch::Receiver<LinkStatus>,
    supervisor_status: watch::Receiver<SupervisorStatus>,
}

impl VigilSystem {
    pub fn builder(config: SystemConfig) -> VigilSystemBuilder {
        VigilSystemBuilder {
            config,
            panel: None,
            bus: None,
            extra_checks: Vec::new(),
        }
    }

    pub fn config(&self) -> &SystemConfig {
        &self.config
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn tasks(&self) -> &TaskRegistry {
        &self.registry
    }

    pub fn battery(&self) -> &Battery {
        &self.battery
    }

    pub fn leds(&self) -> &SharedPanel {
        &self.leds
    }

    pub fn check_timer(&self) -> &TimerHandle {
        &self.check_timer
    }

    pub fn flash_timers(&self) -> &[TimerHandle] {
        &self.flash_timers
    }

    /// Producer side of the link-event queue.
    pub fn link_events(&self) -> LinkEventSender {
        self.link_events.clone()
    }

    pub fn link_status(&self) -> LinkStatus {
        self.link_status.borrow().clone()
    }

    pub fn watch_link(&self) -> watch::Receiver<LinkStatus> {
        self.link_status.clone()
    }

    pub fn supervisor_status(&self) -> SupervisorStatus {
        *self.supervisor_status.borrow()
    }

    pub fn watch_supervisor(&self) -> watch::Receiver<SupervisorStatus> {
        self.supervisor_status.clone()
    }

    /// Stop the timer service and abort every task.
    pub async fn shutdown(self) {
        if let Err(e) = self.timers.shutdown() {
            warn!(error = %e, "timer service did not accept shutdown; aborting it");
            self.timer_task.abort();
        } else if let Err(e) = self.timer_task.await {
            warn!(error = %e, "timer service ended abnormally");
        }
        self.registry.abort_all();
        info!("vigil system stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_board_constants() {
        let config = SystemConfig::default();
        assert_eq!(config.check_period_ms, 3000);
        assert_eq!(config.error_period_ms, 200);
        assert_eq!(config.check_led, 2);
        assert_eq!(config.udp_cli_port, 5001);
        assert_eq!(config.gate().connected_priority, Priority(4));
        assert_eq!(config.gate().layout, DisplayLayout::default());
        assert_eq!(config.workers.len(), 9);
        assert_eq!(config.required_leds(), 3);
        assert_eq!(config.flash_leds, 1);
        assert_eq!(config.flash_timer_count(), 1);
        assert!(!config.echo_clients);
        config.validate().unwrap();
    }

    #[test]
    fn zero_period_is_invalid() {
        let config = SystemConfig {
            error_period_ms: 0,
            ..SystemConfig::default()
        };
        assert!(matches!(config.validate(), Err(VigilError::Config(_))));
    }

    #[test]
    fn worker_priority_must_fit() {
        let config = SystemConfig {
            max_priorities: 2,
            worker_priority: 2,
            ..SystemConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn partial_config_fills_defaults() {
        let config: SystemConfig =
            serde_json::from_str(r#"{"check_period_ms": 1000, "echo_clients": true}"#).unwrap();
        assert_eq!(config.check_period_ms, 1000);
        assert!(config.echo_clients);
        assert_eq!(config.error_period_ms, 200);
        assert_eq!(config.network, NetworkConfig::default());
    }

    #[tokio::test(start_paused = true)]
    async fn flash_timers_skip_the_check_led() {
        let config = SystemConfig {
            flash_leds: 4,
            workers: Vec::new(),
            ..SystemConfig::default()
        };
        let system = VigilSystem::builder(config).start().unwrap();
        assert_eq!(system.flash_timers().len(), 3);
        system.shutdown().await;
    }

    #[test]
    fn timer_queue_must_hold_start_up_requests() {
        let config = SystemConfig {
            flash_leds: 6,
            workers: Vec::new(),
            ..SystemConfig::default()
        };
        assert_eq!(config.flash_timer_count(), 5);
        assert_eq!(config.startup_timer_requests(), 12);
        assert!(matches!(config.validate(), Err(VigilError::Config(_))));

        let roomy = SystemConfig {
            timer_queue_depth: 12,
            ..config
        };
        roomy.validate().unwrap();
    }

    #[tokio::test(flavor = "current_thread")]
    async fn many_flash_leds_boot_with_a_deep_enough_queue() {
        let config = SystemConfig {
            flash_leds: 6,
            workers: Vec::new(),
            timer_queue_depth: 12,
            ..SystemConfig::default()
        };
        let system = VigilSystem::builder(config.clone()).start().unwrap();
        assert_eq!(system.flash_timers().len(), 5);
        system.shutdown().await;

        let shallow = SystemConfig {
            timer_queue_depth: 10,
            ..config
        };
        assert!(matches!(
            VigilSystem::builder(shallow).start(),
            Err(VigilError::Config(_))
        ));
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn failed_start_stops_what_it_spawned() {
        let metrics = tokio::runtime::Handle::current().metrics();
        let before = metrics.num_alive_tasks();

        // The battery and timer service are up before the extra checks
        // overflow the check set.
        let mut builder = VigilSystem::builder(SystemConfig::default());
        for i in 0..vigil_types::MAX_CHECKS {
            builder = builder.with_check(vigil_kernel::FnCheck::new(format!("extra{i}"), || true));
        }
        assert!(matches!(builder.start(), Err(VigilError::Config(_))));

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(metrics.num_alive_tasks(), before);
    }
}
