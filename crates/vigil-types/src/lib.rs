use std::fmt;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::ops::BitOr;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Maximum number of liveness checks a single [`FaultMask`] can represent.
pub const MAX_CHECKS: usize = 32;

/// Bit-field snapshot of failing liveness checks.
///
/// Bit *i* is set when check *i* (by registration order) reported a failure
/// on the most recent evaluation.  A mask is always recomputed from scratch;
/// it never accumulates history.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FaultMask(u32);

impl FaultMask {
    /// The mask with no bits set.
    pub const EMPTY: FaultMask = FaultMask(0);

    pub fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    pub fn bits(self) -> u32 {
        self.0
    }

    /// Set the bit for check `index`.  Indices at or beyond [`MAX_CHECKS`]
    /// are ignored.
    pub fn set(&mut self, index: usize) {
        if let Some(bit) = 1u32.checked_shl(index as u32) {
            self.0 |= bit;
        }
    }

    pub fn contains(self, index: usize) -> bool {
        1u32.checked_shl(index as u32)
            .is_some_and(|bit| self.0 & bit != 0)
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Number of failing checks.
    pub fn count(self) -> u32 {
        self.0.count_ones()
    }

    /// Indices of the failing checks in ascending order.
    pub fn failed_indices(self) -> impl Iterator<Item = usize> {
        (0..MAX_CHECKS).filter(move |i| self.contains(*i))
    }
}

impl BitOr for FaultMask {
    type Output = FaultMask;

    fn bitor(self, rhs: Self) -> Self::Output {
        FaultMask(self.0 | rhs.0)
    }
}

impl fmt::Display for FaultMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}

/// Outcome of one liveness check during a single supervisor tick.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckResult {
    /// Registration position of the check; also its bit in the [`FaultMask`].
    pub index: usize,
    /// Human-readable name of the monitored subsystem.
    pub name: String,
    pub healthy: bool,
}

/// Ordered, named results of every liveness check evaluated in one tick.
///
/// Collapses to a [`FaultMask`] via [`HealthReport::mask`] and to a single
/// boolean via [`HealthReport::any_failed`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthReport {
    pub results: Vec<CheckResult>,
}

impl HealthReport {
    pub fn new(results: Vec<CheckResult>) -> Self {
        Self { results }
    }

    /// Fold every failing result into a fault bit-field.
    pub fn mask(&self) -> FaultMask {
        let mut mask = FaultMask::EMPTY;
        for result in self.results.iter().filter(|r| !r.healthy) {
            mask.set(result.index);
        }
        mask
    }

    pub fn any_failed(&self) -> bool {
        self.results.iter().any(|r| !r.healthy)
    }

    /// Names of the checks that failed, in evaluation order.
    pub fn failed(&self) -> impl Iterator<Item = &str> {
        self.results
            .iter()
            .filter(|r| !r.healthy)
            .map(|r| r.name.as_str())
    }
}

/// Cadence at which the health supervisor re-arms its own timer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckPeriod {
    /// No fault has been observed since start.
    #[default]
    Normal,
    /// At least one fault has been observed since start.  Latched.
    Degraded,
}

/// Link-state notification delivered by the network stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkEvent {
    Up,
    Down,
}

impl FromStr for LinkEvent {
    type Err = VigilError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "up" => Ok(LinkEvent::Up),
            "down" => Ok(LinkEvent::Down),
            other => Err(VigilError::Config(format!("unknown link event '{other}'"))),
        }
    }
}

/// Link state as tracked by the activation gate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkState {
    #[default]
    Disconnected,
    Connected,
}

impl From<LinkEvent> for LinkState {
    fn from(event: LinkEvent) -> Self {
        match event {
            LinkEvent::Up => LinkState::Connected,
            LinkEvent::Down => LinkState::Disconnected,
        }
    }
}

/// Scheduling priority.  Higher values preempt lower ones; `0` is the idle
/// tier.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Priority(pub u8);

impl Priority {
    pub const IDLE: Priority = Priority(0);

    /// The `n`-th tier above idle.
    pub fn above_idle(n: u8) -> Self {
        Priority(n)
    }

    /// Highest usable tier for a scheduler with `max_priorities` levels.
    pub fn highest(max_priorities: u8) -> Self {
        Priority(max_priorities.saturating_sub(1))
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Handle of a task created through the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub u64);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task#{}", self.0)
    }
}

/// Handle of a software timer owned by the timer service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TimerId(pub u32);

impl fmt::Display for TimerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "timer#{}", self.0)
    }
}

/// Role of a task that may only start once the network is up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NetworkTaskKind {
    /// Command console served over UDP on a well-known port.
    CommandInterpreter { port: u16 },
    /// Client that periodically echoes datagrams off a remote server.
    EchoClient { server: SocketAddrV4 },
}

/// Creation parameters for one network-dependent task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkTaskSpec {
    pub name: String,
    pub kind: NetworkTaskKind,
    pub priority: Priority,
    /// Stack depth in words, as the scheduler would allocate it.
    pub stack_depth: u16,
}

/// A 48-bit Ethernet hardware address, rendered as `aa:bb:cc:dd:ee:ff`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MacAddress(pub [u8; 6]);

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02x}:{b:02x}:{c:02x}:{d:02x}:{e:02x}:{g:02x}")
    }
}

impl FromStr for MacAddress {
    type Err = VigilError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut octets = [0u8; 6];
        let mut parts = s.split([':', '-']);
        for octet in octets.iter_mut() {
            let part = parts
                .next()
                .ok_or_else(|| VigilError::Config(format!("MAC address '{s}' is too short")))?;
            *octet = u8::from_str_radix(part, 16)
                .map_err(|e| VigilError::Config(format!("bad MAC octet '{part}': {e}")))?;
        }
        if parts.next().is_some() {
            return Err(VigilError::Config(format!("MAC address '{s}' is too long")));
        }
        Ok(MacAddress(octets))
    }
}

impl TryFrom<String> for MacAddress {
    type Error = VigilError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<MacAddress> for String {
    fn from(mac: MacAddress) -> Self {
        mac.to_string()
    }
}

/// Static interface addressing, supplied at construction rather than baked
/// in as constants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub ip: Ipv4Addr,
    pub netmask: Ipv4Addr,
    pub gateway: Ipv4Addr,
    pub dns: Ipv4Addr,
    pub mac: MacAddress,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            ip: Ipv4Addr::new(192, 168, 0, 200),
            netmask: Ipv4Addr::new(255, 255, 255, 0),
            gateway: Ipv4Addr::new(192, 168, 0, 1),
            dns: Ipv4Addr::new(208, 67, 222, 222),
            mac: MacAddress([0x00, 0x12, 0x13, 0x10, 0x15, 0x11]),
        }
    }
}

/// Unified event wrapper for the telemetry bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    /// e.g., "vigil-runtime::timer"
    pub source: String,
    pub payload: EventPayload,
}

impl Event {
    /// Stamp `payload` with a fresh id and the current time.
    pub fn new(source: impl Into<String>, payload: EventPayload) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            source: source.into(),
            payload,
        }
    }
}

/// Variants of data that can be routed over the telemetry bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EventPayload {
    /// Per-check results of one supervisor tick.
    Health(HealthReport),
    /// The supervisor re-armed its timer with a new cadence.
    PeriodChanged { period: CheckPeriod, period_ms: u64 },
    /// The activation gate processed a link transition.
    LinkChanged {
        state: LinkState,
        address: Option<String>,
    },
    /// A network-dependent task was created.
    TaskCreated {
        task: String,
        id: TaskId,
        priority: Priority,
    },
    /// Operator-visible alert (shutdown, injected faults, …).
    Alert { component: String, message: String },
}

/// Workspace-wide error type.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum VigilError {
    #[error("Scheduler Error: {0}")]
    Scheduler(String),

    #[error("Command queue '{queue}' is full")]
    CommandQueueFull { queue: String },

    #[error("Timer {0} is not registered")]
    TimerNotFound(TimerId),

    #[error("Failed to create task {task}: {details}")]
    TaskCreation { task: String, details: String },

    #[error("Hardware Fault on {component}: {details}")]
    HardwareFault { component: String, details: String },

    #[error("Address configuration unavailable: {0}")]
    AddressUnavailable(String),

    #[error("Channel Error: {0}")]
    Channel(String),

    #[error("Configuration Error: {0}")]
    Config(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(index: usize, name: &str, healthy: bool) -> CheckResult {
        CheckResult {
            index,
            name: name.to_string(),
            healthy,
        }
    }

    #[test]
    fn fault_mask_sets_and_reports_bits() {
        let mut mask = FaultMask::EMPTY;
        assert!(mask.is_empty());
        mask.set(0);
        mask.set(5);
        assert!(mask.contains(0));
        assert!(mask.contains(5));
        assert!(!mask.contains(1));
        assert_eq!(mask.bits(), 0b10_0001);
        assert_eq!(mask.count(), 2);
        assert_eq!(mask.failed_indices().collect::<Vec<_>>(), vec![0, 5]);
    }

    #[test]
    fn fault_mask_ignores_out_of_range_index() {
        let mut mask = FaultMask::EMPTY;
        mask.set(MAX_CHECKS);
        mask.set(200);
        assert!(mask.is_empty());
        assert!(!mask.contains(200));
    }

    #[test]
    fn fault_mask_bitor_and_display() {
        let mask = FaultMask::from_bits(0x08) | FaultMask::from_bits(0x10);
        assert_eq!(mask.bits(), 0x18);
        assert_eq!(mask.to_string(), "0x00000018");
    }

    #[test]
    fn health_report_collapses_to_mask() {
        let report = HealthReport::new(vec![
            result(0, "gen_queue", true),
            result(1, "queue_peek", false),
            result(2, "block_time", false),
        ]);
        assert!(report.any_failed());
        assert_eq!(report.mask().bits(), 0b110);
        assert_eq!(report.failed().collect::<Vec<_>>(), vec!["queue_peek", "block_time"]);
    }

    #[test]
    fn empty_report_is_healthy() {
        let report = HealthReport::default();
        assert!(!report.any_failed());
        assert!(report.mask().is_empty());
    }

    #[test]
    fn mac_address_parse_and_display() {
        let mac: MacAddress = "00:12:13:10:15:11".parse().unwrap();
        assert_eq!(mac.0, [0x00, 0x12, 0x13, 0x10, 0x15, 0x11]);
        assert_eq!(mac.to_string(), "00:12:13:10:15:11");

        let dashed: MacAddress = "AA-BB-CC-DD-EE-FF".parse().unwrap();
        assert_eq!(dashed.0, [0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff]);
    }

    #[test]
    fn mac_address_rejects_malformed_input() {
        assert!("00:12:13".parse::<MacAddress>().is_err());
        assert!("00:12:13:10:15:11:99".parse::<MacAddress>().is_err());
        assert!("zz:12:13:10:15:11".parse::<MacAddress>().is_err());
    }

    #[test]
    fn network_config_serializes_mac_as_string() {
        let cfg = NetworkConfig::default();
        let json = serde_json::to_string(&cfg).unwrap();
        assert!(json.contains("\"00:12:13:10:15:11\""));
        let back: NetworkConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, cfg);
    }

    #[test]
    fn link_event_parses_case_insensitively() {
        assert_eq!("UP".parse::<LinkEvent>().unwrap(), LinkEvent::Up);
        assert_eq!(" down ".parse::<LinkEvent>().unwrap(), LinkEvent::Down);
        assert!(matches!(
            "sideways".parse::<LinkEvent>(),
            Err(VigilError::Config(_))
        ));
    }

    #[test]
    fn link_state_follows_event() {
        assert_eq!(LinkState::from(LinkEvent::Up), LinkState::Connected);
        assert_eq!(LinkState::from(LinkEvent::Down), LinkState::Disconnected);
        assert_eq!(LinkState::default(), LinkState::Disconnected);
    }

    #[test]
    fn priority_tiers() {
        assert_eq!(Priority::IDLE, Priority(0));
        assert_eq!(Priority::highest(5), Priority(4));
        assert_eq!(Priority::highest(0), Priority(0));
        assert!(Priority::above_idle(2) > Priority::IDLE);
    }

    #[test]
    fn timer_ids_order_by_creation() {
        let mut deadlines = std::collections::BTreeMap::new();
        deadlines.insert(TimerId(3), "flash");
        deadlines.insert(TimerId(0), "check");
        assert_eq!(deadlines.keys().copied().collect::<Vec<_>>(), vec![TimerId(0), TimerId(3)]);
        assert!(TimerId(1) < TimerId(2));
    }

    #[test]
    fn event_roundtrip() {
        let event = Event::new(
            "vigil-runtime::timer",
            EventPayload::PeriodChanged {
                period: CheckPeriod::Degraded,
                period_ms: 200,
            },
        );
        let json = serde_json::to_string(&event).unwrap();
        let back: Event = serde_json::from_str(&json).unwrap();
        assert_eq!(event.id, back.id);
        assert_eq!(event.source, back.source);
        assert!(matches!(
            back.payload,
            EventPayload::PeriodChanged {
                period: CheckPeriod::Degraded,
                period_ms: 200
            }
        ));
    }

    #[test]
    fn network_task_kind_is_tagged() {
        let spec = NetworkTaskSpec {
            name: "udp_cli".to_string(),
            kind: NetworkTaskKind::CommandInterpreter { port: 5001 },
            priority: Priority::IDLE,
            stack_depth: 260,
        };
        let json = serde_json::to_string(&spec).unwrap();
        assert!(json.contains("\"kind\":\"command_interpreter\""));
        let back: NetworkTaskSpec = serde_json::from_str(&json).unwrap();
        assert_eq!(back, spec);
    }

    #[test]
    fn vigil_error_display() {
        let err = VigilError::CommandQueueFull {
            queue: "timer".to_string(),
        };
        assert!(err.to_string().contains("timer"));

        let err2 = VigilError::HardwareFault {
            component: "led2".to_string(),
            details: "stuck".to_string(),
        };
        assert!(err2.to_string().contains("led2"));
    }
}
