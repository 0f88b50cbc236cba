//! End-to-end scenarios on a booted board: supervisor cadence, fault
//! latching, LED toggling, and link-driven network task activation.

use std::time::Duration;

use vigil_hal::sim::{DisplayProbe, IndicatorProbe, SimDisplay, SimPanel};
use vigil_kernel::FnCheck;
use vigil_middleware::{EventBus, Topic, TopicReceiver};
use vigil_runtime::self_test::{WorkerKind, WorkerSpec, standard_battery};
use vigil_runtime::system::IP_TASK_NAME;
use vigil_runtime::{Panel, SystemConfig, VigilSystem};
use vigil_types::{CheckPeriod, EventPayload, LinkEvent, LinkState, MAX_CHECKS, Priority, VigilError};

const CHECK_LED: usize = 2;

fn board(config: SystemConfig) -> (VigilSystem, Vec<IndicatorProbe>, DisplayProbe, TopicReceiver) {
    let (leds, probes) = SimPanel::new().with_leds(config.required_leds()).build();
    let (display, lcd) = SimDisplay::new("lcd");
    let bus = EventBus::default();
    let health = bus.subscribe_to(Topic::Health);
    let system = VigilSystem::builder(config)
        .with_panel(Panel { leds, display })
        .with_bus(bus)
        .start()
        .unwrap();
    (system, probes, lcd, health)
}

fn quiet_config() -> SystemConfig {
    SystemConfig {
        flash_leds: 0,
        ..SystemConfig::default()
    }
}

fn with_worker(kind: WorkerKind, tweak: impl FnOnce(&mut WorkerSpec)) -> Vec<WorkerSpec> {
    let mut workers = standard_battery();
    let index = WorkerKind::ALL.iter().position(|k| *k == kind).unwrap();
    tweak(&mut workers[index]);
    workers
}

/// Drain everything buffered on the health topic.
fn drain(rx: &mut TopicReceiver) -> Vec<EventPayload> {
    std::iter::from_fn(|| rx.try_next()).map(|e| e.payload).collect()
}

#[tokio::test(start_paused = true)]
async fn healthy_board_ticks_at_normal_period() {
    let (system, leds, _lcd, mut health) = board(quiet_config());

    tokio::time::sleep(Duration::from_millis(9_100)).await;

    let status = system.supervisor_status();
    assert_eq!(status.ticks, 3);
    assert_eq!(status.period, CheckPeriod::Normal);
    assert!(status.last_mask.is_empty());
    assert_eq!(leds[CHECK_LED].toggles(), 3);

    let events = drain(&mut health);
    assert_eq!(events.len(), 3);
    assert!(events.iter().all(|e| matches!(e, EventPayload::Health(r) if !r.any_failed())));
    system.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn failing_worker_switches_to_degraded_period_once() {
    let config = SystemConfig {
        workers: with_worker(WorkerKind::Semaphore, |w| w.fail_after = Some(2)),
        ..quiet_config()
    };
    let (system, leds, _lcd, mut health) = board(config);

    // First tick at 3000 ms degrades; then every 200 ms up to 4000 ms.
    tokio::time::sleep(Duration::from_millis(4_050)).await;

    let status = system.supervisor_status();
    assert_eq!(status.ticks, 6);
    assert_eq!(status.period, CheckPeriod::Degraded);
    assert_eq!(status.last_mask.failed_indices().collect::<Vec<_>>(), vec![3]);
    assert_eq!(leds[CHECK_LED].toggles(), 6);

    let events = drain(&mut health);
    let period_changes = events
        .iter()
        .filter(|e| matches!(e, EventPayload::PeriodChanged { period: CheckPeriod::Degraded, period_ms: 200 }))
        .count();
    assert_eq!(period_changes, 1);
    system.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn stalled_worker_is_caught_on_the_following_tick() {
    let config = SystemConfig {
        workers: with_worker(WorkerKind::QueueSet, |w| w.stall_after = Some(5)),
        ..quiet_config()
    };
    let (system, _leds, _lcd, _health) = board(config);

    // The stalled worker still advanced before the first tick.
    tokio::time::sleep(Duration::from_millis(3_050)).await;
    assert_eq!(system.supervisor_status().period, CheckPeriod::Normal);

    // Ticks at 6000 (degrades) then 6200 .. 7000.
    tokio::time::sleep(Duration::from_millis(4_000)).await;
    let status = system.supervisor_status();
    assert_eq!(status.period, CheckPeriod::Degraded);
    assert_eq!(status.ticks, 7);
    assert!(status.last_mask.contains(7));
    system.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn extra_checks_follow_the_battery() {
    let config = SystemConfig {
        workers: Vec::new(),
        ..quiet_config()
    };
    let (leds, _) = SimPanel::new().with_leds(3).build();
    let (display, _) = SimDisplay::new("lcd");
    let system = VigilSystem::builder(config)
        .with_panel(Panel { leds, display })
        .with_check(FnCheck::new("always_ok", || true))
        .with_check(FnCheck::new("uplink", || false))
        .start()
        .unwrap();

    tokio::time::sleep(Duration::from_millis(3_050)).await;
    let status = system.supervisor_status();
    assert_eq!(status.last_mask.bits(), 0b10);
    assert_eq!(status.period, CheckPeriod::Degraded);
    system.shutdown().await;
}

#[tokio::test]
async fn too_many_checks_fail_start_up() {
    let config = SystemConfig {
        workers: Vec::new(),
        ..quiet_config()
    };
    let mut builder = VigilSystem::builder(config);
    for i in 0..=MAX_CHECKS {
        builder = builder.with_check(FnCheck::new(format!("c{i}"), || true));
    }
    assert!(matches!(builder.start(), Err(VigilError::Config(_))));
}

#[tokio::test]
async fn link_flaps_create_network_tasks_once() {
    let config = SystemConfig {
        workers: Vec::new(),
        udp_cli_port: 0,
        ..quiet_config()
    };
    let (system, _leds, lcd, _health) = board(config);
    let mut link = system.watch_link();
    let ip_task = system.tasks().find(IP_TASK_NAME).unwrap();
    assert_eq!(system.tasks().priority(ip_task), Some(Priority::IDLE));

    system.link_events().notify(LinkEvent::Up).unwrap();
    link.wait_for(|s| s.events == 1).await.unwrap();
    assert_eq!(system.link_status().state, LinkState::Connected);
    assert_eq!(system.tasks().priority(ip_task), Some(Priority(4)));
    assert_eq!(lcd.text_at(3, 3).as_deref(), Some("IP: "));
    assert_eq!(lcd.text_at(48, 3).as_deref(), Some("192.168.0.200  "));

    for event in [LinkEvent::Down, LinkEvent::Up, LinkEvent::Up, LinkEvent::Down] {
        system.link_events().notify(event).unwrap();
    }
    link.wait_for(|s| s.events == 5).await.unwrap();

    let status = system.link_status();
    assert_eq!(status.state, LinkState::Disconnected);
    assert!(status.tasks_created);
    assert_eq!(status.displayed_address, "");
    assert_eq!(system.tasks().priority(ip_task), Some(Priority::IDLE));

    let created: Vec<_> = system
        .tasks()
        .snapshot()
        .into_iter()
        .filter(|t| t.name == "udp_cli")
        .collect();
    assert_eq!(created.len(), 1);
    system.shutdown().await;
}

#[tokio::test]
async fn echo_clients_join_the_network_task_set() {
    let config = SystemConfig {
        workers: Vec::new(),
        udp_cli_port: 0,
        echo_clients: true,
        ..quiet_config()
    };
    let (system, _leds, _lcd, _health) = board(config);
    let mut tasks = system.bus().subscribe_to(Topic::Tasks);
    let mut link = system.watch_link();

    system.link_events().notify(LinkEvent::Up).unwrap();
    link.wait_for(|s| s.tasks_created).await.unwrap();

    let mut names = Vec::new();
    while let Some(event) = tasks.try_next() {
        if let EventPayload::TaskCreated { task, priority, .. } = event.payload {
            assert_eq!(priority, Priority::IDLE);
            names.push(task);
        }
    }
    assert_eq!(names, vec!["udp_cli", "echo_client0", "echo_client1"]);
    system.shutdown().await;
}
