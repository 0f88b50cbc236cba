//! `vigil-cli` – Vigil Command Line Interface
//!
//! Boots a simulated board and narrates what its health supervisor and
//! network gate do.  It:
//!
//! 1. Loads `~/.vigil/config.toml` (or `$VIGIL_CONFIG`), creating it with
//!    defaults on first run, then applies `VIGIL_*` overrides.
//! 2. Starts the board on a console panel and prints every supervisor tick,
//!    link transition and task creation from the telemetry bus.
//! 3. Plays the configured link script against the simulated network.
//! 4. Runs until Ctrl-C (or `run_for_secs`), then shuts the board down.

mod config;
mod console;

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use colored::Colorize;
use tokio::sync::Notify;
use tracing::{error, warn};

use vigil_middleware::{EventBus, Topic, TopicReceiver};
use vigil_runtime::{LinkEventSender, VigilSystem};
use vigil_types::{CheckPeriod, EventPayload, LinkState};

use crate::config::{Config, LinkStep};

const CLI_SOURCE: &str = "vigil-cli";

fn main() -> ExitCode {
    print_banner();

    let cfg = match config::load_or_create() {
        Ok((cfg, created)) => {
            let path = config::config_path().display().to_string();
            if created {
                println!("  {} Default config written to {}", "✓".green().bold(), path.bold());
            } else {
                println!("  Config loaded from {}", path.bold());
            }
            cfg
        }
        Err(e) => {
            println!("{}: {}", "Config error".red(), e);
            println!("  Using default configuration.");
            let mut cfg = Config::default();
            config::apply_env_overrides(&mut cfg);
            cfg
        }
    };

    // Set VIGIL_LOG_FORMAT=json for newline-delimited JSON logs; the board
    // narration below still uses println! so it reads well in a terminal.
    let _guard = vigil_runtime::init_tracing("vigil", &cfg.board.network);

    // ── Ctrl-C handler ────────────────────────────────────────────────────
    let shutdown = Arc::new(Notify::new());
    let shutdown_ctrlc = Arc::clone(&shutdown);
    if let Err(e) = ctrlc::set_handler(move || {
        println!();
        println!("{}", "⚠  Ctrl-C received – shutting the board down …".yellow().bold());
        shutdown_ctrlc.notify_one();
    }) {
        warn!(error = %e, "Failed to install Ctrl-C handler; stop the process another way");
    }

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            error!(error = %e, "failed to build the Tokio runtime");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(cfg, shutdown)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            println!("{}: {}", "Board failed to start".red().bold(), e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cfg: Config, shutdown: Arc<Notify>) -> Result<(), vigil_types::VigilError> {
    print_summary(&cfg);

    let bus = EventBus::default();
    let narrators: Vec<_> = Topic::ALL
        .into_iter()
        .map(|topic| tokio::spawn(narrate(bus.subscribe_to(topic))))
        .collect();

    let system = VigilSystem::builder(cfg.board.clone())
        .with_panel(console::console_panel(cfg.board.required_leds()))
        .with_bus(bus.clone())
        .start()?;

    let script = tokio::spawn(play_link_script(cfg.link_script.clone(), system.link_events()));

    match cfg.run_for_secs {
        Some(secs) => {
            tokio::select! {
                _ = shutdown.notified() => {}
                _ = tokio::time::sleep(Duration::from_secs(secs)) => {
                    println!("\n  {} after {secs}s", "Run time elapsed".yellow());
                }
            }
        }
        None => shutdown.notified().await,
    }

    bus.emit(
        CLI_SOURCE,
        EventPayload::Alert {
            component: "cli".to_string(),
            message: "operator shutdown".to_string(),
        },
    );
    script.abort();
    let status = system.supervisor_status();
    system.shutdown().await;
    // Let the narrators print the shutdown alert before they go.
    tokio::time::sleep(Duration::from_millis(50)).await;
    for narrator in narrators {
        narrator.abort();
    }

    println!(
        "  {} {} ticks, final period {:?}, last mask {}",
        "✓ Board stopped:".green(),
        status.ticks,
        status.period,
        status.last_mask
    );
    Ok(())
}

/// Deliver each scripted link event after its delay.
async fn play_link_script(steps: Vec<LinkStep>, link: LinkEventSender) {
    for step in steps {
        tokio::time::sleep(Duration::from_millis(step.after_ms)).await;
        if let Err(e) = link.notify(step.event) {
            warn!(event = ?step.event, error = %e, "link event dropped");
        }
    }
}

/// Print every event on one topic until the bus closes.
async fn narrate(mut rx: TopicReceiver) {
    while let Some(event) = rx.next().await {
        let stamp = event.timestamp.format("%H:%M:%S%.3f").to_string().dimmed();
        match event.payload {
            EventPayload::Health(report) => {
                let mask = report.mask();
                if report.any_failed() {
                    let failed: Vec<_> = report.failed().collect();
                    println!("  {stamp} {} mask {mask} failing: {}", "health".red().bold(), failed.join(", "));
                } else {
                    println!("  {stamp} {} all {} checks passing", "health".green(), report.results.len());
                }
            }
            EventPayload::PeriodChanged { period, period_ms } => {
                let label = match period {
                    CheckPeriod::Normal => "normal".green(),
                    CheckPeriod::Degraded => "degraded".red().bold(),
                };
                println!("  {stamp} {} check period now {period_ms} ms ({label})", "timer".yellow().bold());
            }
            EventPayload::LinkChanged { state, address } => {
                let state = match state {
                    LinkState::Connected => "up".green().bold(),
                    LinkState::Disconnected => "down".red().bold(),
                };
                let address = address.unwrap_or_default();
                println!("  {stamp} {} link {state} {address}", "network".cyan().bold());
            }
            EventPayload::TaskCreated { task, id, priority } => {
                println!("  {stamp} {} created {} ({id}, priority {priority})", "tasks".cyan(), task.bold());
            }
            EventPayload::Alert { component, message } => {
                println!("  {stamp} {} [{component}] {message}", "alert".yellow().bold());
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Banner
// ─────────────────────────────────────────────────────────────────────────────

fn print_banner() {
    println!();
    println!("{}", r#" _    ___       _ __"#.bold().cyan());
    println!("{}", r#"| |  / (_)___ _(_) /"#.bold().cyan());
    println!("{}", r#"| | / / / __ `/ / / "#.bold().cyan());
    println!("{}", r#"| |/ / / /_/ / / /  "#.bold().cyan());
    println!("{}", r#"|___/_/\__, /_/_/   "#.bold().cyan());
    println!("{}", r#"      /____/        "#.bold().cyan());
    println!();
    println!("  {} {}", "Vigil".bold(), format!("v{}", env!("CARGO_PKG_VERSION")).dimmed());
    println!("  Health supervision for a simulated board");
    println!();
}

fn print_summary(cfg: &Config) {
    let board = &cfg.board;
    println!(
        "  {} {} workers, check every {} ms ({} ms once degraded), LED {}",
        "Board:".bold(),
        board.workers.len(),
        board.check_period_ms,
        board.error_period_ms,
        board.check_led
    );
    println!(
        "  {} {} / {} via {}, command port {}{}",
        "Network:".bold(),
        board.network.ip,
        board.network.netmask,
        board.network.gateway,
        board.udp_cli_port,
        if board.echo_clients {
            format!(", echo server {}", board.echo_server)
        } else {
            String::new()
        }
    );
    println!(
        "  {} {} link event(s); stop with {}",
        "Script:".bold(),
        cfg.link_script.len(),
        "Ctrl-C".bold()
    );
    println!();
}
