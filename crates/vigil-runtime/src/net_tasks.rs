//! Bodies of the network-dependent tasks and the [`TaskSpawner`] that
//! launches them.
//!
//! - [`CommandInterpreter`] – a line-oriented console served over UDP.  Each
//!   datagram is one command; the reply goes back to the sender.
//! - [`run_echo_client`] – periodically sends a numbered message to an echo
//!   server and checks that the same bytes come back.

use std::fmt::Write as _;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::runtime::Handle;
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, warn};
use vigil_kernel::TaskSpawner;
use vigil_types::{NetworkConfig, NetworkTaskKind, NetworkTaskSpec, TaskId, VigilError};

use crate::tasks::TaskRegistry;

/// Largest datagram the interpreter accepts or the echo client sends.
pub const MAX_DATAGRAM: usize = 1024;

/// Pause between echo requests.
pub const ECHO_INTERVAL: Duration = Duration::from_secs(1);

/// How long the echo client waits for a reply.
pub const ECHO_REPLY_TIMEOUT: Duration = Duration::from_secs(1);

const UNKNOWN_COMMAND: &str =
    "Command not recognised.  Enter 'help' to view a list of available commands.\r\n";

/// What the network tasks may look at.
#[derive(Clone)]
pub struct NetTaskContext {
    /// Local address sockets are bound to.
    pub bind: Ipv4Addr,
    pub network: NetworkConfig,
    pub registry: TaskRegistry,
}

// ────────────────────────────────────────────────────────────────────────────
// Command interpreter
// ────────────────────────────────────────────────────────────────────────────

/// UDP command console.
pub struct CommandInterpreter {
    socket: UdpSocket,
    ctx: NetTaskContext,
}

impl CommandInterpreter {
    /// Bind the console to `port` on the context's bind address.
    pub async fn bind(ctx: NetTaskContext, port: u16) -> Result<Self, VigilError> {
        let socket = UdpSocket::bind(SocketAddrV4::new(ctx.bind, port))
            .await
            .map_err(|e| VigilError::HardwareFault {
                component: format!("udp:{port}"),
                details: e.to_string(),
            })?;
        Ok(Self { socket, ctx })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, VigilError> {
        self.socket
            .local_addr()
            .map_err(|e| VigilError::Channel(e.to_string()))
    }

    /// Answer commands until the task is aborted.
    pub async fn serve(self) {
        let mut buf = [0u8; MAX_DATAGRAM];
        info!(addr = ?self.socket.local_addr().ok(), "command interpreter listening");
        loop {
            let (len, peer) = match self.socket.recv_from(&mut buf).await {
                Ok(received) => received,
                Err(e) => {
                    warn!(error = %e, "command interpreter receive failed");
                    continue;
                }
            };
            let line = String::from_utf8_lossy(&buf[..len]);
            debug!(%peer, command = %line.trim(), "command received");
            let reply = interpret(line.trim(), &self.ctx);
            if let Err(e) = self.socket.send_to(reply.as_bytes(), peer).await {
                warn!(%peer, error = %e, "command reply failed");
            }
        }
    }
}

/// Execute one command line and return the reply text.
pub fn interpret(line: &str, ctx: &NetTaskContext) -> String {
    let mut words = line.split_whitespace();
    let Some(command) = words.next() else {
        return UNKNOWN_COMMAND.to_string();
    };
    let mut out = String::new();
    match command {
        "help" => {
            out.push_str("help:\r\n Lists all the registered commands\r\n\r\n");
            out.push_str("task-stats:\r\n Displays a table showing the state of each task\r\n\r\n");
            out.push_str("ip-config:\r\n Displays the interface address configuration\r\n\r\n");
            out.push_str("echo-parameters <...>:\r\n Echoes each parameter on its own line\r\n");
        }
        "task-stats" => {
            out.push_str("Task                 Id     Prio  State\r\n");
            for task in ctx.registry.snapshot() {
                let _ = write!(
                    out,
                    "{:<20} {:<6} {:<5} {}\r\n",
                    task.name,
                    task.id.0,
                    task.priority,
                    if task.running { "R" } else { "D" }
                );
            }
        }
        "ip-config" => {
            let n = &ctx.network;
            let _ = write!(
                out,
                "IP address: {}\r\nNet mask: {}\r\nGateway: {}\r\nDNS server: {}\r\nMAC: {}\r\n",
                n.ip, n.netmask, n.gateway, n.dns, n.mac
            );
        }
        "echo-parameters" => {
            out.push_str("The parameters were:\r\n");
            for (i, word) in words.enumerate() {
                let _ = write!(out, "{}: {word}\r\n", i + 1);
            }
        }
        _ => out.push_str(UNKNOWN_COMMAND),
    }
    out
}

// ────────────────────────────────────────────────────────────────────────────
// Echo client
// ────────────────────────────────────────────────────────────────────────────

/// Exchange numbered messages with `server` until aborted.
pub async fn run_echo_client(name: String, bind: Ipv4Addr, server: SocketAddrV4) {
    let socket = match UdpSocket::bind(SocketAddrV4::new(bind, 0)).await {
        Ok(socket) => socket,
        Err(e) => {
            error!(task = %name, error = %e, "echo client could not bind");
            return;
        }
    };
    let mut buf = [0u8; MAX_DATAGRAM];
    let (mut sent, mut echoed) = (0u64, 0u64);
    loop {
        let message = format!("Message number {sent}\r\n");
        sent += 1;
        match socket.send_to(message.as_bytes(), server).await {
            Ok(_) => match timeout(ECHO_REPLY_TIMEOUT, socket.recv_from(&mut buf)).await {
                Ok(Ok((len, _))) if &buf[..len] == message.as_bytes() => echoed += 1,
                Ok(Ok(_)) => warn!(task = %name, "echo reply did not match"),
                Ok(Err(e)) => warn!(task = %name, error = %e, "echo receive failed"),
                Err(_) => debug!(task = %name, %server, "echo reply timed out"),
            },
            Err(e) => warn!(task = %name, error = %e, "echo send failed"),
        }
        debug!(task = %name, sent, echoed, "echo round trip");
        sleep(ECHO_INTERVAL).await;
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Launcher
// ────────────────────────────────────────────────────────────────────────────

/// [`TaskSpawner`] that registers a network task and runs its body on the
/// current Tokio runtime.
pub struct NetworkTaskLauncher {
    ctx: NetTaskContext,
}

impl NetworkTaskLauncher {
    pub fn new(ctx: NetTaskContext) -> Self {
        Self { ctx }
    }
}

impl TaskSpawner for NetworkTaskLauncher {
    fn spawn(&mut self, spec: &NetworkTaskSpec) -> Result<TaskId, VigilError> {
        let runtime = Handle::try_current().map_err(|e| VigilError::TaskCreation {
            task: spec.name.clone(),
            details: e.to_string(),
        })?;
        let id = self.ctx.registry.register(&spec.name, spec.priority)?;
        let handle = match spec.kind {
            NetworkTaskKind::CommandInterpreter { port } => {
                let ctx = self.ctx.clone();
                runtime.spawn(async move {
                    match CommandInterpreter::bind(ctx, port).await {
                        Ok(console) => console.serve().await,
                        Err(e) => error!(error = %e, "command interpreter could not start"),
                    }
                })
            }
            NetworkTaskKind::EchoClient { server } => {
                runtime.spawn(run_echo_client(spec.name.clone(), self.ctx.bind, server))
            }
        };
        self.ctx.registry.attach(id, handle);
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vigil_types::Priority;

    fn ctx() -> NetTaskContext {
        NetTaskContext {
            bind: Ipv4Addr::LOCALHOST,
            network: NetworkConfig::default(),
            registry: TaskRegistry::default(),
        }
    }

    #[test]
    fn unknown_and_empty_commands() {
        assert_eq!(interpret("frobnicate", &ctx()), UNKNOWN_COMMAND);
        assert_eq!(interpret("", &ctx()), UNKNOWN_COMMAND);
    }

    #[test]
    fn help_lists_every_command() {
        let reply = interpret("help", &ctx());
        for command in ["task-stats", "ip-config", "echo-parameters"] {
            assert!(reply.contains(command), "missing {command}");
        }
    }

    #[test]
    fn ip_config_reports_network_config() {
        let reply = interpret("ip-config", &ctx());
        assert!(reply.contains("IP address: 192.168.0.200"));
        assert!(reply.contains("MAC: 00:12:13:10:15:11"));
    }

    #[test]
    fn echo_parameters_numbers_each_word() {
        let reply = interpret("echo-parameters alpha beta", &ctx());
        assert!(reply.contains("1: alpha\r\n"));
        assert!(reply.contains("2: beta\r\n"));
    }

    #[test]
    fn task_stats_lists_registered_tasks() {
        let ctx = ctx();
        ctx.registry.register("udp_cli", Priority::IDLE).unwrap();
        let reply = interpret("task-stats", &ctx);
        assert!(reply.contains("udp_cli"));
    }

    #[tokio::test]
    async fn interpreter_answers_over_udp() {
        let console = CommandInterpreter::bind(ctx(), 0).await.unwrap();
        let addr = console.local_addr().unwrap();
        let server = tokio::spawn(console.serve());

        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        client.send_to(b"echo-parameters ping", addr).await.unwrap();
        let mut buf = [0u8; MAX_DATAGRAM];
        let (len, _) = timeout(Duration::from_secs(5), client.recv_from(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert!(String::from_utf8_lossy(&buf[..len]).contains("1: ping"));
        server.abort();
    }

    #[tokio::test]
    async fn echo_client_talks_to_echo_server() {
        let echo = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let SocketAddr::V4(server) = echo.local_addr().unwrap() else {
            panic!("expected an IPv4 socket");
        };
        let client = tokio::spawn(run_echo_client("echo_client0".into(), Ipv4Addr::LOCALHOST, server));

        let mut buf = [0u8; MAX_DATAGRAM];
        let (len, peer) = timeout(Duration::from_secs(5), echo.recv_from(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(&buf[..len], b"Message number 0\r\n");
        echo.send_to(&buf[..len], peer).await.unwrap();
        client.abort();
    }

    #[tokio::test]
    async fn echo_client_sends_once_a_second() {
        let echo = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let SocketAddr::V4(server) = echo.local_addr().unwrap() else {
            panic!("expected an IPv4 socket");
        };
        let client = tokio::spawn(run_echo_client("echo_client1".into(), Ipv4Addr::LOCALHOST, server));

        let mut buf = [0u8; MAX_DATAGRAM];
        let (len, peer) = timeout(Duration::from_secs(5), echo.recv_from(&mut buf))
            .await
            .unwrap()
            .unwrap();
        echo.send_to(&buf[..len], peer).await.unwrap();
        let first = tokio::time::Instant::now();

        assert!(
            timeout(Duration::from_millis(500), echo.recv_from(&mut buf)).await.is_err(),
            "second message arrived too early"
        );
        let (len, _) = timeout(Duration::from_secs(5), echo.recv_from(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(&buf[..len], b"Message number 1\r\n");
        assert!(first.elapsed() >= Duration::from_millis(900));
        client.abort();
    }

    #[tokio::test]
    async fn launcher_registers_and_runs_task() {
        let ctx = ctx();
        let mut launcher = NetworkTaskLauncher::new(ctx.clone());
        let spec = NetworkTaskSpec {
            name: "udp_cli".into(),
            kind: NetworkTaskKind::CommandInterpreter { port: 0 },
            priority: Priority::IDLE,
            stack_depth: 260,
        };
        let id = launcher.spawn(&spec).unwrap();
        assert_eq!(ctx.registry.find("udp_cli"), Some(id));
        ctx.registry.abort_all();
    }

    #[test]
    fn launcher_outside_runtime_fails_creation() {
        let mut launcher = NetworkTaskLauncher::new(ctx());
        let spec = NetworkTaskSpec {
            name: "udp_cli".into(),
            kind: NetworkTaskKind::CommandInterpreter { port: 0 },
            priority: Priority::IDLE,
            stack_depth: 260,
        };
        assert!(matches!(
            launcher.spawn(&spec),
            Err(VigilError::TaskCreation { .. })
        ));
    }
}
