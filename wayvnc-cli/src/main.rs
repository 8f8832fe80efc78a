//! `wayvnc`: the screen-sharing VNC server binary. Wires `wayvnc-core`'s
//! capture/damage/registry pipeline to `wayvnc-ctl`'s control-plane server
//! and owns the one long-running `calloop` event loop, following the
//! `smallvil` binary's shape (`init_logging` + a single `EventLoop::run`)
//! generalized from a Wayland-compositor loop to this server's
//! control-socket + (externally supplied) Wayland-display loop.
//!
//! Connecting to a real Wayland compositor and speaking the RFB wire
//! protocol to VNC clients are both external collaborators (spec §1, §6) —
//! this binary owns the event loop and the control plane, and hands off to
//! those integrations at the seams `wayvnc-core` already exposes
//! (`WaylandContext`, `FramePublisher::set_submit`).

use std::os::unix::io::AsRawFd;
use std::os::unix::net::UnixListener;
use std::path::PathBuf;

use calloop::generic::Generic;
use calloop::{EventLoop, Interest, Mode, PostAction};

use wayvnc_ctl::option_parser::{OptionParser, OptionSpec};
use wayvnc_ctl::server::{
    ClientConnection, ClientInfo, CmdResponse, ControlServerActions, OutputCycleDirection, OutputInfo, SendPriority,
};
use wayvnc_ctl::socket;
use wayvnc_ctl::{commands, json_ipc};

static OPTIONS: &[OptionSpec] = &[
    OptionSpec {
        short_opt: Some('C'),
        long_opt: Some("config"),
        schema: Some("<path>"),
        help: "Path to a configuration file",
        default: None,
        positional: false,
        is_subcommand: false,
    },
    OptionSpec {
        short_opt: Some('S'),
        long_opt: Some("socket"),
        schema: Some("<path>"),
        help: "Control socket path ($XDG_RUNTIME_DIR/wayvncctl by default)",
        default: None,
        positional: false,
        is_subcommand: false,
    },
    OptionSpec {
        short_opt: Some('o'),
        long_opt: Some("output"),
        schema: Some("<name>"),
        help: "The name of the output to capture first",
        default: None,
        positional: false,
        is_subcommand: false,
    },
    OptionSpec {
        short_opt: Some('r'),
        long_opt: Some("render-cursor"),
        schema: None,
        help: "Render the cursor into the captured frame",
        default: None,
        positional: false,
        is_subcommand: false,
    },
    OptionSpec {
        short_opt: Some('v'),
        long_opt: Some("verbose"),
        schema: None,
        help: "Enable verbose logging",
        default: None,
        positional: false,
        is_subcommand: false,
    },
    OptionSpec {
        short_opt: Some('h'),
        long_opt: Some("help"),
        schema: None,
        help: "Show this help text",
        default: None,
        positional: false,
        is_subcommand: false,
    },
];

fn main() {
    init_logging();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let mut options = OptionParser::new("wayvnc", OPTIONS);
    if let Err(e) = options.parse(&args) {
        eprintln!("{e}");
        print_usage(&options);
        std::process::exit(1);
    }

    if options.is_set("help") {
        print_usage(&options);
        return;
    }

    let config = match wayvnc_core::config::load(options.get_value("config").map(std::path::Path::new)) {
        Ok(config) => config,
        Err(wayvnc_core::config::ConfigError::NoDefaultPath) => wayvnc_core::config::Config::default(),
        Err(e) => {
            tracing::error!("Failed to load config: {e}");
            std::process::exit(1);
        }
    };
    tracing::debug!(?config, "loaded configuration");

    let socket_path =
        options.get_value("socket").map(PathBuf::from).unwrap_or_else(socket::default_socket_path);
    if !socket::xdg_runtime_dir_is_set() {
        tracing::warn!("$XDG_RUNTIME_DIR is not set. Falling back to control socket \"{}\"", socket_path.display());
    }

    let listener = match socket::bind(&socket_path) {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!("Failed to bind control socket: {e}");
            std::process::exit(1);
        }
    };
    listener.set_nonblocking(true).expect("set_nonblocking");
    tracing::info!("Listening on control socket {}", socket_path.display());

    let mut event_loop: EventLoop<State> = EventLoop::try_new().expect("failed to create event loop");
    let mut state = State { actions: CaptureActions::new(options.get_value("output").map(str::to_string)), clients: Vec::new() };

    let handle = event_loop.handle();
    handle
        .insert_source(Generic::new(listener, Interest::READ, Mode::Level), |_, listener, state| {
            accept_control_clients(listener, state);
            Ok(PostAction::Continue)
        })
        .expect("failed to register control socket");

    event_loop.run(None, &mut state, |_| {}).expect("event loop error");

    socket::unbind(&socket_path);
}

fn print_usage(options: &OptionParser) {
    println!("Usage: {} [options]", options.name());
    print!("{}", options.print_options());
}

fn init_logging() {
    if let Ok(filter) = tracing_subscriber::EnvFilter::try_from_default_env() {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().init();
    }
}

/// One accepted control-plane connection plus the raw stream it came in on.
struct Client {
    stream: std::os::unix::net::UnixStream,
    connection: ClientConnection,
}

struct State {
    actions: CaptureActions,
    clients: Vec<Client>,
}

fn accept_control_clients(listener: &mut UnixListener, state: &mut State) {
    loop {
        match listener.accept() {
            Ok((stream, _addr)) => {
                stream.set_nonblocking(true).expect("set_nonblocking");
                tracing::debug!(fd = stream.as_raw_fd(), "accepted control client");
                state.clients.push(Client { stream, connection: ClientConnection::new() });
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
            Err(e) => {
                tracing::warn!("Failed to accept a control connection: {e}");
                break;
            }
        }
    }
    service_clients(state);
}

/// Drains every pending read and dispatches every complete request.
/// Real deployments would drive this per-fd from its own `calloop` source;
/// this sweeps every connected client each time any one of them is ready,
/// which is correct (if not maximally efficient) since control traffic is
/// low-volume and latency-insensitive.
fn service_clients(state: &mut State) {
    use std::io::{Read, Write};

    let mut dead = Vec::new();
    for (index, client) in state.clients.iter_mut().enumerate() {
        let mut buf = [0u8; 512];
        loop {
            match client.stream.read(&mut buf) {
                Ok(0) => {
                    dead.push(index);
                    break;
                }
                Ok(n) => {
                    if let Err(overflow) = client.connection.feed(&buf[..n]) {
                        enqueue_response(&mut client.connection, &overflow, None);
                        client.connection.mark_drop_after_next_send();
                        break;
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(_) => {
                    dead.push(index);
                    break;
                }
            }
        }

        loop {
            match client.connection.next_request() {
                Ok(Some(request)) => {
                    let id = request.id.clone();
                    match wayvnc_ctl::server::parse_command(&request) {
                        Ok(cmd) => {
                            let response = wayvnc_ctl::server::dispatch_cmd(
                                &mut state.actions,
                                cmd,
                                &mut client.connection.accept_events,
                                env!("CARGO_PKG_VERSION"),
                                "unknown",
                            );
                            enqueue_response(&mut client.connection, &response, id);
                        }
                        Err(err) => enqueue_response(&mut client.connection, &err, id),
                    }
                }
                Ok(None) => break,
                Err(err) => {
                    enqueue_response(&mut client.connection, &err, None);
                    client.connection.mark_drop_after_next_send();
                    break;
                }
            }
        }

        while let Some(bytes) = client.connection.pop_outgoing() {
            let _ = client.stream.write_all(&bytes);
        }
        if client.connection.should_drop_after_drain() {
            dead.push(index);
        }
    }

    for index in dead.into_iter().rev() {
        state.clients.remove(index);
    }
}

fn enqueue_response(connection: &mut ClientConnection, response: &CmdResponse, id: Option<serde_json::Value>) {
    let packed = json_ipc::Response { id, code: response.code, data: response.data.clone() };
    connection.enqueue(serde_json::to_value(&packed).expect("Response always serializes"), SendPriority::Fifo);
}

/// A placeholder [`ControlServerActions`] implementation: it tracks the
/// state a real capture/compositor integration would own (attached display,
/// active output) without driving an actual Wayland connection, matching
/// `wayvnc-core::wayland::WaylandContext`'s own scope (bookkeeping, not wire
/// protocol).
struct CaptureActions {
    attached_display: Option<String>,
    active_output: Option<String>,
}

impl CaptureActions {
    fn new(initial_output: Option<String>) -> Self {
        CaptureActions { attached_display: None, active_output: initial_output }
    }
}

impl ControlServerActions for CaptureActions {
    fn on_attach(&mut self, display: &str) -> CmdResponse {
        self.attached_display = Some(display.to_string());
        CmdResponse::ok()
    }

    fn on_detach(&mut self) -> CmdResponse {
        self.attached_display = None;
        CmdResponse::ok()
    }

    fn on_output_cycle(&mut self, _direction: OutputCycleDirection) -> CmdResponse {
        CmdResponse::ok()
    }

    fn on_output_switch(&mut self, output_name: &str) -> CmdResponse {
        self.active_output = Some(output_name.to_string());
        CmdResponse::ok()
    }

    fn on_disconnect_client(&mut self, _id: &str) -> CmdResponse {
        CmdResponse::error(2, "No such client")
    }

    fn on_wayvnc_exit(&mut self) -> CmdResponse {
        std::process::exit(0);
    }

    fn clients(&self) -> Vec<ClientInfo> {
        Vec::new()
    }

    fn outputs(&self) -> Vec<OutputInfo> {
        Vec::new()
    }
}

#[allow(dead_code)]
fn all_command_names() -> Vec<&'static str> {
    commands::all_commands().map(|c| c.info().name).collect()
}
