//! The control-plane server's protocol logic (spec §4.6 "Control-Plane
//! Server"), grounded on `original_source/src/ctl-server.c` +
//! `include/ctl-server.h`. This module owns command parsing, dispatch, and
//! per-client read/write buffering as plain, non-blocking data structures;
//! it does not open a socket or own an event loop itself — that belongs to
//! the binary that links this crate against `calloop`, matching the
//! "thread a context through every component, no singletons" design already
//! used for wayvnc-core's `WaylandContext`.

use std::collections::VecDeque;

use serde_json::{json, Value};

use crate::commands::{CommandType, EventType};
use crate::json_ipc::Request;

/// `enum send_priority`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendPriority {
    Fifo,
    Immediate,
}

/// `struct cmd_response`. `code == 0` is success; non-zero mirrors an errno
/// value, matching `cmd_ok`/`set_internal_error`'s convention.
#[derive(Debug, Clone)]
pub struct CmdResponse {
    pub code: i32,
    pub data: Option<Value>,
}

impl CmdResponse {
    pub fn ok() -> Self {
        CmdResponse { code: 0, data: None }
    }

    pub fn ok_with(data: Value) -> Self {
        CmdResponse { code: 0, data: Some(data) }
    }

    pub fn error(code: i32, message: impl Into<String>) -> Self {
        CmdResponse { code, data: Some(json!({ "error": message.into() })) }
    }
}

/// `struct ctl_server_client_info`.
#[derive(Debug, Clone)]
pub struct ClientInfo {
    pub id: u64,
    pub hostname: Option<String>,
    pub username: Option<String>,
    pub seat: Option<String>,
}

/// `struct ctl_server_output`.
#[derive(Debug, Clone)]
pub struct OutputInfo {
    pub name: String,
    pub description: String,
    pub height: i32,
    pub width: i32,
    pub captured: bool,
    pub power: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputCycleDirection {
    Forward,
    Backward,
}

/// Replaces `struct ctl_server_actions`' callback vtable with a trait the
/// embedding binary implements against its running wayvnc state.
pub trait ControlServerActions {
    fn on_attach(&mut self, display: &str) -> CmdResponse;
    fn on_detach(&mut self) -> CmdResponse;
    fn on_output_cycle(&mut self, direction: OutputCycleDirection) -> CmdResponse;
    fn on_output_switch(&mut self, output_name: &str) -> CmdResponse;
    fn on_disconnect_client(&mut self, id: &str) -> CmdResponse;
    fn on_wayvnc_exit(&mut self) -> CmdResponse;
    fn clients(&self) -> Vec<ClientInfo>;
    fn outputs(&self) -> Vec<OutputInfo>;
}

/// A parsed, validated control command (`struct cmd` and its subtype
/// siblings collapsed into one enum).
#[derive(Debug, Clone)]
pub enum Cmd {
    Attach { display: String },
    Detach,
    Help { id: Option<String>, id_is_command: bool },
    Version,
    EventReceive,
    ClientList,
    ClientDisconnect { id: String },
    OutputList,
    OutputCycle,
    OutputSet { target: String },
    WayvncExit,
}

fn require_str(params: &Option<Value>, key: &str) -> Result<String, CmdResponse> {
    params
        .as_ref()
        .and_then(|p| p.get(key))
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| CmdResponse::error(libc_einval(), format!("Missing {key}")))
}

fn libc_einval() -> i32 {
    22
}

fn allowed_commands() -> Value {
    Value::Array(crate::commands::all_commands().map(|c| Value::String(c.info().name.to_string())).collect())
}

fn allowed_events() -> Value {
    Value::Array(crate::commands::all_events().map(|e| Value::String(e.info().name.to_string())).collect())
}

/// `parse_command`: validates `request.method`/`request.params` into a
/// [`Cmd`], or a [`CmdResponse`] describing why it couldn't.
pub fn parse_command(request: &Request) -> Result<Cmd, CmdResponse> {
    let Some(command_type) = CommandType::parse_name(&request.method) else {
        return Err(CmdResponse {
            code: 2, // ENOENT
            data: Some(json!({
                "error": format!("Unknown command \"{}\"", request.method),
                "commands": allowed_commands(),
            })),
        });
    };

    let cmd = match command_type {
        CommandType::Attach => Cmd::Attach { display: require_str(&request.params, "display")? },
        CommandType::Detach => Cmd::Detach,
        CommandType::Help => {
            let command = request.params.as_ref().and_then(|p| p.get("command")).and_then(Value::as_str);
            let event = request.params.as_ref().and_then(|p| p.get("event")).and_then(Value::as_str);
            if command.is_some() && event.is_some() {
                return Err(CmdResponse::error(libc_einval(), "expecting exactly one of \"command\" or \"event\""));
            }
            match command {
                Some(name) => Cmd::Help { id: Some(name.to_string()), id_is_command: true },
                None => match event {
                    Some(name) => Cmd::Help { id: Some(name.to_string()), id_is_command: false },
                    None => Cmd::Help { id: None, id_is_command: true },
                },
            }
        }
        CommandType::Version => Cmd::Version,
        CommandType::EventReceive => Cmd::EventReceive,
        CommandType::ClientList => Cmd::ClientList,
        CommandType::ClientDisconnect => Cmd::ClientDisconnect { id: require_str(&request.params, "id")? },
        CommandType::OutputList => Cmd::OutputList,
        CommandType::OutputCycle => Cmd::OutputCycle,
        CommandType::OutputSet => Cmd::OutputSet { target: require_str(&request.params, "output-name")? },
        CommandType::WayvncExit => Cmd::WayvncExit,
    };
    Ok(cmd)
}

fn generate_help_object(id: Option<&str>, id_is_command: bool) -> CmdResponse {
    let info = match id {
        Some(id) if id_is_command => CommandType::parse_name(id).map(|c| *c.info()),
        Some(id) => EventType::parse_name(id).map(|e| e.info()),
        None => None,
    };

    match info {
        None => CmdResponse::ok_with(json!({ "commands": allowed_commands(), "events": allowed_events() })),
        Some(info) => {
            let params: Value = if info.params.is_empty() {
                Value::Null
            } else {
                Value::Object(info.params.iter().map(|p| (p.name.to_string(), Value::String(p.help.to_string()))).collect())
            };
            CmdResponse::ok_with(json!({ info.name: { "description": info.description, "params": params } }))
        }
    }
}

fn generate_version_object(wayvnc_version: &str, neatvnc_version: &str) -> CmdResponse {
    CmdResponse::ok_with(json!({ "wayvnc": wayvnc_version, "neatvnc": neatvnc_version }))
}

fn generate_client_list(clients: Vec<ClientInfo>) -> CmdResponse {
    let list: Vec<Value> = clients
        .into_iter()
        .map(|c| {
            let mut entry = json!({ "id": c.id.to_string() });
            if let Some(h) = c.hostname {
                entry["hostname"] = Value::String(h);
            }
            if let Some(u) = c.username {
                entry["username"] = Value::String(u);
            }
            if let Some(s) = c.seat {
                entry["seat"] = Value::String(s);
            }
            entry
        })
        .collect();
    CmdResponse::ok_with(Value::Array(list))
}

fn generate_output_list(outputs: Vec<OutputInfo>) -> CmdResponse {
    let list: Vec<Value> = outputs
        .into_iter()
        .map(|o| {
            json!({
                "name": o.name,
                "description": o.description,
                "height": o.height,
                "width": o.width,
                "captured": o.captured,
                "power": o.power,
            })
        })
        .collect();
    CmdResponse::ok_with(Value::Array(list))
}

/// `ctl_server_dispatch_cmd`. `accept_events` is the dispatching client's
/// flag (`client->accept_events`), flipped in place for `event-receive`.
pub fn dispatch_cmd(
    actions: &mut dyn ControlServerActions,
    cmd: Cmd,
    accept_events: &mut bool,
    wayvnc_version: &str,
    neatvnc_version: &str,
) -> CmdResponse {
    match cmd {
        Cmd::Attach { display } => actions.on_attach(&display),
        Cmd::Detach => actions.on_detach(),
        Cmd::Help { id, id_is_command } => generate_help_object(id.as_deref(), id_is_command),
        Cmd::OutputSet { target } => actions.on_output_switch(&target),
        Cmd::ClientDisconnect { id } => actions.on_disconnect_client(&id),
        Cmd::WayvncExit => actions.on_wayvnc_exit(),
        Cmd::Version => generate_version_object(wayvnc_version, neatvnc_version),
        Cmd::EventReceive => {
            *accept_events = true;
            CmdResponse::ok()
        }
        Cmd::ClientList => generate_client_list(actions.clients()),
        Cmd::OutputList => generate_output_list(actions.outputs()),
        Cmd::OutputCycle => actions.on_output_cycle(OutputCycleDirection::Forward),
    }
}

/// Spec §4.6 "unsolicited events". Built with [`pack_connection_event`]/
/// [`capture_changed_event`]/`detached_event` and handed to
/// [`broadcast_event`], which mirrors `ctl_server_enqueue_event`'s
/// `accept_events`-gated fan-out.
#[derive(Debug, Clone)]
pub enum ServerEvent {
    ClientConnected { info: ClientInfo, connection_count: i32 },
    ClientDisconnected { info: ClientInfo, connection_count: i32 },
    CaptureChanged { output_name: String },
    Detached,
}

impl ServerEvent {
    fn name(&self) -> &'static str {
        match self {
            ServerEvent::ClientConnected { .. } => EventType::ClientConnected.info().name,
            ServerEvent::ClientDisconnected { .. } => EventType::ClientDisconnected.info().name,
            ServerEvent::CaptureChanged { .. } => EventType::CaptureChanged.info().name,
            ServerEvent::Detached => EventType::Detached.info().name,
        }
    }

    /// `pack_connection_event_params` / the per-event param packing inlined
    /// into each `ctl_server_event_*` entry point.
    fn params(&self) -> Value {
        match self {
            ServerEvent::ClientConnected { info, connection_count } | ServerEvent::ClientDisconnected { info, connection_count } => {
                let mut params = json!({ "id": info.id.to_string(), "connection_count": connection_count });
                if let Some(h) = &info.hostname {
                    params["hostname"] = Value::String(h.clone());
                }
                if let Some(u) = &info.username {
                    params["username"] = Value::String(u.clone());
                }
                if let Some(s) = &info.seat {
                    params["seat"] = Value::String(s.clone());
                }
                params
            }
            ServerEvent::CaptureChanged { output_name } => json!({ "output": output_name }),
            ServerEvent::Detached => Value::Object(Default::default()),
        }
    }

    /// `jsonipc_event_new` + `jsonipc_request_pack`: events ride the same
    /// request envelope as commands, with `method` set to the event name and
    /// no `id` (it's unsolicited, not a reply to anything).
    pub fn to_value(&self) -> Value {
        json!({ "method": self.name(), "params": self.params() })
    }
}

/// `ctl_server_enqueue_event`'s fan-out: every connection with
/// `accept_events` set gets the event appended (`SEND_FIFO`); others are
/// skipped. Returns how many connections it was enqueued to.
pub fn broadcast_event<'a>(clients: impl Iterator<Item = &'a mut ClientConnection>, event: &ServerEvent) -> usize {
    let packed = event.to_value();
    let mut count = 0;
    for client in clients {
        if client.accept_events {
            client.enqueue(packed.clone(), SendPriority::Fifo);
            count += 1;
        }
    }
    count
}

/// Bytes a single client connection is allowed to hold unconsumed before
/// `feed` reports overflow (`self->read_buffer[512]`).
const READ_BUFFER_CAPACITY: usize = 512;

/// Per-client protocol state (`struct ctl_client`, minus the fd and `aml`
/// handler — those belong to the owning event loop). Tracks inbound bytes
/// not yet resolved into a complete JSON object and a FIFO/priority queue of
/// outbound messages not yet handed to the socket.
pub struct ClientConnection {
    read_buffer: Vec<u8>,
    outgoing: VecDeque<Value>,
    pub accept_events: bool,
    drop_after_next_send: bool,
}

impl Default for ClientConnection {
    fn default() -> Self {
        ClientConnection {
            read_buffer: Vec::new(),
            outgoing: VecDeque::new(),
            accept_events: false,
            drop_after_next_send: false,
        }
    }
}

impl ClientConnection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends freshly-read bytes. Mirrors `client_read`'s overflow check:
    /// a client that never completes a JSON object within
    /// [`READ_BUFFER_CAPACITY`] bytes gets a hard error.
    pub fn feed(&mut self, bytes: &[u8]) -> Result<(), CmdResponse> {
        if self.read_buffer.len() + bytes.len() > READ_BUFFER_CAPACITY {
            return Err(CmdResponse::error(5 /* EIO */, "Buffer overflow"));
        }
        self.read_buffer.extend_from_slice(bytes);
        Ok(())
    }

    /// Pulls the next complete JSON-IPC request out of the buffer, if any.
    /// `client_next_object`: a premature-EOF parse is "awaiting more data",
    /// not an error; any other parse failure is fatal to the connection.
    pub fn next_request(&mut self) -> Result<Option<Request>, CmdResponse> {
        if self.read_buffer.is_empty() {
            return Ok(None);
        }

        let mut de = serde_json::Deserializer::from_slice(&self.read_buffer).into_iter::<Request>();
        match de.next() {
            None => Ok(None),
            Some(Ok(request)) => {
                let consumed = de.byte_offset();
                self.read_buffer.drain(0..consumed);
                Ok(Some(request))
            }
            Some(Err(e)) if e.is_eof() => Ok(None),
            Some(Err(e)) => Err(CmdResponse::error(22 /* EINVAL */, e.to_string())),
        }
    }

    /// `client_enqueue`: `SEND_IMMEDIATE` jumps the queue, `SEND_FIFO`
    /// appends.
    pub fn enqueue(&mut self, message: Value, priority: SendPriority) {
        match priority {
            SendPriority::Immediate => self.outgoing.push_front(message),
            SendPriority::Fifo => self.outgoing.push_back(message),
        }
    }

    pub fn has_outgoing(&self) -> bool {
        !self.outgoing.is_empty()
    }

    /// `send_ready`'s queue-draining half: hands back the next message
    /// serialized as a compact JSON line. Partial-write retry is the
    /// caller's concern since it owns the actual socket.
    pub fn pop_outgoing(&mut self) -> Option<Vec<u8>> {
        self.outgoing.pop_front().map(|v| serde_json::to_vec(&v).expect("Value always serializes"))
    }

    /// `client->drop_after_next_send`: set after queuing a fatal error so
    /// the caller disconnects once it drains.
    pub fn mark_drop_after_next_send(&mut self) {
        self.drop_after_next_send = true;
    }

    pub fn should_drop_after_drain(&self) -> bool {
        self.drop_after_next_send && !self.has_outgoing()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeActions {
        attached: Option<String>,
        clients: Vec<ClientInfo>,
        outputs: Vec<OutputInfo>,
    }

    impl ControlServerActions for FakeActions {
        fn on_attach(&mut self, display: &str) -> CmdResponse {
            self.attached = Some(display.to_string());
            CmdResponse::ok()
        }
        fn on_detach(&mut self) -> CmdResponse {
            self.attached = None;
            CmdResponse::ok()
        }
        fn on_output_cycle(&mut self, _direction: OutputCycleDirection) -> CmdResponse {
            CmdResponse::ok()
        }
        fn on_output_switch(&mut self, _output_name: &str) -> CmdResponse {
            CmdResponse::ok()
        }
        fn on_disconnect_client(&mut self, _id: &str) -> CmdResponse {
            CmdResponse::ok()
        }
        fn on_wayvnc_exit(&mut self) -> CmdResponse {
            CmdResponse::ok()
        }
        fn clients(&self) -> Vec<ClientInfo> {
            self.clients.clone()
        }
        fn outputs(&self) -> Vec<OutputInfo> {
            self.outputs.clone()
        }
    }

    fn actions() -> FakeActions {
        FakeActions { attached: None, clients: Vec::new(), outputs: Vec::new() }
    }

    #[test]
    fn unknown_method_lists_allowed_commands() {
        let request = Request::new(Some(json!(1)), "not-a-real-command", None).unwrap();
        let err = parse_command(&request).unwrap_err();
        assert_eq!(err.code, 2);
        assert!(err.data.unwrap()["commands"].as_array().unwrap().iter().any(|v| v == "attach"));
    }

    #[test]
    fn attach_without_display_param_is_a_validation_error() {
        let request = Request::new(None, "attach", None).unwrap();
        let err = parse_command(&request).unwrap_err();
        assert_eq!(err.code, 22);
    }

    #[test]
    fn attach_dispatches_to_the_actions_trait() {
        let request = Request::new(None, "attach", Some(json!({ "display": "wayland-1" }))).unwrap();
        let cmd = parse_command(&request).unwrap();
        let mut actions = actions();
        let mut accept_events = false;
        dispatch_cmd(&mut actions, cmd, &mut accept_events, "1.0", "1.0");
        assert_eq!(actions.attached.as_deref(), Some("wayland-1"));
    }

    #[test]
    fn event_receive_flips_accept_events_on_the_connection() {
        let request = Request::new(None, "event-receive", None).unwrap();
        let cmd = parse_command(&request).unwrap();
        let mut actions = actions();
        let mut accept_events = false;
        let response = dispatch_cmd(&mut actions, cmd, &mut accept_events, "1.0", "1.0");
        assert!(accept_events);
        assert_eq!(response.code, 0);
    }

    #[test]
    fn help_with_no_id_lists_commands_and_events() {
        let response = generate_help_object(None, true);
        let data = response.data.unwrap();
        assert!(data["commands"].is_array());
        assert!(data["events"].is_array());
    }

    #[test]
    fn help_for_a_known_command_describes_its_params() {
        let response = generate_help_object(Some("attach"), true);
        let data = response.data.unwrap();
        assert!(data["attach"]["params"]["display"].is_string());
    }

    #[test]
    fn client_connection_splits_concatenated_requests() {
        let mut conn = ClientConnection::new();
        let r1 = Request::new(Some(json!(1)), "version", None).unwrap().to_line();
        let r2 = Request::new(Some(json!(2)), "detach", None).unwrap().to_line();
        conn.feed(format!("{r1}{r2}").as_bytes()).unwrap();

        let first = conn.next_request().unwrap().unwrap();
        assert_eq!(first.method, "version");
        let second = conn.next_request().unwrap().unwrap();
        assert_eq!(second.method, "detach");
        assert!(conn.next_request().unwrap().is_none());
    }

    #[test]
    fn client_connection_waits_for_more_data_on_a_partial_object() {
        let mut conn = ClientConnection::new();
        conn.feed(br#"{"method": "ver"#).unwrap();
        assert!(conn.next_request().unwrap().is_none());
    }

    #[test]
    fn client_connection_reports_overflow_past_the_read_buffer_cap() {
        let mut conn = ClientConnection::new();
        let big = vec![b'a'; READ_BUFFER_CAPACITY + 1];
        let err = conn.feed(&big).unwrap_err();
        assert_eq!(err.code, 5);
    }

    #[test]
    fn immediate_priority_jumps_ahead_of_fifo_queued_messages() {
        let mut conn = ClientConnection::new();
        conn.enqueue(json!("first"), SendPriority::Fifo);
        conn.enqueue(json!("urgent"), SendPriority::Immediate);
        assert_eq!(conn.pop_outgoing().unwrap(), serde_json::to_vec(&json!("urgent")).unwrap());
        assert_eq!(conn.pop_outgoing().unwrap(), serde_json::to_vec(&json!("first")).unwrap());
    }

    #[test]
    fn broadcast_event_skips_clients_that_never_registered() {
        let mut subscribed = ClientConnection::new();
        subscribed.accept_events = true;
        let mut quiet = ClientConnection::new();

        let event = ServerEvent::CaptureChanged { output_name: "eDP-1".to_string() };
        let count = broadcast_event([&mut subscribed, &mut quiet].into_iter(), &event);

        assert_eq!(count, 1);
        assert!(subscribed.has_outgoing());
        assert!(!quiet.has_outgoing());
    }

    #[test]
    fn client_connected_event_omits_absent_optional_fields() {
        let info = ClientInfo { id: 7, hostname: None, username: None, seat: None };
        let event = ServerEvent::ClientConnected { info, connection_count: 1 };
        let value = event.to_value();
        assert_eq!(value["method"], "client-connected");
        assert!(value["params"].get("hostname").is_none());
        assert_eq!(value["params"]["id"], "7");
    }

    #[test]
    fn drop_after_next_send_only_fires_once_the_queue_drains() {
        let mut conn = ClientConnection::new();
        conn.enqueue(json!("bye"), SendPriority::Fifo);
        conn.mark_drop_after_next_send();
        assert!(!conn.should_drop_after_drain());
        conn.pop_outgoing();
        assert!(conn.should_drop_after_drain());
    }
}
