//! The control-plane command and event tables (spec §4.6 "Commands" / §4.6
//! "Events"), grounded on `original_source/src/ctl-commands.c` +
//! `include/ctl-commands.h`: a fixed table of every `method` a control
//! client may invoke and every unsolicited event the server may emit, each
//! with its declared parameters for `--help`/`help` output.

/// One declared parameter of a [`Command`] or [`Event`]. Mirrors the
/// parameter entries nested in `ctl_command_list`/`ctl_event_list`
/// (`{name, help, schema, positional}`).
#[derive(Debug, Clone, Copy)]
pub struct ParamInfo {
    pub name: &'static str,
    pub help: &'static str,
    pub schema: &'static str,
    pub positional: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct CommandInfo {
    pub name: &'static str,
    pub description: &'static str,
    pub params: &'static [ParamInfo],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandType {
    Attach,
    Detach,
    Help,
    Version,
    EventReceive,
    ClientList,
    ClientDisconnect,
    OutputList,
    OutputCycle,
    OutputSet,
    WayvncExit,
}

impl CommandType {
    pub fn info(self) -> &'static CommandInfo {
        &COMMAND_LIST[self.index()]
    }

    fn index(self) -> usize {
        ALL_COMMANDS.iter().position(|c| *c == self).expect("every CommandType has a table entry")
    }

    /// `ctl_command_parse_name`.
    pub fn parse_name(name: &str) -> Option<Self> {
        if name.is_empty() {
            return None;
        }
        ALL_COMMANDS.iter().find(|c| c.info().name == name).copied()
    }
}

const ALL_COMMANDS: &[CommandType] = &[
    CommandType::Attach,
    CommandType::Detach,
    CommandType::Help,
    CommandType::Version,
    CommandType::EventReceive,
    CommandType::ClientList,
    CommandType::ClientDisconnect,
    CommandType::OutputList,
    CommandType::OutputCycle,
    CommandType::OutputSet,
    CommandType::WayvncExit,
];

static COMMAND_LIST: &[CommandInfo] = &[
    CommandInfo {
        name: "attach",
        description: "Attach to a running wayland compositor",
        params: &[ParamInfo { name: "display", help: "Display name", schema: "<name>", positional: true }],
    },
    CommandInfo { name: "detach", description: "Detach from the wayland compositor", params: &[] },
    CommandInfo {
        name: "help",
        description: "List all commands and events, or show usage of a specific command or event",
        params: &[
            ParamInfo { name: "command", help: "The command to show (optional)", schema: "<name>", positional: false },
            ParamInfo { name: "event", help: "The event to show (optional)", schema: "<name>", positional: false },
        ],
    },
    CommandInfo { name: "version", description: "Query the version of the wayvnc process", params: &[] },
    CommandInfo {
        name: "event-receive",
        description: "Register to begin receiving asynchronous events from wayvnc",
        params: &[],
    },
    CommandInfo {
        name: "client-list",
        description: "Return a list of all currently connected VNC sessions",
        params: &[],
    },
    CommandInfo {
        name: "client-disconnect",
        description: "Disconnect a VNC session",
        params: &[ParamInfo { name: "id", help: "The ID of the client to disconnect", schema: "<integer>", positional: true }],
    },
    CommandInfo {
        name: "output-list",
        description: "Return a list of all currently detected Wayland outputs",
        params: &[],
    },
    CommandInfo {
        name: "output-cycle",
        description: "Cycle the actively captured output to the next available output, wrapping through all outputs.",
        params: &[],
    },
    CommandInfo {
        name: "output-set",
        description: "Switch the actively captured output",
        params: &[ParamInfo { name: "output-name", help: "The specific output name to capture", schema: "<string>", positional: true }],
    },
    CommandInfo {
        name: "wayvnc-exit",
        description: "Disconnect all clients and shut down wayvnc",
        params: &[],
    },
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    CaptureChanged,
    ClientConnected,
    ClientDisconnected,
    Detached,
}

const ALL_EVENTS: &[EventType] =
    &[EventType::CaptureChanged, EventType::ClientConnected, EventType::ClientDisconnected, EventType::Detached];

impl EventType {
    pub fn info(self) -> CommandInfo {
        match self {
            EventType::CaptureChanged => CommandInfo {
                name: "capture-changed",
                description: "Sent by wayvnc when the captured output is changed",
                params: &[ParamInfo {
                    name: "output-name",
                    help: "The name of the output now being captured",
                    schema: "<string>",
                    positional: false,
                }],
            },
            EventType::ClientConnected => CommandInfo {
                name: "client-connected",
                description: "Sent by wayvnc when a new VNC client connects",
                params: CLIENT_CONNECTED_PARAMS,
            },
            EventType::ClientDisconnected => CommandInfo {
                name: "client-disconnected",
                description: "Sent by wayvnc when a VNC client disconnects",
                params: CLIENT_DISCONNECTED_PARAMS,
            },
            EventType::Detached => {
                CommandInfo { name: "detached", description: "Sent after detaching from compositor", params: &[] }
            }
        }
    }

    /// `ctl_event_parse_name`.
    pub fn parse_name(name: &str) -> Option<Self> {
        if name.is_empty() {
            return None;
        }
        ALL_EVENTS.iter().find(|e| e.info().name == name).copied()
    }
}

static CLIENT_CONNECTED_PARAMS: &[ParamInfo] = &[
    ParamInfo { name: "id", help: "A unique identifier for this client", schema: "<integer>", positional: false },
    ParamInfo {
        name: "connection_count",
        help: "The total number of connected VNC clients including this one.",
        schema: "<integer>",
        positional: false,
    },
    ParamInfo {
        name: "hostname",
        help: "The hostname or IP address of this client (may be null)",
        schema: "<name|ip>",
        positional: false,
    },
    ParamInfo {
        name: "username",
        help: "The username used to authenticate this client (may be null).",
        schema: "<string>",
        positional: false,
    },
];

static CLIENT_DISCONNECTED_PARAMS: &[ParamInfo] = &[
    ParamInfo { name: "id", help: "A unique identifier for this client", schema: "<integer>", positional: false },
    ParamInfo {
        name: "connection_count",
        help: "The total number of connected VNC clients not including this one.",
        schema: "<integer>",
        positional: false,
    },
    ParamInfo {
        name: "hostname",
        help: "The hostname or IP address of this client (may be null)",
        schema: "<name|ip>",
        positional: false,
    },
    ParamInfo {
        name: "username",
        help: "The username used to authenticate this client (may be null).",
        schema: "<string>",
        positional: false,
    },
];

pub fn all_commands() -> impl Iterator<Item = CommandType> {
    ALL_COMMANDS.iter().copied()
}

pub fn all_events() -> impl Iterator<Item = EventType> {
    ALL_EVENTS.iter().copied()
}
