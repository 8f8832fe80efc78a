//! `wayvncctl`: the control-plane client (spec §6 "CLI surface" / §4.7).
//! Parses `--socket`/`--wait`/`--reconnect`/`--json`/`--version`/`--verbose`/
//! `--help` plus a subcommand positional that absorbs the rest of argv, then
//! builds and sends one JSON-IPC request per invocation (or, for
//! `event-receive`, loops printing pushed events).

use std::path::PathBuf;
use std::time::Duration;

use serde_json::Value;

use wayvnc_ctl::client::{ConnectTimeout, ControlClient};
use wayvnc_ctl::commands::CommandType;
use wayvnc_ctl::json_ipc::Request;
use wayvnc_ctl::option_parser::{OptionParser, OptionSpec};
use wayvnc_ctl::socket;

static TOP_LEVEL_OPTIONS: &[OptionSpec] = &[
    OptionSpec {
        short_opt: Some('S'),
        long_opt: Some("socket"),
        schema: Some("<path>"),
        help: "Control socket path",
        default: None,
        positional: false,
        is_subcommand: false,
    },
    OptionSpec {
        short_opt: Some('w'),
        long_opt: Some("wait"),
        schema: None,
        help: "Wait for the control socket to appear instead of failing immediately",
        default: None,
        positional: false,
        is_subcommand: false,
    },
    OptionSpec {
        short_opt: None,
        long_opt: Some("reconnect"),
        schema: None,
        help: "Reconnect and re-register for events if the connection drops",
        default: None,
        positional: false,
        is_subcommand: false,
    },
    OptionSpec {
        short_opt: Some('j'),
        long_opt: Some("json"),
        schema: None,
        help: "Print compact JSON instead of a human-friendly rendering",
        default: None,
        positional: false,
        is_subcommand: false,
    },
    OptionSpec {
        short_opt: Some('V'),
        long_opt: Some("version"),
        schema: None,
        help: "Print the wayvncctl version",
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
    OptionSpec {
        short_opt: None,
        long_opt: None,
        schema: Some("<command>"),
        help: "The control command to run",
        default: None,
        positional: true,
        is_subcommand: true,
    },
];

fn main() {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let mut options = OptionParser::new("wayvncctl", TOP_LEVEL_OPTIONS);
    if let Err(e) = options.parse(&args) {
        eprintln!("{e}");
        std::process::exit(1);
    }

    if options.is_set("version") {
        println!("wayvncctl {}", env!("CARGO_PKG_VERSION"));
        return;
    }

    if options.is_set("help") && options.remaining.is_empty() {
        print_top_level_usage(&options);
        return;
    }

    let Some(command_name) = options.get_positional(0).map(str::to_string) else {
        print_top_level_usage(&options);
        std::process::exit(1);
    };
    let command_args = &options.remaining;

    let Some(command) = CommandType::parse_name(&command_name) else {
        eprintln!("Unknown command \"{command_name}\"");
        std::process::exit(1);
    };

    let param_specs = build_param_specs(command);
    let mut command_options = OptionParser::new(command.info().name, leak(param_specs));
    if let Err(e) = command_options.parse(command_args) {
        eprintln!("{e}");
        std::process::exit(1);
    }

    let params = if command.info().params.is_empty() {
        None
    } else {
        let mut object = serde_json::Map::new();
        for param in command.info().params {
            if let Some(value) = command_options.get_value(param.name) {
                object.insert(param.name.to_string(), Value::String(value.to_string()));
            }
        }
        Some(Value::Object(object))
    };

    let socket_path = options.get_value("socket").map(PathBuf::from).unwrap_or_else(socket::default_socket_path);
    let connect_timeout = if options.is_set("wait") { ConnectTimeout::Forever } else { ConnectTimeout::Immediate };

    let mut client = match ControlClient::connect(&socket_path, connect_timeout) {
        Ok(client) => client,
        Err(e) => {
            eprintln!("Failed to connect to {}: {e}", socket_path.display());
            std::process::exit(1);
        }
    };

    if matches!(command, CommandType::EventReceive) {
        run_event_loop(&mut client, options.is_set("json"), options.is_set("reconnect"), &socket_path, connect_timeout);
        return;
    }

    let request = Request::new(Some(Value::from(1)), command.info().name, params).expect("well-formed request");
    match client.call(&request) {
        Ok(data) => {
            print_result(data, options.is_set("json"));
        }
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(1);
        }
    }
}

fn build_param_specs(command: CommandType) -> Vec<OptionSpec> {
    command
        .info()
        .params
        .iter()
        .map(|param| OptionSpec {
            short_opt: None,
            long_opt: Some(Box::leak(param.name.to_string().into_boxed_str())),
            schema: Some(param.schema),
            help: param.help,
            default: None,
            positional: param.positional,
            is_subcommand: false,
        })
        .collect()
}

/// [`OptionParser`] borrows a `'static` table; a per-invocation command's
/// param specs are built once and live for the remainder of the process, so
/// leaking them is the simplest way to satisfy that bound for a short-lived
/// CLI tool.
fn leak(specs: Vec<OptionSpec>) -> &'static [OptionSpec] {
    Box::leak(specs.into_boxed_slice())
}

fn print_top_level_usage(options: &OptionParser) {
    println!("Usage: {} [options] <command> [args]", options.name());
    print!("{}", options.print_options());
    println!("\nCommands:");
    for command in wayvnc_ctl::commands::all_commands() {
        println!("  {:<20} {}", command.info().name, command.info().description);
    }
}

fn print_result(data: Option<Value>, json: bool) {
    let Some(data) = data else { return };
    if json {
        println!("{data}");
    } else {
        println!("{}", serde_json::to_string_pretty(&data).unwrap_or_else(|_| data.to_string()));
    }
}

fn run_event_loop(
    client: &mut ControlClient,
    json: bool,
    reconnect: bool,
    socket_path: &std::path::Path,
    connect_timeout: ConnectTimeout,
) {
    loop {
        if client.register_for_events().is_ok() {
            print_event(&serde_json::json!({ "method": "wayvnc-startup", "params": {} }), json);
        }

        loop {
            match client.next_event(Duration::from_secs(3600)) {
                Ok(Some(event)) => print_event(&serde_json::to_value(&event).unwrap_or(Value::Null), json),
                Ok(None) => continue,
                Err(_) => break,
            }
        }

        print_event(&serde_json::json!({ "method": "wayvnc-shutdown", "params": {} }), json);
        if !reconnect {
            break;
        }
        match ControlClient::connect(socket_path, connect_timeout) {
            Ok(reconnected) => *client = reconnected,
            Err(_) => break,
        }
    }
}

fn print_event(event: &Value, json: bool) {
    if json {
        println!("{event}");
    } else {
        println!("{}", serde_json::to_string_pretty(event).unwrap_or_else(|_| event.to_string()));
    }
}
