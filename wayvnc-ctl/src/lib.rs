//! The wayvnc control-plane protocol (spec §4.6/§4.7/§4.8): JSON-IPC
//! request/response framing, the command and event tables, command-line
//! option parsing, and the server- and client-side protocol state machines
//! built on top of them.
//!
//! Grounded on `original_source/src/{json-ipc,ctl-commands,ctl-server,
//! ctl-client,option-parser,table-printer}.c`. This crate owns protocol
//! logic only — binding sockets and registering them with an event loop is
//! [`socket::bind`] (a one-shot, synchronous operation) for the server side,
//! and a plain blocking `std::os::unix::net::UnixStream` for the short-lived
//! client side; the long-running `calloop` event loop itself belongs to
//! `wayvnc-cli`.

pub mod client;
pub mod commands;
pub mod json_ipc;
pub mod option_parser;
pub mod server;
pub mod socket;
pub mod table_printer;
