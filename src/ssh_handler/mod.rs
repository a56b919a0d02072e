//! SSH transport: one pack relay per exec channel.

pub mod command;
pub mod handler;
pub mod server;
pub mod structs;

pub use command::PackCommand;
pub use structs::{
    HandlerSSH, ServerSSH, SessionState, SshSession, NO_ACCESS_MSG, NO_SHELL_MSG,
};
