//! Command implementations for the shub CLI.
//!
//! This module contains all command handler functions, organized by domain:
//! - `daemon` - Daemon lifecycle commands (start, reachability check)
//! - `ipc` - Session commands sent to a running daemon over the socket

pub(crate) mod daemon;
pub(crate) mod ipc;

pub(crate) use daemon::*;
pub(crate) use ipc::*;
