//! Health status and diagnostics types for the daemon.

use crate::LifecycleState;

/// Session count breakdown for health status reporting.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
pub struct SessionCounts {
    /// Sessions with a registered client.
    pub registered: usize,
    /// Registered sessions that reported ready.
    pub connected: usize,
    /// Registered sessions still initializing or waiting for pairing.
    pub pending: usize,
    /// Registered sessions that crashed or need manual action.
    pub inactive: usize,
}

impl SessionCounts {
    /// Tallies the given lifecycle states.
    pub fn from_states(states: impl IntoIterator<Item = LifecycleState>) -> Self {
        let mut counts = Self::default();
        for state in states {
            counts.registered += 1;
            match state {
                LifecycleState::Connected => counts.connected += 1,
                LifecycleState::Initializing | LifecycleState::AwaitingAuth => counts.pending += 1,
                LifecycleState::NotConnected
                | LifecycleState::Crashed
                | LifecycleState::Destroyed => counts.inactive += 1,
            }
        }
        counts
    }
}

/// Health status response from the daemon HEALTH command.
#[derive(Debug, serde::Serialize, serde::Deserialize)]
pub struct HealthStatus {
    /// Daemon uptime in seconds.
    pub uptime_seconds: u64,
    /// Session count breakdown.
    pub sessions: SessionCounts,
    /// Count of active connections to the daemon.
    pub connections: usize,
    /// Process memory usage in MB (None if unavailable).
    pub memory_mb: Option<f64>,
    /// Path to the Unix domain socket.
    pub socket_path: String,
}

/// Formats a duration in seconds to a human-readable string.
///
/// Returns "Xh Ym" for durations >= 1 hour, "Xm" otherwise.
pub fn format_uptime(seconds: u64) -> String {
    let hours = seconds / 3600;
    let minutes = (seconds % 3600) / 60;
    if hours > 0 {
        format!("{}h {}m", hours, minutes)
    } else {
        format!("{}m", minutes)
    }
}

/// Queries the current process memory usage via sysinfo.
///
/// Returns the RSS in megabytes, or None if the process cannot be found.
pub fn get_memory_usage_mb() -> Option<f64> {
    use sysinfo::{Pid, System};

    let pid = Pid::from_u32(std::process::id());
    let mut sys = System::new();
    sys.refresh_processes(sysinfo::ProcessesToUpdate::Some(&[pid]), true);
    sys.process(pid)
        .map(|proc_info| proc_info.memory() as f64 / 1024.0 / 1024.0)
}
