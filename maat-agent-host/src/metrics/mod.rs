//! System metrics collection for Maat agents
//!
//! `sysinfo`-backed implementations of the core data sources:
//! - user sessions of the monitored service, grouped by owner
//! - CPU, memory and swap usage of the host
//!
//! Both keep one `System` alive between calls so CPU usage is measured over
//! the interval since the previous collection.

use std::path::Path;

use anyhow::Result;
use chrono::{TimeZone, Utc};
use maat_core::{HostMetrics, HostSource, ProcessSession, ProcessSource, ProcessTable};
use parking_lot::Mutex;
use sysinfo::{Process, ProcessRefreshKind, System, UpdateKind, Users};
use tracing::debug;

/// Sessions of the monitored service read from the OS process table
pub struct SysinfoProcessSource {
    system: Mutex<System>,
    users: Mutex<Users>,
}

impl SysinfoProcessSource {
    pub fn new() -> Self {
        Self {
            system: Mutex::new(System::new()),
            users: Mutex::new(Users::new_with_refreshed_list()),
        }
    }
}

impl Default for SysinfoProcessSource {
    fn default() -> Self {
        Self::new()
    }
}

/// Kernel process names are truncated, so fall back to the command line
fn matches_process(process: &Process, process_name: &str) -> bool {
    process.name() == process_name
        || process
            .cmd()
            .iter()
            .take(2)
            .any(|arg| Path::new(arg).file_name().and_then(|n| n.to_str()) == Some(process_name))
}

impl ProcessSource for SysinfoProcessSource {
    fn sessions(&self, process_name: &str) -> Result<ProcessTable> {
        let mut sys = self.system.lock();
        // the default process refresh leaves the owner and command line unset
        sys.refresh_processes_specifics(
            ProcessRefreshKind::new()
                .with_user(UpdateKind::OnlyIfNotSet)
                .with_cmd(UpdateKind::OnlyIfNotSet)
                .with_memory()
                .with_cpu(),
        );
        sys.refresh_memory();
        let total_memory = sys.total_memory();

        let mut users = self.users.lock();
        let mut table = ProcessTable::new();
        for process in sys.processes().values() {
            if !matches_process(process, process_name) {
                continue;
            }

            let owner = process.user_id().and_then(|uid| {
                users.get_user_by_id(uid).map(|u| u.name().to_string())
            });
            let username = match owner {
                Some(name) => name,
                None => {
                    // New account since the last listing
                    users.refresh_list();
                    match process.user_id().and_then(|uid| users.get_user_by_id(uid)) {
                        Some(user) => user.name().to_string(),
                        None => continue,
                    }
                }
            };

            let create_time = Utc
                .timestamp_opt(process.start_time() as i64, 0)
                .single()
                .unwrap_or_else(Utc::now);
            let memory_percent = if total_memory > 0 {
                process.memory() as f32 / total_memory as f32 * 100.0
            } else {
                0.0
            };

            table.insert(ProcessSession {
                username,
                pid: process.pid().as_u32(),
                ppid: process.parent().map(|p| p.as_u32()),
                name: process.name().to_string(),
                create_time,
                cpu_percent: process.cpu_usage(),
                memory_percent,
                memory_rss: process.memory(),
                cwd: None,
                exe: None,
                cmdline: process.cmd().to_vec(),
                num_threads: None,
            });
        }

        debug!(process_name, sessions = table.total(), "process table collected");
        Ok(table)
    }
}

/// Host CPU, memory and swap usage
pub struct SysinfoHostSource {
    system: Mutex<System>,
}

impl SysinfoHostSource {
    pub fn new() -> Self {
        let mut system = System::new();
        system.refresh_cpu();
        Self {
            system: Mutex::new(system),
        }
    }
}

impl Default for SysinfoHostSource {
    fn default() -> Self {
        Self::new()
    }
}

fn percent(part: u64, total: u64) -> f32 {
    if total > 0 {
        (part as f32 / total as f32) * 100.0
    } else {
        0.0
    }
}

impl HostSource for SysinfoHostSource {
    fn metrics(&self) -> Result<HostMetrics> {
        let mut sys = self.system.lock();
        sys.refresh_cpu();
        sys.refresh_memory();

        let memory_total = sys.total_memory();
        let memory_used = sys.used_memory();
        let swap_total = sys.total_swap();
        let swap_used = sys.used_swap();

        Ok(HostMetrics {
            cpu_percent: sys.global_cpu_info().cpu_usage(),
            cpu_count: sys.cpus().len(),
            memory_used,
            memory_total,
            memory_free: sys.free_memory(),
            memory_available: sys.available_memory(),
            memory_percent: percent(memory_used, memory_total),
            swap_total,
            swap_free: sys.free_swap(),
            swap_used,
            swap_percent: percent(swap_used, swap_total),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_metrics_collection() {
        let source = SysinfoHostSource::new();
        let metrics = source.metrics().unwrap();
        assert!(metrics.cpu_count > 0);
        assert!(metrics.memory_total > 0);
        assert!(metrics.memory_percent >= 0.0 && metrics.memory_percent <= 100.0);
    }

    #[test]
    fn test_unknown_process_name_gives_empty_table() {
        let source = SysinfoProcessSource::new();
        let table = source.sessions("maat-no-such-process-name").unwrap();
        assert_eq!(table.total(), 0);
    }

    #[cfg(unix)]
    #[test]
    fn test_child_process_is_listed_under_its_owner() {
        let mut child = std::process::Command::new("sleep").arg("5").spawn().unwrap();
        let pid = child.id();

        let source = SysinfoProcessSource::new();
        let table = source.sessions("sleep").unwrap();
        let found = table
            .iter()
            .flat_map(|(user, sessions)| sessions.iter().map(move |s| (user, s)))
            .find(|(_, s)| s.pid == pid)
            .map(|(user, s)| (user.to_string(), s.clone()));

        let _ = child.kill();
        let _ = child.wait();

        let (user, session) = found.expect("spawned sleep should be listed");
        assert!(!user.is_empty());
        assert_eq!(session.username, user);
        assert_eq!(session.name, "sleep");
        assert!(session.create_time <= Utc::now());
    }

    #[test]
    fn test_percent_of_zero_total() {
        assert_eq!(percent(5, 0), 0.0);
        assert_eq!(percent(1, 4), 25.0);
    }
}
