//! The owning process: discovery from build options and liveness checks.
//!
//! A server lives exactly as long as its owner, and the owner's pid is part
//! of the endpoint address, so every owner gets its own server.

use std::ffi::OsStr;

use sysinfo::{ProcessesToUpdate, System};
use tracing::debug;

use crate::error::{ServerError, ServerResult};

/// Prefix of the define that carries the owner pid, e.g. `__OWNER_PROCESS_ID__1234`.
pub const OWNER_DEFINE_PREFIX: &str = "__OWNER_PROCESS_ID__";

/// Owner pid from the first define that carries one.
pub fn owner_from_defines(defines: &[String]) -> Option<u32> {
    defines
        .iter()
        .filter_map(|define| define.strip_prefix(OWNER_DEFINE_PREFIX))
        .find_map(|pid| pid.parse().ok())
}

/// Pid of a running process named exactly `name`, if any.
pub fn find_process_by_name(name: &str) -> Option<u32> {
    let mut system = System::new();
    system.refresh_processes(ProcessesToUpdate::All, true);
    system
        .processes_by_exact_name(OsStr::new(name))
        .map(|process| process.pid().as_u32())
        .min()
}

/// Determine the owning process.
///
/// An explicit pid wins, then the define marker, then a running process
/// named `fallback_name`.
pub fn resolve_owner(
    explicit: Option<u32>,
    defines: &[String],
    fallback_name: Option<&str>,
) -> ServerResult<u32> {
    if let Some(pid) = explicit.or_else(|| owner_from_defines(defines)) {
        return Ok(pid);
    }

    if let Some(name) = fallback_name {
        if let Some(pid) = find_process_by_name(name) {
            debug!("Found owning process {} ({})", pid, name);
            return Ok(pid);
        }
        return Err(ServerError::OwnerNotFound(format!(
            "no define {OWNER_DEFINE_PREFIX}<pid> and no running process named '{name}'"
        )));
    }

    Err(ServerError::OwnerNotFound(format!(
        "no define {OWNER_DEFINE_PREFIX}<pid> and no owner process name configured"
    )))
}

/// Whether the process `pid` is still running.
#[cfg(unix)]
pub fn is_alive(pid: u32) -> bool {
    let Ok(pid) = libc::pid_t::try_from(pid) else {
        return false;
    };
    if pid <= 0 {
        return false;
    }
    // SAFETY: signal 0 performs error checking only; nothing is delivered.
    let rc = unsafe { libc::kill(pid, 0) };
    rc == 0 || std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

/// Whether the process `pid` is still running.
#[cfg(not(unix))]
pub fn is_alive(pid: u32) -> bool {
    let pid = sysinfo::Pid::from_u32(pid);
    let mut system = System::new();
    system.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
    system.process(pid).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn defines(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_owner_from_defines() {
        assert_eq!(
            owner_from_defines(&defines(&["DEBUG", "__OWNER_PROCESS_ID__1234", "TRACE"])),
            Some(1234)
        );
        assert_eq!(owner_from_defines(&defines(&["DEBUG"])), None);
        assert_eq!(
            owner_from_defines(&defines(&["__OWNER_PROCESS_ID__abc", "__OWNER_PROCESS_ID__7"])),
            Some(7)
        );
    }

    #[test]
    fn test_explicit_owner_wins() {
        let owner = resolve_owner(Some(99), &defines(&["__OWNER_PROCESS_ID__1234"]), None);
        assert_eq!(owner.unwrap(), 99);
    }

    #[test]
    fn test_missing_owner() {
        let err = resolve_owner(None, &defines(&["DEBUG"]), None).unwrap_err();
        assert!(matches!(err, ServerError::OwnerNotFound(_)));

        let err = resolve_owner(None, &[], Some("no-such-process-kiln-test")).unwrap_err();
        assert!(err.to_string().contains("no-such-process-kiln-test"));
    }

    #[test]
    fn test_current_process_is_alive() {
        assert!(is_alive(std::process::id()));
    }

    #[cfg(unix)]
    #[test]
    fn test_exited_child_is_not_alive() {
        let mut child = std::process::Command::new("true").spawn().unwrap();
        let pid = child.id();
        child.wait().unwrap();
        assert!(!is_alive(pid));
    }
}
