// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Process identity helpers shared by the lock queue and the worker launcher.

/// The pid lock holders identify themselves by.
pub fn current_pid() -> u32 {
    std::process::id()
}

/// True when `pid` names a live process visible to us.
#[cfg(unix)]
pub fn is_alive(pid: u32) -> bool {
    if pid == 0 {
        return false;
    }
    if pid == current_pid() {
        return true;
    }
    let Ok(raw) = libc::pid_t::try_from(pid) else {
        return false;
    };
    // SAFETY: signal 0 performs only the existence and permission checks.
    let rc = unsafe { libc::kill(raw, 0) };
    if rc == 0 {
        return true;
    }
    std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

#[cfg(not(unix))]
pub fn is_alive(pid: u32) -> bool {
    pid != 0
}

/// Ask a process to exit cooperatively. Returns false if it could not be signalled.
#[cfg(unix)]
pub fn terminate(pid: u32) -> bool {
    let Ok(raw) = libc::pid_t::try_from(pid) else {
        return false;
    };
    // SAFETY: sending SIGTERM to a child pid we spawned.
    unsafe { libc::kill(raw, libc::SIGTERM) == 0 }
}

#[cfg(not(unix))]
pub fn terminate(_pid: u32) -> bool {
    false
}
