// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0

use std::fmt::{self, Display, Formatter};
use std::io;

pub type Pid = libc::pid_t;

#[allow(non_snake_case)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Signal {
    HUP,
    INT,
    QUIT,
    ILL,
    ABRT,
    KILL,
    USR1,
    SEGV,
    USR2,
    TERM,
}

impl From<Signal> for libc::c_int {
    fn from(value: Signal) -> libc::c_int {
        match value {
            Signal::HUP => libc::SIGHUP,
            Signal::INT => libc::SIGINT,
            Signal::QUIT => libc::SIGQUIT,
            Signal::ILL => libc::SIGILL,
            Signal::ABRT => libc::SIGABRT,
            Signal::KILL => libc::SIGKILL,
            Signal::USR1 => libc::SIGUSR1,
            Signal::SEGV => libc::SIGSEGV,
            Signal::USR2 => libc::SIGUSR2,
            Signal::TERM => libc::SIGTERM,
        }
    }
}

impl Display for Signal {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        let s = match *self {
            Signal::HUP => "HUP",
            Signal::INT => "INT",
            Signal::QUIT => "QUIT",
            Signal::ILL => "ILL",
            Signal::ABRT => "ABRT",
            Signal::KILL => "KILL",
            Signal::USR1 => "USR1",
            Signal::SEGV => "SEGV",
            Signal::USR2 => "USR2",
            Signal::TERM => "TERM",
        };
        write!(f, "{}", s)
    }
}

/// Send a signal to `pid`. A negative `pid` signals the entire process
/// group, mirroring POSIX `kill(2)` semantics.
pub fn signal(pid: Pid, sig: Signal) -> io::Result<()> {
    let rc = unsafe { libc::kill(pid, libc::c_int::from(sig)) };
    if rc == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

/// Cheap liveness probe: signal 0 performs error checking without
/// actually delivering a signal.
pub fn is_alive(pid: Pid) -> bool {
    unsafe { libc::kill(pid, 0) == 0 }
}

/// Put the calling process (meant to be used from a `pre_exec` hook,
/// post-fork pre-exec) into its own process group. Services spawned
/// this way can broadcast a signal to "their" group without it
/// reaching the watchdog that spawned them.
pub fn own_process_group() -> io::Result<()> {
    if unsafe { libc::setpgid(0, 0) } == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

/// If `pid` is the root of its own process group, return the negated
/// pid so a signal sent to it reaches the whole group; otherwise
/// return `pid` unchanged.
pub fn pid_or_group(pid: Pid) -> Pid {
    let pgid = unsafe { libc::getpgid(pid) };
    if pgid == pid {
        -pid
    } else {
        pid
    }
}

pub fn current_pid() -> Pid {
    unsafe { libc::getpid() }
}
