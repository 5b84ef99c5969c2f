// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0

//! Process spawning (spec §4.B.2 "Spawning"): fork/exec with a cloned
//! environment, `CHILD_WAS_RESTARTED` injection on restart, every file
//! descriptor above the standard trio closed in the child, and the
//! child placed in its own process group so a signal it broadcasts to
//! "its" group never reaches the watchdog
//! (`gw_core::os::process::own_process_group`).

use std::io;
use std::os::unix::process::CommandExt;
use std::process::{Child, Command, Stdio};

use gw_core::env::RESTARTED_VAR;
use watchdog_protocol::ResolvedService;

/// Spawn `service`, marking `CHILD_WAS_RESTARTED=true` in its
/// environment when `restarted` is set.
pub fn spawn(service: &ResolvedService, restarted: bool) -> io::Result<Child> {
    let mut command = Command::new(&service.path);
    command
        .args(&service.args)
        .stdin(Stdio::null())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit());

    if restarted {
        command.env(RESTARTED_VAR, "true");
    }

    unsafe {
        command.pre_exec(|| {
            gw_core::os::process::own_process_group()?;
            close_inherited_fds();
            Ok(())
        });
    }

    command.spawn()
}

/// Close every fd above the standard trio. Best-effort: `close(2)` on
/// an already-closed fd just returns `EBADF`, which is ignored.
fn close_inherited_fds() {
    let max = unsafe { libc::sysconf(libc::_SC_OPEN_MAX) };
    let max = if max > 0 { max as libc::c_int } else { 1024 };
    for fd in 3..max {
        unsafe {
            libc::close(fd);
        }
    }
}
