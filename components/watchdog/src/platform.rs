// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0

//! The one genuinely irreversible action the supervisor can take:
//! rebooting the host after a service exceeds its restart cap with
//! `actionOnMaxRestarts = reboot` (spec §4.B.2 step 4, §8 property 8).

use std::process::Command;

/// Invoke the platform reboot command. Logged, not propagated: by the
/// time this is called the misbehaving-service name has already been
/// persisted, so there is nothing left for a caller to do with an
/// error here except hope the watchdog is restarted and tries again.
pub fn reboot() {
    match Command::new("reboot").status() {
        Ok(status) if status.success() => {}
        Ok(status) => log::error!("reboot command exited with {}", status),
        Err(err) => log::error!("failed to invoke reboot: {}", err),
    }
}
