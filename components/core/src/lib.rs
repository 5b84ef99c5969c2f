// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0

//! Shared OS-facing primitives used by both the `zhal` client and the
//! `watchdog` process supervisor: process signalling, liveness checks,
//! and directory-token substitution for config files.

pub mod env;
pub mod os;

pub use os::process::{Pid, Signal};
