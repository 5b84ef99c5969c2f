// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0

//! Mutable per-service state tracked by the supervisor, and the single
//! entry type combining it with the service's (immutable) resolved
//! definition.

use std::process::Child;
use std::time::{Instant, SystemTime};

use gw_core::Pid;
use watchdog_protocol::ResolvedService;

#[derive(Default)]
pub struct ServiceState {
    pub child: Option<Child>,
    pub pid: Option<Pid>,
    pub started_wall: Option<SystemTime>,
    pub started_mono: Option<Instant>,
    pub acked: bool,
    pub last_ack: Option<Instant>,
    pub ipc_port: Option<u16>,
    pub shutdown_token: Option<String>,
    pub ignore_next_death: bool,
    pub restarts_in_window: u32,
    pub window_start: Option<Instant>,
    /// Set for one hour after a name is read back from the
    /// misbehaving-service file on boot (spec §8 property 9): the
    /// configured `actionOnMaxRestarts` is overridden to
    /// `StopRestarting` until this deadline passes.
    pub downgrade_until: Option<Instant>,
}

pub struct Entry {
    pub def: ResolvedService,
    pub state: ServiceState,
}

impl Entry {
    pub fn new(def: ResolvedService) -> Self {
        Entry {
            def,
            state: ServiceState::default(),
        }
    }
}
