// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0

//! The lifecycle engine (spec §4.B.2, §4.B.4): spawning, death
//! handling with restart backoff/caps, and the shutdown sequencer.
//! Grounded on `components/sup/src/manager/service/supervisor.rs` and
//! `components/launcher/src/sys/unix/service.rs`.
//!
//! One mutex (`services`) protects all mutable per-service state,
//! mirroring spec §5's "Supervisor service list: one mutex protects
//! all mutable per-service state." It is held across the whole death-
//! handling algorithm (including the intentional backoff sleep — spec
//! §4.B.2 step 3 calls this out explicitly as "serialized restarts are
//! intentional") and released before the bounded waits for child exit
//! in the shutdown sequencer, so the background reaper can keep making
//! progress on other services.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Condvar, Mutex};
use std::thread;
use std::time::{Duration, Instant, SystemTime};

use gw_core::os::process::{pid_or_group, signal, Signal};
use watchdog_protocol::{Ack, ActionOnCap, LifecycleEvent, ResolvedService};

use crate::error::{Error, Result};
use crate::runtime::Entry;
use crate::{misbehaving, platform, rpc, spawn};

pub struct Supervisor {
    conf_dir: PathBuf,
    services: Mutex<HashMap<String, Entry>>,
    ack_signal: Condvar,
    events: Mutex<std::sync::mpsc::Sender<LifecycleEvent>>,
}

impl Supervisor {
    pub fn new(
        conf_dir: PathBuf,
        defs: Vec<ResolvedService>,
        events: std::sync::mpsc::Sender<LifecycleEvent>,
    ) -> Self {
        let services = defs
            .into_iter()
            .map(|def| (def.name.clone(), Entry::new(def)))
            .collect();
        Supervisor {
            conf_dir,
            services: Mutex::new(services),
            ack_signal: Condvar::new(),
            events: Mutex::new(events),
        }
    }

    fn broadcast(&self, event: LifecycleEvent) {
        if self.events.lock().unwrap().send(event).is_err() {
            log::debug!("lifecycle event dropped: no receiver");
        }
    }

    pub fn names_where(&self, predicate: impl Fn(&ResolvedService) -> bool) -> Vec<String> {
        self.services
            .lock()
            .unwrap()
            .values()
            .filter(|e| predicate(&e.def))
            .map(|e| e.def.name.clone())
            .collect()
    }

    fn all_names(&self) -> Vec<String> {
        self.services.lock().unwrap().keys().cloned().collect()
    }

    fn members_of_group(&self, group: &str) -> Result<Vec<String>> {
        let members: Vec<String> = self
            .services
            .lock()
            .unwrap()
            .values()
            .filter(|e| e.def.logical_group.as_deref() == Some(group))
            .map(|e| e.def.name.clone())
            .collect();
        if members.is_empty() {
            Err(Error::UnknownGroup(group.to_string()))
        } else {
            Ok(members)
        }
    }

    /// If `name` was read from the misbehaving-service file this boot,
    /// temporarily downgrade its cap action to `StopRestarting` for one
    /// hour (spec §8 property 9).
    pub fn downgrade_for_one_hour(&self, name: &str) {
        if let Some(entry) = self.services.lock().unwrap().get_mut(name) {
            entry.state.downgrade_until = Some(Instant::now() + Duration::from_secs(3600));
        }
    }

    // ---- spawning -----------------------------------------------------

    pub fn spawn_service(&self, name: &str, restarted: bool) -> Result<()> {
        let mut map = self.services.lock().unwrap();
        let entry = map
            .get_mut(name)
            .ok_or_else(|| Error::UnknownService(name.to_string()))?;

        let child = spawn::spawn(&entry.def, restarted).map_err(|source| Error::Spawn {
            name: name.to_string(),
            source,
        })?;

        entry.state.pid = Some(child.id() as gw_core::Pid);
        entry.state.child = Some(child);
        entry.state.started_wall = Some(SystemTime::now());
        entry.state.started_mono = Some(Instant::now());
        entry.state.acked = false;
        entry.state.last_ack = None;
        drop(map);

        self.broadcast(LifecycleEvent::ServiceStarted {
            name: name.to_string(),
        });
        Ok(())
    }

    // ---- reaping / death handling --------------------------------------

    /// Poll every tracked child for exit and run the death-handling
    /// algorithm for any that have (spec §4.B.2 "Death handling").
    /// Intended to be called periodically from a background thread,
    /// following the teacher's poll-based zombie reaping rather than a
    /// real `SIGCHLD` handler (see `DESIGN.md`).
    pub fn reap_once(&self) {
        let mut map = self.services.lock().unwrap();

        let dead: Vec<String> = map
            .iter_mut()
            .filter_map(|(name, entry)| match entry.state.child.as_mut() {
                Some(child) => match child.try_wait() {
                    Ok(Some(_status)) => Some(name.clone()),
                    _ => None,
                },
                None => None,
            })
            .collect();

        for name in dead {
            self.handle_death_locked(&mut map, &name);
        }
    }

    fn handle_death_locked(&self, map: &mut HashMap<String, Entry>, name: &str) {
        let entry = match map.get_mut(name) {
            Some(e) => e,
            None => return,
        };
        entry.state.pid = None;
        entry.state.child = None;

        if !entry.def.restart_on_crash {
            log::info!("{} exited; restart-on-crash is disabled", name);
            self.broadcast(LifecycleEvent::ServiceDied {
                name: name.to_string(),
            });
            return;
        }

        if entry.state.ignore_next_death {
            log::info!("{} exited as part of an intentional stop", name);
            entry.state.ignore_next_death = false;
            return;
        }

        // Step 3: serialize restarts by sleeping out the remainder of
        // secondsBetweenRestarts under the lock.
        if let Some(started) = entry.state.started_mono {
            let min_gap = Duration::from_secs(entry.def.seconds_between_restarts);
            let elapsed = started.elapsed();
            if elapsed < min_gap {
                thread::sleep(min_gap - elapsed);
            }
        }

        // Step 4: rolling 60s restart-cap bookkeeping.
        let now = Instant::now();
        let window_open = entry
            .state
            .window_start
            .map_or(false, |start| now.duration_since(start) < Duration::from_secs(60));
        if window_open {
            entry.state.restarts_in_window += 1;
        } else {
            entry.state.window_start = Some(now);
            entry.state.restarts_in_window = 1;
        }

        if entry.state.restarts_in_window > entry.def.max_restarts_per_minute {
            let downgraded = entry
                .state
                .downgrade_until
                .map_or(false, |until| now < until);
            let action = if downgraded {
                ActionOnCap::StopRestarting
            } else {
                entry.def.action_on_max_restarts
            };

            log::warn!("{} exceeded its restart cap", name);
            self.broadcast(LifecycleEvent::ServiceDied {
                name: name.to_string(),
            });

            match action {
                ActionOnCap::Reboot => {
                    if let Err(err) = misbehaving::write(&self.conf_dir, name) {
                        log::error!("failed to persist misbehaving service name: {}", err);
                    }
                    platform::reboot();
                }
                ActionOnCap::StopRestarting => {
                    log::warn!("{} will not be restarted", name);
                }
            }
            return;
        }

        // Step 5: respawn.
        match spawn::spawn(&entry.def, true) {
            Ok(child) => {
                entry.state.pid = Some(child.id() as gw_core::Pid);
                entry.state.child = Some(child);
                entry.state.started_wall = Some(SystemTime::now());
                entry.state.started_mono = Some(Instant::now());
                entry.state.acked = false;
                entry.state.last_ack = None;
                self.broadcast(LifecycleEvent::ServiceRestarted {
                    name: name.to_string(),
                });
            }
            Err(err) => {
                log::error!("failed to restart {}: {}", name, err);
                self.broadcast(LifecycleEvent::ServiceDied {
                    name: name.to_string(),
                });
            }
        }
    }

    // ---- acks -----------------------------------------------------------

    pub fn record_ack(&self, ack: &Ack) -> Result<()> {
        let mut map = self.services.lock().unwrap();
        let entry = map
            .get_mut(&ack.service_name)
            .ok_or_else(|| Error::UnknownService(ack.service_name.clone()))?;
        entry.state.last_ack = Some(Instant::now());
        entry.state.ipc_port = ack.ipc_port;
        entry.state.shutdown_token = Some(ack.shutdown_token.clone());
        entry.state.acked = true;
        drop(map);
        self.ack_signal.notify_all();
        Ok(())
    }

    /// Block until every service matched by `predicate` has acked, or
    /// `deadline` passes. Returns whether every match acked.
    pub fn wait_for_acks(&self, predicate: impl Fn(&ResolvedService) -> bool, deadline: Instant) -> bool {
        let mut map = self.services.lock().unwrap();
        loop {
            let all_acked = map
                .values()
                .filter(|e| predicate(&e.def))
                .all(|e| e.state.acked);
            if all_acked {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let (guard, _timeout) = self.ack_signal.wait_timeout(map, deadline - now).unwrap();
            map = guard;
        }
    }

    pub fn acked_ipc_ports(&self) -> Vec<(String, u16)> {
        self.services
            .lock()
            .unwrap()
            .values()
            .filter_map(|e| e.state.ipc_port.map(|port| (e.def.name.clone(), port)))
            .collect()
    }

    pub fn broadcast_init_complete(&self, all_started: bool) {
        self.broadcast(LifecycleEvent::InitComplete { all_started });
    }

    // ---- shutdown sequencer --------------------------------------------

    pub fn stop_service(&self, name: &str) -> Result<()> {
        self.set_ignore_next_death(std::slice::from_ref(&name.to_string()))?;
        self.stop_marked(name, false)
    }

    pub fn stop_service_requesting_core(&self, name: &str) -> Result<()> {
        self.set_ignore_next_death(std::slice::from_ref(&name.to_string()))?;
        self.stop_marked(name, true)
    }

    pub fn stop_group(&self, group: &str) -> Result<()> {
        let members = self.members_of_group(group)?;
        self.set_ignore_next_death(&members)?;
        self.broadcast(LifecycleEvent::GroupStopped {
            group: group.to_string(),
        });
        for name in &members {
            self.stop_marked(name, false)?;
        }
        Ok(())
    }

    pub fn stop_all(&self) {
        let members = self.all_names();
        if self.set_ignore_next_death(&members).is_err() {
            return;
        }
        for name in &members {
            if let Err(err) = self.stop_marked(name, false) {
                log::warn!("error stopping {}: {}", name, err);
            }
        }
    }

    /// Pre-mark every named service's `ignore-next-death` flag under a
    /// single lock acquisition, eliminating the race across members a
    /// sequential per-service stop would otherwise have (spec §4.B.4
    /// "Group and 'all' variants").
    fn set_ignore_next_death(&self, names: &[String]) -> Result<()> {
        let mut map = self.services.lock().unwrap();
        for name in names {
            let entry = map
                .get_mut(name)
                .ok_or_else(|| Error::UnknownService(name.clone()))?;
            entry.state.ignore_next_death = true;
        }
        Ok(())
    }

    fn stop_marked(&self, name: &str, request_core: bool) -> Result<()> {
        let (pid, ipc_port, token, wait_on_shutdown) = {
            let map = self.services.lock().unwrap();
            let entry = map
                .get(name)
                .ok_or_else(|| Error::UnknownService(name.to_string()))?;
            (
                entry.state.pid,
                entry.state.ipc_port,
                entry.state.shutdown_token.clone(),
                Duration::from_secs(entry.def.wait_on_shutdown),
            )
        };
        let pid = match pid {
            Some(pid) => pid,
            None => return Ok(()),
        };

        if let (Some(port), Some(token)) = (ipc_port, token.as_deref()) {
            if rpc::shutdown(port, token, wait_on_shutdown).is_ok()
                && self.wait_for_exit(name, Duration::from_secs(10))
            {
                return Ok(());
            }
        }

        let sig = if request_core { Signal::QUIT } else { Signal::TERM };
        signal(pid_or_group(pid), sig).ok();
        if self.wait_for_exit(name, Duration::from_secs(10)) {
            return Ok(());
        }

        signal(pid_or_group(pid), Signal::KILL).ok();
        self.wait_for_exit(name, Duration::from_secs(10));
        Ok(())
    }

    /// Waits by polling whether the reaper has observed this service's
    /// child exit (`state.pid` goes back to `None`), rather than
    /// blocking directly on the pid ourselves — the background reaper
    /// owns the `Child` handle and is the only thing allowed to reap it.
    fn wait_for_exit(&self, name: &str, bound: Duration) -> bool {
        let deadline = Instant::now() + bound;
        loop {
            {
                let map = self.services.lock().unwrap();
                if map.get(name).map_or(true, |e| e.state.pid.is_none()) {
                    return true;
                }
            }
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(Duration::from_millis(50));
        }
    }
}
