// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0

//! Service definitions, ack/shutdown messages, and the lifecycle event
//! taxonomy shared between the watchdog's config loader, lifecycle
//! engine, and whatever out-of-core collaborator consumes its
//! broadcasts (spec §3(B), §6).

use serde::{Deserialize, Deserializer};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ActionOnCap {
    Reboot,
    StopRestarting,
}

impl Default for ActionOnCap {
    fn default() -> Self {
        ActionOnCap::StopRestarting
    }
}

impl<'de> Deserialize<'de> for ActionOnCap {
    /// Unknown strings map to `StopRestarting` rather than failing the
    /// whole config load (spec §4.B.1: "Unknown enum strings for
    /// action-on-cap map to `stop-restarting`").
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Ok(match raw.as_str() {
            "reboot" => ActionOnCap::Reboot,
            "stopRestarting" => ActionOnCap::StopRestarting,
            _ => ActionOnCap::StopRestarting,
        })
    }
}

/// One `managerDef` entry (spec §6). Immutable after load.
///
/// The restart-policy fields are `Option` rather than defaulted in
/// place: an absent value here falls through to the config file's
/// `defaults` block (see [`ManagerList::defaults`]), and only the
/// final merge in [`ServiceDef::resolve`] picks a concrete value.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceDef {
    pub manager_name: String,
    pub manager_path: String,
    #[serde(default)]
    pub arg_list: Vec<String>,
    #[serde(default)]
    pub logical_group: Option<String>,
    #[serde(default)]
    pub restart_on_crash: Option<bool>,
    #[serde(default)]
    pub expect_startup_ack: bool,
    #[serde(default)]
    pub seconds_between_restarts: Option<u64>,
    #[serde(default)]
    pub max_restarts_per_minute: Option<u32>,
    #[serde(default)]
    pub action_on_max_restarts: Option<ActionOnCap>,
    #[serde(default = "default_true")]
    pub auto_start: bool,
    #[serde(default)]
    pub wait_on_shutdown: Option<u64>,
    #[serde(default)]
    pub single_phase_startup: bool,
}

fn default_true() -> bool {
    true
}

/// A `ServiceDef` with every restart-policy field merged against the
/// config file's `defaults` block (per-service value wins, then
/// default, then the hard-coded fallback) and directory tokens
/// resolved. This is what the lifecycle engine actually operates on.
#[derive(Clone, Debug)]
pub struct ResolvedService {
    pub name: String,
    pub path: String,
    pub args: Vec<String>,
    pub logical_group: Option<String>,
    pub restart_on_crash: bool,
    pub expect_startup_ack: bool,
    pub seconds_between_restarts: u64,
    pub max_restarts_per_minute: u32,
    pub action_on_max_restarts: ActionOnCap,
    pub auto_start: bool,
    pub wait_on_shutdown: u64,
    pub single_phase_startup: bool,
}

impl ServiceDef {
    /// Merge this definition's optional fields against `defaults`,
    /// falling back to the hard-coded defaults spec §4.B.1 documents
    /// when neither specifies a value. Does not substitute
    /// `CONF_DIR`/`HOME_DIR` tokens; the config loader does that.
    pub fn resolve(&self, defaults: &Defaults) -> ResolvedService {
        ResolvedService {
            name: self.manager_name.clone(),
            path: self.manager_path.clone(),
            args: self.arg_list.clone(),
            logical_group: self.logical_group.clone(),
            restart_on_crash: self
                .restart_on_crash
                .or(defaults.restart_on_crash)
                .unwrap_or(true),
            expect_startup_ack: self.expect_startup_ack,
            seconds_between_restarts: self
                .seconds_between_restarts
                .or(defaults.seconds_between_restarts)
                .unwrap_or(1),
            max_restarts_per_minute: self
                .max_restarts_per_minute
                .or(defaults.max_restarts_per_minute)
                .unwrap_or(5),
            action_on_max_restarts: self
                .action_on_max_restarts
                .or(defaults.action_on_max_restarts)
                .unwrap_or_default(),
            auto_start: self.auto_start,
            wait_on_shutdown: self
                .wait_on_shutdown
                .or(defaults.wait_on_shutdown)
                .unwrap_or(5),
            single_phase_startup: self.single_phase_startup,
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Defaults {
    pub restart_on_crash: Option<bool>,
    pub seconds_between_restarts: Option<u64>,
    pub max_restarts_per_minute: Option<u32>,
    pub action_on_max_restarts: Option<ActionOnCap>,
    pub wait_on_shutdown: Option<u64>,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManagerList {
    #[serde(default)]
    pub manager_def: Vec<ServiceDef>,
    #[serde(default)]
    pub defaults: Defaults,
}

/// Sent by a service back to the watchdog once it has finished
/// initializing (spec §3(B) ack (service); §6 glossary).
#[derive(Clone, Debug)]
pub struct Ack {
    pub service_name: String,
    pub ipc_port: Option<u16>,
    pub shutdown_token: String,
}

/// Broadcast to the out-of-core event collaborator (spec §6).
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LifecycleEvent {
    InitComplete { all_started: bool },
    ServiceStarted { name: String },
    ServiceDied { name: String },
    ServiceRestarted { name: String },
    GroupStarted { group: String },
    GroupStopped { group: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_action_on_cap_falls_back_to_stop_restarting() {
        #[derive(Deserialize)]
        struct Wrapper {
            action: ActionOnCap,
        }
        let parsed: Wrapper =
            serde_json::from_str(r#"{"action":"somethingUnrecognized"}"#).unwrap();
        assert_eq!(parsed.action, ActionOnCap::StopRestarting);
    }

    #[test]
    fn reboot_is_recognized() {
        #[derive(Deserialize)]
        struct Wrapper {
            action: ActionOnCap,
        }
        let parsed: Wrapper = serde_json::from_str(r#"{"action":"reboot"}"#).unwrap();
        assert_eq!(parsed.action, ActionOnCap::Reboot);
    }

    #[test]
    fn resolve_prefers_per_service_value_over_defaults() {
        let def: ServiceDef = serde_json::from_str(
            r#"{"managerName":"a","managerPath":"p","maxRestartsPerMinute":9}"#,
        )
        .unwrap();
        let defaults = Defaults {
            max_restarts_per_minute: Some(2),
            wait_on_shutdown: Some(30),
            ..Defaults::default()
        };
        let resolved = def.resolve(&defaults);
        assert_eq!(resolved.max_restarts_per_minute, 9);
        assert_eq!(resolved.wait_on_shutdown, 30);
    }

    #[test]
    fn resolve_falls_back_to_hard_coded_default() {
        let def: ServiceDef =
            serde_json::from_str(r#"{"managerName":"a","managerPath":"p"}"#).unwrap();
        let resolved = def.resolve(&Defaults::default());
        assert_eq!(resolved.max_restarts_per_minute, 5);
        assert_eq!(resolved.seconds_between_restarts, 1);
        assert_eq!(resolved.wait_on_shutdown, 5);
        assert_eq!(resolved.action_on_max_restarts, ActionOnCap::StopRestarting);
    }
}
