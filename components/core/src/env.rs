// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0

//! Directory-token substitution for service exec paths and argument
//! vectors, plus the environment variables the watchdog reads at
//! startup.

use std::env;
use std::path::PathBuf;

pub const CONF_DIR_VAR: &str = "IC_CONF";
pub const HOME_DIR_VAR: &str = "IC_HOME";
pub const RESTARTED_VAR: &str = "CHILD_WAS_RESTARTED";

const CONF_DIR_TOKEN: &str = "CONF_DIR";
const HOME_DIR_TOKEN: &str = "HOME_DIR";

/// The pair of directories that service definitions may reference via
/// `CONF_DIR` / `HOME_DIR` tokens.
#[derive(Clone, Debug)]
pub struct Dirs {
    pub conf_dir: PathBuf,
    pub home_dir: PathBuf,
}

impl Dirs {
    /// Read `IC_CONF` / `IC_HOME` from the process environment. Falls
    /// back to `/opt/icontrol/conf` and `/opt/icontrol` respectively,
    /// matching the legacy gateway's default layout.
    pub fn from_env() -> Self {
        Dirs {
            conf_dir: env::var(CONF_DIR_VAR)
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("/opt/icontrol/conf")),
            home_dir: env::var(HOME_DIR_VAR)
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("/opt/icontrol")),
        }
    }

    /// Replace `CONF_DIR` / `HOME_DIR` tokens anywhere in `value` with
    /// the concrete, configured paths.
    pub fn substitute(&self, value: &str) -> String {
        value
            .replace(CONF_DIR_TOKEN, &self.conf_dir.to_string_lossy())
            .replace(HOME_DIR_TOKEN, &self.home_dir.to_string_lossy())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn substitutes_both_tokens() {
        let dirs = Dirs {
            conf_dir: PathBuf::from("/etc/gw"),
            home_dir: PathBuf::from("/var/gw"),
        };
        assert_eq!(
            dirs.substitute("CONF_DIR/services.toml"),
            "/etc/gw/services.toml"
        );
        assert_eq!(dirs.substitute("HOME_DIR/bin/zigbeed"), "/var/gw/bin/zigbeed");
    }

    #[test]
    fn leaves_untouched_strings_alone() {
        let dirs = Dirs {
            conf_dir: PathBuf::from("/etc/gw"),
            home_dir: PathBuf::from("/var/gw"),
        };
        assert_eq!(dirs.substitute("--foreground"), "--foreground");
    }
}
