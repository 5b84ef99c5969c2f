// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0

//! Config loader (spec §4.B.1, §6): parses the `managerList` document,
//! validates every entry, resolves restart-policy fields against the
//! `defaults` block, and substitutes `CONF_DIR`/`HOME_DIR` tokens in
//! exec paths and argument vectors.

use std::fs;
use std::path::Path;

use gw_core::env::Dirs;
use serde::Deserialize;
use watchdog_protocol::{ManagerList, ResolvedService};

use crate::error::{Error, Result};

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConfigFile {
    #[serde(default)]
    manager_list: ManagerList,
}

/// Load, validate, and resolve the service list from `path`. `dirs` is
/// used to substitute `CONF_DIR`/`HOME_DIR` tokens in each service's
/// exec path and argument vector.
pub fn load(path: &Path, dirs: &Dirs) -> Result<Vec<ResolvedService>> {
    let raw = fs::read_to_string(path).map_err(|source| Error::ConfigRead {
        path: path.display().to_string(),
        source,
    })?;
    let file: ConfigFile = toml::from_str(&raw)?;
    validate(&file.manager_list)?;

    Ok(file
        .manager_list
        .manager_def
        .iter()
        .map(|def| {
            let mut resolved = def.resolve(&file.manager_list.defaults);
            resolved.path = dirs.substitute(&resolved.path);
            resolved.args = resolved.args.iter().map(|a| dirs.substitute(a)).collect();
            resolved
        })
        .collect())
}

fn validate(list: &ManagerList) -> Result<()> {
    for def in &list.manager_def {
        if def.manager_name.trim().is_empty() || def.manager_path.trim().is_empty() {
            return Err(Error::InvalidServiceDef {
                manager_name: def.manager_name.clone(),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn dirs() -> Dirs {
        Dirs {
            conf_dir: "/etc/gw".into(),
            home_dir: "/opt/gw".into(),
        }
    }

    #[test]
    fn loads_and_substitutes_tokens() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
            [managerList.defaults]
            maxRestartsPerMinute = 2

            [[managerList.managerDef]]
            managerName = "commService"
            managerPath = "HOME_DIR/bin/commService"
            argList = ["--conf", "CONF_DIR/comm.conf"]
            singlePhaseStartup = true
            "#
        )
        .unwrap();

        let services = load(file.path(), &dirs()).unwrap();
        assert_eq!(services.len(), 1);
        let svc = &services[0];
        assert_eq!(svc.name, "commService");
        assert_eq!(svc.path, "/opt/gw/bin/commService");
        assert_eq!(svc.args, vec!["--conf".to_string(), "/etc/gw/comm.conf".to_string()]);
        assert!(svc.single_phase_startup);
        assert_eq!(svc.max_restarts_per_minute, 2);
    }

    #[test]
    fn rejects_service_missing_a_name() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
            [[managerList.managerDef]]
            managerName = ""
            managerPath = "HOME_DIR/bin/x"
            "#
        )
        .unwrap();

        let err = load(file.path(), &dirs()).unwrap_err();
        assert!(matches!(err, Error::InvalidServiceDef { .. }));
    }
}
