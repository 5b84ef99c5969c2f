// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0

use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to read config file {path}: {source}")]
    ConfigRead { path: String, source: io::Error },

    #[error("failed to parse config: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("service definition is missing a name or exec path: {manager_name:?}")]
    InvalidServiceDef { manager_name: String },

    #[error("no such service: {0}")]
    UnknownService(String),

    #[error("no such group: {0}")]
    UnknownGroup(String),

    #[error("failed to spawn service {name}: {source}")]
    Spawn { name: String, source: io::Error },

    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
