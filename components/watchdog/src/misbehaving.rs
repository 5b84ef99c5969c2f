// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0

//! Persistence for the "misbehaving service" name (spec §4.B.1, §6,
//! §8 property 9): written synchronously just before a reboot decision,
//! read and removed exactly once on the following boot.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

const FILE_NAME: &str = "misbehaving-service";

fn path_in(conf_dir: &Path) -> PathBuf {
    conf_dir.join(FILE_NAME)
}

/// Write `name` to the misbehaving-service file, fsyncing before
/// returning so the record survives a reboot initiated immediately
/// afterward.
pub fn write(conf_dir: &Path, name: &str) -> io::Result<()> {
    let mut file = fs::File::create(path_in(conf_dir))?;
    file.write_all(name.as_bytes())?;
    file.sync_all()
}

/// Read and delete the misbehaving-service file if present. Returns
/// `None` (without error) when no such file exists, which is the
/// common case on every boot but the one right after a reboot.
pub fn take(conf_dir: &Path) -> io::Result<Option<String>> {
    let path = path_in(conf_dir);
    match fs::read_to_string(&path) {
        Ok(contents) => {
            fs::remove_file(&path)?;
            Ok(Some(contents.trim().to_string()))
        }
        Err(ref err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err),
    }
}
