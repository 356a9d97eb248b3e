/*
 * This file is part of Fanprobe.
 *
 * Copyright (C) 2025 Fanprobe contributors
 *
 * Fanprobe is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * Fanprobe is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with Fanprobe. If not, see <https://www.gnu.org/licenses/>.
 */

//! Per-session artifacts: the JSON-lines event trail, the append-only hits
//! file and the location of the backup snapshot.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use serde_json::Value;

use crate::backup::backup_path_for;
use crate::error::{FanError, Result};
use crate::logger;
use crate::port::parse_number;

pub fn ensure_dir(path: &Path) -> io::Result<()> {
    if !path.exists() {
        fs::create_dir_all(path)?;
        let perms = fs::Permissions::from_mode(0o755);
        let _ = fs::set_permissions(path, perms);
    }
    Ok(())
}

#[derive(Debug)]
pub struct DiscoveryLog {
    log_path: PathBuf,
    hits_path: PathBuf,
    backup_path: PathBuf,
    log: File,
}

impl DiscoveryLog {
    /// Create `ec_poke_<unix-ms>.log` in `dir`. The hits and backup files
    /// share its name with `.hits` / `.ec_backup` appended.
    pub fn create(dir: &Path) -> Result<Self> {
        let persist_err = |path: &Path, e: io::Error| FanError::Persist { path: path.to_path_buf(), source: e };
        ensure_dir(dir).map_err(|e| persist_err(dir, e))?;

        let log_path = dir.join(format!("ec_poke_{}.log", logger::now_millis()));
        let log = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)
            .map_err(|e| persist_err(&log_path, e))?;

        let mut hits_name = log_path.as_os_str().to_os_string();
        hits_name.push(".hits");
        let backup_path = backup_path_for(&log_path);

        Ok(Self { hits_path: PathBuf::from(hits_name), backup_path, log_path, log })
    }

    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    pub fn hits_path(&self) -> &Path {
        &self.hits_path
    }

    pub fn backup_path(&self) -> &Path {
        &self.backup_path
    }

    /// Append one record to the session trail and mirror it to the process
    /// logger. A failed trail write is reported on stderr only.
    pub fn event(&mut self, name: &str, data: Value) {
        if let Err(e) = writeln!(self.log, "{}", logger::format_line(name, data.clone())) {
            eprintln!("warning: could not write {}: {}", self.log_path.display(), e);
        }
        logger::log_event(name, data);
    }

    /// Append `0xAA:0xDD` to the hits file and flush it to disk.
    pub fn append_hit(&mut self, address: u16, duty: u8) -> Result<()> {
        let persist_err = |e: io::Error| FanError::Persist { path: self.hits_path.clone(), source: e };
        let mut f = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.hits_path)
            .map_err(persist_err)?;
        writeln!(f, "0x{:02X}:0x{:02X}", address, duty).map_err(persist_err)?;
        f.sync_data().map_err(persist_err)
    }
}

/// Parse a hits file. Unparseable lines are skipped.
pub fn read_hits(path: &Path) -> Result<Vec<(u16, u8)>> {
    let content = match fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(FanError::from_io(path.display().to_string(), e)),
    };
    Ok(content
        .lines()
        .filter_map(|line| {
            let (a, d) = line.trim().split_once(':')?;
            let a = u16::try_from(parse_number(a)?).ok()?;
            let d = u8::try_from(parse_number(d)?).ok()?;
            Some((a, d))
        })
        .collect())
}
