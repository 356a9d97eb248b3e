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

//! Safety net for a discovery session: the original byte of every probed
//! address, captured before anything is written.

use std::fs::{self, File};
use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{FanError, Result};
use crate::logger;
use crate::port::PortIo;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupEntry {
    pub address: u16,
    pub value: u8,
}

/// Ordered address/byte pairs, in probe order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EcBackupSnapshot {
    pub taken_at_ms: u64,
    pub entries: Vec<BackupEntry>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RestoreReport {
    pub restored: usize,
    pub failed: Vec<u16>,
    /// One message per entry of `failed`, same order.
    pub errors: Vec<String>,
}

impl RestoreReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

impl EcBackupSnapshot {
    /// Read every address once. Any failure aborts: a session must not
    /// start from a partial backup.
    pub fn snapshot<P: PortIo>(port: &mut P, addresses: &[u16]) -> Result<Self> {
        let mut entries = Vec::with_capacity(addresses.len());
        for &address in addresses {
            let value = port.read_byte(address)?;
            entries.push(BackupEntry { address, value });
        }
        Ok(Self { taken_at_ms: logger::now_millis() as u64, entries })
    }

    pub fn original(&self, address: u16) -> Option<u8> {
        self.entries.iter().find(|e| e.address == address).map(|e| e.value)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Write the snapshot and fsync it before returning.
    pub fn persist(&self, path: &Path) -> Result<()> {
        let persist_err = |e: std::io::Error| FanError::Persist { path: path.to_path_buf(), source: e };
        let data = serde_json::to_vec_pretty(self)
            .map_err(|e| persist_err(std::io::Error::new(std::io::ErrorKind::InvalidData, e)))?;
        let mut file = File::create(path).map_err(persist_err)?;
        file.write_all(&data).map_err(persist_err)?;
        file.sync_all().map_err(persist_err)?;
        let _ = fs::set_permissions(path, fs::Permissions::from_mode(0o600));
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let data = fs::read_to_string(path).map_err(|e| FanError::from_io(path.display().to_string(), e))?;
        serde_json::from_str(&data).map_err(|e| FanError::Config(format!("{}: {}", path.display(), e)))
    }

    /// Write back every recorded byte. Failures are collected in the report
    /// and skipped so the remaining addresses still get restored.
    pub fn restore<P: PortIo>(&self, port: &mut P) -> RestoreReport {
        let mut report = RestoreReport::default();
        for entry in &self.entries {
            match port.write_byte(entry.address, entry.value) {
                Ok(()) => report.restored += 1,
                Err(e) => {
                    report.failed.push(entry.address);
                    report.errors.push(e.to_string());
                }
            }
        }
        report
    }
}

/// Backup file path next to a session log.
pub fn backup_path_for(log_path: &Path) -> PathBuf {
    let mut name = log_path.as_os_str().to_os_string();
    name.push(".ec_backup");
    PathBuf::from(name)
}
