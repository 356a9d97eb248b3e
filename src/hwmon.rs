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

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use serde_json::json;

use crate::error::{FanError, Result};
use crate::logger;

pub const DEFAULT_HWMON_ROOT: &str = "/sys/class/hwmon";

/// One hwmon device as seen at enumeration time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HwmonDevice {
    pub id: String,
    pub name: String,
    pub path: PathBuf,
    pub fans: BTreeSet<u32>,
    pub temps: BTreeSet<u32>,
    /// Fan channels with a writable `pwmK` next to `fanK_input`.
    pub pwm_fans: BTreeSet<u32>,
}

impl HwmonDevice {
    pub fn fan_input(&self, channel: u32) -> PathBuf {
        self.path.join(format!("fan{}_input", channel))
    }

    pub fn temp_input(&self, channel: u32) -> PathBuf {
        self.path.join(format!("temp{}_input", channel))
    }

    pub fn pwm(&self, channel: u32) -> PathBuf {
        self.path.join(format!("pwm{}", channel))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FanChannel {
    pub device: String,
    pub channel: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TempChannel {
    pub device: String,
    pub channel: u32,
}

impl std::fmt::Display for FanChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:fan{}", self.device, self.channel)
    }
}

impl std::fmt::Display for TempChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:temp{}", self.device, self.channel)
    }
}

/// Point-in-time view of the hwmon tree. Call `refresh` (or `discover`
/// again) for fresh topology; nothing is updated incrementally.
#[derive(Debug, Clone)]
pub struct HwmonRegistry {
    root: PathBuf,
    devices: BTreeMap<String, HwmonDevice>,
}

impl HwmonRegistry {
    pub fn discover(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        let devices = scan_devices(&root)?;
        logger::log_event(
            "hwmon_discover",
            json!({
                "root": root.display().to_string(),
                "devices": devices.keys().collect::<Vec<_>>(),
            }),
        );
        Ok(Self { root, devices })
    }

    pub fn discover_system() -> Result<Self> {
        Self::discover(DEFAULT_HWMON_ROOT)
    }

    pub fn refresh(&mut self) -> Result<()> {
        self.devices = scan_devices(&self.root)?;
        Ok(())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn devices(&self) -> &BTreeMap<String, HwmonDevice> {
        &self.devices
    }

    pub fn device(&self, id: &str) -> Option<&HwmonDevice> {
        self.devices.get(id)
    }

    pub fn fan_channels(&self) -> Vec<FanChannel> {
        self.devices
            .values()
            .flat_map(|d| d.fans.iter().map(move |&c| FanChannel { device: d.id.clone(), channel: c }))
            .collect()
    }

    pub fn temp_channels(&self) -> Vec<TempChannel> {
        self.devices
            .values()
            .flat_map(|d| d.temps.iter().map(move |&c| TempChannel { device: d.id.clone(), channel: c }))
            .collect()
    }

    pub fn pwm_channels(&self) -> Vec<FanChannel> {
        self.devices
            .values()
            .flat_map(|d| d.pwm_fans.iter().map(move |&c| FanChannel { device: d.id.clone(), channel: c }))
            .collect()
    }
}

fn scan_devices(root: &Path) -> Result<BTreeMap<String, HwmonDevice>> {
    let mut out = BTreeMap::new();

    let entries = match fs::read_dir(root) {
        Ok(it) => it,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(out),
        Err(e) => return Err(FanError::from_io(root.display().to_string(), e)),
    };

    for ent in entries.flatten() {
        let path = ent.path();
        if !path.is_dir() { continue; }
        let id = match path.file_name().and_then(|s| s.to_str()) {
            Some(s) => s.to_string(),
            None => continue,
        };
        // Resolve to the actual device dir in case of symlink
        let dir = fs::canonicalize(&path).unwrap_or(path);
        let name = read_trimmed(dir.join("name")).unwrap_or_else(|_| id.clone());

        let mut fans = BTreeSet::new();
        let mut temps = BTreeSet::new();
        let Ok(dir_iter) = fs::read_dir(&dir) else { continue };
        for file in dir_iter.flatten() {
            let fname = file.file_name();
            let fname = fname.to_string_lossy();
            if let Some(idx) = extract_index(&fname, "fan", "_input") {
                fans.insert(idx);
            } else if let Some(idx) = extract_index(&fname, "temp", "_input") {
                temps.insert(idx);
            }
        }
        if fans.is_empty() && temps.is_empty() { continue; }

        let pwm_fans = fans
            .iter()
            .copied()
            .filter(|idx| is_writable(&dir.join(format!("pwm{}", idx))))
            .collect();

        out.insert(id.clone(), HwmonDevice { id, name, path: dir, fans, temps, pwm_fans });
    }

    Ok(out)
}

fn is_writable(path: &Path) -> bool {
    match fs::metadata(path) {
        Ok(meta) => meta.is_file() && !meta.permissions().readonly(),
        Err(_) => false,
    }
}

pub fn read_trimmed<P: AsRef<Path>>(p: P) -> io::Result<String> {
    let mut s = String::new();
    fs::File::open(p)?.read_to_string(&mut s)?;
    Ok(s.trim().to_string())
}

/// Read and parse a single integer attribute.
pub fn read_value<T: std::str::FromStr>(path: &Path) -> Result<T> {
    let raw = read_trimmed(path).map_err(|e| FanError::from_io(path.display().to_string(), e))?;
    raw.parse::<T>().map_err(|_| {
        FanError::io(
            path.display().to_string(),
            io::Error::new(io::ErrorKind::InvalidData, format!("unparsable value '{}'", raw)),
        )
    })
}

pub fn extract_index(fname: &str, prefix: &str, suffix: &str) -> Option<u32> {
    if fname.len() > prefix.len() + suffix.len() && fname.starts_with(prefix) && fname.ends_with(suffix) {
        let mid = &fname[prefix.len()..fname.len() - suffix.len()];
        if mid.chars().all(|c| c.is_ascii_digit()) { mid.parse().ok() } else { None }
    } else {
        None
    }
}

/// Write a raw duty to `pwmK` of `dir`: forces manual mode when an enable
/// file exists and scales to `pwmK_max` when the driver exposes one.
pub fn write_pwm_raw(dir: &Path, idx: u32, value: u8) -> io::Result<String> {
    let pwm_path = dir.join(format!("pwm{}", idx));
    let enable_path = dir.join(format!("pwm{}_enable", idx));
    let pwm_max_path = dir.join(format!("pwm{}_max", idx));

    if enable_path.exists() {
        fs::write(&enable_path, "1")?;
    }
    let write_val = if pwm_max_path.exists() {
        match read_trimmed(&pwm_max_path)?.parse::<u64>() {
            Ok(maxv) if maxv > 0 => (u64::from(value) * maxv / 255).to_string(),
            _ => value.to_string(),
        }
    } else {
        value.to_string()
    };
    fs::write(&pwm_path, &write_val)?;
    Ok(write_val)
}
