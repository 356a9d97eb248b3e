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

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::ec::RegisterTable;
use crate::error::{FanError, Result};
use crate::hwmon::DEFAULT_HWMON_ROOT;
use crate::port::DEFAULT_PORT_DEVICE;

fn default_start() -> u16 { 0x02A0 }
fn default_end() -> u16 { 0x02FF }
fn default_stride() -> u16 { 2 }
fn default_duties() -> Vec<u8> { vec![0x16, 0x32, 0x64, 0x96, 0xC8, 0xFF] }
fn default_settle_ms() -> u64 { 2000 }
fn default_reversal_ms() -> u64 { 3000 }
fn default_restore_ms() -> u64 { 1000 }
pub fn default_log_dir() -> PathBuf { PathBuf::from("/var/log/fan_debug") }
pub fn default_port_device() -> PathBuf { PathBuf::from(DEFAULT_PORT_DEVICE) }
fn default_poll_ms() -> u64 { 2000 }

/// Parameters of one discovery session. Passed by value into
/// `RegisterProbe`; nothing here is read from process-wide state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DiscoveryConfig {
    #[serde(default = "default_start")]
    pub start: u16,
    #[serde(default = "default_end")]
    pub end: u16,
    #[serde(default = "default_stride")]
    pub stride: u16,
    /// Ascending, low to high intensity.
    #[serde(default = "default_duties")]
    pub duties: Vec<u8>,
    #[serde(default = "default_settle_ms")]
    pub settle_delay_ms: u64,
    #[serde(default = "default_reversal_ms")]
    pub reversal_delay_ms: u64,
    /// Pause after putting back the original byte between duty steps.
    #[serde(default = "default_restore_ms")]
    pub restore_delay_ms: u64,
    /// Value written by the reversibility test.
    #[serde(default)]
    pub neutral_value: u8,
    /// Per-channel RPM difference still treated as "unchanged".
    #[serde(default)]
    pub rpm_tolerance: u64,
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
    #[serde(default = "default_port_device")]
    pub device: PathBuf,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            start: default_start(),
            end: default_end(),
            stride: default_stride(),
            duties: default_duties(),
            settle_delay_ms: default_settle_ms(),
            reversal_delay_ms: default_reversal_ms(),
            restore_delay_ms: default_restore_ms(),
            neutral_value: 0,
            rpm_tolerance: 0,
            log_dir: default_log_dir(),
            device: default_port_device(),
        }
    }
}

impl DiscoveryConfig {
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn reversal_delay(&self) -> Duration {
        Duration::from_millis(self.reversal_delay_ms)
    }

    pub fn restore_delay(&self) -> Duration {
        Duration::from_millis(self.restore_delay_ms)
    }

    pub fn is_empty_range(&self) -> bool {
        self.start > self.end
    }

    /// Addresses that will be probed, in order. Addresses between strides
    /// are never read or written.
    pub fn addresses(&self) -> Vec<u16> {
        if self.is_empty_range() || self.stride == 0 {
            return Vec::new();
        }
        (u32::from(self.start)..=u32::from(self.end))
            .step_by(usize::from(self.stride))
            .map(|a| a as u16)
            .collect()
    }

    pub fn validate(&self) -> Result<()> {
        if self.stride == 0 {
            return Err(FanError::InvalidRange("stride must be at least 1".to_string()));
        }
        if self.duties.is_empty() {
            return Err(FanError::Config("duty list is empty".to_string()));
        }
        if self.duties.windows(2).any(|w| w[0] >= w[1]) {
            return Err(FanError::Config("duty list must be strictly ascending".to_string()));
        }
        if self.duties.contains(&self.neutral_value) {
            return Err(FanError::Config(format!(
                "neutral value 0x{:02X} is also a tested duty",
                self.neutral_value
            )));
        }
        Ok(())
    }
}

pub fn load_discovery_config(path: &Path) -> Result<DiscoveryConfig> {
    let data = fs::read_to_string(path).map_err(|e| FanError::Config(format!("{}: {}", path.display(), e)))?;
    let cfg: DiscoveryConfig = serde_json::from_str(&data)
        .map_err(|e| FanError::Config(format!("{}: {}", path.display(), e)))?;
    cfg.validate()?;
    Ok(cfg)
}

/// Settings for the periodic sensor poller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MonitorConfig {
    #[serde(default = "default_poll_ms")]
    pub interval_ms: u64,
    #[serde(default)]
    pub ec_table: Option<RegisterTable>,
    #[serde(default = "default_port_device")]
    pub device: PathBuf,
    #[serde(default = "default_hwmon_root")]
    pub hwmon_root: PathBuf,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_poll_ms(),
            ec_table: None,
            device: default_port_device(),
            hwmon_root: default_hwmon_root(),
        }
    }
}

impl MonitorConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

pub fn default_hwmon_root() -> PathBuf {
    PathBuf::from(DEFAULT_HWMON_ROOT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_match_poke_watch_session() {
        let cfg = DiscoveryConfig::default();
        assert_eq!(cfg.start, 0x02A0);
        assert_eq!(cfg.end, 0x02FF);
        assert_eq!(cfg.stride, 2);
        assert_eq!(cfg.duties, vec![0x16, 0x32, 0x64, 0x96, 0xC8, 0xFF]);
        assert_eq!(cfg.settle_delay(), Duration::from_secs(2));
        assert_eq!(cfg.reversal_delay(), Duration::from_secs(3));
        assert_eq!(cfg.addresses().len(), 48);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_addresses_follow_stride() {
        let cfg = DiscoveryConfig { start: 0x20, end: 0x2C, stride: 4, ..Default::default() };
        assert_eq!(cfg.addresses(), vec![0x20, 0x24, 0x28, 0x2C]);
        let cfg = DiscoveryConfig { start: 0x20, end: 0x2E, stride: 4, ..Default::default() };
        assert_eq!(cfg.addresses(), vec![0x20, 0x24, 0x28, 0x2C]);
    }

    #[test]
    fn test_addresses_reach_top_of_port_space() {
        let cfg = DiscoveryConfig { start: 0xFFFE, end: 0xFFFF, stride: 1, ..Default::default() };
        assert_eq!(cfg.addresses(), vec![0xFFFE, 0xFFFF]);
    }

    #[test]
    fn test_empty_range() {
        let cfg = DiscoveryConfig { start: 0x30, end: 0x20, ..Default::default() };
        assert!(cfg.is_empty_range());
        assert!(cfg.addresses().is_empty());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let cfg = DiscoveryConfig { stride: 0, ..Default::default() };
        assert!(matches!(cfg.validate(), Err(FanError::InvalidRange(_))));
        let cfg = DiscoveryConfig { duties: vec![], ..Default::default() };
        assert!(matches!(cfg.validate(), Err(FanError::Config(_))));
        let cfg = DiscoveryConfig { duties: vec![0x80, 0x40], ..Default::default() };
        assert!(matches!(cfg.validate(), Err(FanError::Config(_))));
        let cfg = DiscoveryConfig { duties: vec![0x00, 0x40], ..Default::default() };
        assert!(matches!(cfg.validate(), Err(FanError::Config(_))));
    }

    #[test]
    fn test_load_partial_json() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("discovery.json");
        fs::write(&path, r#"{ "start": 32, "end": 44, "stride": 4, "duties": [64, 128, 255] }"#).unwrap();
        let cfg = load_discovery_config(&path).unwrap();
        assert_eq!(cfg.addresses(), vec![0x20, 0x24, 0x28, 0x2C]);
        assert_eq!(cfg.settle_delay_ms, 2000);
        assert_eq!(cfg.device, PathBuf::from("/dev/port"));
    }

    #[test]
    fn test_load_rejects_unknown_fields_and_out_of_range() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.json");
        fs::write(&path, r#"{ "strat": 32 }"#).unwrap();
        assert!(matches!(load_discovery_config(&path), Err(FanError::Config(_))));
        fs::write(&path, r#"{ "end": 70000 }"#).unwrap();
        assert!(matches!(load_discovery_config(&path), Err(FanError::Config(_))));
        assert!(matches!(
            load_discovery_config(&dir.path().join("missing.json")),
            Err(FanError::Config(_))
        ));
    }

    #[test]
    fn test_monitor_defaults() {
        let cfg = MonitorConfig::default();
        assert_eq!(cfg.interval(), Duration::from_secs(2));
        assert!(cfg.ec_table.is_none());
        assert_eq!(cfg.hwmon_root, PathBuf::from("/sys/class/hwmon"));
    }
}
