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

use serde::Serialize;
use serde_json::json;

use crate::error::{FanError, Result};
use crate::hwmon::{write_pwm_raw, FanChannel, HwmonRegistry};
use crate::logger;

/// Duty value already checked against 0..=255.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct PwmValue(u8);

impl PwmValue {
    pub const MAX: i64 = 255;

    pub fn new(raw: i64) -> Result<Self> {
        u8::try_from(raw)
            .map(PwmValue)
            .map_err(|_| FanError::InvalidRange(format!("PWM value {} (must be 0-{})", raw, Self::MAX)))
    }

    pub fn get(self) -> u8 {
        self.0
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ChannelOutcome {
    pub channel: String,
    pub error: Option<String>,
}

/// Result of a bulk write. Not atomic: check `failures()` for channels
/// that kept their previous value.
#[derive(Debug, Clone, Serialize)]
pub struct SetAllReport {
    pub value: u8,
    pub outcomes: Vec<ChannelOutcome>,
}

impl SetAllReport {
    pub fn all_ok(&self) -> bool {
        self.outcomes.iter().all(|o| o.error.is_none())
    }

    pub fn failures(&self) -> impl Iterator<Item = &ChannelOutcome> {
        self.outcomes.iter().filter(|o| o.error.is_some())
    }
}

pub struct PwmActuator<'a> {
    registry: &'a HwmonRegistry,
}

impl<'a> PwmActuator<'a> {
    pub fn new(registry: &'a HwmonRegistry) -> Self {
        Self { registry }
    }

    /// Write one channel. Out-of-range values never reach the hardware.
    pub fn set(&self, device: &str, channel: u32, value: i64) -> Result<()> {
        let value = PwmValue::new(value)?;
        self.write(&FanChannel { device: device.to_string(), channel }, value)
    }

    pub fn set_all(&self, value: i64) -> Result<SetAllReport> {
        let value = PwmValue::new(value)?;
        let outcomes = self
            .registry
            .pwm_channels()
            .into_iter()
            .map(|ch| {
                let error = self.write(&ch, value).err().map(|e| e.to_string());
                ChannelOutcome { channel: format!("{}:pwm{}", ch.device, ch.channel), error }
            })
            .collect();
        Ok(SetAllReport { value: value.get(), outcomes })
    }

    fn write(&self, ch: &FanChannel, value: PwmValue) -> Result<()> {
        let dev = self
            .registry
            .device(&ch.device)
            .filter(|d| d.pwm_fans.contains(&ch.channel))
            .ok_or_else(|| FanError::DeviceUnavailable(format!("{}:pwm{}", ch.device, ch.channel)))?;

        match write_pwm_raw(&dev.path, ch.channel, value.get()) {
            Ok(written) => {
                logger::log_event(
                    "pwm_write",
                    json!({
                        "device": ch.device,
                        "channel": ch.channel,
                        "requested_raw": value.get(),
                        "written": written,
                    }),
                );
                Ok(())
            }
            Err(e) => {
                let target = dev.pwm(ch.channel).display().to_string();
                logger::log_event("pwm_write_failure", json!({ "target": target, "error": e.to_string() }));
                Err(FanError::io(target, e))
            }
        }
    }
}
