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

use crate::hwmon::{read_value, FanChannel, HwmonRegistry, TempChannel};
use crate::logger;

pub const MILLI_DEGREES_PER_DEGREE: i64 = 1000;

/// Anything that can report the current fan RPM vector, in a stable order.
#[cfg_attr(test, mockall::automock)]
pub trait RpmSource {
    fn rpm_vector(&mut self) -> Vec<u64>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FanReading {
    pub channel: String,
    pub rpm: u64,
    pub failed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TempReading {
    pub channel: String,
    pub celsius: i64,
    pub failed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PwmReading {
    pub channel: String,
    pub value: u64,
    pub failed: bool,
}

/// Fresh reads over every channel of a registry. A failing channel reads
/// as zero and is flagged; the rest of the batch is unaffected.
#[derive(Debug, Clone, Copy)]
pub struct SensorReader<'a> {
    registry: &'a HwmonRegistry,
}

impl<'a> SensorReader<'a> {
    pub fn new(registry: &'a HwmonRegistry) -> Self {
        Self { registry }
    }

    pub fn read_fan_speeds(&self) -> Vec<FanReading> {
        self.registry
            .fan_channels()
            .into_iter()
            .map(|ch| {
                let (rpm, failed) = self.read_fan(&ch);
                FanReading { channel: ch.to_string(), rpm, failed }
            })
            .collect()
    }

    pub fn read_temperatures(&self) -> Vec<TempReading> {
        self.registry
            .temp_channels()
            .into_iter()
            .map(|ch| {
                let (celsius, failed) = self.read_temp(&ch);
                TempReading { channel: ch.to_string(), celsius, failed }
            })
            .collect()
    }

    pub fn read_pwm_values(&self) -> Vec<PwmReading> {
        self.registry
            .pwm_channels()
            .into_iter()
            .map(|ch| {
                let label = format!("{}:pwm{}", ch.device, ch.channel);
                let Some(dev) = self.registry.device(&ch.device) else {
                    return PwmReading { channel: label, value: 0, failed: true };
                };
                match read_value::<u64>(&dev.pwm(ch.channel)) {
                    Ok(value) => PwmReading { channel: label, value, failed: false },
                    Err(e) => {
                        log_failure(&label, &e.to_string());
                        PwmReading { channel: label, value: 0, failed: true }
                    }
                }
            })
            .collect()
    }

    fn read_fan(&self, ch: &FanChannel) -> (u64, bool) {
        let Some(dev) = self.registry.device(&ch.device) else { return (0, true) };
        match read_value::<u64>(&dev.fan_input(ch.channel)) {
            Ok(rpm) => (rpm, false),
            Err(e) => {
                log_failure(&ch.to_string(), &e.to_string());
                (0, true)
            }
        }
    }

    fn read_temp(&self, ch: &TempChannel) -> (i64, bool) {
        let Some(dev) = self.registry.device(&ch.device) else { return (0, true) };
        match read_value::<i64>(&dev.temp_input(ch.channel)) {
            Ok(mc) => (mc / MILLI_DEGREES_PER_DEGREE, false),
            Err(e) => {
                log_failure(&ch.to_string(), &e.to_string());
                (0, true)
            }
        }
    }
}

impl RpmSource for SensorReader<'_> {
    fn rpm_vector(&mut self) -> Vec<u64> {
        self.read_fan_speeds().into_iter().map(|r| r.rpm).collect()
    }
}

fn log_failure(channel: &str, error: &str) {
    logger::log_event("sensor_read_failure", json!({ "channel": channel, "error": error }));
}
