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

use std::thread;
use std::time::{Duration, Instant};

use serde::Serialize;
use serde_json::json;

use crate::config::MonitorConfig;
use crate::ec::{read_register_table, RegisterValue};
use crate::error::{FanError, Result};
use crate::hwmon::HwmonRegistry;
use crate::logger;
use crate::port::PortAccess;
use crate::probe::CancelFlag;
use crate::sensors::{FanReading, PwmReading, SensorReader, TempReading};

const IDLE_TICK: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum EcSample {
    Disabled,
    Values(Vec<RegisterValue>),
    /// A discovery session holds the port.
    Busy,
    Unavailable(String),
}

#[derive(Debug, Clone, Serialize)]
pub struct MonitorSample {
    pub ts_ms: u128,
    pub fans: Vec<FanReading>,
    pub temps: Vec<TempReading>,
    pub pwms: Vec<PwmReading>,
    pub ec: EcSample,
}

pub struct Monitor {
    config: MonitorConfig,
    registry: HwmonRegistry,
}

impl Monitor {
    pub fn new(config: MonitorConfig) -> Result<Self> {
        let registry = HwmonRegistry::discover(&config.hwmon_root)?;
        Ok(Self { config, registry })
    }

    pub fn registry(&self) -> &HwmonRegistry {
        &self.registry
    }

    /// One fresh read of every channel. The EC part never waits for the
    /// port lock.
    pub fn poll_once(&self) -> MonitorSample {
        let reader = SensorReader::new(&self.registry);
        MonitorSample {
            ts_ms: logger::now_millis(),
            fans: reader.read_fan_speeds(),
            temps: reader.read_temperatures(),
            pwms: reader.read_pwm_values(),
            ec: self.sample_ec(),
        }
    }

    fn sample_ec(&self) -> EcSample {
        let Some(table) = self.config.ec_table else { return EcSample::Disabled };
        match PortAccess::open(&self.config.device) {
            Ok(mut port) => EcSample::Values(read_register_table(&mut port, table)),
            Err(FanError::PortBusy(path)) => {
                logger::log_event("monitor_ec_busy", json!({ "device": path.display().to_string() }));
                EcSample::Busy
            }
            Err(e) => EcSample::Unavailable(e.to_string()),
        }
    }

    /// Poll every interval until `cancel` is set, handing each sample to
    /// `sink`. Returns the number of samples taken.
    pub fn run<F>(&self, cancel: &CancelFlag, mut sink: F) -> usize
    where
        F: FnMut(&MonitorSample),
    {
        let interval = self.config.interval();
        let mut taken = 0;
        let mut last: Option<Instant> = None;
        while !cancel.is_cancelled() {
            if last.is_some_and(|t| t.elapsed() < interval) {
                thread::sleep(IDLE_TICK.min(interval));
                continue;
            }
            last = Some(Instant::now());
            let sample = self.poll_once();
            sink(&sample);
            taken += 1;
        }
        taken
    }
}
