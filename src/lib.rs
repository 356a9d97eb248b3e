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

//! Fanprobe - laptop fan discovery and control for Linux
//!
//! This library reads hwmon fan and temperature sensors, writes bounded PWM
//! values, and finds undocumented embedded-controller fan registers by
//! poking them one at a time through `/dev/port` and watching the fans.

pub mod error;
pub mod logger;
pub mod port;
pub mod hwmon;
pub mod sensors;
pub mod pwm;
pub mod config;
pub mod ec;
pub mod backup;
pub mod discovery_log;
pub mod probe;
pub mod monitor;
pub mod cli;

#[cfg(test)]
pub mod test_utils;
