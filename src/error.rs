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

//! Error type shared by the sensor, actuator and discovery layers.
//!
//! The variants separate transient hardware failures (`IoFailure`) from
//! contract violations (`InvalidRange`, `Config`) and from fatal
//! preconditions (`PrivilegeError`, `DeviceUnavailable`, `PortBusy`).

use std::io;
use std::path::PathBuf;

/// Result type alias using FanError
pub type Result<T> = std::result::Result<T, FanError>;

#[derive(thiserror::Error, Debug)]
pub enum FanError {
    #[error("Device unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("I/O failure on {target}: {source}")]
    IoFailure {
        target: String,
        source: io::Error,
    },

    #[error("Value out of range: {0}")]
    InvalidRange(String),

    #[error("Permission denied - need root ({0})")]
    PrivilegeError(String),

    #[error("Register 0x{address:02X} changed fan behaviour at duty 0x{duty:02X} and did not revert")]
    Irreversible {
        address: u16,
        duty: u8,
    },

    #[error("Port device {0} is held by another session")]
    PortBusy(PathBuf),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to persist {path}: {source}")]
    Persist {
        path: PathBuf,
        source: io::Error,
    },
}

impl FanError {
    /// Classify an `io::Error` raised while touching `target`.
    pub fn from_io(target: impl Into<String>, err: io::Error) -> Self {
        let target = target.into();
        match err.kind() {
            io::ErrorKind::NotFound => FanError::DeviceUnavailable(target),
            io::ErrorKind::PermissionDenied => FanError::PrivilegeError(target),
            _ => FanError::IoFailure { target, source: err },
        }
    }

    pub fn io(target: impl Into<String>, err: io::Error) -> Self {
        FanError::IoFailure { target: target.into(), source: err }
    }

    /// True for failures that happen before any hardware mutation and must
    /// stop a discovery session.
    pub fn is_fatal_precondition(&self) -> bool {
        matches!(
            self,
            FanError::PrivilegeError(_)
                | FanError::DeviceUnavailable(_)
                | FanError::PortBusy(_)
                | FanError::Persist { .. }
                | FanError::Config(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_io_classifies_not_found() {
        let err = FanError::from_io("/dev/port", io::Error::new(io::ErrorKind::NotFound, "gone"));
        assert!(matches!(err, FanError::DeviceUnavailable(ref t) if t == "/dev/port"));
    }

    #[test]
    fn test_from_io_classifies_permission() {
        let err = FanError::from_io("/dev/port", io::Error::new(io::ErrorKind::PermissionDenied, "no"));
        assert!(matches!(err, FanError::PrivilegeError(_)));
        assert!(err.is_fatal_precondition());
    }

    #[test]
    fn test_from_io_other_is_io_failure() {
        let err = FanError::from_io("pwm1", io::Error::new(io::ErrorKind::Other, "bus"));
        assert!(matches!(err, FanError::IoFailure { .. }));
        assert!(!err.is_fatal_precondition());
    }

    #[test]
    fn test_display_messages() {
        let err = FanError::Irreversible { address: 0x24, duty: 0x80 };
        assert_eq!(
            err.to_string(),
            "Register 0x24 changed fan behaviour at duty 0x80 and did not revert"
        );
        let err = FanError::InvalidRange("pwm 300".to_string());
        assert_eq!(err.to_string(), "Value out of range: pwm 300");
        let err = FanError::PrivilegeError("/dev/port".to_string());
        assert_eq!(err.to_string(), "Permission denied - need root (/dev/port)");
    }
}
