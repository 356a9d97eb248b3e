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

//! Exclusive, byte-granular access to the raw I/O port space.
//!
//! `PortAccess` holds an `flock` on the device for as long as it lives, so a
//! discovery session and a monitor cannot touch the port at the same time.
//! Dropping the handle releases the lock on every exit path.

use std::fs::{File, OpenOptions};
use std::io;
use std::os::unix::fs::FileExt;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};

use serde_json::json;

use crate::error::{FanError, Result};
use crate::logger;

pub const DEFAULT_PORT_DEVICE: &str = "/dev/port";

/// Single-byte access to an absolute offset of a port address space.
#[cfg_attr(test, mockall::automock)]
pub trait PortIo {
    fn read_byte(&mut self, address: u16) -> Result<u8>;
    fn write_byte(&mut self, address: u16, value: u8) -> Result<()>;
}

impl<T: PortIo + ?Sized> PortIo for &mut T {
    fn read_byte(&mut self, address: u16) -> Result<u8> {
        (**self).read_byte(address)
    }

    fn write_byte(&mut self, address: u16, value: u8) -> Result<()> {
        (**self).write_byte(address, value)
    }
}

#[derive(Debug)]
pub struct PortAccess {
    file: File,
    path: PathBuf,
}

impl PortAccess {
    /// Open `path` read/write and take the exclusive lock without waiting.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let target = path.display().to_string();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|e| FanError::from_io(target.clone(), e))?;

        // SAFETY: the descriptor is owned by `file` and valid for this call.
        let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
        if rc != 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::WouldBlock {
                return Err(FanError::PortBusy(path.to_path_buf()));
            }
            return Err(FanError::io(target, err));
        }

        logger::log_event("port_open", json!({ "device": target }));
        Ok(Self { file, path: path.to_path_buf() })
    }

    /// Open the system port device.
    pub fn open_system() -> Result<Self> {
        Self::open(DEFAULT_PORT_DEVICE)
    }

    /// Release the port. Equivalent to dropping the handle.
    pub fn close(self) {}

    fn target(&self, address: u16) -> String {
        format!("{}@0x{:04X}", self.path.display(), address)
    }
}

impl PortIo for PortAccess {
    fn read_byte(&mut self, address: u16) -> Result<u8> {
        let mut buf = [0u8; 1];
        self.file
            .read_exact_at(&mut buf, u64::from(address))
            .map_err(|e| FanError::io(self.target(address), e))?;
        Ok(buf[0])
    }

    fn write_byte(&mut self, address: u16, value: u8) -> Result<()> {
        self.file
            .write_all_at(&[value], u64::from(address))
            .map_err(|e| FanError::io(self.target(address), e))
    }
}

impl Drop for PortAccess {
    fn drop(&mut self) {
        // SAFETY: the descriptor is still owned by `self.file`.
        unsafe {
            libc::flock(self.file.as_raw_fd(), libc::LOCK_UN);
        }
        logger::log_event("port_close", json!({ "device": self.path.display().to_string() }));
    }
}

/// Parse an address or byte given as decimal or `0x` hex.
pub fn parse_number(s: &str) -> Option<u32> {
    let s = s.trim();
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u32::from_str_radix(hex, 16).ok()
    } else {
        s.parse().ok()
    }
}

pub fn parse_address(s: &str) -> Result<u16> {
    let v = parse_number(s).ok_or_else(|| FanError::InvalidRange(format!("not a number: '{}'", s)))?;
    u16::try_from(v).map_err(|_| FanError::InvalidRange(format!("address {} outside 0x0000-0xFFFF", s)))
}

pub fn parse_byte(s: &str) -> Result<u8> {
    let v = parse_number(s).ok_or_else(|| FanError::InvalidRange(format!("not a number: '{}'", s)))?;
    u8::try_from(v).map_err(|_| FanError::InvalidRange(format!("byte {} outside 0-255", s)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn port_file(dir: &TempDir) -> PathBuf {
        let path = dir.path().join("port");
        fs::write(&path, vec![0u8; 0x100]).unwrap();
        path
    }

    #[test]
    fn test_round_trip_on_file_backed_port() {
        let dir = TempDir::new().unwrap();
        let path = port_file(&dir);
        let mut port = PortAccess::open(&path).unwrap();
        port.write_byte(0x24, 0x80).unwrap();
        assert_eq!(port.read_byte(0x24).unwrap(), 0x80);
        assert_eq!(port.read_byte(0x25).unwrap(), 0x00);
        port.close();
        assert_eq!(fs::read(&path).unwrap()[0x24], 0x80);
    }

    #[test]
    fn test_open_missing_device() {
        let dir = TempDir::new().unwrap();
        let err = PortAccess::open(dir.path().join("absent")).unwrap_err();
        assert!(matches!(err, FanError::DeviceUnavailable(_)));
    }

    #[test]
    fn test_second_open_is_busy_until_release() {
        let dir = TempDir::new().unwrap();
        let path = port_file(&dir);
        let first = PortAccess::open(&path).unwrap();
        let err = PortAccess::open(&path).unwrap_err();
        assert!(matches!(err, FanError::PortBusy(_)));
        drop(first);
        assert!(PortAccess::open(&path).is_ok());
    }

    #[test]
    fn test_read_past_end_is_io_failure() {
        let dir = TempDir::new().unwrap();
        let path = port_file(&dir);
        let mut port = PortAccess::open(&path).unwrap();
        let err = port.read_byte(0x2000).unwrap_err();
        assert!(matches!(err, FanError::IoFailure { .. }));
    }

    #[test]
    fn test_parse_number_forms() {
        assert_eq!(parse_number("0x2A0"), Some(0x2A0));
        assert_eq!(parse_number("0X10"), Some(16));
        assert_eq!(parse_number("42"), Some(42));
        assert_eq!(parse_number("zz"), None);
        assert_eq!(parse_address("0x10000").unwrap_err().to_string(), "Value out of range: address 0x10000 outside 0x0000-0xFFFF");
        assert_eq!(parse_byte("0xFF").unwrap(), 0xFF);
        assert!(matches!(parse_byte("256"), Err(FanError::InvalidRange(_))));
    }
}
