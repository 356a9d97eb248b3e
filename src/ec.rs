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

//! Embedded-controller command protocol and the candidate tables of
//! guessed fan commands / registers.
//!
//! Each table is immutable and picked explicitly by the caller. None of the
//! entries is known to be correct for a given machine; they are starting
//! points for `scan_command_set` and the register probe.

use std::fmt;
use std::str::FromStr;
use std::thread;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::error::{FanError, Result};
use crate::logger;
use crate::port::PortIo;

/// Wait between the command byte and the data byte.
pub const EC_PACING: Duration = Duration::from_millis(10);

/// Reply value that means "no such command".
pub const NO_RESPONSE: u8 = 0xFF;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EcPorts {
    pub command: u16,
    pub data: u16,
}

pub const EC_PORTS: EcPorts = EcPorts { command: 0x62, data: 0x63 };
pub const SMM_PORTS: EcPorts = EcPorts { command: 0x66, data: 0x67 };

/// Command/data exchange over a port pair. The command byte always goes out
/// first, followed by the pacing delay, then the data access.
pub struct EcChannel<P: PortIo> {
    port: P,
    ports: EcPorts,
    pacing: Duration,
}

impl<P: PortIo> EcChannel<P> {
    pub fn new(port: P, ports: EcPorts) -> Self {
        Self { port, ports, pacing: EC_PACING }
    }

    pub fn with_pacing(mut self, pacing: Duration) -> Self {
        self.pacing = pacing;
        self
    }

    pub fn read(&mut self, command: u8) -> Result<u8> {
        self.port.write_byte(self.ports.command, command)?;
        thread::sleep(self.pacing);
        self.port.read_byte(self.ports.data)
    }

    pub fn write(&mut self, command: u8, value: u8) -> Result<()> {
        self.port.write_byte(self.ports.command, command)?;
        thread::sleep(self.pacing);
        self.port.write_byte(self.ports.data, value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CommandSet {
    DellStandard,
    DellAlternate,
    Alienware,
    HighPerformance,
    Smm,
}

const FAN_SLOTS: [&str; 6] = ["fan1", "fan2", "fan3", "fan4", "fan5", "fan6"];

impl CommandSet {
    pub const ALL: [CommandSet; 5] = [
        CommandSet::DellStandard,
        CommandSet::DellAlternate,
        CommandSet::Alienware,
        CommandSet::HighPerformance,
        CommandSet::Smm,
    ];

    fn base(self) -> u8 {
        match self {
            CommandSet::DellStandard => 0x30,
            CommandSet::DellAlternate => 0x40,
            CommandSet::Alienware => 0x50,
            CommandSet::HighPerformance => 0x60,
            CommandSet::Smm => 0x70,
        }
    }

    pub fn ports(self) -> EcPorts {
        match self {
            CommandSet::Smm => SMM_PORTS,
            _ => EC_PORTS,
        }
    }

    /// (fan slot, command byte) pairs.
    pub fn commands(self) -> Vec<(&'static str, u8)> {
        FAN_SLOTS.iter().zip(0u8..).map(|(slot, i)| (*slot, self.base() + i)).collect()
    }

    pub fn name(self) -> &'static str {
        match self {
            CommandSet::DellStandard => "dell-standard",
            CommandSet::DellAlternate => "dell-alternate",
            CommandSet::Alienware => "alienware",
            CommandSet::HighPerformance => "high-performance",
            CommandSet::Smm => "smm",
        }
    }
}

impl fmt::Display for CommandSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for CommandSet {
    type Err = FanError;

    fn from_str(s: &str) -> Result<Self> {
        CommandSet::ALL
            .into_iter()
            .find(|c| c.name() == s)
            .ok_or_else(|| FanError::Config(format!("unknown command set '{}'", s)))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CommandResponse {
    pub slot: &'static str,
    pub command: u8,
    pub value: Option<u8>,
}

impl CommandResponse {
    pub fn is_working(&self) -> bool {
        matches!(self.value, Some(v) if v != NO_RESPONSE)
    }
}

/// Query every command of `set`. Failed exchanges are recorded as no value.
pub fn scan_command_set<P: PortIo>(channel: &mut EcChannel<P>, set: CommandSet) -> Vec<CommandResponse> {
    let out: Vec<CommandResponse> = set
        .commands()
        .into_iter()
        .map(|(slot, command)| CommandResponse { slot, command, value: channel.read(command).ok() })
        .collect();
    logger::log_event(
        "ec_command_scan",
        json!({
            "set": set.name(),
            "working": out.iter().filter(|r| r.is_working()).map(|r| r.command).collect::<Vec<_>>(),
        }),
    );
    out
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RegisterTable {
    /// Direct-register layout, one fan every 4 bytes from 0x20.
    AlienwareDirect,
    /// Registers confirmed writable on the reference machine.
    AlienwareUnlocked,
}

impl RegisterTable {
    pub const ALL: [RegisterTable; 2] = [RegisterTable::AlienwareDirect, RegisterTable::AlienwareUnlocked];

    pub fn registers(self) -> &'static [(&'static str, u16)] {
        match self {
            RegisterTable::AlienwareDirect => &[
                ("cpu_fan", 0x20),
                ("gpu_fan", 0x24),
                ("vrm_fan", 0x28),
                ("exhaust_fan", 0x2C),
                ("chassis_fan", 0x30),
                ("memory_fan", 0x34),
            ],
            RegisterTable::AlienwareUnlocked => &[
                ("gpu_fan", 0x24),
                ("vrm_fan", 0x28),
                ("exhaust_fan", 0x2C),
                ("chassis_fan", 0x30),
                ("memory_fan", 0x34),
                ("additional_fan_1", 0x38),
                ("additional_fan_2", 0x3C),
            ],
        }
    }

    pub fn address_of(self, name: &str) -> Option<u16> {
        self.registers().iter().find(|(n, _)| *n == name).map(|(_, a)| *a)
    }

    pub fn name(self) -> &'static str {
        match self {
            RegisterTable::AlienwareDirect => "alienware-direct",
            RegisterTable::AlienwareUnlocked => "alienware-unlocked",
        }
    }
}

impl fmt::Display for RegisterTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for RegisterTable {
    type Err = FanError;

    fn from_str(s: &str) -> Result<Self> {
        RegisterTable::ALL
            .into_iter()
            .find(|t| t.name() == s)
            .ok_or_else(|| FanError::Config(format!("unknown register table '{}'", s)))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RegisterValue {
    pub name: &'static str,
    pub address: u16,
    pub value: Option<u8>,
    pub error: Option<String>,
}

/// Read every register of `table`; a failing register does not stop the rest.
pub fn read_register_table<P: PortIo>(port: &mut P, table: RegisterTable) -> Vec<RegisterValue> {
    table
        .registers()
        .iter()
        .map(|&(name, address)| match port.read_byte(address) {
            Ok(v) => RegisterValue { name, address, value: Some(v), error: None },
            Err(e) => RegisterValue { name, address, value: None, error: Some(e.to_string()) },
        })
        .collect()
}

/// Write one named register of `table`.
pub fn write_register<P: PortIo>(port: &mut P, table: RegisterTable, name: &str, value: u8) -> Result<()> {
    let address = table
        .address_of(name)
        .ok_or_else(|| FanError::Config(format!("register '{}' is not part of {}", name, table)))?;
    port.write_byte(address, value)?;
    logger::log_event(
        "ec_register_write",
        json!({ "table": table.name(), "name": name, "address": address, "value": value }),
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::MockPortIo;
    use crate::test_utils::test_utils::{create_sim_hardware, PortOp, SimPort};
    use mockall::Sequence;

    #[test]
    fn test_channel_read_orders_command_before_data() {
        let mut mock = MockPortIo::new();
        let mut seq = Sequence::new();
        mock.expect_write_byte()
            .withf(|a, v| *a == 0x62 && *v == 0x30)
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(()));
        mock.expect_read_byte()
            .withf(|a| *a == 0x63)
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(42));

        let mut ch = EcChannel::new(mock, EC_PORTS).with_pacing(Duration::ZERO);
        assert_eq!(ch.read(0x30).unwrap(), 42);
    }

    #[test]
    fn test_channel_write_stops_when_command_fails() {
        let mut mock = MockPortIo::new();
        mock.expect_write_byte()
            .withf(|a, _| *a == 0x66)
            .times(1)
            .returning(|a, _| Err(FanError::io(format!("0x{:X}", a), std::io::Error::new(std::io::ErrorKind::Other, "x"))));
        mock.expect_read_byte().times(0);

        let mut ch = EcChannel::new(mock, SMM_PORTS).with_pacing(Duration::ZERO);
        assert!(ch.write(0x80, 1).is_err());
    }

    #[test]
    fn test_channel_write_sequence_on_sim_port() {
        let hw = create_sim_hardware(vec![]);
        let mut ch = EcChannel::new(SimPort { hw: hw.clone() }, EC_PORTS).with_pacing(Duration::ZERO);
        ch.write(0x31, 0x7F).unwrap();
        assert_eq!(hw.borrow().ops, vec![PortOp::Write(0x62, 0x31), PortOp::Write(0x63, 0x7F)]);
    }

    /// Records when each access happened.
    struct TimedPort {
        stamps: Vec<(u16, std::time::Instant)>,
    }

    impl PortIo for TimedPort {
        fn read_byte(&mut self, address: u16) -> Result<u8> {
            self.stamps.push((address, std::time::Instant::now()));
            Ok(0x21)
        }

        fn write_byte(&mut self, address: u16, _value: u8) -> Result<()> {
            self.stamps.push((address, std::time::Instant::now()));
            Ok(())
        }
    }

    #[test]
    fn test_channel_waits_pacing_between_command_and_data() {
        let pacing = Duration::from_millis(25);
        let mut port = TimedPort { stamps: Vec::new() };
        {
            let mut ch = EcChannel::new(&mut port, EC_PORTS).with_pacing(pacing);
            assert_eq!(ch.read(0x30).unwrap(), 0x21);
            ch.write(0x31, 0x7F).unwrap();
        }
        let s = &port.stamps;
        assert_eq!(s.iter().map(|(a, _)| *a).collect::<Vec<_>>(), vec![0x62, 0x63, 0x62, 0x63]);
        assert!(s[1].1.duration_since(s[0].1) >= pacing);
        assert!(s[3].1.duration_since(s[2].1) >= pacing);
    }

    #[test]
    fn test_default_pacing_is_ten_ms() {
        let mut port = TimedPort { stamps: Vec::new() };
        EcChannel::new(&mut port, SMM_PORTS).read(0x70).unwrap();
        let s = &port.stamps;
        assert_eq!((s[0].0, s[1].0), (0x66, 0x67));
        assert!(s[1].1.duration_since(s[0].1) >= EC_PACING);
    }

    #[test]
    fn test_command_sets_are_distinct_tables() {
        assert_eq!(CommandSet::DellStandard.commands()[0], ("fan1", 0x30));
        assert_eq!(CommandSet::Smm.commands()[5], ("fan6", 0x75));
        assert_eq!(CommandSet::Smm.ports(), SMM_PORTS);
        assert_eq!(CommandSet::Alienware.ports(), EC_PORTS);
        assert_eq!("high-performance".parse::<CommandSet>().unwrap(), CommandSet::HighPerformance);
        assert!("set3".parse::<CommandSet>().is_err());
    }

    #[test]
    fn test_scan_command_set_flags_no_response() {
        let hw = create_sim_hardware(vec![]);
        // data port answers 0xFF for everything
        hw.borrow_mut().registers[0x63] = NO_RESPONSE;
        let mut ch = EcChannel::new(SimPort { hw: hw.clone() }, EC_PORTS).with_pacing(Duration::ZERO);
        let out = scan_command_set(&mut ch, CommandSet::DellStandard);
        assert_eq!(out.len(), 6);
        assert!(out.iter().all(|r| !r.is_working()));

        hw.borrow_mut().registers[0x63] = 0x21;
        let out = scan_command_set(&mut ch, CommandSet::DellStandard);
        assert!(out.iter().all(|r| r.is_working()));
    }

    #[test]
    fn test_register_tables() {
        assert_eq!(RegisterTable::AlienwareDirect.address_of("cpu_fan"), Some(0x20));
        assert_eq!(RegisterTable::AlienwareUnlocked.address_of("cpu_fan"), None);
        assert_eq!(RegisterTable::AlienwareUnlocked.address_of("additional_fan_2"), Some(0x3C));
        assert_eq!("alienware-direct".parse::<RegisterTable>().unwrap(), RegisterTable::AlienwareDirect);
        let json = serde_json::to_string(&RegisterTable::AlienwareUnlocked).unwrap();
        assert_eq!(json, "\"alienware-unlocked\"");
    }

    #[test]
    fn test_read_register_table_partial_failure() {
        let hw = create_sim_hardware(vec![]);
        hw.borrow_mut().fail_reads.insert(0x28);
        let mut port = SimPort { hw };
        let values = read_register_table(&mut port, RegisterTable::AlienwareDirect);
        assert_eq!(values.len(), 6);
        assert_eq!(values[0].value, Some(0x02));
        assert!(values[2].value.is_none());
        assert!(values[2].error.is_some());
        assert_eq!(values[3].value, Some(0x02));
    }

    #[test]
    fn test_write_register_rejects_foreign_name() {
        let hw = create_sim_hardware(vec![]);
        let mut port = SimPort { hw: hw.clone() };
        assert!(write_register(&mut port, RegisterTable::AlienwareUnlocked, "cpu_fan", 10).is_err());
        assert!(hw.borrow().ops.is_empty());
        write_register(&mut port, RegisterTable::AlienwareUnlocked, "gpu_fan", 10).unwrap();
        assert_eq!(hw.borrow().registers[0x24], 10);
    }
}
