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

use std::path::PathBuf;

use crate::config::DiscoveryConfig;
use crate::ec::{CommandSet, RegisterTable};
use crate::error::{FanError, Result};
use crate::port::{parse_address, parse_byte, parse_number, DEFAULT_PORT_DEVICE};

pub const USAGE: &str = "\
usage: fanprobe [--logging] <command> [options]

commands:
  status                                 fans, temperatures and PWM values
  set-pwm <hwmonN> <channel> <value>     write one PWM channel (0-255)
  set-all <value>                        write every writable PWM channel
  discover [--config F] [--start A] [--end A] [--stride N] [--duties A,B,..]
           [--settle-ms N] [--reversal-ms N] [--log-dir D] [--device P]
  restore <backup-file> [--device P]     write a saved EC backup back
  monitor [--interval-ms N] [--ec-table T] [--device P]
  scan-commands <set> [--device P]       dell-standard, dell-alternate, alienware,
                                         high-performance, smm
  ec-read <addr> [--device P]
  ec-write <addr> <value> [--device P]

numbers accept decimal or 0x hex";

/// Command-line overrides for a discovery session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiscoverArgs {
    pub config: Option<PathBuf>,
    pub start: Option<u16>,
    pub end: Option<u16>,
    pub stride: Option<u16>,
    pub duties: Option<Vec<u8>>,
    pub settle_ms: Option<u64>,
    pub reversal_ms: Option<u64>,
    pub log_dir: Option<PathBuf>,
    pub device: Option<PathBuf>,
}

impl DiscoverArgs {
    /// Flags win over values from the config file.
    pub fn apply(&self, mut cfg: DiscoveryConfig) -> DiscoveryConfig {
        if let Some(v) = self.start {
            cfg.start = v;
        }
        if let Some(v) = self.end {
            cfg.end = v;
        }
        if let Some(v) = self.stride {
            cfg.stride = v;
        }
        if let Some(v) = &self.duties {
            cfg.duties = v.clone();
        }
        if let Some(v) = self.settle_ms {
            cfg.settle_delay_ms = v;
        }
        if let Some(v) = self.reversal_ms {
            cfg.reversal_delay_ms = v;
        }
        if let Some(v) = &self.log_dir {
            cfg.log_dir = v.clone();
        }
        if let Some(v) = &self.device {
            cfg.device = v.clone();
        }
        cfg
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Help,
    Status,
    SetPwm { device: String, channel: u32, value: i64 },
    SetAll { value: i64 },
    Discover(DiscoverArgs),
    Restore { backup: PathBuf, device: PathBuf },
    Monitor { interval_ms: Option<u64>, ec_table: Option<RegisterTable>, device: Option<PathBuf> },
    ScanCommands { set: CommandSet, device: PathBuf },
    EcRead { address: u16, device: PathBuf },
    EcWrite { address: u16, value: u8, device: PathBuf },
}

impl Command {
    /// Commands that open the port device or write sysfs PWM files.
    pub fn needs_root(&self) -> bool {
        !matches!(self, Command::Help | Command::Status | Command::Monitor { ec_table: None, .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cli {
    pub logging: bool,
    pub command: Command,
}

fn usage_err(msg: impl Into<String>) -> FanError {
    FanError::Config(msg.into())
}

fn parse_int(s: &str) -> Result<i64> {
    if let Some(neg) = s.strip_prefix('-') {
        return parse_int(neg).map(|v| -v);
    }
    parse_number(s)
        .map(i64::from)
        .ok_or_else(|| FanError::InvalidRange(format!("not a number: '{}'", s)))
}

fn parse_u64(s: &str) -> Result<u64> {
    s.trim().parse().map_err(|_| usage_err(format!("expected a non-negative integer, got '{}'", s)))
}

fn parse_duties(s: &str) -> Result<Vec<u8>> {
    s.split(',').filter(|p| !p.trim().is_empty()).map(parse_byte).collect()
}

/// Pulls `--flag value` pairs out of the arguments after the subcommand,
/// leaving positionals in order.
struct ArgCursor<'a> {
    positional: Vec<&'a str>,
    flags: Vec<(&'a str, &'a str)>,
}

impl<'a> ArgCursor<'a> {
    fn split(args: &'a [String], known: &[&str]) -> Result<Self> {
        let mut positional = Vec::new();
        let mut flags = Vec::new();
        let mut it = args.iter();
        while let Some(arg) = it.next() {
            if arg.starts_with("--") {
                if !known.contains(&arg.as_str()) {
                    return Err(usage_err(format!("unknown option '{}'", arg)));
                }
                let value = it.next().ok_or_else(|| usage_err(format!("{} needs a value", arg)))?;
                flags.push((arg.as_str(), value.as_str()));
            } else {
                positional.push(arg.as_str());
            }
        }
        Ok(Self { positional, flags })
    }

    fn flag(&self, name: &str) -> Option<&'a str> {
        self.flags.iter().rev().find(|(n, _)| *n == name).map(|(_, v)| *v)
    }

    fn device(&self) -> PathBuf {
        PathBuf::from(self.flag("--device").unwrap_or(DEFAULT_PORT_DEVICE))
    }

    fn expect_positionals(&self, cmd: &str, n: usize) -> Result<()> {
        if self.positional.len() != n {
            return Err(usage_err(format!(
                "{} takes {} argument(s), got {}",
                cmd,
                n,
                self.positional.len()
            )));
        }
        Ok(())
    }
}

/// Parse the arguments that follow the program name.
pub fn parse_args(args: &[String]) -> Result<Cli> {
    let logging = args.iter().any(|a| a == "--logging");
    let rest: Vec<String> = args.iter().filter(|a| *a != "--logging").cloned().collect();

    let Some((name, tail)) = rest.split_first() else {
        return Ok(Cli { logging, command: Command::Help });
    };

    let command = match name.as_str() {
        "help" | "-h" | "--help" => Command::Help,
        "status" => {
            ArgCursor::split(tail, &[])?.expect_positionals("status", 0)?;
            Command::Status
        }
        "set-pwm" => {
            let c = ArgCursor::split(tail, &[])?;
            c.expect_positionals("set-pwm", 3)?;
            let channel = parse_number(c.positional[1])
                .ok_or_else(|| usage_err(format!("bad channel '{}'", c.positional[1])))?;
            Command::SetPwm { device: c.positional[0].to_string(), channel, value: parse_int(c.positional[2])? }
        }
        "set-all" => {
            let c = ArgCursor::split(tail, &[])?;
            c.expect_positionals("set-all", 1)?;
            Command::SetAll { value: parse_int(c.positional[0])? }
        }
        "discover" => {
            let c = ArgCursor::split(
                tail,
                &[
                    "--config",
                    "--start",
                    "--end",
                    "--stride",
                    "--duties",
                    "--settle-ms",
                    "--reversal-ms",
                    "--log-dir",
                    "--device",
                ],
            )?;
            c.expect_positionals("discover", 0)?;
            Command::Discover(DiscoverArgs {
                config: c.flag("--config").map(PathBuf::from),
                start: c.flag("--start").map(parse_address).transpose()?,
                end: c.flag("--end").map(parse_address).transpose()?,
                stride: c.flag("--stride").map(parse_address).transpose()?,
                duties: c.flag("--duties").map(parse_duties).transpose()?,
                settle_ms: c.flag("--settle-ms").map(parse_u64).transpose()?,
                reversal_ms: c.flag("--reversal-ms").map(parse_u64).transpose()?,
                log_dir: c.flag("--log-dir").map(PathBuf::from),
                device: c.flag("--device").map(PathBuf::from),
            })
        }
        "restore" => {
            let c = ArgCursor::split(tail, &["--device"])?;
            c.expect_positionals("restore", 1)?;
            Command::Restore { backup: PathBuf::from(c.positional[0]), device: c.device() }
        }
        "monitor" => {
            let c = ArgCursor::split(tail, &["--interval-ms", "--ec-table", "--device"])?;
            c.expect_positionals("monitor", 0)?;
            Command::Monitor {
                interval_ms: c.flag("--interval-ms").map(parse_u64).transpose()?,
                ec_table: c.flag("--ec-table").map(str::parse::<RegisterTable>).transpose()?,
                device: c.flag("--device").map(PathBuf::from),
            }
        }
        "scan-commands" => {
            let c = ArgCursor::split(tail, &["--device"])?;
            c.expect_positionals("scan-commands", 1)?;
            Command::ScanCommands { set: c.positional[0].parse::<CommandSet>()?, device: c.device() }
        }
        "ec-read" => {
            let c = ArgCursor::split(tail, &["--device"])?;
            c.expect_positionals("ec-read", 1)?;
            Command::EcRead { address: parse_address(c.positional[0])?, device: c.device() }
        }
        "ec-write" => {
            let c = ArgCursor::split(tail, &["--device"])?;
            c.expect_positionals("ec-write", 2)?;
            Command::EcWrite {
                address: parse_address(c.positional[0])?,
                value: parse_byte(c.positional[1])?,
                device: c.device(),
            }
        }
        other => return Err(usage_err(format!("unknown command '{}'", other))),
    };
    Ok(Cli { logging, command })
}
