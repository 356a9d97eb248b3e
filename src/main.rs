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

use std::path::Path;

use anyhow::{bail, Context};
use serde_json::json;

use fanprobe::backup::EcBackupSnapshot;
use fanprobe::cli::{self, Command, DiscoverArgs};
use fanprobe::config::{load_discovery_config, DiscoveryConfig, MonitorConfig};
use fanprobe::discovery_log::DiscoveryLog;
use fanprobe::ec::{scan_command_set, CommandSet, EcChannel};
use fanprobe::hwmon::HwmonRegistry;
use fanprobe::logger;
use fanprobe::monitor::{EcSample, Monitor, MonitorSample};
use fanprobe::port::{PortAccess, PortIo};
use fanprobe::probe::{CancelFlag, RegisterProbe};
use fanprobe::pwm::PwmActuator;
use fanprobe::sensors::SensorReader;

fn main() -> anyhow::Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let cli = match cli::parse_args(&args) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("error: {e}");
            eprintln!("{}", cli::USAGE);
            std::process::exit(2);
        }
    };

    if cli.logging {
        if let Some(path) = logger::init_logging(None) {
            eprintln!("fanprobe: logging to {}", path.display());
        }
        logger::log_event("startup", json!({ "args": args }));
    }

    if cli.command.needs_root() && unsafe { libc::geteuid() } != 0 {
        eprintln!("Error: this command needs root privileges to access /dev/port or sysfs PWM files.");
        eprintln!("Please run with: sudo fanprobe {}", args.join(" "));
        std::process::exit(1);
    }

    let res = run(cli.command);
    if let Err(err) = &res {
        logger::log_event("fatal_error", json!({ "error": format!("{err:#}") }));
    }
    logger::shutdown_logging();
    res
}

fn run(command: Command) -> anyhow::Result<()> {
    match command {
        Command::Help => {
            println!("{}", cli::USAGE);
            Ok(())
        }
        Command::Status => status(),
        Command::SetPwm { device, channel, value } => {
            let registry = HwmonRegistry::discover_system()?;
            PwmActuator::new(&registry)
                .set(&device, channel, value)
                .with_context(|| format!("set {}:pwm{}", device, channel))?;
            println!("{}:pwm{} = {}", device, channel, value);
            Ok(())
        }
        Command::SetAll { value } => {
            let registry = HwmonRegistry::discover_system()?;
            let report = PwmActuator::new(&registry).set_all(value)?;
            for o in &report.outcomes {
                match &o.error {
                    None => println!("{} = {}", o.channel, report.value),
                    Some(e) => eprintln!("{}: {}", o.channel, e),
                }
            }
            if !report.all_ok() {
                bail!("{} channel(s) kept their previous value", report.failures().count());
            }
            Ok(())
        }
        Command::Discover(args) => discover(&args),
        Command::Restore { backup, device } => restore(&backup, &device),
        Command::Monitor { interval_ms, ec_table, device } => {
            let mut cfg = MonitorConfig { ec_table, ..Default::default() };
            if let Some(ms) = interval_ms {
                cfg.interval_ms = ms;
            }
            if let Some(d) = device {
                cfg.device = d;
            }
            monitor(cfg)
        }
        Command::ScanCommands { set, device } => scan_commands(set, &device),
        Command::EcRead { address, device } => {
            let mut port = PortAccess::open(&device)?;
            let value = port.read_byte(address)?;
            println!("0x{:04X} = 0x{:02X}", address, value);
            Ok(())
        }
        Command::EcWrite { address, value, device } => {
            let mut port = PortAccess::open(&device)?;
            port.write_byte(address, value)?;
            logger::log_event("ec_write", json!({ "address": address, "value": value }));
            println!("0x{:04X} <- 0x{:02X}", address, value);
            Ok(())
        }
    }
}

fn status() -> anyhow::Result<()> {
    let registry = HwmonRegistry::discover_system()?;
    for dev in registry.devices().values() {
        println!("{} ({})", dev.id, dev.name);
    }
    let reader = SensorReader::new(&registry);
    for f in reader.read_fan_speeds() {
        println!("  {:<16} {:>6} RPM{}", f.channel, f.rpm, if f.failed { "  (read failed)" } else { "" });
    }
    for t in reader.read_temperatures() {
        println!("  {:<16} {:>6} C{}", t.channel, t.celsius, if t.failed { "  (read failed)" } else { "" });
    }
    for p in reader.read_pwm_values() {
        println!("  {:<16} {:>6}{}", p.channel, p.value, if p.failed { "  (read failed)" } else { "" });
    }
    Ok(())
}

fn install_cancel_handler(what: &str) -> anyhow::Result<CancelFlag> {
    let cancel = CancelFlag::new();
    let handle = cancel.clone();
    let what = what.to_string();
    ctrlc::set_handler(move || {
        eprintln!("fanprobe: stopping {} at the next safe point", what);
        handle.cancel();
    })
    .context("install Ctrl-C handler")?;
    Ok(cancel)
}

fn discover(args: &DiscoverArgs) -> anyhow::Result<()> {
    let base = match &args.config {
        Some(path) => load_discovery_config(path)?,
        None => DiscoveryConfig::default(),
    };
    let cfg = args.apply(base);
    cfg.validate()?;

    let registry = HwmonRegistry::discover_system()?;
    if !cfg.is_empty_range() && registry.fan_channels().is_empty() {
        bail!("no fan tachometer channels found under {}; nothing to observe", registry.root().display());
    }

    let cancel = install_cancel_handler("discovery")?;
    let log = DiscoveryLog::create(&cfg.log_dir)?;
    eprintln!("fanprobe: session log {}", log.log_path().display());

    let device = cfg.device.clone();
    let mut probe = RegisterProbe::new(cfg, SensorReader::new(&registry), log)?;
    let summary = probe
        .run(|| PortAccess::open(&device), &cancel)
        .context("discovery session aborted before any write")?;

    println!("probed:       {}", summary.probed.len());
    for (a, d) in &summary.confirmed {
        println!("confirmed:    0x{:04X} at duty 0x{:02X}", a, d);
    }
    for (a, d) in &summary.irreversible {
        println!("IRREVERSIBLE: 0x{:04X} at duty 0x{:02X}", a, d);
    }
    println!("no effect:    {}", summary.no_effect.len());
    println!("I/O failures: {}", summary.io_failures.len());
    if summary.cancelled {
        println!("session cancelled; backup restored");
    }
    println!("log:    {}", summary.log_path.display());
    println!("hits:   {}", summary.hits_path.display());
    println!("backup: {}", summary.backup_path.display());
    if !summary.restore_failures.is_empty() {
        bail!(
            "final restore failed for {:?}; recover with: fanprobe restore {}",
            summary.restore_failures,
            summary.backup_path.display()
        );
    }
    Ok(())
}

fn restore(backup: &Path, device: &Path) -> anyhow::Result<()> {
    let snapshot = EcBackupSnapshot::load(backup).with_context(|| format!("load {}", backup.display()))?;
    let mut port = PortAccess::open(device)?;
    let report = snapshot.restore(&mut port);
    logger::log_event(
        "manual_restore",
        json!({ "backup": backup.display().to_string(), "restored": report.restored, "failed": report.failed }),
    );
    println!("restored {} of {} registers", report.restored, snapshot.len());
    if !report.is_complete() {
        let failed: Vec<String> = report.failed.iter().map(|a| format!("0x{:04X}", a)).collect();
        bail!("could not restore {}", failed.join(", "));
    }
    Ok(())
}

fn print_sample(s: &MonitorSample) {
    let fans: Vec<String> = s.fans.iter().map(|f| format!("{}={}", f.channel, f.rpm)).collect();
    let temps: Vec<String> = s.temps.iter().map(|t| format!("{}={}C", t.channel, t.celsius)).collect();
    let ec = match &s.ec {
        EcSample::Disabled => String::new(),
        EcSample::Busy => " ec=busy".to_string(),
        EcSample::Unavailable(reason) => format!(" ec=unavailable({})", reason),
        EcSample::Values(values) => {
            let regs: Vec<String> = values
                .iter()
                .map(|v| match v.value {
                    Some(b) => format!("{}=0x{:02X}", v.name, b),
                    None => format!("{}=?", v.name),
                })
                .collect();
            format!(" ec[{}]", regs.join(" "))
        }
    };
    println!("{} {}{}", fans.join(" "), temps.join(" "), ec);
}

fn monitor(cfg: MonitorConfig) -> anyhow::Result<()> {
    let cancel = install_cancel_handler("monitor")?;
    let monitor = Monitor::new(cfg)?;
    let taken = monitor.run(&cancel, print_sample);
    logger::log_event("monitor_stop", json!({ "samples": taken }));
    Ok(())
}

fn scan_commands(set: CommandSet, device: &Path) -> anyhow::Result<()> {
    let port = PortAccess::open(device)?;
    let mut channel = EcChannel::new(port, set.ports());
    let responses = scan_command_set(&mut channel, set);
    println!("{} (command 0x{:02X}, data 0x{:02X})", set, set.ports().command, set.ports().data);
    for r in &responses {
        let value = match r.value {
            Some(v) => format!("0x{:02X}", v),
            None => "error".to_string(),
        };
        println!(
            "  {} cmd 0x{:02X} -> {}{}",
            r.slot,
            r.command,
            value,
            if r.is_working() { "  working" } else { "" }
        );
    }
    Ok(())
}
