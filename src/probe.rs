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

//! Poke-and-watch register discovery.
//!
//! One address at a time, one duty at a time: write a duty, wait, compare
//! the fan RPM vector with the baseline, and when it moved, write the
//! neutral value to check the change reverts. Every address gets its
//! original byte back before the next one is touched, and the whole backup
//! is written back once more when the session ends or is cancelled.
//!
//! Per-address states:
//!
//! ```text
//! Idle -> BaselineCaptured -> DutyWritten -> Observed
//!      -> (ReversalWritten -> ReversalObserved) -> Classified
//! ```

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use serde::Serialize;
use serde_json::json;

use crate::backup::EcBackupSnapshot;
use crate::config::DiscoveryConfig;
use crate::discovery_log::DiscoveryLog;
use crate::error::{FanError, Result};
use crate::port::PortIo;
use crate::sensors::RpmSource;

/// Shared cancel request, checked between addresses only.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeState {
    Idle,
    BaselineCaptured,
    DutyWritten,
    Observed,
    ReversalWritten,
    ReversalObserved,
    Classified,
}

impl ProbeState {
    pub fn as_str(self) -> &'static str {
        match self {
            ProbeState::Idle => "idle",
            ProbeState::BaselineCaptured => "baseline_captured",
            ProbeState::DutyWritten => "duty_written",
            ProbeState::Observed => "observed",
            ProbeState::ReversalWritten => "reversal_written",
            ProbeState::ReversalObserved => "reversal_observed",
            ProbeState::Classified => "classified",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum ProbeVerdict {
    Confirmed { address: u16, duty: u8 },
    Irreversible { address: u16, duty: u8 },
    NoEffect { address: u16 },
}

/// RPM vectors seen while testing one duty on one address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProbeObservation {
    pub address: u16,
    pub duty: u8,
    pub baseline: Vec<u64>,
    pub observed: Vec<u64>,
    pub reversal: Option<Vec<u64>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IoFailureRecord {
    pub address: u16,
    pub duty: Option<u8>,
    pub error: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct DiscoverySummary {
    pub probed: Vec<u16>,
    pub confirmed: Vec<(u16, u8)>,
    pub irreversible: Vec<(u16, u8)>,
    pub no_effect: Vec<u16>,
    pub io_failures: Vec<IoFailureRecord>,
    /// Addresses the final full restore could not write back.
    pub restore_failures: Vec<u16>,
    pub cancelled: bool,
    pub log_path: PathBuf,
    pub hits_path: PathBuf,
    pub backup_path: PathBuf,
}

impl DiscoverySummary {
    fn record(&mut self, verdict: ProbeVerdict) {
        match verdict {
            ProbeVerdict::Confirmed { address, duty } => self.confirmed.push((address, duty)),
            ProbeVerdict::Irreversible { address, duty } => self.irreversible.push((address, duty)),
            ProbeVerdict::NoEffect { address } => self.no_effect.push(address),
        }
    }
}

pub struct RegisterProbe<S: RpmSource> {
    config: DiscoveryConfig,
    sensors: S,
    log: DiscoveryLog,
    state: ProbeState,
    observations: Vec<ProbeObservation>,
}

impl<S: RpmSource> RegisterProbe<S> {
    pub fn new(config: DiscoveryConfig, sensors: S, log: DiscoveryLog) -> Result<Self> {
        config.validate()?;
        Ok(Self { config, sensors, log, state: ProbeState::Idle, observations: Vec::new() })
    }

    pub fn state(&self) -> ProbeState {
        self.state
    }

    pub fn observations(&self) -> &[ProbeObservation] {
        &self.observations
    }

    /// Run one session. `open_port` is only called when the range is
    /// non-empty; any failure before the backup is persisted returns an
    /// error without a single write.
    pub fn run<P, F>(&mut self, open_port: F, cancel: &CancelFlag) -> Result<DiscoverySummary>
    where
        P: PortIo,
        F: FnOnce() -> Result<P>,
    {
        let mut summary = DiscoverySummary {
            log_path: self.log.log_path().to_path_buf(),
            hits_path: self.log.hits_path().to_path_buf(),
            backup_path: self.log.backup_path().to_path_buf(),
            ..Default::default()
        };
        self.log.event(
            "session_start",
            json!({
                "start": self.config.start,
                "end": self.config.end,
                "stride": self.config.stride,
                "duties": self.config.duties,
                "settle_delay_ms": self.config.settle_delay_ms,
                "reversal_delay_ms": self.config.reversal_delay_ms,
            }),
        );

        let addresses = self.config.addresses();
        if addresses.is_empty() {
            self.log.event("session_end", json!({ "probed": 0, "hits": 0 }));
            return Ok(summary);
        }

        let mut port = open_port().map_err(|e| self.abort(e))?;
        let snapshot = EcBackupSnapshot::snapshot(&mut port, &addresses).map_err(|e| self.abort(e))?;
        let backup_path = self.log.backup_path().to_path_buf();
        snapshot.persist(&backup_path).map_err(|e| self.abort(e))?;
        self.log.event(
            "backup_created",
            json!({ "path": backup_path.display().to_string(), "entries": snapshot.len() }),
        );

        for entry in &snapshot.entries {
            if cancel.is_cancelled() {
                summary.cancelled = true;
                self.log.event("cancelled", json!({ "next_address": entry.address }));
                break;
            }
            let verdict = self.probe_address(&mut port, entry.address, entry.value, &mut summary);
            self.log.event("verdict", serde_json::to_value(verdict).unwrap_or_default());
            summary.probed.push(entry.address);
            summary.record(verdict);
        }

        let report = snapshot.restore(&mut port);
        for (address, error) in report.failed.iter().zip(&report.errors) {
            self.log.event(
                "restore_failure",
                json!({
                    "address": address,
                    "value": snapshot.original(*address),
                    "phase": "final",
                    "error": error,
                }),
            );
        }
        summary.restore_failures = report.failed;
        drop(port);

        self.log.event(
            "session_end",
            json!({
                "probed": summary.probed.len(),
                "hits": summary.confirmed.len(),
                "irreversible": summary.irreversible.len(),
                "io_failures": summary.io_failures.len(),
                "restore_failures": summary.restore_failures.len(),
                "cancelled": summary.cancelled,
            }),
        );
        Ok(summary)
    }

    fn abort(&mut self, err: FanError) -> FanError {
        self.log.event("session_abort", json!({ "error": err.to_string() }));
        err
    }

    fn transition(&mut self, address: u16, to: ProbeState) {
        self.log.event(
            "state",
            json!({ "address": address, "from": self.state.as_str(), "to": to.as_str() }),
        );
        self.state = to;
    }

    fn changed(&self, baseline: &[u64], now: &[u64]) -> bool {
        baseline.len() != now.len()
            || baseline.iter().zip(now).any(|(b, n)| b.abs_diff(*n) > self.config.rpm_tolerance)
    }

    fn io_failure(&mut self, summary: &mut DiscoverySummary, address: u16, duty: Option<u8>, err: &FanError) {
        self.log.event("io_failure", json!({ "address": address, "duty": duty, "error": err.to_string() }));
        summary.io_failures.push(IoFailureRecord { address, duty, error: err.to_string() });
    }

    fn restore_original<P: PortIo>(
        &mut self,
        port: &mut P,
        address: u16,
        original: u8,
        summary: &mut DiscoverySummary,
    ) {
        if let Err(e) = port.write_byte(address, original) {
            self.log.event(
                "restore_failure",
                json!({ "address": address, "value": original, "phase": "address", "error": e.to_string() }),
            );
            summary.io_failures.push(IoFailureRecord { address, duty: None, error: e.to_string() });
        }
    }

    fn probe_address<P: PortIo>(
        &mut self,
        port: &mut P,
        address: u16,
        original: u8,
        summary: &mut DiscoverySummary,
    ) -> ProbeVerdict {
        self.state = ProbeState::Idle;
        self.log.event("address_start", json!({ "address": address, "original": original }));

        let baseline = self.sensors.rpm_vector();
        self.transition(address, ProbeState::BaselineCaptured);

        let duties = self.config.duties.clone();
        let mut verdict = ProbeVerdict::NoEffect { address };
        for duty in duties {
            if let Err(e) = port.write_byte(address, duty) {
                self.io_failure(summary, address, Some(duty), &e);
                continue;
            }
            self.transition(address, ProbeState::DutyWritten);
            thread::sleep(self.config.settle_delay());
            let observed = self.sensors.rpm_vector();
            self.transition(address, ProbeState::Observed);

            let changed = self.changed(&baseline, &observed);
            self.log.event(
                "duty_result",
                json!({
                    "address": address,
                    "duty": duty,
                    "baseline": baseline,
                    "observed": observed,
                    "changed": changed,
                }),
            );

            if !changed {
                self.observations.push(ProbeObservation {
                    address,
                    duty,
                    baseline: baseline.clone(),
                    observed,
                    reversal: None,
                });
                self.restore_original(port, address, original, summary);
                thread::sleep(self.config.restore_delay());
                continue;
            }

            let reverted = match port.write_byte(address, self.config.neutral_value) {
                Ok(()) => {
                    self.transition(address, ProbeState::ReversalWritten);
                    thread::sleep(self.config.reversal_delay());
                    let after = self.sensors.rpm_vector();
                    self.transition(address, ProbeState::ReversalObserved);
                    let reverted = !self.changed(&baseline, &after);
                    self.observations.push(ProbeObservation {
                        address,
                        duty,
                        baseline: baseline.clone(),
                        observed,
                        reversal: Some(after),
                    });
                    reverted
                }
                Err(e) => {
                    // reversal never happened, so it cannot count as reverted
                    self.io_failure(summary, address, Some(self.config.neutral_value), &e);
                    false
                }
            };

            if reverted {
                verdict = ProbeVerdict::Confirmed { address, duty };
                self.log.event("hit", json!({ "address": address, "duty": duty }));
                if let Err(e) = self.log.append_hit(address, duty) {
                    self.io_failure(summary, address, Some(duty), &e);
                }
            } else {
                verdict = ProbeVerdict::Irreversible { address, duty };
                let hazard = FanError::Irreversible { address, duty };
                self.log.event("hazard", json!({ "address": address, "duty": duty, "message": hazard.to_string() }));
            }
            self.restore_original(port, address, original, summary);
            break;
        }

        self.transition(address, ProbeState::Classified);
        verdict
    }
}
