/*
 * Test utilities and mock helpers for Fanprobe
 *
 * This module provides simulated port hardware, simulated fans that react to
 * register writes, and a mock hwmon tree shared by the unit tests.
 */

#[cfg(test)]
pub mod test_utils {
    use crate::error::{FanError, Result};
    use crate::port::PortIo;
    use crate::sensors::RpmSource;
    use std::cell::RefCell;
    use std::collections::HashSet;
    use std::fs;
    use std::io;
    use std::os::unix::fs::PermissionsExt;
    use std::rc::Rc;
    use tempfile::TempDir;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum PortOp {
        Read(u16),
        Write(u16, u8),
    }

    /// A register that spins the fans up while it holds `trigger`.
    /// Sticky rules keep the fans changed after the register is cleared.
    #[derive(Debug, Clone)]
    pub struct FanRule {
        pub address: u16,
        pub trigger: u8,
        pub rpm: Vec<u64>,
        pub sticky: bool,
    }

    #[derive(Debug)]
    pub struct SimHardware {
        pub registers: Vec<u8>,
        pub ops: Vec<PortOp>,
        pub fail_reads: HashSet<u16>,
        pub fail_writes: HashSet<(u16, u8)>,
        pub rules: Vec<FanRule>,
        pub baseline_rpm: Vec<u64>,
        latched: Option<Vec<u64>>,
    }

    impl SimHardware {
        pub fn writes(&self) -> Vec<(u16, u8)> {
            self.ops
                .iter()
                .filter_map(|op| match op {
                    PortOp::Write(a, v) => Some((*a, *v)),
                    PortOp::Read(_) => None,
                })
                .collect()
        }

        pub fn current_rpm(&self) -> Vec<u64> {
            if let Some(rpm) = &self.latched {
                return rpm.clone();
            }
            for rule in &self.rules {
                if self.registers[rule.address as usize] == rule.trigger {
                    return rule.rpm.clone();
                }
            }
            self.baseline_rpm.clone()
        }
    }

    pub type SharedHardware = Rc<RefCell<SimHardware>>;

    /// Simulated EC address space. Registers start with the repeating
    /// `0x02 0x12 0x07 0x00` pattern so that no original byte is zero at
    /// the usual fan register offsets.
    pub fn create_sim_hardware(baseline_rpm: Vec<u64>) -> SharedHardware {
        let registers = (0..=0xFFFFu32).map(|a| [0x02, 0x12, 0x07, 0x00][(a % 4) as usize]).collect();
        Rc::new(RefCell::new(SimHardware {
            registers,
            ops: Vec::new(),
            fail_reads: HashSet::new(),
            fail_writes: HashSet::new(),
            rules: Vec::new(),
            baseline_rpm,
            latched: None,
        }))
    }

    pub struct SimPort {
        pub hw: SharedHardware,
    }

    impl PortIo for SimPort {
        fn read_byte(&mut self, address: u16) -> Result<u8> {
            let mut hw = self.hw.borrow_mut();
            hw.ops.push(PortOp::Read(address));
            if hw.fail_reads.contains(&address) {
                return Err(FanError::io(format!("sim@0x{:04X}", address), io::Error::new(io::ErrorKind::Other, "read failed")));
            }
            Ok(hw.registers[address as usize])
        }

        fn write_byte(&mut self, address: u16, value: u8) -> Result<()> {
            let mut hw = self.hw.borrow_mut();
            hw.ops.push(PortOp::Write(address, value));
            if hw.fail_writes.contains(&(address, value)) {
                return Err(FanError::io(format!("sim@0x{:04X}", address), io::Error::new(io::ErrorKind::Other, "write failed")));
            }
            hw.registers[address as usize] = value;
            let sticky = hw.rules.iter().find(|r| r.sticky && r.address == address && r.trigger == value).map(|r| r.rpm.clone());
            if let Some(rpm) = sticky {
                hw.latched = Some(rpm);
            }
            Ok(())
        }
    }

    pub struct SimFans {
        pub hw: SharedHardware,
    }

    impl RpmSource for SimFans {
        fn rpm_vector(&mut self) -> Vec<u64> {
            self.hw.borrow().current_rpm()
        }
    }

    /// Creates a temporary directory with a mock hwmon structure:
    /// - hwmon0 "dell_smm": fan1 (writable pwm1), fan2 (read-only pwm2), temp1
    /// - hwmon1 (no name file): temp1, temp3 holding garbage
    /// - hwmon2 "nct_empty": voltage input only, omitted from enumeration
    pub fn create_mock_hwmon_dir() -> TempDir {
        let temp_dir = TempDir::new().unwrap();
        let hwmon_root = temp_dir.path().join("sys/class/hwmon");

        let hwmon0 = hwmon_root.join("hwmon0");
        fs::create_dir_all(&hwmon0).unwrap();
        fs::write(hwmon0.join("name"), "dell_smm\n").unwrap();
        fs::write(hwmon0.join("fan1_input"), "1200\n").unwrap();
        fs::write(hwmon0.join("fan2_input"), "800\n").unwrap();
        fs::write(hwmon0.join("pwm1"), "128\n").unwrap();
        fs::write(hwmon0.join("pwm2"), "0\n").unwrap();
        fs::set_permissions(hwmon0.join("pwm2"), fs::Permissions::from_mode(0o444)).unwrap();
        fs::write(hwmon0.join("temp1_input"), "45500\n").unwrap();

        let hwmon1 = hwmon_root.join("hwmon1");
        fs::create_dir_all(&hwmon1).unwrap();
        fs::write(hwmon1.join("temp1_input"), "38200\n").unwrap();
        fs::write(hwmon1.join("temp3_input"), "n/a\n").unwrap();

        let hwmon2 = hwmon_root.join("hwmon2");
        fs::create_dir_all(&hwmon2).unwrap();
        fs::write(hwmon2.join("name"), "nct_empty\n").unwrap();
        fs::write(hwmon2.join("in0_input"), "1100\n").unwrap();

        temp_dir
    }
}

#[cfg(test)]
mod tests {
    use super::test_utils::*;
    use crate::port::PortIo;
    use crate::sensors::RpmSource;

    #[test]
    fn test_sim_port_round_trip() {
        let hw = create_sim_hardware(vec![1000]);
        let mut port = SimPort { hw: hw.clone() };
        port.write_byte(0x24, 0x5A).unwrap();
        assert_eq!(port.read_byte(0x24).unwrap(), 0x5A);
        assert_eq!(hw.borrow().ops, vec![PortOp::Write(0x24, 0x5A), PortOp::Read(0x24)]);
    }

    #[test]
    fn test_sim_fans_follow_rules() {
        let hw = create_sim_hardware(vec![1000, 900]);
        hw.borrow_mut().rules.push(FanRule { address: 0x24, trigger: 0x80, rpm: vec![2500, 900], sticky: false });
        let mut port = SimPort { hw: hw.clone() };
        let mut fans = SimFans { hw: hw.clone() };

        assert_eq!(fans.rpm_vector(), vec![1000, 900]);
        port.write_byte(0x24, 0x80).unwrap();
        assert_eq!(fans.rpm_vector(), vec![2500, 900]);
        port.write_byte(0x24, 0x00).unwrap();
        assert_eq!(fans.rpm_vector(), vec![1000, 900]);
    }

    #[test]
    fn test_sticky_rule_latches() {
        let hw = create_sim_hardware(vec![1000]);
        hw.borrow_mut().rules.push(FanRule { address: 0x30, trigger: 0xFF, rpm: vec![0], sticky: true });
        let mut port = SimPort { hw: hw.clone() };
        port.write_byte(0x30, 0xFF).unwrap();
        port.write_byte(0x30, 0x00).unwrap();
        assert_eq!(SimFans { hw }.rpm_vector(), vec![0]);
    }
}
