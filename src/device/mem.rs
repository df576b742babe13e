//! In-memory NOR-flash simulation.
//!
//! Backs the test suites: enforces the same program-before-erase rules as
//! real flash and adds fault injection so crash scenarios can cut power at
//! an exact program operation, including mid-write (a torn program).

use super::{check_range, BlockDevice, DeviceError, DeviceResult, Geometry, ERASED_BYTE};

/// Fault injection plan for a [`MemDevice`].
#[derive(Debug, Clone, Copy, Default)]
enum FaultPlan {
    #[default]
    None,
    /// Fail the Nth upcoming program call (1 = the next one) before any byte
    /// is applied.
    FailProgram { remaining: u32 },
    /// Apply only `keep_bytes` of the Nth upcoming program call, then fail.
    TornProgram { remaining: u32, keep_bytes: usize },
}

/// In-memory block device with NOR semantics.
pub struct MemDevice {
    geometry: Geometry,
    data: Vec<u8>,
    fault: FaultPlan,
    program_ops: u64,
}

impl MemDevice {
    /// Create a device with every block erased.
    pub fn new(geometry: Geometry) -> Self {
        Self {
            geometry,
            data: vec![ERASED_BYTE; geometry.capacity() as usize],
            fault: FaultPlan::None,
            program_ops: 0,
        }
    }

    /// Fail the `nth` upcoming program call (1-based) before writing.
    pub fn fail_program(&mut self, nth: u32) {
        self.fault = FaultPlan::FailProgram { remaining: nth };
    }

    /// Tear the `nth` upcoming program call (1-based): keep only the first
    /// `keep_bytes` bytes, then fail. Models power loss mid-page-program.
    pub fn torn_program(&mut self, nth: u32, keep_bytes: usize) {
        self.fault = FaultPlan::TornProgram {
            remaining: nth,
            keep_bytes,
        };
    }

    /// Number of program calls applied (fully or partially) so far.
    pub fn program_ops(&self) -> u64 {
        self.program_ops
    }

    /// Clone the current media contents into a fresh, fault-free device.
    ///
    /// A snapshot taken at an arbitrary point is exactly the image a restart
    /// would see after power loss at that point, so recovery tests replay
    /// from snapshots.
    pub fn snapshot(&self) -> MemDevice {
        MemDevice {
            geometry: self.geometry,
            data: self.data.clone(),
            fault: FaultPlan::None,
            program_ops: 0,
        }
    }

    fn index(&self, block: u32, offset: u32) -> usize {
        block as usize * self.geometry.block_size as usize + offset as usize
    }

    fn apply_program(&mut self, block: u32, offset: u32, data: &[u8]) -> DeviceResult<()> {
        let start = self.index(block, offset);
        for (i, &byte) in data.iter().enumerate() {
            let cell = &mut self.data[start + i];
            if *cell & byte != byte {
                return Err(DeviceError::ProgramConflict {
                    block,
                    offset: offset + i as u32,
                });
            }
            *cell &= byte;
        }
        Ok(())
    }
}

impl BlockDevice for MemDevice {
    fn geometry(&self) -> Geometry {
        self.geometry
    }

    fn read(&self, block: u32, offset: u32, buf: &mut [u8]) -> DeviceResult<()> {
        check_range(self.geometry, block, offset, buf.len())?;
        let start = self.index(block, offset);
        buf.copy_from_slice(&self.data[start..start + buf.len()]);
        Ok(())
    }

    fn program(&mut self, block: u32, offset: u32, data: &[u8]) -> DeviceResult<()> {
        check_range(self.geometry, block, offset, data.len())?;

        match self.fault {
            FaultPlan::FailProgram { remaining } if remaining <= 1 => {
                self.fault = FaultPlan::None;
                return Err(DeviceError::WriteFailed {
                    block,
                    offset,
                    reason: "injected power loss".to_string(),
                });
            }
            FaultPlan::FailProgram { remaining } => {
                self.fault = FaultPlan::FailProgram {
                    remaining: remaining - 1,
                };
            }
            FaultPlan::TornProgram {
                remaining,
                keep_bytes,
            } if remaining <= 1 => {
                self.fault = FaultPlan::None;
                let keep = keep_bytes.min(data.len());
                self.apply_program(block, offset, &data[..keep])?;
                self.program_ops += 1;
                return Err(DeviceError::WriteFailed {
                    block,
                    offset,
                    reason: format!("injected torn program after {} bytes", keep),
                });
            }
            FaultPlan::TornProgram {
                remaining,
                keep_bytes,
            } => {
                self.fault = FaultPlan::TornProgram {
                    remaining: remaining - 1,
                    keep_bytes,
                };
            }
            FaultPlan::None => {}
        }

        self.apply_program(block, offset, data)?;
        self.program_ops += 1;
        Ok(())
    }

    fn erase(&mut self, block: u32) -> DeviceResult<()> {
        check_range(self.geometry, block, 0, self.geometry.block_size as usize)?;
        let start = self.index(block, 0);
        let end = start + self.geometry.block_size as usize;
        self.data[start..end].fill(ERASED_BYTE);
        Ok(())
    }

    fn sync(&mut self) -> DeviceResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_device() -> MemDevice {
        MemDevice::new(Geometry::new(256, 4))
    }

    #[test]
    fn test_fresh_device_is_erased() {
        let dev = small_device();
        let mut buf = [0u8; 16];
        dev.read(0, 0, &mut buf).unwrap();
        assert!(buf.iter().all(|&b| b == ERASED_BYTE));
    }

    #[test]
    fn test_program_and_read_back() {
        let mut dev = small_device();
        dev.program(1, 10, b"hello").unwrap();
        let mut buf = [0u8; 5];
        dev.read(1, 10, &mut buf).unwrap();
        assert_eq!(&buf, b"hello");
    }

    #[test]
    fn test_program_cannot_set_bits() {
        let mut dev = small_device();
        dev.program(0, 0, &[0x00]).unwrap();
        let err = dev.program(0, 0, &[0x01]).unwrap_err();
        assert!(matches!(err, DeviceError::ProgramConflict { .. }));
    }

    #[test]
    fn test_reprogramming_same_bits_is_allowed() {
        let mut dev = small_device();
        dev.program(0, 0, &[0xF0]).unwrap();
        dev.program(0, 0, &[0xF0]).unwrap();
    }

    #[test]
    fn test_erase_restores_writability() {
        let mut dev = small_device();
        dev.program(2, 0, &[0x00]).unwrap();
        dev.erase(2).unwrap();
        dev.program(2, 0, &[0xAB]).unwrap();
        let mut buf = [0u8; 1];
        dev.read(2, 0, &mut buf).unwrap();
        assert_eq!(buf[0], 0xAB);
    }

    #[test]
    fn test_out_of_bounds_rejected() {
        let mut dev = small_device();
        assert!(dev.program(4, 0, &[1]).is_err());
        assert!(dev.program(0, 255, &[1, 2]).is_err());
        let mut buf = [0u8; 2];
        assert!(dev.read(0, 255, &mut buf).is_err());
    }

    #[test]
    fn test_injected_failure_applies_nothing() {
        let mut dev = small_device();
        dev.fail_program(1);
        assert!(dev.program(0, 0, b"data").is_err());
        let mut buf = [0u8; 4];
        dev.read(0, 0, &mut buf).unwrap();
        assert!(buf.iter().all(|&b| b == ERASED_BYTE));
        // Subsequent programs succeed again.
        dev.program(0, 0, b"data").unwrap();
    }

    #[test]
    fn test_torn_program_keeps_prefix() {
        let mut dev = small_device();
        dev.torn_program(1, 2);
        assert!(dev.program(0, 0, b"data").is_err());
        let mut buf = [0u8; 4];
        dev.read(0, 0, &mut buf).unwrap();
        assert_eq!(&buf[..2], b"da");
        assert_eq!(buf[2], ERASED_BYTE);
    }

    #[test]
    fn test_snapshot_is_independent() {
        let mut dev = small_device();
        dev.program(0, 0, b"abc").unwrap();
        let snap = dev.snapshot();
        dev.program(0, 3, b"def").unwrap();

        let mut buf = [0u8; 1];
        snap.read(0, 3, &mut buf).unwrap();
        assert_eq!(buf[0], ERASED_BYTE);
    }
}
