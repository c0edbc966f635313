use crate::config::{FunctionRange, DEFAULT_BREAKPOINT, INSTRUCTION_SIZE};
use crate::error::{Error, Result};
use crate::remote::RemoteMemory;
use crate::state::ExecutionState;
use crate::value::Endian;

use log::{debug, info};
use std::sync::Arc;

/// Moves a function's code from the emulator to the device. Once the
/// block at a configured `start_pc` executes, `[start_pc, end_pc]` is
/// copied over with its last instruction replaced by a breakpoint.
pub struct StateMigration {
    remote: Arc<RemoteMemory>,
    functions: Vec<FunctionRange>,
    pub breakpoint: u64,
    pub endian: Endian,
    pub verbose: bool,
}

impl StateMigration {
    pub fn new(remote: Arc<RemoteMemory>, functions: Vec<FunctionRange>, endian: Endian) -> Self {
        StateMigration {
            remote,
            functions,
            breakpoint: DEFAULT_BREAKPOINT,
            endian,
            verbose: false,
        }
    }

    pub fn functions(&self) -> &[FunctionRange] {
        &self.functions
    }

    /// translation time check, should the block starting at `pc` be watched
    pub fn watches(&self, pc: u64) -> bool {
        self.functions.iter().any(|f| f.start_pc == pc)
    }

    /// Block execution hook. Returns true if the block was migrated.
    pub fn on_block_start(&self, state: &mut dyn ExecutionState, pc: u64) -> Result<bool> {
        match self.functions.iter().find(|f| f.start_pc == pc) {
            Some(function) => {
                debug!("[StateMigration] found block at {:#x}", pc);
                self.migrate(state, function)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Copy the function, plant the breakpoint and read it back so the
    /// device has seen every write. Returns what the read gave.
    pub fn migrate(&self, state: &mut dyn ExecutionState, function: &FunctionRange) -> Result<u64> {
        let start = function.start_pc;
        let length = match function.code_length() {
            Some(length) => length as usize,
            None => {
                return Err(Error::config(
                    "migration.functions",
                    format!(
                        "cannot copy {:#x}..{:#x}, not a bounded forward range",
                        function.start_pc, function.end_pc
                    ),
                ))
            }
        };

        let mut code = vec![0; length];
        if !state.read_memory(start, &mut code) {
            return Err(Error::SymbolicMemory(start));
        }

        if self.verbose {
            debug!(
                "[StateMigration] read code at {:#x}: {:02x?}",
                start,
                &code[..code.len().min(4)]
            );
        }

        info!("[StateMigration] copying {} bytes from emulator to device", length);

        let last = length - INSTRUCTION_SIZE as usize;
        let breakpoint = self.endian.unpack(self.breakpoint, INSTRUCTION_SIZE as usize);
        code[last..].copy_from_slice(&breakpoint);

        self.remote.write_bytes(state, start, &code)?;

        let check = self
            .remote
            .read(state, start + last as u64, INSTRUCTION_SIZE as u32)?;
        debug!("[StateMigration] read back {:#x}", check);
        Ok(check)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::RemoteOptions;
    use crate::test::{FakeDevice, FakeState};

    #[test]
    fn copies_code_and_plants_breakpoint() -> Result<()> {
        let device = FakeDevice::spawn(Endian::Little);
        let remote = Arc::new(device.remote(RemoteOptions::default()));
        let mut state = FakeState::new();
        // mov r0, r0 ; bx lr
        state.write_bytes(0x8000, &[0x00, 0x00, 0xa0, 0xe1, 0x1e, 0xff, 0x2f, 0xe1]);

        let function = FunctionRange { start_pc: 0x8000, end_pc: 0x8004 };
        let migration = StateMigration::new(remote, vec![function], Endian::Little);
        assert!(migration.watches(0x8000));
        assert!(!migration.on_block_start(&mut state, 0x8004)?);
        assert!(migration.on_block_start(&mut state, 0x8000)?);

        assert_eq!(device.memory(0x8000, 4), vec![0x00, 0x00, 0xa0, 0xe1]);
        assert_eq!(device.memory(0x8004, 4), vec![0x72, 0x04, 0x20, 0xe1]);

        // byte writes then the flushing read
        let requests = device.requests();
        assert_eq!(requests.len(), 9);
        assert!(requests[..8].iter().all(|r| r["cmd"] == "write" && r["params"]["size"] == "0x1"));
        assert_eq!(requests[8]["cmd"], "read");
        assert_eq!(requests[8]["params"]["address"], "0x8004");
        Ok(())
    }

    #[test]
    fn symbolic_code_is_refused() {
        let device = FakeDevice::spawn(Endian::Little);
        let remote = Arc::new(device.remote(RemoteOptions::default()));
        let mut state = FakeState::new();

        let function = FunctionRange { start_pc: 0x9000, end_pc: 0x9000 };
        let migration = StateMigration::new(remote, vec![function], Endian::Little);
        let err = migration.migrate(&mut state, &function).unwrap_err();
        assert!(matches!(err, Error::SymbolicMemory(0x9000)));
        assert!(device.requests().is_empty());
    }

    #[test]
    fn unbounded_function_is_refused() {
        let device = FakeDevice::spawn(Endian::Little);
        let remote = Arc::new(device.remote(RemoteOptions::default()));
        let mut state = FakeState::new();

        let whole = FunctionRange { start_pc: 0, end_pc: u64::MAX };
        let reversed = FunctionRange { start_pc: 0x9004, end_pc: 0x9000 };
        let migration = StateMigration::new(remote, vec![whole, reversed], Endian::Little);

        for function in [whole, reversed] {
            let err = migration.migrate(&mut state, &function).unwrap_err();
            assert!(matches!(err, Error::Config { .. }));
        }
        assert!(device.requests().is_empty());
    }
}
