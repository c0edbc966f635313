use crate::state::{ExecMode, ExecutionState};
use log::{debug, warn};

/// Concrete to symbolic switch policy shared by the handlers that can
/// inject expressions. There is no way back to concrete from here, that
/// is left to the emulator.
#[derive(Debug, Clone, Copy, Default)]
pub struct ModeController {
    pub verbose: bool,
}

impl ModeController {
    pub fn new(verbose: bool) -> Self {
        ModeController { verbose }
    }

    #[inline]
    pub fn mode(&self, state: &dyn ExecutionState) -> ExecMode {
        state.mode()
    }

    /// Instructions `[block_pc, pc)` that already ran concretely in the
    /// current block, if any
    pub fn audit_range(&self, state: &dyn ExecutionState) -> Option<(u64, u64)> {
        let (pc, block_pc) = (state.pc(), state.block_pc());
        if pc != block_pc {
            Some((block_pc, pc))
        } else {
            None
        }
    }

    /// Make sure `state` tracks expressions before a symbolic value is
    /// handed back. Returns true if a switch was requested.
    ///
    /// Instructions of the current block that already ran were executed
    /// concretely; if any of them had side effects they are not redone.
    /// That cannot be checked from here so the block is reported for
    /// manual audit.
    pub fn ensure_symbolic(&self, state: &mut dyn ExecutionState, origin: &str) -> bool {
        if state.mode() == ExecMode::Symbolic {
            return false;
        }

        let pc = state.pc();
        if let Some((block_pc, pc)) = self.audit_range(state) {
            warn!(
                "[{}] switching to symbolic mode at {:#x} in the middle of the block at {:#x}, \
                 check that {:#x}-{:#x} has no side effects",
                origin, pc, block_pc, block_pc, pc
            );
        }

        if self.verbose {
            debug!("[{}] switching state {} to symbolic mode at {:#x}", origin, state.id(), pc);
        }

        state.switch_to_symbolic();
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test::FakeState;

    #[test]
    fn switches_once() {
        let controller = ModeController::new(true);
        let mut state = FakeState::new();
        assert_eq!(controller.mode(&state), ExecMode::Concrete);

        assert!(controller.ensure_symbolic(&mut state, "test"));
        assert!(!controller.ensure_symbolic(&mut state, "test"));
        assert_eq!(state.switches, 1);
        assert_eq!(controller.mode(&state), ExecMode::Symbolic);
    }

    #[test]
    fn mid_block_switch_still_happens() {
        let controller = ModeController::default();
        let mut state = FakeState::new();
        state.pc = 0x8008;
        state.block_pc = 0x8000;

        assert_eq!(controller.audit_range(&state), Some((0x8000, 0x8008)));
        assert!(controller.ensure_symbolic(&mut state, "test"));
        assert_eq!(state.switches, 1);
    }

    #[test]
    fn block_start_needs_no_audit() {
        let controller = ModeController::default();
        let mut state = FakeState::new();
        assert_eq!(controller.audit_range(&state), None);

        state.pc = 0x8004;
        assert_eq!(controller.audit_range(&state), Some((0x8000, 0x8004)));
    }
}
