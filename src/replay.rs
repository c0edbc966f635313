use crate::access::AccessDescriptor;
use crate::error::Result;
use crate::handler::MemoryHandler;
use crate::mode::ModeController;
use crate::state::ExecutionState;
use crate::trace::TraceReader;
use crate::value::Value;

use log::{debug, warn};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

/// value returned for reads the trace has no entry for
pub const REPLAY_SENTINEL: u64 = 0xdead;

/// Serves reads from a recorded trace of the same program.
///
/// Code fetches are not part of memory traces, `skip_code` lets them
/// through to the real memory. Writes are never hijacked.
pub struct ReplayHandler<R: Read> {
    reader: TraceReader<R>,
    pub skip_code: bool,
    pub concolic: bool,
    pub verbose: bool,
    mode: ModeController,
}

impl ReplayHandler<BufReader<File>> {
    pub fn open<P: AsRef<Path>>(path: P, state_id: u32) -> Result<Self> {
        Ok(ReplayHandler::new(TraceReader::open(path, state_id)?))
    }
}

impl<R: Read> ReplayHandler<R> {
    pub fn new(reader: TraceReader<R>) -> Self {
        ReplayHandler {
            reader,
            skip_code: true,
            concolic: false,
            verbose: false,
            mode: ModeController::default(),
        }
    }

    pub fn with_options(mut self, skip_code: bool, concolic: bool, verbose: bool) -> Self {
        self.skip_code = skip_code;
        self.concolic = concolic;
        self.verbose = verbose;
        self.mode = ModeController::new(verbose);
        self
    }

    pub fn reader(&self) -> &TraceReader<R> {
        &self.reader
    }
}

impl<R: Read> MemoryHandler for ReplayHandler<R> {
    fn name(&self) -> &str {
        "ReplayHandler"
    }

    fn read(
        &mut self,
        state: &mut dyn ExecutionState,
        access: &AccessDescriptor,
    ) -> Result<Option<Value>> {
        if self.skip_code && access.is_code() {
            return Ok(None);
        }

        let bits = access.size.value_bits()?;
        let address = match access.concrete_address() {
            Some(address) => address,
            None => {
                warn!("[ReplayHandler] cannot replay read from {}", access.address);
                return Ok(None);
            }
        };

        if self.verbose {
            debug!("[ReplayHandler] read {}", access);
        }

        let value = match self.reader.find(address, bits, false) {
            Some(value) => {
                debug!("[ReplayHandler] set value for {:#x} to {:#x}", address, value);
                value
            }
            None => {
                warn!(
                    "[ReplayHandler] failed to set value for {:#x}, trace exhausted at offset {:#x}",
                    address,
                    self.reader.offset()
                );
                REPLAY_SENTINEL
            }
        };

        if !self.concolic {
            return Ok(Some(Value::concrete(value, bits)));
        }

        self.mode.ensure_symbolic(state, "ReplayHandler");
        let name = format!("replay_{:x}", state.pc());
        let expr = state.engine().concolic(&name, bits, value);
        Ok(Some(Value::Symbolic(expr)))
    }

    fn write(&mut self, _state: &mut dyn ExecutionState, access: &AccessDescriptor) -> Result<bool> {
        if self.verbose {
            debug!("[ReplayHandler] write {}", access);
        }
        Ok(false)
    }
}
