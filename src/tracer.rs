use crate::access::{AccessDescriptor, AccessType};
use crate::handler::AccessObserver;
use crate::state::ExecutionState;
use crate::trace::{MemoryTraceEntry, TraceWriter};
use crate::value::{Endian, Value};

use log::warn;
use std::io::Write;
use std::sync::{Arc, Mutex};

/// Records every data access the interceptor sees into a trace log, in
/// the format `ReplayHandler` reads back.
///
/// The writer is shared so fork events can go into the same log.
pub struct MemoryTracer<W: Write> {
    writer: Arc<Mutex<TraceWriter<W>>>,
    endian: Endian,
}

impl<W: Write> MemoryTracer<W> {
    pub fn new(writer: Arc<Mutex<TraceWriter<W>>>, endian: Endian) -> Self {
        MemoryTracer { writer, endian }
    }

    pub fn writer(&self) -> Arc<Mutex<TraceWriter<W>>> {
        self.writer.clone()
    }

    fn entry(
        &self,
        state: &mut dyn ExecutionState,
        access: &AccessDescriptor,
        value: Option<&Value>,
    ) -> MemoryTraceEntry {
        let mut flags = 0;
        if access.is_write() {
            flags |= MemoryTraceEntry::WRITE;
        }
        if access.is_io() {
            flags |= MemoryTraceEntry::IO;
        }
        if access.kind.contains(AccessType::SYMBOLIC_ADDRESS) {
            flags |= MemoryTraceEntry::SYMBOLIC_ADDRESS;
        }

        let address = access.concrete_address().unwrap_or(0);
        let bits = access.bits();

        let concrete = match value {
            Some(value) => value.as_u64(),
            // nothing substituted, the real memory is what was read
            None if access.concrete_address().is_some() => {
                let mut data = vec![0; (bits / 8) as usize];
                if state.read_memory(address, &mut data) {
                    Some(self.endian.pack(&data))
                } else {
                    None
                }
            }
            None => None,
        };

        let value = match concrete {
            Some(value) => value,
            None => {
                flags |= MemoryTraceEntry::SYMBOLIC_VALUE;
                0
            }
        };

        MemoryTraceEntry::new(address, bits, value, flags)
    }
}

impl<W: Write> AccessObserver for MemoryTracer<W> {
    fn observe(
        &mut self,
        state: &mut dyn ExecutionState,
        access: &AccessDescriptor,
        value: Option<&Value>,
        _hijacked: bool,
    ) {
        if access.is_code() {
            return;
        }

        // entries hold at most 64 bits of value
        if let Err(err) = access.size.value_bits() {
            warn!("[MemoryTracer] not recording {}: {}", access, err);
            return;
        }

        let entry = self.entry(state, access, value);
        let result = match self.writer.lock() {
            Ok(mut writer) => writer.write_memory(state, &entry),
            Err(_) => return,
        };

        if let Err(err) = result {
            warn!("[MemoryTracer] could not record {}: {}", access, err);
        }
    }
}
