use crate::access::AccessDescriptor;
use crate::error::Result;
use crate::state::ExecutionState;
use crate::value::Value;

/// Something that can own a memory range in the interceptor.
///
/// The registry only calls `read` for descriptors the handler's mask
/// accepts and likewise for `write`, so a write-only handler can keep the
/// default `read`.
pub trait MemoryHandler {
    fn name(&self) -> &str;

    /// `Some` substitutes the returned value for the real memory content,
    /// `None` lets the read through
    fn read(
        &mut self,
        _state: &mut dyn ExecutionState,
        _access: &AccessDescriptor,
    ) -> Result<Option<Value>> {
        Ok(None)
    }

    /// `true` hijacks the write, the real memory is left untouched
    fn write(&mut self, _state: &mut dyn ExecutionState, _access: &AccessDescriptor) -> Result<bool> {
        Ok(false)
    }
}

/// Passive listener that sees every access after dispatch
pub trait AccessObserver {
    /// `value` is the substituted value for reads (if a handler produced
    /// one) or the written value for writes
    fn observe(
        &mut self,
        state: &mut dyn ExecutionState,
        access: &AccessDescriptor,
        value: Option<&Value>,
        hijacked: bool,
    );
}
