use crate::value::{SymbolicExpr, Value};

/// Whether the emulator is currently tracking expressions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecMode {
    Concrete, // fast path, no expression tracking
    Symbolic, // full expression tracking
}

/// Narrow view of the expression engine, only what the handlers need
pub trait SymbolicEngine {
    /// unconstrained value of width `bits`
    fn symbolic(&mut self, name: &str, bits: u32) -> SymbolicExpr;

    /// value of width `bits` pinned to `concrete` by a constraint, still
    /// tracked as an expression downstream
    fn concolic(&mut self, name: &str, bits: u32, concrete: u64) -> SymbolicExpr;

    /// one example solution under the current constraints
    fn evaluate(&mut self, expr: &SymbolicExpr) -> Option<u64>;

    /// unsigned `[min, max]` the expression can take
    fn range(&mut self, expr: &SymbolicExpr) -> Option<(u64, u64)>;
}

/// One logical execution stream of the emulator, as seen from a hook.
///
/// Implemented by the emulator glue; every handler call receives the
/// stream that performed the access.
pub trait ExecutionState {
    /// stream id, the `state_id` of trace logs
    fn id(&self) -> u32;

    fn pid(&self) -> u32 {
        0
    }

    fn pc(&self) -> u64;

    /// pc of the first instruction of the current translation block
    fn block_pc(&self) -> u64;

    fn mode(&self) -> ExecMode;

    /// Leave the concrete fast path. The emulator re-enters the current
    /// instruction with expression tracking enabled.
    fn switch_to_symbolic(&mut self);

    fn engine(&mut self) -> &mut dyn SymbolicEngine;

    /// general purpose registers sent to the remote oracle (r0..r14 on arm)
    fn register_count(&self) -> usize {
        15
    }

    fn read_register(&mut self, index: usize) -> Value;

    /// status register (cpsr)
    fn flags(&mut self) -> u64;

    /// concrete read of emulated memory, false if any byte is symbolic or unmapped
    fn read_memory(&mut self, address: u64, data: &mut [u8]) -> bool;

    fn write_memory(&mut self, address: u64, data: &[u8]) -> bool;
}

/// Concrete example for a value, solving for it if needed
pub fn concretize(state: &mut dyn ExecutionState, value: &Value) -> Option<u64> {
    match value {
        Value::Concrete(val, _) => Some(*val),
        Value::Symbolic(expr) => state.engine().evaluate(expr),
    }
}
