extern crate boolector;
extern crate serde_json;

/// Access flags, widths and the descriptor handed to handlers
pub mod access;
/// Handlers backed by user scripts (peripheral annotations)
pub mod annotation;
/// Validate accesses against the target's memory map
pub mod checker;
/// JSON configuration of the plugin set
pub mod config;
pub mod error;
/// Traits implemented by range owners and passive observers
pub mod handler;
/// Entry point of the emulator's memory hooks
pub mod interceptor;
/// Move function code over to the remote device
pub mod migration;
/// Concrete to symbolic switching
pub mod mode;
/// Build the handler graph from a configuration
pub mod plugins;
/// Ordered handler ranges with first match dispatch
pub mod registry;
/// Memory served by a device on the other end of a socket
pub mod remote;
/// Feed recorded read values back into execution
pub mod replay;
/// Utilities for using the SMT solver to evaluate symbolic values
pub mod solver;
/// The view of an execution stream the handlers get
pub mod state;
/// Binary execution trace format
pub mod trace;
/// Record accesses into a trace log
pub mod tracer;
/// Abstraction for concrete and symbolic values used during execution
pub mod value;

pub use crate::access::{AccessDescriptor, AccessSize, AccessType, Address};
pub use crate::config::Config;
pub use crate::error::{Error, Result};
pub use crate::handler::{AccessObserver, MemoryHandler};
pub use crate::interceptor::{HookSite, MemoryInterceptor};
pub use crate::plugins::Plugins;
pub use crate::registry::{HandlerRegistry, Registration};
pub use crate::state::{ExecMode, ExecutionState, SymbolicEngine};
pub use crate::value::{vc, Endian, Value};
