use crate::access::{AccessDescriptor, AccessSize, AccessType, Address};
use crate::error::{Error, Result};
use crate::handler::AccessObserver;
use crate::registry::{HandlerRegistry, Registration};
use crate::state::ExecutionState;
use crate::value::Value;

use log::{debug, error, info};

/// The emulator side of the global memory hooks. The interceptor connects
/// each one at most once, and only when something needs it.
pub trait HookSite {
    fn connect_read(&mut self);
    fn connect_write(&mut self);
}

/// Dispatches every intercepted access to at most one registered handler
pub struct MemoryInterceptor {
    registry: HandlerRegistry,
    observers: Vec<Box<dyn AccessObserver>>,
    hooks: Box<dyn HookSite>,
    read_hooked: bool,
    write_hooked: bool,
    pub verbose: bool,
}

impl MemoryInterceptor {
    pub fn new(hooks: Box<dyn HookSite>, verbose: bool) -> Self {
        MemoryInterceptor {
            registry: HandlerRegistry::new(),
            observers: vec![],
            hooks,
            read_hooked: false,
            write_hooked: false,
            verbose,
        }
    }

    /// Append a handler; it has lower priority than everything already
    /// registered. Handlers must be added before execution starts, accesses
    /// that happened before a hook was connected are never seen.
    pub fn add_handler(&mut self, registration: Registration) {
        info!(
            "[MemoryInterceptor] adding '{}' for {:#x}-{:#x} with access type {}",
            registration.handler.name(),
            registration.base,
            registration.end(),
            registration.mask
        );

        self.connect(registration.mask);
        self.registry.register(registration);
    }

    pub fn add_observer(&mut self, observer: Box<dyn AccessObserver>) {
        self.connect(AccessType::READ | AccessType::WRITE);
        self.observers.push(observer);
    }

    fn connect(&mut self, mask: AccessType) {
        if mask.intersects(AccessType::READ | AccessType::EXECUTE) && !self.read_hooked {
            self.hooks.connect_read();
            self.read_hooked = true;
        }

        if mask.intersects(AccessType::WRITE) && !self.write_hooked {
            self.hooks.connect_write();
            self.write_hooked = true;
        }
    }

    pub fn is_read_hooked(&self) -> bool {
        self.read_hooked
    }

    pub fn is_write_hooked(&self) -> bool {
        self.write_hooked
    }

    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    pub fn try_read(
        &mut self,
        state: &mut dyn ExecutionState,
        address: Address,
        size: u32,
        is_io: bool,
        is_code: bool,
    ) -> Result<Option<Value>> {
        let size = AccessSize::from_bits(size)?;
        let access = AccessDescriptor::read(address, size, is_io, is_code);

        if self.verbose {
            debug!("[MemoryInterceptor] read {}", access);
        }

        let value = match self.registry.find_mut(&access) {
            Some(registration) => registration.handler.read(state, &access)?,
            None => None,
        };

        for observer in &mut self.observers {
            observer.observe(state, &access, value.as_ref(), value.is_some());
        }

        Ok(value)
    }

    pub fn try_write(
        &mut self,
        state: &mut dyn ExecutionState,
        address: Address,
        size: u32,
        is_io: bool,
        value: Value,
    ) -> Result<bool> {
        let size = AccessSize::from_bits(size)?;
        let access = AccessDescriptor::write(address, size, is_io, value);

        if self.verbose {
            debug!("[MemoryInterceptor] write {}", access);
        }

        let hijacked = match self.registry.find_mut(&access) {
            Some(registration) => registration.handler.write(state, &access)?,
            None => false,
        };

        for observer in &mut self.observers {
            observer.observe(state, &access, access.value.as_ref(), hijacked);
        }

        Ok(hijacked)
    }

    /// Read hook entry point. `None` means the real memory is read.
    /// Any failure aborts the run, there is no sane value to return.
    pub fn on_read(
        &mut self,
        state: &mut dyn ExecutionState,
        address: Address,
        size: u32,
        is_io: bool,
        is_code: bool,
    ) -> Option<Value> {
        match self.try_read(state, address.clone(), size, is_io, is_code) {
            Ok(value) => value,
            Err(err) => escalate(state, &address, err),
        }
    }

    /// Write hook entry point, `true` suppresses the real write
    pub fn on_write(
        &mut self,
        state: &mut dyn ExecutionState,
        address: Address,
        size: u32,
        is_io: bool,
        value: Value,
    ) -> bool {
        match self.try_write(state, address.clone(), size, is_io, value) {
            Ok(hijacked) => hijacked,
            Err(err) => escalate(state, &address, err),
        }
    }
}

fn escalate(state: &dyn ExecutionState, address: &Address, err: Error) -> ! {
    error!(
        "[MemoryInterceptor] access to {} at pc {:#x} in state {} failed: {}",
        address,
        state.pc(),
        state.id(),
        err
    );
    panic!(
        "memory access to {} at pc {:#x} in state {} failed: {}",
        address,
        state.pc(),
        state.id(),
        err
    );
}
