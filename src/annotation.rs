use crate::access::AccessDescriptor;
use crate::error::{Error, Result};
use crate::handler::MemoryHandler;
use crate::mode::ModeController;
use crate::state::{concretize, ExecutionState};
use crate::value::{SymbolicExpr, Value};

use ahash::AHashMap;
use log::{debug, warn};
use std::cell::RefCell;
use std::rc::Rc;

type HashMap<P, Q> = AHashMap<P, Q>;

/// Arguments handed to a script read function
#[derive(Debug, Clone, PartialEq)]
pub struct ReadArgs {
    pub address: u64,
    pub size: u32, // bytes
    pub is_io: bool,
    pub is_code: bool,
}

/// Arguments handed to a script write function
#[derive(Debug, Clone, PartialEq)]
pub struct WriteArgs {
    pub address: u64,
    pub size: u32, // bytes
    pub value: u64,
    pub is_io: bool,
}

/// Raw result of a script read function, a return code and whatever
/// came as the second return value
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScriptReply {
    pub code: i64,
    pub value: Option<u64>,
    pub name: Option<String>,
}

impl ScriptReply {
    pub fn pass() -> Self {
        ScriptReply::default()
    }

    pub fn concrete(value: u64) -> Self {
        ScriptReply {
            code: 1,
            value: Some(value),
            name: None,
        }
    }

    pub fn symbolic(name: &str) -> Self {
        ScriptReply {
            code: 2,
            value: None,
            name: Some(name.to_owned()),
        }
    }

    pub fn latched(name: &str) -> Self {
        ScriptReply {
            code: 3,
            value: None,
            name: Some(name.to_owned()),
        }
    }
}

/// What a read annotation asked for
#[derive(Debug, Clone, PartialEq)]
pub enum ReadAnnotation {
    Passthrough,
    Concrete(u64),
    Symbolic(String),
    /// symbolic, but created once per address and reused afterwards
    Latched(String),
}

impl ReadAnnotation {
    pub fn decode(function: &str, reply: ScriptReply) -> Result<Self> {
        let name = |reply: ScriptReply| {
            reply.name.ok_or_else(|| {
                Error::Script(format!("{} returned code {} without a name", function, reply.code))
            })
        };

        match reply.code {
            0 => Ok(ReadAnnotation::Passthrough),
            1 => reply.value.map(ReadAnnotation::Concrete).ok_or_else(|| {
                Error::Script(format!("{} returned code 1 without a value", function))
            }),
            2 => Ok(ReadAnnotation::Symbolic(name(reply)?)),
            3 => Ok(ReadAnnotation::Latched(name(reply)?)),
            code => {
                warn!(
                    "[AnnotationHandler] {} returned unknown result type {}",
                    function, code
                );
                Ok(ReadAnnotation::Passthrough)
            }
        }
    }
}

/// The scripting front end. It resolves functions by name and calls them
/// with the state of the stream doing the access.
pub trait ScriptHost {
    fn call_read(
        &mut self,
        function: &str,
        state: &mut dyn ExecutionState,
        args: &ReadArgs,
    ) -> Result<ScriptReply>;

    /// `true` hijacks the write
    fn call_write(
        &mut self,
        function: &str,
        state: &mut dyn ExecutionState,
        args: &WriteArgs,
    ) -> Result<bool>;
}

pub type SharedScriptHost = Rc<RefCell<dyn ScriptHost>>;

/// Forwards accesses in its range to user script functions
pub struct AnnotationHandler {
    name: String,
    read_handler: Option<String>,
    write_handler: Option<String>,
    host: SharedScriptHost,
    latched: HashMap<u64, SymbolicExpr>,
    mode: ModeController,
}

impl AnnotationHandler {
    pub fn new(
        name: &str,
        read_handler: Option<String>,
        write_handler: Option<String>,
        host: SharedScriptHost,
        verbose: bool,
    ) -> Self {
        AnnotationHandler {
            name: name.to_owned(),
            read_handler,
            write_handler,
            host,
            latched: HashMap::new(),
            mode: ModeController::new(verbose),
        }
    }

    fn address(&self, access: &AccessDescriptor) -> Result<u64> {
        access.concrete_address().ok_or_else(|| {
            Error::Script(format!(
                "{} cannot pass the symbolic address {} to a script",
                self.name, access.address
            ))
        })
    }

    fn create_symbolic(
        &self,
        state: &mut dyn ExecutionState,
        name: &str,
        bits: u32,
    ) -> SymbolicExpr {
        self.mode.ensure_symbolic(state, "AnnotationHandler");
        state.engine().symbolic(name, bits)
    }
}

impl MemoryHandler for AnnotationHandler {
    fn name(&self) -> &str {
        &self.name
    }

    fn read(
        &mut self,
        state: &mut dyn ExecutionState,
        access: &AccessDescriptor,
    ) -> Result<Option<Value>> {
        let function = self.read_handler.clone().ok_or_else(|| {
            Error::Script(format!("{} has no read handler", self.name))
        })?;

        let address = self.address(access)?;
        let args = ReadArgs {
            address,
            size: access.size.bytes(),
            is_io: access.is_io(),
            is_code: access.is_code(),
        };

        let reply = self.host.borrow_mut().call_read(&function, state, &args)?;

        match ReadAnnotation::decode(&function, reply)? {
            ReadAnnotation::Passthrough => Ok(None),
            ReadAnnotation::Concrete(value) => {
                let bits = access.size.value_bits()?;
                Ok(Some(Value::concrete(value, bits)))
            }
            ReadAnnotation::Symbolic(name) => {
                let bits = access.size.value_bits()?;
                let expr = self.create_symbolic(state, &name, bits);
                Ok(Some(Value::Symbolic(expr)))
            }
            ReadAnnotation::Latched(name) => {
                let bits = access.size.value_bits()?;
                if let Some(expr) = self.latched.get(&address) {
                    if expr.width() != bits {
                        return Err(Error::Script(format!(
                            "value latched at {:#x} is {} bits wide, access is {} bits",
                            address,
                            expr.width(),
                            bits
                        )));
                    }
                    // the latch may have been made in another block, still
                    // needs tracking here
                    self.mode.ensure_symbolic(state, "AnnotationHandler");
                    return Ok(Some(Value::Symbolic(expr.clone())));
                }

                let expr = self.create_symbolic(state, &name, bits);
                debug!(
                    "[AnnotationHandler] latched {} at {:#x}",
                    expr.name(),
                    address
                );
                self.latched.insert(address, expr.clone());
                Ok(Some(Value::Symbolic(expr)))
            }
        }
    }

    fn write(&mut self, state: &mut dyn ExecutionState, access: &AccessDescriptor) -> Result<bool> {
        let function = self.write_handler.clone().ok_or_else(|| {
            Error::Script(format!("{} has no write handler", self.name))
        })?;

        let address = self.address(access)?;
        let value = access.value.clone().unwrap_or_default();
        let value = concretize(state, &value).ok_or_else(|| {
            Error::Script(format!("{} cannot pass {} to a script", self.name, value))
        })?;

        let args = WriteArgs {
            address,
            size: access.size.bytes(),
            value,
            is_io: access.is_io(),
        };

        self.host.borrow_mut().call_write(&function, state, &args)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::{AccessSize, Address};
    use crate::state::ExecMode;
    use crate::test::{FakeScript, FakeState};

    fn handler(script: &Rc<RefCell<FakeScript>>) -> AnnotationHandler {
        AnnotationHandler::new(
            "uart",
            Some("uart_read".to_owned()),
            Some("uart_write".to_owned()),
            script.clone(),
            false,
        )
    }

    fn read_at(addr: u64, size: AccessSize) -> AccessDescriptor {
        AccessDescriptor::read(Address::Concrete(addr), size, true, false)
    }

    #[test]
    fn decode_codes() {
        assert_eq!(
            ReadAnnotation::decode("f", ScriptReply::concrete(7)).unwrap(),
            ReadAnnotation::Concrete(7)
        );
        assert_eq!(
            ReadAnnotation::decode("f", ScriptReply { code: 9, ..Default::default() }).unwrap(),
            ReadAnnotation::Passthrough
        );
        assert!(ReadAnnotation::decode("f", ScriptReply { code: 2, ..Default::default() }).is_err());
    }

    #[test]
    fn concrete_and_passthrough() {
        let script = FakeScript::shared(vec![ScriptReply::pass(), ScriptReply::concrete(0x1ff)]);
        let mut handler = handler(&script);
        let mut state = FakeState::new();

        let access = read_at(0x4000_4000, AccessSize::Bits8);
        assert_eq!(handler.read(&mut state, &access).unwrap(), None);
        assert_eq!(
            handler.read(&mut state, &access).unwrap(),
            Some(Value::concrete(0xff, 8))
        );

        let script = script.borrow();
        let calls = &script.reads;
        assert_eq!(calls[0].0, "uart_read");
        assert_eq!(
            calls[0].1,
            ReadArgs { address: 0x4000_4000, size: 1, is_io: true, is_code: false }
        );
        assert_eq!(state.switches, 0);
    }

    #[test]
    fn symbolic_switches_mode_once() {
        let script = FakeScript::shared(vec![ScriptReply::symbolic("rx")]);
        let mut handler = handler(&script);
        let mut state = FakeState::new();
        assert_eq!(state.mode, ExecMode::Concrete);

        let value = handler.read(&mut state, &read_at(0x10, AccessSize::Bits32)).unwrap();
        let expr = value.unwrap().as_symbolic().cloned().unwrap();
        assert_eq!(expr.name(), "rx");
        assert_eq!(expr.width(), 32);
        assert_eq!(state.switches, 1);
        assert_eq!(state.mode, ExecMode::Symbolic);
    }

    #[test]
    fn latch_keeps_identity() {
        let script = FakeScript::shared(vec![
            ScriptReply::latched("latch"),
            ScriptReply::latched("latch"),
            ScriptReply::latched("latch"),
        ]);
        let mut handler = handler(&script);
        let mut state = FakeState::new();

        let first = handler.read(&mut state, &read_at(0x20, AccessSize::Bits16)).unwrap();
        let again = handler.read(&mut state, &read_at(0x20, AccessSize::Bits16)).unwrap();
        let other = handler.read(&mut state, &read_at(0x22, AccessSize::Bits16)).unwrap();

        assert_eq!(first, again);
        assert_ne!(first, other);
        assert_eq!(state.switches, 1);
    }

    #[test]
    fn latch_width_mismatch() {
        let script = FakeScript::shared(vec![ScriptReply::latched("l"), ScriptReply::latched("l")]);
        let mut handler = handler(&script);
        let mut state = FakeState::new();

        handler.read(&mut state, &read_at(0x20, AccessSize::Bits16)).unwrap();
        let err = handler.read(&mut state, &read_at(0x20, AccessSize::Bits32)).unwrap_err();
        assert!(matches!(err, Error::Script(_)));
    }

    #[test]
    fn wide_symbolic_is_unsupported() {
        let script = FakeScript::shared(vec![ScriptReply::symbolic("wide")]);
        let mut handler = handler(&script);
        let mut state = FakeState::new();

        let err = handler.read(&mut state, &read_at(0x0, AccessSize::Bits128)).unwrap_err();
        assert!(matches!(err, Error::UnsupportedWidth(128)));
        assert_eq!(state.switches, 0);
    }

    #[test]
    fn write_goes_to_script() {
        let script = FakeScript::shared(vec![]);
        script.borrow_mut().hijack = true;
        let mut handler = handler(&script);
        let mut state = FakeState::new();

        let access = AccessDescriptor::write(
            Address::Concrete(0x4000_4004),
            AccessSize::Bits32,
            false,
            Value::concrete(0x41, 32),
        );
        assert!(handler.write(&mut state, &access).unwrap());

        let script = script.borrow();
        let calls = &script.writes;
        assert_eq!(calls[0].0, "uart_write");
        assert_eq!(
            calls[0].1,
            WriteArgs { address: 0x4000_4004, size: 4, value: 0x41, is_io: false }
        );
    }
}
