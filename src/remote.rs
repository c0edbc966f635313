use crate::access::AccessDescriptor;
use crate::config::parse_int;
use crate::error::{Error, Result};
use crate::handler::MemoryHandler;
use crate::state::{concretize, ExecutionState};
use crate::value::{mask, Endian, Value};

use log::{debug, error, info, warn};
use serde_json::{json, Map};
use std::collections::VecDeque;
use std::io::{BufRead, BufReader, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread;

pub type JsonObject = Map<String, serde_json::Value>;

#[derive(Debug, Clone, Copy)]
pub struct RemoteOptions {
    pub endian: Endian,
    /// also store values read from the device into emulated memory
    pub write_back: bool,
    pub verbose: bool,
    /// a dead peer ends the process, only tests turn this off
    pub exit_on_disconnect: bool,
}

impl Default for RemoteOptions {
    fn default() -> Self {
        RemoteOptions {
            endian: Endian::Little,
            write_back: false,
            verbose: false,
            exit_on_disconnect: true,
        }
    }
}

struct Channel {
    writer: Box<dyn Write + Send>,
    replies: Receiver<JsonObject>,
}

/// Client side of the remote memory oracle.
///
/// Requests are newline separated json objects. A background thread reads
/// everything the peer sends: `reply` objects go to the requester waiting
/// on the channel, `cmd` objects to the interrupt queue. The channel mutex
/// is held from sending a request until its reply is taken, so there is
/// never more than one request in flight.
pub struct RemoteMemory {
    channel: Mutex<Channel>,
    interrupts: Arc<Mutex<VecDeque<JsonObject>>>,
    hit: AtomicBool,
    options: RemoteOptions,
}

impl RemoteMemory {
    /// Wait for the device side to connect
    pub fn listen(address: &str, options: RemoteOptions) -> Result<Self> {
        let address = if address.starts_with(':') {
            format!("0.0.0.0{}", address)
        } else {
            address.to_owned()
        };

        let listener = TcpListener::bind(&address)?;
        info!("[RemoteMemory] waiting for connection on {}", address);
        let (stream, peer) = listener.accept()?;
        info!("[RemoteMemory] connected to {}", peer);
        RemoteMemory::from_stream(stream, options)
    }

    pub fn from_stream(stream: TcpStream, options: RemoteOptions) -> Result<Self> {
        let reader = stream.try_clone()?;
        Ok(RemoteMemory::new(reader, stream, options))
    }

    pub fn new<R, W>(reader: R, writer: W, options: RemoteOptions) -> Self
    where
        R: Read + Send + 'static,
        W: Write + Send + 'static,
    {
        let (sender, replies) = channel();
        let interrupts = Arc::new(Mutex::new(VecDeque::new()));

        let queue = interrupts.clone();
        thread::spawn(move || receive(reader, sender, queue, options.exit_on_disconnect));

        RemoteMemory {
            channel: Mutex::new(Channel {
                writer: Box::new(writer),
                replies,
            }),
            interrupts,
            hit: AtomicBool::new(false),
            options,
        }
    }

    pub fn options(&self) -> &RemoteOptions {
        &self.options
    }

    /// true if any request was made since the last `reset_hit`
    pub fn was_hit(&self) -> bool {
        self.hit.load(Ordering::SeqCst)
    }

    pub fn reset_hit(&self) {
        self.hit.store(false, Ordering::SeqCst)
    }

    /// drain the commands the peer sent on its own
    pub fn take_interrupts(&self) -> Vec<JsonObject> {
        match self.interrupts.lock() {
            Ok(mut queue) => queue.drain(..).collect(),
            Err(_) => vec![],
        }
    }

    pub fn read(&self, state: &mut dyn ExecutionState, address: u64, size: u32) -> Result<u64> {
        self.hit.store(true, Ordering::SeqCst);
        if self.options.verbose {
            debug!("[RemoteMemory] reading memory from {:#x}[{}]", address, size);
        }

        let mut params = JsonObject::new();
        let mut old = vec![0; size as usize];
        if state.read_memory(address, &mut old) {
            params.insert("old_value".to_owned(), json!(hex(self.options.endian.pack(&old))));
        } else if self.options.verbose {
            debug!("[RemoteMemory] no concrete old value at {:#x}", address);
        }
        params.insert("address".to_owned(), json!(hex(address)));
        params.insert("size".to_owned(), json!(hex(size as u64)));

        let request = json!({
            "cmd": "read",
            "params": params,
            "cpu_state": cpu_state(state, "read"),
        });

        let reply = self.submit(&request, true)?.unwrap_or_default();
        let value = reply_value(&reply)? & mask(size * 8);

        if self.options.write_back {
            if self.options.verbose {
                debug!("[RemoteMemory] write back {:#x} to {:#x}", value, address);
            }
            let data = self.options.endian.unpack(value, size as usize);
            if !state.write_memory(address, &data) {
                warn!("[RemoteMemory] could not write back {:#x} to {:#x}", value, address);
            }
        }

        Ok(value)
    }

    /// Forward a write, the device does not answer writes
    pub fn write(
        &self,
        state: &mut dyn ExecutionState,
        address: u64,
        size: u32,
        value: u64,
    ) -> Result<()> {
        self.hit.store(true, Ordering::SeqCst);
        if self.options.verbose {
            debug!("[RemoteMemory] writing memory at {:#x}[{}] = {:#x}", address, size, value);
        }

        let request = json!({
            "cmd": "write",
            "params": {
                "value": hex(value),
                "address": hex(address),
                "size": hex(size as u64),
            },
            "cpu_state": cpu_state(state, "write"),
        });

        self.submit(&request, false)?;
        Ok(())
    }

    /// one single byte write per byte of `data`
    pub fn write_bytes(&self, state: &mut dyn ExecutionState, address: u64, data: &[u8]) -> Result<()> {
        for (offset, byte) in data.iter().enumerate() {
            self.write(state, address + offset as u64, 1, *byte as u64)?;
        }
        Ok(())
    }

    fn submit(&self, request: &serde_json::Value, wait: bool) -> Result<Option<JsonObject>> {
        let mut channel = self
            .channel
            .lock()
            .map_err(|_| Error::Protocol("request channel poisoned".to_owned()))?;

        let mut line = serde_json::to_vec(request)?;
        line.push(b'\n');
        channel.writer.write_all(&line)?;
        channel.writer.flush()?;

        if !wait {
            return Ok(None);
        }

        channel.replies.recv().map(Some).map_err(|_| Error::Disconnected)
    }
}

#[inline]
pub fn hex(value: u64) -> String {
    format!("{:#x}", value)
}

/// the `value` of a read reply, a hex string or a number
pub fn reply_value(reply: &JsonObject) -> Result<u64> {
    let value = reply
        .get("value")
        .ok_or_else(|| Error::Protocol("reply without a value".to_owned()))?;

    let parsed = match value {
        serde_json::Value::String(text) => parse_int(text),
        serde_json::Value::Number(n) => n.as_u64(),
        _ => None,
    };
    parsed.ok_or_else(|| Error::Protocol(format!("bad value in reply: {}", value)))
}

/// registers, pc and flags as hex strings. Symbolic registers are sent as
/// one example value.
pub fn cpu_state(state: &mut dyn ExecutionState, op: &str) -> JsonObject {
    let mut cpu = JsonObject::new();
    for i in 0..state.register_count() {
        let reg = state.read_register(i);
        let value = match reg {
            Value::Concrete(v, _) => v,
            Value::Symbolic(_) => {
                let example = concretize(state, &reg).unwrap_or(0);
                warn!(
                    "[RemoteMemory] register {} was symbolic during a {} at {:#x}, taking {:#x} as an example",
                    i,
                    op,
                    state.pc(),
                    example
                );
                example
            }
        };
        cpu.insert(format!("r{}", i), json!(hex(value)));
    }
    cpu.insert("pc".to_owned(), json!(hex(state.pc())));
    cpu.insert("cpsr".to_owned(), json!(hex(state.flags())));
    cpu
}

fn receive<R: Read>(
    reader: R,
    replies: Sender<JsonObject>,
    interrupts: Arc<Mutex<VecDeque<JsonObject>>>,
    exit_on_disconnect: bool,
) {
    let reader = BufReader::new(reader);
    for line in reader.lines() {
        let line = match line {
            Ok(line) => line,
            Err(_) => break,
        };
        if line.trim().is_empty() {
            continue;
        }

        let object: JsonObject = match serde_json::from_str(&line) {
            Ok(object) => object,
            Err(_) => {
                warn!("[RemoteMemory] exception in json data: '{}'", line);
                continue;
            }
        };

        if object.contains_key("reply") {
            if replies.send(object).is_err() {
                break;
            }
        } else if object.contains_key("cmd") {
            if let Ok(mut queue) = interrupts.lock() {
                queue.push_back(object);
            }
        } else {
            warn!(
                "[RemoteMemory] received json object that was neither a cmd nor a reply: {}",
                line
            );
        }
    }

    error!("[RemoteMemory] remote end disconnected, machine is dead");
    if exit_on_disconnect {
        std::process::exit(1);
    }
}

/// Hands the accesses of a range to the remote oracle
pub struct RemoteMemoryHandler {
    name: String,
    remote: Arc<RemoteMemory>,
}

impl RemoteMemoryHandler {
    pub fn new(name: &str, remote: Arc<RemoteMemory>) -> Self {
        RemoteMemoryHandler {
            name: name.to_owned(),
            remote,
        }
    }
}

impl MemoryHandler for RemoteMemoryHandler {
    fn name(&self) -> &str {
        &self.name
    }

    fn read(
        &mut self,
        state: &mut dyn ExecutionState,
        access: &AccessDescriptor,
    ) -> Result<Option<Value>> {
        let address = match access.concrete_address() {
            Some(address) => address,
            None => {
                warn!("[RemoteMemory] a symbolic address was passed to RemoteMemory, cannot handle this case");
                return Ok(None);
            }
        };

        let bits = access.size.value_bits()?;
        let value = self.remote.read(state, address, access.size.bytes())?;
        Ok(Some(Value::concrete(value, bits)))
    }

    fn write(&mut self, state: &mut dyn ExecutionState, access: &AccessDescriptor) -> Result<bool> {
        let address = match access.concrete_address() {
            Some(address) => address,
            None => {
                warn!("[RemoteMemory] a symbolic address was passed to RemoteMemory, cannot handle this case");
                return Ok(false);
            }
        };

        let value = match access.value.as_ref().and_then(|v| v.as_u64()) {
            Some(value) => value,
            None => {
                warn!("[RemoteMemory] a symbolic value was passed to RemoteMemory, cannot handle this case");
                return Ok(false);
            }
        };

        access.size.value_bits()?;
        self.remote.write(state, address, access.size.bytes(), value)?;
        Ok(true)
    }
}
