use crate::error::Result;
use crate::state::ExecutionState;

use byteorder::{ByteOrder, LittleEndian, ReadBytesExt, WriteBytesExt};
use log::{debug, warn};
use std::fmt;
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

/// Entry types of the execution trace format, in on-disk order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum TraceEntryType {
    ModuleLoad = 0,
    ModuleUnload,
    ProcessUnload,
    Call,
    Return,
    TbStart,
    TbEnd,
    ModuleDescription,
    Fork,
    CacheSim,
    TestCase,
    BranchCoverage,
    Memory,
    PageFault,
    TlbMiss,
    InstructionCount,
    MemoryChecker,
    Exception,
    StateSwitch,
    TbStart64,
    TbEnd64,
    Block,
}

/// first type value that is not a valid entry
pub const TRACE_MAX: u32 = 22;

impl TraceEntryType {
    pub fn from_u32(t: u32) -> Option<Self> {
        use TraceEntryType::*;
        let entry_type = match t {
            0 => ModuleLoad,
            1 => ModuleUnload,
            2 => ProcessUnload,
            3 => Call,
            4 => Return,
            5 => TbStart,
            6 => TbEnd,
            7 => ModuleDescription,
            8 => Fork,
            9 => CacheSim,
            10 => TestCase,
            11 => BranchCoverage,
            12 => Memory,
            13 => PageFault,
            14 => TlbMiss,
            15 => InstructionCount,
            16 => MemoryChecker,
            17 => Exception,
            18 => StateSwitch,
            19 => TbStart64,
            20 => TbEnd64,
            21 => Block,
            _ => return None,
        };
        Some(entry_type)
    }
}

impl fmt::Display for TraceEntryType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Fixed header in front of every entry, little endian
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TraceEntryHeader {
    pub timestamp: u64,
    pub size: u32, // payload bytes
    pub entry_type: u32,
    pub state_id: u32,
    pub pid: u32,
}

impl TraceEntryHeader {
    pub const SIZE: usize = 24;

    pub fn read_from<R: Read>(input: &mut R) -> io::Result<Self> {
        Ok(TraceEntryHeader {
            timestamp: input.read_u64::<LittleEndian>()?,
            size: input.read_u32::<LittleEndian>()?,
            entry_type: input.read_u32::<LittleEndian>()?,
            state_id: input.read_u32::<LittleEndian>()?,
            pid: input.read_u32::<LittleEndian>()?,
        })
    }

    pub fn write_to<W: Write>(&self, output: &mut W) -> io::Result<()> {
        output.write_u64::<LittleEndian>(self.timestamp)?;
        output.write_u32::<LittleEndian>(self.size)?;
        output.write_u32::<LittleEndian>(self.entry_type)?;
        output.write_u32::<LittleEndian>(self.state_id)?;
        output.write_u32::<LittleEndian>(self.pid)
    }

    pub fn kind(&self) -> Option<TraceEntryType> {
        TraceEntryType::from_u32(self.entry_type)
    }
}

/// Payload of a `Memory` entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MemoryTraceEntry {
    pub address: u64,
    pub size: u8, // bytes
    pub value: u64,
    pub flags: u8,
}

impl MemoryTraceEntry {
    pub const SIZE: usize = 18;

    pub const WRITE: u8 = 1;
    pub const IO: u8 = 2;
    pub const SYMBOLIC_VALUE: u8 = 4;
    pub const SYMBOLIC_ADDRESS: u8 = 8;

    pub fn new(address: u64, bits: u32, value: u64, flags: u8) -> Self {
        MemoryTraceEntry {
            address,
            size: (bits / 8) as u8,
            value,
            flags,
        }
    }

    /// `None` if the payload is too short
    pub fn parse(payload: &[u8]) -> Option<Self> {
        if payload.len() < MemoryTraceEntry::SIZE {
            return None;
        }

        Some(MemoryTraceEntry {
            address: LittleEndian::read_u64(&payload[0..8]),
            size: payload[8],
            value: LittleEndian::read_u64(&payload[9..17]),
            flags: payload[17],
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut payload = vec![0; MemoryTraceEntry::SIZE];
        LittleEndian::write_u64(&mut payload[0..8], self.address);
        payload[8] = self.size;
        LittleEndian::write_u64(&mut payload[9..17], self.value);
        payload[17] = self.flags;
        payload
    }

    #[inline]
    pub fn is_write(&self) -> bool {
        self.flags & MemoryTraceEntry::WRITE != 0
    }

    #[inline]
    pub fn bits(&self) -> u32 {
        self.size as u32 * 8
    }
}

impl fmt::Display for MemoryTraceEntry {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{} {:#x} [{}] = {:#x}{}",
            if self.is_write() { "W" } else { "R" },
            self.address,
            self.bits(),
            self.value,
            if self.flags & MemoryTraceEntry::IO != 0 { " io" } else { "" }
        )
    }
}

/// Payload of a `Fork` entry: the forking pc and the ids of the new states
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ForkTraceEntry {
    pub pc: u64,
    pub children: Vec<u32>,
}

impl ForkTraceEntry {
    pub fn parse(payload: &[u8]) -> Option<Self> {
        let mut input = payload;
        let pc = input.read_u64::<LittleEndian>().ok()?;
        let count = input.read_u32::<LittleEndian>().ok()?;
        let mut children = Vec::with_capacity(count.min(256) as usize);
        for _ in 0..count {
            children.push(input.read_u32::<LittleEndian>().ok()?);
        }
        Some(ForkTraceEntry { pc, children })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut payload = Vec::with_capacity(12 + 4 * self.children.len());
        // writes into a vec do not fail
        let _ = payload.write_u64::<LittleEndian>(self.pc);
        let _ = payload.write_u32::<LittleEndian>(self.children.len() as u32);
        for child in &self.children {
            let _ = payload.write_u32::<LittleEndian>(*child);
        }
        payload
    }
}

// anything bigger is a corrupt header, not an entry
const MAX_PAYLOAD: u32 = 1 << 20;

/// Sequential cursor over a recorded trace, bound to one stream.
///
/// Payloads are always consumed through the scratch buffer, exactly
/// `header.size` bytes each, so the position in the log is known at all
/// times. A short read or an unknown entry type ends the stream for good.
pub struct TraceReader<R: Read> {
    input: R,
    state_id: u32,
    pub last_header: Option<TraceEntryHeader>,
    pub current: Option<MemoryTraceEntry>,
    scratch: Vec<u8>,
    offset: u64,
    exhausted: bool,
}

impl TraceReader<BufReader<File>> {
    pub fn open<P: AsRef<Path>>(path: P, state_id: u32) -> Result<Self> {
        let file = File::open(path)?;
        Ok(TraceReader::new(BufReader::new(file), state_id))
    }
}

impl<R: Read> TraceReader<R> {
    pub fn new(input: R, state_id: u32) -> Self {
        TraceReader {
            input,
            state_id,
            last_header: None,
            current: None,
            scratch: Vec::with_capacity(64),
            offset: 0,
            exhausted: false,
        }
    }

    pub fn state_id(&self) -> u32 {
        self.state_id
    }

    /// bytes consumed so far
    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    /// payload of the entry last returned by `next_entry`
    pub fn payload(&self) -> &[u8] {
        &self.scratch
    }

    /// Next entry of any stream and type. The payload is left in the
    /// scratch buffer.
    pub fn next_entry(&mut self) -> Option<TraceEntryHeader> {
        if self.exhausted {
            return None;
        }

        let header = match TraceEntryHeader::read_from(&mut self.input) {
            Ok(header) => header,
            Err(_) => return self.finish(None),
        };

        if header.entry_type >= TRACE_MAX || header.size > MAX_PAYLOAD {
            return self.finish(Some(&header));
        }

        self.scratch.resize(header.size as usize, 0);
        if self.input.read_exact(&mut self.scratch).is_err() {
            return self.finish(Some(&header));
        }

        self.offset += (TraceEntryHeader::SIZE + self.scratch.len()) as u64;
        self.last_header = Some(header);
        Some(header)
    }

    fn finish(&mut self, header: Option<&TraceEntryHeader>) -> Option<TraceEntryHeader> {
        if let Some(header) = header {
            warn!(
                "[TraceReader] bad entry at offset {:#x} (type {}, size {}), stopping",
                self.offset, header.entry_type, header.size
            );
        }
        self.exhausted = true;
        self.current = None;
        None
    }

    /// Next memory entry of the bound stream
    pub fn next_memory_entry(&mut self) -> Option<MemoryTraceEntry> {
        while let Some(header) = self.next_entry() {
            if header.state_id != self.state_id
                || header.entry_type != TraceEntryType::Memory as u32
            {
                continue;
            }

            match MemoryTraceEntry::parse(&self.scratch) {
                Some(entry) => {
                    self.current = Some(entry);
                    return Some(entry);
                }
                None => {
                    self.finish(Some(&header));
                    return None;
                }
            }
        }
        None
    }

    /// Advance to the next entry matching the access and consume it,
    /// returning its value. Everything passed on the way is dropped.
    pub fn find(&mut self, address: u64, bits: u32, is_write: bool) -> Option<u64> {
        let mut skipped = 0;
        while let Some(entry) = self.next_memory_entry() {
            if entry.address != address {
                continue;
            }

            if entry.bits() != bits {
                debug!(
                    "[TraceReader] size not matched {} vs {} at {:#x}",
                    entry.bits(),
                    bits,
                    address
                );
                continue;
            }

            if entry.is_write() != is_write {
                skipped += 1;
                continue;
            }

            debug!("[TraceReader] matched {} after {} skipped", entry, skipped);
            self.current = None;
            return Some(entry.value);
        }
        None
    }
}

/// Appends entries in the trace format
pub struct TraceWriter<W: Write> {
    output: W,
    entries: u64,
}

impl TraceWriter<BufWriter<File>> {
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::create(path)?;
        Ok(TraceWriter::new(BufWriter::new(file)))
    }
}

impl<W: Write> TraceWriter<W> {
    pub fn new(output: W) -> Self {
        TraceWriter { output, entries: 0 }
    }

    pub fn entries(&self) -> u64 {
        self.entries
    }

    pub fn write_record(
        &mut self,
        state_id: u32,
        pid: u32,
        entry_type: TraceEntryType,
        payload: &[u8],
    ) -> Result<()> {
        let header = TraceEntryHeader {
            timestamp: timestamp(),
            size: payload.len() as u32,
            entry_type: entry_type as u32,
            state_id,
            pid,
        };

        header.write_to(&mut self.output)?;
        self.output.write_all(payload)?;
        self.entries += 1;
        Ok(())
    }

    /// entry stamped with the stream and pid of `state`
    pub fn write_entry(
        &mut self,
        state: &dyn ExecutionState,
        entry_type: TraceEntryType,
        payload: &[u8],
    ) -> Result<()> {
        self.write_record(state.id(), state.pid(), entry_type, payload)
    }

    pub fn write_memory(&mut self, state: &dyn ExecutionState, entry: &MemoryTraceEntry) -> Result<()> {
        self.write_entry(state, TraceEntryType::Memory, &entry.encode())
    }

    pub fn write_fork(&mut self, state: &dyn ExecutionState, entry: &ForkTraceEntry) -> Result<()> {
        self.write_entry(state, TraceEntryType::Fork, &entry.encode())
    }

    pub fn flush(&mut self) -> Result<()> {
        self.output.flush()?;
        Ok(())
    }

    pub fn into_inner(self) -> W {
        self.output
    }
}

/// microseconds since the epoch
fn timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or(0)
}
