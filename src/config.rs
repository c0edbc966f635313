use crate::access::AccessType;
use crate::error::{Error, Result};
use crate::value::Endian;

use log::warn;
use serde::{Deserialize, Deserializer};
use std::fs;
use std::path::{Path, PathBuf};

/// Integer written either as a JSON number or as a hex string
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Int(pub u64);

#[derive(Deserialize)]
#[serde(untagged)]
enum RawInt {
    Number(u64),
    Text(String),
}

pub fn parse_int(text: &str) -> Option<u64> {
    let text = text.trim();
    let digits = text
        .strip_prefix("0x")
        .or_else(|| text.strip_prefix("0X"))
        .unwrap_or(text);
    u64::from_str_radix(digits, 16).ok()
}

impl<'de> Deserialize<'de> for Int {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        match RawInt::deserialize(deserializer)? {
            RawInt::Number(n) => Ok(Int(n)),
            RawInt::Text(text) => parse_int(&text)
                .map(Int)
                .ok_or_else(|| serde::de::Error::custom(format!("invalid integer `{}`", text))),
        }
    }
}

/// `deserialize_with` helper for plain `u64` fields
pub fn hex<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<u64, D::Error> {
    Int::deserialize(deserializer).map(|n| n.0)
}

fn yes() -> bool {
    true
}

fn default_listen() -> String {
    ":5555".to_owned()
}

pub const DEFAULT_BREAKPOINT: u64 = 0xe1200472;

/// arm instructions
pub const INSTRUCTION_SIZE: u64 = 4;

/// largest function a migration copies
pub const MAX_FUNCTION_SIZE: u64 = 0x10000;

/// every flag but symbolic addresses
pub const REPLAY_MASK: AccessType =
    AccessType::from_bits(AccessType::ALL.bits() & !AccessType::SYMBOLIC_ADDRESS.bits());

pub const REMOTE_BASE_MASK: AccessType = AccessType::from_bits(
    AccessType::CONCRETE_VALUE.bits()
        | AccessType::SYMBOLIC_VALUE.bits()
        | AccessType::CONCRETE_ADDRESS.bits()
        | AccessType::IO_KINDS.bits(),
);

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub verbose: bool,

    #[serde(default)]
    pub endian: Endian,

    #[serde(default)]
    pub annotations: Vec<AnnotationConfig>,

    pub replay: Option<ReplayConfig>,
    pub remote: Option<RemoteConfig>,
    pub migration: Option<MigrationConfig>,
    pub memory_map: Option<PathBuf>,
    pub trace_output: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AnnotationConfig {
    pub name: Option<String>,
    pub address: Option<Int>,
    pub size: Option<Int>,
    pub access_type: Option<Vec<String>>,
    pub read_handler: Option<String>,
    pub write_handler: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReplayConfig {
    pub trace_file: Option<PathBuf>,

    #[serde(default)]
    pub state_id: u32,

    #[serde(default = "yes")]
    pub skip_code: bool,

    #[serde(default)]
    pub concolic: bool,

    #[serde(default)]
    pub verbose: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RemoteConfig {
    #[serde(default = "default_listen")]
    pub listen: String,

    #[serde(default)]
    pub write_back: bool,

    #[serde(default)]
    pub verbose: bool,

    #[serde(default)]
    pub ranges: Vec<RemoteRangeConfig>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RemoteRangeConfig {
    pub name: Option<String>,
    pub address: Option<Int>,
    pub size: Option<Int>,
    pub access: Option<Vec<String>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MigrationConfig {
    pub breakpoint: Option<Int>,

    #[serde(default)]
    pub functions: Vec<FunctionConfig>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FunctionConfig {
    pub start_pc: Option<Int>,
    pub end_pc: Option<Int>,
}

/// A validated annotation entry
#[derive(Debug, Clone, PartialEq)]
pub struct Annotation {
    pub name: String,
    pub base: u64,
    pub size: u64,
    pub mask: AccessType,
    pub read_handler: Option<String>,
    pub write_handler: Option<String>,
}

/// A validated remote range
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteRange {
    pub name: String,
    pub base: u64,
    pub size: u64,
    pub mask: AccessType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FunctionRange {
    pub start_pc: u64,
    pub end_pc: u64,
}

impl FunctionRange {
    /// Bytes copied for the function, `[start_pc, end_pc + 4)`. None if the
    /// range is reversed, wraps or is over `MAX_FUNCTION_SIZE`.
    pub fn code_length(&self) -> Option<u64> {
        let length = self
            .end_pc
            .checked_sub(self.start_pc)?
            .checked_add(INSTRUCTION_SIZE)?;
        self.end_pc.checked_add(INSTRUCTION_SIZE - 1)?;
        Some(length).filter(|&length| length <= MAX_FUNCTION_SIZE)
    }
}

fn required<T: Clone>(key: &str, field: &Option<T>) -> Result<T> {
    field.clone().ok_or_else(|| Error::missing(key))
}

/// `[base, base + size)` has to be non empty and end at most at the top
/// of the address space
fn check_range(key: &str, base: u64, size: u64) -> Result<()> {
    if size == 0 {
        return Err(Error::config(key, "empty range"));
    }
    match base.checked_add(size - 1) {
        Some(_) => Ok(()),
        None => Err(Error::config(
            key,
            format!("{:#x} bytes from {:#x} wrap around", size, base),
        )),
    }
}

/// Parse access words. `symbolic_*` are reserved and only warned about.
pub fn parse_access(key: &str, words: &[String]) -> Result<AccessType> {
    let mut mask = AccessType::NONE;
    for word in words {
        match AccessType::from_word(word) {
            Some(flag)
                if flag == AccessType::SYMBOLIC_VALUE || flag == AccessType::SYMBOLIC_ADDRESS =>
            {
                warn!("[Config] {}: `{}` is not supported yet, ignored", key, word);
            }
            Some(flag) => mask |= flag,
            None => return Err(Error::config(key, format!("unknown access type `{}`", word))),
        }
    }
    Ok(mask)
}

impl Config {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let json = fs::read_to_string(path)?;
        Config::from_json(&json)
    }

    pub fn annotations(&self) -> Result<Vec<Annotation>> {
        self.annotations
            .iter()
            .enumerate()
            .map(|(i, annotation)| annotation.resolve(i))
            .collect()
    }

    pub fn remote_ranges(&self) -> Result<Vec<RemoteRange>> {
        match &self.remote {
            Some(remote) => remote.resolve(),
            None => Ok(vec![]),
        }
    }

    pub fn migration_functions(&self) -> Result<Vec<FunctionRange>> {
        match &self.migration {
            Some(migration) => migration.resolve(),
            None => Ok(vec![]),
        }
    }

    /// Check every section, the first problem found is returned
    pub fn validate(&self) -> Result<()> {
        self.annotations()?;
        if let Some(replay) = &self.replay {
            replay.trace_file()?;
        }
        self.remote_ranges()?;
        self.migration_functions()?;
        Ok(())
    }
}

impl AnnotationConfig {
    pub fn resolve(&self, index: usize) -> Result<Annotation> {
        let name = self.name.clone().unwrap_or_else(|| index.to_string());
        let key = |field: &str| format!("annotations.{}.{}", name, field);

        let base = required(&key("address"), &self.address)?.0;
        let size = required(&key("size"), &self.size)?.0;
        check_range(&key("size"), base, size)?;
        let words = required(&key("access_type"), &self.access_type)?;

        let mut mask = parse_access(&key("access_type"), &words)?;
        mask |= AccessType::CONCRETE_VALUE | AccessType::CONCRETE_ADDRESS;

        if !mask.intersects(AccessType::DIRECTIONS) {
            mask |= AccessType::DIRECTIONS;
        }

        if !mask.intersects(AccessType::IO_KINDS) {
            mask |= AccessType::IO_KINDS;
        }

        let read_handler = if mask.intersects(AccessType::READ | AccessType::EXECUTE) {
            Some(required(&key("read_handler"), &self.read_handler)?)
        } else {
            None
        };

        let write_handler = if mask.intersects(AccessType::WRITE) {
            Some(required(&key("write_handler"), &self.write_handler)?)
        } else {
            None
        };

        Ok(Annotation {
            name,
            base,
            size,
            mask,
            read_handler,
            write_handler,
        })
    }
}

impl ReplayConfig {
    pub fn trace_file(&self) -> Result<PathBuf> {
        required("replay.trace_file", &self.trace_file)
    }
}

impl RemoteConfig {
    pub fn resolve(&self) -> Result<Vec<RemoteRange>> {
        if self.ranges.is_empty() {
            return Ok(vec![RemoteRange {
                name: "all".to_owned(),
                base: 0,
                size: u64::MAX,
                mask: REMOTE_BASE_MASK | AccessType::DIRECTIONS,
            }]);
        }

        self.ranges
            .iter()
            .enumerate()
            .map(|(i, range)| {
                let name = range.name.clone().unwrap_or_else(|| i.to_string());
                let key = |field: &str| format!("remote.ranges.{}.{}", name, field);

                let base = required(&key("address"), &range.address)?.0;
                let size = required(&key("size"), &range.size)?.0;
                check_range(&key("size"), base, size)?;

                let mut mask = match &range.access {
                    Some(words) => parse_access(&key("access"), words)?,
                    None => AccessType::NONE,
                };
                if !mask.intersects(AccessType::DIRECTIONS) {
                    mask |= AccessType::DIRECTIONS;
                }

                Ok(RemoteRange {
                    name,
                    base,
                    size,
                    mask: mask | REMOTE_BASE_MASK,
                })
            })
            .collect()
    }
}

impl MigrationConfig {
    pub fn breakpoint(&self) -> u64 {
        self.breakpoint.map_or(DEFAULT_BREAKPOINT, |b| b.0)
    }

    pub fn resolve(&self) -> Result<Vec<FunctionRange>> {
        self.functions
            .iter()
            .enumerate()
            .map(|(i, function)| {
                let key = |field: &str| format!("migration.functions.{}.{}", i, field);
                let start_pc = required(&key("start_pc"), &function.start_pc)?.0;
                let end_pc = required(&key("end_pc"), &function.end_pc)?.0;

                if end_pc < start_pc {
                    return Err(Error::config(key("end_pc"), "ends before start_pc"));
                }

                let function = FunctionRange { start_pc, end_pc };
                if function.code_length().is_none() {
                    return Err(Error::config(
                        key("end_pc"),
                        format!("function is over {:#x} bytes or wraps", MAX_FUNCTION_SIZE),
                    ));
                }
                Ok(function)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key_of(err: Error) -> String {
        match err {
            Error::Config { key, .. } => key,
            other => panic!("not a config error: {}", other),
        }
    }

    #[test]
    fn ints_as_hex_or_numbers() {
        assert_eq!(parse_int("0x40004000"), Some(0x40004000));
        assert_eq!(parse_int("ff"), Some(0xff));
        assert_eq!(parse_int("0xzz"), None);

        let config = Config::from_json(
            r#"{"annotations": [{"address": 4096, "size": "0x10", "access_type": ["write"],
                "write_handler": "w"}]}"#,
        )
        .unwrap();
        let annotation = &config.annotations().unwrap()[0];
        assert_eq!((annotation.base, annotation.size), (0x1000, 0x10));
        assert_eq!(annotation.name, "0");
    }

    #[test]
    fn annotation_defaults() {
        let config = Config::from_json(
            r#"{"annotations": [{"name": "uart", "address": "0x40004000", "size": "0x100",
                "access_type": [], "read_handler": "r", "write_handler": "w"}]}"#,
        )
        .unwrap();
        let annotation = &config.annotations().unwrap()[0];
        let expected = AccessType::DIRECTIONS
            | AccessType::IO_KINDS
            | AccessType::CONCRETE_VALUE
            | AccessType::CONCRETE_ADDRESS;
        assert_eq!(annotation.mask, expected);
        assert_eq!(annotation.read_handler.as_deref(), Some("r"));
    }

    #[test]
    fn missing_handler_names_key() {
        let config = Config::from_json(
            r#"{"annotations": [{"name": "uart", "address": 0, "size": 4,
                "access_type": ["read", "io"]}]}"#,
        )
        .unwrap();
        assert_eq!(key_of(config.annotations().unwrap_err()), "annotations.uart.read_handler");

        let config = Config::from_json(
            r#"{"annotations": [{"name": "uart", "size": 4, "access_type": ["read"]}]}"#,
        )
        .unwrap();
        assert_eq!(key_of(config.validate().unwrap_err()), "annotations.uart.address");
    }

    #[test]
    fn execute_only_needs_read_handler() {
        let config = Config::from_json(
            r#"{"annotations": [{"name": "rom", "address": 0, "size": 4,
                "access_type": ["execute", "memory"], "read_handler": "fetch"}]}"#,
        )
        .unwrap();
        let annotation = &config.annotations().unwrap()[0];
        assert!(annotation.write_handler.is_none());
        assert!(!annotation.mask.contains(AccessType::IO));
    }

    #[test]
    fn symbolic_words_are_ignored() {
        let mask = parse_access("k", &["read".to_owned(), "symbolic_value".to_owned()]).unwrap();
        assert_eq!(mask, AccessType::READ);

        let err = parse_access("k", &["reed".to_owned()]).unwrap_err();
        assert_eq!(key_of(err), "k");
    }

    #[test]
    fn replay_and_remote_defaults() {
        let config = Config::from_json(r#"{"replay": {"trace_file": "t.dat"}, "remote": {}}"#).unwrap();
        let replay = config.replay.as_ref().unwrap();
        assert!(replay.skip_code);
        assert!(!replay.concolic);
        assert_eq!(replay.state_id, 0);

        let remote = config.remote.as_ref().unwrap();
        assert_eq!(remote.listen, ":5555");
        let ranges = config.remote_ranges().unwrap();
        assert_eq!(ranges.len(), 1);
        assert_eq!((ranges[0].base, ranges[0].size), (0, u64::MAX));
        assert!(ranges[0].mask.contains(AccessType::SYMBOLIC_VALUE | AccessType::EXECUTE));
        assert!(!ranges[0].mask.contains(AccessType::SYMBOLIC_ADDRESS));

        let config = Config::from_json(r#"{"replay": {}}"#).unwrap();
        assert_eq!(key_of(config.validate().unwrap_err()), "replay.trace_file");
    }

    #[test]
    fn remote_range_access() {
        let config = Config::from_json(
            r#"{"remote": {"ranges": [{"name": "periph", "address": "0x40000000",
                "size": "0x10000", "access": ["read"]}]}}"#,
        )
        .unwrap();
        let range = &config.remote_ranges().unwrap()[0];
        assert_eq!(range.mask, REMOTE_BASE_MASK | AccessType::READ);
    }

    #[test]
    fn migration_functions() {
        let config = Config::from_json(
            r#"{"migration": {"functions": [{"start_pc": "0x8000", "end_pc": "0x8040"}]}}"#,
        )
        .unwrap();
        assert_eq!(config.migration.as_ref().unwrap().breakpoint(), DEFAULT_BREAKPOINT);
        assert_eq!(
            config.migration_functions().unwrap(),
            vec![FunctionRange { start_pc: 0x8000, end_pc: 0x8040 }]
        );

        let config = Config::from_json(
            r#"{"migration": {"functions": [{"start_pc": "0x8040", "end_pc": "0x8000"}]}}"#,
        )
        .unwrap();
        assert_eq!(key_of(config.validate().unwrap_err()), "migration.functions.0.end_pc");
    }

    #[test]
    fn empty_or_wrapping_ranges() {
        let config = Config::from_json(
            r#"{"annotations": [{"name": "uart", "address": "0x1000", "size": 0,
                "access_type": ["write"], "write_handler": "w"}]}"#,
        )
        .unwrap();
        assert_eq!(key_of(config.validate().unwrap_err()), "annotations.uart.size");

        let config = Config::from_json(
            r#"{"remote": {"ranges": [{"name": "top", "address": "0xffffffffffffff00",
                "size": "0x1000"}]}}"#,
        )
        .unwrap();
        assert_eq!(key_of(config.validate().unwrap_err()), "remote.ranges.top.size");

        // ending right at the top is fine
        let config = Config::from_json(
            r#"{"remote": {"ranges": [{"name": "top", "address": "0xffffffffffffff00",
                "size": "0x100"}]}}"#,
        )
        .unwrap();
        assert_eq!(config.remote_ranges().unwrap()[0].size, 0x100);
    }

    #[test]
    fn oversized_functions() {
        let config = Config::from_json(
            r#"{"migration": {"functions": [{"start_pc": 0, "end_pc": "0xffffffffffffffff"}]}}"#,
        )
        .unwrap();
        assert_eq!(key_of(config.validate().unwrap_err()), "migration.functions.0.end_pc");

        let function = FunctionRange { start_pc: 0x8000, end_pc: 0x8004 };
        assert_eq!(function.code_length(), Some(8));
        let function = FunctionRange { start_pc: 0, end_pc: MAX_FUNCTION_SIZE - 4 };
        assert_eq!(function.code_length(), Some(MAX_FUNCTION_SIZE));
        let function = FunctionRange { start_pc: 0, end_pc: MAX_FUNCTION_SIZE };
        assert_eq!(function.code_length(), None);
        let function = FunctionRange { start_pc: u64::MAX - 3, end_pc: u64::MAX - 3 };
        assert_eq!(function.code_length(), Some(4));
        let function = FunctionRange { start_pc: u64::MAX, end_pc: u64::MAX };
        assert_eq!(function.code_length(), None);
    }

    #[test]
    fn bad_hex_is_a_json_error() {
        let err = Config::from_json(r#"{"annotations": [{"address": "0xnope"}]}"#).unwrap_err();
        assert!(matches!(err, Error::Json(_)));
    }
}
