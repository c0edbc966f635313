use crate::error::{Error, Result};
use crate::value::{SymbolicExpr, Value};

use std::fmt;
use std::ops;

/// Flag set qualifying a memory access, also used as the mask a handler
/// declares for the accesses it wants to see
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct AccessType(u32);

impl AccessType {
    pub const NONE: AccessType = AccessType(0);
    pub const READ: AccessType = AccessType(0x1);
    pub const WRITE: AccessType = AccessType(0x2);
    pub const EXECUTE: AccessType = AccessType(0x4);
    pub const CONCRETE_VALUE: AccessType = AccessType(0x8);
    pub const SYMBOLIC_VALUE: AccessType = AccessType(0x10);
    pub const CONCRETE_ADDRESS: AccessType = AccessType(0x20);
    pub const SYMBOLIC_ADDRESS: AccessType = AccessType(0x40);
    pub const NON_IO: AccessType = AccessType(0x80);
    pub const IO: AccessType = AccessType(0x100);

    pub const DIRECTIONS: AccessType = AccessType(0x1 | 0x2 | 0x4);
    pub const IO_KINDS: AccessType = AccessType(0x80 | 0x100);
    pub const ALL: AccessType = AccessType(0x1ff);

    const NAMES: [(AccessType, &'static str); 9] = [
        (AccessType::READ, "read"),
        (AccessType::WRITE, "write"),
        (AccessType::EXECUTE, "execute"),
        (AccessType::CONCRETE_VALUE, "concrete_value"),
        (AccessType::SYMBOLIC_VALUE, "symbolic_value"),
        (AccessType::CONCRETE_ADDRESS, "concrete_address"),
        (AccessType::SYMBOLIC_ADDRESS, "symbolic_address"),
        (AccessType::NON_IO, "memory"),
        (AccessType::IO, "io"),
    ];

    #[inline]
    pub const fn bits(&self) -> u32 {
        self.0
    }

    #[inline]
    pub const fn from_bits(bits: u32) -> Self {
        AccessType(bits & AccessType::ALL.0)
    }

    /// every flag of `other` is set in `self`
    #[inline]
    pub const fn contains(&self, other: AccessType) -> bool {
        self.0 & other.0 == other.0
    }

    #[inline]
    pub const fn intersects(&self, other: AccessType) -> bool {
        self.0 & other.0 != 0
    }

    #[inline]
    pub const fn is_empty(&self) -> bool {
        self.0 == 0
    }

    /// Parse one configuration word, `memory` being the non-io flag
    pub fn from_word(word: &str) -> Option<AccessType> {
        AccessType::NAMES
            .iter()
            .find(|(_, name)| *name == word)
            .map(|(flag, _)| *flag)
    }
}

impl ops::BitOr for AccessType {
    type Output = AccessType;

    #[inline]
    fn bitor(self, rhs: AccessType) -> AccessType {
        AccessType(self.0 | rhs.0)
    }
}

impl ops::BitOrAssign for AccessType {
    #[inline]
    fn bitor_assign(&mut self, rhs: AccessType) {
        self.0 |= rhs.0
    }
}

impl ops::BitAnd for AccessType {
    type Output = AccessType;

    #[inline]
    fn bitand(self, rhs: AccessType) -> AccessType {
        AccessType(self.0 & rhs.0)
    }
}

impl fmt::Display for AccessType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let words: Vec<&str> = AccessType::NAMES
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, name)| *name)
            .collect();

        write!(f, "{:#x}({})", self.0, words.join("|"))
    }
}

/// Width of a single access
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccessSize {
    Bits8,
    Bits16,
    Bits32,
    Bits64,
    Bits128,
}

impl AccessSize {
    pub fn from_bits(bits: u32) -> Result<Self> {
        match bits {
            8 => Ok(AccessSize::Bits8),
            16 => Ok(AccessSize::Bits16),
            32 => Ok(AccessSize::Bits32),
            64 => Ok(AccessSize::Bits64),
            128 => Ok(AccessSize::Bits128),
            _ => Err(Error::InvalidWidth(bits)),
        }
    }

    pub fn from_bytes(bytes: u32) -> Result<Self> {
        AccessSize::from_bits(bytes.saturating_mul(8))
    }

    #[inline]
    pub fn bits(&self) -> u32 {
        match self {
            AccessSize::Bits8 => 8,
            AccessSize::Bits16 => 16,
            AccessSize::Bits32 => 32,
            AccessSize::Bits64 => 64,
            AccessSize::Bits128 => 128,
        }
    }

    #[inline]
    pub fn bytes(&self) -> u32 {
        self.bits() / 8
    }

    /// Widths a value handle can carry, everything but 128
    pub fn value_bits(&self) -> Result<u32> {
        match self {
            AccessSize::Bits128 => Err(Error::UnsupportedWidth(128)),
            _ => Ok(self.bits()),
        }
    }
}

/// Address of an access, either resolved or an expression
#[derive(Debug, Clone, PartialEq)]
pub enum Address {
    Concrete(u64),
    Symbolic(SymbolicExpr),
}

impl Address {
    #[inline]
    pub fn as_concrete(&self) -> Option<u64> {
        match self {
            Address::Concrete(addr) => Some(*addr),
            Address::Symbolic(_) => None,
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Address::Concrete(addr) => write!(f, "{:#x}", addr),
            Address::Symbolic(expr) => write!(f, "<{}#{}>", expr.name(), expr.id()),
        }
    }
}

/// Canonical description of one memory operation. Built only through
/// `read` and `write`, so exactly one direction, one io kind and one
/// address kind are ever set.
#[derive(Debug, Clone, PartialEq)]
pub struct AccessDescriptor {
    pub address: Address,
    pub size: AccessSize,
    pub kind: AccessType,
    pub value: Option<Value>,
}

impl AccessDescriptor {
    pub fn read(address: Address, size: AccessSize, is_io: bool, is_code: bool) -> Self {
        let mut kind = if is_code {
            AccessType::EXECUTE
        } else {
            AccessType::READ
        };

        kind |= AccessDescriptor::common_flags(&address, is_io);

        AccessDescriptor {
            address,
            size,
            kind,
            value: None,
        }
    }

    pub fn write(address: Address, size: AccessSize, is_io: bool, value: Value) -> Self {
        let mut kind = AccessType::WRITE | AccessDescriptor::common_flags(&address, is_io);

        kind |= if value.is_symbolic() {
            AccessType::SYMBOLIC_VALUE
        } else {
            AccessType::CONCRETE_VALUE
        };

        AccessDescriptor {
            address,
            size,
            kind,
            value: Some(value),
        }
    }

    fn common_flags(address: &Address, is_io: bool) -> AccessType {
        let io = if is_io {
            AccessType::IO
        } else {
            AccessType::NON_IO
        };

        match address {
            Address::Concrete(_) => io | AccessType::CONCRETE_ADDRESS,
            Address::Symbolic(_) => io | AccessType::SYMBOLIC_ADDRESS,
        }
    }

    #[inline]
    pub fn concrete_address(&self) -> Option<u64> {
        self.address.as_concrete()
    }

    #[inline]
    pub fn is_write(&self) -> bool {
        self.kind.contains(AccessType::WRITE)
    }

    #[inline]
    pub fn is_code(&self) -> bool {
        self.kind.contains(AccessType::EXECUTE)
    }

    #[inline]
    pub fn is_io(&self) -> bool {
        self.kind.contains(AccessType::IO)
    }

    #[inline]
    pub fn bits(&self) -> u32 {
        self.size.bits()
    }
}

impl fmt::Display for AccessDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} [{}] {}", self.address, self.size.bits(), self.kind)?;
        if let Some(value) = &self.value {
            write!(f, " = {}", value)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_flags() {
        let desc = AccessDescriptor::read(Address::Concrete(0x10), AccessSize::Bits32, false, false);
        assert_eq!(
            desc.kind,
            AccessType::READ | AccessType::NON_IO | AccessType::CONCRETE_ADDRESS
        );

        let code = AccessDescriptor::read(Address::Concrete(0x10), AccessSize::Bits32, true, true);
        assert!(code.is_code());
        assert!(code.is_io());
        assert!(!code.kind.contains(AccessType::READ));
    }

    #[test]
    fn write_flags() {
        let sym = SymbolicExpr::new(7, "addr", 32);
        let desc = AccessDescriptor::write(
            Address::Symbolic(sym),
            AccessSize::Bits8,
            true,
            Value::concrete(1, 8),
        );
        assert!(desc.kind.contains(AccessType::SYMBOLIC_ADDRESS));
        assert!(!desc.kind.contains(AccessType::CONCRETE_ADDRESS));
        assert!(desc.kind.contains(AccessType::CONCRETE_VALUE | AccessType::IO));
        assert_eq!(desc.concrete_address(), None);
    }

    #[test]
    fn widths() {
        assert_eq!(AccessSize::from_bits(16).unwrap().bytes(), 2);
        assert!(matches!(AccessSize::from_bits(24), Err(Error::InvalidWidth(24))));
        assert!(matches!(AccessSize::from_bits(256), Err(Error::InvalidWidth(256))));
        assert!(AccessSize::Bits128.value_bits().is_err());
        assert_eq!(AccessSize::from_bytes(8).unwrap(), AccessSize::Bits64);
    }

    #[test]
    fn words() {
        assert_eq!(AccessType::from_word("memory"), Some(AccessType::NON_IO));
        assert_eq!(AccessType::from_word("bogus"), None);
        let mask = AccessType::READ | AccessType::IO;
        assert_eq!(format!("{}", mask), "0x101(read|io)");
    }
}
