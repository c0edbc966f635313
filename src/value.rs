use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque handle to an expression owned by the symbolic engine.
/// Two handles are the same value iff their ids match.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SymbolicExpr {
    id: u64,
    name: String,
    width: u32,
}

impl SymbolicExpr {
    pub fn new(id: u64, name: &str, width: u32) -> Self {
        SymbolicExpr {
            id,
            name: name.to_owned(),
            width,
        }
    }

    #[inline]
    pub fn id(&self) -> u64 {
        self.id
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn width(&self) -> u32 {
        self.width
    }
}

/// A value flowing through a memory access, concrete (value, width in bits)
/// or symbolic
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Concrete(u64, u32),
    Symbolic(SymbolicExpr),
}

impl Default for Value {
    fn default() -> Self {
        Value::Concrete(0, 64)
    }
}

#[inline]
pub fn mask(bits: u32) -> u64 {
    if bits >= 64 {
        u64::MAX
    } else {
        (1u64 << bits) - 1
    }
}

/// shorthand for a 64 bit concrete value
#[inline]
pub fn vc(v: u64) -> Value {
    Value::Concrete(v, 64)
}

impl Value {
    /// Concrete value truncated to `bits`
    #[inline]
    pub fn concrete(val: u64, bits: u32) -> Self {
        Value::Concrete(val & mask(bits), bits)
    }

    #[inline]
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Value::Concrete(val, _) => Some(*val),
            Value::Symbolic(_) => None,
        }
    }

    #[inline]
    pub fn as_symbolic(&self) -> Option<&SymbolicExpr> {
        match self {
            Value::Concrete(..) => None,
            Value::Symbolic(expr) => Some(expr),
        }
    }

    #[inline]
    pub fn is_symbolic(&self) -> bool {
        matches!(self, Value::Symbolic(_))
    }

    #[inline]
    pub fn is_concrete(&self) -> bool {
        !self.is_symbolic()
    }

    #[inline]
    pub fn width(&self) -> u32 {
        match self {
            Value::Concrete(_, bits) => *bits,
            Value::Symbolic(expr) => expr.width(),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Value::Concrete(val, bits) => write!(f, "{:#x}[{}]", val, bits),
            Value::Symbolic(expr) => write!(f, "{}#{}[{}]", expr.name(), expr.id(), expr.width()),
        }
    }
}

/// Byte order of the emulated target, chosen once from configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Endian {
    Little,
    Big,
}

impl Default for Endian {
    fn default() -> Self {
        Endian::Little
    }
}

impl Endian {
    pub fn from_string(end: &str) -> Option<Endian> {
        match end {
            "little" => Some(Endian::Little),
            "big" => Some(Endian::Big),
            _ => None,
        }
    }

    /// Reassemble an integer from at most 8 bytes laid out in memory order
    pub fn pack(&self, data: &[u8]) -> u64 {
        let length = data.len().min(8);
        let mut con_val: u64 = 0;
        for count in 0..length {
            let byte = match self {
                Endian::Little => data[count],
                Endian::Big => data[length - 1 - count],
            };
            con_val |= (byte as u64) << (8 * count);
        }
        con_val
    }

    /// Split the low `length` bytes of `value` into memory order
    pub fn unpack(&self, value: u64, length: usize) -> Vec<u8> {
        let mut data: Vec<u8> = (0..length)
            .map(|count| (value.checked_shr(8 * count as u32).unwrap_or(0) & 0xff) as u8)
            .collect();

        if *self == Endian::Big {
            data.reverse();
        }
        data
    }
}
