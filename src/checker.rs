use crate::access::{AccessDescriptor, Address};
use crate::error::Result;
use crate::handler::AccessObserver;
use crate::state::ExecutionState;
use crate::value::Value;

use log::{debug, warn};
use serde::Deserialize;
use std::fs;
use std::path::Path;

/// One valid region of the target's memory map
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct MemoryRegion {
    #[serde(default)]
    pub r#type: String,

    #[serde(deserialize_with = "crate::config::hex")]
    pub start: u64,

    #[serde(deserialize_with = "crate::config::hex")]
    pub size: u64,
}

impl MemoryRegion {
    #[inline]
    pub fn contains(&self, address: u64) -> bool {
        address >= self.start && address - self.start < self.size
    }
}

/// Warns about data accesses that fall outside the memory map. Symbolic
/// addresses are checked at both ends of the range the solver allows.
#[derive(Debug, Clone, Default)]
pub struct MemoryMapChecker {
    regions: Vec<MemoryRegion>,
    invalid: usize,
    pub verbose: bool,
}

impl MemoryMapChecker {
    pub fn new(regions: Vec<MemoryRegion>, verbose: bool) -> Self {
        if verbose {
            for region in &regions {
                debug!(
                    "[MemoryMapChecker] {}: {:#x}-{:#x}",
                    region.r#type,
                    region.start,
                    region.start.saturating_add(region.size)
                );
            }
        }

        MemoryMapChecker {
            regions,
            invalid: 0,
            verbose,
        }
    }

    pub fn from_json(json: &str, verbose: bool) -> Result<Self> {
        let regions: Vec<MemoryRegion> = serde_json::from_str(json)?;
        Ok(MemoryMapChecker::new(regions, verbose))
    }

    pub fn load<P: AsRef<Path>>(path: P, verbose: bool) -> Result<Self> {
        let json = fs::read_to_string(path)?;
        MemoryMapChecker::from_json(&json, verbose)
    }

    pub fn regions(&self) -> &[MemoryRegion] {
        &self.regions
    }

    pub fn is_valid(&self, address: u64) -> bool {
        self.regions.iter().any(|region| region.contains(address))
    }

    /// number of invalid accesses reported so far
    pub fn invalid_accesses(&self) -> usize {
        self.invalid
    }

    pub fn check(&mut self, state: &mut dyn ExecutionState, address: &Address) -> bool {
        let valid = match address {
            Address::Concrete(addr) => {
                let valid = self.is_valid(*addr);
                if !valid {
                    warn!(
                        "[MemoryMapChecker] @{:#x}: invalid (concrete) memory access {:#x}",
                        state.pc(),
                        addr
                    );
                }
                valid
            }
            Address::Symbolic(expr) => match state.engine().range(expr) {
                Some((min, max)) => {
                    let valid = self.is_valid(min) && self.is_valid(max);
                    if !valid {
                        warn!(
                            "[MemoryMapChecker] state {} @{:#x}: invalid (symbolic) memory access {:#x} - {:#x}",
                            state.id(),
                            state.pc(),
                            min,
                            max
                        );
                    }
                    valid
                }
                None => {
                    warn!(
                        "[MemoryMapChecker] state {} @{:#x}: no range for {}",
                        state.id(),
                        state.pc(),
                        address
                    );
                    false
                }
            },
        };

        if !valid {
            self.invalid += 1;
        }
        valid
    }
}

impl AccessObserver for MemoryMapChecker {
    fn observe(
        &mut self,
        state: &mut dyn ExecutionState,
        access: &AccessDescriptor,
        _value: Option<&Value>,
        _hijacked: bool,
    ) {
        if access.is_code() {
            return;
        }
        self.check(state, &access.address);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::AccessSize;
    use crate::state::SymbolicEngine;
    use crate::test::FakeState;

    const MAP: &str = r#"[
        {"type": "rom", "start": 0, "size": 65536},
        {"type": "ram", "start": "0x20000000", "size": "0x1000"}
    ]"#;

    #[test]
    fn concrete_accesses() {
        let mut checker = MemoryMapChecker::from_json(MAP, true).unwrap();
        let mut state = FakeState::new();

        assert!(checker.check(&mut state, &Address::Concrete(0xfffc)));
        assert!(checker.check(&mut state, &Address::Concrete(0x20000fff)));
        assert!(!checker.check(&mut state, &Address::Concrete(0x20001000)));
        assert!(!checker.check(&mut state, &Address::Concrete(0x10000)));
        assert_eq!(checker.invalid_accesses(), 2);
    }

    #[test]
    fn symbolic_range_ends() {
        let mut checker = MemoryMapChecker::from_json(MAP, false).unwrap();
        let mut state = FakeState::new();

        let inside = state.engine.symbolic("p", 32);
        state.engine.ranges.insert(inside.id(), (0x20000000, 0x20000010));
        assert!(checker.check(&mut state, &Address::Symbolic(inside)));

        let spilling = state.engine.symbolic("q", 32);
        state.engine.ranges.insert(spilling.id(), (0x20000000, 0x20002000));
        assert!(!checker.check(&mut state, &Address::Symbolic(spilling)));
    }

    #[test]
    fn observer_skips_fetches() {
        let mut checker = MemoryMapChecker::from_json(MAP, false).unwrap();
        let mut state = FakeState::new();

        let fetch = AccessDescriptor::read(Address::Concrete(0x90000000), AccessSize::Bits32, false, true);
        checker.observe(&mut state, &fetch, None, false);
        let read = AccessDescriptor::read(Address::Concrete(0x90000000), AccessSize::Bits32, false, false);
        checker.observe(&mut state, &read, None, false);
        assert_eq!(checker.invalid_accesses(), 1);
    }
}
