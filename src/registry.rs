use crate::access::{AccessDescriptor, AccessType};
use crate::handler::MemoryHandler;

/// A handler together with the range and access kinds it claims
pub struct Registration {
    pub base: u64,
    pub size: u64,
    pub mask: AccessType,
    pub handler: Box<dyn MemoryHandler>,
}

impl Registration {
    pub fn new(base: u64, size: u64, mask: AccessType, handler: Box<dyn MemoryHandler>) -> Self {
        Registration {
            base,
            size,
            mask,
            handler,
        }
    }

    /// `[base, base + size)`, no overflow for ranges ending at the top
    #[inline]
    pub fn contains(&self, address: u64) -> bool {
        address >= self.base && address - self.base < self.size
    }

    #[inline]
    pub fn end(&self) -> u64 {
        self.base.saturating_add(self.size)
    }

    pub fn overlaps(&self, other: &Registration) -> bool {
        self.size != 0 && other.size != 0 && self.base < other.end() && other.base < self.end()
    }

    /// the descriptor's flags are a subset of the mask and either the
    /// address is symbolic (range is not checked, it would need the solver)
    /// or it lies in the range
    pub fn matches(&self, access: &AccessDescriptor) -> bool {
        if !self.mask.contains(access.kind) {
            return false;
        }

        if access.kind.contains(AccessType::SYMBOLIC_ADDRESS) {
            return true;
        }

        access.concrete_address().map_or(false, |addr| self.contains(addr))
    }
}

/// Ordered handler list. Registration order is priority: the first
/// registration that matches an access owns it and no other is consulted.
/// Overlapping ranges are accepted as they are, the later one is simply
/// shadowed where they overlap.
#[derive(Default)]
pub struct HandlerRegistry {
    registrations: Vec<Registration>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        HandlerRegistry {
            registrations: Vec::with_capacity(16),
        }
    }

    pub fn register(&mut self, registration: Registration) {
        self.registrations.push(registration);
    }

    pub fn find(&self, access: &AccessDescriptor) -> Option<&Registration> {
        self.registrations.iter().find(|r| r.matches(access))
    }

    pub fn find_mut(&mut self, access: &AccessDescriptor) -> Option<&mut Registration> {
        self.registrations.iter_mut().find(|r| r.matches(access))
    }

    /// pairs of (earlier, later) indexes whose ranges overlap
    pub fn overlapping(&self) -> Vec<(usize, usize)> {
        let mut pairs = vec![];
        for (i, first) in self.registrations.iter().enumerate() {
            for (j, second) in self.registrations.iter().enumerate().skip(i + 1) {
                if first.overlaps(second) {
                    pairs.push((i, j));
                }
            }
        }
        pairs
    }

    pub fn iter(&self) -> impl Iterator<Item = &Registration> {
        self.registrations.iter()
    }

    pub fn len(&self) -> usize {
        self.registrations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registrations.is_empty()
    }
}
