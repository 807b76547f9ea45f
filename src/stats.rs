//! Resource usage figures reported by `GET_STATS`.

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Usage {
    used: usize,
    total: usize,
}

impl Usage {
    /// `used` is clamped so it never exceeds `total`.
    pub fn new(used: usize, total: usize) -> Self {
        Self {
            used: used.min(total),
            total,
        }
    }

    pub fn used(&self) -> usize {
        self.used
    }

    pub fn total(&self) -> usize {
        self.total
    }
}

/// Working-memory source, the heap allocator on hardware.
pub trait MemoryStats {
    fn ram_usage(&self) -> Usage;
}
