//! Memory pool statistics.

use std::fmt;

use crate::util::size::format_bytes;

/// Snapshot of a segregated-list pool. Telemetry only.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PoolStats {
    /// `1 - largest free run / free bytes`, summed over size classes.
    /// Zero when nothing is free.
    pub fragmentation: f64,

    /// Sum of requested (not rounded) sizes of live allocations.
    pub used_bytes: u64,

    /// Sum of the sizes of all chunks currently held from the backend.
    pub total_bytes: u64,

    /// Live allocations.
    pub allocation_count: u64,

    /// Chunks currently held from the backend.
    pub chunk_count: u64,
}

impl PoolStats {
    /// Used bytes as a fraction of held bytes.
    pub fn utilization(&self) -> f64 {
        if self.total_bytes == 0 {
            return 0.0;
        }
        self.used_bytes as f64 / self.total_bytes as f64
    }

    /// Fold another pool's numbers into this one.
    ///
    /// Fragmentation is weighted by held bytes.
    pub fn merge(&mut self, other: &PoolStats) {
        let total = self.total_bytes + other.total_bytes;
        if total > 0 {
            self.fragmentation = (self.fragmentation * self.total_bytes as f64
                + other.fragmentation * other.total_bytes as f64)
                / total as f64;
        }
        self.used_bytes += other.used_bytes;
        self.total_bytes = total;
        self.allocation_count += other.allocation_count;
        self.chunk_count += other.chunk_count;
    }
}

impl fmt::Display for PoolStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "  Used:          {}", format_bytes(self.used_bytes))?;
        writeln!(f, "  Held:          {}", format_bytes(self.total_bytes))?;
        writeln!(f, "  Allocations:   {}", self.allocation_count)?;
        writeln!(f, "  Chunks:        {}", self.chunk_count)?;
        writeln!(f, "  Fragmentation: {:.1}%", self.fragmentation * 100.0)?;
        Ok(())
    }
}

/// Snapshot of a stack or transient pool.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StackStats {
    /// Bytes handed out since the last reset, including alignment padding.
    pub used_bytes: u64,
    /// Sum of chunk sizes.
    pub total_bytes: u64,
    pub chunk_count: u64,
    /// Highest `used_bytes` seen at a reset.
    pub peak_bytes: u64,
}

impl StackStats {
    pub fn merge(&mut self, other: &StackStats) {
        self.used_bytes += other.used_bytes;
        self.total_bytes += other.total_bytes;
        self.chunk_count += other.chunk_count;
        self.peak_bytes += other.peak_bytes;
    }
}

/// Everything a [`GpuMemoryManager`](super::GpuMemoryManager) holds.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MemoryStats {
    /// One entry per general-purpose pool, keyed by pool name.
    pub pools: Vec<(String, PoolStats)>,
    pub transient: StackStats,
}

impl MemoryStats {
    /// All general-purpose pools combined.
    pub fn combined(&self) -> PoolStats {
        let mut combined = PoolStats::default();
        for (_, stats) in &self.pools {
            combined.merge(stats);
        }
        combined
    }

    /// Bytes held from the backend across every pool.
    pub fn total_bytes(&self) -> u64 {
        self.combined().total_bytes + self.transient.total_bytes
    }
}

impl fmt::Display for MemoryStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "GPU Memory Statistics:")?;
        for (name, stats) in &self.pools {
            writeln!(f, "Pool '{}':", name)?;
            write!(f, "{}", stats)?;
        }
        writeln!(f, "Transient:")?;
        writeln!(f, "  Used:          {}", format_bytes(self.transient.used_bytes))?;
        writeln!(f, "  Held:          {}", format_bytes(self.transient.total_bytes))?;
        writeln!(f, "  Peak:          {}", format_bytes(self.transient.peak_bytes))?;
        Ok(())
    }
}
