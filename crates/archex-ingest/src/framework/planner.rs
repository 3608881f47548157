//! Partition planning
//!
//! Splits the enumerated task units into disjoint, ordered partitions before
//! any work starts. Planning is a pure transformation: it never fails, never
//! drops a unit and never assigns one twice.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use tracing::debug;

use super::types::{Partition, TaskUnit};
use crate::config::{PartitionCount, PartitionStrategy, PipelineConfig};

/// Static partition planner
#[derive(Debug, Clone)]
pub struct PartitionPlanner {
    requested: PartitionCount,
    upper_bound: usize,
    strategy: PartitionStrategy,
}

impl PartitionPlanner {
    pub fn new(requested: PartitionCount, upper_bound: usize, strategy: PartitionStrategy) -> Self {
        Self {
            requested,
            upper_bound: upper_bound.max(1),
            strategy,
        }
    }

    /// Planner honouring `parallel_enabled` (sequential mode plans one partition)
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(
            config.effective_partition_count(),
            config.auto_partition_upper_bound,
            config.partition_strategy,
        )
    }

    /// Number of partitions that will be produced for `unit_count` units
    pub fn partition_count(&self, unit_count: usize) -> usize {
        if unit_count == 0 {
            return 0;
        }
        match self.requested {
            PartitionCount::Auto => unit_count.min(self.upper_bound),
            PartitionCount::Fixed(n) => n.clamp(1, unit_count),
        }
    }

    /// Split `units` into partitions
    pub fn plan(&self, units: Vec<TaskUnit>) -> Vec<Partition> {
        let count = self.partition_count(units.len());
        if count == 0 {
            return Vec::new();
        }

        // Largest first; stable sort keeps enumeration order among equal sizes.
        let mut units = units;
        units.sort_by_key(|u| Reverse(u.size_bytes));

        let partitions = match self.strategy {
            PartitionStrategy::RoundRobin => round_robin(units, count),
            PartitionStrategy::SizeBalanced => size_balanced(units, count),
        };

        debug!(
            partitions = partitions.len(),
            strategy = ?self.strategy,
            sizes = ?partitions.iter().map(Partition::len).collect::<Vec<_>>(),
            "Partition plan computed"
        );

        partitions
    }
}

fn round_robin(units: Vec<TaskUnit>, count: usize) -> Vec<Partition> {
    let mut partitions: Vec<Partition> = (0..count).map(Partition::new).collect();
    for (i, unit) in units.into_iter().enumerate() {
        partitions[i % count].units.push(unit);
    }
    partitions
}

fn size_balanced(units: Vec<TaskUnit>, count: usize) -> Vec<Partition> {
    let mut partitions: Vec<Partition> = (0..count).map(Partition::new).collect();

    // Min-heap on (bytes, units, index): the unit count breaks ties between
    // partitions holding zero-byte files so none is left empty.
    let mut heap: BinaryHeap<Reverse<(u64, usize, usize)>> =
        (0..count).map(|i| Reverse((0, 0, i))).collect();

    for unit in units {
        let Some(Reverse((bytes, len, index))) = heap.pop() else {
            break;
        };
        let size = unit.size_bytes;
        partitions[index].units.push(unit);
        heap.push(Reverse((bytes.saturating_add(size), len + 1, index)));
    }

    partitions
}
