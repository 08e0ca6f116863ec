use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

/// Maps keys onto a fixed number of partitions.
///
/// Tasks are placed by task id; lookups never need the owning query.
#[derive(Debug, Clone, Copy)]
pub struct Partitioner {
    pub num_partitions: u32,
}

impl Partitioner {
    pub fn new(num_partitions: u32) -> Self {
        Self {
            num_partitions: num_partitions.max(1),
        }
    }

    pub fn get_partition(&self, key: &str) -> u32 {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        let hash = hasher.finish() as u32;
        hash % self.num_partitions
    }
}

impl Default for Partitioner {
    fn default() -> Self {
        Self::new(256)
    }
}
