//! Shard planning.
//!
//! Partitions the canonical test list across the device pool with a strided
//! round-robin assignment: with `D` devices, pool index `i` receives tests
//! `i, i+D, i+2D, …`. The assignment is deterministic for a fixed list and
//! pool, so reruns land the same tests on the same pool slots.

use tracing::warn;

use crate::device::DeviceHandle;

/// One device's slice of a suite run.
#[derive(Debug, Clone)]
pub struct Shard {
    /// Pool index of the device, used for deterministic result ordering.
    pub index: usize,

    /// The device this shard is assigned to.
    pub device: DeviceHandle,

    /// Tests assigned to this shard, in canonical-list order.
    pub tests: Vec<String>,

    /// gtest filter expression selecting exactly this shard's tests.
    pub filter: String,
}

impl Shard {
    /// Whether the shard has nothing to run.
    pub fn is_empty(&self) -> bool {
        self.tests.is_empty() && self.filter.is_empty()
    }
}

/// The full assignment for one suite run.
#[derive(Debug, Clone)]
pub struct ShardPlan {
    pub shards: Vec<Shard>,
}

impl ShardPlan {
    /// Number of shards (equals the pool size unless a filter collapsed it).
    pub fn len(&self) -> usize {
        self.shards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shards.is_empty()
    }
}

/// Plans the shards for a run.
///
/// An explicit `filter_override` disables sharding entirely: the caller
/// already knows exactly which subset to run, so everything goes to the
/// first device in one shard. Otherwise tests are strided across the pool
/// and each shard's filter is its colon-joined identifier list.
pub fn plan(tests: &[String], devices: &[DeviceHandle], filter_override: &str) -> ShardPlan {
    if devices.is_empty() {
        return ShardPlan { shards: Vec::new() };
    }

    if !filter_override.is_empty() {
        warn!("Explicit test filter supplied; sharding is disabled for this run.");
        return ShardPlan {
            shards: vec![Shard {
                index: 0,
                device: devices[0].clone(),
                tests: tests.to_vec(),
                filter: filter_override.to_string(),
            }],
        };
    }

    let stride = devices.len();
    let shards = devices
        .iter()
        .enumerate()
        .map(|(index, device)| {
            let assigned: Vec<String> =
                tests.iter().skip(index).step_by(stride).cloned().collect();
            let filter = assigned.join(":");
            Shard {
                index,
                device: device.clone(),
                tests: assigned,
                filter,
            }
        })
        .collect();

    ShardPlan { shards }
}
