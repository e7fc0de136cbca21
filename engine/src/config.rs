//! Engine tunables.
//!
//! Every field has a default, so a partial document (or none at all) is a
//! valid configuration. Durations are written as seconds.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::checksums::ChecksumAlgorithm;
use crate::error::EngineError;
use crate::model::CollisionPolicy;

pub const DEFAULT_CHUNK_SIZE: usize = 1024 * 1024;
pub const DEFAULT_CONCURRENCY_PER_VOLUME: usize = 2;
pub const DEFAULT_STALL_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_HISTORY_LIMIT: usize = 256;
pub const DEFAULT_BUS_CAPACITY: usize = 1024;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Bytes per read/write; also the cancellation granularity
    pub chunk_size: usize,
    /// Jobs allowed to do I/O at once against one destination volume
    pub max_concurrent_per_volume: usize,
    /// A single chunk operation taking longer than this fails the job as stalled
    #[serde(with = "seconds")]
    pub stall_timeout: Duration,
    /// Finished jobs kept for display before the oldest are forgotten
    pub history_limit: usize,
    /// Per-subscriber event buffer
    pub bus_capacity: usize,
    pub checksum: ChecksumAlgorithm,
    pub collision_policy: CollisionPolicy,
    pub preserve_mtime: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_concurrent_per_volume: DEFAULT_CONCURRENCY_PER_VOLUME,
            stall_timeout: DEFAULT_STALL_TIMEOUT,
            history_limit: DEFAULT_HISTORY_LIMIT,
            bus_capacity: DEFAULT_BUS_CAPACITY,
            checksum: ChecksumAlgorithm::default(),
            collision_policy: CollisionPolicy::default(),
            preserve_mtime: true,
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.chunk_size == 0 {
            return Err(EngineError::InvalidConfig("chunk_size must be positive".into()));
        }
        if self.max_concurrent_per_volume == 0 {
            return Err(EngineError::InvalidConfig(
                "max_concurrent_per_volume must be positive".into(),
            ));
        }
        if self.stall_timeout.is_zero() {
            return Err(EngineError::InvalidConfig("stall_timeout must be positive".into()));
        }
        if self.bus_capacity == 0 {
            return Err(EngineError::InvalidConfig("bus_capacity must be positive".into()));
        }
        Ok(())
    }
}

mod seconds {
    use serde::{de::Error, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(D::Error::custom)
    }
}
