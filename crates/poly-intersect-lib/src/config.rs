//! Engine configuration

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration shared by the executor, the remote adapters and the canned analyses
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Config {
    /// Evaluate independent graph nodes concurrently on the rayon pool.
    /// Results are identical either way; this only trades threads for latency.
    pub parallel: bool,
    /// Upper bound for a single remote fetch (connect + transfer).
    pub fetch_timeout: Duration,
    /// Number of distinct requests each remote adapter keeps cached.
    /// Default: 5
    pub fetch_cache_capacity: usize,
    /// Buffer distances (km) used by [`crate::analysis::overlap_report`].
    pub buffer_distances_km: Vec<f64>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            parallel: true,
            fetch_timeout: Duration::from_secs(30),
            fetch_cache_capacity: 5,
            buffer_distances_km: vec![10.0, 50.0],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert!(config.parallel);
        assert_eq!(config.fetch_cache_capacity, 5);
        assert_eq!(config.buffer_distances_km, vec![10.0, 50.0]);
        assert_eq!(config.fetch_timeout, Duration::from_secs(30));
    }
}
