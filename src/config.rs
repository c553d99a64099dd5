//! Generator-level configuration.

use serde::{Deserialize, Serialize};

fn default_worker_count() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

fn default_max_retries() -> usize {
    3
}

/// Settings consumed by the parallel orchestrator. These tune dispatch and
/// retry behavior only; the solving contract itself never reads them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratorConfig {
    pub width: usize,
    pub height: usize,
    pub depth: usize,
    /// Number of worker threads, and the approximate region count.
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,
    /// Attempts per region before a failure surfaces to the caller.
    #[serde(default = "default_max_retries")]
    pub max_retries: usize,
    /// Whether consumers may grow the grid on demand (expand jobs). Read by
    /// embedding callers, not by the orchestrator itself.
    #[serde(default)]
    pub auto_expand: bool,
    /// Deterministic base seed; `None` draws per-region seeds from entropy.
    #[serde(default)]
    pub seed: Option<u64>,
}

impl GeneratorConfig {
    pub fn new(width: usize, height: usize, depth: usize) -> GeneratorConfig {
        GeneratorConfig {
            width,
            height,
            depth,
            worker_count: default_worker_count(),
            max_retries: default_max_retries(),
            auto_expand: false,
            seed: None,
        }
    }

    pub fn with_seed(mut self, seed: u64) -> GeneratorConfig {
        self.seed = Some(seed);
        self
    }

    pub fn with_workers(mut self, worker_count: usize) -> GeneratorConfig {
        self.worker_count = worker_count.max(1);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_chain() {
        let config = GeneratorConfig::new(8, 8, 2).with_seed(7).with_workers(0);
        assert_eq!(config.seed, Some(7));
        assert_eq!(config.worker_count, 1);
        assert_eq!(config.max_retries, 3);
    }

    #[test]
    fn test_defaults_from_json() {
        let config: GeneratorConfig =
            serde_json::from_str(r#"{"width":4,"height":4,"depth":1}"#).unwrap();
        assert!(config.worker_count >= 1);
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.seed, None);
        assert!(!config.auto_expand);
    }
}
