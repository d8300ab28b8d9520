//! Applier configuration.

/// Tunables for the plan applier and its evaluate pool.
#[derive(Debug, Clone)]
pub struct ApplierConfig {
    /// Worker tasks in the evaluate pool.
    pub worker_pool_size: usize,
    /// Capacity of the pool's inbound work channel.
    pub worker_pool_buffer: usize,
    /// Ceiling on one encoded log entry; larger results split by node.
    pub max_batch_bytes: usize,
    /// Capacity of the plan admission queue.
    pub plan_queue_depth: usize,
}

impl Default for ApplierConfig {
    fn default() -> Self {
        let worker_pool_size = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
            .min(16);
        Self {
            worker_pool_size,
            worker_pool_buffer: 64,
            max_batch_bytes: 512 * 1024,
            plan_queue_depth: 64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = ApplierConfig::default();
        assert!(config.worker_pool_size >= 1);
        assert!(config.worker_pool_size <= 16);
        assert_eq!(config.worker_pool_buffer, 64);
        assert_eq!(config.max_batch_bytes, 524_288);
        assert_eq!(config.plan_queue_depth, 64);
    }
}
