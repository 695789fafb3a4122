//! Sort engine: presort, polyphase merge and the per-operation façade.

pub mod merge;
pub mod presort;
pub mod sorter;

#[cfg(test)]
mod tests;

pub use merge::{MergeEngine, MergeStep};
pub use presort::Presorter;
pub use sorter::{Sorter, SorterState};

use crate::config::SortConfig;
use crate::error::{SortError, SortResult};
use crate::mem::MemoryPool;
use crate::temp::{TempDirectory, TempFileManager};
use crate::tuple::{OrderSpec, TupleType};

/// Instance-wide sort service: owns the block pool and the temp-file manager
/// and hands out [`Sorter`] instances that draw on them. Cloning shares the
/// same pool and manager.
#[derive(Debug, Clone)]
pub struct SortManager {
    config: SortConfig,
    pool: MemoryPool,
    temp: TempFileManager,
}

impl SortManager {
    /// Builds the service with a private pool of `pool_blocks` blocks. Hosts
    /// embedding a shared buffer pool size the count via
    /// [`SortConfig::pool_budget_blocks`].
    pub fn new(config: SortConfig, pool_blocks: usize) -> SortResult<Self> {
        config
            .validate()
            .map_err(|e| SortError::Config(e.to_string()))?;
        let block_size = config.block_size_bytes();
        let pool = MemoryPool::new(block_size, pool_blocks);
        let dirs: Vec<TempDirectory> = config
            .temp_directories
            .iter()
            .map(|d| TempDirectory::new(d.path.clone(), d.quota_blocks))
            .collect();
        let temp = TempFileManager::new(dirs, block_size, config.max_files_total, config.instance_id)?;
        log::info!(
            "sort manager ready: {} blocks of {} bytes, {} file slots, {} spill dir(s)",
            pool_blocks,
            block_size,
            config.max_files_total,
            config.temp_directories.len()
        );
        Ok(Self { config, pool, temp })
    }

    pub fn config(&self) -> &SortConfig {
        &self.config
    }

    pub fn pool(&self) -> &MemoryPool {
        &self.pool
    }

    pub fn temp(&self) -> &TempFileManager {
        &self.temp
    }

    /// Starts one sort operation over rows of `schema`, ordered by `order`.
    /// An empty order list yields a passthrough sorter that returns rows in
    /// insertion order.
    pub fn create_sort(&self, schema: TupleType, order: Vec<OrderSpec>) -> SortResult<Sorter> {
        Sorter::new(
            schema,
            order,
            &self.config,
            self.pool.clone(),
            self.temp.clone(),
        )
    }
}
