use std::path::PathBuf;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::constants::*;

/// One configured spill directory with its block quota.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TempDirSpec {
    pub path: PathBuf,
    pub quota_blocks: usize,
}

/// Host-supplied sort-engine parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SortConfig {
    /// External sorter on/off. When off, sorts run fully in heap memory.
    pub enabled: bool,
    /// Percentage of the shared buffer pool usable for sorting, clamped to
    /// `MIN_POOL_PERCENT..=MAX_POOL_PERCENT`.
    pub pool_percent: usize,
    /// Memory budget per sort, in kilobytes.
    pub sort_memory_kb: usize,
    /// Distribution file count per sort (polyphase order).
    pub max_files_per_sort: usize,
    /// Total temp-file slots across all concurrent sorts.
    pub max_files_total: usize,
    /// Block size override; 0 means `DEFAULT_BLOCK_SIZE`.
    pub block_size: usize,
    /// Spill directories; "." is a valid path.
    pub temp_directories: Vec<TempDirSpec>,
    /// Per-`step()` merge work budget in bytes.
    pub merge_step_bytes: usize,
    /// Per-`step()` merge work budget in rows.
    pub merge_step_rows: usize,
    /// Database instance id, used in deterministic temp-file names.
    pub instance_id: u32,
}

impl Default for SortConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            pool_percent: DEFAULT_POOL_PERCENT,
            sort_memory_kb: DEFAULT_SORT_MEMORY_KB,
            max_files_per_sort: DEFAULT_MAX_FILES_PER_SORT,
            max_files_total: DEFAULT_MAX_FILES_TOTAL,
            block_size: 0,
            temp_directories: vec![TempDirSpec {
                path: PathBuf::from("."),
                quota_blocks: DEFAULT_TEMP_DIR_QUOTA_BLOCKS,
            }],
            merge_step_bytes: DEFAULT_MERGE_STEP_BYTES,
            merge_step_rows: DEFAULT_MERGE_STEP_ROWS,
            instance_id: 0,
        }
    }
}

impl SortConfig {
    pub fn from_file(path: &std::path::Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_file(&self, path: &std::path::Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.pool_percent < MIN_POOL_PERCENT || self.pool_percent > MAX_POOL_PERCENT {
            return Err(anyhow::anyhow!(
                "pool percent must be between {} and {}",
                MIN_POOL_PERCENT,
                MAX_POOL_PERCENT
            ));
        }

        let bs = self.block_size_bytes();
        if !(MIN_BLOCK_SIZE..=MAX_BLOCK_SIZE).contains(&bs) {
            return Err(anyhow::anyhow!(
                "block size must be between {} and {} bytes",
                MIN_BLOCK_SIZE,
                MAX_BLOCK_SIZE
            ));
        }

        if self.max_files_per_sort < MIN_FILES_PER_SORT
            || self.max_files_per_sort > MAX_FILES_PER_SORT_LIMIT
        {
            return Err(anyhow::anyhow!(
                "max files per sort must be between {} and {}",
                MIN_FILES_PER_SORT,
                MAX_FILES_PER_SORT_LIMIT
            ));
        }

        if self.max_files_total < self.max_files_per_sort + 1 {
            return Err(anyhow::anyhow!(
                "max files total must cover at least one sort ({} files)",
                self.max_files_per_sort + 1
            ));
        }

        if self.temp_directories.is_empty() {
            return Err(anyhow::anyhow!("at least one temp directory is required"));
        }

        // A sort needs presort buffers plus one page buffer per open file.
        let needed = self.max_files_per_sort + 2;
        if self.sort_blocks() < needed {
            return Err(anyhow::anyhow!(
                "sort memory {} KB holds fewer than {} blocks of {} bytes",
                self.sort_memory_kb,
                needed,
                bs
            ));
        }

        if self.merge_step_bytes == 0 || self.merge_step_rows == 0 {
            return Err(anyhow::anyhow!("merge step budgets must be non-zero"));
        }

        Ok(())
    }

    pub fn block_size_bytes(&self) -> usize {
        if self.block_size == 0 {
            DEFAULT_BLOCK_SIZE
        } else {
            self.block_size
        }
    }

    /// Per-sort memory budget in blocks.
    pub fn sort_blocks(&self) -> usize {
        (self.sort_memory_kb * BYTES_PER_KB) / self.block_size_bytes()
    }

    /// Block budget the engine may draw from a shared buffer pool of
    /// `shared_pool_bytes`, after applying the clamped percentage.
    pub fn pool_budget_blocks(&self, shared_pool_bytes: usize) -> usize {
        let pct = self
            .pool_percent
            .clamp(MIN_POOL_PERCENT, MAX_POOL_PERCENT);
        (shared_pool_bytes * pct / 100) / self.block_size_bytes()
    }
}
