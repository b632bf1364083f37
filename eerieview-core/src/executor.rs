//! Chunked two-phase execution.
//!
//! Large gridded computations are described first as a pure plan over
//! spatial chunks, then realized in parallel. Keeping the plan separate from
//! execution bounds peak memory to a few chunks regardless of domain size.

use log::debug;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::errors::{EerieError, EerieResult};

/// A contiguous range of flattened spatial cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkSpec {
    pub start: usize,
    pub len: usize,
}

impl ChunkSpec {
    pub fn end(&self) -> usize {
        self.start + self.len
    }
}

/// A partition of `n_cells` cells into chunks of at most `chunk_len`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkPlan {
    pub n_cells: usize,
    pub chunks: Vec<ChunkSpec>,
}

impl ChunkPlan {
    pub fn partition(n_cells: usize, chunk_len: usize) -> EerieResult<ChunkPlan> {
        if chunk_len == 0 {
            return Err(EerieError::Config("chunk length must be positive".to_string()));
        }
        let mut chunks = Vec::new();
        let mut start = 0;
        while start < n_cells {
            let len = chunk_len.min(n_cells - start);
            chunks.push(ChunkSpec { start, len });
            start += len;
        }
        debug!("planned {} chunks over {} cells", chunks.len(), n_cells);
        Ok(ChunkPlan { n_cells, chunks })
    }

    /// Execute `work` for every chunk in parallel, returning results in plan
    /// order.
    pub fn realize<T, F>(&self, work: F) -> EerieResult<Vec<T>>
    where
        T: Send,
        F: Fn(ChunkSpec) -> EerieResult<T> + Sync,
    {
        self.chunks.par_iter().map(|&chunk| work(chunk)).collect()
    }
}

/// What the executor should do at a given memory usage level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryAction {
    Proceed,
    Spill,
    Pause,
}

/// Worker memory thresholds as fractions of the memory budget.
///
/// Below `target` new chunk work is admitted freely; above `spill`
/// intermediate results should go to disk; above `pause` no new work starts
/// until usage drops.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MemoryPolicy {
    pub target: f64,
    pub spill: f64,
    pub pause: f64,
}

impl MemoryPolicy {
    pub fn new(target: f64, spill: f64, pause: f64) -> EerieResult<MemoryPolicy> {
        if !(0.0 < target && target < spill && spill < pause && pause <= 1.0) {
            return Err(EerieError::Config(format!(
                "memory thresholds must satisfy 0 < target < spill < pause <= 1, \
                 got {target}/{spill}/{pause}"
            )));
        }
        Ok(MemoryPolicy { target, spill, pause })
    }

    pub fn action(&self, usage: f64) -> MemoryAction {
        if usage >= self.pause {
            MemoryAction::Pause
        } else if usage >= self.spill {
            MemoryAction::Spill
        } else {
            MemoryAction::Proceed
        }
    }
}

impl Default for MemoryPolicy {
    fn default() -> Self {
        MemoryPolicy {
            target: 0.70,
            spill: 0.80,
            pause: 0.95,
        }
    }
}
