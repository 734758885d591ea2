//! Block-accounting arena backing a single submission's scratch memory.
//!
//! The originating design hands out raw addresses from fixed-size blocks and
//! self-hosts the retire command's own record inside the arena it eventually
//! destroys, so that one allocator call provisions both the bookkeeping and
//! the data it tracks. Rust ownership already rules out the use-after-free
//! that trick exists to sidestep, so here the [`Arena`] only tracks the
//! block budget charged against a shared [`BlockPool`]; the actual
//! submission data (cloned semaphore lists, command buffer arrays) lives as
//! ordinary owned `Vec`/`Box` values on the retire task, dropped when the
//! arena is.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::error::{Error, Result};

/// Default block size, matching the granularity the originating arena
/// allocator favors for per-submission scratch memory.
pub const DEFAULT_BLOCK_SIZE: usize = 32 * 1024;

/// Shared source of fixed-size memory blocks for [`Arena`]s.
///
/// Acquisition and release are thread-safe; an individual [`Arena`] is not
/// shared across threads.
#[derive(Debug)]
pub struct BlockPool {
    block_size: usize,
    max_blocks: Option<usize>,
    blocks_in_use: AtomicUsize,
}

impl BlockPool {
    /// Create a pool handing out blocks of `block_size` bytes. `max_blocks`
    /// bounds the pool's total capacity; `None` means unbounded.
    pub fn new(block_size: usize, max_blocks: Option<usize>) -> Arc<BlockPool> {
        Arc::new(BlockPool {
            block_size: block_size.max(1),
            max_blocks,
            blocks_in_use: AtomicUsize::new(0),
        })
    }

    /// A pool with [`DEFAULT_BLOCK_SIZE`] blocks and no capacity bound.
    pub fn new_default() -> Arc<BlockPool> {
        Self::new(DEFAULT_BLOCK_SIZE, None)
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn blocks_in_use(&self) -> usize {
        self.blocks_in_use.load(Ordering::Acquire)
    }

    fn acquire(&self) -> Result<()> {
        loop {
            let current = self.blocks_in_use.load(Ordering::Acquire);
            if let Some(max) = self.max_blocks {
                if current >= max {
                    return Err(Error::ResourceExhausted(format!(
                        "block pool exhausted ({current}/{max} blocks in use)"
                    )));
                }
            }
            if self
                .blocks_in_use
                .compare_exchange(current, current + 1, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return Ok(());
            }
        }
    }

    fn release(&self) {
        self.blocks_in_use.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Bump-allocator accounting scoped to one submission batch.
///
/// Every logical allocation a submission makes (the retire record itself,
/// cloned semaphore lists, the command buffer array) is charged against the
/// arena via [`Arena::charge`], which pulls additional blocks from the pool
/// as needed. All charged blocks are released back to the pool together
/// when the arena is dropped - normally from inside the retire task's
/// cleanup, once the submission has fully completed.
pub struct Arena {
    pool: Arc<BlockPool>,
    blocks: usize,
    bytes_used: usize,
}

impl Arena {
    pub fn new(pool: Arc<BlockPool>) -> Arena {
        Arena {
            pool,
            blocks: 0,
            bytes_used: 0,
        }
    }

    /// Charge `size` bytes against this arena's budget, growing into
    /// additional pool blocks as needed. On failure the arena is left in
    /// its previous (valid) state and the caller should abandon the
    /// submission; dropping the arena releases whatever was charged so far.
    pub fn charge(&mut self, size: usize) -> Result<()> {
        let block_size = self.pool.block_size();
        while self.bytes_used + size > self.blocks * block_size {
            self.pool.acquire()?;
            self.blocks += 1;
        }
        self.bytes_used += size;
        Ok(())
    }

    pub fn bytes_used(&self) -> usize {
        self.bytes_used
    }

    pub fn blocks_charged(&self) -> usize {
        self.blocks
    }
}

impl Drop for Arena {
    fn drop(&mut self) {
        for _ in 0..self.blocks {
            self.pool.release();
        }
    }
}

/// Approximate charge for cloning a `(semaphore, value)` list into an arena.
pub(crate) fn semaphore_list_charge(count: usize) -> usize {
    count * (std::mem::size_of::<u64>() * 2)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn charges_and_releases_blocks() {
        let pool = BlockPool::new(16, Some(2));
        {
            let mut arena = Arena::new(pool.clone());
            arena.charge(10).unwrap();
            assert_eq!(pool.blocks_in_use(), 1);
            arena.charge(10).unwrap();
            assert_eq!(pool.blocks_in_use(), 2);
            assert!(arena.charge(10).is_err());
        }
        assert_eq!(pool.blocks_in_use(), 0);
    }

    #[test]
    fn exhaustion_is_reversible_once_arena_drops() {
        let pool = BlockPool::new(8, Some(1));
        let mut arena = Arena::new(pool.clone());
        arena.charge(8).unwrap();
        assert!(arena.charge(1).is_err());
        drop(arena);
        assert_eq!(pool.blocks_in_use(), 0);

        let mut arena2 = Arena::new(pool.clone());
        assert!(arena2.charge(8).is_ok());
    }

    #[test]
    fn growth_charges_multiple_blocks_at_once() {
        let pool = BlockPool::new(4, None);
        let mut arena = Arena::new(pool.clone());
        arena.charge(10).unwrap();
        assert_eq!(pool.blocks_in_use(), 3);
        assert_eq!(arena.bytes_used(), 10);
    }
}
