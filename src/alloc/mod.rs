//! The bump/fit hybrid allocator over arenas, plus the huge-block path.

use core::ptr::{self, NonNull};
use std::alloc::LayoutError;

use crate::config::{ARENA_SIZE_EXP, CELL_SIZE, CELL_SIZE_EXP, SMALL_FREE_LIST_COUNT};
use crate::object::{ObjectHeader, ObjectPtr};

pub(crate) mod arena;
pub(crate) mod huge;

#[cfg(test)]
mod tests;

pub(crate) use arena::{Arena, BlockType, FIRST_CELL, USABLE_CELLS};
pub(crate) use huge::HugeBlockTable;

/// Allocation failure.
#[derive(Debug, Clone)]
pub enum AllocError {
    OutOfMemory,
    Layout(LayoutError),
}

impl From<LayoutError> for AllocError {
    fn from(value: LayoutError) -> Self {
        Self::Layout(value)
    }
}

/// Free-space snapshot produced by a sweep.
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct SweepStats {
    pub(crate) free_cells: usize,
    pub(crate) largest_free_block: usize,
}

#[derive(Debug, Clone, Copy)]
struct FreeBlock {
    addr: usize,
    cells: usize,
}

const LARGE_BUCKET_COUNT: usize = ARENA_SIZE_EXP - CELL_SIZE_EXP + 1;

#[inline]
fn bucket_of(cells: usize) -> usize {
    (usize::BITS - 1 - cells.leading_zeros()) as usize
}

/// Segregated free lists for the fit allocator: exact-size lists for small
/// blocks, power-of-two buckets above. Emptied at every sweep and rebuilt
/// from the per-arena free runs.
pub(crate) struct FreeLists {
    exact: [Vec<FreeBlock>; SMALL_FREE_LIST_COUNT],
    large: [Vec<FreeBlock>; LARGE_BUCKET_COUNT],
}

impl FreeLists {
    fn new() -> Self {
        Self {
            exact: [const { Vec::new() }; SMALL_FREE_LIST_COUNT],
            large: [const { Vec::new() }; LARGE_BUCKET_COUNT],
        }
    }

    pub(crate) fn insert(&mut self, addr: usize, cells: usize) {
        debug_assert!(cells >= 1);
        let block = FreeBlock { addr, cells };
        if cells <= SMALL_FREE_LIST_COUNT {
            self.exact[cells - 1].push(block);
        } else {
            self.large[bucket_of(cells)].push(block);
        }
    }

    /// Remove and return any block of at least `cells` cells.
    fn take(&mut self, cells: usize) -> Option<FreeBlock> {
        if cells <= SMALL_FREE_LIST_COUNT {
            for size in cells..=SMALL_FREE_LIST_COUNT {
                if let Some(block) = self.exact[size - 1].pop() {
                    return Some(block);
                }
            }
        }
        // Buckets hold sizes in [2^b, 2^(b+1)), so only the starting bucket
        // can contain blocks that are too small.
        for bucket in &mut self.large {
            if let Some(at) = bucket.iter().position(|block| block.cells >= cells) {
                return Some(bucket.swap_remove(at));
            }
        }
        None
    }

    pub(crate) fn clear(&mut self) {
        for list in &mut self.exact {
            list.clear();
        }
        for list in &mut self.large {
            list.clear();
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct BumpState {
    cursor: usize,
    remaining: usize,
}

/// Arena pools, fit lists and the bump cursor.
pub(crate) struct Allocator {
    arenas: Vec<Arena>,
    free_arenas: Vec<Arena>,
    fit: FreeLists,
    bump: Option<BumpState>,
    /// Strategy recorded by the last sweep: bump-first while fragmentation is
    /// low, fit-first once the free space is shredded.
    pub(crate) use_bump: bool,
}

impl Allocator {
    pub(crate) fn new() -> Self {
        Self {
            arenas: Vec::new(),
            free_arenas: Vec::new(),
            fit: FreeLists::new(),
            bump: None,
            use_bump: true,
        }
    }

    pub(crate) fn arenas_len(&self) -> usize {
        self.arenas.len()
    }

    #[cfg(test)]
    pub(crate) fn free_arenas_len(&self) -> usize {
        self.free_arenas.len()
    }

    pub(crate) fn arena_gray_len(&self, index: usize) -> usize {
        self.arenas[index].gray_len()
    }

    pub(crate) fn arena_gray_pop(&mut self, index: usize) -> Option<ObjectPtr> {
        self.arenas[index].gray_pop()
    }

    /// Serve one small allocation of `cells` cells, dispatching on the
    /// strategy flag with the other allocator as fallback.
    pub(crate) fn allocate_small(&mut self, cells: usize) -> Result<ObjectPtr, AllocError> {
        debug_assert!(cells >= 1 && cells <= USABLE_CELLS);
        if self.use_bump {
            match self.bump_allocate(cells) {
                Ok(object) => Ok(object),
                Err(err) => self.fit_allocate(cells).ok_or(err),
            }
        } else {
            match self.fit_allocate(cells) {
                Some(object) => Ok(object),
                None => self.bump_allocate(cells),
            }
        }
    }

    fn fit_allocate(&mut self, cells: usize) -> Option<ObjectPtr> {
        let block = self.fit.take(cells)?;
        // SAFETY: free-list entries point at FREE blocks inside live arenas.
        debug_assert_eq!(unsafe { arena::blocktype(block.addr) }, BlockType::Free);

        if block.cells > cells {
            let tail = block.addr + cells * CELL_SIZE;
            // SAFETY: the tail is inside the same block.
            unsafe { arena::set_blocktype(tail, BlockType::Free) };
            self.fit.insert(tail, block.cells - cells);
        }
        // SAFETY: the block is inside a live arena and now owned by the
        // caller.
        Some(unsafe { finish_block(block.addr, cells) })
    }

    fn bump_allocate(&mut self, cells: usize) -> Result<ObjectPtr, AllocError> {
        if self.bump.is_none_or(|bump| bump.remaining < cells) {
            self.refill_bump()?;
        }
        let bump = self.bump.as_mut().ok_or(AllocError::OutOfMemory)?;
        let addr = bump.cursor;
        bump.cursor += cells * CELL_SIZE;
        bump.remaining -= cells;
        // SAFETY: the bump region is inside a live arena.
        Ok(unsafe { finish_block(addr, cells) })
    }

    /// Point the bump cursor at a fresh arena. Whatever was left of the old
    /// bump region becomes one FREE block on the fit lists.
    fn refill_bump(&mut self) -> Result<(), AllocError> {
        if let Some(old) = self.bump.take() {
            if old.remaining > 0 {
                // SAFETY: the abandoned region is inside a live arena and
                // consists of never-allocated EXTENT cells.
                unsafe { arena::set_blocktype(old.cursor, BlockType::Free) };
                self.fit.insert(old.cursor, old.remaining);
            }
        }
        let arena = match self.free_arenas.pop() {
            Some(arena) => arena,
            None => Arena::new()?,
        };
        let cursor = arena.cell_addr(FIRST_CELL);
        self.arenas.push(arena);
        self.bump = Some(BumpState {
            cursor,
            remaining: USABLE_CELLS,
        });
        Ok(())
    }

    /// Sweep every arena. The fit lists are rebuilt from scratch; arenas that
    /// come up entirely free move to the free pool.
    pub(crate) fn sweep(&mut self) -> SweepStats {
        self.fit.clear();
        let mut stats = SweepStats::default();
        let bump_cursor = self.bump.map(|bump| bump.cursor);

        let mut index = 0;
        while index < self.arenas.len() {
            if self.arenas[index].sweep(bump_cursor, &mut self.fit, &mut stats) {
                let arena = self.arenas.swap_remove(index);
                self.free_arenas.push(arena);
            } else {
                index += 1;
            }
        }
        stats
    }
}

/// Stamp the bitmap for a new block, zero its memory and write the header.
///
/// # Safety
///
/// The block must lie inside a live arena and be owned by the caller.
unsafe fn finish_block(addr: usize, cells: usize) -> ObjectPtr {
    // SAFETY: caller contract.
    unsafe {
        arena::mark_block_allocated(addr, cells);
        ptr::write_bytes(addr as *mut u8, 0, cells * CELL_SIZE);
        let header = addr as *mut ObjectHeader;
        header.write(ObjectHeader::new());
        ObjectPtr::new(NonNull::new_unchecked(header))
    }
}
