use super::arena::{self, FIRST_CELL, USABLE_CELLS};
use super::*;
use crate::config::{ARENA_CELLS, CELL_SIZE, LARGE_ALLOC_THRESHOLD};

fn set_block(addr: usize, cells: usize, start: BlockType) {
    unsafe {
        arena::set_blocktype(addr, start);
        for cell in 1..cells {
            arena::set_blocktype(addr + cell * CELL_SIZE, BlockType::Extent);
        }
    }
}

#[test]
fn blocktype_roundtrip() {
    let arena = Arena::new().unwrap();
    let addr = arena.cell_addr(FIRST_CELL + 7);

    for blocktype in [
        BlockType::White,
        BlockType::Black,
        BlockType::Free,
        BlockType::Extent,
    ] {
        unsafe { arena::set_blocktype(addr, blocktype) };
        assert_eq!(unsafe { arena::blocktype(addr) }, blocktype);
    }

    // Neighbors share bitmap bytes but not bits.
    let next = arena.cell_addr(FIRST_CELL + 8);
    unsafe { arena::set_blocktype(next, BlockType::Black) };
    unsafe { arena::set_blocktype(addr, BlockType::Free) };
    assert_eq!(unsafe { arena::blocktype(next) }, BlockType::Black);
}

#[test]
fn fresh_arena_reserves_its_prefix() {
    let arena = Arena::new().unwrap();
    for cell in 0..FIRST_CELL {
        assert_eq!(
            unsafe { arena::blocktype(arena.cell_addr(cell)) },
            BlockType::Black
        );
    }
    assert_eq!(
        unsafe { arena::blocktype(arena.cell_addr(FIRST_CELL)) },
        BlockType::Extent
    );
}

#[test]
fn mark_block_allocated_stamps_start_and_interior() {
    let arena = Arena::new().unwrap();
    let addr = arena.cell_addr(FIRST_CELL);
    unsafe { arena::mark_block_allocated(addr, 4) };

    assert_eq!(unsafe { arena::blocktype(addr) }, BlockType::White);
    for cell in 1..4 {
        assert_eq!(
            unsafe { arena::blocktype(addr + cell * CELL_SIZE) },
            BlockType::Extent
        );
    }
}

#[test]
fn bump_allocations_advance_within_one_arena() {
    let mut allocator = Allocator::new();
    let first = allocator.allocate_small(3).unwrap();
    let second = allocator.allocate_small(3).unwrap();
    let third = allocator.allocate_small(5).unwrap();

    assert_eq!(allocator.arenas_len(), 1);
    assert_eq!(second.addr() - first.addr(), 3 * CELL_SIZE);
    assert_eq!(third.addr() - second.addr(), 3 * CELL_SIZE);
    assert_eq!(unsafe { arena::blocktype(first.addr()) }, BlockType::White);
}

#[test]
fn bump_overflow_opens_a_second_arena() {
    let mut allocator = Allocator::new();
    let per_alloc = LARGE_ALLOC_THRESHOLD / CELL_SIZE;
    let mut count = 0;
    while allocator.arenas_len() < 2 {
        allocator.allocate_small(per_alloc).unwrap();
        count += 1;
        assert!(count < 64, "bump never overflowed");
    }
    assert!(count * per_alloc > USABLE_CELLS);
}

#[test]
fn sweep_coalesces_dead_blocks_and_flips_live_ones() {
    let mut arena = Arena::new().unwrap();
    let base = arena.cell_addr(FIRST_CELL);

    // dead | live | free remainder
    set_block(base, 3, BlockType::White);
    set_block(base + 3 * CELL_SIZE, 2, BlockType::Black);
    set_block(base + 5 * CELL_SIZE, USABLE_CELLS - 5, BlockType::Free);

    let mut lists = FreeLists::new();
    let mut stats = SweepStats::default();
    let fully_free = arena.sweep(None, &mut lists, &mut stats);

    assert!(!fully_free);
    assert_eq!(stats.free_cells, USABLE_CELLS - 2);
    assert_eq!(stats.largest_free_block, USABLE_CELLS - 5);
    // The dead block became a free run, the live one went back to white.
    assert_eq!(unsafe { arena::blocktype(base) }, BlockType::Free);
    assert_eq!(
        unsafe { arena::blocktype(base + 3 * CELL_SIZE) },
        BlockType::White
    );

    assert!(lists.take(3).is_some());
    assert!(lists.take(USABLE_CELLS - 5).is_some());
    assert!(lists.take(1).is_none());
}

#[test]
fn sweep_reports_a_fully_free_arena_without_listing_it() {
    let mut arena = Arena::new().unwrap();
    let base = arena.cell_addr(FIRST_CELL);
    set_block(base, 3, BlockType::White);

    let mut lists = FreeLists::new();
    let mut stats = SweepStats::default();
    assert!(arena.sweep(None, &mut lists, &mut stats));

    // Pool-bound arenas stay off the fit lists and out of the snapshot.
    assert_eq!(stats.free_cells, 0);
    assert!(lists.take(1).is_none());
    assert_eq!(unsafe { arena::blocktype(base) }, BlockType::Free);
    assert_eq!(
        unsafe { arena::blocktype(base + CELL_SIZE) },
        BlockType::Extent
    );
}

#[test]
fn bump_arena_sweeps_only_behind_the_cursor() {
    let mut allocator = Allocator::new();
    let live = allocator.allocate_small(3).unwrap();
    let dead = allocator.allocate_small(3).unwrap();
    unsafe { arena::set_blocktype(live.addr(), BlockType::Black) };

    let stats = allocator.sweep();
    assert_eq!(allocator.arenas_len(), 1);
    // The live block went back to white, the dead one was reclaimed.
    assert_eq!(unsafe { arena::blocktype(live.addr()) }, BlockType::White);
    assert_eq!(unsafe { arena::blocktype(dead.addr()) }, BlockType::Free);
    assert_eq!(stats.free_cells, 3);
    // Virgin space past the cursor stays untouched.
    assert_eq!(
        unsafe { arena::blocktype(dead.addr() + 3 * CELL_SIZE) },
        BlockType::Extent
    );
}

#[test]
fn allocator_sweep_recycles_empty_arenas() {
    let mut allocator = Allocator::new();
    let per_alloc = LARGE_ALLOC_THRESHOLD / CELL_SIZE;
    while allocator.arenas_len() < 3 {
        allocator.allocate_small(per_alloc).unwrap();
    }

    // Nothing is black, so every arena except the bump arena comes up free.
    allocator.sweep();
    assert_eq!(allocator.arenas_len(), 1);
    assert_eq!(allocator.free_arenas_len(), 2);

    // Recycled arenas feed the bump path again.
    while allocator.arenas_len() < 2 {
        allocator.allocate_small(per_alloc).unwrap();
    }
    assert_eq!(allocator.free_arenas_len(), 1);
}

#[test]
fn fit_allocation_splits_and_returns_the_tail() {
    let mut allocator = Allocator::new();
    let arena = Arena::new().unwrap();
    let addr = arena.cell_addr(FIRST_CELL);
    set_block(addr, 10, BlockType::Free);
    allocator.fit.insert(addr, 10);
    allocator.arenas.push(arena);
    allocator.use_bump = false;

    let object = allocator.allocate_small(3).unwrap();
    assert_eq!(object.addr(), addr);
    assert_eq!(unsafe { arena::blocktype(addr) }, BlockType::White);

    let tail = addr + 3 * CELL_SIZE;
    assert_eq!(unsafe { arena::blocktype(tail) }, BlockType::Free);
    let rest = allocator.allocate_small(7).unwrap();
    assert_eq!(rest.addr(), tail);
}

#[test]
fn fit_falls_back_to_bump_when_lists_are_dry() {
    let mut allocator = Allocator::new();
    allocator.use_bump = false;
    let object = allocator.allocate_small(2).unwrap();
    assert_eq!(allocator.arenas_len(), 1);
    assert_eq!(unsafe { arena::blocktype(object.addr()) }, BlockType::White);
}

#[test]
fn free_lists_prefer_exact_sizes() {
    let mut lists = FreeLists::new();
    lists.insert(0x1000, 4);
    lists.insert(0x2000, 64);

    let block = lists.take(4).unwrap();
    assert_eq!(block.addr, 0x1000);
    let block = lists.take(4).unwrap();
    assert_eq!(block.addr, 0x2000);
    assert!(lists.take(4).is_none());
}

#[test]
fn free_lists_scan_buckets_for_a_fitting_block() {
    let mut lists = FreeLists::new();
    lists.insert(0x1000, 20);
    lists.insert(0x2000, 30);

    // Both live in the same power-of-two bucket; only one fits.
    let block = lists.take(25).unwrap();
    assert_eq!(block.addr, 0x2000);
    assert_eq!(block.cells, 30);
}

#[test]
fn huge_table_mark_and_sweep() {
    let mut table = HugeBlockTable::new();
    let block = table.allocate(LARGE_ALLOC_THRESHOLD + 1).unwrap();
    assert!(arena::is_arena_aligned(block.addr()));
    assert!(table.contains(block.addr()));

    assert!(table.mark(block.addr()));
    assert!(!table.mark(block.addr()));
    assert!(table.is_marked(block.addr()));

    // Marked blocks survive the sweep with their mark cleared.
    table.sweep();
    assert!(table.contains(block.addr()));
    assert!(!table.is_marked(block.addr()));

    // Unmarked blocks do not.
    table.sweep();
    assert!(!table.contains(block.addr()));
    assert_eq!(table.len(), 0);
}

#[test]
fn huge_table_ignores_unknown_addresses() {
    let mut table = HugeBlockTable::new();
    assert!(!table.mark(0x10000));
    assert!(!table.is_marked(0x10000));
}

#[test]
fn arena_cells_cover_the_large_threshold() {
    assert!(LARGE_ALLOC_THRESHOLD / CELL_SIZE <= USABLE_CELLS);
    assert!(FIRST_CELL < ARENA_CELLS);
}
