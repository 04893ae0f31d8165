//! The collector core: phase machine, marking, sweeping, write barrier and
//! the allocation entrypoint.

use crate::alloc::{AllocError, Allocator, BlockType, HugeBlockTable, arena};
use crate::config::{CELL_SIZE, Config, INC_MARK_MIN, LARGE_ALLOC_THRESHOLD};
use crate::events;
use crate::object::{MarkColor, ObjectFlags, ObjectPtr};
use crate::trace::{Tracer, Visitor};

pub(crate) mod shadow_stack;
pub(crate) mod signal;
pub(crate) mod weakref;


use shadow_stack::ShadowStack;
use weakref::WeakRefEntry;

/// Collector phase.
///
/// `Pause` means no cycle is in progress and nothing is gray. `Mark` means a
/// cycle has started and gray work remains. `Collect` means marking drained
/// and the cycle is waiting for its sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Pause,
    Mark,
    Collect,
}

/// The collector. One instance manages one mutator's heap.
///
/// The mutator and the collector share a single logical thread: collection
/// work only happens inside [`Collector::allocate`], [`Collector::collect`]
/// and the root/barrier hooks, never concurrently with the mutator.
pub struct Collector {
    phase: Phase,
    config: Config,
    bytes_since_collection: usize,
    bytes_since_incmark: usize,
    /// Free-space snapshot from the last sweep.
    free_cells: usize,
    largest_free_block: usize,
    allocator: Allocator,
    huge: HugeBlockTable,
    /// Gray work-list for prebuilt objects and huge blocks, which have no
    /// per-arena home.
    gp_gray: Vec<ObjectPtr>,
    /// Combined length of every gray work-list. Marking is done when this
    /// reaches zero.
    gray_total: usize,
    /// Prebuilt objects touched by a write barrier at least once; replayed as
    /// roots at the start of every cycle.
    prebuilt_roots: Vec<ObjectPtr>,
    weakrefs: Vec<WeakRefEntry>,
    shadow_stack: ShadowStack,
}

impl Collector {
    /// Build a collector with thresholds read from the environment.
    pub fn new() -> Self {
        Self::with_config(Config::from_env())
    }

    pub fn with_config(config: Config) -> Self {
        Self {
            phase: Phase::Pause,
            config,
            bytes_since_collection: 0,
            bytes_since_incmark: 0,
            free_cells: 0,
            largest_free_block: 0,
            allocator: Allocator::new(),
            huge: HugeBlockTable::new(),
            gp_gray: Vec::new(),
            gray_total: 0,
            prebuilt_roots: Vec::new(),
            weakrefs: Vec::new(),
            shadow_stack: ShadowStack::new(),
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Number of live arenas.
    ///
    /// Prefer this over reaching into the allocator so the arena
    /// representation can change without touching every call site.
    pub fn arenas_len(&self) -> usize {
        self.allocator.arenas_len()
    }

    /// Free cells recorded by the last sweep.
    pub fn free_cells(&self) -> usize {
        self.free_cells
    }

    /// Largest coalesced free block recorded by the last sweep, in cells.
    pub fn largest_free_block(&self) -> usize {
        self.largest_free_block
    }
}

// ==== Roots ====

impl Collector {
    /// Publish a root. During an active cycle the object is also grayed
    /// immediately so roots appearing mid-cycle are never missed.
    pub fn push_root(&mut self, object: ObjectPtr) {
        if self.phase != Phase::Pause {
            self.phase = Phase::Mark;
            self.push_object(object);
        }
        self.shadow_stack.push(object);
    }

    /// Retract the most recently published root. Must not be called with an
    /// empty root set.
    pub fn pop_root(&mut self) -> ObjectPtr {
        self.shadow_stack.pop()
    }
}

// ==== Write barrier ====

impl Collector {
    /// Dijkstra-style insertion barrier. Call before storing a reference into
    /// any field of `object`.
    ///
    /// The barrier re-grays the written-to object, so a black object gaining
    /// a pointer to a white one is re-queued before the store becomes
    /// visible to the collector.
    pub fn write_barrier(&mut self, object: ObjectPtr) {
        let flags = object.flags();
        if flags.contains(ObjectFlags::GRAY) {
            return;
        }
        object.insert_flags(ObjectFlags::GRAY);

        if flags.contains(ObjectFlags::PREBUILT)
            && !flags.contains(ObjectFlags::PREBUILT_REGISTERED)
        {
            object.insert_flags(ObjectFlags::PREBUILT_REGISTERED);
            self.prebuilt_roots.push(object);
        }

        if self.phase == Phase::Pause {
            // No marking in progress; the next cycle replays the roots and
            // the prebuilt list anyway.
            return;
        }

        // A triggered barrier means marking is no longer complete.
        self.phase = Phase::Mark;

        if flags.contains(ObjectFlags::PREBUILT) {
            // Always reachable, no mark test needed.
            self.enqueue_gp(object);
        } else if arena::is_arena_aligned(object.addr()) {
            if self.huge.is_marked(object.addr()) {
                self.enqueue_gp(object);
            }
        } else {
            // SAFETY: a normal heap object lives inside an arena.
            if unsafe { arena::blocktype(object.addr()) } == BlockType::Black {
                // Was black already, queue it for a re-scan.
                self.enqueue_arena(object);
            }
        }
    }
}

// ==== Allocation ====

impl Collector {
    /// Allocate `size` bytes and return the new object, white and flag-free.
    ///
    /// May run a full collection or an incremental mark slice first, per the
    /// configured thresholds. Sizes up to the large-alloc threshold come from
    /// arenas; anything bigger becomes a huge block.
    pub fn allocate(
        &mut self,
        tracer: &mut impl Tracer,
        size: usize,
    ) -> Result<ObjectPtr, AllocError> {
        events::allocate_start(size);

        if self.bytes_since_collection > self.config.major_threshold {
            self.collect(tracer);
        }
        if self.bytes_since_incmark > self.config.incmark_threshold {
            self.mark(tracer, true);
        }

        let object = if size <= LARGE_ALLOC_THRESHOLD {
            let cells = size.div_ceil(CELL_SIZE).max(1);
            self.allocator.allocate_small(cells)?
        } else {
            self.huge.allocate(size)?
        };

        self.bytes_since_collection += size;
        self.bytes_since_incmark += size;

        events::allocate_done(object);
        Ok(object)
    }
}

// ==== Collection ====

impl Collector {
    /// Run a full cycle: mark to completion, sweep, reset the major counter.
    pub fn collect(&mut self, tracer: &mut impl Tracer) {
        self.mark(tracer, false);
        self.sweep();
        self.bytes_since_collection = 0;
    }

    /// Mark reachable objects. Incremental slices process roughly half of
    /// each work-list's backlog (at least [`INC_MARK_MIN`] entries) and
    /// return; a non-incremental mark drains everything.
    fn mark(&mut self, tracer: &mut impl Tracer, incremental: bool) {
        if self.phase == Phase::Collect {
            // Marking already drained, nothing to do until the sweep.
            return;
        }
        events::mark_start(incremental, self.gray_total);

        self.bytes_since_incmark = 0;

        if self.phase == Phase::Pause {
            self.phase = Phase::Mark;

            // First slice of a new cycle: seed the work-lists from the
            // shadow stack and the prebuilt-root list. Roots appearing later
            // are caught by push_root and the write barrier.
            for index in 0..self.shadow_stack.len() {
                let root = self.shadow_stack.get(index);
                self.push_object(root);
            }
            for index in 0..self.prebuilt_roots.len() {
                let prebuilt = self.prebuilt_roots[index];
                prebuilt.insert_flags(ObjectFlags::GRAY);
                self.enqueue_gp(prebuilt);
            }
        }

        while self.gray_total > 0 {
            let budget = slice_budget(self.gp_gray.len(), incremental);
            for _ in 0..budget {
                let Some(object) = self.gp_gray.pop() else { break };
                self.gray_total -= 1;
                self.pop_object(tracer, object);
            }

            for index in 0..self.allocator.arenas_len() {
                let budget = slice_budget(self.allocator.arena_gray_len(index), incremental);
                for _ in 0..budget {
                    let Some(object) = self.allocator.arena_gray_pop(index) else {
                        break;
                    };
                    self.gray_total -= 1;
                    self.pop_object(tracer, object);
                }
            }

            if incremental {
                break;
            }
        }

        if self.gray_total == 0 {
            self.phase = Phase::Collect;
        }
        events::mark_done(incremental, self.gray_total);
        debug_assert!(incremental || self.phase == Phase::Collect);
    }

    /// Gray one object if it has not been reached yet.
    pub(crate) fn push_object(&mut self, object: ObjectPtr) {
        debug_assert_eq!(self.phase, Phase::Mark);

        if arena::is_arena_aligned(object.addr()) {
            // Huge block: liveness lives in the side table.
            if self.huge.mark(object.addr()) {
                object.insert_flags(ObjectFlags::GRAY);
                self.enqueue_gp(object);
            }
            return;
        }
        if object.is_prebuilt() {
            // Always treated as black; traced only through the prebuilt-root
            // list.
            return;
        }
        // SAFETY: a normal heap object lives inside an arena.
        if unsafe { arena::blocktype(object.addr()) } == BlockType::White {
            object.insert_flags(ObjectFlags::GRAY);
            // Darkening here is what lets a later write barrier spot the
            // object as already-scanned and re-queue it.
            // SAFETY: same address as the blocktype read above.
            unsafe { arena::set_blocktype(object.addr(), BlockType::Black) };
            self.enqueue_arena(object);
        }
    }

    /// Scan one gray object: clear its flag and trace its outgoing
    /// references.
    fn pop_object(&mut self, tracer: &mut impl Tracer, object: ObjectPtr) {
        debug_assert!(object.is_gray());
        #[cfg(debug_assertions)]
        if !object.is_prebuilt() && !arena::is_arena_aligned(object.addr()) {
            debug_assert_eq!(unsafe { arena::blocktype(object.addr()) }, BlockType::Black);
        }

        object.remove_flags(ObjectFlags::GRAY);
        tracer.trace(object, &mut Visitor::new(self));
    }

    /// Reclaim everything marking did not reach, then return to `Pause`.
    fn sweep(&mut self) {
        debug_assert_eq!(self.phase, Phase::Collect);
        debug_assert_eq!(self.gray_total, 0);
        events::sweep_start(self.allocator.arenas_len());

        self.huge.sweep();

        let stats = self.allocator.sweep();
        self.free_cells = stats.free_cells;
        self.largest_free_block = stats.largest_free_block;
        self.phase = Phase::Pause;

        // Fragmentation = 1 - largest / free. Bump while it is below 50%.
        self.allocator.use_bump = self.free_cells < 2 * self.largest_free_block;

        self.update_weakrefs();
        events::sweep_done(self.free_cells, self.largest_free_block);
    }

    fn enqueue_gp(&mut self, object: ObjectPtr) {
        self.gp_gray.push(object);
        self.gray_total += 1;
    }

    fn enqueue_arena(&mut self, object: ObjectPtr) {
        // SAFETY: callers only queue normal heap objects, which live inside
        // an arena; no other reference into that arena's metadata is held
        // across this call.
        unsafe { arena::gray_stack(object.addr()).push(object) };
        self.gray_total += 1;
    }
}

// ==== Diagnostics ====

impl Collector {
    /// Tricolor state of an object, derived from its blocktype and GRAY flag.
    pub fn mark_color(&self, object: ObjectPtr) -> MarkColor {
        if arena::is_arena_aligned(object.addr()) {
            if !self.huge.contains(object.addr()) {
                return MarkColor::Invalid;
            }
            return match (self.huge.is_marked(object.addr()), object.is_gray()) {
                (false, false) => MarkColor::White,
                (false, true) => MarkColor::LightGray,
                (true, false) => MarkColor::Black,
                (true, true) => MarkColor::DarkGray,
            };
        }
        if object.is_prebuilt() {
            return if object.is_gray() {
                MarkColor::DarkGray
            } else {
                MarkColor::Black
            };
        }
        // SAFETY: a normal heap object lives inside an arena.
        match (unsafe { arena::blocktype(object.addr()) }, object.is_gray()) {
            (BlockType::White, false) => MarkColor::White,
            (BlockType::White, true) => MarkColor::LightGray,
            (BlockType::Black, false) => MarkColor::Black,
            (BlockType::Black, true) => MarkColor::DarkGray,
            _ => MarkColor::Invalid,
        }
    }
}

impl Default for Collector {
    fn default() -> Self {
        Self::new()
    }
}

/// How many entries one pass over a work-list may process.
fn slice_budget(len: usize, incremental: bool) -> usize {
    if incremental {
        len.min((len / 2).max(INC_MARK_MIN))
    } else {
        len
    }
}
