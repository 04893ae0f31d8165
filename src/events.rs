//! Collection lifecycle events, emitted through the `log` facade.

const TARGET: &str = "cinders::events";

pub(crate) fn mark_start(incremental: bool, gray_total: usize) {
    log::debug!(target: TARGET, "mark start: incremental={incremental} gray_total={gray_total}");
}

pub(crate) fn mark_done(incremental: bool, gray_total: usize) {
    log::debug!(target: TARGET, "mark done: incremental={incremental} gray_total={gray_total}");
}

pub(crate) fn sweep_start(arena_count: usize) {
    log::debug!(target: TARGET, "sweep start: arenas={arena_count}");
}

pub(crate) fn sweep_done(free_cells: usize, largest_free_block: usize) {
    log::debug!(
        target: TARGET,
        "sweep done: free_cells={free_cells} largest_free_block={largest_free_block}"
    );
}

#[cfg(feature = "alloc_events")]
pub(crate) fn allocate_start(size: usize) {
    log::trace!(target: TARGET, "allocate start: size={size}");
}

#[cfg(not(feature = "alloc_events"))]
pub(crate) fn allocate_start(_size: usize) {}

#[cfg(feature = "alloc_events")]
pub(crate) fn allocate_done(object: crate::object::ObjectPtr) {
    log::trace!(target: TARGET, "allocate done: object={object:p}");
}

#[cfg(not(feature = "alloc_events"))]
pub(crate) fn allocate_done(_object: crate::object::ObjectPtr) {}
