//! An embeddable, incrementally marking, non-moving mark-and-sweep garbage
//! collector.
//!
//! The collector manages heap objects for a mutator on a single logical
//! thread. Allocation is the only implicit collection trigger: each call may
//! run a bounded incremental mark slice or, past the major threshold, a full
//! collection. Roots are published explicitly through a shadow stack, and
//! reference stores are preceded by a write barrier that keeps in-progress
//! marking sound.
//!
//! Key types:
//! - [`Collector`]: the heap, the phase machine and the public API
//! - [`ObjectPtr`] / [`ObjectHeader`]: how managed objects are addressed
//! - [`Tracer`] / [`Visitor`]: the embedder callback that enumerates an
//!   object's outgoing references
//! - [`Config`]: collection pacing, loadable from the environment

pub mod alloc;
pub mod collector;
pub mod config;
mod events;
pub mod object;
pub mod trace;

pub use alloc::AllocError;
pub use collector::{Collector, Phase};
pub use config::Config;
pub use object::{MarkColor, ObjectFlags, ObjectHeader, ObjectPtr};
pub use trace::{Tracer, Visitor};
