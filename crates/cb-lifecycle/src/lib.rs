//! Per-task state machines.
//!
//! Two distinct state spaces exist because the two dispatch paths observe
//! different things: the ephemeral path owns the task in memory from
//! creation through collection, while the detached path only ever sees a
//! task once it has been written to the object store (so there is no
//! `Created`/`Queued` distinction worth persisting).

mod detached;
mod ephemeral;
mod transition;

pub use detached::DetachedState;
pub use ephemeral::TaskState;
pub use transition::{StateTransition, TransitionError};
