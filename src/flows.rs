//! The refresh engine: single-flight coordination, proactive scheduling, the retry-once
//! request pipeline, and cross-context synchronization.

pub mod coordinator;
pub mod retry;
pub mod scheduler;
pub mod sync;

pub use coordinator::*;
pub use retry::*;
pub use scheduler::*;
pub use sync::*;
