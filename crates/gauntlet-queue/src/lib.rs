//! Test queue: pending/running/terminal accounting, priority dispatch,
//! and the retry budget for the gauntlet execution core.

pub mod queue;

pub use queue::{QueueError, QueueSummary, TestQueue};
