//! Worktree pool: a fixed set of isolated working directories leased
//! exclusively to execution workers.

pub mod lease;
pub mod pool;

pub use lease::{LeaseStatus, WorktreeLease, WorktreeSnapshot};
pub use pool::{PoolError, WorktreePool, WorktreePoolConfig};
