//! Job execution: the shell executor and the polling worker pool.
//!
//! # Execution flow
//!
//! 1. A worker loop claims an eligible pending job through the registry
//! 2. [`CommandExecutor::execute`] runs the command via `$SHELL -c`
//! 3. Combined stdout/stderr and success/failure are captured
//! 4. The outcome is settled back through the registry: complete, retry
//!    with backoff, or dead-letter

pub mod executor;
pub mod pool;

pub use executor::{CommandExecutor, ExecutionResult};
pub use pool::WorkerPool;
