// Owlbench Core Library

pub mod pipeline;
pub mod pool;
pub mod resolver;
pub mod runner;
pub mod stats;

pub use pipeline::{InvocationMode, PipelineError};
pub use pool::{PoolConfig, PoolError, ProcessPool};
pub use resolver::{resolve, ResolveError, ResolvedTool};
pub use runner::RunnerError;
pub use stats::{RunMode, StatsError};
