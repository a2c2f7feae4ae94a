pub mod common;
pub mod env;
pub mod executor;
pub mod runner;

pub use env::{Environment, EnvironmentInfo, EnvironmentManager};
pub use executor::{Executor, Payload};
pub use runner::{CommandRunner, CommandSpec, ExecutionResult, KillReason, SystemRunner};
