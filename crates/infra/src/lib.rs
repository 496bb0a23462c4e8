//! Infrastructure layer: PLog, view storage, partition borrowing and the
//! actualizer engine.

pub mod actualizers;
pub mod command;
pub mod config;
pub mod partitions;
pub mod plog;
pub mod retry;
pub mod supervisor;
pub mod views;

mod integration_tests;

pub use command::{CommandError, CommandWriter};
pub use config::{ActualizerConfig, ConfigError};
pub use retry::{BackoffStrategy, RetryPolicy, retry_until_cancelled};
pub use supervisor::{ActualizerKey, ActualizerSupervisor, SupervisorError};
