//! Process-level runtime: the orchestrating [`FlowRunner`], the DELAY
//! scheduler, the expiry sweeper, and their shared configuration.

pub mod config;
pub mod delay;
pub mod runner;
pub mod sweeper;

pub use config::RuntimeConfig;
pub use delay::DelayScheduler;
pub use runner::{FlowRunner, RuntimeError};
pub use sweeper::{ExpirySweeper, SweepReport};
