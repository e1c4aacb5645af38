//! Async co-simulation runner for `cloop`.
//!
//! A trial spawns a plant peer and a neural peer as separate tasks, drives
//! them in chunks of lock-step rounds and publishes their results. A
//! [`TrialChain`] runs trials back to back, each the parent of the next.

pub mod chain;
pub mod cosim;
pub mod error;
pub mod logs;
pub mod paths;
pub mod peers;
pub mod runner;

pub use chain::{ChainReport, TrialChain};
pub use error::{ChainError, TrialError, TrialFailure};
pub use runner::{DefaultFactory, TrialContext, TrialFactory, TrialRunner};
