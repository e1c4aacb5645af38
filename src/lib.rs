//! # cloop
//!
//! Closed-loop sensorimotor co-simulation: a rate-coded neural controller and
//! a simulated arm exchanging population rates in lock-step, one resolution
//! step at a time.
//!
//! This crate is the synchronous core. The async peers, the trial runner and
//! the `run-trials` CLI live in the `cloop_trials` workspace member.
//!
//! ## Quick Start
//!
//! ```
//! use cloop::prelude::*;
//!
//! let cfg = LoopConfig::default();
//! let map = cfg.channel_map()?;
//! let mut plant = cfg.build_plant();
//! let mut sync = StepSynchronizer::new(
//!     map.clone(),
//!     cfg.timings(),
//!     cfg.simulation.resolution_ms,
//!     cfg.brain.sensory,
//!     cfg.plant.scale_torque,
//! );
//!
//! // One round: motor frame in, feedback frame out, physics advanced.
//! let motor = RateFrame::silent(0, map.total_channels());
//! let outcome = sync.step(&mut plant, &motor, 0.0, 0)?;
//! assert_eq!(outcome.report().outgoing.rates.len(), 100);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ## Modules
//!
//! - [`codec`]: signed scalar ↔ rate pair
//! - [`channel`]: channel index assignment and per-joint delays
//! - [`section`]: trial timeline
//! - [`synchronizer`]: per-step plant-side exchange
//! - [`neural`]: neural collaborator interface and reference controller
//! - [`results`], [`recording`], [`storage`]: persisted artifacts

#[path = "core/error.rs"]
pub mod error;

#[path = "core/prng.rs"]
pub mod prng;

#[path = "core/codec.rs"]
pub mod codec;

#[path = "core/channel.rs"]
pub mod channel;

#[path = "core/section.rs"]
pub mod section;

#[path = "core/exchange.rs"]
pub mod exchange;

#[path = "core/plant.rs"]
pub mod plant;

#[path = "core/synchronizer.rs"]
pub mod synchronizer;

#[path = "core/neural.rs"]
pub mod neural;

#[path = "core/storage.rs"]
pub mod storage;

#[path = "core/recording.rs"]
pub mod recording;

#[path = "core/trial_id.rs"]
pub mod trial_id;

#[path = "core/results.rs"]
pub mod results;

#[path = "core/config.rs"]
pub mod config;

/// Prelude module for convenient imports.
///
/// ```
/// use cloop::prelude::*;
/// ```
pub mod prelude {
    pub use crate::channel::ChannelMap;
    pub use crate::codec::{decode, encode, Polarity, RateCodec, RatePair};
    pub use crate::config::LoopConfig;
    pub use crate::error::{ConfigError, ExchangeError, NeuralError, PersistError};
    pub use crate::exchange::{ControlCommand, DataPackStore, Feedback, PositionReport, RateFrame};
    pub use crate::neural::{NeuralContext, NeuralModel, RateController, SimulatorHandle};
    pub use crate::plant::{PendulumPlant, Plant, PlantRecordings};
    pub use crate::results::{NeuralResult, PlantResult, ResultMeta, RunPaths};
    pub use crate::section::{SectionTimings, TrialSection};
    pub use crate::synchronizer::{StepOutcome, StepSynchronizer};
    pub use crate::trial_id::TrialId;
}
