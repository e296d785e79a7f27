//! # CubeSat Onboard Controller Core
//!
//! Flight-software core for a CubeSat-class onboard controller: 1 Hz
//! telemetry acquisition journaled to per-day files, a restricted-alphabet
//! status beacon, a bounded response-poll queue of command receipts, and a
//! pending-sequence executor gated by sensor and time conditions, all
//! multiplexed by a status-monitoring state machine over a
//! triple-replicated global state store with per-bit majority voting.
//!
//! ## Quick Start
//!
//! ```rust
//! use satcore::{Controller, SimBus};
//!
//! let mut controller = Controller::new(SimBus::new());
//!
//! // One second of flight: acquisition, aggregation, state machine.
//! controller.advance(1000);
//!
//! println!("beacon: {}", controller.beacon_text());
//! ```
//!
//! ## Architecture
//!
//! - [`store`] - replicated global state with voting reconciliation
//! - [`telemetry`] - acquisition tick and SD flush pipeline
//! - [`aggregate`] - running per-sensor statistics and anomaly ring
//! - [`beacon`] - fixed-width status message assembly
//! - [`response`] - bounded command-receipt queue
//! - [`sequence`] - condition-gated pending-command executor
//! - [`monitor`] - status-monitoring state machine
//! - [`tick`] - 1 Hz cadence, timeouts, and critical sections
//! - [`controller`] - main orchestrator and public API
//! - [`drivers`] - hardware abstraction and the simulated bus

#![deny(warnings)]
#![deny(clippy::all)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]

pub mod aggregate;
pub mod beacon;
pub mod buffer;
pub mod controller;
pub mod drivers;
pub mod ground;
pub mod monitor;
pub mod response;
pub mod sequence;
pub mod state;
pub mod store;
pub mod telemetry;
pub mod tick;

// Re-export the main public types for convenience
pub use controller::{CommandClass, CommandOutcome, Controller};
pub use drivers::{Bus, DriverError, LinkMode, RadioConfig, SimBus};
pub use ground::{GroundCommand, GroundRequest, GroundResponse};
pub use state::{MainState, StatMonState, SystemState};
pub use store::StateStore;
