//! # Peernet sim
//!
//! The simulator itself: scenario parsing, child-process supervision, the
//! client drivers that seed the network over its real wire protocols, the
//! ground-truth predictor test queries are checked against, the sequential
//! orchestrator, and the snapshot engine.

pub mod context;
pub mod driver;
pub mod orchestrator;
pub mod predict;
pub mod scenario;
pub mod snapshot;
pub mod supervisor;

pub use context::{SimContext, SimPaths};
pub use orchestrator::{Orchestrator, RunSummary};
pub use scenario::{parse_scenario, ParsedCommand, ScenarioError};
