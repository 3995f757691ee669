//! # Peernet LOC
//!
//! The simulator-provided LOC discovery endpoint. Each managed server owns
//! one `LocServer`: a TCP listener its child process registers with, asks
//! for its neighborhood, and receives neighborhood-change notifications
//! from. The orchestrator drives the neighbor set through
//! [`LocServer::add_neighborhood`] and friends.

mod server;

pub use server::LocServer;
