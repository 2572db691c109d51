//! Side-effecting pieces: transports, launcher, config, and output sinks.

pub mod config;
pub mod env;
pub mod hub;
pub mod launcher;
pub mod local;
pub mod process;
pub mod sink;
pub mod socket;
pub mod wire;
