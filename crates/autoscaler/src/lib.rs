//! Process-level wiring for the swarm autoscaler binary

pub mod api;
pub mod config;
