//! # lumen-host
//!
//! Accepts thin clients over TCP, optionally authenticates them, and
//! streams paced frames from a synthetic capture source through a
//! per-client `StreamSession`. Client feedback retargets the encoder's
//! frame size through the session's own network predictor.

pub mod config;
pub mod service;
pub mod source;
