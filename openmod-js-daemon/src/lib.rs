//! OpenMod JavaScript daemon library
//!
//! This module exports the daemon's configuration and plugin wiring for testing purposes.

pub mod config;
pub mod plugin;
