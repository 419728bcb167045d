//! scholarfund monitor library
//!
//! This module re-exports the monitor's modules for integration testing.

pub mod config;
pub mod monitor;
pub mod version;
