//! Persistence adapters.

pub mod config;
