//! Command-line driver for the archive object reorganizer

pub mod commands;
pub mod config;
