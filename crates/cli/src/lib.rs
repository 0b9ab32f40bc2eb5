//! Command implementations for the `veil` binary.

pub mod commands;
