//! Shared error types for the veil workspace.

pub mod errors;
