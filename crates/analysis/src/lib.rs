//! Control-flow metrics used to gauge how much a pass complicates a function.

pub mod metrics;
