//! In-memory stages between landing and export.
//!
//! Every stage takes whole tables and returns new ones; none of them mutate
//! their inputs or keep state between runs.

pub mod dedup;
pub mod experience;
pub mod product;
pub mod resolve;
pub mod security;
pub mod standardize;
