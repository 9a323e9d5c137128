//! CLI command implementations.

pub mod common;
pub mod inspect;
pub mod latency;
pub mod plugins;
pub mod render;
