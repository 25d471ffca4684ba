//! Shared helpers

pub mod error;
pub mod size;
