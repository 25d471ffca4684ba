//! Scenario configuration

pub mod scenario;

pub use scenario::Scenario;
