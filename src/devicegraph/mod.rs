//! In-memory device graph the proposal works on

pub mod device;
pub mod fixture;
pub mod graph;
pub mod region;

pub use device::*;
pub use fixture::DevicesFixture;
pub use graph::{DeviceGraph, GraphDescription, Link};
pub use region::{FreeRegion, SlotInfo};
