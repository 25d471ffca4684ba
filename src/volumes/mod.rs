//! Wanted volumes and the devices planned for them

pub mod planned;
pub mod spec;

pub use planned::*;
pub use spec::{VolumeSpecification, VolumeSpecificationSet};
