//! Space handling: size distribution, fitting and freeing space

pub mod distribution;
pub mod distributor;
pub mod maker;

pub use distribution::{find_distribution, PartitionDistribution, RegionAssignment, Slot};
pub use distributor::{distribute, SizeRange};
pub use maker::{PlannedAction, SpaceMaker, SpaceMakerOutcome};
