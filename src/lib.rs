//! Storage proposal library - plans partitioning, LVM, RAID and encryption
//! for a fresh installation on top of the probed disks

pub mod boot;
pub mod config;
pub mod devicegraph;
pub mod materialize;
pub mod proposal;
pub mod space;
pub mod utils;
pub mod volumes;

pub use config::Scenario;
pub use devicegraph::DeviceGraph;
pub use proposal::{GuidedProposal, ProposalResult, ProposalSettings, SystemFacts};
pub use utils::error::ProposalError;
