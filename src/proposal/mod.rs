//! Guided storage proposal
//!
//! Settings and system facts go in, a target devicegraph and a list of issues
//! come out.

pub mod engine;
pub mod facts;
pub mod fallbacks;
pub mod issues;
pub mod planner;
pub mod settings;

pub use engine::{GuidedProposal, ProposalResult};
pub use facts::SystemFacts;
pub use issues::{Issue, IssuesList, Severity};
pub use planner::TargetSize;
pub use settings::ProposalSettings;
