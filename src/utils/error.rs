//! Error types for the storage proposal

use crate::utils::size::{DiskSize, SizeParseError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProposalError {
    #[error("No candidate disks available for the proposal")]
    NoCandidateDisks,

    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Partition table error: {0}")]
    PartitionTable(String),

    #[error("Invalid settings: {0}")]
    InvalidSettings(String),

    #[error(transparent)]
    Scenario(#[from] ScenarioError),

    #[error(transparent)]
    BootRequirements(#[from] BootRequirementsError),

    #[error(transparent)]
    SpaceMaker(#[from] SpaceMakerError),

    #[error(transparent)]
    NotEnoughSpace(#[from] NotEnoughSpace),

    #[error(transparent)]
    Materialize(#[from] MaterializeError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    SizeParse(#[from] SizeParseError),
}

impl ProposalError {
    /// Errors that only invalidate the current attempt
    pub fn is_soft(&self) -> bool {
        matches!(
            self,
            Self::SpaceMaker(_)
                | Self::NotEnoughSpace(_)
                | Self::Materialize(_)
                | Self::PartitionTable(_)
        )
    }
}

/// Fatal conditions detected while computing boot requirements
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BootRequirementsError {
    #[error("{disk} is a DASD with LDL format, which cannot hold a bootable system")]
    LdlDasd { disk: String },

    #[error("{disk} is an ECKD DASD without low-level format")]
    UnformattedDasd { disk: String },

    #[error("No disk available to boot from")]
    NoBootDisk,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Not enough space: {needed} needed, {available} available")]
pub struct NotEnoughSpace {
    pub needed: DiskSize,
    pub available: DiskSize,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SpaceMakerError {
    #[error("Cannot make enough space: {missing} missing after all possible actions")]
    NotEnoughSpace { missing: DiskSize },

    #[error("No usable disk among the candidates")]
    NoUsableDisk,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MaterializeError {
    #[error("No space assigned for {0}")]
    NoRegion(String),

    #[error("Volume {volume} does not fit: {source}")]
    DoesNotFit {
        volume: String,
        #[source]
        source: NotEnoughSpace,
    },

    #[error("Device to reuse not found: {0}")]
    ReuseTargetMissing(String),

    #[error("Cannot create {device}: {reason}")]
    Create { device: String, reason: String },
}

/// Problems in a scenario file or its device description
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScenarioError {
    #[error("Invalid device description: {0}")]
    Devices(String),

    #[error("Invalid scenario: {0}")]
    Invalid(String),
}

pub type Result<T> = std::result::Result<T, ProposalError>;
