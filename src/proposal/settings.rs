//! Proposal settings

use crate::devicegraph::device::{EncryptionMethod, MountBy, PartitionTableType, Pbkdf};
use crate::utils::error::{ProposalError, Result};
use crate::utils::size::DiskSize;
use crate::volumes::spec::{default_volumes, VolumeSpecification};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// What may be deleted from a category of partitions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DeleteMode {
    /// Never delete
    None,
    /// Delete only as much as needed
    #[default]
    OnDemand,
    /// Delete everything upfront
    All,
}

impl fmt::Display for DeleteMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::OnDemand => write!(f, "on demand"),
            Self::All => write!(f, "all"),
        }
    }
}

/// Which existing swap may be reused
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SwapReuse {
    /// A swap on any disk
    #[default]
    Any,
    /// Only a swap on the candidate disks
    Candidate,
    /// Always create a new swap
    None,
}

/// Thin provisioning of the system VG
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThinPoolSettings {
    #[serde(default = "default_pool_name")]
    pub pool_name: String,
    /// Share of the VG given to the pool
    #[serde(default = "default_pool_percent")]
    pub size_percent: u8,
}

fn default_pool_name() -> String {
    "thinpool".to_string()
}

fn default_pool_percent() -> u8 {
    95
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProposalSettings {
    #[serde(default = "default_volumes")]
    pub volumes: Vec<VolumeSpecification>,
    /// Disks the proposal may use, empty means all
    #[serde(default)]
    pub candidate_devices: Vec<String>,
    /// Disk to boot from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root_device: Option<String>,
    #[serde(default)]
    pub lvm: bool,
    #[serde(default = "default_vg_name")]
    pub lvm_vg_name: String,
    #[serde(default = "default_true")]
    pub lvm_vg_reuse: bool,
    #[serde(default = "default_extent_size")]
    pub extent_size: DiskSize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thin_pool: Option<ThinPoolSettings>,
    #[serde(default = "default_true")]
    pub separate_vgs: bool,
    /// Encrypt volumes when set (unless a volume overrides it)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encryption_password: Option<String>,
    #[serde(default)]
    pub encryption_method: EncryptionMethod,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encryption_pbkdf: Option<Pbkdf>,
    #[serde(default = "default_windows_mode")]
    pub windows_delete_mode: DeleteMode,
    #[serde(default)]
    pub linux_delete_mode: DeleteMode,
    #[serde(default)]
    pub other_delete_mode: DeleteMode,
    #[serde(default = "default_true")]
    pub resize_windows: bool,
    #[serde(default)]
    pub resize_others: bool,
    #[serde(default)]
    pub swap_reuse: SwapReuse,
    #[serde(default)]
    pub default_mount_by: MountBy,
    /// Table type for disks that get a new partition table
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ptable_type: Option<PartitionTableType>,
    /// Last resort: allow deleting Linux and other partitions on demand
    #[serde(default)]
    pub allow_delete_relaxation: bool,
}

fn default_true() -> bool {
    true
}

fn default_vg_name() -> String {
    "system".to_string()
}

fn default_extent_size() -> DiskSize {
    DiskSize::mib(4)
}

fn default_windows_mode() -> DeleteMode {
    DeleteMode::OnDemand
}

impl Default for ProposalSettings {
    fn default() -> Self {
        Self {
            volumes: default_volumes(),
            candidate_devices: Vec::new(),
            root_device: None,
            lvm: false,
            lvm_vg_name: default_vg_name(),
            lvm_vg_reuse: true,
            extent_size: default_extent_size(),
            thin_pool: None,
            separate_vgs: true,
            encryption_password: None,
            encryption_method: EncryptionMethod::Luks2,
            encryption_pbkdf: None,
            windows_delete_mode: DeleteMode::OnDemand,
            linux_delete_mode: DeleteMode::OnDemand,
            other_delete_mode: DeleteMode::OnDemand,
            resize_windows: true,
            resize_others: false,
            swap_reuse: SwapReuse::Any,
            default_mount_by: MountBy::Uuid,
            ptable_type: None,
            allow_delete_relaxation: false,
        }
    }
}

impl ProposalSettings {
    /// Volumes that take part in the proposal
    pub fn proposed_volumes(&self) -> impl Iterator<Item = &VolumeSpecification> {
        self.volumes.iter().filter(|v| v.proposed)
    }

    pub fn root_volume(&self) -> Option<&VolumeSpecification> {
        self.proposed_volumes().find(|v| v.is_root())
    }

    /// Whether a volume ends up encrypted
    pub fn encrypt(&self, volume: &VolumeSpecification) -> bool {
        volume
            .encryption
            .unwrap_or(self.encryption_password.is_some())
    }

    pub fn validate(&self) -> Result<()> {
        if self.extent_size.is_zero() || !self.extent_size.bytes().is_power_of_two() {
            return Err(ProposalError::InvalidSettings(format!(
                "extent size {} must be a power of two",
                self.extent_size
            )));
        }
        if self.lvm_vg_name.is_empty() || self.lvm_vg_name.contains('/') {
            return Err(ProposalError::InvalidSettings(format!(
                "invalid volume group name {:?}",
                self.lvm_vg_name
            )));
        }
        if let Some(pool) = &self.thin_pool {
            if pool.size_percent == 0 || pool.size_percent > 100 {
                return Err(ProposalError::InvalidSettings(format!(
                    "thin pool size must be 1-100% of the VG, got {}%",
                    pool.size_percent
                )));
            }
        }

        let mut mount_points = BTreeSet::new();
        for volume in &self.volumes {
            volume.validate()?;
            if volume.proposed && !volume.is_swap() && !mount_points.insert(&volume.mount_point) {
                return Err(ProposalError::InvalidSettings(format!(
                    "mount point {} requested twice",
                    volume.mount_point
                )));
            }
        }
        if self.root_volume().is_none() {
            return Err(ProposalError::InvalidSettings(
                "no root volume requested".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::devicegraph::device::FsType;

    #[test]
    fn default_settings_are_valid() {
        ProposalSettings::default().validate().unwrap();
    }

    #[test]
    fn duplicated_mount_point_is_rejected() {
        let mut settings = ProposalSettings::default();
        settings
            .volumes
            .push(VolumeSpecification::new("/home", FsType::Ext4));
        assert!(settings.validate().is_err());
    }

    #[test]
    fn root_is_required() {
        let mut settings = ProposalSettings::default();
        settings.volumes.retain(|v| !v.is_root());
        assert!(settings.validate().is_err());
    }

    #[test]
    fn volume_encryption_overrides_global() {
        let mut settings = ProposalSettings::default();
        settings.encryption_password = Some("secret".to_string());
        let mut volume = VolumeSpecification::new("/data", FsType::Xfs);
        assert!(settings.encrypt(&volume));
        volume.encryption = Some(false);
        assert!(!settings.encrypt(&volume));
    }
}
