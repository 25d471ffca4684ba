//! Volume specifications: what the installed system should contain

use crate::devicegraph::device::{
    BtrfsRaidLevel, CacheMode, FsType, MdLevel, PartitionId, Subvolume,
};
use crate::utils::error::{ProposalError, Result};
use crate::utils::size::DiskSize;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Mount point used for swap volumes
pub const SWAP_MOUNT: &str = "swap";

/// Software RAID requested for a volume
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RaidSpec {
    pub level: MdLevel,
    /// Disks holding one member each
    pub devices: Vec<String>,
}

/// Btrfs spanning several disks
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MultiBtrfsSpec {
    /// Disks holding one member each. Ignored when reusing an existing filesystem.
    #[serde(default)]
    pub devices: Vec<String>,
    /// Explicit levels; an existing filesystem keeps its own levels otherwise
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_raid_level: Option<BtrfsRaidLevel>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata_raid_level: Option<BtrfsRaidLevel>,
}

/// Bcache in front of a volume
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BcacheSpec {
    /// Disk holding the caching partition
    pub cache_device: String,
    pub cache_size: DiskSize,
    #[serde(default)]
    pub cache_mode: CacheMode,
}

/// One wanted mount point or volume
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VolumeSpecification {
    /// Absolute path, or `swap`
    pub mount_point: String,
    /// Allowed filesystem types, empty means any
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fs_types: Vec<FsType>,
    pub fs_type: FsType,
    pub min_size: DiskSize,
    pub desired_size: DiskSize,
    #[serde(default = "DiskSize::unlimited")]
    pub max_size: DiskSize,
    /// Upper limit used instead of `max_size` when placed on LVM
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_size_lvm: Option<DiskSize>,
    #[serde(default)]
    pub weight: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partition_id: Option<PartitionId>,
    /// Disk the volume must be placed on
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device: Option<String>,
    /// Overrides the global encryption setting
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encryption: Option<bool>,
    #[serde(default)]
    pub snapshots: bool,
    /// Extra space for snapshots, in percent of the volume size
    #[serde(default)]
    pub snapshots_percentage: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub separate_vg_name: Option<String>,
    #[serde(default = "default_true")]
    pub proposed: bool,
    /// Grow the volume to at least the RAM size (hibernation)
    #[serde(default)]
    pub adjust_by_ram: bool,
    /// Position in the list of volumes to simplify when space is short
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disable_order: Option<u32>,
    /// Existing device to use for this volume
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reuse_name: Option<String>,
    #[serde(default = "default_true")]
    pub reformat: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub subvolumes: Vec<Subvolume>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub mount_options: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raid: Option<RaidSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub btrfs: Option<MultiBtrfsSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bcache: Option<BcacheSpec>,
}

fn default_true() -> bool {
    true
}

impl VolumeSpecification {
    pub fn new(mount_point: &str, fs_type: FsType) -> Self {
        Self {
            mount_point: mount_point.to_string(),
            fs_types: Vec::new(),
            fs_type,
            min_size: DiskSize::zero(),
            desired_size: DiskSize::zero(),
            max_size: DiskSize::unlimited(),
            max_size_lvm: None,
            weight: 0,
            partition_id: None,
            device: None,
            encryption: None,
            snapshots: false,
            snapshots_percentage: 0,
            separate_vg_name: None,
            proposed: true,
            adjust_by_ram: false,
            disable_order: None,
            reuse_name: None,
            reformat: true,
            subvolumes: Vec::new(),
            label: None,
            mount_options: Vec::new(),
            raid: None,
            btrfs: None,
            bcache: None,
        }
    }

    pub fn sizes(mut self, min: DiskSize, desired: DiskSize, max: DiskSize) -> Self {
        self.min_size = min;
        self.desired_size = desired;
        self.max_size = max;
        self
    }

    pub fn weight(mut self, weight: u32) -> Self {
        self.weight = weight;
        self
    }

    pub fn is_root(&self) -> bool {
        self.mount_point == "/"
    }

    pub fn is_swap(&self) -> bool {
        self.mount_point == SWAP_MOUNT || self.fs_type == FsType::Swap
    }

    /// Short name used in logs and LV names
    pub fn name(&self) -> String {
        match self.mount_point.as_str() {
            "/" => "root".to_string(),
            SWAP_MOUNT => "swap".to_string(),
            path => path.trim_start_matches('/').replace('/', "_"),
        }
    }

    /// Whether snapshots apply to this volume
    pub fn snapshots_active(&self) -> bool {
        self.snapshots && self.fs_type.supports_snapshots()
    }

    /// Check the invariants of a single volume
    pub fn validate(&self) -> Result<()> {
        if self.mount_point != SWAP_MOUNT && !self.mount_point.starts_with('/') {
            return Err(ProposalError::InvalidSettings(format!(
                "mount point {:?} must be absolute or \"swap\"",
                self.mount_point
            )));
        }
        if self.min_size > self.desired_size || self.desired_size > self.max_size {
            return Err(ProposalError::InvalidSettings(format!(
                "{}: sizes must satisfy min ({}) <= desired ({}) <= max ({})",
                self.mount_point, self.min_size, self.desired_size, self.max_size
            )));
        }
        if !self.fs_types.is_empty() && !self.fs_types.contains(&self.fs_type) {
            return Err(ProposalError::InvalidSettings(format!(
                "{}: {} is not among the allowed filesystem types",
                self.mount_point, self.fs_type
            )));
        }
        if let Some(raid) = &self.raid {
            if raid.devices.len() < raid.level.min_devices() {
                return Err(ProposalError::InvalidSettings(format!(
                    "{}: {:?} needs at least {} devices",
                    self.mount_point,
                    raid.level,
                    raid.level.min_devices()
                )));
            }
        }
        if let Some(btrfs) = &self.btrfs {
            if self.fs_type != FsType::Btrfs {
                return Err(ProposalError::InvalidSettings(format!(
                    "{}: multi-device setup requires btrfs",
                    self.mount_point
                )));
            }
            if btrfs.devices.is_empty() && self.reuse_name.is_none() {
                return Err(ProposalError::InvalidSettings(format!(
                    "{}: multi-device btrfs without devices",
                    self.mount_point
                )));
            }
        }
        if self.raid.is_some() as u8 + self.btrfs.is_some() as u8 + self.bcache.is_some() as u8 > 1 {
            return Err(ProposalError::InvalidSettings(format!(
                "{}: RAID, multi-device btrfs and bcache are mutually exclusive",
                self.mount_point
            )));
        }
        Ok(())
    }
}

/// Volumes sharing one placement target
#[derive(Debug, Clone, PartialEq)]
pub struct VolumeSpecificationSet {
    /// Separate volume group, `None` for the system VG or plain partitions
    pub vg_name: Option<String>,
    /// Disk affinity shared by all members
    pub device: Option<String>,
    pub volumes: Vec<VolumeSpecification>,
}

/// Volume rejected from a separate VG set because of its device affinity
#[derive(Debug, Clone, PartialEq)]
pub struct RejectedVolume {
    pub volume: VolumeSpecification,
    pub vg_name: String,
    pub expected_device: Option<String>,
}

/// Group volumes by their separate VG.
///
/// Volumes without a separate VG go to a set with `vg_name = None`. Members of a
/// separate VG must agree on the device; later volumes that disagree with the
/// first member are returned as rejected.
pub fn group_by_vg(
    volumes: &[VolumeSpecification],
    separate_vgs: bool,
) -> (Vec<VolumeSpecificationSet>, Vec<RejectedVolume>) {
    let mut shared = VolumeSpecificationSet {
        vg_name: None,
        device: None,
        volumes: Vec::new(),
    };
    let mut separate: BTreeMap<String, VolumeSpecificationSet> = BTreeMap::new();
    let mut order: Vec<String> = Vec::new();
    let mut rejected = Vec::new();

    for volume in volumes {
        let vg_name = match (&volume.separate_vg_name, separate_vgs) {
            (Some(name), true) => name.clone(),
            _ => {
                shared.volumes.push(volume.clone());
                continue;
            }
        };
        match separate.get_mut(&vg_name) {
            Some(set) if set.device != volume.device => rejected.push(RejectedVolume {
                volume: volume.clone(),
                vg_name,
                expected_device: set.device.clone(),
            }),
            Some(set) => set.volumes.push(volume.clone()),
            None => {
                order.push(vg_name.clone());
                separate.insert(
                    vg_name.clone(),
                    VolumeSpecificationSet {
                        vg_name: Some(vg_name),
                        device: volume.device.clone(),
                        volumes: vec![volume.clone()],
                    },
                );
            }
        }
    }

    let mut sets = vec![shared];
    sets.extend(order.into_iter().filter_map(|name| separate.remove(&name)));
    (sets, rejected)
}

/// Btrfs subvolumes created on a new root filesystem
pub fn default_subvolumes() -> Vec<Subvolume> {
    ["@home", "@opt", "@root", "@srv", "@usr/local"]
        .iter()
        .map(|path| Subvolume {
            path: path.to_string(),
            nocow: false,
        })
        .chain(std::iter::once(Subvolume {
            path: "@var".to_string(),
            nocow: true,
        }))
        .collect()
}

/// Default volume list: Btrfs root with snapshots, XFS home and swap
pub fn default_volumes() -> Vec<VolumeSpecification> {
    let mut root = VolumeSpecification::new("/", FsType::Btrfs)
        .sizes(DiskSize::gib(5), DiskSize::gib(10), DiskSize::gib(50))
        .weight(60);
    root.fs_types = vec![FsType::Btrfs, FsType::Ext4, FsType::Xfs];
    root.snapshots = true;
    root.snapshots_percentage = 250;
    root.max_size_lvm = Some(DiskSize::gib(30));
    root.subvolumes = default_subvolumes();

    let mut home = VolumeSpecification::new("/home", FsType::Xfs)
        .sizes(DiskSize::gib(10), DiskSize::gib(40), DiskSize::unlimited())
        .weight(40);
    home.fs_types = vec![FsType::Xfs, FsType::Ext4, FsType::Btrfs];
    home.disable_order = Some(1);

    let mut swap = VolumeSpecification::new(SWAP_MOUNT, FsType::Swap)
        .sizes(DiskSize::mib(512), DiskSize::gib(2), DiskSize::gib(2));
    swap.partition_id = Some(PartitionId::Swap);
    swap.adjust_by_ram = true;
    swap.disable_order = Some(2);

    vec![root, home, swap]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        for volume in default_volumes() {
            volume.validate().unwrap();
        }
    }

    #[test]
    fn size_order_is_enforced() {
        let volume = VolumeSpecification::new("/", FsType::Ext4).sizes(
            DiskSize::gib(10),
            DiskSize::gib(5),
            DiskSize::gib(20),
        );
        assert!(volume.validate().is_err());
    }

    #[test]
    fn relative_mount_point_is_rejected() {
        let volume = VolumeSpecification::new("home", FsType::Ext4);
        assert!(volume.validate().is_err());
        assert!(VolumeSpecification::new(SWAP_MOUNT, FsType::Swap)
            .validate()
            .is_ok());
    }

    #[test]
    fn fs_type_must_be_allowed() {
        let mut volume = VolumeSpecification::new("/", FsType::Ext2);
        volume.fs_types = vec![FsType::Btrfs, FsType::Ext4];
        assert!(volume.validate().is_err());
    }

    #[test]
    fn separate_vg_with_mixed_devices_rejects_later_volume() {
        let mut a = VolumeSpecification::new("/srv", FsType::Xfs);
        a.separate_vg_name = Some("vg_srv".to_string());
        a.device = Some("/dev/sdb".to_string());
        let mut b = VolumeSpecification::new("/srv/data", FsType::Xfs);
        b.separate_vg_name = Some("vg_srv".to_string());
        b.device = Some("/dev/sdc".to_string());
        let root = VolumeSpecification::new("/", FsType::Ext4);

        let (sets, rejected) = group_by_vg(&[root, a, b], true);
        assert_eq!(sets.len(), 2);
        assert_eq!(sets[0].volumes.len(), 1);
        assert_eq!(sets[1].vg_name.as_deref(), Some("vg_srv"));
        assert_eq!(rejected.len(), 1);
        assert_eq!(rejected[0].volume.mount_point, "/srv/data");
    }

    #[test]
    fn separate_vgs_disabled_keeps_one_set() {
        let mut a = VolumeSpecification::new("/srv", FsType::Xfs);
        a.separate_vg_name = Some("vg_srv".to_string());
        let (sets, rejected) = group_by_vg(&[a], false);
        assert_eq!(sets.len(), 1);
        assert!(rejected.is_empty());
    }
}
