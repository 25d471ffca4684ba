//! Devices the proposal intends to create or reuse
//!
//! The planner turns volume specifications and boot requirements into these
//! abstract devices. The space maker finds room for them and the materializer
//! turns them into real devices of the target graph.

use crate::devicegraph::device::*;
use crate::space::distributor::SizeRange;
use crate::utils::size::DiskSize;
use serde::{Deserialize, Serialize};

/// Filesystem and mount settings of a planned device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Formatting {
    pub fs_type: FsType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mount_point: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mount_by: Option<MountBy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub mount_options: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub subvolumes: Vec<Subvolume>,
    #[serde(default)]
    pub snapshots: bool,
}

impl Formatting {
    pub fn new(fs_type: FsType, mount_point: Option<&str>) -> Self {
        Self {
            fs_type,
            mount_point: mount_point.map(str::to_string),
            mount_by: None,
            label: None,
            mount_options: Vec::new(),
            subvolumes: Vec::new(),
            snapshots: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannedEncryption {
    pub method: EncryptionMethod,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pbkdf: Option<Pbkdf>,
    #[serde(skip)]
    pub password: Option<String>,
}

/// Existing device a planned device is mapped to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reuse {
    pub name: String,
    /// Create a new filesystem instead of keeping the current one
    pub reformat: bool,
}

/// Purpose of a planned partition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartitionRole {
    /// Required to boot the system
    Boot,
    /// Holds a volume directly
    Volume,
    MdMember(String),
    BtrfsMember(String),
    BcacheBacking(String),
    BcacheCaching(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannedPartition {
    /// Name used in logs and issues
    pub label: String,
    pub size: SizeRange,
    pub partition_id: PartitionId,
    /// Disk the partition must be created on
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disk: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encryption: Option<PlannedEncryption>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<Formatting>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reuse: Option<Reuse>,
    pub role: PartitionRole,
    /// Failure to create it aborts the attempt
    #[serde(default)]
    pub mandatory: bool,
}

impl PlannedPartition {
    pub fn new(label: &str, size: SizeRange, partition_id: PartitionId, role: PartitionRole) -> Self {
        Self {
            label: label.to_string(),
            size,
            partition_id,
            disk: None,
            encryption: None,
            format: None,
            reuse: None,
            role,
            mandatory: false,
        }
    }

    /// Whether the partition needs new space
    pub fn needs_space(&self) -> bool {
        self.reuse.is_none()
    }

    pub fn mount_point(&self) -> Option<&str> {
        self.format.as_ref().and_then(|f| f.mount_point.as_deref())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannedLv {
    pub lv_name: String,
    pub size: SizeRange,
    pub format: Formatting,
    /// Created inside the thin pool
    #[serde(default)]
    pub thin: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reuse: Option<Reuse>,
}

/// Thin pool planned inside a VG
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannedThinPool {
    pub name: String,
    pub size_percent: u8,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannedVg {
    pub vg_name: String,
    pub extent_size: DiskSize,
    pub lvs: Vec<PlannedLv>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pv_encryption: Option<PlannedEncryption>,
    /// Existing VG to extend and reuse
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reuse_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thin_pool: Option<PlannedThinPool>,
    /// Disks new PVs may be placed on, empty means any candidate
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub disks: Vec<String>,
}

impl PlannedVg {
    /// LVM metadata at the start of each PV
    pub const PV_OVERHEAD: DiskSize = DiskSize::mib(1);

    /// Space the LVs need, rounded to whole extents
    pub fn lvs_size(&self) -> SizeRange {
        let extent = self.extent_size;
        let mut min = DiskSize::zero();
        let mut desired = DiskSize::zero();
        let mut max = DiskSize::zero();
        let mut weight = 0;
        for lv in self.lvs.iter().filter(|lv| lv.reuse.is_none()) {
            if lv.thin {
                continue;
            }
            min += lv.size.min.ceil(extent);
            desired += lv.size.desired.ceil(extent);
            max += lv.size.max.ceil(extent);
            weight += lv.size.weight;
        }
        if let Some(pool) = &self.thin_pool {
            // Thin volumes draw from the pool; the pool sizes the demand
            let thin: Vec<&PlannedLv> = self.lvs.iter().filter(|lv| lv.thin).collect();
            let thin_min: DiskSize = thin.iter().map(|lv| lv.size.min.ceil(extent)).sum();
            let thin_desired: DiskSize = thin.iter().map(|lv| lv.size.desired.ceil(extent)).sum();
            let percent = pool.size_percent.max(1) as u64;
            min += thin_min.scale(100, percent).ceil(extent);
            desired += thin_desired.scale(100, percent).ceil(extent);
            max = DiskSize::unlimited();
            weight += thin.iter().map(|lv| lv.size.weight).sum::<u32>();
        }
        SizeRange::new(min, desired, max, weight)
    }
}

/// Physical volume space a VG still needs on the disks
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LvmDemand {
    pub vg_name: String,
    /// Space for the LVs, without PV metadata
    pub size: SizeRange,
    pub extent_size: DiskSize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encryption: Option<PlannedEncryption>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub disks: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannedMd {
    pub name: String,
    pub level: MdLevel,
    pub format: Formatting,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encryption: Option<PlannedEncryption>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannedBcache {
    pub name: String,
    pub cache_mode: CacheMode,
    pub format: Formatting,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encryption: Option<PlannedEncryption>,
}

impl LvmDemand {
    /// Space each new PV loses to LVM metadata and encryption headers
    pub fn pv_overhead(&self) -> DiskSize {
        PlannedVg::PV_OVERHEAD
            + self
                .encryption
                .as_ref()
                .map(|e| e.method.header_size())
                .unwrap_or_default()
    }
}

/// Btrfs spanning several member partitions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannedBtrfs {
    pub name: String,
    pub format: Formatting,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_raid_level: Option<BtrfsRaidLevel>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata_raid_level: Option<BtrfsRaidLevel>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub member_disks: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub member_size: Option<SizeRange>,
    /// Member device of an existing multi-device Btrfs to reuse
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reuse: Option<Reuse>,
}

/// Everything one attempt intends to put on the disks
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlannedDevices {
    pub partitions: Vec<PlannedPartition>,
    pub vgs: Vec<PlannedVg>,
    /// New physical volume space, one entry per VG needing it
    pub lvm: Vec<LvmDemand>,
    pub mds: Vec<PlannedMd>,
    pub bcaches: Vec<PlannedBcache>,
    pub btrfs: Vec<PlannedBtrfs>,
}

impl PlannedDevices {
    /// Partitions that need new space
    pub fn new_partitions(&self) -> Vec<&PlannedPartition> {
        self.partitions.iter().filter(|p| p.needs_space()).collect()
    }

    /// Names of existing devices the plan uses
    pub fn reused_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .partitions
            .iter()
            .filter_map(|p| p.reuse.as_ref().map(|r| r.name.clone()))
            .chain(
                self.vgs
                    .iter()
                    .flat_map(|vg| vg.lvs.iter().filter_map(|lv| lv.reuse.as_ref().map(|r| r.name.clone()))),
            )
            .chain(self.btrfs.iter().filter_map(|b| b.reuse.as_ref().map(|r| r.name.clone())))
            .collect();
        names.sort();
        names.dedup();
        names
    }

    pub fn reused_vgs(&self) -> Vec<&str> {
        self.vgs.iter().filter_map(|vg| vg.reuse_name.as_deref()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lv(name: &str, min: u64, desired: u64, thin: bool) -> PlannedLv {
        PlannedLv {
            lv_name: name.to_string(),
            size: SizeRange::new(DiskSize::gib(min), DiskSize::gib(desired), DiskSize::unlimited(), 1),
            format: Formatting::new(FsType::Ext4, Some("/")),
            thin,
            reuse: None,
        }
    }

    #[test]
    fn lv_demand_rounds_to_extents() {
        let mut vg = PlannedVg {
            vg_name: "system".to_string(),
            extent_size: DiskSize::mib(4),
            lvs: vec![lv("root", 10, 20, false)],
            pv_encryption: None,
            reuse_name: None,
            thin_pool: None,
            disks: Vec::new(),
        };
        vg.lvs[0].size.min = DiskSize::gib(10) + DiskSize::mib(1);
        let size = vg.lvs_size();
        assert_eq!(size.min, DiskSize::gib(10) + DiskSize::mib(4));
        assert_eq!(size.desired, DiskSize::gib(20));
    }

    #[test]
    fn thin_pool_demand_accounts_for_pool_percentage() {
        let vg = PlannedVg {
            vg_name: "system".to_string(),
            extent_size: DiskSize::mib(4),
            lvs: vec![lv("root", 40, 80, true), lv("home", 40, 120, true)],
            pv_encryption: None,
            reuse_name: None,
            thin_pool: Some(PlannedThinPool {
                name: "thinpool".to_string(),
                size_percent: 50,
            }),
            disks: Vec::new(),
        };
        let size = vg.lvs_size();
        assert_eq!(size.min, DiskSize::gib(160));
        assert!(size.max.is_unlimited());
    }
}
