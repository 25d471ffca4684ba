//! Declarative description of a probed system
//!
//! A [`DevicesFixture`] is the `[devices]` table of a scenario file. It lists
//! disks with their partitions and the higher level devices (volume groups,
//! RAIDs, multi-device Btrfs) built on top of them.

use crate::devicegraph::device::*;
use crate::devicegraph::graph::DeviceGraph;
use crate::utils::error::{Result, ScenarioError};
use crate::utils::size::DiskSize;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DevicesFixture {
    #[serde(default)]
    pub disks: Vec<DiskFixture>,
    #[serde(default)]
    pub vgs: Vec<VgFixture>,
    #[serde(default)]
    pub mds: Vec<MdFixture>,
    /// Multi-device Btrfs filesystems, members reference them by name
    #[serde(default)]
    pub btrfs: Vec<BtrfsFixture>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiskFixture {
    pub name: String,
    pub size: DiskSize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ptable: Option<PartitionTableType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grain: Option<DiskSize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dasd: Option<DasdInfo>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub udev_paths: Vec<String>,
    /// Content written directly on the disk
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filesystem: Option<FsFixture>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub partitions: Vec<PartitionFixture>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartitionFixture {
    pub size: DiskSize,
    /// Defaults to right after the previous partition
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<DiskSize>,
    #[serde(default)]
    pub id: PartitionId,
    #[serde(default, rename = "type")]
    pub kind: PartitionType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resize: Option<ResizeFixture>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encryption: Option<EncryptionFixture>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filesystem: Option<FsFixture>,
    /// Name of the volume group this partition is a PV of
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pv: Option<String>,
    /// Name of the MD RAID this partition is a member of
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub md: Option<String>,
    /// Name of the multi-device Btrfs this partition belongs to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub btrfs: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResizeFixture {
    #[serde(default = "default_true")]
    pub resize_ok: bool,
    pub min_size: DiskSize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_size: Option<DiskSize>,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncryptionFixture {
    #[serde(default)]
    pub method: EncryptionMethod,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dm_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pbkdf: Option<Pbkdf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FsFixture {
    #[serde(rename = "type")]
    pub fs_type: FsType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uuid: Option<String>,
    #[serde(default)]
    pub windows_system: bool,
    #[serde(default)]
    pub rpi_firmware: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mount_point: Option<String>,
}

impl FsFixture {
    fn to_filesystem(&self) -> Filesystem {
        let mut fs = Filesystem::new(self.fs_type);
        fs.label = self.label.clone();
        fs.uuid = self.uuid.clone();
        fs.windows_system = self.windows_system;
        fs.rpi_firmware = self.rpi_firmware;
        fs
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VgFixture {
    pub name: String,
    #[serde(default = "default_extent")]
    pub extent_size: DiskSize,
    #[serde(default)]
    pub lvs: Vec<LvFixture>,
}

fn default_extent() -> DiskSize {
    DiskSize::mib(4)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LvFixture {
    pub name: String,
    pub size: DiskSize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filesystem: Option<FsFixture>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MdFixture {
    pub name: String,
    pub level: MdLevel,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filesystem: Option<FsFixture>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BtrfsFixture {
    pub name: String,
    pub data_raid_level: BtrfsRaidLevel,
    pub metadata_raid_level: BtrfsRaidLevel,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uuid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mount_point: Option<String>,
}

/// Members collected while walking the disks
#[derive(Default)]
struct Members {
    pvs: BTreeMap<String, Vec<Sid>>,
    mds: BTreeMap<String, Vec<Sid>>,
    btrfs: BTreeMap<String, Vec<Sid>>,
}

impl DeviceGraph {
    /// Build a probed graph from its declarative description
    pub fn from_fixture(fixture: &DevicesFixture) -> Result<Self> {
        let mut graph = DeviceGraph::new();
        let mut members = Members::default();

        for disk in &fixture.disks {
            add_disk(&mut graph, disk, &mut members)?;
        }

        for md in &fixture.mds {
            let parts = members.mds.remove(&md.name).unwrap_or_default();
            if parts.len() < md.level.min_devices() {
                return Err(ScenarioError::Devices(format!(
                    "RAID {} needs at least {} members, {} given",
                    md.name,
                    md.level.min_devices(),
                    parts.len()
                )).into());
            }
            let sid = graph.create_md(
                Md {
                    name: md.name.clone(),
                    level: md.level,
                },
                &parts,
            )?;
            if let Some(fs) = &md.filesystem {
                add_filesystem(&mut graph, &[sid], fs)?;
            }
        }

        for vg in &fixture.vgs {
            let pvs = members.pvs.remove(&vg.name).unwrap_or_default();
            if pvs.is_empty() {
                return Err(ScenarioError::Devices(format!(
                    "volume group {} has no physical volumes",
                    vg.name
                )).into());
            }
            let vg_sid = graph.create_vg(
                LvmVg {
                    vg_name: vg.name.clone(),
                    extent_size: vg.extent_size,
                },
                &pvs,
            )?;
            for lv in &vg.lvs {
                let lv_sid = graph.create_lv(
                    vg_sid,
                    LvmLv {
                        name: format!("/dev/{}/{}", vg.name, lv.name),
                        lv_name: lv.name.clone(),
                        size: lv.size,
                        lv_type: LvType::Normal,
                    },
                )?;
                if let Some(fs) = &lv.filesystem {
                    add_filesystem(&mut graph, &[lv_sid], fs)?;
                }
            }
        }

        for btrfs in &fixture.btrfs {
            let blks = members.btrfs.remove(&btrfs.name).unwrap_or_default();
            if blks.is_empty() {
                return Err(ScenarioError::Devices(format!(
                    "Btrfs {} has no member devices",
                    btrfs.name
                )).into());
            }
            let mut fs = Filesystem::new(FsType::Btrfs);
            fs.label = btrfs.label.clone();
            fs.uuid = btrfs.uuid.clone();
            fs.data_raid_level = Some(btrfs.data_raid_level);
            fs.metadata_raid_level = Some(btrfs.metadata_raid_level);
            let sid = graph.create_filesystem(&blks, fs)?;
            if let Some(path) = &btrfs.mount_point {
                graph.set_mount_point(sid, mount_point(path))?;
            }
        }

        let dangling: Vec<&String> = members
            .pvs
            .keys()
            .chain(members.mds.keys())
            .chain(members.btrfs.keys())
            .collect();
        if let Some(name) = dangling.first() {
            return Err(ScenarioError::Devices(format!(
                "{} is referenced by partitions but never defined",
                name
            )).into());
        }

        Ok(graph)
    }
}

fn mount_point(path: &str) -> MountPoint {
    MountPoint {
        path: path.to_string(),
        mount_by: MountBy::Uuid,
        options: Vec::new(),
    }
}

fn add_filesystem(graph: &mut DeviceGraph, blks: &[Sid], fixture: &FsFixture) -> Result<Sid> {
    let sid = graph.create_filesystem(blks, fixture.to_filesystem())?;
    if let Some(path) = &fixture.mount_point {
        graph.set_mount_point(sid, mount_point(path))?;
    }
    Ok(sid)
}

fn add_disk(graph: &mut DeviceGraph, fixture: &DiskFixture, members: &mut Members) -> Result<()> {
    let mut disk = Disk::new(&fixture.name, fixture.size);
    disk.ptable = fixture.ptable;
    disk.dasd = fixture.dasd;
    disk.udev_paths = fixture.udev_paths.clone();
    if let Some(grain) = fixture.grain {
        disk.grain = grain;
    }
    let grain = disk.grain;
    let sid = graph.add(Device::Disk(disk));

    if let Some(fs) = &fixture.filesystem {
        if fixture.ptable.is_some() || !fixture.partitions.is_empty() {
            return Err(ScenarioError::Devices(format!(
                "{} cannot have both a partition table and a filesystem",
                fixture.name
            )).into());
        }
        add_filesystem(graph, &[sid], fs)?;
        return Ok(());
    }

    if fixture.partitions.is_empty() {
        return Ok(());
    }
    let ptable = fixture.ptable.ok_or_else(|| {
        ScenarioError::Devices(format!("{} has partitions but no partition table", fixture.name))
    })?;

    let mut cursor = ptable.reserved_start().ceil(grain).max(grain);
    let mut extended: Option<Region> = None;
    let mut logical_cursor = DiskSize::zero();

    for part in &fixture.partitions {
        let start = match (part.start, part.kind) {
            (Some(start), _) => start,
            (None, PartitionType::Logical) => {
                let ext = extended.ok_or_else(|| {
                    ScenarioError::Devices(format!(
                        "logical partition on {} without extended partition",
                        fixture.name
                    ))
                })?;
                logical_cursor.max(ext.start) + grain
            }
            (None, _) => cursor,
        };
        let region = Region::new(start, part.size);
        if region.end() > fixture.size {
            return Err(ScenarioError::Devices(format!(
                "partition at {} exceeds the size of {}",
                start, fixture.name
            )).into());
        }

        let id = if part.kind == PartitionType::Extended {
            PartitionId::Extended
        } else {
            part.id
        };
        let psid = graph.create_partition(sid, region, id, part.kind)?;

        match part.kind {
            PartitionType::Extended => {
                extended = Some(region);
                logical_cursor = region.start;
                cursor = region.end();
            }
            PartitionType::Logical => logical_cursor = region.end(),
            PartitionType::Primary => cursor = cursor.max(region.end()),
        }

        if let Some(resize) = &part.resize {
            if let Some(p) = graph.device_mut(psid).and_then(|d| d.as_partition_mut()) {
                p.resize_info = Some(ResizeInfo {
                    resize_ok: resize.resize_ok,
                    min_size: resize.min_size,
                    max_size: resize.max_size.unwrap_or(part.size),
                    reasons: Vec::new(),
                });
            }
        }

        let mut blk = psid;
        if let Some(enc) = &part.encryption {
            let dm_name = enc
                .dm_name
                .clone()
                .unwrap_or_else(|| format!("cr_{}", basename(&graph.display_name(psid))));
            blk = graph.create_encryption(
                psid,
                Encryption {
                    name: format!("/dev/mapper/{}", dm_name),
                    dm_name,
                    method: enc.method,
                    pbkdf: enc.pbkdf,
                    password: None,
                    secure_key: None,
                },
            )?;
        }

        if let Some(vg) = &part.pv {
            let pv = graph.create_pv(blk)?;
            members.pvs.entry(vg.clone()).or_default().push(pv);
        } else if let Some(md) = &part.md {
            members.mds.entry(md.clone()).or_default().push(blk);
        } else if let Some(btrfs) = &part.btrfs {
            members.btrfs.entry(btrfs.clone()).or_default().push(blk);
        } else if let Some(fs) = &part.filesystem {
            add_filesystem(graph, &[blk], fs)?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const FIXTURE: &str = r#"
[[disks]]
name = "/dev/sda"
size = "100 GiB"
ptable = "gpt"
udev_paths = ["pci-0000:00:1f.2-ata-1"]

[[disks.partitions]]
size = "500 MiB"
id = "esp"
filesystem = { type = "vfat" }

[[disks.partitions]]
size = "40 GiB"
id = "ntfs"
resize = { min_size = "20 GiB" }
filesystem = { type = "ntfs", windows_system = true }

[[disks.partitions]]
size = "20 GiB"
id = "lvm"
pv = "system"

[[vgs]]
name = "system"

[[vgs.lvs]]
name = "root"
size = "15 GiB"
filesystem = { type = "ext4", mount_point = "/" }
"#;

    #[test]
    fn builds_partitions_in_order() {
        let fixture: DevicesFixture = toml::from_str(FIXTURE).unwrap();
        let graph = DeviceGraph::from_fixture(&fixture).unwrap();

        let sda = graph.find_by_name("/dev/sda").unwrap();
        let parts = graph.partitions(sda);
        assert_eq!(parts.len(), 3);

        let ntfs = graph.partition(parts[1]).unwrap();
        assert_eq!(ntfs.region.start, DiskSize::mib(501));
        assert_eq!(ntfs.udev_paths, vec!["pci-0000:00:1f.2-ata-1-part2".to_string()]);
        assert!(graph.detect_resize_info(parts[1]).resize_ok);

        let vg = graph.find_vg("system").unwrap();
        let root = graph.find_by_name("/dev/system/root").unwrap();
        assert_eq!(graph.parents(root), vec![vg]);
        let fs = graph.filesystem_of(root).unwrap();
        assert!(graph.mount_point_of(fs).is_some());
    }

    #[test]
    fn multi_device_btrfs_has_all_members_as_parents() {
        let toml_str = r#"
[[disks]]
name = "/dev/sda"
size = "50 GiB"
ptable = "gpt"
partitions = [{ size = "20 GiB", btrfs = "data" }]

[[disks]]
name = "/dev/sdb"
size = "50 GiB"
ptable = "gpt"
partitions = [{ size = "20 GiB", btrfs = "data" }]

[[btrfs]]
name = "data"
data_raid_level = "raid1"
metadata_raid_level = "raid1"
"#;
        let fixture: DevicesFixture = toml::from_str(toml_str).unwrap();
        let graph = DeviceGraph::from_fixture(&fixture).unwrap();
        let fs = graph.filesystems()[0];
        assert_eq!(graph.blk_devices_of(fs).len(), 2);
    }

    #[test]
    fn undefined_vg_is_rejected() {
        let toml_str = r#"
[[disks]]
name = "/dev/sda"
size = "50 GiB"
ptable = "gpt"
partitions = [{ size = "20 GiB", pv = "missing" }]
"#;
        let fixture: DevicesFixture = toml::from_str(toml_str).unwrap();
        assert!(DeviceGraph::from_fixture(&fixture).is_err());
    }
}
