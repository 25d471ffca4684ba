//! Device types stored in the device graph
//!
//! Every storage object is one variant of the closed [`Device`] enum.
//! Capability checks are plain matches on the variant.

use crate::utils::size::DiskSize;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable device id. Never reused inside one graph lineage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Sid(pub u32);

impl fmt::Display for Sid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartitionTableType {
    Gpt,
    Msdos,
    Dasd,
    /// FBA DASD: one implicit partition, no new partitions possible
    ImplicitDasd,
}

impl PartitionTableType {
    /// Maximum number of primary partitions
    pub fn max_primary(self) -> usize {
        match self {
            Self::Gpt => 128,
            Self::Msdos => 4,
            Self::Dasd => 3,
            Self::ImplicitDasd => 1,
        }
    }

    pub fn supports_extended(self) -> bool {
        matches!(self, Self::Msdos)
    }

    /// Whether partitions on this table carry a partition id
    pub fn supports_partition_ids(self) -> bool {
        !matches!(self, Self::Dasd | Self::ImplicitDasd)
    }

    /// Largest disk size the table can address
    pub fn max_disk_size(self) -> DiskSize {
        match self {
            Self::Msdos => DiskSize::tib(2),
            _ => DiskSize::unlimited(),
        }
    }

    /// Bytes reserved for the table at the start of the disk
    pub fn reserved_start(self) -> DiskSize {
        match self {
            Self::Gpt => DiskSize::b(34 * 512),
            Self::Msdos => DiskSize::b(512),
            Self::Dasd => DiskSize::kib(96),
            Self::ImplicitDasd => DiskSize::zero(),
        }
    }

    /// Bytes reserved for the table at the end of the disk (GPT backup header)
    pub fn reserved_end(self) -> DiskSize {
        match self {
            Self::Gpt => DiskSize::b(33 * 512),
            _ => DiskSize::zero(),
        }
    }
}

impl fmt::Display for PartitionTableType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Gpt => write!(f, "GPT"),
            Self::Msdos => write!(f, "MS-DOS"),
            Self::Dasd => write!(f, "DASD"),
            Self::ImplicitDasd => write!(f, "implicit"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PartitionType {
    #[default]
    Primary,
    Extended,
    Logical,
}

/// Partition ids, independent of the partition table flavour
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PartitionId {
    #[default]
    Linux,
    Swap,
    Lvm,
    Raid,
    Esp,
    BiosBoot,
    Prep,
    Ntfs,
    WindowsBasicData,
    Dos32,
    Extended,
    Unknown,
}

impl PartitionId {
    /// Ids used by Linux installations
    pub fn is_linux_system(self) -> bool {
        matches!(self, Self::Linux | Self::Swap | Self::Lvm | Self::Raid)
    }

    /// Ids used by Windows installations
    pub fn is_windows_system(self) -> bool {
        matches!(self, Self::Ntfs | Self::WindowsBasicData | Self::Dos32)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FsType {
    Ext2,
    Ext3,
    Ext4,
    Xfs,
    Btrfs,
    Swap,
    Vfat,
    Ntfs,
    Exfat,
    Nfs,
    Unknown,
}

impl FsType {
    pub fn is_linux_native(self) -> bool {
        matches!(
            self,
            Self::Ext2 | Self::Ext3 | Self::Ext4 | Self::Xfs | Self::Btrfs | Self::Swap
        )
    }

    pub fn is_network(self) -> bool {
        matches!(self, Self::Nfs)
    }

    pub fn supports_label(self) -> bool {
        !matches!(self, Self::Nfs | Self::Unknown)
    }

    pub fn supports_snapshots(self) -> bool {
        matches!(self, Self::Btrfs)
    }
}

impl fmt::Display for FsType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Ext2 => "ext2",
            Self::Ext3 => "ext3",
            Self::Ext4 => "ext4",
            Self::Xfs => "xfs",
            Self::Btrfs => "btrfs",
            Self::Swap => "swap",
            Self::Vfat => "vfat",
            Self::Ntfs => "ntfs",
            Self::Exfat => "exfat",
            Self::Nfs => "nfs",
            Self::Unknown => "unknown",
        };
        write!(f, "{}", name)
    }
}

/// How a filesystem is referenced in fstab
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MountBy {
    Device,
    Path,
    #[default]
    Uuid,
    Label,
    Id,
}

impl fmt::Display for MountBy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Device => write!(f, "device"),
            Self::Path => write!(f, "path"),
            Self::Uuid => write!(f, "uuid"),
            Self::Label => write!(f, "label"),
            Self::Id => write!(f, "id"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum EncryptionMethod {
    Luks1,
    #[default]
    Luks2,
    /// LUKS2 with the key sealed to the TPM
    TpmFde,
    /// LUKS2 backed by a CCA secure key (s390 pervasive encryption)
    PervasiveLuks2,
}

impl EncryptionMethod {
    /// Space taken by the on-disk header
    pub fn header_size(self) -> DiskSize {
        match self {
            Self::Luks1 => DiskSize::mib(2),
            _ => DiskSize::mib(16),
        }
    }
}

impl fmt::Display for EncryptionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Luks1 => write!(f, "LUKS1"),
            Self::Luks2 => write!(f, "LUKS2"),
            Self::TpmFde => write!(f, "TPM-backed LUKS2"),
            Self::PervasiveLuks2 => write!(f, "pervasive LUKS2"),
        }
    }
}

/// Key derivation function of a LUKS2 device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Pbkdf {
    Pbkdf2,
    Argon2i,
    Argon2id,
}

impl Pbkdf {
    /// GRUB2 can only unlock PBKDF2 key slots
    pub fn bootloader_can_unlock(self) -> bool {
        matches!(self, Self::Pbkdf2)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MdLevel {
    Raid0,
    Raid1,
    Raid5,
    Raid6,
    Raid10,
}

impl MdLevel {
    pub fn min_devices(self) -> usize {
        match self {
            Self::Raid0 | Self::Raid1 => 2,
            Self::Raid5 => 3,
            Self::Raid6 | Self::Raid10 => 4,
        }
    }

    /// Usable size of an array built from members of the given sizes
    pub fn array_size(self, members: &[DiskSize]) -> DiskSize {
        let Some(smallest) = members.iter().copied().min() else {
            return DiskSize::zero();
        };
        // Superblock and bitmap
        let smallest = smallest.saturating_sub(DiskSize::mib(1));
        let n = members.len() as u64;
        match self {
            Self::Raid0 => members
                .iter()
                .map(|s| s.saturating_sub(DiskSize::mib(1)))
                .sum(),
            Self::Raid1 => smallest,
            Self::Raid5 => smallest.scale(n.saturating_sub(1), 1),
            Self::Raid6 => smallest.scale(n.saturating_sub(2), 1),
            Self::Raid10 => smallest.scale(n, 2),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BtrfsRaidLevel {
    Single,
    Dup,
    Raid0,
    Raid1,
    Raid5,
    Raid6,
    Raid10,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LvType {
    #[default]
    Normal,
    ThinPool,
    Thin,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CacheMode {
    #[default]
    Writethrough,
    Writeback,
    Writearound,
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DasdType {
    Eckd,
    Fba,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DasdFormat {
    Cdl,
    Ldl,
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DasdInfo {
    #[serde(rename = "type")]
    pub dasd_type: DasdType,
    pub format: DasdFormat,
}

/// Byte range of a partition inside its disk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Region {
    pub start: DiskSize,
    pub length: DiskSize,
}

impl Region {
    pub fn new(start: DiskSize, length: DiskSize) -> Self {
        Self { start, length }
    }

    pub fn end(&self) -> DiskSize {
        self.start + self.length
    }

    pub fn contains(&self, other: &Region) -> bool {
        other.start >= self.start && other.end() <= self.end()
    }
}

/// Result of the (externally probed) resize check of a device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ResizeInfo {
    pub resize_ok: bool,
    pub min_size: DiskSize,
    pub max_size: DiskSize,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub reasons: Vec<String>,
}

impl ResizeInfo {
    pub fn not_resizable(reason: &str) -> Self {
        Self {
            resize_ok: false,
            min_size: DiskSize::zero(),
            max_size: DiskSize::zero(),
            reasons: vec![reason.to_string()],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Disk {
    pub name: String,
    pub size: DiskSize,
    pub block_size: u64,
    /// Alignment grain for new partitions
    pub grain: DiskSize,
    pub ptable: Option<PartitionTableType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dasd: Option<DasdInfo>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub udev_paths: Vec<String>,
}

impl Disk {
    pub fn new(name: &str, size: DiskSize) -> Self {
        Self {
            name: name.to_string(),
            size,
            block_size: 512,
            grain: DiskSize::mib(1),
            ptable: None,
            dasd: None,
            udev_paths: Vec::new(),
        }
    }

    /// Table type used when a new partition table has to be created
    pub fn preferred_ptable_type(&self) -> PartitionTableType {
        match self.dasd {
            Some(DasdInfo {
                dasd_type: DasdType::Eckd,
                ..
            }) => PartitionTableType::Dasd,
            Some(DasdInfo {
                dasd_type: DasdType::Fba,
                ..
            }) => PartitionTableType::ImplicitDasd,
            None => PartitionTableType::Gpt,
        }
    }

    pub fn is_dasd(&self) -> bool {
        self.dasd.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Partition {
    pub name: String,
    pub number: u32,
    pub region: Region,
    pub id: PartitionId,
    #[serde(rename = "partition_type")]
    pub kind: PartitionType,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub udev_paths: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resize_info: Option<ResizeInfo>,
}

impl Partition {
    pub fn size(&self) -> DiskSize {
        self.region.length
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Md {
    pub name: String,
    pub level: MdLevel,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct LvmPv {}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LvmVg {
    pub vg_name: String,
    pub extent_size: DiskSize,
}

impl LvmVg {
    pub fn name(&self) -> String {
        format!("/dev/{}", self.vg_name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LvmLv {
    pub name: String,
    pub lv_name: String,
    pub size: DiskSize,
    #[serde(default)]
    pub lv_type: LvType,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bcache {
    pub name: String,
    #[serde(default)]
    pub cache_mode: CacheMode,
}

/// Usage of a pervasive-encryption secure key by an encryption device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecureKeyUse {
    pub key_name: String,
    /// The key does not exist yet and must be generated at commit time
    pub generate: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Encryption {
    pub name: String,
    pub dm_name: String,
    pub method: EncryptionMethod,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pbkdf: Option<Pbkdf>,
    #[serde(skip)]
    pub password: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secure_key: Option<SecureKeyUse>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subvolume {
    pub path: String,
    #[serde(default)]
    pub nocow: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Filesystem {
    pub fs_type: FsType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uuid: Option<String>,
    /// Content inspection found a Windows installation
    #[serde(default)]
    pub windows_system: bool,
    /// Content inspection found Raspberry Pi firmware files
    #[serde(default)]
    pub rpi_firmware: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_raid_level: Option<BtrfsRaidLevel>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata_raid_level: Option<BtrfsRaidLevel>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub subvolumes: Vec<Subvolume>,
    #[serde(default)]
    pub snapshots: bool,
}

impl Filesystem {
    pub fn new(fs_type: FsType) -> Self {
        Self {
            fs_type,
            label: None,
            uuid: None,
            windows_system: false,
            rpi_firmware: false,
            data_raid_level: None,
            metadata_raid_level: None,
            subvolumes: Vec::new(),
            snapshots: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MountPoint {
    pub path: String,
    pub mount_by: MountBy,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceKind {
    Disk,
    Partition,
    Md,
    LvmPv,
    LvmVg,
    LvmLv,
    Bcache,
    Encryption,
    Filesystem,
    MountPoint,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Device {
    Disk(Disk),
    Partition(Partition),
    Md(Md),
    LvmPv(LvmPv),
    LvmVg(LvmVg),
    LvmLv(LvmLv),
    Bcache(Bcache),
    Encryption(Encryption),
    Filesystem(Filesystem),
    MountPoint(MountPoint),
}

impl Device {
    pub fn kind(&self) -> DeviceKind {
        match self {
            Self::Disk(_) => DeviceKind::Disk,
            Self::Partition(_) => DeviceKind::Partition,
            Self::Md(_) => DeviceKind::Md,
            Self::LvmPv(_) => DeviceKind::LvmPv,
            Self::LvmVg(_) => DeviceKind::LvmVg,
            Self::LvmLv(_) => DeviceKind::LvmLv,
            Self::Bcache(_) => DeviceKind::Bcache,
            Self::Encryption(_) => DeviceKind::Encryption,
            Self::Filesystem(_) => DeviceKind::Filesystem,
            Self::MountPoint(_) => DeviceKind::MountPoint,
        }
    }

    /// Kernel-style name, for devices that have one
    pub fn name(&self) -> Option<String> {
        match self {
            Self::Disk(d) => Some(d.name.clone()),
            Self::Partition(p) => Some(p.name.clone()),
            Self::Md(m) => Some(m.name.clone()),
            Self::LvmVg(vg) => Some(vg.name()),
            Self::LvmLv(lv) => Some(lv.name.clone()),
            Self::Bcache(b) => Some(b.name.clone()),
            Self::Encryption(e) => Some(e.name.clone()),
            Self::LvmPv(_) | Self::Filesystem(_) | Self::MountPoint(_) => None,
        }
    }

    /// Devices that can hold a filesystem, an encryption layer or a PV
    pub fn is_blk_device(&self) -> bool {
        matches!(
            self,
            Self::Disk(_)
                | Self::Partition(_)
                | Self::Md(_)
                | Self::LvmLv(_)
                | Self::Bcache(_)
                | Self::Encryption(_)
        )
    }

    pub fn as_disk(&self) -> Option<&Disk> {
        match self {
            Self::Disk(d) => Some(d),
            _ => None,
        }
    }

    pub fn as_partition(&self) -> Option<&Partition> {
        match self {
            Self::Partition(p) => Some(p),
            _ => None,
        }
    }

    pub fn as_partition_mut(&mut self) -> Option<&mut Partition> {
        match self {
            Self::Partition(p) => Some(p),
            _ => None,
        }
    }

    pub fn as_vg(&self) -> Option<&LvmVg> {
        match self {
            Self::LvmVg(vg) => Some(vg),
            _ => None,
        }
    }

    pub fn as_lv(&self) -> Option<&LvmLv> {
        match self {
            Self::LvmLv(lv) => Some(lv),
            _ => None,
        }
    }

    pub fn as_md(&self) -> Option<&Md> {
        match self {
            Self::Md(md) => Some(md),
            _ => None,
        }
    }

    pub fn as_encryption(&self) -> Option<&Encryption> {
        match self {
            Self::Encryption(e) => Some(e),
            _ => None,
        }
    }

    pub fn as_filesystem(&self) -> Option<&Filesystem> {
        match self {
            Self::Filesystem(fs) => Some(fs),
            _ => None,
        }
    }

    pub fn as_filesystem_mut(&mut self) -> Option<&mut Filesystem> {
        match self {
            Self::Filesystem(fs) => Some(fs),
            _ => None,
        }
    }

    pub fn as_mount_point(&self) -> Option<&MountPoint> {
        match self {
            Self::MountPoint(mp) => Some(mp),
            _ => None,
        }
    }
}

/// Device name of a partition, e.g. /dev/sda -> /dev/sda3, /dev/nvme0n1 -> /dev/nvme0n1p3
pub fn partition_name(disk_name: &str, number: u32) -> String {
    let ends_with_digit = disk_name
        .chars()
        .last()
        .map(|c| c.is_ascii_digit())
        .unwrap_or(false);
    if ends_with_digit {
        format!("{}p{}", disk_name, number)
    } else {
        format!("{}{}", disk_name, number)
    }
}

/// Basename of a device name, /dev/sda2 -> sda2
pub fn basename(name: &str) -> &str {
    name.rsplit('/').next().unwrap_or(name)
}

/// Default grain for partition alignment
pub const DEFAULT_GRAIN: DiskSize = DiskSize::mib(1);
