//! Facts about the planned system that drive the boot requirements

use crate::devicegraph::device::*;
use crate::devicegraph::graph::DeviceGraph;
use crate::proposal::facts::SystemFacts;
use crate::proposal::settings::ProposalSettings;
use crate::utils::error::BootRequirementsError;
use crate::utils::size::DiskSize;
use tracing::debug;

/// How the root filesystem is going to be set up
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedRoot {
    pub fs_type: FsType,
    pub lvm: bool,
    pub encryption: Option<EncryptionMethod>,
    pub pbkdf: Option<Pbkdf>,
    pub raid_level: Option<MdLevel>,
}

impl PlannedRoot {
    /// The bootloader has to read the kernel from an encrypted device it cannot unlock
    pub fn bootloader_locked_out(&self) -> bool {
        match (self.encryption, self.pbkdf) {
            (Some(EncryptionMethod::Luks1), _) | (None, _) | (Some(_), None) => false,
            (Some(_), Some(pbkdf)) => !pbkdf.bootloader_can_unlock(),
        }
    }

    /// Software RAID the bootloader cannot read from
    pub fn unreadable_raid(&self) -> bool {
        matches!(self.raid_level, Some(level) if level != MdLevel::Raid1)
    }
}

#[derive(Debug, Clone)]
pub struct BootAnalyzer<'a> {
    pub graph: &'a DeviceGraph,
    pub settings: &'a ProposalSettings,
    pub facts: &'a SystemFacts,
    pub boot_disk: Sid,
    pub root: Option<PlannedRoot>,
}

impl<'a> BootAnalyzer<'a> {
    pub fn new(
        graph: &'a DeviceGraph,
        settings: &'a ProposalSettings,
        facts: &'a SystemFacts,
    ) -> Result<Self, BootRequirementsError> {
        let boot_disk = find_boot_disk(graph, settings).ok_or(BootRequirementsError::NoBootDisk)?;
        debug!("Boot disk: {}", graph.display_name(boot_disk));
        Ok(Self {
            graph,
            settings,
            facts,
            boot_disk,
            root: planned_root(settings),
        })
    }

    pub fn boot_disk_name(&self) -> String {
        self.graph.display_name(self.boot_disk)
    }

    pub fn boot_disk(&self) -> Option<&Disk> {
        self.graph.disk(self.boot_disk)
    }

    /// Partition table the boot disk has, or will get
    pub fn boot_ptable(&self) -> Option<PartitionTableType> {
        let disk = self.boot_disk()?;
        disk.ptable.or_else(|| {
            Some(
                self.settings
                    .ptable_type
                    .filter(|_| !disk.is_dasd())
                    .unwrap_or_else(|| disk.preferred_ptable_type()),
            )
        })
    }

    pub fn root_in_lvm(&self) -> bool {
        self.root.as_ref().map(|r| r.lvm).unwrap_or(false)
    }

    pub fn root_fs_type(&self) -> Option<FsType> {
        self.root.as_ref().map(|r| r.fs_type)
    }

    /// The user asked for a separate /boot
    pub fn boot_planned(&self) -> bool {
        self.settings
            .proposed_volumes()
            .any(|v| v.mount_point == "/boot")
    }

    /// Bytes before the first partition of the boot disk
    pub fn mbr_gap(&self) -> Option<DiskSize> {
        let disk = self.boot_disk()?;
        let first = self
            .graph
            .partitions(self.boot_disk)
            .into_iter()
            .filter_map(|p| self.graph.partition(p))
            .map(|p| p.region.start)
            .min();
        Some(first.unwrap_or(disk.grain))
    }
}

/// `root_device` setting, else the disk of the root volume, else the first candidate
fn find_boot_disk(graph: &DeviceGraph, settings: &ProposalSettings) -> Option<Sid> {
    let by_name = |name: &str| graph.find_by_name(name).filter(|sid| graph.disk(*sid).is_some());

    if let Some(sid) = settings.root_device.as_deref().and_then(by_name) {
        return Some(sid);
    }
    if let Some(sid) = settings
        .root_volume()
        .and_then(|v| v.device.as_deref())
        .and_then(by_name)
    {
        return Some(sid);
    }
    if settings.candidate_devices.is_empty() {
        graph.disks().into_iter().next()
    } else {
        settings
            .candidate_devices
            .iter()
            .find_map(|name| by_name(name.as_str()))
    }
}

fn planned_root(settings: &ProposalSettings) -> Option<PlannedRoot> {
    let root = settings.root_volume()?;
    let separate_vg = settings.separate_vgs && root.separate_vg_name.is_some();
    let composite = root.raid.is_some() || root.btrfs.is_some() || root.bcache.is_some();
    Some(PlannedRoot {
        fs_type: root.fs_type,
        lvm: (settings.lvm || separate_vg) && !composite,
        encryption: settings
            .encrypt(root)
            .then_some(settings.encryption_method),
        pbkdf: settings.encryption_pbkdf,
        raid_level: root.raid.as_ref().map(|r| r.level),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn argon2_on_luks2_locks_out_the_bootloader() {
        let mut root = PlannedRoot {
            fs_type: FsType::Btrfs,
            lvm: false,
            encryption: Some(EncryptionMethod::Luks2),
            pbkdf: Some(Pbkdf::Argon2id),
            raid_level: None,
        };
        assert!(root.bootloader_locked_out());
        root.pbkdf = Some(Pbkdf::Pbkdf2);
        assert!(!root.bootloader_locked_out());
        root.encryption = Some(EncryptionMethod::Luks1);
        root.pbkdf = Some(Pbkdf::Argon2i);
        assert!(!root.bootloader_locked_out());
    }

    #[test]
    fn raid1_root_is_readable() {
        let mut root = PlannedRoot {
            fs_type: FsType::Ext4,
            lvm: false,
            encryption: None,
            pbkdf: None,
            raid_level: Some(MdLevel::Raid1),
        };
        assert!(!root.unreadable_raid());
        root.raid_level = Some(MdLevel::Raid5);
        assert!(root.unreadable_raid());
    }

    #[test]
    fn root_device_setting_wins() {
        let mut graph = DeviceGraph::new();
        graph.add(Device::Disk(Disk::new("/dev/sda", DiskSize::gib(10))));
        let sdb = graph.add(Device::Disk(Disk::new("/dev/sdb", DiskSize::gib(10))));
        let settings = ProposalSettings {
            root_device: Some("/dev/sdb".to_string()),
            ..ProposalSettings::default()
        };
        let facts = SystemFacts::default();
        let analyzer = BootAnalyzer::new(&graph, &settings, &facts).unwrap();
        assert_eq!(analyzer.boot_disk, sdb);
    }

    #[test]
    fn no_disk_is_an_error() {
        let graph = DeviceGraph::new();
        let settings = ProposalSettings::default();
        let facts = SystemFacts::default();
        assert_eq!(
            BootAnalyzer::new(&graph, &settings, &facts).unwrap_err(),
            BootRequirementsError::NoBootDisk
        );
    }
}
