//! Turning volume specifications and boot requirements into planned devices

use crate::boot::BootRequirement;
use crate::devicegraph::device::*;
use crate::devicegraph::graph::DeviceGraph;
use crate::proposal::facts::SystemFacts;
use crate::proposal::issues::{Issue, IssuesList};
use crate::proposal::settings::{ProposalSettings, SwapReuse};
use crate::space::distributor::SizeRange;
use crate::space::maker::candidate_disks;
use crate::utils::size::DiskSize;
use crate::volumes::planned::*;
use crate::volumes::spec::{group_by_vg, VolumeSpecification};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use tracing::{debug, info};

/// Which size of each volume an attempt aims for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetSize {
    /// Every volume needs at least its desired size
    Desired,
    /// Every volume needs only its minimum size
    Min,
}

impl TargetSize {
    pub fn apply(self, range: SizeRange) -> SizeRange {
        match self {
            Self::Desired => SizeRange::new(range.desired, range.desired, range.max, range.weight),
            Self::Min => range,
        }
    }
}

impl fmt::Display for TargetSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Desired => write!(f, "desired"),
            Self::Min => write!(f, "min"),
        }
    }
}

/// Where a volume ends up
#[derive(Debug, Clone, PartialEq, Eq)]
enum Placement {
    Partition,
    Vg(String),
}

#[derive(Debug, Clone, Default)]
pub struct Plan {
    pub devices: PlannedDevices,
    pub issues: IssuesList,
}

pub struct DevicesPlanner<'a> {
    settings: &'a ProposalSettings,
    facts: &'a SystemFacts,
    graph: &'a DeviceGraph,
}

/// Number of members whose space holds data, for sizing members of an array
fn md_data_devices(level: MdLevel, members: usize) -> u64 {
    let n = members as u64;
    match level {
        MdLevel::Raid0 => n,
        MdLevel::Raid1 => 1,
        MdLevel::Raid5 => n.saturating_sub(1),
        MdLevel::Raid6 => n.saturating_sub(2),
        MdLevel::Raid10 => n / 2,
    }
    .max(1)
}

fn btrfs_data_devices(level: BtrfsRaidLevel, members: usize) -> u64 {
    let n = members as u64;
    match level {
        BtrfsRaidLevel::Single | BtrfsRaidLevel::Raid0 => n,
        BtrfsRaidLevel::Dup | BtrfsRaidLevel::Raid1 => 1,
        BtrfsRaidLevel::Raid5 => n.saturating_sub(1),
        BtrfsRaidLevel::Raid6 => n.saturating_sub(2),
        BtrfsRaidLevel::Raid10 => n / 2,
    }
    .max(1)
}

/// Share of a size each member has to provide, plus room for metadata
fn per_member(size: DiskSize, data_devices: u64) -> DiskSize {
    if size.is_unlimited() {
        return size;
    }
    (size + DiskSize::b(data_devices - 1)).scale(1, data_devices) + DiskSize::mib(1)
}

fn member_range(range: SizeRange, data_devices: u64) -> SizeRange {
    SizeRange::new(
        per_member(range.min, data_devices),
        per_member(range.desired, data_devices),
        per_member(range.max, data_devices),
        range.weight,
    )
}

impl<'a> DevicesPlanner<'a> {
    pub fn new(settings: &'a ProposalSettings, facts: &'a SystemFacts, graph: &'a DeviceGraph) -> Self {
        Self {
            settings,
            facts,
            graph,
        }
    }

    /// Sizes of a volume after snapshots and RAM adjustments
    pub fn size_range(&self, volume: &VolumeSpecification, on_lvm: bool) -> SizeRange {
        let mut min = volume.min_size;
        let mut desired = volume.desired_size;
        let mut max = match (on_lvm, volume.max_size_lvm) {
            (true, Some(lvm_max)) => lvm_max,
            _ => volume.max_size,
        };
        if volume.snapshots_active() && volume.snapshots_percentage > 0 {
            let factor = 100 + volume.snapshots_percentage as u64;
            let grow = |size: DiskSize| {
                if size.is_unlimited() {
                    size
                } else {
                    size.scale(factor, 100)
                }
            };
            min = grow(min);
            desired = grow(desired);
            max = grow(max);
        }
        if volume.adjust_by_ram {
            let ram = self.facts.ram_size;
            min = min.max(ram);
            desired = desired.max(ram);
            max = max.max(ram);
        }
        SizeRange::new(min, desired, max, volume.weight)
    }

    fn formatting(&self, volume: &VolumeSpecification) -> Formatting {
        let mut format = Formatting::new(volume.fs_type, Some(&volume.mount_point));
        format.label = volume.label.clone();
        format.mount_options = volume.mount_options.clone();
        if volume.fs_type == FsType::Btrfs {
            format.subvolumes = volume.subvolumes.clone();
            format.snapshots = volume.snapshots_active();
        }
        format
    }

    fn encryption(&self) -> PlannedEncryption {
        PlannedEncryption {
            method: self.settings.encryption_method,
            pbkdf: self.settings.encryption_pbkdf,
            password: self.settings.encryption_password.clone(),
        }
    }

    fn volume_encryption(&self, volume: &VolumeSpecification) -> Option<PlannedEncryption> {
        self.settings.encrypt(volume).then(|| self.encryption())
    }

    fn boot_partition(&self, req: &BootRequirement, target: TargetSize) -> PlannedPartition {
        let range = SizeRange::new(req.min_size, req.desired_size, req.max_size, req.weight);
        let label = req
            .mount_point
            .clone()
            .unwrap_or_else(|| format!("{:?} partition", req.partition_id));
        let mut partition = PlannedPartition::new(&label, target.apply(range), req.partition_id, PartitionRole::Boot);
        partition.disk = req.disk.clone();
        partition.mandatory = true;
        partition.format = req
            .fs_type
            .map(|fs| Formatting::new(fs, req.mount_point.as_deref()));
        if let Some(name) = &req.reuse_device_name {
            partition.size = SizeRange::fixed(self.existing_size(name));
            partition.reuse = Some(Reuse {
                name: name.clone(),
                reformat: false,
            });
        }
        partition
    }

    fn existing_size(&self, name: &str) -> DiskSize {
        self.graph
            .find_by_name(name)
            .map(|sid| self.graph.blk_size(sid))
            .unwrap_or_default()
    }

    /// Existing swap partition matching the volume, closest to the desired size
    fn reusable_swap(&self, range: &SizeRange) -> Option<(String, DiskSize)> {
        let candidates = match self.settings.swap_reuse {
            SwapReuse::None => return None,
            SwapReuse::Candidate => Some(candidate_disks(self.graph, self.settings)),
            SwapReuse::Any => None,
        };
        let distance = |size: DiskSize| {
            if size > range.desired {
                size - range.desired
            } else {
                range.desired - size
            }
        };
        self.graph
            .swap_filesystems()
            .into_iter()
            .flat_map(|fs| self.graph.blk_devices_of(fs))
            .filter(|blk| self.graph.partition(*blk).is_some())
            .filter(|blk| match &candidates {
                Some(disks) => self
                    .graph
                    .disk_of(*blk)
                    .map(|d| disks.contains(&d))
                    .unwrap_or(false),
                None => true,
            })
            .map(|blk| (blk, self.graph.blk_size(blk)))
            .filter(|(_, size)| *size >= range.min && *size <= range.max)
            .min_by_key(|(blk, size)| (distance(*size), *blk))
            .map(|(blk, size)| (self.graph.display_name(blk), size))
    }

    /// VG holding an existing logical volume
    fn vg_of_lv(&self, name: &str) -> Option<String> {
        let sid = self.graph.find_by_name(name)?;
        self.graph.device(sid)?.as_lv()?;
        self.graph
            .ancestors(sid)
            .into_iter()
            .find_map(|a| self.graph.device(a).and_then(|d| d.as_vg()).map(|vg| vg.vg_name.clone()))
    }

    /// Decide where each volume goes; mixed-affinity separate VG members fall back
    fn placements(
        &self,
        volumes: &[VolumeSpecification],
        issues: &mut IssuesList,
    ) -> BTreeMap<String, Placement> {
        let shared = if self.settings.lvm {
            Placement::Vg(self.settings.lvm_vg_name.clone())
        } else {
            Placement::Partition
        };
        let (sets, rejected) = group_by_vg(volumes, self.settings.separate_vgs);

        let mut placements = BTreeMap::new();
        for set in &sets {
            let placement = match &set.vg_name {
                Some(vg) => Placement::Vg(vg.clone()),
                None => shared.clone(),
            };
            for volume in &set.volumes {
                placements.insert(volume.mount_point.clone(), placement.clone());
            }
        }
        for r in rejected {
            issues.push(
                Issue::warning(format!(
                    "{} cannot be placed in volume group {}",
                    r.volume.mount_point, r.vg_name
                ))
                .with_description(format!(
                    "Its device {} differs from {} used by the other volumes of the group",
                    r.volume.device.as_deref().unwrap_or("(any)"),
                    r.expected_device.as_deref().unwrap_or("(any)")
                ))
                .with_attr("separate_vg_name"),
            );
            placements.insert(r.volume.mount_point.clone(), shared.clone());
        }
        placements
    }

    fn vg_mut<'p>(&self, devices: &'p mut PlannedDevices, vg_name: &str) -> &'p mut PlannedVg {
        let pos = match devices.vgs.iter().position(|vg| vg.vg_name == vg_name) {
            Some(pos) => pos,
            None => {
                let system = vg_name == self.settings.lvm_vg_name;
                let reuse_name = (self.settings.lvm_vg_reuse && self.graph.find_vg(vg_name).is_some())
                    .then(|| vg_name.to_string());
                devices.vgs.push(PlannedVg {
                    vg_name: vg_name.to_string(),
                    extent_size: self.settings.extent_size,
                    lvs: Vec::new(),
                    pv_encryption: (system && self.settings.encryption_password.is_some())
                        .then(|| self.encryption()),
                    reuse_name,
                    thin_pool: if system {
                        self.settings.thin_pool.as_ref().map(|pool| PlannedThinPool {
                            name: pool.pool_name.clone(),
                            size_percent: pool.size_percent,
                        })
                    } else {
                        None
                    },
                    disks: Vec::new(),
                });
                devices.vgs.len() - 1
            }
        };
        &mut devices.vgs[pos]
    }

    fn plan_raid(&self, volume: &VolumeSpecification, range: SizeRange, devices: &mut PlannedDevices) {
        let Some(raid) = &volume.raid else {
            return;
        };
        let name = format!("/dev/md/{}", volume.name());
        let members = member_range(range, md_data_devices(raid.level, raid.devices.len()));
        for disk in &raid.devices {
            let mut member = PlannedPartition::new(
                &format!("{} member on {}", name, disk),
                members,
                PartitionId::Raid,
                PartitionRole::MdMember(name.clone()),
            );
            member.disk = Some(disk.clone());
            member.mandatory = volume.is_root();
            devices.partitions.push(member);
        }
        devices.mds.push(PlannedMd {
            name,
            level: raid.level,
            format: self.formatting(volume),
            encryption: self.volume_encryption(volume),
        });
    }

    fn plan_btrfs(&self, volume: &VolumeSpecification, range: SizeRange, devices: &mut PlannedDevices) {
        let Some(spec) = &volume.btrfs else {
            return;
        };
        let name = format!("btrfs_{}", volume.name());
        let mut planned = PlannedBtrfs {
            name: name.clone(),
            format: self.formatting(volume),
            data_raid_level: spec.data_raid_level,
            metadata_raid_level: spec.metadata_raid_level,
            member_disks: Vec::new(),
            member_size: None,
            reuse: None,
        };

        if let Some(reuse) = &volume.reuse_name {
            planned.reuse = Some(Reuse {
                name: reuse.clone(),
                reformat: volume.reformat,
            });
            devices.btrfs.push(planned);
            return;
        }

        let data = spec.data_raid_level.unwrap_or(BtrfsRaidLevel::Single);
        let members = member_range(range, btrfs_data_devices(data, spec.devices.len()));
        for disk in &spec.devices {
            let mut member = PlannedPartition::new(
                &format!("{} member on {}", name, disk),
                members,
                PartitionId::Linux,
                PartitionRole::BtrfsMember(name.clone()),
            );
            member.disk = Some(disk.clone());
            member.encryption = self.volume_encryption(volume);
            member.mandatory = volume.is_root();
            devices.partitions.push(member);
        }
        planned.data_raid_level = Some(data);
        planned.metadata_raid_level = Some(spec.metadata_raid_level.unwrap_or(BtrfsRaidLevel::Raid1));
        planned.member_disks = spec.devices.clone();
        planned.member_size = Some(members);
        devices.btrfs.push(planned);
    }

    fn plan_bcache(&self, volume: &VolumeSpecification, range: SizeRange, devices: &mut PlannedDevices) {
        let Some(spec) = &volume.bcache else {
            return;
        };
        let existing = self
            .graph
            .sids()
            .into_iter()
            .filter(|sid| matches!(self.graph.device(*sid), Some(Device::Bcache(_))))
            .count();
        let name = format!("/dev/bcache{}", existing + devices.bcaches.len());

        let mut backing = PlannedPartition::new(
            &format!("{} backing", name),
            range,
            PartitionId::Linux,
            PartitionRole::BcacheBacking(name.clone()),
        );
        backing.disk = volume.device.clone();
        backing.mandatory = volume.is_root();
        devices.partitions.push(backing);

        let mut caching = PlannedPartition::new(
            &format!("{} cache", name),
            SizeRange::fixed(spec.cache_size),
            PartitionId::Linux,
            PartitionRole::BcacheCaching(name.clone()),
        );
        caching.disk = Some(spec.cache_device.clone());
        devices.partitions.push(caching);

        devices.bcaches.push(PlannedBcache {
            name,
            cache_mode: spec.cache_mode,
            format: self.formatting(volume),
            encryption: self.volume_encryption(volume),
        });
    }

    fn plan_partition(
        &self,
        volume: &VolumeSpecification,
        range: SizeRange,
        target: TargetSize,
        devices: &mut PlannedDevices,
    ) {
        let id = volume.partition_id.unwrap_or(if volume.is_swap() {
            PartitionId::Swap
        } else {
            PartitionId::Linux
        });
        let mut partition = PlannedPartition::new(&volume.mount_point, target.apply(range), id, PartitionRole::Volume);
        partition.disk = volume.device.clone();
        partition.format = Some(self.formatting(volume));
        partition.encryption = self.volume_encryption(volume);
        partition.mandatory = volume.is_root();

        if volume.is_swap() && partition.encryption.is_none() {
            if let Some((name, size)) = self.reusable_swap(&range) {
                info!("Reusing swap {} ({})", name, size);
                partition.size = SizeRange::fixed(size);
                partition.reuse = Some(Reuse {
                    name,
                    reformat: false,
                });
            }
        }
        devices.partitions.push(partition);
    }

    /// Plan every device one attempt needs
    pub fn plan(&self, boot: &[BootRequirement], target: TargetSize) -> Plan {
        let mut plan = Plan::default();
        let devices = &mut plan.devices;

        for req in boot {
            devices.partitions.push(self.boot_partition(req, target));
        }

        let volumes: Vec<VolumeSpecification> = self.settings.proposed_volumes().cloned().collect();
        let placements = self.placements(&volumes, &mut plan.issues);

        for volume in &volumes {
            if let Some(reuse) = &volume.reuse_name {
                if self.graph.find_by_name(reuse).is_none() {
                    plan.issues.push(
                        Issue::warning(format!("Device {} to reuse for {} not found", reuse, volume.mount_point))
                            .with_description("A new device is created instead")
                            .with_attr("reuse"),
                    );
                }
            }
            let reuse = volume
                .reuse_name
                .as_ref()
                .filter(|name| self.graph.find_by_name(name).is_some());

            // Composite devices ignore LVM settings
            if volume.raid.is_some() {
                self.plan_raid(volume, target.apply(self.size_range(volume, false)), devices);
                continue;
            }
            if volume.btrfs.is_some() {
                self.plan_btrfs(volume, target.apply(self.size_range(volume, false)), devices);
                continue;
            }
            if volume.bcache.is_some() {
                self.plan_bcache(volume, target.apply(self.size_range(volume, false)), devices);
                continue;
            }

            // Reusing an LV pins the volume to its VG
            let lv_vg = reuse.and_then(|name| self.vg_of_lv(name));
            let placement = match (&lv_vg, reuse) {
                (Some(vg), _) => Placement::Vg(vg.clone()),
                (None, Some(_)) => Placement::Partition,
                (None, None) => placements
                    .get(&volume.mount_point)
                    .cloned()
                    .unwrap_or(Placement::Partition),
            };

            match placement {
                Placement::Partition => {
                    let range = self.size_range(volume, false);
                    self.plan_partition(volume, range, target, devices);
                    if let (Some(name), Some(last)) = (reuse, devices.partitions.last_mut()) {
                        last.size = SizeRange::fixed(self.existing_size(name));
                        last.reuse = Some(Reuse {
                            name: name.clone(),
                            reformat: volume.reformat,
                        });
                    }
                }
                Placement::Vg(vg_name) => {
                    let range = target.apply(self.size_range(volume, true));
                    let encrypt = self.settings.encrypt(volume);
                    let system = vg_name == self.settings.lvm_vg_name;
                    let format = self.formatting(volume);
                    let vg = self.vg_mut(devices, &vg_name);
                    if lv_vg.is_some() {
                        vg.reuse_name = Some(vg_name.clone());
                    }
                    if !system {
                        if let Some(device) = &volume.device {
                            if !vg.disks.contains(device) {
                                vg.disks.push(device.clone());
                            }
                        }
                        if encrypt && vg.pv_encryption.is_none() {
                            vg.pv_encryption = Some(self.encryption());
                        }
                    }
                    let thin = vg.thin_pool.is_some() && lv_vg.is_none();
                    vg.lvs.push(PlannedLv {
                        lv_name: volume.name(),
                        size: range,
                        format,
                        thin,
                        reuse: lv_vg.as_ref().and(reuse).map(|name| Reuse {
                            name: name.clone(),
                            reformat: volume.reformat,
                        }),
                    });
                }
            }
        }

        devices.lvm = devices
            .vgs
            .iter()
            .filter_map(|vg| self.lvm_demand(vg))
            .collect();

        debug!(
            "Planned {} partition(s), {} VG(s), {} RAID(s), {} bcache(s), {} multi-device Btrfs",
            devices.partitions.len(),
            devices.vgs.len(),
            devices.mds.len(),
            devices.bcaches.len(),
            devices.btrfs.len()
        );
        plan
    }

    /// New PV space a VG needs beyond what a reused VG already offers
    fn lvm_demand(&self, vg: &PlannedVg) -> Option<LvmDemand> {
        let needed = vg.lvs_size();
        let free = vg
            .reuse_name
            .as_deref()
            .and_then(|name| self.graph.find_vg(name))
            .map(|sid| {
                let kept: DiskSize = vg
                    .lvs
                    .iter()
                    .filter_map(|lv| lv.reuse.as_ref())
                    .map(|r| self.existing_size(&r.name))
                    .sum();
                self.graph.blk_size(sid).saturating_sub(kept)
            })
            .unwrap_or_default();

        let extent = vg.extent_size;
        let less = |size: DiskSize| {
            if size.is_unlimited() {
                size
            } else {
                size.saturating_sub(free).ceil(extent)
            }
        };
        let size = SizeRange::new(less(needed.min), less(needed.desired), less(needed.max), needed.weight);
        if size.desired.is_zero() {
            return None;
        }
        Some(LvmDemand {
            vg_name: vg.vg_name.clone(),
            size,
            extent_size: extent,
            encryption: vg.pv_encryption.clone(),
            disks: vg.disks.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::boot::BootRequirementsChecker;
    use crate::volumes::spec::{default_volumes, SWAP_MOUNT};

    fn graph_with_swaps(sizes: &[DiskSize]) -> DeviceGraph {
        let mut graph = DeviceGraph::new();
        let mut disk = Disk::new("/dev/sda", DiskSize::gib(100));
        disk.ptable = Some(PartitionTableType::Gpt);
        let disk = graph.add(Device::Disk(disk));
        let mut start = DiskSize::mib(1);
        for size in sizes {
            let part = graph
                .create_partition(disk, Region::new(start, *size), PartitionId::Swap, PartitionType::Primary)
                .unwrap();
            graph.create_filesystem(&[part], Filesystem::new(FsType::Swap)).unwrap();
            start = start + *size;
        }
        graph
    }

    fn swap_only(min: DiskSize, desired: DiskSize, max: DiskSize) -> ProposalSettings {
        let mut swap = VolumeSpecification::new(SWAP_MOUNT, FsType::Swap).sizes(min, desired, max);
        swap.partition_id = Some(PartitionId::Swap);
        ProposalSettings {
            volumes: vec![swap],
            ..ProposalSettings::default()
        }
    }

    #[test]
    fn snapshots_grow_the_root() {
        let settings = ProposalSettings::default();
        let facts = SystemFacts::default();
        let graph = DeviceGraph::new();
        let planner = DevicesPlanner::new(&settings, &facts, &graph);
        let root = settings.root_volume().unwrap();
        let range = planner.size_range(root, false);
        assert_eq!(range.min, DiskSize::gib(5).scale(350, 100));
        assert_eq!(range.max, DiskSize::gib(50).scale(350, 100));
        let lvm = planner.size_range(root, true);
        assert_eq!(lvm.max, DiskSize::gib(30).scale(350, 100));
    }

    #[test]
    fn swap_follows_ram() {
        let settings = ProposalSettings::default();
        let facts = SystemFacts {
            ram_size: DiskSize::gib(8),
            ..SystemFacts::default()
        };
        let graph = DeviceGraph::new();
        let planner = DevicesPlanner::new(&settings, &facts, &graph);
        let swap = settings.volumes.iter().find(|v| v.is_swap()).unwrap();
        let range = planner.size_range(swap, false);
        assert_eq!(range.min, DiskSize::gib(8));
        assert_eq!(range.max, DiskSize::gib(8));
    }

    #[test]
    fn swap_closest_to_desired_is_reused() {
        let graph = graph_with_swaps(&[DiskSize::mib(500), DiskSize::gib(1)]);
        let settings = swap_only(DiskSize::mib(500), DiskSize::gib(1), DiskSize::gib(2));
        let facts = SystemFacts::default();
        let plan = DevicesPlanner::new(&settings, &facts, &graph).plan(&[], TargetSize::Desired);
        let swap = &plan.devices.partitions[0];
        assert_eq!(swap.reuse.as_ref().map(|r| r.name.as_str()), Some("/dev/sda2"));
        assert_eq!(swap.size, SizeRange::fixed(DiskSize::gib(1)));
    }

    #[test]
    fn swap_reuse_can_be_disabled() {
        let graph = graph_with_swaps(&[DiskSize::gib(1)]);
        let mut settings = swap_only(DiskSize::mib(500), DiskSize::gib(1), DiskSize::gib(2));
        settings.swap_reuse = SwapReuse::None;
        let facts = SystemFacts::default();
        let plan = DevicesPlanner::new(&settings, &facts, &graph).plan(&[], TargetSize::Min);
        assert!(plan.devices.partitions[0].reuse.is_none());
    }

    #[test]
    fn lvm_puts_volumes_into_system_vg() {
        let graph = DeviceGraph::new();
        let settings = ProposalSettings {
            lvm: true,
            ..ProposalSettings::default()
        };
        let facts = SystemFacts::default();
        let plan = DevicesPlanner::new(&settings, &facts, &graph).plan(&[], TargetSize::Min);
        assert!(plan.devices.partitions.is_empty());
        assert_eq!(plan.devices.vgs.len(), 1);
        let names: Vec<&str> = plan.devices.vgs[0].lvs.iter().map(|lv| lv.lv_name.as_str()).collect();
        assert_eq!(names, vec!["root", "home", "swap"]);
        assert_eq!(plan.devices.lvm.len(), 1);
        assert!(plan.devices.lvm[0].size.min >= plan.devices.vgs[0].lvs_size().min);
    }

    #[test]
    fn boot_requirements_come_first_and_are_mandatory() {
        let mut graph = DeviceGraph::new();
        graph.add(Device::Disk(Disk::new("/dev/sda", DiskSize::gib(100))));
        let settings = ProposalSettings::default();
        let facts = SystemFacts::default();
        let boot = BootRequirementsChecker::new(&graph, &settings, &facts)
            .needed_partitions()
            .unwrap();
        let plan = DevicesPlanner::new(&settings, &facts, &graph).plan(&boot, TargetSize::Desired);
        let first = &plan.devices.partitions[0];
        assert_eq!(first.role, PartitionRole::Boot);
        assert!(first.mandatory);
        assert_eq!(first.size.min, DiskSize::mib(500));
        assert_eq!(plan.devices.partitions.len(), 1 + default_volumes().len());
    }

    #[test]
    fn mixed_device_separate_vg_member_falls_back() {
        let graph = DeviceGraph::new();
        let mut a = VolumeSpecification::new("/srv", FsType::Xfs).sizes(DiskSize::gib(1), DiskSize::gib(1), DiskSize::gib(1));
        a.separate_vg_name = Some("vg_srv".to_string());
        a.device = Some("/dev/sdb".to_string());
        let mut b = a.clone();
        b.mount_point = "/srv/data".to_string();
        b.device = Some("/dev/sdc".to_string());
        let root = VolumeSpecification::new("/", FsType::Ext4).sizes(DiskSize::gib(5), DiskSize::gib(5), DiskSize::gib(5));
        let settings = ProposalSettings {
            volumes: vec![root, a, b],
            ..ProposalSettings::default()
        };
        let facts = SystemFacts::default();
        let plan = DevicesPlanner::new(&settings, &facts, &graph).plan(&[], TargetSize::Min);
        assert_eq!(plan.issues.len(), 1);
        assert_eq!(plan.issues.iter().next().unwrap().attr.as_deref(), Some("separate_vg_name"));
        assert_eq!(plan.devices.vgs.len(), 1);
        assert_eq!(plan.devices.vgs[0].disks, vec!["/dev/sdb".to_string()]);
        assert!(plan.devices.partitions.iter().any(|p| p.label == "/srv/data"));
    }

    #[test]
    fn raid_members_share_the_size() {
        let graph = DeviceGraph::new();
        let mut data = VolumeSpecification::new("/data", FsType::Xfs).sizes(
            DiskSize::gib(10),
            DiskSize::gib(10),
            DiskSize::gib(10),
        );
        data.raid = Some(crate::volumes::spec::RaidSpec {
            level: MdLevel::Raid0,
            devices: vec!["/dev/sda".to_string(), "/dev/sdb".to_string()],
        });
        let settings = ProposalSettings {
            volumes: vec![data],
            ..ProposalSettings::default()
        };
        let facts = SystemFacts::default();
        let plan = DevicesPlanner::new(&settings, &facts, &graph).plan(&[], TargetSize::Min);
        assert_eq!(plan.devices.mds.len(), 1);
        assert_eq!(plan.devices.partitions.len(), 2);
        assert_eq!(plan.devices.partitions[0].size.min, DiskSize::gib(5) + DiskSize::mib(1));
    }
}
