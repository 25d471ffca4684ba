//! Arena of storage devices addressed by stable ids
//!
//! Nodes live in a `petgraph` stable graph; edges point from a device to the
//! devices built on top of it. Every query returns sids sorted ascending so
//! traversals are deterministic.

use crate::devicegraph::device::*;
use crate::devicegraph::region::{self, FreeRegion};
use crate::utils::error::{ProposalError, Result};
use crate::utils::size::DiskSize;
use petgraph::stable_graph::{NodeIndex, StableDiGraph};
use petgraph::Direction;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use tracing::debug;

/// Relation between a device and a device built on top of it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Link {
    /// Partition table entries and logical volumes belong to their holder
    Owns,
    /// A device using another as its backing storage
    Holds,
    /// Cache device of a bcache
    Caches,
}

#[derive(Debug, Clone)]
struct Node {
    sid: Sid,
    device: Device,
}

#[derive(Debug, Clone)]
pub struct DeviceGraph {
    inner: StableDiGraph<Node, Link>,
    index: BTreeMap<Sid, NodeIndex>,
    next_sid: u32,
}

impl Default for DeviceGraph {
    fn default() -> Self {
        Self::new()
    }
}

/// One line of a [`GraphDescription`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceEntry {
    pub sid: Sid,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parents: Vec<Sid>,
    #[serde(flatten)]
    pub device: Device,
}

/// Deterministic snapshot of a graph, used to compare plans
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphDescription {
    pub devices: Vec<DeviceEntry>,
}

impl DeviceGraph {
    pub fn new() -> Self {
        Self {
            inner: StableDiGraph::default(),
            index: BTreeMap::new(),
            next_sid: 1,
        }
    }

    /// Add a device without relations
    pub fn add(&mut self, device: Device) -> Sid {
        let sid = Sid(self.next_sid);
        self.next_sid += 1;
        let idx = self.inner.add_node(Node { sid, device });
        self.index.insert(sid, idx);
        sid
    }

    /// Add a device as child of `parent`
    pub fn add_child(&mut self, parent: Sid, device: Device, link: Link) -> Result<Sid> {
        self.ensure(parent)?;
        let sid = self.add(device);
        self.link(parent, sid, link)?;
        Ok(sid)
    }

    pub fn link(&mut self, parent: Sid, child: Sid, link: Link) -> Result<()> {
        let from = self.ensure(parent)?;
        let to = self.ensure(child)?;
        if self.inner.find_edge(from, to).is_none() {
            self.inner.add_edge(from, to, link);
        }
        Ok(())
    }

    pub fn unlink(&mut self, parent: Sid, child: Sid) {
        if let (Some(from), Some(to)) = (self.node(parent), self.node(child)) {
            if let Some(edge) = self.inner.find_edge(from, to) {
                self.inner.remove_edge(edge);
            }
        }
    }

    fn node(&self, sid: Sid) -> Option<NodeIndex> {
        self.index.get(&sid).copied()
    }

    fn ensure(&self, sid: Sid) -> Result<NodeIndex> {
        self.node(sid)
            .ok_or_else(|| ProposalError::DeviceNotFound(format!("sid {}", sid)))
    }

    pub fn contains(&self, sid: Sid) -> bool {
        self.index.contains_key(&sid)
    }

    pub fn device(&self, sid: Sid) -> Option<&Device> {
        self.node(sid)
            .and_then(|idx| self.inner.node_weight(idx))
            .map(|n| &n.device)
    }

    pub fn device_mut(&mut self, sid: Sid) -> Option<&mut Device> {
        let idx = self.node(sid)?;
        self.inner.node_weight_mut(idx).map(|n| &mut n.device)
    }

    /// Name of a device, or a placeholder for unnamed ones
    pub fn display_name(&self, sid: Sid) -> String {
        self.device(sid)
            .and_then(|d| d.name())
            .unwrap_or_else(|| format!("#{}", sid))
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// All sids in ascending order
    pub fn sids(&self) -> Vec<Sid> {
        self.index.keys().copied().collect()
    }

    fn neighbors(&self, sid: Sid, direction: Direction) -> Vec<Sid> {
        let Some(idx) = self.node(sid) else {
            return Vec::new();
        };
        let mut sids: Vec<Sid> = self
            .inner
            .neighbors_directed(idx, direction)
            .filter_map(|n| self.inner.node_weight(n))
            .map(|n| n.sid)
            .collect();
        sids.sort();
        sids.dedup();
        sids
    }

    pub fn children(&self, sid: Sid) -> Vec<Sid> {
        self.neighbors(sid, Direction::Outgoing)
    }

    pub fn parents(&self, sid: Sid) -> Vec<Sid> {
        self.neighbors(sid, Direction::Incoming)
    }

    /// Relation kind between two directly linked devices
    pub fn link_between(&self, parent: Sid, child: Sid) -> Option<Link> {
        let from = self.node(parent)?;
        let to = self.node(child)?;
        let edge = self.inner.find_edge(from, to)?;
        self.inner.edge_weight(edge).copied()
    }

    fn walk(&self, sid: Sid, direction: Direction) -> Vec<Sid> {
        let mut seen = BTreeSet::new();
        let mut queue: VecDeque<Sid> = self.neighbors(sid, direction).into();
        while let Some(next) = queue.pop_front() {
            if seen.insert(next) {
                queue.extend(self.neighbors(next, direction));
            }
        }
        seen.into_iter().collect()
    }

    pub fn descendants(&self, sid: Sid) -> Vec<Sid> {
        self.walk(sid, Direction::Outgoing)
    }

    pub fn ancestors(&self, sid: Sid) -> Vec<Sid> {
        self.walk(sid, Direction::Incoming)
    }

    /// Other children of this device's parents
    pub fn siblings(&self, sid: Sid) -> Vec<Sid> {
        let mut result = BTreeSet::new();
        for parent in self.parents(sid) {
            for child in self.children(parent) {
                if child != sid {
                    result.insert(child);
                }
            }
        }
        result.into_iter().collect()
    }

    fn filter_kind(&self, kind: DeviceKind) -> Vec<Sid> {
        self.index
            .iter()
            .filter(|(_, idx)| {
                self.inner
                    .node_weight(**idx)
                    .map(|n| n.device.kind() == kind)
                    .unwrap_or(false)
            })
            .map(|(sid, _)| *sid)
            .collect()
    }

    pub fn find_by_name(&self, name: &str) -> Option<Sid> {
        self.index.keys().copied().find(|sid| {
            self.device(*sid)
                .and_then(|d| d.name())
                .map(|n| n == name)
                .unwrap_or(false)
        })
    }

    /// Disks sorted by name
    pub fn disks(&self) -> Vec<Sid> {
        let mut disks = self.filter_kind(DeviceKind::Disk);
        disks.sort_by_key(|sid| self.display_name(*sid));
        disks
    }

    pub fn disk(&self, sid: Sid) -> Option<&Disk> {
        self.device(sid).and_then(|d| d.as_disk())
    }

    pub fn partition(&self, sid: Sid) -> Option<&Partition> {
        self.device(sid).and_then(|d| d.as_partition())
    }

    pub fn filesystem(&self, sid: Sid) -> Option<&Filesystem> {
        self.device(sid).and_then(|d| d.as_filesystem())
    }

    /// Partitions of a disk (primary, extended and logical) sorted by start
    pub fn partitions(&self, disk: Sid) -> Vec<Sid> {
        let mut parts: Vec<Sid> = self
            .children(disk)
            .into_iter()
            .filter(|sid| self.partition(*sid).is_some())
            .collect();
        parts.sort_by_key(|sid| {
            self.partition(*sid)
                .map(|p| (p.region.start, p.number))
                .unwrap_or_default()
        });
        parts
    }

    /// Disk a partition lives on
    pub fn disk_of(&self, sid: Sid) -> Option<Sid> {
        match self.device(sid)? {
            Device::Disk(_) => Some(sid),
            _ => self
                .ancestors(sid)
                .into_iter()
                .find(|a| self.disk(*a).is_some()),
        }
    }

    /// All disks a device sits on (several for RAID, LVM, multi-device filesystems)
    pub fn disks_of(&self, sid: Sid) -> Vec<Sid> {
        let mut all = self.ancestors(sid);
        all.push(sid);
        let mut disks: Vec<Sid> = all
            .into_iter()
            .filter(|a| self.disk(*a).is_some())
            .collect();
        disks.sort();
        disks
    }

    pub fn filesystems(&self) -> Vec<Sid> {
        self.filter_kind(DeviceKind::Filesystem)
    }

    pub fn vgs(&self) -> Vec<Sid> {
        self.filter_kind(DeviceKind::LvmVg)
    }

    pub fn find_vg(&self, vg_name: &str) -> Option<Sid> {
        self.vgs().into_iter().find(|sid| {
            self.device(*sid)
                .and_then(|d| d.as_vg())
                .map(|vg| vg.vg_name == vg_name)
                .unwrap_or(false)
        })
    }

    /// Filesystem directly on a block device
    pub fn filesystem_of(&self, blk: Sid) -> Option<Sid> {
        self.children(blk)
            .into_iter()
            .find(|c| self.filesystem(*c).is_some())
    }

    /// Encryption layer directly on a block device
    pub fn encryption_of(&self, blk: Sid) -> Option<Sid> {
        self.children(blk)
            .into_iter()
            .find(|c| matches!(self.device(*c), Some(Device::Encryption(_))))
    }

    pub fn mount_point_of(&self, fs: Sid) -> Option<Sid> {
        self.children(fs)
            .into_iter()
            .find(|c| matches!(self.device(*c), Some(Device::MountPoint(_))))
    }

    /// Block devices a filesystem is created on
    pub fn blk_devices_of(&self, fs: Sid) -> Vec<Sid> {
        self.parents(fs)
            .into_iter()
            .filter(|p| self.device(*p).map(|d| d.is_blk_device()).unwrap_or(false))
            .collect()
    }

    /// Filesystem reachable from a block device, looking through encryption
    pub fn formatted_as(&self, blk: Sid) -> Option<Sid> {
        self.filesystem_of(blk).or_else(|| {
            self.encryption_of(blk)
                .and_then(|enc| self.filesystem_of(enc))
        })
    }

    /// Swap filesystems, sorted by sid
    pub fn swap_filesystems(&self) -> Vec<Sid> {
        self.filesystems()
            .into_iter()
            .filter(|fs| {
                self.filesystem(*fs)
                    .map(|f| f.fs_type == FsType::Swap)
                    .unwrap_or(false)
            })
            .collect()
    }

    /// Size of a block device
    pub fn blk_size(&self, sid: Sid) -> DiskSize {
        match self.device(sid) {
            Some(Device::Disk(d)) => d.size,
            Some(Device::Partition(p)) => p.region.length,
            Some(Device::LvmLv(lv)) => lv.size,
            Some(Device::Md(md)) => {
                let members: Vec<DiskSize> = self
                    .parents(sid)
                    .into_iter()
                    .map(|p| self.blk_size(p))
                    .collect();
                md.level.array_size(&members)
            }
            Some(Device::Bcache(_)) => self
                .parents(sid)
                .into_iter()
                .find(|p| self.link_between(*p, sid) == Some(Link::Holds))
                .map(|p| self.blk_size(p))
                .unwrap_or_default(),
            Some(Device::Encryption(enc)) => self
                .parents(sid)
                .first()
                .map(|p| self.blk_size(*p).saturating_sub(enc.method.header_size()))
                .unwrap_or_default(),
            Some(Device::LvmVg(vg)) => self.vg_size(sid, vg.extent_size),
            _ => DiskSize::zero(),
        }
    }

    /// Usable size of a volume group: each PV minus 1 MiB metadata, in whole extents
    fn vg_size(&self, vg: Sid, extent: DiskSize) -> DiskSize {
        self.parents(vg)
            .into_iter()
            .flat_map(|pv| self.parents(pv))
            .map(|blk| {
                self.blk_size(blk)
                    .saturating_sub(DiskSize::mib(1))
                    .floor(extent)
            })
            .sum()
    }

    /// Resize capabilities of a device, as probed
    pub fn detect_resize_info(&self, sid: Sid) -> ResizeInfo {
        match self.device(sid) {
            Some(Device::Partition(p)) => p
                .resize_info
                .clone()
                .unwrap_or_else(|| ResizeInfo::not_resizable("no resize information")),
            _ => ResizeInfo::not_resizable("device type cannot be resized"),
        }
    }

    /// Free regions of a disk's partition table
    pub fn unused_slots(&self, disk: Sid) -> Vec<FreeRegion> {
        region::unused_slots(self, disk)
    }

    /// Remove a device and everything built on top of it, deepest first.
    ///
    /// Returns the removed sids in removal order.
    pub fn remove(&mut self, sid: Sid) -> Vec<Sid> {
        let mut order = self.removal_order(sid);
        order.push(sid);
        self.remove_all(&order);
        self.remove_orphans();
        order
    }

    /// Remove everything built on top of a device, keeping the device itself
    pub fn remove_descendants(&mut self, sid: Sid) -> Vec<Sid> {
        let order = self.removal_order(sid);
        self.remove_all(&order);
        self.remove_orphans();
        order
    }

    fn removal_order(&self, sid: Sid) -> Vec<Sid> {
        // Post-order over descendants: children before parents
        let mut order = Vec::new();
        let mut visited = BTreeSet::new();
        fn visit(graph: &DeviceGraph, sid: Sid, visited: &mut BTreeSet<Sid>, order: &mut Vec<Sid>) {
            for child in graph.children(sid) {
                if visited.insert(child) {
                    visit(graph, child, visited, order);
                    order.push(child);
                }
            }
        }
        visit(self, sid, &mut visited, &mut order);
        order
    }

    fn remove_all(&mut self, sids: &[Sid]) {
        for sid in sids {
            if let Some(idx) = self.index.remove(sid) {
                debug!("Removing device {}", sid);
                self.inner.remove_node(idx);
            }
        }
    }

    /// PVs no longer part of any VG are dropped
    fn remove_orphans(&mut self) {
        let orphans: Vec<Sid> = self
            .filter_kind(DeviceKind::LvmPv)
            .into_iter()
            .filter(|pv| self.children(*pv).is_empty())
            .collect();
        self.remove_all(&orphans);
    }

    /// Wipe a disk and create a new, empty partition table
    pub fn create_ptable(&mut self, disk: Sid, ptable: PartitionTableType) -> Result<Vec<Sid>> {
        let removed = self.remove_descendants(disk);
        match self.device_mut(disk) {
            Some(Device::Disk(d)) => {
                debug!("Creating {} partition table on {}", ptable, d.name);
                d.ptable = Some(ptable);
                Ok(removed)
            }
            _ => Err(ProposalError::DeviceNotFound(format!("disk {}", disk))),
        }
    }

    /// Create a partition, numbering it after the table's rules
    pub fn create_partition(
        &mut self,
        disk: Sid,
        region: Region,
        id: PartitionId,
        kind: PartitionType,
    ) -> Result<Sid> {
        let d = self
            .disk(disk)
            .cloned()
            .ok_or_else(|| ProposalError::DeviceNotFound(format!("disk {}", disk)))?;
        let ptable = d.ptable.ok_or_else(|| {
            ProposalError::PartitionTable(format!("{} has no partition table", d.name))
        })?;

        let used: BTreeSet<u32> = self
            .partitions(disk)
            .into_iter()
            .filter_map(|p| self.partition(p).map(|p| p.number))
            .collect();
        let number = match kind {
            PartitionType::Logical => (5..).find(|n| !used.contains(n)),
            _ => (1..=ptable.max_primary() as u32).find(|n| !used.contains(n)),
        }
        .ok_or_else(|| {
            ProposalError::PartitionTable(format!("no free partition slot on {}", d.name))
        })?;

        let id = if ptable.supports_partition_ids() {
            id
        } else {
            PartitionId::Linux
        };
        let name = partition_name(&d.name, number);
        let udev_paths = d
            .udev_paths
            .iter()
            .map(|p| format!("{}-part{}", p, number))
            .collect();

        debug!("Creating partition {} ({} at {})", name, region.length, region.start);
        self.add_child(
            disk,
            Device::Partition(Partition {
                name,
                number,
                region,
                id,
                kind,
                udev_paths,
                resize_info: None,
            }),
            Link::Owns,
        )
    }

    pub fn resize_partition(&mut self, sid: Sid, length: DiskSize) -> Result<()> {
        match self.device_mut(sid).and_then(|d| d.as_partition_mut()) {
            Some(p) => {
                p.region.length = length;
                if let Some(info) = p.resize_info.as_mut() {
                    info.max_size = info.max_size.max(length);
                }
                Ok(())
            }
            None => Err(ProposalError::DeviceNotFound(format!("partition {}", sid))),
        }
    }

    /// Create a filesystem on one or more block devices
    pub fn create_filesystem(&mut self, blks: &[Sid], fs: Filesystem) -> Result<Sid> {
        for blk in blks {
            self.ensure(*blk)?;
        }
        let sid = self.add(Device::Filesystem(fs));
        for blk in blks {
            self.link(*blk, sid, Link::Holds)?;
        }
        Ok(sid)
    }

    pub fn set_mount_point(&mut self, fs: Sid, mount_point: MountPoint) -> Result<Sid> {
        if let Some(existing) = self.mount_point_of(fs) {
            self.remove(existing);
        }
        self.add_child(fs, Device::MountPoint(mount_point), Link::Holds)
    }

    pub fn create_encryption(&mut self, blk: Sid, encryption: Encryption) -> Result<Sid> {
        self.add_child(blk, Device::Encryption(encryption), Link::Holds)
    }

    pub fn create_pv(&mut self, blk: Sid) -> Result<Sid> {
        self.add_child(blk, Device::LvmPv(LvmPv::default()), Link::Holds)
    }

    pub fn create_vg(&mut self, vg: LvmVg, pvs: &[Sid]) -> Result<Sid> {
        let sid = self.add(Device::LvmVg(vg));
        for pv in pvs {
            self.link(*pv, sid, Link::Holds)?;
        }
        Ok(sid)
    }

    /// Create a logical volume in a VG, or a thin volume inside a thin pool
    pub fn create_lv(&mut self, holder: Sid, lv: LvmLv) -> Result<Sid> {
        self.add_child(holder, Device::LvmLv(lv), Link::Owns)
    }

    pub fn create_md(&mut self, md: Md, members: &[Sid]) -> Result<Sid> {
        let sid = self.add(Device::Md(md));
        for member in members {
            self.link(*member, sid, Link::Holds)?;
        }
        Ok(sid)
    }

    pub fn create_bcache(&mut self, bcache: Bcache, backing: Sid, caching: Option<Sid>) -> Result<Sid> {
        let sid = self.add_child(backing, Device::Bcache(bcache), Link::Holds)?;
        if let Some(cache) = caching {
            self.link(cache, sid, Link::Caches)?;
        }
        Ok(sid)
    }

    /// Deterministic description of the whole graph
    pub fn description(&self) -> GraphDescription {
        let devices = self
            .sids()
            .into_iter()
            .filter_map(|sid| {
                self.device(sid).map(|device| DeviceEntry {
                    sid,
                    parents: self.parents(sid),
                    device: device.clone(),
                })
            })
            .collect();
        GraphDescription { devices }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn disk_with_partition() -> (DeviceGraph, Sid, Sid) {
        let mut graph = DeviceGraph::new();
        let mut disk = Disk::new("/dev/sda", DiskSize::gib(100));
        disk.ptable = Some(PartitionTableType::Gpt);
        let disk = graph.add(Device::Disk(disk));
        let part = graph
            .create_partition(
                disk,
                Region::new(DiskSize::mib(1), DiskSize::gib(10)),
                PartitionId::Linux,
                PartitionType::Primary,
            )
            .unwrap();
        (graph, disk, part)
    }

    #[test]
    fn partitions_are_numbered_and_named() {
        let (mut graph, disk, part) = disk_with_partition();
        assert_eq!(graph.display_name(part), "/dev/sda1");
        let second = graph
            .create_partition(
                disk,
                Region::new(DiskSize::gib(11), DiskSize::gib(10)),
                PartitionId::Swap,
                PartitionType::Primary,
            )
            .unwrap();
        assert_eq!(graph.display_name(second), "/dev/sda2");
        assert_eq!(graph.partitions(disk), vec![part, second]);
        assert_eq!(graph.find_by_name("/dev/sda2"), Some(second));
    }

    #[test]
    fn remove_takes_descendants_children_first() {
        let (mut graph, _disk, part) = disk_with_partition();
        let enc = graph
            .create_encryption(
                part,
                Encryption {
                    name: "/dev/mapper/cr_sda1".to_string(),
                    dm_name: "cr_sda1".to_string(),
                    method: EncryptionMethod::Luks2,
                    pbkdf: None,
                    password: None,
                    secure_key: None,
                },
            )
            .unwrap();
        let fs = graph
            .create_filesystem(&[enc], Filesystem::new(FsType::Ext4))
            .unwrap();

        let removed = graph.remove(part);
        assert_eq!(removed, vec![fs, enc, part]);
        assert!(!graph.contains(fs));
        assert!(!graph.contains(enc));
    }

    #[test]
    fn sids_are_not_reused_after_removal() {
        let (mut graph, disk, part) = disk_with_partition();
        graph.remove(part);
        let again = graph
            .create_partition(
                disk,
                Region::new(DiskSize::mib(1), DiskSize::gib(1)),
                PartitionId::Linux,
                PartitionType::Primary,
            )
            .unwrap();
        assert!(again > part);
    }

    #[test]
    fn removing_a_pv_partition_drops_the_whole_vg() {
        let (mut graph, disk, part) = disk_with_partition();
        let other = graph
            .create_partition(
                disk,
                Region::new(DiskSize::gib(11), DiskSize::gib(10)),
                PartitionId::Lvm,
                PartitionType::Primary,
            )
            .unwrap();
        let pv1 = graph.create_pv(part).unwrap();
        let pv2 = graph.create_pv(other).unwrap();
        let vg = graph
            .create_vg(
                LvmVg {
                    vg_name: "system".to_string(),
                    extent_size: DiskSize::mib(4),
                },
                &[pv1, pv2],
            )
            .unwrap();

        graph.remove(part);
        assert!(!graph.contains(vg));
        assert!(!graph.contains(pv2), "orphaned PV must be dropped");
        assert!(graph.contains(other));
    }

    #[test]
    fn encryption_size_subtracts_header() {
        let (mut graph, _disk, part) = disk_with_partition();
        let enc = graph
            .create_encryption(
                part,
                Encryption {
                    name: "/dev/mapper/cr_sda1".to_string(),
                    dm_name: "cr_sda1".to_string(),
                    method: EncryptionMethod::Luks2,
                    pbkdf: None,
                    password: None,
                    secure_key: None,
                },
            )
            .unwrap();
        assert_eq!(graph.blk_size(enc), DiskSize::gib(10) - DiskSize::mib(16));
    }

    #[test]
    fn siblings_share_a_parent() {
        let (mut graph, disk, part) = disk_with_partition();
        let second = graph
            .create_partition(
                disk,
                Region::new(DiskSize::gib(11), DiskSize::gib(1)),
                PartitionId::Linux,
                PartitionType::Primary,
            )
            .unwrap();
        assert_eq!(graph.siblings(part), vec![second]);
    }
}
