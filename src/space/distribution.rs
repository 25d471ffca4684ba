//! Fitting planned partitions and LVM demand into free regions
//!
//! Only minimum sizes are checked here; growth toward desired and maximum
//! sizes happens per region when the partitions are created.

use crate::devicegraph::device::Sid;
use crate::devicegraph::graph::DeviceGraph;
use crate::devicegraph::region::{self, FreeRegion, SlotInfo};
use crate::space::distributor::SizeRange;
use crate::utils::size::DiskSize;
use crate::volumes::planned::{LvmDemand, PlannedPartition};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Smallest physical volume worth creating when LVM demand is split
pub const MIN_PV_SIZE: DiskSize = DiskSize::mib(64);

/// What goes into a region
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type", content = "index")]
pub enum Slot {
    /// Index into the planned partitions
    Partition(usize),
    /// Index into the LVM demands
    Pv(usize),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionAssignment {
    pub region: FreeRegion,
    /// Items in creation order with their size ranges
    pub items: Vec<(Slot, SizeRange)>,
    /// Index of the first item created as logical partition
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logical_from: Option<usize>,
    /// An extended partition has to be created before the first logical item
    pub new_extended: bool,
    /// Space lost to EBRs of logical partitions
    pub overhead: DiskSize,
}

impl RegionAssignment {
    /// Space left for the items themselves
    pub fn available(&self) -> DiskSize {
        self.region.length - self.overhead
    }

    fn used(&self) -> DiskSize {
        self.items.iter().map(|(_, s)| s.min).sum()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionDistribution {
    pub assignments: Vec<RegionAssignment>,
}

/// Working state while placing items
struct Fitter<'a> {
    slots: BTreeMap<Sid, SlotInfo>,
    regions: &'a [FreeRegion],
    items: Vec<Vec<(Slot, SizeRange)>>,
}

impl<'a> Fitter<'a> {
    fn new(graph: &DeviceGraph, regions: &'a [FreeRegion]) -> Self {
        let slots = regions
            .iter()
            .filter_map(|r| region::slot_info(graph, r.disk).map(|s| (r.disk, s)))
            .collect();
        Self {
            slots,
            regions,
            items: vec![Vec::new(); regions.len()],
        }
    }

    /// Items placed outside extended partitions on a disk, per region
    fn primary_items(&self, disk: Sid) -> Vec<(usize, usize)> {
        self.regions
            .iter()
            .enumerate()
            .filter(|(i, r)| r.disk == disk && !r.logical && !self.items[*i].is_empty())
            .map(|(i, _)| (i, self.items[i].len()))
            .collect()
    }

    /// Layout of region `idx` holding `count` items, `None` if the table forbids it
    fn layout(&self, idx: usize, count: usize) -> Option<(Option<usize>, bool, DiskSize)> {
        let region = &self.regions[idx];
        let slots = self.slots.get(&region.disk)?;
        if count == 0 {
            return Some((None, false, DiskSize::zero()));
        }
        if region.logical {
            let overhead = slots.grain.scale(count as u64 - 1, 1);
            return Some((Some(0), false, overhead));
        }

        let elsewhere: usize = self
            .primary_items(region.disk)
            .into_iter()
            .filter(|(i, _)| *i != idx)
            .map(|(_, n)| n)
            .sum();
        let total = elsewhere + count;
        if total <= slots.free_primary {
            return Some((None, false, DiskSize::zero()));
        }
        // An extended partition only fits when this region takes all new partitions
        if elsewhere > 0 || !slots.fits_primary(total) {
            return None;
        }
        let logical = slots.logical_count(count);
        let first_logical = count - logical;
        Some((Some(first_logical), true, slots.grain.scale(logical as u64, 1)))
    }

    fn room_for(&self, idx: usize, extra: DiskSize) -> Option<DiskSize> {
        let (_, _, overhead) = self.layout(idx, self.items[idx].len() + 1)?;
        let used: DiskSize = self.items[idx].iter().map(|(_, s)| s.min).sum();
        let needed = used + overhead + extra;
        let length = self.regions[idx].length;
        (needed <= length).then(|| length - needed)
    }

    fn allowed(&self, idx: usize, disks: &[&str]) -> bool {
        disks.is_empty() || disks.contains(&self.regions[idx].disk_name.as_str())
    }

    fn place_partition(&mut self, slot: Slot, size: SizeRange, disk: Option<&str>) -> bool {
        let disks: Vec<&str> = disk.into_iter().collect();
        let grain = self.grain_of_any();
        let min = size.min.ceil(grain);
        let best = (0..self.regions.len())
            .filter(|i| self.allowed(*i, &disks))
            .filter_map(|i| self.room_for(i, min).map(|left| (left, i)))
            .min_by(|(la, ia), (lb, ib)| {
                la.cmp(lb)
                    .then_with(|| self.regions[*ia].disk_name.cmp(&self.regions[*ib].disk_name))
                    .then_with(|| self.regions[*ia].start.cmp(&self.regions[*ib].start))
            });
        match best {
            Some((_, i)) => {
                self.items[i].push((slot, SizeRange::new(min, size.desired, size.max, size.weight)));
                true
            }
            None => false,
        }
    }

    fn grain_of_any(&self) -> DiskSize {
        self.slots
            .values()
            .map(|s| s.grain)
            .max()
            .unwrap_or(DiskSize::mib(1))
    }

    fn place_lvm(&mut self, slot: Slot, demand: &LvmDemand) -> bool {
        let disks: Vec<&str> = demand.disks.iter().map(String::as_str).collect();
        let grain = self.grain_of_any();
        let per_pv = demand.pv_overhead();
        let whole = (demand.size.min + per_pv).ceil(grain);
        let pv_range = |min: DiskSize, last: bool| {
            if last {
                SizeRange::new(
                    min,
                    (demand.size.desired + per_pv).max(min),
                    demand.size.max + per_pv,
                    demand.size.weight,
                )
            } else {
                SizeRange::fixed(min)
            }
        };

        // One PV in the roomiest region
        let single = (0..self.regions.len())
            .filter(|i| self.allowed(*i, &disks))
            .filter_map(|i| self.room_for(i, whole).map(|left| (left, i)))
            .max_by(|(la, ia), (lb, ib)| la.cmp(lb).then_with(|| ib.cmp(ia)));
        if let Some((_, i)) = single {
            self.items[i].push((slot, pv_range(whole, true)));
            return true;
        }

        // Several PVs, largest regions first
        let mut candidates: Vec<(DiskSize, usize)> = (0..self.regions.len())
            .filter(|i| self.allowed(*i, &disks))
            .filter_map(|i| self.room_for(i, DiskSize::zero()).map(|left| (left.floor(grain), i)))
            .filter(|(left, _)| *left >= MIN_PV_SIZE)
            .collect();
        candidates.sort_by(|(la, ia), (lb, ib)| lb.cmp(la).then_with(|| ia.cmp(ib)));

        let mut missing = demand.size.min;
        let mut chunks = Vec::new();
        for (left, i) in candidates {
            if missing.is_zero() {
                break;
            }
            let chunk = left.min((missing + per_pv).ceil(grain));
            // Each PV only contributes whole extents
            let useful = (chunk - per_pv).floor(demand.extent_size);
            if useful.is_zero() {
                continue;
            }
            missing = missing.saturating_sub(useful);
            chunks.push((i, chunk));
        }
        if !missing.is_zero() {
            return false;
        }
        let last = chunks.len().saturating_sub(1);
        for (n, (i, chunk)) in chunks.into_iter().enumerate() {
            self.items[i].push((slot, pv_range(chunk, n == last)));
        }
        true
    }

    fn finish(self) -> PartitionDistribution {
        let mut assignments = Vec::new();
        for (idx, items) in self.items.iter().enumerate() {
            if items.is_empty() {
                continue;
            }
            let Some((logical_from, new_extended, overhead)) = self.layout(idx, items.len()) else {
                continue;
            };
            let mut items = items.clone();
            items.sort_by_key(|(slot, _)| *slot);
            assignments.push(RegionAssignment {
                region: self.regions[idx].clone(),
                items,
                logical_from,
                new_extended,
                overhead,
            });
        }
        PartitionDistribution { assignments }
    }
}

/// Find where every partition and LVM demand goes, if everything fits
pub fn find_distribution(
    graph: &DeviceGraph,
    regions: &[FreeRegion],
    partitions: &[PlannedPartition],
    lvm: &[LvmDemand],
) -> Option<PartitionDistribution> {
    let mut fitter = Fitter::new(graph, regions);

    // Restricted partitions first, then the biggest ones
    let mut order: Vec<usize> = (0..partitions.len())
        .filter(|i| partitions[*i].needs_space())
        .collect();
    order.sort_by(|a, b| {
        let (pa, pb) = (&partitions[*a], &partitions[*b]);
        pb.disk
            .is_some()
            .cmp(&pa.disk.is_some())
            .then_with(|| pb.size.min.cmp(&pa.size.min))
            .then_with(|| a.cmp(b))
    });

    for i in order {
        let planned = &partitions[i];
        if !fitter.place_partition(Slot::Partition(i), planned.size, planned.disk.as_deref()) {
            return None;
        }
    }

    for (i, demand) in lvm.iter().enumerate() {
        if demand.size.min.is_zero() {
            continue;
        }
        if !fitter.place_lvm(Slot::Pv(i), demand) {
            return None;
        }
    }

    let distribution = fitter.finish();
    debug_assert!(distribution
        .assignments
        .iter()
        .all(|a| a.used() + a.overhead <= a.region.length));
    Some(distribution)
}

/// Rough amount of space missing for the demand to fit, at least one grain
pub fn missing_space(
    regions: &[FreeRegion],
    partitions: &[PlannedPartition],
    lvm: &[LvmDemand],
    grain: DiskSize,
) -> DiskSize {
    let needed: DiskSize = partitions
        .iter()
        .filter(|p| p.needs_space())
        .map(|p| p.size.min.ceil(grain))
        .chain(lvm.iter().map(|d| d.size.min + d.pv_overhead()))
        .sum();
    let free: DiskSize = regions.iter().map(|r| r.length).sum();
    needed.saturating_sub(free).ceil(grain).max(grain)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::devicegraph::device::*;
    use crate::volumes::planned::{PartitionRole, PlannedVg};

    fn planned(label: &str, min: DiskSize, disk: Option<&str>) -> PlannedPartition {
        let mut p = PlannedPartition::new(
            label,
            SizeRange::new(min, min, DiskSize::unlimited(), 1),
            PartitionId::Linux,
            PartitionRole::Volume,
        );
        p.disk = disk.map(str::to_string);
        p
    }

    fn graph_with(disks: &[(&str, DiskSize, PartitionTableType)]) -> DeviceGraph {
        let mut graph = DeviceGraph::new();
        for (name, size, ptable) in disks {
            let mut d = Disk::new(name, *size);
            d.ptable = Some(*ptable);
            graph.add(Device::Disk(d));
        }
        graph
    }

    fn all_regions(graph: &DeviceGraph) -> Vec<FreeRegion> {
        graph
            .disks()
            .into_iter()
            .flat_map(|d| graph.unused_slots(d))
            .collect()
    }

    #[test]
    fn everything_fits_on_one_disk() {
        let graph = graph_with(&[("/dev/sda", DiskSize::gib(50), PartitionTableType::Gpt)]);
        let regions = all_regions(&graph);
        let parts = vec![
            planned("/boot/efi", DiskSize::mib(500), None),
            planned("/", DiskSize::gib(20), None),
        ];
        let dist = find_distribution(&graph, &regions, &parts, &[]).unwrap();
        assert_eq!(dist.assignments.len(), 1);
        let slots: Vec<Slot> = dist.assignments[0].items.iter().map(|(s, _)| *s).collect();
        assert_eq!(slots, vec![Slot::Partition(0), Slot::Partition(1)]);
    }

    #[test]
    fn too_big_does_not_fit() {
        let graph = graph_with(&[("/dev/sda", DiskSize::gib(10), PartitionTableType::Gpt)]);
        let regions = all_regions(&graph);
        let parts = vec![planned("/", DiskSize::gib(20), None)];
        assert!(find_distribution(&graph, &regions, &parts, &[]).is_none());
        assert_eq!(
            missing_space(&regions, &parts, &[], DiskSize::mib(1)),
            DiskSize::gib(20) - (DiskSize::gib(10) - DiskSize::mib(2))
        );
    }

    #[test]
    fn disk_restriction_is_honored() {
        let graph = graph_with(&[
            ("/dev/sda", DiskSize::gib(50), PartitionTableType::Gpt),
            ("/dev/sdb", DiskSize::gib(50), PartitionTableType::Gpt),
        ]);
        let regions = all_regions(&graph);
        let parts = vec![planned("/data", DiskSize::gib(10), Some("/dev/sdb"))];
        let dist = find_distribution(&graph, &regions, &parts, &[]).unwrap();
        assert_eq!(dist.assignments[0].region.disk_name, "/dev/sdb");
    }

    #[test]
    fn lvm_demand_splits_across_disks() {
        let graph = graph_with(&[
            ("/dev/sda", DiskSize::gib(20), PartitionTableType::Gpt),
            ("/dev/sdb", DiskSize::gib(20), PartitionTableType::Gpt),
        ]);
        let regions = all_regions(&graph);
        let demand = LvmDemand {
            vg_name: "system".to_string(),
            size: SizeRange::new(DiskSize::gib(30), DiskSize::gib(30), DiskSize::unlimited(), 1),
            extent_size: DiskSize::mib(4),
            encryption: None,
            disks: Vec::new(),
        };
        let dist = find_distribution(&graph, &regions, &[], &[demand]).unwrap();
        assert_eq!(dist.assignments.len(), 2);
        let total: DiskSize = dist
            .assignments
            .iter()
            .map(|a| a.items[0].1.min - PlannedVg::PV_OVERHEAD)
            .sum();
        assert!(total >= DiskSize::gib(30));
    }

    #[test]
    fn msdos_uses_extended_for_fifth_partition() {
        let graph = graph_with(&[("/dev/sda", DiskSize::gib(100), PartitionTableType::Msdos)]);
        let regions = all_regions(&graph);
        let parts: Vec<PlannedPartition> = (0..5)
            .map(|i| planned(&format!("p{}", i), DiskSize::gib(5), None))
            .collect();
        let dist = find_distribution(&graph, &regions, &parts, &[]).unwrap();
        let a = &dist.assignments[0];
        assert!(a.new_extended);
        assert_eq!(a.logical_from, Some(3));
        assert_eq!(a.overhead, DiskSize::mib(2));
    }

    #[test]
    fn gpt_has_no_extended_fallback() {
        let mut graph = DeviceGraph::new();
        let mut d = Disk::new("/dev/dasda", DiskSize::gib(100));
        d.ptable = Some(PartitionTableType::Dasd);
        graph.add(Device::Disk(d));
        let regions = all_regions(&graph);
        let parts: Vec<PlannedPartition> = (0..4)
            .map(|i| planned(&format!("p{}", i), DiskSize::gib(5), None))
            .collect();
        assert!(find_distribution(&graph, &regions, &parts, &[]).is_none());
    }
}
