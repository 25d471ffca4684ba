//! Free space inside partition tables

use crate::devicegraph::device::*;
use crate::devicegraph::graph::DeviceGraph;
use crate::utils::size::DiskSize;
use serde::{Deserialize, Serialize};

/// A contiguous span of a disk available for new partitions
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FreeRegion {
    pub disk: Sid,
    pub disk_name: String,
    pub start: DiskSize,
    pub length: DiskSize,
    /// Start and length are multiples of the disk grain
    pub aligned: bool,
    /// The span is an existing partition reused in place
    pub reused_partition: bool,
    /// The span is inside an msdos extended partition
    pub logical: bool,
}

impl FreeRegion {
    pub fn end(&self) -> DiskSize {
        self.start + self.length
    }

    /// Span of an existing partition kept for reuse
    pub fn reused(graph: &DeviceGraph, partition: Sid) -> Option<Self> {
        let p = graph.partition(partition)?;
        let disk = graph.disk_of(partition)?;
        let grain = graph.disk(disk).map(|d| d.grain).unwrap_or(DEFAULT_GRAIN);
        Some(Self {
            disk,
            disk_name: graph.display_name(disk),
            start: p.region.start,
            length: p.region.length,
            aligned: p.region.start.floor(grain) == p.region.start
                && p.region.length.floor(grain) == p.region.length,
            reused_partition: true,
            logical: p.kind == PartitionType::Logical,
        })
    }
}

/// Partition slot availability of one disk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotInfo {
    /// Table the disk has, or will get when partitioned
    pub ptable: PartitionTableType,
    /// The table does not exist yet
    pub new_table: bool,
    /// Primary slots still free
    pub free_primary: usize,
    pub has_extended: bool,
    pub grain: DiskSize,
}

impl SlotInfo {
    /// Whether `count` new partitions fit outside the extended partition.
    ///
    /// On msdos one primary slot can become a new extended partition
    /// holding any number of logical partitions.
    pub fn fits_primary(&self, count: usize) -> bool {
        if count <= self.free_primary {
            return true;
        }
        self.ptable.supports_extended() && !self.has_extended && self.free_primary >= 1
    }

    /// Partitions among `count` that end up logical when laid out in one region
    pub fn logical_count(&self, count: usize) -> usize {
        if count <= self.free_primary || !self.ptable.supports_extended() {
            0
        } else if self.free_primary == 0 {
            count
        } else {
            count - (self.free_primary - 1)
        }
    }
}

/// Slot information of a disk, `None` when no partition can be created on it
pub fn slot_info(graph: &DeviceGraph, disk: Sid) -> Option<SlotInfo> {
    let d = graph.disk(disk)?;
    let (ptable, new_table) = match d.ptable {
        Some(pt) => (pt, false),
        None if graph.children(disk).is_empty() => (d.preferred_ptable_type(), true),
        // Direct content on the disk
        None => return None,
    };
    if ptable == PartitionTableType::ImplicitDasd {
        return None;
    }
    // Msdos cannot address the whole disk
    if ptable == PartitionTableType::Msdos && d.size > ptable.max_disk_size() && !new_table {
        return None;
    }

    let mut used = 0;
    let mut has_extended = false;
    for part in graph.partitions(disk) {
        if let Some(p) = graph.partition(part) {
            match p.kind {
                PartitionType::Logical => {}
                PartitionType::Extended => {
                    has_extended = true;
                    used += 1;
                }
                PartitionType::Primary => used += 1,
            }
        }
    }

    Some(SlotInfo {
        ptable,
        new_table,
        free_primary: ptable.max_primary().saturating_sub(used),
        has_extended,
        grain: d.grain,
    })
}

/// Gaps between partitions, aligned to the disk grain and sorted by start
pub fn unused_slots(graph: &DeviceGraph, disk: Sid) -> Vec<FreeRegion> {
    let Some(d) = graph.disk(disk) else {
        return Vec::new();
    };
    let Some(slots) = slot_info(graph, disk) else {
        return Vec::new();
    };

    let grain = d.grain;
    let usable_start = slots.ptable.reserved_start().ceil(grain).max(grain);
    let usable_end = d
        .size
        .min(slots.ptable.max_disk_size())
        .saturating_sub(slots.ptable.reserved_end());

    let mut top_level = Vec::new();
    let mut extended = None;
    let mut logicals = Vec::new();
    for part in graph.partitions(disk) {
        let Some(p) = graph.partition(part) else {
            continue;
        };
        match p.kind {
            PartitionType::Primary => top_level.push(p.region),
            PartitionType::Extended => {
                top_level.push(p.region);
                extended = Some(p.region);
            }
            PartitionType::Logical => logicals.push(p.region),
        }
    }

    let mut regions = Vec::new();
    if slots.free_primary > 0 {
        for (start, end) in gaps(usable_start, usable_end, &top_level) {
            if let Some(region) = aligned_region(disk, &d.name, start, end, grain, false) {
                regions.push(region);
            }
        }
    }

    if let Some(ext) = extended {
        // Every logical partition is preceded by its EBR
        let reserved: Vec<Region> = logicals
            .iter()
            .map(|r| Region::new(r.start.saturating_sub(grain), r.length + grain))
            .collect();
        for (start, end) in gaps(ext.start, ext.end(), &reserved) {
            if let Some(region) = aligned_region(disk, &d.name, start + grain, end, grain, true) {
                regions.push(region);
            }
        }
    }

    regions.sort_by_key(|r| r.start);
    regions
}

fn gaps(start: DiskSize, end: DiskSize, used: &[Region]) -> Vec<(DiskSize, DiskSize)> {
    let mut sorted: Vec<Region> = used.to_vec();
    sorted.sort_by_key(|r| r.start);

    let mut result = Vec::new();
    let mut cursor = start;
    for region in sorted {
        if region.start > cursor {
            result.push((cursor, region.start.min(end)));
        }
        cursor = cursor.max(region.end());
    }
    if end > cursor {
        result.push((cursor, end));
    }
    result
}

fn aligned_region(
    disk: Sid,
    disk_name: &str,
    start: DiskSize,
    end: DiskSize,
    grain: DiskSize,
    logical: bool,
) -> Option<FreeRegion> {
    let start = start.ceil(grain);
    let end = end.floor(grain);
    if end <= start || end - start < grain {
        return None;
    }
    Some(FreeRegion {
        disk,
        disk_name: disk_name.to_string(),
        start,
        length: end - start,
        aligned: true,
        reused_partition: false,
        logical,
    })
}
