//! Matching existing partitions against what a boot partition must look like

use crate::devicegraph::device::{FsType, PartitionId, Sid};
use crate::devicegraph::graph::DeviceGraph;
use crate::utils::size::DiskSize;

/// Criteria a [`PartitionMatcher`] checks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchField {
    FsType,
    PartitionId,
    Size,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PartitionMatcher {
    /// Accepted filesystems, empty accepts any (including none)
    pub fs_types: Vec<FsType>,
    /// Accepted partition ids, empty accepts any
    pub partition_ids: Vec<PartitionId>,
    pub min_size: DiskSize,
    pub max_size: DiskSize,
}

impl PartitionMatcher {
    /// Whether the partition satisfies every criterion not in `exclude`
    pub fn matches(&self, graph: &DeviceGraph, sid: Sid, exclude: &[MatchField]) -> bool {
        let Some(partition) = graph.partition(sid) else {
            return false;
        };

        if !exclude.contains(&MatchField::PartitionId)
            && !self.partition_ids.is_empty()
            && !self.partition_ids.contains(&partition.id)
        {
            return false;
        }

        if !exclude.contains(&MatchField::FsType) && !self.fs_types.is_empty() {
            let fs_type = graph
                .filesystem_of(sid)
                .and_then(|fs| graph.filesystem(fs))
                .map(|fs| fs.fs_type);
            match fs_type {
                Some(t) if self.fs_types.contains(&t) => {}
                _ => return false,
            }
        }

        if !exclude.contains(&MatchField::Size) {
            let size = partition.size();
            if size < self.min_size || size > self.max_size {
                return false;
            }
        }

        true
    }

    /// First matching partition on the given disk, by position
    pub fn find_on_disk(&self, graph: &DeviceGraph, disk: Sid, exclude: &[MatchField]) -> Option<Sid> {
        graph
            .partitions(disk)
            .into_iter()
            .find(|p| self.matches(graph, *p, exclude))
    }

    /// First match on `preferred`, then on the remaining disks by name
    pub fn find_preferring(
        &self,
        graph: &DeviceGraph,
        preferred: Option<Sid>,
        exclude: &[MatchField],
    ) -> Option<Sid> {
        if let Some(found) = preferred.and_then(|disk| self.find_on_disk(graph, disk, exclude)) {
            return Some(found);
        }
        graph
            .disks()
            .into_iter()
            .filter(|d| Some(*d) != preferred)
            .find_map(|disk| self.find_on_disk(graph, disk, exclude))
    }
}
