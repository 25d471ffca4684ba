//! Raspberry Pi: ESP plus the firmware partition

use super::analyzer::BootAnalyzer;
use super::{uefi, BootRequirement, Collected, FIRMWARE_MOUNT};
use crate::devicegraph::device::{FsType, PartitionId, Sid};
use crate::devicegraph::graph::DeviceGraph;
use crate::utils::size::DiskSize;

/// Partitions holding Raspberry Pi firmware, boot disk first
fn firmware_partitions(graph: &DeviceGraph, boot_disk: Sid) -> Vec<Sid> {
    let mut found: Vec<(bool, Sid)> = graph
        .filesystems()
        .into_iter()
        .filter(|fs| graph.filesystem(*fs).map(|f| f.rpi_firmware).unwrap_or(false))
        .flat_map(|fs| graph.blk_devices_of(fs))
        .filter(|blk| graph.partition(*blk).is_some())
        .map(|blk| (graph.disk_of(blk) != Some(boot_disk), blk))
        .collect();
    found.sort();
    found.into_iter().map(|(_, sid)| sid).collect()
}

pub(super) fn requirements(analyzer: &BootAnalyzer, collected: &mut Collected) {
    uefi::esp_requirement(analyzer, collected);

    if let Some(firmware) = firmware_partitions(analyzer.graph, analyzer.boot_disk).first() {
        let size = analyzer.graph.blk_size(*firmware);
        collected.require(
            BootRequirement::new(
                Some(FIRMWARE_MOUNT),
                PartitionId::Esp,
                Some(FsType::Vfat),
                (size, size, size),
                "the Raspberry Pi firmware must stay reachable",
            )
            .reusing(&analyzer.graph.display_name(*firmware)),
        );
    }
}
