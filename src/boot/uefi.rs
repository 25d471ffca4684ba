//! Booting through UEFI firmware

use super::analyzer::BootAnalyzer;
use super::matcher::{MatchField, PartitionMatcher};
use super::{BootRequirement, Collected, ESP_MOUNT};
use crate::devicegraph::device::{FsType, PartitionId};
use crate::proposal::issues::Issue;
use crate::utils::size::DiskSize;

/// Smallest existing ESP worth reusing
pub const ESP_REUSE_MIN: DiskSize = DiskSize::mib(32);
/// Largest existing ESP worth reusing
pub const ESP_REUSE_MAX: DiskSize = DiskSize::mib(500);

pub fn esp_matcher() -> PartitionMatcher {
    PartitionMatcher {
        fs_types: vec![FsType::Vfat],
        partition_ids: vec![PartitionId::Esp],
        min_size: ESP_REUSE_MIN,
        max_size: ESP_REUSE_MAX,
    }
}

/// New EFI system partition on the boot disk
pub fn new_esp(analyzer: &BootAnalyzer) -> BootRequirement {
    BootRequirement::new(
        Some(ESP_MOUNT),
        PartitionId::Esp,
        Some(FsType::Vfat),
        (DiskSize::mib(256), DiskSize::mib(500), DiskSize::mib(500)),
        "UEFI firmware loads the bootloader from an EFI system partition",
    )
    .on_disk(&analyzer.boot_disk_name())
}

/// Reuse a suitable ESP, preferring the boot disk, or ask for a new one
pub(super) fn esp_requirement(analyzer: &BootAnalyzer, collected: &mut Collected) {
    let matcher = esp_matcher();
    let graph = analyzer.graph;
    let new = new_esp(analyzer);

    if let Some(existing) = matcher.find_preferring(graph, Some(analyzer.boot_disk), &[]) {
        let name = graph.display_name(existing);
        collected.require(BootRequirement {
            disk: None,
            ..new.reusing(&name)
        });
        return;
    }

    if let Some(rejected) = matcher.find_preferring(graph, Some(analyzer.boot_disk), &[MatchField::Size]) {
        let size = graph.blk_size(rejected);
        collected.warnings.push(
            Issue::warning(format!(
                "The EFI system partition {} was not reused",
                graph.display_name(rejected)
            ))
            .with_description(format!(
                "Its size ({}) is outside the reusable range {} - {}",
                size, ESP_REUSE_MIN, ESP_REUSE_MAX
            ))
            .with_device(rejected)
            .with_attr("size"),
        );
    }
    collected.require(new);
}

pub(super) fn requirements(analyzer: &BootAnalyzer, collected: &mut Collected) {
    esp_requirement(analyzer, collected);
}
