//! x86 booting through the legacy BIOS

use super::analyzer::BootAnalyzer;
use super::matcher::PartitionMatcher;
use super::{BootRequirement, Collected};
use crate::devicegraph::device::{PartitionId, PartitionTableType};
use crate::utils::size::DiskSize;

/// Gap GRUB needs after the MBR to embed its core image
pub const MIN_MBR_GAP: DiskSize = DiskSize::kib(256);
/// Gap needed when the core image also has to carry the LVM modules
pub const MIN_MBR_GAP_LVM: DiskSize = DiskSize::mib(1);

pub fn bios_boot_matcher() -> PartitionMatcher {
    PartitionMatcher {
        fs_types: Vec::new(),
        partition_ids: vec![PartitionId::BiosBoot],
        min_size: DiskSize::mib(2),
        max_size: DiskSize::unlimited(),
    }
}

pub(super) fn requirements(analyzer: &BootAnalyzer, collected: &mut Collected) {
    match analyzer.boot_ptable() {
        Some(PartitionTableType::Msdos) => {
            let needed = if analyzer.root_in_lvm() {
                MIN_MBR_GAP_LVM
            } else {
                MIN_MBR_GAP
            };
            let gap = analyzer.mbr_gap().unwrap_or_default();
            if gap < needed {
                collected.require_boot(analyzer, "the MBR gap is too small to embed the bootloader");
            }
        }
        _ => {
            let disk = analyzer.boot_disk_name();
            let requirement = BootRequirement::new(
                None,
                PartitionId::BiosBoot,
                None,
                (DiskSize::mib(2), DiskSize::mib(8), DiskSize::mib(8)),
                "GRUB needs a BIOS boot partition on GPT",
            )
            .on_disk(&disk);
            match bios_boot_matcher().find_on_disk(analyzer.graph, analyzer.boot_disk, &[]) {
                Some(existing) => {
                    collected.require(requirement.reusing(&analyzer.graph.display_name(existing)))
                }
                None => collected.require(requirement),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::super::BootRequirementsChecker;
    use crate::devicegraph::device::*;
    use crate::devicegraph::graph::DeviceGraph;
    use crate::proposal::facts::SystemFacts;
    use crate::proposal::settings::ProposalSettings;
    use crate::utils::size::DiskSize;

    fn legacy() -> SystemFacts {
        SystemFacts {
            efi_boot: false,
            ..SystemFacts::default()
        }
    }

    #[test]
    fn gpt_without_bios_boot_needs_exactly_one() {
        let graph = disk_graph(
            "/dev/sda",
            Some(PartitionTableType::Gpt),
            &[(PartitionId::Linux, DiskSize::gib(20), Some(FsType::Ext4))],
        );
        let settings = ProposalSettings::default();
        let facts = legacy();
        let reqs = BootRequirementsChecker::new(&graph, &settings, &facts)
            .needed_partitions()
            .unwrap();
        assert_eq!(reqs.len(), 1);
        assert_eq!(reqs[0].partition_id, PartitionId::BiosBoot);
        assert_eq!(reqs[0].reuse_device_name, None);
        assert_eq!(reqs[0].disk.as_deref(), Some("/dev/sda"));
    }

    #[test]
    fn existing_bios_boot_is_reused() {
        let graph = disk_graph(
            "/dev/sda",
            Some(PartitionTableType::Gpt),
            &[(PartitionId::BiosBoot, DiskSize::mib(8), None)],
        );
        let settings = ProposalSettings::default();
        let facts = legacy();
        let reqs = BootRequirementsChecker::new(&graph, &settings, &facts)
            .needed_partitions()
            .unwrap();
        assert_eq!(reqs[0].reuse_device_name.as_deref(), Some("/dev/sda1"));
    }

    #[test]
    fn empty_disk_gets_bios_boot_for_new_gpt() {
        let graph = disk_graph("/dev/sda", None, &[]);
        let settings = ProposalSettings::default();
        let facts = legacy();
        let reqs = BootRequirementsChecker::new(&graph, &settings, &facts)
            .needed_partitions()
            .unwrap();
        assert_eq!(reqs.len(), 1);
        assert_eq!(reqs[0].partition_id, PartitionId::BiosBoot);
    }

    #[test]
    fn msdos_with_aligned_partitions_needs_nothing() {
        let graph = disk_graph(
            "/dev/sda",
            Some(PartitionTableType::Msdos),
            &[(PartitionId::Linux, DiskSize::gib(20), Some(FsType::Ext4))],
        );
        let settings = ProposalSettings {
            lvm: true,
            ..ProposalSettings::default()
        };
        let facts = legacy();
        let reqs = BootRequirementsChecker::new(&graph, &settings, &facts)
            .needed_partitions()
            .unwrap();
        assert!(reqs.is_empty());
    }

    #[test]
    fn msdos_small_gap_needs_boot() {
        let mut graph = DeviceGraph::new();
        let mut disk = Disk::new("/dev/sda", DiskSize::gib(100));
        disk.ptable = Some(PartitionTableType::Msdos);
        let disk = graph.add(Device::Disk(disk));
        graph
            .create_partition(
                disk,
                Region::new(DiskSize::kib(32), DiskSize::gib(20)),
                PartitionId::Linux,
                PartitionType::Primary,
            )
            .unwrap();
        let settings = ProposalSettings::default();
        let facts = legacy();
        let reqs = BootRequirementsChecker::new(&graph, &settings, &facts)
            .needed_partitions()
            .unwrap();
        assert_eq!(reqs.len(), 1);
        assert_eq!(reqs[0].mount_point.as_deref(), Some("/boot"));
    }
}
