//! PowerPC: PReP boot partition, or nothing on PowerNV

use super::analyzer::BootAnalyzer;
use super::matcher::PartitionMatcher;
use super::{BootRequirement, Collected};
use crate::devicegraph::device::PartitionId;
use crate::utils::size::DiskSize;

pub fn prep_matcher() -> PartitionMatcher {
    PartitionMatcher {
        fs_types: Vec::new(),
        partition_ids: vec![PartitionId::Prep],
        min_size: DiskSize::mib(2),
        max_size: DiskSize::unlimited(),
    }
}

pub(super) fn requirements(analyzer: &BootAnalyzer, collected: &mut Collected) {
    if analyzer.facts.power_nv {
        // Petitboot reads the kernel directly, it cannot look into LVM
        if analyzer.root_in_lvm() {
            collected.require_boot(analyzer, "Petitboot cannot read the kernel from LVM");
        }
        return;
    }

    let requirement = BootRequirement::new(
        None,
        PartitionId::Prep,
        None,
        (DiskSize::mib(2), DiskSize::mib(4), DiskSize::mib(8)),
        "Open Firmware loads the bootloader from a PReP partition",
    )
    .on_disk(&analyzer.boot_disk_name());

    // A PReP on another disk is useless: firmware boots the boot disk
    match prep_matcher().find_on_disk(analyzer.graph, analyzer.boot_disk, &[]) {
        Some(existing) => collected.require(requirement.reusing(&analyzer.graph.display_name(existing))),
        None => collected.require(requirement),
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::super::{BootRequirementsChecker, BOOT_MOUNT};
    use crate::devicegraph::device::*;
    use crate::proposal::facts::{Architecture, SystemFacts};
    use crate::proposal::settings::ProposalSettings;
    use crate::utils::size::DiskSize;

    fn ppc(power_nv: bool) -> SystemFacts {
        SystemFacts {
            architecture: Architecture::Ppc64le,
            efi_boot: false,
            power_nv,
            ..SystemFacts::default()
        }
    }

    #[test]
    fn prep_on_other_disk_does_not_count() {
        let mut graph = disk_graph("/dev/sda", Some(PartitionTableType::Gpt), &[]);
        add_disk(
            &mut graph,
            "/dev/sdb",
            Some(PartitionTableType::Gpt),
            &[(PartitionId::Prep, DiskSize::mib(8), None)],
        );
        let settings = ProposalSettings::default();
        let facts = ppc(false);
        let reqs = BootRequirementsChecker::new(&graph, &settings, &facts)
            .needed_partitions()
            .unwrap();
        assert_eq!(reqs.len(), 1);
        assert_eq!(reqs[0].partition_id, PartitionId::Prep);
        assert_eq!(reqs[0].reuse_device_name, None);
        assert_eq!(reqs[0].disk.as_deref(), Some("/dev/sda"));
    }

    #[test]
    fn prep_on_boot_disk_is_reused() {
        let graph = disk_graph(
            "/dev/sda",
            Some(PartitionTableType::Gpt),
            &[(PartitionId::Prep, DiskSize::mib(8), None)],
        );
        let settings = ProposalSettings::default();
        let facts = ppc(false);
        let reqs = BootRequirementsChecker::new(&graph, &settings, &facts)
            .needed_partitions()
            .unwrap();
        assert_eq!(reqs[0].reuse_device_name.as_deref(), Some("/dev/sda1"));
    }

    #[test]
    fn power_nv_needs_boot_only_with_lvm() {
        let graph = disk_graph("/dev/sda", Some(PartitionTableType::Gpt), &[]);
        let facts = ppc(true);

        let plain = ProposalSettings::default();
        let reqs = BootRequirementsChecker::new(&graph, &plain, &facts)
            .needed_partitions()
            .unwrap();
        assert!(reqs.is_empty());

        let lvm = ProposalSettings {
            lvm: true,
            ..ProposalSettings::default()
        };
        let reqs = BootRequirementsChecker::new(&graph, &lvm, &facts)
            .needed_partitions()
            .unwrap();
        assert_eq!(reqs.len(), 1);
        assert_eq!(reqs[0].mount_point.as_deref(), Some(BOOT_MOUNT));
    }
}
