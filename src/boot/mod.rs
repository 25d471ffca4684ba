//! Boot requirements: partitions the system needs to be bootable
//!
//! Which partitions are needed depends on the architecture, the firmware, the
//! partition table of the boot disk and on how the root filesystem is set up.
//! The checker never touches the graph; it only looks at it.

pub mod analyzer;
pub mod legacy;
pub mod matcher;
pub mod prep;
pub mod raspi;
pub mod uefi;
pub mod zipl;

use crate::devicegraph::device::{FsType, PartitionId};
use crate::devicegraph::graph::DeviceGraph;
use crate::proposal::facts::{Architecture, SystemFacts};
use crate::proposal::issues::Issue;
use crate::proposal::settings::ProposalSettings;
use crate::utils::error::BootRequirementsError;
use crate::utils::size::DiskSize;
use analyzer::BootAnalyzer;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Mount point of the EFI system partition
pub const ESP_MOUNT: &str = "/boot/efi";
pub const BOOT_MOUNT: &str = "/boot";
pub const ZIPL_MOUNT: &str = "/boot/zipl";
pub const FIRMWARE_MOUNT: &str = "/boot/vc";

/// One partition needed to boot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BootRequirement {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mount_point: Option<String>,
    pub partition_id: PartitionId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fs_type: Option<FsType>,
    pub min_size: DiskSize,
    pub desired_size: DiskSize,
    pub max_size: DiskSize,
    #[serde(default)]
    pub weight: u32,
    /// Existing partition to use instead of creating one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reuse_device_name: Option<String>,
    /// Disk the partition must be created on
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disk: Option<String>,
    pub reason: String,
}

impl BootRequirement {
    pub fn new(
        mount_point: Option<&str>,
        partition_id: PartitionId,
        fs_type: Option<FsType>,
        sizes: (DiskSize, DiskSize, DiskSize),
        reason: &str,
    ) -> Self {
        Self {
            mount_point: mount_point.map(str::to_string),
            partition_id,
            fs_type,
            min_size: sizes.0,
            desired_size: sizes.1,
            max_size: sizes.2,
            weight: 0,
            reuse_device_name: None,
            disk: None,
            reason: reason.to_string(),
        }
    }

    pub fn on_disk(mut self, disk: &str) -> Self {
        self.disk = Some(disk.to_string());
        self
    }

    pub fn reusing(mut self, name: &str) -> Self {
        self.reuse_device_name = Some(name.to_string());
        self
    }

    /// Creation order: bootloader blobs, ESP, zipl, /boot, firmware
    fn priority(&self) -> u8 {
        match (self.partition_id, self.mount_point.as_deref()) {
            (PartitionId::BiosBoot | PartitionId::Prep, _) => 0,
            (_, Some(ESP_MOUNT)) => 1,
            (_, Some(ZIPL_MOUNT)) => 2,
            (_, Some(BOOT_MOUNT)) => 3,
            (_, Some(FIRMWARE_MOUNT)) => 4,
            _ => 5,
        }
    }
}

/// Plain /boot partition
pub fn boot_partition(reason: &str) -> BootRequirement {
    BootRequirement::new(
        Some(BOOT_MOUNT),
        PartitionId::Linux,
        Some(FsType::Ext4),
        (DiskSize::mib(100), DiskSize::mib(200), DiskSize::mib(500)),
        reason,
    )
}

/// Requirements gathered by the per-architecture strategies
#[derive(Debug, Default)]
pub struct Collected {
    pub requirements: Vec<BootRequirement>,
    pub warnings: Vec<Issue>,
}

impl Collected {
    pub fn require(&mut self, requirement: BootRequirement) {
        debug!(
            "Boot requirement {:?} ({})",
            requirement.mount_point.as_deref().unwrap_or("unmounted"),
            requirement.reason
        );
        self.requirements.push(requirement);
    }

    /// Add a plain /boot unless one is already required or planned
    pub fn require_boot(&mut self, analyzer: &BootAnalyzer, reason: &str) {
        let present = self
            .requirements
            .iter()
            .any(|r| r.mount_point.as_deref() == Some(BOOT_MOUNT));
        if !present && !analyzer.boot_planned() {
            self.require(boot_partition(reason).on_disk(&analyzer.boot_disk_name()));
        }
    }
}

pub struct BootRequirementsChecker<'a> {
    graph: &'a DeviceGraph,
    settings: &'a ProposalSettings,
    facts: &'a SystemFacts,
}

impl<'a> BootRequirementsChecker<'a> {
    pub fn new(graph: &'a DeviceGraph, settings: &'a ProposalSettings, facts: &'a SystemFacts) -> Self {
        Self {
            graph,
            settings,
            facts,
        }
    }

    /// Partitions needed to boot, in creation order
    pub fn needed_partitions(&self) -> Result<Vec<BootRequirement>, BootRequirementsError> {
        Ok(self.collect()?.requirements)
    }

    /// Requirements plus warnings about existing partitions that were not reused
    pub fn collect(&self) -> Result<Collected, BootRequirementsError> {
        let analyzer = BootAnalyzer::new(self.graph, self.settings, self.facts)?;
        let mut collected = Collected::default();

        if self.facts.is_raspberry_pi() {
            raspi::requirements(&analyzer, &mut collected);
        } else {
            match self.facts.architecture {
                Architecture::X86_64 if !self.facts.efi_boot => {
                    legacy::requirements(&analyzer, &mut collected)
                }
                Architecture::X86_64 | Architecture::Aarch64 | Architecture::Riscv64 => {
                    uefi::requirements(&analyzer, &mut collected)
                }
                Architecture::Ppc64le => prep::requirements(&analyzer, &mut collected),
                Architecture::S390x => zipl::requirements(&analyzer, &mut collected)?,
            }
        }

        if let Some(root) = &analyzer.root {
            if root.bootloader_locked_out() {
                collected.require_boot(&analyzer, "the bootloader cannot unlock the root encryption");
            }
            if root.unreadable_raid() {
                collected.require_boot(&analyzer, "the bootloader cannot read the root RAID");
            }
        }

        collected.requirements.sort_by_key(|r| r.priority());
        info!(
            "{} boot requirement(s) for {} on {}",
            collected.requirements.len(),
            self.facts.architecture,
            analyzer.boot_disk_name()
        );
        Ok(collected)
    }
}
