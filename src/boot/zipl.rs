//! S/390: zipl boot partition and DASD checks

use super::analyzer::BootAnalyzer;
use super::{BootRequirement, Collected, ZIPL_MOUNT};
use crate::devicegraph::device::{DasdFormat, DasdInfo, DasdType, FsType, PartitionId};
use crate::utils::error::BootRequirementsError;
use crate::utils::size::DiskSize;

pub(super) fn requirements(
    analyzer: &BootAnalyzer,
    collected: &mut Collected,
) -> Result<(), BootRequirementsError> {
    if let Some(disk) = analyzer.boot_disk() {
        match disk.dasd {
            Some(DasdInfo {
                dasd_type: DasdType::Eckd,
                format: DasdFormat::Ldl,
            }) => {
                return Err(BootRequirementsError::LdlDasd {
                    disk: disk.name.clone(),
                })
            }
            Some(DasdInfo {
                dasd_type: DasdType::Eckd,
                format: DasdFormat::None,
            }) => {
                return Err(BootRequirementsError::UnformattedDasd {
                    disk: disk.name.clone(),
                })
            }
            _ => {}
        }
    }

    // zipl cannot read Btrfs
    if analyzer.root_fs_type() == Some(FsType::Btrfs) {
        collected.require(
            BootRequirement::new(
                Some(ZIPL_MOUNT),
                PartitionId::Linux,
                Some(FsType::Ext2),
                (DiskSize::mib(100), DiskSize::mib(200), DiskSize::gib(1)),
                "zipl cannot read the kernel from a Btrfs root",
            )
            .on_disk(&analyzer.boot_disk_name()),
        );
    }
    Ok(())
}
