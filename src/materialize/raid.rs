//! Software RAID devices

use super::{create_error, encryption, filesystem, member_sids, Creation};
use crate::devicegraph::device::Md;
use crate::utils::error::MaterializeError;
use crate::volumes::planned::{PartitionRole, PlannedDevices, PlannedMd};
use tracing::info;

pub(super) fn create_mds(c: &mut Creation<'_>, planned: &PlannedDevices) -> Result<(), MaterializeError> {
    for md in &planned.mds {
        let mandatory = md.format.mount_point.as_deref() == Some("/");
        let members = member_sids(c, planned, &PartitionRole::MdMember(md.name.clone()));
        c.create_or_roll_back(&md.name, mandatory, &members, |c| create_md(c, planned, md))?;
    }
    Ok(())
}

fn create_md(c: &mut Creation<'_>, planned: &PlannedDevices, md: &PlannedMd) -> Result<(), MaterializeError> {
    let members = member_sids(c, planned, &PartitionRole::MdMember(md.name.clone()));
    if members.len() < md.level.min_devices() {
        return Err(MaterializeError::Create {
            device: md.name.clone(),
            reason: format!(
                "{} member(s) available, {:?} needs {}",
                members.len(),
                md.level,
                md.level.min_devices()
            ),
        });
    }

    let sid = c
        .graph
        .create_md(
            Md {
                name: md.name.clone(),
                level: md.level,
            },
            &members,
        )
        .map_err(|e| create_error(&md.name, e))?;
    c.created.push(sid);
    info!("Created {} from {} member(s)", md.name, members.len());

    let blk = match &md.encryption {
        Some(enc) => encryption::encrypt(c, sid, enc)?,
        None => sid,
    };
    filesystem::format(c, &[blk], &md.format)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::super::DevicesCreator;
    use crate::devicegraph::device::*;
    use crate::devicegraph::graph::DeviceGraph;
    use crate::devicegraph::region::unused_slots;
    use crate::proposal::facts::SystemFacts;
    use crate::proposal::settings::ProposalSettings;
    use crate::space::distribution::find_distribution;
    use crate::space::distributor::SizeRange;
    use crate::utils::size::DiskSize;
    use crate::volumes::planned::*;

    fn setup(level: MdLevel, disks: &[&str]) -> (DeviceGraph, PlannedDevices) {
        let mut graph = DeviceGraph::new();
        let mut partitions = Vec::new();
        for name in disks {
            graph.add(Device::Disk(Disk::new(name, DiskSize::gib(20))));
            let mut member = PlannedPartition::new(
                "/srv member",
                SizeRange::fixed(DiskSize::gib(5)),
                PartitionId::Raid,
                PartitionRole::MdMember("/dev/md/srv".to_string()),
            );
            member.disk = Some(name.to_string());
            partitions.push(member);
        }
        let planned = PlannedDevices {
            partitions,
            mds: vec![PlannedMd {
                name: "/dev/md/srv".to_string(),
                level,
                format: Formatting::new(FsType::Xfs, Some("/srv")),
                encryption: None,
            }],
            ..Default::default()
        };
        (graph, planned)
    }

    #[test]
    fn raid_built_from_members() {
        let (graph, planned) = setup(MdLevel::Raid1, &["/dev/sda", "/dev/sdb"]);
        let regions = graph
            .disks()
            .into_iter()
            .flat_map(|d| unused_slots(&graph, d))
            .collect::<Vec<_>>();
        let dist = find_distribution(&graph, &regions, &planned.partitions, &planned.lvm).unwrap();

        let settings = ProposalSettings::default();
        let facts = SystemFacts::default();
        let result = DevicesCreator::new(&settings, &facts)
            .materialize(graph, &planned, &dist)
            .unwrap();

        let g = &result.graph;
        let md = g.find_by_name("/dev/md/srv").unwrap();
        assert_eq!(g.parents(md).len(), 2);
        assert_eq!(g.blk_size(md), DiskSize::gib(5) - DiskSize::mib(1));
        assert!(g.formatted_as(md).is_some());
    }

    #[test]
    fn too_few_members_is_an_issue() {
        let (graph, planned) = setup(MdLevel::Raid5, &["/dev/sda", "/dev/sdb"]);
        let regions = graph
            .disks()
            .into_iter()
            .flat_map(|d| unused_slots(&graph, d))
            .collect::<Vec<_>>();
        let dist = find_distribution(&graph, &regions, &planned.partitions, &planned.lvm).unwrap();

        let settings = ProposalSettings::default();
        let facts = SystemFacts::default();
        let result = DevicesCreator::new(&settings, &facts)
            .materialize(graph, &planned, &dist)
            .unwrap();
        assert!(result.graph.find_by_name("/dev/md/srv").is_none());
        assert!(result.issues.has_errors());
        // Members made only for the array go away with it
        let g = &result.graph;
        assert!(!g
            .sids()
            .into_iter()
            .any(|sid| g.partition(sid).map(|p| p.id) == Some(PartitionId::Raid)));
        assert!(result.created.iter().all(|sid| g.contains(*sid)));
    }
}
