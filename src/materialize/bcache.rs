//! Bcache devices

use super::{create_error, encryption, filesystem, member_sids, Creation};
use crate::devicegraph::device::Bcache;
use crate::utils::error::MaterializeError;
use crate::volumes::planned::{PartitionRole, PlannedBcache, PlannedDevices};
use tracing::info;

pub(super) fn create_bcaches(c: &mut Creation<'_>, planned: &PlannedDevices) -> Result<(), MaterializeError> {
    for bcache in &planned.bcaches {
        let mandatory = bcache.format.mount_point.as_deref() == Some("/");
        let mut members = member_sids(c, planned, &PartitionRole::BcacheBacking(bcache.name.clone()));
        members.extend(member_sids(c, planned, &PartitionRole::BcacheCaching(bcache.name.clone())));
        c.create_or_roll_back(&bcache.name, mandatory, &members, |c| {
            create_bcache(c, planned, bcache)
        })?;
    }
    Ok(())
}

fn create_bcache(c: &mut Creation<'_>, planned: &PlannedDevices, bcache: &PlannedBcache) -> Result<(), MaterializeError> {
    let backing = c
        .members(planned, &PartitionRole::BcacheBacking(bcache.name.clone()))
        .first()
        .map(|(_, sid)| *sid)
        .ok_or_else(|| MaterializeError::NoRegion(format!("backing device of {}", bcache.name)))?;
    // Without its caching partition the device still works, uncached
    let caching = c
        .members(planned, &PartitionRole::BcacheCaching(bcache.name.clone()))
        .first()
        .map(|(_, sid)| *sid);

    let sid = c
        .graph
        .create_bcache(
            Bcache {
                name: bcache.name.clone(),
                cache_mode: bcache.cache_mode,
            },
            backing,
            caching,
        )
        .map_err(|e| create_error(&bcache.name, e))?;
    c.created.push(sid);
    info!(
        "Created {} ({})",
        bcache.name,
        if caching.is_some() { "cached" } else { "no cache" }
    );

    let blk = match &bcache.encryption {
        Some(enc) => encryption::encrypt(c, sid, enc)?,
        None => sid,
    };
    filesystem::format(c, &[blk], &bcache.format)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::super::DevicesCreator;
    use crate::devicegraph::device::*;
    use crate::devicegraph::graph::{DeviceGraph, Link};
    use crate::devicegraph::region::unused_slots;
    use crate::proposal::facts::SystemFacts;
    use crate::proposal::settings::ProposalSettings;
    use crate::space::distribution::find_distribution;
    use crate::space::distributor::SizeRange;
    use crate::utils::size::DiskSize;
    use crate::volumes::planned::*;

    #[test]
    fn bcache_links_backing_and_caching() {
        let mut graph = DeviceGraph::new();
        graph.add(Device::Disk(Disk::new("/dev/sda", DiskSize::gib(100))));
        graph.add(Device::Disk(Disk::new("/dev/nvme0n1", DiskSize::gib(20))));

        let name = "/dev/bcache0".to_string();
        let mut backing = PlannedPartition::new(
            "backing",
            SizeRange::fixed(DiskSize::gib(50)),
            PartitionId::Linux,
            PartitionRole::BcacheBacking(name.clone()),
        );
        backing.disk = Some("/dev/sda".to_string());
        let mut caching = PlannedPartition::new(
            "cache",
            SizeRange::fixed(DiskSize::gib(10)),
            PartitionId::Linux,
            PartitionRole::BcacheCaching(name.clone()),
        );
        caching.disk = Some("/dev/nvme0n1".to_string());
        let planned = PlannedDevices {
            partitions: vec![backing, caching],
            bcaches: vec![PlannedBcache {
                name: name.clone(),
                cache_mode: CacheMode::Writeback,
                format: Formatting::new(FsType::Ext4, Some("/data")),
                encryption: None,
            }],
            ..Default::default()
        };
        let regions: Vec<_> = graph
            .disks()
            .into_iter()
            .flat_map(|d| unused_slots(&graph, d))
            .collect();
        let dist = find_distribution(&graph, &regions, &planned.partitions, &planned.lvm).unwrap();

        let settings = ProposalSettings::default();
        let facts = SystemFacts::default();
        let result = DevicesCreator::new(&settings, &facts)
            .materialize(graph, &planned, &dist)
            .unwrap();

        let g = &result.graph;
        let bcache = g.find_by_name(&name).unwrap();
        let sda1 = g.find_by_name("/dev/sda1").unwrap();
        let nvme = g.find_by_name("/dev/nvme0n1p1").unwrap();
        assert_eq!(g.link_between(sda1, bcache), Some(Link::Holds));
        assert_eq!(g.link_between(nvme, bcache), Some(Link::Caches));
        assert_eq!(g.blk_size(bcache), DiskSize::gib(50));
        assert!(g.formatted_as(bcache).is_some());
    }
}
