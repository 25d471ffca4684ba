//! Multi-device Btrfs

use super::{encryption, filesystem, member_sids, Creation};
use crate::devicegraph::device::Sid;
use crate::utils::error::MaterializeError;
use crate::volumes::planned::{PartitionRole, PlannedBtrfs, PlannedDevices, Reuse};
use tracing::info;

pub(super) fn create_btrfs(c: &mut Creation<'_>, planned: &PlannedDevices) -> Result<(), MaterializeError> {
    for btrfs in &planned.btrfs {
        let mandatory = btrfs.format.mount_point.as_deref() == Some("/");
        let members = member_sids(c, planned, &PartitionRole::BtrfsMember(btrfs.name.clone()));
        c.create_or_roll_back(&btrfs.name, mandatory, &members, |c| match &btrfs.reuse {
            Some(reuse) => reuse_btrfs(c, btrfs, reuse),
            None => new_btrfs(c, planned, btrfs),
        })?;
    }
    Ok(())
}

fn new_btrfs(c: &mut Creation<'_>, planned: &PlannedDevices, btrfs: &PlannedBtrfs) -> Result<(), MaterializeError> {
    let members = c.members(planned, &PartitionRole::BtrfsMember(btrfs.name.clone()));
    if members.is_empty() {
        return Err(MaterializeError::NoRegion(btrfs.name.clone()));
    }

    let mut blks: Vec<Sid> = Vec::with_capacity(members.len());
    for (index, sid) in members {
        let blk = match &planned.partitions[index].encryption {
            Some(enc) => encryption::encrypt(c, sid, enc)?,
            None => sid,
        };
        blks.push(blk);
    }

    let mut fs = filesystem::build(&btrfs.format);
    fs.data_raid_level = btrfs.data_raid_level;
    fs.metadata_raid_level = btrfs.metadata_raid_level;
    info!("Creating {} on {} device(s)", btrfs.name, blks.len());
    filesystem::create(c, &blks, fs, &btrfs.format)?;
    Ok(())
}

/// Existing multi-device Btrfs found through one of its members
fn reuse_btrfs(c: &mut Creation<'_>, btrfs: &PlannedBtrfs, reuse: &Reuse) -> Result<(), MaterializeError> {
    let missing = || MaterializeError::ReuseTargetMissing(reuse.name.clone());
    let member = c.graph.find_by_name(&reuse.name).ok_or_else(missing)?;
    let fs = c.graph.formatted_as(member).ok_or_else(missing)?;
    let existing = c.graph.filesystem(fs).cloned().ok_or_else(missing)?;

    // Levels stay as they are unless explicitly requested
    let data = btrfs.data_raid_level.or(existing.data_raid_level);
    let metadata = btrfs.metadata_raid_level.or(existing.metadata_raid_level);

    if reuse.reformat {
        let blks = c.graph.blk_devices_of(fs);
        c.graph.remove(fs);
        let mut new = filesystem::build(&btrfs.format);
        new.data_raid_level = data;
        new.metadata_raid_level = metadata;
        info!("Reformatting {} device(s) of {}", blks.len(), reuse.name);
        filesystem::create(c, &blks, new, &btrfs.format)?;
        return Ok(());
    }

    if let Some(current) = c.graph.device_mut(fs).and_then(|d| d.as_filesystem_mut()) {
        current.data_raid_level = data;
        current.metadata_raid_level = metadata;
    }
    info!("Keeping the Btrfs of {}", reuse.name);
    filesystem::mount(c, fs, &btrfs.format)
}
