//! New partitions laid out inside their assigned regions

use super::{create_error, encryption, Creation};
use crate::devicegraph::device::*;
use crate::devicegraph::region::slot_info;
use crate::space::distribution::{PartitionDistribution, RegionAssignment, Slot};
use crate::space::distributor::{distribute, SizeRange};
use crate::utils::error::MaterializeError;
use crate::volumes::planned::PlannedDevices;
use tracing::{debug, info};

pub(super) fn create_partitions(
    c: &mut Creation<'_>,
    planned: &PlannedDevices,
    distribution: &PartitionDistribution,
) -> Result<(), MaterializeError> {
    let mut assignments: Vec<&RegionAssignment> = distribution.assignments.iter().collect();
    assignments.sort_by(|a, b| {
        a.region
            .disk_name
            .cmp(&b.region.disk_name)
            .then(a.region.start.cmp(&b.region.start))
    });
    for assignment in assignments {
        create_in_region(c, planned, assignment)?;
    }
    Ok(())
}

fn ensure_ptable(c: &mut Creation<'_>, disk: Sid) -> Result<(), MaterializeError> {
    let Some(d) = c.graph.disk(disk) else {
        return Err(MaterializeError::NoRegion(format!("disk {}", disk)));
    };
    if d.ptable.is_some() {
        return Ok(());
    }
    let name = d.name.clone();
    let ptable = slot_info(&c.graph, disk)
        .map(|slots| slots.ptable)
        .unwrap_or_else(|| d.preferred_ptable_type());
    info!("Creating a {} partition table on {}", ptable, name);
    c.graph
        .create_ptable(disk, ptable)
        .map_err(|e| create_error(&name, e))?;
    Ok(())
}

fn slot_label(planned: &PlannedDevices, slot: Slot) -> String {
    match slot {
        Slot::Partition(i) => planned.partitions[i].label.clone(),
        Slot::Pv(j) => format!("physical volume of {}", planned.lvm[j].vg_name),
    }
}

fn create_in_region(
    c: &mut Creation<'_>,
    planned: &PlannedDevices,
    assignment: &RegionAssignment,
) -> Result<(), MaterializeError> {
    let region = &assignment.region;
    let disk = region.disk;
    ensure_ptable(c, disk)?;
    let grain = c
        .graph
        .disk(disk)
        .map(|d| d.grain)
        .unwrap_or(DEFAULT_GRAIN);

    let ranges: Vec<SizeRange> = assignment.items.iter().map(|(_, r)| *r).collect();
    let sizes = distribute(&ranges, assignment.available(), grain).map_err(|source| {
        MaterializeError::DoesNotFit {
            volume: format!("free space at {} of {}", region.start, region.disk_name),
            source,
        }
    })?;

    let mut cursor = region.start;
    for (k, ((slot, _), size)) in assignment.items.iter().zip(sizes).enumerate() {
        let logical = assignment.logical_from.map(|first| k >= first).unwrap_or(false);
        let label = slot_label(planned, *slot);

        if logical {
            if assignment.new_extended && assignment.logical_from == Some(k) {
                let length = region.end() - cursor;
                let extended = c
                    .graph
                    .create_partition(disk, Region::new(cursor, length), PartitionId::Extended, PartitionType::Extended)
                    .map_err(|e| create_error(&region.disk_name, e))?;
                debug!("Extended partition {} spans {}", c.graph.display_name(extended), length);
                c.created.push(extended);
            }
            // Every logical partition but the first of an existing extended
            // one is preceded by its own EBR
            if !(region.logical && k == 0) {
                cursor += grain;
            }
        }

        let id = match slot {
            Slot::Partition(i) => planned.partitions[*i].partition_id,
            Slot::Pv(_) => PartitionId::Lvm,
        };
        let kind = if logical {
            PartitionType::Logical
        } else {
            PartitionType::Primary
        };
        let sid = c
            .graph
            .create_partition(disk, Region::new(cursor, size), id, kind)
            .map_err(|e| create_error(&label, e))?;
        cursor += size;
        c.created.push(sid);
        info!("{} goes to {} ({})", label, c.graph.display_name(sid), size);

        match slot {
            Slot::Partition(i) => {
                c.partitions.insert(*i, sid);
            }
            Slot::Pv(j) => {
                let blk = match &planned.lvm[*j].encryption {
                    Some(enc) => encryption::encrypt(c, sid, enc)?,
                    None => sid,
                };
                let pv = c.graph.create_pv(blk).map_err(|e| create_error(&label, e))?;
                c.created.push(pv);
                c.pvs.entry(*j).or_default().push(pv);
            }
        }
    }
    Ok(())
}

/// Map the planned partitions reusing existing devices to them
pub(super) fn reuse_partitions(c: &mut Creation<'_>, planned: &PlannedDevices) -> Result<(), MaterializeError> {
    for (index, partition) in planned.partitions.iter().enumerate() {
        let Some(reuse) = &partition.reuse else {
            continue;
        };
        match c.graph.find_by_name(&reuse.name) {
            Some(sid) => {
                if reuse.reformat {
                    let removed = c.graph.remove_descendants(sid);
                    debug!("Wiped {} device(s) from {}", removed.len(), reuse.name);
                }
                info!("Reusing {} for {}", reuse.name, partition.label);
                c.partitions.insert(index, sid);
            }
            None => {
                let err = MaterializeError::ReuseTargetMissing(reuse.name.clone());
                c.fail(&partition.label, partition.mandatory, err)?;
            }
        }
    }
    Ok(())
}
