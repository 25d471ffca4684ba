//! Volume groups, thin pools and logical volumes

use super::{create_error, filesystem, Creation};
use crate::devicegraph::device::*;
use crate::devicegraph::graph::Link;
use crate::proposal::issues::Issue;
use crate::space::distributor::{distribute, SizeRange};
use crate::utils::error::MaterializeError;
use crate::utils::size::DiskSize;
use crate::volumes::planned::{PlannedDevices, PlannedLv, PlannedVg};
use tracing::{debug, info, warn};

pub(super) fn create_vgs(c: &mut Creation<'_>, planned: &PlannedDevices) -> Result<(), MaterializeError> {
    for vg in &planned.vgs {
        let mandatory = vg
            .lvs
            .iter()
            .any(|lv| lv.format.mount_point.as_deref() == Some("/"));
        let pvs: Vec<Sid> = planned
            .lvm
            .iter()
            .position(|demand| demand.vg_name == vg.vg_name)
            .and_then(|j| c.pvs.get(&j))
            .cloned()
            .unwrap_or_default();
        c.create_or_roll_back(&format!("/dev/{}", vg.vg_name), mandatory, &pvs, |c| {
            create_vg(c, planned, vg)
        })?;
    }
    Ok(())
}

fn lv_name(vg: &PlannedVg, lv: &str) -> String {
    format!("/dev/{}/{}", vg.vg_name, lv)
}

/// Existing VG extended with the new PVs, keeping only the reused LVs
fn reuse_vg(c: &mut Creation<'_>, vg: &PlannedVg, existing: Sid, pvs: &[Sid]) -> Result<(), MaterializeError> {
    let name = format!("/dev/{}", vg.vg_name);
    info!("Reusing volume group {}", name);

    let keep: Vec<&str> = vg
        .lvs
        .iter()
        .filter_map(|lv| lv.reuse.as_ref().map(|r| r.name.as_str()))
        .collect();
    for child in c.graph.children(existing) {
        let Some(lv) = c.graph.device(child).and_then(|d| d.as_lv()) else {
            continue;
        };
        if keep.contains(&lv.name.as_str()) {
            continue;
        }
        let lv_name = lv.name.clone();
        c.graph.remove(child);
        info!("Deleting logical volume {}", lv_name);
    }

    for pv in pvs {
        c.graph
            .link(*pv, existing, Link::Holds)
            .map_err(|e| create_error(&name, e))?;
    }
    Ok(())
}

fn create_vg(c: &mut Creation<'_>, planned: &PlannedDevices, vg: &PlannedVg) -> Result<(), MaterializeError> {
    let name = format!("/dev/{}", vg.vg_name);
    let pvs: Vec<Sid> = planned
        .lvm
        .iter()
        .position(|demand| demand.vg_name == vg.vg_name)
        .and_then(|j| c.pvs.get(&j))
        .cloned()
        .unwrap_or_default();

    let vg_sid = match vg.reuse_name.as_deref().and_then(|n| c.graph.find_vg(n)) {
        Some(existing) => {
            reuse_vg(c, vg, existing, &pvs)?;
            existing
        }
        None => {
            if pvs.is_empty() {
                return Err(MaterializeError::NoRegion(name));
            }
            let sid = c
                .graph
                .create_vg(
                    LvmVg {
                        vg_name: vg.vg_name.clone(),
                        extent_size: vg.extent_size,
                    },
                    &pvs,
                )
                .map_err(|e| create_error(&name, e))?;
            debug!("Created {} on {} physical volume(s)", name, pvs.len());
            c.created.push(sid);
            sid
        }
    };

    let mut kept = DiskSize::zero();
    for lv in vg.lvs.iter().filter(|lv| lv.reuse.is_some()) {
        kept += reuse_lv(c, lv)?;
    }
    let available = c.graph.blk_size(vg_sid).saturating_sub(kept);

    let normal: Vec<&PlannedLv> = vg
        .lvs
        .iter()
        .filter(|lv| lv.reuse.is_none() && !lv.thin)
        .collect();
    let thin: Vec<&PlannedLv> = vg
        .lvs
        .iter()
        .filter(|lv| lv.reuse.is_none() && lv.thin)
        .collect();

    let extent = vg.extent_size;
    let pool_size = match &vg.thin_pool {
        Some(pool) if !thin.is_empty() => available
            .scale(pool.size_percent.min(100) as u64, 100)
            .floor(extent),
        _ => DiskSize::zero(),
    };

    let ranges: Vec<SizeRange> = normal.iter().map(|lv| lv.size).collect();
    let sizes = distribute(&ranges, available.saturating_sub(pool_size), extent)
        .map_err(|source| MaterializeError::DoesNotFit {
            volume: name.clone(),
            source,
        })?;
    for (lv, size) in normal.into_iter().zip(sizes) {
        let sid = create_lv(c, vg, vg_sid, lv, size, LvType::Normal)?;
        filesystem::format(c, &[sid], &lv.format)?;
    }

    if let Some(pool) = vg.thin_pool.as_ref().filter(|_| !thin.is_empty()) {
        create_thin(c, vg, vg_sid, &pool.name, pool_size, &thin)?;
    }
    Ok(())
}

fn create_thin(
    c: &mut Creation<'_>,
    vg: &PlannedVg,
    vg_sid: Sid,
    pool_name: &str,
    pool_size: DiskSize,
    thin: &[&PlannedLv],
) -> Result<(), MaterializeError> {
    let pool = c
        .graph
        .create_lv(
            vg_sid,
            LvmLv {
                name: lv_name(vg, pool_name),
                lv_name: pool_name.to_string(),
                size: pool_size,
                lv_type: LvType::ThinPool,
            },
        )
        .map_err(|e| create_error(&lv_name(vg, pool_name), e))?;
    c.created.push(pool);
    info!("Thin pool {} gets {}", lv_name(vg, pool_name), pool_size);

    let extent = vg.extent_size;
    let mut virtual_total = DiskSize::zero();
    for lv in thin {
        let size = if lv.size.desired.is_unlimited() {
            lv.size.min
        } else {
            lv.size.desired
        }
        .ceil(extent);
        virtual_total += size;
        let sid = create_lv(c, vg, pool, lv, size, LvType::Thin)?;
        filesystem::format(c, &[sid], &lv.format)?;
    }

    if virtual_total > pool_size {
        warn!("Thin pool {} is overcommitted", lv_name(vg, pool_name));
        c.issues.push(
            Issue::warning(format!("Thin pool {} is overcommitted", lv_name(vg, pool_name)))
                .with_description(format!("{} of thin volumes on a {} pool", virtual_total, pool_size))
                .with_device(pool),
        );
    }
    Ok(())
}

fn create_lv(
    c: &mut Creation<'_>,
    vg: &PlannedVg,
    holder: Sid,
    lv: &PlannedLv,
    size: DiskSize,
    lv_type: LvType,
) -> Result<Sid, MaterializeError> {
    let name = lv_name(vg, &lv.lv_name);
    let sid = c
        .graph
        .create_lv(
            holder,
            LvmLv {
                name: name.clone(),
                lv_name: lv.lv_name.clone(),
                size,
                lv_type,
            },
        )
        .map_err(|e| create_error(&name, e))?;
    debug!("Created logical volume {} ({})", name, size);
    c.created.push(sid);
    Ok(sid)
}

/// Keep an existing LV, returning its size
fn reuse_lv(c: &mut Creation<'_>, lv: &PlannedLv) -> Result<DiskSize, MaterializeError> {
    let Some(reuse) = &lv.reuse else {
        return Ok(DiskSize::zero());
    };
    let sid = c
        .graph
        .find_by_name(&reuse.name)
        .ok_or_else(|| MaterializeError::ReuseTargetMissing(reuse.name.clone()))?;
    let size = c.graph.blk_size(sid);

    if !reuse.reformat {
        if let Some(fs) = c.graph.formatted_as(sid) {
            info!("Keeping the filesystem of {}", reuse.name);
            filesystem::mount(c, fs, &lv.format)?;
            return Ok(size);
        }
    }
    c.graph.remove_descendants(sid);
    filesystem::format(c, &[sid], &lv.format)?;
    Ok(size)
}
