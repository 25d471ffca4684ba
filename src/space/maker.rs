//! Freeing disk space for the planned partitions
//!
//! Existing partitions are deleted or shrunk, one at a time, until the
//! planned partitions and the LVM demand fit into the free regions of the
//! candidate disks. Decisions are never reverted.

use crate::devicegraph::device::*;
use crate::devicegraph::graph::DeviceGraph;
use crate::devicegraph::region::{self, FreeRegion};
use crate::proposal::issues::{Issue, IssuesList};
use crate::proposal::settings::{DeleteMode, ProposalSettings};
use crate::space::distribution::{self, PartitionDistribution};
use crate::utils::error::SpaceMakerError;
use crate::utils::size::DiskSize;
use crate::volumes::planned::PlannedDevices;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::{debug, info};

/// Something the space maker decided to do with an existing device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "action")]
pub enum PlannedAction {
    Delete {
        sid: Sid,
        name: String,
    },
    Shrink {
        sid: Sid,
        name: String,
        old_size: DiskSize,
        new_size: DiskSize,
    },
    /// Explicitly left alone because the plan reuses it
    Keep {
        sid: Sid,
        name: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Category {
    Windows,
    Linux,
    Other,
}

#[derive(Debug, Clone)]
pub struct SpaceMakerOutcome {
    pub actions: Vec<PlannedAction>,
    pub regions: Vec<FreeRegion>,
    pub distribution: PartitionDistribution,
    pub issues: IssuesList,
}

/// Disks the proposal may use, sorted by name
pub fn candidate_disks(graph: &DeviceGraph, settings: &ProposalSettings) -> Vec<Sid> {
    graph
        .disks()
        .into_iter()
        .filter(|disk| {
            settings.candidate_devices.is_empty()
                || settings
                    .candidate_devices
                    .contains(&graph.display_name(*disk))
        })
        .collect()
}

/// Category of an existing partition for the delete and resize policies
pub fn category(graph: &DeviceGraph, partition: Sid) -> Category {
    let fs = graph
        .formatted_as(partition)
        .and_then(|fs| graph.filesystem(fs));
    if let Some(fs) = fs {
        if fs.windows_system || fs.fs_type == FsType::Ntfs {
            return Category::Windows;
        }
    }

    let id = graph.partition(partition).map(|p| p.id);
    let linux_id = id.map(PartitionId::is_linux_system).unwrap_or(false);
    let linux_fs = fs.map(|f| f.fs_type.is_linux_native()).unwrap_or(false);
    let boot_support = matches!(id, Some(PartitionId::Esp | PartitionId::BiosBoot));
    if (linux_id || linux_fs) && !boot_support {
        Category::Linux
    } else {
        Category::Other
    }
}

pub struct SpaceMaker<'a> {
    settings: &'a ProposalSettings,
}

struct Run<'a, 'g> {
    graph: &'g mut DeviceGraph,
    planned: &'a PlannedDevices,
    candidates: Vec<Sid>,
    protected: BTreeSet<Sid>,
    actions: Vec<PlannedAction>,
    issues: IssuesList,
}

impl<'a, 'g> Run<'a, 'g> {
    fn regions(&self) -> Vec<FreeRegion> {
        self.candidates
            .iter()
            .flat_map(|disk| self.graph.unused_slots(*disk))
            .collect()
    }

    fn distribution(&self) -> Option<PartitionDistribution> {
        distribution::find_distribution(
            self.graph,
            &self.regions(),
            &self.planned.partitions,
            &self.planned.lvm,
        )
    }

    fn grain(&self) -> DiskSize {
        self.candidates
            .iter()
            .filter_map(|d| self.graph.disk(*d).map(|d| d.grain))
            .max()
            .unwrap_or(DEFAULT_GRAIN)
    }

    fn missing(&self) -> DiskSize {
        distribution::missing_space(
            &self.regions(),
            &self.planned.partitions,
            &self.planned.lvm,
            self.grain(),
        )
    }

    /// Whether a device and everything on top of it may be removed
    fn touchable(&self, sid: Sid) -> bool {
        if self.protected.contains(&sid) {
            return false;
        }
        self.graph.descendants(sid).into_iter().all(|d| {
            !self.protected.contains(&d)
                && self
                    .graph
                    .disks_of(d)
                    .iter()
                    .all(|disk| self.candidates.contains(disk))
        })
    }

    /// Deletable partitions of the candidate disks, last partition first per disk
    fn partitions_in(&self, wanted: Category) -> Vec<Sid> {
        self.candidates
            .iter()
            .flat_map(|disk| self.graph.partitions(*disk).into_iter().rev())
            .filter(|sid| {
                self.graph
                    .partition(*sid)
                    .map(|p| p.kind != PartitionType::Extended)
                    .unwrap_or(false)
            })
            .filter(|sid| category(self.graph, *sid) == wanted)
            .filter(|sid| self.touchable(*sid))
            .collect()
    }

    fn delete(&mut self, sid: Sid) {
        let name = self.graph.display_name(sid);
        let extended = self
            .graph
            .partition(sid)
            .filter(|p| p.kind == PartitionType::Logical)
            .and_then(|_| self.graph.parents(sid).first().copied())
            .and_then(|disk| {
                self.graph.partitions(disk).into_iter().find(|p| {
                    self.graph
                        .partition(*p)
                        .map(|p| p.kind == PartitionType::Extended)
                        .unwrap_or(false)
                })
            });

        info!("Deleting {} to make space", name);
        let removed = self.graph.remove(sid);
        debug!("Removed {} devices along with {}", removed.len(), name);
        self.actions.push(PlannedAction::Delete { sid, name });

        // An extended partition without logical partitions is dropped too
        if let Some(ext) = extended {
            let disk = self.graph.disk_of(ext);
            let logical_left = disk
                .map(|d| {
                    self.graph.partitions(d).into_iter().any(|p| {
                        self.graph
                            .partition(p)
                            .map(|p| p.kind == PartitionType::Logical)
                            .unwrap_or(false)
                    })
                })
                .unwrap_or(false);
            if !logical_left {
                let name = self.graph.display_name(ext);
                self.graph.remove(ext);
                self.actions.push(PlannedAction::Delete { sid: ext, name });
            }
        }
    }

    /// Delete partitions one by one until the demand fits
    fn delete_until_fits(&mut self, sids: Vec<Sid>) -> Option<PartitionDistribution> {
        for sid in sids {
            if !self.graph.contains(sid) || !self.touchable(sid) {
                continue;
            }
            self.delete(sid);
            if let Some(dist) = self.distribution() {
                return Some(dist);
            }
        }
        None
    }

    /// Shrink a partition by the smallest whole number of grains that makes
    /// the demand fit, or as much as allowed when nothing does
    fn shrink(&mut self, sid: Sid) -> Option<PartitionDistribution> {
        let info = self.graph.detect_resize_info(sid);
        let Some(part) = self.graph.partition(sid) else {
            return None;
        };
        if !info.resize_ok {
            debug!("{} cannot be resized: {}", part.name, info.reasons.join(", "));
            return None;
        }
        let old_size = part.size();
        let grain = self
            .graph
            .disk_of(sid)
            .and_then(|d| self.graph.disk(d))
            .map(|d| d.grain)
            .unwrap_or(DEFAULT_GRAIN);
        let floor = info.min_size.ceil(grain);
        if floor >= old_size {
            return None;
        }
        let max_steps = (old_size - floor).bytes() / grain.bytes();
        if max_steps == 0 {
            return None;
        }

        let fits_after = |steps: u64| -> bool {
            let mut trial = self.graph.clone();
            let new_size = old_size - grain.scale(steps, 1);
            trial.resize_partition(sid, new_size).is_ok() && {
                let regions: Vec<FreeRegion> = self
                    .candidates
                    .iter()
                    .flat_map(|disk| trial.unused_slots(*disk))
                    .collect();
                distribution::find_distribution(
                    &trial,
                    &regions,
                    &self.planned.partitions,
                    &self.planned.lvm,
                )
                .is_some()
            }
        };

        let steps = if fits_after(max_steps) {
            // Start from the estimate, then search for the smallest step count
            let estimate = (self.missing().ceil(grain).bytes() / grain.bytes()).clamp(1, max_steps);
            let (mut lo, mut hi) = if fits_after(estimate) {
                (0, estimate)
            } else {
                (estimate, max_steps)
            };
            while hi - lo > 1 {
                let mid = lo + (hi - lo) / 2;
                if fits_after(mid) {
                    hi = mid;
                } else {
                    lo = mid;
                }
            }
            hi
        } else {
            max_steps
        };

        let new_size = old_size - grain.scale(steps, 1);
        let name = self.graph.display_name(sid);
        if self.graph.resize_partition(sid, new_size).is_err() {
            return None;
        }
        info!("Shrinking {} from {} to {}", name, old_size, new_size);
        self.actions.push(PlannedAction::Shrink {
            sid,
            name,
            old_size,
            new_size,
        });
        self.distribution()
    }

    fn finish(self, distribution: PartitionDistribution) -> SpaceMakerOutcome {
        let mut regions = self.regions();
        for action in &self.actions {
            if let PlannedAction::Keep { sid, .. } = action {
                regions.extend(FreeRegion::reused(self.graph, *sid));
            }
        }
        info!(
            "Space found in {} region(s) after {} action(s)",
            distribution.assignments.len(),
            self.actions.len()
        );
        SpaceMakerOutcome {
            actions: self.actions,
            regions,
            distribution,
            issues: self.issues,
        }
    }

    /// Disks whose partition table cannot take new partitions at all
    fn blocked_disks(&self) -> Vec<Sid> {
        self.candidates
            .iter()
            .copied()
            .filter(|disk| match region::slot_info(self.graph, *disk) {
                None => true,
                Some(slots) => slots.free_primary == 0 && !slots.has_extended,
            })
            .collect()
    }

    /// Wipe a disk and give it a usable partition table
    fn replace_table(&mut self, disk: Sid, ptable: PartitionTableType) -> bool {
        let children = self.graph.children(disk);
        if !children.iter().all(|c| self.touchable(*c)) {
            debug!(
                "{} holds devices that must be kept, not replacing its partition table",
                self.graph.display_name(disk)
            );
            return false;
        }
        for child in children {
            if !self.graph.contains(child) {
                continue;
            }
            let name = self.graph.display_name(child);
            self.graph.remove(child);
            self.issues.push(
                Issue::warning(format!("{} is deleted to create a new partition table", name))
                    .with_description(
                        "The existing partition table cannot hold the new partitions".to_string(),
                    )
                    .with_device(child),
            );
            self.actions.push(PlannedAction::Delete { sid: child, name });
        }
        self.graph.create_ptable(disk, ptable).is_ok()
    }
}

impl<'a> SpaceMaker<'a> {
    pub fn new(settings: &'a ProposalSettings) -> Self {
        Self { settings }
    }

    fn mode(&self, category: Category) -> DeleteMode {
        match category {
            Category::Windows => self.settings.windows_delete_mode,
            Category::Linux => self.settings.linux_delete_mode,
            Category::Other => self.settings.other_delete_mode,
        }
    }

    fn may_shrink(&self, category: Category) -> bool {
        match category {
            Category::Windows => self.settings.resize_windows,
            Category::Linux | Category::Other => self.settings.resize_others,
        }
    }

    /// Devices the plan reuses, with everything they are built on
    fn protected(graph: &DeviceGraph, planned: &PlannedDevices) -> BTreeSet<Sid> {
        let reused = planned
            .reused_names()
            .into_iter()
            .filter_map(|name| graph.find_by_name(&name))
            .chain(
                planned
                    .reused_vgs()
                    .into_iter()
                    .filter_map(|vg| graph.find_vg(vg)),
            );
        let mut protected = BTreeSet::new();
        for sid in reused {
            protected.insert(sid);
            protected.extend(graph.ancestors(sid));
            // A kept filesystem keeps every member it spans
            if let Some(fs) = graph.formatted_as(sid) {
                protected.insert(fs);
                for member in graph.blk_devices_of(fs) {
                    protected.insert(member);
                    protected.extend(graph.ancestors(member));
                }
            }
        }
        protected
    }

    fn ptable_for(&self, graph: &DeviceGraph, disk: Sid) -> Option<PartitionTableType> {
        let d = graph.disk(disk)?;
        let ptable = match self.settings.ptable_type {
            Some(pt) if !d.is_dasd() => pt,
            _ => d.preferred_ptable_type(),
        };
        // A table that would block the disk again is useless
        let usable = ptable != PartitionTableType::ImplicitDasd
            && !(ptable == PartitionTableType::Msdos && d.size > ptable.max_disk_size());
        usable.then_some(ptable)
    }

    /// Make room for `planned` on the candidate disks of `graph`
    pub fn provide_space(
        &self,
        graph: &mut DeviceGraph,
        planned: &PlannedDevices,
    ) -> Result<SpaceMakerOutcome, SpaceMakerError> {
        let candidates = candidate_disks(graph, self.settings);
        if candidates.is_empty() {
            return Err(SpaceMakerError::NoUsableDisk);
        }
        let protected = Self::protected(graph, planned);
        let mut run = Run {
            graph,
            planned,
            candidates,
            protected,
            actions: Vec::new(),
            issues: IssuesList::new(),
        };

        for sid in run.protected.iter().copied().collect::<Vec<_>>() {
            if run.graph.partition(sid).is_some() {
                let name = run.graph.display_name(sid);
                debug!("Keeping {} for reuse", name);
                run.actions.push(PlannedAction::Keep { sid, name });
            }
        }

        // Everything in a category with mode "all" goes first
        for cat in [Category::Linux, Category::Other, Category::Windows] {
            if self.mode(cat) == DeleteMode::All {
                for sid in run.partitions_in(cat) {
                    if run.graph.contains(sid) && run.touchable(sid) {
                        run.delete(sid);
                    }
                }
            }
        }

        if let Some(dist) = run.distribution() {
            return Ok(run.finish(dist));
        }

        // Windows partitions that can be shrunk are deleted only afterwards
        let mut deferred = Vec::new();
        for cat in [Category::Linux, Category::Other, Category::Windows] {
            if self.mode(cat) != DeleteMode::OnDemand {
                continue;
            }
            let mut now = Vec::new();
            for sid in run.partitions_in(cat) {
                let resizable = run.graph.detect_resize_info(sid).resize_ok;
                if cat == Category::Windows && self.settings.resize_windows && resizable {
                    deferred.push(sid);
                } else {
                    now.push(sid);
                }
            }
            if let Some(dist) = run.delete_until_fits(now) {
                return Ok(run.finish(dist));
            }
        }

        let shrinkable: Vec<Sid> = [Category::Windows, Category::Linux, Category::Other]
            .into_iter()
            .filter(|cat| self.may_shrink(*cat))
            .flat_map(|cat| run.partitions_in(cat))
            .collect();
        for sid in shrinkable {
            if !run.graph.contains(sid) {
                continue;
            }
            if let Some(dist) = run.shrink(sid) {
                return Ok(run.finish(dist));
            }
        }

        if let Some(dist) = run.delete_until_fits(deferred) {
            return Ok(run.finish(dist));
        }

        for disk in run.blocked_disks() {
            let Some(ptable) = self.ptable_for(run.graph, disk) else {
                continue;
            };
            info!(
                "Replacing the partition table of {} with {}",
                run.graph.display_name(disk),
                ptable
            );
            if run.replace_table(disk, ptable) {
                if let Some(dist) = run.distribution() {
                    return Ok(run.finish(dist));
                }
            }
        }

        let missing = run.missing();
        info!("Cannot make enough space, {} missing", missing);
        Err(SpaceMakerError::NotEnoughSpace { missing })
    }
}
