//! Creating the planned devices in the working graph
//!
//! Partitions are created first, region by region, following the
//! distribution found by the space maker. Their content (encryption,
//! filesystems, LVM, RAID, bcache, multi-device Btrfs) comes afterwards in
//! planning order, so boot partitions go before user volumes.

mod bcache;
mod btrfs;
mod encryption;
mod filesystem;
mod lvm;
mod partitions;
mod raid;

pub use encryption::mapper_name;
pub use filesystem::resolve_mount_by;

use crate::devicegraph::device::{PartitionType, Sid};
use crate::devicegraph::graph::DeviceGraph;
use crate::proposal::facts::SystemFacts;
use crate::proposal::issues::{Issue, IssuesList};
use crate::proposal::settings::ProposalSettings;
use crate::space::distribution::PartitionDistribution;
use crate::utils::error::{MaterializeError, ProposalError};
use crate::volumes::planned::{PartitionRole, PlannedDevices, PlannedPartition};
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Outcome of a successful materialization
#[derive(Debug, Clone)]
pub struct CreatorResult {
    pub graph: DeviceGraph,
    pub issues: IssuesList,
    /// New devices, in creation order
    pub created: Vec<Sid>,
}

pub struct DevicesCreator<'a> {
    settings: &'a ProposalSettings,
    facts: &'a SystemFacts,
}

/// Working state of one materialization
pub(crate) struct Creation<'a> {
    graph: DeviceGraph,
    issues: IssuesList,
    created: Vec<Sid>,
    settings: &'a ProposalSettings,
    facts: &'a SystemFacts,
    /// Partition created or reused for each planned partition
    partitions: BTreeMap<usize, Sid>,
    /// New PVs for each LVM demand
    pvs: BTreeMap<usize, Vec<Sid>>,
}

/// Devices created for the planned partitions with a role
fn member_sids(c: &Creation<'_>, planned: &PlannedDevices, role: &PartitionRole) -> Vec<Sid> {
    c.members(planned, role).into_iter().map(|(_, sid)| sid).collect()
}

fn create_error(device: &str, err: ProposalError) -> MaterializeError {
    MaterializeError::Create {
        device: device.to_string(),
        reason: err.to_string(),
    }
}

impl<'a> Creation<'a> {
    fn new(graph: DeviceGraph, settings: &'a ProposalSettings, facts: &'a SystemFacts) -> Self {
        Self {
            graph,
            issues: IssuesList::new(),
            created: Vec::new(),
            settings,
            facts,
            partitions: BTreeMap::new(),
            pvs: BTreeMap::new(),
        }
    }

    /// Record a failed volume; only mandatory ones abort the attempt
    fn fail(&mut self, device: &str, mandatory: bool, err: MaterializeError) -> Result<(), MaterializeError> {
        if mandatory {
            return Err(err);
        }
        self.issues.push(
            Issue::error(format!("{} could not be created", device))
                .with_details(err.to_string()),
        );
        Ok(())
    }

    /// Build one device; on failure the graph goes back to how it was and
    /// the new partitions below `members` are dropped with it
    fn create_or_roll_back<F>(
        &mut self,
        device: &str,
        mandatory: bool,
        members: &[Sid],
        build: F,
    ) -> Result<(), MaterializeError>
    where
        F: FnOnce(&mut Self) -> Result<(), MaterializeError>,
    {
        let snapshot = self.graph.clone();
        let created = self.created.len();
        let Err(err) = build(self) else {
            return Ok(());
        };

        self.graph = snapshot;
        self.created.truncate(created);
        for member in members {
            let mut stack = self.graph.ancestors(*member);
            stack.push(*member);
            for sid in stack {
                let own = self
                    .graph
                    .partition(sid)
                    .map(|p| p.kind != PartitionType::Extended)
                    .unwrap_or(false);
                if own && self.created.contains(&sid) {
                    debug!("Dropping {}, left without a device to join", self.graph.display_name(sid));
                    self.graph.remove(sid);
                }
            }
        }
        let graph = &self.graph;
        self.created.retain(|sid| graph.contains(*sid));
        self.partitions.retain(|_, sid| graph.contains(*sid));
        for pvs in self.pvs.values_mut() {
            pvs.retain(|sid| graph.contains(*sid));
        }
        self.fail(device, mandatory, err)
    }

    /// Partitions planned with a role, paired with what was created for them
    fn members(&self, planned: &PlannedDevices, role: &PartitionRole) -> Vec<(usize, Sid)> {
        planned
            .partitions
            .iter()
            .enumerate()
            .filter(|(_, p)| &p.role == role)
            .filter_map(|(i, _)| self.partitions.get(&i).map(|sid| (i, *sid)))
            .collect()
    }

    /// Encryption and filesystem of a partition holding a volume directly
    fn fill_partition(&mut self, index: usize, planned: &PlannedPartition) -> Result<(), MaterializeError> {
        let Some(sid) = self.partitions.get(&index).copied() else {
            return Ok(());
        };

        if let Some(reuse) = planned.reuse.as_ref().filter(|r| !r.reformat) {
            if let Some(fs) = self.graph.formatted_as(sid) {
                info!("Keeping the filesystem of {}", reuse.name);
                if let Some(format) = &planned.format {
                    filesystem::mount(self, fs, format)?;
                }
                return Ok(());
            }
        }

        // A reused partition may already carry an empty encryption layer
        let existing = planned
            .reuse
            .as_ref()
            .and_then(|_| self.graph.encryption_of(sid));
        let blk = match (&planned.encryption, existing) {
            (Some(_), Some(enc)) => {
                info!("Keeping the encryption of {}", self.graph.display_name(sid));
                enc
            }
            (Some(enc), None) => encryption::encrypt(self, sid, enc)?,
            (None, Some(_)) => {
                self.graph.remove_descendants(sid);
                sid
            }
            (None, None) => sid,
        };
        if let Some(format) = &planned.format {
            filesystem::format(self, &[blk], format)?;
        }
        Ok(())
    }

    fn finish(self) -> CreatorResult {
        CreatorResult {
            graph: self.graph,
            issues: self.issues,
            created: self.created,
        }
    }
}

impl<'a> DevicesCreator<'a> {
    pub fn new(settings: &'a ProposalSettings, facts: &'a SystemFacts) -> Self {
        Self { settings, facts }
    }

    /// Create everything in `planned` on `graph`, using the regions of `distribution`
    pub fn materialize(
        &self,
        graph: DeviceGraph,
        planned: &PlannedDevices,
        distribution: &PartitionDistribution,
    ) -> Result<CreatorResult, MaterializeError> {
        let mut creation = Creation::new(graph, self.settings, self.facts);

        partitions::create_partitions(&mut creation, planned, distribution)?;
        partitions::reuse_partitions(&mut creation, planned)?;

        for (index, partition) in planned.partitions.iter().enumerate() {
            if !matches!(partition.role, PartitionRole::Boot | PartitionRole::Volume) {
                continue;
            }
            creation.create_or_roll_back(&partition.label, partition.mandatory, &[], |c| {
                c.fill_partition(index, partition)
            })?;
        }

        lvm::create_vgs(&mut creation, planned)?;
        raid::create_mds(&mut creation, planned)?;
        bcache::create_bcaches(&mut creation, planned)?;
        btrfs::create_btrfs(&mut creation, planned)?;

        info!("Created {} device(s)", creation.created.len());
        Ok(creation.finish())
    }
}
